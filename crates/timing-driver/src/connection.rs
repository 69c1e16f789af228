// SPDX-License-Identifier: AGPL-3.0-only

//! Connections file and device opening
//!
//! The connections file maps device ids to transport URIs, names the boards
//! making up each fleet group, and carries the endpoint address → fanout
//! slot table used for delay measurement.
//!
//! ```toml
//! [devices.OVLD_TUN]
//! uri = "sim://overlord"
//!
//! [devices.FO0_TUN]
//! uri = "sim://fanout"
//!
//! [groups.ovld]
//! overlord = "OVLD_TUN"
//! fanouts = ["FO0_TUN"]
//!
//! [[address_map]]
//! address = 0x05
//! fanout = 0
//! slot = 2
//! ```
//!
//! Opening a device looks the URI scheme up among registered
//! [`TransportFactory`] implementations. `sim://` is always available.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use timing_regs::{fanout, master};
use tracing::{debug, info};

use crate::backends::SimTransport;
use crate::board::{Board, BoardRole, Delays};
use crate::error::{Result, TimingError};
use crate::fleet::{AddressMap, Fleet, SlotMapping};
use crate::session::RegisterSession;

/// Opens register sessions for one URI scheme
pub trait TransportFactory: Debug {
    /// URI scheme served (`"sim"` for `sim://...`)
    fn scheme(&self) -> &str;

    /// Open a session to device `id` at `uri`
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be reached or the URI is malformed.
    fn open(&self, id: &str, uri: &str) -> Result<Box<dyn RegisterSession>>;
}

/// Boards making up one fleet group
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupSpec {
    /// Overlord device id
    pub overlord: String,
    /// Fanout device ids; position is the fanout number
    #[serde(default)]
    pub fanouts: Vec<String>,
}

impl GroupSpec {
    /// Built-in group definitions used when the file omits them
    pub fn builtin(name: &str) -> Option<Self> {
        let (overlord, fanout0) = match name {
            "ovld" => ("OVLD_TUN", "FO0_TUN"),
            "vst" => ("SECONDARY_TUN", "TERTIARY_FO_TUN"),
            _ => return None,
        };
        Some(Self {
            overlord: overlord.to_string(),
            fanouts: vec![fanout0.to_string()],
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConnectionsFile {
    #[serde(default)]
    devices: BTreeMap<String, DeviceEntry>,
    #[serde(default)]
    groups: BTreeMap<String, GroupSpec>,
    #[serde(default)]
    address_map: Vec<AddressEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeviceEntry {
    uri: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AddressEntry {
    address: u32,
    fanout: u32,
    slot: u32,
}

/// Device registry loaded from a connections file
#[derive(Debug)]
pub struct ConnectionManager {
    source: PathBuf,
    devices: BTreeMap<String, String>,
    groups: BTreeMap<String, GroupSpec>,
    address_map: AddressMap,
    factories: Vec<Box<dyn TransportFactory>>,
    timeout: Option<Duration>,
}

impl ConnectionManager {
    /// Load a connections file
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read, `Config` if it does not parse
    /// or carries an out-of-range address mapping.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading connections from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text, path)
    }

    /// Parse connections from TOML text
    ///
    /// # Errors
    ///
    /// Returns `Config` if the text does not parse or an address mapping is
    /// out of range.
    pub fn from_toml(text: &str, source: impl Into<PathBuf>) -> Result<Self> {
        let source = source.into();
        let file: ConnectionsFile =
            toml::from_str(text).map_err(|e| TimingError::config(&source, e.to_string()))?;

        let mut address_map = AddressMap::default();
        for entry in file.address_map {
            if !(master::MIN_ENDPOINT_ADDRESS..=master::MAX_ENDPOINT_ADDRESS).contains(&entry.address)
            {
                return Err(TimingError::config(
                    &source,
                    format!("address {:#x} out of range", entry.address),
                ));
            }
            if entry.slot >= fanout::NUM_SLOTS {
                return Err(TimingError::config(
                    &source,
                    format!("slot {} for address {:#x} out of range", entry.slot, entry.address),
                ));
            }
            address_map.insert(
                entry.address,
                SlotMapping {
                    fanout: entry.fanout,
                    slot: entry.slot,
                },
            );
        }

        let devices: BTreeMap<String, String> = file
            .devices
            .into_iter()
            .map(|(id, entry)| (id, entry.uri))
            .collect();
        info!("Loaded {} device(s) from {}", devices.len(), source.display());

        Ok(Self {
            source,
            devices,
            groups: file.groups,
            address_map,
            factories: vec![Box::new(SimTransport)],
            timeout: None,
        })
    }

    /// Register a transport for another URI scheme
    pub fn register(&mut self, factory: Box<dyn TransportFactory>) {
        debug!("Registered transport for {}://", factory.scheme());
        self.factories.push(factory);
    }

    /// Timeout applied to every session opened from now on
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    /// File the connections were loaded from
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Known device ids, sorted
    pub fn device_ids(&self) -> Vec<&str> {
        self.devices.keys().map(String::as_str).collect()
    }

    /// URI registered for `id`
    ///
    /// # Errors
    ///
    /// Returns `UnknownDevice` if `id` is not in the file.
    pub fn uri(&self, id: &str) -> Result<&str> {
        self.devices
            .get(id)
            .map(String::as_str)
            .ok_or_else(|| TimingError::UnknownDevice { id: id.to_string() })
    }

    /// Open a session to device `id`
    ///
    /// # Errors
    ///
    /// Returns `UnknownDevice` for ids missing from the file,
    /// `UnsupportedTransport` when no factory serves the URI scheme, or the
    /// factory's own error.
    pub fn get_device(&self, id: &str) -> Result<Box<dyn RegisterSession>> {
        let uri = self.uri(id)?;
        let scheme = uri
            .split_once("://")
            .map(|(scheme, _)| scheme)
            .ok_or_else(|| TimingError::UnsupportedTransport { uri: uri.to_string() })?;
        let factory = self
            .factories
            .iter()
            .find(|f| f.scheme() == scheme)
            .ok_or_else(|| TimingError::UnsupportedTransport { uri: uri.to_string() })?;

        let mut session = factory.open(id, uri)?;
        if let Some(timeout) = self.timeout {
            session.set_timeout(timeout);
        }
        info!("Opened device {id} ({uri})");
        Ok(session)
    }

    /// Board definition of fleet group `name`
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the group is neither in the file nor
    /// built in.
    pub fn group(&self, name: &str) -> Result<GroupSpec> {
        self.groups
            .get(name)
            .cloned()
            .or_else(|| GroupSpec::builtin(name))
            .ok_or_else(|| TimingError::invalid_argument(format!("unknown group '{name}'")))
    }

    /// Endpoint address → fanout slot table
    pub const fn address_map(&self) -> &AddressMap {
        &self.address_map
    }

    /// Open every board of group `name`
    ///
    /// # Errors
    ///
    /// Returns error if the group is unknown or any board fails to open.
    pub fn open_fleet(&self, name: &str, delays: Delays) -> Result<Fleet<Box<dyn RegisterSession>>> {
        let spec = self.group(name)?;
        let overlord = Board::new(self.get_device(&spec.overlord)?, BoardRole::Overlord)
            .with_delays(delays);

        let mut fanouts = BTreeMap::new();
        for (n, id) in (0u32..).zip(&spec.fanouts) {
            let board = Board::new(self.get_device(id)?, BoardRole::Fanout).with_delays(delays);
            fanouts.insert(n, board);
        }

        Ok(Fleet::new(overlord, fanouts).with_address_map(self.address_map.clone()))
    }
}
