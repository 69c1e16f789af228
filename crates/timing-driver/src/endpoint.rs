// SPDX-License-Identifier: AGPL-3.0-only

//! Endpoint group operations
//!
//! An [`EndpointGroup`] is the set of endpoints named on one command line,
//! resolved against one device. Resolution is all-or-nothing: if any id is
//! missing the group is never built and no register is touched.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use timing_regs::endpoint::{self as ept, EndpointState};
use timing_regs::node_path;
use tracing::{debug, info};

use crate::error::{Result, TimingError};
use crate::ids;
use crate::session::{collect_words, read_sub_nodes, RegisterSession};

/// Endpoints resolved on one device
#[derive(Debug)]
pub struct EndpointGroup<'s, S: RegisterSession + ?Sized> {
    session: &'s mut S,
    endpoints: BTreeMap<u32, String>,
}

impl<'s, S: RegisterSession + ?Sized> EndpointGroup<'s, S> {
    /// Resolve `ids` to endpoint nodes on `session`
    ///
    /// Only the address table is consulted; no register access happens here.
    ///
    /// # Errors
    ///
    /// Returns `MissingEndpoints` listing exactly the ids with no node.
    pub fn resolve(session: &'s mut S, ids: &[u32]) -> Result<Self> {
        let missing: BTreeSet<u32> = ids
            .iter()
            .copied()
            .filter(|&id| !session.has_node(&ept::node_name(id)))
            .collect();
        if !missing.is_empty() {
            return Err(TimingError::MissingEndpoints {
                device: session.id().to_string(),
                ids: missing.into_iter().collect(),
            });
        }

        let endpoints: BTreeMap<u32, String> =
            ids.iter().map(|&id| (id, ept::node_name(id))).collect();
        debug!(
            "Resolved endpoints {} on {}",
            ids::join(&endpoints.keys().copied().collect::<Vec<_>>()),
            session.id()
        );
        Ok(Self { session, endpoints })
    }

    /// Resolved ids, ascending and without duplicates
    pub fn ids(&self) -> Vec<u32> {
        self.endpoints.keys().copied().collect()
    }

    /// Device the endpoints live on
    pub fn device_id(&self) -> &str {
        self.session.id()
    }

    /// Read every endpoint's firmware version in one dispatch
    ///
    /// # Errors
    ///
    /// Propagates register access and dispatch failures.
    pub fn read_versions(&mut self) -> Result<VersionReport> {
        let mut pending = BTreeMap::new();
        for (&id, node) in &self.endpoints {
            pending.insert(id, self.session.read(&node_path(node, ept::VERSION))?);
        }
        self.session.dispatch()?;

        let versions = pending
            .into_iter()
            .map(|(id, word)| Ok((id, word.value()?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        let report = VersionReport { versions };
        if !report.is_consistent() {
            info!(
                "Multiple endpoint versions detected on {}: {:x?}",
                self.session.id(),
                report.distinct()
            );
        }
        Ok(report)
    }

    /// Enable or disable every endpoint
    ///
    /// Enabling writes the partition, then the endpoint enable bit, then the
    /// buffer enable bit. Disabling clears the two enable bits. Each endpoint
    /// is flushed with its own dispatch.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a partition above the firmware maximum
    /// (before any access); propagates register failures.
    pub fn enable(&mut self, on: bool, partition: u32) -> Result<EnableReport> {
        if partition > ept::MAX_PARTITION {
            return Err(TimingError::invalid_argument(format!(
                "partition {partition} out of range 0-{}",
                ept::MAX_PARTITION
            )));
        }

        let mut done = Vec::with_capacity(self.endpoints.len());
        for (&id, node) in &self.endpoints {
            if on {
                self.session.write(&node_path(node, ept::CTRL_TGRP), partition)?;
            }
            self.session
                .write(&node_path(node, ept::CTRL_EP_EN), u32::from(on))?;
            self.session
                .write(&node_path(node, ept::CTRL_BUF_EN), u32::from(on))?;
            self.session.dispatch()?;
            debug!("Endpoint {id} {}", if on { "enabled" } else { "disabled" });
            done.push(id);
        }

        let report = EnableReport {
            ids: done,
            on,
            partition,
        };
        info!("{report}");
        Ok(report)
    }

    /// Snapshot every endpoint in a single batched read
    ///
    /// # Errors
    ///
    /// Propagates register access and dispatch failures.
    pub fn snapshot(&mut self) -> Result<MonitorSnapshot> {
        let mut pending = BTreeMap::new();
        for (&id, node) in &self.endpoints {
            let tstamp = self.session.read_block(&node_path(node, ept::TSTAMP), 2)?;
            let evtctr = self.session.read(&node_path(node, ept::EVTCTR))?;
            let bufcount = self.session.read(&node_path(node, ept::BUF_COUNT))?;
            let ctrl = read_sub_nodes(&mut *self.session, &node_path(node, ept::CSR_CTRL))?;
            let stat = read_sub_nodes(&mut *self.session, &node_path(node, ept::CSR_STAT))?;
            let ctrs = self
                .session
                .read_block(&node_path(node, ept::CTRS), ept::NUM_COUNTERS)?;
            pending.insert(id, (tstamp, evtctr, bufcount, ctrl, stat, ctrs));
        }
        self.session.dispatch()?;

        let mut endpoints = BTreeMap::new();
        for (id, (tstamp, evtctr, bufcount, ctrl, stat, ctrs)) in pending {
            endpoints.insert(
                id,
                EndpointSnapshot {
                    timestamp: timing_regs::tstamp_to_u64(&tstamp.values()?),
                    event_counter: evtctr.value()?,
                    buffer_count: bufcount.value()?,
                    ctrl: collect_words(&ctrl)?,
                    stat: collect_words(&stat)?,
                    counters: ctrs.values()?,
                },
            );
        }
        Ok(MonitorSnapshot { endpoints })
    }

    /// Drain each endpoint's readout buffer
    ///
    /// With `read_all` the whole buffer is read; otherwise only complete
    /// events. Endpoints with nothing to read issue no block read.
    ///
    /// # Errors
    ///
    /// Propagates register access and dispatch failures.
    pub fn readback(&mut self, read_all: bool) -> Result<Vec<Readback>> {
        let mut out = Vec::with_capacity(self.endpoints.len());
        for (&id, node) in &self.endpoints {
            let count = self.session.read(&node_path(node, ept::BUF_COUNT))?;
            self.session.dispatch()?;
            let available = count.value()?;

            let to_read = ept::words_to_read(available as usize, read_all);
            let words = if to_read == 0 {
                info!("Endpoint {id}: nothing to read");
                Vec::new()
            } else {
                let data = self
                    .session
                    .read_block(&node_path(node, ept::BUF_DATA), to_read)?;
                self.session.dispatch()?;
                data.values()?
            };

            out.push(Readback {
                id,
                available,
                to_read,
                words,
            });
        }
        Ok(out)
    }
}

/// Firmware versions per endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionReport {
    /// Version word by endpoint id
    pub versions: BTreeMap<u32, u32>,
}

impl VersionReport {
    /// Distinct version words, ascending
    pub fn distinct(&self) -> Vec<u32> {
        self.versions
            .values()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Whether every endpoint reports the same version
    pub fn is_consistent(&self) -> bool {
        self.distinct().len() <= 1
    }
}

/// Endpoints processed by an enable/disable pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnableReport {
    /// Ids processed, in processing order
    pub ids: Vec<u32>,
    /// Whether endpoints were enabled
    pub on: bool,
    /// Partition written (when enabling)
    pub partition: u32,
}

impl fmt::Display for EnableReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Endpoints {} ", ids::join(&self.ids))?;
        if self.on {
            write!(f, "activated in partition {}", self.partition)
        } else {
            f.write_str("deactivated")
        }
    }
}

/// One refresh cycle of the monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSnapshot {
    /// Per-endpoint data, ascending id
    pub endpoints: BTreeMap<u32, EndpointSnapshot>,
}

/// Register values of one endpoint at one refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSnapshot {
    /// Timestamp counter
    pub timestamp: u64,
    /// Event counter
    pub event_counter: u32,
    /// Readout buffer occupancy in words
    pub buffer_count: u32,
    /// Control register dump
    pub ctrl: BTreeMap<String, u32>,
    /// Status register dump
    pub stat: BTreeMap<String, u32>,
    /// Command counters, indexed by command code
    pub counters: Vec<u32>,
}

impl EndpointSnapshot {
    /// Raw 4-bit state code, `None` when the status block has no state field
    pub fn state_code(&self) -> Option<u32> {
        self.stat.get(ept::STAT_EP_STAT).copied()
    }

    /// Decoded state, `None` for undefined or missing codes
    pub fn state(&self) -> Option<EndpointState> {
        self.state_code().and_then(EndpointState::from_code)
    }

    /// Partition the endpoint is assigned to
    pub fn partition(&self) -> u32 {
        self.ctrl.get(ept::CTRL_FIELD_TGRP).copied().unwrap_or_default()
    }

    /// Whether the readout buffer reports no error
    pub fn buffer_ok(&self) -> bool {
        self.stat.get(ept::STAT_BUF_ERR).copied().unwrap_or_default() == 0
    }
}

/// Buffer readback of one endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readback {
    /// Endpoint id
    pub id: u32,
    /// Words available when the count was read
    pub available: u32,
    /// Words requested
    pub to_read: usize,
    /// Words read
    pub words: Vec<u32>,
}

impl Readback {
    /// Whether nothing was read
    pub fn is_empty(&self) -> bool {
        self.to_read == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{Access, SimBoard};

    #[test]
    fn resolution_lists_exactly_the_missing_ids() {
        let mut sim = SimBoard::endpoint("EPT", &[0, 1, 2]);
        let err = EndpointGroup::resolve(&mut sim, &[1, 5, 2, 7, 5]).unwrap_err();
        match err {
            TimingError::MissingEndpoints { device, ids } => {
                assert_eq!(device, "EPT");
                assert_eq!(ids, vec![5, 7]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(sim.accesses().is_empty());
    }

    #[test]
    fn duplicate_ids_collapse() {
        let mut sim = SimBoard::endpoint("EPT", &[0, 1]);
        let group = EndpointGroup::resolve(&mut sim, &[1, 0, 1]).unwrap();
        assert_eq!(group.ids(), vec![0, 1]);
    }

    #[test]
    fn versions_are_read_in_one_dispatch() {
        let mut sim = SimBoard::endpoint("EPT", &[0, 1]).with_version(1, 0x0005_0500);
        let mut group = EndpointGroup::resolve(&mut sim, &[0, 1]).unwrap();
        let report = group.read_versions().unwrap();
        assert!(!report.is_consistent());
        assert_eq!(report.distinct(), vec![0x0005_0400, 0x0005_0500]);
        assert_eq!(sim.dispatch_count(), 1);
    }

    #[test]
    fn enable_writes_partition_then_enable_bits() {
        let mut sim = SimBoard::endpoint("EPT", &[3]);
        let mut group = EndpointGroup::resolve(&mut sim, &[3]).unwrap();
        group.enable(true, 2).unwrap();
        assert_eq!(
            sim.accesses(),
            &[
                Access::Write("endpoint3.csr.ctrl.tgrp".into(), 2),
                Access::Write("endpoint3.csr.ctrl.ep_en".into(), 1),
                Access::Write("endpoint3.csr.ctrl.buf_en".into(), 1),
                Access::Dispatch,
            ]
        );
    }

    #[test]
    fn disable_leaves_partition_alone() {
        let mut sim = SimBoard::endpoint("EPT", &[0]);
        let mut group = EndpointGroup::resolve(&mut sim, &[0]).unwrap();
        let report = group.enable(false, 3).unwrap();
        assert_eq!(report.to_string(), "Endpoints 0 deactivated");
        assert_eq!(
            sim.writes(),
            vec![
                ("endpoint0.csr.ctrl.ep_en".to_string(), 0),
                ("endpoint0.csr.ctrl.buf_en".to_string(), 0),
            ]
        );
    }

    #[test]
    fn partition_out_of_range_is_rejected_before_access() {
        let mut sim = SimBoard::endpoint("EPT", &[0]);
        let mut group = EndpointGroup::resolve(&mut sim, &[0]).unwrap();
        assert!(matches!(
            group.enable(true, 5),
            Err(TimingError::InvalidArgument { .. })
        ));
        assert!(sim.accesses().is_empty());
    }

    #[test]
    fn snapshot_is_one_batch() {
        let mut sim = SimBoard::endpoint("EPT", &[0, 1])
            .with_state(1, EndpointState::ErrorRx.code())
            .with_word("endpoint1.csr.stat.buf_err", 1)
            .with_event_counter(0, 42)
            .with_timestamp(0, 0x1_0000_0010)
            .with_counters(0, &[7, 3]);
        let mut group = EndpointGroup::resolve(&mut sim, &[0, 1]).unwrap();
        let snap = group.snapshot().unwrap();

        let ep0 = &snap.endpoints[&0];
        assert_eq!(ep0.timestamp, 0x1_0000_0010);
        assert_eq!(ep0.event_counter, 42);
        assert_eq!(ep0.counters.len(), ept::NUM_COUNTERS);
        assert_eq!(&ep0.counters[..3], &[7, 3, 0]);
        assert_eq!(ep0.state(), Some(EndpointState::StandingBy));
        assert!(ep0.buffer_ok());

        let ep1 = &snap.endpoints[&1];
        assert_eq!(ep1.state(), Some(EndpointState::ErrorRx));
        assert!(!ep1.buffer_ok());

        assert_eq!(sim.dispatch_count(), 1);
    }

    #[test]
    fn undefined_state_code_is_kept_raw() {
        let mut sim = SimBoard::endpoint("EPT", &[0]).with_state(0, 0x7);
        let mut group = EndpointGroup::resolve(&mut sim, &[0]).unwrap();
        let snap = group.snapshot().unwrap();
        assert_eq!(snap.endpoints[&0].state(), None);
        assert_eq!(snap.endpoints[&0].state_code(), Some(0x7));
    }

    #[test]
    fn missing_state_field_is_not_standing_by() {
        let mut sim = SimBoard::endpoint("EPT", &[0]);
        let mut group = EndpointGroup::resolve(&mut sim, &[0]).unwrap();
        let mut snap = group.snapshot().unwrap();
        let ep0 = snap.endpoints.get_mut(&0).unwrap();
        assert_eq!(ep0.state(), Some(EndpointState::StandingBy));

        ep0.stat.remove(ept::STAT_EP_STAT);
        assert_eq!(ep0.state_code(), None);
        assert_eq!(ep0.state(), None);
    }

    #[test]
    fn readback_truncates_to_whole_events() {
        let words: Vec<u32> = (0..14).collect();
        let mut sim = SimBoard::endpoint("EPT", &[0]).with_buffer(0, &words);
        let mut group = EndpointGroup::resolve(&mut sim, &[0]).unwrap();
        let rb = group.readback(false).unwrap().remove(0);
        assert_eq!(rb.available, 14);
        assert_eq!(rb.to_read, 12);
        assert_eq!(rb.words, (0..12).collect::<Vec<_>>());
        assert_eq!(sim.word("endpoint0.buf.count"), Some(2));
    }

    #[test]
    fn readback_all_drains_everything() {
        let mut sim = SimBoard::endpoint("EPT", &[0]).with_buffer(0, &[9, 8, 7]);
        let mut group = EndpointGroup::resolve(&mut sim, &[0]).unwrap();
        let rb = group.readback(true).unwrap().remove(0);
        assert_eq!(rb.words, vec![9, 8, 7]);
    }

    #[test]
    fn empty_buffer_issues_no_block_read() {
        let mut sim = SimBoard::endpoint("EPT", &[0]);
        let mut group = EndpointGroup::resolve(&mut sim, &[0]).unwrap();
        let rb = group.readback(false).unwrap().remove(0);
        assert!(rb.is_empty());
        assert!(!sim
            .accesses()
            .iter()
            .any(|a| matches!(a, Access::ReadBlock(..))));
    }
}
