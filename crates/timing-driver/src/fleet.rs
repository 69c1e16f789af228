// SPDX-License-Identifier: AGPL-3.0-only

//! Overlord plus fanouts operated as one group

use std::collections::BTreeMap;

use timing_regs::{fanout, master};
use tracing::{info, warn};

use crate::board::{Board, BoardIdentity, Delays, EchoMeasurement, PllStatus, PortScan, TimeSync};
use crate::error::{Result, TimingError};
use crate::session::RegisterSession;

/// Fanout slot an endpoint address is cabled to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotMapping {
    /// Fanout index within the group
    pub fanout: u32,
    /// Mux slot on that fanout
    pub slot: u32,
}

/// Endpoint address → fanout slot table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressMap {
    slots: BTreeMap<u32, SlotMapping>,
}

impl AddressMap {
    /// Record the slot of `address`, replacing any previous entry
    pub fn insert(&mut self, address: u32, mapping: SlotMapping) {
        self.slots.insert(address, mapping);
    }

    /// Slot of `address`
    pub fn get(&self, address: u32) -> Option<SlotMapping> {
        self.slots.get(&address).copied()
    }

    /// Number of mapped addresses
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no address is mapped
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Register dumps shown by the `status` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetStatus {
    /// Overlord IO status
    pub overlord: BTreeMap<String, u32>,
    /// Fanout 0 IO status, if the group has a fanout
    pub fanout: Option<BTreeMap<String, u32>>,
    /// Overlord PLL
    pub overlord_pll: PllStatus,
    /// Fanout 0 PLL
    pub fanout_pll: Option<PllStatus>,
}

/// Result of one endpoint round-trip measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayMeasurement {
    /// Endpoint address
    pub address: u32,
    /// Fanout the endpoint was reached through
    pub fanout: u32,
    /// Mux slot used
    pub slot: u32,
    /// Echo timestamps
    pub echo: EchoMeasurement,
}

impl DelayMeasurement {
    /// Round trip in clock ticks
    pub const fn delay(&self) -> u64 {
        self.echo.delay()
    }
}

/// One overlord with its fanouts
#[derive(Debug)]
pub struct Fleet<S: RegisterSession> {
    overlord: Board<S>,
    fanouts: BTreeMap<u32, Board<S>>,
    address_map: AddressMap,
}

impl<S: RegisterSession> Fleet<S> {
    /// Group an overlord with its fanouts, keyed by fanout index
    pub fn new(overlord: Board<S>, fanouts: BTreeMap<u32, Board<S>>) -> Self {
        Self {
            overlord,
            fanouts,
            address_map: AddressMap::default(),
        }
    }

    /// Attach the address → slot table used by [`Self::measure_delay`]
    #[must_use]
    pub fn with_address_map(mut self, address_map: AddressMap) -> Self {
        self.address_map = address_map;
        self
    }

    /// Overlord board
    pub const fn overlord(&self) -> &Board<S> {
        &self.overlord
    }

    /// Fanout `n`
    pub fn fanout(&self, n: u32) -> Option<&Board<S>> {
        self.fanouts.get(&n)
    }

    /// Fanout indices, ascending
    pub fn fanout_ids(&self) -> Vec<u32> {
        self.fanouts.keys().copied().collect()
    }

    /// Identify the overlord, then every fanout
    ///
    /// # Errors
    ///
    /// Propagates the first board failure.
    pub fn identify_all(&mut self) -> Result<Vec<(String, BoardIdentity)>> {
        let mut out = Vec::with_capacity(self.fanouts.len() + 1);
        out.push((self.overlord.id().to_string(), self.overlord.identify()?));
        for board in self.fanouts.values_mut() {
            out.push((board.id().to_string(), board.identify()?));
        }
        Ok(out)
    }

    /// Hard-reset the overlord and each fanout in turn, then sync time
    ///
    /// # Errors
    ///
    /// Propagates the first board failure.
    pub fn setup(&mut self) -> Result<TimeSync> {
        self.overlord.reset(false)?;
        for (n, board) in &mut self.fanouts {
            info!("Resetting fanout {n}");
            board.reset(false)?;
        }
        self.synctime()
    }

    /// Load wall-clock time into the overlord timestamp
    ///
    /// # Errors
    ///
    /// Propagates register failures.
    pub fn synctime(&mut self) -> Result<TimeSync> {
        self.overlord.sync_timestamp()
    }

    /// Status and PLL registers of the overlord and fanout 0
    ///
    /// # Errors
    ///
    /// Propagates register failures.
    pub fn status(&mut self) -> Result<FleetStatus> {
        let overlord = self.overlord.status()?;
        let overlord_pll = self.overlord.pll_status()?;
        let (fanout, fanout_pll) = match self.fanouts.get_mut(&0) {
            Some(board) => (Some(board.status()?), Some(board.pll_status()?)),
            None => (None, None),
        };
        Ok(FleetStatus {
            overlord,
            fanout,
            overlord_pll,
            fanout_pll,
        })
    }

    /// Scan every mux slot of every fanout
    ///
    /// # Errors
    ///
    /// Propagates the first board failure.
    pub fn scan_fanouts(&mut self) -> Result<BTreeMap<u32, Vec<PortScan>>> {
        let mut out = BTreeMap::new();
        for (&n, board) in &mut self.fanouts {
            info!("Scanning fanout {n} ({})", board.id());
            out.insert(n, board.scan_ports()?);
        }
        Ok(out)
    }

    /// Measure the echo round trip to endpoint `address`
    ///
    /// Without `slot` the address is looked up in the address map. All
    /// endpoint transmitters are switched off, the target is switched on,
    /// the fanout then the overlord are locked, and an echo is sent. The
    /// target transmitter is switched off again whether or not the
    /// measurement succeeded.
    ///
    /// # Errors
    ///
    /// Argument errors (address or slot out of range, unmapped address,
    /// fanout absent from the group) are raised before any register access.
    /// Lock failures surface as `ReceiverNotReady`.
    pub fn measure_delay(&mut self, address: u32, slot: Option<u32>) -> Result<DelayMeasurement> {
        if !(master::MIN_ENDPOINT_ADDRESS..=master::MAX_ENDPOINT_ADDRESS).contains(&address) {
            return Err(TimingError::invalid_argument(format!(
                "endpoint address {address:#x} out of range {:#x}-{:#x}",
                master::MIN_ENDPOINT_ADDRESS,
                master::MAX_ENDPOINT_ADDRESS
            )));
        }
        let mapping = match slot {
            Some(slot) if slot >= fanout::NUM_SLOTS => {
                return Err(TimingError::invalid_argument(format!(
                    "fanout slot {slot} out of range 0-{}",
                    fanout::NUM_SLOTS - 1
                )));
            }
            Some(slot) => SlotMapping { fanout: 0, slot },
            None => {
                let mapping = self
                    .address_map
                    .get(address)
                    .ok_or(TimingError::UnmappedAddress { address })?;
                info!(
                    "Address {address:#x} mapped to fanout {}, slot {}",
                    mapping.fanout, mapping.slot
                );
                mapping
            }
        };
        let fo = self.fanouts.get_mut(&mapping.fanout).ok_or_else(|| {
            TimingError::invalid_argument(format!("fanout {} not in this group", mapping.fanout))
        })?;
        let overlord = &mut self.overlord;
        let delays = overlord.delays();

        fo.select_mux(mapping.slot)?;
        overlord.switch_endpoint_sfp(master::BROADCAST_ADDRESS, false)?;
        Delays::pause("SFP switch-off", delays.sfp_settle);
        overlord.switch_endpoint_sfp(address, true)?;
        Delays::pause("SFP switch-on", delays.sfp_settle);

        let measured = lock_and_echo(fo, overlord, mapping.fanout);

        if let Err(e) = overlord.switch_endpoint_sfp(address, false) {
            if measured.is_err() {
                warn!("Could not switch endpoint {address:#x} SFP off: {e}");
            } else {
                return Err(e);
            }
        }

        let echo = measured?;
        let result = DelayMeasurement {
            address,
            fanout: mapping.fanout,
            slot: mapping.slot,
            echo,
        };
        info!(
            "Measured RTT delay {} (transmission {:#x}, reception {:#x})",
            result.delay(),
            echo.tx,
            echo.rx
        );
        Ok(result)
    }
}

fn lock_and_echo<S: RegisterSession>(
    fanout: &mut Board<S>,
    overlord: &mut Board<S>,
    n: u32,
) -> Result<EchoMeasurement> {
    info!("Locking fanout {n}");
    fanout.enable_upstream_endpoint()?;
    info!("Locking overlord");
    overlord.enable_upstream_endpoint()?;
    overlord.measure_echo()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sim::SIM_ROUND_TRIP;
    use crate::backends::SimBoard;
    use crate::board::BoardRole;

    fn fleet(live: &[u32]) -> Fleet<SimBoard> {
        let overlord =
            Board::new(SimBoard::overlord("OVLD"), BoardRole::Overlord).with_delays(Delays::none());
        let fanout = Board::new(SimBoard::fanout("FO0").with_live_slots(live), BoardRole::Fanout)
            .with_delays(Delays::none());
        let mut map = AddressMap::default();
        map.insert(0x21, SlotMapping { fanout: 0, slot: 3 });
        map.insert(0x22, SlotMapping { fanout: 1, slot: 0 });
        Fleet::new(overlord, BTreeMap::from([(0, fanout)])).with_address_map(map)
    }

    #[test]
    fn delay_on_explicit_slot() {
        let mut f = fleet(&[2]);
        let m = f.measure_delay(0x10, Some(2)).unwrap();
        assert_eq!((m.fanout, m.slot), (0, 2));
        assert_eq!(m.delay(), u64::from(SIM_ROUND_TRIP));
        assert!(f.overlord().session().enabled_sfps().is_empty());
    }

    #[test]
    fn delay_uses_address_map() {
        let mut f = fleet(&[3]);
        let m = f.measure_delay(0x21, None).unwrap();
        assert_eq!(m.slot, 3);
        assert_eq!(f.fanout(0).unwrap().session().word(fanout::MUX), Some(3));
    }

    #[test]
    fn lock_failure_switches_sfp_off() {
        let mut f = fleet(&[0]);
        let err = f.measure_delay(0x10, Some(5)).unwrap_err();
        assert!(matches!(err, TimingError::ReceiverNotReady { .. }));
        assert!(f.overlord().session().enabled_sfps().is_empty());
        let last = f.overlord().session().accesses().iter().rev().nth(1).cloned();
        assert_eq!(
            last,
            Some(crate::backends::Access::WriteBlock(
                master::ACMD_TXBUF.to_string(),
                master::sfp_switch_packet(0x10, false)
            ))
        );
    }

    #[test]
    fn invalid_arguments_touch_nothing() {
        let mut f = fleet(&[0]);
        assert!(f.measure_delay(0x0, Some(1)).is_err());
        assert!(f.measure_delay(0x101, Some(1)).is_err());
        assert!(f.measure_delay(0x10, Some(8)).is_err());
        assert!(matches!(
            f.measure_delay(0x99, None),
            Err(TimingError::UnmappedAddress { address: 0x99 })
        ));
        assert!(f.measure_delay(0x22, None).is_err());
        assert!(f.overlord().session().accesses().is_empty());
        assert!(f.fanout(0).unwrap().session().accesses().is_empty());
    }

    #[test]
    fn setup_resets_every_fanout() {
        let overlord =
            Board::new(SimBoard::overlord("OVLD"), BoardRole::Overlord).with_delays(Delays::none());
        let fanouts = (0..2)
            .map(|n| {
                let board = Board::new(SimBoard::fanout(&format!("FO{n}")), BoardRole::Fanout)
                    .with_delays(Delays::none());
                (n, board)
            })
            .collect();
        let mut f = Fleet::new(overlord, fanouts);
        f.setup().unwrap();
        for n in f.fanout_ids() {
            let writes = f.fanout(n).unwrap().session().writes();
            assert!(writes.contains(&(timing_regs::board::ctrl::PLL_RST.to_string(), 1)));
        }
        assert_eq!(f.overlord().session().word(master::TS_EN), Some(1));
    }

    #[test]
    fn status_covers_overlord_and_fanout_zero() {
        let mut f = fleet(&[0]);
        let status = f.status().unwrap();
        assert_eq!(status.overlord.get("pll_ok"), Some(&1));
        assert!(status.fanout.is_some());
        assert_eq!(
            status.fanout_pll.map(|p| p.design_id),
            Some("Si5345-fo".to_string())
        );
    }
}
