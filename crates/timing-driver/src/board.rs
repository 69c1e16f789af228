// SPDX-License-Identifier: AGPL-3.0-only

//! Overlord and fanout board shells
//!
//! A [`Board`] wraps one register session together with the role the board
//! plays in the fleet. Every operation is a fixed sequence of register
//! accesses separated by fixed settle pauses:
//!
//! ```text
//! reset          soft_rst ─ 1 s ─ pll_rst/rst_i2c/rst_i2cmux pulses
//!                (fanout: mux ← 0, rst_lock_mon pulse)
//! upstream lock  ep_en 0→1 ─ settle ─ read ep_stat (must be Ready)
//! synctime       read ctr ─ write set ─ read ctr ─ ts_en ← 1      (overlord)
//! echo           go ← 1 ─ settle ─ read rx_done, tx/rx timestamps (overlord)
//! port scan      mux ← n ─ settle ─ read cdr_lol/sfp_los ─ lock  (fanout)
//! ```
//!
//! There is no polling and no retry; any failure ends the operation.

use std::collections::BTreeMap;
use std::fmt;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use timing_regs::endpoint::{self as ept, EndpointState};
use timing_regs::{board, fanout, master, node_path};
use tracing::{debug, info, warn};

use crate::error::{Result, TimingError};
use crate::session::{collect_words, read_sub_nodes, RegisterSession};

/// Position of a board in the distribution tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardRole {
    /// Timing master driving the fleet
    Overlord,
    /// Relay between the overlord and endpoints
    Fanout,
}

impl BoardRole {
    /// Design type code expected from a board in this role
    pub const fn design_code(self) -> u32 {
        match self {
            Self::Overlord => 0x6,
            Self::Fanout => 0x5,
        }
    }

    const fn upstream_endpoint(self) -> &'static str {
        match self {
            Self::Overlord => master::UPSTREAM_EPT,
            Self::Fanout => fanout::UPSTREAM_EPT,
        }
    }
}

impl fmt::Display for BoardRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Overlord => "overlord",
            Self::Fanout => "fanout",
        })
    }
}

/// Fixed settle pauses between hardware steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delays {
    /// After the soft reset
    pub soft_reset: Duration,
    /// After switching an endpoint SFP
    pub sfp_settle: Duration,
    /// Between enabling an upstream endpoint and checking its state
    pub lock_settle: Duration,
    /// After selecting a fanout mux slot
    pub mux_settle: Duration,
    /// Between sending an echo and reading it back
    pub echo_settle: Duration,
}

impl Delays {
    /// No pauses at all (simulated boards)
    pub const fn none() -> Self {
        Self {
            soft_reset: Duration::ZERO,
            sfp_settle: Duration::ZERO,
            lock_settle: Duration::ZERO,
            mux_settle: Duration::ZERO,
            echo_settle: Duration::ZERO,
        }
    }

    pub(crate) fn pause(what: &str, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        debug!("Waiting {duration:?} for {what}");
        thread::sleep(duration);
    }
}

impl Default for Delays {
    fn default() -> Self {
        Self {
            soft_reset: Duration::from_secs(1),
            sfp_settle: Duration::from_millis(100),
            lock_settle: Duration::from_millis(100),
            mux_settle: Duration::from_millis(100),
            echo_settle: Duration::from_millis(10),
        }
    }
}

/// Type codes and firmware version of a board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardIdentity {
    /// Board type code
    pub board_type: u32,
    /// Carrier type code
    pub carrier_type: u32,
    /// Design type code
    pub design_type: u32,
    /// Firmware version word
    pub version: u32,
}

impl BoardIdentity {
    /// Board type name, hex code when unknown
    pub fn board_name(&self) -> String {
        name_or_hex(board::BOARD_NAMES, self.board_type)
    }

    /// Carrier type name, hex code when unknown
    pub fn carrier_name(&self) -> String {
        name_or_hex(board::CARRIER_NAMES, self.carrier_type)
    }

    /// Design type name, hex code when unknown
    pub fn design_name(&self) -> String {
        name_or_hex(board::DESIGN_NAMES, self.design_type)
    }
}

impl fmt::Display for BoardIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on {}, design {}, firmware {:#x}",
            self.board_name(),
            self.carrier_name(),
            self.design_name(),
            self.version
        )
    }
}

fn name_or_hex(table: &[(u32, &'static str)], code: u32) -> String {
    board::lookup(table, code).map_or_else(|| format!("{code:#x}"), str::to_string)
}

/// PLL configuration id and flag dumps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PllStatus {
    /// Configuration id loaded in the PLL
    pub design_id: String,
    /// Live status flags
    pub stat: BTreeMap<String, u32>,
    /// Sticky status flags
    pub sticky: BTreeMap<String, u32>,
}

/// Overlord timestamp before and after a sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSync {
    /// Counter value before the write
    pub old: u64,
    /// Counter value read back after the write
    pub new: u64,
}

/// Timestamps of one echo round trip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoMeasurement {
    /// Transmission timestamp
    pub tx: u64,
    /// Reception timestamp
    pub rx: u64,
}

impl EchoMeasurement {
    /// Round trip in clock ticks
    pub const fn delay(&self) -> u64 {
        self.rx.wrapping_sub(self.tx)
    }
}

/// Link state of one fanout mux slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortScan {
    /// Mux slot
    pub slot: u32,
    /// CDR loss of lock flag
    pub cdr_lol: u32,
    /// SFP loss of signal flag
    pub sfp_los: u32,
    /// Upstream endpoint state after enabling it on this slot
    pub state_code: u32,
}

impl PortScan {
    /// Decoded upstream state, `None` for undefined codes
    pub const fn state(&self) -> Option<EndpointState> {
        EndpointState::from_code(self.state_code)
    }

    /// Whether the upstream endpoint reached Ready on this slot
    pub const fn is_locked(&self) -> bool {
        self.state_code == EndpointState::Ready.code()
    }
}

/// One overlord or fanout board
#[derive(Debug)]
pub struct Board<S: RegisterSession> {
    session: S,
    role: BoardRole,
    delays: Delays,
}

impl<S: RegisterSession> Board<S> {
    /// Wrap an opened session with hardware settle delays
    pub fn new(session: S, role: BoardRole) -> Self {
        Self {
            session,
            role,
            delays: Delays::default(),
        }
    }

    /// Replace the settle delays
    #[must_use]
    pub fn with_delays(mut self, delays: Delays) -> Self {
        self.delays = delays;
        self
    }

    /// Device id of the underlying session
    pub fn id(&self) -> &str {
        self.session.id()
    }

    /// Settle delays in use
    pub const fn delays(&self) -> Delays {
        self.delays
    }

    /// Role of the board
    pub const fn role(&self) -> BoardRole {
        self.role
    }

    /// Underlying session
    pub const fn session(&self) -> &S {
        &self.session
    }

    /// Read board, carrier and design codes and the firmware version
    ///
    /// # Errors
    ///
    /// Propagates register access and dispatch failures.
    pub fn identify(&mut self) -> Result<BoardIdentity> {
        let version = self.session.read(board::VERSION)?;
        let board_type = self.session.read(board::config::BOARD_TYPE)?;
        let carrier_type = self.session.read(board::config::CARRIER_TYPE)?;
        let design_type = self.session.read(board::config::DESIGN_TYPE)?;
        self.session.dispatch()?;

        let identity = BoardIdentity {
            board_type: board_type.value()?,
            carrier_type: carrier_type.value()?,
            design_type: design_type.value()?,
            version: version.value()?,
        };
        if identity.design_type != self.role.design_code() {
            warn!(
                "{} is used as {} but carries design {}",
                self.id(),
                self.role,
                identity.design_name()
            );
        }
        info!("{}: {identity}", self.id());
        Ok(identity)
    }

    /// Reset the board
    ///
    /// A soft reset only pulses the soft reset bit. A hard reset follows it
    /// with PLL and I2C reset pulses and, on a fanout, returns the input mux
    /// to slot 0 and clears the lock monitor.
    ///
    /// # Errors
    ///
    /// Propagates register access and dispatch failures.
    pub fn reset(&mut self, soft: bool) -> Result<()> {
        info!("Resetting {} {} ({})", self.role, self.id(), if soft { "soft" } else { "hard" });
        self.session.write(board::ctrl::SOFT_RST, 1)?;
        self.session.dispatch()?;
        Delays::pause("soft reset", self.delays.soft_reset);
        if soft {
            return Ok(());
        }

        for ctrl in [board::ctrl::PLL_RST, board::ctrl::RST_I2C, board::ctrl::RST_I2CMUX] {
            self.pulse(ctrl)?;
        }
        self.session.dispatch()?;
        info!("{}: PLL keeps its current configuration", self.id());

        if self.role == BoardRole::Fanout {
            self.session.write(fanout::MUX, 0)?;
            self.pulse(board::ctrl::RST_LOCK_MON)?;
            self.session.dispatch()?;
        }
        info!("{} {} reset done", self.role, self.id());
        Ok(())
    }

    fn pulse(&mut self, path: &str) -> Result<()> {
        self.session.write(path, 1)?;
        self.session.write(path, 0)
    }

    /// Dump the IO status register group
    ///
    /// # Errors
    ///
    /// Propagates register access and dispatch failures.
    pub fn status(&mut self) -> Result<BTreeMap<String, u32>> {
        let words = read_sub_nodes(&mut self.session, board::CSR_STAT)?;
        self.session.dispatch()?;
        collect_words(&words)
    }

    /// Read the PLL configuration id and its flag registers
    ///
    /// # Errors
    ///
    /// Propagates register access and dispatch failures.
    pub fn pll_status(&mut self) -> Result<PllStatus> {
        let id = self
            .session
            .read_block(board::pll::DESIGN_ID, board::pll::DESIGN_ID_WORDS)?;
        let stat = read_sub_nodes(&mut self.session, board::pll::STAT)?;
        let sticky = read_sub_nodes(&mut self.session, board::pll::STICKY)?;
        self.session.dispatch()?;

        Ok(PllStatus {
            design_id: board::decode_design_id(&id.values()?),
            stat: collect_words(&stat)?,
            sticky: collect_words(&sticky)?,
        })
    }

    /// Enable the upstream endpoint and require it to reach Ready
    ///
    /// # Errors
    ///
    /// Returns `ReceiverNotReady` with the state read after the settle
    /// pause; propagates register failures.
    pub fn enable_upstream_endpoint(&mut self) -> Result<EndpointState> {
        let code = self.lock_upstream()?;
        match EndpointState::from_code(code) {
            Some(EndpointState::Ready) => {
                info!("{} {}: upstream endpoint ready", self.role, self.id());
                Ok(EndpointState::Ready)
            }
            state => Err(TimingError::ReceiverNotReady {
                board: self.id().to_string(),
                state: code,
                label: state.map_or("undefined", EndpointState::label),
            }),
        }
    }

    fn lock_upstream(&mut self) -> Result<u32> {
        let ep_en = node_path(self.role.upstream_endpoint(), ept::CTRL_EP_EN);
        self.session.write(&ep_en, 0)?;
        self.session.write(&ep_en, 1)?;
        self.session.dispatch()?;
        Delays::pause("upstream lock", self.delays.lock_settle);

        let state = self
            .session
            .read(&node_path(self.role.upstream_endpoint(), ept::STAT_STATE))?;
        self.session.dispatch()?;
        let code = state.value()?;
        debug!("{}: upstream state {code:#x}", self.id());
        Ok(code)
    }

    fn require(&self, role: BoardRole, operation: &str) -> Result<()> {
        if self.role == role {
            Ok(())
        } else {
            Err(TimingError::invalid_argument(format!(
                "{operation} is only available on the {role}, {} is a {}",
                self.id(),
                self.role
            )))
        }
    }

    /// Read the overlord timestamp counter
    ///
    /// # Errors
    ///
    /// Fails on a fanout board; propagates register failures.
    pub fn read_timestamp(&mut self) -> Result<u64> {
        self.require(BoardRole::Overlord, "timestamp read")?;
        let words = self.session.read_block(master::TSTAMP, 2)?;
        self.session.dispatch()?;
        Ok(timing_regs::tstamp_to_u64(&words.values()?))
    }

    /// Load the current wall-clock time into the overlord timestamp
    ///
    /// # Errors
    ///
    /// Fails on a fanout board; propagates register failures.
    pub fn sync_timestamp(&mut self) -> Result<TimeSync> {
        let now = u64::try_from(Utc::now().timestamp()).map_err(|_| {
            TimingError::invalid_argument("system clock is before the Unix epoch")
        })?;
        self.sync_timestamp_at(now)
    }

    /// Load `unix_secs` (in clock ticks) into the overlord timestamp and
    /// enable timestamp broadcast
    ///
    /// # Errors
    ///
    /// Fails on a fanout board; propagates register failures.
    pub fn sync_timestamp_at(&mut self, unix_secs: u64) -> Result<TimeSync> {
        let old = self.read_timestamp()?;
        info!("Old timestamp {old:#x}, {}", format_timestamp(old));

        let ticks = unix_secs.saturating_mul(master::CLOCK_FREQUENCY_HZ);
        self.session
            .write_block(master::TSTAMP_SET, &timing_regs::u64_to_tstamp(ticks))?;
        self.session.dispatch()?;

        let new = self.read_timestamp()?;
        info!("New timestamp {new:#x}, {}", format_timestamp(new));

        self.session.write(master::TS_EN, 1)?;
        self.session.dispatch()?;
        Ok(TimeSync { old, new })
    }

    /// Switch the transmit SFP of endpoint `address` on or off
    ///
    /// Address 0 broadcasts to every endpoint.
    ///
    /// # Errors
    ///
    /// Fails on a fanout board or for an address above the endpoint range;
    /// propagates register failures.
    pub fn switch_endpoint_sfp(&mut self, address: u32, on: bool) -> Result<()> {
        self.require(BoardRole::Overlord, "SFP control")?;
        if address > master::MAX_ENDPOINT_ADDRESS {
            return Err(TimingError::invalid_argument(format!(
                "endpoint address {address:#x} above {:#x}",
                master::MAX_ENDPOINT_ADDRESS
            )));
        }
        self.session
            .write_block(master::ACMD_TXBUF, &master::sfp_switch_packet(address, on))?;
        self.session.dispatch()?;
        info!(
            "Endpoint {address:#x} SFP commanded {}",
            if on { "on" } else { "off" }
        );
        Ok(())
    }

    /// Send an echo and read its transmission and reception timestamps
    ///
    /// # Errors
    ///
    /// Fails on a fanout board or when no echo came back.
    pub fn measure_echo(&mut self) -> Result<EchoMeasurement> {
        self.require(BoardRole::Overlord, "echo")?;
        self.session.write(master::echo::GO, 1)?;
        self.session.dispatch()?;
        Delays::pause("echo", self.delays.echo_settle);

        let done = self.session.read(master::echo::RX_DONE)?;
        let tx = self.session.read_block(master::echo::TX_TSTAMP, 2)?;
        let rx = self.session.read_block(master::echo::RX_TSTAMP, 2)?;
        self.session.dispatch()?;

        if done.value()? == 0 {
            return Err(TimingError::transport(self.id(), "echo not received"));
        }
        let echo = EchoMeasurement {
            tx: timing_regs::tstamp_to_u64(&tx.values()?),
            rx: timing_regs::tstamp_to_u64(&rx.values()?),
        };
        debug!("Echo tx {:#x} rx {:#x}", echo.tx, echo.rx);
        Ok(echo)
    }

    /// Route fanout input `slot` upstream
    ///
    /// # Errors
    ///
    /// Fails on an overlord board or for a slot outside the mux; propagates
    /// register failures.
    pub fn select_mux(&mut self, slot: u32) -> Result<()> {
        self.require(BoardRole::Fanout, "mux selection")?;
        if slot >= fanout::NUM_SLOTS {
            return Err(TimingError::invalid_argument(format!(
                "fanout slot {slot} out of range 0-{}",
                fanout::NUM_SLOTS - 1
            )));
        }
        self.session.write(fanout::MUX, slot)?;
        self.session.dispatch()?;
        Delays::pause("mux", self.delays.mux_settle);
        info!("{}: mux set to slot {slot}", self.id());
        Ok(())
    }

    /// Visit every mux slot, then restore the slot selected before the scan
    ///
    /// The previous slot is restored even when the scan stops on an error.
    ///
    /// # Errors
    ///
    /// Fails on an overlord board; propagates register failures. A scan
    /// failure takes precedence over a failure to restore the mux.
    pub fn scan_ports(&mut self) -> Result<Vec<PortScan>> {
        self.require(BoardRole::Fanout, "port scan")?;
        let current = self.session.read(fanout::MUX)?;
        self.session.dispatch()?;
        let previous = current.value()?;

        let scanned = (0..fanout::NUM_SLOTS)
            .map(|slot| self.scan_slot(slot))
            .collect::<Result<Vec<_>>>();
        let restored = self.select_mux(previous);

        match (scanned, restored) {
            (Ok(ports), Ok(())) => Ok(ports),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), restored) => {
                if let Err(restore) = restored {
                    warn!("{}: mux not restored to slot {previous}: {restore}", self.id());
                }
                Err(e)
            }
        }
    }

    fn scan_slot(&mut self, slot: u32) -> Result<PortScan> {
        self.select_mux(slot)?;
        let cdr_lol = self.session.read(fanout::STAT_CDR_LOL)?;
        let sfp_los = self.session.read(fanout::STAT_SFP_LOS)?;
        self.session.dispatch()?;
        let state_code = self.lock_upstream()?;
        Ok(PortScan {
            slot,
            cdr_lol: cdr_lol.value()?,
            sfp_los: sfp_los.value()?,
            state_code,
        })
    }
}

/// Render a timestamp counter value as a UTC date
pub fn format_timestamp(ticks: u64) -> String {
    let secs = ticks / master::CLOCK_FREQUENCY_HZ;
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::<Utc>::from_timestamp(s, 0))
        .map_or_else(
            || "out of range".to_string(),
            |date| date.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{Access, SimBoard};

    fn overlord() -> Board<SimBoard> {
        Board::new(SimBoard::overlord("OVLD"), BoardRole::Overlord).with_delays(Delays::none())
    }

    fn fanout(live: &[u32]) -> Board<SimBoard> {
        Board::new(SimBoard::fanout("FO").with_live_slots(live), BoardRole::Fanout)
            .with_delays(Delays::none())
    }

    #[test]
    fn identify_names_known_codes() {
        let id = overlord().identify().unwrap();
        assert_eq!(id.board_name(), "pc059");
        assert_eq!(id.design_name(), "overlord");
        let unknown = BoardIdentity {
            board_type: 0x42,
            ..id
        };
        assert_eq!(unknown.board_name(), "0x42");
    }

    #[test]
    fn hard_reset_on_fanout_returns_mux_to_zero() {
        let mut fo = fanout(&[0, 3]);
        fo.select_mux(3).unwrap();
        fo.reset(false).unwrap();
        let sim = fo.session();
        assert_eq!(sim.word(fanout::MUX), Some(0));
        let writes = sim.writes();
        assert!(writes.contains(&(board::ctrl::RST_LOCK_MON.to_string(), 1)));
        assert_eq!(writes[1], (board::ctrl::SOFT_RST.to_string(), 1));
    }

    #[test]
    fn soft_reset_stops_after_soft_rst() {
        let mut ovld = overlord();
        ovld.reset(true).unwrap();
        assert_eq!(
            ovld.session().writes(),
            vec![(board::ctrl::SOFT_RST.to_string(), 1)]
        );
    }

    #[test]
    fn upstream_not_ready_is_an_error() {
        let mut ovld = overlord();
        let err = ovld.enable_upstream_endpoint().unwrap_err();
        match err {
            TimingError::ReceiverNotReady { state, label, .. } => {
                assert_eq!(state, EndpointState::WaitingSfp.code());
                assert_eq!(label, "Waiting SFP for signal");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn sync_writes_ticks_and_enables_broadcast() {
        let mut ovld = overlord();
        let sync = ovld.sync_timestamp_at(1_700_000_000).unwrap();
        assert_eq!(sync.old, 0x1000);
        assert_eq!(sync.new, 1_700_000_000 * master::CLOCK_FREQUENCY_HZ);
        assert_eq!(ovld.session().word(master::TS_EN), Some(1));
    }

    #[test]
    fn timestamp_formats_as_utc() {
        let ticks = 1_700_000_000 * master::CLOCK_FREQUENCY_HZ;
        assert_eq!(format_timestamp(ticks), "2023-11-14 22:13:20 UTC");
    }

    #[test]
    fn echo_requires_a_locked_upstream() {
        let mut ovld = overlord();
        assert!(matches!(
            ovld.measure_echo(),
            Err(TimingError::Transport { .. })
        ));

        ovld.switch_endpoint_sfp(0x10, true).unwrap();
        ovld.enable_upstream_endpoint().unwrap();
        let echo = ovld.measure_echo().unwrap();
        assert_eq!(echo.delay(), u64::from(crate::backends::sim::SIM_ROUND_TRIP));
    }

    #[test]
    fn role_is_checked() {
        let mut fo = fanout(&[0]);
        assert!(matches!(
            fo.read_timestamp(),
            Err(TimingError::InvalidArgument { .. })
        ));
        let mut ovld = overlord();
        assert!(ovld.select_mux(1).is_err());
        assert!(ovld.session().accesses().is_empty());
    }

    #[test]
    fn sfp_address_above_range_is_rejected() {
        let mut ovld = overlord();
        assert!(ovld.switch_endpoint_sfp(0x101, true).is_err());
        assert!(ovld.session().accesses().is_empty());
    }

    #[test]
    fn scan_reports_live_slots_and_restores_mux() {
        let mut fo = fanout(&[1, 4]);
        fo.select_mux(2).unwrap();
        let ports = fo.scan_ports().unwrap();

        assert_eq!(ports.len(), 8);
        let locked: Vec<u32> = ports.iter().filter(|p| p.is_locked()).map(|p| p.slot).collect();
        assert_eq!(locked, vec![1, 4]);
        assert_eq!(ports[0].cdr_lol, 1);
        assert_eq!(ports[1].sfp_los, 0);
        assert_eq!(ports[0].state(), Some(EndpointState::WaitingCdrLock));
        assert_eq!(fo.session().word(fanout::MUX), Some(2));
    }

    #[test]
    fn failed_scan_still_restores_mux() {
        // dispatch 1 selects slot 2, 2 reads the mux, 5 locks slot 0
        let mut fo = Board::new(
            SimBoard::fanout("FO")
                .with_live_slots(&[0])
                .failing_dispatch_at(5, "link down"),
            BoardRole::Fanout,
        )
        .with_delays(Delays::none());
        fo.select_mux(2).unwrap();

        let err = fo.scan_ports().unwrap_err();
        assert_eq!(err.to_string(), "Transport error on FO: link down");
        assert_eq!(fo.session().word(fanout::MUX), Some(2));
        assert_eq!(
            fo.session().writes().last(),
            Some(&(fanout::MUX.to_string(), 2))
        );
    }

    #[test]
    fn pll_status_decodes_design_id() {
        let status = overlord().pll_status().unwrap();
        assert_eq!(status.design_id, "Si5345-ovld");
        assert!(status.sticky.contains_key("cal"));
    }

    #[test]
    fn failed_dispatch_propagates() {
        let mut ovld = Board::new(
            SimBoard::overlord("OVLD").failing_dispatch("link down"),
            BoardRole::Overlord,
        );
        let err = ovld.status().unwrap_err();
        assert_eq!(err.to_string(), "Transport error on OVLD: link down");
        assert_eq!(ovld.session().accesses().last(), Some(&Access::Dispatch));
    }
}
