// SPDX-License-Identifier: AGPL-3.0-only

//! Simulated board transport
//!
//! Implements [`RegisterSession`] over an in-memory register file laid out
//! like the firmware address tables in `timing-regs`. This enables:
//!
//! 1. **CI without hardware**: every command flow runs end to end against a
//!    `SimBoard`, and the access log lets tests assert exactly which
//!    registers were touched, in which order, and when batches were flushed.
//!
//! 2. **Offline operator rehearsal**: `sim://` URIs in the connections file
//!    give the CLI a working endpoint device, overlord and fanout.
//!
//! ## Behaviour model
//!
//! ```text
//! endpoint  csr.ctrl.ep_en=1        → csr.stat.ep_stat = Ready, ep_rdy = 1
//!           buf.data block read     → drains the FIFO, buf.count follows
//! overlord  acmd_buf.txbuf packet   → endpoint SFP on/off bookkeeping
//!           global.csr.ctrl.ep_en=1 → Ready if any SFP is on, else Waiting SFP
//!           echo_mon go             → rx = tx + round trip (when Ready)
//!           tstamp.set              → loads tstamp.ctr
//! fanout    io.csr.ctrl.mux         → cdr_lol / sfp_los follow live slots
//!           fanout.ept ep_en=1      → Ready on a live slot, else Waiting CDR lock
//! ```
//!
//! Writes take effect at dispatch, in queue order, so a read queued after a
//! write in the same batch observes the write.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;

use timing_regs::endpoint::{self as ept, EndpointState};
use timing_regs::{board, fanout, master, node_path};
use tracing::{debug, info};

use crate::connection::TransportFactory;
use crate::error::{Result, TimingError};
use crate::ids::EndpointIds;
use crate::session::{Batch, PendingOp, RegisterSession, ValVector, ValWord};

/// Version word reported by simulated endpoints
pub const SIM_ENDPOINT_VERSION: u32 = 0x0005_0400;
/// Version word reported by simulated overlord and fanout boards
pub const SIM_BOARD_VERSION: u32 = 0x0005_0201;
/// Default echo round trip in timestamp ticks
pub const SIM_ROUND_TRIP: u32 = 0x1a4;

/// Which firmware the simulated board carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimKind {
    /// Endpoint device exposing `endpoint<N>` blocks
    Endpoint,
    /// Overlord (master) board
    Overlord,
    /// Fanout board
    Fanout,
}

/// One register access as seen by the simulated bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// Queued single-word read
    Read(String),
    /// Queued block read
    ReadBlock(String, usize),
    /// Queued single-word write
    Write(String, u32),
    /// Queued block write
    WriteBlock(String, Vec<u32>),
    /// Batch flush
    Dispatch,
}

/// In-memory board implementing [`RegisterSession`]
#[derive(Debug)]
pub struct SimBoard {
    id: String,
    kind: SimKind,
    words: BTreeMap<String, u32>,
    blocks: BTreeMap<String, Vec<u32>>,
    fifos: BTreeMap<String, VecDeque<u32>>,
    batch: Batch,
    log: Vec<Access>,
    timeout: Option<Duration>,
    enabled_sfps: BTreeSet<u32>,
    live_slots: BTreeSet<u32>,
    round_trip: u32,
    dispatch_failure: Option<String>,
    failing_dispatch_at: Option<usize>,
}

impl SimBoard {
    fn empty(id: &str, kind: SimKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            words: BTreeMap::new(),
            blocks: BTreeMap::new(),
            fifos: BTreeMap::new(),
            batch: Batch::default(),
            log: Vec::new(),
            timeout: None,
            enabled_sfps: BTreeSet::new(),
            live_slots: BTreeSet::new(),
            round_trip: SIM_ROUND_TRIP,
            dispatch_failure: None,
            failing_dispatch_at: None,
        }
    }

    /// Endpoint device exposing the given endpoint ids
    pub fn endpoint(id: &str, endpoints: &[u32]) -> Self {
        let mut sim = Self::empty(id, SimKind::Endpoint);
        for &n in endpoints {
            let base = ept::node_name(n);
            let p = |rel: &str| node_path(&base, rel);

            sim.words.insert(p(ept::VERSION), SIM_ENDPOINT_VERSION);
            for ctrl in ["ep_en", "buf_en", "tgrp", "ctr_rst"] {
                sim.words.insert(p(&format!("{}.{ctrl}", ept::CSR_CTRL)), 0);
            }
            for stat in ["ep_stat", "ep_rdy", "buf_err", "buf_warn", "in_run", "in_spill"] {
                sim.words.insert(p(&format!("{}.{stat}", ept::CSR_STAT)), 0);
            }
            sim.words.insert(p(ept::EVTCTR), 0);
            sim.words.insert(p(ept::BUF_COUNT), 0);
            sim.blocks.insert(p(ept::TSTAMP), vec![0, 0]);
            sim.blocks.insert(p(ept::CTRS), vec![0; ept::NUM_COUNTERS]);
            sim.fifos.insert(p(ept::BUF_DATA), VecDeque::new());
        }
        debug!("SimBoard {id}: endpoint device with {} endpoints", endpoints.len());
        sim
    }

    /// Overlord board
    pub fn overlord(id: &str) -> Self {
        let mut sim = Self::empty(id, SimKind::Overlord);
        sim.insert_io(0x6, "Si5345-ovld");

        sim.blocks
            .insert(master::TSTAMP.to_string(), vec![0x0000_1000, 0]);
        sim.blocks.insert(master::TSTAMP_SET.to_string(), vec![0, 0]);
        sim.words.insert(master::TS_EN.to_string(), 0);
        sim.insert_upstream(master::UPSTREAM_EPT);
        sim.blocks.insert(master::ACMD_TXBUF.to_string(), Vec::new());
        sim.words.insert(master::echo::GO.to_string(), 0);
        sim.words.insert(master::echo::RX_DONE.to_string(), 0);
        sim.blocks.insert(master::echo::TX_TSTAMP.to_string(), vec![0, 0]);
        sim.blocks.insert(master::echo::RX_TSTAMP.to_string(), vec![0, 0]);
        sim
    }

    /// Fanout board; slots 0-3 carry a live link
    pub fn fanout(id: &str) -> Self {
        let mut sim = Self::empty(id, SimKind::Fanout);
        sim.insert_io(0x5, "Si5345-fo");
        sim.words.insert(fanout::MUX.to_string(), 0);
        sim.insert_upstream(fanout::UPSTREAM_EPT);
        sim.with_live_slots(&[0, 1, 2, 3])
    }

    fn insert_io(&mut self, design: u32, pll_design_id: &str) {
        self.words.insert(board::VERSION.to_string(), SIM_BOARD_VERSION);
        self.words.insert(board::config::BOARD_TYPE.to_string(), 0x0);
        self.words.insert(board::config::CARRIER_TYPE.to_string(), 0x0);
        self.words.insert(board::config::DESIGN_TYPE.to_string(), design);
        for ctrl in [
            board::ctrl::SOFT_RST,
            board::ctrl::PLL_RST,
            board::ctrl::RST_I2C,
            board::ctrl::RST_I2CMUX,
            board::ctrl::RST_LOCK_MON,
        ] {
            self.words.insert(ctrl.to_string(), 0);
        }
        for (stat, value) in [
            ("mmcm_ok", 1),
            ("mmcm_sticky", 1),
            ("pll_ok", 1),
            ("pll_sticky", 1),
            ("cdr_lol", 0),
            ("cdr_los", 0),
            ("sfp_los", 0),
        ] {
            self.words
                .insert(node_path(board::CSR_STAT, stat), value);
        }
        self.blocks.insert(
            board::pll::DESIGN_ID.to_string(),
            ascii_words(pll_design_id, board::pll::DESIGN_ID_WORDS),
        );
        for flag in ["lol", "los_xaxb", "los_in0", "los_in1", "hold"] {
            self.words.insert(node_path(board::pll::STAT, flag), 0);
        }
        for flag in ["lol", "los_xaxb", "los_in0", "los_in1", "hold", "cal"] {
            self.words.insert(node_path(board::pll::STICKY, flag), 0);
        }
    }

    fn insert_upstream(&mut self, base: &str) {
        self.words.insert(node_path(base, ept::CTRL_EP_EN), 0);
        self.words.insert(node_path(base, ept::STAT_STATE), 0);
    }

    /// Set any word register
    #[must_use]
    pub fn with_word(mut self, path: &str, value: u32) -> Self {
        self.words.insert(path.to_string(), value);
        self
    }

    /// Set the version word of endpoint `n`
    #[must_use]
    pub fn with_version(self, n: u32, version: u32) -> Self {
        let path = node_path(&ept::node_name(n), ept::VERSION);
        self.with_word(&path, version)
    }

    /// Set the raw state code of endpoint `n`
    #[must_use]
    pub fn with_state(self, n: u32, code: u32) -> Self {
        let path = node_path(&ept::node_name(n), ept::STAT_STATE);
        self.with_word(&path, code)
    }

    /// Set the event counter of endpoint `n`
    #[must_use]
    pub fn with_event_counter(self, n: u32, count: u32) -> Self {
        let path = node_path(&ept::node_name(n), ept::EVTCTR);
        self.with_word(&path, count)
    }

    /// Set the timestamp of endpoint `n`
    #[must_use]
    pub fn with_timestamp(mut self, n: u32, tstamp: u64) -> Self {
        let path = node_path(&ept::node_name(n), ept::TSTAMP);
        self.blocks
            .insert(path, timing_regs::u64_to_tstamp(tstamp).to_vec());
        self
    }

    /// Set the command counter block of endpoint `n`
    #[must_use]
    pub fn with_counters(mut self, n: u32, counters: &[u32]) -> Self {
        let mut block = counters.to_vec();
        block.resize(ept::NUM_COUNTERS, 0);
        self.blocks
            .insert(node_path(&ept::node_name(n), ept::CTRS), block);
        self
    }

    /// Fill the readout buffer of endpoint `n`
    #[must_use]
    pub fn with_buffer(mut self, n: u32, words: &[u32]) -> Self {
        let base = ept::node_name(n);
        self.fifos
            .insert(node_path(&base, ept::BUF_DATA), words.iter().copied().collect());
        #[allow(clippy::cast_possible_truncation)]
        let count = words.len() as u32;
        self.words.insert(node_path(&base, ept::BUF_COUNT), count);
        self
    }

    /// Echo round trip in ticks (overlord)
    #[must_use]
    pub fn with_round_trip(mut self, ticks: u32) -> Self {
        self.round_trip = ticks;
        self
    }

    /// Slots with a live downstream link (fanout)
    #[must_use]
    pub fn with_live_slots(mut self, slots: &[u32]) -> Self {
        self.live_slots = slots.iter().copied().collect();
        self.update_link_flags();
        self
    }

    /// Make every dispatch fail with a transport error
    #[must_use]
    pub fn failing_dispatch(mut self, reason: &str) -> Self {
        self.dispatch_failure = Some(reason.to_string());
        self
    }

    /// Make only the `n`th dispatch (counting from 1) fail with a transport error
    #[must_use]
    pub fn failing_dispatch_at(mut self, n: usize, reason: &str) -> Self {
        self.dispatch_failure = Some(reason.to_string());
        self.failing_dispatch_at = Some(n);
        self
    }

    /// Current value of a word register
    pub fn word(&self, path: &str) -> Option<u32> {
        self.words.get(path).copied()
    }

    /// Current content of a block register
    pub fn block(&self, path: &str) -> Option<&[u32]> {
        self.blocks.get(path).map(Vec::as_slice)
    }

    /// Every access since construction
    pub fn accesses(&self) -> &[Access] {
        &self.log
    }

    /// Word writes in queue order
    pub fn writes(&self) -> Vec<(String, u32)> {
        self.log
            .iter()
            .filter_map(|a| match a {
                Access::Write(p, v) => Some((p.clone(), *v)),
                _ => None,
            })
            .collect()
    }

    /// Number of dispatches issued
    pub fn dispatch_count(&self) -> usize {
        self.log.iter().filter(|a| **a == Access::Dispatch).count()
    }

    /// Endpoint addresses whose SFP transmitter is on (overlord)
    pub fn enabled_sfps(&self) -> Vec<u32> {
        self.enabled_sfps.iter().copied().collect()
    }

    /// Timeout set through the session
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn require(&self, exists: bool, path: &str) -> Result<()> {
        if exists {
            Ok(())
        } else {
            Err(TimingError::node_not_found(&self.id, path))
        }
    }

    fn apply_write(&mut self, path: &str, value: u32) {
        self.words.insert(path.to_string(), value);

        match self.kind {
            SimKind::Endpoint => {
                if let Some(base) = path.strip_suffix(&format!(".{}", ept::CTRL_EP_EN)) {
                    let state = if value == 0 {
                        EndpointState::StandingBy
                    } else {
                        EndpointState::Ready
                    };
                    self.words
                        .insert(node_path(base, ept::STAT_STATE), state.code());
                    self.words
                        .insert(format!("{base}.{}.ep_rdy", ept::CSR_STAT), u32::from(value != 0));
                }
            }
            SimKind::Overlord => {
                if path == node_path(master::UPSTREAM_EPT, ept::CTRL_EP_EN) {
                    let state = match (value, self.enabled_sfps.is_empty()) {
                        (0, _) => EndpointState::StandingBy,
                        (_, true) => EndpointState::WaitingSfp,
                        (_, false) => EndpointState::Ready,
                    };
                    self.words.insert(
                        node_path(master::UPSTREAM_EPT, ept::STAT_STATE),
                        state.code(),
                    );
                } else if path == master::echo::GO && value != 0 {
                    self.fire_echo();
                } else if path == board::ctrl::SOFT_RST && value != 0 {
                    info!("SimBoard {}: soft reset", self.id);
                    self.words.insert(master::TS_EN.to_string(), 0);
                }
            }
            SimKind::Fanout => {
                if path == fanout::MUX {
                    self.update_link_flags();
                } else if path == node_path(fanout::UPSTREAM_EPT, ept::CTRL_EP_EN) {
                    let live = self.live_slots.contains(&self.word(fanout::MUX).unwrap_or(0));
                    let state = match (value, live) {
                        (0, _) => EndpointState::StandingBy,
                        (_, true) => EndpointState::Ready,
                        (_, false) => EndpointState::WaitingCdrLock,
                    };
                    self.words.insert(
                        node_path(fanout::UPSTREAM_EPT, ept::STAT_STATE),
                        state.code(),
                    );
                }
            }
        }
    }

    fn apply_block_write(&mut self, path: &str, values: &[u32]) {
        self.blocks.insert(path.to_string(), values.to_vec());

        if self.kind != SimKind::Overlord {
            return;
        }
        if path == master::TSTAMP_SET {
            self.blocks.insert(master::TSTAMP.to_string(), values.to_vec());
        } else if path == master::ACMD_TXBUF {
            match master::parse_sfp_switch_packet(values) {
                Some((master::BROADCAST_ADDRESS, false)) => self.enabled_sfps.clear(),
                Some((address, true)) => {
                    self.enabled_sfps.insert(address);
                }
                Some((address, false)) => {
                    self.enabled_sfps.remove(&address);
                }
                None => debug!("SimBoard {}: ignoring async packet {values:x?}", self.id),
            }
        }
    }

    fn fire_echo(&mut self) {
        let upstream = node_path(master::UPSTREAM_EPT, ept::STAT_STATE);
        let ready = self.word(&upstream) == Some(EndpointState::Ready.code());
        if !ready {
            self.words.insert(master::echo::RX_DONE.to_string(), 0);
            return;
        }
        let tx = timing_regs::tstamp_to_u64(self.block(master::TSTAMP).unwrap_or_default());
        let rx = tx + u64::from(self.round_trip);
        self.blocks.insert(
            master::echo::TX_TSTAMP.to_string(),
            timing_regs::u64_to_tstamp(tx).to_vec(),
        );
        self.blocks.insert(
            master::echo::RX_TSTAMP.to_string(),
            timing_regs::u64_to_tstamp(rx).to_vec(),
        );
        self.words.insert(master::echo::RX_DONE.to_string(), 1);
    }

    fn update_link_flags(&mut self) {
        if self.kind != SimKind::Fanout {
            return;
        }
        let live = self.live_slots.contains(&self.word(fanout::MUX).unwrap_or(0));
        self.words
            .insert(fanout::STAT_CDR_LOL.to_string(), u32::from(!live));
        self.words
            .insert(fanout::STAT_SFP_LOS.to_string(), u32::from(!live));
    }

    fn read_block_now(&mut self, path: &str, words: usize) -> Result<Vec<u32>> {
        if let Some(fifo) = self.fifos.get_mut(path) {
            if words > fifo.len() {
                return Err(TimingError::transport(
                    &self.id,
                    format!("{path}: requested {words} words, {} available", fifo.len()),
                ));
            }
            let data: Vec<u32> = fifo.drain(..words).collect();
            #[allow(clippy::cast_possible_truncation)]
            let remaining = fifo.len() as u32;
            if let Some(base) = path.strip_suffix(&format!(".{}", ept::BUF_DATA)) {
                self.words.insert(node_path(base, ept::BUF_COUNT), remaining);
            }
            return Ok(data);
        }

        let mut data = self.blocks.get(path).cloned().unwrap_or_default();
        data.resize(words, 0);
        Ok(data)
    }
}

impl RegisterSession for SimBoard {
    fn id(&self) -> &str {
        &self.id
    }

    fn has_node(&self, path: &str) -> bool {
        let prefix = format!("{path}.");
        self.words.contains_key(path)
            || self.blocks.contains_key(path)
            || self.fifos.contains_key(path)
            || self.words.keys().any(|k| k.starts_with(&prefix))
            || self.blocks.keys().any(|k| k.starts_with(&prefix))
            || self.fifos.keys().any(|k| k.starts_with(&prefix))
    }

    fn sub_nodes(&self, path: &str) -> Result<Vec<String>> {
        self.require(self.has_node(path), path)?;
        let prefix = format!("{path}.");
        let children: BTreeSet<String> = self
            .words
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('.').next())
            .map(str::to_string)
            .collect();
        Ok(children.into_iter().collect())
    }

    fn read(&mut self, path: &str) -> Result<ValWord> {
        self.require(self.words.contains_key(path), path)?;
        self.log.push(Access::Read(path.to_string()));
        let word = ValWord::pending(path);
        self.batch.push(PendingOp::Read(word.clone()));
        Ok(word)
    }

    fn read_block(&mut self, path: &str, words: usize) -> Result<ValVector> {
        self.require(
            self.blocks.contains_key(path) || self.fifos.contains_key(path),
            path,
        )?;
        self.log.push(Access::ReadBlock(path.to_string(), words));
        let block = ValVector::pending(path);
        self.batch.push(PendingOp::ReadBlock(block.clone(), words));
        Ok(block)
    }

    fn write(&mut self, path: &str, value: u32) -> Result<()> {
        self.require(self.words.contains_key(path), path)?;
        self.log.push(Access::Write(path.to_string(), value));
        self.batch.push(PendingOp::Write(path.to_string(), value));
        Ok(())
    }

    fn write_block(&mut self, path: &str, values: &[u32]) -> Result<()> {
        self.require(self.blocks.contains_key(path), path)?;
        self.log
            .push(Access::WriteBlock(path.to_string(), values.to_vec()));
        self.batch
            .push(PendingOp::WriteBlock(path.to_string(), values.to_vec()));
        Ok(())
    }

    fn dispatch(&mut self) -> Result<()> {
        self.log.push(Access::Dispatch);
        let nth = self.dispatch_count();
        if let Some(reason) = self
            .dispatch_failure
            .as_ref()
            .filter(|_| !matches!(self.failing_dispatch_at, Some(n) if n != nth))
        {
            self.batch.drain();
            return Err(TimingError::transport(&self.id, reason.clone()));
        }

        let ops = self.batch.drain();
        debug!("SimBoard {}: dispatching {} operations", self.id, ops.len());
        for op in ops {
            match op {
                PendingOp::Read(word) => {
                    let value = self.word(word.path()).unwrap_or(0);
                    word.fill(value);
                }
                PendingOp::ReadBlock(block, words) => {
                    let data = self.read_block_now(block.path(), words)?;
                    block.fill(data);
                }
                PendingOp::Write(path, value) => self.apply_write(&path, value),
                PendingOp::WriteBlock(path, values) => self.apply_block_write(&path, &values),
            }
        }
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }
}

/// Pack an ASCII string into `words` big-endian words, NUL padded
fn ascii_words(text: &str, words: usize) -> Vec<u32> {
    let mut bytes = text.as_bytes().to_vec();
    bytes.resize(words * 4, 0);
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Transport factory serving `sim://` URIs
///
/// ```text
/// sim://endpoint?ids=0-3     endpoint device with endpoints 0..=3
/// sim://overlord?rtt=420     overlord with a 420-tick echo round trip
/// sim://fanout?live=0,2      fanout with live links on slots 0 and 2
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct SimTransport;

impl TransportFactory for SimTransport {
    fn scheme(&self) -> &str {
        "sim"
    }

    fn open(&self, id: &str, uri: &str) -> Result<Box<dyn RegisterSession>> {
        let rest = uri
            .strip_prefix("sim://")
            .ok_or_else(|| TimingError::UnsupportedTransport { uri: uri.to_string() })?;
        let (kind, query) = rest.split_once('?').unwrap_or((rest, ""));
        let params: BTreeMap<&str, &str> = query
            .split('&')
            .filter(|kv| !kv.is_empty())
            .filter_map(|kv| kv.split_once('='))
            .collect();

        let bad = |what: &str| TimingError::invalid_argument(format!("{uri}: {what}"));

        let sim = match kind {
            "endpoint" => {
                let ids = EndpointIds::parse(params.get("ids").copied().unwrap_or("0"))?;
                SimBoard::endpoint(id, ids.as_slice())
            }
            "overlord" => {
                let mut sim = SimBoard::overlord(id);
                if let Some(rtt) = params.get("rtt") {
                    sim = sim.with_round_trip(rtt.parse().map_err(|_| bad("rtt must be an integer"))?);
                }
                sim
            }
            "fanout" => {
                let mut sim = SimBoard::fanout(id);
                if let Some(live) = params.get("live") {
                    sim = sim.with_live_slots(EndpointIds::parse(live)?.as_slice());
                }
                sim
            }
            other => return Err(bad(&format!("unknown simulated board '{other}'"))),
        };

        info!("Opened simulated {kind} board {id}");
        Ok(Box::new(sim))
    }
}
