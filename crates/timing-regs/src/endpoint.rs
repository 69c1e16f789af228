// SPDX-License-Identifier: AGPL-3.0-only

//! Endpoint register block.
//!
//! Each endpoint instance on a device is a node named `endpoint<N>`; the
//! paths below are relative to that node.
//!
//! ```text
//! endpoint<N>
//! ├── version            firmware version word
//! ├── csr.ctrl.*         ep_en, buf_en, tgrp, ctr_rst
//! ├── csr.stat.*         ep_stat (4 bits), buf_err, buf_warn, ep_rdy, in_run, in_spill
//! ├── evtctr             accepted event counter
//! ├── tstamp             two-word timestamp, low word first
//! ├── buf.count          readout buffer occupancy (words)
//! ├── buf.data           readout buffer FIFO port
//! └── ctrs               command counter block (NUM_COUNTERS words)
//! ```

use std::fmt;

/// Prefix of every endpoint node name.
pub const NODE_PREFIX: &str = "endpoint";

/// Firmware version word.
pub const VERSION: &str = "version";
/// Control register group.
pub const CSR_CTRL: &str = "csr.ctrl";
/// Status register group.
pub const CSR_STAT: &str = "csr.stat";
/// Endpoint enable bit.
pub const CTRL_EP_EN: &str = "csr.ctrl.ep_en";
/// Readout buffer enable bit.
pub const CTRL_BUF_EN: &str = "csr.ctrl.buf_en";
/// Timing group (partition) selector.
pub const CTRL_TGRP: &str = "csr.ctrl.tgrp";
/// Path of the 4-bit state field.
pub const STAT_STATE: &str = "csr.stat.ep_stat";
/// Event counter.
pub const EVTCTR: &str = "evtctr";
/// Two-word timestamp.
pub const TSTAMP: &str = "tstamp";
/// Readout buffer occupancy in words.
pub const BUF_COUNT: &str = "buf.count";
/// Readout buffer data port.
pub const BUF_DATA: &str = "buf.data";
/// Command counter block.
pub const CTRS: &str = "ctrs";

/// Status field carrying the 4-bit state code.
pub const STAT_EP_STAT: &str = "ep_stat";
/// Status field flagging a readout buffer error.
pub const STAT_BUF_ERR: &str = "buf_err";
/// Control field holding the partition.
pub const CTRL_FIELD_TGRP: &str = "tgrp";

/// Number of words in the command counter block.
pub const NUM_COUNTERS: usize = 0x10;

/// Words per complete event in the readout buffer.
pub const WORDS_PER_EVENT: usize = 6;

/// Highest partition id accepted by the firmware.
pub const MAX_PARTITION: u32 = 4;

/// Name of the node for endpoint `id`.
#[must_use]
pub fn node_name(id: u32) -> String {
    format!("{NODE_PREFIX}{id}")
}

/// Endpoint receiver state machine, as reported in `csr.stat.ep_stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointState {
    /// Starting state after reset.
    StandingBy,
    /// Waiting for SFP loss-of-signal to go low.
    WaitingSfp,
    /// Waiting for CDR lock.
    WaitingCdrLock,
    /// Waiting for comma alignment.
    WaitingAlignment,
    /// Waiting for a good frequency check.
    WaitingFrequency,
    /// Waiting for a good 8b10b packet.
    WaitingDecoderLock,
    /// Waiting for timestamp initialisation.
    WaitingTimestamp,
    /// Good to go.
    Ready,
    /// Error in receiver.
    ErrorRx,
    /// Error in timestamp check.
    ErrorTimestamp,
}

impl EndpointState {
    /// Every defined state, in code order.
    pub const ALL: [Self; 10] = [
        Self::StandingBy,
        Self::WaitingSfp,
        Self::WaitingCdrLock,
        Self::WaitingAlignment,
        Self::WaitingFrequency,
        Self::WaitingDecoderLock,
        Self::WaitingTimestamp,
        Self::Ready,
        Self::ErrorRx,
        Self::ErrorTimestamp,
    ];

    /// Decode a 4-bit state code. Undefined codes return `None`.
    #[must_use]
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            0b0000 => Some(Self::StandingBy),
            0b0001 => Some(Self::WaitingSfp),
            0b0010 => Some(Self::WaitingCdrLock),
            0b0011 => Some(Self::WaitingAlignment),
            0b0100 => Some(Self::WaitingFrequency),
            0b0101 => Some(Self::WaitingDecoderLock),
            0b0110 => Some(Self::WaitingTimestamp),
            0b1000 => Some(Self::Ready),
            0b1100 => Some(Self::ErrorRx),
            0b1101 => Some(Self::ErrorTimestamp),
            _ => None,
        }
    }

    /// Firmware encoding of this state.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::StandingBy => 0b0000,
            Self::WaitingSfp => 0b0001,
            Self::WaitingCdrLock => 0b0010,
            Self::WaitingAlignment => 0b0011,
            Self::WaitingFrequency => 0b0100,
            Self::WaitingDecoderLock => 0b0101,
            Self::WaitingTimestamp => 0b0110,
            Self::Ready => 0b1000,
            Self::ErrorRx => 0b1100,
            Self::ErrorTimestamp => 0b1101,
        }
    }

    /// Operator-facing label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::StandingBy => "Standing by",
            Self::WaitingSfp => "Waiting SFP for signal",
            Self::WaitingCdrLock => "Waiting CDR lock",
            Self::WaitingAlignment => "Waiting for comma alignment",
            Self::WaitingFrequency => "Waiting for good frequency check",
            Self::WaitingDecoderLock => "Waiting for 8b10b decoder good packet",
            Self::WaitingTimestamp => "Waiting for time stamp initialisation",
            Self::Ready => "Ready",
            Self::ErrorRx => "Error in Rx",
            Self::ErrorTimestamp => "Error in time stamp check",
        }
    }
}

impl fmt::Display for EndpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Number of words to drain from a buffer holding `available` words.
///
/// With `read_all` the whole content is taken; otherwise only complete
/// events are read.
#[must_use]
pub const fn words_to_read(available: usize, read_all: bool) -> usize {
    if read_all {
        available
    } else {
        (available / WORDS_PER_EVENT) * WORDS_PER_EVENT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_defined_code_maps_to_its_label() {
        let expected = [
            (0x0, "Standing by"),
            (0x1, "Waiting SFP for signal"),
            (0x2, "Waiting CDR lock"),
            (0x3, "Waiting for comma alignment"),
            (0x4, "Waiting for good frequency check"),
            (0x5, "Waiting for 8b10b decoder good packet"),
            (0x6, "Waiting for time stamp initialisation"),
            (0x8, "Ready"),
            (0xc, "Error in Rx"),
            (0xd, "Error in time stamp check"),
        ];
        for (code, label) in expected {
            let state = EndpointState::from_code(code).expect("defined code");
            assert_eq!(state.label(), label);
            assert_eq!(state.code(), code);
        }
    }

    #[test]
    fn undefined_codes_do_not_resolve() {
        for code in [0x7, 0x9, 0xa, 0xb, 0xe, 0xf, 0x10] {
            assert_eq!(EndpointState::from_code(code), None, "code {code:#x}");
        }
    }

    #[test]
    fn all_states_round_trip_through_code() {
        for state in EndpointState::ALL {
            assert_eq!(EndpointState::from_code(state.code()), Some(state));
        }
    }

    #[test]
    fn event_mode_truncates_to_whole_events() {
        assert_eq!(words_to_read(0, false), 0);
        assert_eq!(words_to_read(5, false), 0);
        assert_eq!(words_to_read(6, false), 6);
        assert_eq!(words_to_read(17, false), 12);
    }

    #[test]
    fn read_all_keeps_the_available_count() {
        assert_eq!(words_to_read(17, true), 17);
        assert_eq!(words_to_read(0, true), 0);
    }

    #[test]
    fn node_names_carry_the_id() {
        assert_eq!(node_name(0), "endpoint0");
        assert_eq!(node_name(12), "endpoint12");
    }
}
