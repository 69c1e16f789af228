// SPDX-License-Identifier: AGPL-3.0-only

//! Fanout input mux and upstream endpoint.

/// Input mux selector.
pub const MUX: &str = "io.csr.ctrl.mux";
/// Number of downstream SFP slots behind the mux.
pub const NUM_SLOTS: u32 = 8;
/// Upstream endpoint node of the fanout.
pub const UPSTREAM_EPT: &str = "fanout.ept";
/// CDR loss-of-lock flag for the selected slot.
pub const STAT_CDR_LOL: &str = "io.csr.stat.cdr_lol";
/// SFP loss-of-signal flag for the selected slot.
pub const STAT_SFP_LOS: &str = "io.csr.stat.sfp_los";

