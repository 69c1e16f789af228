// SPDX-License-Identifier: AGPL-3.0-only

//! Fixed-length command names.
//!
//! Index into the endpoint command counter block. Slots past the table are
//! reserved and have no name.

/// Command names by code.
pub const COMMAND_NAMES: [&str; 15] = [
    "TimeSync",
    "Echo",
    "SpillStart",
    "SpillStop",
    "RunStart",
    "RunStop",
    "WibCalib",
    "SSPCalib",
    "FakeTrig0",
    "FakeTrig1",
    "FakeTrig2",
    "FakeTrig3",
    "BeamTrig",
    "NoBeamTrig",
    "ExtFakeTrig",
];

/// Name of command `code`, if it has one.
#[must_use]
pub fn command_name(code: usize) -> Option<&'static str> {
    COMMAND_NAMES.get(code).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_and_reserved_slots() {
        assert_eq!(command_name(0x0), Some("TimeSync"));
        assert_eq!(command_name(0x1), Some("Echo"));
        assert_eq!(command_name(0xe), Some("ExtFakeTrig"));
        assert_eq!(command_name(0xf), None);
    }
}
