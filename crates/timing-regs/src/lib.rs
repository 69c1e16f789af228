// SPDX-License-Identifier: AGPL-3.0-only

//! Register model for the timing-distribution firmware family.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of the firmware address tables as the operator tooling sees
//! them: node paths, state encodings, command names and fixed sizes.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`endpoint`] | Endpoint register block, 4-bit state table, buffer sizes |
//! | [`commands`] | Fixed-length command names (counter table labels) |
//! | [`board`] | IO block shared by overlord and fanout, identification tables |
//! | [`master`] | Overlord master block: timestamp, echo monitor, async command buffer |
//! | [`fanout`] | Fanout input mux and upstream endpoint |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod board;
pub mod commands;
pub mod endpoint;
pub mod fanout;
pub mod master;

/// Join a node path relative to `base` (`"endpoint3"` + `"csr.ctrl"`).
#[must_use]
pub fn node_path(base: &str, rel: &str) -> String {
    if base.is_empty() {
        rel.to_string()
    } else {
        format!("{base}.{rel}")
    }
}

/// Combine a two-word timestamp block (low word first) into a 64-bit value.
///
/// Missing words read as zero.
#[must_use]
pub fn tstamp_to_u64(words: &[u32]) -> u64 {
    let lo = words.first().copied().unwrap_or(0);
    let hi = words.get(1).copied().unwrap_or(0);
    (u64::from(hi) << 32) | u64::from(lo)
}

/// Split a 64-bit timestamp into the two-word block layout.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn u64_to_tstamp(value: u64) -> [u32; 2] {
    [value as u32, (value >> 32) as u32]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_paths_join_with_dots() {
        assert_eq!(node_path("endpoint3", "csr.ctrl"), "endpoint3.csr.ctrl");
        assert_eq!(node_path("", "io.csr"), "io.csr");
    }

    #[test]
    fn timestamp_words_combine_low_first() {
        assert_eq!(tstamp_to_u64(&[0x0000_0002, 0x0000_0001]), 0x1_0000_0002);
        assert_eq!(tstamp_to_u64(&[]), 0);
        assert_eq!(u64_to_tstamp(0x1_0000_0002), [2, 1]);
    }
}
