// SPDX-License-Identifier: AGPL-3.0-only

//! Register session backends
//!
//! - **Sim**: in-memory board model (`sim://` URIs), for CI and offline use.
//!
//! Hardware transports are external and register a [`crate::TransportFactory`].

pub mod sim;

pub use sim::{Access, SimBoard, SimKind, SimTransport};
