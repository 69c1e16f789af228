//! Register-level driver for timing-distribution boards.
//!
//! Everything above the bus goes through the [`RegisterSession`] contract:
//! reads and writes are queued, return deferred values, and only hit the
//! hardware on [`RegisterSession::dispatch`]. On top of it sit the operator
//! operations:
//!
//! ```text
//! ConnectionManager ── connections.toml ──► Box<dyn RegisterSession>
//!        │                                          │
//!        ├─ get_device(id) ─► EndpointGroup  (enable, monitor, readback)
//!        └─ open_fleet(grp) ─► Fleet ─► Board (overlord | fanout)
//!                                      (setup, synctime, status, scan,
//!                                       measure-delay)
//! ```
//!
//! The bus transport itself is pluggable through [`TransportFactory`]. The
//! built-in [`backends::SimTransport`] serves `sim://` URIs with in-memory
//! boards, used by the tests and for offline rehearsal.
//!
//! # Quick start
//!
//! ```
//! use timing_driver::backends::SimBoard;
//! use timing_driver::EndpointGroup;
//!
//! # fn main() -> timing_driver::Result<()> {
//! let mut device = SimBoard::endpoint("EPT", &[0, 1, 2]);
//! let mut group = EndpointGroup::resolve(&mut device, &[0, 1, 2])?;
//! let report = group.enable(true, 1)?;
//! assert_eq!(report.to_string(), "Endpoints 0,1,2 activated in partition 1");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod backends;
mod board;
mod connection;
mod endpoint;
mod error;
mod fleet;
mod ids;
mod session;

pub use board::{
    format_timestamp, Board, BoardIdentity, BoardRole, Delays, EchoMeasurement, PllStatus,
    PortScan, TimeSync,
};
pub use connection::{ConnectionManager, GroupSpec, TransportFactory};
pub use endpoint::{
    EnableReport, EndpointGroup, EndpointSnapshot, MonitorSnapshot, Readback, VersionReport,
};
pub use error::{Result, TimingError};
pub use fleet::{AddressMap, DelayMeasurement, Fleet, FleetStatus, SlotMapping};
pub use ids::{join as join_ids, EndpointIds, IdListError, MAX_RANGE_SPAN};
pub use session::{
    collect_words, read_sub_nodes, Batch, PendingOp, RegisterSession, ValVector, ValWord,
};

