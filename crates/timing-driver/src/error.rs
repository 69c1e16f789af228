// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for timing register operations

use std::path::PathBuf;
use thiserror::Error;

use crate::ids::IdListError;

/// Result type alias for timing operations
pub type Result<T> = std::result::Result<T, TimingError>;

/// Errors that can occur while talking to timing boards
#[derive(Debug, Error)]
pub enum TimingError {
    /// Register node absent from the device address table
    #[error("Node '{path}' not found on device {device}")]
    NodeNotFound {
        /// Device identifier
        device: String,
        /// Requested node path
        path: String,
    },

    /// Value read before the dispatch carrying it completed
    #[error("Value of '{path}' read before dispatch")]
    NotDispatched {
        /// Node path of the pending read
        path: String,
    },

    /// Register transaction failed on the bus
    #[error("Transport error on {device}: {reason}")]
    Transport {
        /// Device identifier
        device: String,
        /// Reason for failure
        reason: String,
    },

    /// No transport registered for the URI scheme
    #[error("Unsupported transport URI: {uri}")]
    UnsupportedTransport {
        /// Offending URI
        uri: String,
    },

    /// Device id not present in the connections file
    #[error("Unknown device '{id}' (not in connections file)")]
    UnknownDevice {
        /// Requested device id
        id: String,
    },

    /// Requested endpoints absent from the device
    #[error("Endpoints {} do not exist on device {device}", join_ids(.ids))]
    MissingEndpoints {
        /// Device identifier
        device: String,
        /// Ids that could not be resolved
        ids: Vec<u32>,
    },

    /// Endpoint id list could not be parsed
    #[error(transparent)]
    IdList(#[from] IdListError),

    /// Receiver failed to reach the ready state
    #[error("Receiver on {board} not ready: state {state:#x} ({label})")]
    ReceiverNotReady {
        /// Board identifier
        board: String,
        /// Raw state code read back
        state: u32,
        /// State label, or "undefined"
        label: &'static str,
    },

    /// Endpoint address has no fanout slot mapping
    #[error("Address {address:#x} not mapped to a fanout slot (pass --slot)")]
    UnmappedAddress {
        /// Endpoint address
        address: u32,
    },

    /// Argument out of the range accepted by the firmware
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// Reason for rejection
        reason: String,
    },

    /// Connections file could not be parsed
    #[error("Failed to parse {path}: {reason}")]
    Config {
        /// File being parsed
        path: PathBuf,
        /// Parser message
        reason: String,
    },

    /// I/O error while loading configuration
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl TimingError {
    /// Create a node not found error
    pub fn node_not_found(device: impl Into<String>, path: impl Into<String>) -> Self {
        Self::NodeNotFound {
            device: device.into(),
            path: path.into(),
        }
    }

    /// Create a transport error
    pub fn transport(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transport {
            device: device.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Config {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

fn join_ids(ids: &[u32]) -> String {
    ids.iter().map(u32::to_string).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_endpoints_message_lists_every_id() {
        let err = TimingError::MissingEndpoints {
            device: "EPT".into(),
            ids: vec![5, 7],
        };
        assert_eq!(err.to_string(), "Endpoints 5, 7 do not exist on device EPT");
    }
}
