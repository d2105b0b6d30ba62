//! Provisioning backend errors

use thiserror::Error;

/// Errors that can occur when talking to the provisioning backend.
///
/// These are transport or programming failures. A failure the backend
/// reports for an operation (e.g. a node's `last_error`) is not an error
/// here: it travels in [`OperationResult::error_message`](crate::OperationResult).
#[derive(Debug, Error)]
pub enum IronicError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend returned an unexpected status
    #[error("Ironic API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Node is locked by another operation (HTTP 409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Backend rejected the request as malformed (HTTP 400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The host has no node in the backend yet
    #[error("Host not registered")]
    NeedsRegistration,

    /// BMC rejected a soft power-off
    #[error("soft power off is unsupported on BMC")]
    SoftPowerOffUnsupported,

    /// The boot MAC is already registered to a differently named node
    #[error("MAC address {address} conflicts with existing node {node}")]
    MacAddressConflict { address: String, node: String },

    /// Node has no firmware interface
    #[error("Firmware update is unsupported")]
    FirmwareUpdateUnsupported,

    /// Invalid request (e.g., missing BMC access details)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}
