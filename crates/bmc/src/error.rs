//! BMC errors

use thiserror::Error;

/// Errors produced while interpreting BMC details
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BmcError {
    /// The address scheme does not match any registered driver
    #[error("Unknown BMC type '{bmc_type}' for address {address}")]
    UnknownBmcType { address: String, bmc_type: String },

    /// The address could not be parsed into scheme, host and port
    #[error("failed to parse BMC address information: {0}")]
    InvalidAddress(String),

    /// The credentials are missing a required field
    #[error("Validation error with BMC credentials: {0}")]
    CredentialsValidation(String),

    /// Firmware settings were requested from a driver that cannot apply them
    #[error("firmware settings for {0} are not supported")]
    UnsupportedFirmware(String),
}
