//! Controller-specific error types.
//!
//! This module defines the errors of the BareMetalHost controller that are
//! not covered by upstream library errors, including the typed BMC
//! credential errors that decide whether a host is requeued.

use bmc::BmcError;
use ironic_client::IronicError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the BareMetalHost controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Provisioning backend error
    #[error("Ironic error: {0}")]
    Ironic(#[from] IronicError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A state action failed on the transport channel
    #[error("action \"{state}\" failed: {source}")]
    Action {
        state: String,
        #[source]
        source: IronicError,
    },

    /// The BMC details or secret of a host could not be used
    #[error("BMC credentials error: {0}")]
    Credentials(#[from] CredentialsError),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Status could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Problems with the BMC details or the credentials Secret of a host.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialsError {
    /// `spec.bmc.address` is empty
    #[error("Empty BMC address")]
    EmptyBmcAddress,

    /// `spec.bmc.credentialsName` is empty
    #[error("No BMC CredentialsName defined")]
    EmptyBmcSecret,

    /// The referenced Secret does not exist
    #[error("BMC CredentialsName secret doesn't exist")]
    ResolveBmcSecretRef,

    /// The Secret lacks a required key
    #[error("Secret {secret} does not contain key {key}")]
    NoDataInSecret { secret: String, key: String },

    /// A credential field is empty after trimming
    #[error("{0}")]
    CredentialsValidation(String),

    /// The address scheme has no registered driver
    #[error("{0}")]
    UnknownBmcType(String),
}

impl CredentialsError {
    /// Whether the host should be retried later.
    ///
    /// A Secret that does not exist yet may still be created. Every other
    /// problem needs the host or the Secret to be edited, which triggers a
    /// new reconcile anyway.
    #[must_use]
    pub fn requeue(&self) -> bool {
        matches!(self, Self::ResolveBmcSecretRef)
    }
}

impl From<BmcError> for CredentialsError {
    fn from(err: BmcError) -> Self {
        match err {
            BmcError::CredentialsValidation(message) => Self::CredentialsValidation(message),
            other => Self::UnknownBmcType(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_error_messages() {
        assert_eq!(CredentialsError::EmptyBmcAddress.to_string(), "Empty BMC address");
        assert_eq!(
            CredentialsError::NoDataInSecret {
                secret: "bmc-secret".to_string(),
                key: "username".to_string(),
            }
            .to_string(),
            "Secret bmc-secret does not contain key username"
        );
    }

    #[test]
    fn test_only_missing_secret_requeues() {
        assert!(CredentialsError::ResolveBmcSecretRef.requeue());
        assert!(!CredentialsError::EmptyBmcSecret.requeue());
        assert!(!CredentialsError::EmptyBmcAddress.requeue());
    }

    #[test]
    fn test_bmc_errors_convert() {
        let err: CredentialsError = BmcError::UnknownBmcType {
            address: "foo://1.2.3.4".to_string(),
            bmc_type: "foo".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Unknown BMC type 'foo' for address foo://1.2.3.4",
            "Unknown type message should pass through"
        );

        let err: CredentialsError = BmcError::CredentialsValidation(
            "Missing BMC connection detail 'username' in credentials".to_string(),
        )
        .into();
        assert!(matches!(err, CredentialsError::CredentialsValidation(_)));
    }
}
