//! BMC credentials lookup.
//!
//! Resolves `spec.bmc.credentialsName` to a Secret in the host's namespace,
//! reads the username and password from it and checks that the BMC address
//! maps to a known driver.

use crate::error::{ControllerError, CredentialsError};
use bmc::{AccessDetails, Credentials, DriverRegistry};
use crds::{BareMetalHost, CredentialsStatus};
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client, ResourceExt};
use tracing::debug;

pub const USERNAME_KEY: &str = "username";
pub const PASSWORD_KEY: &str = "password";

/// Validated BMC connection settings for one host.
pub struct BmcConnection {
    pub credentials: Credentials,
    /// Fingerprint of the Secret the credentials came from
    pub status: CredentialsStatus,
    pub access: Box<dyn AccessDetails>,
}

impl std::fmt::Debug for BmcConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BmcConnection")
            .field("credentials", &self.credentials)
            .field("status", &self.status)
            .field("driver", &self.access.driver())
            .finish()
    }
}

/// Fetch the host's BMC Secret and validate everything needed to talk to
/// the BMC.
///
/// Problems with the host or the Secret come back as
/// [`ControllerError::Credentials`]; API failures as [`ControllerError::Kube`].
pub async fn build_and_validate(
    client: &Client,
    registry: &DriverRegistry,
    host: &BareMetalHost,
) -> Result<BmcConnection, ControllerError> {
    let bmc = &host.spec.bmc;
    if bmc.credentials_name.is_empty() {
        return Err(CredentialsError::EmptyBmcSecret.into());
    }

    let namespace = host.namespace().unwrap_or_default();
    let secrets: Api<Secret> = Api::namespaced(client.clone(), &namespace);
    let Some(secret) = secrets.get_opt(&bmc.credentials_name).await? else {
        debug!("BMC secret {}/{} not found", namespace, bmc.credentials_name);
        return Err(CredentialsError::ResolveBmcSecretRef.into());
    };

    Ok(validate_connection(registry, host, &secret)?)
}

/// Checks that need the Secret but no API access.
pub fn validate_connection(
    registry: &DriverRegistry,
    host: &BareMetalHost,
    secret: &Secret,
) -> Result<BmcConnection, CredentialsError> {
    let bmc = &host.spec.bmc;
    if bmc.address.is_empty() {
        return Err(CredentialsError::EmptyBmcAddress);
    }

    let credentials = credentials_from_secret(secret)?;
    credentials.validate()?;

    let access = registry.new_access_details(&bmc.address, bmc.disable_certificate_verification)?;

    Ok(BmcConnection {
        credentials,
        status: credentials_status(secret),
        access,
    })
}

/// Read the username and password keys of a Secret.
pub fn credentials_from_secret(secret: &Secret) -> Result<Credentials, CredentialsError> {
    let value = |key: &str| {
        secret
            .data
            .as_ref()
            .and_then(|data| data.get(key))
            .map(|bytes| String::from_utf8_lossy(&bytes.0).into_owned())
            .ok_or_else(|| CredentialsError::NoDataInSecret {
                secret: secret.name_any(),
                key: key.to_string(),
            })
    };
    Ok(Credentials::new(value(USERNAME_KEY)?, value(PASSWORD_KEY)?))
}

/// Fingerprint a Secret so credential changes can be noticed.
pub fn credentials_status(secret: &Secret) -> CredentialsStatus {
    CredentialsStatus {
        name: secret.name_any(),
        namespace: secret.namespace().unwrap_or_default(),
        version: secret.resource_version().unwrap_or_default(),
    }
}
