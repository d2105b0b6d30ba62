//! Controller configuration.
//!
//! Everything is read from environment variables once at start-up.

use crate::error::ControllerError;
use ironic_client::IronicConfig;
use std::env;
use std::str::FromStr;
use tracing::info;

const DEFAULT_CONCURRENCY: u16 = 3;
const DEFAULT_MAX_BUSY_HOSTS: usize = 20;

/// Validated controller settings
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the provisioning backend
    pub ironic_endpoint: String,
    /// HTTP basic auth for the backend
    pub ironic_auth: Option<(String, String)>,
    /// Namespace to watch, all namespaces when unset
    pub namespace: Option<String>,
    /// Maximum concurrent host reconciles
    pub concurrency: u16,
    pub ironic: IronicConfig,
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load using `lookup` to resolve variable names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let ironic_endpoint = var("IRONIC_ENDPOINT").ok_or_else(|| {
            ControllerError::InvalidConfig("IRONIC_ENDPOINT environment variable is required".to_string())
        })?;

        let ironic_auth = match (var("IRONIC_USERNAME"), var("IRONIC_PASSWORD")) {
            (Some(user), Some(password)) => Some((user, password)),
            (None, None) => None,
            _ => {
                return Err(ControllerError::InvalidConfig(
                    "IRONIC_USERNAME and IRONIC_PASSWORD must be set together".to_string(),
                ));
            }
        };

        let concurrency = parse_or(var("BMO_CONCURRENCY"), "BMO_CONCURRENCY", DEFAULT_CONCURRENCY)?;
        if concurrency == 0 {
            return Err(ControllerError::InvalidConfig(
                "BMO_CONCURRENCY must be at least 1".to_string(),
            ));
        }

        let ironic = IronicConfig {
            deploy_kernel_url: var("DEPLOY_KERNEL_URL"),
            deploy_ramdisk_url: var("DEPLOY_RAMDISK_URL"),
            max_busy_hosts: parse_or(var("IRONIC_MAX_BUSY_HOSTS"), "IRONIC_MAX_BUSY_HOSTS", DEFAULT_MAX_BUSY_HOSTS)?,
            provisioning_network_disabled: parse_or(
                var("PROVISIONING_NETWORK_DISABLED"),
                "PROVISIONING_NETWORK_DISABLED",
                false,
            )?,
        };

        Ok(Self {
            ironic_endpoint,
            ironic_auth,
            namespace: var("WATCH_NAMESPACE"),
            concurrency,
            ironic,
        })
    }

    /// Log the effective settings, without secrets.
    pub fn log(&self) {
        info!("Configuration:");
        info!("  Ironic endpoint: {}", self.ironic_endpoint);
        info!("  Ironic auth: {}", if self.ironic_auth.is_some() { "basic" } else { "none" });
        info!("  Namespace: {}", self.namespace.as_deref().unwrap_or("all namespaces"));
        info!("  Concurrency: {}", self.concurrency);
        info!("  Max busy hosts: {}", self.ironic.max_busy_hosts);
        info!("  Provisioning network disabled: {}", self.ironic.provisioning_network_disabled);
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T, ControllerError> {
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            ControllerError::InvalidConfig(format!("{key} has an invalid value: {raw}"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ControllerError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("IRONIC_ENDPOINT", "http://ironic:6385")]).unwrap();
        assert_eq!(config.ironic_endpoint, "http://ironic:6385");
        assert_eq!(config.concurrency, 3, "Default concurrency");
        assert_eq!(config.ironic.max_busy_hosts, 20, "Default busy host limit");
        assert!(!config.ironic.provisioning_network_disabled);
        assert!(config.namespace.is_none());
        assert!(config.ironic_auth.is_none());
    }

    #[test]
    fn test_endpoint_required() {
        let err = load(&[]).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)), "Got {err:?}");
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("IRONIC_ENDPOINT", "http://ironic:6385"),
            ("IRONIC_USERNAME", "admin"),
            ("IRONIC_PASSWORD", "secret"),
            ("WATCH_NAMESPACE", "metal"),
            ("BMO_CONCURRENCY", "8"),
            ("IRONIC_MAX_BUSY_HOSTS", "5"),
            ("PROVISIONING_NETWORK_DISABLED", "true"),
            ("DEPLOY_KERNEL_URL", "http://images/ipa.kernel"),
        ])
        .unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.ironic.max_busy_hosts, 5);
        assert!(config.ironic.provisioning_network_disabled);
        assert_eq!(config.namespace.as_deref(), Some("metal"));
        assert_eq!(
            config.ironic_auth,
            Some(("admin".to_string(), "secret".to_string()))
        );
        assert_eq!(config.ironic.deploy_kernel_url.as_deref(), Some("http://images/ipa.kernel"));
        assert!(config.ironic.deploy_ramdisk_url.is_none());
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        for (key, value) in [
            ("BMO_CONCURRENCY", "many"),
            ("BMO_CONCURRENCY", "0"),
            ("IRONIC_MAX_BUSY_HOSTS", "-1"),
            ("PROVISIONING_NETWORK_DISABLED", "yes"),
        ] {
            let result = load(&[("IRONIC_ENDPOINT", "http://ironic:6385"), (key, value)]);
            assert!(result.is_err(), "{key}={value} should be rejected");
        }
    }

    #[test]
    fn test_partial_auth_rejected() {
        let result = load(&[("IRONIC_ENDPOINT", "http://ironic:6385"), ("IRONIC_USERNAME", "admin")]);
        assert!(result.is_err(), "Username without password should be rejected");
    }
}
