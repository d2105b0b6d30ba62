//! BMC credentials

use crate::error::BmcError;
use std::fmt;

/// Username and password for a BMC, as read from a Secret.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Build credentials, trimming surrounding whitespace from both fields.
    pub fn new(username: impl AsRef<str>, password: impl AsRef<str>) -> Self {
        Self {
            username: username.as_ref().trim().to_string(),
            password: password.as_ref().trim().to_string(),
        }
    }

    /// Check that both fields are present.
    pub fn validate(&self) -> Result<(), BmcError> {
        if self.username.is_empty() {
            return Err(BmcError::CredentialsValidation(
                "Missing BMC connection detail 'username' in credentials".to_string(),
            ));
        }
        if self.password.is_empty() {
            return Err(BmcError::CredentialsValidation(
                "Missing BMC connection details 'password' in credentials".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_trims_whitespace() {
        let creds = Credentials::new(" admin\n", "\tpw \n");
        assert_eq!(creds.username, "admin");
        assert_eq!(creds.password, "pw");
    }

    #[test]
    fn test_validate() {
        assert!(Credentials::new("admin", "pw").validate().is_ok());

        let err = Credentials::new("", "pw").validate().unwrap_err();
        assert!(err.to_string().contains("'username'"), "Unexpected error: {err}");

        let err = Credentials::new("admin", "  ").validate().unwrap_err();
        assert!(err.to_string().contains("'password'"), "Unexpected error: {err}");
    }

    #[test]
    fn test_debug_hides_password() {
        let rendered = format!("{:?}", Credentials::new("admin", "hunter2"));
        assert!(!rendered.contains("hunter2"), "Password leaked: {rendered}");
    }
}
