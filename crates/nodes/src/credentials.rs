//! Secret lookup for jobs, keyed by (service, username).

use std::collections::HashMap;

use crate::NodeError;

/// A store that resolves the secret a job injects into its command.
pub trait CredentialStore: Send + Sync {
    fn get(&self, service: &str, username: &str) -> Result<String, NodeError>;
}

/// The platform credential store (Secret Service / keyutils, Keychain,
/// Credential Manager), through the `keyring` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringStore;

impl KeyringStore {
    fn entry(service: &str, username: &str) -> Result<keyring::Entry, NodeError> {
        keyring::Entry::new(service, username).map_err(|e| credential_error(service, username, e))
    }

    pub fn set(&self, service: &str, username: &str, secret: &str) -> Result<(), NodeError> {
        Self::entry(service, username)?
            .set_password(secret)
            .map_err(|e| credential_error(service, username, e))
    }

    pub fn delete(&self, service: &str, username: &str) -> Result<(), NodeError> {
        Self::entry(service, username)?
            .delete_credential()
            .map_err(|e| credential_error(service, username, e))
    }
}

impl CredentialStore for KeyringStore {
    fn get(&self, service: &str, username: &str) -> Result<String, NodeError> {
        Self::entry(service, username)?
            .get_password()
            .map_err(|e| credential_error(service, username, e))
    }
}

fn credential_error(service: &str, username: &str, e: impl std::fmt::Display) -> NodeError {
    NodeError::Credential {
        service: service.to_string(),
        username: username.to_string(),
        message: e.to_string(),
    }
}

/// Reads `CRONNED_SECRET_<SERVICE>_<USERNAME>` from the environment.
///
/// Service and username are upper-cased and every character outside
/// `[A-Z0-9]` becomes `_`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvStore;

impl EnvStore {
    pub fn variable_name(service: &str, username: &str) -> String {
        let clean = |s: &str| -> String {
            s.chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() {
                        c.to_ascii_uppercase()
                    } else {
                        '_'
                    }
                })
                .collect()
        };
        format!("CRONNED_SECRET_{}_{}", clean(service), clean(username))
    }
}

impl CredentialStore for EnvStore {
    fn get(&self, service: &str, username: &str) -> Result<String, NodeError> {
        let key = Self::variable_name(service, username);
        std::env::var(&key).map_err(|e| credential_error(service, username, format!("{key}: {e}")))
    }
}

/// Fixed in-memory secrets.
#[derive(Debug, Default, Clone)]
pub struct StaticStore {
    secrets: HashMap<(String, String), String>,
}

impl StaticStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, service: &str, username: &str, secret: &str) -> Self {
        self.secrets
            .insert((service.to_string(), username.to_string()), secret.to_string());
        self
    }
}

impl CredentialStore for StaticStore {
    fn get(&self, service: &str, username: &str) -> Result<String, NodeError> {
        self.secrets
            .get(&(service.to_string(), username.to_string()))
            .cloned()
            .ok_or_else(|| credential_error(service, username, "no such secret"))
    }
}
