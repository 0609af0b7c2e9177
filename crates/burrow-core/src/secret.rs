//! Shared-secret store backing the access guard.
//!
//! One store exists per process and is shared across connections via
//! `Arc`. The guard reads the current value at check time, so an
//! updated secret applies to the next request without a restart.
//!
//! The guard fails closed: an unconfigured (empty) secret denies every
//! request, including one presenting an empty credential. Updates with
//! an empty value are ignored, so the most recently supplied non-empty
//! secret stays enforced.

use std::sync::RwLock;

/// Process-wide shared secret with an interior-locked read path.
#[derive(Debug, Default)]
pub struct SecretStore {
    current: RwLock<String>,
}

impl SecretStore {
    /// Create a store holding `initial`. An empty initial value leaves
    /// the store unconfigured, which denies all requests.
    pub fn new(initial: &str) -> Self {
        Self {
            current: RwLock::new(initial.to_string()),
        }
    }

    /// Compare a presented credential against the current secret.
    ///
    /// Exact string equality. Denies when no secret is configured.
    pub fn verify(&self, presented: &str) -> bool {
        let current = self.current.read().expect("secret lock poisoned");
        !current.is_empty() && *current == presented
    }

    /// Install a new secret. Empty values are ignored and return
    /// `false` so callers can log the rejected update.
    pub fn update(&self, value: &str) -> bool {
        if value.is_empty() {
            return false;
        }
        let mut current = self.current.write().expect("secret lock poisoned");
        *current = value.to_string();
        true
    }

    /// Whether a non-empty secret is currently installed.
    pub fn is_configured(&self) -> bool {
        !self.current.read().expect("secret lock poisoned").is_empty()
    }
}
