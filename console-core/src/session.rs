//! Operator session: the passphrase and the current project/network choice.
//!
//! Passed explicitly to whatever needs it. Nothing here is global.

use std::fmt;
use zeroize::{Zeroize, Zeroizing};

use crate::error::ValidationError;

pub struct SessionContext {
    passphrase: Zeroizing<String>,
    project: Option<String>,
    network: Option<String>,
}

impl SessionContext {
    pub fn new(passphrase: impl Into<String>) -> Result<Self, ValidationError> {
        let passphrase = Zeroizing::new(passphrase.into());
        if passphrase.is_empty() {
            return Err(ValidationError::MissingPassword);
        }
        Ok(Self {
            passphrase,
            project: None,
            network: None,
        })
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }

    pub fn project(&self) -> Option<&str> {
        self.project.as_deref()
    }

    pub fn network(&self) -> Option<&str> {
        self.network.as_deref()
    }

    pub fn is_active(&self) -> bool {
        !self.passphrase.is_empty()
    }

    /// Wipes the passphrase and forgets the selection.
    pub fn clear(&mut self) {
        self.passphrase.zeroize();
        self.project = None;
        self.network = None;
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("passphrase", &"***REDACTED***")
            .field("project", &self.project)
            .field("network", &self.network)
            .finish()
    }
}
