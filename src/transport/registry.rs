// MIT License - Copyright (c) 2021 TJForc
// Single-session guard keyed by panel identity

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::error::{DmpError, Result};

/// The (host, port, account) triple a session talks to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PanelIdentity {
    pub host: String,
    pub port: u16,
    pub account: String,
}

impl PanelIdentity {
    pub fn new(host: impl Into<String>, port: u16, account: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            account: account.into(),
        }
    }
}

impl fmt::Display for PanelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} (account {})", self.host, self.port, self.account)
    }
}

/// Set of panel identities with an open session.
///
/// Clones share the same set. Sessions that should exclude each other must
/// be created from clones of one registry.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    active: Arc<Mutex<HashSet<PanelIdentity>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<PanelIdentity>> {
        // the set stays consistent even if a holder panicked
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim an identity. Fails with `AlreadyConnected` if it is taken.
    pub fn register(&self, identity: PanelIdentity) -> Result<Registration> {
        let mut active = self.lock();
        if active.contains(&identity) {
            return Err(DmpError::AlreadyConnected(identity));
        }
        active.insert(identity.clone());
        debug!("Registered session for {}", identity);
        Ok(Registration {
            registry: self.clone(),
            identity,
        })
    }

    pub fn is_active(&self, identity: &PanelIdentity) -> bool {
        self.lock().contains(identity)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn release(&self, identity: &PanelIdentity) {
        if self.lock().remove(identity) {
            debug!("Released session for {}", identity);
        }
    }
}

/// Holds an identity in the registry until dropped.
#[derive(Debug)]
pub struct Registration {
    registry: ConnectionRegistry,
    identity: PanelIdentity,
}

impl Registration {
    pub fn identity(&self) -> &PanelIdentity {
        &self.identity
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.release(&self.identity);
    }
}
