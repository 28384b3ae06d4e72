//! Handles opened per call and shared through leases.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use sqlbind_core::{Dbi, DbiError, Handle, Result};
use tracing::{debug, trace, warn};

use crate::object::HandleSupplier;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The handle behind every lease taken while it is open.
struct Shared {
    handle: Mutex<Option<Handle>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let handle = self
            .handle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            debug!("closing on-demand handle");
            if let Err(err) = handle.close() {
                warn!("failed to close on-demand handle: {}", err);
            }
        }
    }
}

/// A claim on an on-demand handle.
///
/// The handle stays open while any lease on it exists and is closed when
/// the last one is dropped. Leases can be sent to other threads; uses of
/// the handle are serialized.
pub struct HandleLease {
    shared: Arc<Shared>,
    reason: String,
}

impl HandleLease {
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Number of leases currently held on this handle.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.shared)
    }

    /// Takes another lease on the same handle.
    pub fn retain<R: Into<String>>(&self, reason: R) -> HandleLease {
        let reason = reason.into();
        trace!("retaining on-demand handle for {}", reason);
        HandleLease {
            shared: self.shared.clone(),
            reason,
        }
    }

    /// Runs `f` with exclusive use of the handle.
    pub fn with<R>(&self, f: impl FnOnce(&Handle) -> Result<R>) -> Result<R> {
        let guard = lock(&self.shared.handle);
        match guard.as_ref() {
            Some(handle) => f(handle),
            None => Err(DbiError::Closed),
        }
    }
}

impl Drop for HandleLease {
    fn drop(&mut self) {
        trace!("releasing on-demand handle held for {}", self.reason);
    }
}

impl fmt::Debug for HandleLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleLease")
            .field("reason", &self.reason)
            .field("holders", &self.holders())
            .finish()
    }
}

/// Opens a handle from a [`Dbi`] when the first lease is taken.
pub struct OnDemand {
    dbi: Arc<Dbi>,
    current: Mutex<Weak<Shared>>,
}

impl OnDemand {
    pub(crate) fn new(dbi: Arc<Dbi>) -> Self {
        Self {
            dbi,
            current: Mutex::new(Weak::new()),
        }
    }

    pub(crate) fn lease(&self, reason: String) -> Result<HandleLease> {
        let mut current = lock(&self.current);
        if let Some(shared) = current.upgrade() {
            trace!("sharing on-demand handle for {}", reason);
            return Ok(HandleLease {
                shared,
                reason,
            });
        }

        debug!("opening on-demand handle for {}", reason);
        let shared = Arc::new(Shared {
            handle: Mutex::new(Some(self.dbi.open()?)),
        });
        *current = Arc::downgrade(&shared);
        Ok(HandleLease {
            shared,
            reason,
        })
    }

    /// Whether a lease currently keeps a handle open.
    pub fn is_open(&self) -> bool {
        lock(&self.current).strong_count() > 0
    }
}

impl HandleSupplier for OnDemand {
    fn with_handle<R>(&self, method: &str, f: impl FnOnce(&Handle) -> Result<R>) -> Result<R> {
        let lease = self.lease(method.to_string())?;
        lease.with(f)
    }
}

impl fmt::Debug for OnDemand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnDemand")
            .field("open", &self.is_open())
            .finish()
    }
}
