//! Exclusive checkout on top of the value cache
//!
//! An [`ExclusiveResource`] wraps a [`TtlCache`] and hands its value to at
//! most one holder at a time. `obtain()` blocks until the previous holder
//! returns the value with `recover()`; while checked out, cache expiry is
//! deferred so the holder never works on a torn-down value.

use std::sync::Arc;

use tokio::sync::OwnedMutexGuard;

use crate::cache::TtlCache;
use crate::error::ResourceError;

/// Single-holder access gate over a cached value
///
/// Cheap to clone; clones share the same gate.
#[derive(Clone)]
pub struct ExclusiveResource<T> {
    cache: TtlCache<T>,
    gate: Arc<tokio::sync::Mutex<()>>,
    holder: Arc<parking_lot::Mutex<Option<Held<T>>>>,
}

struct Held<T> {
    value: Arc<T>,
    _guard: OwnedMutexGuard<()>,
}

impl<T: Send + Sync + 'static> ExclusiveResource<T> {
    /// Gate exclusive access to `cache`'s value
    #[must_use]
    pub fn new(cache: TtlCache<T>) -> Self {
        Self {
            cache,
            gate: Arc::new(tokio::sync::Mutex::new(())),
            holder: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    /// The wrapped cache
    #[must_use]
    pub fn cache(&self) -> &TtlCache<T> {
        &self.cache
    }

    /// Take exclusive hold of the value, waiting for the current holder if
    /// there is one.
    ///
    /// # Errors
    ///
    /// [`ResourceError::Cache`] when the underlying value cannot be
    /// created; the gate is released again in that case.
    pub async fn obtain(&self) -> Result<Arc<T>, ResourceError> {
        let guard = self.gate.clone().lock_owned().await;
        let value = self.cache.checkout().await?;
        *self.holder.lock() = Some(Held {
            value: value.clone(),
            _guard: guard,
        });
        Ok(value)
    }

    /// Return a held value, releasing the gate for the next `obtain()`.
    ///
    /// # Errors
    ///
    /// [`ResourceError::NotCheckedOut`] when nothing is held,
    /// [`ResourceError::ValueMismatch`] when `value` is not the one handed
    /// out (the hold stays intact then).
    pub async fn recover(&self, value: &Arc<T>) -> Result<(), ResourceError> {
        let held = {
            let mut holder = self.holder.lock();
            let held = holder.take().ok_or(ResourceError::NotCheckedOut)?;
            if !Arc::ptr_eq(&held.value, value) {
                *holder = Some(held);
                return Err(ResourceError::ValueMismatch);
            }
            held
        };
        drop(held);
        self.cache.checkin().await;
        Ok(())
    }

    /// Whether `obtain()` would succeed without waiting
    #[must_use]
    pub fn available(&self) -> bool {
        self.gate.try_lock().is_ok()
    }

    /// Whether the value is currently held
    #[must_use]
    pub fn busy(&self) -> bool {
        !self.available()
    }
}

impl<T> std::fmt::Debug for ExclusiveResource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExclusiveResource")
            .field("busy", &self.gate.try_lock().is_err())
            .finish_non_exhaustive()
    }
}
