//! Self-expiring lazy value cache
//!
//! A [`TtlCache`] holds at most one value of an expensive-to-create,
//! worth-releasing resource (a hardware handle, a rendering context). The
//! value is created on first access by an async factory and torn down again
//! after a time-to-live, so idle hardware is not held open.
//!
//! # Design
//!
//! - Creation is serialized: concurrent `get()` callers wait on the slot
//!   and share the single value the first caller produced.
//! - The expiry timer is armed when the value is created, never on access.
//!   An access does not extend the lifetime.
//! - Teardown failures are logged and swallowed; the slot is emptied either
//!   way so the next `get()` starts fresh.
//! - While a value is checked out exclusively (see
//!   [`crate::resource::ExclusiveResource`]) expiry is deferred until it
//!   comes back.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::CacheError;

type Factory<T> = Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;
type Destroy<T> = Box<dyn Fn(Arc<T>) -> anyhow::Result<()> + Send + Sync>;
type EvictHook<T> = Box<dyn Fn(&T) + Send + Sync>;

struct Slot<T> {
    value: Option<Arc<T>>,
    /// Bumped whenever the armed expiry becomes stale.
    epoch: u64,
    timer: Option<JoinHandle<()>>,
    /// Exclusive checkouts currently outstanding.
    pins: u32,
    /// An expiry fired while pinned; evict on the final checkin.
    evict_pending: bool,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            value: None,
            epoch: 0,
            timer: None,
            pins: 0,
            evict_pending: false,
        }
    }
}

struct CacheShared<T> {
    name: String,
    factory: Factory<T>,
    destroy: parking_lot::Mutex<Option<Destroy<T>>>,
    before_evict: parking_lot::Mutex<Vec<EvictHook<T>>>,
    ttl: parking_lot::Mutex<Option<Duration>>,
    slot: tokio::sync::Mutex<Slot<T>>,
}

/// Lazily created, self-expiring single-value cache
///
/// Cheap to clone; clones share the same slot.
pub struct TtlCache<T> {
    shared: Arc<CacheShared<T>>,
}

impl<T> Clone for TtlCache<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> TtlCache<T> {
    /// Create a cache producing values with `factory` on demand
    pub fn new<F, Fut>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            shared: Arc::new(CacheShared {
                name: name.into(),
                factory: Box::new(move || factory().boxed()),
                destroy: parking_lot::Mutex::new(None),
                before_evict: parking_lot::Mutex::new(Vec::new()),
                ttl: parking_lot::Mutex::new(None),
                slot: tokio::sync::Mutex::new(Slot::default()),
            }),
        }
    }

    /// Expire values this long after creation (builder-style)
    #[must_use]
    pub fn with_ttl(self, ttl: Duration) -> Self {
        *self.shared.ttl.lock() = Some(ttl);
        self
    }

    /// Tear values down with `destroy` on eviction (builder-style)
    ///
    /// A destroy error is logged, never propagated.
    #[must_use]
    pub fn with_destroy<F>(self, destroy: F) -> Self
    where
        F: Fn(Arc<T>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        *self.shared.destroy.lock() = Some(Box::new(destroy));
        self
    }

    /// Run `hook` right before a value is evicted, while new accessors are
    /// still blocked out
    pub fn on_before_evict<F>(&self, hook: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.shared.before_evict.lock().push(Box::new(hook));
    }

    /// The cache's name, used in logs
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Get the cached value, creating it if the slot is empty.
    ///
    /// # Errors
    ///
    /// [`CacheError::CreationFailed`] when the factory fails; the slot
    /// stays empty and the next call retries.
    pub async fn get(&self) -> Result<Arc<T>, CacheError> {
        let mut slot = self.shared.slot.lock().await;
        self.obtain_locked(&mut slot).await
    }

    async fn obtain_locked(&self, slot: &mut Slot<T>) -> Result<Arc<T>, CacheError> {
        if let Some(value) = &slot.value {
            return Ok(value.clone());
        }

        debug!(cache = %self.shared.name, "creating value");
        let value = (self.shared.factory)()
            .await
            .map(Arc::new)
            .map_err(|e| CacheError::CreationFailed {
                name: self.shared.name.clone(),
                source: e,
            })?;

        slot.value = Some(value.clone());
        slot.evict_pending = false;
        self.arm_expiry(slot);
        Ok(value)
    }

    /// The cached value, without creating one.
    ///
    /// Returns `None` for an empty slot and also while a creation is in
    /// flight.
    #[must_use]
    pub fn peek(&self) -> Option<Arc<T>> {
        self.shared
            .slot
            .try_lock()
            .ok()
            .and_then(|slot| slot.value.clone())
    }

    /// Evict the cached value right now, if any
    pub async fn invalidate(&self) {
        let mut slot = self.shared.slot.lock().await;
        self.cancel_expiry(&mut slot);
        self.evict_locked(&mut slot);
    }

    /// Change the time-to-live; an armed expiry is re-armed immediately
    /// against the new value
    pub async fn set_ttl(&self, ttl: Option<Duration>) {
        *self.shared.ttl.lock() = ttl;
        let mut slot = self.shared.slot.lock().await;
        if slot.value.is_some() {
            self.cancel_expiry(&mut slot);
            self.arm_expiry(&mut slot);
        }
    }

    /// Get the value and pin it against expiry until [`Self::checkin`]
    pub(crate) async fn checkout(&self) -> Result<Arc<T>, CacheError> {
        let mut slot = self.shared.slot.lock().await;
        let value = self.obtain_locked(&mut slot).await?;
        slot.pins += 1;
        Ok(value)
    }

    /// Release a pin taken by [`Self::checkout`]; runs a deferred eviction
    /// when the last pin goes away
    pub(crate) async fn checkin(&self) {
        let mut slot = self.shared.slot.lock().await;
        slot.pins = slot.pins.saturating_sub(1);
        if slot.pins == 0 && slot.evict_pending {
            slot.evict_pending = false;
            self.evict_locked(&mut slot);
        }
    }

    fn cancel_expiry(&self, slot: &mut Slot<T>) {
        slot.epoch += 1;
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }
    }

    fn arm_expiry(&self, slot: &mut Slot<T>) {
        let Some(ttl) = *self.shared.ttl.lock() else {
            return;
        };
        slot.epoch += 1;
        let epoch = slot.epoch;
        let weak = Arc::downgrade(&self.shared);
        slot.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let Some(shared) = weak.upgrade() else { return };
            let cache = TtlCache { shared };
            let mut slot = cache.shared.slot.lock().await;
            // A cancel that raced the wakeup bumped the epoch already.
            if slot.epoch != epoch {
                return;
            }
            if slot.pins > 0 {
                debug!(cache = %cache.shared.name, "value expired while checked out, deferring");
                slot.evict_pending = true;
                return;
            }
            debug!(cache = %cache.shared.name, "value expired");
            cache.evict_locked(&mut slot);
        }));
    }

    /// Eviction proper. The slot lock is held the whole time, so accessors
    /// never observe the value mid-teardown.
    fn evict_locked(&self, slot: &mut Slot<T>) {
        let Some(value) = slot.value.take() else {
            return;
        };
        for hook in self.shared.before_evict.lock().iter() {
            hook(&value);
        }
        if let Some(destroy) = self.shared.destroy.lock().as_ref() {
            if let Err(e) = destroy(value) {
                warn!(cache = %self.shared.name, err = %e, "destroy failed, dropping value anyway");
            }
        }
    }
}

impl<T> std::fmt::Debug for TtlCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("name", &self.shared.name)
            .finish_non_exhaustive()
    }
}
