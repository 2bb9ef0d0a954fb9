use crate::cookies::CookieJarHandle;
use crate::errors::CookieError;
use crate::observer::change::ChangeBatch;
use crate::observer::registry::{CallbackSlot, Delivery, InterestScope, ObserverRegistry, ResolvedInterest};
use crate::observer::{DeliveryState, Interest, ObserverId};
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;

/// Delivers change batches to observers.
///
/// Mutations only mark registrations pending and schedule a flush on the current tokio
/// runtime. The flush runs after the mutating call has returned, so callbacks never run
/// inside a store operation. Flushes are serialized: batches for one observer are
/// delivered in the order they were produced.
pub(crate) struct Dispatcher {
    jar: CookieJarHandle,
    registry: Mutex<ObserverRegistry>,
    delivery: tokio::sync::Mutex<()>,
    scheduled: AtomicBool,
    errors: Mutex<Vec<CookieError>>,
}

impl Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(jar: CookieJarHandle) -> Arc<Self> {
        Arc::new(Self {
            jar,
            registry: Mutex::new(ObserverRegistry::default()),
            delivery: tokio::sync::Mutex::new(()),
            scheduled: AtomicBool::new(false),
            errors: Mutex::new(Vec::new()),
        })
    }

    pub fn register<F>(
        self: &Arc<Self>,
        interests: Vec<ResolvedInterest>,
        callback: F,
    ) -> Result<ObserverId, CookieError>
    where
        F: FnMut(&ChangeBatch) -> Result<(), CookieError> + Send + 'static,
    {
        let slot = Arc::new(CallbackSlot::new(Box::new(callback)));
        let id = self.registry.lock()?.register(interests, slot);
        log::debug!("observer {} registered", id);
        self.schedule();
        Ok(id)
    }

    pub fn add_interests(
        self: &Arc<Self>,
        id: ObserverId,
        interests: Vec<ResolvedInterest>,
    ) -> Result<(), CookieError> {
        if !self.registry.lock()?.add_interests(id, interests) {
            return Err(CookieError::Scope(format!("observer {} is disconnected", id)));
        }
        self.schedule();
        Ok(())
    }

    /// Removes the registration. Returns once no callback of it is running.
    pub fn unregister(&self, id: ObserverId) -> Result<bool, CookieError> {
        let slot = self.registry.lock()?.unregister(id);
        match slot {
            Some(slot) => {
                slot.wait_idle();
                log::debug!("observer {} disconnected", id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Called after every jar mutation.
    pub fn notify(self: &Arc<Self>) -> Result<(), CookieError> {
        self.registry.lock()?.mark_pending();
        self.schedule();
        Ok(())
    }

    pub fn state(&self, id: ObserverId) -> Result<Option<DeliveryState>, CookieError> {
        Ok(self.registry.lock()?.state(id))
    }

    pub fn observer_count(&self) -> Result<usize, CookieError> {
        Ok(self.registry.lock()?.len())
    }

    fn schedule(self: &Arc<Self>) {
        if self.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let dispatcher = self.clone();
                handle.spawn(async move {
                    tokio::task::yield_now().await;
                    dispatcher.flush().await;
                });
            }
            Err(_) => {
                // Deliveries wait for the next explicit flush.
                self.scheduled.store(false, Ordering::Release);
                log::trace!("no tokio runtime, observer deliveries deferred");
            }
        }
    }

    /// Runs change detection and invokes the callbacks of every pending observer.
    pub async fn flush(&self) {
        let _guard = self.delivery.lock().await;
        self.scheduled.store(false, Ordering::Release);

        let deliveries = match self.collect() {
            Ok((deliveries, errors)) => {
                for e in errors {
                    log::error!("change detection failed: {}", e);
                    self.record_error(e);
                }
                deliveries
            }
            Err(e) => {
                log::error!("cannot run change detection: {}", e);
                self.record_error(e);
                return;
            }
        };

        for delivery in deliveries {
            log::trace!(
                "delivering {} change(s) to observer {}",
                delivery.batch.changes.len(),
                delivery.batch.observer
            );
            match delivery.slot.invoke(&delivery.batch) {
                Ok(true) => {}
                Ok(false) => log::trace!("observer {} disconnected before delivery", delivery.batch.observer),
                Err(e) => {
                    log::error!("observer {} failed to handle batch: {}", delivery.batch.observer, e);
                    self.record_error(e);
                }
            }
        }
    }

    fn collect(&self) -> Result<(Vec<Delivery>, Vec<CookieError>), CookieError> {
        let mut registry = self.registry.lock()?;
        if !registry.has_pending() {
            return Ok((Vec::new(), Vec::new()));
        }
        let jar = self.jar.read()?;
        Ok(registry.collect(jar.cookies(), OffsetDateTime::now_utc()))
    }

    pub fn record_error(&self, error: CookieError) {
        match self.errors.lock() {
            Ok(mut errors) => errors.push(error),
            Err(poisoned) => poisoned.into_inner().push(error),
        }
    }

    pub fn take_errors(&self) -> Vec<CookieError> {
        match self.errors.lock() {
            Ok(mut errors) => std::mem::take(&mut *errors),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

/// Handle to an observer registration.
///
/// Dropping the handle keeps the observer registered; call [`CookieObserver::disconnect`]
/// to stop deliveries.
#[derive(Clone)]
pub struct CookieObserver {
    id: ObserverId,
    dispatcher: Arc<Dispatcher>,
    scope: InterestScope,
}

impl Debug for CookieObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieObserver").field("id", &self.id).finish_non_exhaustive()
    }
}

impl CookieObserver {
    pub(crate) fn new(id: ObserverId, dispatcher: Arc<Dispatcher>, scope: InterestScope) -> Self {
        Self { id, dispatcher, scope }
    }

    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Adds interests to the registration. `None` adds the default interest.
    pub fn observe(&self, interests: Option<Vec<Interest>>) -> Result<(), CookieError> {
        let resolved = self.scope.resolve(interests)?;
        self.dispatcher.add_interests(self.id, resolved)
    }

    /// Where the registration is in its delivery cycle, or `None` once disconnected.
    pub fn state(&self) -> Result<Option<DeliveryState>, CookieError> {
        self.dispatcher.state(self.id)
    }

    /// Stops deliveries. Batches already scheduled are dropped, and a delivery already running
    /// on another thread is waited for. Returns false if the observer was already disconnected.
    pub fn disconnect(&self) -> Result<bool, CookieError> {
        self.dispatcher.unregister(self.id)
    }
}
