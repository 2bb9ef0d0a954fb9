//! Observer registrations and their per-observer change detection state.
//!
//! Each registration moves through `Idle -> Pending -> Idle`: a jar mutation
//! marks it pending, and the next flush either finds its filtered view
//! unchanged (back to idle, nothing delivered) or produces a batch. The
//! registration's `last_reported` view is swapped to the new view right before
//! the batch is handed out, so the next diff always starts from what was
//! actually delivered.

use crate::cookies::{resolve_scope, visible_to, Channel, Cookie, CookieListItem, MatchType, NamePredicate, RequestScope};
use crate::errors::CookieError;
use crate::observer::change::{apply_changes, diff_views, ChangeBatch};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

/// A unique identifier for an observer registration, represented as a UUID.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObserverId(Uuid);

impl ObserverId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ObserverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What an observer wants to hear about.
///
/// `name: None` matches every name. `url: None` uses the observer's default URL: the
/// directory of the environment URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Interest {
    pub name: Option<String>,
    pub match_type: MatchType,
    pub url: Option<String>,
}

impl Interest {
    /// Every script-visible record at the default URL.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn starts_with(prefix: &str) -> Self {
        Self {
            name: Some(prefix.to_string()),
            match_type: MatchType::StartsWith,
            url: None,
        }
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = Some(url.to_string());
        self
    }
}

/// An interest with its URL resolved to a request scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedInterest {
    name: Option<NamePredicate>,
    scope: RequestScope,
}

impl ResolvedInterest {
    fn matches(&self, cookie: &Cookie, now: OffsetDateTime) -> bool {
        visible_to(cookie, Channel::Script, &self.scope, now)
            && self.name.as_ref().map_or(true, |p| p.matches(&cookie.name))
    }
}

/// Resolves interest URLs against the environment.
#[derive(Debug, Clone)]
pub(crate) struct InterestScope {
    pub base: Url,
    pub default_url: String,
}

impl InterestScope {
    /// `None` stands for the default interest.
    pub fn resolve(&self, interests: Option<Vec<Interest>>) -> Result<Vec<ResolvedInterest>, CookieError> {
        interests
            .unwrap_or_else(|| vec![Interest::all()])
            .into_iter()
            .map(|interest| {
                let url = interest.url.as_deref().unwrap_or(&self.default_url);
                Ok(ResolvedInterest {
                    name: interest.name.map(|name| NamePredicate {
                        name,
                        match_type: interest.match_type,
                    }),
                    scope: resolve_scope(&self.base, Some(url))?,
                })
            })
            .collect()
    }
}

/// Callback invoked with every batch delivered to an observer.
///
/// An `Err` is treated as a failed delivery: it is logged and recorded in the store's
/// error list.
pub type ObserverCallback = Box<dyn FnMut(&ChangeBatch) -> Result<(), CookieError> + Send>;

/// The callback of a registration, together with its disconnect token.
pub(crate) struct CallbackSlot {
    callback: Mutex<ObserverCallback>,
    cancel: CancellationToken,
    /// Thread currently running the callback
    running_on: Mutex<Option<ThreadId>>,
}

impl CallbackSlot {
    pub fn new(callback: ObserverCallback) -> Self {
        Self {
            callback: Mutex::new(callback),
            cancel: CancellationToken::new(),
            running_on: Mutex::new(None),
        }
    }

    pub fn disconnect(&self) {
        self.cancel.cancel();
    }

    /// Blocks until an invocation running on another thread has returned. No invocation
    /// starts after [`CallbackSlot::disconnect`], so once this returns the callback is done
    /// for good.
    ///
    /// A callback disconnecting its own observer does not wait for itself.
    pub fn wait_idle(&self) {
        let current = thread::current().id();
        let running_here = match self.running_on.lock() {
            Ok(running) => *running == Some(current),
            Err(_) => false,
        };
        if !running_here {
            // a poisoned lock means the callback already panicked out
            drop(self.callback.lock());
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Invokes the callback unless the registration was disconnected in the meantime.
    pub fn invoke(&self, batch: &ChangeBatch) -> Result<bool, CookieError> {
        if self.is_disconnected() {
            return Ok(false);
        }
        let mut callback = self.callback.lock()?;
        if self.is_disconnected() {
            return Ok(false);
        }

        *self.running_on.lock()? = Some(thread::current().id());
        let result = (*callback)(batch);
        if let Ok(mut running) = self.running_on.lock() {
            *running = None;
        }
        result.map(|_| true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Idle,
    Pending,
}

pub(crate) struct Registration {
    id: ObserverId,
    interests: Vec<ResolvedInterest>,
    last_reported: Vec<CookieListItem>,
    state: DeliveryState,
    /// The initial snapshot has not been delivered yet
    initial: bool,
    slot: Arc<CallbackSlot>,
}

impl Registration {
    /// Records matching any of the interests, in jar order, each once.
    fn view(&self, cookies: &[Cookie], now: OffsetDateTime) -> Vec<CookieListItem> {
        cookies
            .iter()
            .filter(|c| self.interests.iter().any(|i| i.matches(c, now)))
            .map(|c| c.list_item())
            .collect()
    }
}

/// A batch ready to hand to a callback.
pub(crate) struct Delivery {
    pub slot: Arc<CallbackSlot>,
    pub batch: ChangeBatch,
}

#[derive(Default)]
pub(crate) struct ObserverRegistry {
    registrations: Vec<Registration>,
}

impl ObserverRegistry {
    pub fn register(&mut self, interests: Vec<ResolvedInterest>, slot: Arc<CallbackSlot>) -> ObserverId {
        let id = ObserverId::new();
        self.registrations.push(Registration {
            id,
            interests,
            last_reported: Vec::new(),
            state: DeliveryState::Pending,
            initial: true,
            slot,
        });
        id
    }

    /// Merges more interests into a registration. Returns false if it no longer exists.
    pub fn add_interests(&mut self, id: ObserverId, interests: Vec<ResolvedInterest>) -> bool {
        match self.registrations.iter_mut().find(|r| r.id == id) {
            Some(reg) => {
                for interest in interests {
                    if !reg.interests.contains(&interest) {
                        reg.interests.push(interest);
                    }
                }
                reg.state = DeliveryState::Pending;
                true
            }
            None => false,
        }
    }

    /// Removes a registration and cancels anything scheduled for it. Returns its slot so the
    /// caller can wait for an in-flight delivery outside the registry lock.
    pub fn unregister(&mut self, id: ObserverId) -> Option<Arc<CallbackSlot>> {
        let idx = self.registrations.iter().position(|r| r.id == id)?;
        let reg = self.registrations.remove(idx);
        reg.slot.disconnect();
        Some(reg.slot)
    }

    pub fn mark_pending(&mut self) {
        for reg in &mut self.registrations {
            reg.state = DeliveryState::Pending;
        }
    }

    pub fn has_pending(&self) -> bool {
        self.registrations.iter().any(|r| r.state == DeliveryState::Pending)
    }

    pub fn state(&self, id: ObserverId) -> Option<DeliveryState> {
        self.registrations.iter().find(|r| r.id == id).map(|r| r.state)
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Runs change detection for every pending registration.
    ///
    /// Returns the batches to deliver, plus consistency errors for registrations whose diff
    /// did not replay onto their new view. Those registrations keep their last reported view.
    pub fn collect(&mut self, cookies: &[Cookie], now: OffsetDateTime) -> (Vec<Delivery>, Vec<CookieError>) {
        let mut deliveries = Vec::new();
        let mut errors = Vec::new();

        for reg in self.registrations.iter_mut().filter(|r| r.state == DeliveryState::Pending) {
            reg.state = DeliveryState::Idle;

            let view = reg.view(cookies, now);
            let changes = diff_views(&reg.last_reported, &view);
            if changes.is_empty() && !reg.initial {
                continue;
            }

            match apply_changes(&reg.last_reported, &changes) {
                Ok(replayed) if replayed == view => {}
                Ok(_) => {
                    errors.push(CookieError::Consistency(format!(
                        "changes computed for observer {} do not replay onto its view",
                        reg.id
                    )));
                    continue;
                }
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            }

            reg.last_reported = view.clone();
            reg.initial = false;
            deliveries.push(Delivery {
                slot: reg.slot.clone(),
                batch: ChangeBatch {
                    observer: reg.id,
                    changes,
                    all: view,
                },
            });
        }

        (deliveries, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookies::{CookieValue, Expiry};

    fn scope() -> InterestScope {
        InterestScope {
            base: Url::parse("https://example.com/cookie-store/test.html").unwrap(),
            default_url: "/cookie-store/".to_string(),
        }
    }

    fn cookie(name: &str, value: &str, path: &str) -> Cookie {
        Cookie {
            name: name.into(),
            value: CookieValue::from(value),
            domain: None,
            host: "example.com".into(),
            path: path.into(),
            secure: true,
            http_only: false,
            expiry: Expiry::Session,
            seq: 0,
        }
    }

    fn noop() -> Arc<CallbackSlot> {
        Arc::new(CallbackSlot::new(Box::new(|_: &ChangeBatch| -> Result<(), CookieError> { Ok(()) })))
    }

    #[test]
    fn first_collect_delivers_initial_snapshot_even_when_empty() {
        let mut reg = ObserverRegistry::default();
        let id = reg.register(scope().resolve(None).unwrap(), noop());

        let (deliveries, errors) = reg.collect(&[], OffsetDateTime::now_utc());
        assert!(errors.is_empty());
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].batch.observer, id);
        assert!(deliveries[0].batch.changes.is_empty());
        assert_eq!(reg.state(id), Some(DeliveryState::Idle));

        // nothing changed since
        reg.mark_pending();
        let (deliveries, _) = reg.collect(&[], OffsetDateTime::now_utc());
        assert!(deliveries.is_empty());
    }

    #[test]
    fn filtered_view_only_includes_interests() {
        let mut reg = ObserverRegistry::default();
        let interests = scope()
            .resolve(Some(vec![Interest::starts_with("__Host-COOKIEN"), Interest::named("OLD")]))
            .unwrap();
        reg.register(interests, noop());

        let jar = vec![
            cookie("TEST", "1", "/"),
            cookie("__Host-COOKIENAME", "2", "/"),
            cookie("OLD", "3", "/"),
        ];
        let (deliveries, _) = reg.collect(&jar, OffsetDateTime::now_utc());
        let all: Vec<_> = deliveries[0].batch.all.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(all, vec!["__Host-COOKIENAME", "OLD"]);
    }

    #[test]
    fn interest_url_limits_paths() {
        let mut reg = ObserverRegistry::default();
        let interests = scope()
            .resolve(Some(vec![Interest::all().with_url("/other/")]))
            .unwrap();
        reg.register(interests, noop());

        let jar = vec![cookie("A", "1", "/cookie-store/"), cookie("B", "2", "/")];
        let (deliveries, _) = reg.collect(&jar, OffsetDateTime::now_utc());
        assert_eq!(deliveries[0].batch.all, vec![CookieListItem::new("B", "2")]);
    }

    #[test]
    fn merged_interests_list_each_record_once() {
        let mut reg = ObserverRegistry::default();
        let id = reg.register(scope().resolve(Some(vec![Interest::named("A")])).unwrap(), noop());
        assert!(reg.add_interests(id, scope().resolve(None).unwrap()));

        let jar = vec![cookie("A", "1", "/"), cookie("B", "2", "/")];
        let (deliveries, _) = reg.collect(&jar, OffsetDateTime::now_utc());
        assert_eq!(deliveries[0].batch.all.len(), 2);
    }

    #[test]
    fn unregister_disconnects_slot() {
        let mut reg = ObserverRegistry::default();
        let slot = noop();
        let id = reg.register(scope().resolve(None).unwrap(), slot.clone());

        assert!(reg.unregister(id).is_some());
        assert!(slot.is_disconnected());
        assert!(reg.unregister(id).is_none());
        assert!(!reg.add_interests(id, Vec::new()));
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn disconnected_slot_is_not_invoked() {
        let slot = CallbackSlot::new(Box::new(|_: &ChangeBatch| -> Result<(), CookieError> {
            panic!("must not run")
        }));
        slot.disconnect();
        let batch = ChangeBatch {
            observer: ObserverId::new(),
            changes: Vec::new(),
            all: Vec::new(),
        };
        assert!(!slot.invoke(&batch).unwrap());
    }

    #[test]
    fn cross_origin_interest_is_rejected() {
        let err = scope()
            .resolve(Some(vec![Interest::all().with_url("https://elsewhere.test/")]))
            .unwrap_err();
        assert!(err.is_scope());
    }
}
