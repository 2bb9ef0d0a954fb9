//! Cookie observers: change detection, registrations and delivery.

mod change;
mod dispatcher;
mod registry;
mod replay;

pub use change::{apply_changes, diff_views, ChangeBatch, ChangeType, CookieChange};
pub use dispatcher::CookieObserver;
pub use registry::{DeliveryState, Interest, ObserverCallback, ObserverId};
pub use replay::{ObservationEntry, ObservedStore};

pub(crate) use dispatcher::Dispatcher;
pub(crate) use registry::InterestScope;
