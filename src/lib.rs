pub mod config;
pub mod cookies;
pub mod errors;
pub mod observer;
pub mod store;

pub use config::CookieStoreConfig;
pub use cookies::{CookieListItem, CookieOptions, CookieQuery, Expires, MatchType};
pub use errors::{CookieError, ErrorClass};
pub use observer::{ChangeBatch, ChangeType, CookieChange, CookieObserver, Interest, ObservedStore};
pub use store::CookieStore;
