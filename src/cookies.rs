//! Cookies: records, the canonicalizer, the [`CookieJar`] and the matcher.

mod canonicalizer;
mod cookie_jar;
#[allow(clippy::module_inception)]
mod cookies;
mod matcher;

pub use cookies::cookie_string;
pub use cookies::has_restricted_prefix;
pub use cookies::Cookie;
pub use cookies::CookieJarHandle;
pub use cookies::CookieKey;
pub use cookies::CookieListItem;
pub use cookies::CookieValue;
pub use cookies::Expiry;
pub use cookies::{HOST_PREFIX, SECURE_PREFIX};

pub use canonicalizer::canonicalize;
pub use canonicalizer::canonicalize_delete;
pub use canonicalizer::parse_http_date;
pub use canonicalizer::parse_set_cookie;
pub use canonicalizer::{CookieOptions, Expires, ParsedSetCookie, WriteContext};

pub use cookie_jar::CookieJar;
pub use cookie_jar::DefaultCookieJar;
pub use cookie_jar::JarChange;

pub use matcher::{domain_matches, path_matches, resolve_scope, select, visible_to};
pub use matcher::{Channel, CookieQuery, MatchType, NamePredicate, RequestScope};
