//! Cookie core types.
//!
//! This module defines the type-erased jar handle used by the store and the
//! serializable [`Cookie`] record.
//!
//! # Values are bytes
//! A cookie value is stored once, as raw bytes ([`CookieValue`]). The HTTP
//! channel reads those bytes back verbatim; the script channel (and observers)
//! see them decoded as UTF-8, with invalid sequences replaced by U+FFFD. Both
//! are views over the same stored bytes.
//!
//! # Identity
//! A record is identified by its [`CookieKey`]: name, domain and path. A
//! host-only record (no `Domain` attribute) is keyed on the host that created
//! it, and never collides with a domain record for the same host.
//!
//! ```rust
//! use gosub_cookies::cookies::{Cookie, CookieValue, Expiry};
//!
//! let c = Cookie {
//!     name: "session".into(),
//!     value: CookieValue::from("abc123"),
//!     domain: None,
//!     host: "example.com".into(),
//!     path: "/".into(),
//!     secure: true,
//!     http_only: false,
//!     expiry: Expiry::Session,
//!     seq: 0,
//! };
//! assert_eq!(c.pair_string(), "session=abc123");
//! ```

use crate::cookies::CookieJar;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock};
use time::OffsetDateTime;

/// Name prefix requiring `secure`, no `Domain` and `path=/`.
pub const HOST_PREFIX: &str = "__Host-";
/// Name prefix requiring `secure`.
pub const SECURE_PREFIX: &str = "__Secure-";

/// A handle to a cookie jar trait.
///
/// This is a reference-counted, read/write-locked pointer to a type-erased
/// [`CookieJar`]. Obtain a **read lock** for queries and a **write lock** for
/// mutations.
pub type CookieJarHandle = Arc<RwLock<dyn CookieJar + Send + Sync>>;

/// Raw cookie value bytes.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CookieValue(Vec<u8>);

impl CookieValue {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Script-visible representation of the value.
    pub fn to_script_string(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

impl fmt::Debug for CookieValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // values may be credentials; only show the length
        write!(f, "CookieValue({} bytes)", self.0.len())
    }
}

impl From<&str> for CookieValue {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for CookieValue {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl From<&[u8]> for CookieValue {
    fn from(b: &[u8]) -> Self {
        Self(b.to_vec())
    }
}

impl From<Vec<u8>> for CookieValue {
    fn from(b: Vec<u8>) -> Self {
        Self(b)
    }
}

/// When a record stops being visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expiry {
    /// Lives until the jar is cleared
    Session,
    /// Expires at the given instant
    At(OffsetDateTime),
}

impl Expiry {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        match self {
            Expiry::Session => false,
            Expiry::At(at) => *at <= now,
        }
    }
}

/// Uniqueness key of a record in the jar.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct CookieKey {
    pub name: String,
    /// Explicit `Domain` attribute, or the creating host for host-only records
    pub domain: String,
    pub host_only: bool,
    pub path: String,
}

/// A cookie as stored in the jar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    /// Cookie name (case-sensitive, may be empty).
    pub name: String,

    /// Raw cookie value.
    pub value: CookieValue,

    /// Domain scoping. `None` means host-only: the record only applies to [`Cookie::host`].
    pub domain: Option<String>,

    /// Host of the origin that wrote the record.
    pub host: String,

    /// Path scoping (always starts with `/`).
    pub path: String,

    /// If `true`, cookie is only written from secure contexts.
    pub secure: bool,

    /// If `true`, cookie is blocked from access by scripts, documents and script-facing observers.
    pub http_only: bool,

    /// Session or absolute expiry.
    pub expiry: Expiry,

    /// Creation order. Assigned by the jar and kept when a record is overwritten.
    #[serde(skip)]
    pub seq: u64,
}

impl Cookie {
    pub fn key(&self) -> CookieKey {
        CookieKey {
            name: self.name.clone(),
            domain: self.domain.clone().unwrap_or_else(|| self.host.clone()),
            host_only: self.domain.is_none(),
            path: self.path.clone(),
        }
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expiry.is_expired(now)
    }

    pub fn has_restricted_prefix(&self) -> bool {
        has_restricted_prefix(&self.name)
    }

    /// Script view of the record.
    pub fn list_item(&self) -> CookieListItem {
        CookieListItem {
            name: self.name.clone(),
            value: self.value.to_script_string(),
        }
    }

    /// `name=value` as seen by scripts, or just `value` for a nameless cookie.
    pub fn pair_string(&self) -> String {
        pair_string(&self.name, &self.value.to_script_string())
    }

    /// `name=value` as raw bytes, or just the value bytes for a nameless cookie.
    pub fn pair_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.name.len() + 1 + self.value.as_bytes().len());
        if !self.name.is_empty() {
            out.extend_from_slice(self.name.as_bytes());
            out.push(b'=');
        }
        out.extend_from_slice(self.value.as_bytes());
        out
    }
}

/// Script-visible `{name, value}` pair, as returned by `get`/`get_all` and
/// carried by observer batches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CookieListItem {
    pub name: String,
    pub value: String,
}

impl CookieListItem {
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    pub fn pair_string(&self) -> String {
        pair_string(&self.name, &self.value)
    }
}

pub fn has_restricted_prefix(name: &str) -> bool {
    name.starts_with(HOST_PREFIX) || name.starts_with(SECURE_PREFIX)
}

fn pair_string(name: &str, value: &str) -> String {
    if name.is_empty() {
        value.to_string()
    } else {
        format!("{}={}", name, value)
    }
}

/// Joins pairs into the `name1=value1; name2=value2` form.
///
/// Returns `None` (the "no cookies" sentinel) for an empty list. A jar holding a single
/// nameless, valueless cookie yields `Some("")`.
pub fn cookie_string(items: &[CookieListItem]) -> Option<String> {
    if items.is_empty() {
        return None;
    }
    Some(
        items
            .iter()
            .map(|i| i.pair_string())
            .collect::<Vec<_>>()
            .join("; "),
    )
}
