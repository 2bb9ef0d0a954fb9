//! Cookie jar abstraction and the in-memory implementation.
//!
//! A **cookie jar** holds canonical records in jar order: most specific
//! (longest) path first, then oldest creation. That order is what `get_all`
//! returns and what the serialized string form lists.
//!
//! The jar applies already-canonicalized records (see
//! [`canonicalize`](crate::cookies::canonicalize)); it resolves conflicts on
//! the record key and answers channel-scoped queries through the matcher.
//!
//! ## Notes
//! - A record arriving already expired is a delete of its key: it never
//!   enters the jar.
//! - Overwriting a record keeps its position (and creation order).
//! - Expired records are invisible to every query and are purged on the
//!   next mutation.
//! - This module is **not** internally synchronized. Use it via a
//!   `CookieJarHandle = Arc<RwLock<dyn CookieJar + Send + Sync>>`.

use crate::cookies::matcher::{select, Channel, NamePredicate, RequestScope};
use crate::cookies::Cookie;
use crate::errors::CookieError;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Effect of a single write on the jar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JarChange {
    /// Nothing changed (e.g. an expired write for an absent key)
    Unchanged,
    /// A new record was added
    Inserted,
    /// An existing record was overwritten in place
    Replaced,
    /// An existing record was removed
    Removed,
}

impl JarChange {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, JarChange::Unchanged)
    }
}

/// A cookie jar keeps the records of the whole store.
pub trait CookieJar: Send + Sync {
    /// All records (including not yet purged expired ones) in jar order.
    fn cookies(&self) -> &[Cookie];

    /// Applies a canonical record written through `channel`.
    ///
    /// Replaces a record with the same key in place, inserts new records at their ordering
    /// position, and treats an already-expired record as a delete of its key. Only the HTTP
    /// channel may replace or delete an HttpOnly record.
    fn set(&mut self, cookie: Cookie, channel: Channel, now: OffsetDateTime) -> Result<JarChange, CookieError>;

    /// Removes all records. Returns the number of visible records removed.
    fn clear(&mut self, now: OffsetDateTime) -> usize;

    /// Drops records whose expiry has passed.
    fn remove_expired(&mut self, now: OffsetDateTime) -> usize;

    /// Returns the first record visible to `channel` at `scope` matching `name`.
    fn get(
        &self,
        channel: Channel,
        scope: &RequestScope,
        name: Option<&NamePredicate>,
        now: OffsetDateTime,
    ) -> Option<Cookie> {
        select(self.cookies(), channel, scope, name, now)
            .into_iter()
            .next()
            .cloned()
    }

    /// Returns every record visible to `channel` at `scope` matching `name`, in jar order.
    fn get_all(
        &self,
        channel: Channel,
        scope: &RequestScope,
        name: Option<&NamePredicate>,
        now: OffsetDateTime,
    ) -> Vec<Cookie> {
        select(self.cookies(), channel, scope, name, now)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Serializes the records visible to `channel` at `scope` as `name1=value1; name2=value2`
    /// bytes, or `None` when no record is visible.
    fn serialize_visible(&self, channel: Channel, scope: &RequestScope, now: OffsetDateTime) -> Option<Vec<u8>> {
        let visible = select(self.cookies(), channel, scope, None, now);
        if visible.is_empty() {
            return None;
        }

        let mut out = Vec::new();
        for (i, cookie) in visible.iter().enumerate() {
            if i > 0 {
                out.extend_from_slice(b"; ");
            }
            out.extend_from_slice(&cookie.pair_bytes());
        }
        Some(out)
    }
}

/// Default cookie jar, in memory only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultCookieJar {
    /// Records in jar order
    entries: Vec<Cookie>,
    /// Next creation sequence number
    #[serde(skip)]
    next_seq: u64,
}

impl DefaultCookieJar {
    /// Creates an empty in-memory cookie jar.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index at which a new record with `path` is inserted: after every record with an equal
    /// or longer path, since those are all older.
    fn insert_position(&self, path: &str) -> usize {
        self.entries
            .iter()
            .position(|c| c.path.len() < path.len())
            .unwrap_or(self.entries.len())
    }
}

impl CookieJar for DefaultCookieJar {
    fn cookies(&self) -> &[Cookie] {
        &self.entries
    }

    fn set(&mut self, mut cookie: Cookie, channel: Channel, now: OffsetDateTime) -> Result<JarChange, CookieError> {
        let key = cookie.key();
        let existing = self.entries.iter().position(|c| c.key() == key);

        if let Some(idx) = existing {
            let current = &self.entries[idx];
            if current.http_only && !channel.sees_http_only() && !current.is_expired(now) {
                return Err(CookieError::Scope(format!(
                    "cookie {:?} is HttpOnly and cannot be changed through {:?}",
                    cookie.name, channel
                )));
            }
        }

        self.remove_expired(now);
        let existing = self.entries.iter().position(|c| c.key() == key);

        if cookie.is_expired(now) {
            return Ok(match existing {
                Some(idx) => {
                    self.entries.remove(idx);
                    JarChange::Removed
                }
                None => JarChange::Unchanged,
            });
        }

        match existing {
            Some(idx) => {
                cookie.seq = self.entries[idx].seq;
                if self.entries[idx] == cookie {
                    return Ok(JarChange::Unchanged);
                }
                self.entries[idx] = cookie;
                Ok(JarChange::Replaced)
            }
            None => {
                cookie.seq = self.next_seq;
                self.next_seq += 1;
                let pos = self.insert_position(&cookie.path);
                self.entries.insert(pos, cookie);
                Ok(JarChange::Inserted)
            }
        }
    }

    fn clear(&mut self, now: OffsetDateTime) -> usize {
        let removed = self.entries.iter().filter(|c| !c.is_expired(now)).count();
        self.entries.clear();
        removed
    }

    fn remove_expired(&mut self, now: OffsetDateTime) -> usize {
        let before = self.entries.len();
        self.entries.retain(|c| !c.is_expired(now));
        before - self.entries.len()
    }
}

impl From<DefaultCookieJar> for crate::cookies::CookieJarHandle {
    fn from(jar: DefaultCookieJar) -> Self {
        std::sync::Arc::new(std::sync::RwLock::new(jar))
    }
}
