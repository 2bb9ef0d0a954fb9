//! Selecting the records a channel can see.
//!
//! Matching runs in three steps, always preserving jar order:
//! 1. channel visibility (HttpOnly records are hidden from script and markup,
//!    restricted-prefix records are hidden from non-secure scopes),
//! 2. path and domain applicability to the request scope,
//! 3. the name predicate (`equals` or `startsWith`).

use crate::cookies::Cookie;
use crate::errors::CookieError;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;

/// Access channel of a read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Script API (`get`/`getAll`/`set`/`delete`), also used for document-cookie strings
    Script,
    /// `Set-Cookie` / `Cookie` headers
    Http,
    /// Markup-embedded `set-cookie` directive
    Markup,
}

impl Channel {
    /// Can this channel see HttpOnly records?
    pub fn sees_http_only(&self) -> bool {
        matches!(self, Channel::Http)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchType {
    #[default]
    Equals,
    StartsWith,
}

/// Name filter of a query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamePredicate {
    pub name: String,
    pub match_type: MatchType,
}

impl NamePredicate {
    pub fn matches(&self, name: &str) -> bool {
        match self.match_type {
            MatchType::Equals => name == self.name,
            MatchType::StartsWith => name.starts_with(&self.name),
        }
    }
}

/// A read query: optional name predicate, optional URL.
///
/// The URL defaults to the store's environment URL and is resolved against it, so
/// relative paths like `"/cookie-store/"` are accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieQuery {
    pub name: Option<NamePredicate>,
    pub url: Option<String>,
}

impl CookieQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: Some(NamePredicate {
                name: name.to_string(),
                match_type: MatchType::Equals,
            }),
            url: None,
        }
    }

    pub fn starts_with(prefix: &str) -> Self {
        Self {
            name: Some(NamePredicate {
                name: prefix.to_string(),
                match_type: MatchType::StartsWith,
            }),
            url: None,
        }
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = Some(url.to_string());
        self
    }
}

impl From<&str> for CookieQuery {
    fn from(name: &str) -> Self {
        CookieQuery::named(name)
    }
}

/// Host, path and protocol a read or write is evaluated against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestScope {
    pub host: String,
    pub path: String,
    pub secure: bool,
}

impl RequestScope {
    pub fn from_url(url: &Url) -> Result<Self, CookieError> {
        let host = url
            .host_str()
            .ok_or_else(|| CookieError::Scope(format!("URL {} has no host", url)))?;

        Ok(Self {
            host: host.to_ascii_lowercase(),
            path: url.path().to_string(),
            secure: matches!(url.scheme(), "https" | "wss"),
        })
    }

    /// RFC 6265 default-path: the directory of the request path, without the trailing slash.
    pub fn default_path(&self) -> String {
        if !self.path.starts_with('/') {
            return "/".to_string();
        }
        match self.path.rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(idx) => self.path[..idx].to_string(),
        }
    }
}

/// Resolves a query/interest URL against the environment URL, staying within its origin.
pub fn resolve_scope(base: &Url, url: Option<&str>) -> Result<RequestScope, CookieError> {
    let Some(url) = url else {
        return RequestScope::from_url(base);
    };

    let resolved = base.join(url)?;
    if resolved.origin() != base.origin() {
        return Err(CookieError::Scope(format!(
            "URL {} is not same-origin with {}",
            resolved,
            base.origin().ascii_serialization()
        )));
    }

    RequestScope::from_url(&resolved)
}

/// RFC 6265 path-match: the cookie path is the request path, or a prefix of it ending on a `/`
/// boundary.
pub fn path_matches(cookie_path: &str, request_path: &str) -> bool {
    if cookie_path == request_path {
        return true;
    }
    if !request_path.starts_with(cookie_path) {
        return false;
    }
    cookie_path.ends_with('/') || request_path.as_bytes().get(cookie_path.len()) == Some(&b'/')
}

/// Host-only records match their own host; domain records match the domain and its subdomains.
pub fn domain_matches(cookie: &Cookie, host: &str) -> bool {
    match &cookie.domain {
        Some(domain) => host == domain || host.ends_with(&format!(".{}", domain)),
        None => host == cookie.host,
    }
}

/// Can `channel`, reading at `scope`, see this record at all?
pub fn visible_to(cookie: &Cookie, channel: Channel, scope: &RequestScope, now: OffsetDateTime) -> bool {
    if cookie.is_expired(now) {
        return false;
    }
    if cookie.http_only && !channel.sees_http_only() {
        return false;
    }
    // The `secure` flag alone does not hide a record here; only the prefixes do.
    if !scope.secure && cookie.has_restricted_prefix() {
        return false;
    }

    domain_matches(cookie, &scope.host) && path_matches(&cookie.path, &scope.path)
}

/// Selects the records matching `name` that are visible to `channel` at `scope`, in jar order.
pub fn select<'a>(
    cookies: &'a [Cookie],
    channel: Channel,
    scope: &RequestScope,
    name: Option<&NamePredicate>,
    now: OffsetDateTime,
) -> Vec<&'a Cookie> {
    cookies
        .iter()
        .filter(|c| visible_to(c, channel, scope, now))
        .filter(|c| name.map_or(true, |p| p.matches(&c.name)))
        .collect()
}
