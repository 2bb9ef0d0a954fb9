//! Turning a requested write into a canonical [`Cookie`] or a rejection.
//!
//! Script writes arrive as `(name, value, CookieOptions)`. HTTP and markup writes
//! arrive as a `Set-Cookie` header string which [`parse_set_cookie`] turns into the same
//! triple, so every channel goes through [`canonicalize`].
//!
//! Rules, in order:
//! 1. names and values may not contain separators or control bytes, and a nameless cookie
//!    may not carry a value that would read back as `name=value`;
//! 2. `__Host-` and `__Secure-` constraints hold on every channel;
//! 3. `secure` or restricted-prefix writes from a non-secure scope are rejected;
//! 4. the domain must cover the writing host and the path must be absolute.
//!
//! The canonicalizer never touches the jar.

use crate::cookies::{has_restricted_prefix, Channel, Cookie, CookieValue, Expiry, RequestScope};
use crate::cookies::{HOST_PREFIX, SECURE_PREFIX};
use crate::errors::CookieError;
use time::format_description::well_known::Rfc2822;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Duration, OffsetDateTime, PrimitiveDateTime};

/// `Sun, 07 Jun 2026 07:07:07 GMT`
const HTTP_DATE: &[FormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// `Sun, 07-Jun-2026 07:07:07 GMT`, the variant many servers emit for cookies
const COOKIE_DATE: &[FormatItem<'static>] = format_description!(
    "[weekday repr:short], [day]-[month repr:short]-[year] [hour]:[minute]:[second] GMT"
);

/// Upper bound for `max-age` (400 days, RFC 6265bis).
const MAX_AGE_CAP_SECONDS: i64 = 400 * 24 * 60 * 60;

/// Requested expiry of a write.
#[derive(Debug, Clone, PartialEq)]
pub enum Expires {
    /// Absolute instant
    At(OffsetDateTime),
    /// Absolute milliseconds since the Unix epoch
    EpochMillis(i64),
    /// HTTP-date string (`Sun, 07 Jun 2026 07:07:07 GMT`)
    HttpDate(String),
    /// Seconds from now; zero or negative expires immediately
    MaxAge(i64),
}

/// Options of a script write or delete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CookieOptions {
    pub domain: Option<String>,
    pub path: Option<String>,
    /// `None` makes a session cookie
    pub expires: Option<Expires>,
    /// `None` follows the protocol of the writing scope
    pub secure: Option<bool>,
    pub http_only: bool,
}

impl CookieOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn domain(mut self, domain: &str) -> Self {
        self.domain = Some(domain.to_string());
        self
    }

    pub fn path(mut self, path: &str) -> Self {
        self.path = Some(path.to_string());
        self
    }

    pub fn expires(mut self, expires: Expires) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = Some(secure);
        self
    }

    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }
}

/// Where a write comes from.
#[derive(Debug, Clone)]
pub struct WriteContext<'a> {
    pub channel: Channel,
    pub scope: &'a RequestScope,
    /// Path used when the write does not carry one
    pub default_path: &'a str,
    pub now: OffsetDateTime,
}

/// A parsed `Set-Cookie` header.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSetCookie {
    pub name: String,
    pub value: CookieValue,
    pub options: CookieOptions,
}

/// Canonicalizes a write into a record, or rejects it.
pub fn canonicalize(
    name: &str,
    value: CookieValue,
    options: &CookieOptions,
    ctx: &WriteContext<'_>,
) -> Result<Cookie, CookieError> {
    check_name(name)?;
    check_value(name, &value)?;

    let domain = match &options.domain {
        Some(d) => Some(normalize_domain(d)?),
        None => None,
    };
    let path = match &options.path {
        Some(p) if p.starts_with('/') => p.clone(),
        Some(p) => return Err(CookieError::Syntax(format!("path {:?} must start with '/'", p))),
        None => ctx.default_path.to_string(),
    };
    let secure = options.secure.unwrap_or(ctx.scope.secure);

    if name.starts_with(HOST_PREFIX) {
        if !secure {
            return Err(CookieError::Syntax(format!("{} cookies must be secure", HOST_PREFIX)));
        }
        if domain.is_some() {
            return Err(CookieError::Syntax(format!("{} cookies cannot set a domain", HOST_PREFIX)));
        }
        if path != "/" {
            return Err(CookieError::Syntax(format!("{} cookies must use path=/", HOST_PREFIX)));
        }
    } else if name.starts_with(SECURE_PREFIX) && !secure {
        return Err(CookieError::Syntax(format!("{} cookies must be secure", SECURE_PREFIX)));
    }

    if !ctx.scope.secure && (secure || has_restricted_prefix(name)) {
        return Err(CookieError::Syntax(
            "secure cookies are only writable from secure contexts".to_string(),
        ));
    }

    if let Some(d) = &domain {
        let host = &ctx.scope.host;
        if host != d && !host.ends_with(&format!(".{}", d)) {
            return Err(CookieError::Scope(format!("domain {} does not cover host {}", d, host)));
        }
    }

    let expiry = match &options.expires {
        None => Expiry::Session,
        Some(expires) => Expiry::At(resolve_expires(expires, ctx.now)?),
    };

    Ok(Cookie {
        name: name.to_string(),
        value,
        domain,
        host: ctx.scope.host.clone(),
        path,
        secure,
        http_only: options.http_only,
        expiry,
        seq: 0,
    })
}

/// Canonicalizes a delete: the same write with an empty value and an expiry in the past.
pub fn canonicalize_delete(
    name: &str,
    options: &CookieOptions,
    ctx: &WriteContext<'_>,
) -> Result<Cookie, CookieError> {
    let mut options = options.clone();
    options.expires = Some(Expires::At(OffsetDateTime::UNIX_EPOCH));
    canonicalize(name, CookieValue::default(), &options, ctx)
}

/// Parses a `Set-Cookie` header (`name=value; attr=val; ...`) byte-exactly.
///
/// The value is kept byte-exact; the name must be UTF-8. Unknown attributes are ignored, as
/// are `expires`, `max-age` and `path` values that do not parse. `max-age` wins over `expires`.
pub fn parse_set_cookie(header: &[u8]) -> Result<ParsedSetCookie, CookieError> {
    let mut parts = header.split(|b| *b == b';');
    let pair = trim_bytes(parts.next().unwrap_or_default());

    let (name, value) = match pair.iter().position(|b| *b == b'=') {
        Some(idx) => (trim_bytes(&pair[..idx]), trim_bytes(&pair[idx + 1..])),
        None if pair.is_empty() => {
            return Err(CookieError::Syntax("empty Set-Cookie header".to_string()))
        }
        None => (&pair[..0], pair),
    };

    let mut options = CookieOptions::new().secure(false);
    let mut max_age = None;

    for attr in parts {
        let attr = trim_bytes(attr);
        let (key, val) = match attr.iter().position(|b| *b == b'=') {
            Some(idx) => (trim_bytes(&attr[..idx]), trim_bytes(&attr[idx + 1..])),
            None => (attr, &attr[..0]),
        };
        let val = String::from_utf8_lossy(val);

        match String::from_utf8_lossy(key).to_ascii_lowercase().as_str() {
            "path" if val.starts_with('/') => options.path = Some(val.into_owned()),
            "domain" if !val.is_empty() => options.domain = Some(val.into_owned()),
            "expires" => {
                if let Ok(at) = parse_http_date(&val) {
                    options.expires = Some(Expires::At(at));
                } else if let Ok(ms) = val.parse::<i64>() {
                    options.expires = Some(Expires::EpochMillis(ms));
                }
            }
            "max-age" => {
                if let Ok(secs) = val.parse::<i64>() {
                    max_age = Some(secs);
                }
            }
            "secure" => options.secure = Some(true),
            "httponly" => options.http_only = true,
            _ => {}
        }
    }

    if let Some(secs) = max_age {
        options.expires = Some(Expires::MaxAge(secs));
    }

    let name = std::str::from_utf8(name)
        .map_err(|_| CookieError::Syntax("cookie name is not valid UTF-8".to_string()))?;

    Ok(ParsedSetCookie {
        name: name.to_string(),
        value: CookieValue::from(value),
        options,
    })
}

/// Parses an HTTP-date (`Sun, 07 Jun 2026 07:07:07 GMT`), the dashed cookie variant, or an
/// RFC 2822 date.
pub fn parse_http_date(s: &str) -> Result<OffsetDateTime, CookieError> {
    let s = s.trim();
    PrimitiveDateTime::parse(s, HTTP_DATE)
        .or_else(|_| PrimitiveDateTime::parse(s, COOKIE_DATE))
        .map(|dt| dt.assume_utc())
        .or_else(|_| OffsetDateTime::parse(s, &Rfc2822))
        .map_err(|e| CookieError::Syntax(format!("invalid HTTP date {:?}: {}", s, e)))
}

fn resolve_expires(expires: &Expires, now: OffsetDateTime) -> Result<OffsetDateTime, CookieError> {
    match expires {
        Expires::At(at) => Ok(*at),
        Expires::EpochMillis(ms) => OffsetDateTime::from_unix_timestamp_nanos(*ms as i128 * 1_000_000)
            .map_err(|e| CookieError::Syntax(format!("expires {} out of range: {}", ms, e))),
        Expires::HttpDate(s) => parse_http_date(s),
        Expires::MaxAge(secs) if *secs <= 0 => Ok(OffsetDateTime::UNIX_EPOCH),
        Expires::MaxAge(secs) => Ok(now + Duration::seconds((*secs).min(MAX_AGE_CAP_SECONDS))),
    }
}

fn check_name(name: &str) -> Result<(), CookieError> {
    if name.bytes().any(|b| b == b';' || b == b'=' || is_control(b)) {
        return Err(CookieError::Syntax(format!("invalid cookie name {:?}", name)));
    }
    Ok(())
}

fn check_value(name: &str, value: &CookieValue) -> Result<(), CookieError> {
    let bytes = value.as_bytes();
    if bytes.iter().any(|b| *b == b';' || is_control(*b)) {
        return Err(CookieError::Syntax(format!("invalid value for cookie {:?}", name)));
    }
    if name.is_empty() && bytes.contains(&b'=') {
        return Err(CookieError::Syntax(
            "a nameless cookie cannot carry '=' in its value".to_string(),
        ));
    }
    Ok(())
}

fn normalize_domain(domain: &str) -> Result<String, CookieError> {
    let d = domain.trim().trim_start_matches('.').to_ascii_lowercase();
    if d.is_empty() {
        return Err(CookieError::Syntax(format!("invalid domain {:?}", domain)));
    }
    Ok(d)
}

fn is_control(b: u8) -> bool {
    (b < 0x20 && b != b'\t') || b == 0x7f
}

fn trim_bytes(b: &[u8]) -> &[u8] {
    let start = b.iter().position(|c| *c != b' ' && *c != b'\t').unwrap_or(b.len());
    let end = b.iter().rposition(|c| *c != b' ' && *c != b'\t').map_or(start, |i| i + 1);
    &b[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorClass;
    use url::Url;

    fn scope(s: &str) -> RequestScope {
        RequestScope::from_url(&Url::parse(s).unwrap()).unwrap()
    }

    fn script_set(scope: &RequestScope, name: &str, value: &str, options: CookieOptions) -> Result<Cookie, CookieError> {
        let ctx = WriteContext {
            channel: Channel::Script,
            scope,
            default_path: "/",
            now: OffsetDateTime::now_utc(),
        };
        canonicalize(name, CookieValue::from(value), &options, &ctx)
    }

    #[test]
    fn defaults_follow_scope() {
        let s = scope("https://example.com/dir/page.html");
        let c = script_set(&s, "TEST", "value", CookieOptions::new()).unwrap();
        assert_eq!(c.path, "/");
        assert_eq!(c.domain, None);
        assert_eq!(c.host, "example.com");
        assert!(c.secure);
        assert_eq!(c.expiry, Expiry::Session);

        let insecure = scope("http://example.com/");
        assert!(!script_set(&insecure, "TEST", "value", CookieOptions::new()).unwrap().secure);
    }

    #[test]
    fn nameless_value_with_equals_is_rejected() {
        let s = scope("https://example.com/");
        let err = script_set(&s, "", "suspicious-value=resembles-name-and-value", CookieOptions::new()).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Syntax);

        // fine once there is a name
        assert!(script_set(&s, "n", "a=b", CookieOptions::new()).is_ok());
        // and a nameless, valueless cookie is legal
        assert!(script_set(&s, "", "", CookieOptions::new()).is_ok());
    }

    #[test]
    fn separators_in_values_are_rejected() {
        let s = scope("https://example.com/");
        assert!(script_set(&s, "n", "a; b=c", CookieOptions::new()).unwrap_err().is_syntax());
        assert!(script_set(&s, "n;x", "v", CookieOptions::new()).unwrap_err().is_syntax());
        assert!(script_set(&s, "n", "line\nbreak", CookieOptions::new()).unwrap_err().is_syntax());
    }

    #[test]
    fn host_prefix_rejects_domain_on_any_channel() {
        let s = scope("https://example.org/");
        let err = script_set(&s, "__Host-X", "v", CookieOptions::new().domain("example.org")).unwrap_err();
        assert!(err.is_syntax());

        let err = script_set(&s, "__Host-X", "v", CookieOptions::new().path("/sub/")).unwrap_err();
        assert!(err.is_syntax());

        assert!(script_set(&s, "__Host-X", "v", CookieOptions::new()).is_ok());
    }

    #[test]
    fn secure_writes_from_insecure_scope_are_syntax_errors() {
        let s = scope("http://example.com/");
        assert!(script_set(&s, "__Host-X", "v", CookieOptions::new()).unwrap_err().is_syntax());
        assert!(script_set(&s, "__Secure-X", "v", CookieOptions::new()).unwrap_err().is_syntax());
        assert!(script_set(&s, "plain", "v", CookieOptions::new().secure(true)).unwrap_err().is_syntax());
    }

    #[test]
    fn secure_prefix_requires_secure_flag() {
        let s = scope("https://example.com/");
        let err = script_set(&s, "__Secure-X", "v", CookieOptions::new().secure(false)).unwrap_err();
        assert!(err.is_syntax());
    }

    #[test]
    fn foreign_domain_is_scope_error() {
        let s = scope("https://www.example.com/");
        assert!(script_set(&s, "n", "v", CookieOptions::new().domain("other.org")).unwrap_err().is_scope());

        let c = script_set(&s, "n", "v", CookieOptions::new().domain(".Example.com")).unwrap();
        assert_eq!(c.domain.as_deref(), Some("example.com"));
    }

    #[test]
    fn expiry_forms() {
        let s = scope("https://example.com/");
        let c = script_set(&s, "n", "v", CookieOptions::new().expires(Expires::EpochMillis(1_000))).unwrap();
        assert_eq!(c.expiry, Expiry::At(OffsetDateTime::from_unix_timestamp(1).unwrap()));

        let c = script_set(
            &s,
            "n",
            "v",
            CookieOptions::new().expires(Expires::HttpDate("Sun, 07 Jun 2026 07:07:07 GMT".into())),
        )
        .unwrap();
        assert_eq!(c.expiry, Expiry::At(OffsetDateTime::from_unix_timestamp(1_780_816_027).unwrap()));

        let c = script_set(&s, "n", "v", CookieOptions::new().expires(Expires::MaxAge(0))).unwrap();
        assert!(c.is_expired(OffsetDateTime::now_utc()));

        assert!(script_set(&s, "n", "v", CookieOptions::new().expires(Expires::HttpDate("tomorrow".into())))
            .unwrap_err()
            .is_syntax());
    }

    #[test]
    fn delete_is_an_expired_empty_write() {
        let s = scope("https://example.com/");
        let ctx = WriteContext {
            channel: Channel::Script,
            scope: &s,
            default_path: "/",
            now: OffsetDateTime::now_utc(),
        };
        let c = canonicalize_delete("TEST", &CookieOptions::new(), &ctx).unwrap();
        assert!(c.value.is_empty());
        assert!(c.is_expired(ctx.now));

        let insecure = scope("http://example.com/");
        let ctx = WriteContext { scope: &insecure, ..ctx };
        assert!(canonicalize_delete("__Host-COOKIENAME", &CookieOptions::new(), &ctx)
            .unwrap_err()
            .is_syntax());
    }

    #[test]
    fn parses_set_cookie_attributes() {
        let p = parse_set_cookie(b"HTTPONLY-x=y; Path=/; max-age=0; HttpOnly; SameSite=Lax").unwrap();
        assert_eq!(p.name, "HTTPONLY-x");
        assert_eq!(p.value.as_bytes(), b"y");
        assert_eq!(p.options.path.as_deref(), Some("/"));
        assert_eq!(p.options.expires, Some(Expires::MaxAge(0)));
        assert!(p.options.http_only);
        assert_eq!(p.options.secure, Some(false));
    }

    #[test]
    fn max_age_wins_over_expires() {
        let p = parse_set_cookie(b"a=b; max-age=60; expires=Sun, 07 Jun 2026 07:07:07 GMT").unwrap();
        assert_eq!(p.options.expires, Some(Expires::MaxAge(60)));

        let p = parse_set_cookie(b"a=b; expires=Sun, 07-Jun-2026 07:07:07 GMT; secure").unwrap();
        assert!(matches!(p.options.expires, Some(Expires::At(_))));
        assert_eq!(p.options.secure, Some(true));
    }

    #[test]
    fn set_cookie_keeps_raw_value_bytes() {
        let mut header = "HTTP-\u{1f36a}=\u{1f535}".as_bytes().to_vec();
        header.extend_from_slice(&[0xef, 0xbf, 0xbd, 0xff]);
        header.extend_from_slice(b"; path=/");
        let p = parse_set_cookie(&header).unwrap();
        assert_eq!(p.name, "HTTP-\u{1f36a}");
        assert_eq!(p.value.as_bytes(), &header["HTTP-\u{1f36a}=".len()..header.len() - "; path=/".len()]);
    }

    #[test]
    fn set_cookie_without_equals_is_nameless() {
        let p = parse_set_cookie(b"just-a-value; path=/").unwrap();
        assert_eq!(p.name, "");
        assert_eq!(p.value.as_bytes(), b"just-a-value");
        assert!(parse_set_cookie(b"  ").unwrap_err().is_syntax());
    }

    #[test]
    fn non_utf8_name_is_rejected() {
        let err = parse_set_cookie(b"a\xff=b; path=/").unwrap_err();
        assert_eq!(err.class(), ErrorClass::Syntax);
        assert_eq!(parse_set_cookie(b"a=\xff").unwrap().value.as_bytes(), b"\xff");
    }

    #[test]
    fn invalid_path_attribute_is_ignored() {
        let p = parse_set_cookie(b"a=b; path=relative").unwrap();
        assert_eq!(p.options.path, None);
    }
}
