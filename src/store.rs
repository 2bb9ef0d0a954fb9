use crate::config::CookieStoreConfig;
use crate::cookies::{
    canonicalize, canonicalize_delete, parse_set_cookie, resolve_scope, Channel, Cookie,
    CookieJarHandle, CookieListItem, CookieOptions, CookieQuery, CookieValue, DefaultCookieJar,
    JarChange, RequestScope, WriteContext,
};
use crate::errors::CookieError;
use crate::observer::{ChangeBatch, CookieObserver, Dispatcher, Interest, InterestScope};
use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderValue};
use std::fmt::Debug;
use std::sync::Arc;
use time::OffsetDateTime;
use url::Url;

/// The cookie store of one environment.
///
/// Every channel (script, document, HTTP, markup) reads and writes the same jar. Each
/// operation is atomic with respect to the jar. Mutations schedule observer delivery, which
/// runs after the operation returns; use [`CookieStore::settle`] to wait for it.
#[derive(Clone)]
pub struct CookieStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    config: CookieStoreConfig,
    /// Scope of the environment URL
    scope: RequestScope,
    jar: CookieJarHandle,
    dispatcher: Arc<Dispatcher>,
}

impl Debug for CookieStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieStore")
            .field("url", &self.inner.config.url.as_str())
            .finish_non_exhaustive()
    }
}

impl CookieStore {
    /// Creates a store with an empty in-memory jar.
    pub fn new(config: CookieStoreConfig) -> Result<Self, CookieError> {
        Self::with_jar(config, DefaultCookieJar::new().into())
    }

    /// Creates a store on top of an existing jar.
    pub fn with_jar(config: CookieStoreConfig, jar: CookieJarHandle) -> Result<Self, CookieError> {
        let scope = RequestScope::from_url(&config.url)?;
        let dispatcher = Dispatcher::new(jar.clone());
        Ok(Self {
            inner: Arc::new(StoreInner {
                config,
                scope,
                jar,
                dispatcher,
            }),
        })
    }

    pub fn config(&self) -> &CookieStoreConfig {
        &self.inner.config
    }

    pub fn jar(&self) -> CookieJarHandle {
        self.inner.jar.clone()
    }

    // Script channel

    /// Returns the first script-visible record matching the query, in jar order.
    pub fn get(&self, query: impl Into<CookieQuery>) -> Result<Option<CookieListItem>, CookieError> {
        let query = query.into();
        let scope = resolve_scope(&self.inner.config.url, query.url.as_deref())?;
        let jar = self.inner.jar.read()?;
        Ok(jar
            .get(Channel::Script, &scope, query.name.as_ref(), now())
            .map(|c| c.list_item()))
    }

    /// Like [`CookieStore::get`], but returns the stored value bytes without decoding.
    pub fn get_raw(&self, query: impl Into<CookieQuery>) -> Result<Option<CookieValue>, CookieError> {
        let query = query.into();
        let scope = resolve_scope(&self.inner.config.url, query.url.as_deref())?;
        let jar = self.inner.jar.read()?;
        Ok(jar
            .get(Channel::Script, &scope, query.name.as_ref(), now())
            .map(|c| c.value))
    }

    /// Returns every script-visible record matching the query, in jar order.
    pub fn get_all(&self, query: impl Into<CookieQuery>) -> Result<Vec<CookieListItem>, CookieError> {
        let query = query.into();
        let scope = resolve_scope(&self.inner.config.url, query.url.as_deref())?;
        let jar = self.inner.jar.read()?;
        Ok(jar
            .get_all(Channel::Script, &scope, query.name.as_ref(), now())
            .iter()
            .map(|c| c.list_item())
            .collect())
    }

    /// Writes a record through the script API.
    pub fn set(
        &self,
        name: &str,
        value: impl Into<CookieValue>,
        options: &CookieOptions,
    ) -> Result<(), CookieError> {
        if options.http_only {
            log::debug!("rejected script write of {:?}: HttpOnly", name);
            return Err(CookieError::Scope(format!(
                "cookie {:?} cannot be made HttpOnly from script",
                name
            )));
        }

        let ctx = self.script_context(now());
        let cookie = canonicalize(name, value.into(), options, &ctx).inspect_err(|e| {
            log::debug!("rejected script write of {:?}: {}", name, e);
        })?;
        self.apply(cookie, Channel::Script, ctx.now)?;
        Ok(())
    }

    /// Deletes the record with this name, domain and path. Deleting a missing record is not
    /// an error.
    pub fn delete(&self, name: &str, options: &CookieOptions) -> Result<(), CookieError> {
        let ctx = self.script_context(now());
        let cookie = canonicalize_delete(name, options, &ctx).inspect_err(|e| {
            log::debug!("rejected script delete of {:?}: {}", name, e);
        })?;
        self.apply(cookie, Channel::Script, ctx.now)?;
        Ok(())
    }

    /// Removes every record, HttpOnly ones included. Returns the number of live records removed.
    pub fn clear(&self) -> Result<usize, CookieError> {
        let removed = self.inner.jar.write()?.clear(now());
        log::debug!("cleared {} cookie(s)", removed);
        if removed > 0 {
            self.inner.dispatcher.notify()?;
        }
        Ok(removed)
    }

    /// Script view of the environment as `name1=value1; name2=value2`, or `None` when no
    /// record is visible.
    pub fn cookie_string(&self) -> Result<Option<String>, CookieError> {
        let bytes = self.visible_bytes(Channel::Script, &self.inner.scope)?;
        Ok(bytes.map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    // Document channel

    /// Applies a `document.cookie`-style assignment: one `Set-Cookie` string with script
    /// visibility. Strings carrying `httponly` are ignored.
    pub fn set_document_cookie(&self, cookie: &str) -> Result<(), CookieError> {
        self.apply_set_cookie(cookie.as_bytes(), Channel::Script, &self.inner.scope)?;
        Ok(())
    }

    /// Reads `document.cookie`: the script view of the environment.
    pub fn document_cookie(&self) -> Result<Option<String>, CookieError> {
        self.cookie_string()
    }

    // Markup channel

    /// Applies a markup-embedded `set-cookie` directive for the environment URL. Ignored when
    /// the directive is disabled in the configuration.
    pub fn apply_meta_set_cookie(&self, directive: &str) -> Result<(), CookieError> {
        if !self.inner.config.meta_set_cookie_enabled {
            log::debug!("markup set-cookie directives are disabled, ignoring");
            return Ok(());
        }

        self.apply_set_cookie(directive.as_bytes(), Channel::Markup, &self.inner.scope)?;
        Ok(())
    }

    // HTTP channel

    /// Applies one `Set-Cookie` header received for `url`.
    pub fn set_cookie_header(&self, url: &Url, header: &str) -> Result<(), CookieError> {
        self.set_cookie_bytes(url, header.as_bytes())
    }

    /// Applies one raw `Set-Cookie` header received for `url`. Bytes are stored verbatim.
    pub fn set_cookie_bytes(&self, url: &Url, header: &[u8]) -> Result<(), CookieError> {
        let scope = RequestScope::from_url(url)?;
        self.apply_set_cookie(header, Channel::Http, &scope)?;
        Ok(())
    }

    /// Applies every `Set-Cookie` header of a response, in order.
    ///
    /// A rejected header does not stop the others; the first rejection is returned.
    pub fn store_response_cookies(&self, url: &Url, headers: &HeaderMap) -> Result<(), CookieError> {
        let mut first_error = None;
        for value in headers.get_all(SET_COOKIE) {
            if let Err(e) = self.set_cookie_bytes(url, value.as_bytes()) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// The raw `Cookie` header bytes for a request to `url`, or `None` when no record applies.
    pub fn cookie_bytes(&self, url: &Url) -> Result<Option<Vec<u8>>, CookieError> {
        let scope = RequestScope::from_url(url)?;
        self.visible_bytes(Channel::Http, &scope)
    }

    /// The `Cookie` header for a request to `url`, decoded lossily.
    pub fn http_cookie_string(&self, url: &Url) -> Result<Option<String>, CookieError> {
        Ok(self
            .cookie_bytes(url)?
            .map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    /// The `Cookie` header for a request to `url` as a header value.
    pub fn request_cookie_header(&self, url: &Url) -> Result<Option<HeaderValue>, CookieError> {
        match self.cookie_bytes(url)? {
            Some(bytes) => HeaderValue::from_bytes(&bytes)
                .map(Some)
                .map_err(|e| CookieError::Syntax(format!("invalid {} header: {}", COOKIE, e))),
            None => Ok(None),
        }
    }

    // Observation

    /// Registers an observer. `None` observes every script-visible record at the directory of
    /// the environment URL.
    ///
    /// The first delivery is the initial snapshot of the observer's view, possibly empty.
    pub fn observe<F>(
        &self,
        interests: Option<Vec<Interest>>,
        callback: F,
    ) -> Result<CookieObserver, CookieError>
    where
        F: FnMut(&ChangeBatch) -> Result<(), CookieError> + Send + 'static,
    {
        let scope = InterestScope {
            base: self.inner.config.url.clone(),
            default_url: self.inner.config.scope_directory(),
        };
        let resolved = scope.resolve(interests)?;
        let id = self.inner.dispatcher.register(resolved, callback)?;
        Ok(CookieObserver::new(id, self.inner.dispatcher.clone(), scope))
    }

    /// Waits until every delivery scheduled so far has run.
    pub async fn settle(&self) {
        self.inner.dispatcher.flush().await;
    }

    /// Drains the errors raised during asynchronous delivery.
    pub fn take_errors(&self) -> Vec<CookieError> {
        self.inner.dispatcher.take_errors()
    }

    pub fn observer_count(&self) -> Result<usize, CookieError> {
        self.inner.dispatcher.observer_count()
    }

    fn script_context(&self, now: OffsetDateTime) -> WriteContext<'_> {
        WriteContext {
            channel: Channel::Script,
            scope: &self.inner.scope,
            default_path: &self.inner.config.default_path,
            now,
        }
    }

    fn visible_bytes(&self, channel: Channel, scope: &RequestScope) -> Result<Option<Vec<u8>>, CookieError> {
        let jar = self.inner.jar.read()?;
        Ok(jar.serialize_visible(channel, scope, now()))
    }

    /// Parses and applies a `Set-Cookie` string arriving through `channel`. Defaults the path
    /// to the directory of `scope`.
    fn apply_set_cookie(
        &self,
        header: &[u8],
        channel: Channel,
        scope: &RequestScope,
    ) -> Result<JarChange, CookieError> {
        let parsed = parse_set_cookie(header)?;
        if parsed.options.http_only && !channel.sees_http_only() {
            log::debug!("ignored {:?} cookie {:?}: HttpOnly", channel, parsed.name);
            return Ok(JarChange::Unchanged);
        }

        let now = now();
        let default_path = scope.default_path();
        let ctx = WriteContext {
            channel,
            scope,
            default_path: &default_path,
            now,
        };
        let record = canonicalize(&parsed.name, parsed.value, &parsed.options, &ctx).inspect_err(|e| {
            log::debug!("rejected {:?} cookie {:?}: {}", channel, parsed.name, e);
        })?;
        self.apply(record, channel, now)
    }

    fn apply(&self, cookie: Cookie, channel: Channel, now: OffsetDateTime) -> Result<JarChange, CookieError> {
        let name = cookie.name.clone();
        let change = self.inner.jar.write()?.set(cookie, channel, now).inspect_err(|e| {
            log::debug!("rejected {:?} write of {:?}: {}", channel, name, e);
        })?;

        log::trace!("{:?} write of {:?}: {:?}", channel, name, change);
        if change.is_mutation() {
            self.inner.dispatcher.notify()?;
        }
        Ok(change)
    }
}

fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}
