use url::Url;

/// Path used by script writes that do not pass a `path` option.
pub const DEFAULT_COOKIE_PATH: &str = "/";

/// Cookie store configuration.
///
/// The store is bound to a single environment: the document URL gives the
/// current origin, the current path and the protocol (secure or not).
#[derive(Debug, Clone)]
pub struct CookieStoreConfig {
    /// URL of the environment the store serves
    pub url: Url,
    /// Path given to script writes without an explicit path
    pub default_path: String,
    /// Honour `<meta http-equiv="set-cookie">`-style markup directives. When disabled the
    /// directives are accepted and ignored.
    pub meta_set_cookie_enabled: bool,
}

impl CookieStoreConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            default_path: DEFAULT_COOKIE_PATH.to_string(),
            meta_set_cookie_enabled: true,
        }
    }

    pub fn with_default_path(mut self, path: &str) -> Self {
        self.default_path = path.to_string();
        self
    }

    pub fn with_meta_set_cookie(mut self, enabled: bool) -> Self {
        self.meta_set_cookie_enabled = enabled;
        self
    }

    /// Returns true when the environment is a secure context.
    pub fn is_secure(&self) -> bool {
        matches!(self.url.scheme(), "https" | "wss")
    }

    /// Directory of the environment URL, up to and including the final `/`.
    ///
    /// This is the default URL for observer interests.
    pub fn scope_directory(&self) -> String {
        let path = self.url.path();
        match path.rfind('/') {
            Some(idx) => path[..=idx].to_string(),
            None => "/".to_string(),
        }
    }
}
