/// Broad class of a [`CookieError`].
///
/// Callers (and the scenario tests) assert on the class rather than on the
/// message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed name/value, or a secure/restricted-prefix write from a non-secure channel.
    Syntax,
    /// A write outside the calling channel's allowed domain/path scope.
    Scope,
    /// An observer batch that cannot be reconciled with the reconstructed view.
    Consistency,
    /// Lock poisoning and other failures of the store itself.
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum CookieError {
    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Scope error: {0}")]
    Scope(String),

    #[error("Consistency violation: {0}")]
    Consistency(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Cookie jar lock poisoned")]
    Poisoned,
}

impl CookieError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CookieError::Syntax(_) | CookieError::InvalidUrl(_) => ErrorClass::Syntax,
            CookieError::Scope(_) => ErrorClass::Scope,
            CookieError::Consistency(_) => ErrorClass::Consistency,
            CookieError::Poisoned => ErrorClass::Internal,
        }
    }

    pub fn is_syntax(&self) -> bool {
        self.class() == ErrorClass::Syntax
    }

    pub fn is_scope(&self) -> bool {
        self.class() == ErrorClass::Scope
    }

    pub fn is_consistency(&self) -> bool {
        self.class() == ErrorClass::Consistency
    }
}

impl<T> From<std::sync::PoisonError<T>> for CookieError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        CookieError::Poisoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_errors_are_syntax_class() {
        let err: CookieError = url::Url::parse("not a url").unwrap_err().into();
        assert_eq!(err.class(), ErrorClass::Syntax);
        assert!(err.is_syntax());
    }

    #[test]
    fn display_includes_class_and_detail() {
        let err = CookieError::Scope("domain example.org does not match host a.test".into());
        assert_eq!(
            err.to_string(),
            "Scope error: domain example.org does not match host a.test"
        );
        assert!(err.is_scope());
        assert!(!err.is_consistency());
    }

    #[test]
    fn poisoned_lock_maps_to_internal() {
        let lock = std::sync::Arc::new(std::sync::Mutex::new(0));
        let l2 = lock.clone();
        let _ = std::thread::spawn(move || {
            let _guard = l2.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        let err: CookieError = lock.lock().unwrap_err().into();
        assert_eq!(err.class(), ErrorClass::Internal);
    }
}
