//! Error primitives shared across keel crates.
//!
//! Hook bodies and other user-supplied code return [`GenericError`], an opaque error type that can carry any error and
//! any amount of context. When a single failure has to be handed to many observers at once, such as every caller that
//! was waiting on the same service start, it is wrapped in a [`SharedError`], which is cheap to clone.

use std::{fmt, sync::Arc};

/// A type-erased error.
pub type GenericError = anyhow::Error;

/// Macro for constructing a generic error.
///
/// The resulting value evaluates to [`GenericError`], and can be constructed from a string literal, a format string
/// (with arguments accepted, in the same order as `std::format!`), or a value which implements `Debug` and `Display`,
/// such as an existing error that implements `std::error::Error`.
#[macro_export]
macro_rules! generic_error {
    ($msg:literal $(,)?) => { $crate::_anyhow!($msg) };
    ($err:expr $(,)?) => { $crate::_anyhow!($err) };
    ($fmt:expr, $($arg:tt)*) => { $crate::_anyhow!($fmt, $($arg)*) };
}

#[doc(hidden)]
pub use anyhow::anyhow as _anyhow;

pub(crate) mod private {
    pub trait Sealed {}

    impl<T, E> Sealed for Result<T, E> {}
}

// NOTE: This wraps `anyhow::Context` because its extension methods otherwise collide with `snafu::ResultExt` in modules
// that use both.
/// Extension trait for attaching context to errors.
pub trait ErrorContext<T, E>: private::Sealed {
    /// Wrap the error value with additional context.
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: fmt::Display + Send + Sync + 'static;

    /// Wrap the error value with additional context that is evaluated lazily only once an error does occur.
    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> ErrorContext<T, E> for Result<T, E>
where
    Result<T, E>: anyhow::Context<T, E>,
{
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: fmt::Display + Send + Sync + 'static,
    {
        <Self as anyhow::Context<T, E>>::context(self, context)
    }

    fn with_error_context<C, F>(self, context: F) -> Result<T, GenericError>
    where
        C: fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        <Self as anyhow::Context<T, E>>::with_context(self, context)
    }
}

/// A reference-counted, clonable error.
///
/// `SharedError` wraps a [`GenericError`] so that the same failure can be returned to multiple callers, recorded
/// against a service, and still be used as the `source` of a typed error. Cloning is a reference count increment and
/// all clones point at the same underlying error.
///
/// Display and `source` are forwarded to the wrapped error, so `{:#}` formatting prints the full context chain.
#[derive(Clone)]
pub struct SharedError {
    inner: Arc<GenericError>,
}

impl SharedError {
    /// Creates a new `SharedError` from anything that converts into a [`GenericError`].
    pub fn new<E>(error: E) -> Self
    where
        E: Into<GenericError>,
    {
        Self {
            inner: Arc::new(error.into()),
        }
    }

    /// Creates a new `SharedError` from a displayable message.
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self::new(GenericError::msg(message))
    }

    /// Returns a reference to the wrapped error.
    pub fn as_generic(&self) -> &GenericError {
        &self.inner
    }

    /// Returns `true` if both values point at the same underlying error.
    pub fn ptr_eq(&self, other: &SharedError) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Attempts to downcast the wrapped error to a concrete error type.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.inner.downcast_ref::<E>()
    }
}

impl From<GenericError> for SharedError {
    fn from(error: GenericError) -> Self {
        Self::new(error)
    }
}

impl fmt::Debug for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.inner, f)
    }
}

impl fmt::Display for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.inner, f)
    }
}

impl std::error::Error for SharedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        (**self.inner).source()
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[derive(Debug)]
    struct ConnectionRefused;

    impl fmt::Display for ConnectionRefused {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("connection refused")
        }
    }

    impl std::error::Error for ConnectionRefused {}

    #[test]
    fn generic_error_macro_formats() {
        let port = 8125;
        let error = generic_error!("failed to bind to port {}", port);
        assert_eq!(error.to_string(), "failed to bind to port 8125");
    }

    #[test]
    fn error_context_wraps_source() {
        let result: Result<(), ConnectionRefused> = Err(ConnectionRefused);
        let error = result.error_context("Failed to connect to upstream.").unwrap_err();

        assert_eq!(error.to_string(), "Failed to connect to upstream.");
        assert_eq!(format!("{:#}", error), "Failed to connect to upstream.: connection refused");
    }

    #[test]
    fn shared_error_clones_point_at_same_error() {
        let original = SharedError::msg("listener closed");
        let cloned = original.clone();

        assert!(original.ptr_eq(&cloned));
        assert!(!original.ptr_eq(&SharedError::msg("listener closed")));
        assert_eq!(cloned.to_string(), "listener closed");
    }

    #[test]
    fn shared_error_forwards_source_chain() {
        let result: Result<(), ConnectionRefused> = Err(ConnectionRefused);
        let shared = SharedError::new(result.error_context("Failed to open pool.").unwrap_err());

        assert_eq!(shared.to_string(), "Failed to open pool.");
        assert_eq!(
            shared.source().map(|source| source.to_string()),
            Some("connection refused".to_string())
        );
        assert_eq!(format!("{:#}", shared), "Failed to open pool.: connection refused");
        assert!(shared.downcast_ref::<ConnectionRefused>().is_some());
    }
}
