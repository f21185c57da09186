//! This crate defines error & result types for Tessera.
//! It also contains a variety of useful macros for error handling.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;
use std::{env, fmt, io};

/// A string that can be used as an error message.
#[derive(Debug)]
pub struct ErrString(Cow<'static, str>);

#[allow(clippy::fallible_impl_from)]
impl<T> From<T> for ErrString
where
    T: Into<Cow<'static, str>>,
{
    fn from(msg: T) -> Self {
        if env::var("TESSERA_PANIC_ON_ERR").as_deref().unwrap_or("") == "1" {
            panic!("{}\nBacktrace:\n{}", msg.into(), Backtrace::capture());
        } else {
            Self(msg.into())
        }
    }
}

impl AsRef<str> for ErrString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for ErrString {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for ErrString {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Alias for [`Backtrace`] so that `thiserror` does not treat these fields as backtrace
/// providers, which requires the unstable `error_generic_member_access` feature.
type CapturedBacktrace = Backtrace;

/// The top-level error type for Tessera.
#[derive(thiserror::Error)]
#[non_exhaustive]
pub enum TesseraError {
    /// The file's bytes do not form a valid file: bad magic, bad checksum, truncation or an
    /// inconsistent manifest.
    #[error("corrupt file: {0}\nBacktrace:\n{1}")]
    CorruptFile(ErrString, CapturedBacktrace),
    /// The file was written by a newer format version than this build can read.
    #[error("unsupported format version {0}, newest supported is {1}\nBacktrace:\n{2}")]
    UnsupportedVersion(u16, u16, CapturedBacktrace),
    /// A schema (or a batch's schema) does not match what was expected.
    #[error("schema mismatch: {0}\nBacktrace:\n{1}")]
    SchemaMismatch(ErrString, CapturedBacktrace),
    /// A requested column or field does not exist.
    #[error("column not found: {0}\nBacktrace:\n{1}")]
    ColumnNotFound(ErrString, CapturedBacktrace),
    /// A requested row range exceeds the rows stored in the file.
    #[error("row range {0}..{1} out of bounds for {2} rows\nBacktrace:\n{3}")]
    RowRangeOutOfBounds(u64, u64, u64, CapturedBacktrace),
    /// A writer was used after it was finalized.
    #[error("writer closed: {0}\nBacktrace:\n{1}")]
    WriterClosed(ErrString, CapturedBacktrace),
    /// Options failed validation at construction.
    #[error("invalid configuration: {0}\nBacktrace:\n{1}")]
    InvalidConfiguration(ErrString, CapturedBacktrace),
    /// An argument to a function was invalid.
    #[error("{0}\nBacktrace:\n{1}")]
    InvalidArgument(ErrString, CapturedBacktrace),
    /// An assertion failed.
    #[error("{0}\nBacktrace:\n{1}")]
    AssertionFailed(ErrString, CapturedBacktrace),
    /// A wrapper for other errors, carrying additional context.
    #[error("{0}: {1}")]
    Context(ErrString, #[source] Box<TesseraError>),
    /// A wrapper for errors from the Arrow library.
    #[error(transparent)]
    ArrowError(#[from] arrow_schema::ArrowError),
    /// A wrapper for IO errors.
    #[error(transparent)]
    IOError(#[from] io::Error),
    /// A wrapper for protobuf decoding errors.
    #[error(transparent)]
    ProstDecodeError(#[from] prost::DecodeError),
    /// A wrapper for errors raised by joined tokio tasks.
    #[cfg(feature = "tokio")]
    #[error(transparent)]
    JoinError(#[from] tokio::task::JoinError),
}

impl TesseraError {
    /// Adds additional context to an error.
    pub fn with_context<T: Into<ErrString>>(self, msg: T) -> Self {
        TesseraError::Context(msg.into(), Box::new(self))
    }

    /// The innermost error, skipping any [`TesseraError::Context`] wrappers.
    pub fn root(&self) -> &TesseraError {
        match self {
            TesseraError::Context(_, inner) => inner.root(),
            other => other,
        }
    }
}

impl Debug for TesseraError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// A type alias for Results that return Tessera errors as their error type.
pub type TesseraResult<T> = Result<T, TesseraError>;

/// A trait for unwrapping a value that is expected to be present, panicking with a
/// [`TesseraError`] carrying the message otherwise.
pub trait TesseraExpect {
    /// The type of the value being expected.
    type Output;

    /// Returns the value or panics with the given message.
    fn tessera_expect(self, msg: &str) -> Self::Output;
}

impl<T, E> TesseraExpect for Result<T, E>
where
    E: Into<TesseraError>,
{
    type Output = T;

    #[inline(always)]
    fn tessera_expect(self, msg: &str) -> Self::Output {
        self.map_err(|err| err.into())
            .unwrap_or_else(|e| tessera_panic!(e.with_context(msg.to_string())))
    }
}

impl<T> TesseraExpect for Option<T> {
    type Output = T;

    #[inline(always)]
    fn tessera_expect(self, msg: &str) -> Self::Output {
        self.unwrap_or_else(|| {
            let err = TesseraError::AssertionFailed(msg.to_string().into(), Backtrace::capture());
            tessera_panic!(err)
        })
    }
}

/// A convenient macro for creating a [`TesseraError`].
#[macro_export]
macro_rules! tessera_err {
    (UnsupportedVersion: $found:expr, $supported:expr) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::TesseraError::UnsupportedVersion($found, $supported, Backtrace::capture())
        )
    }};
    (RowRangeOutOfBounds: $start:expr, $end:expr, $rows:expr) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::TesseraError::RowRangeOutOfBounds($start, $end, $rows, Backtrace::capture())
        )
    }};
    ($variant:ident: $fmt:literal $(, $arg:expr)* $(,)?) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::TesseraError::$variant(format!($fmt, $($arg),*).into(), Backtrace::capture())
        )
    }};
    ($variant:ident: $err:expr $(,)?) => {
        $crate::__private::must_use($crate::TesseraError::$variant($err))
    };
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::tessera_err!(InvalidArgument: $fmt, $($arg),*)
    };
}

/// A convenient macro for returning a [`TesseraError`].
#[macro_export]
macro_rules! tessera_bail {
    ($($tt:tt)+) => {
        return Err($crate::tessera_err!($($tt)+))
    };
}

/// A convenient macro for panicking with a [`TesseraError`] in the presence of a programmer
/// error (e.g., an invariant has been violated).
#[macro_export]
macro_rules! tessera_panic {
    ($variant:ident: $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::tessera_panic!($crate::tessera_err!($variant: $fmt, $($arg),*))
    };
    ($err:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {{
        let err: $crate::TesseraError = $err;
        panic!("{}", err.with_context(format!($fmt, $($arg),*)))
    }};
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::tessera_panic!($crate::tessera_err!($fmt, $($arg),*))
    };
    ($err:expr) => {{
        let err: $crate::TesseraError = $err;
        panic!("{}", err)
    }};
}

#[doc(hidden)]
pub mod __private {
    #[doc(hidden)]
    #[inline]
    #[cold]
    #[must_use]
    pub const fn must_use(error: crate::TesseraError) -> crate::TesseraError {
        error
    }
}

impl From<TesseraError> for io::Error {
    fn from(value: TesseraError) -> Self {
        match value {
            TesseraError::IOError(err) => err,
            other => io::Error::other(other),
        }
    }
}

impl From<TesseraError> for arrow_schema::ArrowError {
    fn from(value: TesseraError) -> Self {
        match value {
            TesseraError::ArrowError(err) => err,
            other => arrow_schema::ArrowError::ExternalError(Box::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macro_selects_variant() {
        let err = tessera_err!(ColumnNotFound: "no field {}", 7);
        assert!(matches!(err, TesseraError::ColumnNotFound(..)));
        assert!(err.to_string().starts_with("column not found: no field 7"));
    }

    #[test]
    fn structured_variants() {
        let err = tessera_err!(RowRangeOutOfBounds: 2, 9, 5);
        assert!(matches!(err, TesseraError::RowRangeOutOfBounds(2, 9, 5, _)));

        let err = tessera_err!(UnsupportedVersion: 3, 1);
        assert!(err.to_string().starts_with("unsupported format version 3"));
    }

    #[test]
    fn context_keeps_root() {
        let err = tessera_err!(CorruptFile: "bad magic").with_context("opening file");
        assert!(matches!(err.root(), TesseraError::CorruptFile(..)));
        assert!(err.to_string().starts_with("opening file: corrupt file: bad magic"));
    }

    #[test]
    fn bail_returns_early() {
        fn check(n: usize) -> TesseraResult<usize> {
            if n <= 1 {
                tessera_bail!(InvalidConfiguration: "batch size must be greater than 1, got {}", n);
            }
            Ok(n)
        }

        assert!(matches!(
            check(1),
            Err(TesseraError::InvalidConfiguration(..))
        ));
        assert_eq!(check(2).unwrap(), 2);
    }

    #[test]
    #[should_panic(expected = "missing value")]
    fn expect_on_none_panics() {
        let value: Option<u8> = None;
        value.tessera_expect("missing value");
    }
}
