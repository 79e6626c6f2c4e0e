//! Error types and result definitions for normalization and loading.
//!
//! Provides a single error type with classification, aggregation, and captured
//! diagnostic metadata. [`StrataError`] represents a single failure, a failure
//! with additional detail, or several aggregated failures (for example when
//! multiple tables of a package fail independently).

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type using [`StrataError`] as the error type.
pub type StrataResult<T> = Result<T, StrataError>;

/// Detailed payload stored for single [`StrataError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for normalization and loading operations.
///
/// Carries an [`ErrorKind`] for classification, a static description, optional
/// dynamic detail (field names, version numbers, table names), an optional
/// source error, and the callsite location plus backtrace captured at creation.
#[derive(Debug, Clone)]
pub struct StrataError {
    repr: ErrorRepr,
}

/// Internal representation of error data.
#[derive(Debug, Clone)]
enum ErrorRepr {
    /// Single error payload holding rich metadata.
    Single(ErrorPayload),
    /// Multiple aggregated errors.
    ///
    /// This variant captures independent per-table failures of one package.
    Many {
        errors: Vec<StrataError>,
        location: &'static Location<'static>,
    },
}

/// Categories of errors that can occur while normalizing or loading.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A value's type cannot be widened into the existing column type, or two
    /// concurrent schema commits raced. Never silently resolved.
    SchemaConflict,
    /// Network, timeout or throttling failure reported by a destination.
    /// Retried with backoff up to the configured attempt limit.
    DestinationTransient,
    /// The destination rejected the operation permanently.
    DestinationFatal,
    /// Some tables of a package committed while others failed.
    PartialLoad,

    /// Malformed or unsupported input data.
    InvalidData,
    /// A typed value could not be converted or reread from a row file.
    ConversionError,
    /// An operation was attempted from an illegal lifecycle state.
    InvalidState,
    /// Invalid configuration values.
    ConfigError,
    /// Filesystem failure in package or schema storage.
    IoError,
    /// Serialization or deserialization failure.
    SerializationError,

    /// Uncategorized failure.
    Unknown,
}

impl StrataError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For aggregated errors, returns the kind of the first error or
    /// [`ErrorKind::Unknown`] if the aggregation is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error, flattened.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the detailed error information if available.
    ///
    /// For aggregated errors, returns the detail of the first error that has one.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the captured backtrace for this error.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Returns `true` when the failure is classified as retryable.
    ///
    /// Only transient destination failures are retried; everything else
    /// propagates to the caller.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::DestinationTransient
    }

    /// Attaches an originating [`error::Error`] to this error and returns the
    /// modified instance.
    ///
    /// Has no effect on aggregated errors, which forward the first contained
    /// error as their source instead.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    /// Creates a [`StrataError`] from its components.
    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

/// Compares errors by kind only, which is what tests care about.
impl PartialEq for StrataError {
    fn eq(&self, other: &StrataError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for StrataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                write!(
                    f,
                    "[{:?}] {} @ {}:{}",
                    payload.kind,
                    payload.description,
                    payload.location.file(),
                    payload.location.line(),
                )?;
                if let Some(detail) = payload.detail.as_deref() {
                    write!(f, "\n  Detail: {detail}")?;
                }
                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                write!(
                    f,
                    "[Many] {} error(s) aggregated @ {}:{}",
                    errors.len(),
                    location.file(),
                    location.line(),
                )?;
                for (index, error) in errors.iter().enumerate() {
                    for (n, line) in format!("{error}").lines().enumerate() {
                        if n == 0 {
                            write!(f, "\n  {}. {}", index + 1, line)?;
                        } else {
                            write!(f, "\n     {line}")?;
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

impl error::Error for StrataError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source as &(dyn error::Error + 'static)),
            // Aggregated errors forward the first contained error as the source.
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

/// Creates a [`StrataError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for StrataError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> StrataError {
        StrataError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`StrataError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for StrataError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> StrataError {
        StrataError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates a vector of errors.
///
/// A vector with exactly one error unwraps to that error directly instead of
/// producing an [`ErrorRepr::Many`] aggregation.
impl<E> From<Vec<E>> for StrataError
where
    E: Into<StrataError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> StrataError {
        let location = Location::caller();
        let mut errors: Vec<StrataError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1 {
            return errors.remove(0);
        }

        StrataError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

impl From<std::io::Error> for StrataError {
    #[track_caller]
    fn from(err: std::io::Error) -> StrataError {
        StrataError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("An I/O error occurred"),
            Some(err.to_string().into()),
            Some(Arc::new(err)),
        )
    }
}

impl From<serde_json::Error> for StrataError {
    #[track_caller]
    fn from(err: serde_json::Error) -> StrataError {
        StrataError::from_components(
            ErrorKind::SerializationError,
            Cow::Borrowed("A JSON serialization error occurred"),
            Some(err.to_string().into()),
            Some(Arc::new(err)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_error_exposes_kind_and_detail() {
        let err = StrataError::from((
            ErrorKind::SchemaConflict,
            "Schema conflict",
            "column 'age': integer vs complex",
        ));
        assert_eq!(err.kind(), ErrorKind::SchemaConflict);
        assert_eq!(err.detail(), Some("column 'age': integer vs complex"));
        assert!(!err.is_transient());
    }

    #[test]
    fn singleton_vec_unwraps_to_inner_error() {
        let err = StrataError::from(vec![StrataError::from((
            ErrorKind::DestinationTransient,
            "Timed out",
        ))]);
        assert_eq!(err.kinds(), vec![ErrorKind::DestinationTransient]);
        assert!(err.is_transient());
    }

    #[test]
    fn aggregated_errors_flatten_kinds() {
        let err = StrataError::from(vec![
            StrataError::from((ErrorKind::DestinationFatal, "Permission denied")),
            StrataError::from((ErrorKind::DestinationTransient, "Throttled")),
        ]);
        assert_eq!(
            err.kinds(),
            vec![ErrorKind::DestinationFatal, ErrorKind::DestinationTransient]
        );
        assert_eq!(err.kind(), ErrorKind::DestinationFatal);
    }

    #[test]
    fn source_is_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = StrataError::from((ErrorKind::IoError, "Write failed")).with_source(io);
        assert!(error::Error::source(&err).is_some());
    }
}
