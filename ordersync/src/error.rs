//! Error types and result definitions for synchronization operations.
//!
//! Provides an error system with classification and aggregation for the sync engine.
//! [`SyncError`] represents either a single classified failure with captured callsite
//! metadata, or multiple aggregated failures collected from concurrent workers.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for sync operations using [`SyncError`] as the error type.
pub type SyncResult<T> = Result<T, SyncError>;

/// Detailed payload stored for single [`SyncError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for sync operations.
#[derive(Debug, Clone)]
pub struct SyncError {
    repr: ErrorRepr,
}

/// Internal representation of error data.
#[derive(Debug, Clone)]
enum ErrorRepr {
    /// Single error payload holding rich metadata.
    Single(ErrorPayload),
    /// Multiple aggregated errors, mainly used to capture multiple worker failures.
    Many {
        errors: Vec<SyncError>,
        location: &'static Location<'static>,
    },
}

/// Specific categories of errors that can occur during synchronization.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Feed errors
    FeedRequestFailed,
    FeedUnavailable,
    FeedRateSuspended,

    // Data errors
    InvalidData,
    DeserializationError,
    SerializationError,

    // Store errors
    StoreReadFailed,
    StoreWriteFailed,

    // Cache errors
    CacheReadFailed,
    CacheWriteFailed,

    // Configuration errors
    ConfigError,

    // State & workflow errors
    InvalidState,
    RegionSyncWorkerPanic,

    // IO errors
    IoError,

    // Unknown / uncategorized
    Unknown,
}

impl SyncError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For aggregated errors, returns the kind of the first error or
    /// [`ErrorKind::Unknown`] if the error list is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => errors
                .iter()
                .flat_map(|err| err.kinds())
                .collect::<Vec<_>>(),
        }
    }

    /// Returns the detailed error information if available.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches an originating [`error::Error`] to this error and returns the modified
    /// instance.
    ///
    /// Has no effect on aggregated errors, which forward the first contained error as
    /// their source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    /// Creates a [`SyncError`] from its components.
    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        let location = Location::caller();
        let backtrace = Arc::new(Backtrace::capture());

        SyncError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location,
                backtrace,
            }),
        }
    }
}

impl PartialEq for SyncError {
    fn eq(&self, other: &SyncError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (
                ErrorRepr::Many {
                    errors: errors_a, ..
                },
                ErrorRepr::Many {
                    errors: errors_b, ..
                },
            ) => {
                errors_a.len() == errors_b.len()
                    && errors_a.iter().zip(errors_b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if let Some(detail) = payload.detail.as_deref() {
                    write!(f, "\n  Detail: {detail}")?;
                }

                let rendered_backtrace = format!("{}", payload.backtrace);
                if !rendered_backtrace.trim().is_empty() {
                    write!(f, "\n  Backtrace:")?;
                    for line in rendered_backtrace.lines() {
                        write!(f, "\n    {line}")?;
                    }
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = format!("{error}");
                    for (line_index, line) in rendered.lines().enumerate() {
                        if line_index == 0 {
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

impl error::Error for SyncError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source as &(dyn error::Error + 'static)),
            // For aggregated errors, we forward the first contained error as the source.
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

/// Creates a [`SyncError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for SyncError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> SyncError {
        SyncError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`SyncError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for SyncError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> SyncError {
        SyncError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Creates a [`SyncError`] from a vector of errors for aggregation.
///
/// If the vector contains exactly one error, returns that error directly without
/// wrapping it in the aggregated variant.
impl<E> From<Vec<E>> for SyncError
where
    E: Into<SyncError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> SyncError {
        let location = Location::caller();

        let mut errors: Vec<SyncError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1 {
            return errors.pop().expect("just checked length is 1");
        }

        SyncError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

/// Converts [`std::io::Error`] to [`SyncError`] with [`ErrorKind::IoError`].
impl From<std::io::Error> for SyncError {
    #[track_caller]
    fn from(err: std::io::Error) -> SyncError {
        let detail = err.to_string();
        let source = Arc::new(err);
        SyncError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

/// Converts [`serde_json::Error`] to [`SyncError`] with the appropriate error kind.
impl From<serde_json::Error> for SyncError {
    #[track_caller]
    fn from(err: serde_json::Error) -> SyncError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            _ => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        let detail = err.to_string();
        let source = Arc::new(err);
        SyncError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

/// Converts [`reqwest::Error`] to [`SyncError`] with the appropriate error kind.
impl From<reqwest::Error> for SyncError {
    #[track_caller]
    fn from(err: reqwest::Error) -> SyncError {
        let (kind, description) = if err.is_decode() {
            (ErrorKind::InvalidData, "Feed payload could not be decoded")
        } else {
            (ErrorKind::FeedRequestFailed, "Feed HTTP request failed")
        };

        let detail = err.to_string();
        let source = Arc::new(err);
        SyncError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}
