//! Error taxonomy for RAGVersion.
//!
//! Every fallible operation in the workspace returns [`Result`]. Backend
//! failures (SQL, HTTP, compression) are folded into [`Error::Storage`] at the
//! store boundary so callers never match on driver-specific error types.
//!
//! Each variant maps to an [`ErrorCategory`], which is what batch runs record
//! for failed files alongside the underlying cause's type name.

use std::path::PathBuf;

use thiserror::Error;

/// Boxed cause carried by wrapping variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for RAGVersion operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Content extraction failed for a file.
    #[error("failed to parse {}: {source}", path.display())]
    Parsing {
        path: PathBuf,
        cause_type: String,
        #[source]
        source: BoxError,
    },

    /// File exceeds the configured size ceiling.
    #[error("{} is {size} bytes, exceeding the {limit} byte limit", path.display())]
    ContentTooLarge { path: PathBuf, size: u64, limit: u64 },

    /// A storage backend operation failed.
    #[error("storage error: {message}")]
    Storage {
        message: String,
        cause_type: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("version {version_number} not found for document {document_id}")]
    VersionNotFound {
        document_id: String,
        version_number: i64,
    },

    /// The version exists but its content blob was never stored or was purged.
    #[error("no stored content for version {version_number} of document {document_id}")]
    ContentMissing {
        document_id: String,
        version_number: i64,
    },

    /// Invalid settings or missing credentials.
    #[error("config error: {0}")]
    Configuration(String),

    /// Filesystem failure outside of content extraction.
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{message}")]
    Other { message: String, cause_type: String },
}

/// Coarse classification recorded for failed files in a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Parsing,
    SizeLimit,
    Storage,
    NotFound,
    Configuration,
    Io,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Parsing => "parsing",
            ErrorCategory::SizeLimit => "size_limit",
            ErrorCategory::Storage => "storage",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Io => "io",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Wrap an extraction failure for `path`.
    pub fn parsing<E>(path: impl Into<PathBuf>, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Parsing {
            path: path.into(),
            cause_type: short_type_name::<E>(),
            source: Box::new(err),
        }
    }

    /// Wrap a backend failure with a message describing the operation.
    pub fn storage<E>(message: impl Into<String>, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Storage {
            message: format!("{}: {}", message.into(), err),
            cause_type: short_type_name::<E>(),
            source: Some(Box::new(err)),
        }
    }

    /// A storage failure with no underlying error value (bad response shape,
    /// constraint violated in the in-memory backend, and so on).
    pub fn storage_msg(message: impl Into<String>) -> Self {
        Error::Storage {
            message: message.into(),
            cause_type: "StorageError".to_string(),
            source: None,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn other<E>(err: E) -> Self
    where
        E: std::fmt::Display,
    {
        Error::Other {
            message: err.to_string(),
            cause_type: short_type_name::<E>(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Parsing { .. } => ErrorCategory::Parsing,
            Error::ContentTooLarge { .. } => ErrorCategory::SizeLimit,
            Error::Storage { .. } => ErrorCategory::Storage,
            Error::DocumentNotFound(_)
            | Error::VersionNotFound { .. }
            | Error::ContentMissing { .. } => ErrorCategory::NotFound,
            Error::Configuration(_) => ErrorCategory::Configuration,
            Error::Io { .. } => ErrorCategory::Io,
            Error::Other { .. } => ErrorCategory::Unknown,
        }
    }

    /// Type name of the underlying cause, or of the variant itself when the
    /// error originated here.
    pub fn cause_type(&self) -> String {
        match self {
            Error::Parsing { cause_type, .. }
            | Error::Storage { cause_type, .. }
            | Error::Other { cause_type, .. } => cause_type.clone(),
            Error::ContentTooLarge { .. } => "ContentTooLarge".to_string(),
            Error::DocumentNotFound(_) => "DocumentNotFound".to_string(),
            Error::VersionNotFound { .. } => "VersionNotFound".to_string(),
            Error::ContentMissing { .. } => "ContentMissing".to_string(),
            Error::Configuration(_) => "Configuration".to_string(),
            Error::Io { source, .. } => format!("io::Error({:?})", source.kind()),
        }
    }
}

/// Last path segment of a type name, keeping generic arguments intact:
/// `sqlx_core::error::Error` becomes `Error`.
pub fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    let short = base.rsplit("::").next().unwrap_or(base);
    format!("{}{}", short, &full[base.len()..])
}

/// Result type alias for RAGVersion operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Map any backend error into [`Error::Storage`] with a short description.
pub trait StorageResultExt<T> {
    fn storage_context(self, message: &str) -> Result<T>;
}

impl<T, E> StorageResultExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn storage_context(self, message: &str) -> Result<T> {
        self.map_err(|e| Error::storage(message, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsing_error_carries_cause_type() {
        let io_err = std::io::Error::new(std::io::ErrorKind::InvalidData, "bad utf-8");
        let err = Error::parsing("/tmp/a.pdf", io_err);
        assert_eq!(err.category(), ErrorCategory::Parsing);
        assert_eq!(err.cause_type(), "Error");
        assert!(err.to_string().contains("/tmp/a.pdf"));
        assert!(err.to_string().contains("bad utf-8"));
    }

    #[test]
    fn test_size_limit_category() {
        let err = Error::ContentTooLarge {
            path: PathBuf::from("big.txt"),
            size: 2048,
            limit: 1024,
        };
        assert_eq!(err.category().as_str(), "size_limit");
        assert_eq!(
            err.to_string(),
            "big.txt is 2048 bytes, exceeding the 1024 byte limit"
        );
    }

    #[test]
    fn test_storage_context_wraps_error() {
        let res: std::result::Result<(), std::fmt::Error> = Err(std::fmt::Error);
        let err = res.storage_context("insert document").unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Storage);
        assert!(err.to_string().starts_with("storage error: insert document"));
        assert_eq!(err.cause_type(), "Error");
    }

    #[test]
    fn test_not_found_variants_share_category() {
        let a = Error::DocumentNotFound("d1".into());
        let b = Error::VersionNotFound {
            document_id: "d1".into(),
            version_number: 3,
        };
        let c = Error::ContentMissing {
            document_id: "d1".into(),
            version_number: 3,
        };
        assert_eq!(a.category(), ErrorCategory::NotFound);
        assert_eq!(b.category(), ErrorCategory::NotFound);
        assert_eq!(c.category(), ErrorCategory::NotFound);
        assert_eq!(b.to_string(), "version 3 not found for document d1");
    }

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name::<std::io::Error>(), "Error");
        assert_eq!(short_type_name::<String>(), "String");
        assert_eq!(short_type_name::<Vec<u8>>(), "Vec<u8>");
    }

    #[test]
    fn test_other_display() {
        let err = Error::other("unexpected condition");
        assert_eq!(err.to_string(), "unexpected condition");
        assert_eq!(err.category(), ErrorCategory::Unknown);
    }
}
