use std::fmt;
use std::path::PathBuf;

/// broad classification shared by every error in the crate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// caller supplied malformed or out-of-contract input
    Validation,
    /// the underlying read/write/rename failed
    Io,
    /// bytes read from storage violate the format
    Corruption,
    /// cancellation or deadline fired
    Context,
    /// recognized but not implemented
    Unsupported,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Io => "io",
            ErrorKind::Corruption => "corruption",
            ErrorKind::Context => "context",
            ErrorKind::Unsupported => "unsupported",
        };
        f.write_str(name)
    }
}

/// field involved in a failure, the value observed and what was expected
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub field: String,
    pub value: String,
    pub expected: String,
}

impl ErrorContext {
    pub fn new(
        field: impl Into<String>,
        value: impl fmt::Display,
        expected: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            value: value.to_string(),
            expected: expected.into(),
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "field {}: got {}, expected {}",
            self.field, self.value, self.expected
        )
    }
}

/// error type for novuspack operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{message} ({context})")]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("tag already exists: {0}")]
    DuplicateKey(String),

    #[error("tag not found: {0}")]
    TagNotFound(String),

    #[error("tag {key} holds a {stored} value, cannot read it as {requested}")]
    TypeMismatch {
        key: String,
        stored: &'static str,
        requested: &'static str,
    },

    #[error("path metadata not found: {0}")]
    PathNotFound(String),

    #[error("file not found in package: {0}")]
    FileNotFound(String),

    #[error("target already exists and overwrite is off: {0}")]
    TargetExists(PathBuf),

    #[error("corrupt data: {message} ({context})")]
    Corruption {
        message: String,
        context: ErrorContext,
    },

    #[error("parent path cycle detected at {0}")]
    ParentCycle(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("io error on {context}: {source}")]
    Stream {
        context: ErrorContext,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} cancelled")]
    Cancelled { operation: &'static str },

    #[error("{operation} exceeded its deadline")]
    DeadlineExceeded { operation: &'static str },

    #[error("unsupported: {message} ({context})")]
    Unsupported {
        message: String,
        context: ErrorContext,
    },

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

impl Error {
    pub fn validation(message: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: message.into(),
            context,
        }
    }

    pub fn corruption(message: impl Into<String>, context: ErrorContext) -> Self {
        Error::Corruption {
            message: message.into(),
            context,
        }
    }

    pub fn unsupported(message: impl Into<String>, context: ErrorContext) -> Self {
        Error::Unsupported {
            message: message.into(),
            context,
        }
    }

    /// taxonomy bucket for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation { .. }
            | Error::DuplicateKey(_)
            | Error::TagNotFound(_)
            | Error::TypeMismatch { .. }
            | Error::PathNotFound(_)
            | Error::FileNotFound(_)
            | Error::TargetExists(_)
            | Error::Config(_)
            | Error::ConfigSerialize(_) => ErrorKind::Validation,
            Error::Corruption { .. } | Error::ParentCycle(_) => ErrorKind::Corruption,
            Error::Io { .. } | Error::Stream { .. } => ErrorKind::Io,
            Error::Cancelled { .. } | Error::DeadlineExceeded { .. } => ErrorKind::Context,
            Error::Unsupported { .. } => ErrorKind::Unsupported,
        }
    }

    /// structured context, when the error names a field
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Validation { context, .. }
            | Error::Corruption { context, .. }
            | Error::Unsupported { context, .. }
            | Error::Stream { context, .. } => Some(context),
            _ => None,
        }
    }

    /// attach field context unless the error already carries some
    pub fn annotate(self, context: ErrorContext) -> Self {
        match self {
            Error::Io { source, .. } => Error::Stream { context, source },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// helpers to wrap io errors with path or field context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
    fn with_field(self, field: &str, expected: &str) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }

    fn with_field(self, field: &str, expected: &str) -> Result<T> {
        self.map_err(|source| Error::Stream {
            context: ErrorContext::new(field, source.kind(), expected),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        let ctx = ErrorContext::new("SignatureType", 0, "non-zero value");
        assert_eq!(
            Error::validation("bad", ctx.clone()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(Error::corruption("bad", ctx).kind(), ErrorKind::Corruption);
        assert_eq!(Error::DuplicateKey("k".into()).kind(), ErrorKind::Validation);
        assert_eq!(Error::ParentCycle("/a/".into()).kind(), ErrorKind::Corruption);
        assert_eq!(
            Error::Cancelled { operation: "write" }.kind(),
            ErrorKind::Context
        );
        let err = Error::unsupported("compressed data", ErrorContext::new("CompressionType", 2, "0"))
            .annotate(ErrorContext::new("Other", 0, "0"));
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert_eq!(err.context().unwrap().field, "CompressionType");
    }

    #[test]
    fn test_context_fields() {
        let err = Error::corruption(
            "truncated payload",
            ErrorContext::new("SignatureData", 3, "10 bytes"),
        );
        let ctx = err.context().unwrap();
        assert_eq!(ctx.field, "SignatureData");
        assert_eq!(ctx.value, "3");
        assert_eq!(ctx.expected, "10 bytes");
        assert!(err.to_string().contains("SignatureData"));
    }

    #[test]
    fn test_annotate_keeps_existing_context() {
        let original = ErrorContext::new("CommentLength", 4, "2");
        let err = Error::validation("mismatch", original.clone())
            .annotate(ErrorContext::new("Other", 0, "0"));
        assert_eq!(err.context(), Some(&original));
    }

    #[test]
    fn test_io_with_field() {
        let res: std::io::Result<()> = Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        let err = res.with_field("Header", "112 bytes").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.context().unwrap().field, "Header");
    }
}
