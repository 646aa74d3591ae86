use std::fmt::{Display, Formatter};

/// Failure kinds shared by every layer of the copy tool.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum DbcopyError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Precondition(String),
    #[error("integrity mismatch: {0}")]
    IntegrityMismatch(String),
    #[error("database error: {0}")]
    Db(String),
    #[error("i/o error: {0}")]
    Io(String),
    #[error("syntax error: {0}")]
    Syntax(String),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Precondition,
    IntegrityMismatch,
    Db,
    Io,
    Syntax,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::NotFound => "not_found",
            Self::Precondition => "precondition",
            Self::IntegrityMismatch => "integrity_mismatch",
            Self::Db => "db",
            Self::Io => "io",
            Self::Syntax => "syntax",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DbcopyError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Precondition(_) => ErrorKind::Precondition,
            Self::IntegrityMismatch(_) => ErrorKind::IntegrityMismatch,
            Self::Db(_) => ErrorKind::Db,
            Self::Io(_) => ErrorKind::Io,
            Self::Syntax(_) => ErrorKind::Syntax,
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::IntegrityMismatch(msg.into())
    }

    pub fn syntax(msg: impl Into<String>) -> Self {
        Self::Syntax(msg.into())
    }
}

impl From<std::io::Error> for DbcopyError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Find the error kind of a boxed error chain.
///
/// A [`DbcopyError`] anywhere in the chain decides the kind; otherwise
/// i/o errors map to [`ErrorKind::Io`] and everything else is treated as a
/// driver failure.
#[must_use]
pub fn classify(err: &(dyn std::error::Error + 'static)) -> ErrorKind {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    let mut saw_io = false;
    while let Some(cause) = current {
        if let Some(own) = cause.downcast_ref::<DbcopyError>() {
            return own.kind();
        }
        if cause.downcast_ref::<std::io::Error>().is_some() {
            saw_io = true;
        }
        current = cause.source();
    }
    if saw_io {
        ErrorKind::Io
    } else {
        ErrorKind::Db
    }
}

pub type Result<T, E = DbcopyError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("outer: {source}")]
    struct Outer {
        #[source]
        source: DbcopyError,
    }

    #[test]
    fn classify_finds_kind_inside_chain() {
        let err = Outer { source: DbcopyError::precondition("model run not completed") };
        assert_eq!(classify(&err), ErrorKind::Precondition);
    }

    #[test]
    fn classify_maps_io_errors() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(classify(&err), ErrorKind::Io);
    }

    #[test]
    fn precondition_message_is_verbatim() {
        let err = DbcopyError::precondition("model run not completed");
        assert_eq!(err.to_string(), "model run not completed");
        assert_eq!(err.kind().as_str(), "precondition");
    }
}
