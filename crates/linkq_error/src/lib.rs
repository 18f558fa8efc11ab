//! Error type shared by every linkq crate.
//!
//! Errors carry a message, a kind used to tag the error when it crosses the
//! query boundary, and optional key/value fields for additional context.
use std::borrow::Cow;
use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};

pub type Result<T, E = DbError> = std::result::Result<T, E>;

/// Broad classification of an error.
///
/// The kind determines the portable type name used when an error is
/// transported as a value through a result channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Unclassified internal error.
    Internal,
    /// Query tree could not be translated (unsupported node, unresolvable
    /// type, non-transportable value).
    Translation,
    /// A dynamic object couldn't be coerced into the requested type.
    Mapping,
    /// An operator was invoked in a state it doesn't support, e.g. `single`
    /// over an empty sequence.
    InvalidOperation,
    /// Member access on a null value.
    NullReference,
    /// Integer division by zero.
    DivideByZero,
    /// Checked arithmetic overflowed.
    Overflow,
    /// Generic failure while executing a query.
    Execution,
    /// Execution was cancelled by the caller.
    Cancelled,
    /// Error received from the other side of the query boundary.
    Remote { type_name: String },
}

impl ErrorKind {
    /// Portable name for this kind of error.
    pub fn type_name(&self) -> &str {
        match self {
            Self::Internal => "Internal",
            Self::Translation => "Translation",
            Self::Mapping => "Mapping",
            Self::InvalidOperation => "InvalidOperation",
            Self::NullReference => "NullReference",
            Self::DivideByZero => "DivideByZero",
            Self::Overflow => "Overflow",
            Self::Execution => "Execution",
            Self::Cancelled => "Cancelled",
            Self::Remote { type_name } => type_name,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

#[derive(Debug)]
pub struct DbError {
    inner: Box<DbErrorInner>,
}

#[derive(Debug)]
struct DbErrorInner {
    msg: String,
    kind: ErrorKind,
    fields: Vec<(Cow<'static, str>, String)>,
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl DbError {
    pub fn new(msg: impl Into<String>) -> Self {
        DbError {
            inner: Box::new(DbErrorInner {
                msg: msg.into(),
                kind: ErrorKind::Internal,
                fields: Vec::new(),
                source: None,
            }),
        }
    }

    pub fn with_source(msg: impl Into<String>, source: Box<dyn Error + Send + Sync>) -> Self {
        let mut err = Self::new(msg);
        err.inner.source = Some(source);
        err
    }

    pub fn translation(msg: impl Into<String>) -> Self {
        Self::new(msg).with_kind(ErrorKind::Translation)
    }

    pub fn mapping(msg: impl Into<String>) -> Self {
        Self::new(msg).with_kind(ErrorKind::Mapping)
    }

    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::new(msg).with_kind(ErrorKind::InvalidOperation)
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::new(msg).with_kind(ErrorKind::Execution)
    }

    pub fn cancelled() -> Self {
        Self::new("query was cancelled").with_kind(ErrorKind::Cancelled)
    }

    /// Recreate an error received from the other side of the boundary.
    ///
    /// The message is kept verbatim so standard operator messages survive the
    /// round trip.
    pub fn remote(type_name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(msg).with_kind(ErrorKind::Remote {
            type_name: type_name.into(),
        })
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.inner.kind = kind;
        self
    }

    pub fn with_field<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<Cow<'static, str>>,
        V: fmt::Display,
    {
        self.inner.fields.push((key.into(), value.to_string()));
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.inner.kind
    }

    pub fn type_name(&self) -> &str {
        self.inner.kind.type_name()
    }

    /// The bare message without fields or source.
    pub fn message(&self) -> &str {
        &self.inner.msg
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner
            .fields
            .iter()
            .map(|(k, v)| (k.as_ref(), v.as_str()))
    }

    pub fn get_field(&self, key: &str) -> Option<&str> {
        self.fields().find(|(k, _)| *k == key).map(|(_, v)| v)
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.msg)?;
        for (key, value) in &self.inner.fields {
            write!(f, "\n  {key}: {value}")?;
        }
        if let Some(source) = &self.inner.source {
            write!(f, "\nError source: {source}")?;
        }
        Ok(())
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner
            .source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

impl From<std::fmt::Error> for DbError {
    fn from(value: std::fmt::Error) -> Self {
        DbError::with_source("Format error", Box::new(value))
    }
}

/// Extension for wrapping foreign errors with a message.
pub trait ResultExt<T, E> {
    fn context(self, msg: &'static str) -> Result<T>;
    fn context_fn<F: Fn() -> String>(self, f: F) -> Result<T>;
}

impl<T, E> ResultExt<T, E> for std::result::Result<T, E>
where
    E: Error + Send + Sync + 'static,
{
    fn context(self, msg: &'static str) -> Result<T> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(DbError::with_source(msg, Box::new(e))),
        }
    }

    fn context_fn<F: Fn() -> String>(self, f: F) -> Result<T> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(DbError::with_source(f(), Box::new(e))),
        }
    }
}

pub trait OptionExt<T> {
    /// Return an error if the option is None.
    fn required(self, field: &'static str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn required(self, field: &'static str) -> Result<T> {
        match self {
            Some(v) => Ok(v),
            None => Err(DbError::new(format!("Missing required field: {field}"))),
        }
    }
}

/// Return early with a "not implemented" error.
#[macro_export]
macro_rules! not_implemented {
    ($($arg:tt)*) => {
        return Err($crate::DbError::new(format!("Not yet implemented: {}", format!($($arg)*))))
    };
}
