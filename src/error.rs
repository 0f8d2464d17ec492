use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// AtlasDB errors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// Invalid on-disk data: malformed map entries, unknown reserved flags,
    /// missing dependence files, checksum mismatches.
    Corruption(String),
    /// An IO error.
    IO(String),
    /// A cache-only read could not find the table. The caller may treat the
    /// key as "may exist".
    Incomplete(String),
    /// The configured space quota was exceeded after an output file was
    /// written.
    SpaceLimit(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Corruption(msg) => write!(f, "corruption: {msg}"),
            Error::IO(msg) => write!(f, "io error: {msg}"),
            Error::Incomplete(msg) => write!(f, "incomplete: {msg}"),
            Error::SpaceLimit(msg) => write!(f, "space limit: {msg}"),
        }
    }
}

/// Constructs an Error::Corruption for the given format string.
#[macro_export]
macro_rules! corruption {
    ($($args:tt)*) => { $crate::error::Error::Corruption(format!($($args)*)) };
}

/// An AtlasDB Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl<T> From<Error> for Result<T> {
    fn from(error: Error) -> Self {
        Err(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::IO(err.to_string())
    }
}

impl Error {
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Error::Incomplete(_))
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            Error::Corruption("bad entry".to_string()).to_string(),
            "corruption: bad entry"
        );
        assert_eq!(
            Error::Incomplete("table not cached".to_string()).to_string(),
            "incomplete: table not cached"
        );
    }

    #[test]
    fn test_corruption_macro() {
        let err: Error = corruption!("entry {} truncated", 7);
        assert_eq!(err, Error::Corruption("entry 7 truncated".to_string()));
        assert!(err.is_corruption());
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::IO(_)));
    }
}
