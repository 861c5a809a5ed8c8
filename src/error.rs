//! Error types for grid construction and queries

use std::fmt;

use crate::coord::Coordinate;

/// Main error type for grid operations
#[derive(Debug)]
pub enum Error {
    /// Latitude or longitude outside the fixed-point legal range
    InvalidCoordinate(Coordinate),

    /// File I/O error
    Io(std::io::Error),

    /// Malformed RAM index or bucket file
    Corrupt(String),

    /// No candidate edge in the neighborhood of the query point
    NoNearestFound,

    /// `build` already ran on this writer
    AlreadyBuilt,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidCoordinate(coord) => {
                write!(
                    f,
                    "coordinate ({}, {}) is outside the legal lat/lon range",
                    coord.lat, coord.lon
                )
            }
            Error::Io(err) => {
                write!(f, "I/O error: {err}")
            }
            Error::Corrupt(msg) => {
                write!(f, "corrupt index: {msg}")
            }
            Error::NoNearestFound => {
                write!(f, "no edge found near the query coordinate")
            }
            Error::AlreadyBuilt => {
                write!(f, "grid writer has already been built")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

/// Convenience result type for grid operations
pub type Result<T> = std::result::Result<T, Error>;
