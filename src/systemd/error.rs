//! Lifecycle errors

use std::{fmt, io, path::PathBuf};

use itertools::Itertools as _;

use super::unit::RenderError;

/// Error returned by service lifecycle operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Service manager connection or call failure
    #[error("Service manager error: {0}")]
    Bus(#[from] zbus::Error),
    /// Filesystem error on a unit file or enable link
    #[error("I/O error on {path:?}: {source}")]
    Io {
        /// File that could not be accessed
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },
    /// Unable to locate the executable to reference in the unit
    #[error("Unable to get current executable path: {0}")]
    CurrentExe(io::Error),
    /// Unit text can not be generated from the service identity or arguments
    #[error("Invalid unit content: {0}")]
    Render(#[from] RenderError),
    /// Unit command lines are text, the executable path must be valid UTF-8
    #[error("Executable path {0:?} is not valid UTF-8")]
    NonUtf8ExecPath(PathBuf),
    /// Neither the single instance nor the template unit file exists
    #[error("service is not installed")]
    NotInstalled,
    /// Neither unit file could be removed
    #[error("remove failed")]
    RemoveFailed,
    /// Some units failed, others may have succeeded
    #[error(transparent)]
    Units(UnitErrors),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Per unit failures collected while acting on several units
#[derive(Debug, Default)]
pub struct UnitErrors(Vec<(String, String)>);

impl UnitErrors {
    pub(crate) fn push<E: fmt::Display>(&mut self, unit: &str, err: E) {
        self.0.push((unit.to_owned(), err.to_string()));
    }

    /// Names of the units that failed, in the order they were processed
    pub fn units(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(unit, _)| unit.as_str())
    }

    /// Number of failed units
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no unit failed
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn into_result(self) -> Result<(), Error> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Units(self))
        }
    }
}

impl fmt::Display for UnitErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} unit operation(s) failed: {}",
            self.0.len(),
            self.0
                .iter()
                .map(|(unit, err)| format!("{unit}: {err}"))
                .join("; ")
        )
    }
}

impl std::error::Error for UnitErrors {}
