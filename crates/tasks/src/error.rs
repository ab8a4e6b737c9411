use std::path::PathBuf;

use library::LibraryError;

#[derive(Debug)]
pub enum TaskError {
    AlreadyImporting,
    Io(std::io::Error),
    Plist(plist::Error),
    InvalidItunesLibrary(PathBuf),
    Library(LibraryError),
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskError::AlreadyImporting => write!(f, "there is already an import task running"),
            TaskError::Io(err) => write!(f, "io error: {}", err),
            TaskError::Plist(err) => write!(f, "plist error: {}", err),
            TaskError::InvalidItunesLibrary(path) => {
                write!(f, "{:?} is not an iTunes library file", path)
            }
            TaskError::Library(err) => write!(f, "library error: {}", err),
        }
    }
}

impl std::error::Error for TaskError {}

impl From<std::io::Error> for TaskError {
    fn from(err: std::io::Error) -> Self {
        TaskError::Io(err)
    }
}

impl From<plist::Error> for TaskError {
    fn from(err: plist::Error) -> Self {
        TaskError::Plist(err)
    }
}

impl From<LibraryError> for TaskError {
    fn from(err: LibraryError) -> Self {
        TaskError::Library(err)
    }
}
