//! Persistence of resize sessions for crash inspection and follow-up steps.
//!
//! Each session is written as `<state_dir>/<instance_id>.json` after every
//! phase change. Writes go to a temporary file that is renamed into place so a
//! reader never observes a half-written record.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

use crate::resize::ResizeSession;

/// Errors raised while persisting or loading sessions.
#[derive(Debug, Error)]
pub enum SessionStoreError {
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a session cannot be rendered as JSON.
    #[error("failed to serialise session: {message}")]
    Serialize {
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a stored session cannot be parsed.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when an instance identifier cannot be used as a file name.
    #[error("instance id '{instance_id}' cannot be used as a session key")]
    InvalidKey {
        /// Offending identifier.
        instance_id: String,
    },
}

/// Abstraction over session persistence for dependency injection.
pub trait SessionStore {
    /// Persists `session`, replacing any earlier record for the instance.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStoreError`] when the record cannot be written.
    fn save(&self, session: &ResizeSession) -> Result<(), SessionStoreError>;

    /// Loads the latest record for `instance_id`, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStoreError`] when the record cannot be read or
    /// parsed.
    fn load(&self, instance_id: &str) -> Result<Option<ResizeSession>, SessionStoreError>;
}

/// Store that discards every session.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSessionStore;

impl SessionStore for NullSessionStore {
    fn save(&self, _session: &ResizeSession) -> Result<(), SessionStoreError> {
        Ok(())
    }

    fn load(&self, _instance_id: &str) -> Result<Option<ResizeSession>, SessionStoreError> {
        Ok(None)
    }
}

/// Stores sessions as JSON files under a state directory.
#[derive(Clone, Debug)]
pub struct FileSessionStore {
    root: Utf8PathBuf,
}

impl FileSessionStore {
    /// Creates a store rooted at `root`; the directory is created on first
    /// write.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the session files.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Path of the record for `instance_id`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStoreError::InvalidKey`] when the identifier is not a
    /// plain file name component.
    pub fn session_path(&self, instance_id: &str) -> Result<Utf8PathBuf, SessionStoreError> {
        Ok(self.root.join(file_name_for(instance_id)?))
    }

    fn io_error(path: &Utf8Path, err: &io::Error) -> SessionStoreError {
        SessionStoreError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

impl SessionStore for FileSessionStore {
    fn save(&self, session: &ResizeSession) -> Result<(), SessionStoreError> {
        let file_name = file_name_for(session.instance_id())?;
        let temp_name = format!("{file_name}.tmp");

        Dir::create_ambient_dir_all(&self.root, ambient_authority())
            .map_err(|err| Self::io_error(&self.root, &err))?;
        let dir = Dir::open_ambient_dir(&self.root, ambient_authority())
            .map_err(|err| Self::io_error(&self.root, &err))?;

        let rendered =
            serde_json::to_string_pretty(session).map_err(|err| SessionStoreError::Serialize {
                message: err.to_string(),
            })?;

        dir.write(&temp_name, rendered)
            .map_err(|err| Self::io_error(&self.root.join(&temp_name), &err))?;
        dir.rename(&temp_name, &dir, &file_name)
            .map_err(|err| Self::io_error(&self.root.join(&file_name), &err))
    }

    fn load(&self, instance_id: &str) -> Result<Option<ResizeSession>, SessionStoreError> {
        let file_name = file_name_for(instance_id)?;
        let path = self.root.join(&file_name);

        let dir = match Dir::open_ambient_dir(&self.root, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(Self::io_error(&self.root, &err)),
        };

        let contents = match dir.read_to_string(&file_name) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(Self::io_error(&path, &err)),
        };

        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|err| SessionStoreError::Parse {
                path,
                message: err.to_string(),
            })
    }
}

fn file_name_for(instance_id: &str) -> Result<String, SessionStoreError> {
    let valid = !instance_id.is_empty()
        && !instance_id.starts_with('.')
        && instance_id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
    if !valid {
        return Err(SessionStoreError::InvalidKey {
            instance_id: instance_id.to_owned(),
        });
    }
    Ok(format!("{instance_id}.json"))
}
