use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::path_utils;

/// Possible errors that could happen while working with the state file
#[derive(Error, Debug)]
pub enum OffsetFileError {
    #[error("cannot write to state file {path}")]
    Unwritable {
        path: PathBuf,
        #[source]
        source: Option<io::Error>,
    },

    #[error("state file {path} does not contain an offset: `{content}`")]
    Corrupt { path: PathBuf, content: String },

    #[error("while reading state file {path}")]
    IO {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Sidecar file holding the last known-good offset as a decimal number.
///
/// Every write replaces the whole file: the new content goes to a temporary file next to the
/// state file which is then renamed over it, so a reader sees either the old or the new offset.
/// There is no locking, two processes sharing a state file will overwrite each other.
///
/// ```rust no_run
/// # use linetrack::OffsetFile;
/// let state = OffsetFile::open("/var/log/app.log.state")?;
/// let offset = state.read()?.unwrap_or_default();
/// state.write(offset + 42)?;
/// # Ok::<(), linetrack::OffsetFileError>(())
/// ```
#[derive(Debug, Clone)]
pub struct OffsetFile {
    path: PathBuf,
}

impl OffsetFile {
    /// Wrap `path` after verifying that it can be written: its parent directory, which has to
    /// accept the temporary file and the rename, and the file itself if it exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, OffsetFileError> {
        let path = path.as_ref().to_path_buf();
        if !path_utils::has_write_permission(&path) {
            return Err(OffsetFileError::Unwritable { path, source: None });
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored offset. A missing file means no offset is known yet and gives `None`.
    pub fn read(&self) -> Result<Option<u64>, OffsetFileError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(OffsetFileError::IO {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        parse_offset(&content)
            .map(Some)
            .ok_or_else(|| OffsetFileError::Corrupt {
                path: self.path.clone(),
                content,
            })
    }

    /// Replace the file content with `offset`.
    pub fn write(&self, offset: u64) -> Result<(), OffsetFileError> {
        self.write_atomically(offset)
            .map_err(|source| OffsetFileError::Unwritable {
                path: self.path.clone(),
                source: Some(source),
            })
    }

    fn write_atomically(&self, offset: u64) -> io::Result<()> {
        let temp_path = path_utils::append_extension(
            self.path.clone(),
            format!("tmp.{}", std::process::id()),
        );
        let mut file = File::create(&temp_path)?;
        let written = file
            .write_all(offset.to_string().as_bytes())
            .and_then(|_| file.sync_all())
            .and_then(|_| fs::rename(&temp_path, &self.path));
        if written.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        written
    }
}

fn parse_offset(content: &str) -> Option<u64> {
    content.trim().parse().ok()
}
