//! # Linetrack
//!
//! Linetrack feeds the lines of a single file, plain or gzipped, to a processing routine and keeps
//! the offset of the last consumed line in a sidecar state file. A later run, after a restart or a
//! crash, resumes right after that line instead of going through the whole file again. Growing
//! files such as logs can be followed.
//!
//! * `OffsetFile` that stores a byte offset as a decimal number in a state file, replaced as a
//! whole on every write
//!
//! ```rust
//! # use linetrack::OffsetFile;
//! # let dir = tempfile::tempdir()?;
//! let state = OffsetFile::open(dir.path().join("input.log.state"))?;
//! assert_eq!(state.read()?, None);
//! state.write(6)?;
//! assert_eq!(state.read()?, Some(6));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! * `LineSource` that reads lines from a plain or gzipped file starting at some offset, pairing
//! every line with the offset right after it. Offsets of gzipped files refer to decompressed data.
//!
//! ```rust
//! # use linetrack::{ContentMode, LineSource};
//! # let dir = tempfile::tempdir()?;
//! # let path = dir.path().join("input.log");
//! std::fs::write(&path, "a\nb\nc\n")?;
//! let offsets: Vec<u64> = LineSource::open(&path, 2, ContentMode::Raw)?
//!     .map(|record| record.map(|record| record.offset))
//!     .collect::<Result<_, _>>()?;
//! assert_eq!(offsets, vec![4, 6]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! * `StateReader` that hands every line to a `LineProcessor`, isolates failures of single lines
//! and persists its offset in a state file next to the input (`<input>.state` by default).
//!
//! ```rust
//! # use linetrack::{LineContent, StateReader};
//! # let dir = tempfile::tempdir()?;
//! # let path = dir.path().join("input.log");
//! std::fs::write(&path, "a\nb\nc\n")?;
//! let mut lines = vec![];
//! let mut reader = StateReader::builder(&path).build(|line: &LineContent| {
//!     lines.push(line.clone());
//!     Ok::<_, std::io::Error>(())
//! })?;
//! assert_eq!(reader.drain(None)?.offset, 6);
//! # reader.close()?;
//! assert_eq!(std::fs::read_to_string(dir.path().join("input.log.state"))?, "6");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! * `Tail` that follows a growing file, processing appended lines every time its size changes.
//!
//! ```rust no_run
//! # use linetrack::{CancelToken, PrintProcessor, StateReader, Tail, TailConfig};
//! let cancel = CancelToken::new();
//! cancel.register_signals()?;
//! let mut reader = StateReader::builder("/var/log/syslog")
//!     .cancel_token(cancel)
//!     .build(PrintProcessor::stdout())?;
//! // only returns once interrupted, with the offset saved
//! let err = Tail::new(&mut reader, TailConfig::default()).run().unwrap_err();
//! eprintln!("{err}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!

mod cancel;
mod line_source;
mod offset_file;
pub mod path_utils;
mod processor;
mod state_reader;
mod tail;

pub use cancel::CancelToken;
pub use line_source::{ContentMode, Format, LineContent, LineRecord, LineSource, SourceError};
pub use offset_file::{OffsetFile, OffsetFileError};
pub use processor::{LineProcessor, PrintProcessor, ProcessError};
pub use state_reader::{
    DrainSummary, ErrorKind, Policy, StateReader, StateReaderBuilder, StateReaderError,
    PROGRESS_INTERVAL,
};
pub use tail::{PollOutcome, Tail, TailConfig};
