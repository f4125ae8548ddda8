use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error, info, Span};

use crate::{
    path_utils, CancelToken, ContentMode, Format, LineProcessor, LineRecord, LineSource,
    OffsetFile, OffsetFileError, SourceError,
};

/// Number of successfully processed lines between two progress events
pub const PROGRESS_INTERVAL: u64 = 100_000;

/// Possible errors that could happen while working with `StateReader`
#[derive(Error, Debug)]
pub enum StateReaderError {
    #[error("{0} is not a file")]
    InputNotFound(PathBuf),

    #[error("{0} is not a real gzip file")]
    NotAGzip(PathBuf),

    #[error("while working with persistent state storage")]
    StateFile(#[from] OffsetFileError),

    #[error("while reading {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("interrupted at offset {offset}")]
    Cancelled { offset: u64 },
}

impl From<SourceError> for StateReaderError {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::InputNotFound(path) => StateReaderError::InputNotFound(path),
            SourceError::NotAGzip(path) => StateReaderError::NotAGzip(path),
            SourceError::IO { path, source } => StateReaderError::Read { path, source },
            SourceError::Cancelled { offset, .. } => StateReaderError::Cancelled { offset },
        }
    }
}

/// Category of a failure, used to look up how it is handled.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    InputNotFound,
    NotAGzip,
    StateFileUnwritable,
    StateFileCorrupt,
    /// The line processor rejected a line
    Processing,
    /// I/O failure while reading the input or the state file
    Read,
    Cancelled,
}

/// What happens when an error of some `ErrorKind` occurs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Policy {
    /// Stop, the reader cannot continue
    Fatal,
    /// Log it, save the offset and go on with the next line
    LogAndContinue,
    /// Save the offset and stop with a failure status
    Shutdown,
}

impl ErrorKind {
    pub fn policy(self) -> Policy {
        match self {
            ErrorKind::InputNotFound
            | ErrorKind::NotAGzip
            | ErrorKind::StateFileUnwritable
            | ErrorKind::StateFileCorrupt
            | ErrorKind::Read => Policy::Fatal,
            ErrorKind::Processing => Policy::LogAndContinue,
            ErrorKind::Cancelled => Policy::Shutdown,
        }
    }
}

impl StateReaderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StateReaderError::InputNotFound(_) => ErrorKind::InputNotFound,
            StateReaderError::NotAGzip(_) => ErrorKind::NotAGzip,
            StateReaderError::StateFile(OffsetFileError::Unwritable { .. }) => {
                ErrorKind::StateFileUnwritable
            }
            StateReaderError::StateFile(OffsetFileError::Corrupt { .. }) => {
                ErrorKind::StateFileCorrupt
            }
            StateReaderError::StateFile(OffsetFileError::IO { .. })
            | StateReaderError::Read { .. } => ErrorKind::Read,
            StateReaderError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }
}

/// Outcome of one drain pass
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Lines pulled from the source, whether processing them succeeded or not
    pub records: u64,
    /// Lines the processor failed on
    pub failed: u64,
    /// Offset persisted at the end of the pass
    pub offset: u64,
}

/// Settings for a `StateReader`, see `StateReader::builder`.
pub struct StateReaderBuilder {
    path: PathBuf,
    start_offset: Option<u64>,
    state_file: Option<PathBuf>,
    mode: ContentMode,
    cancel: Option<CancelToken>,
    span: Option<Span>,
    progress_interval: u64,
}

impl StateReaderBuilder {
    /// Start at `offset` instead of the stored one. The state file is not read in that case.
    pub fn start_offset(mut self, offset: u64) -> Self {
        self.start_offset = Some(offset);
        self
    }

    /// Keep state in `path` rather than next to the input file.
    pub fn state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_file = Some(path.into());
        self
    }

    pub fn content_mode(mut self, mode: ContentMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Successfully processed lines between two progress events, [`PROGRESS_INTERVAL`] unless
    /// set. Zero turns progress events off.
    pub fn progress_interval(mut self, lines: u64) -> Self {
        self.progress_interval = lines;
        self
    }

    /// Span every event of the reader is recorded in. Defaults to a `state_reader` span carrying
    /// the input path.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Validate the input and the state file and load the starting offset.
    pub fn build<P: LineProcessor>(
        self,
        processor: P,
    ) -> Result<StateReader<P>, StateReaderError> {
        let span = self
            .span
            .unwrap_or_else(|| tracing::info_span!("state_reader", path = %self.path.display()));
        let _entered = span.enter();

        if !self.path.is_file() {
            return Err(StateReaderError::InputNotFound(self.path));
        }
        let state_path = match self.state_file {
            Some(path) => path,
            None => path_utils::default_state_path(&self.path).map_err(|source| {
                StateReaderError::Read {
                    path: self.path.clone(),
                    source,
                }
            })?,
        };
        let state = OffsetFile::open(state_path)?;
        let offset = match self.start_offset {
            Some(offset) => offset,
            None => state.read()?.unwrap_or_default(),
        };
        let format = Format::detect(&self.path)?;
        debug!(?format, offset, state_file = %state.path().display(), "reader ready");

        drop(_entered);
        Ok(StateReader {
            path: self.path,
            format,
            mode: self.mode,
            state,
            offset,
            lines_processed: 0,
            source: None,
            processor,
            cancel: self.cancel.unwrap_or_default(),
            span,
            progress_interval: self.progress_interval,
            already_freed: false,
        })
    }
}

/// Feeds the lines of a file to a `LineProcessor`, keeping the offset of the last consumed line
/// in a state file so that a later run resumes after it.
///
/// ## Usage
///
/// ```rust no_run
/// # use linetrack::{LineContent, StateReader, StateReaderError};
/// let mut reader = StateReader::builder("/var/log/app.log").build(|line: &LineContent| {
///     println!("{}", String::from_utf8_lossy(line.as_bytes()).trim_end());
///     Ok::<_, std::io::Error>(())
/// })?;
/// let summary = reader.drain(None)?;
/// println!("{} lines, now at {}", summary.records, summary.offset);
/// # Ok::<(), StateReaderError>(())
/// ```
///
/// ## Offset semantics
///
/// The in-memory offset moves to the end of a line before the processor sees it. A line whose
/// processing fails is therefore consumed all the same and will not be delivered again by a
/// later run: after a failure the offset is persisted right away and reading goes on. Only the
/// offset bookkeeping is guaranteed, delivery is at most once.
///
/// The offset is persisted when the processor fails, at the end of every drain pass, on
/// cancellation, on `close` and, as a last resort, on drop.
pub struct StateReader<P> {
    path: PathBuf,
    format: Format,
    mode: ContentMode,
    state: OffsetFile,
    offset: u64,
    lines_processed: u64,
    source: Option<LineSource>,
    processor: P,
    cancel: CancelToken,
    span: Span,
    progress_interval: u64,
    already_freed: bool,
}

impl StateReader<()> {
    /// Start configuring a reader for the file at `path`.
    pub fn builder(path: impl AsRef<Path>) -> StateReaderBuilder {
        StateReaderBuilder {
            path: path.as_ref().to_path_buf(),
            start_offset: None,
            state_file: None,
            mode: ContentMode::default(),
            cancel: None,
            span: None,
            progress_interval: PROGRESS_INTERVAL,
        }
    }
}

impl<P: LineProcessor> StateReader<P> {
    /// Process a single line.
    ///
    /// Returns whether a line was read and processed successfully; the offset is persisted only
    /// in that case. Failures are logged and never returned.
    pub fn process_one_line(&mut self) -> bool {
        let _entered = self.span.clone().entered();
        let record = match self.next_record() {
            Ok(Some(record)) => record,
            Ok(None) => return false,
            Err(e) => {
                error!(error = %e, offset = self.offset, "failed to read line");
                return false;
            }
        };
        self.offset = record.offset;
        if let Err(e) = self.processor.process(&record.content) {
            error!(error = %e, offset = self.offset, "failed to process line");
            return false;
        }
        self.lines_processed += 1;
        match self.state.write(self.offset) {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "failed to persist offset");
                false
            }
        }
    }

    /// Process lines until the end of the file or until `limit` lines were read in this pass.
    ///
    /// A failing line is logged, the offset saved, and processing continues with the next one.
    /// Returns `Cancelled` once the cancel token is set, after saving the offset.
    pub fn drain(&mut self, limit: Option<u64>) -> Result<DrainSummary, StateReaderError> {
        let _entered = self.span.clone().entered();
        let mut summary = DrainSummary::default();
        loop {
            if limit.is_some_and(|limit| summary.records >= limit) {
                break;
            }
            if self.cancel.is_cancelled() {
                return Err(self.interrupted());
            }
            let record = match self.next_record() {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(SourceError::Cancelled { .. }) => return Err(self.interrupted()),
                Err(e) => {
                    self.persist_or_log();
                    return Err(e.into());
                }
            };
            summary.records += 1;
            self.offset = record.offset;
            match self.processor.process(&record.content) {
                Ok(()) => {
                    self.lines_processed += 1;
                    if self.progress_interval != 0
                        && self.lines_processed % self.progress_interval == 0
                    {
                        info!(
                            lines = self.lines_processed,
                            offset = self.offset,
                            "processed lines"
                        );
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(error = %e, offset = self.offset, "failed to process line");
                    self.persist()?;
                }
            }
        }
        self.persist()?;
        summary.offset = self.offset;
        debug!(
            records = summary.records,
            failed = summary.failed,
            offset = summary.offset,
            "drain pass finished"
        );
        Ok(summary)
    }

    fn next_record(&mut self) -> Result<Option<LineRecord>, SourceError> {
        if self.source.is_none() {
            self.source = Some(LineSource::open_cancellable(
                &self.path,
                self.format,
                self.offset,
                self.mode,
                &self.cancel,
            )?);
        }
        let Some(source) = self.source.as_mut() else {
            return Ok(None);
        };
        match source.next() {
            Some(Ok(record)) => Ok(Some(record)),
            Some(Err(e)) => {
                self.source = None;
                Err(e)
            }
            None => {
                self.source = None;
                Ok(None)
            }
        }
    }
}

impl<P> StateReader<P> {
    /// Explicitly save the current offset into the state file
    pub fn persist(&mut self) -> Result<(), StateReaderError> {
        self.state.write(self.offset)?;
        Ok(())
    }

    /// Explicitly finalize the reader, persisting the offset and returning any error produced in
    /// the process. Alternative to relying on `Drop`.
    pub fn close(mut self) -> Result<(), StateReaderError> {
        self.persist()?;
        self.already_freed = true;
        Ok(())
    }

    /// Drop the current line source so that the next read reopens the file at the current
    /// offset, seeing whatever was appended since.
    pub fn reopen(&mut self) {
        self.source = None;
    }

    /// Offset right after the last consumed line
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Lines processed successfully since the reader was built
    pub fn lines_processed(&self) -> u64 {
        self.lines_processed
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state_file(&self) -> &Path {
        self.state.path()
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    pub fn processor_mut(&mut self) -> &mut P {
        &mut self.processor
    }

    /// Save the offset after a cancellation and build the matching error.
    pub(crate) fn interrupted(&mut self) -> StateReaderError {
        self.persist_or_log();
        info!(offset = self.offset, "interrupted, offset saved");
        StateReaderError::Cancelled {
            offset: self.offset,
        }
    }

    fn persist_or_log(&mut self) {
        if let Err(e) = self.state.write(self.offset) {
            error!(error = %e, offset = self.offset, "failed to persist offset");
        }
    }
}

/// Persists the offset unless `.close()` was called. Errors can only be logged here; use
/// `.close()` to handle them.
impl<P> Drop for StateReader<P> {
    fn drop(&mut self) {
        if !self.already_freed {
            let _entered = self.span.clone().entered();
            self.persist_or_log();
        }
    }
}
