use std::{convert::Infallible, io, time::Duration};

use tracing::{debug, info, warn};

use crate::{DrainSummary, Format, LineProcessor, StateReader, StateReaderError};

/// Poll intervals used while following a file
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TailConfig {
    /// Pause after a poll that found and processed new data
    pub cooldown: Duration,
    /// Pause after a poll that found nothing new
    pub idle_interval: Duration,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(1),
            idle_interval: Duration::from_secs(5),
        }
    }
}

/// Result of a single poll
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// The file grew to `size` bytes and the new lines were processed.
    Drained { size: u64, summary: DrainSummary },
    /// The file is still `size` bytes long.
    Idle { size: u64 },
}

/// Follows a growing file, processing appended lines as they show up.
///
/// Each poll compares the size of the file with the size seen at the previous drain (zero at
/// first, so an existing file is processed on the first poll). If it grew, the reader reopens
/// the file at its persisted offset and drains it. There is no end state: `run` only returns on
/// cancellation or on a fatal error.
///
/// Gzip files are decompressed from the start on every drain, since the resume offset can only
/// be reached by decompressing everything before it.
///
/// ```rust no_run
/// # use linetrack::{PrintProcessor, StateReader, Tail, TailConfig};
/// let mut reader = StateReader::builder("/var/log/app.log").build(PrintProcessor::stdout())?;
/// reader.cancel_token().register_signals()?;
/// let stopped = Tail::new(&mut reader, TailConfig::default()).run();
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct Tail<'r, P> {
    reader: &'r mut StateReader<P>,
    config: TailConfig,
    last_size: u64,
}

impl<'r, P: LineProcessor> Tail<'r, P> {
    pub fn new(reader: &'r mut StateReader<P>, config: TailConfig) -> Self {
        if reader.format() == Format::Gzip {
            let _entered = reader.span().clone().entered();
            warn!("tailing a gzipped file, the whole file is decompressed again on every change");
        }
        Self {
            reader,
            config,
            last_size: 0,
        }
    }

    /// Size observed when the file was last drained
    pub fn last_size(&self) -> u64 {
        self.last_size
    }

    /// Check the file once and drain it if it grew. The drain persists the offset it reached.
    pub fn poll(&mut self) -> Result<PollOutcome, StateReaderError> {
        let _entered = self.reader.span().clone().entered();
        let size = self.current_size()?;
        if size <= self.last_size {
            debug!(size, last_size = self.last_size, "no new data");
            return Ok(PollOutcome::Idle { size });
        }
        debug!(size, last_size = self.last_size, "file grew, processing new data");
        self.reader.reopen();
        let summary = self.reader.drain(None)?;
        self.last_size = size;
        Ok(PollOutcome::Drained { size, summary })
    }

    /// Poll until cancelled, sleeping `cooldown` after processing new data and `idle_interval`
    /// otherwise. The offset is persisted before returning.
    pub fn run(mut self) -> Result<Infallible, StateReaderError> {
        info!(path = %self.reader.path().display(), "following file");
        loop {
            if self.reader.cancel_token().is_cancelled() {
                return Err(self.reader.interrupted());
            }
            let pause = match self.poll()? {
                PollOutcome::Drained { .. } => self.config.cooldown,
                PollOutcome::Idle { size } => {
                    info!(
                        size,
                        sleep_secs = self.config.idle_interval.as_secs_f64(),
                        "file unchanged, sleeping"
                    );
                    self.config.idle_interval
                }
            };
            if self.reader.cancel_token().sleep(pause) {
                return Err(self.reader.interrupted());
            }
        }
    }

    fn current_size(&self) -> Result<u64, StateReaderError> {
        let path = self.reader.path();
        match std::fs::metadata(path) {
            Ok(metadata) => Ok(metadata.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StateReaderError::InputNotFound(path.to_path_buf()))
            }
            Err(source) => Err(StateReaderError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::RefCell,
        io::Write,
        path::{Path, PathBuf},
        rc::Rc,
        thread,
    };

    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;
    use crate::{CancelToken, LineContent};

    type Seen = Rc<RefCell<Vec<Vec<u8>>>>;

    #[fixture]
    fn dir() -> TempDir {
        tempfile::tempdir().unwrap()
    }

    fn append(path: &Path, content: &[u8]) {
        std::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .unwrap()
            .write_all(content)
            .unwrap();
    }

    fn setup(
        dir: &TempDir,
        content: &[u8],
    ) -> (
        PathBuf,
        Seen,
        StateReader<impl FnMut(&LineContent) -> Result<(), std::io::Error>>,
    ) {
        setup_named(dir, "growing.log", content)
    }

    fn setup_named(
        dir: &TempDir,
        name: &str,
        content: &[u8],
    ) -> (
        PathBuf,
        Seen,
        StateReader<impl FnMut(&LineContent) -> Result<(), std::io::Error>>,
    ) {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        let seen = Seen::default();
        let sink = Rc::clone(&seen);
        let reader = StateReader::builder(&path)
            .build(move |line: &LineContent| {
                sink.borrow_mut().push(line.as_bytes().to_vec());
                Ok::<_, std::io::Error>(())
            })
            .unwrap();
        (path, seen, reader)
    }

    #[rstest]
    fn first_poll_drains_existing_content(dir: TempDir) {
        let (_, seen, mut reader) = setup(&dir, b"a\nb\n");
        let mut tail = Tail::new(&mut reader, TailConfig::default());
        let outcome = tail.poll().unwrap();
        assert!(
            matches!(outcome, PollOutcome::Drained { size: 4, summary } if summary.records == 2)
        );
        assert_eq!(seen.borrow().len(), 2);
    }

    #[rstest]
    fn unchanged_file_stays_idle(dir: TempDir) {
        let (_, _, mut reader) = setup(&dir, b"a\n");
        let mut tail = Tail::new(&mut reader, TailConfig::default());
        tail.poll().unwrap();
        assert_eq!(tail.poll().unwrap(), PollOutcome::Idle { size: 2 });
    }

    #[rstest]
    fn empty_file_stays_idle(dir: TempDir) {
        let (_, _, mut reader) = setup(&dir, b"");
        let mut tail = Tail::new(&mut reader, TailConfig::default());
        assert_eq!(tail.poll().unwrap(), PollOutcome::Idle { size: 0 });
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    fn appended_lines_are_processed_once(dir: TempDir, #[case] new_lines: usize) {
        let (path, seen, mut reader) = setup(&dir, b"old\n");
        let mut tail = Tail::new(&mut reader, TailConfig::default());
        tail.poll().unwrap();
        tail.poll().unwrap();

        let appended = b"new line\n".repeat(new_lines);
        append(&path, &appended);
        let outcome = tail.poll().unwrap();

        let expected_offset = 4 + appended.len() as u64;
        match outcome {
            PollOutcome::Drained { size, summary } => {
                assert_eq!(size, expected_offset);
                assert_eq!(summary.records, new_lines as u64);
                assert_eq!(summary.offset, expected_offset);
            }
            other => panic!("expected a drain, got {other:?}"),
        }
        assert_eq!(seen.borrow().len(), 1 + new_lines);
        let state = crate::path_utils::default_state_path(&path).unwrap();
        assert_eq!(
            std::fs::read_to_string(state).unwrap(),
            expected_offset.to_string()
        );
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[rstest]
    fn gzip_grown_by_a_new_member_continues_after_last_line(dir: TempDir) {
        let (path, seen, mut reader) = setup_named(&dir, "growing.log.gz", &gzip(b"a\nb\n"));
        let mut tail = Tail::new(&mut reader, TailConfig::default());
        tail.poll().unwrap();

        append(&path, &gzip(b"c\n"));
        let outcome = tail.poll().unwrap();

        assert!(matches!(
            outcome,
            PollOutcome::Drained { summary, .. } if summary.records == 1 && summary.offset == 6
        ));
        assert_eq!(
            *seen.borrow(),
            vec![b"a\n".to_vec(), b"b\n".to_vec(), b"c\n".to_vec()]
        );
        let state = crate::path_utils::default_state_path(&path).unwrap();
        assert_eq!(std::fs::read_to_string(state).unwrap(), "6");
    }

    #[rstest]
    fn run_stops_on_cancel_and_persists(dir: TempDir) {
        let (path, seen, mut reader) = setup(&dir, b"a\nb\n");
        let cancel: CancelToken = reader.cancel_token().clone();
        let config = TailConfig {
            cooldown: Duration::from_millis(10),
            idle_interval: Duration::from_millis(10),
        };
        let remote = cancel.clone();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            remote.cancel();
        });

        let err = Tail::new(&mut reader, config).run().unwrap_err();
        stopper.join().unwrap();

        assert!(matches!(err, StateReaderError::Cancelled { offset: 4 }));
        assert_eq!(seen.borrow().len(), 2);
        let state = crate::path_utils::default_state_path(&path).unwrap();
        assert_eq!(std::fs::read_to_string(state).unwrap(), "4");
    }

    #[rstest]
    fn removed_file_is_fatal(dir: TempDir) {
        let (path, _, mut reader) = setup(&dir, b"a\n");
        let mut tail = Tail::new(&mut reader, TailConfig::default());
        std::fs::remove_file(&path).unwrap();
        let err = tail.poll().unwrap_err();
        assert!(matches!(err, StateReaderError::InputNotFound(_)));
    }

    #[test]
    fn default_intervals() {
        let config = TailConfig::default();
        assert_eq!(config.cooldown, Duration::from_secs(1));
        assert_eq!(config.idle_interval, Duration::from_secs(5));
    }
}
