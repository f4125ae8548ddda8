use std::{
    fs::File,
    io::{self, BufRead, BufReader, Read, Seek, SeekFrom},
    os::unix::ffi::OsStrExt,
    path::{Path, PathBuf},
};

use flate2::read::MultiGzDecoder;
use thiserror::Error;

use crate::CancelToken;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Decompressed bytes discarded between two cancellation checks while skipping to an offset.
const SKIP_CHUNK: u64 = 1 << 20;

/// Possible errors that could happen while producing lines
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("{0} is not a file")]
    InputNotFound(PathBuf),

    #[error("{0} is not a real gzip file")]
    NotAGzip(PathBuf),

    #[error("while reading {path}")]
    IO {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("interrupted while skipping to offset {offset} of {path}")]
    Cancelled { path: PathBuf, offset: u64 },
}

/// Encoding of the input file, decided once from its name and first bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Format {
    Plain,
    Gzip,
}

impl Format {
    /// Inspect `path`: a name ending in `.gz` selects gzip, in which case the file must start
    /// with the gzip magic number.
    pub fn detect(path: &Path) -> Result<Self, SourceError> {
        if !path.is_file() {
            return Err(SourceError::InputNotFound(path.to_path_buf()));
        }
        if !path.as_os_str().as_bytes().ends_with(b".gz") {
            return Ok(Format::Plain);
        }
        let mut magic = [0u8; 2];
        let read = File::open(path)
            .and_then(|mut file| read_prefix(&mut file, &mut magic))
            .map_err(|source| SourceError::IO {
                path: path.to_path_buf(),
                source,
            })?;
        if read == magic.len() && magic == GZIP_MAGIC {
            Ok(Format::Gzip)
        } else {
            Err(SourceError::NotAGzip(path.to_path_buf()))
        }
    }
}

fn read_prefix(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// How line content is handed to the processor.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ContentMode {
    /// Bytes exactly as they appear in the stream.
    #[default]
    Raw,
    /// Text, with invalid UTF-8 sequences replaced.
    Decoded,
}

/// Content of one line including its terminator, if the line had one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LineContent {
    Raw(Vec<u8>),
    Decoded(String),
}

impl LineContent {
    fn new(bytes: Vec<u8>, mode: ContentMode) -> Self {
        match mode {
            ContentMode::Raw => LineContent::Raw(bytes),
            ContentMode::Decoded => match String::from_utf8(bytes) {
                Ok(text) => LineContent::Decoded(text),
                Err(e) => LineContent::Decoded(String::from_utf8_lossy(e.as_bytes()).into_owned()),
            },
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            LineContent::Raw(bytes) => bytes,
            LineContent::Decoded(text) => text.as_bytes(),
        }
    }
}

/// A line together with the stream offset right after it, which is where reading resumes if
/// this line is the last one processed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineRecord {
    pub content: LineContent,
    pub offset: u64,
}

/// Finite sequence of `LineRecord`s read from a plain or gzipped file, starting at some offset.
///
/// Offsets always refer to the logical stream, that is the decompressed bytes for gzip input.
/// A gzip file made of several concatenated members reads as one stream.
/// Plain files are positioned with a seek. Gzip streams cannot be seeked, so opening one at a
/// non-zero offset decompresses and discards everything before it: resuming deep into a large
/// gzip file costs as much as reading up to that point.
///
/// The sequence ends at end of stream and cannot be restarted; open a new `LineSource` to pick up
/// bytes appended later. The file is closed as soon as the sequence ends, whether by reaching
/// the end or by an error, and after an error no more items are produced.
///
/// ```rust no_run
/// # use std::path::Path;
/// # use linetrack::{ContentMode, LineSource};
/// let source = LineSource::open(Path::new("access.log.gz"), 0, ContentMode::Decoded)?;
/// for record in source {
///     let record = record?;
///     println!("{} bytes consumed", record.offset);
/// }
/// # Ok::<(), linetrack::SourceError>(())
/// ```
pub struct LineSource {
    path: PathBuf,
    format: Format,
    mode: ContentMode,
    reader: Option<Box<dyn BufRead>>,
    offset: u64,
}

impl LineSource {
    /// Open `path` and position it at `offset`, detecting its format first.
    pub fn open(path: &Path, offset: u64, mode: ContentMode) -> Result<Self, SourceError> {
        let format = Format::detect(path)?;
        Self::open_with_format(path, format, offset, mode)
    }

    /// Open `path` as `format` without inspecting it again.
    pub fn open_with_format(
        path: &Path,
        format: Format,
        offset: u64,
        mode: ContentMode,
    ) -> Result<Self, SourceError> {
        Self::open_positioned(path, format, offset, mode, None)
    }

    /// Like [`LineSource::open_with_format`], but a gzip skip to `offset` gives up with
    /// [`SourceError::Cancelled`] once `cancel` fires.
    pub fn open_cancellable(
        path: &Path,
        format: Format,
        offset: u64,
        mode: ContentMode,
        cancel: &CancelToken,
    ) -> Result<Self, SourceError> {
        Self::open_positioned(path, format, offset, mode, Some(cancel))
    }

    fn open_positioned(
        path: &Path,
        format: Format,
        offset: u64,
        mode: ContentMode,
        cancel: Option<&CancelToken>,
    ) -> Result<Self, SourceError> {
        let reader = position(path, format, offset, cancel)?;
        Ok(Self {
            path: path.to_path_buf(),
            format,
            mode,
            reader: Some(reader),
            offset,
        })
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Offset right after the last produced line.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn is_exhausted(&self) -> bool {
        self.reader.is_none()
    }
}

fn position(
    path: &Path,
    format: Format,
    offset: u64,
    cancel: Option<&CancelToken>,
) -> Result<Box<dyn BufRead>, SourceError> {
    let io_error = |source| SourceError::IO {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(io_error)?;
    match format {
        Format::Plain => {
            file.seek(SeekFrom::Start(offset)).map_err(io_error)?;
            Ok(Box::new(BufReader::new(file)))
        }
        Format::Gzip => {
            let mut reader = BufReader::new(MultiGzDecoder::new(BufReader::new(file)));
            let mut skipped = 0;
            while skipped < offset {
                if cancel.is_some_and(CancelToken::is_cancelled) {
                    return Err(SourceError::Cancelled {
                        path: path.to_path_buf(),
                        offset,
                    });
                }
                let chunk = (offset - skipped).min(SKIP_CHUNK);
                let copied =
                    io::copy(&mut (&mut reader).take(chunk), &mut io::sink()).map_err(io_error)?;
                skipped += copied;
                if copied < chunk {
                    break;
                }
            }
            if skipped < offset {
                tracing::warn!(
                    path = %path.display(),
                    offset,
                    available = skipped,
                    "offset lies past the end of the decompressed stream"
                );
            }
            Ok(Box::new(reader))
        }
    }
}

impl Iterator for LineSource {
    type Item = Result<LineRecord, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader.as_mut()?;
        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => {
                self.reader = None;
                None
            }
            Ok(read) => {
                self.offset += read as u64;
                Some(Ok(LineRecord {
                    content: LineContent::new(buf, self.mode),
                    offset: self.offset,
                }))
            }
            Err(source) => {
                self.reader = None;
                Some(Err(SourceError::IO {
                    path: self.path.clone(),
                    source,
                }))
            }
        }
    }
}

impl std::iter::FusedIterator for LineSource {}
