use std::io::{self, Write};

use crate::LineContent;

/// Failure reported by a `LineProcessor` for a single line
pub type ProcessError = Box<dyn std::error::Error + Send + Sync>;

/// Routine that receives every line read by a `StateReader`.
///
/// A returned error is logged and the line still counts as consumed. Closures taking
/// `&LineContent` and returning any `Result<(), E>` with a boxable error implement this trait:
///
/// ```rust
/// # use linetrack::{LineContent, LineProcessor};
/// let mut total = 0;
/// let mut count_bytes = |line: &LineContent| -> Result<(), std::io::Error> {
///     total += line.as_bytes().len();
///     Ok(())
/// };
/// count_bytes.process(&LineContent::Raw(b"abc\n".to_vec())).unwrap();
/// # drop(count_bytes);
/// assert_eq!(total, 4);
/// ```
pub trait LineProcessor {
    fn process(&mut self, line: &LineContent) -> Result<(), ProcessError>;
}

impl<F, E> LineProcessor for F
where
    F: FnMut(&LineContent) -> Result<(), E>,
    E: Into<ProcessError>,
{
    fn process(&mut self, line: &LineContent) -> Result<(), ProcessError> {
        self(line).map_err(Into::into)
    }
}

/// Writes every line to a sink, stdout by default, exactly as read.
pub struct PrintProcessor<W = io::Stdout> {
    out: W,
}

impl PrintProcessor {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl Default for PrintProcessor {
    fn default() -> Self {
        Self::stdout()
    }
}

impl<W: Write> PrintProcessor<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> LineProcessor for PrintProcessor<W> {
    fn process(&mut self, line: &LineContent) -> Result<(), ProcessError> {
        self.out.write_all(line.as_bytes())?;
        if !line.as_bytes().ends_with(b"\n") {
            self.out.write_all(b"\n")?;
        }
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_processor_writes_lines_verbatim() {
        let mut printer = PrintProcessor::new(Vec::new());
        printer
            .process(&LineContent::Decoded("hello\n".to_string()))
            .unwrap();
        printer
            .process(&LineContent::Raw(b"\xffraw\n".to_vec()))
            .unwrap();
        assert_eq!(printer.into_inner(), b"hello\n\xffraw\n");
    }

    #[test]
    fn print_processor_terminates_unterminated_last_line() {
        let mut printer = PrintProcessor::new(Vec::new());
        printer
            .process(&LineContent::Decoded("tail".to_string()))
            .unwrap();
        assert_eq!(printer.into_inner(), b"tail\n");
    }

    #[test]
    fn closure_errors_are_boxed() {
        let mut failing = |_: &LineContent| Err::<(), _>("refused");
        let err = failing
            .process(&LineContent::Raw(Vec::new()))
            .unwrap_err();
        assert_eq!(err.to_string(), "refused");
    }
}
