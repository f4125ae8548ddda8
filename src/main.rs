use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use linetrack::{
    CancelToken, ContentMode, PrintProcessor, StateReader, StateReaderError, Tail, TailConfig,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Print the lines of a file, resuming after the last line printed by a previous run.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// File to process, plain text or gzip (`.gz`)
    #[arg(short, long)]
    file: PathBuf,

    /// Byte offset to start from, overriding the state file
    #[arg(short, long)]
    bytes: Option<u64>,

    /// State file keeping the offset [default: <FILE>.state]
    #[arg(short, long)]
    statefile: Option<PathBuf>,

    /// Keep following the file as it grows
    #[arg(short, long)]
    tail: bool,

    /// Stop after this many lines (ignored when tailing)
    #[arg(short, long)]
    limit: Option<u64>,

    /// Pass lines through byte for byte instead of decoding them as UTF-8
    #[arg(long)]
    raw: bool,

    /// Log level (trace, debug, info, warn, error), overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ StateReaderError::Cancelled { .. }) => {
            info!("{e}");
            ExitCode::FAILURE
        }
        Err(e) => {
            let kind = e.kind();
            let e = anyhow::Error::from(e);
            error!(?kind, "{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), StateReaderError> {
    let cancel = CancelToken::new();
    if let Err(e) = cancel.register_signals() {
        error!(error = %e, "cannot install signal handlers, interrupting will lose the offset");
    }

    let mode = if args.raw {
        ContentMode::Raw
    } else {
        ContentMode::Decoded
    };
    let mut builder = StateReader::builder(&args.file)
        .content_mode(mode)
        .cancel_token(cancel);
    if let Some(offset) = args.bytes {
        builder = builder.start_offset(offset);
    }
    if let Some(statefile) = args.statefile {
        builder = builder.state_file(statefile);
    }
    let mut reader = builder.build(PrintProcessor::stdout())?;

    info!(file = %args.file.display(), offset = reader.offset(), "processing");
    if args.tail {
        match Tail::new(&mut reader, TailConfig::default()).run() {
            Ok(never) => match never {},
            Err(e) => return Err(e),
        }
    }
    let summary = reader.drain(args.limit)?;
    info!(
        lines = summary.records,
        failed = summary.failed,
        offset = summary.offset,
        "done"
    );
    reader.close()
}
