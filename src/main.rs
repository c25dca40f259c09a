use clap::{ArgAction, Parser};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;
use tagdump::dump::{dump, CancelToken, DumpOptions, ReportFormat, StopReason};
use tagdump::registry::{register_core, RegistryBuilder, TypeTable};
use tracing::info;

#[derive(Parser)]
#[command(name = "tagdump", version, about = "Dump the typed data records of a tag data stream")]
struct Cli {
    /// Data stream to read
    input: PathBuf,

    /// Start at this offset (-1 = end of data, negative = back from end)
    #[arg(short, long, allow_negative_numbers = true, value_parser = parse_signed)]
    jump: Option<i64>,
    /// Stop once a record starts beyond this offset
    #[arg(short = 'x', long, value_parser = parse_unsigned)]
    endpos: Option<u64>,
    /// Stop after this many records
    #[arg(short, long)]
    num: Option<u64>,
    /// Only show these record types (numbers or names, comma separated)
    #[arg(long, value_delimiter = ',')]
    rtypes: Vec<String>,
    /// First record number to show
    #[arg(short = 'r', long)]
    start_rec: Option<u32>,
    /// Last record number to show
    #[arg(short = 'l', long)]
    last_rec: Option<u32>,

    /// Follow the input as it grows
    #[arg(long)]
    tail: bool,
    /// In tail mode, stop after this many seconds without new data
    #[arg(long)]
    idle: Option<u64>,
    /// Tail polling interval in milliseconds
    #[arg(long, default_value = "250")]
    poll_ms: u64,

    /// Do not skip the directory sector at the start of the stream
    #[arg(long)]
    no_dir: bool,
    /// JSON type table to overlay on the built-in record types
    #[arg(long)]
    types: Option<PathBuf>,
    /// Print the end-of-run report as JSON
    #[arg(long)]
    json: bool,

    /// More detail per record (repeat up to 5 times)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    /// Framing diagnostics on stderr
    #[arg(short = 'D', long)]
    debug: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(&cli);

    // ── Registry ─────────────────────────────────────────────────────────────
    let mut builder = register_core(RegistryBuilder::new());
    if let Some(path) = &cli.types {
        let table = TypeTable::from_path(path)?;
        info!("type table {} (revision {:?}, {} types)", path.display(), table.revision, table.types.len());
        builder = builder.overlay(&table)?;
    }
    let registry = builder.build();

    // ── Options ──────────────────────────────────────────────────────────────
    let opts = DumpOptions {
        skip_directory: !cli.no_dir,
        jump:           cli.jump,
        end_pos:        cli.endpos,
        start_rec:      cli.start_rec,
        last_rec:       cli.last_rec,
        rtypes:         cli.rtypes.clone(),
        limit:          cli.num,
        verbose:        cli.verbose.min(5),
        tail:           cli.tail,
        poll_interval:  Duration::from_millis(cli.poll_ms),
        idle_timeout:   cli.idle.map(Duration::from_secs),
        report:         if cli.json { ReportFormat::Json } else { ReportFormat::Text },
        ..DumpOptions::default()
    };

    let cancel = CancelToken::new();
    watch_interrupt(cancel.clone())?;
    let source = opts.open_source(&cli.input, &cancel)?;

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let summary = dump(source, &registry, &opts, &cancel, &mut out)?;
    out.flush()?;

    if let StopReason::Failed(e) = summary.stop {
        return Err(e.into());
    }
    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

/// `RUST_LOG` wins; otherwise `-D` and `-v` pick the level.  Logs go to
/// stderr so stdout carries only records.
fn init_logging(cli: &Cli) {
    let default = if cli.debug {
        "tagdump=debug"
    } else if cli.verbose >= 2 {
        "tagdump=info"
    } else {
        "tagdump=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// Ctrl-C cancels the run; `dump` finishes the current record and still
/// writes its report.
fn watch_interrupt(cancel: CancelToken) -> io::Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    std::thread::spawn(move || {
        rt.block_on(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping");
                cancel.cancel();
            }
        })
    });
    Ok(())
}

fn parse_unsigned(s: &str) -> Result<u64, String> {
    let r = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None      => s.parse(),
    };
    r.map_err(|e| format!("bad offset '{s}': {e}"))
}

fn parse_signed(s: &str) -> Result<i64, String> {
    match s.strip_prefix('-') {
        Some(rest) => {
            let v = parse_unsigned(rest)?;
            i64::try_from(v).map(|v| -v).map_err(|e| format!("bad offset '{s}': {e}"))
        }
        None => {
            let v = parse_unsigned(s)?;
            i64::try_from(v).map_err(|e| format!("bad offset '{s}': {e}"))
        }
    }
}
