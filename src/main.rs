//gtsearch/src/main.rs
use gtsearch::services::adapters::{load_settings, SearchScheduler, SearchSession, SessionMessage};
use gtsearch::services::{ExitReason, Match};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

mod logging;

const USAGE: &str = "usage: gtsearch [-i|--ignore-case] [--json] <root> <pattern>";

#[derive(Debug, PartialEq, Eq)]
struct CliArgs {
    root: PathBuf,
    pattern: String,
    ignore_case: bool,
    json: bool,
}

fn parse_args<I>(args: I) -> Result<CliArgs, String>
where
    I: IntoIterator<Item = String>,
{
    let mut ignore_case = false;
    let mut json = false;
    let mut positional = Vec::new();
    let mut options_done = false;

    for arg in args {
        if options_done {
            positional.push(arg);
            continue;
        }
        match arg.as_str() {
            "-i" | "--ignore-case" => ignore_case = true,
            "--json" => json = true,
            "--" => options_done = true,
            other if other.starts_with('-') && other.len() > 1 => {
                return Err(format!("unknown option: {}", other));
            }
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let (Some(root), Some(pattern), None) = (positional.next(), positional.next(), positional.next())
    else {
        return Err("expected <root> and <pattern>".to_string());
    };
    if pattern.is_empty() {
        return Err("pattern must not be empty".to_string());
    }

    Ok(CliArgs {
        root: PathBuf::from(root),
        pattern,
        ignore_case,
        json,
    })
}

fn build_runtime() -> io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .or_else(|e| {
            tracing::warn!(error = %e, "multi-thread runtime unavailable, using current-thread");
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
        })
}

fn write_batch<W: Write>(out: &mut W, results: &[Match], json: bool) -> io::Result<()> {
    for m in results {
        if json {
            serde_json::to_writer(&mut *out, m)?;
            writeln!(out)?;
        } else {
            writeln!(out, "{}:{}:{}:{}", m.file_path, m.line_number, m.byte_offset, m.line)?;
        }
    }
    out.flush()
}

fn exit_status(reason: &ExitReason, found: usize, interrupted: bool) -> u8 {
    if interrupted {
        return 2;
    }
    match reason {
        ExitReason::Completed(0) | ExitReason::Completed(1) if found > 0 => 0,
        ExitReason::Completed(0) | ExitReason::Completed(1) => 1,
        _ => 2,
    }
}

#[cfg(unix)]
fn install_signal_handler(
    session: Arc<SearchSession>,
    interrupted: Arc<AtomicBool>,
) -> io::Result<std::thread::JoinHandle<()>> {
    use signal_hook::consts::signal::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    Ok(std::thread::spawn(move || {
        for sig in signals.forever() {
            tracing::info!(signal = sig, "interrupted, closing search");
            interrupted.store(true, Ordering::SeqCst);
            session.close();
        }
    }))
}

fn main() -> ExitCode {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("gtsearch: {}\n{}", msg, USAGE);
            return ExitCode::from(2);
        }
    };

    let _logging = logging::init();
    let settings = load_settings().unwrap_or_default();

    let runtime = match build_runtime() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("gtsearch: cannot start runtime: {}", e);
            return ExitCode::from(2);
        }
    };

    let (tx, rx) = mpsc::channel();
    let scheduler = SearchScheduler::with_config(runtime.handle().clone(), settings.search);
    let session = Arc::new(SearchSession::new(scheduler, tx));
    let interrupted = Arc::new(AtomicBool::new(false));

    #[cfg(unix)]
    if let Err(e) = install_signal_handler(session.clone(), interrupted.clone()) {
        tracing::warn!(error = %e, "install signal handler failed");
    }

    tracing::info!(
        root = %args.root.display(),
        pattern = %args.pattern,
        ignore_case = args.ignore_case,
        "search started"
    );
    session.search(&args.root, &args.pattern, args.ignore_case);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut found = 0usize;

    let reason = loop {
        match rx.recv() {
            Ok(SessionMessage::Results { results, .. }) => {
                found += results.len();
                match write_batch(&mut out, &results, args.json) {
                    Ok(()) => {
                        session.load_more();
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "write results failed");
                        interrupted.store(true, Ordering::SeqCst);
                        session.close();
                    }
                }
            }
            Ok(SessionMessage::End { reason, .. }) => break reason,
            Err(_) => break ExitReason::Failed("search channel closed".to_string()),
        }
    };

    if let ExitReason::Failed(message) = &reason {
        eprintln!("gtsearch: {}", message);
    }

    let interrupted = interrupted.load(Ordering::SeqCst);
    tracing::info!(%reason, found, interrupted, "search finished");
    ExitCode::from(exit_status(&reason, found, interrupted))
}

#[cfg(test)]
#[path = "../tests/unit/cli.rs"]
mod cli_tests;
