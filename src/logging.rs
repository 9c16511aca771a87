// Logging setup for pairchat
// Warnings to stderr by default; everything to a file with --debug

use chrono::Utc;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_PATH: &str = "/tmp/pairchat-debug.log";

/// Install the global tracing subscriber
///
/// `RUST_LOG` overrides the default filter in both modes. With `debug` the
/// log file is truncated and starts with a header so it can be tailed.
pub fn init(debug: bool) -> io::Result<()> {
    if !debug {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .try_init();
        return Ok(());
    }

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(LOG_FILE_PATH)?;
    write_header(&mut file)?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,pairchat=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init();
    Ok(())
}

fn write_header(out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "=== pairchat debug log ===")?;
    writeln!(out, "Session started: {}", Utc::now().to_rfc3339())?;
    writeln!(out, "To monitor: tail -f {}", LOG_FILE_PATH)?;
    writeln!(out, "==========================\n")
}
