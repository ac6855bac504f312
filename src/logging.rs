use std::io;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// JSON log lines, `DEBUG` with `--debug` else `INFO`; `RUST_LOG`
/// directives refine the default. Logs move to stderr when log content
/// itself is written to stdout.
pub fn init(debug: bool, to_stderr: bool) {
    let level = if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt().json().with_env_filter(filter);
    if to_stderr {
        builder.with_writer(io::stderr).init();
    } else {
        builder.with_writer(io::stdout).init();
    }
}
