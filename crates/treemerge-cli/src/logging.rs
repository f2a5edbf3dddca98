//! Logging initialization.
//!
//! `RUST_LOG` unset and `-v` not given -> warnings and errors only.
//! `-v`/`-vv` raise the default level; `RUST_LOG` always wins when set,
//! matching the teacher's `telemetry::init` env-var-gated behavior minus
//! its OTLP export path — there is no external collector here, just
//! `tracing-subscriber`'s `fmt` layer to stderr.

use tracing_subscriber::EnvFilter;

pub fn init(verbosity: u8, quiet: bool) {
    let default_level = if quiet {
        "error"
    } else {
        match verbosity {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
