//! Logging setup for the `corpus` binary.
//!
//! Logs go to stderr so that stdout carries only conversation output and
//! command results. `RUST_LOG` overrides the `-v` verbosity flags.

use tracing_subscriber::EnvFilter;

pub fn setup_logging(verbose_level: u8) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(filter_for(verbose_level))
    };

    // A subscriber may already be installed (tests, embedding programs).
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .try_init();
}

fn filter_for(verbose_level: u8) -> &'static str {
    match verbose_level {
        0 => "warn",
        1 => "warn,corpus_chat=info,corpus=info",
        2 => "info,corpus_chat=debug,corpus=debug",
        _ => "debug,corpus_chat=trace,corpus=trace",
    }
}
