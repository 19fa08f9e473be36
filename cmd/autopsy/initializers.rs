use tracing::Level;
use tracing_subscriber::{EnvFilter, filter::Directive, fmt};

use crate::cli::Options;

/// Install the global subscriber. `RUST_LOG` overrides `--log-level`.
pub fn init_tracing(opts: &Options) {
    let log_filter = EnvFilter::builder()
        .with_default_directive(Directive::from(opts.log_level))
        .from_env_lossy();

    let include_target = matches!(opts.log_level, Level::DEBUG | Level::TRACE);

    // Results go to stdout; logs stay on stderr so output can be piped.
    fmt()
        .with_env_filter(log_filter)
        .with_target(include_target)
        .with_writer(std::io::stderr)
        .init();
}
