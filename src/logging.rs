use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_FILTER: &str = "photo_archive=info";
const VERBOSE_FILTER: &str = "photo_archive=debug";

/// Install the global subscriber. Logs go to stderr so stdout stays clean
/// for `--json` output.
///
/// `RUST_LOG` wins when set; otherwise `verbose` picks debug over info.
/// Calling this twice is harmless.
pub fn init(verbose: bool) {
    let fallback = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(env_filter)
        .try_init();
}
