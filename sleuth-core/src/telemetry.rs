use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber: `EnvFilter` (default `info`, `debug`
/// when verbose) plus a JSON-formatted stdout layer with flattened events.
///
/// Safe to call once per process; returns an error string if a global
/// subscriber is already installed.
pub fn init_telemetry(verbose: bool) -> Result<(), String> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let json_layer = tracing_subscriber::fmt::layer().json().flatten_event(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .try_init()
        .map_err(|err| err.to_string())
}
