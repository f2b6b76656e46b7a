use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Installs the global subscriber. Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
  INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = if crate::config::is_production() {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_current_span(false)
        .try_init()
    } else {
      tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    if let Err(err) = result {
      eprintln!("tracing subscriber already installed: {err}");
    }
  });
}
