use std::io::IsTerminal;
use std::sync::OnceLock;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

static INITIALISED: OnceLock<()> = OnceLock::new();

/// Errors surfaced while configuring the global subscriber.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("tracing subscriber already initialised")]
    AlreadyInitialised,
}

/// Configures the global tracing subscriber.
///
/// The filter defaults to `info` and honours `RUST_LOG` overrides.
pub fn init_tracing() -> Result<(), InitError> {
    INITIALISED
        .set(())
        .map_err(|_| InitError::AlreadyInitialised)?;

    let ansi = std::io::stdout().is_terminal();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(ansi);
    Registry::default().with(filter).with(fmt_layer).init();

    Ok(())
}

/// Best-effort initialisation that ignores double registration. Useful in
/// tests where multiple entry points may race to install the subscriber.
pub fn init_tracing_lenient() {
    let _ = init_tracing();
}
