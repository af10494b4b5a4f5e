//! Log output setup, available with the `logging` feature.

use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{Result, RuntimeError};

/// Install a global `fmt` subscriber.
///
/// `filter` uses the `RUST_LOG` directive syntax. When it is `None` the
/// `RUST_LOG` environment variable is read, falling back to `info`.
pub fn init(filter: Option<&str>) -> Result<()> {
    let filter = match filter {
        Some(directives) => {
            EnvFilter::try_new(directives).map_err(|e| RuntimeError::Logging(e.to_string()))?
        }
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_target(false)
        .try_init()
        .map_err(|e| RuntimeError::Logging(e.to_string()))
}
