//! Tracing setup for the CLI.
//!
//! ```bash
//! CLASSLINK_LOG=debug classlink link classes.json
//! CLASSLINK_LOG="classlink::registry=trace" classlink check classes.json
//! ```
//!
//! The subscriber is only installed when `CLASSLINK_LOG` (or `RUST_LOG`) is
//! set. Output goes to stderr so layouts printed on stdout stay clean.

use tracing_subscriber::EnvFilter;

/// `CLASSLINK_LOG` wins over `RUST_LOG` when both are set.
fn build_filter() -> EnvFilter {
    if let Ok(val) = std::env::var("CLASSLINK_LOG") {
        EnvFilter::builder().parse_lossy(val)
    } else {
        EnvFilter::from_default_env()
    }
}

/// Install the global subscriber, or do nothing when no filter is requested.
pub fn init_tracing() {
    let requested =
        std::env::var_os("CLASSLINK_LOG").is_some() || std::env::var_os("RUST_LOG").is_some();
    if !requested {
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(build_filter())
        .with_writer(std::io::stderr)
        .init();
}
