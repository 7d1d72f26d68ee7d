//! Screen Scheduler - screen recordings, on demand or on a schedule.
//!
//! Backend library for the recorder: capture acquisition, stream composition
//! (crop and audio mixing), one recording session at a time, timed recording
//! windows and incremental persistence of the encoded stream.

pub mod capture;
pub mod commands;
pub mod compositor;
pub mod config;
pub mod export;
pub mod recorder;
pub mod schedule;
pub mod storage;
pub mod utils;

#[cfg(test)]
mod testing;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber
///
/// `RUST_LOG` overrides the default filter. Calling this more than once is
/// harmless; only the first subscriber is installed.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "screen_scheduler=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    tracing::info!("Screen Scheduler v{}", env!("CARGO_PKG_VERSION"));
}
