//! Provide tracing, tailored to this program.
//!
//! The binary should call `init_stderr()` at startup to install a tracing
//! subscriber (i.e., something that emits events to a log).
//!
//! The rest of the program can include `use tracing::prelude::*` for convenient
//! access to the `trace!()`, `debug!()`, `info!()`, `warn!()`, and `error!()`
//! macros.

use time::OffsetDateTime;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{format::Writer, time::FormatTime},
    prelude::*,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{trace, debug, info, warn, error};
}

/// Initialize logging.
///
/// Events go to stderr so that stdout carries nothing but the addresses the
/// tool prints. RUST_LOG filters as usual; without it the default level is
/// WARN, or DEBUG when `verbose` is set.
pub fn init_stderr(verbose: bool) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level(verbose).into())
        .with_env_var("RUST_LOG")
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_timer(LocalTimer),
        )
        .init();
}

/// Level used when RUST_LOG is unset. Progress messages stay quiet unless
/// asked for, so a piped run prints only addresses and warnings.
fn default_level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    }
}

// Provide our own timer that formats timestamps in local time and to the
// nearest millisecond.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now =
            OffsetDateTime::now_local().unwrap_or(OffsetDateTime::now_utc());
        let stamp = now
            .format(time::macros::format_description!(
                "[hour]:[minute]:[second].[subsecond digits:3]"
            ))
            .map_err(|_| std::fmt::Error)?;
        write!(w, "{}", stamp)
    }
}
