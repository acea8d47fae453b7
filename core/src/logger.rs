//----------------------------------------------------------------------------------------- std lib
use std::io::Write;
use std::time::Instant;
//--------------------------------------------------------------------------------- other libraries
use log::info;
use once_cell::sync::Lazy;

use crate::format_duration;

// This will get initialized below.
/// Returns the init [`Instant`]
pub static INIT_INSTANT: Lazy<Instant> = Lazy::new(Instant::now);

/// Returns the seconds since [`INIT_INSTANT`].
#[cfg(not(tarpaulin_include))]
pub fn uptime() -> u64 {
    INIT_INSTANT.elapsed().as_secs()
}

/// Builds the filter directives used when `RUST_LOG` is not set:
/// everything off except for the freetunes crates.
#[must_use]
pub fn default_filter(filter: log::LevelFilter) -> String {
    format!("off,freetunes={filter}")
}

//---------------------------------------------------------------------------------------------------- Logger init function
#[allow(clippy::module_name_repetitions)]
/// Initializes the logger.
///
/// This enables console logging on all the internals of `FreeTunes`.
///
/// Functionality is provided by [`log`].
///
/// The levels are:
/// - ERROR
/// - WARN
/// - INFO
/// - DEBUG
/// - TRACE
///
/// # Panics
/// This must only be called _once_.
#[cfg(not(tarpaulin_include))]
pub fn init_logger(filter: log::LevelFilter) {
    // Initialize timer.
    let now = Lazy::force(&INIT_INSTANT);

    // `RUST_LOG` wins over the flag, otherwise only log our own crates.
    let env = std::env::var("RUST_LOG").ok().filter(|e| !e.is_empty());
    let directives = env.clone().unwrap_or_else(|| default_filter(filter));

    env_logger::Builder::new()
        .format(move |buf, record| {
            let style = buf.default_level_style(record.level());
            let dimmed = env_logger::fmt::style::Style::new().dimmed();
            let level = match record.level() {
                log::Level::Error => "E",
                log::Level::Warn => "W",
                log::Level::Info => "I",
                log::Level::Debug => "D",
                log::Level::Trace => "T",
            };
            writeln!(
                buf,
                // Longest PATH in the repo: `session/src/pipeline/hls.rs` - `27` characters
                // Longest file in the repo: `session/src/coordinator.rs`  - `4` digits
                "| {style}{level}{style:#} | {dimmed}{}{dimmed:#} | {dimmed}{: >27} @ {: <4}{dimmed:#} | {}",
                format_duration(&now.elapsed()),
                record.file_static().unwrap_or("???"),
                record.line().unwrap_or(0),
                record.args(),
            )
        })
        .write_style(env_logger::WriteStyle::Always)
        .parse_filters(&directives)
        .init();

    match env {
        Some(env) => info!("Log Level (RUST_LOG) ... {env}"),
        None => info!("Log Level (Flag) ... {filter}"),
    }
}

/// Initializes the tracing layer.
///
/// Spans recorded by `#[instrument]` in the session crates are filtered to the freetunes crates,
/// unless the `verbose_tracing` feature is enabled.
///
/// # Panics
///
/// panics if the hard-coded filter directives cannot be parsed.
#[must_use]
pub fn init_tracing() -> impl tracing::Subscriber {
    use tracing_subscriber::layer::SubscriberExt as _;

    #[cfg(not(feature = "verbose_tracing"))]
    let filter = tracing_subscriber::EnvFilter::builder()
        .parse("off,freetunes=trace")
        .unwrap();
    #[cfg(feature = "verbose_tracing")]
    let filter = tracing_subscriber::EnvFilter::builder()
        .parse("trace,hyper=off,rustls=off")
        .unwrap();

    // span timings are only printed when verbose tracing is requested, events go through `log`
    #[cfg(feature = "verbose_tracing")]
    let timings = Some(
        tracing_subscriber::fmt::layer()
            .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
            .with_writer(std::io::stderr),
    );
    #[cfg(not(feature = "verbose_tracing"))]
    let timings: Option<tracing_subscriber::fmt::Layer<_>> = None;

    tracing_subscriber::registry().with(filter).with(timings)
}
