use std::path::PathBuf;

use clap::{CommandFactory, Parser};
use freetunes_core::{
    config::{Overrides, Settings},
    logger::{init_logger, init_tracing},
};

mod handlers;

use handlers::utils::WriteAdapter;

/// Options configurable via the CLI.
#[derive(Debug, Parser)]
#[command(name = "freetunes-cli", version = env!("CARGO_PKG_VERSION"), about)]
struct Flags {
    /// Path to the config file, defaults to `FreeTunes.toml` in the user config directory
    #[clap(long, value_hint = clap::ValueHint::FilePath)]
    config: Option<PathBuf>,
    /// Base URL of the backend (static assets are served from here)
    #[clap(long, value_hint = clap::ValueHint::Url)]
    server_url: Option<String>,
    /// URL of the signaling WebSocket
    #[clap(long, value_hint = clap::ValueHint::Url)]
    wss_url: Option<String>,
    /// Access token to authenticate with, takes precedence over the token file
    #[clap(long, value_hint = clap::ValueHint::Other)]
    token: Option<String>,
    /// File holding the access token
    #[clap(long, value_hint = clap::ValueHint::FilePath)]
    token_file: Option<PathBuf>,
    /// Log level (off, error, warn, info, debug, trace)
    #[clap(long, value_hint = clap::ValueHint::Other)]
    log_level: Option<log::LevelFilter>,
    /// subcommand to run
    #[clap(subcommand)]
    subcommand: Option<handlers::Command>,
}

#[test]
fn verify_cli() {
    Flags::command().debug_assert();
}

#[cfg(not(tarpaulin_include))]
fn main() -> anyhow::Result<()> {
    clap_complete::CompleteEnv::with_factory(Flags::command).complete();

    let Flags {
        config,
        server_url,
        wss_url,
        token,
        token_file,
        log_level,
        subcommand,
    } = Flags::parse();

    let config_path = match config {
        Some(path) => path,
        None => Settings::get_config_path()?,
    };
    let settings = Settings::init(
        config_path,
        Overrides {
            server_url,
            wss_url,
            token_file,
            log_level,
        },
    )?;

    init_logger(settings.client.log_level);
    if let Err(e) = tracing::subscriber::set_global_default(init_tracing()) {
        log::warn!("Failed to set up tracing: {e}");
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(async {
        let mut stdout_adapter = WriteAdapter(std::io::stdout());
        let mut stderr_adapter = WriteAdapter(std::io::stderr());

        if let Some(command) = subcommand {
            command
                .handle(&settings, token, &mut stdout_adapter, &mut stderr_adapter)
                .await?;
        } else {
            eprintln!("No subcommand provided");
        }

        Ok(())
    })
}
