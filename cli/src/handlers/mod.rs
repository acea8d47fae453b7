pub mod printing;
pub mod search;
pub mod utils;

use std::fmt::Write as _;

use clap::Subcommand;
use freetunes_core::config::Settings;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Search for a song and stream it
    Search {
        /// The search query
        #[clap(required = true, num_args = 1..)]
        query: Vec<String>,
        /// Start playing once the stream is ready, and keep going until the song ends
        #[clap(long)]
        play: bool,
    },
    /// Print the resolved configuration
    Config,
}

impl Command {
    /// Run the command.
    ///
    /// # Errors
    ///
    /// Fails if the session can't be set up, if the song can't be streamed, or if output fails.
    pub async fn handle<W1: std::fmt::Write + Send, W2: std::fmt::Write + Send>(
        self,
        settings: &Settings,
        token: Option<String>,
        stdout: &mut W1,
        stderr: &mut W2,
    ) -> anyhow::Result<()> {
        match self {
            Self::Search { query, play } => {
                search::run(&settings.client, token, &query.join(" "), play, stdout, stderr).await
            }
            Self::Config => {
                write!(stdout, "{}", printing::settings(settings)?)?;
                Ok(())
            }
        }
    }
}
