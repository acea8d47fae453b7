//! Client-side streaming session controller.
//!
//! A search opens a signaling channel to the backend, which announces song metadata and,
//! eventually, the locator of a transcoded HLS asset. The asset is then loaded by the media
//! pipeline and handed to a playback element. The [`SessionCoordinator`] owns all three and
//! keeps their lifecycles consistent across searches and shutdown.

use std::sync::Arc;

use freetunes_core::config::ClientSettings;

pub mod action;
pub mod channel;
pub mod coordinator;
pub mod element;
pub mod errors;
pub mod events;
pub mod pipeline;
pub mod termination;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
pub mod token;

pub use coordinator::{SessionCoordinator, SessionOptions};

use token::{FileToken, NoToken, StaticToken, TokenSource};

/// Pick the token source for the given settings.
///
/// A token passed explicitly wins over the configured token file.
#[must_use]
pub fn token_source(settings: &ClientSettings, token: Option<String>) -> Arc<dyn TokenSource> {
    match (token, &settings.token_file) {
        (Some(token), _) => Arc::new(StaticToken::new(token)),
        (None, Some(path)) => Arc::new(FileToken::new(path.clone())),
        (None, None) => Arc::new(NoToken),
    }
}
