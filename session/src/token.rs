//! Where the access token sent in the auth frame comes from.

use std::path::PathBuf;

use log::warn;

/// Provides the (opaque) access token for new channels.
///
/// The token is read once per channel open, so a source may change between searches.
pub trait TokenSource: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// No token, the user isn't logged in.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoToken;

impl TokenSource for NoToken {
    fn token(&self) -> Option<String> {
        None
    }
}

#[derive(Clone, Debug)]
pub struct StaticToken(String);

impl StaticToken {
    #[must_use]
    #[inline]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl TokenSource for StaticToken {
    fn token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// A token stored in a file, re-read every time it's needed.
///
/// A missing, unreadable, or blank file means there's no token.
#[derive(Clone, Debug)]
pub struct FileToken {
    path: PathBuf,
}

impl FileToken {
    #[must_use]
    #[inline]
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl TokenSource for FileToken {
    fn token(&self) -> Option<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let token = contents.trim();
                (!token.is_empty()).then(|| token.to_string())
            }
            Err(e) => {
                warn!("Failed to read token from {}: {e}", self.path.display());
                None
            }
        }
    }
}
