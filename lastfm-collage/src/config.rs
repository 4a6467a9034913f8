use std::fmt;

use anyhow::{Context, Result};

const API_KEY_VAR: &str = "LASTFM_API_KEY";
const API_SECRET_VAR: &str = "LASTFM_API_SECRET";

/// Credentials for the Last.fm web API, loaded once at startup. Everything
/// downstream takes these by value instead of reading the environment.
pub struct LastfmCredentials {
    pub api_key: String,
    pub api_secret: String,
}

impl LastfmCredentials {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api_key: require_var(API_KEY_VAR)?,
            api_secret: require_var(API_SECRET_VAR)?,
        })
    }
}

fn require_var(name: &str) -> Result<String> {
    std::env::var(name)
        .with_context(|| format!("You need to set the {name} environment variable"))
}

impl fmt::Debug for LastfmCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LastfmCredentials")
            .field("api_key", &redact(&self.api_key))
            .field("api_secret", &redact(&self.api_secret))
            .finish()
    }
}

fn redact(value: &str) -> &'static str {
    if value.is_empty() { "<empty>" } else { "<redacted>" }
}
