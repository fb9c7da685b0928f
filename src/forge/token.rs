//! Forge authentication token resolution.
//!
//! Tokens are read from the environment only; the crate never stores or
//! prompts for credentials. Resolution order mirrors the GitHub CLI: the CLI
//! token first, then the generic token, then the API token.

use std::error::Error;
use std::fmt;

/// Environment variables consulted, in order.
pub const TOKEN_VARIABLES: [&str; 3] = ["GH_TOKEN", "GITHUB_TOKEN", "GITHUB_API_TOKEN"];

/// No token was found in the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingTokenError {
    /// Whether the calling operation needed the token to proceed.
    pub required: bool,
}

impl fmt::Display for MissingTokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "missing GitHub authentication token (set one of {})",
            TOKEN_VARIABLES.join(", ")
        )
    }
}

impl Error for MissingTokenError {}

/// Resolve a token from the process environment.
pub fn resolve_token() -> Result<String, MissingTokenError> {
    for variable in TOKEN_VARIABLES {
        if let Ok(value) = std::env::var(variable) {
            let value = value.trim();
            if !value.is_empty() {
                return Ok(value.to_string());
            }
        }
    }
    Err(MissingTokenError { required: true })
}
