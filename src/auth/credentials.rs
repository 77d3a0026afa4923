//! Credential resolution in fixed priority order.
//!
//! Priority: explicit caller value > environment > profile-stored value.
//! The interactive prompt lives in the CLI layer, not here.

use std::fmt;

pub const ENV_USER: &str = "VAULT_USER";
pub const ENV_PASS: &str = "VAULT_PASS";
pub const ENV_TOKEN: &str = "VAULT_TOKEN";

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

// Keep passwords out of debug logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Session token from the environment, if set. Never persisted.
pub fn token_from_env() -> Option<String> {
    std::env::var(ENV_TOKEN).ok().filter(|t| !t.is_empty())
}

pub fn username_from_env() -> Option<String> {
    std::env::var(ENV_USER).ok().filter(|v| !v.is_empty())
}

pub fn password_from_env() -> Option<String> {
    std::env::var(ENV_PASS).ok().filter(|v| !v.is_empty())
}

/// Resolve username and password independently through the priority chain.
/// Returns `None` when either half is missing everywhere.
pub fn resolve_credentials(
    explicit_user: Option<String>,
    explicit_pass: Option<String>,
    profile_user: Option<String>,
    profile_pass: Option<String>,
) -> Option<Credentials> {
    let username = explicit_user.or_else(username_from_env).or(profile_user)?;
    let password = explicit_pass.or_else(password_from_env).or(profile_pass)?;
    Some(Credentials { username, password })
}
