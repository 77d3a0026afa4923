pub mod credentials;
pub mod session_store;

pub use credentials::{resolve_credentials, token_from_env, Credentials};
pub use session_store::{CachedSession, SessionStore};
