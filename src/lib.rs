#![doc = include_str!("../README.md")]

pub mod config;
pub mod credentials;
pub mod error;
pub mod federation;
pub mod pkce;
pub mod session;
pub mod store;
pub mod token;

// Re-exports for convenient access
pub use config::{AppConfig, ConfigLoader};
pub use credentials::{AwsCredentials, CredentialCache, CredentialScope, REFRESH_BUFFER_MS};
pub use error::Error;
pub use federation::{CognitoIdentityBroker, IdentityBroker, LoginMap, login_map};
pub use pkce::{generate_code_challenge, generate_code_verifier};
pub use session::{AuthSession, BYPASS_TOKEN, Navigator};
pub use store::{MemoryStore, SessionStore, keys};
