//! OAuth 2.0 authorization-code flow with PKCE
//!
//! # Overview
//!
//! [`OAuthManager`] drives the whole lifecycle for any number of providers:
//!
//! 1. Generate a state token and (optionally) a PKCE verifier and challenge
//! 2. Build the provider's authorization URL and remember the pending flow
//! 3. Capture the redirect on a loopback [`CallbackListener`]
//! 4. Exchange code + verifier for tokens and persist them
//! 5. Serve valid access tokens, refreshing them when they expire
//!
//! # Example
//!
//! ```no_run
//! use voide_oauth::auth::OAuthManager;
//! use voide_oauth::types::{AuthorizeOptions, ManagerOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = OAuthManager::new(ManagerOptions::default())?;
//!
//!     let options = AuthorizeOptions::builder().client_id("my-client-id").build();
//!     manager
//!         .login("google", &options, |request| println!("Open: {}", request.url))
//!         .await?;
//!
//!     if let Some(token) = manager.get_access_token("google").await {
//!         println!("Authenticated, token length {}", token.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Token Storage
//!
//! Tokens live in `~/.voide/oauth-tokens.json` by default, keyed by provider.
//! The location can be changed through
//! [`ManagerOptions`](crate::types::ManagerOptions) or `$VOIDE_OAUTH_TOKEN_FILE`.
//!
//! # Security
//!
//! - State tokens are single use and expire after ten minutes
//! - PKCE prevents authorization code interception attacks
//! - The callback listener binds to 127.0.0.1 only
//! - Tokens are stored with user-only permissions (600)

pub mod callback;
pub(crate) mod exchange;
pub mod manager;
pub(crate) mod pending;
pub mod pkce;
pub mod token;

pub use callback::{CallbackListener, CallbackPayload};
pub use manager::{AuthorizationRequest, OAuthManager};
pub use pkce::{PkceChallenge, generate_state};
pub use token::{StorageError, TokenRecord, TokenStore};
