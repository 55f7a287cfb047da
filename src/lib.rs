//! # voide-oauth
//!
//! Client-side OAuth 2.0 token manager for desktop and CLI tools.
//! Authorization code flow with PKCE, loopback redirect capture, persistent
//! token storage and transparent refresh. Async/await, tokio-based.
//!
//! ## Quick Start
//!
//! Log in through the browser with [`OAuthManager::login`]:
//!
//! ```no_run
//! use voide_oauth::{AuthorizeOptions, ManagerOptions, OAuthManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = OAuthManager::new(ManagerOptions::default())?;
//!     let options = AuthorizeOptions::builder().client_id("my-client-id").build();
//!
//!     let record = manager
//!         .login("github", &options, |request| {
//!             println!("Open this URL to continue: {}", request.url);
//!         })
//!         .await?;
//!     println!("Logged in, token expires at {:?}", record.expires_at);
//!     Ok(())
//! }
//! ```
//!
//! ## Core Features
//!
//! ### 1. Manual Flow with [`OAuthManager::get_authorization_url`]
//!
//! When the redirect is captured elsewhere, drive the two halves yourself:
//!
//! ```no_run
//! # use voide_oauth::{AuthorizeOptions, ExchangeOptions, OAuthManager};
//! # async fn example(manager: &OAuthManager) -> voide_oauth::Result<()> {
//! let request = manager.get_authorization_url(
//!     "google",
//!     &AuthorizeOptions::builder().client_id("my-client-id").build(),
//! )?;
//! // ... user approves, the redirect delivers `code` and `state` ...
//! # let code = "code";
//! manager
//!     .exchange_code("google", code, &request.state, &ExchangeOptions::default())
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### 2. Token Resolution
//!
//! [`OAuthManager::get_access_token`] returns a valid token or `None`. Expired
//! tokens are refreshed first when a refresh token is available, and concurrent
//! callers share a single refresh request.
//!
//! ```no_run
//! # use voide_oauth::OAuthManager;
//! # async fn example(manager: &OAuthManager) {
//! match manager.get_access_token("google").await {
//!     Some(token) => println!("Bearer {token}"),
//!     None => println!("Please log in"),
//! }
//! # }
//! ```
//!
//! ### 3. Custom Providers
//!
//! ```
//! use voide_oauth::{ManagerOptions, ProviderConfig, ProviderRegistry};
//!
//! let registry = ProviderRegistry::new(vec![
//!     ProviderConfig::new(
//!         "gitlab",
//!         "https://gitlab.com/oauth/authorize",
//!         "https://gitlab.com/oauth/token",
//!     )
//!     .scopes(["read_user"]),
//! ]);
//! let options = ManagerOptions::builder().registry(registry).build();
//! assert!(options.registry.get("gitlab").is_ok());
//! ```
//!
//! ## Architecture
//!
//! - [`auth`]: PKCE, pending flows, callback listener, token store and the manager
//! - [`provider`]: Provider configurations and the built-in registry
//! - [`types`]: Options and status views
//! - [`clock`]: Injectable time source
//! - [`error`]: Error types and handling
//! - [`utils`]: String helpers
//!
//! ## Logging
//!
//! This crate uses [`tracing`](https://crates.io/crates/tracing) for structured logging.
//! Tokens never appear in log output; they are masked to a short prefix.
//! To see logs, attach a tracing subscriber in your application:
//!
//! ```rust,ignore
//! tracing_subscriber::fmt::init();
//! ```
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T, OAuthError>`](Result):
//!
//! ```no_run
//! # use voide_oauth::{ExchangeOptions, OAuthError, OAuthManager};
//! # async fn example(manager: &OAuthManager) {
//! match manager.exchange_code("google", "code", "state", &ExchangeOptions::default()).await {
//!     Ok(record) => println!("expires at {:?}", record.expires_at),
//!     Err(OAuthError::InvalidState) => eprintln!("Login link expired, start again"),
//!     Err(e) => eprintln!("Error: {e}"),
//! }
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod clock;
pub mod error;
pub mod provider;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use auth::{
    AuthorizationRequest, CallbackListener, OAuthManager, StorageError, TokenRecord, TokenStore,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{OAuthError, Result};
pub use provider::{ProviderConfig, ProviderRegistry, TokenRequestFormat};
pub use types::{AuthStatus, AuthorizeOptions, ExchangeOptions, ManagerOptions};

/// Version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
