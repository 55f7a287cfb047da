//! Manager and per-call configuration options

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use typed_builder::TypedBuilder;

use crate::clock::{Clock, SystemClock};
use crate::provider::ProviderRegistry;

/// Default loopback port for the callback listener
pub const DEFAULT_CALLBACK_PORT: u16 = 8976;

/// Default request path for the callback listener
pub const DEFAULT_CALLBACK_PATH: &str = "/callback";

/// Environment variable overriding the default token file location
pub const TOKEN_FILE_ENV: &str = "VOIDE_OAUTH_TOKEN_FILE";

/// How long an authorization flow stays redeemable
pub const DEFAULT_FLOW_TTL: Duration = Duration::from_secs(10 * 60);

/// Timeout for token endpoint requests
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Tokens this close to expiry are refreshed eagerly
pub const DEFAULT_REFRESH_SKEW: Duration = Duration::from_secs(60);

// ============================================================================
// Manager Options
// ============================================================================

/// Options for constructing an [`OAuthManager`](crate::OAuthManager)
#[derive(Debug, Clone, TypedBuilder)]
#[builder(
    builder_method(doc = "Create a new builder for ManagerOptions"),
    builder_type(doc = "Builder for ManagerOptions", vis = "pub"),
    build_method(doc = "Build the ManagerOptions")
)]
pub struct ManagerOptions {
    /// Token file path; see [`ManagerOptions::resolved_storage_path`]
    #[builder(default, setter(strip_option, into))]
    pub storage_path: Option<PathBuf>,

    /// Loopback port for the callback listener (`0` = any free port)
    #[builder(default = DEFAULT_CALLBACK_PORT)]
    pub callback_port: u16,

    /// Request path the provider redirects to
    #[builder(default = DEFAULT_CALLBACK_PATH.to_string(), setter(into))]
    pub callback_path: String,

    /// Lifetime of a pending authorization flow
    #[builder(default = DEFAULT_FLOW_TTL)]
    pub flow_ttl: Duration,

    /// How long `login` waits for the redirect (defaults to `flow_ttl`)
    #[builder(default, setter(strip_option))]
    pub callback_timeout: Option<Duration>,

    /// Timeout for token endpoint requests
    #[builder(default = DEFAULT_HTTP_TIMEOUT)]
    pub http_timeout: Duration,

    /// Refresh tokens this close to their expiry
    #[builder(default = DEFAULT_REFRESH_SKEW)]
    pub refresh_skew: Duration,

    /// Known providers
    #[builder(default)]
    pub registry: ProviderRegistry,

    /// Time source
    #[builder(default = Arc::new(SystemClock))]
    pub clock: Arc<dyn Clock>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ManagerOptions {
    /// Token file location
    ///
    /// An explicit `storage_path` wins, then `$VOIDE_OAUTH_TOKEN_FILE`, then
    /// `<home>/.voide/oauth-tokens.json`.
    #[must_use]
    pub fn resolved_storage_path(&self) -> PathBuf {
        if let Some(path) = &self.storage_path {
            return path.clone();
        }
        if let Some(path) = std::env::var_os(TOKEN_FILE_ENV).filter(|p| !p.is_empty()) {
            return PathBuf::from(path);
        }
        default_storage_path()
    }

    /// Redirect wait bound used by `login`
    #[must_use]
    pub fn effective_callback_timeout(&self) -> Duration {
        self.callback_timeout.unwrap_or(self.flow_ttl)
    }
}

/// `<home>/.voide/oauth-tokens.json`
#[must_use]
pub fn default_storage_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".voide")
        .join("oauth-tokens.json")
}

// ============================================================================
// Per-call Options
// ============================================================================

/// Options for starting an authorization flow
#[derive(Debug, Clone, Default, TypedBuilder)]
#[builder(
    builder_method(doc = "Create a new builder for AuthorizeOptions"),
    builder_type(doc = "Builder for AuthorizeOptions", vis = "pub"),
    build_method(doc = "Build the AuthorizeOptions")
)]
pub struct AuthorizeOptions {
    /// Client ID; required unless the provider has a default
    #[builder(default, setter(strip_option, into))]
    pub client_id: Option<String>,

    /// Client secret for confidential clients
    #[builder(default, setter(strip_option, into))]
    pub client_secret: Option<String>,

    /// Redirect URI; defaults to the callback listener URL
    #[builder(default, setter(strip_option, into))]
    pub redirect_uri: Option<String>,

    /// Force PKCE on or off, overriding the provider default
    #[builder(default, setter(strip_option))]
    pub use_pkce: Option<bool>,
}

/// Options for redeeming an authorization code
///
/// Anything left unset falls back to what the flow was started with.
#[derive(Debug, Clone, Default, TypedBuilder)]
#[builder(
    builder_method(doc = "Create a new builder for ExchangeOptions"),
    builder_type(doc = "Builder for ExchangeOptions", vis = "pub"),
    build_method(doc = "Build the ExchangeOptions")
)]
pub struct ExchangeOptions {
    /// Client ID override
    #[builder(default, setter(strip_option, into))]
    pub client_id: Option<String>,

    /// Client secret override
    #[builder(default, setter(strip_option, into))]
    pub client_secret: Option<String>,

    /// Redirect URI override; must match the one sent to the provider
    #[builder(default, setter(strip_option, into))]
    pub redirect_uri: Option<String>,
}
