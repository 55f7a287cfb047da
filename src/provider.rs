//! Static registry of OAuth provider configurations

use crate::error::{OAuthError, Result};

// Anthropic's public client for CLI tools
const ANTHROPIC_CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";

/// How a provider expects token endpoint requests to be encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenRequestFormat {
    /// `application/x-www-form-urlencoded` (RFC 6749)
    #[default]
    Form,
    /// JSON body (Anthropic)
    Json,
}

/// OAuth 2.0 provider configuration
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Unique provider key (e.g. "google")
    pub name: String,
    /// Authorization endpoint URL
    pub authorization_url: String,
    /// Token endpoint URL
    pub token_url: String,
    /// Scopes to request, in order
    pub scopes: Vec<String>,
    /// Whether PKCE is used by default
    pub use_pkce: bool,
    /// Client ID used when the caller does not supply one
    pub default_client_id: Option<String>,
    /// Client secret for confidential clients (GitHub OAuth apps)
    pub client_secret: Option<String>,
    /// Extra query parameters appended to the authorization URL
    pub extra_auth_params: Vec<(String, String)>,
    /// Token request encoding
    pub token_request_format: TokenRequestFormat,
}

impl ProviderConfig {
    /// Create a provider with the required endpoints; everything else defaulted
    pub fn new(
        name: impl Into<String>,
        authorization_url: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            authorization_url: authorization_url.into(),
            token_url: token_url.into(),
            scopes: Vec::new(),
            use_pkce: true,
            default_client_id: None,
            client_secret: None,
            extra_auth_params: Vec::new(),
            token_request_format: TokenRequestFormat::Form,
        }
    }

    /// Set the requested scopes
    #[must_use]
    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Enable or disable PKCE by default
    #[must_use]
    pub fn use_pkce(mut self, use_pkce: bool) -> Self {
        self.use_pkce = use_pkce;
        self
    }

    /// Set the default client ID
    #[must_use]
    pub fn default_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.default_client_id = Some(client_id.into());
        self
    }

    /// Set the client secret
    #[must_use]
    pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Append an extra authorization URL parameter
    #[must_use]
    pub fn extra_auth_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_auth_params.push((key.into(), value.into()));
        self
    }

    /// Set the token request encoding
    #[must_use]
    pub fn token_request_format(mut self, format: TokenRequestFormat) -> Self {
        self.token_request_format = format;
        self
    }

    /// Scopes joined with single spaces, as sent on the wire
    #[must_use]
    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }
}

/// Read-only table of known providers
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: Vec<ProviderConfig>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProviderRegistry {
    /// Create a registry from an explicit list; later entries win on name clashes
    #[must_use]
    pub fn new(providers: Vec<ProviderConfig>) -> Self {
        let mut deduped: Vec<ProviderConfig> = Vec::with_capacity(providers.len());
        for provider in providers {
            deduped.retain(|p| p.name != provider.name);
            deduped.push(provider);
        }
        Self { providers: deduped }
    }

    /// Registry with the providers this tool ships with
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(vec![
            ProviderConfig::new(
                "google",
                "https://accounts.google.com/o/oauth2/v2/auth",
                "https://oauth2.googleapis.com/token",
            )
            .scopes(["openid", "email", "profile"])
            .extra_auth_param("access_type", "offline")
            .extra_auth_param("prompt", "consent"),
            ProviderConfig::new(
                "azure",
                "https://login.microsoftonline.com/common/oauth2/v2.0/authorize",
                "https://login.microsoftonline.com/common/oauth2/v2.0/token",
            )
            .scopes(["openid", "profile", "offline_access"]),
            ProviderConfig::new(
                "github",
                "https://github.com/login/oauth/authorize",
                "https://github.com/login/oauth/access_token",
            )
            .scopes(["read:user", "repo"])
            .use_pkce(false),
            ProviderConfig::new(
                "anthropic",
                "https://claude.ai/oauth/authorize",
                "https://console.anthropic.com/v1/oauth/token",
            )
            .scopes(["user:profile", "user:inference"])
            .default_client_id(ANTHROPIC_CLIENT_ID)
            .token_request_format(TokenRequestFormat::Json),
        ])
    }

    /// Look up a provider by name
    ///
    /// # Errors
    ///
    /// Returns `OAuthError::Config` if the provider is not registered.
    pub fn get(&self, name: &str) -> Result<&ProviderConfig> {
        self.providers
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| OAuthError::config(format!("Unknown provider: {name}")))
    }

    /// Names of all registered providers, in registration order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name.as_str()).collect()
    }

    /// Iterate over all provider configurations
    pub fn iter(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.iter()
    }
}
