//! Token lifecycle manager: authorization URLs, code exchange, resolution, revocation

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use reqwest::Url;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use super::callback::CallbackListener;
use super::exchange::{CodeGrant, RefreshGrant, TokenExchanger};
use super::pending::{NewFlow, PendingFlowTable};
use super::pkce::PkceChallenge;
use super::token::{TokenRecord, TokenStore};
use crate::clock::Clock;
use crate::error::{OAuthError, Result};
use crate::provider::ProviderRegistry;
use crate::types::{AuthStatus, AuthorizeOptions, ExchangeOptions, ManagerOptions};
use crate::utils::mask_token;

type RefreshCell = Arc<OnceCell<Option<TokenRecord>>>;

/// Result of starting an authorization flow
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// URL to open in the user's browser
    pub url: String,
    /// CSRF state bound to this flow
    pub state: String,
    /// PKCE verifier, when PKCE is in use
    pub code_verifier: Option<String>,
    /// Redirect URI sent to the provider
    pub redirect_uri: String,
}

/// OAuth token manager for all configured providers
///
/// Owns the pending-flow table, the callback listener and the token store.
/// Construct one per process (or use [`OAuthManager::global`]) and share it by
/// reference.
#[derive(Debug)]
pub struct OAuthManager {
    registry: ProviderRegistry,
    clock: Arc<dyn Clock>,
    pending: PendingFlowTable,
    listener: CallbackListener,
    exchanger: TokenExchanger,
    store: TokenStore,
    refresh_skew: Duration,
    callback_timeout: Duration,
    refreshes: Mutex<HashMap<String, RefreshCell>>,
}

static GLOBAL: OnceLock<OAuthManager> = OnceLock::new();

impl OAuthManager {
    /// Create a manager and load the token store
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(options: ManagerOptions) -> Result<Self> {
        let storage_path = options.resolved_storage_path();
        let callback_timeout = options.effective_callback_timeout();
        tracing::debug!(path = %storage_path.display(), "Opening OAuth token store");

        Ok(Self {
            exchanger: TokenExchanger::new(options.http_timeout)?,
            store: TokenStore::open(storage_path),
            pending: PendingFlowTable::new(options.flow_ttl),
            listener: CallbackListener::new(options.callback_port, options.callback_path),
            registry: options.registry,
            clock: options.clock,
            refresh_skew: options.refresh_skew,
            callback_timeout,
            refreshes: Mutex::new(HashMap::new()),
        })
    }

    /// Process-wide manager built from [`ManagerOptions::default`]
    ///
    /// # Errors
    ///
    /// Returns an error if the first construction fails.
    pub fn global() -> Result<&'static Self> {
        if let Some(manager) = GLOBAL.get() {
            return Ok(manager);
        }
        let manager = Self::new(ManagerOptions::default())?;
        Ok(GLOBAL.get_or_init(|| manager))
    }

    /// Known providers
    #[must_use]
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// The callback listener shared by all flows
    #[must_use]
    pub fn listener(&self) -> &CallbackListener {
        &self.listener
    }

    /// The token store
    #[must_use]
    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Number of authorization flows still awaiting their redirect
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len(self.now())
    }

    // ------------------------------------------------------------------------
    // Flow initiation and code exchange
    // ------------------------------------------------------------------------

    /// Build the authorization URL for `provider` and register a pending flow
    ///
    /// No network call is made.
    ///
    /// # Errors
    ///
    /// Returns `OAuthError::Config` for an unknown provider, when no client ID
    /// is available, or when no redirect URI is given while the callback
    /// listener is stopped on an ephemeral port (`callback_port = 0`).
    pub fn get_authorization_url(
        &self,
        provider: &str,
        options: &AuthorizeOptions,
    ) -> Result<AuthorizationRequest> {
        let config = self.registry.get(provider)?;
        let client_id = options
            .client_id
            .clone()
            .or_else(|| config.default_client_id.clone())
            .ok_or_else(|| {
                OAuthError::config(format!("No client_id configured for provider {provider}"))
            })?;
        let redirect_uri = match &options.redirect_uri {
            Some(uri) => uri.clone(),
            None if self.listener.port() == 0 && !self.listener.is_running() => {
                return Err(OAuthError::config(
                    "callback port 0 is only known once the listener runs; \
                     pass a redirect_uri or configure a fixed callback_port",
                ));
            }
            None => self.listener.redirect_uri(),
        };
        let use_pkce = options.use_pkce.unwrap_or(config.use_pkce);
        let pkce = use_pkce.then(PkceChallenge::generate);

        let flow = self.pending.insert(
            NewFlow {
                provider: provider.to_string(),
                code_verifier: pkce.as_ref().map(|p| p.verifier.clone()),
                client_id: client_id.clone(),
                client_secret: options
                    .client_secret
                    .clone()
                    .or_else(|| config.client_secret.clone()),
                redirect_uri: redirect_uri.clone(),
            },
            self.now(),
        );

        let scope = config.scope_string();
        let mut params: Vec<(&str, &str)> = vec![
            ("response_type", "code"),
            ("client_id", client_id.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
        ];
        if !scope.is_empty() {
            params.push(("scope", scope.as_str()));
        }
        params.push(("state", flow.state.as_str()));
        if let Some(pkce) = &pkce {
            params.push(("code_challenge", pkce.challenge.as_str()));
            params.push(("code_challenge_method", pkce.method()));
        }
        for (key, value) in &config.extra_auth_params {
            params.push((key.as_str(), value.as_str()));
        }

        let url = Url::parse_with_params(&config.authorization_url, &params)
            .map_err(|e| {
                OAuthError::config(format!(
                    "Invalid authorization URL for provider {provider}: {e}"
                ))
            })?
            .to_string();

        tracing::debug!(provider, pkce = use_pkce, %redirect_uri, "Built authorization URL");

        Ok(AuthorizationRequest {
            url,
            state: flow.state,
            code_verifier: pkce.map(|p| p.verifier),
            redirect_uri,
        })
    }

    /// Redeem an authorization code and store the resulting tokens
    ///
    /// The pending flow for `state` is consumed whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns `OAuthError::InvalidState` if `state` is unknown, expired, already
    /// used, or was issued for a different provider; `OAuthError::Network` if the
    /// token endpoint fails; `OAuthError::Storage` if the tokens cannot be saved.
    pub async fn exchange_code(
        &self,
        provider: &str,
        code: &str,
        state: &str,
        options: &ExchangeOptions,
    ) -> Result<TokenRecord> {
        let now = self.now();
        let flow = self
            .pending
            .take(state, now)
            .ok_or(OAuthError::InvalidState)?;
        if flow.provider != provider {
            tracing::warn!(
                provider,
                issued_for = %flow.provider,
                "Rejected authorization code redeemed under another provider"
            );
            return Err(OAuthError::InvalidState);
        }
        let config = self.registry.get(provider)?;
        tracing::debug!(
            provider,
            age_ms = now.saturating_sub(flow.created_at),
            "Redeeming authorization code"
        );

        let grant = CodeGrant {
            code,
            redirect_uri: options.redirect_uri.as_deref().unwrap_or(&flow.redirect_uri),
            client_id: options.client_id.as_deref().unwrap_or(&flow.client_id),
            client_secret: options
                .client_secret
                .as_deref()
                .or(flow.client_secret.as_deref()),
            code_verifier: flow.code_verifier.as_deref(),
        };
        let mut record = self
            .exchanger
            .exchange_code(config, &grant, self.now())
            .await?;
        if record.scope.is_none() && !config.scopes.is_empty() {
            record.scope = Some(config.scope_string());
        }

        self.store.set(provider, record.clone())?;
        tracing::info!(
            provider,
            token = %mask_token(&record.access_token),
            expires_at = ?record.expires_at,
            "OAuth tokens stored"
        );
        Ok(record)
    }

    /// Run a complete browser login for `provider`
    ///
    /// Starts the callback listener, hands the authorization request to
    /// `open_url`, waits for the redirect and exchanges the code. The listener
    /// and the pending flow are released on every exit path.
    ///
    /// # Errors
    ///
    /// Any error from [`Self::get_authorization_url`] or [`Self::exchange_code`],
    /// plus `OAuthError::Listener`, `OAuthError::Authorization` (provider
    /// reported an error) and `OAuthError::Timeout`.
    pub async fn login<F>(
        &self,
        provider: &str,
        options: &AuthorizeOptions,
        open_url: F,
    ) -> Result<TokenRecord>
    where
        F: FnOnce(&AuthorizationRequest),
    {
        self.login_with_cancel(provider, options, open_url, CancellationToken::new())
            .await
    }

    /// [`Self::login`], abortable through `cancel`
    ///
    /// # Errors
    ///
    /// As [`Self::login`], plus `OAuthError::Cancelled` once `cancel` fires.
    pub async fn login_with_cancel<F>(
        &self,
        provider: &str,
        options: &AuthorizeOptions,
        open_url: F,
        cancel: CancellationToken,
    ) -> Result<TokenRecord>
    where
        F: FnOnce(&AuthorizationRequest),
    {
        self.registry.get(provider)?;
        self.listener.acquire().await?;
        let mut guard = FlowGuard {
            manager: self,
            state: String::new(),
        };

        let request = self.get_authorization_url(provider, options)?;
        guard.state.clone_from(&request.state);
        let redirect = self.listener.register(&request.state);

        open_url(&request);
        tracing::info!(provider, "Waiting for OAuth redirect");

        let payload = tokio::select! {
            () = cancel.cancelled() => return Err(OAuthError::Cancelled),
            received = tokio::time::timeout(self.callback_timeout, redirect) => match received {
                Err(_) => {
                    return Err(OAuthError::timeout(format!(
                        "no OAuth redirect within {} seconds",
                        self.callback_timeout.as_secs()
                    )));
                }
                Ok(Err(_)) => {
                    return Err(OAuthError::listener(
                        "callback listener stopped before the redirect arrived",
                    ));
                }
                Ok(Ok(payload)) => payload,
            },
        };

        let code = payload.into_code()?;
        self.exchange_code(provider, &code, &request.state, &ExchangeOptions::default())
            .await
    }

    // ------------------------------------------------------------------------
    // Token resolution
    // ------------------------------------------------------------------------

    /// A currently valid access token for `provider`, refreshing if needed
    ///
    /// Returns `None` when there is no token, or it has expired and could not
    /// be refreshed. Refresh failures are logged, never returned.
    pub async fn get_access_token(&self, provider: &str) -> Option<String> {
        self.resolve(provider).await.map(|r| r.access_token)
    }

    /// Whether [`Self::get_access_token`] yields a token
    pub async fn is_authenticated(&self, provider: &str) -> bool {
        self.resolve(provider).await.is_some()
    }

    /// `Authorization` header value for a valid token
    pub async fn authorization_header(&self, provider: &str) -> Option<String> {
        self.resolve(provider)
            .await
            .map(|r| r.authorization_header())
    }

    /// The stored record for `provider`, without refreshing
    #[must_use]
    pub fn get_token_info(&self, provider: &str) -> Option<TokenRecord> {
        self.store.get(provider)
    }

    async fn resolve(&self, provider: &str) -> Option<TokenRecord> {
        let record = self.store.get(provider)?;
        let now = self.now();
        if !record.expires_within(now, self.refresh_skew.as_millis() as u64) {
            return Some(record);
        }

        if record.refresh_token.is_some() {
            if let Some(fresh) = self.refresh_single_flight(provider).await {
                if !fresh.is_expired(self.now()) {
                    return Some(fresh);
                }
            }
        }

        // Inside the skew window the old token is still usable
        (!record.is_expired(self.now())).then_some(record)
    }

    /// Refresh `provider`, sharing one in-flight request among concurrent callers
    async fn refresh_single_flight(&self, provider: &str) -> Option<TokenRecord> {
        let cell = {
            let mut refreshes = lock(&self.refreshes);
            Arc::clone(refreshes.entry(provider.to_string()).or_default())
        };

        let result = cell.get_or_init(|| self.refresh_now(provider)).await.clone();

        let mut refreshes = lock(&self.refreshes);
        if refreshes
            .get(provider)
            .is_some_and(|current| Arc::ptr_eq(current, &cell))
        {
            refreshes.remove(provider);
        }
        result
    }

    async fn refresh_now(&self, provider: &str) -> Option<TokenRecord> {
        let record = self.store.get(provider)?;
        let now = self.now();
        // Someone else may have refreshed since the caller looked
        if !record.expires_within(now, self.refresh_skew.as_millis() as u64) {
            return Some(record);
        }
        let refresh_token = record.refresh_token.as_deref()?;
        let config = self.registry.get(provider).ok()?;

        tracing::debug!(provider, "Refreshing OAuth access token");
        let grant = RefreshGrant {
            refresh_token,
            client_id: record
                .client_id
                .as_deref()
                .or(config.default_client_id.as_deref()),
            client_secret: record
                .client_secret
                .as_deref()
                .or(config.client_secret.as_deref()),
        };
        let mut fresh = match self.exchanger.refresh(config, &grant, now).await {
            Ok(fresh) => fresh,
            Err(e) => {
                tracing::warn!(provider, "Token refresh failed: {e}");
                return None;
            }
        };
        if fresh.scope.is_none() {
            fresh.scope = record.scope.clone();
        }

        // Revoked or replaced while the request was in flight
        let current = self.store.get(provider);
        if current.as_ref().and_then(|r| r.refresh_token.as_deref()) != Some(refresh_token) {
            tracing::debug!(provider, "Discarding refresh result for replaced token");
            return current;
        }

        if let Err(e) = self.store.set(provider, fresh.clone()) {
            tracing::warn!(provider, "Refreshed token could not be saved: {e}");
        }
        Some(fresh)
    }

    // ------------------------------------------------------------------------
    // Revocation and status
    // ------------------------------------------------------------------------

    /// Forget the tokens for `provider`; succeeds if none are stored
    ///
    /// # Errors
    ///
    /// Returns `OAuthError::Storage` if the token file cannot be written.
    pub fn revoke_token(&self, provider: &str) -> Result<()> {
        if self.store.delete(provider)? {
            tracing::info!(provider, "OAuth tokens removed");
        }
        Ok(())
    }

    /// Status of one provider, derived from the stored record
    #[must_use]
    pub fn status(&self, provider: &str) -> AuthStatus {
        AuthStatus::from_record(provider, self.store.get(provider).as_ref(), self.now())
    }

    /// Status of every registered provider, then any other stored provider
    #[must_use]
    pub fn statuses(&self) -> Vec<AuthStatus> {
        let mut names: Vec<String> = self
            .registry
            .names()
            .into_iter()
            .map(str::to_string)
            .collect();
        for stored in self.store.providers() {
            if !names.contains(&stored) {
                names.push(stored);
            }
        }
        names.iter().map(|name| self.status(name)).collect()
    }

    /// Re-read the token file
    pub fn reload(&self) {
        self.store.load();
    }
}

/// Gives back a login flow's listener lease and drops its pending entry
struct FlowGuard<'a> {
    manager: &'a OAuthManager,
    state: String,
}

impl Drop for FlowGuard<'_> {
    fn drop(&mut self) {
        self.manager.pending.discard(&self.state);
        self.manager.listener.release(&self.state);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::provider::ProviderConfig;
    use crate::types::DEFAULT_CALLBACK_PORT;
    use mockito::Matcher;
    use tempfile::TempDir;

    const NOW: u64 = 1_700_000_000_000;

    fn manager(dir: &TempDir, registry: ProviderRegistry) -> (OAuthManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(NOW));
        let options = ManagerOptions::builder()
            .storage_path(dir.path().join("oauth-tokens.json"))
            .callback_port(DEFAULT_CALLBACK_PORT)
            .registry(registry)
            .clock(clock.clone() as Arc<dyn Clock>)
            .build();
        (OAuthManager::new(options).unwrap(), clock)
    }

    fn mock_registry(server: &mockito::Server) -> ProviderRegistry {
        ProviderRegistry::new(vec![ProviderConfig::new(
            "test",
            format!("{}/authorize", server.url()),
            format!("{}/token", server.url()),
        )])
    }

    fn expired_record(refresh_token: &str) -> TokenRecord {
        let mut record = TokenRecord::bearer("stale");
        record.refresh_token = Some(refresh_token.to_string());
        record.expires_at = Some(NOW - 1);
        record
    }

    fn query_param(url: &str, key: &str) -> Option<String> {
        reqwest::Url::parse(url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn test_authorization_url_for_every_builtin_provider() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir, ProviderRegistry::builtin());
        let options = AuthorizeOptions::builder().client_id("abc").build();

        for config in ProviderRegistry::builtin().iter() {
            let request = manager
                .get_authorization_url(&config.name, &options)
                .unwrap();
            let url = &request.url;
            assert!(url.starts_with(&config.authorization_url), "{url}");
            assert_eq!(query_param(url, "response_type").as_deref(), Some("code"));
            assert_eq!(query_param(url, "client_id").as_deref(), Some("abc"));
            assert_eq!(query_param(url, "scope"), Some(config.scope_string()));
            assert_eq!(query_param(url, "state"), Some(request.state.clone()));

            let challenge = query_param(url, "code_challenge");
            let method = query_param(url, "code_challenge_method");
            if config.use_pkce {
                let verifier = request.code_verifier.as_deref().unwrap();
                assert_eq!(challenge, Some(crate::auth::pkce::challenge_s256(verifier)));
                assert_eq!(method.as_deref(), Some("S256"));
            } else {
                assert!(challenge.is_none());
                assert!(method.is_none());
                assert!(request.code_verifier.is_none());
            }
        }
        assert_eq!(manager.pending_count(), 4);
    }

    #[test]
    fn test_query_values_are_encoded() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir, ProviderRegistry::builtin());
        let authorize = AuthorizeOptions::builder().client_id("a b&c").build();
        let request = manager.get_authorization_url("google", &authorize).unwrap();
        assert!(request.url.contains("scope=openid+email+profile"));
        assert!(request.url.contains("client_id=a+b%26c"));
        assert!(request.url.contains("redirect_uri=http%3A%2F%2F127.0.0.1%3A8976%2Fcallback"));
        assert_eq!(query_param(&request.url, "client_id").as_deref(), Some("a b&c"));
        assert_eq!(query_param(&request.url, "access_type").as_deref(), Some("offline"));
    }

    #[test]
    fn test_existing_query_on_authorization_url_is_kept() {
        let dir = TempDir::new().unwrap();
        let registry = ProviderRegistry::new(vec![ProviderConfig::new(
            "tenant",
            "https://idp.example.com/authorize?tenant=acme",
            "https://idp.example.com/token",
        )]);
        let (manager, _) = manager(&dir, registry);
        let request = manager
            .get_authorization_url("tenant", &AuthorizeOptions::builder().client_id("abc").build())
            .unwrap();
        assert!(request.url.starts_with("https://idp.example.com/authorize?tenant=acme&"));
        assert_eq!(query_param(&request.url, "client_id").as_deref(), Some("abc"));
    }

    #[test]
    fn test_ephemeral_port_needs_explicit_redirect_uri() {
        let dir = TempDir::new().unwrap();
        let options = ManagerOptions::builder()
            .storage_path(dir.path().join("oauth-tokens.json"))
            .callback_port(0)
            .build();
        let manager = OAuthManager::new(options).unwrap();
        let authorize = AuthorizeOptions::builder().client_id("abc").build();

        let err = manager.get_authorization_url("google", &authorize).unwrap_err();
        assert!(matches!(err, OAuthError::Config(_)));
        assert!(err.to_string().contains("redirect_uri"));
        assert_eq!(manager.pending_count(), 0);

        let authorize = AuthorizeOptions::builder()
            .client_id("abc")
            .redirect_uri("http://127.0.0.1:7777/callback")
            .build();
        let request = manager.get_authorization_url("google", &authorize).unwrap();
        assert_eq!(request.redirect_uri, "http://127.0.0.1:7777/callback");
    }

    #[test]
    fn test_pkce_override_and_default_client_id() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir, ProviderRegistry::builtin());

        let request = manager
            .get_authorization_url("anthropic", &AuthorizeOptions::builder().use_pkce(false).build())
            .unwrap();
        assert!(query_param(&request.url, "client_id").is_some());
        assert!(query_param(&request.url, "code_challenge").is_none());

        let request = manager
            .get_authorization_url(
                "github",
                &AuthorizeOptions::builder().client_id("gh").use_pkce(true).build(),
            )
            .unwrap();
        assert!(query_param(&request.url, "code_challenge").is_some());
    }

    #[test]
    fn test_authorization_url_errors() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir, ProviderRegistry::builtin());

        let err = manager
            .get_authorization_url("nope", &AuthorizeOptions::default())
            .unwrap_err();
        assert!(matches!(err, OAuthError::Config(_)));

        let err = manager
            .get_authorization_url("google", &AuthorizeOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("client_id"));
        assert_eq!(manager.pending_count(), 0);
    }

    #[test]
    fn test_redirect_uri_defaults_to_listener() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir, ProviderRegistry::builtin());
        let request = manager
            .get_authorization_url("google", &AuthorizeOptions::builder().client_id("abc").build())
            .unwrap();
        assert_eq!(request.redirect_uri, manager.listener().redirect_uri());
    }

    #[tokio::test]
    async fn test_exchange_with_unknown_state() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir, ProviderRegistry::builtin());
        let err = manager
            .exchange_code("google", "code", "never-issued", &ExchangeOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid state"));
    }

    #[tokio::test]
    async fn test_exchange_with_state_from_other_provider() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir, ProviderRegistry::builtin());
        let request = manager
            .get_authorization_url("google", &AuthorizeOptions::builder().client_id("abc").build())
            .unwrap();

        let err = manager
            .exchange_code("azure", "code", &request.state, &ExchangeOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid state"));

        // The flow was consumed by the failed attempt
        let err = manager
            .exchange_code("google", "code", &request.state, &ExchangeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OAuthError::InvalidState));
    }

    #[tokio::test]
    async fn test_exchange_after_ttl_is_invalid_state() {
        let dir = TempDir::new().unwrap();
        let (manager, clock) = manager(&dir, ProviderRegistry::builtin());
        let request = manager
            .get_authorization_url("google", &AuthorizeOptions::builder().client_id("abc").build())
            .unwrap();

        clock.advance(Duration::from_secs(601));
        let err = manager
            .exchange_code("google", "code", &request.state, &ExchangeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OAuthError::InvalidState));
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_resolution_without_network() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir, ProviderRegistry::builtin());
        assert!(manager.get_access_token("unknown").await.is_none());

        let mut valid = TokenRecord::bearer("valid-token");
        valid.expires_at = Some(NOW + 3_600_000);
        manager.store().set("google", valid).unwrap();
        assert_eq!(
            manager.get_access_token("google").await.as_deref(),
            Some("valid-token")
        );

        let mut expired = TokenRecord::bearer("stale");
        expired.expires_at = Some(NOW - 1);
        manager.store().set("azure", expired).unwrap();
        assert!(manager.get_access_token("azure").await.is_none());
        assert!(!manager.is_authenticated("azure").await);

        manager
            .store()
            .set("github", TokenRecord::bearer("forever"))
            .unwrap();
        assert_eq!(
            manager.authorization_header("github").await.as_deref(),
            Some("Bearer forever")
        );
    }

    #[tokio::test]
    async fn test_token_inside_skew_without_refresh_token_is_still_returned() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir, ProviderRegistry::builtin());
        let mut record = TokenRecord::bearer("almost");
        record.expires_at = Some(NOW + 10_000);
        manager.store().set("google", record).unwrap();

        assert_eq!(
            manager.get_access_token("google").await.as_deref(),
            Some("almost")
        );
    }

    #[tokio::test]
    async fn test_refresh_on_expiry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(mockito::Matcher::UrlEncoded(
                "refresh_token".into(),
                "rt".into(),
            ))
            .with_status(200)
            .with_body(r#"{"access_token":"refreshed","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;

        let registry = ProviderRegistry::new(vec![ProviderConfig::new(
            "test",
            format!("{}/authorize", server.url()),
            format!("{}/token", server.url()),
        )]);
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir, registry);

        let mut record = TokenRecord::bearer("stale");
        record.refresh_token = Some("rt".to_string());
        record.expires_at = Some(NOW - 1);
        record.scope = Some("read".to_string());
        manager.store().set("test", record).unwrap();

        let (a, b) = tokio::join!(
            manager.get_access_token("test"),
            manager.get_access_token("test")
        );
        assert_eq!(a.as_deref(), Some("refreshed"));
        assert_eq!(b.as_deref(), Some("refreshed"));
        mock.assert_async().await;

        let stored = manager.get_token_info("test").unwrap();
        assert_eq!(stored.access_token, "refreshed");
        assert_eq!(stored.refresh_token.as_deref(), Some("rt"));
        assert_eq!(stored.scope.as_deref(), Some("read"));
        assert_eq!(stored.expires_at, Some(NOW + 3_600_000));
    }

    #[tokio::test]
    async fn test_failed_refresh_demotes_to_unauthenticated() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let registry = ProviderRegistry::new(vec![ProviderConfig::new(
            "test",
            format!("{}/authorize", server.url()),
            format!("{}/token", server.url()),
        )]);
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir, registry);

        let mut record = TokenRecord::bearer("stale");
        record.refresh_token = Some("rt".to_string());
        record.expires_at = Some(NOW - 1);
        manager.store().set("test", record.clone()).unwrap();

        assert!(manager.get_access_token("test").await.is_none());
        // Store untouched by the failed refresh
        assert_eq!(manager.get_token_info("test"), Some(record));
    }

    #[tokio::test]
    async fn test_refresh_presents_client_secret_used_at_login() {
        let mut server = mockito::Server::new_async().await;
        let _exchange = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("client_secret".into(), "s3cret".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"at-1","refresh_token":"rt-1","expires_in":3600}"#)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "rt-1".into()),
                Matcher::UrlEncoded("client_id".into(), "cid".into()),
                Matcher::UrlEncoded("client_secret".into(), "s3cret".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"at-2","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let (manager, clock) = manager(&dir, mock_registry(&server));
        let authorize = AuthorizeOptions::builder()
            .client_id("cid")
            .client_secret("s3cret")
            .build();
        let request = manager.get_authorization_url("test", &authorize).unwrap();
        let record = manager
            .exchange_code("test", "code", &request.state, &ExchangeOptions::default())
            .await
            .unwrap();
        assert_eq!(record.client_secret.as_deref(), Some("s3cret"));

        clock.advance(Duration::from_secs(3601));
        assert_eq!(
            manager.get_access_token("test").await.as_deref(),
            Some("at-2")
        );
        refresh.assert_async().await;

        let stored = manager.get_token_info("test").unwrap();
        assert_eq!(stored.client_id.as_deref(), Some("cid"));
        assert_eq!(stored.client_secret.as_deref(), Some("s3cret"));
    }

    #[tokio::test]
    async fn test_refresh_stores_rotated_refresh_token() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token":"at-2","refresh_token":"rt-2","expires_in":3600}"#)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir, mock_registry(&server));
        manager.store().set("test", expired_record("rt-1")).unwrap();

        assert_eq!(
            manager.get_access_token("test").await.as_deref(),
            Some("at-2")
        );
        let stored = manager.get_token_info("test").unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some("rt-2"));

        // The rotated token survives a reload from disk
        manager.reload();
        assert_eq!(
            manager.get_token_info("test").unwrap().refresh_token.as_deref(),
            Some("rt-2")
        );
    }

    #[tokio::test]
    async fn test_record_replaced_during_refresh_wins() {
        let mut server = mockito::Server::new_async().await;
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir, mock_registry(&server));
        let manager = Arc::new(manager);
        manager.store().set("test", expired_record("rt-old")).unwrap();

        let mut replacement = TokenRecord::bearer("relogin");
        replacement.refresh_token = Some("rt-new".to_string());
        replacement.expires_at = Some(NOW + 7_200_000);

        // A new login lands while the refresh request is still on the wire
        let during_refresh = Arc::clone(&manager);
        let stored_replacement = replacement.clone();
        let refresh = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body_from_request(move |_| {
                during_refresh
                    .store()
                    .set("test", stored_replacement.clone())
                    .unwrap();
                br#"{"access_token":"late","refresh_token":"rt-late","expires_in":3600}"#.to_vec()
            })
            .expect(1)
            .create_async()
            .await;

        assert_eq!(
            manager.get_access_token("test").await.as_deref(),
            Some("relogin")
        );
        refresh.assert_async().await;
        assert_eq!(manager.get_token_info("test"), Some(replacement));
    }

    #[tokio::test]
    async fn test_revoke() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir, ProviderRegistry::builtin());
        manager
            .store()
            .set("google", TokenRecord::bearer("tok"))
            .unwrap();

        manager.revoke_token("google").unwrap();
        assert!(manager.get_access_token("google").await.is_none());
        manager.revoke_token("google").unwrap();
        manager.revoke_token("never-stored").unwrap();
    }

    #[test]
    fn test_statuses_include_unregistered_stored_providers() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir, ProviderRegistry::builtin());
        manager
            .store()
            .set("legacy", TokenRecord::bearer("tok"))
            .unwrap();

        let statuses = manager.statuses();
        assert_eq!(statuses.len(), 5);
        assert!(statuses.iter().any(|s| s.provider == "legacy" && s.authenticated));
        assert!(!manager.status("google").authenticated);
    }
}
