//! In-memory table of authorization flows awaiting their redirect

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::pkce::generate_state;

/// An authorization flow that has been started but not yet redeemed
#[derive(Debug, Clone)]
pub struct PendingFlow {
    /// CSRF state token (table key)
    pub state: String,
    /// Provider the flow was started for
    pub provider: String,
    /// PKCE verifier, if the flow uses PKCE
    pub code_verifier: Option<String>,
    /// Client ID sent in the authorization URL
    pub client_id: String,
    /// Client secret to present at the token endpoint
    pub client_secret: Option<String>,
    /// Redirect URI sent in the authorization URL
    pub redirect_uri: String,
    /// Creation time, epoch millis
    pub created_at: u64,
    /// Expiry time, epoch millis
    pub expires_at: u64,
}

impl PendingFlow {
    /// Whether the flow is no longer redeemable at `now`
    #[must_use]
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

/// Parameters of a flow about to be registered
#[derive(Debug, Clone)]
pub struct NewFlow {
    pub provider: String,
    pub code_verifier: Option<String>,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
}

/// State-keyed table of pending flows; every entry is redeemable at most once
#[derive(Debug)]
pub struct PendingFlowTable {
    ttl: Duration,
    flows: Mutex<HashMap<String, PendingFlow>>,
}

impl PendingFlowTable {
    /// Create an empty table whose flows live for `ttl`
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            flows: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingFlow>> {
        // A poisoned table still holds consistent entries; keep serving it.
        self.flows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Register a new flow under a freshly generated, currently unique state
    pub fn insert(&self, flow: NewFlow, now: u64) -> PendingFlow {
        let mut flows = self.lock();
        sweep(&mut flows, now);

        let mut state = generate_state();
        while flows.contains_key(&state) {
            state = generate_state();
        }

        let pending = PendingFlow {
            state: state.clone(),
            provider: flow.provider,
            code_verifier: flow.code_verifier,
            client_id: flow.client_id,
            client_secret: flow.client_secret,
            redirect_uri: flow.redirect_uri,
            created_at: now,
            expires_at: now.saturating_add(self.ttl.as_millis() as u64),
        };
        flows.insert(state, pending.clone());
        pending
    }

    /// Remove and return the flow for `state` if it has not expired
    ///
    /// The entry is removed whether or not it is still valid.
    pub fn take(&self, state: &str, now: u64) -> Option<PendingFlow> {
        let mut flows = self.lock();
        let flow = flows.remove(state);
        sweep(&mut flows, now);
        flow.filter(|f| !f.is_expired(now))
    }

    /// Drop a flow without redeeming it (abandoned or failed before exchange)
    pub fn discard(&self, state: &str) -> bool {
        self.lock().remove(state).is_some()
    }

    /// Number of live flows at `now`
    pub fn len(&self, now: u64) -> usize {
        let mut flows = self.lock();
        sweep(&mut flows, now);
        flows.len()
    }
}

fn sweep(flows: &mut HashMap<String, PendingFlow>, now: u64) {
    let before = flows.len();
    flows.retain(|_, flow| !flow.is_expired(now));
    let purged = before - flows.len();
    if purged > 0 {
        tracing::debug!(purged, "Dropped expired OAuth flows");
    }
}
