//! Authentication status view for CLI display

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::auth::token::TokenRecord;

/// Snapshot of one provider's authentication state
///
/// Built from the stored record without refreshing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    /// Provider name
    pub provider: String,
    /// A token exists and has not expired
    pub authenticated: bool,
    /// Expiry in epoch millis, if the token expires
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    /// Granted scopes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// A refresh token is available
    pub refreshable: bool,
    /// Time the snapshot was taken, epoch millis
    #[serde(skip)]
    pub checked_at: u64,
}

impl AuthStatus {
    /// Derive the status of `provider` from its record (if any) at `now`
    #[must_use]
    pub fn from_record(provider: &str, record: Option<&TokenRecord>, now: u64) -> Self {
        Self {
            provider: provider.to_string(),
            authenticated: record.is_some_and(|r| !r.is_expired(now)),
            expires_at: record.and_then(|r| r.expires_at),
            scope: record.and_then(|r| r.scope.clone()),
            refreshable: record.is_some_and(|r| r.refresh_token.is_some()),
            checked_at: now,
        }
    }

    /// Short validity summary, e.g. "valid (1h 5m remaining)"
    #[must_use]
    pub fn validity(&self) -> String {
        match (self.authenticated, self.expires_at) {
            (false, None) => "not authenticated".to_string(),
            (false, Some(_)) if self.refreshable => "expired (will refresh on next use)".to_string(),
            (false, Some(_)) => "expired".to_string(),
            (true, None) => "valid (no expiry)".to_string(),
            (true, Some(expires_at)) => {
                let remaining = expires_at.saturating_sub(self.checked_at) / 1000;
                let hours = remaining / 3600;
                let mins = (remaining % 3600) / 60;
                format!("valid ({hours}h {mins}m remaining)")
            }
        }
    }

    /// Expiry rendered as an RFC 3339 UTC timestamp
    #[must_use]
    pub fn expires_at_utc(&self) -> Option<String> {
        let millis = i64::try_from(self.expires_at?).ok()?;
        DateTime::<Utc>::from_timestamp_millis(millis).map(|t| t.to_rfc3339())
    }
}

impl fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.provider, self.validity())?;
        if let Some(expires) = self.expires_at_utc() {
            write!(f, " expires {expires}")?;
        }
        if let Some(scope) = &self.scope {
            write!(f, " scope: {scope}")?;
        }
        Ok(())
    }
}
