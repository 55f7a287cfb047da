//! Loopback HTTP listener that captures the provider redirect
//!
//! The listener is a scoped resource: [`CallbackListener::start`] binds it,
//! [`CallbackListener::stop`] tears it down. Flows hold a lease taken with
//! [`CallbackListener::acquire`] and given back with
//! [`CallbackListener::release`]; the listener stops once no lease and no
//! waiter is left. One listener serves any number of concurrent flows; the
//! state token routes each redirect to the flow that issued it.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use reqwest::Url;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{OAuthError, Result};

const SUCCESS_HTML: &str = "<!DOCTYPE html><html><body style=\"font-family: system-ui; text-align: center; padding-top: 80px;\"><h2>Authentication successful</h2><p>You can close this tab and return to the terminal.</p></body></html>";
const ERROR_HTML: &str = "<!DOCTYPE html><html><body style=\"font-family: system-ui; text-align: center; padding-top: 80px;\"><h2>Authentication failed</h2><p>You can close this tab and retry from the terminal.</p></body></html>";
const INVALID_STATE_HTML: &str = "<!DOCTYPE html><html><body><h2>Invalid state</h2><p>This login link is unknown or has expired.</p></body></html>";
const NOT_FOUND_HTML: &str = "<!DOCTYPE html><html><body><h2>Not found</h2></body></html>";

const MAX_REQUEST_BYTES: usize = 8192;
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Query parameters of a provider redirect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackPayload {
    /// Authorization code (success)
    pub code: Option<String>,
    /// Echoed state token
    pub state: Option<String>,
    /// Provider error code (failure)
    pub error: Option<String>,
    /// Provider error description (failure)
    pub error_description: Option<String>,
}

impl CallbackPayload {
    /// Convert the redirect into the authorization code or the provider's error
    ///
    /// # Errors
    ///
    /// Returns `OAuthError::Authorization` when the provider reported an error.
    pub fn into_code(self) -> Result<String> {
        if let Some(error) = self.error {
            return Err(OAuthError::authorization(error, self.error_description));
        }
        self.code
            .ok_or_else(|| OAuthError::authorization("missing_code", None))
    }
}

type Waiters = Arc<Mutex<HashMap<String, oneshot::Sender<CallbackPayload>>>>;

#[derive(Debug)]
struct Running {
    addr: SocketAddr,
    leases: usize,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// Ephemeral loopback HTTP server for OAuth redirects
#[derive(Debug)]
pub struct CallbackListener {
    port: u16,
    path: String,
    running: Mutex<Option<Running>>,
    waiters: Waiters,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CallbackListener {
    /// Create a stopped listener for `127.0.0.1:<port><path>`; port `0` picks a free port on start
    pub fn new(port: u16, path: impl Into<String>) -> Self {
        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        Self {
            port,
            path,
            running: Mutex::new(None),
            waiters: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Bind the listener; a no-op returning the current address when already running
    ///
    /// # Errors
    ///
    /// Returns `OAuthError::Listener` if the port cannot be bound.
    pub async fn start(&self) -> Result<SocketAddr> {
        self.bind(false).await
    }

    /// Start the listener if needed and hold it open until [`Self::release`]
    ///
    /// # Errors
    ///
    /// Returns `OAuthError::Listener` if the port cannot be bound.
    pub async fn acquire(&self) -> Result<SocketAddr> {
        self.bind(true).await
    }

    async fn bind(&self, lease: bool) -> Result<SocketAddr> {
        let lease = usize::from(lease);
        {
            let mut running = lock(&self.running);
            if let Some(existing) = running.as_mut() {
                existing.leases += lease;
                return Ok(existing.addr);
            }
        }

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, self.port))
            .await
            .map_err(|e| {
                OAuthError::listener(format!(
                    "failed to bind 127.0.0.1:{}: {e}. Make sure no other process is using this port.",
                    self.port
                ))
            })?;
        let addr = listener
            .local_addr()
            .map_err(|e| OAuthError::listener(format!("local_addr failed: {e}")))?;

        let mut running = lock(&self.running);
        if let Some(existing) = running.as_mut() {
            // Lost a start race; keep the listener that is already serving.
            existing.leases += lease;
            return Ok(existing.addr);
        }

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(serve(
            listener,
            self.path.clone(),
            Arc::clone(&self.waiters),
            shutdown.clone(),
        ));
        *running = Some(Running {
            addr,
            leases: lease,
            shutdown,
            task,
        });
        tracing::debug!(%addr, path = %self.path, "OAuth callback listener started");
        Ok(addr)
    }

    /// Tear the listener down; safe to call when not running
    ///
    /// Flows still waiting on the listener observe a closed channel.
    pub fn stop(&self) {
        let running = lock(&self.running).take();
        lock(&self.waiters).clear();
        if let Some(running) = running {
            running.teardown();
        }
    }

    /// Whether the listener is currently bound
    #[must_use]
    pub fn is_running(&self) -> bool {
        lock(&self.running).is_some()
    }

    /// Configured port (`0` = any free port)
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bound address, if running
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        lock(&self.running).as_ref().map(|r| r.addr)
    }

    /// Redirect URI providers should send the browser back to
    ///
    /// Uses the bound port when running, otherwise the configured one.
    #[must_use]
    pub fn redirect_uri(&self) -> String {
        let port = self.local_addr().map_or(self.port, |a| a.port());
        format!("http://127.0.0.1:{port}{}", self.path)
    }

    /// Wait for the redirect carrying `state`
    pub fn register(&self, state: &str) -> oneshot::Receiver<CallbackPayload> {
        let (tx, rx) = oneshot::channel();
        lock(&self.waiters).insert(state.to_string(), tx);
        rx
    }

    /// Forget the flow for `state` and give back its lease, if any
    ///
    /// The listener stops when no lease and no waiter remains. The check and
    /// the teardown happen under the same lock as [`Self::acquire`], so a flow
    /// acquiring concurrently either keeps the listener alive or starts a new one.
    pub fn release(&self, state: &str) {
        let stopped = {
            let mut running = lock(&self.running);
            let mut waiters = lock(&self.waiters);
            waiters.remove(state);
            match running.as_mut() {
                Some(current) => {
                    current.leases = current.leases.saturating_sub(1);
                    if current.leases == 0 && waiters.is_empty() {
                        running.take()
                    } else {
                        None
                    }
                }
                None => None,
            }
        };
        if let Some(running) = stopped {
            running.teardown();
        }
    }
}

impl Running {
    fn teardown(self) {
        self.shutdown.cancel();
        self.task.abort();
        tracing::debug!(addr = %self.addr, "OAuth callback listener stopped");
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn serve(listener: TcpListener, path: String, waiters: Waiters, shutdown: CancellationToken) {
    loop {
        let socket = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, _)) => socket,
                Err(e) => {
                    tracing::warn!("OAuth callback accept failed: {e}");
                    continue;
                }
            },
        };

        tokio::select! {
            () = shutdown.cancelled() => break,
            result = handle_connection(socket, &path, &waiters) => {
                if let Err(e) = result {
                    tracing::debug!("OAuth callback request dropped: {e}");
                }
            }
        }
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    path: &str,
    waiters: &Waiters,
) -> std::io::Result<()> {
    let mut buffer = vec![0u8; MAX_REQUEST_BYTES];
    let size = match tokio::time::timeout(READ_TIMEOUT, socket.read(&mut buffer)).await {
        Ok(read) => read?,
        Err(_) => return Ok(()),
    };
    if size == 0 {
        return Ok(());
    }

    let request = String::from_utf8_lossy(&buffer[..size]);
    let (status, body) = match parse_request(&request, path) {
        Some(payload) => dispatch(payload, waiters),
        None => ("404 Not Found", NOT_FOUND_HTML),
    };

    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await
}

fn dispatch(payload: CallbackPayload, waiters: &Waiters) -> (&'static str, &'static str) {
    let waiter = payload
        .state
        .as_deref()
        .and_then(|state| lock(waiters).remove(state));
    let Some(waiter) = waiter else {
        tracing::warn!("OAuth callback with unknown state");
        return ("400 Bad Request", INVALID_STATE_HTML);
    };

    let failed = payload.error.is_some();
    if waiter.send(payload).is_err() {
        tracing::debug!("OAuth flow stopped waiting before its redirect arrived");
    }
    if failed {
        ("400 Bad Request", ERROR_HTML)
    } else {
        ("200 OK", SUCCESS_HTML)
    }
}

/// Parse the request line of a redirect; `None` for anything but `GET <path>?...`
fn parse_request(request: &str, path: &str) -> Option<CallbackPayload> {
    let mut parts = request.lines().next()?.split_whitespace();
    if parts.next()? != "GET" {
        return None;
    }
    parse_callback_target(parts.next()?, path)
}

/// Extract the redirect parameters from a request target such as `/callback?code=..&state=..`
#[must_use]
pub fn parse_callback_target(target: &str, path: &str) -> Option<CallbackPayload> {
    let url = Url::parse(&format!("http://127.0.0.1{target}")).ok()?;
    if url.path() != path {
        return None;
    }

    let mut payload = CallbackPayload {
        code: None,
        state: None,
        error: None,
        error_description: None,
    };
    for (key, value) in url.query_pairs() {
        let slot = match key.as_ref() {
            "code" => &mut payload.code,
            "state" => &mut payload.state,
            "error" => &mut payload.error,
            "error_description" => &mut payload.error_description,
            _ => continue,
        };
        *slot = Some(value.into_owned());
    }

    if payload.code.is_none() && payload.error.is_none() {
        return None;
    }
    Some(payload)
}
