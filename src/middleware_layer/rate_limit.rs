//! Fixed-window request throttling keyed by client address.
//!
//! Every key gets a counter and a window end. The first request from a key, or
//! the first one after its window has ended, starts a new window with a count of
//! one; later requests inside the window are admitted until the count reaches the
//! limit. Because windows are fixed rather than sliding, a client that bursts
//! right before and right after a window boundary can get up to twice the limit
//! through in a short span.
//!
//! A background sweeper drops keys that have been quiet for three windows.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, header},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::clock::SharedClock;
use crate::middleware_layer::responder::SharedResponder;

/// Response header advertising the configured ceiling.
pub const RATE_LIMIT_HEADER: &str = "x-ratelimit-limit";

/// Idle keys are forgotten after this many windows without a request.
const IDLE_WINDOWS: i32 = 3;

#[derive(Debug, Clone)]
struct Visitor {
    count: u32,
    window_reset_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
}

struct Inner {
    limit: u32,
    window: Duration,
    window_delta: chrono::Duration,
    clock: SharedClock,
    visitors: Mutex<HashMap<String, Visitor>>,
}

/// A fixed-window rate limiter.
///
/// Cloning is cheap and every clone shares the same table. All reads and writes
/// of the table happen under one mutex, so a check-and-increment is atomic and
/// concurrent requests from one key can never exceed the limit.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

impl RateLimiter {
    /// Creates a new `RateLimiter`.
    ///
    /// # Arguments
    ///
    /// * `limit` - Requests admitted per key per window. Must be non-zero.
    /// * `window` - Window length. Must be non-zero.
    /// * `clock` - Time source for window bookkeeping.
    ///
    /// # Returns
    ///
    /// A `Result` containing the limiter, or an error for an unusable configuration.
    pub fn new(limit: u32, window: Duration, clock: SharedClock) -> anyhow::Result<Self> {
        if limit == 0 {
            anyhow::bail!("rate limit must be greater than zero");
        }
        if window.is_zero() {
            anyhow::bail!("rate limit window must be greater than zero");
        }
        let window_delta = chrono::Duration::from_std(window)
            .map_err(|e| anyhow::anyhow!("rate limit window out of range: {}", e))?;

        Ok(Self {
            inner: Arc::new(Inner {
                limit,
                window,
                window_delta,
                clock,
                visitors: Mutex::new(HashMap::new()),
            }),
        })
    }

    fn visitors(&self) -> MutexGuard<'_, HashMap<String, Visitor>> {
        // The table holds plain counters, so a panic mid-update cannot leave it
        // in a state worse than a slightly wrong count.
        self.inner
            .visitors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The configured per-window ceiling.
    pub fn limit(&self) -> u32 {
        self.inner.limit
    }

    /// The configured window length.
    pub fn window(&self) -> Duration {
        self.inner.window
    }

    /// Records a request from `key` and reports whether it may proceed.
    pub fn allow(&self, key: &str) -> bool {
        let now = self.inner.clock.now();
        let mut visitors = self.visitors();

        if let Some(visitor) = visitors.get_mut(key) {
            visitor.last_seen_at = now;

            if now > visitor.window_reset_at {
                visitor.count = 1;
                visitor.window_reset_at = now + self.inner.window_delta;
                return true;
            }

            if visitor.count < self.inner.limit {
                visitor.count += 1;
                return true;
            }

            return false;
        }

        visitors.insert(
            key.to_string(),
            Visitor {
                count: 1,
                window_reset_at: now + self.inner.window_delta,
                last_seen_at: now,
            },
        );
        true
    }

    /// Removes keys idle for more than three windows. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.inner.clock.now();
        let idle_cutoff = self.inner.window_delta * IDLE_WINDOWS;
        let mut visitors = self.visitors();
        let before = visitors.len();
        visitors.retain(|_, visitor| now - visitor.last_seen_at <= idle_cutoff);
        before - visitors.len()
    }

    /// Starts the background task that calls [`RateLimiter::sweep`] once per window.
    pub fn spawn_sweeper(&self) -> SweeperHandle {
        let limiter = self.clone();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let period = self.inner.window;

        let task = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = limiter.sweep();
                        if removed > 0 {
                            tracing::debug!("🧹 Rate limiter swept {} idle key(s)", removed);
                        }
                    }
                    _ = &mut stop_rx => {
                        tracing::debug!("🛑 Rate limiter sweeper stopping");
                        break;
                    }
                }
            }
        });

        SweeperHandle { stop_tx, task }
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.visitors().len()
    }
}

/// Owns a running sweeper task.
pub struct SweeperHandle {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signals the sweeper to exit and waits for it.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(());
        if let Err(e) = self.task.await {
            tracing::error!("❌ Rate limiter sweeper ended abnormally: {}", e);
        }
    }
}

/// Identifies the client for rate limiting and session bookkeeping.
///
/// Proxy headers are taken at face value; see DESIGN.md for the trust gap this
/// leaves open. Falls back to the TCP peer address, then to `"unknown"`.
pub fn client_address(headers: &HeaderMap, extensions: &axum::http::Extensions) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// State for the rate-limit stage of one pipeline.
#[derive(Clone)]
pub struct RateLimitStage {
    pub limiter: RateLimiter,
    pub responder: SharedResponder,
}

/// A middleware that rejects clients over their per-window budget with 429.
///
/// # Arguments
///
/// * `stage` - The limiter and responder for this pipeline.
/// * `req` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// The downstream `Response`, or a 429 carrying `Retry-After` (the window length,
/// advisory only) and `X-RateLimit-Limit`.
pub async fn rate_limit(
    State(stage): State<RateLimitStage>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let key = client_address(req.headers(), req.extensions());

    if stage.limiter.allow(&key) {
        return next.run(req).await;
    }

    tracing::warn!("🚦 Rate limit exceeded for {}", key);

    let retry_after = stage.limiter.window().as_secs().max(1);
    let mut response = stage.responder.too_many_requests();
    let headers = response.headers_mut();
    headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    headers.insert(RATE_LIMIT_HEADER, HeaderValue::from(stage.limiter.limit()));
    response
}
