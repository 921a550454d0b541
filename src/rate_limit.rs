//! FIFO admission queue that keeps calls to the translation service under a
//! request quota.
//!
//! Every outbound call waits for a [`Permit`] from the shared [`RateLimiter`].
//! At most `max_requests` permits are handed out per `window`; once the window
//! is full, further callers wait in the queue until the oldest admission ages
//! out. Responses replayed from the cache give their slot back through
//! [`RateLimiter::complete`], so they keep their place in the queue without
//! spending real quota.

use crate::error::SyncError;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Quota enforced by the limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum number of admissions per window (>= 1)
    pub max_requests: u32,
    /// Length of the window (> 0)
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window: Duration) -> Result<Self, SyncError> {
        if max_requests == 0 {
            return Err(SyncError::Configuration(
                "rate limit max_requests must be at least 1".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(SyncError::Configuration(
                "rate limit window must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            max_requests,
            window,
        })
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_secs(1),
        }
    }
}

/// Proof of admission, handed back to [`RateLimiter::complete`] once the
/// response is known
#[derive(Debug)]
#[must_use = "a permit should be returned through RateLimiter::complete"]
pub struct Permit {
    seq: u64,
}

impl Permit {
    /// Position of the request in enqueue order
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

struct Waiter {
    seq: u64,
    admit: oneshot::Sender<Permit>,
}

struct Admitted {
    seq: u64,
    at: Instant,
}

#[derive(Default)]
struct State {
    queue: VecDeque<Waiter>,
    window: VecDeque<Admitted>,
    timer: Option<JoinHandle<()>>,
    next_seq: u64,
}

struct Shared {
    config: RateLimitConfig,
    state: Mutex<State>,
}

/// Shared admission queue; clones refer to the same queue and quota
#[derive(Clone)]
pub struct RateLimiter {
    shared: Arc<Shared>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.shared.config
    }

    /// Join the back of the queue.
    ///
    /// Admission is never granted inside this call; the queue is drained on a
    /// separate task, so the returned future always has to be awaited.
    pub fn enqueue(&self) -> Admission {
        let (admit, rx) = oneshot::channel();
        let seq = {
            let mut state = self.shared.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.queue.push_back(Waiter { seq, admit });
            seq
        };

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move { shared.shift() });

        Admission {
            seq,
            rx,
            shared: Arc::downgrade(&self.shared),
            finished: false,
        }
    }

    /// Report that the admitted request finished.
    ///
    /// A response served from the cache gives its slot in the window back.
    pub fn complete(&self, permit: Permit, cached: bool) {
        if cached {
            self.shared.refund(permit.seq);
        }
        self.shared.shift();
    }

    /// Number of requests still waiting for admission
    pub fn queued(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Number of admissions currently counted against the window
    pub fn in_window(&self) -> usize {
        let mut state = self.shared.lock();
        self.shared.expire(&mut state, Instant::now());
        state.window.len()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn expire(&self, state: &mut State, now: Instant) {
        while let Some(oldest) = state.window.front() {
            if oldest.at + self.config.window > now {
                break;
            }
            state.window.pop_front();
        }
    }

    /// Admit queued requests while the window has room
    fn shift(self: &Arc<Self>) {
        let mut state = self.lock();
        let now = Instant::now();
        self.expire(&mut state, now);

        let max = self.config.max_requests as usize;
        while state.window.len() < max {
            let Some(waiter) = state.queue.pop_front() else {
                break;
            };
            if waiter.admit.send(Permit { seq: waiter.seq }).is_err() {
                debug!(seq = waiter.seq, "Skipping cancelled request");
                continue;
            }
            state.window.push_back(Admitted {
                seq: waiter.seq,
                at: now,
            });
            debug!(
                seq = waiter.seq,
                in_window = state.window.len(),
                queued = state.queue.len(),
                "Request admitted"
            );
        }

        if state.timer.is_none() && !state.window.is_empty() {
            self.arm(&mut state);
        }
    }

    /// Schedule the next pass for the moment the oldest admission leaves the window
    fn arm(self: &Arc<Self>, state: &mut State) {
        let Some(oldest) = state.window.front() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let deadline = oldest.at + self.config.window;
        let weak = Arc::downgrade(self);
        state.timer = Some(runtime.spawn(async move {
            sleep_until(deadline).await;
            if let Some(shared) = weak.upgrade() {
                shared.lock().timer = None;
                shared.shift();
            }
        }));
    }

    fn refund(&self, seq: u64) {
        Self::release(&mut self.lock(), seq);
    }

    fn release(state: &mut State, seq: u64) {
        if let Some(position) = state.window.iter().position(|a| a.seq == seq) {
            state.window.remove(position);
            debug!(seq, in_window = state.window.len(), "Slot released");
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }
}

/// A place in the queue. Resolves to a [`Permit`] once admitted.
///
/// Dropping it before admission cancels the request: it leaves the queue and
/// the next request is considered straight away.
#[must_use = "an admission does nothing unless awaited"]
pub struct Admission {
    seq: u64,
    rx: oneshot::Receiver<Permit>,
    shared: Weak<Shared>,
    finished: bool,
}

impl Admission {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Give up the place in the queue
    pub fn cancel(self) {}
}

impl Future for Admission {
    type Output = Result<Permit, SyncError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = Pin::new(&mut self.rx).poll(cx);
        if result.is_ready() {
            self.finished = true;
        }
        result.map(|received| received.map_err(|_| SyncError::QueueCancelled))
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let Some(shared) = self.shared.upgrade() else {
            return;
        };

        {
            // Held across both checks so a concurrent shift can't admit in between
            let mut state = shared.lock();
            match self.rx.try_recv() {
                // Admitted but never used
                Ok(permit) => Shared::release(&mut state, permit.seq),
                Err(_) => state.queue.retain(|waiter| waiter.seq != self.seq),
            }
        }
        debug!(seq = self.seq, "Request cancelled");
        shared.shift();
    }
}
