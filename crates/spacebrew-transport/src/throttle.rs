//! Outbound send throttling
//!
//! Limits a connection to one data frame per interval. While the limiter is
//! engaged only the most recent pending frame is kept; older pending frames are
//! replaced. When the interval elapses the pending frame (if any) is flushed and
//! the limiter stays engaged for another interval, otherwise it disengages.
//!
//! # Example
//!
//! ```ignore
//! let throttle = SendThrottle::new(Duration::from_millis(16));
//!
//! throttle.submit(a, &sender)?; // -> Submitted::Sent
//! throttle.submit(b, &sender)?; // -> Submitted::Queued
//! throttle.submit(c, &sender)?; // -> Submitted::Replaced (b is dropped)
//! // 16ms later c is flushed
//! ```

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::error::TransportError;
use crate::traits::TransportSender;

/// Outcome of submitting a frame to the throttle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    /// Written to the transport immediately
    Sent,
    /// Held until the current interval elapses
    Queued,
    /// Held, replacing an older pending frame
    Replaced,
}

#[derive(Default)]
struct ThrottleState {
    blocked: bool,
    pending: Option<Bytes>,
    timer: Option<JoinHandle<()>>,
    cancelled: bool,
}

/// Per-connection send rate limiter
pub struct SendThrottle {
    interval: Duration,
    state: Arc<Mutex<ThrottleState>>,
}

impl SendThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: Arc::new(Mutex::new(ThrottleState::default())),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Send now if the limiter is idle, otherwise keep as the pending frame
    pub fn submit(
        &self,
        data: Bytes,
        sink: &Arc<dyn TransportSender>,
    ) -> Result<Submitted, TransportError> {
        let mut state = self.state.lock();
        if state.cancelled {
            return Err(TransportError::ConnectionClosed);
        }
        if self.interval.is_zero() {
            sink.try_send(data)?;
            return Ok(Submitted::Sent);
        }

        if state.blocked {
            return Ok(match state.pending.replace(data) {
                Some(_) => Submitted::Replaced,
                None => Submitted::Queued,
            });
        }

        sink.try_send(data)?;
        state.blocked = true;
        state.timer = Some(self.spawn_flush(Arc::clone(sink)));
        Ok(Submitted::Sent)
    }

    /// Whether a frame is waiting for the interval to elapse
    pub fn has_pending(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    /// Drop the pending frame and stop the timer; later submits fail
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        state.cancelled = true;
        state.pending = None;
        state.blocked = false;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }

    fn spawn_flush(&self, sink: Arc<dyn TransportSender>) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let interval = self.interval;

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                let mut state = state.lock();
                if state.cancelled {
                    break;
                }
                match state.pending.take() {
                    Some(data) => {
                        if let Err(e) = sink.try_send(data) {
                            trace!("Dropping throttled frame: {}", e);
                        }
                    }
                    None => {
                        state.blocked = false;
                        state.timer = None;
                        break;
                    }
                }
            }
        })
    }
}

impl Drop for SendThrottle {
    fn drop(&mut self) {
        if let Some(timer) = self.state.lock().timer.take() {
            timer.abort();
        }
    }
}
