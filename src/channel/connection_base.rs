//! Sequence/timeout/retry bookkeeping shared by both channel roles (§4.4).
//!
//! Factored out of the per-role handler so tunneling and device-management
//! channels configure the same machinery with different numbers instead of
//! each re-implementing ack-waiting, per the Design Note in §9.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::ChannelError;
use crate::frame::body::AckStatus;

use super::ConnectionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Ok,
    Error(AckStatus),
}

pub struct ConnectionBase {
    seq_send: AtomicU8,
    seq_recv: AtomicU8,
    state: Mutex<ConnectionState>,
    last_msg_timestamp: Mutex<Instant>,
    timeout: Duration,
    max_retries: u32,
    ack_slot: Mutex<Option<AckOutcome>>,
    ack_notify: Notify,
}

impl ConnectionBase {
    pub fn new(timeout: Duration, max_retries: u32) -> Self {
        Self {
            seq_send: AtomicU8::new(0),
            seq_recv: AtomicU8::new(0),
            state: Mutex::new(ConnectionState::Ok),
            last_msg_timestamp: Mutex::new(Instant::now()),
            timeout,
            max_retries,
            ack_slot: Mutex::new(None),
            ack_notify: Notify::new(),
        }
    }

    /// 1s timeout / 3 retries, per §4.4.
    pub fn tunneling() -> Self {
        Self::new(Duration::from_secs(1), 3)
    }

    /// 10s timeout / 2 retries, per §4.4.
    pub fn device_management() -> Self {
        Self::new(Duration::from_secs(10), 2)
    }

    pub fn seq_recv(&self) -> u8 {
        self.seq_recv.load(Ordering::Relaxed)
    }

    pub fn seq_send(&self) -> u8 {
        self.seq_send.load(Ordering::Relaxed)
    }

    pub fn bump_recv(&self) {
        self.seq_recv.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bump_send(&self) {
        self.seq_send.fetch_add(1, Ordering::Relaxed);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    pub fn touch(&self) {
        *self.last_msg_timestamp.lock() = Instant::now();
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_msg_timestamp.lock())
    }

    /// Delivers an ack outcome to whichever caller is blocked in
    /// [`Self::send_and_wait`], if any.
    pub fn deliver_ack(&self, outcome: AckOutcome) {
        *self.ack_slot.lock() = Some(outcome);
        self.ack_notify.notify_one();
    }

    /// Sends a request via `send_once` and blocks until an ack arrives or
    /// the retry budget is exhausted, resending on each local timeout. This
    /// is the suspension primitive `send(mode = blocking)` rides on.
    pub async fn send_and_wait<F, Fut>(&self, mut send_once: F) -> Result<AckOutcome, ChannelError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        *self.ack_slot.lock() = None;
        self.set_state(ConnectionState::AckPending);
        for _ in 0..=self.max_retries {
            send_once().await;
            let woke = tokio::time::timeout(self.timeout, self.ack_notify.notified()).await;
            if woke.is_ok() {
                if let Some(outcome) = self.ack_slot.lock().take() {
                    self.set_state(match outcome {
                        AckOutcome::Ok => ConnectionState::Ok,
                        AckOutcome::Error(_) => ConnectionState::AckError,
                    });
                    return Ok(outcome);
                }
            }
        }
        self.set_state(ConnectionState::AckError);
        Err(ChannelError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_counters_increment_strictly() {
        let base = ConnectionBase::tunneling();
        assert_eq!(base.seq_recv(), 0);
        base.bump_recv();
        assert_eq!(base.seq_recv(), 1);
        assert_eq!(base.seq_send(), 0);
        base.bump_send();
        assert_eq!(base.seq_send(), 1);
    }

    #[tokio::test]
    async fn send_and_wait_resolves_on_ack() {
        let base = ConnectionBase::tunneling();
        let sent = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let sent_clone = sent.clone();
        let outcome = tokio::join!(
            base.send_and_wait(move || {
                sent_clone.fetch_add(1, Ordering::Relaxed);
                async {}
            }),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                base.deliver_ack(AckOutcome::Ok);
            }
        )
        .0
        .unwrap();
        assert_eq!(outcome, AckOutcome::Ok);
        assert_eq!(sent.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn send_and_wait_times_out_after_retry_budget() {
        let base = ConnectionBase::new(Duration::from_millis(5), 1);
        let attempts = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let attempts_clone = attempts.clone();
        let result = base
            .send_and_wait(move || {
                attempts_clone.fetch_add(1, Ordering::Relaxed);
                async {}
            })
            .await;
        assert!(matches!(result, Err(ChannelError::Timeout)));
        assert_eq!(attempts.load(Ordering::Relaxed), 2);
        assert_eq!(base.state(), ConnectionState::AckError);
    }
}
