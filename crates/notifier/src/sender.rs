//! Paced, retrying delivery of one rendered message.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use feedrelay_common::types::Destination;

use crate::pacer::Pacer;
use crate::truncate::shorten;

pub const MAX_ATTEMPTS: u32 = 5;
pub const RETRY_DELAY: Duration = Duration::from_secs(30);

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Transient; the attempt may be repeated.
    #[error("retryable: {0}")]
    Retryable(String),

    /// The request itself was rejected; repeating it cannot succeed.
    #[error("permanent: {0}")]
    Permanent(String),
}

/// One network call that delivers `text` to `destination`.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn deliver(
        &self,
        credential: &str,
        destination: &Destination,
        text: &str,
    ) -> Result<(), TransportError>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("delivery rejected: {0}")]
    Permanent(String),

    #[error("delivery failed after {attempts} attempts: {last_error}")]
    ExhaustedRetries { attempts: u32, last_error: String },

    #[error("delivery cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            retry_delay: RETRY_DELAY,
        }
    }
}

/// Delivers messages through a [`MessageTransport`], pacing every attempt
/// through a shared [`Pacer`] and retrying transient failures.
pub struct RateLimitedSender {
    transport: Arc<dyn MessageTransport>,
    pacer: Pacer,
    policy: RetryPolicy,
}

impl RateLimitedSender {
    pub fn new(transport: Arc<dyn MessageTransport>, pacer: Pacer, policy: RetryPolicy) -> Self {
        Self {
            transport,
            pacer,
            policy,
        }
    }

    /// Deliver `text`, shortened to the platform limit.
    ///
    /// Only `Ok(())` means the message was delivered. `cancel` interrupts
    /// pacing and retry waits, never an attempt already in flight.
    pub async fn send(
        &self,
        credential: &str,
        destination: &Destination,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<(), SendError> {
        let text = shorten(text);
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if !self.pacer.wait_turn(cancel).await {
                return Err(SendError::Cancelled);
            }

            match self.transport.deliver(credential, destination, &text).await {
                Ok(()) => {
                    tracing::debug!(%destination, attempt, "Message delivered");
                    return Ok(());
                }
                Err(TransportError::Permanent(reason)) => {
                    tracing::warn!(%destination, attempt, error = %reason, "Message rejected");
                    return Err(SendError::Permanent(reason));
                }
                Err(TransportError::Retryable(reason)) => {
                    tracing::warn!(
                        %destination,
                        attempt,
                        max_attempts,
                        error = %reason,
                        "Delivery attempt failed"
                    );
                    last_error = reason;
                }
            }

            if attempt < max_attempts {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(SendError::Cancelled),
                    _ = tokio::time::sleep(self.policy.retry_delay) => {}
                }
            }
        }

        Err(SendError::ExhaustedRetries {
            attempts: max_attempts,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tokio::time::Instant;

    use crate::pacer::MIN_SEND_INTERVAL;

    /// Replays scripted outcomes and records when each attempt started.
    #[derive(Default)]
    struct ScriptedTransport {
        outcomes: Mutex<VecDeque<Result<(), TransportError>>>,
        attempts: Mutex<Vec<(Instant, String)>>,
    }

    impl ScriptedTransport {
        fn with(outcomes: Vec<Result<(), TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                attempts: Mutex::default(),
            })
        }

        fn attempt_count(&self) -> usize {
            self.attempts.lock().len()
        }
    }

    #[async_trait]
    impl MessageTransport for ScriptedTransport {
        async fn deliver(
            &self,
            _credential: &str,
            _destination: &Destination,
            text: &str,
        ) -> Result<(), TransportError> {
            self.attempts.lock().push((Instant::now(), text.to_string()));
            self.outcomes.lock().pop_front().unwrap_or(Ok(()))
        }
    }

    fn retryable() -> Result<(), TransportError> {
        Err(TransportError::Retryable("502 Bad Gateway".to_string()))
    }

    fn dest() -> Destination {
        Destination {
            chat_id: 42,
            thread_id: None,
        }
    }

    fn sender(transport: Arc<ScriptedTransport>) -> RateLimitedSender {
        RateLimitedSender::new(transport, Pacer::default(), RetryPolicy::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_fifth_attempt() {
        let transport = ScriptedTransport::with(vec![retryable(); 4]);
        let s = sender(transport.clone());
        let start = Instant::now();

        s.send("tok", &dest(), "hi", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(transport.attempt_count(), 5);
        assert!(start.elapsed() >= RETRY_DELAY * 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_five_attempts() {
        let transport = ScriptedTransport::with(vec![retryable(); 5]);
        let err = sender(transport.clone())
            .send("tok", &dest(), "hi", &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            SendError::ExhaustedRetries {
                attempts: 5,
                last_error: "502 Bad Gateway".to_string()
            }
        );
        assert_eq!(transport.attempt_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let transport = ScriptedTransport::with(vec![Err(TransportError::Permanent(
            "Bad Request: can't parse entities".to_string(),
        ))]);
        let err = sender(transport.clone())
            .send("tok", &dest(), "<b>", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SendError::Permanent(_)));
        assert_eq!(transport.attempt_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_sends_are_paced() {
        let transport = ScriptedTransport::with(vec![]);
        let s = sender(transport.clone());
        let cancel = CancellationToken::new();

        s.send("tok", &dest(), "one", &cancel).await.unwrap();
        s.send("other-tok", &dest(), "two", &cancel).await.unwrap();

        let attempts = transport.attempts.lock();
        assert_eq!(attempts.len(), 2);
        assert!(attempts[1].0 - attempts[0].0 >= MIN_SEND_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_attempts_are_also_paced_against_other_senders() {
        let transport = ScriptedTransport::with(vec![retryable()]);
        let pacer = Pacer::default();
        let a = RateLimitedSender::new(transport.clone(), pacer.clone(), RetryPolicy::default());
        let b = RateLimitedSender::new(transport.clone(), pacer, RetryPolicy::default());
        let cancel = CancellationToken::new();

        let (dest_a, dest_b) = (dest(), dest());
        let (ra, rb) = tokio::join!(
            a.send("a", &dest_a, "from a", &cancel),
            b.send("b", &dest_b, "from b", &cancel)
        );
        ra.unwrap();
        rb.unwrap();

        let attempts = transport.attempts.lock();
        assert_eq!(attempts.len(), 3);
        for pair in attempts.windows(2) {
            assert!(pair[1].0 - pair[0].0 >= MIN_SEND_INTERVAL);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_retry_wait() {
        let transport = ScriptedTransport::with(vec![retryable(); 5]);
        let s = Arc::new(sender(transport.clone()));
        let cancel = CancellationToken::new();

        let task = {
            let s = s.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { s.send("tok", &dest(), "hi", &cancel).await })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();

        assert_eq!(task.await.unwrap(), Err(SendError::Cancelled));
        assert_eq!(transport.attempt_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_text_is_shortened_before_delivery() {
        let transport = ScriptedTransport::with(vec![]);
        let text = "z".repeat(10_000);
        sender(transport.clone())
            .send("tok", &dest(), &text, &CancellationToken::new())
            .await
            .unwrap();

        let attempts = transport.attempts.lock();
        assert_eq!(
            attempts[0].1.chars().count(),
            crate::truncate::MAX_MESSAGE_CHARS
        );
    }
}
