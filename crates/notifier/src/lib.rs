//! Outbound delivery.
//!
//! [`RateLimitedSender`] wraps a [`MessageTransport`] with global pacing and
//! bounded retry. [`TelegramClient`] is the production transport.

pub mod pacer;
pub mod sender;
pub mod telegram;
pub mod truncate;

pub use pacer::Pacer;
pub use sender::{
    MessageTransport, RateLimitedSender, RetryPolicy, SendError, TransportError,
};
pub use telegram::TelegramClient;
