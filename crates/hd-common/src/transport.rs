use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::lead::Lead;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// The worker's "send" effect. Deliberately opaque: implementations may
/// speak SMTP, SMS, or anything else. A failed delivery aborts the advance
/// and the queue entry is retried after its visibility lease expires.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn deliver(&self, lead: &Lead, message_number: u32) -> Result<(), TransportError>;
}

/// Canonical development transport: the "send" is a log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;

#[async_trait]
impl MessageTransport for LogTransport {
    async fn deliver(&self, lead: &Lead, message_number: u32) -> Result<(), TransportError> {
        info!(
            lead_id = %lead.id,
            email = %lead.email,
            message_number,
            of = lead.max_messages,
            "sending drip message"
        );
        Ok(())
    }
}
