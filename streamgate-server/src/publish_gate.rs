use bytes::Bytes;
use metrics::counter;
use std::sync::Arc;
use streamgate_core::{subject, Engine, PublishAck};
use tracing::trace;

use crate::error::{GatewayError, Result};
use crate::gateway_metrics::{LOG_BYTES_IN_TOTAL, LOG_MESSAGES_IN_TOTAL};

/// Largest payload accepted for a single publish (1 MiB).
pub(crate) const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// PublishGate forwards single appends to the engine once the payload size and the
/// subject have been checked.
#[derive(Clone)]
pub(crate) struct PublishGate {
    engine: Arc<dyn Engine>,
}

impl PublishGate {
    pub(crate) fn new(engine: Arc<dyn Engine>) -> Self {
        PublishGate { engine }
    }

    pub(crate) async fn publish(&self, subject: &str, payload: Bytes) -> Result<PublishAck> {
        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(GatewayError::PayloadTooLarge {
                size: payload.len(),
                limit: MAX_PAYLOAD_BYTES,
            });
        }
        if !subject::is_valid_subject(subject) {
            return Err(GatewayError::Validation(format!(
                "invalid publish subject: {}",
                subject
            )));
        }

        let size = payload.len() as u64;
        let ack = self.engine.append(subject, payload).await?;

        counter!(LOG_MESSAGES_IN_TOTAL.name, "log" => ack.log.clone()).increment(1);
        counter!(LOG_BYTES_IN_TOTAL.name, "log" => ack.log.clone()).increment(size);
        trace!(subject = %subject, log = %ack.log, sequence = ack.sequence, "published");
        Ok(ack)
    }
}
