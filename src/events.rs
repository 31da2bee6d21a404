//! Event publishing: every event is logged; with NATS configured it is also
//! published as JSON on `storefront.<aggregate>.<event>`.

use tracing::{info, warn};

use crate::domain::events::DomainEvent;

pub const SUBJECT_PREFIX: &str = "storefront";

#[derive(Clone, Default)]
pub struct EventPublisher {
    nats: Option<async_nats::Client>,
}

impl EventPublisher {
    pub fn new(nats: Option<async_nats::Client>) -> Self { Self { nats } }

    /// Publishes best-effort; failures are logged and never surface to callers.
    pub async fn publish(&self, event: DomainEvent) {
        let subject = format!("{SUBJECT_PREFIX}.{}", event.subject());
        info!(subject = %subject, event = ?event, "domain event");
        let Some(client) = &self.nats else { return };
        let payload = match serde_json::to_vec(&event) {
            Ok(p) => p,
            Err(e) => {
                warn!(subject = %subject, error = %e, "failed to encode event");
                return;
            }
        };
        if let Err(e) = client.publish(subject.clone(), payload.into()).await {
            warn!(subject = %subject, error = %e, "failed to publish event");
        }
    }
}
