//! Domain event publishing over NATS.

use tracing::{info, warn};

use crate::domain::events::DomainEvent;

/// Logs every event and forwards it to NATS when a client is configured.
#[derive(Clone, Default)]
pub struct EventPublisher {
    nats: Option<async_nats::Client>,
}

impl EventPublisher {
    pub fn new(nats: Option<async_nats::Client>) -> Self { Self { nats } }

    pub async fn connect(url: Option<&str>) -> Self {
        let Some(url) = url else { return Self::default() };
        match async_nats::connect(url).await {
            Ok(client) => {
                info!(%url, "connected to NATS");
                Self::new(Some(client))
            }
            Err(e) => {
                warn!(%url, error = %e, "NATS unavailable, events will only be logged");
                Self::default()
            }
        }
    }

    pub async fn publish(&self, event: DomainEvent) {
        let subject = event.subject();
        info!(%subject, ?event, "domain event");
        let Some(client) = &self.nats else { return };
        let payload = match serde_json::to_vec(&event) {
            Ok(p) => p,
            Err(e) => {
                warn!(%subject, error = %e, "failed to encode event");
                return;
            }
        };
        if let Err(e) = client.publish(subject.clone(), payload.into()).await {
            warn!(%subject, error = %e, "failed to publish event");
        }
    }
}
