//! Delivery of host events.

use crate::reconcile_info::HostEvent;
use crds::BareMetalHost;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tracing::{info, warn};

/// Destination for the events a reconcile pass records on a host.
///
/// Publishing never fails the pass; sinks log and drop what they cannot
/// deliver.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, host: &BareMetalHost, events: &[HostEvent]);
}

/// Publishes events through the Kubernetes events API.
pub struct KubeEventSink {
    recorder: Recorder,
}

impl KubeEventSink {
    pub fn new(client: Client, controller: &str) -> Self {
        let reporter = Reporter {
            controller: controller.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait::async_trait]
impl EventSink for KubeEventSink {
    async fn publish(&self, host: &BareMetalHost, events: &[HostEvent]) {
        let reference = host.object_ref(&());
        for event in events {
            info!("publishing event {}: {}", event.reason, event.message);
            let event = Event {
                type_: if event.warning { EventType::Warning } else { EventType::Normal },
                reason: event.reason.clone(),
                note: Some(event.message.clone()),
                action: event.reason.clone(),
                secondary: None,
            };
            if let Err(e) = self.recorder.publish(&event, &reference).await {
                warn!("failed to record event {}, ignoring: {}", event.reason, e);
            }
        }
    }
}
