//! The single process-lifetime subscription to the engine event channel.
//!
//! The transport hands out its receiver exactly once, so a second attach
//! attempt finds nothing to subscribe to. The subscription is owned by the
//! service object, not by any view, and is only torn down on shutdown.

use std::sync::Mutex;

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};

use crate::{correlator::EventCorrelator, models::EngineEvent};

#[derive(Debug)]
pub struct EventTransport {
    sender: mpsc::Sender<EngineEvent>,
    receiver: Mutex<Option<mpsc::Receiver<EngineEvent>>>,
}

impl EventTransport {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    pub async fn publish(&self, event: EngineEvent) -> bool {
        self.sender.send(event).await.is_ok()
    }

    /// Takes the receiving end. Returns `None` once it has been taken.
    fn take_subscription(&self) -> Option<mpsc::Receiver<EngineEvent>> {
        self.receiver
            .lock()
            .ok()
            .and_then(|mut receiver| receiver.take())
    }

    pub fn is_subscribed(&self) -> bool {
        self.receiver
            .lock()
            .map(|receiver| receiver.is_none())
            .unwrap_or(true)
    }
}

pub struct ListenerHandle {
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn shutdown(self) {
        info!("Detaching engine event listener");
        self.task.abort();
    }
}

/// Attaches the listener. Returns `None` if the transport already has its
/// subscriber.
pub fn attach(transport: &EventTransport, correlator: EventCorrelator) -> Option<ListenerHandle> {
    let Some(mut receiver) = transport.take_subscription() else {
        warn!("Engine event listener already attached");
        return None;
    };

    let task = tokio::spawn(async move {
        info!("Engine event listener attached");
        while let Some(event) = receiver.recv().await {
            // Routing stays sequential to keep per-id order; result fetches
            // run alongside so later events are not held up.
            if let Some(follow_up) = correlator.route(event).await {
                let correlator = correlator.clone();
                tokio::spawn(async move {
                    correlator.run_follow_up(follow_up).await;
                });
            }
        }
        info!("Engine event channel closed");
    });

    Some(ListenerHandle { task })
}
