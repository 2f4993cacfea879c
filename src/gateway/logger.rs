//! Request-record fan-out: ring append + live-feed publish
//!
//! Both sinks are fire-and-forget with respect to the proxied response; a
//! full channel or a store hiccup never delays or fails the client request.

use tokio::sync::broadcast;
use tracing::debug;

use crate::models::RequestRecord;
use crate::repository::RequestLogRepository;

/// Fans request records out to the ring table and the broadcast channel
#[derive(Clone)]
pub struct RequestLogger {
    repo: RequestLogRepository,
    sender: broadcast::Sender<RequestRecord>,
}

impl RequestLogger {
    pub fn new(repo: RequestLogRepository, sender: broadcast::Sender<RequestRecord>) -> Self {
        Self { repo, sender }
    }

    /// Publish one record. Returns immediately; the ring write happens in the
    /// background.
    pub fn publish(&self, record: RequestRecord) {
        // send only fails when nobody is subscribed, which is fine
        let _ = self.sender.send(record.clone());

        let repo = self.repo.clone();
        tokio::spawn(async move {
            if let Err(e) = repo.push(&record).await {
                debug!("Failed to persist request record: {}", e);
            }
        });
    }

    /// Subscribe to the live feed
    pub fn subscribe(&self) -> broadcast::Receiver<RequestRecord> {
        self.sender.subscribe()
    }
}
