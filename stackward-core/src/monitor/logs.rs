//! Container log streaming for the stack.
//!
//! Discovers containers by polling, attaches to each new container's log
//! stream and writes line-prefixed output. Containers present before the
//! apply are tracked but not streamed.

use crate::adapter::ClusterAdapter;
use crate::types::StackNamespace;
use futures_util::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Discovery poll interval for new containers.
const DISCOVERY_INTERVAL: Duration = Duration::from_secs(1);

pub struct LogStreamer {
    adapter: Arc<dyn ClusterAdapter>,
    ns: StackNamespace,
}

impl LogStreamer {
    pub fn new(adapter: Arc<dyn ClusterAdapter>, ns: StackNamespace) -> Self {
        Self { adapter, ns }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut tracked: HashSet<String> = HashSet::new();

        // Ignore snapshot: mark pre-existing containers as tracked so their
        // logs are not replayed.
        if let Ok(containers) = self.adapter.container_list(&self.ns).await {
            tracked = containers.into_iter().map(|c| c.id).collect();
            debug!(count = tracked.len(), "log stream ignoring pre-existing containers");
        }

        let adapter = Arc::clone(&self.adapter);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(DISCOVERY_INTERVAL) => {}
            }

            let containers = match self.adapter.container_list(&self.ns).await {
                Ok(containers) => containers,
                Err(e) => {
                    warn!(error = %e, "container discovery failed");
                    continue;
                }
            };

            for container in containers {
                if !tracked.insert(container.id.clone()) {
                    continue;
                }
                let service = container
                    .service
                    .clone()
                    .unwrap_or_else(|| container.name.clone());
                debug!(container = %container.name, service = %service, "following new container");

                let adapter = Arc::clone(&adapter);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    follow_container(adapter, container.id, service, cancel).await;
                });
            }
        }
    }
}

async fn follow_container(
    adapter: Arc<dyn ClusterAdapter>,
    container_id: String,
    service: String,
    cancel: CancellationToken,
) {
    let mut stream = match adapter.container_logs(&container_id).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!(container = %container_id, error = %e, "could not attach to logs");
            return;
        }
    };

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => return,
            next = stream.next() => match next {
                Some(Ok(line)) => line,
                Some(Err(_)) | None => return,
            },
        };

        let text = line.line.trim_end();
        if !text.is_empty() {
            println!("[logs:{}] {}", service, text);
        }
    }
}
