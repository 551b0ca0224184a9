//! Healthcheck log streaming for the stack.
//!
//! On a fixed tick, inspects every stack container with a healthcheck and
//! emits probe results appended since the last tick, indexed by last-seen
//! log length per container.

use crate::adapter::{ClusterAdapter, HealthProbe};
use crate::types::StackNamespace;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const TICK_INTERVAL: Duration = Duration::from_secs(3);

/// Lines of failing probe output shown before truncation.
const MAX_FAILURE_LINES: usize = 5;

pub struct HealthLogStreamer {
    adapter: Arc<dyn ClusterAdapter>,
    ns: StackNamespace,
    /// Last processed probe-log length per container. Owned by this stream.
    last_seen: HashMap<String, usize>,
}

impl HealthLogStreamer {
    pub fn new(adapter: Arc<dyn ClusterAdapter>, ns: StackNamespace) -> Self {
        Self { adapter, ns, last_seen: HashMap::new() }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        // Ignore snapshot: skip to the end of every pre-existing
        // container's probe history.
        if let Ok(containers) = self.adapter.container_list(&self.ns).await {
            for container in containers {
                if let Ok(details) = self.adapter.container_inspect(&container.id).await {
                    if let Some(health) = details.health {
                        self.last_seen.insert(container.id, health.log.len());
                    }
                }
            }
            debug!(count = self.last_seen.len(), "healthcheck stream primed");
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(TICK_INTERVAL) => {}
            }
            self.tick().await;
        }
    }

    async fn tick(&mut self) {
        let containers = match self.adapter.container_list(&self.ns).await {
            Ok(containers) => containers,
            Err(e) => {
                warn!(error = %e, "healthcheck discovery failed");
                return;
            }
        };

        for container in containers {
            let details = match self.adapter.container_inspect(&container.id).await {
                Ok(details) => details,
                Err(_) => continue,
            };
            let Some(health) = details.health else { continue };

            let seen = self.last_seen.entry(container.id.clone()).or_insert(0);
            for probe in health.log.iter().skip(*seen) {
                print_probe(&details.name, health.status.as_str(), probe);
            }
            *seen = health.log.len();
        }
    }
}

fn print_probe(container: &str, status: &str, probe: &HealthProbe) {
    let output = probe.output.trim();
    if probe.exit_code == 0 {
        let first_line = output.lines().next().unwrap_or("");
        // Probe output is arbitrary bytes; truncate on char boundaries.
        let summary: String = first_line.chars().take(100).collect();
        if summary.is_empty() {
            println!(
                "[health] {} | status={} exit_code=0 | start={} end={}",
                container, status, probe.start, probe.end
            );
        } else {
            println!(
                "[health] {} | status={} exit_code=0 | start={} end={} | output: {}",
                container, status, probe.start, probe.end, summary
            );
        }
    } else {
        let lines: Vec<&str> = output.lines().collect();
        let body = if lines.len() > MAX_FAILURE_LINES {
            format!("{}\n... (truncated)", lines[..MAX_FAILURE_LINES].join("\n"))
        } else {
            lines.join("\n")
        };
        if body.is_empty() {
            println!(
                "[health] {} | status={} exit_code={} | start={} end={} | (no output)",
                container, status, probe.exit_code, probe.start, probe.end
            );
        } else {
            println!(
                "[health] {} | status={} exit_code={} | start={} end={} | output:\n{}",
                container, status, probe.exit_code, probe.start, probe.end, body
            );
        }
    }
}
