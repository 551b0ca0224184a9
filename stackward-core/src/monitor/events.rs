//! Engine event stream, filtered to the stack.
//!
//! Pairs `exec_start` with the matching `exec_die` to synthesise healthcheck
//! pass/fail records, and suppresses events from containers that already
//! existed when the apply began.

use crate::adapter::{ClusterAdapter, ClusterEvent, EventScope};
use crate::types::{StackNamespace, STACK_NAMESPACE_LABEL};
use futures_util::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const SERVICE_NAME_LABEL: &str = "com.docker.swarm.service.name";

pub struct EventStreamer {
    adapter: Arc<dyn ClusterAdapter>,
    ns: StackNamespace,
}

impl EventStreamer {
    pub fn new(adapter: Arc<dyn ClusterAdapter>, ns: StackNamespace) -> Self {
        Self { adapter, ns }
    }

    pub async fn run(self, cancel: CancellationToken) {
        // Ignore snapshot: events from containers already present are not
        // this apply's story.
        let mut existing: HashSet<String> = HashSet::new();
        if let Ok(containers) = self.adapter.container_list(&self.ns).await {
            existing = containers.into_iter().map(|c| c.id).collect();
            debug!(count = existing.len(), "event stream ignoring pre-existing containers");
        }

        let mut stream = match self.adapter.events().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "event stream unavailable");
                return;
            }
        };

        // exec_start messages held until their exec_die arrives, keyed by
        // exec id. Owned by this stream only.
        let mut pending_exec: HashMap<String, ClusterEvent> = HashMap::new();
        let prefix = format!("{}_", self.ns.name());

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return,
                next = stream.next() => match next {
                    Some(Ok(event)) => event,
                    Some(Err(e)) => {
                        if !cancel.is_cancelled() {
                            println!("[event:error] {}", e);
                        }
                        return;
                    }
                    None => return,
                },
            };

            match event.scope {
                EventScope::Container => {
                    self.handle_container_event(event, &prefix, &mut existing, &mut pending_exec)
                }
                EventScope::Service => {
                    let name = event.attributes.get("name").cloned().unwrap_or_default();
                    if !name.starts_with(&prefix) {
                        continue;
                    }
                    println!("[event:service:{}] {}", name, event.action);
                    if event.action == "update" {
                        if let Some(state) = event.attributes.get("updatestate.new") {
                            println!("[event:service:{}] update state: {}", name, state);
                        }
                    }
                }
                EventScope::Node => {
                    let name = event
                        .attributes
                        .get("name")
                        .cloned()
                        .unwrap_or_else(|| short(&event.actor_id).to_string());
                    if event.action.contains("update") || event.action.contains("remove") {
                        println!("[event:node:{}] {}", name, event.action);
                    }
                }
            }
        }
    }

    fn handle_container_event(
        &self,
        event: ClusterEvent,
        prefix: &str,
        existing: &mut HashSet<String>,
        pending_exec: &mut HashMap<String, ClusterEvent>,
    ) {
        let service = event.attributes.get(SERVICE_NAME_LABEL).map(String::as_str).unwrap_or("");
        let stack = event.attributes.get(STACK_NAMESPACE_LABEL).map(String::as_str).unwrap_or("");
        if stack != self.ns.name() && !service.starts_with(prefix) {
            return;
        }

        let name = event
            .attributes
            .get("name")
            .cloned()
            .unwrap_or_else(|| short(&event.actor_id).to_string());

        // Healthcheck probes arrive as exec_start/exec_die pairs sharing an
        // exec id in the actor field.
        if event.action.starts_with("exec_start") {
            pending_exec.insert(event.actor_id.clone(), event);
            return;
        }
        if event.action == "exec_die" {
            if let Some(start) = pending_exec.remove(&event.actor_id) {
                let exit_code =
                    event.attributes.get("exitCode").map(String::as_str).unwrap_or("?");
                let status = if exit_code == "0" { "passed" } else { "failed" };
                let cmd = start
                    .action
                    .strip_prefix("exec_start: ")
                    .filter(|c| !c.is_empty())
                    .unwrap_or("healthcheck");
                println!(
                    "[event:container:{}] healthcheck {} (exit {}): {}",
                    name, status, exit_code, cmd
                );
            }
            return;
        }

        if event.action == "create" {
            // A fresh container takes over any id we were ignoring.
            existing.remove(&event.actor_id);
        } else if existing.contains(&event.actor_id) {
            return;
        }

        if should_log_container_action(&event.action) {
            println!("[event:container:{}] {}", name, event.action);
        }
    }
}

fn should_log_container_action(action: &str) -> bool {
    if action.starts_with("exec_") {
        return false;
    }
    ["create", "start", "die", "kill", "stop", "restart", "oom"]
        .iter()
        .any(|a| action.contains(a))
}

fn short(id: &str) -> &str {
    &id[..id.len().min(12)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_log_container_action() {
        assert!(should_log_container_action("start"));
        assert!(should_log_container_action("die"));
        assert!(should_log_container_action("oom"));
        assert!(!should_log_container_action("exec_start: /bin/check"));
        assert!(!should_log_container_action("exec_die"));
        assert!(!should_log_container_action("attach"));
    }
}
