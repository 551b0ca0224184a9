//! End-to-end apply scenarios against the in-memory fake cluster.

mod support;

use stackward_core::adapter::ClusterAdapter;
use stackward_core::compose::{ComposeParser, ConvertOptions};
use stackward_core::monitor::WatchOptions;
use stackward_core::orchestrator::{ApplyOptions, ApplyOrchestrator, ApplyOutcome};
use stackward_core::types::{StackNamespace, STACK_NAMESPACE_LABEL};
use stackward_core::{Planner, StackError, StateReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use support::{FakeCluster, ServiceBehavior};

const WEB_V1: &str = r#"
services:
  web:
    image: nginx:1.25
    healthcheck:
      test: ["CMD", "curl", "-f", "http://localhost/"]
      interval: 2s
    deploy:
      replicas: 2
"#;

fn fast_opts() -> ApplyOptions {
    let mut opts =
        ApplyOptions::new(ConvertOptions { base_dir: PathBuf::from("/"), allow_latest: false });
    opts.timeout = Duration::from_secs(10);
    opts.rollback_timeout = Duration::from_secs(5);
    opts.watch = WatchOptions {
        poll_interval: Duration::from_millis(10),
        settle_delay: Duration::from_millis(10),
        status_interval: Duration::from_secs(5),
        service_timeout: Duration::from_secs(5),
        max_failed_tasks: 3,
    };
    opts
}

async fn apply(cluster: &Arc<FakeCluster>, yaml: &str, opts: ApplyOptions) -> ApplyOutcome {
    let manifest = ComposeParser::parse(yaml).expect("manifest parses");
    let adapter: Arc<dyn ClusterAdapter> = Arc::clone(cluster) as _;
    ApplyOrchestrator::new(adapter, StackNamespace::new("demo"), opts).apply(&manifest).await
}

#[tokio::test]
async fn clean_create_converges() {
    let cluster = Arc::new(FakeCluster::new());

    let outcome = apply(&cluster, WEB_V1, fast_opts()).await;
    assert!(matches!(outcome, ApplyOutcome::Ok), "expected Ok, got {:?}", outcome);

    let (_, _, spec) = cluster.service_by_name("demo_web").expect("service created");
    assert_eq!(spec.image, "nginx:1.25");
    assert_eq!(spec.replicas(), Some(2));
    assert_eq!(spec.labels[STACK_NAMESPACE_LABEL], "demo");
    assert!(cluster.pulled_images().contains(&"nginx:1.25".to_string()));
    // The implicit default network was created first.
    assert!(cluster.network_names().contains(&"demo_default".to_string()));
}

#[tokio::test]
async fn noop_reapply_is_quick_and_idempotent() {
    let cluster = Arc::new(FakeCluster::new());
    assert!(matches!(apply(&cluster, WEB_V1, fast_opts()).await, ApplyOutcome::Ok));
    let (_, version_before, _) = cluster.service_by_name("demo_web").unwrap();

    let started = Instant::now();
    assert!(matches!(apply(&cluster, WEB_V1, fast_opts()).await, ApplyOutcome::Ok));
    assert!(started.elapsed() < Duration::from_secs(2), "no-op apply should be fast");

    // Nothing was written: the planner proved equality.
    let (_, version_after, _) = cluster.service_by_name("demo_web").unwrap();
    assert_eq!(version_before, version_after);

    // Planner idempotency: a fresh plan over the converged state is empty.
    let adapter: Arc<dyn ClusterAdapter> = Arc::clone(&cluster) as _;
    let ns = StackNamespace::new("demo");
    let current = StateReader::new(adapter, ns.clone()).read().await.unwrap();
    let manifest = ComposeParser::parse(WEB_V1).unwrap();
    let desired = stackward_core::ComposeConverter::convert(
        &manifest,
        &ns,
        &ConvertOptions { base_dir: PathBuf::from("/"), allow_latest: false },
    )
    .unwrap();
    assert!(Planner::new("demo").plan(&current, &desired).is_empty());
}

#[tokio::test]
async fn update_without_task_churn_settles_healthy() {
    let cluster = Arc::new(FakeCluster::new());
    assert!(matches!(apply(&cluster, WEB_V1, fast_opts()).await, ApplyOutcome::Ok));

    // The engine decides this update changes nothing task-visible.
    cluster.behave_service("demo_web", ServiceBehavior::NoChurn);
    let with_env = r#"
services:
  web:
    image: nginx:1.25
    environment:
      MODE: canary
    healthcheck:
      test: ["CMD", "curl", "-f", "http://localhost/"]
      interval: 2s
    deploy:
      replicas: 2
"#;
    let outcome = apply(&cluster, with_env, fast_opts()).await;
    assert!(matches!(outcome, ApplyOutcome::Ok), "expected Ok, got {:?}", outcome);

    // The update was submitted even though no tasks moved.
    let (_, version, spec) = cluster.service_by_name("demo_web").unwrap();
    assert_eq!(version, 2);
    assert_eq!(spec.env, vec!["MODE=canary"]);
}

#[tokio::test]
async fn rolling_update_tolerates_one_transient_failure() {
    let cluster = Arc::new(FakeCluster::new());
    assert!(matches!(apply(&cluster, WEB_V1, fast_opts()).await, ApplyOutcome::Ok));

    cluster.behave_image("nginx:1.26", ServiceBehavior::FlakyOnce);
    let v2 = WEB_V1.replace("nginx:1.25", "nginx:1.26");
    let outcome = apply(&cluster, &v2, fast_opts()).await;
    assert!(matches!(outcome, ApplyOutcome::Ok), "expected Ok, got {:?}", outcome);

    let (_, _, spec) = cluster.service_by_name("demo_web").unwrap();
    assert_eq!(spec.image, "nginx:1.26");
}

#[tokio::test]
async fn persistent_failure_rolls_back_to_previous_spec() {
    let cluster = Arc::new(FakeCluster::new());
    assert!(matches!(apply(&cluster, WEB_V1, fast_opts()).await, ApplyOutcome::Ok));

    cluster.behave_image("broken:1.0", ServiceBehavior::AlwaysFailing);
    let broken = WEB_V1.replace("nginx:1.25", "broken:1.0");
    let outcome = apply(&cluster, &broken, fast_opts()).await;

    match outcome {
        ApplyOutcome::ConvergenceError(StackError::ConvergenceFailed { service, .. }) => {
            assert_eq!(service, "web");
        }
        other => panic!("expected convergence failure, got {:?}", other),
    }

    // Rollback restored the previous image, re-reading the version token
    // after the apply's own update moved it.
    let (_, version, spec) = cluster.service_by_name("demo_web").unwrap();
    assert_eq!(spec.image, "nginx:1.25");
    assert_eq!(version, 3, "create, failed update, rollback update");
}

#[tokio::test]
async fn orphan_service_survives_without_prune_and_dies_with_it() {
    let cluster = Arc::new(FakeCluster::new());
    let two_services = r#"
services:
  web:
    image: nginx:1.25
  old:
    image: redis:7.2
"#;
    assert!(matches!(apply(&cluster, two_services, fast_opts()).await, ApplyOutcome::Ok));
    assert_eq!(cluster.service_count(), 2);

    let only_web = "services:\n  web:\n    image: nginx:1.25\n";

    // Without --prune the orphan is reported but untouched.
    assert!(matches!(apply(&cluster, only_web, fast_opts()).await, ApplyOutcome::Ok));
    assert_eq!(cluster.service_count(), 2);
    assert!(cluster.service_by_name("demo_old").is_some());

    // With --prune it is removed and waited on; web is left alone.
    let (_, web_version_before, _) = cluster.service_by_name("demo_web").unwrap();
    let mut opts = fast_opts();
    opts.prune = true;
    assert!(matches!(apply(&cluster, only_web, opts).await, ApplyOutcome::Ok));
    assert_eq!(cluster.service_count(), 1);
    assert!(cluster.service_by_name("demo_old").is_none());
    let (_, web_version_after, _) = cluster.service_by_name("demo_web").unwrap();
    assert_eq!(web_version_before, web_version_after);
}

#[tokio::test]
async fn apply_deadline_cancels_and_rolls_back() {
    let cluster = Arc::new(FakeCluster::new());
    assert!(matches!(apply(&cluster, WEB_V1, fast_opts()).await, ApplyOutcome::Ok));

    cluster.behave_image("nginx:1.27", ServiceBehavior::NeverReady);
    let stuck = WEB_V1.replace("nginx:1.25", "nginx:1.27");
    let mut opts = fast_opts();
    opts.timeout = Duration::from_millis(300);

    let outcome = apply(&cluster, &stuck, opts).await;
    match outcome {
        ApplyOutcome::ConvergenceError(e) => assert!(e.is_timeout(), "expected timeout, got {e}"),
        other => panic!("expected convergence timeout, got {:?}", other),
    }

    let (_, _, spec) = cluster.service_by_name("demo_web").unwrap();
    assert_eq!(spec.image, "nginx:1.25", "rollback restored the previous image");
}

#[tokio::test]
async fn per_service_deadline_times_out() {
    let cluster = Arc::new(FakeCluster::new());
    assert!(matches!(apply(&cluster, WEB_V1, fast_opts()).await, ApplyOutcome::Ok));

    cluster.behave_image("nginx:1.27", ServiceBehavior::NeverReady);
    let stuck = WEB_V1.replace("nginx:1.25", "nginx:1.27");
    let mut opts = fast_opts();
    opts.watch.service_timeout = Duration::from_millis(200);

    let outcome = apply(&cluster, &stuck, opts).await;
    match outcome {
        ApplyOutcome::ConvergenceError(e) => assert!(e.is_timeout(), "expected timeout, got {e}"),
        other => panic!("expected convergence timeout, got {:?}", other),
    }
    let (_, _, spec) = cluster.service_by_name("demo_web").unwrap();
    assert_eq!(spec.image, "nginx:1.25");
}

#[tokio::test]
async fn validation_errors_never_touch_the_cluster() {
    let cluster = Arc::new(FakeCluster::new());
    let latest = "services:\n  web:\n    image: nginx:latest\n";

    let outcome = apply(&cluster, latest, fast_opts()).await;
    assert!(matches!(
        outcome,
        ApplyOutcome::DeployError(StackError::LatestTagForbidden { .. })
    ));
    assert_eq!(cluster.service_count(), 0);
    assert!(cluster.pulled_images().is_empty());
    assert!(cluster.network_names().is_empty());
}

#[tokio::test]
async fn volumes_and_networks_are_created_before_services() {
    let cluster = Arc::new(FakeCluster::new());
    let manifest = r#"
services:
  db:
    image: postgres:16.1
    networks: [backend]
    volumes:
      - pgdata:/var/lib/postgresql/data
networks:
  backend:
    driver: overlay
volumes:
  pgdata: {}
"#;
    assert!(matches!(apply(&cluster, manifest, fast_opts()).await, ApplyOutcome::Ok));
    assert!(cluster.network_names().contains(&"demo_backend".to_string()));
    assert!(cluster.volume_names().contains(&"demo_pgdata".to_string()));
    let (_, _, spec) = cluster.service_by_name("demo_db").unwrap();
    assert_eq!(spec.networks, vec!["demo_backend"]);
    assert_eq!(spec.mounts[0].source, "demo_pgdata");
}
