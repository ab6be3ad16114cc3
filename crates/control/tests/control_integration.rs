// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of PlexGIS.
//
// PlexGIS is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// PlexGIS is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with PlexGIS. If not, see <https://www.gnu.org/licenses/>.

//! End-to-end control plane scenarios
//!
//! Exercises the full stack (registry, ledger, tiers, object store) through
//! the public `ControlPlane` surface: inline execution with a verifiable
//! analytic result, quota refusal, duplicate external notifications,
//! cancellation, tier fallthrough, background workers, and the maintenance
//! sweeps.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use plexgis_common::{ExecutionTier, RequestContext};
use plexgis_control::{
    CompletionNotification, ControlError, ControlPlane, ControlPlaneConfig, LedgerReferenceProbe,
    MemoryObjectStore, NotificationOutcome, RunRequest, RunWorker,
};
use plexgis_ledger::{
    MemoryRunStore, ProcessRun, RunErrorKind, RunFilter, RunStatus, RunStore, TenantQuota,
};
use plexgis_registry::{
    builtin_definitions, install_builtins, MemoryDefinitionStore, ProcessRegistry,
};
use plexgis_tiers::{
    CloudBatchExecutor, Coordinator, InMemoryBatchClient, InProcessExecutor, PostgisExecutor,
    TierExecutor,
};

fn test_ctx() -> RequestContext {
    RequestContext::new("acme".to_string(), "default".to_string()).unwrap()
}

struct TestStack {
    control: Arc<ControlPlane>,
    registry: Arc<ProcessRegistry>,
    store: Arc<MemoryRunStore>,
    batch: Arc<InMemoryBatchClient>,
}

async fn create_test_stack(config: ControlPlaneConfig) -> TestStack {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .try_init();

    let store = Arc::new(MemoryRunStore::new());
    let batch = Arc::new(InMemoryBatchClient::new());

    let registry = Arc::new(
        ProcessRegistry::new(Arc::new(MemoryDefinitionStore::new()))
            .with_reference_probe(Arc::new(LedgerReferenceProbe::new(store.clone()))),
    );
    install_builtins(&registry, &test_ctx()).await.unwrap();

    let executors: Vec<Arc<dyn TierExecutor>> = vec![
        Arc::new(InProcessExecutor::new()),
        Arc::new(PostgisExecutor::unconfigured()),
        Arc::new(CloudBatchExecutor::new(batch.clone())),
    ];
    let coordinator = Arc::new(Coordinator::new(executors));

    let control = Arc::new(ControlPlane::new(
        registry.clone(),
        store.clone(),
        coordinator,
        Arc::new(MemoryObjectStore::new()),
        config,
    ));

    TestStack {
        control,
        registry,
        store,
        batch,
    }
}

/// Re-register a builtin so it runs only on the async-external tier
async fn force_cloud_batch(stack: &TestStack, process_id: &str) {
    let mut definition = builtin_definitions()
        .into_iter()
        .find(|d| d.id == process_id)
        .unwrap();
    definition.supported_tiers = vec![ExecutionTier::CloudBatch];
    definition.default_tier = ExecutionTier::CloudBatch;
    stack
        .registry
        .register(&test_ctx(), definition)
        .await
        .unwrap();
}

async fn submit_external_buffer(stack: &TestStack) -> (ProcessRun, String) {
    force_cloud_batch(stack, "buffer").await;
    let run = stack
        .control
        .execute_inline(
            &test_ctx(),
            &RunRequest::new(
                "buffer",
                json!({"geometry": "POINT(0 0)", "distance": 1.0}),
            ),
        )
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Running);
    let external_id = run.external_job_id.clone().unwrap();
    (run, external_id)
}

// Scenario: a buffer on the in-process tier produces a polygon whose area
// matches the analytic capsule value.
#[tokio::test]
async fn test_inline_buffer_matches_analytic_area() {
    let stack = create_test_stack(ControlPlaneConfig::default()).await;
    let ctx = test_ctx();

    // Collinear three-point line of length 20 buffered by 10: two side
    // rectangles plus end caps, 2dL + pi d^2.
    let run = stack
        .control
        .execute_inline(
            &ctx,
            &RunRequest::new(
                "buffer",
                json!({"geometry": "LINESTRING(0 0, 10 0, 20 0)", "distance": 10.0}),
            ),
        )
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.tier, ExecutionTier::InProcess);
    assert_eq!(run.progress, 100);

    let output = stack
        .control
        .fetch_output(&ctx, &run.id)
        .await
        .unwrap()
        .unwrap();
    assert!(output["geometry"].as_str().unwrap().starts_with("POLYGON"));

    let area = output["area"].as_f64().unwrap();
    let expected = 2.0 * 10.0 * 20.0 + std::f64::consts::PI * 100.0;
    assert!(
        (area - expected).abs() / expected < 0.01,
        "area {} vs analytic {}",
        area,
        expected
    );
}

// Scenario: a tenant at its concurrency quota is refused with no run created.
#[tokio::test]
async fn test_admission_denied_at_concurrency_quota() {
    let config = ControlPlaneConfig::default().with_tenant_quota(
        "acme",
        TenantQuota {
            max_concurrent: 1,
            ..TenantQuota::default()
        },
    );
    let stack = create_test_stack(config).await;
    let ctx = test_ctx();

    let request = RunRequest::new(
        "buffer",
        json!({"geometry": "POINT(0 0)", "distance": 1.0}),
    );
    stack.control.enqueue(&ctx, &request).await.unwrap();
    let claimed = stack.control.dequeue(&ctx).await.unwrap().unwrap();
    assert_eq!(claimed.status, RunStatus::Running);

    let err = stack.control.enqueue(&ctx, &request).await.unwrap_err();
    assert!(
        matches!(err, ControlError::AdmissionDenied { ref tenant_id, .. } if tenant_id == "acme")
    );

    let (_, total) = stack
        .control
        .query_runs(&ctx, &RunFilter::default())
        .await
        .unwrap();
    assert_eq!(total, 1, "the refused submission must not create a run");
}

// Scenario: duplicate completion notifications with different payloads; the
// run reflects only the first.
#[tokio::test]
async fn test_duplicate_notifications_first_wins() {
    let stack = create_test_stack(ControlPlaneConfig::default()).await;
    let ctx = test_ctx();
    let internal = RequestContext::internal();

    let (run, external_id) = submit_external_buffer(&stack).await;

    let first = stack
        .control
        .handle_completion_notification(
            &internal,
            CompletionNotification {
                external_job_id: external_id.clone(),
                result: Some(json!({"area": 1.0, "source": "first"})),
                error: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(first, NotificationOutcome::Applied);

    let second = stack
        .control
        .handle_completion_notification(
            &internal,
            CompletionNotification {
                external_job_id: external_id.clone(),
                result: Some(json!({"area": 999.0, "source": "second"})),
                error: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(second, NotificationOutcome::AlreadyTerminal);

    // A late failure report loses the same way.
    let third = stack
        .control
        .handle_completion_notification(
            &internal,
            CompletionNotification {
                external_job_id: external_id,
                result: None,
                error: Some("too late".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(third, NotificationOutcome::AlreadyTerminal);

    let output = stack
        .control
        .fetch_output(&ctx, &run.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(output["source"], json!("first"));
    assert_eq!(output["area"], json!(1.0));
}

// Scenario: cancelling a PENDING run; a later dequeue never sees it.
#[tokio::test]
async fn test_cancel_pending_never_dequeued() {
    let stack = create_test_stack(ControlPlaneConfig::default()).await;
    let ctx = test_ctx();

    let run = stack
        .control
        .enqueue(
            &ctx,
            &RunRequest::new(
                "buffer",
                json!({"geometry": "POINT(0 0)", "distance": 1.0}),
            ),
        )
        .await
        .unwrap();

    let cancelled = stack
        .control
        .cancel_run(&ctx, &run.id, "submitter changed their mind")
        .await
        .unwrap();
    assert_eq!(cancelled.status, RunStatus::Cancelled);
    assert_eq!(cancelled.error.as_ref().unwrap().kind, RunErrorKind::Cancelled);

    assert!(stack.control.dequeue(&ctx).await.unwrap().is_none());

    // Terminal cancellation refuses a second dismissal.
    let err = stack
        .control
        .cancel_run(&ctx, &run.id, "again")
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::InvalidState(_)));
}

// Scenario: the first two tiers in the preference order cannot take a
// spatial join, so execution lands on the third.
#[tokio::test]
async fn test_tier_preference_falls_through_to_third() {
    let stack = create_test_stack(ControlPlaneConfig::default()).await;
    let ctx = test_ctx();

    let mut definition = builtin_definitions()
        .into_iter()
        .find(|d| d.id == "spatial_join")
        .unwrap();
    definition.supported_tiers = vec![
        ExecutionTier::InProcess,
        ExecutionTier::Postgis,
        ExecutionTier::CloudBatch,
    ];
    definition.default_tier = ExecutionTier::InProcess;
    stack.registry.register(&ctx, definition).await.unwrap();

    // The in-process tier refuses spatial joins and the database tier has no
    // session, leaving the async-external tier.
    let run = stack
        .control
        .execute_inline(
            &ctx,
            &RunRequest::new(
                "spatial_join",
                json!({
                    "left": ["POINT(0 0)", "POINT(5 5)"],
                    "right": ["POINT(0 0)"],
                    "predicate": "INTERSECTS"
                }),
            ),
        )
        .await
        .unwrap();

    assert_eq!(run.tier, ExecutionTier::CloudBatch);
    assert_eq!(run.status, RunStatus::Running);
    assert!(run.external_job_id.is_some());
}

// Two workers over one queue: every run finishes exactly once.
#[tokio::test]
async fn test_worker_pool_completes_all_runs() {
    let stack = create_test_stack(ControlPlaneConfig::default()).await;
    let ctx = test_ctx();

    let mut ids = Vec::new();
    for i in 0..4 {
        let run = stack
            .control
            .enqueue(
                &ctx,
                &RunRequest::new(
                    "buffer",
                    json!({"geometry": "POINT(0 0)", "distance": 1.0 + i as f64}),
                ),
            )
            .await
            .unwrap();
        ids.push(run.id);
    }

    let workers: Vec<Arc<RunWorker>> = (0..2)
        .map(|_| {
            Arc::new(RunWorker::new(
                stack.control.clone(),
                Duration::from_millis(10),
            ))
        })
        .collect();
    let handles: Vec<_> = workers.iter().map(|w| w.start()).collect();

    for id in &ids {
        let mut finished = None;
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let run = stack.control.get_run(&ctx, id).await.unwrap().unwrap();
            if run.is_terminal() {
                finished = Some(run);
                break;
            }
        }
        let run = finished.expect("every enqueued run should finish");
        assert_eq!(run.status, RunStatus::Succeeded);
    }

    for worker in &workers {
        worker.stop();
    }
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop")
            .unwrap();
    }

    let stats = stack.control.statistics(&ctx, None).await.unwrap();
    assert_eq!(stats.total, 4);
    assert_eq!(stats.by_status.get("SUCCEEDED"), Some(&4));
}

// Archival flags terminal runs out of default queries without deleting them.
#[tokio::test]
async fn test_archive_excludes_from_default_query() {
    let stack = create_test_stack(ControlPlaneConfig::default()).await;
    let ctx = test_ctx();
    let internal = RequestContext::internal();

    let run = stack
        .control
        .execute_inline(
            &ctx,
            &RunRequest::new(
                "buffer",
                json!({"geometry": "POINT(0 0)", "distance": 1.0}),
            ),
        )
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);

    let archived = stack
        .control
        .archive_runs(&internal, Utc::now() + chrono::Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(archived, 1);

    let (runs, total) = stack
        .control
        .query_runs(&ctx, &RunFilter::default())
        .await
        .unwrap();
    assert!(runs.is_empty());
    assert_eq!(total, 0);

    let (runs, total) = stack
        .control
        .query_runs(
            &ctx,
            &RunFilter {
                include_archived: true,
                ..RunFilter::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(runs[0].id, run.id);
    assert_eq!(runs[0].status, RunStatus::Succeeded);
}

// A dead worker's claim is reclaimed as a TIMEOUT failure.
#[tokio::test]
async fn test_stale_claim_reclaimed_as_timeout() {
    let stack = create_test_stack(ControlPlaneConfig::default()).await;
    let ctx = test_ctx();
    let internal = RequestContext::internal();

    stack
        .control
        .enqueue(
            &ctx,
            &RunRequest::new(
                "buffer",
                json!({"geometry": "POINT(0 0)", "distance": 1.0}),
            ),
        )
        .await
        .unwrap();
    let claimed = stack.control.dequeue(&ctx).await.unwrap().unwrap();
    assert_eq!(claimed.status, RunStatus::Running);

    tokio::time::sleep(Duration::from_millis(30)).await;
    let reclaimed = stack
        .control
        .reclaim_stale(&internal, Duration::from_millis(10))
        .await
        .unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].id, claimed.id);
    assert_eq!(reclaimed[0].status, RunStatus::Failed);
    assert_eq!(reclaimed[0].error.as_ref().unwrap().kind, RunErrorKind::Timeout);
}

// An external failure notification records the failure; polling afterwards
// cannot overwrite it.
#[tokio::test]
async fn test_failure_notification_is_terminal() {
    let stack = create_test_stack(ControlPlaneConfig::default()).await;
    let ctx = test_ctx();
    let internal = RequestContext::internal();

    let (run, external_id) = submit_external_buffer(&stack).await;

    let outcome = stack
        .control
        .handle_completion_notification(
            &internal,
            CompletionNotification {
                external_job_id: external_id.clone(),
                result: None,
                error: Some("provider capacity exceeded".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome, NotificationOutcome::Applied);

    // A success report for the same job arriving late changes nothing.
    stack.batch.complete(&external_id, json!({"area": 5.0})).await;
    let late = stack
        .control
        .handle_completion_notification(
            &internal,
            CompletionNotification {
                external_job_id: external_id,
                result: Some(json!({"area": 5.0})),
                error: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(late, NotificationOutcome::AlreadyTerminal);

    let stored = stack.store.get(&ctx, &run.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Failed);
    assert!(stored
        .error
        .unwrap()
        .message
        .contains("provider capacity exceeded"));
}

// Cross-tenant visibility: one tenant never sees another's runs.
#[tokio::test]
async fn test_tenant_isolation_on_queries() {
    let stack = create_test_stack(ControlPlaneConfig::default()).await;
    let acme = test_ctx();
    let rival = RequestContext::new("rival".to_string(), "default".to_string()).unwrap();
    install_builtins(&stack.registry, &rival).await.unwrap();

    let run = stack
        .control
        .enqueue(
            &acme,
            &RunRequest::new(
                "buffer",
                json!({"geometry": "POINT(0 0)", "distance": 1.0}),
            ),
        )
        .await
        .unwrap();

    assert!(stack.control.get_run(&rival, &run.id).await.unwrap().is_none());
    let (runs, total) = stack
        .control
        .query_runs(&rival, &RunFilter::default())
        .await
        .unwrap();
    assert!(runs.is_empty());
    assert_eq!(total, 0);

    let err = stack
        .control
        .cancel_run(&rival, &run.id, "not yours")
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::NotFound(_)));
}
