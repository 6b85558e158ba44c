//! Integration tests for ordered target fallback.

mod common;

use common::{MockDriver, Reply, provider, rows};
use portcall_api::config::TargetConfig;
use portcall_api::db::{ConnectionProvider, QueryExecutor};
use portcall_api::error::DbError;
use portcall_api::models::Params;
use serde_json::json;
use std::time::Duration;
use tempfile::NamedTempFile;

#[tokio::test]
async fn test_every_call_falls_back_to_secondary() {
    let primary = MockDriver::new("primary");
    let secondary = MockDriver::new("secondary");
    let (p, s) = (primary.backend(), secondary.backend());
    p.set_fail_open(true);
    s.on("FROM ports", Reply::Rows(rows(&[json!({"port_id": 1})])));

    let provider = provider(vec![primary, secondary]);
    let queries = QueryExecutor::new(provider.clone());

    for _ in 0..5 {
        let result = queries
            .query("SELECT port_id FROM ports", &Params::new())
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
    }

    // No stickiness: the primary is retried on every call
    assert_eq!(p.open_failures(), 5);
    assert_eq!(s.opens(), 5);
    assert_eq!(s.releases(), 5);
    assert_eq!(provider.outstanding_leases(), 0);
}

#[tokio::test]
async fn test_all_targets_failing_is_connectivity_error() {
    let primary = MockDriver::new("primary");
    let secondary = MockDriver::new("secondary");
    let (p, s) = (primary.backend(), secondary.backend());
    p.set_fail_open(true);
    s.set_fail_open(true);

    let provider = provider(vec![primary, secondary]);
    let queries = QueryExecutor::new(provider.clone());
    let err = queries
        .query("SELECT 1", &Params::new())
        .await
        .unwrap_err();

    match &err {
        DbError::Connectivity { message, .. } => {
            assert!(message.contains("primary"));
            assert!(message.contains("secondary"));
        }
        other => panic!("expected connectivity error, got {other:?}"),
    }
    assert!(p.statements().is_empty());
    assert!(s.statements().is_empty());
    assert_eq!(provider.outstanding_leases(), 0);
}

#[tokio::test]
async fn test_primary_serves_again_once_recovered() {
    let primary = MockDriver::new("primary");
    let secondary = MockDriver::new("secondary");
    let (p, s) = (primary.backend(), secondary.backend());
    p.set_fail_open(true);

    let provider = provider(vec![primary, secondary]);

    let lease = provider.acquire().await.unwrap();
    assert_eq!(lease.target(), "secondary");
    lease.release().await;

    p.set_fail_open(false);
    let lease = provider.acquire().await.unwrap();
    assert_eq!(lease.target(), "primary");
    lease.release().await;

    assert_eq!(p.opens(), 1);
    assert_eq!(s.opens(), 1);
}

#[tokio::test]
async fn test_named_target_has_no_fallback() {
    let primary = MockDriver::new("primary");
    let secondary = MockDriver::new("secondary");
    primary.backend().set_fail_open(true);
    let s = secondary.backend();

    let provider = provider(vec![primary, secondary]);
    let err = provider.acquire_from("primary").await.unwrap_err();

    assert!(matches!(err, DbError::Connectivity { .. }));
    assert_eq!(s.opens(), 0);
}

#[tokio::test]
async fn test_stats_cover_every_target() {
    let provider = provider(vec![MockDriver::new("primary"), MockDriver::new("secondary")]);
    let stats = provider.stats();
    assert_eq!(stats.outstanding_leases, 0);
    let names: Vec<_> = stats.targets.iter().map(|t| t.target.as_str()).collect();
    assert_eq!(names, ["primary", "secondary"]);
}

fn sqlite_target(name: &str) -> (TargetConfig, tempfile::TempPath) {
    let path = NamedTempFile::new().unwrap().into_temp_path();
    let url = format!("{}=sqlite:{}", name, path.display());
    (TargetConfig::parse(&url).unwrap(), path)
}

#[tokio::test]
async fn test_connect_keeps_unreachable_target_and_falls_back() {
    let unreachable =
        TargetConfig::parse("primary=postgres://app:pw@127.0.0.1:1/portcalls?acquire_timeout=1")
            .unwrap();
    let (local, _path) = sqlite_target("local");

    let provider = ConnectionProvider::connect(&[unreachable, local], Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(provider.target_names(), ["primary", "local"]);

    let queries = QueryExecutor::new(provider.clone());
    let result = queries.query("SELECT 1 AS one", &Params::new()).await.unwrap();
    assert_eq!(result[0]["one"], 1);
    assert_eq!(provider.outstanding_leases(), 0);

    provider.close().await;
}

#[tokio::test]
async fn test_connect_fails_when_no_target_is_reachable() {
    let unreachable =
        TargetConfig::parse("primary=postgres://app:pw@127.0.0.1:1/portcalls?acquire_timeout=1")
            .unwrap();

    let err = ConnectionProvider::connect(&[unreachable], Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Connectivity { .. }));
}

#[tokio::test]
async fn test_connect_skips_target_whose_pool_cannot_be_built() {
    let (local, _path) = sqlite_target("local");
    let misconfigured =
        TargetConfig::parse("replica=postgres://app:pw@127.0.0.1:1/portcalls?sslmode=sometimes")
            .unwrap();

    let provider = ConnectionProvider::connect(&[local, misconfigured], Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(provider.target_names(), ["local"]);

    let queries = QueryExecutor::new(provider.clone());
    let result = queries.query("SELECT 1 AS one", &Params::new()).await.unwrap();
    assert_eq!(result[0]["one"], 1);
    provider.close().await;
}
