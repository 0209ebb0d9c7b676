use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{timeout, Duration, Instant};

use sleuth_core::config::InfraConfig;
use sleuth_core::tool::Tool;

/// Aggregate health of the discovered estate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallHealth {
    Healthy,
    Degraded,
    Critical,
    Unknown,
}

/// Inventory result for one (region, kind) segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentSnapshot {
    pub region: String,
    pub kind: String,
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub healthy: usize,
    #[serde(default)]
    pub unhealthy: usize,
    #[serde(default)]
    pub warnings: usize,
    #[serde(default)]
    pub critical: usize,
    #[serde(default)]
    pub active_alarms: usize,
    /// Present when this segment's discovery failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Pre-flight snapshot across all configured regions and service kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfraSnapshot {
    pub captured_at: DateTime<Utc>,
    pub segments: Vec<SegmentSnapshot>,
    pub total_resources: usize,
    pub total_alarms: usize,
    pub overall: OverallHealth,
}

impl InfraSnapshot {
    pub fn build_compact_summary(&self) -> String {
        let mut out = format!(
            "Infrastructure: {} resources, {} active alarms, overall {:?}.\n",
            self.total_resources, self.total_alarms, self.overall
        );
        for segment in &self.segments {
            if segment.unhealthy > 0 || segment.critical > 0 || segment.error.is_some() {
                out.push_str(&format!(
                    "- {}/{}: {} unhealthy, {} critical{}\n",
                    segment.region,
                    segment.kind,
                    segment.unhealthy,
                    segment.critical,
                    segment
                        .error
                        .as_deref()
                        .map(|e| format!(" (discovery error: {e})"))
                        .unwrap_or_default()
                ));
            }
        }
        out
    }
}

/// Discovers the infrastructure estate with bounded concurrency and a TTL
/// cache. Concurrent callers serialize on the discovery lock, so an
/// in-flight discovery is awaited rather than duplicated.
pub struct InfraContextMgr {
    inventory: Arc<dyn Tool>,
    config: InfraConfig,
    cache: Mutex<Option<(Instant, InfraSnapshot)>>,
}

impl InfraContextMgr {
    /// `inventory` is invoked with `{region, kind}` and must return counts
    /// in the [`SegmentSnapshot`] shape.
    pub fn new(inventory: Arc<dyn Tool>, config: InfraConfig) -> Self {
        Self {
            inventory,
            config,
            cache: Mutex::new(None),
        }
    }

    pub async fn discover(&self, force_refresh: bool) -> InfraSnapshot {
        let mut cache = self.cache.lock().await;
        if !force_refresh {
            if let Some((captured, snapshot)) = cache.as_ref() {
                if captured.elapsed() < Duration::from_millis(self.config.cache_ttl_ms) {
                    tracing::debug!("infra snapshot served from cache");
                    return snapshot.clone();
                }
            }
        }

        let snapshot = self.run_discovery().await;
        *cache = Some((Instant::now(), snapshot.clone()));
        snapshot
    }

    async fn run_discovery(&self) -> InfraSnapshot {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let per_call = Duration::from_millis(self.config.timeout_per_service_ms);
        let mut join_set = JoinSet::new();

        for region in &self.config.regions {
            for kind in &self.config.service_kinds {
                let semaphore = Arc::clone(&semaphore);
                let inventory = Arc::clone(&self.inventory);
                let region = region.clone();
                let kind = kind.clone();
                join_set.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.expect("semaphore open");
                    let args = serde_json::json!({"region": region, "kind": kind});
                    let outcome = timeout(per_call, inventory.execute(args)).await;
                    match outcome {
                        Ok(Ok(value)) => parse_segment(region, kind, value),
                        Ok(Err(err)) => {
                            tracing::warn!(%region, %kind, error = %err, "inventory call failed");
                            failed_segment(region, kind, err.to_string())
                        }
                        Err(_) => {
                            tracing::warn!(%region, %kind, "inventory call timed out");
                            failed_segment(region, kind, "timeout".to_string())
                        }
                    }
                });
            }
        }

        let mut segments = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(segment) => segments.push(segment),
                Err(err) => tracing::warn!(error = %err, "inventory task panicked"),
            }
        }
        // Deterministic merge regardless of completion order.
        segments.sort_by(|a, b| a.region.cmp(&b.region).then(a.kind.cmp(&b.kind)));

        let snapshot = aggregate(segments);
        tracing::info!(
            resources = snapshot.total_resources,
            alarms = snapshot.total_alarms,
            overall = ?snapshot.overall,
            "infrastructure discovery complete"
        );
        snapshot
    }
}

fn parse_segment(region: String, kind: String, value: serde_json::Value) -> SegmentSnapshot {
    #[derive(Deserialize, Default)]
    struct RawCounts {
        #[serde(default)]
        count: usize,
        #[serde(default)]
        healthy: usize,
        #[serde(default)]
        unhealthy: usize,
        #[serde(default)]
        warnings: usize,
        #[serde(default)]
        critical: usize,
        #[serde(default, alias = "alarms")]
        active_alarms: usize,
    }

    let raw: RawCounts = serde_json::from_value(value).unwrap_or_default();
    SegmentSnapshot {
        region,
        kind,
        count: raw.count,
        healthy: raw.healthy,
        unhealthy: raw.unhealthy,
        warnings: raw.warnings,
        critical: raw.critical,
        active_alarms: raw.active_alarms,
        error: None,
    }
}

fn failed_segment(region: String, kind: String, error: String) -> SegmentSnapshot {
    SegmentSnapshot {
        region,
        kind,
        count: 0,
        healthy: 0,
        unhealthy: 0,
        warnings: 0,
        critical: 0,
        active_alarms: 0,
        error: Some(error),
    }
}

/// Overall health thresholds: critical when any critical count exists or
/// more than two alarms fire; degraded on any warning or at least one alarm.
fn aggregate(segments: Vec<SegmentSnapshot>) -> InfraSnapshot {
    let total_resources = segments.iter().map(|s| s.count).sum();
    let total_alarms = segments.iter().map(|s| s.active_alarms).sum();
    let any_critical = segments.iter().any(|s| s.critical > 0);
    let any_warning = segments.iter().any(|s| s.warnings > 0 || s.unhealthy > 0);
    let all_failed = !segments.is_empty() && segments.iter().all(|s| s.error.is_some());

    let overall = if all_failed || segments.is_empty() {
        OverallHealth::Unknown
    } else if any_critical || total_alarms > 2 {
        OverallHealth::Critical
    } else if any_warning || total_alarms >= 1 {
        OverallHealth::Degraded
    } else {
        OverallHealth::Healthy
    };

    InfraSnapshot {
        captured_at: Utc::now(),
        segments,
        total_resources,
        total_alarms,
        overall,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use sleuth_core::error::ToolError;
    use sleuth_core::tool::ToolSpec;

    struct FakeInventory {
        calls: AtomicUsize,
        alarms_per_segment: usize,
        critical_in: Option<(String, String)>,
        fail_region: Option<String>,
    }

    impl FakeInventory {
        fn healthy() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                alarms_per_segment: 0,
                critical_in: None,
                fail_region: None,
            }
        }
    }

    #[async_trait]
    impl Tool for FakeInventory {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "infra_inventory".into(),
                description: "inventory".into(),
                parameters_schema: serde_json::json!({}),
            }
        }

        async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let region = args["region"].as_str().unwrap_or_default().to_string();
            let kind = args["kind"].as_str().unwrap_or_default().to_string();
            if self.fail_region.as_deref() == Some(region.as_str()) {
                return Err(ToolError::Transient {
                    tool: "infra_inventory".into(),
                    message: "api 500".into(),
                });
            }
            let critical = match &self.critical_in {
                Some((r, k)) if *r == region && *k == kind => 1,
                _ => 0,
            };
            Ok(serde_json::json!({
                "count": 4,
                "healthy": 4 - critical,
                "unhealthy": critical,
                "critical": critical,
                "alarms": self.alarms_per_segment,
            }))
        }
    }

    fn config(regions: &[&str], kinds: &[&str]) -> InfraConfig {
        InfraConfig {
            regions: regions.iter().map(|s| s.to_string()).collect(),
            service_kinds: kinds.iter().map(|s| s.to_string()).collect(),
            max_concurrency: 2,
            timeout_per_service_ms: 1_000,
            cache_ttl_ms: 60_000,
        }
    }

    #[tokio::test]
    async fn discovery_fans_out_and_aggregates() {
        let inventory = Arc::new(FakeInventory::healthy());
        let mgr = InfraContextMgr::new(
            inventory.clone(),
            config(&["us-east-1", "eu-west-1"], &["compute", "database"]),
        );

        let snapshot = mgr.discover(false).await;
        assert_eq!(snapshot.segments.len(), 4);
        assert_eq!(snapshot.total_resources, 16);
        assert_eq!(snapshot.overall, OverallHealth::Healthy);
        // Deterministic order: region then kind.
        assert_eq!(snapshot.segments[0].region, "eu-west-1");
        assert_eq!(snapshot.segments[0].kind, "compute");
    }

    #[tokio::test]
    async fn cache_serves_within_ttl_and_force_refresh_bypasses() {
        let inventory = Arc::new(FakeInventory::healthy());
        let mgr = InfraContextMgr::new(inventory.clone(), config(&["us-east-1"], &["compute"]));

        mgr.discover(false).await;
        mgr.discover(false).await;
        assert_eq!(inventory.calls.load(Ordering::SeqCst), 1, "second call cached");

        mgr.discover(true).await;
        assert_eq!(inventory.calls.load(Ordering::SeqCst), 2, "force refresh re-runs");
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_discovery() {
        let inventory = Arc::new(FakeInventory::healthy());
        let mgr = Arc::new(InfraContextMgr::new(
            inventory.clone(),
            config(&["us-east-1"], &["compute"]),
        ));

        let a = Arc::clone(&mgr);
        let b = Arc::clone(&mgr);
        let (first, second) = tokio::join!(a.discover(false), b.discover(false));
        assert_eq!(first.total_resources, second.total_resources);
        assert_eq!(inventory.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn per_region_failure_does_not_abort_the_snapshot() {
        let inventory = Arc::new(FakeInventory {
            calls: AtomicUsize::new(0),
            alarms_per_segment: 0,
            critical_in: None,
            fail_region: Some("eu-west-1".into()),
        });
        let mgr = InfraContextMgr::new(
            inventory,
            config(&["us-east-1", "eu-west-1"], &["compute"]),
        );

        let snapshot = mgr.discover(false).await;
        assert_eq!(snapshot.segments.len(), 2);
        let failed = snapshot
            .segments
            .iter()
            .find(|s| s.region == "eu-west-1")
            .unwrap();
        assert!(failed.error.is_some());
        assert_eq!(snapshot.overall, OverallHealth::Healthy);
    }

    #[tokio::test]
    async fn health_thresholds() {
        // One critical resource anywhere makes the estate critical.
        let inventory = Arc::new(FakeInventory {
            calls: AtomicUsize::new(0),
            alarms_per_segment: 0,
            critical_in: Some(("us-east-1".into(), "database".into())),
            fail_region: None,
        });
        let mgr = InfraContextMgr::new(inventory, config(&["us-east-1"], &["compute", "database"]));
        assert_eq!(mgr.discover(false).await.overall, OverallHealth::Critical);

        // A single alarm degrades.
        let inventory = Arc::new(FakeInventory {
            calls: AtomicUsize::new(0),
            alarms_per_segment: 1,
            critical_in: None,
            fail_region: None,
        });
        let mgr = InfraContextMgr::new(inventory, config(&["us-east-1"], &["compute"]));
        assert_eq!(mgr.discover(false).await.overall, OverallHealth::Degraded);

        // More than two alarms total is critical.
        let inventory = Arc::new(FakeInventory {
            calls: AtomicUsize::new(0),
            alarms_per_segment: 3,
            critical_in: None,
            fail_region: None,
        });
        let mgr = InfraContextMgr::new(inventory, config(&["us-east-1"], &["compute"]));
        assert_eq!(mgr.discover(false).await.overall, OverallHealth::Critical);
    }
}
