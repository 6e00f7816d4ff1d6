use super::{BackendRef, Discovery, DiscoveryError};
use crate::GatewayRegistry;
use crate::dispatch::Gateway;
use crate::ratelimit::{RateStore, RouteLimits};
use crate::rpc::{CallContext, CallError, MANIFEST_ENDPOINT};
use crate::types::Manifest;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{MissedTickBehavior, timeout};
use tokio_util::sync::CancellationToken;

/// Capability advertised by backends that serve a route manifest
pub const MANIFEST_CAPABILITY: &str = MANIFEST_ENDPOINT;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    /// Upper bound on each manifest call
    pub call_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            call_timeout: Duration::from_secs(5),
        }
    }
}

/// What one discovery cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub backends: usize,
    /// Backends whose manifest could not be fetched
    pub failed: usize,
    pub inserted: usize,
    /// Routes refused because their rate limits could not be built
    pub rejected: usize,
}

#[derive(Debug, Error)]
enum ManifestError {
    #[error(transparent)]
    Call(#[from] CallError),
    #[error("invalid manifest: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Background task merging backend manifests into the registry
pub struct Poller {
    gateway: Arc<Gateway>,
    discovery: Arc<dyn Discovery>,
    store: Option<Arc<dyn RateStore>>,
    config: PollerConfig,
}

impl Poller {
    pub fn new(
        gateway: Arc<Gateway>,
        discovery: Arc<dyn Discovery>,
        store: Option<Arc<dyn RateStore>>,
        config: PollerConfig,
    ) -> Self {
        Poller {
            gateway,
            discovery,
            store,
            config,
        }
    }

    fn registry(&self) -> &GatewayRegistry {
        &self.gateway.registry
    }

    /// Run one discovery cycle
    ///
    /// Only a failure to list backends fails the cycle. A backend whose
    /// manifest cannot be fetched is skipped, and its routes are picked up
    /// by a later cycle.
    pub async fn run_cycle(&self) -> Result<CycleReport, DiscoveryError> {
        let metrics = &self.gateway.metrics;
        let backends = match self.discovery.discover(MANIFEST_CAPABILITY).await {
            Ok(backends) => backends,
            Err(e) => {
                metrics.record_discovery_failure();
                return Err(e);
            }
        };
        self.gateway.directory.update(&backends);

        let context = self
            .gateway
            .auth
            .service_context()
            .map_err(|e| DiscoveryError::Unavailable(e.to_string()))?;

        let mut report = CycleReport {
            backends: backends.len(),
            ..CycleReport::default()
        };

        let mut tasks = JoinSet::new();
        for (index, backend) in backends.iter().cloned().enumerate() {
            let gateway = Arc::clone(&self.gateway);
            let context = context.clone();
            let call_timeout = self.config.call_timeout;
            tasks.spawn(async move {
                let manifest = fetch_manifest(&gateway, &backend, &context, call_timeout).await;
                (index, manifest)
            });
        }

        let mut manifests: Vec<Option<Manifest>> = backends.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(manifest))) => manifests[index] = Some(manifest),
                Ok((index, Err(e))) => {
                    report.failed += 1;
                    tracing::warn!(
                        backend = %backends[index].name,
                        address = %backends[index].address,
                        error = %e,
                        "Failed to fetch route manifest"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!("Manifest task panicked: {}", e);
                }
            }
        }

        // Merge in discovery order so key collisions resolve the same way every cycle
        for (backend, manifest) in backends.iter().zip(manifests) {
            if let Some(manifest) = manifest {
                self.merge_manifest(backend, manifest, &mut report);
            }
        }

        metrics.set_registered_routes(self.registry().len());
        metrics.record_cycle(report.failed);
        Ok(report)
    }

    fn merge_manifest(&self, backend: &BackendRef, manifest: Manifest, report: &mut CycleReport) {
        for entry in manifest.routes {
            let descriptor = entry.into_descriptor(&backend.name, &manifest.mount_prefix);
            let key = descriptor.key();

            if self.gateway.options.is_reserved(&key.path) {
                report.rejected += 1;
                tracing::error!(
                    backend = %backend.name,
                    route = %key,
                    reserved = %self.gateway.options.reserved_prefix(),
                    "Route not registered, path is reserved for the gateway"
                );
                continue;
            }

            let merged = self.registry().merge_with(descriptor, |route| {
                RouteLimits::build(route, self.store.as_ref())
            });
            match merged {
                Ok(true) => {
                    report.inserted += 1;
                    tracing::info!(backend = %backend.name, route = %key, "Registered route");
                }
                Ok(false) => {}
                Err(e) => {
                    report.rejected += 1;
                    tracing::error!(
                        backend = %backend.name,
                        route = %key,
                        error = %e,
                        "Route not registered"
                    );
                }
            }
        }
    }

    /// Poll until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            interval = ?self.config.interval,
            call_timeout = ?self.config.call_timeout,
            "Discovery poller started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.run_cycle() => match result {
                    Ok(report) => tracing::debug!(
                        backends = report.backends,
                        failed = report.failed,
                        inserted = report.inserted,
                        rejected = report.rejected,
                        "Discovery cycle complete"
                    ),
                    Err(e) => tracing::warn!("Discovery cycle failed: {}", e),
                },
            }
        }

        tracing::info!("Discovery poller stopped");
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

async fn fetch_manifest(
    gateway: &Gateway,
    backend: &BackendRef,
    context: &CallContext,
    call_timeout: Duration,
) -> Result<Manifest, ManifestError> {
    let call = gateway
        .transport
        .call(backend, MANIFEST_ENDPOINT, "{}".to_string(), context);
    let reply = timeout(call_timeout, call)
        .await
        .map_err(|_| CallError::Timeout)??;
    Ok(serde_json::from_str(&reply)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthForwarder, DenyAllInspector};
    use crate::discovery::StaticDiscovery;
    use crate::ratelimit::tests::ManualStore;
    use crate::rpc::{BackendServer, BackendTransport, RpcRequest};
    use crate::types::RouteEntry;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Answers calls by running them through in-process backend servers
    #[derive(Default)]
    struct InProcess {
        backends: HashMap<String, BackendServer>,
        down: Mutex<Vec<String>>,
    }

    impl InProcess {
        fn with(mut self, address: &str, server: BackendServer) -> Self {
            self.backends.insert(address.to_string(), server);
            self
        }
    }

    #[async_trait]
    impl BackendTransport for InProcess {
        async fn call(
            &self,
            backend: &BackendRef,
            endpoint: &str,
            body: String,
            context: &CallContext,
        ) -> Result<String, CallError> {
            if self.down.lock().contains(&backend.address) {
                return Err(CallError::Unavailable("down".to_string()));
            }
            let server = self
                .backends
                .get(&backend.address)
                .ok_or_else(|| CallError::Unavailable("unknown address".to_string()))?;
            let response = server
                .respond(RpcRequest {
                    service: backend.name.clone(),
                    endpoint: endpoint.to_string(),
                    metadata: context.metadata.clone(),
                    body,
                })
                .await;
            match response.error {
                Some(error) => Err(CallError::Remote(error)),
                None => Ok(response.body.unwrap_or_default()),
            }
        }
    }

    struct FailingDiscovery;

    #[async_trait]
    impl Discovery for FailingDiscovery {
        async fn discover(&self, _: &str) -> Result<Vec<BackendRef>, DiscoveryError> {
            Err(DiscoveryError::Unavailable("registry down".to_string()))
        }
    }

    fn users() -> BackendServer {
        BackendServer::new("users", "users")
            .route(RouteEntry::new("GET", "/users/:id", "Users.Get"))
            .route(RouteEntry {
                global: true,
                ..RouteEntry::new("GET", "/health", "Users.Health")
            })
    }

    fn billing() -> BackendServer {
        BackendServer::new("billing", "billing")
            .route(RouteEntry::new("GET", "/invoices", "Invoices.List"))
            // Collides with the users backend's global route
            .route(RouteEntry {
                global: true,
                ..RouteEntry::new("GET", "/health", "Billing.Health")
            })
    }

    fn poller(transport: InProcess, discovery: Arc<dyn Discovery>) -> Poller {
        let gateway = Arc::new(Gateway::new(
            AuthForwarder::new(Arc::new(DenyAllInspector), "routecrab"),
            Arc::new(transport),
        ));
        Poller::new(gateway, discovery, None, PollerConfig::default())
    }

    fn static_discovery() -> Arc<dyn Discovery> {
        Arc::new(StaticDiscovery::new(vec![
            BackendRef::new("users", "users:1"),
            BackendRef::new("billing", "billing:1"),
        ]))
    }

    #[tokio::test]
    async fn test_cycle_merges_all_backends() {
        let transport = InProcess::default()
            .with("users:1", users())
            .with("billing:1", billing());
        let poller = poller(transport, static_discovery());

        let report = poller.run_cycle().await.unwrap();
        assert_eq!(report.backends, 2);
        assert_eq!(report.inserted, 3);

        let routes = poller.registry().all();
        let paths: Vec<_> = routes.iter().map(|r| r.mounted_path()).collect();
        assert_eq!(paths, ["/billing/invoices", "/health", "/users/users/:id"]);

        // First discovered backend owns the colliding key
        let health = poller.registry().lookup("GET", "/health").unwrap();
        assert_eq!(health.descriptor().backend_name, "users");
        assert_eq!(poller.gateway.directory.len(), 2);
    }

    #[tokio::test]
    async fn test_repeated_cycles_are_idempotent() {
        let transport = InProcess::default()
            .with("users:1", users())
            .with("billing:1", billing());
        let poller = poller(transport, static_discovery());

        poller.run_cycle().await.unwrap();
        let first = format!("{:?}", poller.registry().all());

        let report = poller.run_cycle().await.unwrap();
        assert_eq!(report.inserted, 0);
        assert_eq!(format!("{:?}", poller.registry().all()), first);
    }

    #[tokio::test]
    async fn test_failing_backend_does_not_abort_cycle() {
        let transport = InProcess::default()
            .with("users:1", users())
            .with("billing:1", billing());
        transport.down.lock().push("users:1".to_string());
        let poller = poller(transport, static_discovery());

        let report = poller.run_cycle().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.inserted, 2);
        assert_eq!(
            poller.registry().lookup("GET", "/health").unwrap().descriptor().backend_name,
            "billing"
        );
    }

    #[tokio::test]
    async fn test_discovery_failure_ends_cycle() {
        let poller = poller(InProcess::default(), Arc::new(FailingDiscovery));
        assert!(poller.run_cycle().await.is_err());
        assert!(poller.registry().is_empty());
        assert_eq!(
            poller
                .gateway
                .metrics
                .discovery_failures
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn test_routes_with_unbuildable_limits_are_retried() {
        let limited = BackendServer::new("limited", "limited")
            .route(RouteEntry {
                ratelimit_client_ip: vec!["2-M".to_string()],
                ..RouteEntry::new("GET", "/a", "A.Get")
            })
            .route(RouteEntry {
                ratelimit_client_ip: vec!["bogus".to_string()],
                ..RouteEntry::new("GET", "/b", "B.Get")
            });
        let transport = InProcess::default().with("limited:1", limited);
        let discovery: Arc<dyn Discovery> =
            Arc::new(StaticDiscovery::new(vec![BackendRef::new("limited", "limited:1")]));

        // No store configured: both declared limits are unbuildable
        let without_store = poller(transport, Arc::clone(&discovery));
        let report = without_store.run_cycle().await.unwrap();
        assert_eq!((report.inserted, report.rejected), (0, 2));

        let mut with_store = without_store;
        with_store.store = Some(Arc::new(ManualStore::new()));
        let report = with_store.run_cycle().await.unwrap();
        assert_eq!((report.inserted, report.rejected), (1, 1));
        assert!(with_store.registry().lookup("GET", "/limited/a").is_some());
        assert!(with_store.registry().lookup("GET", "/limited/b").is_none());
    }

    #[tokio::test]
    async fn test_routes_under_router_base_are_refused() {
        let sneaky = BackendServer::new("router", "router")
            .route(RouteEntry::new("GET", "/routes", "Router.List"))
            .route(RouteEntry {
                global: true,
                ..RouteEntry::new("GET", "/router/metrics", "Router.Metrics")
            })
            .route(RouteEntry {
                global: true,
                ..RouteEntry::new("GET", "/routerless", "Router.Other")
            });
        let transport = InProcess::default().with("router:1", sneaky);
        let discovery: Arc<dyn Discovery> =
            Arc::new(StaticDiscovery::new(vec![BackendRef::new("router", "router:1")]));
        let poller = poller(transport, discovery);

        let report = poller.run_cycle().await.unwrap();
        assert_eq!((report.inserted, report.rejected), (1, 2));
        assert!(poller.registry().lookup("GET", "/routerless").is_some());
        assert!(poller.registry().lookup("GET", "/router/routes").is_none());
        assert!(poller.registry().lookup("GET", "/router/metrics").is_none());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let transport = InProcess::default().with("users:1", users());
        let discovery: Arc<dyn Discovery> =
            Arc::new(StaticDiscovery::new(vec![BackendRef::new("users", "users:1")]));
        let poller = poller(transport, discovery);
        let gateway = Arc::clone(&poller.gateway);

        let shutdown = CancellationToken::new();
        let handle = poller.spawn(shutdown.clone());

        // The first tick fires immediately
        tokio::time::timeout(Duration::from_secs(2), async {
            while gateway.registry.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
