//! Node-local service health checks.
//!
//! Load balancers probe a service's health check node port on every node to learn whether the node
//! hosts ready endpoints for the service. The [`Server`] keeps one listener per tracked service and
//! answers each probe with the number of local endpoints: `200 OK` while there is at least one,
//! `503 Service Unavailable` otherwise.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod listener;


pub use self::listener::{Listening, TcpListen};
use ahash::AHashMap as HashMap;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, Response, StatusCode};
use netqos_controller_core::ResourceId;
use std::{
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tracing::{debug, info, warn};

pub type Body = Full<Bytes>;

/// Opens a listener that answers probes for one service.
pub trait Listen {
    /// Dropping the handle stops the listener.
    type Handle: Send + 'static;

    fn listen(&self, port: u16, health: Health) -> io::Result<Self::Handle>;
}

/// The health of a single service on this node.
#[derive(Clone, Debug)]
pub struct Health {
    service: ResourceId,
    endpoints: Arc<AtomicUsize>,
}

/// Tracks the services that are health checked on this node.
pub struct Server<L: Listen> {
    listen: L,
    services: HashMap<ResourceId, Tracked<L::Handle>>,
}

struct Tracked<H> {
    port: u16,
    health: Health,
    _listener: H,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct Report<'a> {
    service: ServiceRef<'a>,
    local_endpoints: usize,
}

#[derive(serde::Serialize)]
struct ServiceRef<'a> {
    namespace: &'a str,
    name: &'a str,
}

// === impl Health ===

impl Health {
    fn new(service: ResourceId) -> Self {
        Self {
            service,
            endpoints: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn service(&self) -> &ResourceId {
        &self.service
    }

    pub fn endpoints(&self) -> usize {
        self.endpoints.load(Ordering::Acquire)
    }

    fn set_endpoints(&self, n: usize) {
        self.endpoints.store(n, Ordering::Release);
    }

    /// Builds the response to a probe.
    pub fn respond(&self) -> Response<Body> {
        let local_endpoints = self.endpoints();
        let status = if local_endpoints == 0 {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::OK
        };
        let report = Report {
            service: ServiceRef {
                namespace: &self.service.namespace,
                name: &self.service.name,
            },
            local_endpoints,
        };
        let body = serde_json::to_vec(&report).unwrap_or_default();
        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .header("X-Content-Type-Options", "nosniff")
            .body(Body::from(body))
            .expect("health check response must be valid")
    }
}

// === impl Server ===

impl<L: Listen> Server<L> {
    pub fn new(listen: L) -> Self {
        Self {
            listen,
            services: HashMap::default(),
        }
    }

    /// Replaces the set of tracked services.
    ///
    /// Services that are no longer present, or whose port changed, stop listening. New services
    /// (including re-ported ones) start with no local endpoints. A service whose listener cannot
    /// be opened is left untracked so that a later sync retries it.
    pub fn sync_services(&mut self, services: impl IntoIterator<Item = (ResourceId, u16)>) {
        let desired = services.into_iter().collect::<HashMap<_, _>>();

        self.services.retain(|id, tracked| {
            let keep = desired.get(id) == Some(&tracked.port);
            if !keep {
                info!(service = %id, port = tracked.port, "Closing health check listener");
            }
            keep
        });

        for (id, port) in desired {
            if self.services.contains_key(&id) {
                continue;
            }
            let health = Health::new(id.clone());
            match self.listen.listen(port, health.clone()) {
                Ok(listener) => {
                    info!(service = %id, port, "Opened health check listener");
                    self.services.insert(
                        id,
                        Tracked {
                            port,
                            health,
                            _listener: listener,
                        },
                    );
                }
                Err(error) => {
                    warn!(service = %id, port, %error, "Failed to open health check listener");
                }
            }
        }
    }

    /// Replaces the local endpoint counts of tracked services.
    ///
    /// Tracked services missing from `endpoints` have no local endpoints. Counts for services that
    /// are not tracked are ignored.
    pub fn sync_endpoints(&mut self, endpoints: impl IntoIterator<Item = (ResourceId, usize)>) {
        let mut endpoints = endpoints.into_iter().collect::<HashMap<_, _>>();
        for (id, tracked) in &self.services {
            let n = endpoints.remove(id).unwrap_or(0);
            if tracked.health.endpoints() != n {
                debug!(service = %id, endpoints = n, "Updating local endpoints");
            }
            tracked.health.set_endpoints(n);
        }
        for id in endpoints.keys() {
            debug!(service = %id, "Ignoring endpoints for untracked service");
        }
    }

    /// The tracked services and their ports.
    pub fn services(&self) -> Vec<(ResourceId, u16)> {
        let mut services = self
            .services
            .iter()
            .map(|(id, tracked)| (id.clone(), tracked.port))
            .collect::<Vec<_>>();
        services.sort();
        services
    }

    pub fn health(&self, service: &ResourceId) -> Option<&Health> {
        self.services.get(service).map(|tracked| &tracked.health)
    }
}
