//! Routes requests to the engine of their port and virtual host.
//!
//! The engine table is rebuilt wholesale on reload and swapped behind a
//! lock held only for the pointer swap; in-flight requests keep the
//! snapshot they started with.

use crate::engine::{Collaborators, RuleEngine};
use crate::error::EngineError;
use crate::loader;
use crate::model::RoutingModel;
use crate::request::NormalizedRequest;
use crate::response::MockResponse;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Builds the collaborators used by the engines of one port.
pub type CollaboratorFactory = Arc<dyn Fn(u16) -> Collaborators + Send + Sync>;

struct HostEngine {
    domains: Vec<String>,
    engine: Arc<RuleEngine>,
}

/// Engines of one load cycle, by port.
#[derive(Default)]
pub struct EngineTable {
    ports: BTreeMap<u16, Vec<HostEngine>>,
}

impl EngineTable {
    pub fn build(model: &RoutingModel, collaborators: &CollaboratorFactory) -> Self {
        let ports = model
            .ports
            .iter()
            .map(|(number, port)| {
                let shared = collaborators(*number);
                let engines = port
                    .vhosts
                    .values()
                    .map(|vhost| HostEngine {
                        domains: vhost.domains.clone(),
                        engine: Arc::new(RuleEngine::new(*number, vhost, shared.clone())),
                    })
                    .collect();
                (*number, engines)
            })
            .collect();
        Self { ports }
    }

    pub fn ports(&self) -> Vec<u16> {
        self.ports.keys().copied().collect()
    }

    /// Pick the engine for a host on a port.
    ///
    /// An exact domain match wins; a port with a single vhost serves every
    /// host name.
    pub fn resolve(&self, port: u16, host: Option<&str>) -> Result<Arc<RuleEngine>, EngineError> {
        let unknown = || EngineError::NoVirtualHost(host.unwrap_or_default().to_string());
        let engines = self.ports.get(&port).ok_or_else(unknown)?;

        if let Some(host) = host {
            if let Some(found) = engines
                .iter()
                .find(|e| e.domains.iter().any(|d| d.eq_ignore_ascii_case(host)))
            {
                return Ok(Arc::clone(&found.engine));
            }
        }
        match engines.as_slice() {
            [only] => Ok(Arc::clone(&only.engine)),
            _ => Err(unknown()),
        }
    }
}

pub struct Dispatcher {
    root: PathBuf,
    collaborators: CollaboratorFactory,
    table: RwLock<Arc<EngineTable>>,
}

impl Dispatcher {
    /// Load `root` and build the initial engine table.
    pub fn new(root: impl Into<PathBuf>, collaborators: CollaboratorFactory) -> Self {
        let root = root.into();
        let model = loader::load(&root);
        Self::from_model(root, &model, collaborators)
    }

    pub fn from_model(
        root: impl Into<PathBuf>,
        model: &RoutingModel,
        collaborators: CollaboratorFactory,
    ) -> Self {
        let table = EngineTable::build(model, &collaborators);
        Self {
            root: root.into(),
            collaborators,
            table: RwLock::new(Arc::new(table)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The current engine table.
    pub fn snapshot(&self) -> Arc<EngineTable> {
        Arc::clone(&self.table.read())
    }

    /// Reload the mock directory and install the result.
    ///
    /// Returns the ports of the new table.
    pub fn reload(&self) -> Vec<u16> {
        let model = loader::load(&self.root);
        let table = Arc::new(EngineTable::build(&model, &self.collaborators));
        let ports = table.ports();
        *self.table.write() = table;
        info!(
            "Reloaded {} rules across {} ports from {}",
            model.rule_count(),
            ports.len(),
            self.root.display()
        );
        ports
    }

    /// Handle a request received on `port`; failures become error responses.
    pub async fn dispatch(&self, port: u16, request: &NormalizedRequest) -> MockResponse {
        let table = self.snapshot();
        let host = request.host();
        let result = match table.resolve(port, host.as_deref()) {
            Ok(engine) => engine.handle(request).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(response) => response,
            Err(e) => {
                match &e {
                    EngineError::NoRuleMatches { .. } | EngineError::NoVirtualHost(_) => {
                        debug!("Port {}: {}", port, e)
                    }
                    EngineError::Upstream(_) => warn!("Port {}: {}", port, e),
                    EngineError::TemplateRender { .. } | EngineError::Internal(_) => {
                        error!("Port {}: {}", port, e)
                    }
                }
                e.to_response()
            }
        }
    }
}
