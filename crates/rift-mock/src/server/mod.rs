//! Port listeners.
//!
//! One HTTP/1.1 listener per port of the routing model. Every listener
//! forwards to the shared [`Dispatcher`], so a reload changes what the
//! listeners answer without rebinding them.

mod dispatcher;
mod handler;

pub use dispatcher::{CollaboratorFactory, Dispatcher, EngineTable};
pub use handler::handle_mock_request;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind port {0}: {1}")]
    Bind(u16, String),
    #[error("Port {0} is already being served")]
    PortInUse(u16),
}

/// Owns the listeners of every served port.
pub struct MockServer {
    dispatcher: Arc<Dispatcher>,
    host: String,
    body_limit: usize,
    /// Model port → bound address
    listeners: RwLock<BTreeMap<u16, SocketAddr>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl MockServer {
    pub fn new(dispatcher: Arc<Dispatcher>, host: impl Into<String>, body_limit: usize) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            dispatcher,
            host: host.into(),
            body_limit,
            listeners: RwLock::new(BTreeMap::new()),
            shutdown_tx,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Bind every port of the current table that has no listener yet.
    ///
    /// A port that fails to bind is logged and skipped. Returns the newly
    /// bound ports.
    pub async fn bind_all(&self) -> Vec<u16> {
        let mut bound = Vec::new();
        for port in self.dispatcher.snapshot().ports() {
            if self.listeners.read().contains_key(&port) {
                continue;
            }
            match self.bind(port).await {
                Ok(_) => bound.push(port),
                Err(e) => error!("{}", e),
            }
        }
        bound
    }

    /// Bind `port` on the configured host and start serving it.
    pub async fn bind(&self, port: u16) -> Result<SocketAddr, ServerError> {
        let listener = TcpListener::bind((self.host.as_str(), port))
            .await
            .map_err(|e| ServerError::Bind(port, e.to_string()))?;
        self.serve(port, listener)
    }

    /// Serve model port `port` on an already bound listener.
    pub fn serve(&self, port: u16, listener: TcpListener) -> Result<SocketAddr, ServerError> {
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::Bind(port, e.to_string()))?;
        {
            let mut listeners = self.listeners.write();
            if listeners.contains_key(&port) {
                return Err(ServerError::PortInUse(port));
            }
            listeners.insert(port, addr);
        }
        info!("Mock port {} listening on {}", port, addr);

        let dispatcher = Arc::clone(&self.dispatcher);
        let body_limit = self.body_limit;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, client_addr)) => {
                                let dispatcher = Arc::clone(&dispatcher);
                                tokio::spawn(async move {
                                    let io = TokioIo::new(stream);
                                    let service = service_fn(move |req| {
                                        let dispatcher = Arc::clone(&dispatcher);
                                        async move {
                                            handle_mock_request(req, dispatcher, port, client_addr, body_limit).await
                                        }
                                    });
                                    if let Err(e) = http1::Builder::new()
                                        .serve_connection(io, service)
                                        .await
                                    {
                                        debug!("Connection error on port {}: {}", port, e);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Accept error on port {}: {}", port, e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Mock port {} shutting down", port);
                        break;
                    }
                }
            }
        });

        Ok(addr)
    }

    /// Reload the mock directory and start listeners for ports that are new.
    ///
    /// Ports that disappeared keep their listener and answer `404` until the
    /// process restarts.
    pub async fn reload(&self) -> Vec<u16> {
        let dispatcher = Arc::clone(&self.dispatcher);
        // the directory walk is blocking file IO
        let ports = match tokio::task::spawn_blocking(move || dispatcher.reload()).await {
            Ok(ports) => ports,
            Err(e) => {
                error!("Reload of {} failed: {}", self.dispatcher.root().display(), e);
                return Vec::new();
            }
        };
        for port in self.bound_ports() {
            if !ports.contains(&port) {
                warn!("Port {} no longer has rules; it answers 404 until restart", port);
            }
        }
        self.bind_all().await
    }

    pub fn bound_ports(&self) -> Vec<u16> {
        self.listeners.read().keys().copied().collect()
    }

    pub fn local_addr(&self, port: u16) -> Option<SocketAddr> {
        self.listeners.read().get(&port).copied()
    }

    /// Stop accepting connections on every port.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
