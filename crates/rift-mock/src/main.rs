use anyhow::Context;
use clap::Parser;
use rift_mock::config::ServerConfig;
use rift_mock::engine::Collaborators;
use rift_mock::hooks::{HookDispatcher, HttpHookTransport};
use rift_mock::recording::{FileRecorder, InMemoryRecorder, Recorder};
use rift_mock::server::{CollaboratorFactory, Dispatcher, MockServer};
use rift_mock::upstream::{HttpProxyClient, ProxyClient};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("rift-mock v{} starting", env!("CARGO_PKG_VERSION"));

    let collaborators = collaborator_factory(&config).await?;
    let dispatcher = Arc::new(Dispatcher::new(config.dir.clone(), collaborators));
    let server = Arc::new(MockServer::new(dispatcher, config.host.clone(), config.body_limit));

    let bound = server.bind_all().await;
    if bound.is_empty() {
        warn!(
            "No ports are being served; add <port>/<domain>/ directories under {} and send SIGHUP",
            config.dir.display()
        );
    }

    #[cfg(unix)]
    spawn_reload_on_hangup(Arc::clone(&server));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");
    server.shutdown();
    Ok(())
}

async fn collaborator_factory(config: &ServerConfig) -> anyhow::Result<CollaboratorFactory> {
    let proxy: Arc<dyn ProxyClient> = Arc::new(HttpProxyClient::new(config.upstream_timeout())?);
    let recorder: Arc<dyn Recorder> = match &config.record_file {
        Some(path) => Arc::new(FileRecorder::open(path).await?),
        None => Arc::new(InMemoryRecorder::with_capacity(config.record_capacity)),
    };
    let hook_client = HttpHookTransport::client()?;
    let config = config.clone();

    Ok(Arc::new(move |port| Collaborators {
        proxy: Arc::clone(&proxy),
        recorder: Arc::clone(&recorder),
        hooks: HookDispatcher::new(Arc::new(HttpHookTransport::with_client(
            hook_client.clone(),
            config.hook_base_url(port),
        ))),
    }))
}

#[cfg(unix)]
fn spawn_reload_on_hangup(server: Arc<MockServer>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(hangup) => hangup,
            Err(e) => {
                warn!("Reload on SIGHUP unavailable: {}", e);
                return;
            }
        };
        while hangup.recv().await.is_some() {
            info!("SIGHUP received, reloading {}", server.dispatcher().root().display());
            let added = server.reload().await;
            if !added.is_empty() {
                info!("Started listeners for new ports {:?}", added);
            }
        }
    });
}
