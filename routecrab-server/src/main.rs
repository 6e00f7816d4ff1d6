use anyhow::Result;
use routecrab_server::auth::AuthForwarder;
use routecrab_server::config::Config;
use routecrab_server::discovery::{Poller, StaticDiscovery};
use routecrab_server::dispatch::Gateway;
use routecrab_server::ratelimit;
use routecrab_server::rpc::MsgPackTransport;
use routecrab_server::transport::{Transport, cancel_on_signal, http::HttpTransport};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse configuration from environment variables and CLI arguments
    let config = Config::from_env_and_args()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("routecrab={}", config.log_level).parse()?)
                .add_directive(format!("routecrab_server={}", config.log_level).parse()?),
        )
        .init();

    let store = ratelimit::store_from_config(&config.store)?;
    match &config.store.url {
        Some(url) => tracing::info!("Rate store: {}", url),
        None => tracing::warn!("No rate store configured, routes declaring rate limits will be refused"),
    }

    let auth = AuthForwarder::new(config.auth.inspector()?, &config.auth.service_name);
    let transport = Arc::new(MsgPackTransport::new(config.rpc.clone()));
    let gateway = Arc::new(Gateway::new(auth, transport).with_options(config.dispatch.clone()));

    let shutdown = CancellationToken::new();

    let discovery = Arc::new(StaticDiscovery::new(config.backends.clone()));
    tracing::info!("Discovering routes from {} backend(s)", config.backends.len());
    let poller = Poller::new(
        Arc::clone(&gateway),
        discovery,
        store,
        config.discovery.clone(),
    )
    .spawn(shutdown.clone());

    let mut transport_tasks = JoinSet::new();
    {
        let gateway = Arc::clone(&gateway);
        let shutdown = shutdown.clone();
        let host = config.http.host.clone();
        let port = config.http.port;
        let http = HttpTransport::new(&host, port)?;
        transport_tasks.spawn(async move {
            tracing::info!("Starting HTTP transport on {}:{}", host, port);
            http.start(gateway, shutdown).await
        });
    }

    tokio::spawn(cancel_on_signal(tokio::signal::ctrl_c(), shutdown.clone()));

    let mut result = Ok(());
    while let Some(joined) = transport_tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {
                tracing::info!("Transport task completed successfully");
            }
            Ok(Err(e)) => {
                tracing::error!("Transport task failed: {}", e);
                result = Err(e);
                shutdown.cancel();
            }
            Err(e) => {
                tracing::error!("Transport task panicked: {}", e);
                result = Err(anyhow::anyhow!("Transport task panicked"));
                shutdown.cancel();
            }
        }
    }

    shutdown.cancel();
    if let Err(e) = poller.await {
        tracing::error!("Discovery poller panicked: {}", e);
    }

    result
}
