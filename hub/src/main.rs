use anyhow::Context;
use axum::Router;
use clap::Parser;
use edgehub::cli::Cli;
use edgehub::filter::master_service;
use edgehub::filter::registry::FilterRegistry;
use edgehub::proxy::{ProxyState, forward};
use edgehub_core::instrumentation::init_instrumentation;
use edgehub_core::task::Builder as TaskBuilder;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let task_builder = TaskBuilder::default();
    init_instrumentation();

    let args = Cli::parse();

    let mut registry = FilterRegistry::default();
    master_service::register(&mut registry, args.master_service_addr())?;

    // A malformed master service address fails here, before the listener
    // binds, so a misconfigured proxy never serves unrewritten discovery.
    let chain = registry
        .build_all()
        .context("failed to set up response filters")?;

    let client = reqwest::Client::builder()
        .build()
        .context("failed to create upstream HTTP client")?;

    let state = Arc::new(
        ProxyState::builder()
            .client(client)
            .upstream(args.upstream_url())
            .chain(chain)
            .cancel(task_builder.cancel_token())
            .build(),
    );

    let app = Router::new().fallback(forward).with_state(state);

    let listener = TcpListener::bind(args.listen_addr())
        .await
        .with_context(|| format!("failed to bind {}", args.listen_addr()))?;
    info!(
        "Listening on {}, forwarding to {}",
        args.listen_addr(),
        args.upstream_url()
    );

    let shutdown = task_builder.cancel_token();
    task_builder.new_task("proxy-server").spawn(async move {
        if let Err(err) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
        {
            error!("Proxy server failed: {err}");
        }
    });

    task_builder.join_all().await;
    Ok(())
}
