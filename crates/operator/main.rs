use std::sync::Arc;

use anyhow::Context as _;
use kube::Client;
use tracing::info;

use neon_cluster::controllers::{self, State};
use neon_cluster::storage_controller::StorageControllerClient;
use neon_cluster::util::config::OperatorConfig;
use neon_cluster::util::store::KubeStore;
use neon_cluster::util::telemetry::{self, LogFormat};

mod handlers;
mod server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init(LogFormat::from_env()).await?;
    let config = OperatorConfig::from_env()?;

    let client = Client::try_default().await.context("failed to create kube client")?;
    let store = KubeStore::new(client.clone());
    let coordinator = Arc::new(StorageControllerClient::new(
        config.storage_controller_url_template.clone(),
        config.attach_tenant_timeout,
        config.create_timeline_timeout,
    ));

    let state = State::default();
    let ctx = state.to_context(store.clone(), coordinator, config.clone())?;
    info!(host = %config.http_host, port = config.http_port, "starting neon operator");

    let server = server::start_server(state, store, &config)?;

    // Controllers and the web server shut down gracefully on signals, so poll until all are done
    tokio::join!(
        controllers::cluster::run(client.clone(), ctx.clone()),
        controllers::project::run(client.clone(), ctx.clone()),
        controllers::branch::run(client.clone(), ctx.clone()),
        controllers::safekeeper::run(client.clone(), ctx.clone()),
        controllers::pageserver::run(client, ctx),
        server,
    )
    .5?;
    Ok(())
}
