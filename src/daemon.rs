use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::ack::{AckLinkBuilder, AckVerifier};
use crate::ack_handler::{self, AckHandlerState};
use crate::chaser_loop::{self, ChaserLoopDeps};
use crate::config::Config;
use crate::db;
use crate::maintenance;
use crate::secrets::SqliteSecretsStore;
use crate::signer::Signer;
use crate::sor_client::HttpSorClient;
use crate::notify_client::HttpNotifyClient;
use crate::token_provider::{StaticTokenProvider, TokenProvider};
use crate::workflow::{self, CategoryOrder};

pub async fn run(config: Config) -> Result<()> {
    let pool = db::create_pool(&config).await.context("creating database")?;
    info!(db_path = %config.db_path().display(), "database ready");

    let template = workflow::load_template(&config.chaser.workflow_template_path).context("loading workflow template")?;
    let category_order = Arc::new(CategoryOrder::from_template(&template));

    let secrets = Arc::new(SqliteSecretsStore::new(pool.clone()));
    let signer = Arc::new(Signer::new(secrets));
    let link_builder = Arc::new(AckLinkBuilder::new(signer.clone(), config.ack_link.base_url.clone()));
    let verifier = Arc::new(AckVerifier::new(signer));

    // The collaboration/chat APIs are fronted by an externally managed token
    // provider in production (spec.md §2 Out of scope); this binary ships a
    // static placeholder so it runs standalone.
    let sor_token_provider: Arc<dyn TokenProvider> = Arc::new(StaticTokenProvider::new("unset"));
    let notify_token_provider: Arc<dyn TokenProvider> = Arc::new(StaticTokenProvider::new("unset"));

    let field_mappings = Arc::new(config.sharepoint_field_mappings.clone());
    let sor_client: Arc<dyn crate::sor_client::SorClient> =
        Arc::new(HttpSorClient::new(config.sor_client.base_url.clone(), field_mappings, sor_token_provider));
    let notify_client: Arc<dyn crate::notify_client::NotifyClient> =
        Arc::new(HttpNotifyClient::new(config.notify_client.base_url.clone(), notify_token_provider));

    let config = Arc::new(config);
    let cancel = CancellationToken::new();

    let chaser_deps = ChaserLoopDeps {
        pool: pool.clone(),
        config: config.clone(),
        sor_client: sor_client.clone(),
        notify_client,
        link_builder,
        category_order,
    };
    let chaser_handle = tokio::spawn(chaser_loop::chaser_loop(chaser_deps, cancel.clone()));

    let maintenance_handle = tokio::spawn(maintenance::maintenance_loop(
        pool.clone(),
        config.database_maintenance.clone(),
        cancel.clone(),
    ));

    let ack_state = AckHandlerState {
        pool: pool.clone(),
        verifier,
        sor_client,
        identity_config: Arc::new(config.identity.clone()),
    };
    let router = ack_handler::build_router(ack_state);
    let listener = tokio::net::TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("binding to {}", config.server.listen))?;
    info!(listen = %config.server.listen, "ack HTTP server listening");

    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                server_cancel.cancelled().await;
            })
            .await
    });

    wait_for_shutdown().await;
    info!("shutdown signal received");

    cancel.cancel();

    let shutdown_timeout = std::time::Duration::from_secs(10);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        let _ = chaser_handle.await;
        let _ = maintenance_handle.await;
        let _ = server_handle.await;
    })
    .await;

    pool.close().await;
    info!("shutdown complete");

    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
