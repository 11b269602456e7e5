mod ack;
mod ack_handler;
mod chaser_loop;
mod cli;
mod clock;
mod config;
mod daemon;
mod db;
mod error;
mod identity;
mod maintenance;
mod models;
mod notify_client;
mod secrets;
mod signer;
mod sor_client;
mod store;
mod token_provider;
mod workflow;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::info;

use crate::cli::{Cli, Commands};
use crate::config::{load_config, validate_config};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config).with_context(|| format!("loading config from {}", cli.config.display()))?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.chaser.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(config_path = %cli.config.display(), "config loaded");

    validate_config(&config).context("config validation failed")?;
    info!("config validated successfully");

    match cli.command {
        Some(Commands::Validate) => {
            println!("Configuration is valid.");
        }
        Some(Commands::Tick) => {
            run_single_tick(config).await?;
        }
        Some(Commands::Reserve {
            list_key,
            customer_id,
            phase,
            task,
            workflow_id,
            correlation_id,
            region,
            team_id,
            channel_id,
        }) => {
            let pool = db::create_pool(&config).await.context("creating database")?;
            let task_id = store::reserve_task(
                &pool,
                &list_key,
                &customer_id,
                &phase,
                &task,
                &workflow_id,
                correlation_id.as_deref(),
                &region,
                &team_id,
                &channel_id,
                Utc::now(),
            )
            .await
            .context("reserving task")?;
            println!("Reserved task_id={task_id}");
        }
        Some(Commands::Link { task_id, sp_item_id }) => {
            let pool = db::create_pool(&config).await.context("creating database")?;
            store::link_task(&pool, task_id, &sp_item_id).await.context("linking task")?;
            println!("Linked task_id={task_id} to sp_item_id={sp_item_id}");
        }
        None => {
            daemon::run(config).await?;
        }
    }

    Ok(())
}

async fn run_single_tick(config: config::Config) -> Result<()> {
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    use crate::ack::{AckLinkBuilder, AckVerifier};
    use crate::chaser_loop::{ChaserLoopDeps, run_single_tick_for_cli};
    use crate::secrets::SqliteSecretsStore;
    use crate::signer::Signer;
    use crate::sor_client::{HttpSorClient, SorClient};
    use crate::notify_client::{HttpNotifyClient, NotifyClient};
    use crate::token_provider::{StaticTokenProvider, TokenProvider};
    use crate::workflow::{self, CategoryOrder};

    let pool = db::create_pool(&config).await.context("creating database")?;
    let template = workflow::load_template(&config.chaser.workflow_template_path).context("loading workflow template")?;
    let category_order = Arc::new(CategoryOrder::from_template(&template));

    let secrets = Arc::new(SqliteSecretsStore::new(pool.clone()));
    let signer = Arc::new(Signer::new(secrets));
    let link_builder = Arc::new(AckLinkBuilder::new(signer.clone(), config.ack_link.base_url.clone()));
    let _verifier = Arc::new(AckVerifier::new(signer));

    let sor_token_provider: Arc<dyn TokenProvider> = Arc::new(StaticTokenProvider::new("unset"));
    let notify_token_provider: Arc<dyn TokenProvider> = Arc::new(StaticTokenProvider::new("unset"));
    let field_mappings = Arc::new(config.sharepoint_field_mappings.clone());
    let sor_client: Arc<dyn SorClient> =
        Arc::new(HttpSorClient::new(config.sor_client.base_url.clone(), field_mappings, sor_token_provider));
    let notify_client: Arc<dyn NotifyClient> =
        Arc::new(HttpNotifyClient::new(config.notify_client.base_url.clone(), notify_token_provider));

    let deps = ChaserLoopDeps {
        pool,
        config: Arc::new(config),
        sor_client,
        notify_client,
        link_builder,
        category_order,
    };

    run_single_tick_for_cli(&deps, &CancellationToken::new()).await?;
    println!("Tick complete.");
    Ok(())
}
