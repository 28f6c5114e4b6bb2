use clap::Parser;
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use spring_boot_operator::{
    config::OperatorConfig,
    controller::{self, cancel_on_shutdown_signal},
    error::Error,
    webhook,
};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = OperatorConfig::parse();

    let client = Client::try_default()
        .await
        .expect("failed to create kube Client");

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown_signal(cancel.clone()));

    info!("starting spring-boot-operator");
    match config.webhook_addr {
        Some(addr) => {
            tokio::try_join!(
                controller::run(client, &config, cancel.clone()),
                webhook::serve(addr, cancel),
            )?;
            Ok(())
        }
        None => controller::run(client, &config, cancel).await,
    }
}
