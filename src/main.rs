use std::sync::Arc;

use anyhow::{Context, Result};
use scsi_target_rs::{
    bus::driver::VirtualBus,
    cfg::{
        cli::{config_path_arg, resolve_config_path},
        config::Config,
        logger::init_logger,
    },
    target::service::TargetService,
};
use tokio::{main, signal};
use tracing::info;

#[main]
async fn main() -> Result<()> {
    let _init_logger = init_logger("tests/config_logger.yaml")?;

    let config = resolve_config_path(&config_path_arg("tests/config.yaml"))
        .and_then(Config::load_from_file)
        .context("failed to resolve or load config")?;

    // Physical GPIO wiring lives outside this crate; the demo binary serves
    // the in-memory bus.
    let bus = Arc::new(VirtualBus::new());
    let service = TargetService::new(bus, config.runtime.max_targets);

    for dev_cfg in &config.targets {
        service.attach(&config, dev_cfg)?;
    }

    info!(
        devices = serde_json::to_string(&service.list())?,
        "targets attached"
    );

    signal::ctrl_c().await.context("failed to wait for ctrl-c")?;
    info!("shutting down");
    service.shutdown(config.runtime.shutdown_timeout).await;

    Ok(())
}
