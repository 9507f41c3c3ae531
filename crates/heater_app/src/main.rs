//! The `view-heater` binary.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use heater_engine::ReqwestStore;
use heater_logging::{heater_info, heater_warn, LogDestination};
use tokio_util::sync::CancellationToken;

use heater_app::{heat, resolve, Cli, ConfigFile};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let destination = match &cli.log_file {
        Some(path) => LogDestination::TerminalAndFile(path),
        None => LogDestination::Terminal,
    };
    heater_logging::initialize(cli.log, destination);

    let file = match &cli.config {
        Some(path) => Some(
            ConfigFile::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
        ),
        None => None,
    };
    let targets = resolve(&cli, file.as_ref())?;
    let store = ReqwestStore::new(cli.store_settings()).context("building HTTP client")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let failures = runtime.block_on(async {
        let shutdown = CancellationToken::new();
        let on_signal = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                heater_info!("Interrupted; stopping heaters");
                on_signal.cancel();
            }
        });
        heat(Arc::new(store), targets, shutdown).await
    });

    if failures > 0 {
        heater_warn!("{} heater(s) ended with an error", failures);
        bail!("{failures} heater(s) ended with an error");
    }
    Ok(())
}
