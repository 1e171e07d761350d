// Copyright (c) Simcore Contributors
// SPDX-License-Identifier: Apache-2.0

//! Process entry point: loads configuration, wires up structured logging,
//! brings up the engine, restores any bases left on disk from a previous
//! run, starts the periodic snapshot timer, and runs until interrupted.
//!
//! The numerical kernel itself is an external collaborator (out of scope
//! for this layer, see `simcore_kernel_iface`); this binary links
//! `simcore_testkit::MockFactory` as a stand-in so the process is runnable
//! end to end. A real deployment swaps in a crate implementing
//! `SimBasisFactory` against an actual `SimBasis` kernel.

use std::sync::Arc;

use anyhow::Context;
use simcore::Engine;
use simcore_config::EngineConfig;
use simcore_testkit::MockFactory;

const CONFIG_PATH_ENV: &str = "SIMCORE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "simcore.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let config_path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = EngineConfig::load(std::path::Path::new(&config_path))
        .with_context(|| format!("failed to load configuration from {config_path}"))?;
    tracing::info!(savepath = %config.savepath.display(), saveinterval_ms = config.saveinterval_ms, "starting simcore");

    let engine = Engine::new(config, Arc::new(MockFactory));
    engine
        .load()
        .await
        .context("failed to restore bases from the dump directory")?;
    tracing::info!(bases = ?engine.blist(), "restored bases from disk");

    let cron = engine.start_cron();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested, flushing all bases");

    cron.shutdown().await;
    engine
        .save()
        .await
        .context("failed to save bases during shutdown")?;

    Ok(())
}
