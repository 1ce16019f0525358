//! Layered configuration loading: optional TOML file, then
//! `SCANGATE_*` environment overrides on top of the built-in defaults.

use std::path::Path;

use anyhow::Context;
use config::{Config, Environment, File};
use scangate_core::config::ScanGateConfig;

const DEFAULT_CONFIG_NAME: &str = "scangate";

pub fn load(path: Option<&Path>) -> anyhow::Result<ScanGateConfig> {
    let mut builder = Config::builder();

    builder = match path {
        Some(path) => builder.add_source(File::from(path.to_path_buf())),
        None => builder.add_source(File::with_name(DEFAULT_CONFIG_NAME).required(false)),
    };

    // SCANGATE_WORKER__CONCURRENCY=8 style overrides.
    builder = builder.add_source(Environment::with_prefix("SCANGATE").separator("__"));

    let settings = builder.build().context("assemble configuration sources")?;
    settings
        .try_deserialize()
        .context("deserialize configuration")
}
