//! `b update`: re-resolve versions and sync env files.

use anyhow::Result;
use b_lib::manifest::Strategy;

use super::Shared;
use super::install::{PipelineOptions, run_pipeline};

pub fn run(shared: &Shared, names: Vec<String>, strategy: Option<String>, force: bool) -> Result<()> {
  let strategy = strategy
    .map(|s| s.parse::<Strategy>().map_err(anyhow::Error::msg))
    .transpose()?;

  run_pipeline(shared, names, PipelineOptions { force, strategy })
}
