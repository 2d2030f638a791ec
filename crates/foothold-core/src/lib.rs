pub mod app;
pub mod category;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod datetime;
pub mod filter;
pub mod ids;
pub mod item;
pub mod notify;
pub mod reminder;
pub mod render;
pub mod reorder;
pub mod status;
pub mod store;
pub mod transfer;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let cli =
    cli::GlobalCli::parse_from(raw_args);

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting foothold CLI"
  );
  debug!(?cli.rc_overrides, "rc overrides");

  let mut cfg = config::Config::load(
    cli.config.as_deref()
  )?;
  cfg.apply_overrides(
    cli
      .rc_overrides
      .into_iter()
      .map(|kv| (kv.key, kv.value))
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let store =
    datastore::JsonFileStore::open(
      &data_dir
    )
    .with_context(|| {
      format!(
        "failed to open datastore at \
         {}",
        data_dir.display()
      )
    })?;

  let clock = datetime::Clock::new(
    cfg.get("timezone").as_deref()
  )?;
  let mut app =
    app::App::load(store, clock)
      .context(
        "failed to load stored items"
      )?;

  let mut renderer =
    render::Renderer::new(&cfg)?;
  let command =
    cli.command.unwrap_or_else(|| {
      cli::Command::List(
        cli::ListArgs::default()
      )
    });

  commands::dispatch(
    &mut app,
    &cfg,
    &mut renderer,
    &data_dir,
    command
  )?;

  info!("done");
  Ok(())
}
