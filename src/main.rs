mod api;
mod bulk;
mod cli;
mod config;
mod error;
mod import;
mod items;
mod logging;
mod notify;
mod page;
mod refresh;
mod selection;
mod shared;
mod ui;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tokio::runtime::{Builder, Runtime};
use tracing::info;

use api::http::HttpApi;
use cli::Services;
use config::Config;

#[derive(Parser, Debug)]
#[command(name = "panelctl", version, about = "Admin panel for a REST backend")]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Delete several rows of a page in one request
    Delete(DeleteArgs),
    /// Import contacts from a spreadsheet, using the suggested column mapping
    Import(ImportArgs),
    /// Print one item as JSON
    Show(ShowArgs),
    /// Delete one item
    Rm(RmArgs),
    /// Change fields of one item
    Update(UpdateArgs),
}

#[derive(Args, Debug)]
struct DeleteArgs {
    /// Page key as configured under [[pages]]
    #[arg(long)]
    page: String,

    /// Answer yes to the confirmation
    #[arg(long, short = 'y', default_value_t = false)]
    yes: bool,

    #[arg(value_name = "ID")]
    ids: Vec<String>,
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// Id of the campaign the new contacts join
    #[arg(long)]
    campaign: Option<String>,

    #[arg(long, short = 'y', default_value_t = false)]
    yes: bool,

    #[arg(value_name = "FILE")]
    file: PathBuf,
}

#[derive(Args, Debug)]
struct ShowArgs {
    #[arg(long)]
    page: String,

    #[arg(value_name = "ID")]
    id: String,
}

#[derive(Args, Debug)]
struct RmArgs {
    #[arg(long)]
    page: String,

    #[arg(long, short = 'y', default_value_t = false)]
    yes: bool,

    #[arg(value_name = "ID")]
    id: String,
}

#[derive(Args, Debug)]
struct UpdateArgs {
    #[arg(long)]
    page: String,

    #[arg(value_name = "ID")]
    id: String,

    /// FIELD=VALUE pairs; values are parsed as JSON when possible
    #[arg(value_name = "FIELD=VALUE", value_parser = cli::parse_assignment)]
    assignments: Vec<(String, Value)>,
}

fn build_runtime() -> Result<Runtime> {
    Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(command) => {
            logging::init_cli()?;
            let config = config::load(cli.config.as_deref())?;
            run_command(command, config)
        }
        None => {
            let log_path = logging::init_panel()?;
            let config = config::load(cli.config.as_deref())?;
            info!(config = %config.config_path.display(), log = %log_path.display(), "starting panel");
            run_panel(&config)
        }
    }
}

fn run_command(command: Command, config: Config) -> Result<()> {
    let runtime = build_runtime()?;
    let api = HttpApi::new(&config.api, &config.import)?;
    let services = Services::new(config, api);

    let result = runtime.block_on(async {
        match command {
            Command::Delete(args) => cli::delete(&services, &args.page, &args.ids, args.yes).await,
            Command::Import(args) => {
                cli::import(&services, &args.file, args.campaign.as_deref(), args.yes).await
            }
            Command::Show(args) => cli::show(&services, &args.page, &args.id).await,
            Command::Rm(args) => cli::remove(&services, &args.page, &args.id, args.yes).await,
            Command::Update(args) => {
                cli::update(&services, &args.page, &args.id, args.assignments).await
            }
        }
    });

    services.print_notices();
    result
}

fn run_panel(config: &Config) -> Result<()> {
    let runtime = build_runtime()?;
    let api = HttpApi::new(&config.api, &config.import)?;
    let mut app = ui::app::App::new(config, api, runtime.handle().clone());
    app.run()
}
