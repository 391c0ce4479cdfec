mod commands;
mod config;
mod mealie;
mod ourgroceries;
mod server;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::{
    cmd_add, cmd_config_set, cmd_config_show, cmd_db_setup, cmd_db_version, cmd_done,
    cmd_done_list, cmd_plan, cmd_readd, cmd_remove, cmd_shopping_build, cmd_shopping_clear,
    cmd_shopping_send, cmd_shopping_set, cmd_shopping_show, resolve_window,
};
use crate::config::Config;
use crate::mealie::MealieClient;
use crate::ourgroceries::OurGroceriesClient;
use platter_core::models::MealId;
use platter_core::service::PlannerService;

#[derive(Parser)]
#[command(
    name = "platter",
    version,
    about = "Meal-plan dashboard on top of Mealie",
    long_about = "Shows what is left to cook from your Mealie meal plan, keeps local done \
                  markers and a shopping list, and pushes the list to OurGroceries."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show planned meals that are not done yet
    Plan {
        /// First day of the window (YYYY-MM-DD or today/yesterday/tomorrow)
        #[arg(long)]
        start: Option<String>,
        /// Last day of the window (YYYY-MM-DD or today/yesterday/tomorrow)
        #[arg(long)]
        end: Option<String>,
        /// Let Mealie pick the window instead of the configured days before/after
        #[arg(long, conflicts_with_all = ["start", "end"])]
        all: bool,
        /// Also list meals already marked done
        #[arg(long)]
        done: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Mark a planned meal as done
    Done {
        /// Meal-plan entry ID
        meal_id: MealId,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Put a done meal back on the plan
    Readd {
        /// Meal-plan entry ID
        meal_id: MealId,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List meals marked done
    DoneList {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete an entry from the Mealie meal plan
    Remove {
        /// Meal-plan entry ID
        meal_id: MealId,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a recipe to the Mealie meal plan
    Add {
        /// Recipe slug
        slug: String,
        /// Day to plan it for (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Entry type: breakfast, lunch, dinner, side
        #[arg(short = 't', long = "type", default_value = "dinner")]
        entry_type: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage the cached shopping list
    Shopping {
        #[command(subcommand)]
        command: ShoppingCommands,
    },
    /// Inspect or migrate the local database
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// Show or change settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Disable API key authentication (for development/testing)
        #[arg(long)]
        no_auth: bool,
    },
}

#[derive(Subcommand)]
enum ShoppingCommands {
    /// Show the cached shopping list
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Rebuild the list from the ingredients of meals not yet done
    Build {
        /// First day of the window
        #[arg(long)]
        start: Option<String>,
        /// Last day of the window
        #[arg(long)]
        end: Option<String>,
        /// Let Mealie pick the window
        #[arg(long, conflicts_with_all = ["start", "end"])]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replace the list from a JSON file of [id, name] pairs ("-" for stdin)
    Set {
        file: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Push the list to OurGroceries
    Send {
        /// Grocery list name (default: the grocery_list_name setting)
        #[arg(long)]
        list: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Empty the list
    Clear {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum DbCommands {
    /// Create or migrate the database, taking a backup first
    Setup {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the schema version and whether this build can use it
    Version {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current settings
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change a setting (days_before, days_after, grocery_list_name, http_timeout_secs, log_level)
    Set {
        key: String,
        value: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

/// Open the store, migrating it first. A failed migration aborts the command.
fn open_service(config: &Config) -> Result<PlannerService> {
    PlannerService::new(&config.db_path)
        .with_context(|| format!("Failed to open database at {}", config.db_path.display()))
}

#[allow(clippy::too_many_lines)]
fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load()?;
    init_tracing(&config.settings.log_level);

    // Blocking commands drive the async clients through this runtime's handle.
    let rt = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let mealie = |config: &Config| -> Result<MealieClient> {
        Ok(MealieClient::new(config.mealie()?, rt.handle().clone())?)
    };

    match cli.command {
        Commands::Plan {
            start,
            end,
            all,
            done,
            json,
        } => {
            let window = resolve_window(&config.settings, start, end, all)?;
            let client = mealie(&config)?;
            cmd_plan(&open_service(&config)?, &client, window, done, json)
        }
        Commands::Done { meal_id, json } => cmd_done(&open_service(&config)?, meal_id, json),
        Commands::Readd { meal_id, json } => cmd_readd(&open_service(&config)?, meal_id, json),
        Commands::DoneList { json } => cmd_done_list(&open_service(&config)?, json),
        Commands::Remove { meal_id, json } => {
            let client = mealie(&config)?;
            cmd_remove(&open_service(&config)?, &client, meal_id, json)
        }
        Commands::Add {
            slug,
            date,
            entry_type,
            json,
        } => {
            let client = mealie(&config)?;
            cmd_add(&open_service(&config)?, &client, &slug, date, &entry_type, json)
        }
        Commands::Shopping { command } => match command {
            ShoppingCommands::Show { json } => cmd_shopping_show(&open_service(&config)?, json),
            ShoppingCommands::Build {
                start,
                end,
                all,
                json,
            } => {
                let window = resolve_window(&config.settings, start, end, all)?;
                let client = mealie(&config)?;
                cmd_shopping_build(&open_service(&config)?, &client, window, json)
            }
            ShoppingCommands::Set { file, json } => {
                cmd_shopping_set(&open_service(&config)?, &file, json)
            }
            ShoppingCommands::Send { list, json } => {
                let grocery = OurGroceriesClient::new(config.grocery()?, rt.handle().clone())?;
                let list = list.unwrap_or_else(|| config.settings.grocery_list_name.clone());
                cmd_shopping_send(&open_service(&config)?, &grocery, &list, json)
            }
            ShoppingCommands::Clear { json } => cmd_shopping_clear(&open_service(&config)?, json),
        },
        Commands::Db { command } => match command {
            DbCommands::Setup { json } => cmd_db_setup(&config.db_path, json),
            DbCommands::Version { json } => cmd_db_version(&config.db_path, json),
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show { json } => cmd_config_show(&config, json),
            ConfigCommands::Set { key, value, json } => {
                cmd_config_set(&mut config, &key, &value, json)
            }
        },
        Commands::Serve {
            port,
            bind,
            no_auth,
        } => {
            let svc = open_service(&config)?;
            let api_key = if no_auth {
                None
            } else {
                Some(config.load_or_create_api_key()?.0)
            };
            let client = mealie(&config)?;
            let grocery = match config.grocery() {
                Ok(gc) => Some(Arc::new(OurGroceriesClient::new(gc, rt.handle().clone())?)),
                Err(_) => None,
            };
            let state = server::AppState {
                svc: Arc::new(Mutex::new(svc)),
                mealie: Arc::new(client),
                grocery,
                settings: config.settings.clone(),
                api_key,
            };
            rt.block_on(server::start_server(state, port, &bind))
        }
    }
}
