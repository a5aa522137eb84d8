mod commands;
mod config;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    PlanOptions, cmd_catalog_import, cmd_catalog_products, cmd_catalog_recipes,
    cmd_item_alternatives, cmd_item_servings, cmd_item_substitute, cmd_plan_day, cmd_plan_list,
    cmd_plan_show, cmd_plan_week, cmd_shopping, cmd_split_set, cmd_split_show, parse_date,
};
use crate::config::Config;
use plate_core::service::PlannerService;

#[derive(Parser)]
#[command(
    name = "plate",
    version,
    about = "Generate and maintain daily meal plans from a recipe catalog"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate, show and list meal plans
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Adjust items of a stored plan
    Item {
        #[command(subcommand)]
        command: ItemCommands,
    },
    /// Import and browse recipes and products
    Catalog {
        #[command(subcommand)]
        command: CatalogCommands,
    },
    /// Aggregate planned recipes and products over a date range
    Shopping {
        /// First day (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        start: Option<String>,
        /// Number of days to include
        #[arg(short, long, default_value = "7")]
        days: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage planner settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
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
enum PlanCommands {
    /// Generate (or regenerate) the plan for one day
    Day {
        #[command(flatten)]
        options: PlanOptions,
        /// Date to plan (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate plans for consecutive days
    Week {
        #[command(flatten)]
        options: PlanOptions,
        /// First day (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        start: Option<String>,
        /// Number of days to plan
        #[arg(short, long, default_value = "7")]
        days: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the stored plan for a day (default: today)
    Show {
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the most recent plans
    List {
        /// Maximum number of plans to show
        #[arg(short, long, default_value = "14")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ItemCommands {
    /// Change the servings of a plan item (products: hundreds of grams)
    Servings {
        /// Plan item ID (see `plate plan show`)
        item_id: i64,
        /// New number of servings
        servings: f64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replace the recipe of a plan item
    Substitute {
        /// Plan item ID (see `plate plan show`)
        item_id: i64,
        /// Recipe ID to use instead
        recipe_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recipes that share tags with a recipe
    Alternatives {
        /// Recipe ID
        recipe_id: i64,
        /// Maximum number of suggestions
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum CatalogCommands {
    /// Import recipes and products from a JSON bundle or a products CSV
    Import {
        /// Path to a .json bundle or .csv product list
        file: PathBuf,
        /// Preview import without making changes
        #[arg(long)]
        dry_run: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List/search recipes
    Recipes {
        /// Search query to filter by title
        #[arg(short, long)]
        search: Option<String>,
        /// Only recipes carrying this tag (exact, case-insensitive)
        #[arg(short, long)]
        tag: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List/search products
    Products {
        /// Search query to filter by name
        #[arg(short, long)]
        search: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum SettingsCommands {
    /// Show or set the protein/carbs/fat calorie split used by --split
    Split {
        #[command(subcommand)]
        command: SplitCommands,
    },
}

#[derive(Subcommand)]
enum SplitCommands {
    /// Show the current split
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set the split as protein/carbs/fat percentages, e.g. 30/35/35
    Set {
        /// Percentages summing to 100
        split: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("PLATE_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let svc = PlannerService::open_with_busy_timeout(&config.db_path, config.busy_timeout)?;

    match cli.command {
        Commands::Plan { command } => match command {
            PlanCommands::Day {
                options,
                date,
                json,
            } => cmd_plan_day(&svc, &options, parse_date(date)?, json),
            PlanCommands::Week {
                options,
                start,
                days,
                json,
            } => cmd_plan_week(&svc, &options, parse_date(start)?, days, json),
            PlanCommands::Show { date, json } => cmd_plan_show(&svc, parse_date(date)?, json),
            PlanCommands::List { limit, json } => cmd_plan_list(&svc, limit, json),
        },
        Commands::Item { command } => match command {
            ItemCommands::Servings {
                item_id,
                servings,
                json,
            } => cmd_item_servings(&svc, item_id, servings, json),
            ItemCommands::Substitute {
                item_id,
                recipe_id,
                json,
            } => cmd_item_substitute(&svc, item_id, recipe_id, json),
            ItemCommands::Alternatives {
                recipe_id,
                limit,
                json,
            } => cmd_item_alternatives(&svc, recipe_id, limit, json),
        },
        Commands::Catalog { command } => match command {
            CatalogCommands::Import {
                file,
                dry_run,
                json,
            } => cmd_catalog_import(&svc, &file, dry_run, json),
            CatalogCommands::Recipes { search, tag, json } => {
                cmd_catalog_recipes(&svc, search.as_deref(), tag.as_deref(), json)
            }
            CatalogCommands::Products { search, json } => {
                cmd_catalog_products(&svc, search.as_deref(), json)
            }
        },
        Commands::Shopping { start, days, json } => {
            cmd_shopping(&svc, parse_date(start)?, days, json)
        }
        Commands::Settings { command } => match command {
            SettingsCommands::Split { command } => match command {
                SplitCommands::Show { json } => cmd_split_show(&svc, json),
                SplitCommands::Set { split, json } => cmd_split_set(&svc, &split, json),
            },
        },
        Commands::Serve {
            port,
            bind,
            no_auth,
        } => {
            let api_key = if no_auth {
                None
            } else {
                let (key, _created) = config.load_or_create_api_key()?;
                Some(key)
            };
            server::start_server(svc, port, &bind, api_key).await
        }
    }
}
