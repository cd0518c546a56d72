mod ct_cache;
mod ct_client;
mod ct_config;
mod ct_controllers;
mod ct_events;
mod ct_favorites;
mod ct_models;
mod ct_queries;
mod ct_state;
mod ct_storage;
mod ct_terminal;
mod ct_views;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use ct_client::SpiritClient;
use ct_config::Settings;
use ct_controllers::{AppContext, TransitController};
use ct_events::EventBus;
use ct_favorites::{FavoritesStore, RouteGroup};
use ct_queries::{CampusRoutes, TransitQueries};
use ct_state::StateStore;
use ct_storage::FileStorage;
use ct_terminal::CTTerminal;
use ct_views::CTViews;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "campus-transit", version, about = "Campus bus routes, stops and live departures")]
struct Cli {
    /// Base URL of the transit service
    #[arg(long)]
    api_url: Option<String>,

    /// Where favorites and preferences are stored
    #[arg(long)]
    storage: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List routes
    Routes {
        /// Only favorited routes
        #[arg(long)]
        favorites: bool,
    },
    /// Show a route with departures for its current direction
    Route { short_name: String },
    /// List active service alerts
    Alerts,
    /// List, add or remove favorite routes
    Favorites {
        #[command(subcommand)]
        action: Option<FavoriteAction>,
    },
    /// Choose which group the route list opens with
    DefaultGroup { group: GroupArg },
    /// Menu-driven session (default)
    Interactive,
}

#[derive(Subcommand, Debug)]
enum FavoriteAction {
    Add { short_name: String },
    Remove { short_name: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum GroupArg {
    All,
    Favorites,
}

impl From<GroupArg> for RouteGroup {
    fn from(arg: GroupArg) -> Self {
        match arg {
            GroupArg::All => RouteGroup::All,
            GroupArg::Favorites => RouteGroup::Favorites,
        }
    }
}

fn main() -> anyhow::Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("\n{}", "═".repeat(70));
        eprintln!("❌ APPLICATION PANIC");
        eprintln!("{}", "═".repeat(70));
        eprintln!("\n{}", panic_info);
        eprintln!("\n💡 Please restart the application and report this issue if it persists.");
        eprintln!("{}", "═".repeat(70));
    }));

    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let settings = Settings::from_env().with_overrides(cli.api_url.clone(), cli.storage.clone());
    log::debug!("Settings: {:?}", settings);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;

    let api = SpiritClient::new(&settings.api_base_url, settings.request_timeout_secs)?;
    let storage = FileStorage::new(settings.storage_path.clone());
    log::debug!("Storage file: {}", storage.path().display());
    let favorites_store = FavoritesStore::new(Arc::new(storage));
    let (events, receiver) = EventBus::new();
    let queries = TransitQueries::new(
        Arc::new(api),
        Arc::new(favorites_store),
        events.clone(),
        CampusRoutes {
            on_campus: settings.on_campus_routes.clone(),
            off_campus: settings.off_campus_routes.clone(),
        },
    );
    let controller = TransitController::new(AppContext {
        queries: Arc::new(queries),
        store: StateStore::new(),
        events,
    });

    let mut terminal = CTTerminal::new(&runtime, controller, receiver, settings.time_zone);

    match cli.command.unwrap_or(Command::Interactive) {
        Command::Interactive => terminal.run(),
        command => {
            let result = run_command(&runtime, &terminal, command);
            terminal.render_events();
            result?;
        }
    }

    Ok(())
}

fn run_command(
    runtime: &tokio::runtime::Runtime,
    terminal: &CTTerminal,
    command: Command,
) -> anyhow::Result<()> {
    let controller = terminal.controller();

    // Mutations on favorites only need local storage.
    match &command {
        Command::Favorites { action: Some(action) } => {
            match action {
                FavoriteAction::Add { short_name } => {
                    runtime.block_on(controller.context().queries.add_favorite(short_name))?;
                    println!("⭐ Route {} added to favorites", short_name);
                }
                FavoriteAction::Remove { short_name } => {
                    runtime.block_on(controller.context().queries.remove_favorite(short_name))?;
                    println!("✓ Route {} removed from favorites", short_name);
                }
            }
            return Ok(());
        }
        Command::DefaultGroup { group } => {
            let group = RouteGroup::from(*group);
            runtime.block_on(controller.set_default_group(group))?;
            println!("✓ Route list now opens with {}", CTViews::category_label(group));
            return Ok(());
        }
        _ => {}
    }

    runtime
        .block_on(controller.load_initial_data())
        .context("Could not load routes")?;

    match command {
        Command::Routes { favorites } => {
            if favorites {
                controller.set_route_category(RouteGroup::Favorites);
            }
            CTViews::show_routes_list(&controller.context().store.get(), &controller.routes_status());
        }
        Command::Favorites { action: None } => {
            controller.set_route_category(RouteGroup::Favorites);
            let listed = controller.listed_routes();
            if listed.is_empty() {
                println!("You have no favorited routes.");
            }
            for route in &listed {
                println!("{}", CTViews::route_row(route, true));
            }
        }
        Command::Route { short_name } => match controller.find_route(&short_name) {
            Some(route) => {
                controller.select_route(route);
                runtime.block_on(controller.load_direction_estimates())?;
            }
            None => CTViews::invalid_route(&short_name),
        },
        Command::Alerts => controller.show_alerts(),
        _ => {}
    }

    Ok(())
}
