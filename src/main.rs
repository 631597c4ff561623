use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rustls::crypto::ring::default_provider;
use rustls::crypto::CryptoProvider;
use tracing::{info, warn};

use panel_sync::config::{settings_path, Config};
use panel_sync::models::{BotAction, BotKind, ClearScope, Command, CommandOutcome, Resource};
use panel_sync::render::log_callbacks;
use panel_sync::settings::{JsonSettingsStore, SettingsStore};
use panel_sync::util::format_thousands;
use panel_sync::{
    ActionEndpoint, ApiClient, Backend, Callbacks, ControllerOptions, EventBridge,
    RefreshController, RefreshOutcome, SimulatedBackend, Snapshot, SocketIoTransport,
};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "panel-sync", version, about = "Bot control panel client")]
struct Cli {
    /// Panel server URL (overrides PANEL_SERVER_URL and stored settings)
    #[arg(long, global = true)]
    server: Option<String>,

    /// Bearer credential for the panel API
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Use the offline demo backend
    #[arg(long, global = true)]
    demo: bool,

    /// Bot control route: per-bot or combined
    #[arg(long, global = true)]
    action_endpoint: Option<String>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Poll the panel and log every change until interrupted
    Watch(WatchArgs),
    /// Fetch server, bot and stats status once
    Status,
    /// Start, stop or restart a bot
    Bot {
        #[arg(value_enum)]
        bot: BotTarget,
        #[arg(value_enum)]
        action: ActionArg,
    },
    /// Points management
    Points {
        #[command(subcommand)]
        command: PointsCommand,
    },
    /// Look a user up in the leaderboard
    Search { username: String },
    /// Show the points ranking
    Ranking {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show or persist settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },
}

#[derive(Args)]
struct WatchArgs {
    #[arg(long)]
    interval_ms: Option<u64>,

    #[arg(long)]
    no_auto_refresh: bool,

    /// Also listen on the panel's push channel
    #[arg(long)]
    push: bool,

    /// Extra resources to poll (ranking, leaderboard)
    #[arg(long = "resource")]
    resources: Vec<String>,

    #[arg(long)]
    ranking_limit: Option<usize>,

    /// Stop after this many seconds
    #[arg(long)]
    duration_secs: Option<u64>,
}

#[derive(Subcommand)]
enum PointsCommand {
    Add { username: String, points: u64 },
    Remove { username: String, points: u64 },
    /// Remove all points of one user
    Clear { username: String },
    /// Remove points of every user
    ClearAll {
        #[arg(long)]
        non_followers: bool,
    },
}

#[derive(Subcommand)]
enum SettingsCommand {
    Show,
    /// Persist the effective server URL, credential and refresh policy
    Save {
        #[arg(long)]
        interval_secs: Option<u64>,
        #[arg(long)]
        no_auto_refresh: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum BotTarget {
    Twitch,
    Discord,
    All,
}

#[derive(Clone, Copy, ValueEnum)]
enum ActionArg {
    Start,
    Stop,
    Restart,
}

impl From<ActionArg> for BotAction {
    fn from(action: ActionArg) -> Self {
        match action {
            ActionArg::Start => BotAction::Start,
            ActionArg::Stop => BotAction::Stop,
            ActionArg::Restart => BotAction::Restart,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "panel_sync=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    CryptoProvider::install_default(default_provider())
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let cli = Cli::parse();
    let store = JsonSettingsStore::new(settings_path());
    let settings = store.load()?;
    let mut config = Config::from_env(&settings)?;
    apply_cli_overrides(&mut config, &cli)?;

    if let CliCommand::Settings { command } = &cli.command {
        return run_settings(&store, settings, &mut config, command);
    }

    if config.demo_mode {
        info!("demo mode; no requests leave this process");
        run(SimulatedBackend::new(), &config, cli.command).await
    } else {
        let client = ApiClient::new(
            &config.server_url,
            config.api_key.clone(),
            config.request_timeout,
            config.action_endpoint,
        )?;
        if config.api_key.is_none() {
            warn!("PANEL_API_KEY not set; every request will fail with a missing credential");
        }
        run(client, &config, cli.command).await
    }
}

fn apply_cli_overrides(config: &mut Config, cli: &Cli) -> Result<()> {
    if let Some(server) = &cli.server {
        config.server_url = panel_sync::util::normalize_server_url(server);
    }
    if let Some(key) = &cli.api_key {
        config.api_key = Some(key.clone()).filter(|key| !key.trim().is_empty());
    }
    if cli.demo {
        config.demo_mode = true;
    }
    if let Some(endpoint) = &cli.action_endpoint {
        config.action_endpoint = ActionEndpoint::parse(endpoint)
            .ok_or_else(|| anyhow!("unknown action endpoint {:?}", endpoint))?;
    }
    if let CliCommand::Watch(args) = &cli.command {
        if let Some(interval_ms) = args.interval_ms {
            config.refresh_interval_ms = interval_ms;
        }
        if args.no_auto_refresh {
            config.auto_refresh = false;
        }
        if args.push {
            config.push = true;
        }
        if let Some(limit) = args.ranking_limit {
            config.ranking_limit = limit;
        }
    }
    Ok(())
}

fn run_settings(
    store: &JsonSettingsStore,
    mut settings: panel_sync::settings::PanelSettings,
    config: &mut Config,
    command: &SettingsCommand,
) -> Result<()> {
    match command {
        SettingsCommand::Show => {
            println!("settings file: {}", store.path().display());
            println!("server_url: {}", config.server_url);
            println!(
                "api_key: {}",
                if config.api_key.is_some() { "set" } else { "not set" }
            );
            println!("refresh_interval_ms: {}", config.refresh_interval_ms);
            println!("auto_refresh: {}", config.auto_refresh);
            println!("push: {}", config.push);
            println!("demo_mode: {}", config.demo_mode);
        }
        SettingsCommand::Save {
            interval_secs,
            no_auto_refresh,
        } => {
            if let Some(secs) = interval_secs {
                config.refresh_interval_ms = secs.saturating_mul(1_000);
            }
            if *no_auto_refresh {
                config.auto_refresh = false;
            }
            config.store_into(&mut settings);
            store.save(&settings)?;
            println!("saved {}", store.path().display());
        }
    }
    Ok(())
}

async fn run<B: Backend>(backend: B, config: &Config, command: CliCommand) -> Result<()> {
    match command {
        CliCommand::Watch(args) => watch(backend, config, args).await,
        CliCommand::Status => {
            let controller = one_shot(backend, config);
            for resource in [Resource::Status, Resource::BotStatus, Resource::Stats] {
                let outcome = controller.refresh(resource).await;
                if let RefreshOutcome::Failed(err) = outcome {
                    return Err(err).with_context(|| format!("failed to fetch {}", resource));
                }
                if let Some(snapshot) = controller.snapshot(resource) {
                    print_snapshot(&snapshot);
                }
            }
            Ok(())
        }
        CliCommand::Bot { bot, action } => {
            let controller = one_shot(backend, config);
            let action = BotAction::from(action);
            let outcomes = match bot {
                BotTarget::All => controller.bot_action_all(action).await?,
                BotTarget::Twitch => vec![
                    controller
                        .execute(Command::Bot {
                            bot: BotKind::Twitch,
                            action,
                        })
                        .await?,
                ],
                BotTarget::Discord => vec![
                    controller
                        .execute(Command::Bot {
                            bot: BotKind::Discord,
                            action,
                        })
                        .await?,
                ],
            };
            for outcome in outcomes {
                print_outcome(&outcome);
            }
            Ok(())
        }
        CliCommand::Points { command } => {
            let command = match command {
                PointsCommand::Add { username, points } => Command::AddPoints { username, points },
                PointsCommand::Remove { username, points } => {
                    Command::RemovePoints { username, points }
                }
                PointsCommand::Clear { username } => Command::ClearUserPoints { username },
                PointsCommand::ClearAll { non_followers } => Command::ClearAllPoints {
                    scope: if non_followers {
                        ClearScope::NonFollowers
                    } else {
                        ClearScope::All
                    },
                },
            };
            let outcome = one_shot(backend, config).execute(command).await?;
            print_outcome(&outcome);
            Ok(())
        }
        CliCommand::Search { username } => {
            match one_shot(backend, config).search_user(&username).await? {
                Some(entry) => println!(
                    "#{} {} {} pts, {} messages{}",
                    entry.rank,
                    entry.username,
                    format_thousands(entry.points),
                    entry.messages,
                    if entry.is_follower { ", follower" } else { "" }
                ),
                None => println!("user {} not found", username.trim()),
            }
            Ok(())
        }
        CliCommand::Ranking { limit } => {
            let controller = one_shot(backend, config);
            if let Some(limit) = limit {
                controller.set_ranking_limit(limit);
            }
            if let RefreshOutcome::Failed(err) = controller.refresh(Resource::Ranking).await {
                return Err(err).context("failed to fetch ranking");
            }
            if let Some(snapshot) = controller.snapshot(Resource::Ranking) {
                print_snapshot(&snapshot);
            }
            Ok(())
        }
        CliCommand::Settings { .. } => Ok(()),
    }
}

fn one_shot<B: Backend>(backend: B, config: &Config) -> RefreshController<B> {
    let options = ControllerOptions {
        policy: config.policy(),
        resources: Vec::new(),
        fetch_timeout: config.request_timeout,
        ranking_limit: config.ranking_limit,
        refresh_on_start: false,
    };
    RefreshController::new(backend, options, Callbacks::new())
}

async fn watch<B: Backend>(backend: B, config: &Config, args: WatchArgs) -> Result<()> {
    let mut options = ControllerOptions {
        policy: config.policy(),
        fetch_timeout: config.request_timeout,
        ranking_limit: config.ranking_limit,
        ..ControllerOptions::default()
    };
    for name in &args.resources {
        let resource =
            Resource::parse(name).ok_or_else(|| anyhow!("unknown resource {:?}", name))?;
        if !options.resources.contains(&resource) {
            options.resources.push(resource);
        }
    }

    let controller = RefreshController::new(backend, options, log_callbacks());
    controller.start()?;

    let bridge = if config.push && !config.demo_mode {
        let transport = SocketIoTransport::new(
            config.push_url(),
            config.api_key.clone(),
            config.request_timeout,
        );
        info!(url = %transport.url(), "push channel enabled");
        let bridge = EventBridge::attach(controller.clone(), Arc::new(transport));
        Some(tokio::spawn(async move { bridge.run().await }))
    } else {
        None
    };

    match args.duration_secs {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                _ = shutdown_signal() => {}
            }
        }
        None => shutdown_signal().await,
    }

    controller.stop();
    if let Some(handle) = bridge {
        if let Err(err) = handle.await {
            warn!(?err, "event bridge task failed");
        }
    }
    Ok(())
}

fn print_outcome(outcome: &CommandOutcome) {
    println!("{}", outcome.message);
    if let Some(total) = outcome.total_points {
        println!("total points: {}", format_thousands(total));
    }
    if let Some(affected) = outcome.affected {
        println!("affected users: {}", affected);
    }
}

fn print_snapshot(snapshot: &Snapshot) {
    match snapshot {
        Snapshot::Status(status) => {
            println!("twitch: {}", if status.twitch { "online" } else { "offline" });
            println!("discord: {}", if status.discord { "online" } else { "offline" });
        }
        Snapshot::BotStatus(bots) => {
            for bot in BotKind::ALL {
                let process = bots.get(bot);
                println!(
                    "{} bot: {} (pid {})",
                    bot,
                    process.status.label(),
                    process
                        .pid
                        .map(|pid| pid.to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
        }
        Snapshot::Stats(stats) => {
            let count = |value: Option<u64>| {
                value
                    .map(format_thousands)
                    .unwrap_or_else(|| "-".to_string())
            };
            println!("followers: {}", count(stats.twitch.followers));
            println!("subscribers: {}", count(stats.twitch.subscribers));
            println!("total users: {}", count(stats.database.total_users));
            println!(
                "total points: {}",
                stats
                    .database
                    .total_points
                    .map(format_thousands)
                    .unwrap_or_else(|| "-".to_string())
            );
            if let Some(messages) = stats.database.total_messages {
                println!("total messages: {}", format_thousands(messages));
            }
            if let Some(avg) = stats.database.avg_points {
                println!("average points: {:.1}", avg);
            }
            println!(
                "top user: {}",
                stats.database.top_user.as_deref().unwrap_or("-")
            );
        }
        Snapshot::Ranking(ranking) => {
            for entry in &ranking.ranking {
                println!(
                    "{}. {} {}",
                    entry.position,
                    entry.username,
                    format_thousands(entry.points)
                );
            }
        }
        Snapshot::Leaderboard(rows) => {
            for row in rows {
                println!("{}. {} {}", row.rank, row.username, format_thousands(row.points));
            }
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let ctrl_c = tokio::signal::ctrl_c();
        let terminate = match signal(SignalKind::terminate()) {
            Ok(signal) => Some(signal),
            Err(err) => {
                warn!(?err, "failed to install SIGTERM handler");
                None
            }
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = async {
                if let Some(mut signal) = terminate {
                    signal.recv().await;
                } else {
                    std::future::pending::<()>().await;
                }
            } => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutting down");
}
