//! gexbot - GEX-Driven Autonomous Trading Agent
//!
//! Dealer gamma exposure analysis feeding an LLM decision oracle, with a
//! layered safety funnel between every verdict and the brokerage.

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use gexbot::adapters::cli::{
    CliApp, CliSide, Command, ConfigAction, DangerousAction, GexCmd, KillCmd, RunCmd, SqueezeCmd,
    StatusCmd, TradeCmd,
};
use gexbot::adapters::{
    AlpacaBroker, AlpacaClient, AlpacaMarketData, AlpacaNews, FileStateStore, OpenAiOracle,
    PaperBroker, PolygonClient, PolygonOptionsData, TechnicalsEngine,
};
use gexbot::application::{actions, gates, CoreServices, EquityLoop, ZeroDteLoop};
use gexbot::config::{load_or_default, Config};
use gexbot::gex::{GexAnalysis, Wall};
use gexbot::ports::{BrokerPort, MarketDataPort, OrderSide};
use gexbot::squeeze::SqueezeUpdate;

/// Starting cash for the offline fill simulator.
const PAPER_STARTING_CASH: f64 = 100_000.0;

/// How long to wait for the loops to notice a stop before aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if it exists (credentials go there, not in config.toml)
    dotenvy::dotenv().ok();

    let app = CliApp::parse();
    init_logging(app.verbose, app.debug)?;

    let config = load_or_default(app.config.as_deref()).context("Failed to load configuration")?;

    match app.command {
        Command::Run(cmd) => run_command(&config, cmd).await,
        Command::Gex(cmd) => gex_command(&config, cmd).await,
        Command::Squeeze(cmd) => squeeze_command(&config, cmd).await,
        Command::Status(cmd) => status_command(&config, cmd).await,
        Command::Config { action } => config_command(&config, action).await,
        Command::Dangerous { action } => dangerous_command(&config, action).await,
        Command::Trade(cmd) => trade_command(&config, cmd).await,
        Command::Kill(cmd) => kill_command(&config, cmd).await,
        Command::ResetBreaker => reset_breaker_command(&config).await,
    }
}

fn init_logging(verbose: bool, debug: bool) -> Result<()> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::new("warn")
    };

    fmt().with_env_filter(filter).init();
    Ok(())
}

/// Wire every port to its real backend and restore saved state. Offline
/// mode swaps the brokerage for the local fill simulator; market data,
/// options data, and the oracle stay live.
async fn build_services(config: &Config, offline: bool) -> Result<Arc<CoreServices>> {
    let alpaca =
        AlpacaClient::new(config.alpaca_config()?).context("Failed to create Alpaca client")?;
    let market_data: Arc<dyn MarketDataPort> = Arc::new(AlpacaMarketData::new(alpaca.clone()));

    let broker: Arc<dyn BrokerPort> = if offline {
        Arc::new(PaperBroker::new(
            Arc::clone(&market_data),
            PAPER_STARTING_CASH,
        ))
    } else {
        Arc::new(AlpacaBroker::new(alpaca.clone()))
    };

    let technicals = TechnicalsEngine::new(Arc::clone(&market_data));
    let sentiment = AlpacaNews::new(alpaca);

    let polygon =
        PolygonClient::new(config.polygon_config()?).context("Failed to create Polygon client")?;
    let options_data = PolygonOptionsData::new(polygon);

    let oracle =
        OpenAiOracle::new(config.openai_config()?).context("Failed to create OpenAI client")?;

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
    let state = FileStateStore::in_dir(&data_dir);

    let safety = CoreServices::restore_safety(&state).await?;

    Ok(Arc::new(CoreServices::new(
        broker,
        market_data,
        Arc::new(technicals),
        Arc::new(sentiment),
        Arc::new(oracle),
        Arc::new(options_data),
        Arc::new(state),
        safety,
    )))
}

async fn run_command(config: &Config, cmd: RunCmd) -> Result<()> {
    tracing::info!("starting gexbot");
    let services = build_services(config, cmd.offline).await?;

    if cmd.offline {
        tracing::warn!("OFFLINE MODE - fills are simulated locally");
    } else if config.general.paper_mode {
        tracing::info!("paper trading via the Alpaca paper host");
    } else {
        tracing::warn!("LIVE TRADING MODE - real orders will be routed");
    }

    let universe = {
        let policy = services.policy().await;
        gates::build_universe(&policy, &config.general.universe)
    };

    let equity = Arc::new(EquityLoop::new(Arc::clone(&services), universe));
    let zero_dte = cmd.zero_dte.then(|| {
        Arc::new(ZeroDteLoop::new(
            Arc::clone(&services),
            config.general.zero_dte_universe.clone(),
        ))
    });

    let mut handles = Vec::new();
    {
        let equity = Arc::clone(&equity);
        handles.push(tokio::spawn(async move { equity.run().await }));
    }
    if let Some(zero_dte) = &zero_dte {
        let zero_dte = Arc::clone(zero_dte);
        handles.push(tokio::spawn(async move { zero_dte.run().await }));
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");

    equity.stop().await;
    if let Some(zero_dte) = &zero_dte {
        zero_dte.stop().await;
    }

    // The loops only check the stop flag between ticks, so give them a
    // moment and then cut stragglers loose.
    for mut handle in handles {
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
            handle.abort();
        }
    }

    tracing::info!("gexbot stopped");
    Ok(())
}

async fn gex_command(config: &Config, cmd: GexCmd) -> Result<()> {
    let services = build_services(config, false).await?;
    let analysis = actions::gex_snapshot(&services, &cmd.ticker, cmd.expiries).await?;
    print_gex(&analysis);
    Ok(())
}

async fn squeeze_command(config: &Config, cmd: SqueezeCmd) -> Result<()> {
    let services = build_services(config, false).await?;
    let tickers = match cmd.ticker {
        Some(t) => vec![t.to_uppercase()],
        None => config.general.universe.clone(),
    };

    let updates = actions::squeeze_scan(&services, &tickers).await;
    if updates.is_empty() {
        println!("No squeeze data available.");
        return Ok(());
    }
    for (ticker, update) in &updates {
        print_squeeze(ticker, update);
    }
    Ok(())
}

async fn status_command(config: &Config, cmd: StatusCmd) -> Result<()> {
    let services = build_services(config, false).await?;
    let report = actions::status_report(&services, cmd.detailed).await?;
    println!("{report}");
    Ok(())
}

async fn config_command(config: &Config, action: ConfigAction) -> Result<()> {
    let services = build_services(config, false).await?;
    match action {
        ConfigAction::Get { key } => {
            let value = actions::config_get(&services, &key).await?;
            println!("{key} = {value}");
        }
        ConfigAction::Set { key, value } => {
            let change = actions::config_set(&services, &key, &value).await?;
            if change.auto_converted {
                println!("Interpreted '{value}' as a percent.");
            }
            println!("{}: {} -> {}", change.key, change.previous, change.current);
        }
        ConfigAction::List => {
            for (key, value) in actions::config_list(&services).await {
                println!("{key:<26} {value}");
            }
        }
    }
    Ok(())
}

async fn dangerous_command(config: &Config, action: DangerousAction) -> Result<()> {
    let services = build_services(config, false).await?;
    match action {
        DangerousAction::On => {
            if actions::set_dangerous(&services, true).await? {
                println!(
                    "Dangerous mode ON. Previous policy snapshotted; `dangerous off` restores it."
                );
            } else {
                println!("Dangerous mode is already on.");
            }
        }
        DangerousAction::Off => {
            if actions::set_dangerous(&services, false).await? {
                println!("Dangerous mode off, previous policy restored.");
            } else {
                println!("Dangerous mode is already off.");
            }
        }
    }
    Ok(())
}

async fn trade_command(config: &Config, cmd: TradeCmd) -> Result<()> {
    let services = build_services(config, false).await?;
    let side = match cmd.side {
        CliSide::Buy => OrderSide::Buy,
        CliSide::Sell => OrderSide::Sell,
    };

    let outcome =
        actions::manual_trade(&services, &cmd.symbol, side, cmd.notional, cmd.force).await?;
    println!("{outcome}");
    Ok(())
}

async fn kill_command(config: &Config, cmd: KillCmd) -> Result<()> {
    if !cmd.yes && !confirm_kill()? {
        println!("Aborted.");
        return Ok(());
    }

    let services = build_services(config, false).await?;
    let report = actions::emergency_kill(&services).await?;
    println!("{report}");
    Ok(())
}

fn confirm_kill() -> Result<bool> {
    println!("This halts autonomous trading, cancels all open orders, and flattens every position.");
    print!("Type KILL to confirm: ");
    std::io::stdout().flush()?;

    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim() == "KILL")
}

async fn reset_breaker_command(config: &Config) -> Result<()> {
    let services = build_services(config, false).await?;
    if actions::reset_breaker(&services).await? {
        println!("Circuit breaker reset, autonomous trading re-armed.");
    } else {
        println!("Circuit breaker was not tripped; loss streak cleared.");
    }
    Ok(())
}

fn print_gex(analysis: &GexAnalysis) {
    println!(
        "{} @ ${:.2}  (expiries: {})",
        analysis.ticker,
        analysis.spot,
        analysis.expiries_analyzed.join(", ")
    );
    println!(
        "  net GEX     {}  regime {} ({:.0}% confident)",
        format_gex_dollars(analysis.total_net_gex),
        analysis.regime.label,
        analysis.regime.confidence * 100.0
    );
    match (analysis.gamma_flip, analysis.flip_distance_pct()) {
        (Some(flip), Some(dist)) => println!("  gamma flip  {flip:.2} ({dist:+.2}% from spot)"),
        _ => println!("  gamma flip  none in range"),
    }
    print_walls("call walls", &analysis.walls.calls);
    print_walls("put walls", &analysis.walls.puts);
}

fn print_walls(label: &str, walls: &[Wall]) {
    if walls.is_empty() {
        println!("  {label:<11} none");
        return;
    }
    for (i, wall) in walls.iter().take(3).enumerate() {
        let lead = if i == 0 { label } else { "" };
        let stacked = if wall.stacked {
            format!("  stacked x{}", wall.expiry_count)
        } else {
            String::new()
        };
        println!(
            "  {:<11} {:.0} ({}, {:+.2}%{})",
            lead,
            wall.strike,
            format_gex_dollars(wall.dollar_gex),
            wall.distance_pct,
            stacked
        );
    }
}

fn print_squeeze(ticker: &str, update: &SqueezeUpdate) {
    let transition = if update.transitioned() {
        format!("  (was {})", update.previous_state)
    } else {
        String::new()
    };
    println!(
        "{:<6} {}  score {:.2}{}",
        ticker, update.state, update.breakdown.total, transition
    );
    println!(
        "       regime {:.2}  proximity {:.2}  velocity {:.2}  volume {:.2}{}",
        update.breakdown.regime,
        update.breakdown.proximity,
        update.breakdown.velocity,
        update.breakdown.volume,
        if update.wall_shift { "  wall shift" } else { "" }
    );
}

fn format_gex_dollars(value: f64) -> String {
    let abs = value.abs();
    if abs >= 1e9 {
        format!("${:+.2}B", value / 1e9)
    } else if abs >= 1e6 {
        format!("${:+.1}M", value / 1e6)
    } else {
        format!("${:+.0}k", value / 1e3)
    }
}
