//! CLI command definitions
//!
//! Argument parsing for the bot. Handlers live in the application layer;
//! this module only defines the surface.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// GEX signal and execution bot for US equities and zero-DTE options
#[derive(Parser, Debug)]
#[command(
    name = "gexbot",
    version = env!("CARGO_PKG_VERSION"),
    about = "Gamma exposure signals with guarded execution",
    long_about = "Computes dealer gamma exposure from live option chains, scores squeeze \
                  setups, and routes orders through a layered safety funnel (policy, \
                  circuit breaker, cooldowns) to a brokerage or an offline simulator."
)]
pub struct CliApp {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the trading loops
    Run(RunCmd),

    /// One-shot gamma exposure analysis for a ticker
    Gex(GexCmd),

    /// Scan for squeeze setups
    Squeeze(SqueezeCmd),

    /// Show account, positions, and safety state
    Status(StatusCmd),

    /// Inspect or edit the trading policy
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Toggle dangerous mode (looser limits, snapshot restored on exit)
    Dangerous {
        #[command(subcommand)]
        action: DangerousAction,
    },

    /// Submit a manual trade through the safety funnel
    Trade(TradeCmd),

    /// Emergency kill switch: halt trading and flatten everything
    Kill(KillCmd),

    /// Clear a tripped circuit breaker
    ResetBreaker,
}

/// Start the trading loops
#[derive(Parser, Debug)]
pub struct RunCmd {
    /// Simulate fills locally instead of routing to the brokerage
    #[arg(long)]
    pub offline: bool,

    /// Also run the zero-DTE options loop alongside the equity loop
    #[arg(long)]
    pub zero_dte: bool,
}

/// One-shot GEX analysis
#[derive(Parser, Debug)]
pub struct GexCmd {
    /// Underlying ticker
    #[arg(value_name = "TICKER", default_value = "SPY")]
    pub ticker: String,

    /// Number of near expirations to analyze
    #[arg(long, value_name = "N", default_value = "1")]
    pub expiries: usize,
}

/// Squeeze scan
#[derive(Parser, Debug)]
pub struct SqueezeCmd {
    /// Single ticker to score; scans the configured universe when omitted
    #[arg(value_name = "TICKER")]
    pub ticker: Option<String>,
}

/// Status report
#[derive(Parser, Debug)]
pub struct StatusCmd {
    /// Include the recent trade journal
    #[arg(short, long)]
    pub detailed: bool,
}

/// Policy subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show one policy key
    Get { key: String },

    /// Update one policy key
    Set { key: String, value: String },

    /// List every policy key with its current value
    List,
}

/// Dangerous mode subcommands
#[derive(Subcommand, Debug)]
pub enum DangerousAction {
    /// Loosen limits; the prior policy is snapshotted for restore
    On,

    /// Restore the snapshotted policy
    Off,
}

/// Manual trade
#[derive(Parser, Debug)]
pub struct TradeCmd {
    /// Ticker symbol to trade
    #[arg(value_name = "SYMBOL")]
    pub symbol: String,

    /// Trade direction
    #[arg(value_enum, value_name = "SIDE")]
    pub side: CliSide,

    /// Dollar amount; defaults to the policy position size
    #[arg(long, value_name = "DOLLARS")]
    pub notional: Option<f64>,

    /// Override a tripped circuit breaker for this one order
    #[arg(long)]
    pub force: bool,
}

/// Trade direction argument
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CliSide {
    Buy,
    Sell,
}

/// Kill switch
#[derive(Parser, Debug)]
pub struct KillCmd {
    /// Skip the typed confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_defaults() {
        let app = CliApp::try_parse_from(["gexbot", "run"]).unwrap();
        match app.command {
            Command::Run(cmd) => {
                assert!(!cmd.offline);
                assert!(!cmd.zero_dte);
            }
            _ => panic!("Expected Run command"),
        }
        assert!(app.config.is_none());
    }

    #[test]
    fn test_parse_run_with_flags() {
        let app =
            CliApp::try_parse_from(["gexbot", "run", "--offline", "--zero-dte"]).unwrap();
        match app.command {
            Command::Run(cmd) => {
                assert!(cmd.offline);
                assert!(cmd.zero_dte);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_parse_gex_defaults_to_spy() {
        let app = CliApp::try_parse_from(["gexbot", "gex"]).unwrap();
        match app.command {
            Command::Gex(cmd) => {
                assert_eq!(cmd.ticker, "SPY");
                assert_eq!(cmd.expiries, 1);
            }
            _ => panic!("Expected Gex command"),
        }
    }

    #[test]
    fn test_parse_gex_with_ticker_and_expiries() {
        let app = CliApp::try_parse_from(["gexbot", "gex", "QQQ", "--expiries", "3"]).unwrap();
        match app.command {
            Command::Gex(cmd) => {
                assert_eq!(cmd.ticker, "QQQ");
                assert_eq!(cmd.expiries, 3);
            }
            _ => panic!("Expected Gex command"),
        }
    }

    #[test]
    fn test_parse_config_set() {
        let app =
            CliApp::try_parse_from(["gexbot", "config", "set", "min_confidence", "0.7"]).unwrap();
        match app.command {
            Command::Config {
                action: ConfigAction::Set { key, value },
            } => {
                assert_eq!(key, "min_confidence");
                assert_eq!(value, "0.7");
            }
            _ => panic!("Expected Config set"),
        }
    }

    #[test]
    fn test_parse_dangerous_on() {
        let app = CliApp::try_parse_from(["gexbot", "dangerous", "on"]).unwrap();
        assert!(matches!(
            app.command,
            Command::Dangerous {
                action: DangerousAction::On
            }
        ));
    }

    #[test]
    fn test_parse_trade_with_force() {
        let app = CliApp::try_parse_from([
            "gexbot", "trade", "AAPL", "buy", "--notional", "750", "--force",
        ])
        .unwrap();
        match app.command {
            Command::Trade(cmd) => {
                assert_eq!(cmd.symbol, "AAPL");
                assert_eq!(cmd.side, CliSide::Buy);
                assert_eq!(cmd.notional, Some(750.0));
                assert!(cmd.force);
            }
            _ => panic!("Expected Trade command"),
        }
    }

    #[test]
    fn test_parse_kill_requires_confirmation_by_default() {
        let app = CliApp::try_parse_from(["gexbot", "kill"]).unwrap();
        match app.command {
            Command::Kill(cmd) => assert!(!cmd.yes),
            _ => panic!("Expected Kill command"),
        }
    }

    #[test]
    fn test_parse_reset_breaker() {
        let app = CliApp::try_parse_from(["gexbot", "reset-breaker"]).unwrap();
        assert!(matches!(app.command, Command::ResetBreaker));
    }

    #[test]
    fn test_global_flags() {
        let app =
            CliApp::try_parse_from(["gexbot", "-v", "--debug", "-c", "local.toml", "status"])
                .unwrap();
        assert!(app.verbose);
        assert!(app.debug);
        assert_eq!(app.config, Some(PathBuf::from("local.toml")));
    }

    #[test]
    fn test_squeeze_scan_whole_universe_by_default() {
        let app = CliApp::try_parse_from(["gexbot", "squeeze"]).unwrap();
        match app.command {
            Command::Squeeze(cmd) => assert!(cmd.ticker.is_none()),
            _ => panic!("Expected Squeeze command"),
        }
    }
}
