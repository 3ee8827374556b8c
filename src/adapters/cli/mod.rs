//! CLI Adapter
//!
//! Command-line interface for the bot. Uses clap derive macros for
//! argument parsing; handlers live in the application layer.

mod commands;

pub use commands::{
    CliApp, CliSide, Command, ConfigAction, DangerousAction, GexCmd, KillCmd, RunCmd, SqueezeCmd,
    StatusCmd, TradeCmd,
};
