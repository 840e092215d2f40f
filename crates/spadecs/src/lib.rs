//! Spadecs runtime host
//!
//! Glue between the game server and the managed Spadecs scripts: exports the
//! server functions scripts may call, imports the scripts' connect event
//! handlers, and owns the configuration, logging and shutdown of the hosted
//! .NET runtime.

pub mod app;
pub mod cli;
pub mod config;
pub mod connection;
pub mod exports;
pub mod logging;
pub mod signals;

pub use app::{Application, Session};
pub use cli::CliArgs;
pub use config::AppConfig;
