pub mod automod;
pub mod commands;
pub mod config;
pub mod data;
pub mod enforcement;
pub mod handlers;
pub mod logging;

pub const COMMAND_TARGET: &str = "vigilant_daemon::command";
pub const ERROR_TARGET: &str = "vigilant_daemon::error";
pub const EVENT_TARGET: &str = "vigilant_daemon::handlers";
pub const CONSOLE_TARGET: &str = "vigilant_daemon";
pub const AUTOMOD_TARGET: &str = "vigilant_daemon::automod";
pub const SCHEDULER_TARGET: &str = "vigilant_daemon::scheduler";

pub use data::{Data, DataInner};
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
