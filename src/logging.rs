use crate::{
    AUTOMOD_TARGET, COMMAND_TARGET, CONSOLE_TARGET, Data, ERROR_TARGET, Error, SCHEDULER_TARGET,
};
use poise::{Context, FrameworkError};
use std::path::Path;
use std::time::Instant;
use tracing::{Metadata, error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::filter_fn,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Log directory name
pub const LOG_DIR: &str = "logs";
/// Command log file name
pub const COMMAND_LOG_FILE: &str = "commands";
/// Moderation log file name (cases, exemptions, sweeps)
pub const MODERATION_LOG_FILE: &str = "moderation";

fn is_command_event(metadata: &Metadata<'_>) -> bool {
    let target = metadata.target();
    target == COMMAND_TARGET || target == ERROR_TARGET
}

fn is_moderation_event(metadata: &Metadata<'_>) -> bool {
    let target = metadata.target();
    target == AUTOMOD_TARGET || target == SCHEDULER_TARGET
}

/// Initialize the logging system with console and file outputs
///
/// # Errors
/// Returns an error if the log directory cannot be created or the filter
/// directives are invalid.
pub fn init() -> Result<(), Error> {
    if !Path::new(LOG_DIR).exists() {
        std::fs::create_dir_all(LOG_DIR)?;
    }

    let command_file = RollingFileAppender::new(Rotation::DAILY, LOG_DIR, COMMAND_LOG_FILE);
    let moderation_file = RollingFileAppender::new(Rotation::DAILY, LOG_DIR, MODERATION_LOG_FILE);

    // Human-readable console output
    let console_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(true);

    // JSON command log
    let command_layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_writer(command_file)
        .with_filter(filter_fn(is_command_event));

    // JSON moderation log
    let moderation_layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_writer(moderation_file)
        .with_filter(filter_fn(is_moderation_event));

    // Default to INFO, keep serenity's gateway chatter out
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("info").add_directive("serenity=error".parse()?),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(command_layer)
        .with(moderation_layer)
        .init();

    info!("Logging system initialized");
    Ok(())
}

thread_local! {
    static COMMAND_START_TIME: std::cell::RefCell<Option<Instant>> = const { std::cell::RefCell::new(None) };
}

fn guild_label(ctx: Context<'_, Data, Error>) -> String {
    ctx.guild_id()
        .map_or_else(|| "DM".to_string(), |id| id.get().to_string())
}

/// Log the start of a command execution (pre-command hook)
pub fn log_command_start(ctx: Context<'_, Data, Error>) {
    COMMAND_START_TIME.with(|cell| {
        *cell.borrow_mut() = Some(Instant::now());
    });

    let args = if ctx.command().parameters.is_empty() {
        String::new()
    } else {
        format!("{:?}", ctx.invocation_string())
    };

    info!(
        target: COMMAND_TARGET,
        command = %ctx.command().qualified_name,
        guild_id = %guild_label(ctx),
        user_id = %ctx.author().id.get(),
        arguments = %args,
        event = "start",
        "Command execution started"
    );
}

/// Log the end of a command execution (post-command hook)
pub fn log_command_end(ctx: Context<'_, Data, Error>) {
    let duration =
        COMMAND_START_TIME.with(|cell| cell.borrow_mut().take().map(|start| start.elapsed()));
    let duration_ms = u64::try_from(duration.map_or(0, |d| d.as_millis())).unwrap_or_default();

    info!(
        target: COMMAND_TARGET,
        command = %ctx.command().qualified_name,
        guild_id = %guild_label(ctx),
        user_id = %ctx.author().id.get(),
        duration_ms = duration_ms,
        event = "end",
        "Command execution completed"
    );
}

/// Log errors that occur during command execution
pub fn log_command_error(error: &FrameworkError<'_, Data, Error>) {
    match error {
        FrameworkError::Command { error, ctx, .. } => {
            error!(
                target: ERROR_TARGET,
                command = %ctx.command().qualified_name,
                guild_id = %guild_label(*ctx),
                user_id = %ctx.author().id.get(),
                error = %error,
                "Command error"
            );
        }
        FrameworkError::CommandCheckFailed { error, ctx, .. } => {
            let error_msg = error
                .as_ref()
                .map_or_else(|| "Check failed".to_string(), ToString::to_string);

            error!(
                target: ERROR_TARGET,
                command = %ctx.command().qualified_name,
                guild_id = %guild_label(*ctx),
                user_id = %ctx.author().id.get(),
                error = %error_msg,
                "Command check failed"
            );
        }
        FrameworkError::MissingUserPermissions {
            missing_permissions,
            ctx,
            ..
        } => {
            error!(
                target: ERROR_TARGET,
                command = %ctx.command().qualified_name,
                guild_id = %guild_label(*ctx),
                user_id = %ctx.author().id.get(),
                missing = ?missing_permissions,
                "Command denied, missing permissions"
            );
        }
        err => {
            error!(
                target: ERROR_TARGET,
                error = ?err,
                "Other framework error"
            );
        }
    }
}

pub fn log_console(message: &str) {
    info!(
        target: CONSOLE_TARGET,
        message = %message,
        event = "console",
    );
}
