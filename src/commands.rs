use crate::enforcement::{CaseStore, ModCase, SweepReport};
use crate::{Data, Error};
use chrono::{DateTime, Utc};
use poise::{Context, command};
use std::fmt::Write;

/// Basic ping command
/// This command is used to check if the bot is responsive.
#[command(prefix_command, slash_command, guild_only)]
pub async fn ping(ctx: Context<'_, Data, Error>) -> Result<(), Error> {
    ctx.say("Pong!").await?;
    Ok(())
}

/// Lift expired punishments now instead of waiting for the next sweep
#[command(slash_command, guild_only, required_permissions = "MODERATE_MEMBERS")]
pub async fn sweep(ctx: Context<'_, Data, Error>) -> Result<(), Error> {
    ctx.defer_ephemeral().await?;
    let report = ctx.data().scheduler.sweep_now().await?;
    ctx.say(describe_report(&report)).await?;
    Ok(())
}

/// Show a moderation case
#[command(slash_command, guild_only, required_permissions = "MODERATE_MEMBERS")]
pub async fn case(
    ctx: Context<'_, Data, Error>,
    #[description = "Case ID"] id: String,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().map(|id| id.get());
    let found = ctx
        .data()
        .cases
        .get(id.trim())
        .await?
        .filter(|case| Some(case.community_id) == guild_id);

    let reply = match found {
        Some(case) => describe_case(&case, Utc::now()),
        None => format!("No case `{}` in this server.", id.trim()),
    };
    ctx.send(poise::CreateReply::default().content(reply).ephemeral(true))
        .await?;
    Ok(())
}

/// List punishments that could not be lifted automatically
#[command(slash_command, guild_only, required_permissions = "MODERATE_MEMBERS")]
pub async fn liftfailures(ctx: Context<'_, Data, Error>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().map(|id| id.get());
    let failures: Vec<ModCase> = ctx
        .data()
        .cases
        .find_failed_lifts()
        .await?
        .into_iter()
        .filter(|case| Some(case.community_id) == guild_id)
        .collect();

    let reply = if failures.is_empty() {
        "No punishments are waiting for manual removal.".to_string()
    } else {
        let mut reply = format!("{} punishment(s) need manual removal:\n", failures.len());
        for case in &failures {
            let _ = writeln!(
                reply,
                "- `{}` {} on <@{}> ({} attempts)",
                case.id, case.punishment_type, case.subject_user_id, case.lift_attempts
            );
        }
        reply
    };
    ctx.send(poise::CreateReply::default().content(reply).ephemeral(true))
        .await?;
    Ok(())
}

/// Format a sweep report for a reply
#[must_use]
pub fn describe_report(report: &SweepReport) -> String {
    if report.due == 0 {
        return "Nothing was due.".to_string();
    }
    format!(
        "{} due: {} lifted, {} failed (will retry), {} given up, {} skipped.",
        report.due, report.lifted, report.failed, report.abandoned, report.skipped
    )
}

/// Format a case for a reply
#[must_use]
pub fn describe_case(case: &ModCase, now: DateTime<Utc>) -> String {
    let mut text = format!("**Case `{}`**\n", case.id);
    if !case.title.is_empty() {
        let _ = writeln!(text, "{}", case.title);
    }
    let _ = writeln!(
        text,
        "User: <@{}>, punishment: {} ({})",
        case.subject_user_id, case.punishment_type, case.creation_type
    );

    match (case.punished_until, case.punishment_progress(now)) {
        (Some(until), Some(progress)) => {
            let _ = writeln!(
                text,
                "Until: <t:{}:f>, {progress:.0}% served",
                until.timestamp()
            );
        }
        (Some(until), None) => {
            let _ = writeln!(text, "Until: <t:{}:f>", until.timestamp());
        }
        (None, _) if case.punishment_type.is_reversible() => {
            let _ = writeln!(text, "Permanent");
        }
        (None, _) => {}
    }

    let state = if case.lift_failed {
        "lift failed, needs manual removal"
    } else if case.punishment_active {
        "active"
    } else if case.lifted_at.is_some() {
        "lifted"
    } else {
        "inactive"
    };
    let _ = write!(text, "State: {state}");
    if case.execution_failed {
        text.push_str(" (the punishment could not be applied)");
    }
    text
}
