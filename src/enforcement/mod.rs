//! Punishment lifecycle for Vigilant Daemon
//!
//! This module records moderation cases, carries out their punishments and
//! lifts time-limited punishments once they expire.

mod action;
mod case;
mod error;
mod executor;
mod handler;
mod scheduler;
mod store;

pub use action::{MAX_PUNISHMENT_HOURS, MAX_TIMEOUT_DAYS, PunishmentType};
pub use case::{CreationType, ModCase, SYSTEM_MODERATOR_ID};
pub use error::{EnforcementError, EnforcementResult};
pub use executor::{DEFAULT_MAX_LIFT_ATTEMPTS, LiftOutcome, PunishmentExecutor};
#[cfg(test)]
pub use handler::MockModerationAction;
pub use handler::{ModerationAction, SerenityModerationAction};
pub use scheduler::{
    ExpiryScheduler, SchedulerClient, SchedulerHandle, SchedulerRequest, SchedulerState,
    SweepReport,
};
pub use store::{CaseStore, MemoryCaseStore};
