use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::commands::{current_thread_runtime, load_validated_config, CommandResult};
use payflow_core::stages::SweepPolicy;
use payflow_db::repositories::SqlPaymentRequestRepository;
use payflow_db::{connect, migrations};
use payflow_server::StageScheduler;

/// One manual scheduler pass, for operators and cron-style deployments
/// that run the sweeps out of process.
pub fn run() -> CommandResult {
    let config = match load_validated_config("tick") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match current_thread_runtime("tick") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = connect(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let policy = SweepPolicy {
            stage_expiry: Duration::hours(config.scheduler.draft_expiry_hours),
            trash_retention: Duration::days(config.scheduler.trash_retention_days),
        };
        let scheduler =
            StageScheduler::new(Arc::new(SqlPaymentRequestRepository::new(pool.clone())), policy);
        let summary = scheduler.run_tick(Utc::now()).await;

        pool.close().await;
        Ok::<_, (&'static str, String, u8)>(summary)
    });

    match result {
        Ok(summary) if summary.sweep_failures == 0 => CommandResult::success(
            "tick",
            format!(
                "sweeps completed: {} expired to trash, {} credit lapsed, {} purged",
                summary.expired_to_trash, summary.credit_lapsed, summary.purged
            ),
        ),
        Ok(summary) => CommandResult::failure(
            "tick",
            "sweep_failure",
            format!(
                "{} sweep(s) failed; {} expired to trash, {} credit lapsed, {} purged",
                summary.sweep_failures,
                summary.expired_to_trash,
                summary.credit_lapsed,
                summary.purged
            ),
            6,
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("tick", error_class, message, exit_code)
        }
    }
}
