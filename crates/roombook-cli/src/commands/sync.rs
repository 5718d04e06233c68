//! Sync and watch commands.

use tracing::{info, warn};

use super::Context;
use crate::error::CliResult;

/// Replays queued writes and prints the per-item report.
pub async fn sync(ctx: &Context) -> CliResult<()> {
    let report = ctx.session.sync_now().await?;
    ctx.emit(&report_json(&report), || {
        for entity in &report.flushed {
            println!("synced  {}", entity);
        }
        for failure in &report.failed {
            let state = if failure.dropped { "dropped" } else { "failed " };
            println!("{} {}: {}", state, failure.entity, failure.error);
        }
        println!("{} write(s) still queued", report.remaining);
    })
}

fn report_json(report: &roombook_engine::FlushReport) -> serde_json::Value {
    serde_json::json!({
        "flushed": report.flushed,
        "failed": report
            .failed
            .iter()
            .map(|f| {
                serde_json::json!({ "entity": f.entity, "error": f.error, "dropped": f.dropped })
            })
            .collect::<Vec<_>>(),
        "remaining": report.remaining,
    })
}

/// Runs the monitor and reminder scheduler until Ctrl-C.
pub async fn watch(ctx: &Context) -> CliResult<()> {
    let session = &ctx.session;
    if let Err(e) = session.reminders().request_permission().await {
        warn!(error = %e, "Alerts disabled");
    }

    let monitor = session.start().await;
    info!(user_id = %session.user_id(), "Watching reservations, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    let state = monitor.state().await;
    session.sign_out(false).await?;
    info!(
        polls = state.polls,
        tracked = state.statuses.len(),
        "Watcher stopped"
    );
    Ok(())
}
