//! Reservation commands: book, approve, reject, cancel, conflicts.

use chrono::{NaiveDate, Weekday};
use roombook_core::{Actor, RecurrencePattern, ReservationDraft};
use roombook_engine::{ApproveOutcome, CreateOutcome, SkipCause};
use serde_json::json;

use super::{Context, describe, parse_time};
use crate::cli::{RecurrenceArg, SlotArgs};
use crate::error::{CliError, CliResult};

fn draft(ctx: &Context, slot: &SlotArgs, purpose: Option<String>) -> CliResult<ReservationDraft> {
    let offset = ctx.offset();
    let draft = ReservationDraft::new(
        slot.room.clone(),
        ctx.user_id(),
        parse_time(&slot.start, &offset)?,
        parse_time(&slot.end, &offset)?,
    );
    Ok(match purpose {
        Some(p) => draft.with_purpose(p),
        None => draft,
    })
}

/// Requests a room.
pub async fn book(ctx: &Context, slot: &SlotArgs, purpose: Option<String>) -> CliResult<()> {
    let draft = draft(ctx, slot, purpose)?;
    let offset = ctx.offset();
    match ctx.session.resolver().create(&draft).await? {
        CreateOutcome::Created(r) => {
            ctx.emit(&r, || println!("Requested {}", describe(&r, &offset)))
        }
        CreateOutcome::Conflict(conflicts) => {
            ctx.emit(&json!({ "conflicts": conflicts }), || {
                println!("Room {} is taken:", draft.room_id);
                for c in &conflicts {
                    println!("  {}", describe(c, &offset));
                }
            })?;
            Err(CliError::invalid("the requested slot conflicts with existing reservations"))
        }
    }
}

/// Parses weekday names such as `mon` or `Monday`.
pub fn parse_weekdays(values: &[String]) -> CliResult<Vec<Weekday>> {
    values
        .iter()
        .map(|v| {
            v.trim()
                .parse::<Weekday>()
                .map_err(|_| CliError::invalid(format!("unknown weekday `{}`", v)))
        })
        .collect()
}

/// Requests a room on a recurring schedule.
pub async fn book_recurring(
    ctx: &Context,
    slot: &SlotArgs,
    purpose: Option<String>,
    every: RecurrenceArg,
    on: &[String],
    until: NaiveDate,
) -> CliResult<()> {
    let draft = draft(ctx, slot, purpose)?;
    let pattern = match every {
        RecurrenceArg::Daily => RecurrencePattern::daily(until),
        RecurrenceArg::Weekly => RecurrencePattern::weekly(parse_weekdays(on)?, until),
        RecurrenceArg::Monthly => RecurrencePattern::monthly(until),
    };
    let report = ctx.session.resolver().create_recurring(&draft, &pattern).await?;
    let offset = ctx.offset();

    let skipped: Vec<_> = report
        .skipped
        .iter()
        .map(|s| {
            let reason = match &s.cause {
                SkipCause::Conflict(c) => format!(
                    "conflicts with {}",
                    c.iter().map(|r| r.id.as_str()).collect::<Vec<_>>().join(", ")
                ),
                SkipCause::Failed(e) => e.clone(),
            };
            json!({ "start": s.start, "end": s.end, "reason": reason })
        })
        .collect();
    ctx.emit(
        &json!({ "group_id": report.group_id, "created": report.created, "skipped": skipped }),
        || {
            println!(
                "Created {} of {} occurrences (group {})",
                report.created.len(),
                report.total(),
                report.group_id
            );
            for r in &report.created {
                println!("  {}", describe(r, &offset));
            }
            for s in &skipped {
                println!("  skipped {}: {}", s["start"], s["reason"]);
            }
        },
    )
}

/// Approves a pending reservation.
pub async fn approve(ctx: &Context, id: &str, force: bool) -> CliResult<()> {
    let offset = ctx.offset();
    match ctx.session.resolver().approve(id, force).await? {
        ApproveOutcome::Approved { reservation, cancelled } => ctx.emit(
            &json!({ "approved": reservation, "cancelled": cancelled }),
            || {
                println!("Approved {}", describe(&reservation, &offset));
                for c in &cancelled {
                    println!("Cancelled {}", describe(c, &offset));
                }
            },
        ),
        ApproveOutcome::Conflict(conflicts) => {
            ctx.emit(&json!({ "conflicts": conflicts }), || {
                println!("Not approved; conflicting reservations:");
                for c in &conflicts {
                    println!("  {}", describe(c, &offset));
                }
                println!("Use --force to cancel them.");
            })?;
            Err(CliError::invalid("approval blocked by conflicts"))
        }
    }
}

pub async fn reject(ctx: &Context, id: &str, reason: Option<String>) -> CliResult<()> {
    let r = ctx.session.resolver().reject(id, reason).await?;
    let offset = ctx.offset();
    ctx.emit(&r, || println!("Rejected {}", describe(&r, &offset)))
}

pub async fn cancel(ctx: &Context, id: &str, admin: bool) -> CliResult<()> {
    let actor = if admin {
        Actor::admin(ctx.user_id())
    } else {
        Actor::user(ctx.user_id())
    };
    let r = ctx.session.resolver().cancel(id, &actor).await?;
    let offset = ctx.offset();
    ctx.emit(&r, || println!("Cancelled {}", describe(&r, &offset)))
}

/// Lists reservations holding a room during a slot.
pub async fn conflicts(ctx: &Context, slot: &SlotArgs, exclude: Option<&str>) -> CliResult<()> {
    let offset = ctx.offset();
    let start = parse_time(&slot.start, &offset)?;
    let end = parse_time(&slot.end, &offset)?;
    let found = ctx
        .session
        .resolver()
        .check_conflict(&slot.room, start, end, exclude)
        .await?;
    ctx.emit(&found, || {
        if found.is_empty() {
            println!("Room {} is free.", slot.room);
        }
        for r in &found {
            println!("{}", describe(r, &offset));
        }
    })
}
