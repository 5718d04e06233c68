//! Inbox commands.

use serde_json::json;

use super::Context;
use crate::cli::NotificationsAction;
use crate::error::CliResult;

pub async fn run(ctx: &Context, action: NotificationsAction) -> CliResult<()> {
    let inbox = ctx.session.inbox();
    let user_id = ctx.user_id();
    match action {
        NotificationsAction::List { unread } => {
            let mut list = inbox.list(user_id).await?;
            if unread {
                list.retain(|n| !n.read);
            }
            let offset = ctx.offset();
            ctx.emit(&list, || {
                if list.is_empty() {
                    println!("No notifications.");
                }
                for n in &list {
                    println!(
                        "{} {}  {}  {}  {}",
                        if n.read { " " } else { "*" },
                        n.id,
                        n.created_at.with_timezone(&offset).format("%Y-%m-%d %H:%M"),
                        n.title,
                        n.body
                    );
                }
            })
        }
        NotificationsAction::Read { id } => {
            inbox.mark_read(user_id, &id).await?;
            ctx.emit(&json!({ "read": id }), || println!("Marked {} read", id))
        }
        NotificationsAction::ReadAll => {
            inbox.mark_all_read(user_id).await?;
            ctx.emit(&json!({ "read_all": true }), || println!("All notifications marked read"))
        }
        NotificationsAction::Delete { id } => {
            inbox.delete(user_id, &id).await?;
            ctx.emit(&json!({ "deleted": id }), || println!("Deleted {}", id))
        }
        NotificationsAction::Count => {
            let count = inbox.unread_count(user_id).await?;
            ctx.session.reminders().set_badge_count(count).await?;
            ctx.emit(&json!({ "unread": count }), || println!("{}", count))
        }
    }
}
