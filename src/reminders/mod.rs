//! Email reminders for events that are about to start.

pub mod mailer;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use log::{error, info, warn};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::ReminderConfig;
use crate::events::Event;
use crate::storage::Database;

pub use mailer::{build_mailer, LogMailer, Mailer, OutgoingMail, SmtpMailer};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReminderReport {
    pub processed: usize,
    pub sent: usize,
}

impl fmt::Display for ReminderReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.processed == 0 {
            write!(f, "No events needing reminders.")
        } else {
            write!(f, "Processed {} events. Sent {} reminders.", self.processed, self.sent)
        }
    }
}

pub fn reminder_mail(event: &Event, to: &str, from: &str) -> OutgoingMail {
    let body = format!(
        "Hello,\n\nThis is a reminder for your upcoming event:\n\nTitle: {}\nStarts: {}\nDescription: {}\n\nThank you!",
        event.title,
        event.start_time.format("%Y-%m-%d %H:%M UTC"),
        event.description.as_deref().filter(|d| !d.is_empty()).unwrap_or("N/A"),
    );
    OutgoingMail {
        from: from.to_string(),
        to: to.to_string(),
        subject: format!("Reminder: {}", event.title),
        body,
    }
}

/// One reminder pass: mail every unreminded event starting within the
/// configured window around `now` and mark the ones that went out, unless
/// their start moved while the mail was in flight.
pub async fn send_event_reminders(
    db: &Database,
    mailer: &dyn Mailer,
    config: &ReminderConfig,
    sender: &str,
    now: DateTime<Utc>,
) -> Result<ReminderReport> {
    let from = now - Duration::minutes(config.lookback_minutes);
    let to = now + Duration::minutes(config.lookahead_minutes);
    let due = db.due_reminders(from, to).await?;

    let mut report = ReminderReport { processed: due.len(), sent: 0 };
    let mut reminded = Vec::with_capacity(due.len());

    for reminder in &due {
        let mail = reminder_mail(&reminder.event, &reminder.email, sender);
        match mailer.send(&mail).await {
            Ok(()) => {
                info!("Sent reminder for event {} to {}", reminder.event.id, reminder.email);
                reminded.push((reminder.event.id, reminder.event.start_time));
            }
            Err(e) => error!("Failed to send reminder for event {}: {:#}", reminder.event.id, e),
        }
    }

    let marked = db.mark_reminders_sent(&reminded).await?;
    if marked < reminded.len() {
        info!("{} events were rescheduled during the reminder pass", reminded.len() - marked);
    }
    report.sent = reminded.len();
    Ok(report)
}

/// Run reminder passes every `poll_interval_secs` until the task is
/// dropped. Returns `None` when the interval is 0.
pub fn spawn_reminder_loop(
    db: Database,
    mailer: Arc<dyn Mailer>,
    config: ReminderConfig,
    sender: String,
) -> Option<JoinHandle<()>> {
    if config.poll_interval_secs == 0 {
        info!("Periodic reminders disabled");
        return None;
    }

    let period = std::time::Duration::from_secs(config.poll_interval_secs);
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            match send_event_reminders(&db, mailer.as_ref(), &config, &sender, Utc::now()).await {
                Ok(report) if report.processed > 0 => info!("{}", report),
                Ok(_) => {}
                Err(e) => warn!("Reminder pass failed: {:#}", e),
            }
        }
    }))
}
