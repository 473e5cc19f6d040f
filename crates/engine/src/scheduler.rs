use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use cadence_core::domain::conversation::ConversationStatus;
use cadence_core::domain::queue::QueueType;
use cadence_core::hours;
use cadence_db::repositories::{
    ConversationRepository, QueueRepository, RepositoryError, ScheduleRepository,
};

use crate::inbound::InboundProcessor;

const RESOLVER_NAME: &str = "scheduler";

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub resolved: usize,
    pub dismissed: usize,
    pub waiting: usize,
    pub failed: usize,
}

/// Periodic drain of the `outside_hours` queue. Escalated entries are never
/// touched here; humans close those through the admin API.
pub struct QueueScheduler {
    queue: Arc<dyn QueueRepository>,
    conversations: Arc<dyn ConversationRepository>,
    schedules: Arc<dyn ScheduleRepository>,
    inbound: Arc<InboundProcessor>,
    interval: Duration,
}

impl QueueScheduler {
    pub fn new(
        queue: Arc<dyn QueueRepository>,
        conversations: Arc<dyn ConversationRepository>,
        schedules: Arc<dyn ScheduleRepository>,
        inbound: Arc<InboundProcessor>,
        interval: Duration,
    ) -> Self {
        Self { queue, conversations, schedules, inbound, interval }
    }

    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.drain_outside_hours().await {
                Ok(report) if report != DrainReport::default() => {
                    info!(
                        event_name = "queue_drained",
                        resolved = report.resolved,
                        dismissed = report.dismissed,
                        waiting = report.waiting,
                        failed = report.failed,
                        "outside-hours queue drained"
                    );
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(
                        event_name = "queue_drain_failed",
                        error = %error,
                        "outside-hours drain failed"
                    );
                }
            }
        }
    }

    /// One drain pass, oldest entries first. Entries whose conversation is
    /// gone or no longer active are dismissed; entries still outside hours
    /// stay pending untouched; the rest are re-injected into the responder
    /// path and resolved on success.
    pub async fn drain_outside_hours(&self) -> Result<DrainReport, SchedulerError> {
        let mut report = DrainReport::default();

        for entry in self.queue.list_pending(QueueType::OutsideHours).await? {
            let conversation = self.conversations.find_by_id(&entry.conversation_id).await?;
            let conversation = match conversation {
                Some(conversation) if conversation.status == ConversationStatus::Active => {
                    conversation
                }
                _ => {
                    self.queue.mark_dismissed(&entry.id, RESOLVER_NAME, Utc::now()).await?;
                    report.dismissed += 1;
                    continue;
                }
            };

            let schedule = match conversation.agent_id.as_deref() {
                Some(agent_id) => self.schedules.find_for_agent(agent_id).await?,
                None => None,
            };
            if !hours::is_open(schedule.as_ref(), Utc::now()).is_open {
                report.waiting += 1;
                continue;
            }

            match self.inbound.respond(&conversation.id, &entry.original_message).await {
                Ok(_) => {
                    self.queue.mark_resolved(&entry.id, RESOLVER_NAME, Utc::now()).await?;
                    report.resolved += 1;
                }
                Err(error) => {
                    warn!(
                        event_name = "queued_message_replay_failed",
                        entry_id = %entry.id.0,
                        conversation_id = %conversation.id.0,
                        error = %error,
                        "deferred message replay failed, entry left pending"
                    );
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}
