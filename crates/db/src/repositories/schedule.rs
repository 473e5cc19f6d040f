use chrono::Utc;
use sqlx::Row;

use cadence_core::hours::WeeklySchedule;

use super::{RepositoryError, ScheduleRepository};
use crate::DbPool;

/// Schedules are stored whole as JSON; the evaluator in `cadence-core`
/// interprets them at read time.
pub struct SqlScheduleRepository {
    pool: DbPool,
}

impl SqlScheduleRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ScheduleRepository for SqlScheduleRepository {
    async fn find_for_agent(
        &self,
        agent_id: &str,
    ) -> Result<Option<WeeklySchedule>, RepositoryError> {
        let row = sqlx::query("SELECT schedule_json FROM agent_schedules WHERE agent_id = ?")
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let raw = row.try_get::<String, _>("schedule_json")?;
            serde_json::from_str(&raw)
                .map_err(|error| RepositoryError::Decode(format!("schedule decode: {error}")))
        })
        .transpose()
    }

    async fn save(
        &self,
        agent_id: &str,
        schedule: WeeklySchedule,
    ) -> Result<(), RepositoryError> {
        let schedule_json = serde_json::to_string(&schedule)
            .map_err(|error| RepositoryError::Decode(format!("schedule encode: {error}")))?;

        sqlx::query(
            "INSERT INTO agent_schedules (agent_id, schedule_json, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(agent_id) DO UPDATE SET
                schedule_json = excluded.schedule_json,
                updated_at = excluded.updated_at",
        )
        .bind(agent_id)
        .bind(schedule_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use cadence_core::hours::{DayHours, WeeklySchedule};

    use super::SqlScheduleRepository;
    use crate::migrations;
    use crate::repositories::ScheduleRepository;
    use crate::{connect_with_settings, DbPool};

    #[tokio::test]
    async fn schedules_round_trip_and_upsert() {
        let pool = setup_pool().await;
        let repo = SqlScheduleRepository::new(pool.clone());

        assert!(repo.find_for_agent("agent-1").await.expect("lookup").is_none());

        let schedule = sample_schedule("09:00");
        repo.save("agent-1", schedule.clone()).await.expect("save");
        assert_eq!(repo.find_for_agent("agent-1").await.expect("lookup"), Some(schedule));

        let updated = sample_schedule("08:00");
        repo.save("agent-1", updated.clone()).await.expect("resave");
        assert_eq!(repo.find_for_agent("agent-1").await.expect("lookup"), Some(updated));

        pool.close().await;
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn sample_schedule(start: &str) -> WeeklySchedule {
        let mut days = BTreeMap::new();
        days.insert(
            "monday".to_string(),
            DayHours { enabled: true, start: start.to_string(), end: "18:00".to_string() },
        );
        WeeklySchedule { enabled: true, timezone: "Europe/Paris".to_string(), days }
    }
}
