use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use crate::storage::traits::{CancellationLedger, ElementStore, StoreError, StoreResult};
use crate::types::{AgentId, CancellationIntent, Element, ElementId, ElementStatus};

const ELEMENT_COLUMNS: &str = "id, workflow_name, status, owner_agent_id, version, last_modified";
const INTENT_COLUMNS: &str = "workflow_name, requested_at, acknowledged_element_count, \
     total_element_count_at_request_time, resolved, resolved_at";

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn new(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::raw_sql(include_str!("../../migrations/V001__initial_schema.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fetch_version(&self, id: ElementId) -> StoreResult<Option<u64>> {
        let row = sqlx::query("SELECT version FROM elements WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("version") as u64))
    }

    /// Turns an `UPDATE ... WHERE version = $n RETURNING` miss into the right error.
    async fn swap_miss(&self, id: ElementId, expected_version: u64) -> StoreError {
        match self.fetch_version(id).await {
            Ok(Some(actual)) => StoreError::VersionConflict {
                id,
                expected: expected_version,
                actual,
            },
            Ok(None) => StoreError::NotFound(id),
            Err(e) => e,
        }
    }

    async fn fetch_elements(
        &self,
        filter: &str,
        binds: &[&str],
        limit: Option<i64>,
    ) -> StoreResult<Vec<Element>> {
        let mut sql = format!(
            "SELECT {} FROM elements WHERE {} ORDER BY last_modified ASC",
            ELEMENT_COLUMNS, filter
        );
        if limit.is_some() {
            sql.push_str(&format!(" LIMIT ${}", binds.len() + 1));
        }

        let mut query = sqlx::query(&sql);
        for value in binds {
            query = query.bind(*value);
        }
        if let Some(limit) = limit {
            query = query.bind(limit);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_element).collect()
    }
}

#[async_trait]
impl ElementStore for PostgresStore {
    async fn put(&self, element: &Element) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO elements (id, workflow_name, status, owner_agent_id, version, last_modified)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(element.id)
        .bind(&element.workflow_name)
        .bind(element.status.as_str())
        .bind(&element.owner_agent_id)
        .bind(element.version as i64)
        .bind(element.last_modified)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            return Err(StoreError::AlreadyExists(element.id));
        }
        Ok(())
    }

    async fn get(&self, id: ElementId) -> StoreResult<Option<Element>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM elements WHERE id = $1",
            ELEMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_element).transpose()
    }

    async fn query_by_workflow(&self, workflow_name: &str) -> StoreResult<Vec<Element>> {
        self.fetch_elements("workflow_name = $1", &[workflow_name], None)
            .await
    }

    async fn query_by_workflow_and_status(
        &self,
        workflow_name: &str,
        status: ElementStatus,
    ) -> StoreResult<Vec<Element>> {
        self.fetch_elements(
            "workflow_name = $1 AND status = $2",
            &[workflow_name, status.as_str()],
            None,
        )
        .await
    }

    async fn query_by_status(
        &self,
        status: ElementStatus,
        limit: usize,
    ) -> StoreResult<Vec<Element>> {
        self.fetch_elements("status = $1", &[status.as_str()], Some(limit as i64))
            .await
    }

    async fn query_by_owner_and_status(
        &self,
        agent_id: &str,
        status: ElementStatus,
    ) -> StoreResult<Vec<Element>> {
        self.fetch_elements(
            "owner_agent_id = $1 AND status = $2",
            &[agent_id, status.as_str()],
            None,
        )
        .await
    }

    async fn compare_and_swap_status(
        &self,
        id: ElementId,
        expected_version: u64,
        new_status: ElementStatus,
    ) -> StoreResult<Element> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE elements
            SET status = $3, version = version + 1, last_modified = NOW()
            WHERE id = $1 AND version = $2
            RETURNING {}
            "#,
            ELEMENT_COLUMNS
        ))
        .bind(id)
        .bind(expected_version as i64)
        .bind(new_status.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => row_to_element(&r),
            None => Err(self.swap_miss(id, expected_version).await),
        }
    }

    async fn compare_and_swap_claim(
        &self,
        id: ElementId,
        expected_version: u64,
        agent_id: &AgentId,
    ) -> StoreResult<Element> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE elements
            SET status = $3, owner_agent_id = $4, version = version + 1, last_modified = NOW()
            WHERE id = $1 AND version = $2
            RETURNING {}
            "#,
            ELEMENT_COLUMNS
        ))
        .bind(id)
        .bind(expected_version as i64)
        .bind(ElementStatus::Running.as_str())
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => row_to_element(&r),
            None => Err(self.swap_miss(id, expected_version).await),
        }
    }
}

#[async_trait]
impl CancellationLedger for PostgresStore {
    async fn request_cancellation(
        &self,
        workflow_name: &str,
        total_element_count: u64,
    ) -> StoreResult<(CancellationIntent, bool)> {
        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO cancellation_intents (workflow_name, requested_at, total_element_count_at_request_time)
            VALUES ($1, NOW(), $2)
            ON CONFLICT (workflow_name) DO NOTHING
            RETURNING {}
            "#,
            INTENT_COLUMNS
        ))
        .bind(workflow_name)
        .bind(total_element_count as i64)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok((row_to_intent(&row), true));
        }

        let existing = self.get_intent(workflow_name).await?.ok_or_else(|| {
            StoreError::Corrupt(format!(
                "intent for {} vanished after insert conflict",
                workflow_name
            ))
        })?;
        Ok((existing, false))
    }

    async fn get_intent(&self, workflow_name: &str) -> StoreResult<Option<CancellationIntent>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM cancellation_intents WHERE workflow_name = $1",
            INTENT_COLUMNS
        ))
        .bind(workflow_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_intent))
    }

    async fn update_progress(
        &self,
        workflow_name: &str,
        acknowledged_count: u64,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE cancellation_intents
            SET acknowledged_element_count = $2
            WHERE workflow_name = $1
            "#,
        )
        .bind(workflow_name)
        .bind(acknowledged_count as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_resolved(&self, workflow_name: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE cancellation_intents
            SET resolved = TRUE, resolved_at = NOW()
            WHERE workflow_name = $1 AND resolved = FALSE
            "#,
        )
        .bind(workflow_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reopen(&self, workflow_name: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE cancellation_intents
            SET resolved = FALSE, resolved_at = NULL
            WHERE workflow_name = $1
            "#,
        )
        .bind(workflow_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_unresolved(&self) -> StoreResult<Vec<CancellationIntent>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM cancellation_intents WHERE resolved = FALSE ORDER BY requested_at ASC",
            INTENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_intent).collect())
    }
}

fn row_to_element(r: &PgRow) -> StoreResult<Element> {
    let status_str: String = r.get("status");
    let status = ElementStatus::parse(&status_str)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown element status {}", status_str)))?;

    Ok(Element {
        id: r.get("id"),
        workflow_name: r.get("workflow_name"),
        status,
        last_modified: r.get("last_modified"),
        owner_agent_id: r.get("owner_agent_id"),
        version: r.get::<i64, _>("version") as u64,
    })
}

fn row_to_intent(r: &PgRow) -> CancellationIntent {
    CancellationIntent {
        workflow_name: r.get("workflow_name"),
        requested_at: r.get("requested_at"),
        acknowledged_element_count: r.get::<i64, _>("acknowledged_element_count") as u64,
        total_element_count_at_request_time: r
            .get::<i64, _>("total_element_count_at_request_time")
            as u64,
        resolved: r.get("resolved"),
        resolved_at: r.get("resolved_at"),
    }
}
