//! Alert rule and alert log table access, including the fan-out invoked by
//! the ingestion engine for every inserted or content-changed record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, Row};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

use super::core::Database;
use crate::error::AppError;
use crate::TARGET_ALERT;

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AlertRule {
    pub id: i64,
    pub user_id: i64,
    pub entity_name_norm: Option<String>,
    pub region: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What the triggering upsert did to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Insert,
    Update,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Insert => "insert",
            ActionType::Update => "update",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "insert" => Some(ActionType::Insert),
            "update" => Some(ActionType::Update),
            _ => None,
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
pub struct FanOutResult {
    pub triggered: usize,
    pub rule_ids: Vec<i64>,
}

/// Evaluate every alert rule against one just-changed record and append the
/// matching log rows, all on the caller's transaction. Unset rule filters
/// are wildcards. The log append is a single multi-row insert so a record
/// matching many rules costs one round-trip and stays atomic with the
/// upsert.
pub async fn fan_out(
    conn: &mut PgConnection,
    record_id: i64,
    action: ActionType,
) -> Result<FanOutResult, sqlx::Error> {
    let record = sqlx::query(
        r#"
        SELECT entity_name_norm, region FROM records WHERE id = $1
        "#,
    )
    .bind(record_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(record) = record else {
        warn!(target: TARGET_ALERT, "Fan-out for missing record {}; skipping", record_id);
        return Ok(FanOutResult::default());
    };
    let entity_name_norm: String = record.get("entity_name_norm");
    let region: String = record.get("region");

    let rule_ids: Vec<i64> = sqlx::query_scalar(
        r#"
        SELECT id FROM alert_rules
        WHERE (entity_name_norm IS NULL OR entity_name_norm = $1)
          AND (region IS NULL OR region = $2)
        ORDER BY id
        "#,
    )
    .bind(&entity_name_norm)
    .bind(&region)
    .fetch_all(&mut *conn)
    .await?;

    if rule_ids.is_empty() {
        return Ok(FanOutResult::default());
    }

    sqlx::query(
        r#"
        INSERT INTO alert_logs (alert_rule_id, record_id, action_type, triggered_at)
        SELECT unnest($1::bigint[]), $2, $3, now()
        "#,
    )
    .bind(&rule_ids)
    .bind(record_id)
    .bind(action.as_str())
    .execute(&mut *conn)
    .await?;

    debug!(
        target: TARGET_ALERT,
        "Record {} ({}) triggered {} rule(s)",
        record_id,
        action,
        rule_ids.len()
    );

    Ok(FanOutResult {
        triggered: rule_ids.len(),
        rule_ids,
    })
}

/// Plan read on the caller's transaction. Locks the user row so concurrent
/// creates by the same user serialize; without the lock two transactions
/// could both count under the quota and both commit.
pub async fn user_plan(
    conn: &mut PgConnection,
    user_id: i64,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT plan FROM users WHERE id = $1 FOR UPDATE")
        .bind(user_id)
        .fetch_optional(conn)
        .await
}

pub async fn count_rules(conn: &mut PgConnection, user_id: i64) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM alert_rules WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(conn)
        .await
}

pub async fn insert_rule(
    conn: &mut PgConnection,
    user_id: i64,
    entity_name_norm: Option<&str>,
    region: Option<&str>,
) -> Result<AlertRule, sqlx::Error> {
    sqlx::query_as(
        r#"
        INSERT INTO alert_rules (user_id, entity_name_norm, region)
        VALUES ($1, $2, $3)
        RETURNING id, user_id, entity_name_norm, region, created_at
        "#,
    )
    .bind(user_id)
    .bind(entity_name_norm)
    .bind(region)
    .fetch_one(conn)
    .await
}

/// One alert log row joined with its rule owner and record display fields.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AlertLogRow {
    pub id: i64,
    pub alert_rule_id: i64,
    pub record_id: i64,
    pub action_type: String,
    pub triggered_at: DateTime<Utc>,
    pub user_id: i64,
    pub source_key: String,
    pub title: String,
    pub entity_name_raw: String,
    pub region: String,
}

#[derive(Debug, Default, Clone)]
pub struct AlertLogFilter {
    pub alert_rule_id: Option<i64>,
    pub user_id: Option<i64>,
    pub action_type: Option<ActionType>,
}

impl Database {
    pub async fn get_rule(&self, rule_id: i64) -> Result<Option<AlertRule>, AppError> {
        const SQL: &str = r#"
            SELECT id, user_id, entity_name_norm, region, created_at
            FROM alert_rules WHERE id = $1
        "#;
        self.with_retry(SQL, || {
            sqlx::query_as::<_, AlertRule>(SQL)
                .bind(rule_id)
                .fetch_optional(self.pool())
        })
        .await
    }

    pub async fn delete_rule(&self, rule_id: i64) -> Result<bool, AppError> {
        const SQL: &str = "DELETE FROM alert_rules WHERE id = $1";
        let result = self
            .with_retry(SQL, || {
                sqlx::query(SQL).bind(rule_id).execute(self.pool())
            })
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn rules_for_user(&self, user_id: i64) -> Result<Vec<AlertRule>, AppError> {
        const SQL: &str = r#"
            SELECT id, user_id, entity_name_norm, region, created_at
            FROM alert_rules
            WHERE user_id = $1
            ORDER BY created_at DESC
        "#;
        self.with_retry(SQL, || {
            sqlx::query_as::<_, AlertRule>(SQL)
                .bind(user_id)
                .fetch_all(self.pool())
        })
        .await
    }

    /// Full rule load for the cache refresh, grouped by owner.
    pub async fn all_rules_by_user(&self) -> Result<HashMap<i64, Vec<AlertRule>>, AppError> {
        const SQL: &str = r#"
            SELECT id, user_id, entity_name_norm, region, created_at
            FROM alert_rules
            ORDER BY user_id, created_at DESC
        "#;
        let rules = self
            .with_retry(SQL, || {
                sqlx::query_as::<_, AlertRule>(SQL).fetch_all(self.pool())
            })
            .await?;

        let mut by_user: HashMap<i64, Vec<AlertRule>> = HashMap::new();
        for rule in rules {
            by_user.entry(rule.user_id).or_default().push(rule);
        }
        Ok(by_user)
    }

    pub async fn user_plan(&self, user_id: i64) -> Result<Option<String>, AppError> {
        const SQL: &str = "SELECT plan FROM users WHERE id = $1";
        self.with_retry(SQL, || {
            sqlx::query_scalar::<_, String>(SQL)
                .bind(user_id)
                .fetch_optional(self.pool())
        })
        .await
    }

    pub async fn alert_logs(
        &self,
        filter: &AlertLogFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<AlertLogRow>, i64), AppError> {
        let action = filter.action_type.map(|a| a.as_str().to_string());

        const SQL: &str = r#"
            SELECT al.id, al.alert_rule_id, al.record_id, al.action_type, al.triggered_at,
                   ar.user_id, r.source_key, r.title, r.entity_name_raw, r.region
            FROM alert_logs al
            JOIN alert_rules ar ON al.alert_rule_id = ar.id
            JOIN records r ON al.record_id = r.id
            WHERE ($1::bigint IS NULL OR al.alert_rule_id = $1)
              AND ($2::bigint IS NULL OR ar.user_id = $2)
              AND ($3::text IS NULL OR al.action_type = $3)
            ORDER BY al.triggered_at DESC
            LIMIT $4 OFFSET $5
        "#;
        let rows = self
            .with_retry(SQL, || {
                sqlx::query_as::<_, AlertLogRow>(SQL)
                    .bind(filter.alert_rule_id)
                    .bind(filter.user_id)
                    .bind(&action)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(self.pool())
            })
            .await?;

        const COUNT_SQL: &str = r#"
            SELECT COUNT(*)
            FROM alert_logs al
            JOIN alert_rules ar ON al.alert_rule_id = ar.id
            WHERE ($1::bigint IS NULL OR al.alert_rule_id = $1)
              AND ($2::bigint IS NULL OR ar.user_id = $2)
              AND ($3::text IS NULL OR al.action_type = $3)
        "#;
        let total: i64 = self
            .with_retry(COUNT_SQL, || {
                sqlx::query_scalar(COUNT_SQL)
                    .bind(filter.alert_rule_id)
                    .bind(filter.user_id)
                    .bind(&action)
                    .fetch_one(self.pool())
            })
            .await?;

        Ok((rows, total))
    }
}
