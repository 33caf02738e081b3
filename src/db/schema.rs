use tracing::info;

use super::core::Database;
use crate::error::AppError;
use crate::TARGET_DB;

impl Database {
    pub(crate) async fn initialize_schema(&self) -> Result<(), AppError> {
        // One statement per call; the extended query protocol rejects
        // multi-statement strings.
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id BIGSERIAL PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                plan TEXT NOT NULL CHECK (plan IN ('starter', 'pro', 'team')),
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS records (
                id BIGSERIAL PRIMARY KEY,
                source_key VARCHAR(255) NOT NULL UNIQUE,
                published_at TEXT NOT NULL,
                title TEXT NOT NULL,
                entity_name_raw VARCHAR(255) NOT NULL,
                entity_name_norm VARCHAR(255) NOT NULL,
                region TEXT NOT NULL,
                record_id TEXT NOT NULL,
                status TEXT NOT NULL,
                document_url TEXT,
                raw_json JSONB NOT NULL,
                content_hash TEXT NOT NULL,
                last_source_type TEXT NOT NULL CHECK (last_source_type IN ('bulk', 'recent')),
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_records_source_key ON records (source_key)",
            "CREATE INDEX IF NOT EXISTS idx_records_content_hash ON records (content_hash)",
            "CREATE INDEX IF NOT EXISTS idx_records_entity_name_norm ON records (entity_name_norm)",
            "CREATE INDEX IF NOT EXISTS idx_records_region ON records (region)",
            r#"
            CREATE TABLE IF NOT EXISTS ingestion_runs (
                id BIGSERIAL PRIMARY KEY,
                source_type TEXT NOT NULL CHECK (source_type IN ('bulk', 'recent')),
                started_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                finished_at TIMESTAMPTZ,
                records_fetched INTEGER NOT NULL DEFAULT 0,
                records_inserted INTEGER NOT NULL DEFAULT 0,
                records_updated INTEGER NOT NULL DEFAULT 0,
                error TEXT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_ingestion_runs_started_at ON ingestion_runs (started_at)",
            r#"
            CREATE TABLE IF NOT EXISTS alert_rules (
                id BIGSERIAL PRIMARY KEY,
                user_id BIGINT NOT NULL REFERENCES users (id) ON DELETE CASCADE,
                entity_name_norm VARCHAR(255),
                region TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                CHECK (entity_name_norm IS NOT NULL OR region IS NOT NULL)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_alert_rules_user_id ON alert_rules (user_id)",
            "CREATE INDEX IF NOT EXISTS idx_alert_rules_entity_name_norm ON alert_rules (entity_name_norm)",
            "CREATE INDEX IF NOT EXISTS idx_alert_rules_region ON alert_rules (region)",
            r#"
            CREATE TABLE IF NOT EXISTS alert_logs (
                id BIGSERIAL PRIMARY KEY,
                alert_rule_id BIGINT NOT NULL REFERENCES alert_rules (id) ON DELETE CASCADE,
                record_id BIGINT NOT NULL REFERENCES records (id) ON DELETE CASCADE,
                triggered_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                action_type TEXT NOT NULL CHECK (action_type IN ('insert', 'update'))
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_alert_logs_alert_rule_id ON alert_logs (alert_rule_id)",
            "CREATE INDEX IF NOT EXISTS idx_alert_logs_triggered_at ON alert_logs (triggered_at)",
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(self.pool())
                .await
                .map_err(AppError::storage)?;
        }
        info!(target: TARGET_DB, "Tables ensured to exist");

        Ok(())
    }
}
