//! Alert rule management: per-plan quotas, a TTL rule cache for list
//! endpoints, and the pure matching predicate.
//!
//! The cache is advisory. Anything that must be authoritative (the quota
//! check, fan-out matching) reads the database inside its transaction.

use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::db::alert::{self, AlertRule};
use crate::db::Database;
use crate::error::AppError;
use crate::record::{valid_region, MAX_ENTITY_NAME_LEN};
use crate::TARGET_ALERT;

pub const RULE_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Starter,
    Pro,
    Team,
}

impl Plan {
    /// Maximum concurrent rules per user; None is unlimited.
    pub fn rule_limit(&self) -> Option<i64> {
        match self {
            Plan::Starter => Some(1),
            Plan::Pro => Some(5),
            Plan::Team => None,
        }
    }

    pub fn parse(s: &str) -> Option<Plan> {
        match s {
            "starter" => Some(Plan::Starter),
            "pro" => Some(Plan::Pro),
            "team" => Some(Plan::Team),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Starter => "starter",
            Plan::Pro => "pro",
            Plan::Team => "team",
        }
    }
}

/// A record matches a rule iff every set filter equals the record's field;
/// an unset filter is a wildcard.
pub fn rule_matches(rule: &AlertRule, entity_name_norm: &str, region: &str) -> bool {
    if let Some(filter) = rule.entity_name_norm.as_deref() {
        if filter != entity_name_norm {
            return false;
        }
    }
    if let Some(filter) = rule.region.as_deref() {
        if filter != region {
            return false;
        }
    }
    true
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanInfo {
    pub plan: Plan,
    pub rules_used: i64,
    pub rule_limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAlertStats {
    pub user_id: i64,
    pub plan: Plan,
    pub rules_used: i64,
    pub rule_limit: Option<i64>,
}

struct RuleCache {
    by_user: HashMap<i64, Vec<AlertRule>>,
    refreshed_at: Option<Instant>,
}

impl RuleCache {
    fn is_stale(&self) -> bool {
        match self.refreshed_at {
            Some(at) => at.elapsed() >= RULE_CACHE_TTL,
            None => true,
        }
    }
}

pub struct AlertService {
    db: Database,
    cache: RwLock<RuleCache>,
}

impl AlertService {
    pub fn new(db: Database) -> Self {
        AlertService {
            db,
            cache: RwLock::new(RuleCache {
                by_user: HashMap::new(),
                refreshed_at: None,
            }),
        }
    }

    /// Create a rule under the owner's plan quota. The plan read, the rule
    /// count, and the insert share one transaction so two concurrent
    /// creates cannot both squeeze under the limit.
    pub async fn create_rule(
        &self,
        user_id: i64,
        entity_name_norm: Option<String>,
        region: Option<String>,
    ) -> Result<(AlertRule, PlanInfo), AppError> {
        if user_id <= 0 {
            return Err(AppError::Validation("userId must be a positive integer".into()));
        }
        let entity_name_norm = entity_name_norm.filter(|s| !s.is_empty());
        let region = region.filter(|s| !s.is_empty());
        if entity_name_norm.is_none() && region.is_none() {
            return Err(AppError::Validation(
                "at least one of entityNameNorm or region is required".into(),
            ));
        }
        if let Some(entity) = entity_name_norm.as_deref() {
            if entity.len() > MAX_ENTITY_NAME_LEN {
                return Err(AppError::Validation(format!(
                    "entityNameNorm exceeds {} characters",
                    MAX_ENTITY_NAME_LEN
                )));
            }
        }
        if let Some(region) = region.as_deref() {
            if !valid_region(region) {
                return Err(AppError::Validation(
                    "region must be a 2-letter uppercase code".into(),
                ));
            }
        }

        let mut tx = self.db.pool().begin().await.map_err(AppError::storage)?;

        let plan = alert::user_plan(&mut tx, user_id)
            .await
            .map_err(AppError::storage)?
            .ok_or_else(|| AppError::NotFound(format!("user {}", user_id)))?;
        let plan = Plan::parse(&plan)
            .ok_or_else(|| AppError::Validation(format!("unknown plan: {}", plan)))?;

        let used = alert::count_rules(&mut tx, user_id)
            .await
            .map_err(AppError::storage)?;
        if let Some(limit) = plan.rule_limit() {
            if used >= limit {
                return Err(AppError::Quota(format!(
                    "{} plan allows {} alert rule(s); {} already in use",
                    plan.as_str(),
                    limit,
                    used
                )));
            }
        }

        let rule = alert::insert_rule(
            &mut tx,
            user_id,
            entity_name_norm.as_deref(),
            region.as_deref(),
        )
        .await
        .map_err(AppError::storage)?;
        tx.commit().await.map_err(AppError::storage)?;

        info!(target: TARGET_ALERT, "User {} created alert rule {}", user_id, rule.id);
        self.invalidate_cache().await;

        Ok((
            rule,
            PlanInfo {
                plan,
                rules_used: used + 1,
                rule_limit: plan.rule_limit(),
            },
        ))
    }

    pub async fn delete_rule(&self, rule_id: i64, user_id: i64) -> Result<(), AppError> {
        let rule = self
            .db
            .get_rule(rule_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("alert rule {}", rule_id)))?;
        if rule.user_id != user_id {
            return Err(AppError::Forbidden(format!(
                "alert rule {} belongs to another user",
                rule_id
            )));
        }

        self.db.delete_rule(rule_id).await?;
        info!(target: TARGET_ALERT, "User {} deleted alert rule {}", user_id, rule_id);
        self.invalidate_cache().await;
        Ok(())
    }

    /// Rules for one user from the cache, refreshing when the stamp is
    /// older than the TTL. Racing refreshes are fine; each produces a
    /// consistent snapshot and the last writer wins.
    pub async fn cached_rules(&self, user_id: i64) -> Result<Vec<AlertRule>, AppError> {
        {
            let cache = self.cache.read().await;
            if !cache.is_stale() {
                return Ok(cache.by_user.get(&user_id).cloned().unwrap_or_default());
            }
        }

        debug!(target: TARGET_ALERT, "Rule cache stale; refreshing");
        let by_user = self.db.all_rules_by_user().await?;
        let rules = by_user.get(&user_id).cloned().unwrap_or_default();

        let mut cache = self.cache.write().await;
        cache.by_user = by_user;
        cache.refreshed_at = Some(Instant::now());

        Ok(rules)
    }

    pub async fn invalidate_cache(&self) {
        let mut cache = self.cache.write().await;
        cache.refreshed_at = None;
    }

    /// Authoritative plan/usage read for the stats endpoint.
    pub async fn user_stats(&self, user_id: i64) -> Result<UserAlertStats, AppError> {
        let plan = self
            .db
            .user_plan(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {}", user_id)))?;
        let plan = Plan::parse(&plan)
            .ok_or_else(|| AppError::Validation(format!("unknown plan: {}", plan)))?;
        let rules = self.db.rules_for_user(user_id).await?;

        Ok(UserAlertStats {
            user_id,
            plan,
            rules_used: rules.len() as i64,
            rule_limit: plan.rule_limit(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn rule(entity: Option<&str>, region: Option<&str>) -> AlertRule {
        AlertRule {
            id: 1,
            user_id: 1,
            entity_name_norm: entity.map(String::from),
            region: region.map(String::from),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn plan_limits() {
        assert_eq!(Plan::Starter.rule_limit(), Some(1));
        assert_eq!(Plan::Pro.rule_limit(), Some(5));
        assert_eq!(Plan::Team.rule_limit(), None);
        assert_eq!(Plan::parse("pro"), Some(Plan::Pro));
        assert_eq!(Plan::parse("enterprise"), None);
    }

    #[test]
    fn region_only_rule_matches_any_entity_in_region() {
        let rule = rule(None, Some("TX"));
        assert!(rule_matches(&rule, "acme energy llc", "TX"));
        assert!(rule_matches(&rule, "someone else", "TX"));
        assert!(!rule_matches(&rule, "acme energy llc", "NY"));
    }

    #[test]
    fn entity_only_rule_matches_any_region() {
        let rule = rule(Some("acme energy llc"), None);
        assert!(rule_matches(&rule, "acme energy llc", "TX"));
        assert!(rule_matches(&rule, "acme energy llc", "NY"));
        assert!(!rule_matches(&rule, "other corp", "TX"));
    }

    #[test]
    fn both_filters_must_match() {
        let rule = rule(Some("acme energy llc"), Some("TX"));
        assert!(rule_matches(&rule, "acme energy llc", "TX"));
        assert!(!rule_matches(&rule, "acme energy llc", "NY"));
        assert!(!rule_matches(&rule, "other corp", "TX"));
    }

    #[test]
    fn stale_cache_detection() {
        let cache = RuleCache {
            by_user: HashMap::new(),
            refreshed_at: None,
        };
        assert!(cache.is_stale());

        let cache = RuleCache {
            by_user: HashMap::new(),
            refreshed_at: Some(Instant::now()),
        };
        assert!(!cache.is_stale());
    }
}
