//! Database repository for load probe definitions.
//!
//! All `load_probes` read/write logic lives here. Every mutating call
//! clears the active-probe cache before returning, whether or not the
//! statement succeeded and whether or not the touched row is the active
//! one. [`ProbeRepository::active_resolved`] is the cached entry point the
//! admission loop calls on every tick.

use std::sync::Arc;

use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};

use crate::cache::{Lookup, MemoCache};
use crate::probe::error::ProbeError;
use crate::probe::types::{ProbeDefinition, ProbeDraft, ResolvedProbe};

/// Memo of the current active probe. `Some(None)` caches "no active probe".
pub type ActiveProbeCache = MemoCache<Option<Arc<ResolvedProbe>>>;

const PROBE_COLUMNS: &str = "id, name, active, priority, target_function, call_arguments,
     pre_delay_seconds, post_delay_seconds, scale_factor, debug_logging";

/// Repository for reading and writing probe definitions.
pub struct ProbeRepository {
    pool: AnyPool,
    cache: ActiveProbeCache,
}

impl ProbeRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self {
            pool,
            cache: ActiveProbeCache::new(),
        }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn cache(&self) -> &ActiveProbeCache {
        &self.cache
    }

    // ---- Mutations ----

    /// Insert a new probe definition. Returns the new row id.
    ///
    /// Without an explicit priority the probe is placed after the
    /// current last one.
    pub async fn create(&self, draft: &ProbeDraft) -> Result<i64, sqlx::Error> {
        let result = self.insert(draft).await;
        self.cache.invalidate();
        result
    }

    /// Replace every field of probe `id`. A `None` priority keeps the
    /// stored one. Returns `true` if a row was updated.
    pub async fn update(&self, id: i64, draft: &ProbeDraft) -> Result<bool, sqlx::Error> {
        let result = self.replace(id, draft).await;
        self.cache.invalidate();
        result
    }

    /// Delete probe `id`. Returns `true` if a row was removed.
    pub async fn delete(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM load_probes WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await;
        self.cache.invalidate();
        Ok(result?.rows_affected() > 0)
    }

    async fn insert(&self, draft: &ProbeDraft) -> Result<i64, sqlx::Error> {
        let priority = match draft.priority {
            Some(priority) => priority,
            None => self.next_priority().await?,
        };

        let row = sqlx::query(
            "INSERT INTO load_probes
             (name, active, priority, target_function, call_arguments,
              pre_delay_seconds, post_delay_seconds, scale_factor, debug_logging)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING id",
        )
        .bind(draft.name.as_str())
        .bind(flag(draft.active))
        .bind(priority)
        .bind(draft.target_function.as_str())
        .bind(draft.call_arguments.as_str())
        .bind(draft.pre_delay_seconds)
        .bind(draft.post_delay_seconds)
        .bind(draft.scale_factor)
        .bind(flag(draft.debug_logging))
        .fetch_one(&self.pool)
        .await?;

        row.try_get("id")
    }

    async fn replace(&self, id: i64, draft: &ProbeDraft) -> Result<bool, sqlx::Error> {
        let sql = if draft.priority.is_some() {
            "UPDATE load_probes
             SET name = $1, active = $2, target_function = $3, call_arguments = $4,
                 pre_delay_seconds = $5, post_delay_seconds = $6, scale_factor = $7,
                 debug_logging = $8, priority = $10
             WHERE id = $9"
        } else {
            "UPDATE load_probes
             SET name = $1, active = $2, target_function = $3, call_arguments = $4,
                 pre_delay_seconds = $5, post_delay_seconds = $6, scale_factor = $7,
                 debug_logging = $8
             WHERE id = $9"
        };

        let mut query = sqlx::query(sql)
            .bind(draft.name.as_str())
            .bind(flag(draft.active))
            .bind(draft.target_function.as_str())
            .bind(draft.call_arguments.as_str())
            .bind(draft.pre_delay_seconds)
            .bind(draft.post_delay_seconds)
            .bind(draft.scale_factor)
            .bind(flag(draft.debug_logging))
            .bind(id);
        if let Some(priority) = draft.priority {
            query = query.bind(priority);
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn next_priority(&self) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT COALESCE(MAX(priority), 0) + 1 AS next FROM load_probes")
            .fetch_one(&self.pool)
            .await?;
        row.try_get("next")
    }

    // ---- Reads ----

    /// Fetch a single probe definition by id.
    pub async fn get(&self, id: i64) -> Result<Option<ProbeDefinition>, sqlx::Error> {
        let sql = format!("SELECT {} FROM load_probes WHERE id = $1", PROBE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(definition_from_row).transpose()
    }

    /// List all probe definitions (active or not) by `(priority, name)`.
    pub async fn list(&self) -> Result<Vec<ProbeDefinition>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM load_probes ORDER BY priority ASC, name ASC, id ASC",
            PROBE_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows.iter().map(definition_from_row).collect()
    }

    /// The first active definition by `(priority, name)`, uncached.
    pub async fn first_active(&self) -> Result<Option<ProbeDefinition>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM load_probes
             WHERE active <> 0
             ORDER BY priority ASC, name ASC, id ASC
             LIMIT 1",
            PROBE_COLUMNS
        );
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;

        row.as_ref().map(definition_from_row).transpose()
    }

    /// The active probe with parsed arguments, served from the cache when
    /// possible.
    ///
    /// Malformed stored arguments surface as
    /// [`ProbeError::Configuration`] and are never cached.
    pub async fn active_resolved(&self) -> Result<Option<Arc<ResolvedProbe>>, ProbeError> {
        let generation = match self.cache.lookup() {
            Lookup::Hit(resolved) => return Ok(resolved),
            Lookup::Miss { generation } => generation,
        };

        let resolved = match self.first_active().await? {
            Some(definition) => Some(Arc::new(ResolvedProbe::resolve(&definition)?)),
            None => None,
        };

        if self.cache.fill(generation, resolved.clone()) {
            tracing::debug!(
                probe = resolved.as_ref().map(|r| r.name.as_str()),
                "Active load probe cached"
            );
        }

        Ok(resolved)
    }
}

fn flag(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

fn definition_from_row(row: &AnyRow) -> Result<ProbeDefinition, sqlx::Error> {
    let active: i64 = row.try_get("active")?;
    let debug_logging: i64 = row.try_get("debug_logging")?;

    Ok(ProbeDefinition {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        active: active != 0,
        priority: row.try_get("priority")?,
        target_function: row.try_get("target_function")?,
        call_arguments: row.try_get("call_arguments")?,
        pre_delay_seconds: row.try_get("pre_delay_seconds")?,
        post_delay_seconds: row.try_get("post_delay_seconds")?,
        scale_factor: row.try_get("scale_factor")?,
        debug_logging: debug_logging != 0,
    })
}
