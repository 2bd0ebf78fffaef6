//! Probe invocation.
//!
//! [`ProbeInvoker::call`] is what the admission loop uses: it paces,
//! runs the probe function inside a savepoint on the caller's connection,
//! normalizes the result and never fails; every problem turns into the
//! caller's default. [`ProbeInvoker::try_call`] is the operator-facing
//! variant that reports exactly what the function did.

use std::sync::Arc;

use sqlx::any::{Any, AnyArguments, AnyRow};
use sqlx::query::Query;
use sqlx::{AnyConnection, AnyPool, Connection, Row};

use crate::db::SqlDialect;
use crate::metrics::AppMetrics;
use crate::probe::error::{ProbeError, TriggerError};
use crate::probe::literal::{format_arguments, parse_arguments, ProbeLiteral};
use crate::probe::types::{ProbeDefinition, ResolvedProbe};
use crate::probe::value::{normalize, ProbeRow, ProbeValue};

/// Alias for the subquery wrapping a PostgreSQL probe call.
const ROW_ALIAS: &str = "load_probe_row";

/// What the caller of a manual trigger is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Administrator,
    Standard,
}

/// Executes probe functions against a database connection.
pub struct ProbeInvoker {
    dialect: SqlDialect,
    metrics: Option<Arc<AppMetrics>>,
}

impl ProbeInvoker {
    pub fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<AppMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// SQL calling `function` with `arity` positional parameters.
    ///
    /// The function name is always emitted as a quoted identifier;
    /// argument values never appear in the SQL text. On PostgreSQL the
    /// whole result row comes back as one `row_to_json` text column,
    /// since the Any driver cannot decode `boolean` or `numeric` columns.
    pub fn build_query(&self, function: &str, arity: usize) -> String {
        let placeholders: Vec<String> = (1..=arity).map(|n| format!("${}", n)).collect();
        let function = quote_identifier(function);
        match self.dialect {
            SqlDialect::Postgres => format!(
                "SELECT row_to_json({alias}.*)::text FROM (SELECT * FROM {}({})) AS {alias}",
                function,
                placeholders.join(", "),
                alias = ROW_ALIAS
            ),
            SqlDialect::Sqlite => format!("SELECT {}({})", function, placeholders.join(", ")),
        }
    }

    /// Evaluate `probe` and return the capacity it reports, or `default`
    /// when the probe cannot produce one.
    ///
    /// Sleeps `probe.pre_delay` first, on every call. The query runs in a
    /// nested transaction on `conn`, so a failing function leaves any
    /// transaction the caller holds on `conn` usable.
    pub async fn call(&self, conn: &mut AnyConnection, probe: &ResolvedProbe, default: f64) -> f64 {
        tokio::time::sleep(probe.pre_delay).await;
        self.measure(conn, probe, default).await
    }

    /// Like [`call`](Self::call), but takes a connection from `pool` only
    /// once the pre-delay has elapsed.
    pub async fn call_pooled(&self, pool: &AnyPool, probe: &ResolvedProbe, default: f64) -> f64 {
        tokio::time::sleep(probe.pre_delay).await;

        match pool.acquire().await {
            Ok(mut conn) => self.measure(&mut conn, probe, default).await,
            Err(err) => {
                self.count_call();
                tracing::error!(probe = %probe.name, "Cannot acquire a connection for load probe: {}", err);
                self.count_fallback("connection");
                default
            }
        }
    }

    async fn measure(&self, conn: &mut AnyConnection, probe: &ResolvedProbe, default: f64) -> f64 {
        self.count_call();

        let query = self.build_query(&probe.target_function, probe.arguments.len());
        let fetched = self
            .fetch_isolated(conn, &query, &probe.arguments)
            .await
            .map_err(|source| ProbeError::Execution {
                query: describe_query(&query, &probe.arguments),
                source,
            });

        match fetched.and_then(|row| interpret(probe, row)) {
            Ok(capacity) => capacity,
            Err(err) => {
                let reason = match &err {
                    ProbeError::Type { .. } => {
                        tracing::info!(probe = %probe.name, "{}", err);
                        "type"
                    }
                    ProbeError::EmptyResult { .. } => {
                        tracing::warn!(probe = %probe.name, "{}", err);
                        "empty_result"
                    }
                    _ => {
                        tracing::warn!(probe = %probe.name, "{}", err);
                        "execution"
                    }
                };
                self.count_fallback(reason);
                default
            }
        }
    }

    fn count_call(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.probe_calls_total.inc();
        }
    }

    fn count_fallback(&self, reason: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.probe_fallbacks_total.with_label_values(&[reason]).inc();
        }
    }

    /// Run `definition`'s function once on behalf of an operator and
    /// return its raw first value.
    ///
    /// No pacing, no normalization and no savepoint: a database error is
    /// handed straight back as [`TriggerError::Raised`].
    pub async fn try_call(
        &self,
        conn: &mut AnyConnection,
        definition: &ProbeDefinition,
        capability: Capability,
    ) -> Result<ProbeValue, TriggerError> {
        if capability != Capability::Administrator {
            return Err(TriggerError::Unauthorized);
        }

        let arguments =
            parse_arguments(&definition.call_arguments).map_err(TriggerError::Configuration)?;
        let query = self.build_query(&definition.target_function, arguments.len());

        let row = bind_arguments(sqlx::query(&query), &arguments)
            .fetch_optional(&mut *conn)
            .await
            .map_err(TriggerError::Raised)?;

        match row {
            Some(row) => self
                .decode_row(&row)
                .map_err(TriggerError::Raised)?
                .into_first()
                .ok_or(TriggerError::NoResult),
            None => Err(TriggerError::NoResult),
        }
    }

    /// Fetch the first row of `query` inside a savepoint on `conn`.
    ///
    /// The savepoint is released on success and rolled back on any error, so
    /// the enclosing transaction survives a failing probe function.
    async fn fetch_isolated(
        &self,
        conn: &mut AnyConnection,
        query: &str,
        arguments: &[ProbeLiteral],
    ) -> Result<Option<ProbeRow>, sqlx::Error> {
        let mut scope = conn.begin().await?;

        let outcome = match bind_arguments(sqlx::query(query), arguments)
            .fetch_optional(&mut *scope)
            .await
        {
            Ok(Some(row)) => self.decode_row(&row).map(Some),
            Ok(None) => Ok(None),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(row) => {
                scope.commit().await?;
                Ok(row)
            }
            Err(err) => {
                if let Err(rollback_err) = scope.rollback().await {
                    tracing::error!("Failed to roll back load probe savepoint: {}", rollback_err);
                }
                Err(err)
            }
        }
    }

    fn decode_row(&self, row: &AnyRow) -> Result<ProbeRow, sqlx::Error> {
        match self.dialect {
            SqlDialect::Postgres => {
                let text: String = row.try_get(0)?;
                ProbeRow::from_json(&text)
            }
            SqlDialect::Sqlite => ProbeRow::from_any_row(row),
        }
    }
}

/// Turn a probe's first result row (if any) into a capacity.
pub fn interpret(probe: &ResolvedProbe, row: Option<ProbeRow>) -> Result<f64, ProbeError> {
    let empty = || ProbeError::EmptyResult {
        probe: probe.name.clone(),
    };
    let row = row.ok_or_else(empty)?;
    let value = row.first().ok_or_else(empty)?;

    let capacity = normalize(value, probe.scale_factor)?;

    if probe.debug_logging {
        tracing::info!(
            probe = %probe.name,
            raw = %row,
            capacity,
            "Load probe query returned {}, which is scaled to {}",
            row,
            capacity
        );
    }

    Ok(capacity)
}

fn bind_arguments<'q>(
    mut query: Query<'q, Any, AnyArguments<'q>>,
    arguments: &'q [ProbeLiteral],
) -> Query<'q, Any, AnyArguments<'q>> {
    for argument in arguments {
        query = match argument {
            ProbeLiteral::Null => query.bind(None::<String>),
            ProbeLiteral::Bool(value) => query.bind(*value),
            // 32-bit where possible so PostgreSQL resolves `integer` parameters.
            ProbeLiteral::Int(value) => match i32::try_from(*value) {
                Ok(small) => query.bind(small),
                Err(_) => query.bind(*value),
            },
            ProbeLiteral::Float(value) => query.bind(*value),
            ProbeLiteral::Text(value) => query.bind(value.as_str()),
        };
    }
    query
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn describe_query(query: &str, arguments: &[ProbeLiteral]) -> String {
    if arguments.is_empty() {
        query.to_string()
    } else {
        format!("{} with {}", query, format_arguments(arguments))
    }
}
