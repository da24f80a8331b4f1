//! Statement execution: the reconstructor's [`RowSource`] and ad-hoc
//! selects.

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Executor, PgPool, Postgres, Row, TypeInfo};

use bmrb_core::error::{BmrbError, Result};
use bmrb_core::query::{shape_result, Projection, QueryRows, ResultShape, SelectResult, SelectStatement, SqlParam};
use bmrb_core::reconstruct::{Record, RowSource};

const REJECTED_QUERY: &str = "Invalid 'from' parameter.";

const TABLE_COLUMNS: &str = "SELECT column_name::text FROM information_schema.columns \
     WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position";

fn bind_params<'q>(sql: &'q str, params: &[SqlParam]) -> Query<'q, Postgres, PgArguments> {
    params
        .iter()
        .fold(sqlx::query(sql), |query, param| match param {
            SqlParam::Text(s) => query.bind(s.clone()),
            SqlParam::Int(i) => query.bind(*i),
        })
}

/// A statement the database refused is the caller's problem; anything else
/// (pool, network, protocol) is ours.
fn store_error(err: sqlx::Error, diagnostic: bool) -> BmrbError {
    match err {
        sqlx::Error::Database(db) => BmrbError::InvalidQuery {
            message: REJECTED_QUERY.to_string(),
            detail: diagnostic.then(|| db.to_string()),
        },
        other => BmrbError::ServerError(other.to_string()),
    }
}

/// Decodes one column to JSON by its Postgres type name.
fn column_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    let value: Option<Value> = match type_name {
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(Value::String),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)
            .ok()
            .flatten()
            .map(|i| json!(i)),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)
            .ok()
            .flatten()
            .map(|i| json!(i)),
        "INT8" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(|i| json!(i)),
        "FLOAT4" | "FLOAT8" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .map(|f| json!(f)),
        "BOOL" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(|b| json!(b)),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(index).ok().flatten(),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(index)
            .ok()
            .flatten()
            .map(|d| json!(d.to_string())),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(index)
            .ok()
            .flatten()
            .map(|dt| json!(dt.to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)
            .ok()
            .flatten()
            .map(|dt| json!(dt.to_rfc3339())),
        _ => row.try_get::<Option<String>, _>(index).ok().flatten().map(Value::String),
    };
    value.unwrap_or(Value::Null)
}

fn decode_row(row: &PgRow) -> Vec<Value> {
    row.columns()
        .iter()
        .map(|column| column_value(row, column.ordinal(), column.type_info().name()))
        .collect()
}

fn column_names(row: &PgRow) -> Vec<String> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

fn text_record(row: &PgRow) -> Record {
    row.columns()
        .iter()
        .map(|column| {
            let value = row
                .try_get::<Option<String>, _>(column.ordinal())
                .ok()
                .flatten()
                .map_or(Value::Null, Value::String);
            (column.name().to_string(), value)
        })
        .collect()
}

/// Executes reconstruction statements against one pool.
#[derive(Debug, Clone)]
pub struct PgRowSource {
    pool: PgPool,
    diagnostic: bool,
}

impl PgRowSource {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            diagnostic: false,
        }
    }

    /// Attach raw store errors to rejected statements.
    pub fn with_diagnostics(mut self, diagnostic: bool) -> Self {
        self.diagnostic = diagnostic;
        self
    }
}

#[async_trait]
impl RowSource for PgRowSource {
    async fn fetch_records(&self, statement: &SelectStatement) -> Result<Vec<Record>> {
        tracing::trace!(sql = %statement.sql, "fetching records");
        let rows = bind_params(&statement.sql, &statement.params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error(e, self.diagnostic))?;

        match statement.projection {
            Projection::Text => Ok(rows.iter().map(text_record).collect()),
            Projection::Native => Ok(rows
                .iter()
                .map(|row| column_names(row).into_iter().zip(decode_row(row)).collect())
                .collect()),
        }
    }

    async fn table_columns(&self, schema: &str, table: &str) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>(TABLE_COLUMNS)
            .bind(schema)
            .bind(table)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error(e, self.diagnostic))
    }
}

/// Runs an ad-hoc select and shapes the result.
pub async fn execute_select(
    pool: &PgPool,
    statement: &SelectStatement,
    shape: ResultShape,
    diagnostic: bool,
) -> Result<SelectResult> {
    let rows = bind_params(&statement.sql, &statement.params)
        .fetch_all(pool)
        .await
        .map_err(|e| store_error(e, diagnostic))?;

    let columns = match rows.first() {
        Some(row) => column_names(row),
        // No rows to read names from; ask the server for the result shape.
        None => pool
            .describe(&statement.sql)
            .await
            .map_err(|e| store_error(e, diagnostic))?
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect(),
    };

    let raw = QueryRows {
        columns,
        rows: rows.iter().map(decode_row).collect(),
    };
    Ok(shape_result(statement, raw, shape))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bmrb_core::query::{build_select, Modifiers};

    #[test]
    fn binds_one_argument_per_param() {
        let stmt = build_select(
            vec!["ID".into()],
            "macromolecules",
            "Entry",
            &[("Title".into(), "*kinase*".into()), ("ID".into(), "15*".into())],
            Modifiers::default(),
        )
        .unwrap();
        assert_eq!(stmt.params.len(), 2);
        // Building the query must not panic or touch a connection.
        let _query = bind_params(&stmt.sql, &stmt.params);
    }

    #[test]
    fn non_database_errors_are_server_errors() {
        let err = store_error(sqlx::Error::PoolTimedOut, true);
        assert!(matches!(err, BmrbError::ServerError(_)));
        assert_eq!(err.http_status(), 500);
    }
}
