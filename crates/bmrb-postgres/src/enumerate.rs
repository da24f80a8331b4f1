//! Identifiers that should exist in the cache, per namespace.

use bmrb_core::error::{BmrbError, Result};
use bmrb_core::namespace::Namespace;
use sqlx::PgPool;

/// The enumeration query for a namespace, or `None` when the namespace is
/// not backed by the relational store.
pub fn enumeration_sql(namespace: Namespace) -> Option<&'static str> {
    match namespace {
        Namespace::Metabolomics => Some(r#"SELECT DISTINCT "Entry_ID"::text FROM metabolomics."Release""#),
        Namespace::Macromolecules => Some(r#"SELECT DISTINCT "ID"::text FROM macromolecules."Entry""#),
        Namespace::Chemcomps => Some(r#"SELECT DISTINCT "BMRB_code"::text FROM chemcomps."Entity""#),
        Namespace::Uploaded | Namespace::Combined => None,
    }
}

/// Every released identifier of `namespace`, with chemical components
/// already carrying their `chemcomp_` prefix. NULL ids are skipped.
pub async fn released_ids(pool: &PgPool, namespace: Namespace) -> Result<Vec<String>> {
    let sql = enumeration_sql(namespace).ok_or_else(|| {
        BmrbError::InvalidRequest(format!("{namespace} cannot be enumerated"))
    })?;

    let ids: Vec<Option<String>> = sqlx::query_scalar(sql)
        .fetch_all(pool)
        .await
        .map_err(|e| BmrbError::ServerError(format!("enumerating {namespace}: {e}")))?;

    let ids = ids.into_iter().flatten();
    let ids: Vec<String> = match namespace {
        Namespace::Chemcomps => ids.map(|code| format!("chemcomp_{code}")).collect(),
        _ => ids.collect(),
    };
    tracing::debug!(%namespace, count = ids.len(), "enumerated identifiers");
    Ok(ids)
}
