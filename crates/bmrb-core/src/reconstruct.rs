//! Document Reconstructor
//!
//! Rebuilds a hierarchical [`Document`] from the normalized tables: the
//! section's root row becomes the document fields, each child tag category
//! with data becomes a [`DataTable`]. Visibility, pointers and row order all
//! come from the [`SchemaDirectory`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::document::{format_category, pointer_value, DataTable, Document, Entry, NULL_VALUE};
use crate::error::{BmrbError, Result};
use crate::namespace::Namespace;
use crate::query::{Columns, Projection, SelectQuery, SelectStatement, SqlParam};
use crate::schema::{FieldDescriptor, SchemaDirectory};

/// One fetched row, keyed by column name.
pub type Record = Map<String, Value>;

/// Join key between a section's root row and its child tables.
const SECTION_KEY: &str = "Sf_ID";
const FRAMECODE: &str = "Sf_framecode";
const CHEMCOMP_PREFIX: &str = "chemcomp_";

/// Port to the relational store.
///
/// Implementations run the statement and return each row as a record. For
/// [`Projection::Text`] statements every value is the column's text form.
#[async_trait]
pub trait RowSource: Send + Sync {
    async fn fetch_records(&self, statement: &SelectStatement) -> Result<Vec<Record>>;

    /// Column names `schema.table` actually carries, in table order.
    async fn table_columns(&self, schema: &str, table: &str) -> Result<Vec<String>>;
}

#[async_trait]
impl<T: RowSource + ?Sized> RowSource for Arc<T> {
    async fn fetch_records(&self, statement: &SelectStatement) -> Result<Vec<Record>> {
        (**self).fetch_records(statement).await
    }

    async fn table_columns(&self, schema: &str, table: &str) -> Result<Vec<String>> {
        (**self).table_columns(schema, table).await
    }
}

/// Renders a fetched value as NMR-STAR text. NULL becomes `.`.
pub fn value_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => NULL_VALUE.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Normalizes `ALA`, `ala` or `chemcomp_ala` to the component code `ALA`.
pub fn normalize_chemcomp_id(identifier: &str) -> Result<String> {
    let code = match identifier.get(..CHEMCOMP_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(CHEMCOMP_PREFIX) => {
            &identifier[CHEMCOMP_PREFIX.len()..]
        }
        _ => identifier,
    };
    if code.is_empty() {
        return Err(BmrbError::InvalidRequest(format!(
            "Invalid chemical component ID: {identifier:?}"
        )));
    }
    Ok(code.to_uppercase())
}

/// Columns a child table is sorted by: every ordering-flagged column, else
/// the first column named like an ordinal, else none (store order kept).
pub fn order_columns(fields: &[&FieldDescriptor]) -> Vec<String> {
    let flagged: Vec<String> = fields
        .iter()
        .filter(|f| f.orders_rows)
        .map(|f| f.name.clone())
        .collect();
    if !flagged.is_empty() {
        return flagged;
    }

    fields
        .iter()
        .find(|f| f.name.contains("ordinal") || f.name.contains("Ordinal"))
        .map(|f| vec![f.name.clone()])
        .unwrap_or_default()
}

/// Any store failure during reconstruction is reported as a server error
/// for that reconstruction only.
fn store_error(err: BmrbError) -> BmrbError {
    match err {
        BmrbError::InvalidQuery { message, detail } => BmrbError::ServerError(match detail {
            Some(detail) => format!("{message}: {detail}"),
            None => message,
        }),
        other => other,
    }
}

fn section_key(record: &Record) -> Result<i64> {
    match record.get(SECTION_KEY) {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| BmrbError::ServerError(format!("matching record has no usable {SECTION_KEY}")))
}

pub struct Reconstructor<S> {
    directory: Arc<SchemaDirectory>,
    source: S,
}

impl<S: RowSource> Reconstructor<S> {
    pub fn new(directory: Arc<SchemaDirectory>, source: S) -> Self {
        Self { directory, source }
    }

    /// Reconstructs the section `category` whose entry ID field equals
    /// `identifier`.
    pub async fn reconstruct(
        &self,
        namespace: Namespace,
        category: &str,
        identifier: &str,
    ) -> Result<Document> {
        let table = self.directory.table_for(category)?;
        let id_field = self.directory.entry_id_field(table, namespace)?;
        self.reconstruct_by(namespace, category, identifier, &id_field)
            .await
    }

    /// Like [`Self::reconstruct`] but matches on an explicit field.
    pub async fn reconstruct_by(
        &self,
        namespace: Namespace,
        category: &str,
        identifier: &str,
        id_field: &str,
    ) -> Result<Document> {
        let schema = namespace.schema().ok_or_else(|| {
            BmrbError::InvalidRequest(format!("{namespace} entries are not stored relationally"))
        })?;

        let section = self.directory.section(category)?;
        if !section.is_printable() {
            tracing::warn!(%namespace, category, "refusing to render a hidden section");
            return Err(BmrbError::NotRenderable(format!("{namespace}.{category}")));
        }
        let table = section.table.as_str();
        let fields = self.directory.printable_fields(table)?;

        // Dictionary fields the table does not carry are skipped.
        let present = self
            .source
            .table_columns(schema, table)
            .await
            .map_err(store_error)?;
        let mut columns = vec![SECTION_KEY.to_string(), FRAMECODE.to_string()];
        for field in &fields {
            if present.contains(&field.name) && !columns.contains(&field.name) {
                columns.push(field.name.clone());
            }
        }

        let root_query = SelectQuery::new(Some(schema), table)
            .columns(Columns::List(columns))
            .equals(id_field, SqlParam::Text(identifier.to_string()))
            .order_by([SECTION_KEY.to_string()])
            .projection(Projection::Text)
            .build()?;
        let root = self
            .source
            .fetch_records(&root_query)
            .await
            .map_err(store_error)?
            .into_iter()
            .next()
            .ok_or_else(|| BmrbError::NotFound("no matching record".to_string()))?;

        let sf_id = section_key(&root)?;
        let name = value_text(root.get(FRAMECODE));
        tracing::debug!(%namespace, category, table, sf_id, "reconstructing section");

        let mut document = Document::new(name, category, format_category(table));
        for field in fields {
            let Some(value) = root.get(&field.name) else {
                continue;
            };
            let text = value_text(Some(value));
            if field.pointer {
                document.add_field(field.name.clone(), pointer_value(&text));
            } else {
                document.add_field(field.name.clone(), text);
            }
        }

        for child in self.directory.child_categories(category)? {
            if let Some(table) = self.child_table(schema, child, sf_id).await? {
                document.tables.push(table);
            }
        }

        Ok(document)
    }

    async fn child_table(&self, schema: &str, category: &str, sf_id: i64) -> Result<Option<DataTable>> {
        let fields = self.directory.printable_fields(category)?;
        if fields.is_empty() {
            return Ok(None);
        }

        let columns: Vec<String> = fields.iter().map(|f| f.name.clone()).collect();
        let order = order_columns(&fields);
        if order.is_empty() {
            tracing::trace!(category, "no row order for table, keeping store order");
        }

        let statement = SelectQuery::new(Some(schema), category)
            .columns(Columns::List(columns.clone()))
            .equals(SECTION_KEY, SqlParam::Int(sf_id))
            .order_by(order)
            .projection(Projection::Text)
            .build()?;
        let records = self
            .source
            .fetch_records(&statement)
            .await
            .map_err(store_error)?;

        let mut table = DataTable::new(category, columns);
        for record in records {
            let row = fields
                .iter()
                .map(|field| {
                    let text = value_text(record.get(&field.name));
                    if field.pointer {
                        pointer_value(&text)
                    } else {
                        text
                    }
                })
                .collect();
            table.push_row(row)?;
        }

        Ok((!table.is_empty()).then_some(table))
    }

    /// Builds a chemical component entry: the `entity` section followed by
    /// the `chem_comp` section, without the entity's atom list.
    pub async fn chemcomp_entry(&self, identifier: &str) -> Result<Entry> {
        let code = normalize_chemcomp_id(identifier)?;

        let chem_comp = self
            .reconstruct_by(Namespace::Chemcomps, "chem_comp", &code, "ID")
            .await?;
        let mut entity = self
            .reconstruct_by(Namespace::Chemcomps, "entity", &code, "Nonpolymer_comp_ID")
            .await?;
        entity.remove_table("Entity_atom_list");

        let mut entry = Entry::new(format!("{CHEMCOMP_PREFIX}{code}"));
        entry.documents.push(entity);
        entry.documents.push(chem_comp);
        Ok(entry)
    }
}
