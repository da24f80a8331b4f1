//! Query Builder
//!
//! Builds parameterized SELECT statements from a declarative descriptor.
//! Table and column names cannot be bound as parameters, so every
//! identifier goes through [`quote_identifier`], which refuses anything
//! containing a double quote. Predicate values are always bound.

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::Value;

use crate::error::{BmrbError, Result};

/// Wraps an identifier in double quotes, rejecting embedded quotes.
pub fn quote_identifier(name: &str) -> Result<String> {
    if name.contains('"') {
        return Err(BmrbError::InvalidIdentifier(format!(
            "Invalid identifier {name:?}: identifiers cannot contain a '\"'."
        )));
    }
    Ok(format!("\"{name}\""))
}

/// Translates the user-facing `*` wildcard to SQL `%`.
pub fn translate_wildcard(pattern: &str) -> String {
    pattern.replace('*', "%")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub count: bool,
    pub lower: bool,
}

impl Modifiers {
    /// Recognizes `count` and `lower`; anything else is ignored.
    pub fn parse<I, S>(modifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = Self::default();
        for modifier in modifiers {
            match modifier.as_ref() {
                "count" => parsed.count = true,
                "lower" => parsed.lower = true,
                other => tracing::debug!(modifier = other, "ignoring unknown query modifier"),
            }
        }
        parsed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Columns {
    All,
    List(Vec<String>),
}

impl Columns {
    /// A single `*` selects everything; otherwise the list is explicit.
    pub fn from_list(columns: Vec<String>) -> Self {
        if columns.is_empty() || (columns.len() == 1 && columns[0] == "*") {
            Columns::All
        } else {
            Columns::List(columns)
        }
    }
}

/// A bound parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlParam {
    Text(String),
    Int(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Newline-insensitive `LIKE` with `*` wildcards.
    Like { column: String, pattern: String },
    Equals { column: String, value: SqlParam },
}

/// How selected columns come back from the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Projection {
    /// Native column types.
    #[default]
    Native,
    /// Every selected column cast to `text`, keeping its name.
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectStatement {
    pub sql: String,
    pub params: Vec<SqlParam>,
    pub table: String,
    pub columns: Columns,
    pub projection: Projection,
    pub count: bool,
}

/// Builder for a single-table SELECT.
#[derive(Debug, Clone)]
pub struct SelectQuery {
    schema: Option<String>,
    table: String,
    columns: Columns,
    predicates: Vec<Predicate>,
    order_by: Vec<String>,
    modifiers: Modifiers,
    projection: Projection,
}

impl SelectQuery {
    pub fn new(schema: Option<&str>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.map(str::to_string),
            table: table.into(),
            columns: Columns::All,
            predicates: Vec::new(),
            order_by: Vec::new(),
            modifiers: Modifiers::default(),
            projection: Projection::Native,
        }
    }

    pub fn columns(mut self, columns: Columns) -> Self {
        self.columns = columns;
        self
    }

    pub fn like(mut self, column: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.predicates.push(Predicate::Like {
            column: column.into(),
            pattern: pattern.into(),
        });
        self
    }

    pub fn equals(mut self, column: impl Into<String>, value: SqlParam) -> Self {
        self.predicates.push(Predicate::Equals {
            column: column.into(),
            value,
        });
        self
    }

    pub fn predicates(mut self, predicates: impl IntoIterator<Item = Predicate>) -> Self {
        self.predicates.extend(predicates);
        self
    }

    pub fn order_by(mut self, columns: impl IntoIterator<Item = String>) -> Self {
        self.order_by.extend(columns);
        self
    }

    pub fn modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    /// Renders the statement. All identifiers are validated before any SQL
    /// is produced, so a rejected name never reaches the store.
    pub fn build(self) -> Result<SelectStatement> {
        let table = quote_identifier(&self.table)?;
        let from = match &self.schema {
            Some(schema) => format!("{}.{table}", quote_identifier(schema)?),
            None => table.clone(),
        };
        let qualify = |column: &str| -> Result<String> {
            Ok(format!("{table}.{}", quote_identifier(column)?))
        };

        let projection = match (&self.columns, self.projection, self.modifiers.count) {
            (Columns::All, _, true) => "count(*)".to_string(),
            (Columns::List(cols), _, true) => cols
                .iter()
                .map(|c| Ok(format!("count({})", quote_identifier(c)?)))
                .collect::<Result<Vec<_>>>()?
                .join(","),
            (Columns::All, _, false) => "*".to_string(),
            (Columns::List(cols), Projection::Text, false) => cols
                .iter()
                .map(|c| {
                    let quoted = quote_identifier(c)?;
                    Ok(format!("{quoted}::text AS {quoted}"))
                })
                .collect::<Result<Vec<_>>>()?
                .join(","),
            (Columns::List(cols), Projection::Native, false) => cols
                .iter()
                .map(|c| quote_identifier(c))
                .collect::<Result<Vec<_>>>()?
                .join(","),
        };

        let mut sql = format!("SELECT {projection} FROM {from}");
        let mut params = Vec::with_capacity(self.predicates.len());
        let mut clauses = Vec::with_capacity(self.predicates.len());

        for predicate in self.predicates {
            let n = params.len() + 1;
            match predicate {
                Predicate::Like { column, pattern } => {
                    let column = qualify(&column)?;
                    if self.modifiers.lower {
                        clauses.push(format!(
                            "regexp_replace(LOWER({column}::text), E'\\n', '', 'g') LIKE LOWER(${n})"
                        ));
                    } else {
                        clauses.push(format!(
                            "regexp_replace({column}::text, E'\\n', '', 'g') LIKE ${n}"
                        ));
                    }
                    params.push(SqlParam::Text(translate_wildcard(&pattern)));
                }
                Predicate::Equals { column, value } => {
                    let column = qualify(&column)?;
                    match &value {
                        SqlParam::Text(_) => clauses.push(format!("{column}::text = ${n}")),
                        SqlParam::Int(_) => clauses.push(format!("{column} = ${n}")),
                    }
                    params.push(value);
                }
            }
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        if !self.order_by.is_empty() && !self.modifiers.count {
            let order = self
                .order_by
                .iter()
                .map(|c| qualify(c))
                .collect::<Result<Vec<_>>>()?
                .join(",");
            sql.push_str(" ORDER BY ");
            sql.push_str(&order);
        }

        Ok(SelectStatement {
            sql,
            params,
            table: self.table,
            columns: self.columns,
            projection: self.projection,
            count: self.modifiers.count,
        })
    }
}

/// Builds an ad-hoc select: `predicates` are `(column, pattern)` wildcard
/// matches.
pub fn build_select(
    columns: Vec<String>,
    schema: &str,
    table: &str,
    predicates: &[(String, String)],
    modifiers: Modifiers,
) -> Result<SelectStatement> {
    SelectQuery::new(Some(schema), table)
        .columns(Columns::from_list(columns))
        .predicates(predicates.iter().map(|(column, pattern)| Predicate::Like {
            column: column.clone(),
            pattern: pattern.clone(),
        }))
        .modifiers(modifiers)
        .build()
}

// ── Result shaping ────────────────────────────────────────────

/// Raw rows as returned by the store, with the store's column names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResultShape {
    #[default]
    Columnar,
    Rows,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectResult {
    /// `table.column` to that column's values, in column order.
    Columns(Vec<(String, Vec<Value>)>),
    /// `table.column` to a count, one per requested column.
    Counts(Vec<(String, Value)>),
    Rows {
        columns: Vec<String>,
        data: Vec<Vec<Value>>,
    },
}

impl Serialize for SelectResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            SelectResult::Columns(columns) => {
                let mut map = serializer.serialize_map(Some(columns.len()))?;
                for (name, values) in columns {
                    map.serialize_entry(name, values)?;
                }
                map.end()
            }
            SelectResult::Counts(counts) => {
                let mut map = serializer.serialize_map(Some(counts.len()))?;
                for (name, count) in counts {
                    map.serialize_entry(name, count)?;
                }
                map.end()
            }
            SelectResult::Rows { columns, data } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("data", data)?;
                map.serialize_entry("columns", columns)?;
                map.end()
            }
        }
    }
}

/// Shapes raw rows for the caller. Count statements key their single row by
/// the requested column names rather than the store's `count` labels.
pub fn shape_result(statement: &SelectStatement, raw: QueryRows, shape: ResultShape) -> SelectResult {
    let label = |column: &str| format!("{}.{column}", statement.table);

    if statement.count && shape == ResultShape::Columnar {
        let requested = match &statement.columns {
            Columns::All => vec!["*".to_string()],
            Columns::List(cols) => cols.clone(),
        };
        let first = raw.rows.into_iter().next().unwrap_or_default();
        return SelectResult::Counts(
            requested
                .iter()
                .enumerate()
                .map(|(pos, col)| (label(col), first.get(pos).cloned().unwrap_or(Value::Null)))
                .collect(),
        );
    }

    match shape {
        ResultShape::Rows => SelectResult::Rows {
            columns: raw.columns.iter().map(|c| label(c)).collect(),
            data: raw.rows,
        },
        ResultShape::Columnar => {
            let mut columns: Vec<(String, Vec<Value>)> = raw
                .columns
                .iter()
                .map(|c| (label(c), Vec::with_capacity(raw.rows.len())))
                .collect();
            for row in raw.rows {
                for (slot, value) in columns.iter_mut().zip(row) {
                    slot.1.push(value);
                }
            }
            SelectResult::Columns(columns)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn quote_identifier_rejects_quotes() {
        assert_eq!(quote_identifier("Entry_ID").unwrap(), "\"Entry_ID\"");
        assert!(matches!(
            quote_identifier("x\"; DROP TABLE y; --"),
            Err(BmrbError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn rejects_quoted_names_anywhere() {
        let bad_column = build_select(
            vec!["ok".into(), "bad\"col".into()],
            "macromolecules",
            "Entry",
            &[],
            Modifiers::default(),
        );
        assert!(matches!(bad_column, Err(BmrbError::InvalidIdentifier(_))));

        let bad_table = build_select(vec![], "macromolecules", "En\"try", &[], Modifiers::default());
        assert!(matches!(bad_table, Err(BmrbError::InvalidIdentifier(_))));

        let bad_schema = build_select(vec![], "macro\"", "Entry", &[], Modifiers::default());
        assert!(matches!(bad_schema, Err(BmrbError::InvalidIdentifier(_))));

        let bad_predicate = build_select(
            vec![],
            "macromolecules",
            "Entry",
            &[("Ti\"tle".into(), "x".into())],
            Modifiers::default(),
        );
        assert!(matches!(bad_predicate, Err(BmrbError::InvalidIdentifier(_))));
    }

    #[test]
    fn wildcard_predicates_are_bound() {
        let stmt = build_select(
            vec!["ID".into(), "Title".into()],
            "macromolecules",
            "Entry",
            &[("Title".into(), "*ubiquitin*".into())],
            Modifiers::default(),
        )
        .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT \"ID\",\"Title\" FROM \"macromolecules\".\"Entry\" \
             WHERE regexp_replace(\"Entry\".\"Title\"::text, E'\\n', '', 'g') LIKE $1"
        );
        assert_eq!(stmt.params, vec![SqlParam::Text("%ubiquitin%".into())]);
    }

    #[test]
    fn lower_modifier_matches_case_insensitively() {
        let stmt = build_select(
            vec!["*".into()],
            "metabolomics",
            "Entry",
            &[("Title".into(), "Glucose".into())],
            Modifiers::parse(["lower", "sparkle"]),
        )
        .unwrap();
        assert!(stmt.sql.starts_with("SELECT * FROM"));
        assert!(stmt.sql.contains("LOWER(\"Entry\".\"Title\"::text)"));
        assert!(stmt.sql.ends_with("LIKE LOWER($1)"));
    }

    #[test]
    fn count_modifier_wraps_columns() {
        let stmt = build_select(
            vec!["ID".into(), "Title".into()],
            "macromolecules",
            "Entry",
            &[],
            Modifiers::parse(["count"]),
        )
        .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT count(\"ID\"),count(\"Title\") FROM \"macromolecules\".\"Entry\""
        );
        assert!(stmt.count);
    }

    #[test]
    fn equality_and_ordering_for_reconstruction() {
        let stmt = SelectQuery::new(Some("chemcomps"), "Chem_comp_atom")
            .columns(Columns::List(vec!["Atom_ID".into(), "Ordinal".into()]))
            .equals("Sf_ID", SqlParam::Int(7))
            .order_by(["Ordinal".to_string()])
            .projection(Projection::Text)
            .build()
            .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT \"Atom_ID\"::text AS \"Atom_ID\",\"Ordinal\"::text AS \"Ordinal\" \
             FROM \"chemcomps\".\"Chem_comp_atom\" WHERE \"Chem_comp_atom\".\"Sf_ID\" = $1 \
             ORDER BY \"Chem_comp_atom\".\"Ordinal\""
        );

        let root = SelectQuery::new(Some("chemcomps"), "Chem_comp")
            .columns(Columns::List(vec!["Sf_ID".into(), "Formula_weight".into()]))
            .equals("ID", SqlParam::Text("ALA".into()))
            .order_by(["Sf_ID".to_string()])
            .projection(Projection::Text)
            .build()
            .unwrap();
        assert_eq!(
            root.sql,
            "SELECT \"Sf_ID\"::text AS \"Sf_ID\",\"Formula_weight\"::text AS \"Formula_weight\" \
             FROM \"chemcomps\".\"Chem_comp\" WHERE \"Chem_comp\".\"ID\"::text = $1 \
             ORDER BY \"Chem_comp\".\"Sf_ID\""
        );
    }

    #[test]
    fn multi_column_order_keeps_every_column() {
        let stmt = SelectQuery::new(Some("macromolecules"), "T")
            .columns(Columns::List(vec!["A".into(), "B".into()]))
            .equals("Sf_ID", SqlParam::Int(1))
            .order_by(["A".to_string(), "B".to_string()])
            .projection(Projection::Text)
            .build()
            .unwrap();
        assert!(stmt.sql.ends_with("ORDER BY \"T\".\"A\",\"T\".\"B\""), "{}", stmt.sql);
    }

    #[test]
    fn shapes_columnar_and_row_results() {
        let stmt = build_select(vec![], "macromolecules", "Entry", &[], Modifiers::default()).unwrap();
        let raw = QueryRows {
            columns: vec!["ID".into(), "Title".into()],
            rows: vec![vec![json!("1"), json!("a")], vec![json!("2"), json!("b")]],
        };

        let columnar = shape_result(&stmt, raw.clone(), ResultShape::Columnar);
        assert_eq!(
            serde_json::to_value(&columnar).unwrap(),
            json!({"Entry.ID": ["1", "2"], "Entry.Title": ["a", "b"]})
        );

        let rows = shape_result(&stmt, raw, ResultShape::Rows);
        assert_eq!(
            rows,
            SelectResult::Rows {
                columns: vec!["Entry.ID".into(), "Entry.Title".into()],
                data: vec![vec![json!("1"), json!("a")], vec![json!("2"), json!("b")]],
            }
        );
    }

    #[test]
    fn shapes_counts_by_requested_column() {
        let stmt = build_select(
            vec!["ID".into()],
            "macromolecules",
            "Entry",
            &[],
            Modifiers::parse(["count"]),
        )
        .unwrap();
        let raw = QueryRows {
            columns: vec!["count".into()],
            rows: vec![vec![json!(42)]],
        };
        assert_eq!(
            shape_result(&stmt, raw, ResultShape::Columnar),
            SelectResult::Counts(vec![("Entry.ID".into(), json!(42))])
        );
    }
}
