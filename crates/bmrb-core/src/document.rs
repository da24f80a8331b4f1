//! Hierarchical entry model
//!
//! An [`Entry`] is an ordered list of [`Document`]s (NMR-STAR saveframes).
//! Each document carries ordered tag/value pairs and ordered [`DataTable`]s
//! (NMR-STAR loops). The serde layout matches the JSON the serving layer
//! reads back out of the cache.

use serde::{Deserialize, Serialize};

use crate::error::{BmrbError, Result};

/// NMR-STAR null value, used wherever the store returned NULL.
pub const NULL_VALUE: &str = ".";

/// Prefix marking a value as a reference to another section's identifier.
pub const POINTER_SIGIL: char = '$';

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub entry_id: String,
    #[serde(rename = "saveframes", default)]
    pub documents: Vec<Document>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Frame code; the section's human-readable identifier.
    pub name: String,
    pub category: String,
    pub tag_prefix: String,
    #[serde(rename = "tags", default)]
    pub fields: Vec<(String, String)>,
    #[serde(rename = "loops", default)]
    pub tables: Vec<DataTable>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTable {
    /// Loop category including the leading underscore, e.g. `_Entity_atom_list`.
    pub category: String,
    #[serde(rename = "tags")]
    pub columns: Vec<String>,
    #[serde(rename = "data", default)]
    pub rows: Vec<Vec<String>>,
}

/// Marks `value` as a pointer. NULL stays NULL; there is nothing to point at.
pub fn pointer_value(value: &str) -> String {
    if value == NULL_VALUE {
        value.to_string()
    } else {
        format!("{POINTER_SIGIL}{value}")
    }
}

/// Adds the leading underscore NMR-STAR uses for categories, if missing.
pub fn format_category(category: &str) -> String {
    if category.starts_with('_') {
        category.to_string()
    } else {
        format!("_{category}")
    }
}

impl Entry {
    pub fn new(entry_id: impl Into<String>) -> Self {
        Self {
            entry_id: entry_id.into(),
            documents: Vec::new(),
        }
    }

    pub fn documents_by_category<'a>(
        &'a self,
        category: &'a str,
    ) -> impl Iterator<Item = &'a Document> + 'a {
        self.documents.iter().filter(move |d| d.category == category)
    }

    pub fn document_by_name(&self, name: &str) -> Option<&Document> {
        self.documents.iter().find(|d| d.name == name)
    }

    /// Every table in the entry whose category matches, in document order.
    pub fn tables_by_category<'a>(
        &'a self,
        category: &'a str,
    ) -> impl Iterator<Item = &'a DataTable> + 'a {
        let wanted = format_category(category);
        self.documents
            .iter()
            .flat_map(|d| d.tables.iter())
            .filter(move |t| t.category.eq_ignore_ascii_case(&wanted))
    }

    /// Looks up every value of a fully qualified tag, whether it lives in a
    /// document's root fields or in a table column.
    pub fn tag_values(&self, tag: &TagName) -> Vec<&str> {
        let prefix = format_category(&tag.category);
        let mut values = Vec::new();

        for document in &self.documents {
            if document.tag_prefix.eq_ignore_ascii_case(&prefix) {
                values.extend(
                    document
                        .fields
                        .iter()
                        .filter(|(name, _)| name.eq_ignore_ascii_case(&tag.tag))
                        .map(|(_, v)| v.as_str()),
                );
            }
            for table in &document.tables {
                if !table.category.eq_ignore_ascii_case(&prefix) {
                    continue;
                }
                if let Some(pos) = table.column_index(&tag.tag) {
                    values.extend(table.rows.iter().filter_map(|row| row.get(pos)).map(String::as_str));
                }
            }
        }

        values
    }
}

impl Document {
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        tag_prefix: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            tag_prefix: tag_prefix.into(),
            fields: Vec::new(),
            tables: Vec::new(),
        }
    }

    pub fn add_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn table(&self, category: &str) -> Option<&DataTable> {
        let wanted = format_category(category);
        self.tables.iter().find(|t| t.category == wanted)
    }

    pub fn remove_table(&mut self, category: &str) -> Option<DataTable> {
        let wanted = format_category(category);
        let pos = self.tables.iter().position(|t| t.category == wanted)?;
        Some(self.tables.remove(pos))
    }
}

impl DataTable {
    pub fn new(category: &str, columns: Vec<String>) -> Self {
        Self {
            category: format_category(category),
            columns,
            rows: Vec::new(),
        }
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
    }

    /// Appends a row; it must have exactly one value per column.
    pub fn push_row(&mut self, row: Vec<String>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(BmrbError::ServerError(format!(
                "row for {} has {} values but the table has {} columns",
                self.category,
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A fully qualified tag name such as `_Entry.Title`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagName {
    pub category: String,
    pub tag: String,
}

impl TagName {
    /// Splits a tag into category and field.
    ///
    /// Quote characters are rejected here because the parts end up quoted
    /// into SQL by callers.
    pub fn parse(tag_name: &str) -> Result<Self> {
        if tag_name.contains('"') {
            return Err(BmrbError::InvalidIdentifier(
                "Tags cannot contain a '\"'.".to_string(),
            ));
        }

        let trimmed = tag_name.strip_prefix('_').unwrap_or(tag_name);
        let parts: Vec<&str> = trimmed.split('.').collect();
        match parts.as_slice() {
            [category, tag] if !category.is_empty() && !tag.is_empty() => Ok(Self {
                category: category.to_string(),
                tag: tag.to_string(),
            }),
            [_] => Err(BmrbError::InvalidRequest(
                "You must provide a full tag name with category included. For example: \
                 Entry.Experimental_method_subtype"
                    .to_string(),
            )),
            _ => Err(BmrbError::InvalidRequest(
                "You provided an invalid tag. NMR-STAR tags only contain one period.".to_string(),
            )),
        }
    }

    pub fn qualified(&self) -> String {
        format!("_{}.{}", self.category, self.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_entry() -> Entry {
        let mut info = Document::new("entry_information", "entry_information", "_Entry");
        info.add_field("Sf_category", "entry_information");
        info.add_field("Title", "Backbone assignments");

        let mut authors = DataTable::new("Entry_author", vec!["Ordinal".into(), "Family_name".into()]);
        authors.push_row(vec!["1".into(), "Smith".into()]).unwrap();
        authors.push_row(vec!["2".into(), "Jones".into()]).unwrap();
        info.tables.push(authors);

        let mut entity = Document::new("entity_1", "entity", "_Entity");
        entity.add_field("Name", "ubiquitin");

        Entry {
            entry_id: "15000".into(),
            documents: vec![info, entity],
        }
    }

    #[test]
    fn pointer_value_prefixes_sigil() {
        assert_eq!(pointer_value("X"), "$X");
        assert_eq!(pointer_value(NULL_VALUE), NULL_VALUE);
    }

    #[test]
    fn tag_name_parse_variants() {
        let tag = TagName::parse("_Entry.Title").unwrap();
        assert_eq!(tag.category, "Entry");
        assert_eq!(tag.tag, "Title");
        assert_eq!(tag.qualified(), "_Entry.Title");

        assert!(TagName::parse("Entry.Title").is_ok());
        assert!(matches!(
            TagName::parse("Entry"),
            Err(BmrbError::InvalidRequest(_))
        ));
        assert!(matches!(
            TagName::parse("Entry.Title.More"),
            Err(BmrbError::InvalidRequest(_))
        ));
        assert!(matches!(
            TagName::parse("Entry.\"Title"),
            Err(BmrbError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn tag_values_reads_fields_and_columns() {
        let entry = sample_entry();
        let title = TagName::parse("Entry.Title").unwrap();
        assert_eq!(entry.tag_values(&title), vec!["Backbone assignments"]);

        let names = TagName::parse("_Entry_author.Family_name").unwrap();
        assert_eq!(entry.tag_values(&names), vec!["Smith", "Jones"]);
    }

    #[test]
    fn navigation_helpers() {
        let mut entry = sample_entry();
        assert_eq!(entry.documents_by_category("entity").count(), 1);
        assert_eq!(entry.tables_by_category("Entry_author").count(), 1);
        assert!(entry.document_by_name("entity_1").is_some());

        let removed = entry.documents[0].remove_table("Entry_author");
        assert!(removed.is_some());
        assert!(entry.documents[0].table("Entry_author").is_none());
    }

    #[test]
    fn push_row_rejects_wrong_width() {
        let mut table = DataTable::new("_Atom", vec!["A".into(), "B".into()]);
        assert!(table.push_row(vec!["1".into()]).is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn serializes_in_cached_layout() {
        let entry = sample_entry();
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["entry_id"], "15000");
        assert_eq!(json["saveframes"][0]["tags"][1][0], "Title");
        assert_eq!(json["saveframes"][0]["loops"][0]["category"], "_Entry_author");
        assert_eq!(json["saveframes"][0]["loops"][0]["data"][1][1], "Jones");
    }
}
