//! Loads the [`SchemaDirectory`] from the NMR-STAR dictionary tables.

use bmrb_core::error::{BmrbError, Result};
use bmrb_core::schema::{FieldDescriptor, PrintFlag, SchemaDirectory, SectionGroup};
use sqlx::PgPool;

/// One row of `dict.adit_item_tbl` joined with its print flag.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DictItemRow {
    pub tagcategory: String,
    pub tagfield: String,
    pub originalcategory: String,
    pub internalflag: Option<String>,
    pub printflag: Option<String>,
    pub sfpointerflg: Option<String>,
    pub rowindexflg: Option<String>,
    pub entryidflg: Option<String>,
    pub loopflag: Option<String>,
    pub dictionaryseq: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CategoryGroupRow {
    pub sfcategory: String,
    pub internalflag: Option<String>,
    pub printflag: Option<String>,
}

fn is_yes(flag: &Option<String>) -> bool {
    matches!(flag.as_deref().map(str::trim), Some("Y") | Some("y"))
}

impl From<DictItemRow> for FieldDescriptor {
    fn from(row: DictItemRow) -> Self {
        Self {
            internal: is_yes(&row.internalflag),
            print: row
                .printflag
                .as_deref()
                .map(PrintFlag::from_flag)
                .unwrap_or(PrintFlag::No),
            pointer: is_yes(&row.sfpointerflg),
            orders_rows: is_yes(&row.rowindexflg),
            entry_id: is_yes(&row.entryidflg),
            looped: is_yes(&row.loopflag),
            category: row.tagcategory,
            name: row.tagfield,
            section: row.originalcategory,
            dictionary_seq: row.dictionaryseq,
        }
    }
}

impl From<CategoryGroupRow> for SectionGroup {
    fn from(row: CategoryGroupRow) -> Self {
        Self {
            internal: is_yes(&row.internalflag),
            print: row
                .printflag
                .as_deref()
                .map(PrintFlag::from_flag)
                .unwrap_or(PrintFlag::No),
            category: row.sfcategory,
        }
    }
}

/// Reads the whole dictionary once. The result is meant to be wrapped in an
/// `Arc` and shared for the lifetime of the process.
pub async fn load_schema_directory(pool: &PgPool) -> Result<SchemaDirectory> {
    let items = sqlx::query_as::<_, DictItemRow>(
        r#"
        SELECT a.tagcategory::text      AS tagcategory,
               a.tagfield::text         AS tagfield,
               a.originalcategory::text AS originalcategory,
               a.internalflag::text     AS internalflag,
               p.printflag::text        AS printflag,
               a.sfpointerflg::text     AS sfpointerflg,
               a.rowindexflg::text      AS rowindexflg,
               a.entryidflg::text       AS entryidflg,
               a.loopflag::text         AS loopflag,
               a.dictionaryseq::bigint  AS dictionaryseq
        FROM dict.adit_item_tbl a
        LEFT JOIN dict.validator_printflags p ON p.dictionaryseq = a.dictionaryseq
        ORDER BY a.dictionaryseq
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(|e| BmrbError::ServerError(format!("loading dictionary items: {e}")))?;

    let groups = sqlx::query_as::<_, CategoryGroupRow>(
        r#"
        SELECT sfcategory::text   AS sfcategory,
               internalflag::text AS internalflag,
               printflag::text    AS printflag
        FROM dict.cat_grp
        ORDER BY groupid
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(|e| BmrbError::ServerError(format!("loading section groups: {e}")))?;

    let directory = SchemaDirectory::build(
        items.into_iter().map(FieldDescriptor::from).collect(),
        groups.into_iter().map(SectionGroup::from).collect(),
    );
    tracing::info!(
        sections = directory.section_count(),
        fields = directory.field_count(),
        "loaded schema directory"
    );
    Ok(directory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(flags: [Option<&str>; 6]) -> DictItemRow {
        let [internal, print, pointer, order, entry_id, looped] = flags.map(|f| f.map(str::to_string));
        DictItemRow {
            tagcategory: "Entity_comp_index".into(),
            tagfield: "Entity_ID".into(),
            originalcategory: "entity".into(),
            internalflag: internal,
            printflag: print,
            sfpointerflg: pointer,
            rowindexflg: order,
            entryidflg: entry_id,
            loopflag: looped,
            dictionaryseq: 42,
        }
    }

    #[test]
    fn decodes_dictionary_flags() {
        let field = FieldDescriptor::from(row([
            Some("N"),
            Some("O"),
            Some("Y"),
            Some("N"),
            None,
            Some("Y"),
        ]));
        assert!(!field.internal);
        assert_eq!(field.print, PrintFlag::Optional);
        assert!(field.pointer);
        assert!(!field.orders_rows);
        assert!(!field.entry_id);
        assert!(field.looped);
        assert!(field.is_visible());
        assert_eq!(field.qualified_name(), "_Entity_comp_index.Entity_ID");
    }

    #[test]
    fn missing_print_flag_hides_field() {
        let field = FieldDescriptor::from(row([None, None, None, Some("Y"), Some("Y"), None]));
        assert_eq!(field.print, PrintFlag::No);
        assert!(!field.is_visible());
        assert!(field.orders_rows);
        assert!(field.entry_id);
    }

    #[test]
    fn decodes_section_groups() {
        let group = SectionGroup::from(CategoryGroupRow {
            sfcategory: "entry_interview".into(),
            internalflag: Some("Y".into()),
            printflag: Some("N".into()),
        });
        assert!(group.internal);
        assert_eq!(group.print, PrintFlag::No);
    }
}
