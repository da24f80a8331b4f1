//! Schema Directory
//!
//! In-memory view of the NMR-STAR meta-schema: which fields exist per tag
//! category, whether they are shown, whether they point at other sections,
//! and whether they order loop rows. Built once from the dictionary tables
//! and then shared read-only; the dictionary only changes with a schema
//! version upgrade.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::document::TagName;
use crate::error::{BmrbError, Result};
use crate::namespace::Namespace;

/// Dictionary print flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrintFlag {
    Yes,
    Optional,
    No,
}

impl PrintFlag {
    pub fn from_flag(flag: &str) -> Self {
        match flag.trim() {
            "Y" | "y" => Self::Yes,
            "O" | "o" => Self::Optional,
            _ => Self::No,
        }
    }

    pub fn is_printable(&self) -> bool {
        !matches!(self, Self::No)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Tag category (also the backing table name), e.g. `Entity_atom_list`.
    pub category: String,
    /// Field name within the category, e.g. `Atom_ID`.
    pub name: String,
    /// Section (saveframe) category that owns the tag category.
    pub section: String,
    pub internal: bool,
    pub print: PrintFlag,
    pub pointer: bool,
    pub orders_rows: bool,
    pub entry_id: bool,
    /// Whether the category is a loop rather than the section's root tags.
    pub looped: bool,
    pub dictionary_seq: i64,
}

impl FieldDescriptor {
    pub fn qualified_name(&self) -> String {
        format!("_{}.{}", self.category, self.name)
    }

    pub fn is_visible(&self) -> bool {
        !self.internal && self.print.is_printable()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionDescriptor {
    pub category: String,
    pub internal: bool,
    pub print: PrintFlag,
    /// Root (non-loop) tag category, which is also the backing table.
    pub table: String,
}

impl SectionDescriptor {
    pub fn is_printable(&self) -> bool {
        !self.internal && self.print.is_printable()
    }
}

/// One row of the section group table (`dict.cat_grp`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionGroup {
    pub category: String,
    pub internal: bool,
    pub print: PrintFlag,
}

/// Chemical components key their tables on component IDs rather than the
/// dictionary's entry ID tag.
const CHEMCOMP_ID_FIELDS: &[(&str, &str)] = &[
    ("entity", "BMRB_code"),
    ("entity_comp_index", "Comp_ID"),
    ("chem_comp", "ID"),
    ("chem_comp_descriptor", "Comp_ID"),
    ("chem_comp_identifier", "Comp_ID"),
    ("chem_comp_atom", "Comp_ID"),
    ("chem_comp_bond", "Comp_ID"),
];

#[derive(Debug, Clone, Default)]
pub struct SchemaDirectory {
    /// Tag category -> fields in dictionary order.
    fields: HashMap<String, Vec<FieldDescriptor>>,
    sections: HashMap<String, SectionDescriptor>,
    /// Section category -> loop categories ordered by first dictionary sequence.
    children: HashMap<String, Vec<String>>,
    /// Lower-cased tag category -> entry ID field.
    entry_id_fields: HashMap<String, String>,
}

impl SchemaDirectory {
    /// Builds the directory from dictionary rows. Sections without any root
    /// tags are skipped; they have no backing table to read from.
    pub fn build(items: Vec<FieldDescriptor>, groups: Vec<SectionGroup>) -> Self {
        let mut fields: HashMap<String, Vec<FieldDescriptor>> = HashMap::new();
        let mut first_seq: HashMap<(String, String), i64> = HashMap::new();
        let mut tables: HashMap<String, String> = HashMap::new();
        let mut entry_id_fields = HashMap::new();

        for item in items {
            let key = (item.section.clone(), item.category.clone());
            first_seq
                .entry(key)
                .and_modify(|seq| *seq = (*seq).min(item.dictionary_seq))
                .or_insert(item.dictionary_seq);

            if !item.looped {
                tables
                    .entry(item.section.clone())
                    .or_insert_with(|| item.category.clone());
            }
            if item.entry_id {
                entry_id_fields
                    .entry(item.category.to_lowercase())
                    .or_insert_with(|| item.name.clone());
            }
            fields.entry(item.category.clone()).or_default().push(item);
        }

        for list in fields.values_mut() {
            list.sort_by_key(|f| f.dictionary_seq);
        }

        let mut children: HashMap<String, Vec<(i64, String)>> = HashMap::new();
        for ((section, category), seq) in first_seq {
            if tables.get(&section) == Some(&category) {
                continue;
            }
            children.entry(section).or_default().push((seq, category));
        }
        let children = children
            .into_iter()
            .map(|(section, mut cats)| {
                cats.sort();
                (section, cats.into_iter().map(|(_, c)| c).collect())
            })
            .collect();

        let mut sections = HashMap::new();
        for group in groups {
            let Some(table) = tables.get(&group.category) else {
                continue;
            };
            // First group row wins, matching `ORDER BY groupid`.
            sections
                .entry(group.category.clone())
                .or_insert_with(|| SectionDescriptor {
                    category: group.category,
                    internal: group.internal,
                    print: group.print,
                    table: table.clone(),
                });
        }

        Self {
            fields,
            sections,
            children,
            entry_id_fields,
        }
    }

    pub fn section(&self, category: &str) -> Result<&SectionDescriptor> {
        self.sections
            .get(category)
            .ok_or_else(|| BmrbError::NotFound(format!("unknown section category: {category}")))
    }

    pub fn is_printable(&self, section_category: &str) -> Result<bool> {
        Ok(self.section(section_category)?.is_printable())
    }

    pub fn table_for(&self, section_category: &str) -> Result<&str> {
        Ok(self.section(section_category)?.table.as_str())
    }

    /// Every field of a tag category in dictionary order, visible or not.
    pub fn fields_for(&self, category: &str) -> Result<&[FieldDescriptor]> {
        self.fields
            .get(category)
            .map(Vec::as_slice)
            .ok_or_else(|| BmrbError::NotFound(format!("unknown tag category: {category}")))
    }

    /// Fields that may be emitted: printable and not internal.
    pub fn printable_fields(&self, category: &str) -> Result<Vec<&FieldDescriptor>> {
        Ok(self
            .fields_for(category)?
            .iter()
            .filter(|f| f.is_visible())
            .collect())
    }

    pub fn pointer_fields(&self, category: &str) -> Result<BTreeSet<&str>> {
        Ok(self
            .fields_for(category)?
            .iter()
            .filter(|f| f.pointer)
            .map(|f| f.name.as_str())
            .collect())
    }

    pub fn field(&self, category: &str, name: &str) -> Option<&FieldDescriptor> {
        self.fields.get(category)?.iter().find(|f| f.name == name)
    }

    /// Loop categories belonging to a section, excluding its root category.
    pub fn child_categories(&self, section_category: &str) -> Result<&[String]> {
        self.section(section_category)?;
        Ok(self
            .children
            .get(section_category)
            .map(Vec::as_slice)
            .unwrap_or_default())
    }

    /// The field holding the logical entry ID for a tag category, which is
    /// not always `Entry_ID`.
    ///
    /// Accepts a bare category, a `_`-prefixed category, or a full tag name.
    pub fn entry_id_field(&self, tag_or_category: &str, namespace: Namespace) -> Result<String> {
        let category = match TagName::parse(tag_or_category) {
            Ok(tag) => tag.category,
            Err(_) => tag_or_category.replace('.', "").trim_start_matches('_').to_string(),
        };
        let lowered = category.to_lowercase();

        if namespace == Namespace::Chemcomps {
            return CHEMCOMP_ID_FIELDS
                .iter()
                .find(|(cat, _)| *cat == lowered)
                .map(|(_, field)| field.to_string())
                .ok_or_else(|| {
                    BmrbError::NotFound(format!("Unknown ID tag for tag: {tag_or_category}"))
                });
        }

        self.entry_id_fields.get(&lowered).cloned().ok_or_else(|| {
            BmrbError::NotFound(format!(
                "Invalid tag queried, unable to determine entryidflag for {tag_or_category}."
            ))
        })
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn field_count(&self) -> usize {
        self.fields.values().map(Vec::len).sum()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn print_flag_parsing() {
        assert_eq!(PrintFlag::from_flag("Y"), PrintFlag::Yes);
        assert_eq!(PrintFlag::from_flag("O"), PrintFlag::Optional);
        assert_eq!(PrintFlag::from_flag("N"), PrintFlag::No);
        assert_eq!(PrintFlag::from_flag(""), PrintFlag::No);
        assert!(PrintFlag::Optional.is_printable());
    }

    #[test]
    fn resolves_section_table_and_children() {
        let dir = entity_directory();
        assert_eq!(dir.table_for("entity").unwrap(), "Entity");
        assert_eq!(
            dir.child_categories("entity").unwrap(),
            &["Entity_atom_list", "Entity_comp_index", "Entity_hidden"]
        );
        assert!(dir.is_printable("entity").unwrap());
    }

    #[test]
    fn unknown_category_is_not_found() {
        let dir = entity_directory();
        assert!(matches!(dir.section("nope"), Err(BmrbError::NotFound(_))));
        assert!(matches!(dir.fields_for("Nope"), Err(BmrbError::NotFound(_))));
        assert!(matches!(dir.child_categories("nope"), Err(BmrbError::NotFound(_))));
    }

    #[test]
    fn printable_fields_follow_dictionary_order() {
        let dir = entity_directory();
        let names: Vec<&str> = dir
            .printable_fields("Entity")
            .unwrap()
            .into_iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["Sf_category", "BMRB_code", "Name", "Assembly_ID"]);
    }

    #[test]
    fn pointer_fields_are_collected() {
        let dir = entity_directory();
        let pointers = dir.pointer_fields("Entity").unwrap();
        assert_eq!(pointers.into_iter().collect::<Vec<_>>(), vec!["Assembly_ID"]);
        assert_eq!(
            dir.field("Entity", "Assembly_ID").unwrap().qualified_name(),
            "_Entity.Assembly_ID"
        );
    }

    #[test]
    fn entry_id_field_uses_dictionary_then_chemcomp_table() {
        let dir = entity_directory();
        assert_eq!(
            dir.entry_id_field("Entity", Namespace::Macromolecules).unwrap(),
            "BMRB_code"
        );
        assert_eq!(
            dir.entry_id_field("_Entity.Name", Namespace::Metabolomics).unwrap(),
            "BMRB_code"
        );
        assert_eq!(
            dir.entry_id_field("chem_comp", Namespace::Chemcomps).unwrap(),
            "ID"
        );
        assert_eq!(
            dir.entry_id_field("Chem_comp_atom", Namespace::Chemcomps).unwrap(),
            "Comp_ID"
        );
        assert!(dir.entry_id_field("Unknown", Namespace::Chemcomps).is_err());
        assert!(dir.entry_id_field("Unknown", Namespace::Macromolecules).is_err());
    }

    #[test]
    fn hidden_sections_are_not_printable() {
        let items = vec![field("internal_notes", "Internal_notes", "Text", 1)];
        let mut hidden = group("internal_notes");
        hidden.internal = true;
        let dir = SchemaDirectory::build(items, vec![hidden]);
        assert!(!dir.is_printable("internal_notes").unwrap());
    }
}
