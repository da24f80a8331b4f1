//! Logical partitions of the cache and identifier space.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BmrbError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Macromolecules,
    Metabolomics,
    Chemcomps,
    /// Entries uploaded by users; kept with a sliding expiration.
    Uploaded,
    /// Union view of the three archive namespaces. Only its identifier list
    /// is published; entries stay in their own namespace.
    Combined,
}

impl Namespace {
    /// Namespaces the reload pipeline can rebuild, in publish order.
    pub const RELOADABLE: [Namespace; 3] = [
        Namespace::Metabolomics,
        Namespace::Macromolecules,
        Namespace::Chemcomps,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Macromolecules => "macromolecules",
            Self::Metabolomics => "metabolomics",
            Self::Chemcomps => "chemcomps",
            Self::Uploaded => "uploaded",
            Self::Combined => "combined",
        }
    }

    /// Relational schema holding this namespace's tables.
    pub fn schema(&self) -> Option<&'static str> {
        match self {
            Self::Uploaded => None,
            other => Some(other.as_str()),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Uploaded)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = BmrbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "macromolecules" => Ok(Self::Macromolecules),
            "metabolomics" => Ok(Self::Metabolomics),
            "chemcomps" => Ok(Self::Chemcomps),
            "uploaded" => Ok(Self::Uploaded),
            "combined" => Ok(Self::Combined),
            other => Err(BmrbError::InvalidRequest(format!("Invalid database: {other}."))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_namespace_name() {
        for ns in [
            Namespace::Macromolecules,
            Namespace::Metabolomics,
            Namespace::Chemcomps,
            Namespace::Uploaded,
            Namespace::Combined,
        ] {
            assert_eq!(ns.as_str().parse::<Namespace>().unwrap(), ns);
        }
        assert!("nope".parse::<Namespace>().is_err());
    }

    #[test]
    fn uploaded_has_no_schema() {
        assert_eq!(Namespace::Uploaded.schema(), None);
        assert_eq!(Namespace::Chemcomps.schema(), Some("chemcomps"));
        assert!(Namespace::Uploaded.is_transient());
        assert!(!Namespace::Macromolecules.is_transient());
    }
}
