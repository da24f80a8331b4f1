//! Natural ordering for entry identifiers: digit runs compare as integers,
//! everything else compares case-insensitively.

use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;

static DIGIT_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9]+").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
enum Chunk {
    Text(String),
    Number(u128),
}

impl PartialOrd for Chunk {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Chunk {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Chunk::Number(a), Chunk::Number(b)) => a.cmp(b),
            (Chunk::Text(a), Chunk::Text(b)) => a.cmp(b),
            // Numbers sort ahead of text, e.g. "15000" < "bmse000001".
            (Chunk::Number(_), Chunk::Text(_)) => Ordering::Less,
            (Chunk::Text(_), Chunk::Number(_)) => Ordering::Greater,
        }
    }
}

fn natural_key(s: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut last = 0;

    for run in DIGIT_RUN.find_iter(s) {
        if run.start() > last {
            chunks.push(Chunk::Text(s[last..run.start()].to_lowercase()));
        }
        // Runs too long for u128 fall back to text comparison.
        match run.as_str().parse::<u128>() {
            Ok(n) => chunks.push(Chunk::Number(n)),
            Err(_) => chunks.push(Chunk::Text(run.as_str().to_string())),
        }
        last = run.end();
    }
    if last < s.len() {
        chunks.push(Chunk::Text(s[last..].to_lowercase()));
    }

    chunks
}

pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    natural_key(a).cmp(&natural_key(b)).then_with(|| a.cmp(b))
}

/// Sorts identifiers naturally and drops exact duplicates.
pub fn natural_sort(ids: &mut Vec<String>) {
    ids.sort_by(|a, b| natural_cmp(a, b));
    ids.dedup();
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sorted(input: &[&str]) -> Vec<String> {
        let mut ids: Vec<String> = input.iter().map(|s| s.to_string()).collect();
        natural_sort(&mut ids);
        ids
    }

    #[test]
    fn numeric_runs_compare_as_integers() {
        assert_eq!(sorted(&["23", "2", "12"]), vec!["2", "12", "23"]);
        assert_eq!(sorted(&["12", "23", "2"]), vec!["2", "12", "23"]);
    }

    #[test]
    fn mixed_identifiers() {
        assert_eq!(
            sorted(&["bmse000010", "bmse000002", "bmst000001"]),
            vec!["bmse000002", "bmse000010", "bmst000001"]
        );
        assert_eq!(
            sorted(&["chemcomp_ALA", "chemcomp_0G", "chemcomp_10A"]),
            vec!["chemcomp_0G", "chemcomp_10A", "chemcomp_ALA"]
        );
    }

    #[test]
    fn case_insensitive_but_total() {
        assert_eq!(natural_cmp("abc", "ABC"), "abc".cmp("ABC"));
        assert_eq!(natural_cmp("a2", "A10"), Ordering::Less);
    }

    #[test]
    fn removes_duplicates() {
        assert_eq!(sorted(&["5", "5", "4"]), vec!["4", "5"]);
    }
}
