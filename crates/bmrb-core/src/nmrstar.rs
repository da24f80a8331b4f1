//! NMR-STAR reader
//!
//! Parses the flat-file form of an entry into an [`Entry`]. Covers the
//! subset of STAR the archive files use: one `data_` block containing
//! `save_` frames, each with tag/value pairs and `loop_ ... stop_` tables.
//! Values may be bare, single/double quoted, or semicolon-delimited text
//! blocks.

use std::iter::Peekable;

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till1, take_until},
    character::complete::{char, multispace1, not_line_ending},
    combinator::{recognize, value},
    error::{Error as NomError, ErrorKind},
    multi::many0_count,
    sequence::pair,
    IResult,
};

use crate::document::{DataTable, Document, Entry};
use crate::error::{BmrbError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Data(&'a str),
    SaveStart(&'a str),
    SaveEnd,
    Loop,
    Stop,
    Tag(&'a str),
    Value(&'a str),
}

impl Token<'_> {
    fn describe(&self) -> String {
        match self {
            Token::Data(name) => format!("data_{name}"),
            Token::SaveStart(name) => format!("save_{name}"),
            Token::SaveEnd => "save_".to_string(),
            Token::Loop => "loop_".to_string(),
            Token::Stop => "stop_".to_string(),
            Token::Tag(tag) => format!("tag {tag}"),
            Token::Value(v) => format!("value '{v}'"),
        }
    }
}

/// Parses NMR-STAR text into an entry.
pub fn parse_entry(source: &str) -> Result<Entry> {
    let tokens = tokenize(source)?;
    let mut tokens = tokens.into_iter().peekable();

    let entry_id = match tokens.next() {
        Some((_, Token::Data(name))) => name,
        Some((offset, other)) => {
            return Err(parse_error(
                source,
                offset,
                format!("expected a data_ block, found {}", other.describe()),
            ))
        }
        None => return Err(parse_error(source, 0, "empty NMR-STAR file")),
    };

    let mut entry = Entry::new(entry_id);
    while let Some((offset, token)) = tokens.next() {
        match token {
            Token::SaveStart(name) => {
                let document = parse_frame(source, name, &mut tokens)?;
                entry.documents.push(document);
            }
            other => {
                return Err(parse_error(
                    source,
                    offset,
                    format!("unexpected {} outside of a saveframe", other.describe()),
                ))
            }
        }
    }

    Ok(entry)
}

fn parse_frame<'a, I>(source: &str, name: &str, tokens: &mut Peekable<I>) -> Result<Document>
where
    I: Iterator<Item = (usize, Token<'a>)>,
{
    let mut document = Document::new(name, "", "");

    loop {
        let Some((offset, token)) = tokens.next() else {
            return Err(parse_error(
                source,
                source.len(),
                format!("saveframe {name} is not terminated"),
            ));
        };

        match token {
            Token::SaveEnd => break,
            Token::Tag(tag) => {
                let (prefix, field) = split_tag(source, offset, tag)?;
                if document.tag_prefix.is_empty() {
                    document.tag_prefix = prefix.to_string();
                }
                match tokens.next() {
                    Some((_, Token::Value(v))) => document.add_field(field, v),
                    _ => {
                        return Err(parse_error(source, offset, format!("tag {tag} has no value")))
                    }
                }
            }
            Token::Loop => document.tables.push(parse_loop(source, offset, tokens)?),
            other => {
                return Err(parse_error(
                    source,
                    offset,
                    format!("unexpected {} in saveframe {name}", other.describe()),
                ))
            }
        }
    }

    document.category = document.field("Sf_category").unwrap_or_default().to_string();
    Ok(document)
}

fn parse_loop<'a, I>(source: &str, loop_offset: usize, tokens: &mut Peekable<I>) -> Result<DataTable>
where
    I: Iterator<Item = (usize, Token<'a>)>,
{
    let mut category: Option<&str> = None;
    let mut columns = Vec::new();

    while let Some(&(offset, Token::Tag(tag))) = tokens.peek() {
        tokens.next();
        let (prefix, field) = split_tag(source, offset, tag)?;
        match category {
            None => category = Some(prefix),
            Some(existing) if existing != prefix => {
                return Err(parse_error(
                    source,
                    offset,
                    format!("tag {tag} does not belong to loop {existing}"),
                ))
            }
            Some(_) => {}
        }
        columns.push(field.to_string());
    }

    let Some(category) = category else {
        return Err(parse_error(source, loop_offset, "loop_ without tags"));
    };

    let mut values = Vec::new();
    loop {
        match tokens.next() {
            Some((_, Token::Value(v))) => values.push(v.to_string()),
            Some((_, Token::Stop)) => break,
            Some((offset, other)) => {
                return Err(parse_error(
                    source,
                    offset,
                    format!("unexpected {} in loop {category}", other.describe()),
                ))
            }
            None => {
                return Err(parse_error(
                    source,
                    source.len(),
                    format!("loop {category} is not terminated by stop_"),
                ))
            }
        }
    }

    if values.len() % columns.len() != 0 {
        return Err(parse_error(
            source,
            loop_offset,
            format!(
                "loop {category} has {} values, not a multiple of its {} tags",
                values.len(),
                columns.len()
            ),
        ));
    }

    let mut table = DataTable::new(category, columns);
    table.rows = values
        .chunks(table.columns.len())
        .map(<[String]>::to_vec)
        .collect();
    Ok(table)
}

fn split_tag<'a>(source: &str, offset: usize, tag: &'a str) -> Result<(&'a str, &'a str)> {
    tag.split_once('.')
        .filter(|(_, field)| !field.is_empty())
        .ok_or_else(|| parse_error(source, offset, format!("tag {tag} has no category")))
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token<'_>)>> {
    let mut tokens = Vec::new();
    let mut input = source;

    loop {
        let (rest, ()) = skip_insignificant(input)
            .map_err(|_| parse_error(source, source.len() - input.len(), "unreadable input"))?;
        if rest.is_empty() {
            break;
        }

        let offset = source.len() - rest.len();
        let at_line_start = offset == 0 || source.as_bytes()[offset - 1] == b'\n';
        let (next, token) = token(rest, at_line_start)
            .map_err(|_| parse_error(source, offset, "unterminated value"))?;
        tokens.push((offset, token));
        input = next;
    }

    Ok(tokens)
}

fn token(input: &str, at_line_start: bool) -> IResult<&str, Token<'_>> {
    if at_line_start && input.starts_with(';') {
        let (rest, text) = semicolon_block(input)?;
        return Ok((rest, Token::Value(text)));
    }
    if input.starts_with('\'') || input.starts_with('"') {
        let (rest, text) = quoted(input)?;
        return Ok((rest, Token::Value(text)));
    }
    let (rest, word) = take_till1(|c: char| c.is_whitespace())(input)?;
    Ok((rest, classify(word)))
}

fn classify(word: &str) -> Token<'_> {
    let lower = word.to_ascii_lowercase();
    if lower.starts_with("data_") {
        Token::Data(&word[5..])
    } else if lower == "save_" {
        Token::SaveEnd
    } else if lower.starts_with("save_") {
        Token::SaveStart(&word[5..])
    } else if lower == "loop_" {
        Token::Loop
    } else if lower == "stop_" {
        Token::Stop
    } else if word.starts_with('_') {
        Token::Tag(word)
    } else {
        Token::Value(word)
    }
}

fn comment(input: &str) -> IResult<&str, &str> {
    recognize(pair(char('#'), not_line_ending))(input)
}

fn skip_insignificant(input: &str) -> IResult<&str, ()> {
    value((), many0_count(alt((multispace1, comment))))(input)
}

/// `;` at the start of a line opens a text block closed by `;` at the start
/// of a later line. The line break after the opening `;` is not part of the
/// value.
fn semicolon_block(input: &str) -> IResult<&str, &str> {
    let (rest, _) = char(';')(input)?;
    let (rest, text) = take_until("\n;")(rest)?;
    let (rest, _) = tag("\n;")(rest)?;
    let text = text.strip_prefix("\r\n").or_else(|| text.strip_prefix('\n')).unwrap_or(text);
    Ok((rest, text))
}

/// A quote only closes the value when followed by whitespace or end of input,
/// so values like `'O5'' atom'` keep their embedded quotes.
fn quoted(input: &str) -> IResult<&str, &str> {
    let delim = match input.chars().next() {
        Some(c @ ('\'' | '"')) => c,
        _ => return Err(nom::Err::Error(NomError::new(input, ErrorKind::Char))),
    };
    let body = &input[1..];

    let mut search = 0;
    while let Some(pos) = body[search..].find(delim) {
        let end = search + pos;
        let after = &body[end + 1..];
        if after.is_empty() || after.starts_with(char::is_whitespace) {
            return Ok((after, &body[..end]));
        }
        search = end + 1;
    }

    Err(nom::Err::Failure(NomError::new(input, ErrorKind::Char)))
}

fn parse_error(source: &str, offset: usize, message: impl Into<String>) -> BmrbError {
    let offset = offset.min(source.len());
    BmrbError::Parse {
        line: source[..offset].matches('\n').count() + 1,
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"data_15000

save_entry_information
   _Entry.Sf_category   entry_information
   _Entry.ID            15000
   _Entry.Title
;
Backbone 1H, 13C and 15N assignments
;
   _Entry.Details       'It''s quoted'
   # a comment between tags
   loop_
      _Entry_author.Ordinal
      _Entry_author.Family_name
      _Entry_author.Given_name

      1   Smith   "John Q"
      2   Jones   .
   stop_
save_

save_assembly_1
   _Assembly.Sf_category  assembly
   _Assembly.Entity_ID    $entity_1
save_
"#;

    #[test]
    fn parses_frames_tags_and_loops() {
        let entry = parse_entry(SAMPLE).unwrap();
        assert_eq!(entry.entry_id, "15000");
        assert_eq!(entry.documents.len(), 2);

        let info = &entry.documents[0];
        assert_eq!(info.name, "entry_information");
        assert_eq!(info.category, "entry_information");
        assert_eq!(info.tag_prefix, "_Entry");
        assert_eq!(info.field("ID"), Some("15000"));
        assert_eq!(
            info.field("Title"),
            Some("Backbone 1H, 13C and 15N assignments")
        );
        assert_eq!(info.field("Details"), Some("It''s quoted"));

        let authors = info.table("Entry_author").unwrap();
        assert_eq!(authors.columns, vec!["Ordinal", "Family_name", "Given_name"]);
        assert_eq!(
            authors.rows,
            vec![
                vec!["1".to_string(), "Smith".to_string(), "John Q".to_string()],
                vec!["2".to_string(), "Jones".to_string(), ".".to_string()],
            ]
        );

        assert_eq!(entry.documents[1].field("Entity_ID"), Some("$entity_1"));
    }

    #[test]
    fn rejects_ragged_loop() {
        let text = "data_1\nsave_a\n_A.Sf_category a\nloop_\n_B.X\n_B.Y\n1 2 3\nstop_\nsave_\n";
        let err = parse_entry(text).unwrap_err();
        assert!(matches!(err, BmrbError::Parse { line: 4, .. }), "{err}");
    }

    #[test]
    fn rejects_unterminated_frame() {
        let err = parse_entry("data_1\nsave_a\n_A.Sf_category a\n").unwrap_err();
        assert!(matches!(err, BmrbError::Parse { .. }));
    }

    #[test]
    fn rejects_missing_data_block() {
        let err = parse_entry("save_a\nsave_\n").unwrap_err();
        assert!(matches!(err, BmrbError::Parse { line: 1, .. }));
        assert!(parse_entry("   # only a comment\n").is_err());
    }

    #[test]
    fn rejects_unterminated_quote() {
        let err = parse_entry("data_1\nsave_a\n_A.B 'open\nsave_\n").unwrap_err();
        assert!(matches!(err, BmrbError::Parse { line: 3, .. }));
    }
}
