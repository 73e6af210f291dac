//! Bulk record files and schema normalization.
//!
//! Corpus files come from many sources and rarely agree on field names. Each
//! record is an arbitrary JSON object; the three fields quire needs are found
//! by trying a prioritized list of aliases and taking the first non-blank
//! string.
//!
//! Two file layouts are accepted:
//! - JSON Lines (`.jsonl`, `.ndjson`): one object per line, read lazily.
//!   A line that does not parse is reported as a
//!   [`RetrieverError::MalformedRecord`] and the stream continues.
//! - A single JSON array of objects.
//!
//! Files with any other extension are sniffed: a leading `[` means array.

use crate::error::{Result, RetrieverError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// Field names accepted for the document id, in priority order.
pub const ID_ALIASES: &[&str] = &["id", "doc_id", "paperId", "uid", "uuid"];
/// Field names accepted for the title, in priority order.
pub const TITLE_ALIASES: &[&str] = &["title", "paper_title", "name"];
/// Field names accepted for the body text, in priority order.
pub const BODY_ALIASES: &[&str] = &[
    "abstract",
    "summary",
    "abstract_text",
    "text",
    "description",
    "body",
];

/// A corpus document. Identity is `doc_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    pub title: String,
    /// Body text (the paper abstract, for the default corpus).
    pub text: String,
}

/// The required field a record was missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingField {
    Id,
    Title,
    Body,
}

impl std::fmt::Display for MissingField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MissingField::Id => "id",
            MissingField::Title => "title",
            MissingField::Body => "body",
        };
        write!(f, "{name}")
    }
}

fn pick_string(obj: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    aliases.iter().find_map(|key| match obj.get(*key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}

fn pick_id(obj: &Map<String, Value>) -> Option<String> {
    ID_ALIASES.iter().find_map(|key| match obj.get(*key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Maps an arbitrary JSON object onto a [`Document`].
pub fn map_record(obj: &Map<String, Value>) -> std::result::Result<Document, MissingField> {
    let doc_id = pick_id(obj).ok_or(MissingField::Id)?;
    let title = pick_string(obj, TITLE_ALIASES).ok_or(MissingField::Title)?;
    let text = pick_string(obj, BODY_ALIASES).ok_or(MissingField::Body)?;
    Ok(Document {
        doc_id,
        title,
        text,
    })
}

/// Layout of a bulk record file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
    JsonLines,
    JsonArray,
}

impl RecordFormat {
    /// Decide the layout from the extension, sniffing the content when the extension is unknown.
    pub fn detect(path: &Path) -> Result<Self> {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("jsonl") | Some("ndjson") => return Ok(Self::JsonLines),
            Some("json") => return Ok(Self::JsonArray),
            _ => {}
        }

        let file = File::open(path).map_err(|e| RetrieverError::from_io(path, e))?;
        let mut head = Vec::with_capacity(512);
        file.take(512).read_to_end(&mut head)?;
        let first = head.iter().find(|b| !b.is_ascii_whitespace());
        Ok(if first == Some(&b'[') {
            Self::JsonArray
        } else {
            Self::JsonLines
        })
    }
}

enum Source {
    Lines {
        lines: std::io::Lines<BufReader<File>>,
        line_no: usize,
        done: bool,
    },
    Array {
        values: std::vec::IntoIter<Value>,
        position: usize,
    },
}

/// Iterator over the JSON objects of a bulk record file.
///
/// Yields `Err(MalformedRecord)` for individual bad entries; callers count
/// and skip those. Any other error ends the stream.
pub struct RecordStream {
    source: Source,
}

impl RecordStream {
    /// Opens `path` for streaming. A missing file is [`RetrieverError::NotFound`].
    pub fn open(path: &Path) -> Result<Self> {
        let format = RecordFormat::detect(path)?;
        let file = File::open(path).map_err(|e| RetrieverError::from_io(path, e))?;

        let source = match format {
            RecordFormat::JsonLines => Source::Lines {
                lines: BufReader::new(file).lines(),
                line_no: 0,
                done: false,
            },
            RecordFormat::JsonArray => {
                let value: Value = serde_json::from_reader(BufReader::new(file))?;
                let values = match value {
                    Value::Array(values) => values,
                    other => vec![other],
                };
                Source::Array {
                    values: values.into_iter(),
                    position: 0,
                }
            }
        };

        Ok(Self { source })
    }
}

fn into_object(value: Value, line: usize) -> Result<Map<String, Value>> {
    match value {
        Value::Object(obj) => Ok(obj),
        _ => Err(RetrieverError::MalformedRecord {
            line,
            reason: "expected a JSON object".to_string(),
        }),
    }
}

impl Iterator for RecordStream {
    type Item = Result<Map<String, Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.source {
            Source::Lines {
                lines,
                line_no,
                done,
            } => loop {
                if *done {
                    return None;
                }
                let line = lines.next()?;
                *line_no += 1;
                let line = match line {
                    Ok(line) => line,
                    Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                        return Some(Err(RetrieverError::MalformedRecord {
                            line: *line_no,
                            reason: "invalid UTF-8".to_string(),
                        }));
                    }
                    Err(e) => {
                        *done = true;
                        return Some(Err(e.into()));
                    }
                };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                return Some(
                    serde_json::from_str::<Value>(trimmed)
                        .map_err(|e| RetrieverError::MalformedRecord {
                            line: *line_no,
                            reason: e.to_string(),
                        })
                        .and_then(|value| into_object(value, *line_no)),
                );
            },
            Source::Array { values, position } => {
                let value = values.next()?;
                *position += 1;
                Some(into_object(value, *position))
            }
        }
    }
}
