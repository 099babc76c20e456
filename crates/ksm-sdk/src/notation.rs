//! `keeper://` locators
//!
//! ```text
//! keeper://<uid or title>/type
//! keeper://<uid or title>/title
//! keeper://<uid or title>/notes
//! keeper://<uid or title>/field/<type or label>[index][key]
//! keeper://<uid or title>/custom_field/<label or type>[index][key]
//! keeper://<uid or title>/file/<name, title or uid>
//! ```
//!
//! `\` escapes `/`, `[`, `]` and itself. Without an index (or with `[]`)
//! the whole value list is returned; `[][key]` picks `key` from every value.
//! A lone non-numeric bracket is a key on the first value.

use ksm_core::{KsmError, KsmResult};
use serde_json::Value;

use crate::dto::{Field, KeeperFile, Record};

const PREFIX: &str = "keeper://";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Type,
    Title,
    Notes,
    Field(String),
    CustomField(String),
    File(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Index {
    All,
    At(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notation {
    pub record: String,
    pub selector: Selector,
    pub index: Option<Index>,
    pub key: Option<String>,
}

/// What a locator resolved to.
#[derive(Debug, Clone)]
pub enum NotationValue {
    Value(Value),
    File(KeeperFile),
}

impl NotationValue {
    /// Plain string form: strings as-is, other JSON rendered compactly.
    pub fn as_text(&self) -> Option<String> {
        match self {
            NotationValue::Value(Value::String(s)) => Some(s.clone()),
            NotationValue::Value(v) => Some(v.to_string()),
            NotationValue::File(_) => None,
        }
    }
}

fn err(locator: &str, msg: impl std::fmt::Display) -> KsmError {
    KsmError::Notation(format!("{msg} in '{locator}'"))
}

/// Split on unescaped `/`. `\/` and `\\` are unescaped; other escapes are
/// kept for the bracket parser.
fn split_path(locator: &str, body: &str) -> KsmResult<Vec<String>> {
    let mut parts = vec![String::new()];
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(next @ ('/' | '\\')) => push_char(&mut parts, next),
                Some(next @ ('[' | ']')) => {
                    push_char(&mut parts, '\\');
                    push_char(&mut parts, next);
                }
                Some(other) => return Err(err(locator, format!("invalid escape '\\{other}'"))),
                None => return Err(err(locator, "dangling escape")),
            },
            '/' => parts.push(String::new()),
            _ => push_char(&mut parts, c),
        }
    }
    Ok(parts)
}

fn push_char(parts: &mut [String], c: char) {
    if let Some(last) = parts.last_mut() {
        last.push(c);
    }
}

/// Split `name[a][b]` into the name and bracket contents.
fn split_brackets(locator: &str, text: &str) -> KsmResult<(String, Vec<String>)> {
    let mut name = String::new();
    let mut brackets: Vec<String> = Vec::new();
    let mut current: Option<String> = None;
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        let ch = match c {
            '\\' => match chars.next() {
                Some(next) => next,
                None => return Err(err(locator, "dangling escape")),
            },
            '[' if current.is_some() => return Err(err(locator, "nested '['")),
            '[' => {
                current = Some(String::new());
                continue;
            }
            ']' => {
                match current.take() {
                    Some(buf) => brackets.push(buf),
                    None => return Err(err(locator, "unmatched ']'")),
                }
                continue;
            }
            _ => c,
        };
        match current.as_mut() {
            Some(buf) => buf.push(ch),
            None if !brackets.is_empty() => return Err(err(locator, "text after closing bracket")),
            None => name.push(ch),
        }
    }
    if current.is_some() {
        return Err(err(locator, "unclosed '['"));
    }
    Ok((name, brackets))
}

impl Notation {
    pub fn parse(locator: &str) -> KsmResult<Self> {
        let body = locator.strip_prefix(PREFIX).unwrap_or(locator);
        let parts = split_path(locator, body)?;

        let record = parts
            .first()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| err(locator, "missing record uid or title"))?
            .replace("\\[", "[")
            .replace("\\]", "]");
        let kind = parts
            .get(1)
            .ok_or_else(|| err(locator, "missing selector"))?;

        let simple = |selector: Selector| -> KsmResult<Notation> {
            if parts.len() > 2 {
                return Err(err(locator, format!("'{kind}' takes no parameter")));
            }
            Ok(Notation {
                record: record.clone(),
                selector,
                index: None,
                key: None,
            })
        };

        match kind.as_str() {
            "type" => return simple(Selector::Type),
            "title" => return simple(Selector::Title),
            "notes" => return simple(Selector::Notes),
            "field" | "custom_field" | "file" => {}
            other => return Err(err(locator, format!("unknown selector '{other}'"))),
        }

        let parameter = match parts.len() {
            3 => &parts[2],
            2 => return Err(err(locator, format!("'{kind}' needs a name"))),
            _ => return Err(err(locator, "too many path segments")),
        };
        let (name, brackets) = split_brackets(locator, parameter)?;
        if name.is_empty() {
            return Err(err(locator, "empty field name"));
        }

        if kind == "file" {
            if !brackets.is_empty() {
                return Err(err(locator, "file selector takes no index"));
            }
            return Ok(Notation {
                record,
                selector: Selector::File(name),
                index: None,
                key: None,
            });
        }

        let (index, key) = match brackets.as_slice() {
            [] => (None, None),
            [first] => match parse_index(first) {
                Some(index) => (Some(index), None),
                None => (Some(Index::At(0)), Some(first.clone())),
            },
            [first, second] => {
                let index = parse_index(first)
                    .ok_or_else(|| err(locator, format!("index '{first}' is not a number")))?;
                let key = Some(second.clone()).filter(|k| !k.is_empty());
                (Some(index), key)
            }
            _ => return Err(err(locator, "at most two brackets are allowed")),
        };

        let selector = if kind == "field" {
            Selector::Field(name)
        } else {
            Selector::CustomField(name)
        };
        Ok(Notation {
            record,
            selector,
            index,
            key,
        })
    }

    /// Resolve against a set of decrypted records.
    pub fn resolve(&self, records: &[Record]) -> KsmResult<NotationValue> {
        let record = self.find_record(records)?;

        let field = match &self.selector {
            Selector::Type => return Ok(NotationValue::Value(record.record_type().into())),
            Selector::Title => return Ok(NotationValue::Value(record.title().into())),
            Selector::Notes => {
                return Ok(NotationValue::Value(record.notes().unwrap_or_default().into()))
            }
            Selector::File(name) => {
                return record
                    .file(name)
                    .cloned()
                    .map(NotationValue::File)
                    .ok_or_else(|| self.not_found(format!("file '{name}'")));
            }
            Selector::Field(name) => record
                .field(name)
                .ok_or_else(|| self.not_found(format!("field '{name}'")))?,
            Selector::CustomField(name) => record
                .custom_field(name)
                .ok_or_else(|| self.not_found(format!("custom field '{name}'")))?,
        };

        self.select_value(field).map(NotationValue::Value)
    }

    fn not_found(&self, what: String) -> KsmError {
        KsmError::Notation(format!("record '{}' has no {what}", self.record))
    }

    /// UID and title lookups must agree on a single record.
    fn find_record<'a>(&self, records: &'a [Record]) -> KsmResult<&'a Record> {
        let by_uid: Vec<&Record> = records.iter().filter(|r| r.uid == self.record).collect();
        let by_title: Vec<&Record> = records.iter().filter(|r| r.title() == self.record).collect();

        match (by_uid.as_slice(), by_title.as_slice()) {
            ([], []) => Err(KsmError::Notation(format!("no record matches '{}'", self.record))),
            ([record], []) | ([], [record]) => Ok(*record),
            ([by_uid], [by_title]) if std::ptr::eq(*by_uid, *by_title) => Ok(*by_uid),
            ([_], [_, ..]) => Err(KsmError::Notation(format!(
                "'{}' matches one record by uid and another by title",
                self.record
            ))),
            _ => Err(KsmError::Notation(format!(
                "'{}' matches more than one record",
                self.record
            ))),
        }
    }

    fn select_value(&self, field: &Field) -> KsmResult<Value> {
        let values = &field.value;
        match (self.index.unwrap_or(Index::All), &self.key) {
            (Index::All, None) => Ok(Value::Array(values.clone())),
            (Index::All, Some(key)) => values
                .iter()
                .map(|v| self.pick(v, key))
                .collect::<KsmResult<Vec<_>>>()
                .map(Value::Array),
            (Index::At(i), key) => {
                let value = values.get(i).ok_or_else(|| {
                    KsmError::Notation(format!(
                        "index {i} out of range for '{}' ({} values)",
                        field.label.as_deref().unwrap_or(&field.field_type),
                        values.len()
                    ))
                })?;
                match key {
                    Some(key) => self.pick(value, key),
                    None => Ok(value.clone()),
                }
            }
        }
    }

    fn pick(&self, value: &Value, key: &str) -> KsmResult<Value> {
        value
            .get(key)
            .cloned()
            .ok_or_else(|| KsmError::Notation(format!("value has no key '{key}'")))
    }
}

fn parse_index(text: &str) -> Option<Index> {
    if text.is_empty() {
        return Some(Index::All);
    }
    text.parse::<usize>().ok().map(Index::At)
}
