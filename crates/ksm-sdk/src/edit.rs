//! Record edits.
//!
//! A [`RecordEdit`] collects changes keyed by `(field type, label)` and is
//! applied to an immutable [`Record`] only at [`RecordEdit::commit`], which
//! renders the new plaintext right before it is encrypted for `save`.

use ksm_core::{KsmError, KsmResult};
use serde_json::Value;

use crate::dto::{Field, Record, RecordData};
use crate::field_types::{self, FieldRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Standard,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldKey {
    section: Section,
    field_type: String,
    label: Option<String>,
}

impl FieldKey {
    fn matches(&self, field: &Field) -> bool {
        field.field_type == self.field_type
            && field.label.as_deref().filter(|l| !l.is_empty()) == self.label.as_deref()
    }

    fn describe(&self) -> String {
        match &self.label {
            Some(label) => format!("{} '{label}'", self.field_type),
            None => self.field_type.clone(),
        }
    }
}

#[derive(Debug, Clone)]
enum Change {
    Set(FieldKey, Vec<Value>),
    Remove(FieldKey),
}

#[derive(Debug, Clone, Default)]
pub struct RecordEdit {
    title: Option<String>,
    notes: Option<Option<String>>,
    changes: Vec<Change>,
}

impl RecordEdit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.notes.is_none() && self.changes.is_empty()
    }

    pub fn set_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    /// `None` clears the notes.
    pub fn set_notes(mut self, notes: Option<&str>) -> Self {
        self.notes = Some(notes.map(str::to_string));
        self
    }

    /// Replace the value of the standard field `(field_type, label)`,
    /// adding the field if the record has none.
    pub fn set_field(self, field_type: &str, label: Option<&str>, value: Vec<Value>) -> Self {
        self.push_set(Section::Standard, field_type, label, value)
    }

    pub fn set_custom_field(self, field_type: &str, label: Option<&str>, value: Vec<Value>) -> Self {
        self.push_set(Section::Custom, field_type, label, value)
    }

    pub fn set_password(self, password: &str) -> Self {
        self.set_field("password", None, vec![Value::String(password.to_string())])
    }

    /// Remove a standard field, or a custom one if no standard field matches.
    pub fn remove_field(mut self, field_type: &str, label: Option<&str>) -> Self {
        self.changes.push(Change::Remove(key(Section::Standard, field_type, label)));
        self
    }

    fn push_set(mut self, section: Section, field_type: &str, label: Option<&str>, value: Vec<Value>) -> Self {
        self.changes.push(Change::Set(key(section, field_type, label), value));
        self
    }

    /// Apply to `record` using the current field schema.
    pub fn commit(&self, record: &Record) -> KsmResult<RecordData> {
        self.commit_with(record, field_types::current())
    }

    pub fn commit_with(&self, record: &Record, registry: &FieldRegistry) -> KsmResult<RecordData> {
        let mut data = record.data.clone();

        if let Some(title) = &self.title {
            data.title = title.clone();
        }
        if let Some(notes) = &self.notes {
            data.notes = notes.clone();
        }

        for change in &self.changes {
            match change {
                Change::Set(key, value) => {
                    registry.validate(&key.field_type, value)?;
                    let fields = match key.section {
                        Section::Standard => &mut data.fields,
                        Section::Custom => &mut data.custom,
                    };
                    match fields.iter_mut().find(|f| key.matches(f)) {
                        Some(field) => field.value = value.clone(),
                        None => fields.push(Field::new(
                            &key.field_type,
                            key.label.as_deref(),
                            value.clone(),
                        )),
                    }
                }
                Change::Remove(key) => {
                    let removed = remove_first(&mut data.fields, key)
                        || remove_first(&mut data.custom, key);
                    if !removed {
                        return Err(KsmError::Validation(format!(
                            "record {} has no {} field to remove",
                            record.uid,
                            key.describe()
                        )));
                    }
                }
            }
        }

        tracing::debug!(record_uid = %record.uid, changes = self.changes.len(), "committed record edit");
        Ok(data)
    }
}

fn key(section: Section, field_type: &str, label: Option<&str>) -> FieldKey {
    FieldKey {
        section,
        field_type: field_type.to_string(),
        label: label.filter(|l| !l.is_empty()).map(str::to_string),
    }
}

fn remove_first(fields: &mut Vec<Field>, key: &FieldKey) -> bool {
    match fields.iter().position(|f| key.matches(f)) {
        Some(i) => {
            fields.remove(i);
            true
        }
        None => false,
    }
}
