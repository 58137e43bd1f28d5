//! Structural checks and deep merge for configuration documents.

use std::fmt;

use camino::Utf8Path;
use serde_json::{Map, Value};

use super::{ConfigError, ResourceConfig, read_file};

/// A single mismatch between a document and the configuration schema.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SchemaViolation {
    /// Dotted path of the offending value (`<root>` for the document).
    pub path: String,
    /// What the schema expected.
    pub message: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

pub(super) fn render(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Clone, Copy)]
enum Kind {
    Text,
    OptionalText,
    Flag,
    Seconds,
    TextList,
    OneOf(&'static [&'static str]),
    Section(&'static [Field]),
}

struct Field {
    name: &'static str,
    kind: Kind,
}

const fn field(name: &'static str, kind: Kind) -> Field {
    Field { name, kind }
}

const PROJECT: &[Field] = &[
    field("id", Kind::OptionalText),
    field("name", Kind::OptionalText),
];

const DEVICE: &[Field] = &[
    field("id", Kind::OptionalText),
    field("name", Kind::OptionalText),
    field("plan", Kind::Text),
    field("operating_system", Kind::Text),
    field("facilities", Kind::TextList),
    field("billing_cycle", Kind::Text),
    field("userdata", Kind::OptionalText),
    field("skip_dmsetup", Kind::Flag),
    field("branch", Kind::OptionalText),
    field("script_root", Kind::Text),
    field("placement", Kind::OneOf(&["fallback", "strict"])),
    field("poll_interval_secs", Kind::Seconds),
    field("active_timeout_secs", Kind::Seconds),
    field("bootstrap_timeout_secs", Kind::Seconds),
];

const SSH: &[Field] = &[
    field("create_new", Kind::Flag),
    field("name", Kind::OptionalText),
    field("path", Kind::OptionalText),
];

const LOG_LEVELS: &[Field] = &[
    field("flintlockd", Kind::Text),
    field("containerd", Kind::Text),
];

const TEST: &[Field] = &[
    field("skip_teardown", Kind::Flag),
    field("skip_delete", Kind::Flag),
    field("log_levels", Kind::Section(LOG_LEVELS)),
];

const ROOT: &[Field] = &[
    field("org_id", Kind::OptionalText),
    field("project", Kind::Section(PROJECT)),
    field("device", Kind::Section(DEVICE)),
    field("ssh", Kind::Section(SSH)),
    field("test", Kind::Section(TEST)),
];

const ROOT_PATH: &str = "<root>";

/// Collects every schema violation in `document`.
pub(super) fn check(document: &Value) -> Vec<SchemaViolation> {
    let mut violations = Vec::new();
    check_section(document, ROOT, "", &mut violations);
    violations
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_owned()
    } else {
        format!("{prefix}.{name}")
    }
}

fn violation(violations: &mut Vec<SchemaViolation>, path: &str, message: impl Into<String>) {
    let shown = if path.is_empty() { ROOT_PATH } else { path };
    violations.push(SchemaViolation {
        path: shown.to_owned(),
        message: message.into(),
    });
}

fn check_section(
    value: &Value,
    fields: &'static [Field],
    path: &str,
    violations: &mut Vec<SchemaViolation>,
) {
    let Some(map) = value.as_object() else {
        violation(violations, path, "expected a mapping");
        return;
    };

    for (key, child) in map {
        let child_path = join(path, key);
        match fields.iter().find(|candidate| candidate.name == key) {
            Some(known) => check_value(child, known.kind, &child_path, violations),
            None => violation(violations, &child_path, "unknown key"),
        }
    }
}

fn check_value(value: &Value, kind: Kind, path: &str, violations: &mut Vec<SchemaViolation>) {
    match (kind, value) {
        (Kind::OptionalText, Value::Null | Value::String(_))
        | (Kind::Text, Value::String(_))
        | (Kind::Flag, Value::Bool(_)) => {}
        (Kind::Seconds, Value::Number(number)) if number.as_u64().is_some_and(|n| n > 0) => {}
        (Kind::Seconds, _) => violation(violations, path, "expected a positive integer"),
        (Kind::OneOf(allowed), Value::String(text)) if allowed.contains(&text.as_str()) => {}
        (Kind::OneOf(allowed), _) => violation(
            violations,
            path,
            format!("expected one of: {}", allowed.join(", ")),
        ),
        (Kind::TextList, Value::Array(items)) => {
            for (index, item) in items.iter().enumerate() {
                if !item.is_string() {
                    violation(violations, &format!("{path}[{index}]"), "expected a string");
                }
            }
        }
        (Kind::TextList, _) => violation(violations, path, "expected a list of strings"),
        (Kind::Section(fields), _) => check_section(value, fields, path, violations),
        (Kind::Text | Kind::OptionalText, _) => violation(violations, path, "expected a string"),
        (Kind::Flag, _) => violation(violations, path, "expected a boolean"),
    }
}

/// Merges `overlay` into `base`: mappings merge key by key, anything else
/// replaces the base value.
pub(super) fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => merge_maps(base_map, overlay_map),
        (slot, replacement) => *slot = replacement,
    }
}

fn merge_maps(base: &mut Map<String, Value>, overlay: Map<String, Value>) {
    for (key, value) in overlay {
        match base.get_mut(&key) {
            Some(existing) => deep_merge(existing, value),
            None => {
                base.insert(key, value);
            }
        }
    }
}

impl ResourceConfig {
    /// Reads a YAML document and merges it into the current values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Schema`] listing every structural violation,
    /// or another [`ConfigError`] when the file cannot be read or parsed.
    pub fn load(&mut self, file: &Utf8Path) -> Result<(), ConfigError> {
        let contents = read_file(file).map_err(|message| ConfigError::Io {
            path: file.to_path_buf(),
            message,
        })?;
        self.merge_document(file, &contents)
    }

    /// Merges YAML `contents` attributed to `origin` into the current values.
    ///
    /// # Errors
    ///
    /// See [`ResourceConfig::load`].
    pub fn merge_document(&mut self, origin: &Utf8Path, contents: &str) -> Result<(), ConfigError> {
        let parsed: Value = serde_yaml::from_str(contents).map_err(|err| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: err.to_string(),
        })?;
        let document = match parsed {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };

        let violations = check(&document);
        if !violations.is_empty() {
            return Err(ConfigError::Schema {
                path: origin.to_path_buf(),
                violations,
            });
        }

        let decode_error = |err: serde_json::Error| ConfigError::Decode {
            path: origin.to_path_buf(),
            message: err.to_string(),
        };
        let mut merged = serde_json::to_value(&*self).map_err(decode_error)?;
        deep_merge(&mut merged, document);
        *self = serde_json::from_value(merged).map_err(decode_error)?;
        Ok(())
    }
}
