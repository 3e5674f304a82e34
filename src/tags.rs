//! Monitored tag catalog.
//!
//! The tag list fixes P and the column order shared by every window, model
//! variant and error vector. It is built once, filtered once, and is
//! immutable afterwards.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::{debug, info, warn};

use crate::error::{AnomalyError, Result};

/// Tags of the legacy turbine deployment, used when no tag file is available.
pub const TURBINE_FALLBACK_TAGS: [&str; 15] = [
    "SD1A",
    "SD2",
    "TC19",
    "TC20",
    "VGVFB",
    "PT8",
    "PT258",
    "ssi_TurbineTemp",
    "PT9",
    "TC101",
    "TC102",
    "PT181A",
    "PT181B",
    "PT182A",
    "PT182B",
];

const RESERVED_NAMES: [&str; 2] = ["timestamp", "quality"];

/// Numeric storage kinds accepted as model inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumericKind {
    Float32,
    Float64,
    Int32,
    Int16,
}

impl NumericKind {
    /// `None` for kinds the models cannot consume (bool, string, ...).
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "float32" => Some(NumericKind::Float32),
            "float64" => Some(NumericKind::Float64),
            "int32" => Some(NumericKind::Int32),
            "int16" => Some(NumericKind::Int16),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NumericKind::Float32 => "float32",
            NumericKind::Float64 => "float64",
            NumericKind::Int32 => "int32",
            NumericKind::Int16 => "int16",
        }
    }
}

impl fmt::Display for NumericKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagSpec {
    pub name: String,
    pub kind: NumericKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_factor: Option<f64>,
}

impl TagSpec {
    pub fn new(name: impl Into<String>, kind: NumericKind) -> Self {
        TagSpec {
            name: name.into(),
            kind,
            unit: None,
            description: None,
            scale_factor: None,
        }
    }
}

/// Ordered, duplicate-free, non-empty set of monitored tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<TagSpec>", into = "Vec<TagSpec>")]
pub struct TagSet {
    specs: Vec<TagSpec>,
}

impl TagSet {
    pub fn new(specs: Vec<TagSpec>) -> Result<Self> {
        if specs.is_empty() {
            return Err(AnomalyError::configuration("tag set is empty"));
        }
        let mut seen = HashSet::with_capacity(specs.len());
        for spec in &specs {
            if spec.name.is_empty() {
                return Err(AnomalyError::configuration("tag name is empty"));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(AnomalyError::configuration(format!(
                    "duplicate tag '{}'",
                    spec.name
                )));
            }
        }
        Ok(TagSet { specs })
    }

    /// Build from bare names; every tag is treated as float64.
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            names
                .into_iter()
                .map(|name| TagSpec::new(name, NumericKind::Float64))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.specs.iter().position(|spec| spec.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.specs.get(index).map(|spec| spec.name.as_str())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.specs.iter().map(|spec| spec.name.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TagSpec> {
        self.specs.iter()
    }
}

impl TryFrom<Vec<TagSpec>> for TagSet {
    type Error = AnomalyError;

    fn try_from(specs: Vec<TagSpec>) -> Result<Self> {
        TagSet::new(specs)
    }
}

impl From<TagSet> for Vec<TagSpec> {
    fn from(tags: TagSet) -> Self {
        tags.specs
    }
}

impl<'a> IntoIterator for &'a TagSet {
    type Item = &'a TagSpec;
    type IntoIter = std::slice::Iter<'a, TagSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.specs.iter()
    }
}

/// Anything that can name the monitored tags.
pub trait TagSource {
    fn list_monitored_tags(&self) -> Result<TagSet>;
}

/// A tag list supplied in code.
#[derive(Debug, Clone)]
pub struct StaticTags {
    names: Vec<String>,
}

impl StaticTags {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StaticTags {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn turbine() -> Self {
        Self::new(TURBINE_FALLBACK_TAGS)
    }
}

impl TagSource for StaticTags {
    fn list_monitored_tags(&self) -> Result<TagSet> {
        TagSet::from_names(self.names.iter().cloned())
    }
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    tags: Option<Mapping>,
}

/// A YAML tag document (`tags:` mapping of name to settings), on disk or in memory.
#[derive(Debug, Clone)]
pub enum TagDocument {
    File(PathBuf),
    Inline(String),
}

impl TagDocument {
    pub fn file(path: impl AsRef<Path>) -> Self {
        TagDocument::File(path.as_ref().to_path_buf())
    }

    pub fn inline(text: impl Into<String>) -> Self {
        TagDocument::Inline(text.into())
    }

    fn read(&self) -> Result<String> {
        match self {
            TagDocument::File(path) => fs::read_to_string(path).map_err(|e| {
                AnomalyError::configuration(format!(
                    "cannot read tag file {}: {e}",
                    path.display()
                ))
            }),
            TagDocument::Inline(text) => Ok(text.clone()),
        }
    }
}

impl TagSource for TagDocument {
    fn list_monitored_tags(&self) -> Result<TagSet> {
        let text = self.read()?;
        let document: RawDocument = serde_yaml::from_str(&text)
            .map_err(|e| AnomalyError::configuration(format!("malformed tag document: {e}")))?;
        let entries = document
            .tags
            .ok_or_else(|| AnomalyError::configuration("tag document has no 'tags' section"))?;
        filter_entries(&entries)
    }
}

/// Keep only named, numeric tags; everything else is reported and dropped.
fn filter_entries(entries: &Mapping) -> Result<TagSet> {
    let mut accepted = Vec::new();
    let mut excluded = Vec::new();

    for (key, value) in entries {
        let name = match key {
            Value::String(name) => name.clone(),
            other => {
                excluded.push(format!("{other:?}"));
                continue;
            }
        };
        match accept_entry(&name, value) {
            Some(spec) => accepted.push(spec),
            None => excluded.push(name),
        }
    }

    info!(
        accepted = accepted.len(),
        excluded = excluded.len(),
        "loaded monitored tags"
    );
    if !excluded.is_empty() {
        debug!(?excluded, "excluded tags");
    }

    TagSet::new(accepted)
}

/// Acceptance depends on `type` alone; other settings are read leniently.
fn accept_entry(name: &str, value: &Value) -> Option<TagSpec> {
    if name.starts_with('#') || name.starts_with('_') || RESERVED_NAMES.contains(&name) {
        return None;
    }
    let settings = value.as_mapping()?;
    let kind = NumericKind::parse(settings.get("type")?.as_str()?)?;
    Some(TagSpec {
        name: name.to_string(),
        kind,
        unit: scalar_text(settings.get("unit")),
        description: scalar_text(settings.get("description")),
        scale_factor: settings.get("scale_factor").and_then(Value::as_f64),
    })
}

fn scalar_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// Use `primary`, and `fallback` if the primary source fails.
#[derive(Debug, Clone)]
pub struct FallbackTags<P, F> {
    primary: P,
    fallback: F,
}

impl<P: TagSource, F: TagSource> FallbackTags<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        FallbackTags { primary, fallback }
    }
}

impl<P: TagSource, F: TagSource> TagSource for FallbackTags<P, F> {
    fn list_monitored_tags(&self) -> Result<TagSet> {
        match self.primary.list_monitored_tags() {
            Ok(tags) => Ok(tags),
            Err(err) => {
                warn!(error = %err, "tag source failed, using fallback list");
                self.fallback.list_monitored_tags()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r##"
plcs:
  main: { host: 10.0.0.5, slot: 0 }
tags:
  SD1A:
    plc: main
    type: float32
    unit: rpm
  "#disabled":
    plc: main
    type: float32
  _internal:
    type: float64
  timestamp:
    type: int32
  TC19:
    plc: main
    type: int16
    scale_factor: 0.1
  RunFlag:
    plc: main
    type: bool
  note: just a string
  PT8:
    type: float64
    description: inlet pressure
"##;

    #[test]
    fn test_document_filter_keeps_numeric_tags_in_order() {
        let tags = TagDocument::inline(DOCUMENT).list_monitored_tags().unwrap();
        let names: Vec<&str> = tags.names().collect();
        assert_eq!(names, vec!["SD1A", "TC19", "PT8"]);

        let tc19 = tags.iter().nth(1).unwrap();
        assert_eq!(tc19.kind, NumericKind::Int16);
        assert_eq!(tc19.scale_factor, Some(0.1));
        assert_eq!(tags.iter().next().unwrap().unit.as_deref(), Some("rpm"));
    }

    #[test]
    fn test_non_string_metadata_keeps_the_tag() {
        let document = "tags:\n  SD1A:\n    type: float32\n    unit: 5\n  TC19:\n    type: float64\n    description: 2024\n    scale_factor: 2\n  PT8:\n    type: int16\n    unit: [bar]\n";
        let tags = TagDocument::inline(document).list_monitored_tags().unwrap();
        assert_eq!(tags.names().collect::<Vec<_>>(), vec!["SD1A", "TC19", "PT8"]);

        let specs: Vec<&TagSpec> = tags.iter().collect();
        assert_eq!(specs[0].unit.as_deref(), Some("5"));
        assert_eq!(specs[1].description.as_deref(), Some("2024"));
        assert_eq!(specs[1].scale_factor, Some(2.0));
        assert_eq!(specs[2].unit, None);
    }

    #[test]
    fn test_document_without_tags_section_is_configuration_error() {
        let err = TagDocument::inline("plcs: {}\n").list_monitored_tags().unwrap_err();
        assert!(matches!(err, AnomalyError::Configuration(_)));

        let err = TagDocument::inline("tags: [1, 2").list_monitored_tags().unwrap_err();
        assert!(matches!(err, AnomalyError::Configuration(_)));
    }

    #[test]
    fn test_missing_file_falls_back_to_static_list() {
        let err = TagDocument::file("/definitely/not/here/tags.yaml")
            .list_monitored_tags()
            .unwrap_err();
        assert!(matches!(err, AnomalyError::Configuration(_)));

        let source = FallbackTags::new(
            TagDocument::file("/definitely/not/here/tags.yaml"),
            StaticTags::turbine(),
        );
        let tags = source.list_monitored_tags().unwrap();
        assert_eq!(tags.len(), 15);
        assert_eq!(tags.name(7), Some("ssi_TurbineTemp"));
    }

    #[test]
    fn test_tag_set_rejects_duplicates_and_empty() {
        assert!(TagSet::from_names(["A", "B", "A"]).is_err());
        assert!(TagSet::from_names(Vec::<String>::new()).is_err());

        let tags = TagSet::from_names(["A", "B", "C"]).unwrap();
        assert_eq!(tags.index_of("C"), Some(2));
        assert!(!tags.contains("D"));
    }

    #[test]
    fn test_numeric_kind_parse() {
        assert_eq!(NumericKind::parse("float64"), Some(NumericKind::Float64));
        assert_eq!(NumericKind::parse("string"), None);
        assert_eq!(NumericKind::Int32.to_string(), "int32");
    }

    #[test]
    fn test_tag_set_serde_checks_invariants() {
        let tags = TagSet::from_names(["A", "B"]).unwrap();
        let json = serde_json::to_string(&tags).unwrap();
        let back: TagSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tags);

        let dup = r#"[{"name":"A","kind":"float64"},{"name":"A","kind":"int16"}]"#;
        assert!(serde_json::from_str::<TagSet>(dup).is_err());
    }
}
