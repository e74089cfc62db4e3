use std::fmt;

use serde::ser::{Serialize, SerializeSeq, Serializer};
use serde_json::{Map, Value, json};

use crate::group::GroupSpec;
use crate::lookup::Lookup;
use crate::projection::Projection;
use crate::query::SortSpec;

// ---------------------------------------------------------------------------
// Pipeline stages
// ---------------------------------------------------------------------------

/// One aggregation stage. Serialized as a single-key document
/// (`{"$match": {...}}`) only when the pipeline is turned into JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Value),
    Project(Projection),
    Sort(SortSpec),
    Group(GroupSpec),
    Skip(u64),
    Limit(u64),
    Count(String),
    Lookup(Lookup),
    Unwind {
        path: String,
        include_array_index: Option<String>,
        preserve_null_and_empty_arrays: Option<bool>,
    },
    AddFields(Vec<(String, Value)>),
    Unset(Vec<String>),
    Sample(u64),
}

fn field_path(field: &str) -> String {
    if field.starts_with('$') {
        field.to_string()
    } else {
        format!("${field}")
    }
}

impl Stage {
    /// `path` may be given with or without the leading `$`.
    pub fn unwind(
        path: &str,
        include_array_index: Option<&str>,
        preserve_null_and_empty_arrays: Option<bool>,
    ) -> Self {
        Stage::Unwind {
            path: field_path(path),
            include_array_index: include_array_index.map(str::to_string),
            preserve_null_and_empty_arrays,
        }
    }

    pub fn add_fields(field: impl Into<String>, expression: impl Into<Value>) -> Self {
        Stage::AddFields(vec![(field.into(), expression.into())])
    }

    pub fn unset(field: impl Into<String>) -> Self {
        Stage::Unset(vec![field.into()])
    }

    /// Random sample of `size` documents; zero is raised to one.
    pub fn sample(size: u64) -> Self {
        Stage::Sample(size.max(1))
    }

    /// Dialect name of the stage operator.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Project(_) => "$project",
            Stage::Sort(_) => "$sort",
            Stage::Group(_) => "$group",
            Stage::Skip(_) => "$skip",
            Stage::Limit(_) => "$limit",
            Stage::Count(_) => "$count",
            Stage::Lookup(_) => "$lookup",
            Stage::Unwind { .. } => "$unwind",
            Stage::AddFields(_) => "$addFields",
            Stage::Unset(_) => "$unset",
            Stage::Sample(_) => "$sample",
        }
    }

    fn body(&self) -> Value {
        match self {
            Stage::Match(doc) => doc.clone(),
            Stage::Project(projection) => projection.to_json(),
            Stage::Sort(spec) => spec.to_json(),
            Stage::Group(spec) => spec.to_json(),
            Stage::Skip(n) | Stage::Limit(n) => Value::from(*n),
            Stage::Count(field) => Value::String(field.clone()),
            Stage::Lookup(lookup) => lookup.to_json(),
            Stage::Unwind {
                path,
                include_array_index,
                preserve_null_and_empty_arrays,
            } => {
                let mut doc = Map::new();
                doc.insert("path".into(), Value::String(path.clone()));
                if let Some(index) = include_array_index {
                    doc.insert("includeArrayIndex".into(), Value::String(index.clone()));
                }
                if let Some(preserve) = preserve_null_and_empty_arrays {
                    doc.insert("preserveNullAndEmptyArrays".into(), Value::Bool(*preserve));
                }
                Value::Object(doc)
            }
            Stage::AddFields(fields) => {
                let mut doc = Map::new();
                for (name, expr) in fields {
                    doc.insert(name.clone(), expr.clone());
                }
                Value::Object(doc)
            }
            Stage::Unset(fields) => match fields.as_slice() {
                [single] => Value::String(single.clone()),
                _ => Value::Array(fields.iter().cloned().map(Value::String).collect()),
            },
            Stage::Sample(size) => json!({ "size": size }),
        }
    }

    pub fn to_json(&self) -> Value {
        let mut doc = Map::new();
        doc.insert(self.name().to_string(), self.body());
        Value::Object(doc)
    }
}

impl Serialize for Stage {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// A materialized pipeline. Holds no reference back to the builder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn from_stages(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn into_stages(self) -> Vec<Stage> {
        self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// The document form handed to the database's aggregate entry point.
    pub fn to_json(&self) -> Value {
        Value::Array(self.stages.iter().map(Stage::to_json).collect())
    }
}

impl Serialize for Pipeline {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.stages.len()))?;
        for stage in &self.stages {
            seq.serialize_element(stage)?;
        }
        seq.end()
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
