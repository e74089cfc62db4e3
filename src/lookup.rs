use serde_json::{Map, Value, json};

use crate::config::BuilderConfig;
use crate::error::{Error, Result};
use crate::group::GroupSpec;
use crate::pipeline::Stage;
use crate::projection::Projection;
use crate::query::{Predicate, SortSpec};

// ---------------------------------------------------------------------------
// Join configuration
// ---------------------------------------------------------------------------

/// One configured join. A spec without a collection is a join that was
/// implied by join-specific calls but never given a target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinSpec {
    pub collection: Option<String>,
    pub foreign_key: Option<String>,
    pub primary_key: Option<String>,
    /// Row cap of the inner pipeline; `None` takes the configured default.
    pub limit: Option<i64>,
    pub alias: Option<String>,
    pub local_field: Option<String>,
    pub foreign_field: Option<String>,
    /// Projection used inside the join instead of the top-level one.
    pub select: Option<Projection>,
    /// Stages opening the inner pipeline; a correlated join keeps its key
    /// match first and runs these right after it.
    pub prelude: Vec<Stage>,
}

impl JoinSpec {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: Some(collection.into()),
            ..Self::default()
        }
    }

    /// Local and foreign field, when both are set.
    pub fn lookup_fields(&self) -> Option<(&str, &str)> {
        match (self.local_field.as_deref(), self.foreign_field.as_deref()) {
            (Some(local), Some(foreign)) if !local.is_empty() && !foreign.is_empty() => {
                Some((local, foreign))
            }
            _ => None,
        }
    }
}

/// Session state every join reuses for its inner pipeline.
#[derive(Debug, Clone, Copy)]
pub struct SharedState<'a> {
    pub predicate: &'a Predicate,
    pub projection: &'a Projection,
    pub group: &'a GroupSpec,
    pub count: Option<&'a str>,
    pub sort: &'a SortSpec,
}

// ---------------------------------------------------------------------------
// Lookup stage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum LookupMode {
    /// Native equi-join on `localField` / `foreignField`.
    Fields {
        local_field: String,
        foreign_field: String,
    },
    /// `let`-bound variable compared inside the sub-pipeline.
    Correlated { variable: String, foreign_key: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    pub from: String,
    pub mode: LookupMode,
    pub pipeline: Vec<Stage>,
    pub as_field: String,
}

impl Lookup {
    pub fn to_json(&self) -> Value {
        let mut doc = Map::new();
        doc.insert("from".into(), Value::String(self.from.clone()));
        match &self.mode {
            LookupMode::Fields {
                local_field,
                foreign_field,
            } => {
                doc.insert("localField".into(), Value::String(local_field.clone()));
                doc.insert("foreignField".into(), Value::String(foreign_field.clone()));
            }
            LookupMode::Correlated {
                variable,
                foreign_key,
            } => {
                let mut vars = Map::new();
                vars.insert(variable.clone(), Value::String(foreign_key.clone()));
                doc.insert("let".into(), Value::Object(vars));
            }
        }
        doc.insert(
            "pipeline".into(),
            Value::Array(self.pipeline.iter().map(Stage::to_json).collect()),
        );
        doc.insert("as".into(), Value::String(self.as_field.clone()));
        Value::Object(doc)
    }
}

fn field_ref(field: &str) -> String {
    if field.starts_with('$') {
        field.to_string()
    } else {
        format!("${field}")
    }
}

// ---------------------------------------------------------------------------
// Expansion
// ---------------------------------------------------------------------------

/// Expand one join into a `$lookup` stage with its own sub-pipeline.
pub fn expand(join: &JoinSpec, shared: &SharedState<'_>, config: &BuilderConfig) -> Result<Stage> {
    let from = join
        .collection
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or(Error::MissingJoinTarget)?;

    let mut pipeline = Vec::new();
    let mode = match join.lookup_fields() {
        Some((local, foreign)) => {
            pipeline.extend(join.prelude.iter().cloned());
            if !shared.predicate.is_empty() {
                pipeline.push(Stage::Match(shared.predicate.to_json()));
            }
            LookupMode::Fields {
                local_field: local.to_string(),
                foreign_field: foreign.to_string(),
            }
        }
        None => {
            let foreign_key = match &join.foreign_key {
                Some(key) => field_ref(key),
                None => format!("${from}{}", config.foreign_key_suffix),
            };
            let primary_key =
                field_ref(join.primary_key.as_deref().unwrap_or(&config.primary_key));
            let variable = config.let_variable.clone();

            let mut conditions = Map::new();
            conditions.insert(
                "$expr".into(),
                json!({ "$eq": [format!("$${variable}"), primary_key] }),
            );
            shared.predicate.write_into(&mut conditions);
            pipeline.push(Stage::Match(Value::Object(conditions)));
            pipeline.extend(join.prelude.iter().cloned());

            LookupMode::Correlated {
                variable,
                foreign_key,
            }
        }
    };

    let projection = join.select.as_ref().unwrap_or(shared.projection);
    if !projection.is_empty() {
        pipeline.push(Stage::Project(projection.clone()));
    }
    if shared.group.len() > 1 {
        pipeline.push(Stage::Group(shared.group.clone()));
    }
    if let Some(field) = shared.count {
        pipeline.push(Stage::Count(field.to_string()));
    }
    if !shared.sort.is_empty() {
        pipeline.push(Stage::Sort(shared.sort.clone()));
    }
    let cap = join.limit.unwrap_or(config.lookup_limit);
    if cap > 0 {
        pipeline.push(Stage::Limit(cap as u64));
    }

    tracing::trace!(
        from,
        correlated = matches!(mode, LookupMode::Correlated { .. }),
        inner_stages = pipeline.len(),
        "expanded join"
    );

    Ok(Stage::Lookup(Lookup {
        from: from.to_string(),
        mode,
        pipeline,
        as_field: join.alias.clone().unwrap_or_else(|| from.to_string()),
    }))
}

// ===========================================================================
// Tests
// ===========================================================================
