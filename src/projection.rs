use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionField {
    /// `1`: keep the source field under its own name.
    Include,
    /// Output computed from a source expression, e.g. `"$user.name"`.
    Source(Value),
}

/// Output fields of a `$project` stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    fields: Vec<(String, ProjectionField)>,
}

impl Projection {
    /// Include each field as-is.
    pub fn include<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields
                .into_iter()
                .map(|f| (f.into(), ProjectionField::Include))
                .collect(),
        }
    }

    /// Output-name to source-expression pairs.
    pub fn rename<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), ProjectionField::Source(v.into())))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[(String, ProjectionField)] {
        &self.fields
    }

    pub fn to_json(&self) -> Value {
        let mut doc = Map::new();
        for (name, field) in &self.fields {
            let val = match field {
                ProjectionField::Include => Value::from(1),
                ProjectionField::Source(expr) => expr.clone(),
            };
            doc.insert(name.clone(), val);
        }
        Value::Object(doc)
    }
}
