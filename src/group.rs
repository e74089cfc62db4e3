use std::str::FromStr;

use serde_json::{Map, Value, json};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Accumulator operators
// ---------------------------------------------------------------------------

/// Accumulators allowed in the conditional form of `group_by`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupOp {
    Sum,
    Avg,
    Min,
    Max,
    First,
    Last,
    Push,
    Count,
}

impl GroupOp {
    /// `$count` has no conditional form of its own, so it counts through `$sum`.
    pub fn token(self) -> &'static str {
        match self {
            GroupOp::Sum | GroupOp::Count => "$sum",
            GroupOp::Avg => "$avg",
            GroupOp::Min => "$min",
            GroupOp::Max => "$max",
            GroupOp::First => "$first",
            GroupOp::Last => "$last",
            GroupOp::Push => "$push",
        }
    }
}

impl FromStr for GroupOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().trim_start_matches('$') {
            "sum" => Ok(GroupOp::Sum),
            "avg" => Ok(GroupOp::Avg),
            "min" => Ok(GroupOp::Min),
            "max" => Ok(GroupOp::Max),
            "first" => Ok(GroupOp::First),
            "last" => Ok(GroupOp::Last),
            "push" => Ok(GroupOp::Push),
            "count" => Ok(GroupOp::Count),
            _ => Err(Error::InvalidOperator(format!("unknown accumulator: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Group spec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum GroupValue {
    /// Group by the key's value with no aggregate.
    Null,
    Raw(Value),
    /// `{"$sum": weight}`
    Sum(Value),
    /// `{op: {"$cond": [condition, when_true, when_false]}}`
    Conditional {
        op: GroupOp,
        condition: Value,
        when_true: Value,
        when_false: Value,
    },
}

impl GroupValue {
    pub fn to_json(&self) -> Value {
        match self {
            GroupValue::Null => Value::Null,
            GroupValue::Raw(v) => v.clone(),
            GroupValue::Sum(weight) => json!({ "$sum": weight }),
            GroupValue::Conditional {
                op,
                condition,
                when_true,
                when_false,
            } => {
                let mut doc = Map::new();
                doc.insert(
                    op.token().to_string(),
                    json!({ "$cond": [condition, when_true, when_false] }),
                );
                Value::Object(doc)
            }
        }
    }
}

/// Body of a `$group` stage, keyed in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupSpec {
    entries: Vec<(String, GroupValue)>,
}

impl GroupSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every key of a raw group document as-is.
    pub fn from_document(doc: &Value) -> Result<Self> {
        let obj = doc
            .as_object()
            .ok_or_else(|| Error::InvalidOperator("group spec must be an object".into()))?;
        let entries = obj
            .iter()
            .map(|(k, v)| {
                let val = if v.is_null() {
                    GroupValue::Null
                } else {
                    GroupValue::Raw(v.clone())
                };
                (k.clone(), val)
            })
            .collect();
        Ok(Self { entries })
    }

    pub fn with(mut self, key: impl Into<String>, value: GroupValue) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: GroupValue) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&GroupValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn to_json(&self) -> Value {
        let mut doc = Map::new();
        for (key, value) in &self.entries {
            doc.insert(key.clone(), value.to_json());
        }
        Value::Object(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_renders_as_sum_in_conditional() {
        let v = GroupValue::Conditional {
            op: "count".parse().unwrap(),
            condition: json!({"$eq": ["$status", "paid"]}),
            when_true: json!(1),
            when_false: json!(0),
        };
        assert_eq!(
            v.to_json(),
            json!({"$sum": {"$cond": [{"$eq": ["$status", "paid"]}, 1, 0]}})
        );
    }

    #[test]
    fn unknown_accumulator_is_rejected() {
        assert!(matches!(
            "$median".parse::<GroupOp>(),
            Err(Error::InvalidOperator(_))
        ));
    }

    #[test]
    fn from_document_keeps_keys_and_nulls() {
        let spec =
            GroupSpec::from_document(&json!({"_id": null, "total": {"$sum": "$amount"}})).unwrap();
        assert_eq!(spec.len(), 2);
        assert_eq!(spec.get("_id"), Some(&GroupValue::Null));
        assert_eq!(
            spec.to_json(),
            json!({"_id": null, "total": {"$sum": "$amount"}})
        );
    }

    #[test]
    fn from_document_rejects_non_object() {
        assert!(GroupSpec::from_document(&json!([1, 2])).is_err());
    }
}
