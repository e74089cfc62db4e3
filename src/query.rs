use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Reserved predicate key holding a disjunction of sub-predicates.
pub const OR_KEY: &str = "$or";

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

/// Comparison operators a filter may use. Anything else is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Lt,
    Gt,
    Lte,
    Gte,
    Ne,
    Exists,
    In,
    Nin,
}

impl Operator {
    /// Dialect token written into the emitted document.
    pub fn token(self) -> &'static str {
        match self {
            Operator::Eq => "$eq",
            Operator::Lt => "$lt",
            Operator::Gt => "$gt",
            Operator::Lte => "$lte",
            Operator::Gte => "$gte",
            Operator::Ne => "$ne",
            Operator::Exists => "$exists",
            Operator::In => "$in",
            Operator::Nin => "$nin",
        }
    }

    /// `$in` / `$nin` take a sequence and keep it inside the operator document.
    pub fn is_membership(self) -> bool {
        matches!(self, Operator::In | Operator::Nin)
    }
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "$eq" | "eq" | "=" | "==" => Ok(Operator::Eq),
            "$lt" | "lt" | "<" => Ok(Operator::Lt),
            "$gt" | "gt" | ">" => Ok(Operator::Gt),
            "$lte" | "lte" | "<=" => Ok(Operator::Lte),
            "$gte" | "gte" | ">=" => Ok(Operator::Gte),
            "$ne" | "ne" | "$neq" | "neq" | "!=" | "<>" => Ok(Operator::Ne),
            "$exists" | "exists" => Ok(Operator::Exists),
            "$in" | "in" => Ok(Operator::In),
            "$nin" | "nin" => Ok(Operator::Nin),
            other => Err(Error::InvalidOperator(format!("unknown operator: {other}"))),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Validate an operator/value pair for the filter family.
///
/// A null value is never legal here; `filter_null` is the only way to
/// compare against null.
pub fn prepare_value_and_operator(operator: &str, value: Value) -> Result<(Operator, Value)> {
    let op: Operator = operator.parse()?;
    if value.is_null() {
        return Err(Error::InvalidOperator(format!(
            "illegal operator and value combination: {op} with null"
        )));
    }
    Ok((op, value))
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// The right-hand side of one predicate entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Bare value, written without an operator document.
    Literal(Value),
    Compare(Operator, Value),
    Range { low: Value, high: Value },
    Or(Vec<Predicate>),
}

impl Condition {
    /// A sequence compared with anything but `$in`/`$nin` is stored as a literal.
    pub fn compare(op: Operator, value: Value) -> Self {
        if value.is_array() && !op.is_membership() {
            Condition::Literal(value)
        } else {
            Condition::Compare(op, value)
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Condition::Literal(v) => v.clone(),
            Condition::Compare(op, v) => {
                let mut doc = Map::new();
                doc.insert(op.token().to_string(), v.clone());
                Value::Object(doc)
            }
            Condition::Range { low, high } => {
                let mut doc = Map::new();
                doc.insert(Operator::Gte.token().to_string(), low.clone());
                doc.insert(Operator::Lte.token().to_string(), high.clone());
                Value::Object(doc)
            }
            Condition::Or(subs) => Value::Array(subs.iter().map(Predicate::to_json).collect()),
        }
    }
}

// ---------------------------------------------------------------------------
// Predicate
// ---------------------------------------------------------------------------

/// Field conditions combined by implicit conjunction.
///
/// Entries keep first-insertion order. Setting a field that is already
/// present replaces its condition in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    conditions: Vec<(String, Condition)>,
}

impl Predicate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn get(&self, field: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, cond)| cond)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Condition)> {
        self.conditions.iter().map(|(name, cond)| (name.as_str(), cond))
    }

    pub fn insert(&mut self, field: impl Into<String>, condition: Condition) {
        let field = field.into();
        match self.conditions.iter_mut().find(|(name, _)| *name == field) {
            Some((_, existing)) => *existing = condition,
            None => self.conditions.push((field, condition)),
        }
    }

    pub(crate) fn set_eq(&mut self, field: impl Into<String>, value: Value) -> Result<()> {
        let (op, value) = prepare_value_and_operator("$eq", value)?;
        self.insert(field, Condition::compare(op, value));
        Ok(())
    }

    pub(crate) fn set_op(
        &mut self,
        field: impl Into<String>,
        operator: &str,
        value: Value,
    ) -> Result<()> {
        let (op, value) = prepare_value_and_operator(operator, value)?;
        self.insert(field, Condition::compare(op, value));
        Ok(())
    }

    pub(crate) fn set_membership(&mut self, field: impl Into<String>, op: Operator, values: Vec<Value>) {
        self.insert(field, Condition::Compare(op, Value::Array(values)));
    }

    pub(crate) fn set_null(&mut self, field: impl Into<String>, op: Operator) {
        self.insert(field, Condition::Compare(op, Value::Null));
    }

    pub(crate) fn set_between(&mut self, field: impl Into<String>, low: Value, high: Value) {
        self.insert(field, Condition::Range { low, high });
    }

    pub(crate) fn set_or(&mut self, alternatives: Vec<Predicate>) {
        self.insert(OR_KEY, Condition::Or(alternatives));
    }

    // -- chaining form, used to build `$or` alternatives --------------------

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        self.set_eq(field, value.into())?;
        Ok(self)
    }

    pub fn filter_op(
        mut self,
        field: impl Into<String>,
        operator: &str,
        value: impl Into<Value>,
    ) -> Result<Self> {
        self.set_op(field, operator, value.into())?;
        Ok(self)
    }

    pub fn filter_in<I, V>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.set_membership(field, Operator::In, values.into_iter().map(Into::into).collect());
        self
    }

    pub fn filter_not_in<I, V>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.set_membership(field, Operator::Nin, values.into_iter().map(Into::into).collect());
        self
    }

    pub fn filter_null(mut self, field: impl Into<String>) -> Self {
        self.set_null(field, Operator::Eq);
        self
    }

    pub fn filter_between(
        mut self,
        field: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.set_between(field, low.into(), high.into());
        self
    }

    /// Write every entry into `doc`, overwriting keys already there.
    pub(crate) fn write_into(&self, doc: &mut Map<String, Value>) {
        for (field, cond) in &self.conditions {
            doc.insert(field.clone(), cond.to_json());
        }
    }

    pub fn to_json(&self) -> Value {
        let mut doc = Map::new();
        self.write_into(&mut doc);
        Value::Object(doc)
    }
}

// ---------------------------------------------------------------------------
// Sort
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn direction(self) -> i64 {
        match self {
            SortOrder::Asc => 1,
            SortOrder::Desc => -1,
        }
    }
}

impl FromStr for SortOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" | "1" => Ok(SortOrder::Asc),
            "desc" | "descending" | "-1" => Ok(SortOrder::Desc),
            other => Err(Error::InvalidOperator(format!(
                "sort direction must be asc or desc, got '{other}'"
            ))),
        }
    }
}

/// Sort keys in the order they were first given.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortSpec {
    fields: Vec<(String, SortOrder)>,
}

impl SortSpec {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[(String, SortOrder)] {
        &self.fields
    }

    pub fn set(&mut self, field: impl Into<String>, order: SortOrder) {
        let field = field.into();
        match self.fields.iter_mut().find(|(name, _)| *name == field) {
            Some((_, existing)) => *existing = order,
            None => self.fields.push((field, order)),
        }
    }

    pub fn to_json(&self) -> Value {
        let mut doc = Map::new();
        for (field, order) in &self.fields {
            doc.insert(field.clone(), Value::from(order.direction()));
        }
        Value::Object(doc)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
