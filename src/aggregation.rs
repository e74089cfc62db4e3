use serde_json::Value;

use crate::config::BuilderConfig;
use crate::error::{Error, Result};
use crate::group::{GroupOp, GroupSpec, GroupValue};
use crate::lookup::{self, JoinSpec, SharedState};
use crate::pipeline::{Pipeline, Stage};
use crate::projection::Projection;
use crate::query::{Operator, Predicate, SortOrder, SortSpec};

/// Start a fresh builder session with default settings.
pub fn aggregation() -> Aggregation {
    Aggregation::new()
}

/// A builder session. Chained calls record state; `stage` and `pipeline`
/// turn that state into stages without consuming it.
///
/// ```
/// use oxiagg::{aggregation, SortOrder};
///
/// let pipeline = aggregation()
///     .filter("status", "active")?
///     .sort_by("created_at", SortOrder::Desc)
///     .limit(10)
///     .pipeline()?;
/// assert_eq!(pipeline.len(), 4);
/// # Ok::<(), oxiagg::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    config: BuilderConfig,
    predicate: Predicate,
    sort: SortSpec,
    projection: Projection,
    group: GroupSpec,
    count: Option<String>,
    skip: u64,
    limit: Option<u64>,
    joins: Vec<JoinSpec>,
    select_into_join: bool,
}

impl Aggregation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: BuilderConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Filters
    // -----------------------------------------------------------------------

    /// Equality on `field`. A null value is rejected; use `filter_null`.
    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        self.predicate.set_eq(field, value.into())?;
        Ok(self)
    }

    pub fn filter_op(
        mut self,
        field: impl Into<String>,
        operator: &str,
        value: impl Into<Value>,
    ) -> Result<Self> {
        self.predicate.set_op(field, operator, value.into())?;
        Ok(self)
    }

    pub fn filter_in<I, V>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.predicate
            .set_membership(field, Operator::In, values.into_iter().map(Into::into).collect());
        self
    }

    pub fn filter_not_in<I, V>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.predicate
            .set_membership(field, Operator::Nin, values.into_iter().map(Into::into).collect());
        self
    }

    pub fn filter_null(mut self, field: impl Into<String>) -> Self {
        self.predicate.set_null(field, Operator::Eq);
        self
    }

    pub fn filter_not_null(mut self, field: impl Into<String>) -> Self {
        self.predicate.set_null(field, Operator::Ne);
        self
    }

    /// `{field: {$gte: low, $lte: high}}`, bounds taken as given.
    pub fn filter_between(
        mut self,
        field: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.predicate.set_between(field, low.into(), high.into());
        self
    }

    pub fn or_filter<I>(mut self, alternatives: I) -> Self
    where
        I: IntoIterator<Item = Predicate>,
    {
        self.predicate.set_or(alternatives.into_iter().collect());
        self
    }

    // -----------------------------------------------------------------------
    // Shaping
    // -----------------------------------------------------------------------

    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.set(field, order);
        self
    }

    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.route_projection(Projection::include(fields));
        self
    }

    /// Output-name to source-expression renames.
    pub fn select_as<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.route_projection(Projection::rename(pairs));
        self
    }

    fn route_projection(&mut self, projection: Projection) {
        if self.select_into_join {
            self.current_join().select = Some(projection);
        } else {
            self.projection = projection;
        }
    }

    /// Replace the whole group spec.
    pub fn group(mut self, spec: GroupSpec) -> Self {
        self.group = spec;
        self
    }

    /// Group on `field` with no aggregate.
    pub fn group_by(mut self, field: impl Into<String>) -> Self {
        self.group.set(field, GroupValue::Null);
        self
    }

    /// `{field: {$sum: 1}}`
    pub fn group_count(self, field: impl Into<String>) -> Self {
        self.group_count_by(field, 1)
    }

    /// `{field: {$sum: weight}}`
    pub fn group_count_by(mut self, field: impl Into<String>, weight: impl Into<Value>) -> Self {
        self.group.set(field, GroupValue::Sum(weight.into()));
        self
    }

    /// `{field: {op: {$cond: [condition, when_true, when_false]}}}`.
    ///
    /// A null condition is only legal with `count`, which then sums
    /// `when_true` unconditionally.
    pub fn group_by_cond(
        mut self,
        field: impl Into<String>,
        operator: &str,
        condition: impl Into<Value>,
        when_true: impl Into<Value>,
        when_false: impl Into<Value>,
    ) -> Result<Self> {
        let op: GroupOp = operator.parse()?;
        let condition = condition.into();
        let value = match (op, condition.is_null()) {
            (GroupOp::Count, true) => GroupValue::Sum(when_true.into()),
            (_, true) => {
                return Err(Error::InvalidOperator(format!(
                    "accumulator {operator} requires a condition"
                )));
            }
            (op, false) => GroupValue::Conditional {
                op,
                condition,
                when_true: when_true.into(),
                when_false: when_false.into(),
            },
        };
        self.group.set(field, value);
        Ok(self)
    }

    // -----------------------------------------------------------------------
    // Pagination
    // -----------------------------------------------------------------------

    pub fn skip(mut self, n: u64) -> Self {
        self.skip = n;
        self
    }

    /// Zero clears the limit.
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = (n > 0).then_some(n);
        self
    }

    pub fn count(mut self, field: impl Into<String>) -> Self {
        self.count = Some(field.into());
        self
    }

    // -----------------------------------------------------------------------
    // Joins
    // -----------------------------------------------------------------------

    /// The join later join-specific calls configure. Creates a pending
    /// join without a target when none exists yet.
    fn current_join(&mut self) -> &mut JoinSpec {
        if self.joins.is_empty() {
            self.joins.push(JoinSpec::default());
        }
        let last = self.joins.len() - 1;
        &mut self.joins[last]
    }

    /// Fill a pending join, or begin a new one.
    fn start_join(&mut self, collection: String) -> &mut JoinSpec {
        let pending = self
            .joins
            .last()
            .is_some_and(|join| join.collection.is_none());
        if !pending {
            self.joins.push(JoinSpec::default());
        }
        let join = self.current_join();
        join.collection = Some(collection);
        join
    }

    /// Correlated join on `<collection>_id` against the primary key.
    pub fn lookup(mut self, collection: impl Into<String>) -> Self {
        self.start_join(collection.into());
        self
    }

    pub fn lookup_keys(
        mut self,
        collection: impl Into<String>,
        foreign_key: impl Into<String>,
        primary_key: impl Into<String>,
    ) -> Self {
        let join = self.start_join(collection.into());
        join.foreign_key = Some(foreign_key.into());
        join.primary_key = Some(primary_key.into());
        self
    }

    /// Join and switch `select` into the join's inner projection.
    pub fn lookup_select<I, S>(mut self, collection: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.start_join(collection.into());
        self.select_into_join = true;
        self.select(fields)
    }

    /// Inner row cap; zero or negative leaves the join unbounded.
    pub fn lookup_limit(mut self, cap: i64) -> Self {
        self.current_join().limit = Some(cap);
        self
    }

    /// Switch the join to a native `localField`/`foreignField` equi-join.
    pub fn lookup_field(
        mut self,
        local_field: impl Into<String>,
        foreign_field: impl Into<String>,
    ) -> Self {
        let join = self.current_join();
        join.local_field = Some(local_field.into());
        join.foreign_field = Some(foreign_field.into());
        self
    }

    pub fn lookup_as(mut self, alias: impl Into<String>) -> Self {
        self.current_join().alias = Some(alias.into());
        self
    }

    /// `$addFields` inside the latest join's inner pipeline. Field-equality
    /// joins open with it; correlated joins run it after the key match.
    pub fn lookup_add_fields(
        mut self,
        field: impl Into<String>,
        expression: impl Into<Value>,
    ) -> Self {
        self.current_join()
            .prelude
            .push(Stage::add_fields(field, expression));
        self
    }

    pub fn joins(&self) -> &[JoinSpec] {
        &self.joins
    }

    // -----------------------------------------------------------------------
    // Per-stage views
    // -----------------------------------------------------------------------

    pub fn match_stage(&self) -> Option<Stage> {
        (!self.predicate.is_empty()).then(|| Stage::Match(self.predicate.to_json()))
    }

    pub fn sort_stage(&self) -> Option<Stage> {
        (!self.sort.is_empty()).then(|| Stage::Sort(self.sort.clone()))
    }

    pub fn project_stage(&self) -> Option<Stage> {
        (!self.projection.is_empty()).then(|| Stage::Project(self.projection.clone()))
    }

    pub fn group_stage(&self) -> Option<Stage> {
        (!self.group.is_empty()).then(|| Stage::Group(self.group.clone()))
    }

    pub fn count_stage(&self) -> Option<Stage> {
        self.count.clone().map(Stage::Count)
    }

    pub fn limit_stage(&self) -> Option<Stage> {
        self.limit.map(Stage::Limit)
    }

    pub fn skip_stage(&self) -> Stage {
        Stage::Skip(self.skip)
    }

    fn shared(&self) -> SharedState<'_> {
        SharedState {
            predicate: &self.predicate,
            projection: &self.projection,
            group: &self.group,
            count: self.count.as_deref(),
            sort: &self.sort,
        }
    }

    /// Every configured join, expanded in configuration order.
    pub fn lookup_stages(&self) -> Result<Vec<Stage>> {
        let shared = self.shared();
        self.joins
            .iter()
            .map(|join| lookup::expand(join, &shared, &self.config))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Materialization
    // -----------------------------------------------------------------------

    /// The single highest-precedence stage:
    /// join, match, sort, project, group, count, limit, then skip.
    ///
    /// Only the first join is returned, but every join must have a target.
    pub fn stage(&self) -> Result<Stage> {
        let pending = self
            .joins
            .iter()
            .any(|join| join.collection.as_deref().is_none_or(str::is_empty));
        if pending {
            return Err(Error::MissingJoinTarget);
        }
        if let Some(join) = self.joins.first() {
            return lookup::expand(join, &self.shared(), &self.config);
        }
        let stage = self
            .match_stage()
            .or_else(|| self.sort_stage())
            .or_else(|| self.project_stage())
            .or_else(|| self.group_stage())
            .or_else(|| self.count_stage())
            .or_else(|| self.limit_stage())
            .unwrap_or_else(|| self.skip_stage());
        tracing::trace!(stage = stage.name(), "materialized single stage");
        Ok(stage)
    }

    /// Full pipeline in fixed order: match, lookups, project, group,
    /// sort, skip, limit. Call order never affects the result.
    pub fn pipeline(&self) -> Result<Pipeline> {
        let mut stages = Vec::new();
        stages.extend(self.match_stage());
        stages.extend(self.lookup_stages()?);
        stages.extend(self.project_stage());
        if self.group.len() > 1 {
            stages.push(Stage::Group(self.group.clone()));
        }
        stages.extend(self.sort_stage());
        stages.push(self.skip_stage());
        stages.extend(self.limit_stage());

        tracing::debug!(
            stages = stages.len(),
            joins = self.joins.len(),
            "materialized pipeline"
        );
        Ok(Pipeline::from_stages(stages))
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_session_is_skip_zero() {
        let pipeline = aggregation().pipeline().unwrap();
        assert_eq!(pipeline.to_json(), json!([{"$skip": 0}]));
        assert_eq!(aggregation().stage().unwrap(), Stage::Skip(0));
    }

    #[test]
    fn filter_sort_limit_scenario() {
        let pipeline = aggregation()
            .filter("status", "active")
            .unwrap()
            .sort_by("created_at", SortOrder::Desc)
            .limit(10)
            .pipeline()
            .unwrap();
        assert_eq!(
            pipeline.to_json(),
            json!([
                {"$match": {"status": {"$eq": "active"}}},
                {"$sort": {"created_at": -1}},
                {"$skip": 0},
                {"$limit": 10}
            ])
        );
    }

    #[test]
    fn invalid_operator_fails_at_call() {
        let err = aggregation().filter_op("age", "~", 3).unwrap_err();
        assert!(matches!(err, Error::InvalidOperator(_)));
    }

    #[test]
    fn null_value_needs_null_helper() {
        assert!(aggregation().filter("x", Value::Null).is_err());
        assert!(aggregation().filter_op("x", "$ne", Value::Null).is_err());
        let stage = aggregation().filter_null("x").stage().unwrap();
        assert_eq!(stage.to_json(), json!({"$match": {"x": {"$eq": null}}}));
    }

    #[test]
    fn filter_not_null_uses_ne() {
        let stage = aggregation().filter_not_null("x").stage().unwrap();
        assert_eq!(stage.to_json(), json!({"$match": {"x": {"$ne": null}}}));
    }

    #[test]
    fn group_stage_view_with_match_present() {
        let session = aggregation()
            .filter_op("age", ">=", 18)
            .unwrap()
            .group_count("city");
        assert_eq!(
            session.group_stage().unwrap().to_json(),
            json!({"$group": {"city": {"$sum": 1}}})
        );
        assert_eq!(session.stage().unwrap().name(), "$match");
    }

    #[test]
    fn single_stage_group_when_nothing_precedes_it() {
        let stage = aggregation().group_count("city").stage().unwrap();
        assert_eq!(stage.to_json(), json!({"$group": {"city": {"$sum": 1}}}));
    }

    #[test]
    fn single_stage_precedence_chain() {
        let s = aggregation()
            .skip(3)
            .limit(4)
            .count("n")
            .select(["a"])
            .sort_by("a", SortOrder::Asc);
        assert_eq!(s.stage().unwrap().name(), "$sort");
        let s = aggregation().skip(3).limit(4).count("n").select(["a"]);
        assert_eq!(s.stage().unwrap().name(), "$project");
        let s = aggregation().skip(3).limit(4).count("n");
        assert_eq!(s.stage().unwrap().to_json(), json!({"$count": "n"}));
        let s = aggregation().skip(3).limit(4);
        assert_eq!(s.stage().unwrap(), Stage::Limit(4));
        assert_eq!(aggregation().skip(3).stage().unwrap(), Stage::Skip(3));
    }

    #[test]
    fn join_takes_single_stage_precedence() {
        let stage = aggregation()
            .filter("a", 1)
            .unwrap()
            .lookup("users")
            .stage()
            .unwrap();
        assert_eq!(stage.name(), "$lookup");
    }

    #[test]
    fn group_needs_two_keys_in_full_pipeline() {
        let one = aggregation().group_count("city").pipeline().unwrap();
        assert_eq!(one.len(), 1);

        let two = aggregation()
            .group_by("_id")
            .group_count("total")
            .pipeline()
            .unwrap();
        assert_eq!(
            two.to_json(),
            json!([{"$group": {"_id": null, "total": {"$sum": 1}}}, {"$skip": 0}])
        );
    }

    #[test]
    fn group_wholesale_replace() {
        let spec = GroupSpec::from_document(&json!({"_id": "$city", "n": {"$sum": 1}})).unwrap();
        let s = aggregation().group_by("stale").group(spec);
        assert_eq!(
            s.group_stage().unwrap().to_json(),
            json!({"$group": {"_id": "$city", "n": {"$sum": 1}}})
        );
    }

    #[test]
    fn group_conditional_and_weighted() {
        let s = aggregation()
            .group_by_cond("paid", "$sum", json!({"$eq": ["$status", "paid"]}), 1, 0)
            .unwrap()
            .group_count_by("weight", "$qty")
            .group_by_cond("any", "count", Value::Null, 2, 0)
            .unwrap();
        assert_eq!(
            s.group_stage().unwrap().to_json(),
            json!({"$group": {
                "paid": {"$sum": {"$cond": [{"$eq": ["$status", "paid"]}, 1, 0]}},
                "weight": {"$sum": "$qty"},
                "any": {"$sum": 2}
            }})
        );
        assert!(aggregation()
            .group_by_cond("x", "$avg", Value::Null, 1, 0)
            .is_err());
        assert!(aggregation()
            .group_by_cond("x", "$median", json!(true), 1, 0)
            .is_err());
    }

    #[test]
    fn order_is_independent_of_call_order() {
        let a = aggregation()
            .limit(5)
            .skip(10)
            .sort_by("n", SortOrder::Asc)
            .select(["n"])
            .filter("k", 1)
            .unwrap()
            .pipeline()
            .unwrap();
        let b = aggregation()
            .filter("k", 1)
            .unwrap()
            .select(["n"])
            .sort_by("n", SortOrder::Asc)
            .skip(10)
            .limit(5)
            .pipeline()
            .unwrap();
        assert_eq!(a, b);
        let names: Vec<_> = a.stages().iter().map(Stage::name).collect();
        assert_eq!(names, ["$match", "$project", "$sort", "$skip", "$limit"]);
    }

    #[test]
    fn limit_zero_clears() {
        let p = aggregation().limit(7).limit(0).pipeline().unwrap();
        assert_eq!(p.to_json(), json!([{"$skip": 0}]));
    }

    #[test]
    fn lookup_select_routes_projection_into_join() {
        let s = aggregation()
            .select(["title"])
            .lookup_select("users", ["name", "email"]);
        let p = s.pipeline().unwrap().to_json();
        assert_eq!(p[0]["$lookup"]["pipeline"][1], json!({"$project": {"name": 1, "email": 1}}));
        assert_eq!(p[1], json!({"$project": {"title": 1}}));
    }

    #[test]
    fn join_state_before_target_is_missing_join_target() {
        let s = aggregation().lookup_as("author");
        assert!(matches!(s.pipeline(), Err(Error::MissingJoinTarget)));
        assert!(matches!(s.stage(), Err(Error::MissingJoinTarget)));

        let s = aggregation().lookup_as("author").lookup("users");
        assert_eq!(s.joins().len(), 1);
        let p = s.pipeline().unwrap().to_json();
        assert_eq!(p[0]["$lookup"]["as"], json!("author"));
    }

    #[test]
    fn single_stage_checks_every_join_target() {
        let s = aggregation().lookup("users").lookup_as("u");
        assert!(s.stage().is_ok());

        let mut s = aggregation().lookup("users");
        s.joins.push(JoinSpec::default());
        assert!(matches!(s.stage(), Err(Error::MissingJoinTarget)));
        assert!(matches!(s.pipeline(), Err(Error::MissingJoinTarget)));
    }

    #[test]
    fn correlated_join_keeps_added_fields() {
        let p = aggregation()
            .lookup("users")
            .lookup_add_fields("n", json!(1))
            .pipeline()
            .unwrap()
            .to_json();
        assert_eq!(
            p[0]["$lookup"]["pipeline"],
            json!([
                {"$match": {"$expr": {"$eq": ["$$foreign_key", "$_id"]}}},
                {"$addFields": {"n": 1}},
                {"$limit": 1}
            ])
        );
    }

    #[test]
    fn multiple_joins_flatten_in_order() {
        let p = aggregation()
            .lookup("users")
            .lookup_field("user_id", "_id")
            .lookup("orders")
            .lookup_limit(0)
            .pipeline()
            .unwrap();
        let stages = p.stages();
        assert_eq!(stages.len(), 3);
        let (Stage::Lookup(first), Stage::Lookup(second)) = (&stages[0], &stages[1]) else {
            panic!("expected two lookups, got {p}");
        };
        assert_eq!(first.from, "users");
        assert_eq!(second.from, "orders");
        assert_eq!(second.pipeline.len(), 1);
    }

    #[test]
    fn config_defaults_flow_into_join() {
        let config = BuilderConfig {
            primary_key: "uuid".into(),
            foreign_key_suffix: "_ref".into(),
            let_variable: "fk".into(),
            lookup_limit: 3,
        };
        let session = Aggregation::with_config(config);
        assert_eq!(session.config().let_variable, "fk");
        let stage = session
            .lookup("users")
            .stage()
            .unwrap()
            .to_json();
        assert_eq!(
            stage,
            json!({"$lookup": {
                "from": "users",
                "let": {"fk": "$users_ref"},
                "pipeline": [
                    {"$match": {"$expr": {"$eq": ["$$fk", "$uuid"]}}},
                    {"$limit": 3}
                ],
                "as": "users"
            }})
        );
    }
}
