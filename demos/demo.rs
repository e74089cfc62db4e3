use oxiagg::{Aggregation, BuilderConfig, Predicate, SortOrder, Stage, aggregation};
use serde_json::json;

fn main() -> oxiagg::Result<()> {
    println!("=== Active users, newest first ===");
    let pipeline = aggregation()
        .filter("status", "active")?
        .sort_by("created_at", SortOrder::Desc)
        .limit(10)
        .pipeline()?;
    println!("  {pipeline}");

    println!("\n=== Adults or admins, paginated ===");
    let pipeline = aggregation()
        .filter_op("age", ">=", 18)?
        .or_filter([
            Predicate::new().filter("role", "admin")?,
            Predicate::new().filter_in("team", ["core", "infra"]),
        ])
        .select(["name", "age"])
        .skip(20)
        .limit(20)
        .pipeline()?;
    println!("  {pipeline}");

    println!("\n=== Posts with their author (correlated join) ===");
    let pipeline = aggregation()
        .filter("published", true)?
        .lookup_keys("users", "author_id", "_id")
        .lookup_as("author")
        .pipeline()?;
    println!("{}", serde_json::to_string_pretty(&pipeline)?);

    println!("\n=== Orders with line items (field join, unbounded) ===");
    let config = BuilderConfig::from_env()?;
    let pipeline = Aggregation::with_config(config)
        .lookup("items")
        .lookup_field("_id", "order_id")
        .lookup_limit(0)
        .pipeline()?;
    println!("{}", serde_json::to_string_pretty(&pipeline)?);

    println!("\n=== Paid orders per city ===");
    let group = aggregation()
        .group_by("city")
        .group_by_cond("paid", "$sum", json!({"$eq": ["$status", "paid"]}), 1, 0)?
        .stage()?;
    println!("  {}", group.to_json());

    println!("\n=== Standalone stages ===");
    for stage in [
        Stage::unwind("items", None, Some(true)),
        Stage::add_fields("total", json!({"$multiply": ["$price", "$qty"]})),
        Stage::unset("password"),
        Stage::sample(5),
    ] {
        println!("  {}", stage.to_json());
    }

    Ok(())
}
