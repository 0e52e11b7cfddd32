//! Storage contract against a live Postgres (set `DATABASE_URL`).

use serde_json::{Value, json};
use sqlx::PgPool;
use tagstash::application::repos::{RepoError, Storage};
use tagstash::application::repository::{Records, Repository, SIZE_FIRST};
use tagstash::cache::{CacheConfig, CacheLayer, RequestContext};
use tagstash::domain::descriptor::EntityDescriptor;
use tagstash::domain::entities::Attributes;
use tagstash::domain::query::{Condition, Direction, Query, Trashed};
use tagstash::infra::db::PostgresStore;
use time::OffsetDateTime;

fn attrs(value: Value) -> Attributes {
    match value {
        Value::Object(map) => map,
        _ => Attributes::new(),
    }
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a live Postgres database"]
async fn rows_round_trip_with_filters_and_ordering(pool: PgPool) {
    let store = PostgresStore::new(pool);
    let now = Some(OffsetDateTime::now_utc());
    let inserted = store
        .insert_many(
            "Order",
            vec![
                attrs(json!({"status": "active", "total": 5})),
                attrs(json!({"status": "active", "total": 20})),
                attrs(json!({"status": "closed", "total": 15})),
            ],
            now,
        )
        .await
        .expect("insert many");
    assert_eq!(inserted, 3);

    let query = Query::new("Order")
        .filter(Condition::eq("status", "active"))
        .filter(Condition::gte("total", 10))
        .order_by("total", Direction::Desc);
    let rows = store.find_where(&query).await.expect("find");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].attribute("total"), Some(&json!(20)));
    assert_eq!(rows[0].created_at, rows[0].updated_at);

    let count = store
        .count(&Query::new("Order").filter(Condition::one_of(
            "status",
            vec![json!("active"), json!("closed")],
        )))
        .await
        .expect("count");
    assert_eq!(count, 3);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a live Postgres database"]
async fn ids_are_allocated_per_entity_type(pool: PgPool) {
    let store = PostgresStore::new(pool);
    let order = store
        .insert("Order", Attributes::new(), None)
        .await
        .expect("order");
    let tag = store.insert("Tag", Attributes::new(), None).await.expect("tag");
    let second = store
        .insert("Order", Attributes::new(), None)
        .await
        .expect("second order");
    assert_eq!((order.id, tag.id, second.id), (1, 1, 2));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a live Postgres database"]
async fn soft_delete_restore_and_force_delete(pool: PgPool) {
    let store = PostgresStore::new(pool);
    let entity = store
        .insert("Order", attrs(json!({"status": "new"})), None)
        .await
        .expect("insert");

    assert!(
        store
            .delete("Order", entity.id, OffsetDateTime::now_utc())
            .await
            .expect("delete")
    );
    assert!(
        store
            .find("Order", entity.id, Trashed::Exclude)
            .await
            .expect("find")
            .is_none()
    );
    assert!(matches!(
        store
            .update("Order", entity.id, attrs(json!({"status": "x"})), None)
            .await,
        Err(RepoError::NotFound)
    ));
    assert!(store.restore("Order", entity.id).await.expect("restore"));

    let updated = store
        .update("Order", entity.id, attrs(json!({"total": 3})), None)
        .await
        .expect("update");
    assert_eq!(updated.attribute("status"), Some(&json!("new")));
    assert_eq!(updated.attribute("total"), Some(&json!(3)));

    assert!(store.force_delete("Order", entity.id).await.expect("force"));
    assert!(
        store
            .find("Order", entity.id, Trashed::Include)
            .await
            .expect("find")
            .is_none()
    );
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a live Postgres database"]
async fn repository_reads_through_the_cache(pool: PgPool) {
    let store = std::sync::Arc::new(PostgresStore::new(pool));
    let cache = CacheLayer::in_memory(CacheConfig::default());
    let repo = Repository::new(
        EntityDescriptor::new("Order")
            .fillable(["status"])
            .filter_scope("status", "status"),
        store,
        cache,
    );
    let ctx = RequestContext::new();
    repo.store(&ctx, attrs(json!({"status": "active"})))
        .await
        .expect("store");

    let first = repo
        .get_by_query(&ctx, attrs(json!({"status": "active"})), SIZE_FIRST)
        .await
        .expect("first");
    assert!(matches!(first, Records::First(entity) if entity.id == 1));
}
