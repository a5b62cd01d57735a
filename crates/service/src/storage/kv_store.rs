use std::time::Duration;

use configs::PoolConfig;
use migration::MigratorTrait;
use models::db::ConnectionDescriptor;
use models::kv_value;
use sea_orm::sea_query::{Alias, Expr, Func, SimpleExpr};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseBackend, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QuerySelect, Set, SqlErr,
    TransactionError, TransactionTrait,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::errors::ServiceError;

pub const DEFAULT_NAMESPACE: &str = "default";

const MAX_WRITE_ATTEMPTS: u32 = 5;

/// Key-value store over a relational engine.
///
/// Values are stored as JSON text under (entity, namespace, key); entities are
/// case-insensitive. Every call runs in its own transaction.
#[derive(Clone)]
pub struct KvStore {
    db: DatabaseConnection,
    descriptor: ConnectionDescriptor,
}

/// Decode a stored value, falling back to the raw text when it is not JSON.
///
/// Engines may hand back a coerced number instead of the JSON text that was
/// written; reading through a text cast makes both forms decode identically.
pub fn decode_value(raw: Option<String>) -> Value {
    match raw {
        None => Value::Null,
        Some(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
    }
}

fn encode_value<V: Serialize + ?Sized>(value: &V) -> Result<String, ServiceError> {
    serde_json::to_string(value).map_err(|e| ServiceError::Serialization(e.to_string()))
}

fn flatten(e: TransactionError<DbErr>) -> DbErr {
    match e {
        TransactionError::Connection(e) | TransactionError::Transaction(e) => e,
    }
}

/// Insert races and lock conflicts are worth another attempt.
fn is_retryable(e: &DbErr) -> bool {
    if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
        return true;
    }
    let msg = e.to_string().to_ascii_lowercase();
    ["database is locked", "deadlock", "could not serialize"]
        .iter()
        .any(|m| msg.contains(m))
}

fn text_cast_type(backend: DatabaseBackend) -> &'static str {
    match backend {
        DatabaseBackend::MySql => "CHAR",
        _ => "TEXT",
    }
}

impl KvStore {
    /// Connect and make sure the schema exists.
    pub async fn open(descriptor: &ConnectionDescriptor, pool: &PoolConfig) -> Result<Self, ServiceError> {
        if let Some(file) = descriptor.file_path() {
            common::env::ensure_parent_dir(file)
                .await
                .map_err(|e| ServiceError::Connection(e.to_string()))?;
        }

        let db = models::db::connect(descriptor, pool).await.map_err(|e| {
            error!(url = %descriptor, error = %e, "unable to connect to database");
            ServiceError::Connection(e.to_string())
        })?;
        db.ping().await.map_err(|e| ServiceError::Connection(e.to_string()))?;

        migration::Migrator::up(&db, None)
            .await
            .map_err(|e| ServiceError::Connection(format!("schema setup failed: {e}")))?;

        info!(engine = descriptor.engine.name(), "key-value store ready");
        Ok(Self { db, descriptor: descriptor.clone() })
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    pub fn backend(&self) -> DatabaseBackend {
        self.db.get_database_backend()
    }

    /// Raw connection for callers that need SQL the store does not offer.
    ///
    /// Fine for sqlite. On networked engines prefer the store methods: they
    /// keep transactions short, while raw access can hold pool connections
    /// and locks for as long as the caller likes.
    pub fn connection(&self) -> &DatabaseConnection {
        if !self.descriptor.is_sqlite() {
            warn!(
                engine = self.descriptor.engine.name(),
                "raw connection requested on a networked database; prefer KvStore methods"
            );
        }
        &self.db
    }

    pub async fn get(&self, entity: &str, key: &str) -> Result<Option<Value>, ServiceError> {
        self.get_in(entity, key, DEFAULT_NAMESPACE).await
    }

    pub async fn set<V: Serialize + ?Sized>(&self, entity: &str, key: &str, value: &V) -> Result<(), ServiceError> {
        self.set_in(entity, key, value, DEFAULT_NAMESPACE).await
    }

    pub async fn delete(&self, entity: &str, key: &str) -> Result<bool, ServiceError> {
        self.delete_in(entity, key, DEFAULT_NAMESPACE).await
    }

    /// Fetch and deserialize into `T`; `Ok(None)` when the triple is absent.
    pub async fn get_as<T: DeserializeOwned>(
        &self,
        entity: &str,
        key: &str,
        namespace: &str,
    ) -> Result<Option<T>, ServiceError> {
        match self.get_in(entity, key, namespace).await? {
            Some(v) => serde_json::from_value(v)
                .map(Some)
                .map_err(|e| ServiceError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    /// Read a value. Missing triples are `Ok(None)`, stored JSON `null` is
    /// `Ok(Some(Value::Null))`.
    #[instrument(skip(self), level = "debug")]
    pub async fn get_in(&self, entity: &str, key: &str, namespace: &str) -> Result<Option<Value>, ServiceError> {
        let owner = entity.to_lowercase();
        let namespace = namespace.to_string();
        let key = key.to_string();
        let cast = text_cast_type(self.backend());

        let raw = self
            .db
            .transaction::<_, Option<Option<String>>, DbErr>(move |txn| {
                Box::pin(async move {
                    let value: SimpleExpr = Func::cast_as(Expr::col(kv_value::Column::Value), Alias::new(cast)).into();
                    kv_value::Entity::find()
                        .select_only()
                        .column_as(value, "value")
                        .filter(kv_value::Column::Owner.eq(owner))
                        .filter(kv_value::Column::Namespace.eq(namespace))
                        .filter(kv_value::Column::Key.eq(key))
                        .into_tuple::<Option<String>>()
                        .one(txn)
                        .await
                })
            })
            .await
            .map_err(|e| ServiceError::persistence(flatten(e)))?;

        Ok(raw.map(decode_value))
    }

    /// Insert or update a value. Concurrent writers of the same triple are
    /// serialised by the engine; the loser of an insert race retries.
    #[instrument(skip(self, value), level = "debug")]
    pub async fn set_in<V: Serialize + ?Sized>(
        &self,
        entity: &str,
        key: &str,
        value: &V,
        namespace: &str,
    ) -> Result<(), ServiceError> {
        let owner = entity.to_lowercase();
        let encoded = encode_value(value)?;

        let mut attempt = 1;
        loop {
            match self.upsert(&owner, namespace, key, &encoded).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < MAX_WRITE_ATTEMPTS && is_retryable(&e) => {
                    debug!(attempt, error = %e, "retrying conflicting write");
                    tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(entity = %owner, %namespace, %key, error = %e, "set failed");
                    return Err(ServiceError::persistence(e));
                }
            }
        }
    }

    async fn upsert(&self, owner: &str, namespace: &str, key: &str, encoded: &str) -> Result<(), DbErr> {
        let (owner, namespace, key, encoded) =
            (owner.to_string(), namespace.to_string(), key.to_string(), encoded.to_string());

        self.db
            .transaction::<_, (), DbErr>(move |txn| {
                Box::pin(async move {
                    // Writing first takes the write lock up front.
                    let updated = kv_value::Entity::update_many()
                        .col_expr(kv_value::Column::Value, Expr::value(encoded.clone()))
                        .filter(kv_value::Column::Owner.eq(owner.clone()))
                        .filter(kv_value::Column::Namespace.eq(namespace.clone()))
                        .filter(kv_value::Column::Key.eq(key.clone()))
                        .exec(txn)
                        .await?;
                    if updated.rows_affected > 0 {
                        return Ok(());
                    }

                    // MySQL reports zero affected rows when the value is unchanged.
                    let pk = (owner.clone(), namespace.clone(), key.clone());
                    if kv_value::Entity::find_by_id(pk).one(txn).await?.is_some() {
                        return Ok(());
                    }

                    let row = kv_value::ActiveModel {
                        owner: Set(owner),
                        namespace: Set(namespace),
                        key: Set(key),
                        value: Set(Some(encoded)),
                    };
                    kv_value::Entity::insert(row).exec_without_returning(txn).await?;
                    Ok(())
                })
            })
            .await
            .map_err(flatten)
    }

    /// Remove a value; returns whether a row existed. Missing rows are not an error.
    #[instrument(skip(self), level = "debug")]
    pub async fn delete_in(&self, entity: &str, key: &str, namespace: &str) -> Result<bool, ServiceError> {
        let pk = (entity.to_lowercase(), namespace.to_string(), key.to_string());

        let removed = self
            .db
            .transaction::<_, u64, DbErr>(move |txn| {
                Box::pin(async move {
                    let res = kv_value::Entity::delete_by_id(pk).exec(txn).await?;
                    Ok(res.rows_affected)
                })
            })
            .await
            .map_err(|e| ServiceError::persistence(flatten(e)))?;

        Ok(removed > 0)
    }

    /// Release the connection pool.
    pub async fn close(self) -> Result<(), ServiceError> {
        self.db.close().await.map_err(ServiceError::persistence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{cleanup, temp_store};
    use sea_orm::{PaginatorTrait, Statement};
    use serde::Deserialize;
    use serde_json::json;

    #[tokio::test]
    async fn round_trip_json_values() -> Result<(), anyhow::Error> {
        let (store, path) = temp_store().await?;
        let values = [
            json!("plain text"),
            json!(42),
            json!(3.5),
            json!(true),
            json!(null),
            json!({"theme": "dark", "sizes": [1, 2, 3]}),
            json!(["a", {"b": null}]),
            json!("ünïcødé ✓"),
            json!("42"),
        ];
        for (i, v) in values.iter().enumerate() {
            let key = format!("k{i}");
            store.set_in("movie", &key, v, "meta").await?;
            assert_eq!(store.get_in("movie", &key, "meta").await?, Some(v.clone()), "value {i}");
        }
        cleanup(store, &path).await;
        Ok(())
    }

    #[tokio::test]
    async fn entity_is_case_insensitive() -> Result<(), anyhow::Error> {
        let (store, path) = temp_store().await?;
        store.set("Foo", "k", &json!(1)).await?;
        assert_eq!(store.get("foo", "k").await?, Some(json!(1)));
        assert_eq!(store.get("FOO", "k").await?, Some(json!(1)));
        store.set("fOO", "k", &json!(2)).await?;
        let rows = kv_value::Entity::find().count(store.connection()).await?;
        assert_eq!(rows, 1);
        assert_eq!(store.get("foo", "k").await?, Some(json!(2)));
        cleanup(store, &path).await;
        Ok(())
    }

    #[tokio::test]
    async fn namespaces_are_isolated() -> Result<(), anyhow::Error> {
        let (store, path) = temp_store().await?;
        store.set_in("e", "k", &json!("v1"), "a").await?;
        store.set_in("e", "k", &json!("v2"), "b").await?;
        assert_eq!(store.get_in("e", "k", "a").await?, Some(json!("v1")));
        assert_eq!(store.get_in("e", "k", "b").await?, Some(json!("v2")));
        assert_eq!(store.get("e", "k").await?, None);
        cleanup(store, &path).await;
        Ok(())
    }

    #[tokio::test]
    async fn delete_is_idempotent() -> Result<(), anyhow::Error> {
        let (store, path) = temp_store().await?;
        store.set("e", "k", &json!({"x": 1})).await?;
        assert!(store.delete("e", "k").await?);
        assert_eq!(store.get("e", "k").await?, None);
        assert!(!store.delete("e", "k").await?);
        assert_eq!(store.get("e", "k").await?, None);
        cleanup(store, &path).await;
        Ok(())
    }

    #[tokio::test]
    async fn missing_key_is_none_and_not_created() -> Result<(), anyhow::Error> {
        let (store, path) = temp_store().await?;
        assert_eq!(store.get("nobody", "nothing").await?, None);
        assert_eq!(kv_value::Entity::find().count(store.connection()).await?, 0);
        cleanup(store, &path).await;
        Ok(())
    }

    #[tokio::test]
    async fn stored_null_is_distinct_from_missing() -> Result<(), anyhow::Error> {
        let (store, path) = temp_store().await?;
        store.set("e", "k", &Value::Null).await?;
        assert_eq!(store.get("e", "k").await?, Some(Value::Null));
        cleanup(store, &path).await;
        Ok(())
    }

    #[tokio::test]
    async fn tolerant_decode_of_foreign_rows() -> Result<(), anyhow::Error> {
        let (store, path) = temp_store().await?;
        let sql = format!(
            "INSERT INTO {} (\"entity\", \"namespace\", \"key\", \"value\") VALUES \
             ('e', 'default', 'raw', 'not json'), \
             ('e', 'default', 'num', 42), \
             ('e', 'default', 'nul', NULL)",
            kv_value::TABLE_NAME
        );
        store
            .connection()
            .execute(Statement::from_string(store.backend(), sql))
            .await?;

        assert_eq!(store.get("e", "raw").await?, Some(json!("not json")));
        assert_eq!(store.get("e", "num").await?, Some(json!(42)));
        assert_eq!(store.get("e", "nul").await?, Some(Value::Null));
        cleanup(store, &path).await;
        Ok(())
    }

    #[test]
    fn decode_value_falls_back_to_text() {
        assert_eq!(decode_value(None), Value::Null);
        assert_eq!(decode_value(Some("null".into())), Value::Null);
        assert_eq!(decode_value(Some("42".into())), json!(42));
        assert_eq!(decode_value(Some("\"42\"".into())), json!("42"));
        assert_eq!(decode_value(Some("{broken".into())), json!("{broken"));
        assert_eq!(decode_value(Some(String::new())), json!(""));
    }

    #[tokio::test]
    async fn typed_get() -> Result<(), anyhow::Error> {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Prefs {
            volume: u8,
            muted: bool,
        }

        let (store, path) = temp_store().await?;
        let prefs = Prefs { volume: 7, muted: false };
        store.set_in("user", "prefs", &prefs, "ui").await?;
        assert_eq!(store.get_as::<Prefs>("user", "prefs", "ui").await?, Some(prefs));
        assert_eq!(store.get_as::<Prefs>("user", "other", "ui").await?, None);
        assert!(store.get_as::<u32>("user", "prefs", "ui").await.is_err());
        cleanup(store, &path).await;
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_writes_to_one_triple() -> Result<(), anyhow::Error> {
        let (store, path) = temp_store().await?;
        let mut tasks = Vec::new();
        for i in 0..4 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move { store.set("race", "k", &json!(i)).await }));
        }
        for t in tasks {
            t.await??;
        }
        let v = store.get("race", "k").await?.expect("value written");
        assert!((0..4).any(|i| v == json!(i)));
        assert_eq!(kv_value::Entity::find().count(store.connection()).await?, 1);
        cleanup(store, &path).await;
        Ok(())
    }

    #[tokio::test]
    async fn reopen_keeps_data_and_schema() -> Result<(), anyhow::Error> {
        let (store, path) = temp_store().await?;
        store.set("e", "k", &json!([1, 2])).await?;
        let descriptor = store.descriptor().clone();
        store.close().await?;

        let reopened = KvStore::open(&descriptor, &PoolConfig::default()).await?;
        assert_eq!(reopened.get("e", "k").await?, Some(json!([1, 2])));
        cleanup(reopened, &path).await;
        Ok(())
    }

    #[tokio::test]
    async fn in_memory_store_outlives_pool_timeouts() -> Result<(), anyhow::Error> {
        let cfg = configs::DatabaseConfig { path: models::db::SQLITE_MEMORY.into(), ..configs::DatabaseConfig::default() };
        let descriptor = models::db::resolve(&cfg)?;
        let pool = PoolConfig { max_lifetime_secs: 1, idle_timeout_secs: 1, ..PoolConfig::default() };
        let store = KvStore::open(&descriptor, &pool).await?;

        store.set("e", "k", &json!(1)).await?;
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(store.get("e", "k").await?, Some(json!(1)));
        store.set("e", "k2", &json!("two")).await?;
        assert_eq!(kv_value::Entity::find().count(store.connection()).await?, 2);
        store.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn open_fails_for_unreachable_engine() {
        let cfg = configs::DatabaseConfig {
            kind: "postgres".into(),
            host: Some("127.0.0.1".into()),
            port: Some(1),
            user: Some("rollar".into()),
            pass: Some("nope".into()),
            pool: PoolConfig { connect_timeout_secs: 2, acquire_timeout_secs: 2, ..PoolConfig::default() },
            ..configs::DatabaseConfig::default()
        };
        let descriptor = models::db::resolve(&cfg).expect("descriptor");
        let pool = cfg.pool.clone();
        let err = KvStore::open(&descriptor, &pool).await.err().expect("open must fail");
        assert!(matches!(err, ServiceError::Connection(_)));
    }
}
