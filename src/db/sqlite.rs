//! SQLite-backed collections. Each collection is one row holding its JSON
//! array; a batch of collection writes commits in a single transaction.

use std::path::Path;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use serde_json::Value;

use super::{Collection, CollectionWrite, DocumentStore, StoreResult};

pub type DbPool = Pool<SqliteConnectionManager>;

const MIGRATIONS: &[(&str, &str)] = &[(
    "001_collections",
    include_str!("../../migrations/001_collections.sql"),
)];

pub fn create_pool(db_path: &Path) -> StoreResult<DbPool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        conn.execute_batch(
            "
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            ",
        )
    });
    let pool = Pool::builder().max_size(8).build(manager)?;

    let conn = pool.get()?;
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;

    Ok(pool)
}

pub fn run_migrations(pool: &DbPool) -> StoreResult<()> {
    let conn = pool.get()?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    for (name, sql) in MIGRATIONS {
        let already_applied: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM schema_version WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;

        if !already_applied {
            tracing::info!("Applying migration: {}", name);
            conn.execute_batch(sql)?;
            conn.execute(
                "INSERT INTO schema_version (name) VALUES (?1)",
                params![name],
            )?;
        }
    }

    tracing::debug!("Database migrations complete");
    Ok(())
}

pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Open (or create) the database file and apply migrations.
    pub fn open(db_path: &Path) -> StoreResult<Self> {
        let pool = create_pool(db_path)?;
        run_migrations(&pool)?;
        Ok(Self::new(pool))
    }

    fn upsert(
        conn: &rusqlite::Connection,
        collection: Collection,
        records: &[Value],
    ) -> StoreResult<()> {
        let body = serde_json::to_string(records)?;
        conn.execute(
            "INSERT INTO collections (name, body, updated_at)
             VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(name) DO UPDATE SET
               body = excluded.body,
               updated_at = excluded.updated_at",
            params![collection.name(), body],
        )?;
        Ok(())
    }
}

impl DocumentStore for SqliteStore {
    fn load(&self, collection: Collection) -> StoreResult<Vec<Value>> {
        let conn = self.pool.get()?;

        let result: Result<String, rusqlite::Error> = conn.query_row(
            "SELECT body FROM collections WHERE name = ?1",
            params![collection.name()],
            |row| row.get(0),
        );

        match result {
            Ok(body) => match serde_json::from_str::<Value>(&body) {
                Ok(Value::Array(records)) => Ok(records),
                Ok(_) | Err(_) => {
                    tracing::warn!(
                        "Stored {} is not a JSON array; treating as empty",
                        collection
                    );
                    Ok(Vec::new())
                }
            },
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, collection: Collection, records: &[Value]) -> StoreResult<()> {
        let conn = self.pool.get()?;
        Self::upsert(&conn, collection, records)
    }

    fn save_batch(&self, writes: &[CollectionWrite]) -> StoreResult<()> {
        let conn = self.pool.get()?;

        conn.execute("BEGIN IMMEDIATE", [])?;

        let result: StoreResult<()> = (|| {
            for (collection, records) in writes {
                Self::upsert(&conn, *collection, records)?;
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                conn.execute("COMMIT", [])?;
                Ok(())
            }
            Err(e) => {
                conn.execute("ROLLBACK", [])?;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_store() -> (SqliteStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteStore::open(&temp_dir.path().join("sub/test.db")).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn create_pool_creates_db_file() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("sub/dir/test.db");
        let pool = create_pool(&db_path).unwrap();
        assert!(db_path.exists());
        let conn = pool.get().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[test]
    fn migrations_are_idempotent() {
        let (store, _tmp) = create_test_store();
        run_migrations(&store.pool).unwrap();

        let conn = store.pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);
    }

    #[test]
    fn unknown_collection_loads_empty() {
        let (store, _tmp) = create_test_store();
        assert!(store.load(Collection::Posts).unwrap().is_empty());
    }

    #[test]
    fn save_replaces_whole_collection() {
        let (store, _tmp) = create_test_store();
        store
            .save(Collection::Posts, &[json!({"id": 1}), json!({"id": 2})])
            .unwrap();
        store.save(Collection::Posts, &[json!({"id": 3})]).unwrap();
        assert_eq!(store.load(Collection::Posts).unwrap(), vec![json!({"id": 3})]);
    }

    #[test]
    fn corrupt_body_loads_empty() {
        let (store, _tmp) = create_test_store();
        let conn = store.pool.get().unwrap();
        conn.execute(
            "INSERT INTO collections (name, body) VALUES ('posts', 'not json')",
            [],
        )
        .unwrap();
        drop(conn);
        assert!(store.load(Collection::Posts).unwrap().is_empty());
    }

    #[test]
    fn batch_is_all_or_nothing() {
        let (store, _tmp) = create_test_store();
        store.save(Collection::Users, &[json!({"username": "a"})]).unwrap();

        let conn = store.pool.get().unwrap();
        conn.execute_batch(
            "CREATE TRIGGER reject_posts BEFORE INSERT ON collections
             WHEN NEW.name = 'posts'
             BEGIN SELECT RAISE(ABORT, 'posts rejected'); END;",
        )
        .unwrap();
        drop(conn);

        let writes = vec![
            (Collection::Users, vec![]),
            (Collection::Posts, vec![json!({"id": 1})]),
        ];
        assert!(store.save_batch(&writes).is_err());

        assert_eq!(store.load(Collection::Users).unwrap().len(), 1);
        assert!(store.load(Collection::Posts).unwrap().is_empty());
    }

    #[test]
    fn batch_commits_every_collection() {
        let (store, _tmp) = create_test_store();
        let writes = vec![
            (Collection::Conferences, vec![json!({"id": 1})]),
            (Collection::PendingConferences, vec![]),
        ];
        store.save_batch(&writes).unwrap();
        assert_eq!(store.load(Collection::Conferences).unwrap().len(), 1);
        assert!(store.load(Collection::PendingConferences).unwrap().is_empty());
    }
}
