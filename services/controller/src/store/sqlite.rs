//! SQLite-backed resource store.
//!
//! One table holds every kind; bodies are stored as JSON so the schema does
//! not follow the resource types.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::debug;

use super::{prepare_create, prepare_delete, prepare_update, ResourceStore, StoreResult, Write};
use crate::model::Resource;

/// Durable store shared by every resource kind.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init(conn)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS resources (
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                version INTEGER NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (kind, name)
            );
            "#,
        )?;
        debug!("Resource store schema initialized");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn load<T: Resource>(conn: &Connection, name: &str) -> StoreResult<Option<T>> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM resources WHERE kind = ?1 AND name = ?2",
            params![T::KIND, name],
            |row| row.get(0),
        )
        .optional()?;

    body.map(|b| serde_json::from_str(&b).map_err(Into::into))
        .transpose()
}

fn put<T: Resource>(conn: &Connection, resource: &T) -> StoreResult<()> {
    let body = serde_json::to_string(resource)?;
    conn.execute(
        r#"
        INSERT INTO resources (kind, name, version, body) VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(kind, name) DO UPDATE SET version = excluded.version, body = excluded.body
        "#,
        params![
            T::KIND,
            resource.name(),
            resource.meta().version as i64,
            body
        ],
    )?;
    Ok(())
}

fn remove<T: Resource>(conn: &Connection, name: &str) -> StoreResult<()> {
    conn.execute(
        "DELETE FROM resources WHERE kind = ?1 AND name = ?2",
        params![T::KIND, name],
    )?;
    Ok(())
}

#[async_trait]
impl<T: Resource> ResourceStore<T> for SqliteStore {
    async fn create(&self, resource: T) -> StoreResult<T> {
        let conn = self.conn.lock().await;
        let existing = load::<T>(&conn, resource.name())?;
        let resource = prepare_create(existing.as_ref(), resource)?;
        put(&conn, &resource)?;
        Ok(resource)
    }

    async fn get(&self, name: &str) -> StoreResult<Option<T>> {
        let conn = self.conn.lock().await;
        load(&conn, name)
    }

    async fn list(&self) -> StoreResult<Vec<T>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT body FROM resources WHERE kind = ?1 ORDER BY name")?;
        let bodies = stmt
            .query_map(params![T::KIND], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        bodies
            .iter()
            .map(|b| serde_json::from_str(b).map_err(Into::into))
            .collect()
    }

    async fn update(&self, resource: T) -> StoreResult<Option<T>> {
        let conn = self.conn.lock().await;
        let name = resource.name().to_string();
        let current = load::<T>(&conn, &name)?;

        match prepare_update(current.as_ref(), resource)? {
            Write::Put(resource) => {
                put(&conn, &resource)?;
                Ok(Some(resource))
            }
            Write::Remove => {
                remove::<T>(&conn, &name)?;
                Ok(None)
            }
        }
    }

    async fn delete(&self, name: &str) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        match prepare_delete(load::<T>(&conn, name)?, name)? {
            Write::Put(resource) => put(&conn, &resource),
            Write::Remove => remove::<T>(&conn, name),
        }
    }

    async fn health_check(&self) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}
