use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::{Any, AnyConnection, AnyPool};
use tracing::warn;

use crate::models::{File, Paste};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS paste (
        slug TEXT PRIMARY KEY NOT NULL,
        expiry TEXT NOT NULL,
        exp_date DATETIME NOT NULL,
        removal TEXT NOT NULL UNIQUE,
        origin TEXT NOT NULL,
        created_at DATETIME NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS file (
        slug TEXT PRIMARY KEY NOT NULL,
        paste_slug TEXT NOT NULL REFERENCES paste (slug) ON DELETE CASCADE,
        position INTEGER NOT NULL,
        lexer TEXT NOT NULL,
        raw TEXT NOT NULL,
        filename TEXT
    )",
    "CREATE INDEX IF NOT EXISTS file_paste_slug ON file (paste_slug, position)",
];

const PASTE_COLUMNS: &str = "slug, expiry, exp_date, removal, origin, created_at";
const FILE_COLUMNS: &str = "slug, paste_slug, position, lexer, raw, filename";

#[derive(Clone)]
pub struct Database {
    pool: AnyPool,
}

impl Database {
    /// Connect to a database by URL.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            pool: AnyPool::connect(url).await?,
        })
    }

    /// Create the tables if they do not exist yet.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Start a scoped transaction for reads.
    pub async fn begin(&self) -> crate::AppResult<Session> {
        Session::start(&self.pool, "BEGIN").await
    }

    /// Start a scoped transaction that holds the write lock from the start.
    ///
    /// SQLite cannot upgrade a deferred transaction's read lock while another
    /// writer is active, so writers take the lock in `BEGIN` and queue on the
    /// busy timeout instead.
    pub async fn begin_write(&self) -> crate::AppResult<Session> {
        Session::start(&self.pool, "BEGIN IMMEDIATE").await
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }
}

/// A unit of work against the store.
///
/// Nothing is persisted until [`Session::commit`]; dropping a session rolls
/// it back before its connection goes back to the pool.
pub struct Session {
    conn: Option<PoolConnection<Any>>,
}

impl Session {
    async fn start(pool: &AnyPool, begin: &str) -> crate::AppResult<Self> {
        let mut conn = pool.acquire().await?;
        sqlx::query(begin).execute(&mut *conn).await?;
        Ok(Session { conn: Some(conn) })
    }

    fn conn(&mut self) -> &mut AnyConnection {
        // only `commit` and `drop` take the connection, and both end the session
        self.conn
            .as_mut()
            .expect("session connection is present until the session ends")
    }

    pub async fn commit(mut self) -> crate::AppResult<()> {
        sqlx::query("COMMIT").execute(self.conn()).await?;
        // back to the pool, outside of any transaction
        self.conn.take();
        Ok(())
    }

    pub async fn count_pastes(&mut self) -> crate::AppResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM paste")
            .fetch_one(self.conn())
            .await?;
        Ok(count.max(0) as u64)
    }

    /// Whether a slug is used by any paste or file.
    pub async fn slug_taken(&mut self, slug: &str) -> crate::AppResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT (SELECT COUNT(*) FROM paste WHERE slug = ?) + (SELECT COUNT(*) FROM file \
             WHERE slug = ?)",
        )
        .bind(slug)
        .bind(slug)
        .fetch_one(self.conn())
        .await?;
        Ok(count > 0)
    }

    pub async fn get_paste(&mut self, slug: &str) -> crate::AppResult<Option<Paste>> {
        let paste = sqlx::query_as::<_, Paste>(&format!(
            "SELECT {PASTE_COLUMNS} FROM paste WHERE slug = ?"
        ))
        .bind(slug)
        .fetch_optional(self.conn())
        .await?;
        Ok(paste)
    }

    pub async fn get_paste_by_removal(&mut self, removal: &str) -> crate::AppResult<Option<Paste>> {
        let paste = sqlx::query_as::<_, Paste>(&format!(
            "SELECT {PASTE_COLUMNS} FROM paste WHERE removal = ?"
        ))
        .bind(removal)
        .fetch_optional(self.conn())
        .await?;
        Ok(paste)
    }

    /// Delete every paste that expired before `now` along with its files,
    /// returning how many pastes were removed.
    pub async fn delete_expired(&mut self, now: &DateTime<Utc>) -> crate::AppResult<u64> {
        sqlx::query(
            "DELETE FROM file WHERE paste_slug IN (SELECT slug FROM paste WHERE exp_date < ?)",
        )
        .bind(*now)
        .execute(self.conn())
        .await?;
        let result = sqlx::query("DELETE FROM paste WHERE exp_date < ?")
            .bind(*now)
            .execute(self.conn())
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn get_file(&mut self, slug: &str) -> crate::AppResult<Option<File>> {
        let file = sqlx::query_as::<_, File>(&format!(
            "SELECT {FILE_COLUMNS} FROM file WHERE slug = ?"
        ))
        .bind(slug)
        .fetch_optional(self.conn())
        .await?;
        Ok(file)
    }

    /// Files of a paste in submission order.
    pub async fn get_files(&mut self, paste_slug: &str) -> crate::AppResult<Vec<File>> {
        let files = sqlx::query_as::<_, File>(&format!(
            "SELECT {FILE_COLUMNS} FROM file WHERE paste_slug = ? ORDER BY position"
        ))
        .bind(paste_slug)
        .fetch_all(self.conn())
        .await?;
        Ok(files)
    }

    pub async fn insert_paste(&mut self, paste: &Paste) -> crate::AppResult<()> {
        sqlx::query(&format!(
            "INSERT INTO paste ({PASTE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)"
        ))
        .bind(&paste.slug)
        .bind(&paste.expiry)
        .bind(paste.exp_date)
        .bind(&paste.removal)
        .bind(&paste.origin)
        .bind(paste.created_at)
        .execute(self.conn())
        .await?;
        Ok(())
    }

    pub async fn insert_file(&mut self, file: &File) -> crate::AppResult<()> {
        sqlx::query(&format!(
            "INSERT INTO file ({FILE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)"
        ))
        .bind(&file.slug)
        .bind(&file.paste_slug)
        .bind(file.position)
        .bind(&file.lexer)
        .bind(&file.raw)
        .bind(&file.filename)
        .execute(self.conn())
        .await?;
        Ok(())
    }

    /// Delete a paste and all of its files.
    pub async fn delete_paste(&mut self, slug: &str) -> crate::AppResult<()> {
        sqlx::query("DELETE FROM file WHERE paste_slug = ?")
            .bind(slug)
            .execute(self.conn())
            .await?;
        sqlx::query("DELETE FROM paste WHERE slug = ?")
            .bind(slug)
            .execute(self.conn())
            .await?;
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(error) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                        warn!("failed to roll back session, closing its connection: {error}");
                        drop(conn.detach());
                    }
                });
            }
            // no runtime left to roll back on; never hand the pool a connection
            // that is still inside a transaction
            Err(_) => drop(conn.detach()),
        }
    }
}
