//! PostgreSQL backend over the blocking `postgres` client.
//!
//! Every transaction runs on its own connection. Idle connections are kept in
//! a small pool so a scenario matrix does not reconnect for every actor.

use std::str::FromStr;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;
use postgres::error::SqlState;
use postgres::{Client, NoTls, Row};

use crate::config::StoreConfig;
use crate::errors::{AnomalyError, Result};
use crate::isolation::IsolationLevel;
use crate::record::{NewRecord, Record, RecordId};
use crate::storage::{Storage, StorageTransaction};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS book (
    id BIGSERIAL PRIMARY KEY,
    title TEXT NOT NULL,
    author TEXT NOT NULL,
    rating INTEGER NOT NULL
)";
const INSERT: &str = "INSERT INTO book (title, author, rating) VALUES ($1, $2, $3) RETURNING id";
const SELECT_BY_ID: &str = "SELECT id, title, author, rating FROM book WHERE id = $1";
const SELECT_ALL: &str = "SELECT id, title, author, rating FROM book ORDER BY id";
const SELECT_RATING_ABOVE: &str =
    "SELECT id, title, author, rating FROM book WHERE rating > $1 ORDER BY id";
const UPDATE: &str = "UPDATE book SET title = $2, author = $3, rating = $4 WHERE id = $1";
const DELETE_ALL: &str = "DELETE FROM book";

impl From<postgres::Error> for AnomalyError {
    fn from(err: postgres::Error) -> Self {
        match err.code() {
            Some(code)
                if *code == SqlState::T_R_SERIALIZATION_FAILURE
                    || *code == SqlState::T_R_DEADLOCK_DETECTED =>
            {
                AnomalyError::SerializationFailure(err.to_string())
            }
            _ => AnomalyError::Storage(err.to_string()),
        }
    }
}

struct Pool {
    config: postgres::Config,
    idle: Mutex<Vec<Client>>,
    max_idle: usize,
}

impl Pool {
    fn checkout(&self) -> Result<Client> {
        if let Some(client) = self.idle.lock().pop() {
            if !client.is_closed() {
                return Ok(client);
            }
        }
        debug!("Opening a new store connection");
        Ok(self.config.connect(NoTls)?)
    }

    fn checkin(&self, client: Client) {
        if client.is_closed() {
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(client);
        }
    }
}

/// [Storage] backed by a PostgreSQL database.
pub struct PgStorage {
    pool: Arc<Pool>,
}

impl PgStorage {
    /// Connects to the store described by `store` and makes sure the `book`
    /// table exists.
    ///
    /// # Errors
    ///
    /// Returns `AnomalyError::Config` if the connection string does not parse
    /// and `AnomalyError::Storage` if the store cannot be reached.
    pub fn connect(store: &StoreConfig) -> Result<Self> {
        let mut config = postgres::Config::from_str(&store.url)
            .map_err(|err| AnomalyError::Config(format!("invalid store url: {}", err)))?;
        if let Some(username) = &store.username {
            config.user(username);
        }
        if let Some(password) = &store.password {
            config.password(password);
        }
        let storage = Self {
            pool: Arc::new(Pool {
                config,
                idle: Mutex::new(Vec::new()),
                max_idle: store.pool_size.max(1),
            }),
        };
        storage.ensure_schema()?;
        Ok(storage)
    }

    pub fn ensure_schema(&self) -> Result<()> {
        let mut client = self.pool.checkout()?;
        client.batch_execute(SCHEMA)?;
        self.pool.checkin(client);
        Ok(())
    }
}

impl Storage for PgStorage {
    fn begin(&self, level: IsolationLevel) -> Result<Box<dyn StorageTransaction>> {
        let mut client = self.pool.checkout()?;
        client.batch_execute(&format!("BEGIN ISOLATION LEVEL {}", level.as_sql()))?;
        Ok(Box::new(PgTransaction {
            client: Some(client),
            pool: Arc::clone(&self.pool),
            level,
        }))
    }
}

struct PgTransaction {
    /// `None` once the transaction has been committed or rolled back.
    client: Option<Client>,
    pool: Arc<Pool>,
    level: IsolationLevel,
}

impl PgTransaction {
    fn client(&mut self) -> Result<&mut Client> {
        self.client
            .as_mut()
            .ok_or_else(|| AnomalyError::Storage("transaction already finished".to_string()))
    }

    fn finish(&mut self, statement: &str) -> Result<()> {
        let mut client = match self.client.take() {
            Some(client) => client,
            None => return Ok(()),
        };
        let result = client.batch_execute(statement);
        self.pool.checkin(client);
        Ok(result?)
    }
}

fn record_from_row(row: &Row) -> Result<Record> {
    Ok(Record::new(
        RecordId::new(row.try_get("id")?),
        row.try_get::<_, String>("title")?,
        row.try_get::<_, String>("author")?,
        row.try_get("rating")?,
    ))
}

impl StorageTransaction for PgTransaction {
    fn level(&self) -> IsolationLevel {
        self.level
    }

    fn insert(&mut self, record: &NewRecord) -> Result<Record> {
        let row = self
            .client()?
            .query_one(INSERT, &[&record.title, &record.author, &record.rating])?;
        let id: i64 = row.try_get("id")?;
        Ok(Record::with_identity(RecordId::new(id), record.clone()))
    }

    fn select_by_id(&mut self, id: RecordId) -> Result<Option<Record>> {
        let row = self.client()?.query_opt(SELECT_BY_ID, &[&id.get()])?;
        row.as_ref().map(record_from_row).transpose()
    }

    fn select_all(&mut self) -> Result<Vec<Record>> {
        let rows = self.client()?.query(SELECT_ALL, &[])?;
        rows.iter().map(record_from_row).collect()
    }

    fn select_rating_above(&mut self, threshold: i32) -> Result<Vec<Record>> {
        let rows = self.client()?.query(SELECT_RATING_ABOVE, &[&threshold])?;
        rows.iter().map(record_from_row).collect()
    }

    fn update(&mut self, record: &Record) -> Result<bool> {
        let updated = self.client()?.execute(
            UPDATE,
            &[
                &record.id().get(),
                &record.title,
                &record.author,
                &record.rating,
            ],
        )?;
        Ok(updated > 0)
    }

    fn delete_all(&mut self) -> Result<u64> {
        Ok(self.client()?.execute(DELETE_ALL, &[])?)
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.finish("COMMIT")
    }

    fn rollback(mut self: Box<Self>) -> Result<()> {
        self.finish("ROLLBACK")
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        if self.client.is_some() {
            warn!("Transaction at {} dropped while open, rolling back", self.level);
            if let Err(err) = self.finish("ROLLBACK") {
                warn!("Rollback of dropped transaction failed: {}", err);
            }
        }
    }
}
