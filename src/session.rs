//! The process-scoped handle (`Store`) and the pooled-connection session
//! underneath it.
//!
//! `Session` owns the pool and the memoized `conn_id`: the storage-session
//! identifier fetched once, at construction, via `pg_backend_pid()`. It is
//! deliberately NOT refreshed per borrowed connection — every ownership-gated
//! predicate embeds this one fixed value for the lifetime of the process, the
//! same way the coordinated system's original DAO layer keeps a single
//! `self._connectionID` alive across reconnects. A connection reacquired
//! after a transient failure may carry a different backend PID at the
//! protocol level; that's fine for idempotent reads, and is exactly why
//! writes key off the memoized value instead of asking the fresh connection
//! who it is.

use config::Config;
use errors::*;
use names::FieldNames;
use schema_version::SchemaBinding;

use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use slog::Logger;

pub type Conn = PooledConnection<ConnectionManager<PgConnection>>;

pub struct Session {
    pool: Pool<ConnectionManager<PgConnection>>,
    conn_id: i32,
}

impl Session {
    pub fn new(config: &Config) -> Result<Session> {
        let manager = ConnectionManager::<PgConnection>::new(config.database_url.clone());
        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(config.pool_timeout)
            .build(manager)
            .chain_err(|| "error building connection pool")?;

        let conn_id = {
            let mut conn = pool.get().chain_err(|| "error acquiring initial connection")?;
            fetch_backend_pid(&mut conn)?
        };

        Ok(Session { pool, conn_id })
    }

    pub fn conn_id(&self) -> i32 {
        self.conn_id
    }

    pub fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T>,
    {
        let mut conn = self.pool.get().chain_err(|| "error acquiring connection from pool")?;
        f(&mut conn)
    }
}

#[cfg(test)]
#[derive(Debug)]
struct TestTransactionCustomizer;

#[cfg(test)]
impl ::r2d2::CustomizeConnection<PgConnection, ::r2d2::Error> for TestTransactionCustomizer {
    fn on_acquire(&self, conn: &mut PgConnection) -> ::std::result::Result<(), ::r2d2::Error> {
        conn.begin_test_transaction().expect("begin_test_transaction");
        Ok(())
    }
}

#[cfg(test)]
impl Session {
    /// Builds a session around a single-connection pool whose one
    /// connection lives inside a test transaction, so every `with_conn`
    /// call across a test sees the same uncommitted state and the whole
    /// test leaves no trace once the pool (and its one connection) drops.
    fn new_for_test(database_url: &str) -> Result<Session> {
        let manager = ConnectionManager::<PgConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(1)
            .connection_customizer(Box::new(TestTransactionCustomizer))
            .build(manager)
            .chain_err(|| "error building test connection pool")?;

        let conn_id = {
            let mut conn = pool.get().chain_err(|| "error acquiring initial connection")?;
            fetch_backend_pid(&mut conn)?
        };

        Ok(Session { pool, conn_id })
    }
}

#[cfg(test)]
impl Store {
    pub(crate) fn new_for_test(database_url: &str, log: Logger, suffix: &str) -> Result<Store> {
        let session = Session::new_for_test(database_url)?;
        let schema = SchemaBinding::new(suffix);

        session.with_conn(|conn| schema.ensure(conn))?;

        Ok(Store { session, log, schema })
    }
}

fn fetch_backend_pid(conn: &mut PgConnection) -> Result<i32> {
    use diesel::sql_types::Integer;

    #[derive(QueryableByName)]
    struct Row {
        #[sql_type = "Integer"]
        pid: i32,
    }

    let row: Row = diesel::sql_query("SELECT pg_backend_pid() AS pid")
        .get_result(conn)
        .chain_err(|| "error fetching backend pid")?;
    Ok(row.pid)
}

/// The process-scoped handle callers construct once and share across
/// threads. Exposes only the Jobs API and Models API; `Session` and the
/// schema binding are internal plumbing.
pub struct Store {
    pub(crate) session: Session,
    pub(crate) log: Logger,
    pub(crate) schema: SchemaBinding,
}

impl Store {
    pub fn new(config: &Config, log: Logger) -> Result<Store> {
        let session = Session::new(config)?;
        let schema = SchemaBinding::new(&config.name_suffix);

        session.with_conn(|conn| schema.ensure(conn))?;

        Ok(Store { session, log, schema })
    }

    pub fn conn_id(&self) -> i32 {
        self.session.conn_id()
    }

    pub(crate) fn job_fields(&self) -> &FieldNames {
        &self.schema.job_fields
    }

    pub(crate) fn model_fields(&self) -> &FieldNames {
        &self.schema.model_fields
    }
}
