//! Schema provisioning and versioning.
//!
//! The physical namespace is `<root>_v<version>_<suffix>`. Postgres has no
//! MySQL-style "database per tenant reachable over one connection", so this
//! crate maps the namespace onto a Postgres **schema** plus `search_path`,
//! which keeps the `table!` macros in `schema.rs` static while still giving
//! every `(version, suffix)` pair an isolated set of tables.

use errors::*;
use names::FieldNames;

use diesel::connection::Connection;
use diesel::pg::PgConnection;

/// Carried verbatim from the coordinated system's root database name.
pub const DB_ROOT_NAME: &str = "client_jobs";

/// Bumped on incompatible schema change. Seeded at the last version known
/// from the system this store coordinates for.
pub const SCHEMA_VERSION: u32 = 29;

pub const JOB_COLUMNS: &[&str] = &[
    "id",
    "client",
    "client_info",
    "client_key",
    "cmd_line",
    "params",
    "job_hash",
    "status",
    "completion_reason",
    "completion_msg",
    "worker_completion_reason",
    "worker_completion_msg",
    "cancel",
    "start_time",
    "end_time",
    "_eng_last_update_time",
    "results",
    "_eng_cjm_conn_id",
    "_eng_worker_state",
    "_eng_status",
    "_eng_model_milestones",
    "minimum_workers",
    "maximum_workers",
    "priority",
    "_eng_allocate_new_workers",
    "_eng_untended_dead_workers",
    "num_failed_workers",
    "last_failed_worker_error_msg",
    "_eng_job_type",
    "_eng_cleaning_status",
];

pub const MODEL_COLUMNS: &[&str] = &[
    "id",
    "job_id",
    "params",
    "_eng_params_hash",
    "_eng_particle_hash",
    "status",
    "completion_reason",
    "completion_msg",
    "results",
    "optimized_metric",
    "update_counter",
    "num_records",
    "cpu_time",
    "model_checkpoint_id",
    "_eng_stop",
    "_eng_matured",
    "_eng_last_update_time",
    "_eng_worker_conn_id",
    "start_time",
    "end_time",
];

/// Computes the namespace string for a given `(version, suffix)` pair.
/// Hyphens in `suffix` are expected to already be substituted for
/// underscores by `Config::from_env`.
pub fn namespace(version: u32, suffix: &str) -> String {
    format!("{}_v{}_{}", DB_ROOT_NAME, version, suffix)
}

pub struct SchemaBinding {
    pub namespace: String,
    pub job_fields: FieldNames,
    pub model_fields: FieldNames,
}

impl SchemaBinding {
    pub fn new(suffix: &str) -> SchemaBinding {
        SchemaBinding {
            namespace: namespace(SCHEMA_VERSION, suffix),
            job_fields: FieldNames::new(JOB_COLUMNS),
            model_fields: FieldNames::new(MODEL_COLUMNS),
        }
    }

    /// Drops every namespace for a version strictly below the current one.
    pub fn drop_old_namespaces(&self, conn: &mut PgConnection, suffix: &str) -> Result<()> {
        for version in 0..SCHEMA_VERSION {
            let old = namespace(version, suffix);
            conn.execute(&format!("DROP SCHEMA IF EXISTS {} CASCADE", old))?;
        }
        Ok(())
    }

    /// Drops the current namespace entirely. Used for a full reset, e.g. in
    /// test fixtures.
    pub fn drop_current(&self, conn: &mut PgConnection) -> Result<()> {
        conn.execute(&format!("DROP SCHEMA IF EXISTS {} CASCADE", self.namespace))?;
        Ok(())
    }

    /// Creates the namespace and its two tables if they don't already
    /// exist, then points `search_path` at it for the lifetime of the
    /// connection.
    pub fn ensure(&self, conn: &mut PgConnection) -> Result<()> {
        conn.execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", self.namespace))?;
        conn.execute(&format!("SET search_path TO {}, public", self.namespace))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS jobs (
                id                            BIGSERIAL PRIMARY KEY,
                client                        TEXT NOT NULL,
                client_info                   TEXT NOT NULL DEFAULT '',
                client_key                    TEXT NOT NULL DEFAULT '',
                cmd_line                      TEXT NOT NULL,
                params                        TEXT NOT NULL DEFAULT '',
                job_hash                      BYTEA NOT NULL,
                status                        TEXT NOT NULL DEFAULT 'notStarted',
                completion_reason             TEXT,
                completion_msg                TEXT,
                worker_completion_reason      TEXT,
                worker_completion_msg         TEXT,
                cancel                        BOOLEAN NOT NULL DEFAULT FALSE,
                start_time                    TIMESTAMPTZ,
                end_time                      TIMESTAMPTZ,
                _eng_last_update_time         TIMESTAMPTZ NOT NULL DEFAULT now(),
                results                       TEXT,
                _eng_cjm_conn_id              INTEGER,
                _eng_worker_state             TEXT,
                _eng_status                   TEXT,
                _eng_model_milestones         TEXT,
                minimum_workers               INTEGER NOT NULL DEFAULT 1,
                maximum_workers               INTEGER NOT NULL DEFAULT 1,
                priority                      INTEGER NOT NULL DEFAULT 0,
                _eng_allocate_new_workers     BOOLEAN NOT NULL DEFAULT FALSE,
                _eng_untended_dead_workers    BOOLEAN NOT NULL DEFAULT FALSE,
                num_failed_workers            INTEGER NOT NULL DEFAULT 0,
                last_failed_worker_error_msg  TEXT,
                _eng_job_type                 TEXT,
                _eng_cleaning_status          TEXT NOT NULL DEFAULT 'notdone',
                UNIQUE (client, job_hash)
            )",
        )?;
        conn.execute("CREATE INDEX IF NOT EXISTS jobs_status_idx ON jobs (status)")?;
        conn.execute("CREATE INDEX IF NOT EXISTS jobs_client_key_idx ON jobs (client_key)")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS models (
                id                     BIGSERIAL PRIMARY KEY,
                job_id                 BIGINT NOT NULL REFERENCES jobs (id),
                params                 TEXT NOT NULL DEFAULT '',
                _eng_params_hash       BYTEA NOT NULL,
                _eng_particle_hash     BYTEA NOT NULL,
                status                 TEXT NOT NULL DEFAULT 'notStarted',
                completion_reason      TEXT,
                completion_msg         TEXT,
                results                TEXT,
                optimized_metric       DOUBLE PRECISION,
                update_counter         BIGINT NOT NULL DEFAULT 0,
                num_records            BIGINT,
                cpu_time               DOUBLE PRECISION,
                model_checkpoint_id    TEXT,
                _eng_stop              TEXT,
                _eng_matured           BOOLEAN NOT NULL DEFAULT FALSE,
                _eng_last_update_time  TIMESTAMPTZ NOT NULL DEFAULT now(),
                _eng_worker_conn_id    INTEGER,
                start_time             TIMESTAMPTZ NOT NULL DEFAULT now(),
                end_time               TIMESTAMPTZ,
                UNIQUE (job_id, _eng_params_hash),
                UNIQUE (job_id, _eng_particle_hash)
            )",
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use schema_version::*;

    #[test]
    fn test_namespace_format() {
        assert_eq!("client_jobs_v29_dev", namespace(29, "dev"));
    }

    #[test]
    fn test_job_columns_map_to_public_names() {
        let binding = SchemaBinding::new("dev");
        assert_eq!(Some("_eng_cjm_conn_id"), binding.job_fields.to_db("engCjmConnId"));
        assert_eq!(Some("_eng_params_hash"), binding.model_fields.to_db("engParamsHash"));
    }
}
