//! Job admission, life-cycle transitions, cancellation, demand reporting,
//! and the generic field-access primitives (`getFields`/`setFields`/
//! `setFieldIfEqual`) that let the Job Manager elect a single worker for
//! periodic housekeeping.
//!
//! Dynamic field access can't go through diesel's typed DSL (the set of
//! columns touched is only known at runtime), so those operations build a
//! raw statement and bind values through `BoxedSqlQuery`, casting every
//! projected column to `text` and every bound value with the Postgres type
//! named by its `FieldValue` variant.

use errors::*;
use hash::Hash16;
use model::{self, CleaningStatus, JobCompletionReason, JobStatus, JobType};
use names::FieldValue;
use retry::{retry_idempotent, RetryPolicy};
use schema::{jobs, models};
use session::Store;
use time_helpers::log_timed;

use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
use diesel::sql_types::{Array, BigInt, Bool, Double, Integer, Nullable, Text};

/// One row of `getDemand`'s result: everything the Job Manager needs to
/// size and allocate workers for a running job.
#[derive(Clone, Debug, QueryableByName)]
pub struct JobDemand {
    #[sql_type = "BigInt"]
    pub job_id: i64,
    #[sql_type = "Integer"]
    pub minimum_workers: i32,
    #[sql_type = "Integer"]
    pub maximum_workers: i32,
    #[sql_type = "Integer"]
    pub priority: i32,
    #[sql_type = "Bool"]
    pub eng_allocate_new_workers: bool,
    #[sql_type = "Bool"]
    pub eng_untended_dead_workers: bool,
    #[sql_type = "Integer"]
    pub num_failed_workers: i32,
    #[sql_type = "Nullable<Text>"]
    pub eng_job_type: Option<String>,
}

#[derive(QueryableByName)]
struct IdRow {
    #[sql_type = "BigInt"]
    id: i64,
}

#[derive(QueryableByName)]
struct FieldsRow {
    #[sql_type = "Array<Nullable<Text>>"]
    values: Vec<Option<String>>,
}

#[derive(QueryableByName)]
struct IdFieldsRow {
    #[sql_type = "BigInt"]
    id: i64,
    #[sql_type = "Array<Nullable<Text>>"]
    values: Vec<Option<String>>,
}

impl Store {
    /// Admits a job under a fresh, randomly generated `jobHash`. Collision
    /// probability is negligible, so the insert always wins; the only
    /// reason for the reconciliation read is a reconnect between the
    /// insert and fetching its assigned id.
    pub fn job_insert(
        &self,
        client: &str,
        client_info: &str,
        client_key: &str,
        cmd_line: &str,
        params: &str,
        minimum_workers: i32,
        maximum_workers: i32,
        priority: i32,
        job_type: Option<JobType>,
    ) -> Result<i64> {
        log_timed(&self.log.new(o!("job" => "insert")), |log| {
            validate_client(client)?;
            validate_cmd_line(cmd_line)?;

            let job_hash = Hash16::random();
            let policy = RetryPolicy::default();

            retry_idempotent(log, &policy, || {
                self.session.with_conn(|conn| {
                    self.insert_or_find(
                        conn,
                        client,
                        &job_hash,
                        client_info,
                        client_key,
                        cmd_line,
                        params,
                        minimum_workers,
                        maximum_workers,
                        priority,
                        job_type,
                    )
                })
            })
        })
    }

    /// Admits a job under a caller-supplied `jobHash`, deduplicating on
    /// `(client, jobHash)` and resuming a completed job in place rather
    /// than creating a new row.
    pub fn job_insert_unique(
        &self,
        client: &str,
        job_hash: &[u8],
        client_info: &str,
        client_key: &str,
        cmd_line: &str,
        params: &str,
        minimum_workers: i32,
        maximum_workers: i32,
        priority: i32,
        job_type: Option<JobType>,
    ) -> Result<i64> {
        log_timed(&self.log.new(o!("job" => "insert_unique")), |log| {
            validate_client(client)?;
            validate_cmd_line(cmd_line)?;
            let hash = Hash16::normalize(job_hash)?;
            let policy = RetryPolicy::default();

            retry_idempotent(log, &policy, || {
                self.session.with_conn(|conn| match self.find_by_hash(conn, client, &hash)? {
                    None => self.insert_or_find(
                        conn,
                        client,
                        &hash,
                        client_info,
                        client_key,
                        cmd_line,
                        params,
                        minimum_workers,
                        maximum_workers,
                        priority,
                        job_type,
                    ),
                    Some(existing_id) => {
                        let updated = diesel::update(
                            jobs::table
                                .filter(jobs::id.eq(existing_id))
                                .filter(jobs::status.eq(JobStatus::Completed.as_str())),
                        )
                        .set((
                            jobs::cmd_line.eq(cmd_line),
                            jobs::params.eq(params),
                            jobs::minimum_workers.eq(minimum_workers),
                            jobs::maximum_workers.eq(maximum_workers),
                            jobs::priority.eq(priority),
                            jobs::_eng_job_type.eq(job_type.map(JobType::as_str)),
                            jobs::client_info.eq(client_info),
                            jobs::client_key.eq(client_key),
                        ))
                        .execute(conn)?;

                        if updated == 1 {
                            self.resume(conn, existing_id, false)?;
                        }
                        Ok(existing_id)
                    }
                })
            })
        })
    }

    /// Resets a completed job back to `notStarted` (or `testMode`),
    /// clearing terminal annotations and worker-pool counters. A no-op
    /// (logged, not an error) if the job was resumed concurrently.
    fn resume(&self, conn: &mut PgConnection, job_id: i64, test_mode: bool) -> Result<()> {
        let target_status = if test_mode { JobStatus::TestMode } else { JobStatus::NotStarted };

        let updated = diesel::update(
            jobs::table
                .filter(jobs::id.eq(job_id))
                .filter(jobs::status.eq(JobStatus::Completed.as_str())),
        )
        .set((
            jobs::status.eq(target_status.as_str()),
            jobs::completion_reason.eq(None::<String>),
            jobs::completion_msg.eq(None::<String>),
            jobs::worker_completion_reason.eq(None::<String>),
            jobs::worker_completion_msg.eq(None::<String>),
            jobs::end_time.eq(None::<::chrono::DateTime<Utc>>),
            jobs::cancel.eq(false),
            jobs::_eng_allocate_new_workers.eq(false),
            jobs::_eng_untended_dead_workers.eq(false),
            jobs::num_failed_workers.eq(0),
            jobs::last_failed_worker_error_msg.eq(None::<String>),
            jobs::_eng_cleaning_status.eq(CleaningStatus::NotDone.as_str()),
            jobs::_eng_last_update_time.eq(diesel::dsl::now),
        ))
        .execute(conn)?;

        if updated == 0 {
            info!(self.log, "Resume affected no rows, job resumed concurrently"; "job_id" => job_id);
        }
        Ok(())
    }

    /// Claims any one `notStarted` job for this session. Returns `None`
    /// ("no work") if no such job exists at the moment of the attempt;
    /// the caller is expected to poll.
    pub fn job_start_next(&self) -> Result<Option<i64>> {
        self.session.with_conn(|conn| {
            let row: Option<IdRow> = diesel::sql_query(
                "UPDATE jobs SET status = $1, _eng_cjm_conn_id = $2, start_time = now(), \
                 _eng_last_update_time = now() WHERE id = (SELECT id FROM jobs WHERE status = $3 \
                 ORDER BY id LIMIT 1 FOR UPDATE SKIP LOCKED) RETURNING id",
            )
            .bind::<Text, _>(JobStatus::Running.as_str())
            .bind::<Integer, _>(self.conn_id())
            .bind::<Text, _>(JobStatus::NotStarted.as_str())
            .get_result(conn)
            .optional()?;

            Ok(row.map(|r| r.id))
        })
    }

    /// Re-claims every `running` job after a Job Manager restart, marking
    /// each for a fresh worker allocation pass.
    pub fn job_reactivate_running(&self) -> Result<usize> {
        self.session.with_conn(|conn| {
            let updated = diesel::update(jobs::table.filter(jobs::status.eq(JobStatus::Running.as_str())))
                .set((
                    jobs::_eng_cjm_conn_id.eq(self.conn_id()),
                    jobs::_eng_allocate_new_workers.eq(true),
                ))
                .execute(conn)?;
            Ok(updated)
        })
    }

    pub fn job_get_demand(&self) -> Result<Vec<JobDemand>> {
        self.session.with_conn(|conn| {
            let rows = diesel::sql_query(
                "SELECT id AS job_id, minimum_workers, maximum_workers, priority, \
                 _eng_allocate_new_workers AS eng_allocate_new_workers, \
                 _eng_untended_dead_workers AS eng_untended_dead_workers, num_failed_workers, \
                 _eng_job_type AS eng_job_type FROM jobs WHERE status = $1",
            )
            .bind::<Text, _>(JobStatus::Running.as_str())
            .load(conn)?;
            Ok(rows)
        })
    }

    /// Not ownership-gated: any client may request cancellation.
    pub fn job_cancel(&self, job_id: i64) -> Result<()> {
        self.session.with_conn(|conn| {
            diesel::update(jobs::table.filter(jobs::id.eq(job_id)))
                .set(jobs::cancel.eq(true))
                .execute(conn)?;
            Ok(())
        })
    }

    /// Documented alias over `job_cancel` in the system this protocol
    /// coordinates for; kept as a separate name for callers that already
    /// expect it.
    pub fn job_suspend(&self, job_id: i64) -> Result<()> {
        self.job_cancel(job_id)
    }

    pub fn job_cancel_all_running(&self) -> Result<usize> {
        self.session.with_conn(|conn| {
            let updated = diesel::update(jobs::table.filter(jobs::status.ne(JobStatus::Completed.as_str())))
                .set(jobs::cancel.eq(true))
                .execute(conn)?;
            Ok(updated)
        })
    }

    pub fn job_count_cancelling(&self) -> Result<i64> {
        self.session.with_conn(|conn| {
            let count = jobs::table
                .filter(jobs::cancel.eq(true))
                .filter(jobs::status.ne(JobStatus::Completed.as_str()))
                .count()
                .get_result(conn)?;
            Ok(count)
        })
    }

    pub fn job_get_cancelling(&self) -> Result<Vec<i64>> {
        self.session.with_conn(|conn| {
            let ids = jobs::table
                .filter(jobs::cancel.eq(true))
                .filter(jobs::status.ne(JobStatus::Completed.as_str()))
                .select(jobs::id)
                .load(conn)?;
            Ok(ids)
        })
    }

    /// Fatal unless exactly one row is affected: a row-count mismatch
    /// means the predicate (and, if `use_conn`, the ownership check)
    /// didn't hold.
    pub fn job_set_status(&self, job_id: i64, status: JobStatus, use_conn: bool) -> Result<()> {
        self.session.with_conn(|conn| {
            let updated = if use_conn {
                diesel::update(
                    jobs::table
                        .filter(jobs::id.eq(job_id))
                        .filter(jobs::_eng_cjm_conn_id.eq(self.conn_id())),
                )
                .set((jobs::status.eq(status.as_str()), jobs::_eng_last_update_time.eq(diesel::dsl::now)))
                .execute(conn)?
            } else {
                diesel::update(jobs::table.filter(jobs::id.eq(job_id)))
                    .set((jobs::status.eq(status.as_str()), jobs::_eng_last_update_time.eq(diesel::dsl::now)))
                    .execute(conn)?
            };

            if updated != 1 {
                return Err(ErrorKind::InvalidOwnership(format!(
                    "job_set_status({}) affected {} rows",
                    job_id, updated
                ))
                .into());
            }
            Ok(())
        })
    }

    pub fn job_set_completed(
        &self,
        job_id: i64,
        reason: JobCompletionReason,
        msg: &str,
        use_conn: bool,
    ) -> Result<()> {
        self.session.with_conn(|conn| {
            let updated = if use_conn {
                diesel::update(
                    jobs::table
                        .filter(jobs::id.eq(job_id))
                        .filter(jobs::_eng_cjm_conn_id.eq(self.conn_id())),
                )
                .set((
                    jobs::status.eq(JobStatus::Completed.as_str()),
                    jobs::completion_reason.eq(reason.as_str()),
                    jobs::completion_msg.eq(msg),
                    jobs::end_time.eq(diesel::dsl::now),
                    jobs::_eng_last_update_time.eq(diesel::dsl::now),
                ))
                .execute(conn)?
            } else {
                diesel::update(jobs::table.filter(jobs::id.eq(job_id)))
                    .set((
                        jobs::status.eq(JobStatus::Completed.as_str()),
                        jobs::completion_reason.eq(reason.as_str()),
                        jobs::completion_msg.eq(msg),
                        jobs::end_time.eq(diesel::dsl::now),
                        jobs::_eng_last_update_time.eq(diesel::dsl::now),
                    ))
                    .execute(conn)?
            };

            if updated != 1 {
                return Err(ErrorKind::InvalidOwnership(format!(
                    "job_set_completed({}) affected {} rows",
                    job_id, updated
                ))
                .into());
            }
            Ok(())
        })
    }

    /// Returns the requested fields as text, in request order. Fatal if
    /// the job doesn't exist.
    pub fn job_get_fields(&self, job_id: i64, fields: &[&str]) -> Result<Vec<Option<String>>> {
        let db_fields = self.resolve_job_fields(fields)?;
        self.session.with_conn(|conn| {
            let projection = db_fields
                .iter()
                .map(|f| format!("{}::text", f))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!("SELECT ARRAY[{}] AS values FROM jobs WHERE id = $1", projection);

            let row: Option<FieldsRow> = diesel::sql_query(sql)
                .bind::<BigInt, _>(job_id)
                .get_result(conn)
                .optional()?;

            row.map(|r| r.values)
                .ok_or_else(|| ErrorKind::NotFound(format!("job {}", job_id)).into())
        })
    }

    /// Bulk update of a `{field: value}` map. Fatal when zero rows are
    /// affected unless `ignore_unchanged` is set.
    pub fn job_set_fields(
        &self,
        job_id: i64,
        fields: &[(&str, FieldValue)],
        use_conn: bool,
        ignore_unchanged: bool,
    ) -> Result<()> {
        self.session.with_conn(|conn| {
            let mut assignments = Vec::with_capacity(fields.len());
            for (i, (public_name, value)) in fields.iter().enumerate() {
                let db_name = self
                    .job_fields()
                    .to_db(public_name)
                    .ok_or_else(|| Error::from(format!("unknown job field {:?}", public_name)))?;
                assignments.push(format!("{} = ${}::{}", db_name, i + 2, value.pg_cast()));
            }
            assignments.push("_eng_last_update_time = now()".to_owned());

            let mut sql = format!("UPDATE jobs SET {} WHERE id = $1", assignments.join(", "));
            if use_conn {
                sql.push_str(&format!(" AND _eng_cjm_conn_id = {}", self.conn_id()));
            }

            let mut query: BoxedSqlQuery<diesel::pg::Pg, SqlQuery> =
                diesel::sql_query(sql).into_boxed();
            query = query.bind::<BigInt, _>(job_id);
            for (_, value) in fields {
                query = bind_field_value(query, value.clone());
            }

            let updated = query.execute(conn)?;
            if updated == 0 && !ignore_unchanged {
                return Err(ErrorKind::NotFound(format!("job_set_fields({})", job_id)).into());
            }
            Ok(())
        })
    }

    /// Atomic compare-and-set: succeeds only if the stored value currently
    /// equals `cur`. The primitive used to elect a single worker among
    /// many to perform periodic housekeeping.
    pub fn job_set_field_if_equal(
        &self,
        job_id: i64,
        field: &str,
        new: &str,
        cur: Option<&str>,
    ) -> Result<bool> {
        let db_name = self
            .job_fields()
            .to_db(field)
            .ok_or_else(|| Error::from(format!("unknown job field {:?}", field)))?;

        self.session.with_conn(|conn| {
            let updated = match cur {
                Some(c) => {
                    let sql = format!(
                        "UPDATE jobs SET {0} = $1, _eng_last_update_time = now() WHERE id = $2 AND {0} = $3",
                        db_name
                    );
                    diesel::sql_query(sql)
                        .bind::<Text, _>(new)
                        .bind::<BigInt, _>(job_id)
                        .bind::<Text, _>(c)
                        .execute(conn)?
                }
                None => {
                    let sql = format!(
                        "UPDATE jobs SET {0} = $1, _eng_last_update_time = now() WHERE id = $2 AND {0} IS NULL",
                        db_name
                    );
                    diesel::sql_query(sql)
                        .bind::<Text, _>(new)
                        .bind::<BigInt, _>(job_id)
                        .execute(conn)?
                }
            };
            Ok(updated == 1)
        })
    }

    pub fn job_increment_int_field(
        &self,
        job_id: i64,
        field: &str,
        delta: i64,
        use_conn: bool,
    ) -> Result<()> {
        let db_name = self
            .job_fields()
            .to_db(field)
            .ok_or_else(|| Error::from(format!("unknown job field {:?}", field)))?;

        self.session.with_conn(|conn| {
            let mut sql = format!(
                "UPDATE jobs SET {0} = {0} + $1, _eng_last_update_time = now() WHERE id = $2",
                db_name
            );
            if use_conn {
                sql.push_str(&format!(" AND _eng_cjm_conn_id = {}", self.conn_id()));
            }
            let updated = diesel::sql_query(sql)
                .bind::<BigInt, _>(delta)
                .bind::<BigInt, _>(job_id)
                .execute(conn)?;

            if updated != 1 {
                return Err(ErrorKind::InvalidOwnership(format!(
                    "job_increment_int_field({}, {}) affected {} rows",
                    job_id, field, updated
                ))
                .into());
            }
            Ok(())
        })
    }

    pub fn job_update_results(&self, job_id: i64, results: &str) -> Result<()> {
        self.session.with_conn(|conn| {
            diesel::update(jobs::table.filter(jobs::id.eq(job_id)))
                .set((jobs::results.eq(results), jobs::_eng_last_update_time.eq(diesel::dsl::now)))
                .execute(conn)?;
            Ok(())
        })
    }

    pub fn job_info(&self, job_id: i64) -> Result<model::Job> {
        self.session.with_conn(|conn| {
            jobs::table.filter(jobs::id.eq(job_id)).first(conn).map_err(|e| match e {
                diesel::result::Error::NotFound => ErrorKind::NotFound(format!("job {}", job_id)).into(),
                other => Error::from(other),
            })
        })
    }

    pub fn job_info_with_models(&self, job_id: i64) -> Result<Vec<(model::Job, Option<model::Model>)>> {
        self.session.with_conn(|conn| {
            let job: model::Job = jobs::table.filter(jobs::id.eq(job_id)).first(conn).map_err(|e| match e {
                diesel::result::Error::NotFound => ErrorKind::NotFound(format!("job {}", job_id)).into(),
                other => Error::from(other),
            })?;
            let job_models = models::table.filter(models::job_id.eq(job_id)).load::<model::Model>(conn)?;

            if job_models.is_empty() {
                Ok(vec![(job, None)])
            } else {
                Ok(job_models.into_iter().map(|m| (job.clone(), Some(m))).collect())
            }
        })
    }

    pub fn get_active_jobs_for_client_info(
        &self,
        client_info: &str,
        fields: &[&str],
    ) -> Result<Vec<(i64, Vec<Option<String>>)>> {
        self.active_jobs_matching("client_info", client_info, fields)
    }

    pub fn get_active_jobs_for_client_key(
        &self,
        client_key: &str,
        fields: &[&str],
    ) -> Result<Vec<(i64, Vec<Option<String>>)>> {
        self.active_jobs_matching("client_key", client_key, fields)
    }

    pub fn active_job_count_for_client_info(&self, client_info: &str) -> Result<i64> {
        self.session.with_conn(|conn| {
            let count = jobs::table
                .filter(jobs::client_info.eq(client_info))
                .filter(jobs::status.ne(JobStatus::Completed.as_str()))
                .count()
                .get_result(conn)?;
            Ok(count)
        })
    }

    pub fn active_job_count_for_client_key(&self, client_key: &str) -> Result<i64> {
        self.session.with_conn(|conn| {
            let count = jobs::table
                .filter(jobs::client_key.eq(client_key))
                .filter(jobs::status.ne(JobStatus::Completed.as_str()))
                .count()
                .get_result(conn)?;
            Ok(count)
        })
    }

    pub fn get_fields_for_active_jobs_of_type(
        &self,
        job_type: JobType,
        fields: &[&str],
    ) -> Result<Vec<(i64, Vec<Option<String>>)>> {
        let db_fields = self.resolve_job_fields(fields)?;
        self.session.with_conn(|conn| {
            let projection = db_fields
                .iter()
                .map(|f| format!("jobs.{}::text", f))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "SELECT DISTINCT jobs.id, ARRAY[{}] AS values FROM jobs LEFT JOIN models ON models.job_id = jobs.id \
                 WHERE jobs._eng_job_type = $1 AND jobs.status != $2",
                projection
            );

            let rows: Vec<IdFieldsRow> = diesel::sql_query(sql)
                .bind::<Text, _>(job_type.as_str())
                .bind::<Text, _>(JobStatus::Completed.as_str())
                .load(conn)?;
            Ok(rows.into_iter().map(|r| (r.id, r.values)).collect())
        })
    }

    pub fn get_jobs(&self, fields: &[&str]) -> Result<Vec<(i64, Vec<Option<String>>)>> {
        let db_fields = self.resolve_job_fields(fields)?;
        self.session.with_conn(|conn| {
            let projection = db_fields
                .iter()
                .map(|f| format!("{}::text", f))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!("SELECT id, ARRAY[{}] AS values FROM jobs", projection);

            let rows: Vec<IdFieldsRow> = diesel::sql_query(sql).load(conn)?;
            Ok(rows.into_iter().map(|r| (r.id, r.values)).collect())
        })
    }

    //
    // Private helpers
    //

    fn resolve_job_fields(&self, fields: &[&str]) -> Result<Vec<&'static str>> {
        fields
            .iter()
            .map(|f| {
                self.job_fields()
                    .to_db(f)
                    .ok_or_else(|| Error::from(format!("unknown job field {:?}", f)))
            })
            .collect()
    }

    fn active_jobs_matching(
        &self,
        column: &str,
        value: &str,
        fields: &[&str],
    ) -> Result<Vec<(i64, Vec<Option<String>>)>> {
        let db_fields = self.resolve_job_fields(fields)?;
        self.session.with_conn(|conn| {
            let projection = db_fields
                .iter()
                .map(|f| format!("{}::text", f))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "SELECT id, ARRAY[{}] AS values FROM jobs WHERE {} = $1 AND status != $2",
                projection, column
            );
            let rows: Vec<IdFieldsRow> = diesel::sql_query(sql)
                .bind::<Text, _>(value)
                .bind::<Text, _>(JobStatus::Completed.as_str())
                .load(conn)?;
            Ok(rows.into_iter().map(|r| (r.id, r.values)).collect())
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_or_find(
        &self,
        conn: &mut PgConnection,
        client: &str,
        job_hash: &Hash16,
        client_info: &str,
        client_key: &str,
        cmd_line: &str,
        params: &str,
        minimum_workers: i32,
        maximum_workers: i32,
        priority: i32,
        job_type: Option<JobType>,
    ) -> Result<i64> {
        let new_job = model::insertable::Job {
            status: JobStatus::NotStarted.as_str().to_owned(),
            client: client.to_owned(),
            client_info: client_info.to_owned(),
            client_key: client_key.to_owned(),
            cmd_line: cmd_line.to_owned(),
            params: params.to_owned(),
            job_hash: *job_hash,
            eng_last_update_time: Utc::now(),
            minimum_workers,
            maximum_workers,
            priority,
            eng_job_type: job_type.map(|t| t.as_str().to_owned()),
            eng_cjm_conn_id: None,
            start_time: None,
        };

        diesel::insert_into(jobs::table)
            .values(&new_job)
            .on_conflict((jobs::client, jobs::job_hash))
            .do_nothing()
            .execute(conn)?;

        self.find_by_hash(conn, client, job_hash)?
            .ok_or_else(|| ErrorKind::NotFound(format!("job just inserted for client {:?}", client)).into())
    }

    fn find_by_hash(&self, conn: &mut PgConnection, client: &str, job_hash: &Hash16) -> Result<Option<i64>> {
        let id = jobs::table
            .filter(jobs::client.eq(client))
            .filter(jobs::job_hash.eq(*job_hash))
            .select(jobs::id)
            .first(conn)
            .optional()?;
        Ok(id)
    }
}

fn validate_client(client: &str) -> Result<()> {
    if client.len() > model::CLIENT_MAX_LEN {
        return Err(ErrorKind::InvalidClient(client.to_owned()).into());
    }
    Ok(())
}

fn validate_cmd_line(cmd_line: &str) -> Result<()> {
    if cmd_line.is_empty() {
        return Err(ErrorKind::EmptyCmdLine.into());
    }
    Ok(())
}

fn bind_field_value<'a>(
    query: BoxedSqlQuery<'a, diesel::pg::Pg, SqlQuery>,
    value: FieldValue,
) -> BoxedSqlQuery<'a, diesel::pg::Pg, SqlQuery> {
    match value {
        FieldValue::Text(s) => query.bind::<Text, _>(s),
        FieldValue::Int(n) => query.bind::<BigInt, _>(n),
        FieldValue::Bool(b) => query.bind::<Bool, _>(b),
        FieldValue::Float(f) => query.bind::<Double, _>(f),
        FieldValue::Timestamp(t) => query.bind::<::diesel::sql_types::Timestamptz, _>(t),
        FieldValue::Binary(b) => query.bind::<::diesel::sql_types::Binary, _>(b),
        FieldValue::Null => query.bind::<Nullable<Text>, _>(None::<String>),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_helpers;

    #[test]
    fn test_validate_client_rejects_overlong() {
        assert!(validate_client("waytoolongclienttag").is_err());
    }

    #[test]
    fn test_validate_client_accepts_max_len() {
        assert!(validate_client("12345678").is_ok());
    }

    #[test]
    fn test_validate_cmd_line_rejects_empty() {
        assert!(validate_cmd_line("").is_err());
    }

    #[test]
    fn test_job_insert_unique_resumes_completed_job() {
        let store = test_helpers::store(test_helpers::log());
        let hash = Hash16::random();

        let id1 = store
            .job_insert_unique("cl", hash.as_bytes(), "", "", "cmd1", "p1", 1, 1, 0, None)
            .unwrap();
        store.job_set_completed(id1, JobCompletionReason::Success, "done", false).unwrap();

        let id2 = store
            .job_insert_unique("cl", hash.as_bytes(), "", "", "cmd2", "p2", 2, 2, 0, None)
            .unwrap();
        assert_eq!(id1, id2);

        let job = store.job_info(id1).unwrap();
        assert_eq!(JobStatus::NotStarted.as_str(), job.status);
        assert_eq!("cmd2", job.cmd_line);
        assert!(job.completion_reason.is_none());
        assert!(job.completion_msg.is_none());
    }

    #[test]
    fn test_job_set_field_if_equal_elects_single_winner() {
        let store = test_helpers::store(test_helpers::log());
        let job_id = store.job_insert("cl", "", "", "cmd", "", 1, 1, 0, None).unwrap();

        let first = store.job_set_field_if_equal(job_id, "engWorkerState", "leader", None).unwrap();
        assert!(first);

        let second = store.job_set_field_if_equal(job_id, "engWorkerState", "leader", None).unwrap();
        assert!(!second);
    }

    #[test]
    fn test_get_fields_for_active_jobs_of_type_includes_jobs_without_models() {
        let store = test_helpers::store(test_helpers::log());
        let job_id = store.job_insert("cl", "", "", "cmd", "", 1, 1, 0, Some(JobType::Test)).unwrap();
        store.job_set_status(job_id, JobStatus::Running, false).unwrap();

        let rows = store.get_fields_for_active_jobs_of_type(JobType::Test, &["jobId"]).unwrap();
        assert!(rows.iter().any(|(id, _)| *id == job_id));
    }
}
