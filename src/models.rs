//! Model insertion with dual-hash deduplication, progress streaming,
//! ownership-gated completion, and orphan detection/adoption.
//!
//! `insertAndStart` is the one operation in this store that tolerates a
//! duplicate-key violation as an expected outcome rather than a fault: two
//! workers racing to claim the same parameterization is the normal case,
//! not an error, so the reconciliation path (`reconcile_insert`) decides
//! who actually won.

use errors::*;
use hash::Hash16;
use model::{self, ModelCompletionReason, ModelStatus};
use names::FieldValue;
use session::Store;
use time_helpers::log_timed;

use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
use diesel::sql_types::{Array, BigInt, Bool, Double, Nullable, Text};
use schema::models;

use std::time::Duration;

#[derive(QueryableByName)]
struct IdFieldsRow {
    #[sql_type = "BigInt"]
    id: i64,
    #[sql_type = "Array<Nullable<Text>>"]
    values: Vec<Option<String>>,
}

impl Store {
    /// Claims a parameterization within a job, deduplicating on either
    /// hash. Returns `(modelId, ours)` where `ours` is true only if this
    /// call (not a prior racing attempt) is the one that now owns it.
    pub fn model_insert_and_start(
        &self,
        job_id: i64,
        params: &str,
        params_hash: &[u8],
        particle_hash: Option<&[u8]>,
    ) -> Result<(i64, bool)> {
        let params_hash = Hash16::normalize(params_hash)?;
        let particle_hash = match particle_hash {
            Some(p) => Hash16::normalize(p)?,
            None => params_hash,
        };

        log_timed(&self.log.new(o!("model" => "insert_and_start", "job_id" => job_id)), |_log| {
            self.session.with_conn(|conn| {
                if let Some(existing) = self.find_model_exact(conn, job_id, &params_hash, &particle_hash)? {
                    return Ok((existing, false));
                }

                let new_model = model::insertable::Model {
                    job_id,
                    params: params.to_owned(),
                    status: ModelStatus::Running.as_str().to_owned(),
                    eng_params_hash: params_hash,
                    eng_particle_hash: particle_hash,
                    start_time: Utc::now(),
                    eng_last_update_time: Utc::now(),
                    eng_worker_conn_id: self.conn_id(),
                };

                let inserted = diesel::insert_into(models::table)
                    .values(&new_model)
                    .returning(models::id)
                    .get_result::<i64>(conn);

                match inserted {
                    Ok(id) => Ok((id, true)),
                    Err(diesel_err) => {
                        if is_duplicate_key_violation(&diesel_err) {
                            self.reconcile_insert(conn, job_id, &params_hash, &particle_hash)
                        } else {
                            Err(Error::from(diesel_err))
                        }
                    }
                }
            })
        })
    }

    pub fn models_info(&self, ids: &[i64]) -> Result<Vec<model::Model>> {
        self.session.with_conn(|conn| Ok(models::table.filter(models::id.eq_any(ids.to_vec())).load(conn)?))
    }

    pub fn models_get_fields(&self, ids: &[i64], fields: &[&str]) -> Result<Vec<(i64, Vec<Option<String>>)>> {
        let db_fields = self.resolve_model_fields(fields)?;
        self.session.with_conn(|conn| {
            let projection = db_fields.iter().map(|f| format!("{}::text", f)).collect::<Vec<_>>().join(", ");
            let sql = format!("SELECT id, ARRAY[{}] AS values FROM models WHERE id = ANY($1)", projection);
            let rows: Vec<IdFieldsRow> =
                diesel::sql_query(sql).bind::<Array<BigInt>, _>(ids.to_vec()).load(conn)?;

            if rows.len() != ids.len() {
                return Err(ErrorKind::NotFound(format!(
                    "models_get_fields requested {} ids, found {}",
                    ids.len(),
                    rows.len()
                ))
                .into());
            }
            Ok(rows.into_iter().map(|r| (r.id, r.values)).collect())
        })
    }

    pub fn models_get_params(&self, ids: &[i64]) -> Result<Vec<(i64, String)>> {
        self.session.with_conn(|conn| {
            let rows: Vec<(i64, String)> = models::table
                .filter(models::id.eq_any(ids.to_vec()))
                .select((models::id, models::params))
                .load(conn)?;
            if rows.len() != ids.len() {
                return Err(ErrorKind::NotFound("models_get_params: id mismatch".to_owned()).into());
            }
            Ok(rows)
        })
    }

    pub fn models_get_result_and_status(&self, ids: &[i64]) -> Result<Vec<(i64, Option<String>, String)>> {
        self.session.with_conn(|conn| {
            let rows: Vec<(i64, Option<String>, String)> = models::table
                .filter(models::id.eq_any(ids.to_vec()))
                .select((models::id, models::results, models::status))
                .load(conn)?;
            if rows.len() != ids.len() {
                return Err(ErrorKind::NotFound("models_get_result_and_status: id mismatch".to_owned()).into());
            }
            Ok(rows)
        })
    }

    pub fn models_get_update_counters(&self, job_id: i64) -> Result<Vec<(i64, i64)>> {
        self.session.with_conn(|conn| {
            Ok(models::table
                .filter(models::job_id.eq(job_id))
                .select((models::id, models::update_counter))
                .load(conn)?)
        })
    }

    pub fn models_get_fields_for_job(
        &self,
        job_id: i64,
        fields: &[&str],
        ignore_killed: bool,
    ) -> Result<Vec<(i64, Vec<Option<String>>)>> {
        let db_fields = self.resolve_model_fields(fields)?;
        self.session.with_conn(|conn| {
            let projection = db_fields.iter().map(|f| format!("{}::text", f)).collect::<Vec<_>>().join(", ");
            let mut sql = format!("SELECT id, ARRAY[{}] AS values FROM models WHERE job_id = $1", projection);
            if ignore_killed {
                sql.push_str(" AND (_eng_stop IS NULL OR _eng_stop != 'killed')");
            }
            let rows: Vec<IdFieldsRow> = diesel::sql_query(sql).bind::<BigInt, _>(job_id).load(conn)?;
            Ok(rows.into_iter().map(|r| (r.id, r.values)).collect())
        })
    }

    pub fn models_get_fields_for_checkpointed(
        &self,
        job_id: i64,
        fields: &[&str],
    ) -> Result<Vec<(i64, Vec<Option<String>>)>> {
        let db_fields = self.resolve_model_fields(fields)?;
        self.session.with_conn(|conn| {
            let projection = db_fields.iter().map(|f| format!("{}::text", f)).collect::<Vec<_>>().join(", ");
            let sql = format!(
                "SELECT id, ARRAY[{}] AS values FROM models WHERE job_id = $1 AND model_checkpoint_id IS NOT NULL",
                projection
            );
            let rows: Vec<IdFieldsRow> = diesel::sql_query(sql).bind::<BigInt, _>(job_id).load(conn)?;
            Ok(rows.into_iter().map(|r| (r.id, r.values)).collect())
        })
    }

    /// NOT ownership-gated: used by authoritative components (e.g. the Job
    /// Manager reconciling state), never by a worker claiming progress.
    pub fn model_set_fields(
        &self,
        id: i64,
        fields: &[(&str, FieldValue)],
        ignore_unchanged: bool,
    ) -> Result<()> {
        self.session.with_conn(|conn| {
            let mut assignments = Vec::with_capacity(fields.len());
            for (i, (public_name, value)) in fields.iter().enumerate() {
                let db_name = self
                    .model_fields()
                    .to_db(public_name)
                    .ok_or_else(|| Error::from(format!("unknown model field {:?}", public_name)))?;
                assignments.push(format!("{} = ${}::{}", db_name, i + 2, value.pg_cast()));
            }
            assignments.push("update_counter = update_counter + 1".to_owned());
            assignments.push("_eng_last_update_time = now()".to_owned());

            let sql = format!("UPDATE models SET {} WHERE id = $1", assignments.join(", "));
            let mut query: BoxedSqlQuery<diesel::pg::Pg, SqlQuery> = diesel::sql_query(sql).into_boxed();
            query = query.bind::<BigInt, _>(id);
            for (_, value) in fields {
                query = bind_field_value(query, value.clone());
            }

            let updated = query.execute(conn)?;
            if updated == 0 && !ignore_unchanged {
                return Err(ErrorKind::NotFound(format!("model_set_fields({})", id)).into());
            }
            Ok(())
        })
    }

    /// Ownership-gated: requires `engWorkerConnId = connId`. `NaN` metric
    /// values are silently dropped rather than stored. Zero rows affected
    /// is always `InvalidOwnership` — there is no "ignore unchanged" escape
    /// hatch for this one, per spec. The update-counter bump and the
    /// supplied fields land in one transaction, so a reader never observes
    /// a bumped counter ahead of (or without) the write that produced it.
    pub fn model_update_results(
        &self,
        id: i64,
        results: Option<&str>,
        metric_value: Option<f64>,
        num_records: Option<i64>,
    ) -> Result<()> {
        self.session.with_conn(|conn| {
            let metric_value = metric_value.filter(|v| !v.is_nan());

            conn.transaction::<_, Error, _>(|| {
                let updated = diesel::update(
                    models::table.filter(models::id.eq(id)).filter(models::_eng_worker_conn_id.eq(self.conn_id())),
                )
                .set((
                    models::update_counter.eq(models::update_counter + 1),
                    models::_eng_last_update_time.eq(diesel::dsl::now),
                ))
                .execute(conn)?;

                if updated != 1 {
                    return Err(ErrorKind::InvalidOwnership(format!(
                        "model_update_results({}) affected {} rows",
                        id, updated
                    ))
                    .into());
                }

                // `results`/`optimized_metric`/`num_records` are each
                // optional; issue a second, narrower update only for the
                // fields actually supplied so an absent argument never
                // clobbers a stored value.
                if let Some(r) = results {
                    diesel::update(
                        models::table
                            .filter(models::id.eq(id))
                            .filter(models::_eng_worker_conn_id.eq(self.conn_id())),
                    )
                    .set(models::results.eq(r))
                    .execute(conn)?;
                }
                if let Some(m) = metric_value {
                    diesel::update(
                        models::table
                            .filter(models::id.eq(id))
                            .filter(models::_eng_worker_conn_id.eq(self.conn_id())),
                    )
                    .set(models::optimized_metric.eq(m))
                    .execute(conn)?;
                }
                if let Some(n) = num_records {
                    diesel::update(
                        models::table
                            .filter(models::id.eq(id))
                            .filter(models::_eng_worker_conn_id.eq(self.conn_id())),
                    )
                    .set(models::num_records.eq(n))
                    .execute(conn)?;
                }

                Ok(())
            })
        })
    }

    /// Zero-change form of `model_update_results`, used purely as a
    /// liveness heartbeat by the owning worker.
    pub fn model_update_timestamp(&self, id: i64) -> Result<()> {
        self.session.with_conn(|conn| {
            let updated = diesel::update(
                models::table.filter(models::id.eq(id)).filter(models::_eng_worker_conn_id.eq(self.conn_id())),
            )
            .set((
                models::update_counter.eq(models::update_counter + 1),
                models::_eng_last_update_time.eq(diesel::dsl::now),
            ))
            .execute(conn)?;

            if updated != 1 {
                return Err(ErrorKind::InvalidOwnership(format!(
                    "model_update_timestamp({}) affected {} rows",
                    id, updated
                ))
                .into());
            }
            Ok(())
        })
    }

    pub fn model_set_completed(
        &self,
        id: i64,
        reason: ModelCompletionReason,
        msg: &str,
        cpu_time: Option<f64>,
        use_conn: bool,
    ) -> Result<()> {
        self.session.with_conn(|conn| {
            let updated = if use_conn {
                diesel::update(
                    models::table.filter(models::id.eq(id)).filter(models::_eng_worker_conn_id.eq(self.conn_id())),
                )
                .set((
                    models::status.eq(ModelStatus::Completed.as_str()),
                    models::completion_reason.eq(reason.as_str()),
                    models::completion_msg.eq(msg),
                    models::cpu_time.eq(cpu_time),
                    models::end_time.eq(diesel::dsl::now),
                    models::update_counter.eq(models::update_counter + 1),
                    models::_eng_last_update_time.eq(diesel::dsl::now),
                ))
                .execute(conn)?
            } else {
                diesel::update(models::table.filter(models::id.eq(id)))
                    .set((
                        models::status.eq(ModelStatus::Completed.as_str()),
                        models::completion_reason.eq(reason.as_str()),
                        models::completion_msg.eq(msg),
                        models::cpu_time.eq(cpu_time),
                        models::end_time.eq(diesel::dsl::now),
                        models::update_counter.eq(models::update_counter + 1),
                        models::_eng_last_update_time.eq(diesel::dsl::now),
                    ))
                    .execute(conn)?
            };

            if updated != 1 {
                return Err(ErrorKind::InvalidOwnership(format!(
                    "model_set_completed({}) affected {} rows",
                    id, updated
                ))
                .into());
            }
            Ok(())
        })
    }

    /// Finds a stalled `running` model in `jobId` and reassigns it to this
    /// session, looping until adoption succeeds or no candidate remains.
    /// The race is resolved purely by storage-clock comparisons, so
    /// concurrent adopters agree on a winner without any in-process lock.
    pub fn model_adopt_next_orphan(&self, job_id: i64, max_update_interval: Duration) -> Result<Option<i64>> {
        let interval_secs = max_update_interval.as_secs() as i64;

        self.session.with_conn(|conn| loop {
            let candidate: Option<i64> = diesel::sql_query(
                "SELECT id FROM models WHERE job_id = $1 AND status = $2 \
                 AND (now() - _eng_last_update_time) > ($3 * INTERVAL '1 second') LIMIT 1",
            )
            .bind::<BigInt, _>(job_id)
            .bind::<Text, _>(ModelStatus::Running.as_str())
            .bind::<BigInt, _>(interval_secs)
            .get_result::<IdOnly>(conn)
            .optional()?
            .map(|r| r.id);

            let candidate = match candidate {
                Some(id) => id,
                None => return Ok(None),
            };

            let adopted = diesel::sql_query(
                "UPDATE models SET _eng_worker_conn_id = $1, _eng_last_update_time = now() \
                 WHERE id = $2 AND status = $3 AND (now() - _eng_last_update_time) > ($4 * INTERVAL '1 second')",
            )
            .bind::<diesel::sql_types::Integer, _>(self.conn_id())
            .bind::<BigInt, _>(candidate)
            .bind::<Text, _>(ModelStatus::Running.as_str())
            .bind::<BigInt, _>(interval_secs)
            .execute(conn)?;

            if adopted == 1 {
                return Ok(Some(candidate));
            }

            // Lost the race (or our own retry already won it). Disambiguate
            // by reading who owns it now before moving on to the next
            // candidate.
            let (status, owner): (String, Option<i32>) = models::table
                .filter(models::id.eq(candidate))
                .select((models::status, models::_eng_worker_conn_id))
                .first(conn)?;

            if status == ModelStatus::Running.as_str() && owner == Some(self.conn_id()) {
                return Ok(Some(candidate));
            }
            // Otherwise another worker won it; loop to look for the next candidate.
        })
    }

    pub fn models_clear_all(&self) -> Result<usize> {
        self.session.with_conn(|conn| Ok(diesel::delete(models::table).execute(conn)?))
    }

    pub fn get_model_ids_for_job(&self, job_id: i64) -> Result<Vec<i64>> {
        self.session.with_conn(|conn| {
            Ok(models::table.filter(models::job_id.eq(job_id)).select(models::id).load(conn)?)
        })
    }

    //
    // Private helpers
    //

    fn resolve_model_fields(&self, fields: &[&str]) -> Result<Vec<&'static str>> {
        fields
            .iter()
            .map(|f| {
                self.model_fields()
                    .to_db(f)
                    .ok_or_else(|| Error::from(format!("unknown model field {:?}", f)))
            })
            .collect()
    }

    fn find_model_exact(
        &self,
        conn: &mut PgConnection,
        job_id: i64,
        params_hash: &Hash16,
        particle_hash: &Hash16,
    ) -> Result<Option<i64>> {
        let id = models::table
            .filter(models::job_id.eq(job_id))
            .filter(models::_eng_params_hash.eq(*params_hash))
            .filter(models::_eng_particle_hash.eq(*particle_hash))
            .select(models::id)
            .first(conn)
            .optional()?;
        Ok(id)
    }

    fn reconcile_insert(
        &self,
        conn: &mut PgConnection,
        job_id: i64,
        params_hash: &Hash16,
        particle_hash: &Hash16,
    ) -> Result<(i64, bool)> {
        let exact = models::table
            .filter(models::job_id.eq(job_id))
            .filter(models::_eng_params_hash.eq(*params_hash))
            .filter(models::_eng_particle_hash.eq(*particle_hash))
            .select((models::id, models::_eng_worker_conn_id))
            .first::<(i64, Option<i32>)>(conn)
            .optional()?;

        if let Some((id, owner)) = exact {
            return Ok((id, owner == Some(self.conn_id())));
        }

        let fallback = models::table
            .filter(models::job_id.eq(job_id))
            .filter(
                models::_eng_params_hash
                    .eq(*params_hash)
                    .or(models::_eng_particle_hash.eq(*particle_hash)),
            )
            .select((models::id, models::_eng_worker_conn_id))
            .first::<(i64, Option<i32>)>(conn)
            .optional()?;

        match fallback {
            Some((id, owner)) => Ok((id, owner == Some(self.conn_id()))),
            None => Err(ErrorKind::NotFound(format!(
                "model reconciliation for job {} found no row after a duplicate-key conflict",
                job_id
            ))
            .into()),
        }
    }
}

#[derive(QueryableByName)]
struct IdOnly {
    #[sql_type = "BigInt"]
    id: i64,
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
    fn test_model_insert_and_start_defaults_particle_to_params() {
        let store = test_helpers::store(test_helpers::log());
        let job_id = store.job_insert("cl", "", "", "cmd", "", 1, 1, 0, None).unwrap();

        let params_hash = Hash16::normalize(b"params-a").unwrap();
        let (model_id, ours) =
            store.model_insert_and_start(job_id, "p", params_hash.as_bytes(), None).unwrap();
        assert!(ours);

        let models = store.models_info(&[model_id]).unwrap();
        assert_eq!(models[0].eng_params_hash, models[0].eng_particle_hash);
    }

    #[test]
    fn test_model_insert_and_start_dedups_on_rematch() {
        let store = test_helpers::store(test_helpers::log());
        let job_id = store.job_insert("cl", "", "", "cmd", "", 1, 1, 0, None).unwrap();

        let hash = Hash16::normalize(b"dup").unwrap();
        let (id1, ours1) = store.model_insert_and_start(job_id, "p", hash.as_bytes(), None).unwrap();
        assert!(ours1);

        let (id2, ours2) = store.model_insert_and_start(job_id, "p", hash.as_bytes(), None).unwrap();
        assert_eq!(id1, id2);
        assert!(!ours2);
    }

    #[test]
    fn test_model_update_results_rejects_non_owner() {
        let store = test_helpers::store(test_helpers::log());
        let job_id = store.job_insert("cl", "", "", "cmd", "", 1, 1, 0, None).unwrap();
        let foreign_conn_id = store.conn_id() + 1;

        let model_id = store
            .session
            .with_conn(|conn| {
                let new_model = model::insertable::Model {
                    job_id,
                    params: "p".to_owned(),
                    status: ModelStatus::Running.as_str().to_owned(),
                    eng_params_hash: Hash16::normalize(b"foreign").unwrap(),
                    eng_particle_hash: Hash16::normalize(b"foreign").unwrap(),
                    start_time: Utc::now(),
                    eng_last_update_time: Utc::now(),
                    eng_worker_conn_id: foreign_conn_id,
                };
                Ok(diesel::insert_into(models::table)
                    .values(&new_model)
                    .returning(models::id)
                    .get_result::<i64>(conn)?)
            })
            .unwrap();

        let result = store.model_update_results(model_id, Some("progress"), Some(0.5), Some(10));
        assert!(result.is_err());
    }

    #[test]
    fn test_model_adopt_next_orphan_reassigns_stale_running_model() {
        let store = test_helpers::store(test_helpers::log());
        let job_id = store.job_insert("cl", "", "", "cmd", "", 1, 1, 0, None).unwrap();
        let other_conn_id = store.conn_id() + 1;

        let model_id = store
            .session
            .with_conn(|conn| {
                let stale = Utc::now() - ::chrono::Duration::seconds(120);
                let new_model = model::insertable::Model {
                    job_id,
                    params: "p".to_owned(),
                    status: ModelStatus::Running.as_str().to_owned(),
                    eng_params_hash: Hash16::normalize(b"orphan").unwrap(),
                    eng_particle_hash: Hash16::normalize(b"orphan").unwrap(),
                    start_time: stale,
                    eng_last_update_time: stale,
                    eng_worker_conn_id: other_conn_id,
                };
                Ok(diesel::insert_into(models::table)
                    .values(&new_model)
                    .returning(models::id)
                    .get_result::<i64>(conn)?)
            })
            .unwrap();

        let adopted = store.model_adopt_next_orphan(job_id, Duration::from_secs(60)).unwrap();
        assert_eq!(Some(model_id), adopted);

        let models = store.models_info(&[model_id]).unwrap();
        assert_eq!(Some(store.conn_id()), models[0].eng_worker_conn_id);
    }

    #[test]
    fn test_model_set_completed_writes_completion_msg() {
        let store = test_helpers::store(test_helpers::log());
        let job_id = store.job_insert("cl", "", "", "cmd", "", 1, 1, 0, None).unwrap();
        let hash = Hash16::normalize(b"complete-me").unwrap();
        let (model_id, _) = store.model_insert_and_start(job_id, "p", hash.as_bytes(), None).unwrap();

        store
            .model_set_completed(model_id, ModelCompletionReason::Eof, "all done", Some(12.5), true)
            .unwrap();

        let models = store.models_info(&[model_id]).unwrap();
        assert_eq!(Some("all done".to_owned()), models[0].completion_msg);
        assert_eq!(Some(12.5), models[0].cpu_time);
        assert_eq!(ModelStatus::Completed.as_str(), models[0].status);
    }
}
