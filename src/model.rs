//! The domain layer: rows queried from and inserted into the `jobs` and
//! `models` tables, plus the enums and constants that are part of the
//! public, bit-exact wire contract (status strings, completion reasons,
//! priority bounds).
//!
//! Insertable rows live in the `insertable` submodule, distinct from the
//! queryable rows so the database's own defaults (auto-incrementing IDs,
//! timestamps) aren't shadowed by a Rust-side default.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

//
// Constants
//

pub const HASH_MAX_LEN: usize = 16;
pub const CLIENT_MAX_LEN: usize = 8;

pub const MIN_JOB_PRIORITY: i32 = -100;
pub const DEFAULT_JOB_PRIORITY: i32 = 0;
pub const MAX_JOB_PRIORITY: i32 = 100;

//
// Enums
//
// Each is represented on the wire (and in the database) as the literal
// string named in spec, not as a numbered enum, so that clients speaking
// the wire contract directly never have to resolve an integer tag.
//

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    #[serde(rename = "notStarted")]
    NotStarted,
    #[serde(rename = "starting")]
    Starting,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "testMode")]
    TestMode,
    #[serde(rename = "completed")]
    Completed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::NotStarted => "notStarted",
            JobStatus::Starting => "starting",
            JobStatus::Running => "running",
            JobStatus::TestMode => "testMode",
            JobStatus::Completed => "completed",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobCompletionReason {
    #[serde(rename = "success")]
    Success,
    // Defined for forward compatibility; no operation in this store sets it
    // (the Job Manager is expected to set it directly, same as the source
    // this protocol is modeled on never set it from within the DAO layer).
    #[serde(rename = "cancel")]
    Cancelled,
    #[serde(rename = "killed")]
    Killed,
    #[serde(rename = "error")]
    Error,
}

impl JobCompletionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            JobCompletionReason::Success => "success",
            JobCompletionReason::Cancelled => "cancel",
            JobCompletionReason::Killed => "killed",
            JobCompletionReason::Error => "error",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelStatus {
    #[serde(rename = "notStarted")]
    NotStarted,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "completed")]
    Completed,
}

impl ModelStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelStatus::NotStarted => "notStarted",
            ModelStatus::Running => "running",
            ModelStatus::Completed => "completed",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelCompletionReason {
    #[serde(rename = "eof")]
    Eof,
    #[serde(rename = "stopped")]
    Stopped,
    #[serde(rename = "killed")]
    Killed,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "orphan")]
    Orphan,
}

impl ModelCompletionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelCompletionReason::Eof => "eof",
            ModelCompletionReason::Stopped => "stopped",
            ModelCompletionReason::Killed => "killed",
            ModelCompletionReason::Error => "error",
            ModelCompletionReason::Orphan => "orphan",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    #[serde(rename = "killed")]
    Killed,
    #[serde(rename = "stopped")]
    Stopped,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::Killed => "killed",
            StopReason::Stopped => "stopped",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CleaningStatus {
    #[serde(rename = "notdone")]
    NotDone,
    #[serde(rename = "done")]
    Done,
}

impl CleaningStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CleaningStatus::NotDone => "notdone",
            CleaningStatus::Done => "done",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobType {
    #[serde(rename = "hypersearch")]
    Hypersearch,
    #[serde(rename = "production-model")]
    ProductionModel,
    #[serde(rename = "stream-manager")]
    StreamManager,
    #[serde(rename = "test")]
    Test,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Hypersearch => "hypersearch",
            JobType::ProductionModel => "production-model",
            JobType::StreamManager => "stream-manager",
            JobType::Test => "test",
        }
    }
}

//
// Queryable rows
//

#[derive(Clone, Debug, Queryable)]
pub struct Job {
    pub id: i64,
    pub client: String,
    pub client_info: String,
    pub client_key: String,
    pub cmd_line: String,
    pub params: String,
    pub job_hash: ::hash::Hash16,
    pub status: String,
    pub completion_reason: Option<String>,
    pub completion_msg: Option<String>,
    pub worker_completion_reason: Option<String>,
    pub worker_completion_msg: Option<String>,
    pub cancel: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub eng_last_update_time: DateTime<Utc>,
    pub results: Option<String>,
    pub eng_cjm_conn_id: Option<i32>,
    pub eng_worker_state: Option<String>,
    pub eng_status: Option<String>,
    pub eng_model_milestones: Option<String>,
    pub minimum_workers: i32,
    pub maximum_workers: i32,
    pub priority: i32,
    pub eng_allocate_new_workers: bool,
    pub eng_untended_dead_workers: bool,
    pub num_failed_workers: i32,
    pub last_failed_worker_error_msg: Option<String>,
    pub eng_job_type: Option<String>,
    pub eng_cleaning_status: String,
}

#[derive(Clone, Debug, Queryable)]
pub struct Model {
    pub id: i64,
    pub job_id: i64,
    pub params: String,
    pub eng_params_hash: ::hash::Hash16,
    pub eng_particle_hash: ::hash::Hash16,
    pub status: String,
    pub completion_reason: Option<String>,
    pub completion_msg: Option<String>,
    pub results: Option<String>,
    pub optimized_metric: Option<f64>,
    pub update_counter: i64,
    pub num_records: Option<i64>,
    pub cpu_time: Option<f64>,
    pub model_checkpoint_id: Option<String>,
    pub eng_stop: Option<String>,
    pub eng_matured: bool,
    pub eng_last_update_time: DateTime<Utc>,
    pub eng_worker_conn_id: Option<i32>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

pub mod insertable {
    use chrono::{DateTime, Utc};
    use hash::Hash16;
    use schema::{jobs, models};

    #[derive(Insertable)]
    #[table_name = "jobs"]
    pub struct Job {
        pub status: String,
        pub client: String,
        pub client_info: String,
        pub client_key: String,
        pub cmd_line: String,
        pub params: String,
        pub job_hash: Hash16,
        #[column_name = "_eng_last_update_time"]
        pub eng_last_update_time: DateTime<Utc>,
        pub minimum_workers: i32,
        pub maximum_workers: i32,
        pub priority: i32,
        #[column_name = "_eng_job_type"]
        pub eng_job_type: Option<String>,
        #[column_name = "_eng_cjm_conn_id"]
        pub eng_cjm_conn_id: Option<i32>,
        pub start_time: Option<DateTime<Utc>>,
    }

    #[derive(Insertable)]
    #[table_name = "models"]
    pub struct Model {
        pub job_id: i64,
        pub params: String,
        pub status: String,
        #[column_name = "_eng_params_hash"]
        pub eng_params_hash: Hash16,
        #[column_name = "_eng_particle_hash"]
        pub eng_particle_hash: Hash16,
        pub start_time: DateTime<Utc>,
        #[column_name = "_eng_last_update_time"]
        pub eng_last_update_time: DateTime<Utc>,
        #[column_name = "_eng_worker_conn_id"]
        pub eng_worker_conn_id: i32,
    }
}
