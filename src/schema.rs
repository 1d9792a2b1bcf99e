table! {
    jobs (id) {
        id -> Int8,
        client -> Text,
        client_info -> Text,
        client_key -> Text,
        cmd_line -> Text,
        params -> Text,
        job_hash -> Binary,
        status -> Text,
        completion_reason -> Nullable<Text>,
        completion_msg -> Nullable<Text>,
        worker_completion_reason -> Nullable<Text>,
        worker_completion_msg -> Nullable<Text>,
        cancel -> Bool,
        start_time -> Nullable<Timestamptz>,
        end_time -> Nullable<Timestamptz>,
        _eng_last_update_time -> Timestamptz,
        results -> Nullable<Text>,
        _eng_cjm_conn_id -> Nullable<Int4>,
        _eng_worker_state -> Nullable<Text>,
        _eng_status -> Nullable<Text>,
        _eng_model_milestones -> Nullable<Text>,
        minimum_workers -> Int4,
        maximum_workers -> Int4,
        priority -> Int4,
        _eng_allocate_new_workers -> Bool,
        _eng_untended_dead_workers -> Bool,
        num_failed_workers -> Int4,
        last_failed_worker_error_msg -> Nullable<Text>,
        _eng_job_type -> Nullable<Text>,
        _eng_cleaning_status -> Text,
    }
}

table! {
    models (id) {
        id -> Int8,
        job_id -> Int8,
        params -> Text,
        _eng_params_hash -> Binary,
        _eng_particle_hash -> Binary,
        status -> Text,
        completion_reason -> Nullable<Text>,
        completion_msg -> Nullable<Text>,
        results -> Nullable<Text>,
        optimized_metric -> Nullable<Double>,
        update_counter -> Int8,
        num_records -> Nullable<Int8>,
        cpu_time -> Nullable<Double>,
        model_checkpoint_id -> Nullable<Text>,
        _eng_stop -> Nullable<Text>,
        _eng_matured -> Bool,
        _eng_last_update_time -> Timestamptz,
        _eng_worker_conn_id -> Nullable<Int4>,
        start_time -> Timestamptz,
        end_time -> Nullable<Timestamptz>,
    }
}

joinable!(models -> jobs (job_id));
allow_tables_to_appear_in_same_query!(jobs, models);
