//! SQL for the counter source.

/// Builds version-aware query for the cumulative counters.
///
/// `pg_stat_statements.total_exec_time` is called `total_time` before PG 13.
pub(super) fn build_raw_counters_query(server_version_num: Option<i32>) -> String {
    let exec_time_column = if server_version_num.unwrap_or(0) >= 130000 {
        "total_exec_time"
    } else {
        "total_time"
    };

    format!(
        r#"
            SELECT
                d.xact_commit::bigint AS xact_commit,
                d.xact_rollback::bigint AS xact_rollback,
                s.calls AS total_calls,
                s.exec_time AS total_exec_time
            FROM pg_stat_database d
            CROSS JOIN (
                SELECT
                    COALESCE(sum(calls), 0)::bigint AS calls,
                    COALESCE(sum({exec_time_column}), 0)::double precision AS exec_time
                FROM pg_stat_statements
            ) s
            WHERE d.datname = current_database()
        "#
    )
}

/// First and last stored `total_exec_time` inside the window, by snapshot time.
pub(super) const ACTIVE_TIME_QUERY: &str = r#"
    SELECT
        count(*)::bigint AS samples,
        ((array_agg(total_exec_time ORDER BY snapshot_time DESC))[1]
            - (array_agg(total_exec_time ORDER BY snapshot_time ASC))[1])::double precision
            AS delta_ms
    FROM profile_metrics.snapshots
    WHERE snapshot_time >= NOW() - make_interval(secs => $1)
"#;

/// Session samples of the window split into CPU / IO / Lock / other.
///
/// The IO event list catches data file and WAL waits that some versions
/// report under a non-IO wait_event_type.
pub(super) const SESSION_SAMPLES_QUERY: &str = r#"
    WITH classified AS (
        SELECT
            CASE
                WHEN wait_event IS NULL THEN 'cpu'
                WHEN wait_event_type = 'IO'
                    OR wait_event IN (
                        'DataFileRead', 'DataFileWrite', 'DataFileExtend', 'DataFileTruncate',
                        'WALWrite', 'WALSync'
                    ) THEN 'io'
                WHEN wait_event_type IN ('Lock', 'LWLock') THEN 'lock'
                ELSE 'other'
            END AS category
        FROM profile_metrics.ash_samples
        WHERE sample_time >= NOW() - make_interval(secs => $1)
    )
    SELECT
        count(*) FILTER (WHERE category = 'cpu')::bigint AS cpu_samples,
        count(*) FILTER (WHERE category = 'io')::bigint AS io_samples,
        count(*) FILTER (WHERE category = 'lock')::bigint AS lock_samples,
        count(*) FILTER (WHERE category = 'other')::bigint AS other_samples
    FROM classified
"#;

pub(super) const COLLECT_ASH_QUERY: &str = "SELECT profile_metrics.collect_ash()";

pub(super) const TAKE_SNAPSHOT_QUERY: &str = "SELECT profile_metrics.take_snapshot()";

pub(super) const RELOAD_CONF_QUERY: &str = "SELECT pg_reload_conf()";

/// Current values of the given settings.
pub(super) const CURRENT_SETTINGS_QUERY: &str = r#"
    SELECT name, setting, COALESCE(unit, '') AS unit
    FROM pg_settings
    WHERE name = ANY($1)
    ORDER BY name
"#;

/// `ALTER SYSTEM SET` does not take bind parameters; the name must already be
/// validated and the value is quoted as a string literal.
pub(super) fn alter_system_statement(name: &str, value: &str) -> String {
    format!("ALTER SYSTEM SET {name} = {}", quote_literal(value))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
