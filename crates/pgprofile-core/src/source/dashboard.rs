//! Instance overview for the dashboard.
//!
//! Only the first query (version, uptime, size) is required; the remaining
//! sections are best-effort and stay empty when their query fails.

use serde::Serialize;
use tracing::warn;

use super::PgSource;
use crate::error::SourceError;

const BASIC_INFO_QUERY: &str = r#"
    SELECT
        version() AS version,
        EXTRACT(EPOCH FROM now() - pg_postmaster_start_time())::bigint AS uptime_secs,
        pg_size_pretty(pg_database_size(current_database())) AS db_size
"#;

const CONNECTIONS_QUERY: &str = r#"
    SELECT
        count(*) FILTER (WHERE state = 'active')::bigint AS active,
        count(*) FILTER (WHERE state = 'idle')::bigint AS idle
    FROM pg_stat_activity
"#;

const CACHE_HIT_QUERY: &str = r#"
    SELECT
        COALESCE(round((sum(blks_hit) * 100.0
            / NULLIF(sum(blks_hit + blks_read), 0))::numeric, 2), 0)::double precision
    FROM pg_stat_database
    WHERE datname = current_database()
"#;

const TOP_WAITS_QUERY: &str = r#"
    SELECT COALESCE(wait_event, 'CPU') AS event, count(*)::bigint AS cnt
    FROM profile_metrics.ash_samples
    WHERE sample_time > NOW() - INTERVAL '5 minutes'
    GROUP BY 1
    ORDER BY 2 DESC
    LIMIT 5
"#;

const TOP_TABLES_QUERY: &str = r#"
    SELECT
        relname::text AS relname,
        pg_size_pretty(pg_total_relation_size(relid)) AS size_pretty,
        pg_total_relation_size(relid) AS size_bytes,
        COALESCE(seq_scan, 0) AS seq_scan,
        COALESCE(idx_scan, 0) AS idx_scan,
        COALESCE(n_tup_ins, 0) AS n_tup_ins,
        COALESCE(n_dead_tup, 0) AS n_dead_tup
    FROM pg_stat_user_tables
    ORDER BY pg_total_relation_size(relid) DESC
    LIMIT 5
"#;

#[derive(Debug, Clone, Default, Serialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct DashboardData {
    pub version: String,
    pub uptime_secs: i64,
    pub db_size: String,
    pub active_connections: i64,
    pub idle_connections: i64,
    pub cache_hit_ratio: f64,
    #[serde(rename = "top_wait_events_5min")]
    pub top_wait_events: Vec<WaitEventSummary>,
    #[serde(rename = "top_tables_by_size")]
    pub top_tables: Vec<TableStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct WaitEventSummary {
    pub event: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct TableStats {
    pub table_name: String,
    pub size_pretty: String,
    pub size_bytes: i64,
    /// Size relative to the largest listed table, percent.
    pub usage_percent: f64,
    pub seq_scans: i64,
    pub index_scans: i64,
    pub rows_inserted: i64,
    pub dead_rows: i64,
}

impl PgSource {
    /// Collects the dashboard overview.
    pub fn system_summary(&self) -> Result<DashboardData, SourceError> {
        self.with_client(|client, _| {
            let row = client.query_one(BASIC_INFO_QUERY, &[])?;
            let mut data = DashboardData {
                version: row.get("version"),
                uptime_secs: row.get("uptime_secs"),
                db_size: row.get("db_size"),
                ..Default::default()
            };

            match client.query_one(CONNECTIONS_QUERY, &[]) {
                Ok(row) => {
                    data.active_connections = row.get("active");
                    data.idle_connections = row.get("idle");
                }
                Err(e) => warn!(error = %super::format_postgres_error(&e), "dashboard: connections"),
            }

            data.cache_hit_ratio = client
                .query_one(CACHE_HIT_QUERY, &[])
                .map(|row| row.get(0))
                .unwrap_or(0.0);

            match client.query(TOP_WAITS_QUERY, &[]) {
                Ok(rows) => {
                    data.top_wait_events = rows
                        .iter()
                        .map(|row| WaitEventSummary {
                            event: row.get("event"),
                            count: row.get("cnt"),
                        })
                        .collect();
                }
                Err(e) => warn!(error = %super::format_postgres_error(&e), "dashboard: wait events"),
            }

            match client.query(TOP_TABLES_QUERY, &[]) {
                Ok(rows) => {
                    let tables: Vec<TableStats> = rows
                        .iter()
                        .map(|row| TableStats {
                            table_name: row.get("relname"),
                            size_pretty: row.get("size_pretty"),
                            size_bytes: row.get("size_bytes"),
                            usage_percent: 0.0,
                            seq_scans: row.get("seq_scan"),
                            index_scans: row.get("idx_scan"),
                            rows_inserted: row.get("n_tup_ins"),
                            dead_rows: row.get("n_dead_tup"),
                        })
                        .collect();
                    data.top_tables = with_usage_percent(tables);
                }
                Err(e) => warn!(error = %super::format_postgres_error(&e), "dashboard: tables"),
            }

            Ok(data)
        })
    }
}

/// Fills `usage_percent` relative to the largest table.
fn with_usage_percent(mut tables: Vec<TableStats>) -> Vec<TableStats> {
    let max = tables
        .iter()
        .map(|t| t.size_bytes)
        .max()
        .unwrap_or(0)
        .max(1);
    for t in &mut tables {
        t.usage_percent = t.size_bytes as f64 / max as f64 * 100.0;
    }
    tables
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, size_bytes: i64) -> TableStats {
        TableStats {
            table_name: name.to_string(),
            size_pretty: String::new(),
            size_bytes,
            usage_percent: 0.0,
            seq_scans: 0,
            index_scans: 0,
            rows_inserted: 0,
            dead_rows: 0,
        }
    }

    #[test]
    fn usage_is_relative_to_largest_table() {
        let tables = with_usage_percent(vec![table("accounts", 800), table("history", 200)]);
        assert_eq!(tables[0].usage_percent, 100.0);
        assert_eq!(tables[1].usage_percent, 25.0);
    }

    #[test]
    fn empty_tables_do_not_divide_by_zero() {
        let tables = with_usage_percent(vec![table("empty", 0)]);
        assert_eq!(tables[0].usage_percent, 0.0);
        assert!(with_usage_percent(Vec::new()).is_empty());
    }
}
