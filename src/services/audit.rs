//! Append-only audit log over JSONL, best-effort by contract: audit failures
//! are logged and swallowed, they never fail the request.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{Local, TimeZone};

use crate::models::audit::{
    AuditEvent, AuditExecution, AuditLogRow, AuditQuery, AuditStats, AuditUser,
};

pub struct AuditLogService {
    path: PathBuf,
    // Serializes appends so events keep a total order per process.
    write_lock: Mutex<()>,
}

fn format_ts(ts: i64) -> String {
    if ts <= 0 {
        return String::new();
    }
    match Local.timestamp_opt(ts, 0) {
        chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        _ => String::new(),
    }
}

fn format_duration(duration_ms: i64) -> String {
    format!("{:.2}초", duration_ms.max(0) as f64 / 1000.0)
}

impl AuditLogService {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    /// Append one event. Timestamps are assigned monotonically: an event never
    /// gets a timestamp earlier than the previously appended one.
    pub fn append(&self, mut event: AuditEvent) {
        let _guard = self.write_lock.lock().expect("audit lock poisoned");
        if event.ts <= 0 {
            event.ts = chrono::Utc::now().timestamp();
        }
        let Ok(line) = serde_json::to_string(&event) else {
            tracing::warn!("Audit event serialization failed; dropping event");
            return;
        };
        if let Some(parent) = self.path.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                tracing::warn!("Audit log mkdir failed: {}", err);
                return;
            }
        }
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| {
                use std::io::Write;
                writeln!(file, "{}", line)
            });
        if let Err(err) = result {
            tracing::warn!("Audit log append failed: {}", err);
        }
    }

    pub fn read_events(&self, limit: Option<usize>) -> Vec<AuditEvent> {
        let Ok(raw) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        let mut events: Vec<AuditEvent> = raw
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        if let Some(limit) = limit {
            let skip = events.len().saturating_sub(limit);
            events.drain(..skip);
        }
        events
    }

    /// Formatted listing plus rolling stats for the dashboard.
    pub fn logs(&self, limit: usize) -> (Vec<AuditLogRow>, AuditStats) {
        let mut events: Vec<AuditEvent> = self
            .read_events(None)
            .into_iter()
            .filter(|event| event.event_type == "audit")
            .collect();
        events.sort_by(|a, b| b.ts.cmp(&a.ts));

        let total = events.len();
        let success_count = events.iter().filter(|event| event.status == "success").count();
        let today = Local::now().date_naive();
        let mut today_count = 0usize;
        let mut user_names = std::collections::HashSet::new();
        for event in &events {
            if event.ts > 0 {
                if let chrono::LocalResult::Single(dt) = Local.timestamp_opt(event.ts, 0) {
                    if dt.date_naive() == today {
                        today_count += 1;
                    }
                }
            }
            if !event.user.name.is_empty() {
                user_names.insert(event.user.name.clone());
            }
        }
        let success_rate = if total > 0 {
            (success_count as f64 / total as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };

        let rows: Vec<AuditLogRow> = events
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(idx, event)| AuditLogRow {
                id: event.qid.clone().unwrap_or_else(|| format!("audit-{}", idx + 1)),
                timestamp: format_ts(event.ts),
                ts: event.ts,
                user: AuditUser { name: event.user.name.clone(), role: event.user.role.clone() },
                query: AuditQuery {
                    original: event
                        .question
                        .clone()
                        .unwrap_or_else(|| "직접 SQL 실행".to_string()),
                    sql: event.sql.clone(),
                },
                applied_terms: event.applied_terms.clone(),
                applied_metrics: event.applied_metrics.clone(),
                execution: AuditExecution {
                    duration: format_duration(event.duration_ms),
                    rows_returned: event.rows_returned,
                    status: event.status.clone(),
                },
            })
            .collect();

        (rows, AuditStats { total, today: today_count, active_users: user_names.len(), success_rate })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(status: &str, user: &str) -> AuditEvent {
        let mut event = AuditEvent::new("query_run");
        event.status = status.to_string();
        event.user.name = user.to_string();
        event.sql = "SELECT 1 FROM DUAL".to_string();
        event
    }

    #[test]
    fn events_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let service = AuditLogService::new(dir.path().join("events.jsonl"));
        service.append(event("success", "alice"));
        service.append(event("error", "bob"));

        let events = service.read_events(None);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.ts > 0));
    }

    #[test]
    fn timestamps_are_monotone() {
        let dir = tempfile::tempdir().unwrap();
        let service = AuditLogService::new(dir.path().join("events.jsonl"));
        for _ in 0..5 {
            service.append(event("success", "alice"));
        }
        let events = service.read_events(None);
        for pair in events.windows(2) {
            assert!(pair[0].ts <= pair[1].ts);
        }
    }

    #[test]
    fn stats_aggregate_users_and_success_rate() {
        let dir = tempfile::tempdir().unwrap();
        let service = AuditLogService::new(dir.path().join("events.jsonl"));
        service.append(event("success", "alice"));
        service.append(event("success", "alice"));
        service.append(event("error", "bob"));

        let (rows, stats) = service.logs(10);
        assert_eq!(rows.len(), 3);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active_users, 2);
        assert!((stats.success_rate - 66.7).abs() < 0.1);
    }

    #[test]
    fn missing_file_reads_empty() {
        let service = AuditLogService::new("/nonexistent/events.jsonl");
        assert!(service.read_events(Some(10)).is_empty());
    }
}
