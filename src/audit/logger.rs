//! File-backed audit log writer: date + size rotation, retention, query
//! and stats (§4.4).

use super::event::{AuditEvent, AuditLevel};
use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

struct OpenFile {
    date: NaiveDate,
    file: File,
}

/// Appends JSON-lines audit events to `<dir>/audit-YYYY-MM-DD.log`,
/// rotating on UTC date change and on size, and enforcing retention.
pub struct AuditLogger {
    dir: PathBuf,
    max_file_size_bytes: u64,
    retention_days: u64,
    state: Mutex<Option<OpenFile>>,
}

/// Filter used by [`AuditLogger::query`].
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub level: Option<AuditLevel>,
    pub action: Option<String>,
    pub user: Option<String>,
    pub environment: Option<String>,
    pub success: Option<bool>,
    pub limit: Option<usize>,
}

/// Aggregate statistics over a set of events.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AuditStats {
    pub total: usize,
    pub by_level: HashMap<String, usize>,
    pub by_action: HashMap<String, usize>,
    pub success_rate: f64,
}

impl AuditLogger {
    /// Opens (creating if absent) the audit directory with mode 0700.
    pub fn new(dir: impl Into<PathBuf>, max_file_size_bytes: u64, retention_days: u64) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))?;
        }
        Ok(Self {
            dir,
            max_file_size_bytes,
            retention_days,
            state: Mutex::new(None),
        })
    }

    fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("audit-{}.log", date.format("%Y-%m-%d")))
    }

    /// Appends one event, rotating the backing file by date and size.
    /// Audit-write failures never propagate as the original run failure
    /// (§7); callers should log-to-stderr and continue on error.
    pub fn log(&self, event: &AuditEvent) -> Result<()> {
        let line = event.to_log_line()?;
        let today = event.timestamp.date_naive();

        let mut guard = self.state.lock().map_err(|_| Error::Internal("audit logger poisoned".into()))?;

        let needs_new_file = match guard.as_ref() {
            Some(open) => open.date != today,
            None => true,
        };
        if needs_new_file {
            let path = self.path_for(today);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
            }
            *guard = Some(OpenFile { date: today, file });
        }

        if let Some(open) = guard.as_mut() {
            if open.file.metadata()?.len() >= self.max_file_size_bytes {
                let rotated = self
                    .path_for(today)
                    .with_extension(format!("log.{}", Utc::now().timestamp()));
                fs::rename(self.path_for(today), &rotated)?;
                let path = self.path_for(today);
                open.file = OpenOptions::new().create(true).append(true).open(&path)?;
            }
            writeln!(open.file, "{line}")?;
            open.file.flush()?;
        }
        Ok(())
    }

    /// Deletes audit files whose mtime is older than the retention window.
    pub fn cleanup_retention(&self) -> Result<usize> {
        let cutoff = std::time::SystemTime::now()
            - std::time::Duration::from_secs(self.retention_days * 24 * 3600);
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if metadata.is_file() {
                if let Ok(modified) = metadata.modified() {
                    if modified < cutoff {
                        fs::remove_file(entry.path())?;
                        removed += 1;
                    }
                }
            }
        }
        Ok(removed)
    }

    fn all_events(&self) -> Result<Vec<AuditEvent>> {
        let mut events = Vec::new();
        if !self.dir.exists() {
            return Ok(events);
        }
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file = File::open(entry.path())?;
            for line in BufReader::new(file).lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                if let Ok(event) = serde_json::from_str::<AuditEvent>(&line) {
                    events.push(event);
                }
            }
        }
        Ok(events)
    }

    /// Filters and sorts events (newest first), honouring `query.limit`.
    pub fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>> {
        let mut events: Vec<AuditEvent> = self
            .all_events()?
            .into_iter()
            .filter(|e| query.since.map_or(true, |since| e.timestamp >= since))
            .filter(|e| query.until.map_or(true, |until| e.timestamp <= until))
            .filter(|e| query.level.map_or(true, |l| l == e.level))
            .filter(|e| query.action.as_ref().map_or(true, |a| &e.action == a))
            .filter(|e| query.user.as_ref().map_or(true, |u| &e.user == u))
            .filter(|e| {
                query
                    .environment
                    .as_ref()
                    .map_or(true, |env| &e.environment == env)
            })
            .filter(|e| query.success.map_or(true, |s| e.success == s))
            .collect();

        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = query.limit {
            events.truncate(limit);
        }
        Ok(events)
    }

    /// Aggregates totals, per-level and per-action counts, and success rate
    /// over the events matching `query`.
    pub fn stats(&self, query: &AuditQuery) -> Result<AuditStats> {
        let events = self.query(&AuditQuery {
            limit: None,
            ..query.clone()
        })?;

        let total = events.len();
        let mut by_level = HashMap::new();
        let mut by_action = HashMap::new();
        let mut successes = 0;
        for event in &events {
            *by_level.entry(event.level.to_string()).or_insert(0) += 1;
            *by_action.entry(event.action.clone()).or_insert(0) += 1;
            if event.success {
                successes += 1;
            }
        }
        let success_rate = if total == 0 {
            0.0
        } else {
            successes as f64 / total as f64
        };

        Ok(AuditStats {
            total,
            by_level,
            by_action,
            success_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn logs_and_queries_events() {
        let dir = tempdir().unwrap();
        let logger = AuditLogger::new(dir.path(), 10 * 1024 * 1024, 90).unwrap();

        logger.log(&AuditEvent::new("playbook.execute", "alice").with_environment("local")).unwrap();
        logger
            .log(&AuditEvent::new("rbac.access", "bob").with_level(AuditLevel::Critical).failure("denied"))
            .unwrap();

        let all = logger.query(&AuditQuery::default()).unwrap();
        assert_eq!(all.len(), 2);

        let denied = logger.query(&AuditQuery {
            success: Some(false),
            ..Default::default()
        }).unwrap();
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].action, "rbac.access");
    }

    #[test]
    fn stats_computes_success_rate() {
        let dir = tempdir().unwrap();
        let logger = AuditLogger::new(dir.path(), 10 * 1024 * 1024, 90).unwrap();
        logger.log(&AuditEvent::new("a", "u")).unwrap();
        logger.log(&AuditEvent::new("a", "u").failure("bad")).unwrap();

        let stats = logger.stats(&AuditQuery::default()).unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.success_rate, 0.5);
    }

    #[test]
    fn secret_values_never_appear_in_logged_details() {
        let dir = tempdir().unwrap();
        let logger = AuditLogger::new(dir.path(), 10 * 1024 * 1024, 90).unwrap();
        let event = AuditEvent::new("secret.access", "alice")
            .with_target("db_password")
            .with_detail("store", "file");
        logger.log(&event).unwrap();

        let events = logger.query(&AuditQuery::default()).unwrap();
        let line = events[0].to_log_line().unwrap();
        assert!(!line.contains("hunter2"));
    }

    #[test]
    fn retention_removes_old_files() {
        let dir = tempdir().unwrap();
        let logger = AuditLogger::new(dir.path(), 10 * 1024 * 1024, 0).unwrap();
        logger.log(&AuditEvent::new("a", "u")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let removed = logger.cleanup_retention().unwrap();
        assert_eq!(removed, 1);
    }
}
