//! Persistent-timer wake backend.
//!
//! Pending wake timestamps live in a small sqlite table that survives
//! process restart; a single countdown task is always armed for the
//! soonest entry. When it fires, the entry is removed and the timer
//! re-armed for the next-soonest.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::wake::{WakeBackend, WakeEvent};

/// Sqlite-backed table of pending alarms.
#[derive(Clone)]
struct AlarmDb {
    conn: Arc<Mutex<Connection>>,
}

impl AlarmDb {
    fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_conn(Connection::open(path)?)
    }

    fn open_in_memory() -> Result<Self> {
        Self::from_conn(Connection::open_in_memory()?)
    }

    fn from_conn(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS alarms (
                alarmid INTEGER PRIMARY KEY AUTOINCREMENT,
                profile TEXT NOT NULL UNIQUE,
                fire_at_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_alarms_fire_at ON alarms(fire_at_ms ASC);
            "#,
        )?;
        info!("alarm database initialized");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert or replace the alarm for a profile.
    fn replace(&self, profile: &str, when: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO alarms (profile, fire_at_ms) VALUES (?1, ?2)
            ON CONFLICT(profile) DO UPDATE SET fire_at_ms = excluded.fire_at_ms
            "#,
            params![profile, when.timestamp_millis()],
        )?;
        Ok(())
    }

    fn remove(&self, alarm_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM alarms WHERE alarmid = ?1", params![alarm_id])?;
        Ok(())
    }

    fn remove_profile(&self, profile: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM alarms WHERE profile = ?1", params![profile])?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM alarms", [])?;
        Ok(())
    }

    /// Soonest pending alarm, if any.
    fn soonest(&self) -> Result<Option<(i64, String, DateTime<Utc>)>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT alarmid, profile, fire_at_ms FROM alarms ORDER BY fire_at_ms ASC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;
        Ok(row.map(|(id, profile, ms)| {
            let at = Utc
                .timestamp_millis_opt(ms)
                .single()
                .unwrap_or_else(Utc::now);
            (id, profile, at)
        }))
    }

    fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM alarms", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

/// Persistent-timer backend: durable store plus one countdown task.
pub struct AlarmStoreBackend {
    db: AlarmDb,
    notify: Arc<Notify>,
    tx: mpsc::Sender<WakeEvent>,
    timer: Option<JoinHandle<()>>,
}

impl AlarmStoreBackend {
    pub fn open(path: impl AsRef<Path>, tx: mpsc::Sender<WakeEvent>) -> Result<Self> {
        Ok(Self {
            db: AlarmDb::open(path)?,
            notify: Arc::new(Notify::new()),
            tx,
            timer: None,
        })
    }

    pub fn open_in_memory(tx: mpsc::Sender<WakeEvent>) -> Result<Self> {
        Ok(Self {
            db: AlarmDb::open_in_memory()?,
            notify: Arc::new(Notify::new()),
            tx,
            timer: None,
        })
    }

    /// Spawn the countdown task. Pending alarms from a previous run are
    /// picked up immediately; overdue ones fire right away.
    pub fn start(&mut self) {
        if self.timer.is_some() {
            return;
        }
        let db = self.db.clone();
        let notify = self.notify.clone();
        let tx = self.tx.clone();
        self.timer = Some(tokio::spawn(async move {
            loop {
                let next = match db.soonest() {
                    Ok(next) => next,
                    Err(e) => {
                        warn!(error = %e, "failed to read alarm table, stopping timer");
                        break;
                    }
                };
                match next {
                    None => notify.notified().await,
                    Some((id, profile, at)) => {
                        let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {
                                if let Err(e) = db.remove(id) {
                                    warn!(error = %e, "failed to clear fired alarm");
                                }
                                debug!(profile = %profile, "alarm fired");
                                if tx.send(WakeEvent::Due { profile }).await.is_err() {
                                    break;
                                }
                            }
                            // Table changed; recompute the soonest entry.
                            _ = notify.notified() => {}
                        }
                    }
                }
            }
        }));
    }

    /// Number of alarms currently stored.
    pub fn stored_count(&self) -> Result<usize> {
        self.db.count()
    }
}

#[async_trait]
impl WakeBackend for AlarmStoreBackend {
    async fn arm(&mut self, profile: &str, when: DateTime<Utc>) -> Result<()> {
        self.db.replace(profile, when)?;
        self.notify.notify_one();
        Ok(())
    }

    async fn disarm(&mut self, profile: &str) -> Result<()> {
        self.db.remove_profile(profile)?;
        self.notify.notify_one();
        Ok(())
    }

    async fn disarm_all(&mut self) -> Result<()> {
        self.db.clear()?;
        self.notify.notify_one();
        Ok(())
    }
}

impl Drop for AlarmStoreBackend {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}
