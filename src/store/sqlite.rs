use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tokio::sync::oneshot;

use super::migrations::run_migrations;
use super::storage_area::{StorageArea, StorageItems};

const ENABLE_LOGS: bool = true;
const LOG_PREFIX: &str = "storage";

use crate::{log_error, log_info};

type StorageJob = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

/// Owns the worker thread. Dropping the sender ends the worker's receive
/// loop, so shutdown is a drop followed by a join.
struct StorageWorker {
    jobs: Option<mpsc::Sender<StorageJob>>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for StorageWorker {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log_error!("storage thread panicked");
            }
        }
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open SQLite storage at {}", path.display()))?;
    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        log_error!("WAL mode unavailable, continuing with the default journal: {err}");
    }
    run_migrations(&mut conn)?;
    Ok(conn)
}

/// SQLite-backed storage area. All statements run on one dedicated thread;
/// async callers hand it closures and await the reply.
#[derive(Clone)]
pub struct SqliteStorageArea {
    worker: Arc<StorageWorker>,
}

impl SqliteStorageArea {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let (jobs_tx, jobs_rx) = mpsc::channel::<StorageJob>();
        let (opened_tx, opened_rx) = mpsc::sync_channel::<Result<()>>(1);
        let thread_path = db_path.clone();

        let thread = thread::Builder::new()
            .name("regrets-storage".into())
            .spawn(move || {
                let mut conn = match open_connection(&thread_path) {
                    Ok(conn) => {
                        let _ = opened_tx.send(Ok(()));
                        conn
                    }
                    Err(err) => {
                        let _ = opened_tx.send(Err(err));
                        return;
                    }
                };
                for job in jobs_rx {
                    job(&mut conn);
                }
            })
            .context("failed to spawn storage thread")?;

        opened_rx
            .recv()
            .map_err(|_| anyhow!("storage thread exited while opening {}", db_path.display()))??;
        log_info!("opened {}", db_path.display());

        Ok(Self {
            worker: Arc::new(StorageWorker {
                jobs: Some(jobs_tx),
                thread: Some(thread),
            }),
        })
    }

    async fn execute<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let jobs = self
            .worker
            .jobs
            .as_ref()
            .ok_or_else(|| anyhow!("storage thread already shut down"))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        jobs.send(Box::new(move |conn| {
            let _ = reply_tx.send(job(conn));
        }))
        .map_err(|_| anyhow!("storage thread is gone"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("storage thread dropped the request"))?
    }
}

#[async_trait]
impl StorageArea for SqliteStorageArea {
    async fn get(&self, keys: &[&str]) -> Result<StorageItems> {
        let keys: Vec<String> = keys.iter().map(|key| key.to_string()).collect();
        self.execute(move |conn| {
            let mut stmt = conn.prepare("SELECT value FROM storage WHERE key = ?1")?;
            let mut items = StorageItems::new();
            for key in keys {
                let raw: Option<String> = stmt
                    .query_row(params![key], |row| row.get(0))
                    .optional()
                    .with_context(|| format!("failed to read storage key {key}"))?;
                if let Some(raw) = raw {
                    let value: Value = serde_json::from_str(&raw)
                        .with_context(|| format!("storage key {key} holds invalid JSON"))?;
                    items.insert(key, value);
                }
            }
            Ok(items)
        })
        .await
    }

    async fn set(&self, items: StorageItems) -> Result<()> {
        self.execute(move |conn| {
            let now = Utc::now().to_rfc3339();
            let tx = conn
                .transaction()
                .context("failed to open storage transaction")?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO storage (key, value, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                )?;
                for (key, value) in items {
                    let raw = serde_json::to_string(&value)?;
                    stmt.execute(params![key, raw, now])
                        .with_context(|| format!("failed to write storage key {key}"))?;
                }
            }
            tx.commit().context("failed to commit storage transaction")?;
            Ok(())
        })
        .await
    }
}
