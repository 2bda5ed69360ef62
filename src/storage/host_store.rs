//! Local host store - versioned SQLite database of known hosts.
//!
//! One database file per store name (`<data_dir>/<name>.sqlite3`). Opening a
//! store that was never populated blocks until the bulk dataset has been
//! fetched and written, so `Ready` always means "fully loaded". Writes after
//! that go through a fire-and-forget queue drained by a single writer task.
//!
//! All SQLite work runs on `spawn_blocking`; the connection itself sits
//! behind a `parking_lot::Mutex`.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::{mpsc, oneshot};

use super::schema;
use super::types::{match_candidates, normalize_host, HostRecord, StoreState, StoreStats};
use crate::error::StoreError;
use crate::remote::{BulkDataset, BulkFetcher};
use crate::telemetry::EngineObserver;

const SELECT_RECORD: &str =
    "SELECT host, simple_upgrade, last_updated FROM https WHERE host = ?1";
const UPSERT_RECORD: &str =
    "INSERT OR REPLACE INTO https (host, simple_upgrade, last_updated) VALUES (?1, ?2, ?3)";

/// Configuration for the local host store.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Directory holding the database files
    pub data_dir: PathBuf,
    /// Logical dataset name; one database file per name
    pub name: String,
    /// Requested schema version (positive integer)
    pub version: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./var/data"),
            name: "httpsUpgrade".to_string(),
            version: 1,
        }
    }
}

impl StoreConfig {
    /// Path of the database file backing this store.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.sqlite3", self.name))
    }
}

enum WriteOp {
    Put(HostRecord),
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct WriteCounters {
    writes: AtomicU64,
    failures: AtomicU64,
}

/// Handle to one persistent host store.
pub struct HostStore {
    config: StoreConfig,
    state: Arc<RwLock<StoreState>>,
    conn: Arc<Mutex<Option<Connection>>>,
    writer: Mutex<Option<mpsc::UnboundedSender<WriteOp>>>,
    open_lock: tokio::sync::Mutex<()>,
    counters: Arc<WriteCounters>,
    observer: Arc<dyn EngineObserver>,
}

impl std::fmt::Debug for HostStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostStore")
            .field("name", &self.config.name)
            .field("version", &self.config.version)
            .field("state", &*self.state.read())
            .finish()
    }
}

impl HostStore {
    /// Create an unopened handle. Nothing touches disk until [`open`](Self::open).
    pub fn new(config: StoreConfig, observer: Arc<dyn EngineObserver>) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(StoreState::Unopened)),
            conn: Arc::new(Mutex::new(None)),
            writer: Mutex::new(None),
            open_lock: tokio::sync::Mutex::new(()),
            counters: Arc::new(WriteCounters::default()),
            observer,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn version(&self) -> u32 {
        self.config.version
    }

    pub fn state(&self) -> StoreState {
        *self.state.read()
    }

    fn set_state(&self, state: StoreState) {
        *self.state.write() = state;
        self.observer.on_store_state(&self.config.name, state);
    }

    fn ensure_ready(&self) -> Result<(), StoreError> {
        match self.state() {
            StoreState::Ready => Ok(()),
            other => Err(StoreError::NotReady(other)),
        }
    }

    /// Open the store, migrating and populating it as needed.
    ///
    /// Resolves once the store is `Ready`. A fresh store is populated from
    /// `fetcher` first; if that fails the handle becomes `Failed` and every
    /// later call to `open` returns [`StoreError::Failed`] without retrying.
    pub async fn open(&self, fetcher: &dyn BulkFetcher) -> Result<(), StoreError> {
        let _guard = self.open_lock.lock().await;
        match self.state() {
            StoreState::Ready => return Ok(()),
            StoreState::Failed => return Err(StoreError::Failed),
            StoreState::Unopened => {}
            other => return Err(StoreError::NotReady(other)),
        }

        match self.open_inner(fetcher).await {
            Ok(()) => {
                self.start_writer();
                self.set_state(StoreState::Ready);
                Ok(())
            }
            Err(e) => {
                error!("Failed to open host store '{}': {}", self.config.name, e);
                let conn = Arc::clone(&self.conn);
                let _ = run_blocking(move || {
                    conn.lock().take();
                    Ok(())
                })
                .await;
                self.set_state(StoreState::Failed);
                Err(e)
            }
        }
    }

    async fn open_inner(&self, fetcher: &dyn BulkFetcher) -> Result<(), StoreError> {
        let version = self.config.version;
        if version == 0 {
            return Err(StoreError::InvalidVersion(version));
        }

        let data_dir = self.config.data_dir.clone();
        let path = self.config.db_path();
        let (conn, stored) = run_blocking(move || {
            fs::create_dir_all(&data_dir).map_err(|e| StoreError::StorageUnavailable {
                path: data_dir.clone(),
                reason: e.to_string(),
            })?;
            let conn = Connection::open(&path).map_err(|e| StoreError::StorageUnavailable {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            let stored = schema::stored_version(&conn)?;
            Ok((conn, stored))
        })
        .await?;
        *self.conn.lock() = Some(conn);

        match stored {
            Some(current) if current == version => {
                debug!(
                    "Host store '{}' already at schema version {}",
                    self.config.name, version
                );
                Ok(())
            }
            Some(current) if current > version => Err(StoreError::MigrationFailed {
                version,
                reason: format!("stored schema version {current} is newer than requested {version}"),
            }),
            Some(current) => {
                self.set_state(StoreState::Upgrading);
                info!(
                    "Upgrading host store '{}' from version {} to {}",
                    self.config.name, current, version
                );
                self.with_conn(move |conn| schema::upgrade(conn, current, version))
                    .await
            }
            None => {
                self.set_state(StoreState::Upgrading);
                self.with_conn(move |conn| schema::create(conn, version))
                    .await?;

                self.set_state(StoreState::Populating);
                let dataset = fetcher
                    .fetch_bulk()
                    .await
                    .map_err(|e| StoreError::PopulationFailed(e.to_string()))?;
                let records = records_from_dataset(dataset);
                let count = self
                    .with_conn(move |conn| populate(conn, &records, version))
                    .await
                    .map_err(|e| match e {
                        StoreError::PopulationFailed(_) => e,
                        other => StoreError::PopulationFailed(other.to_string()),
                    })?;
                info!(
                    "Host store '{}' populated with {} records",
                    self.config.name, count
                );
                Ok(())
            }
        }
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        run_blocking(move || {
            let mut guard = conn.lock();
            let conn = guard
                .as_mut()
                .ok_or(StoreError::NotReady(StoreState::Closed))?;
            f(conn)
        })
        .await
    }

    /// Point lookup by exact host key. `Ok(None)` means not found.
    pub async fn get(&self, host: &str) -> Result<Option<HostRecord>, StoreError> {
        self.ensure_ready()?;
        let Some(key) = normalize_host(host) else {
            return Ok(None);
        };
        self.with_conn(move |conn| {
            let record = conn
                .prepare_cached(SELECT_RECORD)?
                .query_row(params![key], row_to_record)
                .optional()?;
            Ok(record)
        })
        .await
    }

    /// Most specific record covering `host`: the exact key, then its
    /// wildcard ancestors (`*.b.example.com`, `*.example.com`).
    pub async fn find_match(&self, host: &str) -> Result<Option<HostRecord>, StoreError> {
        self.ensure_ready()?;
        let Some(key) = normalize_host(host) else {
            return Ok(None);
        };
        let candidates = match_candidates(&key);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(SELECT_RECORD)?;
            for candidate in &candidates {
                if let Some(record) = stmt.query_row(params![candidate], row_to_record).optional()? {
                    return Ok(Some(record));
                }
            }
            Ok(None)
        })
        .await
    }

    /// Insert or overwrite a record without waiting for the write.
    ///
    /// Failures are logged and reported to the observer as `WriteFailed`;
    /// they never change the store state.
    pub fn put(&self, mut record: HostRecord) {
        let Some(host) = normalize_host(&record.host) else {
            self.report_write_failure(StoreError::WriteFailed {
                host: record.host.clone(),
                reason: "not a valid host".to_string(),
            });
            return;
        };
        record.host = host;

        let sender = self.writer.lock().clone();
        let state = self.state();
        match sender {
            Some(tx) if state.is_ready() => {
                if let Err(mpsc::error::SendError(op)) = tx.send(WriteOp::Put(record)) {
                    if let WriteOp::Put(record) = op {
                        self.report_write_failure(StoreError::WriteFailed {
                            host: record.host,
                            reason: "write queue closed".to_string(),
                        });
                    }
                }
            }
            _ => self.report_write_failure(StoreError::WriteFailed {
                host: record.host,
                reason: format!("store is {:?}", state),
            }),
        }
    }

    /// Wait until every `put` issued before this call has been applied.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let sender = self
            .writer
            .lock()
            .clone()
            .ok_or(StoreError::NotReady(self.state()))?;
        let (tx, rx) = oneshot::channel();
        sender
            .send(WriteOp::Flush(tx))
            .map_err(|_| StoreError::Worker("write queue closed".to_string()))?;
        rx.await
            .map_err(|_| StoreError::Worker("writer dropped flush request".to_string()))
    }

    /// Record counts plus write-queue counters.
    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.ensure_ready()?;
        let (records, wildcard_records) = self
            .with_conn(|conn| {
                let records: i64 = conn.query_row("SELECT COUNT(*) FROM https", [], |row| row.get(0))?;
                let wildcards: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM https WHERE host LIKE '*.%'",
                    [],
                    |row| row.get(0),
                )?;
                Ok((records as usize, wildcards as usize))
            })
            .await?;
        Ok(StoreStats {
            records,
            wildcard_records,
            writes: self.counters.writes.load(Ordering::Relaxed),
            write_failures: self.counters.failures.load(Ordering::Relaxed),
        })
    }

    /// Drain pending writes and release the connection.
    pub async fn close(&self) {
        if !self.state().is_ready() {
            return;
        }
        if let Err(e) = self.flush().await {
            warn!("Host store '{}' closed with pending writes: {}", self.config.name, e);
        }
        self.writer.lock().take();
        let conn = Arc::clone(&self.conn);
        let _ = run_blocking(move || {
            conn.lock().take();
            Ok(())
        })
        .await;
        self.set_state(StoreState::Closed);
    }

    fn report_write_failure(&self, error: StoreError) {
        report_write_failure(&self.counters, self.observer.as_ref(), error);
    }

    fn start_writer(&self) {
        let (tx, mut rx) = mpsc::unbounded_channel::<WriteOp>();
        let conn = Arc::clone(&self.conn);
        let counters = Arc::clone(&self.counters);
        let observer = Arc::clone(&self.observer);
        let name = self.config.name.clone();

        tokio::spawn(async move {
            while let Some(op) = rx.recv().await {
                let mut batch = Vec::new();
                let mut flushes = Vec::new();
                let mut next = Some(op);
                while let Some(op) = next {
                    match op {
                        WriteOp::Put(record) => batch.push(record),
                        WriteOp::Flush(ack) => flushes.push(ack),
                    }
                    next = rx.try_recv().ok();
                }

                if !batch.is_empty() {
                    let hosts: Vec<String> = batch.iter().map(|r| r.host.clone()).collect();
                    let conn = Arc::clone(&conn);
                    match run_blocking(move || write_records(&conn, &batch)).await {
                        Ok(written) => {
                            counters.writes.fetch_add(written as u64, Ordering::Relaxed);
                        }
                        Err(e) => {
                            let reason = e.to_string();
                            for host in hosts {
                                report_write_failure(
                                    &counters,
                                    observer.as_ref(),
                                    StoreError::WriteFailed {
                                        host,
                                        reason: reason.clone(),
                                    },
                                );
                            }
                        }
                    }
                }

                for ack in flushes {
                    let _ = ack.send(());
                }
            }
            debug!("Host store '{}' writer stopped", name);
        });

        *self.writer.lock() = Some(tx);
    }
}

async fn run_blocking<F, T>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Worker(e.to_string()))?
}

fn report_write_failure(counters: &WriteCounters, observer: &dyn EngineObserver, error: StoreError) {
    counters.failures.fetch_add(1, Ordering::Relaxed);
    let host = match &error {
        StoreError::WriteFailed { host, .. } => host.clone(),
        _ => String::new(),
    };
    warn!("Host store write failed: {}", error);
    observer.on_write_failed(&host, &error);
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<HostRecord> {
    let last_updated: i64 = row.get(2)?;
    Ok(HostRecord {
        host: row.get(0)?,
        simple_upgrade: row.get(1)?,
        last_updated: last_updated.max(0) as u64,
    })
}

fn insert_records(tx: &rusqlite::Transaction<'_>, records: &[HostRecord]) -> rusqlite::Result<usize> {
    let mut stmt = tx.prepare_cached(UPSERT_RECORD)?;
    for record in records {
        stmt.execute(params![
            record.host,
            record.simple_upgrade,
            record.last_updated as i64
        ])?;
    }
    Ok(records.len())
}

/// Write the initial dataset and the version marker in one transaction.
fn populate(conn: &mut Connection, records: &[HostRecord], version: u32) -> Result<usize, StoreError> {
    let tx = conn.transaction()?;
    let count = insert_records(&tx, records)
        .map_err(|e| StoreError::PopulationFailed(e.to_string()))?;
    schema::write_version(&tx, version)?;
    tx.commit()?;
    Ok(count)
}

fn write_records(conn: &Mutex<Option<Connection>>, records: &[HostRecord]) -> Result<usize, StoreError> {
    let mut guard = conn.lock();
    let conn = guard
        .as_mut()
        .ok_or(StoreError::NotReady(StoreState::Closed))?;
    let tx = conn.transaction()?;
    let count = insert_records(&tx, records)?;
    tx.commit()?;
    Ok(count)
}

fn records_from_dataset(dataset: BulkDataset) -> Vec<HostRecord> {
    let mut records = Vec::with_capacity(dataset.simple_upgrade.len());
    for raw in dataset.simple_upgrade {
        match normalize_host(&raw) {
            Some(host) => records.push(HostRecord::upgrade(host)),
            None => warn!("Skipping invalid host in bulk dataset: {:?}", raw),
        }
    }
    records
}
