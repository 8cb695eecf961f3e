use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound(EntityLink),
    /// The caller saved a stale image: `expected` is the version it read,
    /// `found` is what the store holds now.
    Conflict {
        link: EntityLink,
        expected: u64,
        found: u64,
    },
    Io(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound(link) => write!(f, "not found: {link}"),
            StoreError::Conflict {
                link,
                expected,
                found,
            } => write!(f, "version conflict on {link}: expected {expected}, found {found}"),
            StoreError::Io(e) => write!(f, "store I/O error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Persistence collaborator. Single-record operations only; there is no
/// multi-record transaction.
#[async_trait]
pub trait Store: Send + Sync {
    async fn load(&self, kind: EntityKind, id: Ulid) -> Result<Entity, StoreError>;

    /// Persist `entity` if its `version` matches the stored one (0 for a new
    /// record). Returns the stored image with the version bumped.
    async fn save(&self, entity: Entity) -> Result<Entity, StoreError>;

    async fn find_many(
        &self,
        kind: EntityKind,
        predicate: &(dyn for<'e> Fn(&'e Entity) -> bool + Send + Sync),
    ) -> Result<Vec<Entity>, StoreError>;
}

pub async fn load_record<R: Record>(store: &dyn Store, id: Ulid) -> Result<R, StoreError> {
    let entity = store.load(R::KIND, id).await?;
    let found = entity.kind();
    R::from_entity(entity)
        .ok_or_else(|| StoreError::Io(format!("{} {id} is stored as a {found}", R::KIND)))
}

pub async fn save_record<R: Record>(store: &dyn Store, record: R) -> Result<R, StoreError> {
    let saved = store.save(record.into_entity()).await?;
    let found = saved.kind();
    R::from_entity(saved).ok_or_else(|| StoreError::Io(format!("store returned a {found}")))
}

pub async fn find_records<R, F>(store: &dyn Store, predicate: F) -> Result<Vec<R>, StoreError>
where
    R: Record,
    F: Fn(&R) -> bool + Send + Sync,
{
    let filter = |e: &Entity| R::as_record(e).is_some_and(&predicate);
    let entities = store.find_many(R::KIND, &filter).await?;
    Ok(entities.into_iter().filter_map(R::from_entity).collect())
}

// ── WAL-backed store ─────────────────────────────────────────────

/// `None` marks an id reserved by a save that never committed.
type Slot = Arc<RwLock<Option<Entity>>>;

enum WalCommand {
    Append {
        record: Entity,
        response: oneshot::Sender<io::Result<()>>,
    },
    /// Start recording every appended image until the next `Compact`.
    BeginCompact {
        response: oneshot::Sender<()>,
    },
    /// `records` is a snapshot taken after `BeginCompact`; the writer adds
    /// whatever it appended since then before swapping files.
    Compact {
        records: Vec<Entity>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
///
/// Between `BeginCompact` and `Compact` every durable append is also kept
/// in `captured`, so a save that races the snapshot survives the swap.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut captured: Option<Vec<Entity>> = None;
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { record, response } => {
                let mut batch = vec![(record, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { record, response }) => batch.push((record, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                if result.is_ok()
                    && let Some(tail) = captured.as_mut()
                {
                    tail.extend(batch.iter().map(|(record, _)| record.clone()));
                }
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other, &mut captured);
                }
            }
            other => handle_non_append(&mut wal, other, &mut captured),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Entity, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (record, _) in batch {
        if let Err(e) = wal.append_buffered(record) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Entity, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand, captured: &mut Option<Vec<Entity>>) {
    match cmd {
        WalCommand::BeginCompact { response } => {
            *captured = Some(Vec::new());
            let _ = response.send(());
        }
        WalCommand::Compact { mut records, response } => {
            // Captured images come last so they win on replay.
            records.extend(captured.take().unwrap_or_default());
            let result = Wal::write_compact_file(wal.path(), &records)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// In-memory tables backed by a write-ahead log. Every committed save is
/// durable before it becomes visible to `load`.
pub struct WalStore {
    vehicles: DashMap<Ulid, Slot>,
    customers: DashMap<Ulid, Slot>,
    staff: DashMap<Ulid, Slot>,
    bookings: DashMap<Ulid, Slot>,
    alerts: DashMap<Ulid, Slot>,
    wal_tx: mpsc::Sender<WalCommand>,
    compacting: Mutex<()>,
}

impl WalStore {
    /// Replay the WAL at `path` and start the group-commit writer.
    /// Must be called from within a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let records = Wal::replay(path)?;
        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            vehicles: DashMap::new(),
            customers: DashMap::new(),
            staff: DashMap::new(),
            bookings: DashMap::new(),
            alerts: DashMap::new(),
            wal_tx,
            compacting: Mutex::new(()),
        };
        for record in records {
            let link = record.link();
            store
                .table(link.kind)
                .insert(link.id, Arc::new(RwLock::new(Some(record))));
        }
        Ok(store)
    }

    fn table(&self, kind: EntityKind) -> &DashMap<Ulid, Slot> {
        match kind {
            EntityKind::Vehicle => &self.vehicles,
            EntityKind::Customer => &self.customers,
            EntityKind::Staff => &self.staff,
            EntityKind::Booking => &self.bookings,
            EntityKind::Alert => &self.alerts,
        }
    }

    fn slots(&self, kind: EntityKind) -> Vec<(Ulid, Slot)> {
        let mut slots: Vec<(Ulid, Slot)> = self
            .table(kind)
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        slots.sort_by_key(|(id, _)| *id);
        slots
    }

    async fn wal_append(&self, record: &Entity) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                record: record.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Io("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Io("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Io(e.to_string()))
    }

    /// Rewrite the WAL with only the latest image of every record. Saves
    /// may run concurrently; one compaction runs at a time.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _one_at_a_time = self.compacting.lock().await;

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::BeginCompact { response: tx })
            .await
            .map_err(|_| StoreError::Io("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Io("WAL writer dropped response".into()))?;

        // A save appended before BeginCompact still holds its slot's write
        // lock until the slot is updated, so the reads below see it.
        let mut records = Vec::new();
        for kind in EntityKind::ALL {
            for (_, slot) in self.slots(kind) {
                if let Some(record) = slot.read().await.clone() {
                    records.push(record);
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { records, response: tx })
            .await
            .map_err(|_| StoreError::Io("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Io("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Io(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl Store for WalStore {
    async fn load(&self, kind: EntityKind, id: Ulid) -> Result<Entity, StoreError> {
        let not_found = || StoreError::NotFound(EntityLink { kind, id });
        let slot = self
            .table(kind)
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(not_found)?;
        let guard = slot.read().await;
        guard.clone().ok_or_else(not_found)
    }

    async fn save(&self, mut entity: Entity) -> Result<Entity, StoreError> {
        let link = entity.link();
        let slot = self
            .table(link.kind)
            .entry(link.id)
            .or_insert_with(|| Arc::new(RwLock::new(None)))
            .clone();

        let mut guard = slot.write().await;
        let current = guard.as_ref().map_or(0, Entity::version);
        if entity.version() != current {
            return Err(StoreError::Conflict {
                link,
                expected: entity.version(),
                found: current,
            });
        }
        entity.set_version(current + 1);
        self.wal_append(&entity).await?;
        *guard = Some(entity.clone());
        Ok(entity)
    }

    async fn find_many(
        &self,
        kind: EntityKind,
        predicate: &(dyn for<'e> Fn(&'e Entity) -> bool + Send + Sync),
    ) -> Result<Vec<Entity>, StoreError> {
        let mut found = Vec::new();
        for (_, slot) in self.slots(kind) {
            let guard = slot.read().await;
            if let Some(record) = guard.as_ref()
                && predicate(record)
            {
                found.push(record.clone());
            }
        }
        Ok(found)
    }
}
