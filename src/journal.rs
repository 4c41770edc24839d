use std::io;
use std::path::Path;
use std::time::Instant;

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, mpsc, oneshot};
use tracing::warn;

use crate::error::BookingError;
use crate::model::Event;
use crate::observability;
use crate::wal::{Replay, Wal};

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first append, drains whatever else is already queued,
/// then pays for a single fsync on behalf of the whole batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let started = Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes don't leak into
    // the next batch.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Durable log shared by the calendar store and the booking repository.
///
/// Writers hold the gate shared from append until their in-memory apply is
/// done; compaction holds it exclusively while snapshotting, so a snapshot
/// never misses an acknowledged write. Always take the gate before any
/// villa lock.
pub struct Journal {
    tx: mpsc::Sender<WalCommand>,
    gate: RwLock<()>,
    /// (appends to let through, appends to fail after that)
    #[cfg(test)]
    faults: std::sync::Mutex<(u32, u32)>,
}

/// Shared gate hold for one mutation.
pub struct JournalTxn<'a> {
    journal: &'a Journal,
    _gate: RwLockReadGuard<'a, ()>,
}

/// Exclusive gate hold for compaction.
pub struct CompactionGuard<'a> {
    journal: &'a Journal,
    _gate: RwLockWriteGuard<'a, ()>,
}

impl Journal {
    /// Replay the log at `path` and start the writer task.
    /// Must be called from inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<(Self, Replay)> {
        let replay = Wal::replay(path)?;
        if replay.torn_tail {
            Wal::truncate(path, replay.valid_len)?;
            warn!(
                "journal {}: cut torn tail after {} records ({} bytes kept)",
                path.display(),
                replay.events.len(),
                replay.valid_len
            );
        }
        let wal = Wal::open(path)?;
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, rx));
        Ok((
            Self {
                tx,
                gate: RwLock::new(()),
                #[cfg(test)]
                faults: Default::default(),
            },
            replay,
        ))
    }

    pub async fn begin(&self) -> JournalTxn<'_> {
        JournalTxn {
            journal: self,
            _gate: self.gate.read().await,
        }
    }

    pub async fn lock_for_compaction(&self) -> CompactionGuard<'_> {
        CompactionGuard {
            journal: self,
            _gate: self.gate.write().await,
        }
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Let `skip` appends through, then fail the next `fail` ones.
    #[cfg(test)]
    pub(crate) fn fail_appends(&self, skip: u32, fail: u32) {
        if let Ok(mut f) = self.faults.lock() {
            *f = (skip, fail);
        }
    }

    #[cfg(test)]
    fn injected_fault(&self) -> bool {
        let Ok(mut f) = self.faults.lock() else { return false };
        if f.0 > 0 {
            f.0 -= 1;
            false
        } else if f.1 > 0 {
            f.1 -= 1;
            true
        } else {
            false
        }
    }

    async fn roundtrip(
        &self,
        cmd: WalCommand,
        rx: oneshot::Receiver<io::Result<()>>,
    ) -> Result<(), BookingError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| BookingError::journal("writer shut down"))?;
        rx.await
            .map_err(|_| BookingError::journal("writer dropped response"))?
            .map_err(BookingError::journal)
    }
}

impl JournalTxn<'_> {
    /// Durably append `event`. Returns once it is fsynced.
    pub async fn append(&self, event: &Event) -> Result<(), BookingError> {
        #[cfg(test)]
        if self.journal.injected_fault() {
            return Err(BookingError::journal("injected append failure"));
        }
        let (tx, rx) = oneshot::channel();
        let cmd = WalCommand::Append {
            event: event.clone(),
            response: tx,
        };
        self.journal.roundtrip(cmd, rx).await
    }
}

impl CompactionGuard<'_> {
    /// Replace the log with `snapshot`, which must describe the full state
    /// observed while this guard was held.
    pub async fn compact(self, snapshot: Vec<Event>) -> Result<(), BookingError> {
        let (tx, rx) = oneshot::channel();
        let cmd = WalCommand::Compact {
            events: snapshot,
            response: tx,
        };
        self.journal.roundtrip(cmd, rx).await
    }
}
