mod checkpoint;
mod commit_id;
mod commit_log;

use std::collections::{HashMap, HashSet};
use std::path::Path;

use uuid::Uuid;

use crate::command::Command;
use crate::error::{CResult, Error};

use checkpoint::Checkpoint;
use commit_id::CommitIdGenerator;
use commit_log::CommitLog;

/// A stored value: `flags` and `exptime` are carried verbatim and never
/// interpreted by this crate (key expiration enforcement is out of scope).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueRecord {
    pub flags: u16,
    pub exptime: u32,
    pub data: Vec<u8>,
}

/// The live map, its pending-change tracker, and the two persistence sinks
/// (commit log, checkpoint). Owns both sinks exclusively: nothing else
/// writes the commit log file or the checkpoint database.
pub struct Storage {
    live: HashMap<Vec<u8>, ValueRecord>,
    pending_insert: HashSet<Vec<u8>>,
    pending_update: HashSet<Vec<u8>>,
    pending_delete: HashSet<Vec<u8>>,
    last_commit_id: Option<Uuid>,
    commit_log: CommitLog,
    checkpoint: Checkpoint,
    commit_ids: CommitIdGenerator,
}

impl Storage {
    /// Opens (or creates) the checkpoint database and commit log at the
    /// given paths, then runs the two-phase recovery: load the
    /// checkpoint, then replay the commit log on top of it via `visit`
    /// directly, never through `apply` (replay must not re-append to the
    /// log it is reading from).
    pub fn open(checkpoint_path: &Path, commit_log_path: &Path) -> CResult<Self> {
        let mut checkpoint = Checkpoint::open(checkpoint_path)?;
        let (live, last_commit_id) = checkpoint.load()?;

        let mut commit_log = CommitLog::open(commit_log_path)?;
        let records = commit_log.replay()?;

        let mut store = Self {
            live,
            pending_insert: HashSet::new(),
            pending_update: HashSet::new(),
            pending_delete: HashSet::new(),
            last_commit_id,
            commit_log,
            checkpoint,
            commit_ids: CommitIdGenerator::new(),
        };

        for (commit_id, command) in records {
            command.visit(&mut store)?;
            store.last_commit_id = Some(commit_id);
        }

        metrics::gauge!("kv_live_keys").set(store.live.len() as f64);
        metrics::gauge!("kv_bytes_live").set(store.live_bytes() as f64);
        Ok(store)
    }

    pub fn get(&self, key: &[u8]) -> CResult<ValueRecord> {
        self.live.get(key).cloned().ok_or(Error::MissingKey)
    }

    /// Installs `value` for `key` and updates the pending sets per the
    /// transition table below. Never fails.
    ///
    /// | precondition | effect |
    /// |---|---|
    /// | key ∉ live, key ∉ D | add to I |
    /// | key ∉ live, key ∈ D | remove from D, add to U |
    /// | key ∈ live, key ∈ I | leave I unchanged |
    /// | key ∈ live, key ∉ I | add to U |
    pub fn set(&mut self, key: Vec<u8>, value: ValueRecord) {
        let was_live = self.live.contains_key(&key);
        if !was_live {
            if self.pending_delete.remove(&key) {
                self.pending_update.insert(key.clone());
            } else {
                self.pending_insert.insert(key.clone());
            }
        } else if !self.pending_insert.contains(&key) {
            self.pending_update.insert(key.clone());
        }
        // key ∈ live, key ∈ I: I is left unchanged, matching the table.

        self.live.insert(key, value);
        metrics::gauge!("kv_live_keys").set(self.live.len() as f64);
        metrics::gauge!("kv_bytes_live").set(self.live_bytes() as f64);
    }

    /// Removes `key` and updates the pending sets per the transition
    /// table below, or signals `MissingKey` if the key is absent.
    ///
    /// | precondition | effect |
    /// |---|---|
    /// | key ∈ live, key ∈ I | remove from I (the insert never reached disk) |
    /// | key ∈ live, key ∉ I | add to D, remove from U if present |
    /// | key ∉ live | signal `MissingKey`, no changes |
    pub fn delete(&mut self, key: &[u8]) -> CResult<()> {
        if !self.live.contains_key(key) {
            return Err(Error::MissingKey);
        }
        if !self.pending_insert.remove(key) {
            self.pending_update.remove(key);
            self.pending_delete.insert(key.to_vec());
        }
        self.live.remove(key);
        metrics::gauge!("kv_live_keys").set(self.live.len() as f64);
        metrics::gauge!("kv_bytes_live").set(self.live_bytes() as f64);
        Ok(())
    }

    /// Total byte size of every value currently live, recomputed on each
    /// `set`/`delete` rather than tracked as a running delta so it can
    /// never drift from `self.live`.
    fn live_bytes(&self) -> usize {
        self.live.values().map(|v| v.data.len()).sum()
    }

    /// The single entry point used by the protocol dispatcher and by
    /// anything else issuing live mutations (never by recovery, which
    /// calls `visit` directly to avoid re-appending to the log it is
    /// replaying). Executes the command's effect, and for commands that
    /// carry an opcode, durably records it: mints a fresh commit id,
    /// appends `commit_id | opcode | payload` to the commit log, and
    /// best-effort fsyncs before advancing `last_commit_id`.
    pub fn apply(&mut self, command: Command) -> CResult<Option<ValueRecord>> {
        let timer = std::time::Instant::now();
        let result = command.visit(self);

        if result.is_ok() {
            if let Some(_opcode) = command.opcode() {
                let commit_id = self.commit_ids.next();
                match self.commit_log.append(commit_id, &command) {
                    Ok(()) => self.last_commit_id = Some(commit_id),
                    Err(err) => {
                        metrics::counter!("kv_commit_errors").increment(1);
                        return Err(err);
                    }
                }
                metrics::counter!("kv_mutations_committed").increment(1);
            }
        }

        metrics::histogram!("kv_commit_duration_seconds").record(timer.elapsed().as_secs_f64());
        result
    }

    /// Commits the dirty set into the checkpoint and truncates the
    /// commit log, in that order: a crash between the two only causes
    /// harmless re-replay of already-checkpointed records. A no-op when
    /// nothing is dirty.
    pub fn flush(&mut self) -> CResult<()> {
        if self.pending_insert.is_empty() && self.pending_update.is_empty() && self.pending_delete.is_empty() {
            return Ok(());
        }
        let Some(last_commit_id) = self.last_commit_id else {
            return Ok(());
        };

        let timer = std::time::Instant::now();
        let pending_upsert: HashSet<Vec<u8>> =
            self.pending_insert.iter().chain(self.pending_update.iter()).cloned().collect();

        let result = self.checkpoint.save(&self.live, &pending_upsert, &self.pending_delete, last_commit_id);
        match result {
            Ok(()) => {
                metrics::counter!("kv_checkpoint_upserts").increment(pending_upsert.len() as u64);
                metrics::counter!("kv_checkpoint_deletes").increment(self.pending_delete.len() as u64);
                self.pending_insert.clear();
                self.pending_update.clear();
                self.pending_delete.clear();
                self.commit_log.truncate()?;
                metrics::histogram!("kv_flush_duration_seconds").record(timer.elapsed().as_secs_f64());
                Ok(())
            }
            Err(err) => {
                metrics::counter!("kv_flush_errors").increment(1);
                Err(err)
            }
        }
    }

    pub fn dump_live(&self) -> Vec<(&Vec<u8>, &ValueRecord)> {
        self.live.iter().collect()
    }

    pub fn dump_commit_log(&mut self) -> CResult<Vec<(Uuid, Command)>> {
        self.commit_log.replay()
    }

    pub fn last_commit_id(&self) -> Option<Uuid> {
        self.last_commit_id
    }

    #[cfg(test)]
    fn pending_sets(&self) -> (&HashSet<Vec<u8>>, &HashSet<Vec<u8>>, &HashSet<Vec<u8>>) {
        (&self.pending_insert, &self.pending_update, &self.pending_delete)
    }
}
