use std::collections::{HashMap, HashSet};
use std::path::Path;

use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::error::CResult;
use crate::storage::ValueRecord;

const TABLE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS items (
    key BLOB PRIMARY KEY,
    flags INTEGER NOT NULL,
    exptime INTEGER NOT NULL,
    data BLOB NOT NULL
);";

const STATUS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS status (
    id INTEGER PRIMARY KEY,
    commit_id BLOB
);";

/// The relational checkpoint table: `items(key, flags, exptime, data)`
/// plus a single-row `status(id=1, commit_id)`. Backed by SQLite via
/// `rusqlite`, created lazily on first open.
pub struct Checkpoint {
    conn: Connection,
}

impl Checkpoint {
    pub fn open(path: &Path) -> CResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(&format!("{TABLE_SCHEMA}\n{STATUS_SCHEMA}"))?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> CResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(&format!("{TABLE_SCHEMA}\n{STATUS_SCHEMA}"))?;
        Ok(Self { conn })
    }

    /// Loads the entire `items` table and the `status.commit_id` row
    /// within a single read transaction.
    pub fn load(&mut self) -> CResult<(HashMap<Vec<u8>, ValueRecord>, Option<Uuid>)> {
        let tx = self.conn.transaction()?;
        let mut live = HashMap::new();
        {
            let mut stmt = tx.prepare("SELECT key, flags, exptime, data FROM items")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let key: Vec<u8> = row.get(0)?;
                let flags: i64 = row.get(1)?;
                let exptime: i64 = row.get(2)?;
                let data: Vec<u8> = row.get(3)?;
                live.insert(key, ValueRecord { flags: flags as u16, exptime: exptime as u32, data });
            }
        }
        let commit_id: Option<Vec<u8>> =
            tx.query_row("SELECT commit_id FROM status WHERE id = 1", [], |row| row.get(0)).ok();
        tx.commit()?;

        let commit_id = commit_id.and_then(|bytes| Uuid::from_slice(&bytes).ok());
        Ok((live, commit_id))
    }

    /// Applies the net effect of the dirty set to the on-disk table within
    /// a single write transaction: upserts before deletes before the
    /// status row. Callers are responsible for skipping this call entirely
    /// when the dirty set is empty.
    pub fn save(
        &mut self,
        live: &HashMap<Vec<u8>, ValueRecord>,
        pending_upsert: &HashSet<Vec<u8>>,
        pending_delete: &HashSet<Vec<u8>>,
        last_commit_id: Uuid,
    ) -> CResult<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO items (key, flags, exptime, data) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for key in pending_upsert {
                let item = &live[key];
                stmt.execute(params![key, item.flags as i64, item.exptime as i64, item.data])?;
            }
        }
        {
            let mut stmt = tx.prepare("DELETE FROM items WHERE key = ?1")?;
            for key in pending_delete {
                stmt.execute(params![key])?;
            }
        }
        tx.execute(
            "INSERT OR REPLACE INTO status (id, commit_id) VALUES (1, ?1)",
            params![last_commit_id.as_bytes().to_vec()],
        )?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_round_trips() {
        let mut cp = Checkpoint::open_in_memory().unwrap();
        let mut live = HashMap::new();
        live.insert(b"foo".to_vec(), ValueRecord { flags: 1, exptime: 2, data: b"bar".to_vec() });
        let upsert: HashSet<Vec<u8>> = [b"foo".to_vec()].into_iter().collect();
        let commit_id = Uuid::new_v4();
        cp.save(&live, &upsert, &HashSet::new(), commit_id).unwrap();

        let (loaded, loaded_commit) = cp.load().unwrap();
        assert_eq!(loaded, live);
        assert_eq!(loaded_commit, Some(commit_id));
    }

    #[test]
    fn delete_removes_row() {
        let mut cp = Checkpoint::open_in_memory().unwrap();
        let mut live = HashMap::new();
        live.insert(b"foo".to_vec(), ValueRecord { flags: 0, exptime: 0, data: vec![] });
        let upsert: HashSet<Vec<u8>> = [b"foo".to_vec()].into_iter().collect();
        cp.save(&live, &upsert, &HashSet::new(), Uuid::new_v4()).unwrap();

        live.remove(&b"foo".to_vec());
        let delete: HashSet<Vec<u8>> = [b"foo".to_vec()].into_iter().collect();
        cp.save(&live, &HashSet::new(), &delete, Uuid::new_v4()).unwrap();

        let (loaded, _) = cp.load().unwrap();
        assert!(loaded.is_empty());
    }
}
