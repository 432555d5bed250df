 use std::path::Path;
 use std::sync::Arc;
 use std::time::Duration;

 use parking_lot::Mutex;
 use rusqlite::{params, Connection, TransactionBehavior};
 use thiserror::Error;

 use crate::{
     ledger::{LedgerEntry, COLUMNS, LEDGER_CAPACITY},
     normalizer::Metal,
 };

 #[derive(Debug, Error)]
 pub enum StorageError {
     #[error("history path is empty")]
     EmptyPath,

     #[error("history path {0} is not a file (in-memory databases do not persist)")]
     NotAFile(String),

     #[error("create history dir for {path}: {source}")]
     CreateDir {
         path: String,
         #[source]
         source: std::io::Error,
     },

     #[error("sqlite error: {0}")]
     Sqlite(#[from] rusqlite::Error),
 }

 pub type StorageResult<T> = std::result::Result<T, StorageError>;

 /// SQLite-backed history of daily comparisons, newest first, capped in size.
 #[derive(Clone)]
 pub struct LedgerStore {
     path: String,
     capacity: usize,
     // Serialises read-modify-write cycles within this process.
     write_lock: Arc<Mutex<()>>,
 }

 impl LedgerStore {
     pub fn with_capacity(path: &str, capacity: usize) -> StorageResult<Self> {
         let path = path.trim();
         if path.is_empty() {
             return Err(StorageError::EmptyPath);
         }
         if path == ":memory:" || path.contains("mode=memory") {
             return Err(StorageError::NotAFile(path.to_string()));
         }
         if !path.starts_with("file:") {
             if let Some(parent) = Path::new(path).parent() {
                 std::fs::create_dir_all(parent).map_err(|source| StorageError::CreateDir {
                     path: path.to_string(),
                     source,
                 })?;
             }
         }

         // rusqlite::Connection is not Send/Sync, so only the path is kept and
         // each operation opens a short-lived connection.
         Ok(Self {
             path: path.to_string(),
             capacity: capacity.clamp(1, LEDGER_CAPACITY),
             write_lock: Arc::new(Mutex::new(())),
         })
     }

     pub fn path(&self) -> &str {
         &self.path
     }

     pub fn capacity(&self) -> usize {
         self.capacity
     }

     fn open_conn(&self) -> StorageResult<Connection> {
         let conn = Connection::open(&self.path)?;
         conn.busy_timeout(Duration::from_secs(5))?;
         conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
         Ok(conn)
     }

     pub fn init_db(&self) -> StorageResult<()> {
         let conn = self.open_conn()?;
         conn.execute_batch(
             r#"
 CREATE TABLE IF NOT EXISTS ledger (
   rank INTEGER PRIMARY KEY,
   date TEXT NOT NULL UNIQUE,
   time TEXT NOT NULL,
   fx_rate INTEGER NOT NULL,
   ose_gold_ref INTEGER NOT NULL,
   gold_spread INTEGER NOT NULL,
   ose_plat_ref INTEGER NOT NULL,
   plat_spread INTEGER NOT NULL
 );
 "#,
         )?;
         Ok(())
     }

     /// Write `entry`, replacing any row for the same date, keep the newest
     /// `capacity` rows and return the resulting table.
     ///
     /// The whole table is rewritten inside one transaction, so readers see
     /// either the old table or the new one.
     pub fn record_entry(&self, entry: &LedgerEntry) -> StorageResult<Vec<LedgerEntry>> {
         let _guard = self.write_lock.lock();
         let mut conn = self.open_conn()?;
         let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

         let mut rows = load_rows(&tx)?;
         rows.retain(|r| r.date != entry.date);
         rows.insert(0, entry.clone());
         // Stable: equal dates cannot occur after the retain above.
         rows.sort_by(|a, b| b.date.cmp(&a.date));
         rows.truncate(self.capacity);

         tx.execute("DELETE FROM ledger", [])?;
         {
             let mut stmt = tx.prepare(&format!(
                 "INSERT INTO ledger(rank, {}) VALUES(?,?,?,?,?,?,?,?)",
                 COLUMNS.join(", ")
             ))?;
             for (i, r) in rows.iter().enumerate() {
                 stmt.execute(params![
                     i as i64 + 1,
                     r.date,
                     r.time,
                     r.fx_rate,
                     r.ose_gold_ref,
                     r.gold_spread,
                     r.ose_plat_ref,
                     r.plat_spread
                 ])?;
             }
         }
         tx.commit()?;

         log::info!(
             "ledger.record date={} time={} rows={} path={}",
             entry.date,
             entry.time,
             rows.len(),
             self.path
         );
         Ok(rows)
     }

     /// All rows, most recent first.
     pub fn history(&self) -> StorageResult<Vec<LedgerEntry>> {
         let conn = self.open_conn()?;
         load_rows(&conn)
     }

     /// Spread of the newest row for `metal`, zero for an empty table.
     pub fn latest_spread(&self, metal: Metal) -> StorageResult<i64> {
         Ok(self
             .history()?
             .first()
             .map(|r| r.spread(metal))
             .unwrap_or(0))
     }
 }

 fn load_rows(conn: &Connection) -> StorageResult<Vec<LedgerEntry>> {
     let mut stmt = conn.prepare(&format!(
         "SELECT {} FROM ledger ORDER BY rank ASC",
         COLUMNS.join(", ")
     ))?;
     let mut rows = stmt.query([])?;
     let mut out = vec![];
     while let Some(r) = rows.next()? {
         out.push(LedgerEntry {
             date: r.get(0)?,
             time: r.get(1)?,
             fx_rate: r.get(2)?,
             ose_gold_ref: r.get(3)?,
             gold_spread: r.get(4)?,
             ose_plat_ref: r.get(5)?,
             plat_spread: r.get(6)?,
         });
     }
     Ok(out)
 }
