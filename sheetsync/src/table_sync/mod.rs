//! Drop-and-reload synchronisation of inferred sheets into SQLite tables.

use crate::error::{Result, SheetSyncError};
use crate::progress::ProgressSink;
use crate::schema::SheetSchema;
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Anything that can run a single SQL statement.
pub trait StatementExecutor {
    fn execute_statement(&mut self, sql: &str) -> Result<()>;
}

/// Trailing statements after the first are rejected, not run.
impl StatementExecutor for Connection {
    fn execute_statement(&mut self, sql: &str) -> Result<()> {
        self.execute(sql, [])?;
        Ok(())
    }
}

/// Outcome of one table sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub table_name: String,
    /// The first CREATE failed and the table was dropped and created again.
    pub recreated: bool,
    pub rows_inserted: usize,
}

/// Create (or recreate) `table_name` and reload it with `insert_literals`.
///
/// A failing CREATE is answered with one DROP followed by a second CREATE;
/// existing rows are never carried over. The table is cleared after creation
/// and each literal is inserted in order. An insert failure is returned
/// as-is and leaves the rows inserted so far in place.
pub fn sync_table(
    executor: &mut dyn StatementExecutor,
    table_name: &str,
    ddl: &str,
    insert_literals: &[String],
    progress: &dyn ProgressSink,
) -> Result<SyncReport> {
    let create = format!("CREATE TABLE {table_name} ({ddl})");
    let recreated = match executor.execute_statement(&create) {
        Ok(()) => false,
        Err(e) => {
            log::debug!("CREATE TABLE {table_name} failed ({e}), recreating");
            executor.execute_statement(&format!("DROP TABLE {table_name}"))?;
            executor.execute_statement(&create)?;
            true
        }
    };

    executor.execute_statement(&format!("DELETE FROM {table_name}"))?;

    let total = insert_literals.len();
    for (i, literal) in insert_literals.iter().enumerate() {
        executor.execute_statement(&format!("INSERT INTO {table_name} VALUES {literal}"))?;
        progress.on_progress(i + 1, total);
    }

    Ok(SyncReport {
        table_name: table_name.to_string(),
        recreated,
        rows_inserted: total,
    })
}

/// A SQLite store file holding the tables of one source file.
pub struct TableStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl TableStore {
    /// Open or create the store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(TableStore {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open `{dir}/{file_stem}.db`, creating `dir` if needed.
    pub fn open_in_dir(dir: &Path, file_stem: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Self::open(&dir.join(format!("{file_stem}.db")))
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(TableStore { conn, path: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn sync_sheet(
        &mut self,
        sheet: &SheetSchema,
        progress: &dyn ProgressSink,
    ) -> Result<SyncReport> {
        sync_table(
            &mut self.conn,
            &sheet.table_name,
            &sheet.ddl,
            &sheet.insert_literals,
            progress,
        )
    }

    /// Number of rows currently in `table_name`.
    pub fn count_rows(&self, table_name: &str) -> Result<i64> {
        let count = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {table_name}"),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// `(name, declared type)` of every column of `table_name`.
    pub fn table_columns(&self, table_name: &str) -> Result<Vec<(String, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")?;
        let rows = stmt.query_map([table_name], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut columns = Vec::new();
        for row in rows {
            columns.push(row?);
        }
        if columns.is_empty() {
            return Err(SheetSyncError::Other(format!("No such table: {table_name}")));
        }
        Ok(columns)
    }

    /// Every row of `table_name`, each column rendered as text.
    pub fn dump_rows(&self, table_name: &str) -> Result<Vec<Vec<String>>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT * FROM {table_name} ORDER BY rowid"))?;
        let width = stmt.column_count();
        let rows = stmt.query_map([], |row| {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                let value: rusqlite::types::Value = row.get(i)?;
                values.push(match value {
                    rusqlite::types::Value::Null => String::new(),
                    rusqlite::types::Value::Integer(i) => i.to_string(),
                    rusqlite::types::Value::Real(f) => f.to_string(),
                    rusqlite::types::Value::Text(s) => s,
                    rusqlite::types::Value::Blob(b) => format!("<{} bytes>", b.len()),
                });
            }
            Ok(values)
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::tests::RecordingSink;
    use crate::progress::NoProgress;
    use tempfile::TempDir;

    fn literals(rows: &[&str]) -> Vec<String> {
        rows.iter().map(|r| r.to_string()).collect()
    }

    /// Records statements and fails the ones matching a prefix.
    struct ScriptedExecutor {
        statements: Vec<String>,
        fail_prefixes: Vec<String>,
    }

    impl StatementExecutor for ScriptedExecutor {
        fn execute_statement(&mut self, sql: &str) -> Result<()> {
            self.statements.push(sql.to_string());
            if let Some(pos) = self.fail_prefixes.iter().position(|p| sql.starts_with(p.as_str())) {
                self.fail_prefixes.remove(pos);
                return Err(SheetSyncError::Other(format!("rejected: {sql}")));
            }
            Ok(())
        }
    }

    #[test]
    fn test_first_sync_creates_and_fills() {
        let mut store = TableStore::open_in_memory().unwrap();
        let report = sync_table(
            &mut store.conn,
            "Items",
            "Id INTEGER NOT NULL, Name TEXT NOT NULL",
            &literals(&["('1', 'Alice')", "('2', 'Bob')"]),
            &NoProgress,
        )
        .unwrap();

        assert!(!report.recreated);
        assert_eq!(report.rows_inserted, 2);
        assert_eq!(
            store.dump_rows("Items").unwrap(),
            vec![vec!["1", "Alice"], vec!["2", "Bob"]]
        );
    }

    #[test]
    fn test_second_sync_with_new_ddl_recreates_and_replaces_rows() {
        let mut store = TableStore::open_in_memory().unwrap();
        sync_table(
            &mut store.conn,
            "Items",
            "Id INTEGER NOT NULL, Name TEXT NOT NULL",
            &literals(&["('1', 'Alice')", "('2', 'Bob')"]),
            &NoProgress,
        )
        .unwrap();

        let report = sync_table(
            &mut store.conn,
            "Items",
            "Id INTEGER NOT NULL, Name TEXT NOT NULL, Weight REAL NOT NULL",
            &literals(&["('9', 'Zed', '1.5')"]),
            &NoProgress,
        )
        .unwrap();

        assert!(report.recreated);
        assert_eq!(
            store.table_columns("Items").unwrap(),
            vec![
                ("Id".to_string(), "INTEGER".to_string()),
                ("Name".to_string(), "TEXT".to_string()),
                ("Weight".to_string(), "REAL".to_string()),
            ]
        );
        assert_eq!(store.dump_rows("Items").unwrap(), vec![vec!["9", "Zed", "1.5"]]);
    }

    #[test]
    fn test_statement_order_on_recreate() {
        let mut exec = ScriptedExecutor {
            statements: Vec::new(),
            fail_prefixes: vec!["CREATE TABLE".to_string()],
        };
        sync_table(&mut exec, "T", "A TEXT NOT NULL", &literals(&["('x')"]), &NoProgress).unwrap();
        assert_eq!(
            exec.statements,
            vec![
                "CREATE TABLE T (A TEXT NOT NULL)",
                "DROP TABLE T",
                "CREATE TABLE T (A TEXT NOT NULL)",
                "DELETE FROM T",
                "INSERT INTO T VALUES ('x')",
            ]
        );
    }

    #[test]
    fn test_second_create_failure_is_returned() {
        let mut exec = ScriptedExecutor {
            statements: Vec::new(),
            fail_prefixes: vec!["CREATE TABLE".to_string(), "CREATE TABLE".to_string()],
        };
        let err = sync_table(&mut exec, "T", "A TEXT NOT NULL", &[], &NoProgress).unwrap_err();
        assert!(err.to_string().contains("rejected"));
        assert_eq!(exec.statements.len(), 3);
    }

    #[test]
    fn test_insert_failure_leaves_partial_table() {
        let mut store = TableStore::open_in_memory().unwrap();
        let err = sync_table(
            &mut store.conn,
            "People",
            "Id INTEGER NOT NULL, Name TEXT NOT NULL",
            &literals(&["('1', 'Alice')", "('2', 'O'Brien')", "('3', 'Carol')"]),
            &NoProgress,
        )
        .unwrap_err();

        assert!(matches!(err, SheetSyncError::Store(_)));
        assert_eq!(store.count_rows("People").unwrap(), 1);
    }

    #[test]
    fn test_literal_cannot_smuggle_a_second_statement() {
        let mut store = TableStore::open_in_memory().unwrap();
        store
            .conn
            .execute_statement("CREATE TABLE Keep (Id INTEGER NOT NULL)")
            .unwrap();

        let err = sync_table(
            &mut store.conn,
            "T",
            "A TEXT NOT NULL",
            &literals(&["('a'); DROP TABLE Keep; --')"]),
            &NoProgress,
        )
        .unwrap_err();

        assert!(matches!(err, SheetSyncError::Store(_)));
        assert_eq!(store.count_rows("Keep").unwrap(), 0);
        assert_eq!(store.count_rows("T").unwrap(), 0);
    }

    #[test]
    fn test_progress_is_reported_per_row() {
        let sink = RecordingSink::default();
        let mut store = TableStore::open_in_memory().unwrap();
        sync_table(
            &mut store.conn,
            "T",
            "A TEXT NOT NULL",
            &literals(&["('a')", "('b')"]),
            &sink,
        )
        .unwrap();
        assert_eq!(*sink.progress.lock().unwrap(), vec![(1, 2), (2, 2)]);
    }

    #[test]
    fn test_open_in_dir_creates_store_file() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("db");
        let mut store = TableStore::open_in_dir(&dir, "Items").unwrap();
        let sheet = SheetSchema {
            table_name: "Items".to_string(),
            columns: Vec::new(),
            ddl: "Id INTEGER NOT NULL".to_string(),
            insert_literals: literals(&["('1')"]),
        };
        store.sync_sheet(&sheet, &NoProgress).unwrap();

        assert_eq!(store.path(), Some(dir.join("Items.db").as_path()));
        drop(store);

        let reopened = TableStore::open(&dir.join("Items.db")).unwrap();
        assert_eq!(reopened.count_rows("Items").unwrap(), 1);
    }
}
