//! Transaction manager
//!
//! Drives the five-phase execution protocol from `SPEC_FULL.md` §4.5: lock
//! acquisition, shadow creation, in-order execution, commit-or-rollback,
//! lock release. Strict two-phase locking means every lock a transaction
//! will need is acquired before any operation in it runs, and none are
//! released until the transaction ends.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use log::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::lock::{LockKind, LockManager};
use crate::operation::{OpResult, Operation};
use crate::shadow::ShadowSet;
use crate::storage::StorageEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

/// One transaction's bookkeeping: id, state, and the shadow set backing its
/// isolated view of every table it has touched.
pub struct Transaction {
    pub id: String,
    state: TransactionState,
    shadows: ShadowSet,
    locked_resources: Vec<String>,
}

impl Transaction {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }
}

/// Per-operation lock requirement: `(resource_id, kind)`. Index DDL and
/// table DDL lock the table itself (indexes are metadata on the table,
/// `SPEC_FULL.md` §9 Q4 — there is no separate index resource to lock).
fn determine_lock_kind(op: &Operation) -> Option<(String, LockKind)> {
    let table = op.table_name()?;
    let kind = if op.is_write() {
        LockKind::Exclusive
    } else {
        LockKind::Shared
    };
    Some((table.to_string(), kind))
}

/// The union of per-change resource locks a whole batch of operations
/// needs, merging to `Exclusive` for any resource touched by a write
/// (`SPEC_FULL.md` §4.5 phase 1: "Collect the union of per-change resource
/// locks"). Acquired before any operation in the batch runs.
fn collect_batch_locks(ops: &[Operation]) -> Vec<(String, LockKind)> {
    let mut merged: std::collections::HashMap<String, LockKind> = std::collections::HashMap::new();
    for op in ops {
        if let Some((resource, kind)) = determine_lock_kind(op) {
            merged
                .entry(resource)
                .and_modify(|existing| {
                    if kind == LockKind::Exclusive {
                        *existing = LockKind::Exclusive;
                    }
                })
                .or_insert(kind);
        }
    }
    merged.into_iter().collect()
}

/// Coordinates the lock manager, shadow sets, and storage engine across the
/// lifetime of every transaction. `Transaction`/`Commit`/`Rollback`
/// operations are handled here directly; everything else is routed through
/// `execute`.
pub struct TransactionManager {
    storage: StorageEngine,
    locks: LockManager,
    lock_timeout: Duration,
    active: Mutex<std::collections::HashMap<String, Transaction>>,
}

impl TransactionManager {
    pub fn new(storage: StorageEngine, lock_timeout: Duration) -> Self {
        Self::with_poll_interval(storage, lock_timeout, crate::lock::POLL_INTERVAL)
    }

    /// Build a manager with a non-default lock poll cadence, per
    /// `Config::lock_poll_interval`.
    pub fn with_poll_interval(
        storage: StorageEngine,
        lock_timeout: Duration,
        lock_poll_interval: Duration,
    ) -> Self {
        Self {
            storage,
            locks: LockManager::with_poll_interval(lock_poll_interval),
            lock_timeout,
            active: Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn storage(&self) -> &StorageEngine {
        &self.storage
    }

    /// Begin a new transaction and return its id.
    pub fn begin(&self) -> String {
        let id = Uuid::new_v4().to_string();
        let transaction = Transaction {
            id: id.clone(),
            state: TransactionState::Active,
            shadows: ShadowSet::new(self.storage.data_dir().to_path_buf(), id.clone()),
            locked_resources: Vec::new(),
        };
        self.active.lock().unwrap().insert(id.clone(), transaction);
        info!("transaction {} started", id);
        id
    }

    /// Run a single operation outside any explicit transaction: an
    /// implicit, immediately-committed transaction wrapping exactly one
    /// operation, going straight against the original table files.
    pub fn execute_auto_commit(&self, op: Operation) -> OpResult {
        let id = self.begin();
        let result = self.execute(&id, op);
        if result.is_err() {
            let _ = self.rollback(&id);
        } else {
            let _ = self.commit(&id);
        }
        result
    }

    /// Phase 1-3: acquire the lock this operation needs (if any), shadow
    /// the table it targets, then run it against the shadow.
    pub fn execute(&self, transaction_id: &str, op: Operation) -> OpResult {
        match op {
            Operation::Transaction => return OpResult::ok(),
            Operation::Commit => {
                return match self.commit(transaction_id) {
                    Ok(()) => OpResult::ok(),
                    Err(e) => OpResult::with_error(e),
                };
            }
            Operation::Rollback => {
                return match self.rollback(transaction_id) {
                    Ok(()) => OpResult::ok(),
                    Err(e) => OpResult::with_error(e),
                };
            }
            _ => {}
        }

        if let Err(e) = self.ensure_active(transaction_id) {
            return OpResult::with_error(e);
        }

        let path = match determine_lock_kind(&op) {
            Some((resource, kind)) => {
                if let Err(e) = self.acquire(transaction_id, &resource, kind) {
                    // A timed-out lock acquisition aborts the whole
                    // transaction, releasing whatever locks it already
                    // held (SPEC_FULL.md §5).
                    let _ = self.rollback(transaction_id);
                    return OpResult::with_error(e);
                }
                match self.shadow_path(transaction_id, &resource) {
                    Ok(p) => Some(p),
                    Err(e) => {
                        // Phase 2 failure: roll back rather than leak the
                        // lock just acquired in phase 1 (SPEC_FULL.md §4.5).
                        let _ = self.rollback(transaction_id);
                        return OpResult::with_error(e);
                    }
                }
            }
            None => None,
        };

        let result = self.dispatch(path.as_deref(), op);
        if result.is_err() {
            // SPEC_FULL.md §4.5 phase 3: any operation whose execution
            // fails marks the whole transaction for rollback, not just the
            // one statement — a caller driving statements one at a time
            // (the REPL's session transaction) must not be able to COMMIT
            // past a failed operation.
            let _ = self.rollback(transaction_id);
        }
        result
    }

    fn ensure_active(&self, transaction_id: &str) -> Result<()> {
        let active = self.active.lock().unwrap();
        match active.get(transaction_id) {
            Some(t) if t.is_active() => Ok(()),
            _ => Err(Error::TransactionNotActive),
        }
    }

    fn acquire(&self, transaction_id: &str, resource: &str, kind: LockKind) -> Result<()> {
        self.locks
            .request_and_wait(resource, transaction_id, kind, self.lock_timeout)?;
        let mut active = self.active.lock().unwrap();
        if let Some(t) = active.get_mut(transaction_id) {
            t.locked_resources.push(resource.to_string());
        }
        Ok(())
    }

    fn shadow_path(&self, transaction_id: &str, table: &str) -> Result<PathBuf> {
        let mut active = self.active.lock().unwrap();
        let transaction = active
            .get_mut(transaction_id)
            .ok_or(Error::TransactionNotActive)?;
        transaction.shadows.create_shadow_for_table(table)
    }

    /// Phase 3 only: dispatch `op` against whatever shadow this transaction
    /// already created for its table. Unlike `execute`, this never acquires
    /// a lock or creates a shadow itself — the caller (`run_transaction`)
    /// must have already run phases 1-2 for every operation in its batch.
    fn dispatch_in_transaction(&self, transaction_id: &str, op: Operation) -> OpResult {
        if let Err(e) = self.ensure_active(transaction_id) {
            return OpResult::with_error(e);
        }

        let path = match op.table_name() {
            Some(table) => {
                let active = self.active.lock().unwrap();
                match active.get(transaction_id) {
                    Some(t) => Some(t.shadows.resolve(table)),
                    None => return OpResult::with_error(Error::TransactionNotActive),
                }
            }
            None => None,
        };

        self.dispatch(path.as_deref(), op)
    }

    fn dispatch(&self, path: Option<&std::path::Path>, op: Operation) -> OpResult {
        let storage = &self.storage;
        let result = (|| -> Result<OpResult> {
            match op {
                Operation::CreateTable { metadata } => {
                    let path = path.expect("CreateTable always resolves a table resource");
                    storage.create_table(path, metadata.clone())?;
                    Ok(OpResult::with_metadata(metadata))
                }
                Operation::DropTable { .. } => {
                    let path = path.expect("DropTable always resolves a table resource");
                    storage.drop_table(path)?;
                    Ok(OpResult::ok())
                }
                Operation::Read {
                    fields, predicate, ..
                } => {
                    let path = path.expect("Read always resolves a table resource");
                    let (cols, rows) = storage.read_rows(path, &fields, predicate.as_ref())?;
                    Ok(OpResult::with_rows(cols, rows))
                }
                Operation::Insert { rows, .. } => {
                    let path = path.expect("Insert always resolves a table resource");
                    let count = storage.write_rows(path, rows)?;
                    Ok(OpResult::with_affected(count))
                }
                Operation::Delete { predicate, .. } => {
                    let path = path.expect("Delete always resolves a table resource");
                    let count = storage.delete_rows(path, predicate.as_ref())?;
                    Ok(OpResult::with_affected(count))
                }
                Operation::Update {
                    assignments,
                    predicate,
                    ..
                } => {
                    let path = path.expect("Update always resolves a table resource");
                    let count = storage.update_rows(path, &assignments, predicate.as_ref())?;
                    Ok(OpResult::with_affected(count))
                }
                Operation::Alter { op: alter_op, .. } => {
                    let path = path.expect("Alter always resolves a table resource");
                    let metadata = storage.alter_table(path, alter_op)?;
                    Ok(OpResult::with_metadata(metadata))
                }
                Operation::CreateIndex { index, .. } => {
                    let path = path.expect("CreateIndex always resolves a table resource");
                    let metadata = storage.create_index(path, index)?;
                    Ok(OpResult::with_metadata(metadata))
                }
                Operation::DropIndex { index_name, .. } => {
                    let path = path.expect("DropIndex always resolves a table resource");
                    let metadata = storage.drop_index(path, &index_name)?;
                    Ok(OpResult::with_metadata(metadata))
                }
                Operation::ListIndexes { .. } => {
                    let path = path.expect("ListIndexes always resolves a table resource");
                    let indexes = storage.list_indexes(path)?;
                    Ok(OpResult::with_indexes(indexes))
                }
                Operation::CreateProcedure { .. }
                | Operation::AlterProcedure { .. }
                | Operation::ExecuteProcedure { .. } => Err(Error::InvalidData(
                    "stored procedures are not executed by this engine".into(),
                )),
                Operation::Transaction | Operation::Commit | Operation::Rollback => {
                    unreachable!("handled in execute() before dispatch")
                }
                Operation::Unknown => Err(Error::Syntax("unrecognized operation".into())),
            }
        })();

        match result {
            Ok(r) => r,
            Err(e) => OpResult::with_error(e),
        }
    }

    /// Phase 4-5: rename every shadow over its original, then release
    /// every lock the transaction held.
    pub fn commit(&self, transaction_id: &str) -> Result<()> {
        let commit_result = {
            let mut active = self.active.lock().unwrap();
            let transaction = active
                .get_mut(transaction_id)
                .ok_or(Error::TransactionNotActive)?;
            if !transaction.is_active() {
                return Err(Error::TransactionNotActive);
            }
            let result = transaction.shadows.commit_shadows();
            transaction.state = if result.is_ok() {
                TransactionState::Committed
            } else {
                // SPEC_FULL.md §4.3/§4.5: any shadow-commit error marks the
                // transaction RolledBack, not left dangling in Active.
                TransactionState::RolledBack
            };
            result
        };

        self.locks.release_all(transaction_id);
        self.active.lock().unwrap().remove(transaction_id);

        match commit_result {
            Ok(()) => {
                info!("transaction {} committed", transaction_id);
                Ok(())
            }
            Err(e) => {
                warn!("transaction {} failed to commit cleanly: {}", transaction_id, e);
                Err(e)
            }
        }
    }

    /// Phase 4-5 on the failure path: discard every shadow, then release
    /// every lock the transaction held.
    pub fn rollback(&self, transaction_id: &str) -> Result<()> {
        {
            let mut active = self.active.lock().unwrap();
            let transaction = active
                .get_mut(transaction_id)
                .ok_or(Error::TransactionNotActive)?;
            transaction.shadows.cleanup_shadows();
            transaction.state = TransactionState::RolledBack;
        }

        self.locks.release_all(transaction_id);
        self.active.lock().unwrap().remove(transaction_id);
        info!("transaction {} rolled back", transaction_id);
        Ok(())
    }

    /// Run every operation in `ops` against one new transaction, stopping
    /// at the first failure and rolling back; commits only if every
    /// operation in the batch succeeded. Runs the full five-phase protocol
    /// from `SPEC_FULL.md` §4.5: phases 1-2 acquire the union of every
    /// resource lock the batch needs and shadow every table it names
    /// *before* any operation runs, phase 3 executes in declared order,
    /// and phases 4-5 commit-or-rollback then release locks.
    pub fn run_transaction(&self, ops: Vec<Operation>) -> Vec<OpResult> {
        let id = self.begin();

        // Phase 1: lock acquisition, the union of every resource the whole
        // batch touches, acquired before any operation in it runs.
        let resource_locks = collect_batch_locks(&ops);
        for (resource, kind) in &resource_locks {
            if let Err(e) = self.acquire(&id, resource, *kind) {
                let _ = self.rollback(&id);
                return vec![OpResult::with_error(e)];
            }
        }

        // Phase 2: shadow creation, for every distinct table named by any
        // change, before executing any of them.
        for (resource, _) in &resource_locks {
            if let Err(e) = self.shadow_path(&id, resource) {
                let _ = self.rollback(&id);
                return vec![OpResult::with_error(e)];
            }
        }

        // Phase 3: execute in declared order.
        let mut results = Vec::with_capacity(ops.len());
        let mut failed = false;
        for op in ops {
            if failed {
                break;
            }
            let result = self.dispatch_in_transaction(&id, op);
            if result.is_err() {
                failed = true;
            }
            results.push(result);
        }

        // Phases 4-5: commit or rollback, then release every lock acquired
        // in phase 1 (handled inside `commit`/`rollback`).
        if failed {
            let _ = self.rollback(&id);
        } else if let Err(e) = self.commit(&id) {
            results.push(OpResult::with_error(e));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{CompareOp, Predicate};
    use crate::types::{Column, DataType, Row, TableMetadata, Value};
    use tempfile::tempdir;

    fn manager() -> (tempfile::TempDir, TransactionManager) {
        let dir = tempdir().unwrap();
        let storage = StorageEngine::new(dir.path().to_path_buf()).unwrap();
        let manager = TransactionManager::new(storage, Duration::from_millis(200));
        (dir, manager)
    }

    fn create_table_op() -> Operation {
        Operation::CreateTable {
            metadata: TableMetadata::new(
                "accounts",
                vec![
                    Column::new("id", DataType::Integer64).not_null(),
                    Column::new("balance", DataType::Integer64),
                ],
            ),
        }
    }

    #[test]
    fn auto_commit_create_then_insert_then_read() {
        let (_dir, manager) = manager();
        let create = manager.execute_auto_commit(create_table_op());
        assert!(!create.is_err());

        let insert = manager.execute_auto_commit(Operation::Insert {
            table: "accounts".into(),
            rows: vec![Row::new(vec![Value::Integer(1), Value::Integer(100)])],
        });
        assert!(!insert.is_err());

        let read = manager.execute_auto_commit(Operation::Read {
            table: "accounts".into(),
            fields: vec![],
            predicate: None,
        });
        assert_eq!(read.rows.unwrap().len(), 1);
    }

    #[test]
    fn rollback_discards_writes_made_inside_the_transaction() {
        let (_dir, manager) = manager();
        manager.execute_auto_commit(create_table_op());

        let txid = manager.begin();
        let insert = manager.execute(
            &txid,
            Operation::Insert {
                table: "accounts".into(),
                rows: vec![Row::new(vec![Value::Integer(1), Value::Integer(100)])],
            },
        );
        assert!(!insert.is_err());
        manager.rollback(&txid).unwrap();

        let read = manager.execute_auto_commit(Operation::Read {
            table: "accounts".into(),
            fields: vec![],
            predicate: None,
        });
        assert!(read.rows.unwrap().is_empty());
    }

    #[test]
    fn commit_makes_writes_visible_to_later_auto_commit_reads() {
        let (_dir, manager) = manager();
        manager.execute_auto_commit(create_table_op());

        let txid = manager.begin();
        manager.execute(
            &txid,
            Operation::Insert {
                table: "accounts".into(),
                rows: vec![Row::new(vec![Value::Integer(1), Value::Integer(100)])],
            },
        );
        manager.commit(&txid).unwrap();

        let read = manager.execute_auto_commit(Operation::Read {
            table: "accounts".into(),
            fields: vec![],
            predicate: None,
        });
        assert_eq!(read.rows.unwrap().len(), 1);
    }

    #[test]
    fn operating_on_a_committed_transaction_id_fails_not_active() {
        let (_dir, manager) = manager();
        let txid = manager.begin();
        manager.commit(&txid).unwrap();

        let result = manager.execute(
            &txid,
            Operation::Read {
                table: "accounts".into(),
                fields: vec![],
                predicate: None,
            },
        );
        assert!(matches!(result.error, Some(Error::TransactionNotActive)));
    }

    #[test]
    fn concurrent_writers_on_the_same_table_serialize() {
        use std::sync::Arc;
        use std::thread;

        let dir = tempdir().unwrap();
        let storage = StorageEngine::new(dir.path().to_path_buf()).unwrap();
        let manager = Arc::new(TransactionManager::new(storage, Duration::from_secs(2)));
        manager.execute_auto_commit(create_table_op());

        let mut handles = Vec::new();
        for i in 0..8 {
            let manager = Arc::clone(&manager);
            handles.push(thread::spawn(move || {
                manager.execute_auto_commit(Operation::Insert {
                    table: "accounts".into(),
                    rows: vec![Row::new(vec![Value::Integer(i), Value::Integer(0)])],
                })
            }));
        }
        for h in handles {
            assert!(!h.join().unwrap().is_err());
        }

        let read = manager.execute_auto_commit(Operation::Read {
            table: "accounts".into(),
            fields: vec![],
            predicate: None,
        });
        assert_eq!(read.rows.unwrap().len(), 8);
    }

    #[test]
    fn run_transaction_rolls_back_entire_batch_on_mid_batch_failure() {
        let (_dir, manager) = manager();
        manager.execute_auto_commit(create_table_op());

        let results = manager.run_transaction(vec![
            Operation::Insert {
                table: "accounts".into(),
                rows: vec![Row::new(vec![Value::Integer(1), Value::Integer(0)])],
            },
            Operation::Insert {
                table: "accounts".into(),
                // wrong arity triggers a storage-layer failure
                rows: vec![Row::new(vec![Value::Integer(2)])],
            },
        ]);
        assert!(!results[0].is_err());
        assert!(results[1].is_err());

        let read = manager.execute_auto_commit(Operation::Read {
            table: "accounts".into(),
            fields: vec![],
            predicate: None,
        });
        assert!(read.rows.unwrap().is_empty());
    }

    #[test]
    fn run_transaction_holds_every_table_lock_for_the_whole_batch() {
        use std::sync::Arc;
        use std::thread;

        let dir = tempdir().unwrap();
        let storage = StorageEngine::new(dir.path().to_path_buf()).unwrap();
        let manager = Arc::new(TransactionManager::new(storage, Duration::from_millis(200)));
        manager.execute_auto_commit(create_table_op());
        manager.execute_auto_commit(Operation::CreateTable {
            metadata: TableMetadata::new("ledger", vec![Column::new("id", DataType::Integer64)]),
        });

        // Hold accounts exclusively from outside the batch before it starts.
        let blocker_id = manager.begin();
        manager
            .execute(
                &blocker_id,
                Operation::Insert {
                    table: "accounts".into(),
                    rows: vec![Row::new(vec![Value::Integer(99), Value::Integer(0)])],
                },
            );

        let manager2 = Arc::clone(&manager);
        let batch = thread::spawn(move || {
            manager2.run_transaction(vec![
                Operation::Insert {
                    table: "ledger".into(),
                    rows: vec![Row::new(vec![Value::Integer(1)])],
                },
                Operation::Insert {
                    table: "accounts".into(),
                    rows: vec![Row::new(vec![Value::Integer(2), Value::Integer(0)])],
                },
            ])
        });

        // Give the batch time to block acquiring the union of locks; since
        // phase 1 acquires both locks up front, the ledger insert must not
        // have run yet even though it doesn't depend on the accounts lock.
        // Read the table file directly (not through the lock manager) so
        // this check doesn't itself contend for the ledger lock the batch
        // is holding.
        thread::sleep(Duration::from_millis(50));
        let ledger_path = manager.storage().table_path("ledger").unwrap();
        let (_, ledger_rows) = manager.storage().read_rows(&ledger_path, &[], None).unwrap();
        assert!(ledger_rows.is_empty());

        manager.rollback(&blocker_id).unwrap();
        let results = batch.join().unwrap();
        assert!(!results[0].is_err());
        assert!(!results[1].is_err());
    }

    #[test]
    fn predicate_delete_inside_explicit_transaction_commits() {
        let (_dir, manager) = manager();
        manager.execute_auto_commit(create_table_op());
        manager.execute_auto_commit(Operation::Insert {
            table: "accounts".into(),
            rows: vec![
                Row::new(vec![Value::Integer(1), Value::Integer(0)]),
                Row::new(vec![Value::Integer(2), Value::Integer(50)]),
            ],
        });

        let txid = manager.begin();
        let deleted = manager.execute(
            &txid,
            Operation::Delete {
                table: "accounts".into(),
                predicate: Some(Predicate::Compare {
                    column: "balance".into(),
                    op: CompareOp::Eq,
                    value: Value::Integer(0),
                }),
            },
        );
        assert_eq!(deleted.affected_count, Some(1));
        manager.commit(&txid).unwrap();

        let read = manager.execute_auto_commit(Operation::Read {
            table: "accounts".into(),
            fields: vec![],
            predicate: None,
        });
        assert_eq!(read.rows.unwrap().len(), 1);
    }
}
