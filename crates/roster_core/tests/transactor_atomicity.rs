use roster_core::config::DbConfig;
use roster_core::db::{ConnectionPool, DbError};
use roster_core::tx::{DbResolver, ExecutionTarget, Scope, Transactor, TxError};
use std::cell::Cell;
use tempfile::TempDir;

#[derive(Debug)]
enum TestError {
    Tx(TxError),
    Db(DbError),
    Forced,
}

impl From<TxError> for TestError {
    fn from(value: TxError) -> Self {
        Self::Tx(value)
    }
}

impl From<DbError> for TestError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

/// Test repository issuing statements through the ambient target resolver,
/// unaware of whether a transaction is active.
struct ProbeRepo {
    resolver: DbResolver,
}

impl ProbeRepo {
    fn create_table(&self, scope: &Scope) -> Result<(), TestError> {
        self.resolver
            .db(scope)
            .with_conn(scope, |conn| {
                conn.execute_batch("CREATE TABLE probe (id INTEGER PRIMARY KEY);")
            })
            .map_err(TestError::Db)
    }

    fn insert(&self, scope: &Scope, id: i64) -> Result<(), TestError> {
        self.resolver
            .db(scope)
            .with_conn(scope, |conn| {
                conn.execute("INSERT INTO probe (id) VALUES (?1);", [id])
            })
            .map(|_| ())
            .map_err(TestError::Db)
    }

    fn table_exists(&self, scope: &Scope) -> Result<bool, TestError> {
        self.resolver
            .db(scope)
            .with_conn(scope, |conn| {
                conn.query_row(
                    "SELECT EXISTS(
                        SELECT 1
                        FROM sqlite_master
                        WHERE type = 'table' AND name = 'probe'
                    );",
                    [],
                    |row| row.get::<_, i64>(0),
                )
            })
            .map(|flag| flag == 1)
            .map_err(TestError::Db)
    }

    fn ids(&self, scope: &Scope) -> Result<Vec<i64>, TestError> {
        self.resolver
            .db(scope)
            .with_conn(scope, |conn| {
                let mut stmt = conn.prepare("SELECT id FROM probe ORDER BY id;")?;
                let mut rows = stmt.query([])?;
                let mut ids = Vec::new();
                while let Some(row) = rows.next()? {
                    ids.push(row.get(0)?);
                }
                Ok(ids)
            })
            .map_err(TestError::Db)
    }
}

fn setup() -> (TempDir, Transactor, ProbeRepo) {
    setup_with_max_conns(4)
}

fn setup_with_max_conns(max_conns: usize) -> (TempDir, Transactor, ProbeRepo) {
    let dir = TempDir::new().unwrap();
    let mut config = DbConfig::new(dir.path().join("atomicity.db"));
    config.max_conns = max_conns;
    let pool = ConnectionPool::open(&config).unwrap();
    let (transactor, resolver) = Transactor::new(pool);
    (dir, transactor, ProbeRepo { resolver })
}

#[test]
fn rollback_discards_all_writes() {
    let (_dir, transactor, probe) = setup();
    let scope = Scope::new();

    let result: Result<(), TestError> = transactor.in_transaction(&scope, |tx_scope| {
        probe.create_table(tx_scope)?;
        probe.insert(tx_scope, 1)?;
        assert!(probe.table_exists(tx_scope)?);
        Err(TestError::Forced)
    });

    // The work's error comes back unchanged, not wrapped.
    assert!(matches!(result, Err(TestError::Forced)));
    assert!(!probe.table_exists(&scope).unwrap());
}

#[test]
fn commit_persists_all_writes() {
    let (_dir, transactor, probe) = setup();
    let scope = Scope::new();

    let result: Result<(), TestError> = transactor.in_transaction(&scope, |tx_scope| {
        probe.create_table(tx_scope)?;
        probe.insert(tx_scope, 1)?;
        Ok(())
    });

    result.unwrap();
    assert!(probe.table_exists(&scope).unwrap());
    assert_eq!(probe.ids(&scope).unwrap(), vec![1]);
}

#[test]
fn uncommitted_writes_are_invisible_outside_the_transaction() {
    let (_dir, transactor, probe) = setup();
    let scope = Scope::new();
    probe.create_table(&scope).unwrap();

    let result: Result<(), TestError> = transactor.in_transaction(&scope, |tx_scope| {
        probe.insert(tx_scope, 7)?;

        // A fresh scope resolves to the pool: a different connection with a
        // pre-commit snapshot.
        let outside = Scope::new();
        assert_eq!(probe.ids(&outside)?, Vec::<i64>::new());
        Ok(())
    });

    result.unwrap();
    assert_eq!(probe.ids(&scope).unwrap(), vec![7]);
}

#[test]
fn nested_transaction_sees_ancestor_writes() {
    let (_dir, transactor, probe) = setup();
    let scope = Scope::new();
    probe.create_table(&scope).unwrap();

    let result: Result<(), TestError> = transactor.in_transaction(&scope, |outer| {
        probe.insert(outer, 1)?;

        transactor.in_transaction(outer, |inner| {
            // Same connection, same transaction chain: the uncommitted
            // ancestor write is visible before either commits.
            assert_eq!(probe.ids(inner)?, vec![1]);
            probe.insert(inner, 2)
        })?;

        Ok(())
    });

    result.unwrap();
    assert_eq!(probe.ids(&scope).unwrap(), vec![1, 2]);
}

#[test]
fn nested_rollback_keeps_the_outer_transaction_alive() {
    let (_dir, transactor, probe) = setup();
    let scope = Scope::new();
    probe.create_table(&scope).unwrap();

    let result: Result<(), TestError> = transactor.in_transaction(&scope, |outer| {
        probe.insert(outer, 1)?;

        let inner: Result<(), TestError> = transactor.in_transaction(outer, |inner| {
            probe.insert(inner, 2)?;
            Err(TestError::Forced)
        });
        assert!(matches!(inner, Err(TestError::Forced)));

        // Only the savepoint was rolled back; the outer write survives.
        assert_eq!(probe.ids(outer)?, vec![1]);
        Ok(())
    });

    result.unwrap();
    assert_eq!(probe.ids(&scope).unwrap(), vec![1]);
}

#[test]
fn skip_bypasses_the_ambient_transaction() {
    let (_dir, transactor, probe) = setup();
    let scope = Scope::new();
    probe.create_table(&scope).unwrap();

    let result: Result<(), TestError> = transactor.in_transaction(&scope, |tx_scope| {
        let bypassed = transactor.skip(tx_scope);
        assert!(!Transactor::is_within_transaction(&bypassed));

        // The audit write gets its own top-level transaction and commit.
        transactor.in_transaction(&bypassed, |audit_scope| {
            assert!(Transactor::is_within_transaction(audit_scope));
            probe.insert(audit_scope, 100)
        })?;

        probe.insert(tx_scope, 1)?;
        Err(TestError::Forced)
    });

    assert!(matches!(result, Err(TestError::Forced)));
    // The bypassed write survived the ambient rollback.
    assert_eq!(probe.ids(&scope).unwrap(), vec![100]);
}

#[test]
fn membership_reflects_the_nearest_binding() {
    let (_dir, transactor, _probe) = setup();
    let scope = Scope::new();

    assert!(!Transactor::is_within_transaction(&scope));
    assert!(!Transactor::is_within_transaction(&transactor.skip(&scope)));

    let result: Result<(), TestError> = transactor.in_transaction(&scope, |tx_scope| {
        assert!(Transactor::is_within_transaction(tx_scope));
        assert!(!Transactor::is_within_transaction(&transactor.skip(tx_scope)));
        Ok(())
    });
    result.unwrap();

    assert!(!Transactor::is_within_transaction(&scope));
}

#[test]
fn begin_failure_short_circuits_the_work() {
    let (_dir, transactor, probe) = setup_with_max_conns(1);
    let scope = Scope::new();
    probe.create_table(&scope).unwrap();

    let work_called = Cell::new(false);

    let result: Result<(), TestError> = transactor.in_transaction(&scope, |_tx_scope| {
        // The only connection is held by the enclosing transaction; a fresh
        // root scope must fail to begin.
        let fresh = Scope::new();
        let inner: Result<(), TestError> = transactor.in_transaction(&fresh, |_| {
            work_called.set(true);
            Ok(())
        });

        assert!(matches!(
            inner,
            Err(TestError::Tx(TxError::Begin(DbError::PoolExhausted {
                max_conns: 1
            })))
        ));
        Ok(())
    });

    result.unwrap();
    assert!(!work_called.get());
}

#[test]
fn cancellation_mid_work_rolls_back() {
    let (_dir, transactor, probe) = setup();
    let scope = Scope::new();
    probe.create_table(&scope).unwrap();

    let result: Result<(), TestError> = transactor.in_transaction(&scope, |tx_scope| {
        probe.insert(tx_scope, 1)?;
        tx_scope.cancel_token().cancel();
        probe.insert(tx_scope, 2)
    });

    assert!(matches!(result, Err(TestError::Db(DbError::Canceled))));

    // The cancelled token is shared with the original root; verify through
    // an unrelated scope.
    assert_eq!(probe.ids(&Scope::new()).unwrap(), Vec::<i64>::new());
}
