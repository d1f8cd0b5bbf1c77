//! Runs against a live database when `LEDGERBOOK_TEST_DATABASE_URL` is set;
//! otherwise every test returns early. Tests drop and recreate the ledger
//! tables, so point the variable at a scratch database.

use std::sync::{Arc, Mutex};

use postgres::{Client, NoTls};
use rust_decimal_macros::dec;
use time::{macros::date, OffsetDateTime};
use uuid::Uuid;

use ledgerbook::error::LedgerError;
use ledgerbook::ledger::Ledger;
use ledgerbook::storage::{PostgresStorage, StorageBackend, StorageError};
use ledgerbook_core::{CreateJournalCommand, JournalFilter, JournalHeader, LineCommand};
use ledgerbook_postgres::DateColumn;

static DB_LOCK: Mutex<()> = Mutex::new(());

fn database_url() -> Option<String> {
    std::env::var("LEDGERBOOK_TEST_DATABASE_URL").ok()
}

fn reset(url: &str) {
    let mut client = Client::connect(url, NoTls).unwrap();
    client
        .batch_execute(
            "DROP TABLE IF EXISTS journal_audit, journal_attachments, journal_lines, journal, accounts CASCADE;
             DROP FUNCTION IF EXISTS enforce_journal_balance() CASCADE;",
        )
        .unwrap();
}

fn setup_pg(url: &str) -> Arc<PostgresStorage> {
    reset(url);
    let storage = PostgresStorage::connect(url).unwrap();
    storage.migrate().unwrap();
    Arc::new(storage)
}

fn header(id: Uuid) -> JournalHeader {
    let now = OffsetDateTime::now_utc();
    JournalHeader {
        id,
        date: date!(2024 - 01 - 31),
        memo: Arc::from("Deferred check"),
        source: None,
        is_posted: false,
        is_deleted: false,
        created_by: Arc::from("test"),
        created_at: now,
        updated_at: now,
        posted_at: None,
        posted_by: None,
    }
}

#[test]
fn test_pg_balance_is_checked_at_commit() {
    let Some(url) = database_url() else { return };
    let _guard = DB_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let storage = setup_pg(&url);

    // Unbalanced between statements, balanced at commit.
    let id = Uuid::new_v4();
    let mut txn = storage.begin().unwrap();
    txn.insert_journal(&header(id)).unwrap();
    txn.insert_line(id, &LineCommand::debit("5010", dec!(75.00))).unwrap();
    txn.insert_line(id, &LineCommand::credit("1020", dec!(75.00))).unwrap();
    txn.commit().unwrap();
    assert_eq!(storage.get_journal(id).unwrap().lines.len(), 2);

    let id = Uuid::new_v4();
    let mut txn = storage.begin().unwrap();
    txn.insert_journal(&header(id)).unwrap();
    txn.insert_line(id, &LineCommand::debit("5010", dec!(75.00))).unwrap();
    txn.insert_line(id, &LineCommand::credit("1020", dec!(74.98))).unwrap();
    match txn.commit() {
        Err(StorageError::Unbalanced { journal_id, debit, credit }) => {
            assert_eq!(journal_id, id);
            assert_eq!(debit, dec!(75.00));
            assert_eq!(credit, dec!(74.98));
        }
        other => panic!("expected unbalanced commit, got {:?}", other),
    }
    assert!(matches!(storage.get_journal(id), Err(StorageError::JournalNotFound(_))));
}

#[test]
fn test_pg_one_cent_tolerance() {
    let Some(url) = database_url() else { return };
    let _guard = DB_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let storage = setup_pg(&url);

    let id = Uuid::new_v4();
    let mut txn = storage.begin().unwrap();
    txn.insert_journal(&header(id)).unwrap();
    txn.insert_line(id, &LineCommand::debit("5010", dec!(10.00))).unwrap();
    txn.insert_line(id, &LineCommand::credit("1020", dec!(9.99))).unwrap();
    txn.commit().unwrap();
}

#[test]
fn test_pg_dropped_transaction_rolls_back() {
    let Some(url) = database_url() else { return };
    let _guard = DB_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let storage = setup_pg(&url);

    let id = Uuid::new_v4();
    {
        let mut txn = storage.begin().unwrap();
        txn.insert_journal(&header(id)).unwrap();
    }
    assert!(matches!(storage.get_journal(id), Err(StorageError::JournalNotFound(_))));
}

#[test]
fn test_pg_ledger_lifecycle() {
    let Some(url) = database_url() else { return };
    let _guard = DB_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let ledger = Ledger::new(setup_pg(&url));

    let cmd = CreateJournalCommand {
        date: date!(2024 - 02 - 01),
        memo: Arc::from("Office supplies"),
        source: Some(Arc::from("manual")),
        lines: vec![
            LineCommand::debit("5030", dec!(42.15)).with_description("Paper"),
            LineCommand::credit("2100", dec!(42.15)),
        ],
    };
    let journal = ledger.create_journal(&cmd, "alice").unwrap();
    let id = journal.header.id;
    assert_eq!(journal.lines[0].description.as_deref(), Some("Paper"));

    ledger.post_journal(id, "alice").unwrap();
    assert!(matches!(ledger.delete_journal(id, "alice"), Err(LedgerError::Conflict(_))));

    let report = ledger.trial_balance(date!(2024 - 12 - 31)).unwrap();
    assert_eq!(report.total_debit(), dec!(42.15));
    assert_eq!(report.total_debit(), report.total_credit());

    ledger.unpost_journal(id, "admin").unwrap();
    ledger.delete_journal(id, "alice").unwrap();
    assert!(ledger.list_journals(&JournalFilter::default()).unwrap().is_empty());

    let actions: Vec<&str> = ledger
        .journal_audit(id)
        .unwrap()
        .iter()
        .map(|r| r.action.as_str())
        .collect();
    assert_eq!(actions, vec!["create", "post", "unpost", "delete"]);
}

#[test]
fn test_pg_legacy_transaction_date_schema() {
    let Some(url) = database_url() else { return };
    let _guard = DB_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    reset(&url);

    let mut client = Client::connect(&url, NoTls).unwrap();
    client
        .batch_execute(
            "CREATE TABLE journal (
                 id UUID PRIMARY KEY,
                 transaction_date DATE NOT NULL,
                 memo TEXT NOT NULL,
                 created_by TEXT NOT NULL,
                 created_at TIMESTAMPTZ NOT NULL DEFAULT now()
             );",
        )
        .unwrap();

    let storage = PostgresStorage::connect(&url).unwrap();
    let profile = storage.profile();
    assert_eq!(profile.date_column, DateColumn::TransactionDate);
    assert!(!profile.has_lifecycle());

    storage.migrate().unwrap();
    let profile = storage.profile();
    assert_eq!(profile.date_column, DateColumn::TransactionDate);
    assert!(profile.has_lifecycle());

    let ledger = Ledger::new(Arc::new(storage));
    let cmd = CreateJournalCommand {
        date: date!(2023 - 06 - 30),
        memo: Arc::from("Legacy row"),
        source: None,
        lines: vec![
            LineCommand::debit("1010", dec!(500)),
            LineCommand::credit("3100", dec!(500)),
        ],
    };
    let journal = ledger.create_journal(&cmd, "alice").unwrap();
    assert_eq!(journal.header.date, date!(2023 - 06 - 30));

    let june = ledger
        .list_journals(&JournalFilter {
            from: Some(date!(2023 - 06 - 01)),
            to: Some(date!(2023 - 06 - 30)),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(june.len(), 1);
}
