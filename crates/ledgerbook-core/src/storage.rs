use rust_decimal::Decimal;
use thiserror::Error;
use time::Date;
use uuid::Uuid;

use crate::models::{
    read::{AccountFilter, JournalFilter},
    write::{LineCommand, NewAuditRecord},
    Account, Attachment, AuditRecord, JournalDetail, JournalHeader, TrialBalance,
};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{0}")]
    Other(String),
    #[error("account not found: {0}")]
    AccountNotFound(String),
    #[error("account already exists: {0}")]
    AccountExists(String),
    #[error("journal not found: {0}")]
    JournalNotFound(Uuid),
    #[error("attachment not found: {0}")]
    AttachmentNotFound(Uuid),
    #[error("journal {journal_id} is unbalanced: debits {debit} != credits {credit}")]
    Unbalanced {
        journal_id: Uuid,
        debit: Decimal,
        credit: Decimal,
    },
    #[error("unsupported schema: {0}")]
    Schema(String),
}

/// A pluggable ledger store.
///
/// Writes go through a [`LedgerTxn`] obtained from [`StorageBackend::begin`].
/// Reads on the backend itself see only committed data.
pub trait StorageBackend: Send + Sync {
    fn begin(&self) -> Result<Box<dyn LedgerTxn + '_>, StorageError>;

    /// Idempotent schema setup plus seeding of the standard chart of accounts.
    fn migrate(&self) -> Result<(), StorageError>;

    fn get_account(&self, code: &str) -> Result<Account, StorageError>;
    fn list_accounts(&self, filter: &AccountFilter) -> Result<Vec<Account>, StorageError>;

    fn get_journal(&self, id: Uuid) -> Result<JournalDetail, StorageError>;
    fn list_journals(&self, filter: &JournalFilter) -> Result<Vec<JournalHeader>, StorageError>;
    fn journal_audit(&self, id: Uuid) -> Result<Vec<AuditRecord>, StorageError>;

    /// Net of posted, non-deleted journals dated on or before `as_of`.
    fn trial_balance(&self, as_of: Date) -> Result<TrialBalance, StorageError>;
}

/// A unit of work.
///
/// Line writes are not balance-checked as they happen. `commit` checks every
/// journal whose lines were touched and fails with
/// [`StorageError::Unbalanced`] if any is off by more than one cent, in which
/// case nothing from the transaction persists. Dropping a transaction without
/// committing rolls it back.
pub trait LedgerTxn {
    fn get_account(&mut self, code: &str) -> Result<Account, StorageError>;
    fn insert_account(&mut self, account: &Account) -> Result<(), StorageError>;
    fn update_account(&mut self, account: &Account) -> Result<(), StorageError>;

    /// Loads a journal for modification. Postgres locks the header row.
    fn load_journal(&mut self, id: Uuid) -> Result<JournalDetail, StorageError>;
    fn insert_journal(&mut self, header: &JournalHeader) -> Result<(), StorageError>;
    fn update_journal(&mut self, header: &JournalHeader) -> Result<(), StorageError>;

    fn insert_line(&mut self, journal_id: Uuid, line: &LineCommand) -> Result<u64, StorageError>;
    fn delete_lines(&mut self, journal_id: Uuid) -> Result<usize, StorageError>;

    fn insert_attachment(&mut self, attachment: &Attachment) -> Result<(), StorageError>;
    fn delete_attachment(&mut self, journal_id: Uuid, attachment_id: Uuid) -> Result<Attachment, StorageError>;

    fn insert_audit(&mut self, record: &NewAuditRecord) -> Result<u64, StorageError>;

    fn commit(self: Box<Self>) -> Result<(), StorageError>;
    fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}
