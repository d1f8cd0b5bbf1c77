//! Core types and traits for ledgerbook storage backends.
//!
//! This crate provides the `StorageBackend` and `LedgerTxn` traits together with
//! the journal and chart-of-accounts models, so storage implementations can live
//! in separate crates.

pub mod balance;
pub mod chart;
pub mod models;
pub mod storage;

// Re-export key types at crate root for convenience
pub use balance::{check_balanced, is_balanced, BALANCE_TOLERANCE};
pub use models::{
    Account, AccountType, Attachment, AuditAction, AuditRecord, JournalDetail, JournalHeader,
    JournalLine, LineTags, TrialBalance, TrialBalanceItem,
};
pub use models::read::{AccountFilter, JournalFilter};
pub use models::write::{
    AddAttachmentCommand, CreateAccountCommand, CreateJournalCommand, LineCommand,
    NewAuditRecord, UpdateAccountCommand, UpdateJournalCommand,
};
pub use storage::{LedgerTxn, StorageBackend, StorageError};
