//! Journal and chart-of-accounts service.
//!
//! All lifecycle rules live here: journals are created unposted, posting
//! freezes header and lines, deletes are soft, and every change to a journal
//! writes one audit record inside the same transaction. The balance rule is
//! pre-checked for a readable error, but the authority is the storage commit.

use std::{collections::BTreeMap, sync::Arc};

use rust_decimal::Decimal;
use serde::Serialize;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use ledgerbook_core::{
    is_balanced,
    models::read::MAX_PAGE_SIZE,
    Account, AccountFilter, AddAttachmentCommand, Attachment, AuditAction, AuditRecord,
    CreateAccountCommand, CreateJournalCommand, JournalDetail, JournalFilter, JournalHeader,
    LineCommand, NewAuditRecord, TrialBalance, UpdateAccountCommand, UpdateJournalCommand,
};

use crate::{
    error::LedgerError,
    storage::{LedgerTxn, StorageBackend, StorageError},
};

const MAX_ACCOUNT_DEPTH: usize = 32;

/// Largest amount a `NUMERIC(14,2)` column holds: 999,999,999,999.99.
pub const MAX_LINE_AMOUNT: Decimal = Decimal::from_parts(276_447_231, 23_283, 0, false, 2);

#[derive(Debug, Clone, Serialize)]
pub struct AccountNode {
    #[serde(flatten)]
    pub account: Account,
    pub children: Vec<AccountNode>,
}

pub struct Ledger {
    storage: Arc<dyn StorageBackend>,
}

impl Ledger {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    pub fn migrate(&self) -> Result<(), LedgerError> {
        self.storage.migrate()?;
        Ok(())
    }

    // Accounts

    pub fn get_account(&self, code: &str) -> Result<Account, LedgerError> {
        Ok(self.storage.get_account(code)?)
    }

    pub fn list_accounts(&self, filter: &AccountFilter) -> Result<Vec<Account>, LedgerError> {
        Ok(self.storage.list_accounts(filter)?)
    }

    /// Nested chart of accounts. Roots are accounts without a parent; children
    /// are ordered by code.
    pub fn account_tree(&self) -> Result<Vec<AccountNode>, LedgerError> {
        let accounts = self.storage.list_accounts(&AccountFilter::default())?;
        let mut children: BTreeMap<Arc<str>, Vec<Account>> = BTreeMap::new();
        let mut roots = Vec::new();
        for account in accounts {
            match &account.parent_code {
                Some(parent) => children.entry(parent.clone()).or_default().push(account),
                None => roots.push(account),
            }
        }

        fn build(account: Account, children: &mut BTreeMap<Arc<str>, Vec<Account>>) -> AccountNode {
            let mut kids = children.remove(&account.code).unwrap_or_default();
            kids.sort_by(|a, b| a.code.cmp(&b.code));
            AccountNode {
                children: kids.into_iter().map(|k| build(k, children)).collect(),
                account,
            }
        }

        roots.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(roots.into_iter().map(|r| build(r, &mut children)).collect())
    }

    pub fn create_account(&self, cmd: &CreateAccountCommand) -> Result<Account, LedgerError> {
        let code = cmd.code.trim();
        if code.is_empty() {
            return Err(LedgerError::Validation("account code is required".to_string()));
        }
        if cmd.name.trim().is_empty() {
            return Err(LedgerError::Validation("account name is required".to_string()));
        }

        let mut txn = self.storage.begin()?;
        if let Some(parent_code) = &cmd.parent_code {
            let parent = lookup_parent(txn.as_mut(), parent_code)?;
            if parent.account_type != cmd.account_type {
                return Err(LedgerError::Validation(format!(
                    "parent {} is {}, account is {}",
                    parent.code, parent.account_type, cmd.account_type
                )));
            }
        }

        let account = Account {
            code: Arc::from(code),
            name: Arc::from(cmd.name.trim()),
            parent_code: cmd.parent_code.clone(),
            account_type: cmd.account_type,
            is_active: true,
            is_custom: true,
            created_at: OffsetDateTime::now_utc(),
        };
        txn.insert_account(&account)?;
        txn.commit()?;

        tracing::info!(code = %account.code, account_type = %account.account_type, "Account created");
        Ok(account)
    }

    pub fn update_account(&self, code: &str, cmd: &UpdateAccountCommand) -> Result<Account, LedgerError> {
        let mut txn = self.storage.begin()?;
        let mut account = txn.get_account(code)?;

        if let Some(name) = &cmd.name {
            if name.trim().is_empty() {
                return Err(LedgerError::Validation("account name is required".to_string()));
            }
            account.name = Arc::from(name.trim());
        }
        if let Some(parent_code) = &cmd.parent_code {
            if let Some(parent_code) = parent_code {
                check_parent(txn.as_mut(), &account, parent_code)?;
            }
            account.parent_code = parent_code.clone();
        }
        if let Some(is_active) = cmd.is_active {
            account.is_active = is_active;
        }

        txn.update_account(&account)?;
        txn.commit()?;
        tracing::info!(code = %account.code, "Account updated");
        Ok(account)
    }

    /// Accounts are never removed; custom ones can be deactivated.
    pub fn deactivate_account(&self, code: &str) -> Result<Account, LedgerError> {
        let mut txn = self.storage.begin()?;
        let mut account = txn.get_account(code)?;
        if !account.is_custom {
            return Err(LedgerError::Conflict(format!(
                "account {} is part of the standard chart and cannot be deleted",
                code
            )));
        }
        account.is_active = false;
        txn.update_account(&account)?;
        txn.commit()?;
        tracing::info!(code = %account.code, "Account deactivated");
        Ok(account)
    }

    // Journals

    pub fn get_journal(&self, id: Uuid) -> Result<JournalDetail, LedgerError> {
        Ok(self.storage.get_journal(id)?)
    }

    pub fn list_journals(&self, filter: &JournalFilter) -> Result<Vec<JournalHeader>, LedgerError> {
        if filter.limit < 1 || filter.limit > MAX_PAGE_SIZE {
            return Err(LedgerError::Validation(format!("limit must be between 1 and {}", MAX_PAGE_SIZE)));
        }
        if filter.offset < 0 {
            return Err(LedgerError::Validation("offset must not be negative".to_string()));
        }
        if let (Some(from), Some(to)) = (filter.from, filter.to) {
            if from > to {
                return Err(LedgerError::Validation("from must not be after to".to_string()));
            }
        }
        Ok(self.storage.list_journals(filter)?)
    }

    pub fn journal_audit(&self, id: Uuid) -> Result<Vec<AuditRecord>, LedgerError> {
        Ok(self.storage.journal_audit(id)?)
    }

    pub fn trial_balance(&self, as_of: Date) -> Result<TrialBalance, LedgerError> {
        Ok(self.storage.trial_balance(as_of)?)
    }

    pub fn create_journal(&self, cmd: &CreateJournalCommand, actor: &str) -> Result<JournalDetail, LedgerError> {
        let memo = required_memo(&cmd.memo)?;
        let id = Uuid::new_v4();

        let result = (|| -> Result<(), LedgerError> {
            let mut txn = self.storage.begin()?;
            validate_lines(txn.as_mut(), Some(id), &cmd.lines)?;

            let now = OffsetDateTime::now_utc();
            let header = JournalHeader {
                id,
                date: cmd.date,
                memo,
                source: cmd.source.clone(),
                is_posted: false,
                is_deleted: false,
                created_by: Arc::from(actor),
                created_at: now,
                updated_at: now,
                posted_at: None,
                posted_by: None,
            };
            txn.insert_journal(&header)?;
            for line in &cmd.lines {
                txn.insert_line(id, line)?;
            }

            let after = txn.load_journal(id)?;
            audit(txn.as_mut(), id, AuditAction::Create, actor, None, Some(&after))?;
            txn.commit()?;
            Ok(())
        })();
        self.observe(&result);
        result?;

        metrics::increment_counter!("ledgerbook_journals_created_total");
        tracing::info!(journal_id = %id, actor, lines = cmd.lines.len(), "Journal created");
        self.get_journal(id)
    }

    pub fn update_journal(&self, id: Uuid, cmd: &UpdateJournalCommand, actor: &str) -> Result<JournalDetail, LedgerError> {
        let result = (|| -> Result<(), LedgerError> {
            let mut txn = self.storage.begin()?;
            let before = txn.load_journal(id)?;
            ensure_editable(&before.header)?;

            let mut header = before.header.clone();
            if let Some(date) = cmd.date {
                header.date = date;
            }
            if let Some(memo) = &cmd.memo {
                header.memo = required_memo(memo)?;
            }
            if let Some(source) = &cmd.source {
                header.source = Some(source.clone());
            }
            header.updated_at = OffsetDateTime::now_utc();
            txn.update_journal(&header)?;

            if let Some(lines) = &cmd.lines {
                validate_lines(txn.as_mut(), Some(id), lines)?;
                txn.delete_lines(id)?;
                for line in lines {
                    txn.insert_line(id, line)?;
                }
            }

            let after = txn.load_journal(id)?;
            audit(txn.as_mut(), id, AuditAction::Update, actor, Some(&before), Some(&after))?;
            txn.commit()?;
            Ok(())
        })();
        self.observe(&result);
        result?;

        tracing::info!(journal_id = %id, actor, replaced_lines = cmd.lines.is_some(), "Journal updated");
        self.get_journal(id)
    }

    pub fn post_journal(&self, id: Uuid, actor: &str) -> Result<JournalDetail, LedgerError> {
        let result = self.transition(id, actor, AuditAction::Post, |detail, now| {
            let header = &detail.header;
            if header.is_deleted {
                return Err(LedgerError::Conflict(format!("journal {} is deleted", id)));
            }
            if header.is_posted {
                return Err(LedgerError::Conflict(format!("journal {} is already posted", id)));
            }
            if detail.lines.is_empty() {
                return Err(LedgerError::Validation("cannot post a journal without lines".to_string()));
            }
            if !detail.is_balanced() {
                return Err(LedgerError::Unbalanced {
                    journal_id: Some(id),
                    debit: detail.total_debit(),
                    credit: detail.total_credit(),
                });
            }
            let mut header = header.clone();
            header.is_posted = true;
            header.posted_at = Some(now);
            header.posted_by = Some(Arc::from(actor));
            Ok(header)
        });
        if result.is_ok() {
            metrics::increment_counter!("ledgerbook_journals_posted_total");
        }
        result
    }

    pub fn unpost_journal(&self, id: Uuid, actor: &str) -> Result<JournalDetail, LedgerError> {
        self.transition(id, actor, AuditAction::Unpost, |detail, _| {
            if detail.header.is_deleted {
                return Err(LedgerError::Conflict(format!("journal {} is deleted", id)));
            }
            if !detail.header.is_posted {
                return Err(LedgerError::Conflict(format!("journal {} is not posted", id)));
            }
            let mut header = detail.header.clone();
            header.is_posted = false;
            header.posted_at = None;
            header.posted_by = None;
            Ok(header)
        })
    }

    /// Soft delete. Posted journals must be unposted first.
    pub fn delete_journal(&self, id: Uuid, actor: &str) -> Result<JournalDetail, LedgerError> {
        self.transition(id, actor, AuditAction::Delete, |detail, _| {
            if detail.header.is_deleted {
                return Err(LedgerError::Conflict(format!("journal {} is already deleted", id)));
            }
            if detail.header.is_posted {
                return Err(LedgerError::Conflict(format!(
                    "journal {} is posted; unpost it before deleting",
                    id
                )));
            }
            let mut header = detail.header.clone();
            header.is_deleted = true;
            Ok(header)
        })
    }

    pub fn restore_journal(&self, id: Uuid, actor: &str) -> Result<JournalDetail, LedgerError> {
        self.transition(id, actor, AuditAction::Restore, |detail, _| {
            if !detail.header.is_deleted {
                return Err(LedgerError::Conflict(format!("journal {} is not deleted", id)));
            }
            let mut header = detail.header.clone();
            header.is_deleted = false;
            Ok(header)
        })
    }

    pub fn add_attachment(&self, id: Uuid, cmd: &AddAttachmentCommand, actor: &str) -> Result<Attachment, LedgerError> {
        if cmd.file_name.trim().is_empty() {
            return Err(LedgerError::Validation("file_name is required".to_string()));
        }
        if cmd.storage_path.trim().is_empty() {
            return Err(LedgerError::Validation("storage_path is required".to_string()));
        }
        if cmd.size_bytes < 0 {
            return Err(LedgerError::Validation("size_bytes must not be negative".to_string()));
        }

        let mut txn = self.storage.begin()?;
        let detail = txn.load_journal(id)?;
        if detail.header.is_deleted {
            return Err(LedgerError::Conflict(format!("journal {} is deleted", id)));
        }

        let attachment = Attachment {
            id: Uuid::new_v4(),
            journal_id: id,
            file_name: Arc::from(cmd.file_name.trim()),
            content_type: cmd.content_type.clone(),
            size_bytes: cmd.size_bytes,
            storage_path: cmd.storage_path.clone(),
            uploaded_by: Arc::from(actor),
            uploaded_at: OffsetDateTime::now_utc(),
        };
        txn.insert_attachment(&attachment)?;
        txn.insert_audit(&NewAuditRecord {
            journal_id: id,
            action: AuditAction::Attach,
            actor: Arc::from(actor),
            before: None,
            after: serde_json::to_value(&attachment).ok(),
            at: attachment.uploaded_at,
        })?;
        txn.commit()?;

        tracing::info!(journal_id = %id, attachment_id = %attachment.id, actor, "Attachment added");
        Ok(attachment)
    }

    pub fn remove_attachment(&self, id: Uuid, attachment_id: Uuid, actor: &str) -> Result<Attachment, LedgerError> {
        let mut txn = self.storage.begin()?;
        let detail = txn.load_journal(id)?;
        if detail.header.is_deleted {
            return Err(LedgerError::Conflict(format!("journal {} is deleted", id)));
        }
        let removed = txn.delete_attachment(id, attachment_id)?;
        txn.insert_audit(&NewAuditRecord {
            journal_id: id,
            action: AuditAction::Detach,
            actor: Arc::from(actor),
            before: serde_json::to_value(&removed).ok(),
            after: None,
            at: OffsetDateTime::now_utc(),
        })?;
        txn.commit()?;

        tracing::info!(journal_id = %id, %attachment_id, actor, "Attachment removed");
        Ok(removed)
    }

    /// Loads, applies `change` to the header, writes it back and audits it.
    fn transition<F>(&self, id: Uuid, actor: &str, action: AuditAction, change: F) -> Result<JournalDetail, LedgerError>
    where
        F: FnOnce(&JournalDetail, OffsetDateTime) -> Result<JournalHeader, LedgerError>,
    {
        let result = (|| -> Result<(), LedgerError> {
            let mut txn = self.storage.begin()?;
            let before = txn.load_journal(id)?;
            let now = OffsetDateTime::now_utc();
            let mut header = change(&before, now)?;
            header.updated_at = now;
            txn.update_journal(&header)?;

            let after = txn.load_journal(id)?;
            audit(txn.as_mut(), id, action, actor, Some(&before), Some(&after))?;
            txn.commit()?;
            Ok(())
        })();
        self.observe(&result);
        result?;

        tracing::info!(journal_id = %id, actor, action = action.as_str(), "Journal state changed");
        self.get_journal(id)
    }

    fn observe(&self, result: &Result<(), LedgerError>) {
        if let Err(LedgerError::Unbalanced { journal_id, debit, credit }) = result {
            metrics::increment_counter!("ledgerbook_balance_violations_total");
            tracing::warn!(journal_id = ?journal_id, %debit, %credit, "Rejected unbalanced journal");
        }
    }
}

fn required_memo(memo: &str) -> Result<Arc<str>, LedgerError> {
    let memo = memo.trim();
    if memo.is_empty() {
        return Err(LedgerError::Validation("memo is required".to_string()));
    }
    Ok(Arc::from(memo))
}

fn ensure_editable(header: &JournalHeader) -> Result<(), LedgerError> {
    if header.is_deleted {
        return Err(LedgerError::Conflict(format!("journal {} is deleted", header.id)));
    }
    if header.is_posted {
        return Err(LedgerError::Conflict(format!(
            "journal {} is posted; unpost it before editing",
            header.id
        )));
    }
    Ok(())
}

fn audit(
    txn: &mut dyn LedgerTxn,
    journal_id: Uuid,
    action: AuditAction,
    actor: &str,
    before: Option<&JournalDetail>,
    after: Option<&JournalDetail>,
) -> Result<u64, StorageError> {
    txn.insert_audit(&NewAuditRecord {
        journal_id,
        action,
        actor: Arc::from(actor),
        before: before.map(JournalDetail::snapshot),
        after: after.map(JournalDetail::snapshot),
        at: OffsetDateTime::now_utc(),
    })
}

fn lookup_parent(txn: &mut dyn LedgerTxn, parent_code: &str) -> Result<Account, LedgerError> {
    match txn.get_account(parent_code) {
        Ok(parent) => Ok(parent),
        Err(StorageError::AccountNotFound(_)) => Err(LedgerError::Validation(format!(
            "parent account {} does not exist",
            parent_code
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Parent must exist, share the account type and not be a descendant.
fn check_parent(txn: &mut dyn LedgerTxn, account: &Account, parent_code: &str) -> Result<(), LedgerError> {
    let parent = lookup_parent(txn, parent_code)?;
    if parent.account_type != account.account_type {
        return Err(LedgerError::Validation(format!(
            "parent {} is {}, account is {}",
            parent.code, parent.account_type, account.account_type
        )));
    }

    let mut cursor = Some(parent);
    for _ in 0..MAX_ACCOUNT_DEPTH {
        let Some(node) = cursor else { return Ok(()) };
        if node.code == account.code {
            return Err(LedgerError::Validation(format!(
                "making {} the parent of {} would create a cycle",
                parent_code, account.code
            )));
        }
        cursor = match &node.parent_code {
            Some(code) => Some(txn.get_account(code)?),
            None => None,
        };
    }
    Err(LedgerError::Validation("account hierarchy is too deep".to_string()))
}

/// Line rules: amounts non-negative with at most two decimals, exactly one of
/// debit/credit set, active account. Returns the totals after the balance
/// pre-check.
fn validate_lines(txn: &mut dyn LedgerTxn, journal_id: Option<Uuid>, lines: &[LineCommand]) -> Result<(Decimal, Decimal), LedgerError> {
    if lines.len() < 2 {
        return Err(LedgerError::Validation("a journal needs at least two lines".to_string()));
    }

    let mut total_debit = Decimal::ZERO;
    let mut total_credit = Decimal::ZERO;
    for (i, line) in lines.iter().enumerate() {
        let n = i + 1;
        if line.account_code.trim().is_empty() {
            return Err(LedgerError::Validation(format!("line {}: account_code is required", n)));
        }
        if line.debit < Decimal::ZERO || line.credit < Decimal::ZERO {
            return Err(LedgerError::Validation(format!("line {}: amounts must not be negative", n)));
        }
        if line.debit > MAX_LINE_AMOUNT || line.credit > MAX_LINE_AMOUNT {
            return Err(LedgerError::Validation(format!("line {}: amount exceeds {}", n, MAX_LINE_AMOUNT)));
        }
        if line.debit.normalize().scale() > 2 || line.credit.normalize().scale() > 2 {
            return Err(LedgerError::Validation(format!("line {}: amounts have at most two decimal places", n)));
        }
        match (line.debit.is_zero(), line.credit.is_zero()) {
            (true, true) => {
                return Err(LedgerError::Validation(format!("line {}: either debit or credit is required", n)))
            }
            (false, false) => {
                return Err(LedgerError::Validation(format!("line {}: a line cannot carry both debit and credit", n)))
            }
            _ => {}
        }

        let account = match txn.get_account(&line.account_code) {
            Ok(account) => account,
            Err(StorageError::AccountNotFound(code)) => {
                return Err(LedgerError::Validation(format!("line {}: unknown account {}", n, code)))
            }
            Err(e) => return Err(e.into()),
        };
        if !account.is_active {
            return Err(LedgerError::Validation(format!("line {}: account {} is inactive", n, account.code)));
        }

        total_debit = total_debit
            .checked_add(line.debit)
            .ok_or_else(|| LedgerError::Validation("debit total is out of range".to_string()))?;
        total_credit = total_credit
            .checked_add(line.credit)
            .ok_or_else(|| LedgerError::Validation("credit total is out of range".to_string()))?;
    }

    if !is_balanced(total_debit, total_credit) {
        return Err(LedgerError::Unbalanced {
            journal_id,
            debit: total_debit,
            credit: total_credit,
        });
    }
    Ok((total_debit, total_credit))
}
