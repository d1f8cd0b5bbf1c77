use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, MutexGuard},
};

use rust_decimal::Decimal;
use time::Date;
use uuid::Uuid;

use ledgerbook_core::{
    chart::standard_accounts, check_balanced, Account, AccountFilter, Attachment, AuditRecord,
    JournalDetail, JournalFilter, JournalHeader, JournalLine, LedgerTxn, LineCommand,
    NewAuditRecord, StorageBackend, StorageError, TrialBalance, TrialBalanceItem,
};

#[derive(Clone, Default)]
struct LedgerState {
    accounts: BTreeMap<Arc<str>, Account>,
    journals: BTreeMap<Uuid, JournalHeader>,
    lines: BTreeMap<Uuid, Vec<JournalLine>>,
    attachments: BTreeMap<Uuid, Vec<Attachment>>,
    audit: Vec<AuditRecord>,
    line_seq: u64,
    audit_seq: u64,
}

impl LedgerState {
    fn account(&self, code: &str) -> Result<Account, StorageError> {
        self.accounts
            .get(code)
            .cloned()
            .ok_or_else(|| StorageError::AccountNotFound(code.to_string()))
    }

    fn journal(&self, id: Uuid) -> Result<JournalDetail, StorageError> {
        let header = self.journals.get(&id).cloned().ok_or(StorageError::JournalNotFound(id))?;
        Ok(JournalDetail {
            header,
            lines: self.lines.get(&id).cloned().unwrap_or_default(),
            attachments: self.attachments.get(&id).cloned().unwrap_or_default(),
        })
    }

    fn totals(&self, journal_id: Uuid) -> (Decimal, Decimal) {
        self.lines
            .get(&journal_id)
            .map(|lines| {
                lines.iter().fold((Decimal::ZERO, Decimal::ZERO), |(d, c), l| (d + l.debit, c + l.credit))
            })
            .unwrap_or((Decimal::ZERO, Decimal::ZERO))
    }
}

/// Ledger store kept entirely in process memory.
///
/// A transaction holds the state lock from `begin` until it finishes, so units
/// of work are serialised and readers wait for the writer to commit.
pub struct InMemoryStorage {
    state: Mutex<LedgerState>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// A store with the standard chart of accounts already seeded.
    pub fn seeded() -> Self {
        let storage = Self::new();
        if let Ok(mut state) = storage.state.lock() {
            for account in standard_accounts() {
                state.accounts.insert(account.code.clone(), account);
            }
        }
        storage
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerState>, StorageError> {
        self.state
            .lock()
            .map_err(|_| StorageError::Other("ledger state lock poisoned".to_string()))
    }
}

impl StorageBackend for InMemoryStorage {
    fn begin(&self) -> Result<Box<dyn LedgerTxn + '_>, StorageError> {
        let state = self.lock()?;
        let snapshot = state.clone();
        tracing::debug!("memory transaction started");
        Ok(Box::new(MemoryTxn {
            state,
            snapshot: Some(snapshot),
            touched: BTreeSet::new(),
        }))
    }

    fn migrate(&self) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        let mut seeded = 0;
        for account in standard_accounts() {
            if !state.accounts.contains_key(&account.code) {
                state.accounts.insert(account.code.clone(), account);
                seeded += 1;
            }
        }
        tracing::info!(seeded, "memory store migrated");
        Ok(())
    }

    fn get_account(&self, code: &str) -> Result<Account, StorageError> {
        self.lock()?.account(code)
    }

    fn list_accounts(&self, filter: &AccountFilter) -> Result<Vec<Account>, StorageError> {
        let state = self.lock()?;
        Ok(state
            .accounts
            .values()
            .filter(|a| filter.account_type.map_or(true, |t| a.account_type == t))
            .filter(|a| !filter.active_only || a.is_active)
            .cloned()
            .collect())
    }

    fn get_journal(&self, id: Uuid) -> Result<JournalDetail, StorageError> {
        self.lock()?.journal(id)
    }

    fn list_journals(&self, filter: &JournalFilter) -> Result<Vec<JournalHeader>, StorageError> {
        let state = self.lock()?;
        let mut result: Vec<JournalHeader> = state
            .journals
            .values()
            .filter(|j| filter.include_deleted || !j.is_deleted)
            .filter(|j| filter.from.map_or(true, |from| j.date >= from))
            .filter(|j| filter.to.map_or(true, |to| j.date <= to))
            .filter(|j| filter.posted.map_or(true, |posted| j.is_posted == posted))
            .filter(|j| filter.source.as_ref().map_or(true, |s| j.source.as_ref() == Some(s)))
            .filter(|j| {
                filter.account_code.as_ref().map_or(true, |code| {
                    state
                        .lines
                        .get(&j.id)
                        .map_or(false, |lines| lines.iter().any(|l| &l.account_code == code))
                })
            })
            .cloned()
            .collect();

        result.sort_by(|a, b| (a.date, a.created_at, a.id).cmp(&(b.date, b.created_at, b.id)));

        Ok(result
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }

    fn journal_audit(&self, id: Uuid) -> Result<Vec<AuditRecord>, StorageError> {
        let state = self.lock()?;
        if !state.journals.contains_key(&id) {
            return Err(StorageError::JournalNotFound(id));
        }
        Ok(state.audit.iter().filter(|r| r.journal_id == id).cloned().collect())
    }

    fn trial_balance(&self, as_of: Date) -> Result<TrialBalance, StorageError> {
        let state = self.lock()?;
        let mut totals: BTreeMap<Arc<str>, (Decimal, Decimal)> = BTreeMap::new();
        for journal in state.journals.values() {
            if !journal.is_posted || journal.is_deleted || journal.date > as_of {
                continue;
            }
            for line in state.lines.get(&journal.id).into_iter().flatten() {
                let entry = totals.entry(line.account_code.clone()).or_insert((Decimal::ZERO, Decimal::ZERO));
                entry.0 += line.debit;
                entry.1 += line.credit;
            }
        }

        let mut items = Vec::with_capacity(totals.len());
        for (code, (debit, credit)) in totals {
            let account = state.account(&code)?;
            items.push(TrialBalanceItem::from_totals(code, account.name, account.account_type, debit, credit));
        }

        Ok(TrialBalance { as_of, items })
    }
}

struct MemoryTxn<'a> {
    state: MutexGuard<'a, LedgerState>,
    snapshot: Option<LedgerState>,
    touched: BTreeSet<Uuid>,
}

impl MemoryTxn<'_> {
    fn restore(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.state = snapshot;
            tracing::debug!("memory transaction rolled back");
        }
    }
}

impl Drop for MemoryTxn<'_> {
    fn drop(&mut self) {
        self.restore();
    }
}

impl LedgerTxn for MemoryTxn<'_> {
    fn get_account(&mut self, code: &str) -> Result<Account, StorageError> {
        self.state.account(code)
    }

    fn insert_account(&mut self, account: &Account) -> Result<(), StorageError> {
        if self.state.accounts.contains_key(&account.code) {
            return Err(StorageError::AccountExists(account.code.to_string()));
        }
        if let Some(parent) = &account.parent_code {
            self.state.account(parent)?;
        }
        self.state.accounts.insert(account.code.clone(), account.clone());
        Ok(())
    }

    fn update_account(&mut self, account: &Account) -> Result<(), StorageError> {
        match self.state.accounts.get_mut(&account.code) {
            Some(existing) => {
                *existing = account.clone();
                Ok(())
            }
            None => Err(StorageError::AccountNotFound(account.code.to_string())),
        }
    }

    fn load_journal(&mut self, id: Uuid) -> Result<JournalDetail, StorageError> {
        self.state.journal(id)
    }

    fn insert_journal(&mut self, header: &JournalHeader) -> Result<(), StorageError> {
        if self.state.journals.contains_key(&header.id) {
            return Err(StorageError::Other(format!("journal already exists: {}", header.id)));
        }
        self.state.journals.insert(header.id, header.clone());
        Ok(())
    }

    fn update_journal(&mut self, header: &JournalHeader) -> Result<(), StorageError> {
        match self.state.journals.get_mut(&header.id) {
            Some(existing) => {
                *existing = header.clone();
                Ok(())
            }
            None => Err(StorageError::JournalNotFound(header.id)),
        }
    }

    fn insert_line(&mut self, journal_id: Uuid, line: &LineCommand) -> Result<u64, StorageError> {
        if !self.state.journals.contains_key(&journal_id) {
            return Err(StorageError::JournalNotFound(journal_id));
        }
        self.state.account(&line.account_code)?;

        self.state.line_seq += 1;
        let id = self.state.line_seq;
        self.state.lines.entry(journal_id).or_default().push(JournalLine {
            id,
            journal_id,
            account_code: line.account_code.clone(),
            debit: line.debit,
            credit: line.credit,
            description: line.description.clone(),
            tags: line.tags.clone(),
        });
        self.touched.insert(journal_id);
        Ok(id)
    }

    fn delete_lines(&mut self, journal_id: Uuid) -> Result<usize, StorageError> {
        let removed = self.state.lines.remove(&journal_id).map_or(0, |l| l.len());
        if removed > 0 {
            self.touched.insert(journal_id);
        }
        Ok(removed)
    }

    fn insert_attachment(&mut self, attachment: &Attachment) -> Result<(), StorageError> {
        if !self.state.journals.contains_key(&attachment.journal_id) {
            return Err(StorageError::JournalNotFound(attachment.journal_id));
        }
        self.state
            .attachments
            .entry(attachment.journal_id)
            .or_default()
            .push(attachment.clone());
        Ok(())
    }

    fn delete_attachment(&mut self, journal_id: Uuid, attachment_id: Uuid) -> Result<Attachment, StorageError> {
        let attachments = self
            .state
            .attachments
            .get_mut(&journal_id)
            .ok_or(StorageError::AttachmentNotFound(attachment_id))?;
        let pos = attachments
            .iter()
            .position(|a| a.id == attachment_id)
            .ok_or(StorageError::AttachmentNotFound(attachment_id))?;
        Ok(attachments.remove(pos))
    }

    fn insert_audit(&mut self, record: &NewAuditRecord) -> Result<u64, StorageError> {
        self.state.audit_seq += 1;
        let id = self.state.audit_seq;
        self.state.audit.push(AuditRecord {
            id,
            journal_id: record.journal_id,
            action: record.action,
            actor: record.actor.clone(),
            before: record.before.clone(),
            after: record.after.clone(),
            at: record.at,
        });
        Ok(id)
    }

    fn commit(mut self: Box<Self>) -> Result<(), StorageError> {
        // Deferred check: once per touched journal, at commit time.
        let touched: Vec<Uuid> = self.touched.iter().copied().collect();
        for journal_id in touched {
            let (debit, credit) = self.state.totals(journal_id);
            if let Err(e) = check_balanced(journal_id, debit, credit) {
                tracing::warn!(%journal_id, %debit, %credit, "commit rejected: journal unbalanced");
                self.restore();
                return Err(e);
            }
        }
        self.snapshot = None;
        tracing::debug!(journals = self.touched.len(), "memory transaction committed");
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<(), StorageError> {
        self.restore();
        Ok(())
    }
}
