use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use postgres::{error::SqlState, types::ToSql, Client, NoTls, Row};
use rust_decimal::Decimal;
use time::Date;
use uuid::Uuid;

use ledgerbook_core::{
    chart::standard_accounts, Account, AccountFilter, AccountType, Attachment, AuditAction,
    AuditRecord, JournalDetail, JournalFilter, JournalHeader, JournalLine, LedgerTxn, LineCommand,
    LineTags, NewAuditRecord, StorageBackend, StorageError, TrialBalance, TrialBalanceItem,
};

pub mod schema;

pub use schema::{DateColumn, SchemaProfile};

use schema::{parse_unbalanced_detail, SCHEMA_SQL, UNBALANCED_SQLSTATE};

pub struct PostgresStorage {
    client: Mutex<Client>,
    profile: RwLock<SchemaProfile>,
}

impl PostgresStorage {
    /// Connects and reads the journal table's shape. No DDL is issued; call
    /// [`StorageBackend::migrate`] for that.
    pub fn connect(connection_string: &str) -> Result<Self, StorageError> {
        let mut client = Client::connect(connection_string, NoTls)
            .map_err(|e| StorageError::Other(format!("PostgreSQL connection failed: {}", e)))?;

        let profile = match SchemaProfile::introspect(&mut client)? {
            Some(profile) => profile,
            None => {
                tracing::warn!("journal table not found; migrations pending");
                SchemaProfile::current()
            }
        };
        tracing::info!(
            date_column = profile.date(),
            soft_delete = profile.has_soft_delete(),
            lifecycle = profile.has_lifecycle(),
            "PostgreSQL schema profile loaded"
        );

        Ok(Self {
            client: Mutex::new(client),
            profile: RwLock::new(profile),
        })
    }

    pub fn profile(&self) -> SchemaProfile {
        match self.profile.read() {
            Ok(p) => p.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Client>, StorageError> {
        self.client
            .lock()
            .map_err(|_| StorageError::Other("PostgreSQL client lock poisoned".to_string()))
    }
}

fn db_err(e: postgres::Error) -> StorageError {
    if e.code() == Some(&SqlState::from_code(UNBALANCED_SQLSTATE)) {
        let parsed = e
            .as_db_error()
            .and_then(|db| db.detail())
            .and_then(parse_unbalanced_detail);
        if let Some((journal_id, debit, credit)) = parsed {
            return StorageError::Unbalanced {
                journal_id,
                debit,
                credit,
            };
        }
    }
    StorageError::Other(e.to_string())
}

fn opt_str(row: &Row, idx: usize) -> Option<Arc<str>> {
    row.get::<_, Option<String>>(idx).map(|s| Arc::from(s.as_str()))
}

fn str_col(row: &Row, idx: usize) -> Arc<str> {
    let s: String = row.get(idx);
    Arc::from(s.as_str())
}

const ACCOUNT_COLUMNS: &str = "code, name, parent_code, account_type, is_active, is_custom, created_at";

fn account_from_row(row: &Row) -> Result<Account, StorageError> {
    let account_type: String = row.get(3);
    Ok(Account {
        code: str_col(row, 0),
        name: str_col(row, 1),
        parent_code: opt_str(row, 2),
        account_type: account_type.parse::<AccountType>()?,
        is_active: row.get(4),
        is_custom: row.get(5),
        created_at: row.get(6),
    })
}

fn header_from_row(row: &Row) -> JournalHeader {
    JournalHeader {
        id: row.get(0),
        date: row.get(1),
        memo: str_col(row, 2),
        source: opt_str(row, 3),
        is_posted: row.get(4),
        is_deleted: row.get(5),
        created_by: str_col(row, 6),
        created_at: row.get(7),
        updated_at: row.get(8),
        posted_at: row.get(9),
        posted_by: opt_str(row, 10),
    }
}

const LINE_COLUMNS: &str = "id, journal_id, account_code, debit, credit, description, category, location, vendor, funder";

fn line_from_row(row: &Row) -> JournalLine {
    let id: i64 = row.get(0);
    JournalLine {
        id: id as u64,
        journal_id: row.get(1),
        account_code: str_col(row, 2),
        debit: row.get(3),
        credit: row.get(4),
        description: opt_str(row, 5),
        tags: LineTags {
            category: opt_str(row, 6),
            location: opt_str(row, 7),
            vendor: opt_str(row, 8),
            funder: opt_str(row, 9),
        },
    }
}

const ATTACHMENT_COLUMNS: &str = "id, journal_id, file_name, content_type, size_bytes, storage_path, uploaded_by, uploaded_at";

fn attachment_from_row(row: &Row) -> Attachment {
    Attachment {
        id: row.get(0),
        journal_id: row.get(1),
        file_name: str_col(row, 2),
        content_type: opt_str(row, 3),
        size_bytes: row.get(4),
        storage_path: str_col(row, 5),
        uploaded_by: str_col(row, 6),
        uploaded_at: row.get(7),
    }
}

fn audit_from_row(row: &Row) -> Result<AuditRecord, StorageError> {
    let id: i64 = row.get(0);
    let action: String = row.get(2);
    Ok(AuditRecord {
        id: id as u64,
        journal_id: row.get(1),
        action: action.parse::<AuditAction>()?,
        actor: str_col(row, 3),
        before: row.get(4),
        after: row.get(5),
        at: row.get(6),
    })
}

fn fetch_account(client: &mut Client, code: &str) -> Result<Account, StorageError> {
    let row = client
        .query_opt(
            &format!("SELECT {} FROM accounts WHERE code = $1", ACCOUNT_COLUMNS),
            &[&code],
        )
        .map_err(db_err)?
        .ok_or_else(|| StorageError::AccountNotFound(code.to_string()))?;
    account_from_row(&row)
}

fn fetch_journal(client: &mut Client, profile: &SchemaProfile, id: Uuid, for_update: bool) -> Result<JournalDetail, StorageError> {
    let query = format!(
        "SELECT {} FROM journal j WHERE j.id = $1{}",
        profile.header_columns("j"),
        if for_update { " FOR UPDATE" } else { "" }
    );
    let row = client
        .query_opt(&query, &[&id])
        .map_err(db_err)?
        .ok_or(StorageError::JournalNotFound(id))?;
    let header = header_from_row(&row);

    let lines = client
        .query(
            &format!("SELECT {} FROM journal_lines WHERE journal_id = $1 ORDER BY id", LINE_COLUMNS),
            &[&id],
        )
        .map_err(db_err)?
        .iter()
        .map(line_from_row)
        .collect();

    let attachments = client
        .query(
            &format!(
                "SELECT {} FROM journal_attachments WHERE journal_id = $1 ORDER BY uploaded_at, id",
                ATTACHMENT_COLUMNS
            ),
            &[&id],
        )
        .map_err(db_err)?
        .iter()
        .map(attachment_from_row)
        .collect();

    Ok(JournalDetail {
        header,
        lines,
        attachments,
    })
}

impl StorageBackend for PostgresStorage {
    fn begin(&self) -> Result<Box<dyn LedgerTxn + '_>, StorageError> {
        let profile = self.profile();
        let mut client = self.lock()?;
        client.batch_execute("BEGIN").map_err(db_err)?;
        tracing::debug!("PostgreSQL transaction started");
        Ok(Box::new(PgTxn {
            client,
            profile,
            finished: false,
        }))
    }

    fn migrate(&self) -> Result<(), StorageError> {
        let mut client = self.lock()?;
        client.batch_execute(SCHEMA_SQL).map_err(db_err)?;

        let profile = SchemaProfile::introspect(&mut client)?
            .ok_or_else(|| StorageError::Schema("journal table missing after migration".to_string()))?;
        client
            .batch_execute(&format!(
                "CREATE INDEX IF NOT EXISTS idx_journal_date ON journal({})",
                profile.date()
            ))
            .map_err(db_err)?;

        let mut seeded = 0;
        for account in standard_accounts() {
            seeded += client
                .execute(
                    "INSERT INTO accounts (code, name, parent_code, account_type, is_active, is_custom)
                     VALUES ($1, $2, $3, $4, TRUE, FALSE)
                     ON CONFLICT (code) DO NOTHING",
                    &[
                        &account.code.as_ref(),
                        &account.name.as_ref(),
                        &account.parent_code.as_deref(),
                        &account.account_type.as_str(),
                    ],
                )
                .map_err(db_err)?;
        }

        tracing::info!(date_column = profile.date(), seeded, "PostgreSQL schema migrated");
        match self.profile.write() {
            Ok(mut p) => *p = profile,
            Err(poisoned) => *poisoned.into_inner() = profile,
        }
        Ok(())
    }

    fn get_account(&self, code: &str) -> Result<Account, StorageError> {
        let mut client = self.lock()?;
        fetch_account(&mut client, code)
    }

    fn list_accounts(&self, filter: &AccountFilter) -> Result<Vec<Account>, StorageError> {
        let mut client = self.lock()?;
        let account_type = filter.account_type.map(|t| t.as_str());
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM accounts
                     WHERE ($1::TEXT IS NULL OR account_type = $1)
                       AND (NOT $2 OR is_active)
                     ORDER BY code",
                    ACCOUNT_COLUMNS
                ),
                &[&account_type, &filter.active_only],
            )
            .map_err(db_err)?;
        rows.iter().map(account_from_row).collect()
    }

    fn get_journal(&self, id: Uuid) -> Result<JournalDetail, StorageError> {
        let profile = self.profile();
        let mut client = self.lock()?;
        fetch_journal(&mut client, &profile, id, false)
    }

    fn list_journals(&self, filter: &JournalFilter) -> Result<Vec<JournalHeader>, StorageError> {
        let profile = self.profile();
        let mut client = self.lock()?;

        let account_code = filter.account_code.as_deref();
        let source = filter.source.as_deref();
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();

        if !filter.include_deleted {
            clauses.push(profile.not_deleted("j"));
        }
        if let Some(from) = filter.from.as_ref() {
            params.push(from);
            clauses.push(format!("j.{} >= ${}", profile.date(), params.len()));
        }
        if let Some(to) = filter.to.as_ref() {
            params.push(to);
            clauses.push(format!("j.{} <= ${}", profile.date(), params.len()));
        }
        if let Some(posted) = filter.posted {
            clauses.push(if posted {
                profile.posted("j")
            } else {
                format!("NOT ({})", profile.posted("j"))
            });
        }
        if let Some(code) = account_code.as_ref() {
            params.push(code);
            clauses.push(format!(
                "EXISTS (SELECT 1 FROM journal_lines l WHERE l.journal_id = j.id AND l.account_code = ${})",
                params.len()
            ));
        }
        if let Some(source) = source.as_ref() {
            if profile.has_column("source") {
                params.push(source);
                clauses.push(format!("j.source = ${}", params.len()));
            } else {
                clauses.push("FALSE".to_string());
            }
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        params.push(&filter.limit);
        let limit_idx = params.len();
        params.push(&filter.offset);
        let offset_idx = params.len();

        let query = format!(
            "SELECT {} FROM journal j {} ORDER BY j.{}, j.created_at, j.id LIMIT ${} OFFSET ${}",
            profile.header_columns("j"),
            where_sql,
            profile.date(),
            limit_idx,
            offset_idx
        );

        let rows = client.query(&query, &params).map_err(db_err)?;
        Ok(rows.iter().map(header_from_row).collect())
    }

    fn journal_audit(&self, id: Uuid) -> Result<Vec<AuditRecord>, StorageError> {
        let mut client = self.lock()?;
        let exists: bool = client
            .query_one("SELECT EXISTS (SELECT 1 FROM journal WHERE id = $1)", &[&id])
            .map_err(db_err)?
            .get(0);
        if !exists {
            return Err(StorageError::JournalNotFound(id));
        }
        let rows = client
            .query(
                "SELECT id, journal_id, action, actor, before_state, after_state, recorded_at
                 FROM journal_audit WHERE journal_id = $1 ORDER BY id",
                &[&id],
            )
            .map_err(db_err)?;
        rows.iter().map(audit_from_row).collect()
    }

    fn trial_balance(&self, as_of: Date) -> Result<TrialBalance, StorageError> {
        let profile = self.profile();
        let mut client = self.lock()?;
        let query = format!(
            "SELECT a.code, a.name, a.account_type,
                    COALESCE(SUM(l.debit), 0), COALESCE(SUM(l.credit), 0)
             FROM journal_lines l
             JOIN journal j ON j.id = l.journal_id
             JOIN accounts a ON a.code = l.account_code
             WHERE {} AND {} AND j.{} <= $1
             GROUP BY a.code, a.name, a.account_type
             ORDER BY a.code",
            profile.posted("j"),
            profile.not_deleted("j"),
            profile.date()
        );
        let rows = client.query(&query, &[&as_of]).map_err(db_err)?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let account_type: String = row.get(2);
            let debit: Decimal = row.get(3);
            let credit: Decimal = row.get(4);
            items.push(TrialBalanceItem::from_totals(
                str_col(&row, 0),
                str_col(&row, 1),
                account_type.parse::<AccountType>()?,
                debit,
                credit,
            ));
        }
        Ok(TrialBalance { as_of, items })
    }
}

/// Holds the connection for the lifetime of the transaction. The balance
/// trigger is deferred, so line writes never fail for balance reasons; only
/// `COMMIT` does.
struct PgTxn<'a> {
    client: MutexGuard<'a, Client>,
    profile: SchemaProfile,
    finished: bool,
}

impl Drop for PgTxn<'_> {
    fn drop(&mut self) {
        if !self.finished {
            match self.client.batch_execute("ROLLBACK") {
                Ok(()) => tracing::debug!("PostgreSQL transaction rolled back"),
                Err(e) => tracing::warn!(error = %e, "PostgreSQL rollback failed"),
            }
        }
    }
}

impl LedgerTxn for PgTxn<'_> {
    fn get_account(&mut self, code: &str) -> Result<Account, StorageError> {
        fetch_account(&mut self.client, code)
    }

    fn insert_account(&mut self, account: &Account) -> Result<(), StorageError> {
        let result = self.client.execute(
            "INSERT INTO accounts (code, name, parent_code, account_type, is_active, is_custom, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
            &[
                &account.code.as_ref(),
                &account.name.as_ref(),
                &account.parent_code.as_deref(),
                &account.account_type.as_str(),
                &account.is_active,
                &account.is_custom,
                &account.created_at,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
                Err(StorageError::AccountExists(account.code.to_string()))
            }
            Err(e) if e.code() == Some(&SqlState::FOREIGN_KEY_VIOLATION) => Err(StorageError::AccountNotFound(
                account.parent_code.as_deref().unwrap_or_default().to_string(),
            )),
            Err(e) => Err(db_err(e)),
        }
    }

    fn update_account(&mut self, account: &Account) -> Result<(), StorageError> {
        let updated = self
            .client
            .execute(
                "UPDATE accounts SET name = $2, parent_code = $3, is_active = $4 WHERE code = $1",
                &[
                    &account.code.as_ref(),
                    &account.name.as_ref(),
                    &account.parent_code.as_deref(),
                    &account.is_active,
                ],
            )
            .map_err(db_err)?;
        if updated == 0 {
            return Err(StorageError::AccountNotFound(account.code.to_string()));
        }
        Ok(())
    }

    fn load_journal(&mut self, id: Uuid) -> Result<JournalDetail, StorageError> {
        let profile = self.profile.clone();
        fetch_journal(&mut self.client, &profile, id, true)
    }

    fn insert_journal(&mut self, header: &JournalHeader) -> Result<(), StorageError> {
        self.profile.require_lifecycle()?;
        let query = format!(
            "INSERT INTO journal (id, {}, memo, source, is_posted, is_deleted, created_by, created_at, updated_at, posted_at, posted_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            self.profile.date()
        );
        self.client
            .execute(
                &query,
                &[
                    &header.id,
                    &header.date,
                    &header.memo.as_ref(),
                    &header.source.as_deref(),
                    &header.is_posted,
                    &header.is_deleted,
                    &header.created_by.as_ref(),
                    &header.created_at,
                    &header.updated_at,
                    &header.posted_at,
                    &header.posted_by.as_deref(),
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn update_journal(&mut self, header: &JournalHeader) -> Result<(), StorageError> {
        self.profile.require_lifecycle()?;
        let query = format!(
            "UPDATE journal SET {} = $2, memo = $3, source = $4, is_posted = $5, is_deleted = $6,
                    updated_at = $7, posted_at = $8, posted_by = $9
             WHERE id = $1",
            self.profile.date()
        );
        let updated = self
            .client
            .execute(
                &query,
                &[
                    &header.id,
                    &header.date,
                    &header.memo.as_ref(),
                    &header.source.as_deref(),
                    &header.is_posted,
                    &header.is_deleted,
                    &header.updated_at,
                    &header.posted_at,
                    &header.posted_by.as_deref(),
                ],
            )
            .map_err(db_err)?;
        if updated == 0 {
            return Err(StorageError::JournalNotFound(header.id));
        }
        Ok(())
    }

    fn insert_line(&mut self, journal_id: Uuid, line: &LineCommand) -> Result<u64, StorageError> {
        let result = self.client.query_one(
            "INSERT INTO journal_lines
                (journal_id, account_code, debit, credit, description, category, location, vendor, funder)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING id",
            &[
                &journal_id,
                &line.account_code.as_ref(),
                &line.debit,
                &line.credit,
                &line.description.as_deref(),
                &line.tags.category.as_deref(),
                &line.tags.location.as_deref(),
                &line.tags.vendor.as_deref(),
                &line.tags.funder.as_deref(),
            ],
        );
        match result {
            Ok(row) => {
                let id: i64 = row.get(0);
                Ok(id as u64)
            }
            Err(e) if e.code() == Some(&SqlState::FOREIGN_KEY_VIOLATION) => {
                Err(StorageError::AccountNotFound(line.account_code.to_string()))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    fn delete_lines(&mut self, journal_id: Uuid) -> Result<usize, StorageError> {
        let deleted = self
            .client
            .execute("DELETE FROM journal_lines WHERE journal_id = $1", &[&journal_id])
            .map_err(db_err)?;
        Ok(deleted as usize)
    }

    fn insert_attachment(&mut self, attachment: &Attachment) -> Result<(), StorageError> {
        self.client
            .execute(
                "INSERT INTO journal_attachments
                    (id, journal_id, file_name, content_type, size_bytes, storage_path, uploaded_by, uploaded_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                &[
                    &attachment.id,
                    &attachment.journal_id,
                    &attachment.file_name.as_ref(),
                    &attachment.content_type.as_deref(),
                    &attachment.size_bytes,
                    &attachment.storage_path.as_ref(),
                    &attachment.uploaded_by.as_ref(),
                    &attachment.uploaded_at,
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn delete_attachment(&mut self, journal_id: Uuid, attachment_id: Uuid) -> Result<Attachment, StorageError> {
        let row = self
            .client
            .query_opt(
                &format!(
                    "DELETE FROM journal_attachments WHERE journal_id = $1 AND id = $2 RETURNING {}",
                    ATTACHMENT_COLUMNS
                ),
                &[&journal_id, &attachment_id],
            )
            .map_err(db_err)?
            .ok_or(StorageError::AttachmentNotFound(attachment_id))?;
        Ok(attachment_from_row(&row))
    }

    fn insert_audit(&mut self, record: &NewAuditRecord) -> Result<u64, StorageError> {
        let row = self
            .client
            .query_one(
                "INSERT INTO journal_audit (journal_id, action, actor, before_state, after_state, recorded_at)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 RETURNING id",
                &[
                    &record.journal_id,
                    &record.action.as_str(),
                    &record.actor.as_ref(),
                    &record.before,
                    &record.after,
                    &record.at,
                ],
            )
            .map_err(db_err)?;
        let id: i64 = row.get(0);
        Ok(id as u64)
    }

    fn commit(mut self: Box<Self>) -> Result<(), StorageError> {
        // A failed COMMIT has already rolled the transaction back.
        self.finished = true;
        match self.client.batch_execute("COMMIT") {
            Ok(()) => {
                tracing::debug!("PostgreSQL transaction committed");
                Ok(())
            }
            Err(e) => {
                let err = db_err(e);
                if let StorageError::Unbalanced { journal_id, debit, credit } = &err {
                    tracing::warn!(%journal_id, %debit, %credit, "commit rejected by balance trigger");
                }
                Err(err)
            }
        }
    }

    fn rollback(mut self: Box<Self>) -> Result<(), StorageError> {
        self.finished = true;
        self.client.batch_execute("ROLLBACK").map_err(db_err)?;
        tracing::debug!("PostgreSQL transaction rolled back");
        Ok(())
    }
}
