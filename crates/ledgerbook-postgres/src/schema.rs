//! DDL and schema-generation detection.
//!
//! Older deployments named the journal date column `transaction_date` and
//! predate the posting/soft-delete columns. Every query that touches the
//! journal header is built from a [`SchemaProfile`] read from
//! `information_schema`, so one binary serves all generations.

use std::collections::BTreeSet;
use std::str::FromStr;

use postgres::Client;
use rust_decimal::Decimal;
use uuid::Uuid;

use ledgerbook_core::StorageError;

/// SQLSTATE raised by `enforce_journal_balance()`.
pub const UNBALANCED_SQLSTATE: &str = "LB001";

pub const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS accounts (
        code TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        parent_code TEXT REFERENCES accounts(code),
        account_type TEXT NOT NULL
            CHECK (account_type IN ('asset', 'liability', 'equity', 'revenue', 'expense')),
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        is_custom BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );

    CREATE TABLE IF NOT EXISTS journal (
        id UUID PRIMARY KEY,
        date DATE NOT NULL,
        memo TEXT NOT NULL,
        created_by TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );

    ALTER TABLE journal ADD COLUMN IF NOT EXISTS source TEXT;
    ALTER TABLE journal ADD COLUMN IF NOT EXISTS is_posted BOOLEAN NOT NULL DEFAULT FALSE;
    ALTER TABLE journal ADD COLUMN IF NOT EXISTS is_deleted BOOLEAN NOT NULL DEFAULT FALSE;
    ALTER TABLE journal ADD COLUMN IF NOT EXISTS updated_at TIMESTAMPTZ NOT NULL DEFAULT now();
    ALTER TABLE journal ADD COLUMN IF NOT EXISTS posted_at TIMESTAMPTZ;
    ALTER TABLE journal ADD COLUMN IF NOT EXISTS posted_by TEXT;

    CREATE TABLE IF NOT EXISTS journal_lines (
        id BIGSERIAL PRIMARY KEY,
        journal_id UUID NOT NULL REFERENCES journal(id),
        account_code TEXT NOT NULL REFERENCES accounts(code),
        debit NUMERIC(14, 2) NOT NULL DEFAULT 0 CHECK (debit >= 0),
        credit NUMERIC(14, 2) NOT NULL DEFAULT 0 CHECK (credit >= 0),
        description TEXT,
        category TEXT,
        location TEXT,
        vendor TEXT,
        funder TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_journal_lines_journal ON journal_lines(journal_id);
    CREATE INDEX IF NOT EXISTS idx_journal_lines_account ON journal_lines(account_code);

    CREATE TABLE IF NOT EXISTS journal_attachments (
        id UUID PRIMARY KEY,
        journal_id UUID NOT NULL REFERENCES journal(id),
        file_name TEXT NOT NULL,
        content_type TEXT,
        size_bytes BIGINT NOT NULL DEFAULT 0,
        storage_path TEXT NOT NULL,
        uploaded_by TEXT NOT NULL,
        uploaded_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );

    CREATE INDEX IF NOT EXISTS idx_journal_attachments_journal ON journal_attachments(journal_id);

    CREATE TABLE IF NOT EXISTS journal_audit (
        id BIGSERIAL PRIMARY KEY,
        journal_id UUID NOT NULL REFERENCES journal(id),
        action TEXT NOT NULL,
        actor TEXT NOT NULL,
        before_state JSONB,
        after_state JSONB,
        recorded_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );

    CREATE INDEX IF NOT EXISTS idx_journal_audit_journal ON journal_audit(journal_id);

    CREATE OR REPLACE FUNCTION enforce_journal_balance() RETURNS trigger AS $$
    DECLARE
        affected UUID[];
        jid UUID;
        total_debit NUMERIC;
        total_credit NUMERIC;
    BEGIN
        IF TG_OP = 'INSERT' THEN
            affected := ARRAY[NEW.journal_id];
        ELSIF TG_OP = 'DELETE' THEN
            affected := ARRAY[OLD.journal_id];
        ELSE
            affected := ARRAY[OLD.journal_id, NEW.journal_id];
        END IF;

        FOREACH jid IN ARRAY affected LOOP
            SELECT COALESCE(SUM(debit), 0), COALESCE(SUM(credit), 0)
              INTO total_debit, total_credit
              FROM journal_lines
             WHERE journal_id = jid;

            IF ABS(total_debit - total_credit) > 0.01 THEN
                RAISE EXCEPTION 'journal % is unbalanced', jid
                    USING ERRCODE = 'LB001',
                          DETAIL = format('journal_id=%s;debit=%s;credit=%s', jid, total_debit, total_credit);
            END IF;
        END LOOP;

        RETURN NULL;
    END;
    $$ LANGUAGE plpgsql;

    DROP TRIGGER IF EXISTS journal_balance_check ON journal_lines;

    CREATE CONSTRAINT TRIGGER journal_balance_check
        AFTER INSERT OR UPDATE OR DELETE ON journal_lines
        DEFERRABLE INITIALLY DEFERRED
        FOR EACH ROW EXECUTE FUNCTION enforce_journal_balance();
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateColumn {
    Date,
    TransactionDate,
}

impl DateColumn {
    pub fn as_sql(&self) -> &'static str {
        match self {
            DateColumn::Date => "date",
            DateColumn::TransactionDate => "transaction_date",
        }
    }
}

const LIFECYCLE_COLUMNS: &[&str] = &["source", "is_posted", "is_deleted", "updated_at", "posted_at", "posted_by"];

/// Shape of the `journal` table in the connected database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaProfile {
    pub date_column: DateColumn,
    columns: BTreeSet<String>,
}

impl SchemaProfile {
    /// The shape `SCHEMA_SQL` creates.
    pub fn current() -> Self {
        let mut columns: BTreeSet<String> = ["id", "date", "memo", "created_by", "created_at"]
            .iter()
            .map(|c| c.to_string())
            .collect();
        columns.extend(LIFECYCLE_COLUMNS.iter().map(|c| c.to_string()));
        Self {
            date_column: DateColumn::Date,
            columns,
        }
    }

    pub fn from_columns<S: AsRef<str>>(columns: &[S]) -> Result<Self, StorageError> {
        let columns: BTreeSet<String> = columns.iter().map(|c| c.as_ref().to_ascii_lowercase()).collect();
        let date_column = if columns.contains("date") {
            DateColumn::Date
        } else if columns.contains("transaction_date") {
            DateColumn::TransactionDate
        } else {
            return Err(StorageError::Schema(
                "journal table has neither a date nor a transaction_date column".to_string(),
            ));
        };
        Ok(Self { date_column, columns })
    }

    /// Reads the profile from `information_schema`. `None` when the journal
    /// table does not exist yet.
    pub fn introspect(client: &mut Client) -> Result<Option<Self>, StorageError> {
        let rows = client
            .query(
                "SELECT column_name::TEXT FROM information_schema.columns
                 WHERE table_schema = current_schema() AND table_name = 'journal'",
                &[],
            )
            .map_err(|e| StorageError::Other(e.to_string()))?;
        if rows.is_empty() {
            return Ok(None);
        }
        let columns: Vec<String> = rows.iter().map(|r| r.get(0)).collect();
        Self::from_columns(&columns).map(Some)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains(name)
    }

    pub fn has_soft_delete(&self) -> bool {
        self.has_column("is_deleted")
    }

    pub fn has_lifecycle(&self) -> bool {
        LIFECYCLE_COLUMNS.iter().all(|c| self.has_column(c))
    }

    /// Writes need the lifecycle columns; reads fall back without them.
    pub fn require_lifecycle(&self) -> Result<(), StorageError> {
        if self.has_lifecycle() {
            Ok(())
        } else {
            Err(StorageError::Schema(
                "journal table is missing lifecycle columns; run migrations".to_string(),
            ))
        }
    }

    pub fn date(&self) -> &'static str {
        self.date_column.as_sql()
    }

    fn column_or(&self, alias: &str, name: &str, fallback: &str) -> String {
        if self.has_column(name) {
            format!("{}.{}", alias, name)
        } else {
            fallback.to_string()
        }
    }

    /// `WHERE` fragment hiding soft-deleted journals.
    pub fn not_deleted(&self, alias: &str) -> String {
        if self.has_soft_delete() {
            format!("NOT {}.is_deleted", alias)
        } else {
            "TRUE".to_string()
        }
    }

    /// `WHERE` fragment restricting to posted journals.
    pub fn posted(&self, alias: &str) -> String {
        if self.has_column("is_posted") {
            format!("{}.is_posted", alias)
        } else {
            "FALSE".to_string()
        }
    }

    /// Select list matching the order `header_from_row` reads.
    pub fn header_columns(&self, alias: &str) -> String {
        format!(
            "{a}.id, {a}.{date}, {a}.memo, {source}, {posted}, {deleted}, {a}.created_by, {a}.created_at, {updated}, {posted_at}, {posted_by}",
            a = alias,
            date = self.date(),
            source = self.column_or(alias, "source", "NULL::TEXT"),
            posted = self.column_or(alias, "is_posted", "FALSE"),
            deleted = self.column_or(alias, "is_deleted", "FALSE"),
            updated = self.column_or(alias, "updated_at", &format!("{}.created_at", alias)),
            posted_at = self.column_or(alias, "posted_at", "NULL::TIMESTAMPTZ"),
            posted_by = self.column_or(alias, "posted_by", "NULL::TEXT"),
        )
    }
}

/// Parses the DETAIL of an `LB001` error: `journal_id=..;debit=..;credit=..`.
pub fn parse_unbalanced_detail(detail: &str) -> Option<(Uuid, Decimal, Decimal)> {
    let mut journal_id = None;
    let mut debit = None;
    let mut credit = None;
    for part in detail.split(';') {
        let (key, value) = part.split_once('=')?;
        match key.trim() {
            "journal_id" => journal_id = Uuid::parse_str(value.trim()).ok(),
            "debit" => debit = Decimal::from_str(value.trim()).ok(),
            "credit" => credit = Decimal::from_str(value.trim()).ok(),
            _ => {}
        }
    }
    Some((journal_id?, debit?, credit?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_column_preferred_over_transaction_date() {
        let profile = SchemaProfile::from_columns(&["id", "date", "transaction_date", "memo"]).unwrap();
        assert_eq!(profile.date_column, DateColumn::Date);
    }

    #[test]
    fn legacy_transaction_date_is_detected() {
        let profile = SchemaProfile::from_columns(&["id", "TRANSACTION_DATE", "memo", "created_by", "created_at"]).unwrap();
        assert_eq!(profile.date(), "transaction_date");
        assert!(!profile.has_soft_delete());
        assert!(!profile.has_lifecycle());
        assert!(profile.require_lifecycle().is_err());
        assert_eq!(profile.not_deleted("j"), "TRUE");
        assert_eq!(profile.posted("j"), "FALSE");
    }

    #[test]
    fn missing_date_column_is_a_schema_error() {
        let err = SchemaProfile::from_columns(&["id", "memo"]).unwrap_err();
        assert!(matches!(err, StorageError::Schema(_)));
    }

    #[test]
    fn header_columns_fall_back_for_legacy_tables() {
        let legacy = SchemaProfile::from_columns(&["id", "transaction_date", "memo", "created_by", "created_at"]).unwrap();
        let cols = legacy.header_columns("j");
        assert!(cols.contains("j.transaction_date"));
        assert!(cols.contains("NULL::TEXT"));
        assert!(cols.contains("j.created_at, j.created_at"));

        let current = SchemaProfile::current();
        let cols = current.header_columns("j");
        assert!(cols.contains("j.date"));
        assert!(cols.contains("j.is_deleted"));
        assert!(current.has_lifecycle());
        assert_eq!(current.not_deleted("j"), "NOT j.is_deleted");
    }

    #[test]
    fn unbalanced_detail_round_trips_trigger_format() {
        let jid = Uuid::new_v4();
        let detail = format!("journal_id={};debit=100.00;credit=99.50", jid);
        let (id, debit, credit) = parse_unbalanced_detail(&detail).unwrap();
        assert_eq!(id, jid);
        assert_eq!(debit, Decimal::new(10000, 2));
        assert_eq!(credit, Decimal::new(9950, 2));
        assert!(parse_unbalanced_detail("garbage").is_none());
    }
}
