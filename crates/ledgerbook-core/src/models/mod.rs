use std::{fmt::Display, str::FromStr, sync::Arc};

use prettytable::{row, Table};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::storage::StorageError;

pub mod read;
pub mod write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Asset => "asset",
            AccountType::Liability => "liability",
            AccountType::Equity => "equity",
            AccountType::Revenue => "revenue",
            AccountType::Expense => "expense",
        }
    }

    /// Debit-normal accounts grow with debits.
    pub fn is_debit_normal(&self) -> bool {
        matches!(self, AccountType::Asset | AccountType::Expense)
    }
}

impl Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asset" => Ok(AccountType::Asset),
            "liability" => Ok(AccountType::Liability),
            "equity" => Ok(AccountType::Equity),
            "revenue" | "income" => Ok(AccountType::Revenue),
            "expense" => Ok(AccountType::Expense),
            other => Err(StorageError::Other(format!("unknown account type: {}", other))),
        }
    }
}

/// A node in the chart of accounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub code: Arc<str>,
    pub name: Arc<str>,
    pub parent_code: Option<Arc<str>>,
    pub account_type: AccountType,
    pub is_active: bool,
    pub is_custom: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineTags {
    #[serde(default)]
    pub category: Option<Arc<str>>,
    #[serde(default)]
    pub location: Option<Arc<str>>,
    #[serde(default)]
    pub vendor: Option<Arc<str>>,
    #[serde(default)]
    pub funder: Option<Arc<str>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalHeader {
    pub id: Uuid,
    pub date: Date,
    pub memo: Arc<str>,
    pub source: Option<Arc<str>>,
    pub is_posted: bool,
    pub is_deleted: bool,
    pub created_by: Arc<str>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub posted_at: Option<OffsetDateTime>,
    pub posted_by: Option<Arc<str>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalLine {
    pub id: u64,
    pub journal_id: Uuid,
    pub account_code: Arc<str>,
    pub debit: Decimal,
    pub credit: Decimal,
    pub description: Option<Arc<str>>,
    #[serde(flatten)]
    pub tags: LineTags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub journal_id: Uuid,
    pub file_name: Arc<str>,
    pub content_type: Option<Arc<str>>,
    pub size_bytes: i64,
    pub storage_path: Arc<str>,
    pub uploaded_by: Arc<str>,
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Create,
    Update,
    Post,
    Unpost,
    Delete,
    Restore,
    Attach,
    Detach,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Post => "post",
            AuditAction::Unpost => "unpost",
            AuditAction::Delete => "delete",
            AuditAction::Restore => "restore",
            AuditAction::Attach => "attach",
            AuditAction::Detach => "detach",
        }
    }
}

impl FromStr for AuditAction {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(AuditAction::Create),
            "update" => Ok(AuditAction::Update),
            "post" => Ok(AuditAction::Post),
            "unpost" => Ok(AuditAction::Unpost),
            "delete" => Ok(AuditAction::Delete),
            "restore" => Ok(AuditAction::Restore),
            "attach" => Ok(AuditAction::Attach),
            "detach" => Ok(AuditAction::Detach),
            other => Err(StorageError::Other(format!("unknown audit action: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: u64,
    pub journal_id: Uuid,
    pub action: AuditAction,
    pub actor: Arc<str>,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

/// A journal header together with everything it owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalDetail {
    #[serde(flatten)]
    pub header: JournalHeader,
    pub lines: Vec<JournalLine>,
    pub attachments: Vec<Attachment>,
}

impl JournalDetail {
    pub fn total_debit(&self) -> Decimal {
        self.lines.iter().map(|l| l.debit).sum()
    }

    pub fn total_credit(&self) -> Decimal {
        self.lines.iter().map(|l| l.credit).sum()
    }

    pub fn is_balanced(&self) -> bool {
        crate::balance::is_balanced(self.total_debit(), self.total_credit())
    }

    /// JSON image stored in the audit trail.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrialBalanceItem {
    pub account_code: Arc<str>,
    pub account_name: Arc<str>,
    pub account_type: AccountType,
    pub debit: Decimal,
    pub credit: Decimal,
}

impl TrialBalanceItem {
    /// Nets the totals on the account's normal side and shows the result in
    /// that column. A negative net flips to the other column.
    pub fn from_totals(account_code: Arc<str>, account_name: Arc<str>, account_type: AccountType, total_debit: Decimal, total_credit: Decimal) -> Self {
        let (debit, credit) = if account_type.is_debit_normal() {
            let net = total_debit - total_credit;
            if net >= Decimal::ZERO {
                (net, Decimal::ZERO)
            } else {
                (Decimal::ZERO, -net)
            }
        } else {
            let net = total_credit - total_debit;
            if net >= Decimal::ZERO {
                (Decimal::ZERO, net)
            } else {
                (-net, Decimal::ZERO)
            }
        };
        Self {
            account_code,
            account_name,
            account_type,
            debit,
            credit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialBalance {
    pub as_of: Date,
    pub items: Vec<TrialBalanceItem>,
}

impl TrialBalance {
    pub fn total_debit(&self) -> Decimal {
        self.items.iter().map(|i| i.debit).sum()
    }

    pub fn total_credit(&self) -> Decimal {
        self.items.iter().map(|i| i.credit).sum()
    }
}

impl Display for TrialBalance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut table = Table::new();
        table.add_row(row!["Account", "Name", "Type", "Debit", "Credit"]);
        table.add_empty_row();

        for item in &self.items {
            let debit = if item.debit.is_zero() { String::new() } else { item.debit.to_string() };
            let credit = if item.credit.is_zero() { String::new() } else { item.credit.to_string() };
            table.add_row(row![item.account_code, item.account_name, item.account_type, debit, credit]);
        }

        table.add_empty_row();
        table.add_row(row!["Total", "", "", self.total_debit(), self.total_credit()]);

        write!(f, "\nTrial balance as of {}\n{}\n", self.as_of, table)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use time::macros::date;

    use super::*;

    #[test]
    fn trial_balance_item_uses_net_column() {
        let item = TrialBalanceItem::from_totals(Arc::from("1010"), Arc::from("Cash"), AccountType::Asset, dec!(500), dec!(120));
        assert_eq!(item.debit, dec!(380));
        assert_eq!(item.credit, Decimal::ZERO);

        let item = TrialBalanceItem::from_totals(Arc::from("2010"), Arc::from("Payables"), AccountType::Liability, dec!(50), dec!(300));
        assert_eq!(item.debit, Decimal::ZERO);
        assert_eq!(item.credit, dec!(250));
    }

    #[test]
    fn trial_balance_item_flips_against_normal_side() {
        // Overdrawn bank account.
        let item = TrialBalanceItem::from_totals(Arc::from("1020"), Arc::from("Bank"), AccountType::Asset, dec!(100), dec!(140));
        assert_eq!(item.debit, Decimal::ZERO);
        assert_eq!(item.credit, dec!(40));

        // Refunds exceeding sales.
        let item = TrialBalanceItem::from_totals(Arc::from("4010"), Arc::from("Sales"), AccountType::Revenue, dec!(90), dec!(60));
        assert_eq!(item.debit, dec!(30));
        assert_eq!(item.credit, Decimal::ZERO);

        let item = TrialBalanceItem::from_totals(Arc::from("5010"), Arc::from("Rent"), AccountType::Expense, dec!(25), dec!(25));
        assert_eq!((item.debit, item.credit), (Decimal::ZERO, Decimal::ZERO));

        assert!(AccountType::Expense.is_debit_normal());
        assert!(!AccountType::Equity.is_debit_normal());
    }

    #[test]
    fn account_type_parses_legacy_income() {
        assert_eq!("Income".parse::<AccountType>().unwrap(), AccountType::Revenue);
        assert_eq!("EXPENSE".parse::<AccountType>().unwrap(), AccountType::Expense);
        assert!("bogus".parse::<AccountType>().is_err());
    }

    #[test]
    fn trial_balance_display_lists_totals() {
        let tb = TrialBalance {
            as_of: date!(2024 - 03 - 31),
            items: vec![
                TrialBalanceItem::from_totals(Arc::from("1010"), Arc::from("Cash"), AccountType::Asset, dec!(100), dec!(0)),
                TrialBalanceItem::from_totals(Arc::from("4010"), Arc::from("Sales"), AccountType::Revenue, dec!(0), dec!(100)),
            ],
        };
        let out = tb.to_string();
        assert!(out.contains("2024-03-31"));
        assert!(out.contains("Cash"));
        assert!(out.contains("Total"));
    }

    #[test]
    fn journal_detail_totals() {
        let jid = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();
        let line = |id: u64, code: &str, debit: Decimal, credit: Decimal| JournalLine {
            id,
            journal_id: jid,
            account_code: Arc::from(code),
            debit,
            credit,
            description: None,
            tags: LineTags::default(),
        };
        let detail = JournalDetail {
            header: JournalHeader {
                id: jid,
                date: date!(2024 - 01 - 02),
                memo: Arc::from("Rent"),
                source: None,
                is_posted: false,
                is_deleted: false,
                created_by: Arc::from("tester"),
                created_at: now,
                updated_at: now,
                posted_at: None,
                posted_by: None,
            },
            lines: vec![line(1, "5010", dec!(1200.00), dec!(0)), line(2, "1020", dec!(0), dec!(1200.00))],
            attachments: vec![],
        };
        assert_eq!(detail.total_debit(), dec!(1200));
        assert!(detail.is_balanced());
        let snap = detail.snapshot();
        assert_eq!(snap["memo"], "Rent");
        assert_eq!(snap["lines"].as_array().map(|l| l.len()), Some(2));
    }
}
