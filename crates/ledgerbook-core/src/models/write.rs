use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Deserialize;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use super::{AccountType, AuditAction, LineTags};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreateAccountCommand {
    pub code: Arc<str>,
    pub name: Arc<str>,
    #[serde(default)]
    pub parent_code: Option<Arc<str>>,
    pub account_type: AccountType,
}

/// Absent fields are left unchanged. `parent_code: Some(None)` detaches the
/// account from its parent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UpdateAccountCommand {
    #[serde(default)]
    pub name: Option<Arc<str>>,
    #[serde(default, deserialize_with = "double_option")]
    pub parent_code: Option<Option<Arc<str>>>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LineCommand {
    pub account_code: Arc<str>,
    #[serde(default)]
    pub debit: Decimal,
    #[serde(default)]
    pub credit: Decimal,
    #[serde(default)]
    pub description: Option<Arc<str>>,
    #[serde(flatten)]
    pub tags: LineTags,
}

impl LineCommand {
    pub fn debit(account_code: &str, amount: Decimal) -> Self {
        Self {
            account_code: Arc::from(account_code),
            debit: amount,
            credit: Decimal::ZERO,
            description: None,
            tags: LineTags::default(),
        }
    }

    pub fn credit(account_code: &str, amount: Decimal) -> Self {
        Self {
            account_code: Arc::from(account_code),
            debit: Decimal::ZERO,
            credit: amount,
            description: None,
            tags: LineTags::default(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(Arc::from(description));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreateJournalCommand {
    pub date: Date,
    pub memo: Arc<str>,
    #[serde(default)]
    pub source: Option<Arc<str>>,
    pub lines: Vec<LineCommand>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UpdateJournalCommand {
    #[serde(default)]
    pub date: Option<Date>,
    #[serde(default)]
    pub memo: Option<Arc<str>>,
    #[serde(default)]
    pub source: Option<Arc<str>>,
    /// When present, replaces every line of the journal.
    #[serde(default)]
    pub lines: Option<Vec<LineCommand>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AddAttachmentCommand {
    pub file_name: Arc<str>,
    #[serde(default)]
    pub content_type: Option<Arc<str>>,
    #[serde(default)]
    pub size_bytes: i64,
    pub storage_path: Arc<str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditRecord {
    pub journal_id: Uuid,
    pub action: AuditAction,
    pub actor: Arc<str>,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub at: OffsetDateTime,
}

fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<Arc<str>>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<Arc<str>>::deserialize(deserializer).map(Some)
}
