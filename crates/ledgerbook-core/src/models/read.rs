use std::sync::Arc;

use time::Date;

use super::AccountType;

pub const DEFAULT_PAGE_SIZE: i64 = 100;
pub const MAX_PAGE_SIZE: i64 = 1000;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountFilter {
    pub account_type: Option<AccountType>,
    pub active_only: bool,
}

/// Journal listing criteria. Results are ordered by date, then creation time.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalFilter {
    pub from: Option<Date>,
    pub to: Option<Date>,
    pub posted: Option<bool>,
    pub include_deleted: bool,
    pub account_code: Option<Arc<str>>,
    pub source: Option<Arc<str>>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for JournalFilter {
    fn default() -> Self {
        Self {
            from: None,
            to: None,
            posted: None,
            include_deleted: false,
            account_code: None,
            source: None,
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}
