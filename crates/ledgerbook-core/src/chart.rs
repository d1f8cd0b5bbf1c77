use std::sync::Arc;

use time::OffsetDateTime;

use crate::models::{Account, AccountType};

/// Standard chart of accounts seeded by migrations. Parents precede children.
const STANDARD_CHART: &[(&str, &str, Option<&str>, AccountType)] = &[
    ("1000", "Assets", None, AccountType::Asset),
    ("1010", "Cash", Some("1000"), AccountType::Asset),
    ("1020", "Checking", Some("1000"), AccountType::Asset),
    ("1100", "Accounts Receivable", Some("1000"), AccountType::Asset),
    ("1500", "Equipment", Some("1000"), AccountType::Asset),
    ("2000", "Liabilities", None, AccountType::Liability),
    ("2010", "Accounts Payable", Some("2000"), AccountType::Liability),
    ("2100", "Credit Card", Some("2000"), AccountType::Liability),
    ("3000", "Equity", None, AccountType::Equity),
    ("3100", "Owner's Capital", Some("3000"), AccountType::Equity),
    ("3900", "Retained Earnings", Some("3000"), AccountType::Equity),
    ("4000", "Revenue", None, AccountType::Revenue),
    ("4010", "Sales", Some("4000"), AccountType::Revenue),
    ("4100", "Grants", Some("4000"), AccountType::Revenue),
    ("5000", "Expenses", None, AccountType::Expense),
    ("5010", "Rent", Some("5000"), AccountType::Expense),
    ("5020", "Utilities", Some("5000"), AccountType::Expense),
    ("5030", "Office Supplies", Some("5000"), AccountType::Expense),
    ("5100", "Payroll", Some("5000"), AccountType::Expense),
    ("5900", "Bank Fees", Some("5000"), AccountType::Expense),
];

pub fn standard_accounts() -> Vec<Account> {
    let now = OffsetDateTime::now_utc();
    STANDARD_CHART
        .iter()
        .map(|(code, name, parent, account_type)| Account {
            code: Arc::from(*code),
            name: Arc::from(*name),
            parent_code: parent.map(Arc::from),
            account_type: *account_type,
            is_active: true,
            is_custom: false,
            created_at: now,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn parents_are_seeded_first_and_share_type() {
        let accounts = standard_accounts();
        let mut seen = HashSet::new();
        for account in &accounts {
            if let Some(parent) = &account.parent_code {
                assert!(seen.contains(parent), "{} seeded before parent {}", account.code, parent);
                let parent = accounts.iter().find(|a| &a.code == parent).unwrap();
                assert_eq!(parent.account_type, account.account_type);
            }
            assert!(!account.is_custom);
            seen.insert(account.code.clone());
        }
    }
}
