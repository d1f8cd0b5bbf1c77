//! The balanced-journal rule shared by every backend.
//!
//! A journal is balanced when its debits and credits differ by no more than
//! one cent. Backends apply this once per touched journal when a transaction
//! commits, never per inserted line.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::storage::StorageError;

/// 0.01
pub const BALANCE_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

pub fn is_balanced(total_debit: Decimal, total_credit: Decimal) -> bool {
    (total_debit - total_credit).abs() <= BALANCE_TOLERANCE
}

pub fn check_balanced(journal_id: Uuid, total_debit: Decimal, total_credit: Decimal) -> Result<(), StorageError> {
    if is_balanced(total_debit, total_credit) {
        Ok(())
    } else {
        Err(StorageError::Unbalanced {
            journal_id,
            debit: total_debit,
            credit: total_credit,
        })
    }
}
