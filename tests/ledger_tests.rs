use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use time::macros::date;
use uuid::Uuid;

use ledgerbook::error::LedgerError;
use ledgerbook::ledger::Ledger;
use ledgerbook::storage::InMemoryStorage;
use ledgerbook_core::{
    AccountFilter, AccountType, AddAttachmentCommand, AuditAction, CreateAccountCommand,
    CreateJournalCommand, JournalFilter, LineCommand, UpdateJournalCommand,
};

fn setup() -> Ledger {
    Ledger::new(Arc::new(InMemoryStorage::seeded()))
}

fn rent(amount: Decimal) -> CreateJournalCommand {
    CreateJournalCommand {
        date: date!(2024 - 01 - 31),
        memo: Arc::from("January rent"),
        source: None,
        lines: vec![
            LineCommand::debit("5010", amount),
            LineCommand::credit("1020", amount),
        ],
    }
}

fn draft(ledger: &Ledger) -> Uuid {
    ledger.create_journal(&rent(dec!(1200)), "alice").unwrap().header.id
}

#[test]
fn test_create_journal_is_unposted_and_audited() {
    let ledger = setup();
    let journal = ledger.create_journal(&rent(dec!(1200.00)), "alice").unwrap();

    assert!(!journal.header.is_posted);
    assert!(!journal.header.is_deleted);
    assert_eq!(journal.header.created_by.as_ref(), "alice");
    assert_eq!(journal.lines.len(), 2);
    assert_eq!(journal.total_debit(), dec!(1200));

    let audit = ledger.journal_audit(journal.header.id).unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, AuditAction::Create);
    assert!(audit[0].before.is_none());
    assert_eq!(audit[0].after.as_ref().unwrap()["memo"], "January rent");
}

#[test]
fn test_unbalanced_journal_is_rejected_and_not_stored() {
    let ledger = setup();
    let mut cmd = rent(dec!(100));
    cmd.lines[1].credit = dec!(99.98);

    let err = ledger.create_journal(&cmd, "alice").unwrap_err();
    match err {
        LedgerError::Unbalanced { debit, credit, .. } => {
            assert_eq!(debit, dec!(100));
            assert_eq!(credit, dec!(99.98));
        }
        other => panic!("expected unbalanced, got {:?}", other),
    }
    assert!(ledger.list_journals(&JournalFilter::default()).unwrap().is_empty());
}

#[test]
fn test_one_cent_difference_is_tolerated() {
    let ledger = setup();
    let mut cmd = rent(dec!(100));
    cmd.lines[1].credit = dec!(99.99);
    let journal = ledger.create_journal(&cmd, "alice").unwrap();
    assert!(journal.is_balanced());
}

#[test]
fn test_line_validation() {
    let ledger = setup();

    let mut single = rent(dec!(10));
    single.lines.truncate(1);
    assert!(matches!(ledger.create_journal(&single, "alice"), Err(LedgerError::Validation(_))));

    let mut negative = rent(dec!(10));
    negative.lines[0].debit = dec!(-10);
    assert!(matches!(ledger.create_journal(&negative, "alice"), Err(LedgerError::Validation(_))));

    let mut empty_memo = rent(dec!(10));
    empty_memo.memo = Arc::from("  ");
    assert!(matches!(ledger.create_journal(&empty_memo, "alice"), Err(LedgerError::Validation(_))));

    let mut unknown = rent(dec!(10));
    unknown.lines[0].account_code = Arc::from("9999");
    assert!(matches!(ledger.create_journal(&unknown, "alice"), Err(LedgerError::Validation(_))));
}

#[test]
fn test_inactive_account_cannot_take_lines() {
    let ledger = setup();
    ledger
        .create_account(&CreateAccountCommand {
            code: Arc::from("5011"),
            name: Arc::from("Storage Unit"),
            parent_code: Some(Arc::from("5000")),
            account_type: AccountType::Expense,
        })
        .unwrap();
    ledger.deactivate_account("5011").unwrap();

    let mut cmd = rent(dec!(50));
    cmd.lines[0].account_code = Arc::from("5011");
    let err = ledger.create_journal(&cmd, "alice").unwrap_err();
    assert!(matches!(err, LedgerError::Validation(msg) if msg.contains("inactive")));
}

#[test]
fn test_standard_accounts_cannot_be_deleted() {
    let ledger = setup();
    assert!(matches!(ledger.deactivate_account("1010"), Err(LedgerError::Conflict(_))));
    assert!(matches!(ledger.deactivate_account("0000"), Err(LedgerError::NotFound(_))));
}

#[test]
fn test_account_rules() {
    let ledger = setup();
    let cmd = CreateAccountCommand {
        code: Arc::from("4200"),
        name: Arc::from("Donations"),
        parent_code: Some(Arc::from("4000")),
        account_type: AccountType::Revenue,
    };
    let account = ledger.create_account(&cmd).unwrap();
    assert!(account.is_custom);
    assert!(account.is_active);

    assert!(matches!(ledger.create_account(&cmd), Err(LedgerError::Conflict(_))));

    let wrong_type = CreateAccountCommand {
        code: Arc::from("4300"),
        parent_code: Some(Arc::from("5000")),
        ..cmd.clone()
    };
    assert!(matches!(ledger.create_account(&wrong_type), Err(LedgerError::Validation(_))));

    let orphan = CreateAccountCommand {
        code: Arc::from("4400"),
        parent_code: Some(Arc::from("4999")),
        ..cmd
    };
    assert!(matches!(ledger.create_account(&orphan), Err(LedgerError::Validation(_))));

    let revenue = ledger
        .list_accounts(&AccountFilter {
            account_type: Some(AccountType::Revenue),
            active_only: true,
        })
        .unwrap();
    assert!(revenue.iter().any(|a| a.code.as_ref() == "4200"));
    assert!(revenue.iter().all(|a| a.account_type == AccountType::Revenue));
}

#[test]
fn test_posted_journal_is_frozen_until_unposted() {
    let ledger = setup();
    let id = draft(&ledger);

    let posted = ledger.post_journal(id, "bob").unwrap();
    assert!(posted.header.is_posted);
    assert_eq!(posted.header.posted_by.as_deref(), Some("bob"));
    assert!(posted.header.posted_at.is_some());

    let edit = UpdateJournalCommand {
        memo: Some(Arc::from("Changed")),
        ..Default::default()
    };
    assert!(matches!(ledger.update_journal(id, &edit, "bob"), Err(LedgerError::Conflict(_))));
    assert!(matches!(ledger.delete_journal(id, "bob"), Err(LedgerError::Conflict(_))));
    assert!(matches!(ledger.post_journal(id, "bob"), Err(LedgerError::Conflict(_))));

    let unposted = ledger.unpost_journal(id, "admin").unwrap();
    assert!(!unposted.header.is_posted);
    assert!(unposted.header.posted_at.is_none());

    let edited = ledger.update_journal(id, &edit, "bob").unwrap();
    assert_eq!(edited.header.memo.as_ref(), "Changed");
}

#[test]
fn test_update_replaces_lines() {
    let ledger = setup();
    let id = draft(&ledger);

    let cmd = UpdateJournalCommand {
        lines: Some(vec![
            LineCommand::debit("5010", dec!(1000)),
            LineCommand::debit("5020", dec!(250.50)),
            LineCommand::credit("2100", dec!(1250.50)),
        ]),
        ..Default::default()
    };
    let updated = ledger.update_journal(id, &cmd, "alice").unwrap();
    assert_eq!(updated.lines.len(), 3);
    assert_eq!(updated.total_credit(), dec!(1250.50));

    let bad = UpdateJournalCommand {
        lines: Some(vec![
            LineCommand::debit("5010", dec!(1000)),
            LineCommand::credit("2100", dec!(900)),
        ]),
        ..Default::default()
    };
    assert!(matches!(ledger.update_journal(id, &bad, "alice"), Err(LedgerError::Unbalanced { .. })));
    assert_eq!(ledger.get_journal(id).unwrap().lines.len(), 3);

    let audit = ledger.journal_audit(id).unwrap();
    let actions: Vec<AuditAction> = audit.iter().map(|r| r.action).collect();
    assert_eq!(actions, vec![AuditAction::Create, AuditAction::Update]);
    assert_eq!(audit[1].before.as_ref().unwrap()["lines"].as_array().map(|l| l.len()), Some(2));
    assert_eq!(audit[1].after.as_ref().unwrap()["lines"].as_array().map(|l| l.len()), Some(3));
}

#[test]
fn test_soft_delete_and_restore() {
    let ledger = setup();
    let keep = draft(&ledger);
    let gone = draft(&ledger);

    let deleted = ledger.delete_journal(gone, "alice").unwrap();
    assert!(deleted.header.is_deleted);
    assert!(matches!(ledger.delete_journal(gone, "alice"), Err(LedgerError::Conflict(_))));
    assert!(matches!(ledger.post_journal(gone, "alice"), Err(LedgerError::Conflict(_))));

    let visible = ledger.list_journals(&JournalFilter::default()).unwrap();
    assert_eq!(visible.iter().map(|j| j.id).collect::<Vec<_>>(), vec![keep]);

    let all = ledger
        .list_journals(&JournalFilter {
            include_deleted: true,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(all.len(), 2);

    let actions: Vec<AuditAction> = ledger.journal_audit(gone).unwrap().iter().map(|r| r.action).collect();
    assert_eq!(actions, vec![AuditAction::Create, AuditAction::Delete]);

    let restored = ledger.restore_journal(gone, "admin").unwrap();
    assert!(!restored.header.is_deleted);
    assert!(matches!(ledger.restore_journal(gone, "admin"), Err(LedgerError::Conflict(_))));
}

#[test]
fn test_attachments() {
    let ledger = setup();
    let id = draft(&ledger);

    let cmd = AddAttachmentCommand {
        file_name: Arc::from("receipt.pdf"),
        content_type: Some(Arc::from("application/pdf")),
        size_bytes: 20_480,
        storage_path: Arc::from("receipts/2024/01/receipt.pdf"),
    };
    let attachment = ledger.add_attachment(id, &cmd, "alice").unwrap();
    assert_eq!(attachment.journal_id, id);
    assert_eq!(ledger.get_journal(id).unwrap().attachments.len(), 1);

    let bad = AddAttachmentCommand {
        size_bytes: -1,
        ..cmd.clone()
    };
    assert!(matches!(ledger.add_attachment(id, &bad, "alice"), Err(LedgerError::Validation(_))));

    let removed = ledger.remove_attachment(id, attachment.id, "alice").unwrap();
    assert_eq!(removed.id, attachment.id);
    assert!(ledger.get_journal(id).unwrap().attachments.is_empty());
    assert!(matches!(
        ledger.remove_attachment(id, attachment.id, "alice"),
        Err(LedgerError::NotFound(_))
    ));

    ledger.delete_journal(id, "alice").unwrap();
    assert!(matches!(ledger.add_attachment(id, &cmd, "alice"), Err(LedgerError::Conflict(_))));

    let actions: Vec<AuditAction> = ledger.journal_audit(id).unwrap().iter().map(|r| r.action).collect();
    assert_eq!(
        actions,
        vec![AuditAction::Create, AuditAction::Attach, AuditAction::Detach, AuditAction::Delete]
    );
}

#[test]
fn test_trial_balance_balances() {
    let ledger = setup();

    let capital = CreateJournalCommand {
        date: date!(2024 - 01 - 01),
        memo: Arc::from("Owner contribution"),
        source: None,
        lines: vec![
            LineCommand::debit("1020", dec!(10000)),
            LineCommand::credit("3100", dec!(10000)),
        ],
    };
    let sale = CreateJournalCommand {
        date: date!(2024 - 01 - 15),
        memo: Arc::from("Invoice 1001"),
        source: Some(Arc::from("manual")),
        lines: vec![
            LineCommand::debit("1100", dec!(2500)),
            LineCommand::credit("4010", dec!(2500)),
        ],
    };
    for cmd in [&capital, &sale, &rent(dec!(1200))] {
        let journal = ledger.create_journal(cmd, "alice").unwrap();
        ledger.post_journal(journal.header.id, "alice").unwrap();
    }
    // Drafts and later journals stay out of the report.
    ledger.create_journal(&rent(dec!(999)), "alice").unwrap();
    let february = CreateJournalCommand {
        date: date!(2024 - 02 - 01),
        ..rent(dec!(1200))
    };
    let feb = ledger.create_journal(&february, "alice").unwrap();
    ledger.post_journal(feb.header.id, "alice").unwrap();

    let report = ledger.trial_balance(date!(2024 - 01 - 31)).unwrap();
    assert_eq!(report.total_debit(), report.total_credit());
    assert_eq!(report.total_debit(), dec!(12500));

    let checking = report.items.iter().find(|i| i.account_code.as_ref() == "1020").unwrap();
    assert_eq!(checking.debit, dec!(8800));
    let sales = report.items.iter().find(|i| i.account_code.as_ref() == "4010").unwrap();
    assert_eq!(sales.credit, dec!(2500));
}

#[test]
fn test_list_journals_filters() {
    let ledger = setup();
    let a = draft(&ledger);
    let b = ledger
        .create_journal(
            &CreateJournalCommand {
                date: date!(2024 - 03 - 01),
                memo: Arc::from("Card fee"),
                source: Some(Arc::from("import")),
                lines: vec![
                    LineCommand::debit("5900", dec!(4.50)),
                    LineCommand::credit("2100", dec!(4.50)),
                ],
            },
            "alice",
        )
        .unwrap()
        .header
        .id;
    ledger.post_journal(a, "alice").unwrap();

    let by_account = ledger
        .list_journals(&JournalFilter {
            account_code: Some(Arc::from("5900")),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(by_account.iter().map(|j| j.id).collect::<Vec<_>>(), vec![b]);

    let posted = ledger
        .list_journals(&JournalFilter {
            posted: Some(true),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(posted.iter().map(|j| j.id).collect::<Vec<_>>(), vec![a]);

    let march = ledger
        .list_journals(&JournalFilter {
            from: Some(date!(2024 - 03 - 01)),
            source: Some(Arc::from("import")),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(march.len(), 1);

    let bad_page = JournalFilter {
        limit: 0,
        ..Default::default()
    };
    assert!(matches!(ledger.list_journals(&bad_page), Err(LedgerError::Validation(_))));
}

#[test]
fn test_oversized_amounts_are_rejected_without_breaking_the_ledger() {
    let ledger = setup();
    let huge = Decimal::from_i128_with_scale(50_000_000_000_000_000_000_000_000_000, 0);
    let cmd = CreateJournalCommand {
        date: date!(2024 - 01 - 31),
        memo: Arc::from("Too large"),
        source: None,
        lines: vec![
            LineCommand::debit("5010", huge),
            LineCommand::debit("5010", huge),
            LineCommand::credit("1020", huge),
            LineCommand::credit("1020", huge),
        ],
    };
    assert!(matches!(ledger.create_journal(&cmd, "alice"), Err(LedgerError::Validation(_))));

    let err = ledger.create_journal(&rent(dec!(1000000000000)), "alice").unwrap_err();
    assert!(matches!(err, LedgerError::Validation(msg) if msg.contains("exceeds")));

    let id = draft(&ledger);
    let update = UpdateJournalCommand {
        lines: Some(cmd.lines.clone()),
        ..Default::default()
    };
    assert!(matches!(ledger.update_journal(id, &update, "alice"), Err(LedgerError::Validation(_))));

    let journals = ledger.list_journals(&JournalFilter::default()).unwrap();
    assert_eq!(journals.len(), 1);
    assert_eq!(journals[0].id, id);
    ledger.create_journal(&rent(dec!(999999999999.99)), "alice").unwrap();
}
