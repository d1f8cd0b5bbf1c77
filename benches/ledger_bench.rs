use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rust_decimal::Decimal;
use time::macros::date;

use ledgerbook::ledger::Ledger;
use ledgerbook::storage::InMemoryStorage;
use ledgerbook_core::{CreateJournalCommand, LineCommand};

fn setup() -> Ledger {
    Ledger::new(Arc::new(InMemoryStorage::seeded()))
}

fn sale(i: u32) -> CreateJournalCommand {
    let amount = Decimal::new(10_000 + i as i64, 2);
    CreateJournalCommand {
        date: date!(2024 - 01 - 15),
        memo: Arc::from(format!("Invoice {}", i).as_str()),
        source: None,
        lines: vec![
            LineCommand::debit("1100", amount),
            LineCommand::credit("4010", amount),
        ],
    }
}

fn seed_data(ledger: &Ledger, count: u32) {
    for i in 0..count {
        let journal = ledger.create_journal(&sale(i), "bench").unwrap();
        ledger.post_journal(journal.header.id, "bench").unwrap();
    }
}

fn bench_create_journal(c: &mut Criterion) {
    let ledger = setup();
    let cmd = sale(1);
    c.bench_function("create_journal", |b| {
        b.iter(|| ledger.create_journal(black_box(&cmd), "bench").unwrap())
    });
}

fn bench_post_journal(c: &mut Criterion) {
    let ledger = setup();
    c.bench_function("create_and_post_journal", |b| {
        let mut i = 0;
        b.iter(|| {
            i += 1;
            let journal = ledger.create_journal(&sale(i), "bench").unwrap();
            ledger.post_journal(black_box(journal.header.id), "bench").unwrap()
        })
    });
}

fn bench_trial_balance(c: &mut Criterion) {
    let ledger = setup();
    seed_data(&ledger, 1_000);
    c.bench_function("trial_balance_1000_journals", |b| {
        b.iter(|| ledger.trial_balance(black_box(date!(2024 - 12 - 31))).unwrap())
    });
}

criterion_group!(benches, bench_create_journal, bench_post_journal, bench_trial_balance);
criterion_main!(benches);
