use dms_ledger::{FifoLedger, LedgerError, plan_consumption};
use dms_storage::{LocalStore, MemoryStore, Store};
use dms_types::{NewStockLot, ProductId, Quantity, StockBalance, limits};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

fn sqlite_ledger() -> FifoLedger {
    let store: Arc<dyn Store> = Arc::new(LocalStore::open_in_memory().unwrap());
    FifoLedger::new(store)
}

fn lot(product: ProductId, qty: Decimal, cost: Decimal, received_at: i64) -> NewStockLot {
    NewStockLot {
        product_id: product,
        quantity: qty,
        unit_cost: cost,
        batch_no: None,
        expiry: None,
        received_at,
    }
}

// ── FIFO consumption ─────────────────────────────────────────────

#[tokio::test]
async fn consumption_drains_oldest_lot_first() {
    let ledger = sqlite_ledger();
    let p = ProductId(1);
    let first = ledger.add_lot(lot(p, dec!(100), dec!(10), 1_000)).await.unwrap();
    let second = ledger.add_lot(lot(p, dec!(50), dec!(12), 2_000)).await.unwrap();

    let consumed = ledger.consume(p, dec!(120)).await.unwrap();
    assert_eq!(consumed.plan.cost, dec!(1240));

    let lots = ledger.lots(p).await.unwrap();
    assert_eq!(lots[0].id, first.id);
    assert_eq!(lots[0].remaining, dec!(0));
    assert_eq!(lots[1].id, second.id);
    assert_eq!(lots[1].remaining, dec!(30));

    let balance = ledger.balance(p).await.unwrap();
    assert_eq!(
        balance,
        StockBalance {
            product_id: p,
            quantity: dec!(30),
            weighted_average_cost: dec!(12),
        }
    );
}

#[tokio::test]
async fn shortfall_changes_nothing() {
    let ledger = sqlite_ledger();
    let p = ProductId(1);
    ledger.add_lot(lot(p, dec!(100), dec!(10), 1)).await.unwrap();
    ledger.add_lot(lot(p, dec!(50), dec!(12), 2)).await.unwrap();
    let before = ledger.lots(p).await.unwrap();

    let err = ledger.consume(p, dec!(200)).await.unwrap_err();
    match err {
        LedgerError::InsufficientStock {
            product_id,
            available,
            requested,
        } => {
            assert_eq!(product_id, p);
            assert_eq!(available, dec!(150));
            assert_eq!(requested, dec!(200));
        }
        other => panic!("expected InsufficientStock, got {other:?}"),
    }

    assert_eq!(ledger.lots(p).await.unwrap(), before);
}

#[tokio::test]
async fn exact_consumption_leaves_zero_balance() {
    let ledger = sqlite_ledger();
    let p = ProductId(2);
    ledger.add_lot(lot(p, dec!(5), dec!(3), 1)).await.unwrap();
    ledger.consume(p, dec!(5)).await.unwrap();

    assert_eq!(ledger.balance(p).await.unwrap(), StockBalance::empty(p));
    assert_eq!(ledger.lots(p).await.unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_product_has_empty_balance() {
    let ledger = sqlite_ledger();
    assert_eq!(ledger.balance(ProductId(77)).await.unwrap(), StockBalance::empty(ProductId(77)));
}

#[tokio::test]
async fn lot_validation_is_enforced() {
    let ledger = sqlite_ledger();
    let zero = ledger.add_lot(lot(ProductId(1), dec!(0), dec!(1), 1)).await;
    assert!(matches!(zero, Err(LedgerError::Validation(_))));
    let negative = ledger.add_lot(lot(ProductId(1), dec!(1), dec!(-0.01), 1)).await;
    assert!(matches!(negative, Err(LedgerError::Validation(_))));
}

#[tokio::test]
async fn received_at_orders_lots_not_insertion() {
    let ledger = sqlite_ledger();
    let p = ProductId(3);
    let newer = ledger.add_lot(lot(p, dec!(10), dec!(20), 5_000)).await.unwrap();
    let older = ledger.add_lot(lot(p, dec!(10), dec!(10), 1_000)).await.unwrap();

    let consumed = ledger.consume(p, dec!(10)).await.unwrap();
    assert_eq!(consumed.plan.drains[0].lot_id, older.id);
    assert_eq!(ledger.balance(p).await.unwrap().weighted_average_cost, newer.unit_cost);
}

// ── Magnitudes ───────────────────────────────────────────────────

#[tokio::test]
async fn oversized_lots_are_rejected_not_overflowed() {
    let ledger = sqlite_ledger();
    let p = ProductId(1);
    let huge = dec!(1000000000000000);

    let err = ledger.add_lot(lot(p, huge, huge, 1)).await.unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));
    let err = ledger.consume(p, huge).await.unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));

    assert_eq!(ledger.balance(p).await.unwrap(), StockBalance::empty(p));
}

#[tokio::test]
async fn largest_accepted_lots_still_balance_and_consume() {
    let ledger = sqlite_ledger();
    let p = ProductId(1);
    for at in 1..=3 {
        ledger
            .add_lot(lot(p, limits::MAX_QUANTITY, limits::MAX_AMOUNT, at))
            .await
            .unwrap();
    }

    let balance = ledger.balance(p).await.unwrap();
    assert_eq!(balance.quantity, limits::MAX_QUANTITY * dec!(3));
    assert_eq!(balance.weighted_average_cost, limits::MAX_AMOUNT);

    let consumed = ledger.consume(p, limits::MAX_QUANTITY).await.unwrap();
    assert_eq!(consumed.plan.cost, limits::MAX_QUANTITY * limits::MAX_AMOUNT);
}

// ── Concurrency ──────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_consumers_never_oversell() {
    let ledger = sqlite_ledger();
    let p = ProductId(9);
    ledger.add_lot(lot(p, dec!(10), dec!(1), 1)).await.unwrap();
    ledger.add_lot(lot(p, dec!(10), dec!(1), 2)).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move { ledger.consume(p, dec!(3)).await }));
    }

    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(LedgerError::InsufficientStock { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(ok, 6);
    assert_eq!(ledger.balance(p).await.unwrap().quantity, dec!(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_products_proceed_independently() {
    let ledger = sqlite_ledger();
    for id in 1..=4 {
        ledger.add_lot(lot(ProductId(id), dec!(4), dec!(1), 1)).await.unwrap();
    }

    let mut handles = Vec::new();
    for id in 1..=4 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move { ledger.consume(ProductId(id), dec!(4)).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    for id in 1..=4 {
        assert!(ledger.balance(ProductId(id)).await.unwrap().quantity.is_zero());
    }
}

// ── Properties ───────────────────────────────────────────────────

fn qty() -> impl Strategy<Value = Quantity> {
    (1i64..=500).prop_map(|n| Decimal::new(n, 1))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Σ initial = Σ remaining + Σ consumed, whatever the sequence.
    #[test]
    fn quantity_is_conserved(
        lots in prop::collection::vec((qty(), 0i64..1_000), 1..8),
        requests in prop::collection::vec(qty(), 1..12),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
            let ledger = FifoLedger::new(store);
            let p = ProductId(1);

            let mut initial = Decimal::ZERO;
            for (q, at) in &lots {
                ledger.add_lot(lot(p, *q, dec!(1), *at)).await.unwrap();
                initial += *q;
            }

            let mut consumed = Decimal::ZERO;
            for request in &requests {
                match ledger.consume(p, *request).await {
                    Ok(c) => consumed += c.plan.drains.iter().map(|d| d.taken()).sum::<Decimal>(),
                    Err(LedgerError::InsufficientStock { .. }) => {}
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }

            let remaining: Decimal = ledger.lots(p).await.unwrap().iter().map(|l| l.remaining).sum();
            prop_assert_eq!(initial, remaining + consumed);
            for l in ledger.lots(p).await.unwrap() {
                prop_assert!(l.remaining >= Decimal::ZERO);
                prop_assert!(l.remaining <= l.initial_quantity);
            }
            Ok(())
        })?;
    }

    /// A successful plan takes exactly the requested quantity.
    #[test]
    fn plan_takes_exactly_the_request(
        sizes in prop::collection::vec(qty(), 1..8),
        request in qty(),
    ) {
        let lots: Vec<_> = sizes
            .iter()
            .enumerate()
            .map(|(i, q)| dms_types::StockLot {
                id: dms_types::LotId(i as i64 + 1),
                product_id: ProductId(1),
                initial_quantity: *q,
                remaining: *q,
                unit_cost: dec!(2),
                batch_no: None,
                expiry: None,
                received_at: i as i64,
                stamps: Default::default(),
            })
            .collect();
        let available: Decimal = sizes.iter().copied().sum();

        match plan_consumption(ProductId(1), &lots, request) {
            Ok(plan) => {
                prop_assert!(request <= available);
                let taken: Decimal = plan.drains.iter().map(|d| d.taken()).sum();
                prop_assert_eq!(taken, request);
                prop_assert_eq!(plan.cost, request * dec!(2));
            }
            Err(LedgerError::InsufficientStock { .. }) => prop_assert!(request > available),
            Err(other) => prop_assert!(false, "unexpected error: {}", other),
        }
    }
}
