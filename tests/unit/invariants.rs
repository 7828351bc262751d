//! The quantified invariants of spec.md §8, checked directly against the
//! order book and the exchange coordinator.

use exchange_engine::prelude::*;

fn limit(side: Side, participant: &str, qty: u64, price: u128) -> Order {
    Order::new(OrderId::new(), participant, side, OrderKind::Limit, qty, 0, Some(price), None)
        .unwrap()
}

/// 1. FIFO: resting orders at a price level keep insertion order.
#[test]
fn fifo_order_is_preserved_at_a_price_level() {
    let mut book = OrderBook::new("BTC/USD", false);
    let first = limit(Side::Sell, "m1", 5, 100);
    let second = limit(Side::Sell, "m2", 5, 100);
    let first_id = first.id;
    let second_id = second.id;
    book.submit(first).unwrap();
    book.submit(second).unwrap();

    let outcome = book.submit(limit(Side::Buy, "taker", 6, 100)).unwrap();
    assert_eq!(outcome.trades[0].sell_order_id, first_id);
    assert_eq!(outcome.trades[0].qty, 5);
    assert_eq!(outcome.trades[1].sell_order_id, second_id);
    assert_eq!(outcome.trades[1].qty, 1);
}

/// 2. Best-price correctness: the book never rests a crossed spread.
#[test]
fn best_bid_never_meets_or_exceeds_best_ask() {
    let mut book = OrderBook::new("BTC/USD", false);
    book.submit(limit(Side::Buy, "b", 5, 99)).unwrap();
    book.submit(limit(Side::Sell, "a", 5, 101)).unwrap();
    let bid = book.best_bid().unwrap();
    let ask = book.best_ask().unwrap();
    assert!(bid < ask);
}

/// 3. Order-map integrity: every pending order round-trips through
/// `order_info` with an equal remaining quantity.
#[test]
fn every_pending_order_is_present_in_the_order_map_with_matching_quantity() {
    let mut book = OrderBook::new("BTC/USD", false);
    book.submit(limit(Side::Buy, "b1", 5, 99)).unwrap();
    book.submit(limit(Side::Sell, "a1", 3, 105)).unwrap();

    for order in book.pending_orders() {
        let found = book.order_info(order.id).expect("must be findable");
        assert_eq!(found.remaining_qty, order.remaining_qty);
    }
}

/// 4. Conservation: total buy-side fill quantity equals total sell-side
/// fill quantity, and summed positions across participants net to zero.
#[test]
fn fills_conserve_quantity_and_positions_net_to_zero() {
    let mut ex = ExchangeCoordinator::new();
    ex.register_user("a", "A", 0, 1).unwrap();
    ex.register_user("b", "B", 0, 1).unwrap();
    ex.register_user("c", "C", 0, 1).unwrap();
    ex.add_instrument("BTC/USD", false);

    ex.place_order("a", "BTC/USD", OrderKind::Limit, Side::Sell, 10, Some(100), None)
        .unwrap();
    ex.place_order("b", "BTC/USD", OrderKind::Limit, Side::Buy, 6, Some(100), None)
        .unwrap();
    ex.place_order("c", "BTC/USD", OrderKind::Limit, Side::Buy, 4, Some(100), None)
        .unwrap();

    let trades = ex.trade_log("BTC/USD").unwrap().trades();
    let buy_total: u64 = trades.iter().map(|t| t.qty).sum();
    let sell_total: u64 = trades.iter().map(|t| t.qty).sum();
    assert_eq!(buy_total, sell_total);

    let a = ex
        .get_positions("a")
        .unwrap()
        .into_iter()
        .find(|(i, _)| i == "BTC/USD")
        .map(|(_, q)| q)
        .unwrap_or(0);
    let b = ex
        .get_positions("b")
        .unwrap()
        .into_iter()
        .find(|(i, _)| i == "BTC/USD")
        .map(|(_, q)| q)
        .unwrap_or(0);
    let c = ex
        .get_positions("c")
        .unwrap()
        .into_iter()
        .find(|(i, _)| i == "BTC/USD")
        .map(|(_, q)| q)
        .unwrap_or(0);
    assert_eq!(a + b + c, 0);
}

/// 5. Cash accounting: the sum of every participant's cash delta plus the
/// exchange's accumulated fee balance is zero, starting from a balanced
/// state.
#[test]
fn cash_changes_and_fees_sum_to_zero() {
    let mut ex = ExchangeCoordinator::new().with_fee_schedule(FeeSchedule::new(2));
    ex.register_user("buyer", "Buyer", 0, 1).unwrap();
    ex.register_user("seller", "Seller", 0, 1).unwrap();
    ex.add_instrument("BTC/USD", false);

    ex.place_order(
        "seller",
        "BTC/USD",
        OrderKind::Limit,
        Side::Sell,
        10,
        Some(100),
        None,
    )
    .unwrap();
    ex.place_order(
        "buyer",
        "BTC/USD",
        OrderKind::Limit,
        Side::Buy,
        10,
        Some(100),
        None,
    )
    .unwrap();

    let buyer_cash = ex.get_cash("buyer").unwrap();
    let seller_cash = ex.get_cash("seller").unwrap();
    let fees = ex.accumulated_fees() as i128;
    assert_eq!(buyer_cash + seller_cash + fees, 0);
}

/// 6. Quota non-breach: |position| + outstanding never exceeds the
/// configured limit on either side after admission.
#[test]
fn position_plus_outstanding_never_exceeds_the_quota() {
    let mut ex = ExchangeCoordinator::new().with_quota_limit(20);
    ex.register_user("u", "U", 0, 1).unwrap();
    ex.register_user("maker", "Maker", 0, 1).unwrap();
    ex.add_instrument("BTC/USD", false);

    ex.place_order("maker", "BTC/USD", OrderKind::Limit, Side::Sell, 50, Some(100), None)
        .unwrap();
    ex.place_order("u", "BTC/USD", OrderKind::Limit, Side::Buy, 12, Some(100), None)
        .unwrap();
    ex.place_order("u", "BTC/USD", OrderKind::Limit, Side::Buy, 8, Some(90), None)
        .unwrap();

    let position = ex
        .get_positions("u")
        .unwrap()
        .into_iter()
        .find(|(i, _)| i == "BTC/USD")
        .map(|(_, q)| q)
        .unwrap_or(0);
    let quota = ex.get_remaining_quota("u", "BTC/USD").unwrap();
    let outstanding_buy = 20 - position.unsigned_abs() as i64 - quota.buy as i64;
    assert!(position.unsigned_abs() as i64 + outstanding_buy <= 20);

    let err = ex
        .place_order("u", "BTC/USD", OrderKind::Limit, Side::Buy, 1, Some(80), None)
        .unwrap_err();
    assert_eq!(err.code(), "ORDER_EXCEEDS_POSITION_LIMIT");
}

/// 7. Round-trip: submitting a non-crossing limit then cancelling it
/// restores exact book snapshot equality.
#[test]
fn submit_then_cancel_restores_the_book_snapshot() {
    let mut book = OrderBook::new("BTC/USD", false);
    book.submit(limit(Side::Buy, "b", 5, 95)).unwrap();
    let before = book.snapshot();

    let order = limit(Side::Buy, "b2", 3, 90);
    let id = order.id;
    book.submit(order).unwrap();
    book.cancel(id);

    let after = book.snapshot();
    assert_eq!(before.checksum(), after.checksum());
}

/// 8. Idempotent cancel: cancelling twice is safe and the second call is
/// a no-op reporting "not found" like any other unknown id.
#[test]
fn cancelling_twice_is_safe() {
    let mut book = OrderBook::new("BTC/USD", false);
    let order = limit(Side::Buy, "b", 5, 100);
    let id = order.id;
    book.submit(order).unwrap();

    assert!(book.cancel(id).is_some());
    assert!(book.cancel(id).is_none());
}
