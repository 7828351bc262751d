//! The literal end-to-end scenarios from spec.md §8.

use exchange_engine::prelude::*;

fn exchange() -> ExchangeCoordinator {
    ExchangeCoordinator::new()
}

fn register(ex: &mut ExchangeCoordinator, id: &str, permission: u8) {
    ex.register_user(id, id, 1_000_000, permission).unwrap();
}

/// S1 — FIFO and price-improvement.
#[test]
fn s1_fifo_and_price_improvement() {
    let mut ex = exchange();
    register(&mut ex, "a", 3);
    register(&mut ex, "b", 3);
    register(&mut ex, "c", 3);
    register(&mut ex, "taker", 1);
    ex.add_instrument("BTC/USD", false);

    ex.place_order("a", "BTC/USD", OrderKind::Limit, Side::Sell, 5, Some(101), None)
        .unwrap();
    ex.place_order("b", "BTC/USD", OrderKind::Limit, Side::Sell, 5, Some(102), None)
        .unwrap();
    ex.place_order("c", "BTC/USD", OrderKind::Limit, Side::Sell, 5, Some(103), None)
        .unwrap();

    ex.place_order(
        "taker",
        "BTC/USD",
        OrderKind::Limit,
        Side::Buy,
        13,
        Some(102),
        None,
    )
    .unwrap();

    let trades = ex.trade_log("BTC/USD").unwrap().trades();
    assert_eq!(trades.len(), 3);
    assert_eq!((trades[0].price, trades[0].qty), (101, 5));
    assert_eq!((trades[1].price, trades[1].qty), (102, 5));
    assert_eq!((trades[2].price, trades[2].qty), (102, 3));

    let snapshot = ex.book_snapshot("BTC/USD").unwrap();
    assert_eq!(snapshot.asks.len(), 2);
    assert_eq!(snapshot.asks[0].price, 102);
    assert_eq!(snapshot.asks[0].quantity, 2);
    assert_eq!(snapshot.asks[1].price, 103);
    assert_eq!(snapshot.asks[1].quantity, 5);

    // the incoming order does not rest
    assert!(ex.book_snapshot("BTC/USD").unwrap().bids.is_empty());
    assert_eq!(ex.get_l1("taker", "BTC/USD").unwrap().last_price, Some(102));
}

/// S2 — FOK fails atomically.
#[test]
fn s2_fok_fails_atomically() {
    let mut ex = exchange();
    register(&mut ex, "maker", 3);
    register(&mut ex, "taker", 1);
    ex.add_instrument("BTC/USD", false);

    ex.place_order(
        "maker",
        "BTC/USD",
        OrderKind::Limit,
        Side::Sell,
        30,
        Some(100),
        None,
    )
    .unwrap();

    let err = ex
        .place_order(
            "taker",
            "BTC/USD",
            OrderKind::Fok,
            Side::Buy,
            50,
            Some(101),
            None,
        )
        .unwrap_err();
    assert_eq!(err.code(), "FOK_INSUFFICIENT_LIQUIDITY");

    let snapshot = ex.book_snapshot("BTC/USD").unwrap();
    assert_eq!(snapshot.asks.len(), 1);
    assert_eq!(snapshot.asks[0].quantity, 30);
    assert!(ex.trade_log("BTC/USD").unwrap().is_empty());
    assert_eq!(ex.get_remaining_quota("taker", "BTC/USD").unwrap().buy, 100);
}

/// S3 — Post-only rejected when crossing.
#[test]
fn s3_post_only_rejected_when_crossing() {
    let mut ex = exchange();
    register(&mut ex, "maker", 3);
    register(&mut ex, "taker", 1);
    ex.add_instrument("BTC/USD", false);

    ex.place_order(
        "maker",
        "BTC/USD",
        OrderKind::Limit,
        Side::Sell,
        10,
        Some(100),
        None,
    )
    .unwrap();

    let err = ex
        .place_order(
            "taker",
            "BTC/USD",
            OrderKind::PostOnly,
            Side::Buy,
            5,
            Some(105),
            None,
        )
        .unwrap_err();
    assert_eq!(err.code(), "POST_ONLY_VIOLATION");
    assert!(ex.book_snapshot("BTC/USD").unwrap().bids.is_empty());

    ex.place_order(
        "taker",
        "BTC/USD",
        OrderKind::PostOnly,
        Side::Buy,
        5,
        Some(95),
        None,
    )
    .unwrap();
    assert_eq!(ex.get_l1("taker", "BTC/USD").unwrap().best_bid, Some(95));
}

/// S4 — STP aborts pre-trade.
#[test]
fn s4_self_trade_prevention_aborts_pre_trade() {
    let mut ex = exchange();
    register(&mut ex, "u", 3);
    ex.add_instrument("BTC/USD", true);

    ex.place_order("u", "BTC/USD", OrderKind::Limit, Side::Sell, 10, Some(100), None)
        .unwrap();

    let err = ex
        .place_order("u", "BTC/USD", OrderKind::Limit, Side::Buy, 10, Some(100), None)
        .unwrap_err();
    assert_eq!(err.code(), "SELF_TRADE_PREVENTION");

    assert!(ex.trade_log("BTC/USD").unwrap().is_empty());
    let snapshot = ex.book_snapshot("BTC/USD").unwrap();
    assert_eq!(snapshot.asks[0].price, 100);
    assert_eq!(snapshot.asks[0].quantity, 10);
}

/// S5 — Stop triggers during match.
#[test]
fn s5_stop_triggers_during_match() {
    let mut ex = exchange();
    register(&mut ex, "x", 1);
    register(&mut ex, "y", 1);
    register(&mut ex, "z", 1);
    ex.add_instrument("BTC/USD", false);

    ex.place_order(
        "x",
        "BTC/USD",
        OrderKind::StopMarket,
        Side::Buy,
        10,
        None,
        Some(100),
    )
    .unwrap();

    ex.place_order("y", "BTC/USD", OrderKind::Limit, Side::Sell, 5, Some(95), None)
        .unwrap();
    ex.place_order("z", "BTC/USD", OrderKind::Limit, Side::Buy, 5, Some(95), None)
        .unwrap();
    assert_eq!(ex.get_l1("x", "BTC/USD").unwrap().last_price, Some(95));
    // 95 does not clear the buy-stop's >= 100 threshold
    assert!(ex
        .get_positions("x")
        .unwrap()
        .iter()
        .all(|(_, qty)| *qty == 0));

    ex.place_order("y", "BTC/USD", OrderKind::Limit, Side::Sell, 15, Some(100), None)
        .unwrap();
    ex.place_order("z", "BTC/USD", OrderKind::Limit, Side::Buy, 5, Some(100), None)
        .unwrap();

    assert_eq!(ex.get_l1("x", "BTC/USD").unwrap().last_price, Some(100));
    let x_position = ex
        .get_positions("x")
        .unwrap()
        .into_iter()
        .find(|(inst, _)| inst == "BTC/USD")
        .map(|(_, qty)| qty)
        .unwrap_or(0);
    assert_eq!(x_position, 10);
}

/// S6 — Cancel-while-matching: a cancelled resting order is silently
/// skipped via compaction, the other resting orders still fill FIFO.
#[test]
fn s6_cancel_while_matching() {
    let mut ex = exchange();
    register(&mut ex, "b1", 1);
    register(&mut ex, "b2", 1);
    register(&mut ex, "b3", 1);
    register(&mut ex, "taker", 1);
    ex.add_instrument("BTC/USD", false);

    let id1 = ex
        .place_order("b1", "BTC/USD", OrderKind::Limit, Side::Buy, 10, Some(100), None)
        .unwrap();
    let id2 = ex
        .place_order("b2", "BTC/USD", OrderKind::Limit, Side::Buy, 10, Some(100), None)
        .unwrap();
    let id3 = ex
        .place_order("b3", "BTC/USD", OrderKind::Limit, Side::Buy, 10, Some(100), None)
        .unwrap();
    let _ = id2;

    assert!(ex.cancel_order("b2", "BTC/USD", id2).unwrap());

    ex.place_order(
        "taker",
        "BTC/USD",
        OrderKind::Limit,
        Side::Sell,
        25,
        Some(100),
        None,
    )
    .unwrap();

    let trades = ex.trade_log("BTC/USD").unwrap().trades();
    assert_eq!(trades.len(), 2);
    assert_eq!(trades[0].buy_order_id, id1);
    assert_eq!(trades[0].qty, 10);
    assert_eq!(trades[1].buy_order_id, id3);
    assert_eq!(trades[1].qty, 10);

    // 5 units are left over (25 sold against 20 live buy quantity)
    assert!(ex.book_snapshot("BTC/USD").unwrap().asks[0].quantity == 5);
}
