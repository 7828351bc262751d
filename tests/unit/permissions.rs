//! Admission and the error taxonomy at the exchange-coordinator boundary.

use exchange_engine::prelude::*;

fn exchange() -> ExchangeCoordinator {
    let mut ex = ExchangeCoordinator::new();
    ex.register_user("alice", "Alice", 1_000, 1).unwrap();
    ex.add_instrument("BTC/USD", false);
    ex
}

#[test]
fn placing_an_order_for_an_unknown_user_is_rejected() {
    let mut ex = exchange();
    let err = ex
        .place_order("ghost", "BTC/USD", OrderKind::Limit, Side::Buy, 1, Some(100), None)
        .unwrap_err();
    assert_eq!(err.code(), "USER_NOT_FOUND");
}

#[test]
fn cancelling_an_unknown_order_id_reports_false_not_an_error() {
    let mut ex = exchange();
    let ok = ex.cancel_order("alice", "BTC/USD", OrderId::new()).unwrap();
    assert!(!ok);
}

#[test]
fn modifying_an_unknown_order_id_is_rejected() {
    let mut ex = exchange();
    let err = ex
        .modify_order("alice", "BTC/USD", OrderId::new(), 5, Some(100), None)
        .unwrap_err();
    assert_eq!(err.code(), "ORDER_NOT_FOUND");
}

#[test]
fn a_limit_order_without_a_price_is_rejected_before_any_quota_is_reserved() {
    let mut ex = exchange();
    let err = ex
        .place_order("alice", "BTC/USD", OrderKind::Limit, Side::Buy, 5, None, None)
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_ORDER_TYPE");
    assert_eq!(ex.get_remaining_quota("alice", "BTC/USD").unwrap().buy, 100);
}

#[test]
fn a_stop_market_order_without_a_stop_price_is_rejected() {
    let mut ex = exchange();
    let err = ex
        .place_order("alice", "BTC/USD", OrderKind::StopMarket, Side::Buy, 5, None, None)
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_ORDER_TYPE");
}

#[test]
fn a_buy_stop_priced_at_or_below_the_last_trade_is_rejected() {
    let mut ex = exchange();
    ex.register_user("seller", "Seller", 0, 1).unwrap();
    ex.place_order("seller", "BTC/USD", OrderKind::Limit, Side::Sell, 5, Some(100), None)
        .unwrap();
    ex.place_order("alice", "BTC/USD", OrderKind::Limit, Side::Buy, 5, Some(100), None)
        .unwrap();

    let err = ex
        .place_order("alice", "BTC/USD", OrderKind::StopMarket, Side::Buy, 5, None, Some(100))
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_STOP_PRICE");
}

#[test]
fn a_registered_participant_can_always_read_l1_regardless_of_permission_level() {
    let mut ex = exchange();
    let view = ex.get_l1("alice", "BTC/USD").unwrap();
    assert_eq!(view.best_bid, None);
}

#[test]
fn l2_is_denied_below_permission_level_two() {
    let mut ex = exchange();
    let err = ex.get_l2("alice", "BTC/USD", 10).unwrap_err();
    assert_eq!(
        err,
        ExchangeError::PermissionDenied {
            required: 2,
            actual: 1
        }
    );
}

#[test]
fn l3_is_denied_below_permission_level_three() {
    let mut ex = exchange();
    ex.register_user("l2-user", "L2", 0, 2).unwrap();
    let err = ex.get_l3("l2-user", "BTC/USD", 10).unwrap_err();
    assert_eq!(
        err,
        ExchangeError::PermissionDenied {
            required: 3,
            actual: 2
        }
    );
}

#[test]
fn cash_in_then_cash_out_round_trips_the_balance() {
    let mut ex = exchange();
    ex.cash_in("alice", 500).unwrap();
    assert_eq!(ex.get_cash("alice").unwrap(), 1_500);
    ex.cash_out("alice", 1_500).unwrap();
    assert_eq!(ex.get_cash("alice").unwrap(), 0);
}

#[test]
fn cash_out_beyond_the_balance_is_rejected_and_leaves_cash_untouched() {
    let mut ex = exchange();
    let err = ex.cash_out("alice", 2_000).unwrap_err();
    assert_eq!(err.code(), "INSUFFICIENT_BALANCE");
    assert_eq!(ex.get_cash("alice").unwrap(), 1_000);
}

#[test]
fn registering_the_same_id_twice_is_rejected() {
    let mut ex = exchange();
    let err = ex.register_user("alice", "Alice 2", 0, 1).unwrap_err();
    assert_eq!(err.code(), "DUPLICATE_USER");
}

#[test]
fn adding_the_same_instrument_twice_is_a_no_op() {
    let mut ex = exchange();
    ex.add_instrument("BTC/USD", false);
    ex.place_order("alice", "BTC/USD", OrderKind::Limit, Side::Buy, 1, Some(50), None)
        .unwrap();
    assert_eq!(ex.pending_orders("BTC/USD").unwrap().len(), 1);
}
