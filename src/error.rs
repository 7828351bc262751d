//! The exchange's error taxonomy.
//!
//! Every fallible operation in this crate returns an [`ExchangeError`]. Each
//! variant carries a stable machine-readable [`ExchangeError::code`] in
//! addition to the human-readable message produced by `Display`, so callers
//! building a façade on top of this engine can switch on the code without
//! parsing the message.

use crate::order::{OrderId, Side};
use std::fmt;

/// Errors raised by the order book, the matchers, and the exchange
/// coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExchangeError {
    /// No participant is registered under this id.
    UserNotFound(String),
    /// No order book exists for this instrument.
    InstrumentNotFound(String),
    /// A participant id was registered twice.
    DuplicateUser(String),
    /// The caller's permission level is below what the read requires.
    PermissionDenied { required: u8, actual: u8 },
    /// A side string did not parse to `buy` or `sell`.
    InvalidOrderSide(String),
    /// Quantity was zero or negative.
    InvalidOrderQuantity,
    /// A kind string did not parse, or required fields for the kind were
    /// missing (limit without price, market with a price, stop-* without a
    /// stop-price).
    InvalidOrderType(String),
    /// A stop order's stop-price violates the ordering rule against the
    /// last trade price.
    InvalidStopPrice { is_buy: bool },
    /// Admission would push `|position| + outstanding` past the
    /// participant's quota on this side.
    OrderExceedsPositionLimit {
        instrument: String,
        side: Side,
        qty: u64,
        quota: u64,
    },
    /// A fill-or-kill order could not be filled in full.
    FokInsufficientLiquidity,
    /// A post-only order would have crossed the spread.
    PostOnlyViolation,
    /// Self-trade prevention aborted the match before any fill.
    SelfTradePrevention { order_id: OrderId, user_id: String },
    /// An order-id is unknown to the book it was addressed to. Used
    /// internally; `cancel`/`modify` surface unknown ids as `false`/this
    /// error respectively rather than a silent no-op.
    OrderNotFound(OrderId),
    /// Defensive: a matcher was invoked for a kind it cannot handle.
    MatcherTypeMismatch,
    /// A cash withdrawal exceeded the available balance.
    InsufficientBalance { requested: u128, available: u128 },
    /// A trade record carried an aggressor outside `{buy, sell}`.
    InvalidAggressor,
}

impl fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeError::UserNotFound(id) => write!(f, "user not found: {id}"),
            ExchangeError::InstrumentNotFound(inst) => write!(f, "instrument not found: {inst}"),
            ExchangeError::DuplicateUser(id) => write!(f, "user already registered: {id}"),
            ExchangeError::PermissionDenied { required, actual } => write!(
                f,
                "permission denied: required level {required}, actual level {actual}"
            ),
            ExchangeError::InvalidOrderSide(side) => write!(f, "invalid order side: {side}"),
            ExchangeError::InvalidOrderQuantity => write!(f, "order quantity must be positive"),
            ExchangeError::InvalidOrderType(reason) => write!(f, "invalid order type: {reason}"),
            ExchangeError::InvalidStopPrice { is_buy } => write!(
                f,
                "invalid stop price for {} stop",
                if *is_buy { "buy" } else { "sell" }
            ),
            ExchangeError::OrderExceedsPositionLimit {
                instrument,
                side,
                qty,
                quota,
            } => write!(
                f,
                "order for {qty} on {side} in {instrument} exceeds remaining quota of {quota}"
            ),
            ExchangeError::FokInsufficientLiquidity => {
                write!(f, "insufficient liquidity to fill fill-or-kill order")
            }
            ExchangeError::PostOnlyViolation => {
                write!(f, "post-only order would have crossed the spread")
            }
            ExchangeError::SelfTradePrevention { order_id, user_id } => write!(
                f,
                "self-trade prevented for order {order_id} (user {user_id})"
            ),
            ExchangeError::OrderNotFound(id) => write!(f, "order not found: {id}"),
            ExchangeError::MatcherTypeMismatch => {
                write!(f, "internal error: matcher invoked for the wrong kind")
            }
            ExchangeError::InsufficientBalance {
                requested,
                available,
            } => write!(
                f,
                "insufficient balance: requested {requested}, available {available}"
            ),
            ExchangeError::InvalidAggressor => {
                write!(f, "trade aggressor must be buy or sell")
            }
        }
    }
}

impl std::error::Error for ExchangeError {}

impl ExchangeError {
    /// A stable machine code for this error, suitable for switching on
    /// without parsing the `Display` message.
    pub fn code(&self) -> &'static str {
        match self {
            ExchangeError::UserNotFound(_) => "USER_NOT_FOUND",
            ExchangeError::InstrumentNotFound(_) => "INSTRUMENT_NOT_FOUND",
            ExchangeError::DuplicateUser(_) => "DUPLICATE_USER",
            ExchangeError::PermissionDenied { .. } => "PERMISSION_DENIED",
            ExchangeError::InvalidOrderSide(_) => "INVALID_ORDER_SIDE",
            ExchangeError::InvalidOrderQuantity => "INVALID_ORDER_QUANTITY",
            ExchangeError::InvalidOrderType(_) => "INVALID_ORDER_TYPE",
            ExchangeError::InvalidStopPrice { .. } => "INVALID_STOP_PRICE",
            ExchangeError::OrderExceedsPositionLimit { .. } => "ORDER_EXCEEDS_POSITION_LIMIT",
            ExchangeError::FokInsufficientLiquidity => "FOK_INSUFFICIENT_LIQUIDITY",
            ExchangeError::PostOnlyViolation => "POST_ONLY_VIOLATION",
            ExchangeError::SelfTradePrevention { .. } => "SELF_TRADE_PREVENTION",
            ExchangeError::OrderNotFound(_) => "ORDER_NOT_FOUND",
            ExchangeError::MatcherTypeMismatch => "MATCHER_TYPE_MISMATCH",
            ExchangeError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            ExchangeError::InvalidAggressor => "INVALID_AGGRESSOR",
        }
    }
}
