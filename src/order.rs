//! Order identity and the order-kind sum type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ExchangeError;

/// A unique, never-reused order identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(Uuid);

impl OrderId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        OrderId(Uuid::new_v4())
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The opposite side, used when walking the resting side of the book.
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

impl FromStr for Side {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            other => Err(ExchangeError::InvalidOrderSide(other.to_string())),
        }
    }
}

/// The underlying order type a triggered stop order is synthesised into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnderlyingKind {
    Limit,
    Market,
}

/// The seven order kinds the matching engine understands.
///
/// A sum type rather than a class hierarchy: every matcher pattern-matches
/// on this directly instead of dispatching through a trait object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Limit,
    Market,
    Ioc,
    Fok,
    PostOnly,
    StopLimit,
    StopMarket,
}

impl OrderKind {
    /// `true` for the two kinds that are held off-book in the stop store
    /// until triggered.
    pub fn is_stop(self) -> bool {
        matches!(self, OrderKind::StopLimit | OrderKind::StopMarket)
    }

    /// The underlying kind a triggered stop of this kind becomes.
    pub fn underlying(self) -> Option<UnderlyingKind> {
        match self {
            OrderKind::StopLimit => Some(UnderlyingKind::Limit),
            OrderKind::StopMarket => Some(UnderlyingKind::Market),
            _ => None,
        }
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderKind::Limit => "limit",
            OrderKind::Market => "market",
            OrderKind::Ioc => "ioc",
            OrderKind::Fok => "fok",
            OrderKind::PostOnly => "post-only",
            OrderKind::StopLimit => "stop-limit",
            OrderKind::StopMarket => "stop-market",
        };
        write!(f, "{s}")
    }
}

impl FromStr for OrderKind {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "limit" => Ok(OrderKind::Limit),
            "market" => Ok(OrderKind::Market),
            "ioc" => Ok(OrderKind::Ioc),
            "fok" => Ok(OrderKind::Fok),
            "post-only" => Ok(OrderKind::PostOnly),
            "stop-limit" => Ok(OrderKind::StopLimit),
            "stop-market" => Ok(OrderKind::StopMarket),
            other => Err(ExchangeError::InvalidOrderType(format!(
                "unknown order kind: {other}"
            ))),
        }
    }
}

/// An order: immutable identity and kind-specific fields, mutable remaining
/// quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub participant_id: String,
    pub side: Side,
    pub kind: OrderKind,
    pub remaining_qty: u64,
    pub created_at: u64,
    /// Resting limit price. `None` for market orders and for stop orders
    /// that underlie a market trigger.
    pub limit_price: Option<u128>,
    /// Trigger price for stop kinds.
    pub stop_price: Option<u128>,
    pub underlying_kind: Option<UnderlyingKind>,
}

impl Order {
    /// Validate and construct an order. Does not touch any book state.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: OrderId,
        participant_id: impl Into<String>,
        side: Side,
        kind: OrderKind,
        qty: u64,
        created_at: u64,
        limit_price: Option<u128>,
        stop_price: Option<u128>,
    ) -> Result<Self, ExchangeError> {
        if qty == 0 {
            return Err(ExchangeError::InvalidOrderQuantity);
        }
        match kind {
            OrderKind::Limit | OrderKind::Ioc | OrderKind::Fok | OrderKind::PostOnly => {
                if limit_price.is_none() {
                    return Err(ExchangeError::InvalidOrderType(format!(
                        "{kind} order requires a limit price"
                    )));
                }
                if stop_price.is_some() {
                    return Err(ExchangeError::InvalidOrderType(format!(
                        "{kind} order must not carry a stop price"
                    )));
                }
            }
            OrderKind::Market => {
                if limit_price.is_some() {
                    return Err(ExchangeError::InvalidOrderType(
                        "market order must not carry a limit price".into(),
                    ));
                }
                if stop_price.is_some() {
                    return Err(ExchangeError::InvalidOrderType(
                        "market order must not carry a stop price".into(),
                    ));
                }
            }
            OrderKind::StopLimit => {
                if stop_price.is_none() {
                    return Err(ExchangeError::InvalidOrderType(
                        "stop-limit order requires a stop price".into(),
                    ));
                }
                if limit_price.is_none() {
                    return Err(ExchangeError::InvalidOrderType(
                        "stop-limit order requires a limit price".into(),
                    ));
                }
            }
            OrderKind::StopMarket => {
                if stop_price.is_none() {
                    return Err(ExchangeError::InvalidOrderType(
                        "stop-market order requires a stop price".into(),
                    ));
                }
                if limit_price.is_some() {
                    return Err(ExchangeError::InvalidOrderType(
                        "stop-market order must not carry a limit price".into(),
                    ));
                }
            }
        }
        Ok(Order {
            id,
            participant_id: participant_id.into(),
            side,
            kind,
            remaining_qty: qty,
            created_at,
            limit_price,
            stop_price,
            underlying_kind: kind.underlying(),
        })
    }
}
