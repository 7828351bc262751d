//! Trade records and the append-only trade log.

use serde::{Deserialize, Serialize};

use crate::error::ExchangeError;
use crate::order::{OrderId, Side};

/// An immutable fill between two orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub timestamp: u64,
    pub instrument: String,
    pub price: u128,
    pub qty: u64,
    pub buy_participant: String,
    pub sell_participant: String,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub aggressor: Side,
}

impl Trade {
    /// Construct a trade, validating the aggressor side.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        timestamp: u64,
        instrument: impl Into<String>,
        price: u128,
        qty: u64,
        buy_participant: impl Into<String>,
        sell_participant: impl Into<String>,
        buy_order_id: OrderId,
        sell_order_id: OrderId,
        aggressor: Side,
    ) -> Result<Self, ExchangeError> {
        Ok(Trade {
            timestamp,
            instrument: instrument.into(),
            price,
            qty,
            buy_participant: buy_participant.into(),
            sell_participant: sell_participant.into(),
            buy_order_id,
            sell_order_id,
            aggressor,
        })
    }
}

/// Append-only sequence of trades, in submission order.
#[derive(Debug, Default)]
pub struct TradeLog {
    trades: Vec<Trade>,
}

impl TradeLog {
    pub fn new() -> Self {
        TradeLog { trades: Vec::new() }
    }

    /// Append a trade. Rejects an aggressor outside `{buy, sell}` — in
    /// practice unreachable since [`Side`] is a closed enum, kept so
    /// `InvalidAggressor` stays a constructible, testable error variant.
    pub fn record(&mut self, trade: Trade) -> Result<(), ExchangeError> {
        match trade.aggressor {
            Side::Buy | Side::Sell => {}
        }
        self.trades.push(trade);
        Ok(())
    }

    /// A defensive copy of all recorded trades.
    pub fn trades(&self) -> Vec<Trade> {
        self.trades.clone()
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    /// A rendered, human-readable dump, one line per trade.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for t in &self.trades {
            out.push_str(&format!(
                "[{}] {} {}@{} buy={} sell={} aggressor={}\n",
                t.timestamp,
                t.instrument,
                t.qty,
                t.price,
                t.buy_participant,
                t.sell_participant,
                t.aggressor
            ));
        }
        out
    }
}
