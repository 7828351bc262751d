//! Participant accounts: cash, positions, average cost, realised P&L, and
//! per-instrument outstanding-quantity tracking for the position-limit
//! quota check.

use std::collections::HashMap;

use crate::action_log::{ActionLog, ActionLogEntry};
use crate::error::ExchangeError;
use crate::order::Side;

/// A participant's signed position and average cost in one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Position {
    /// Signed: positive is long, negative is short.
    qty: i64,
    /// Average cost basis, valid only while `qty != 0`.
    avg_cost: u128,
}

/// Per-instrument quantity reserved by resting orders and untriggered
/// stops, tracked separately per side so the quota check can be symmetric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Outstanding {
    buy: u64,
    sell: u64,
}

/// One participant's trading account.
#[derive(Debug, Clone)]
pub struct ParticipantAccount {
    participant_id: String,
    display_name: String,
    permission_level: u8,
    cash: i128,
    realised_pnl: i128,
    positions: HashMap<String, Position>,
    outstanding: HashMap<String, Outstanding>,
    action_log: ActionLog,
}

impl ParticipantAccount {
    pub fn new(
        participant_id: impl Into<String>,
        display_name: impl Into<String>,
        permission_level: u8,
        starting_cash: i128,
    ) -> Self {
        ParticipantAccount {
            participant_id: participant_id.into(),
            display_name: display_name.into(),
            permission_level,
            cash: starting_cash,
            realised_pnl: 0,
            positions: HashMap::new(),
            outstanding: HashMap::new(),
            action_log: ActionLog::new(),
        }
    }

    /// Append an entry to this participant's action log. Synchronous with
    /// whatever mutation caused it, per spec.md §4.8.
    pub fn log(&mut self, entry: ActionLogEntry) {
        self.action_log.append(entry);
    }

    pub fn action_log(&self) -> &ActionLog {
        &self.action_log
    }

    /// Every instrument this participant holds a non-zero position in.
    pub fn positions(&self) -> Vec<(String, i64)> {
        self.positions
            .iter()
            .map(|(inst, pos)| (inst.clone(), pos.qty))
            .collect()
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn permission_level(&self) -> u8 {
        self.permission_level
    }

    pub fn cash(&self) -> i128 {
        self.cash
    }

    pub fn realised_pnl(&self) -> i128 {
        self.realised_pnl
    }

    /// Signed position in an instrument; zero if never traded.
    pub fn position(&self, instrument: &str) -> i64 {
        self.positions.get(instrument).map(|p| p.qty).unwrap_or(0)
    }

    /// Average cost basis in an instrument; zero if flat.
    pub fn average_cost(&self, instrument: &str) -> u128 {
        self.positions
            .get(instrument)
            .map(|p| p.avg_cost)
            .unwrap_or(0)
    }

    fn outstanding_entry(&mut self, instrument: &str) -> &mut Outstanding {
        self.outstanding.entry(instrument.to_string()).or_default()
    }

    fn outstanding_for(&self, instrument: &str) -> Outstanding {
        self.outstanding.get(instrument).copied().unwrap_or_default()
    }

    /// Reserve quota for a newly-admitted order (or untriggered stop) on
    /// the given side.
    pub fn reserve_outstanding(&mut self, instrument: &str, side: Side, qty: u64) {
        let entry = self.outstanding_entry(instrument);
        match side {
            Side::Buy => entry.buy += qty,
            Side::Sell => entry.sell += qty,
        }
    }

    /// Release previously-reserved quota: a fill, a cancel, or a
    /// mid-process discard.
    pub fn release_outstanding(&mut self, instrument: &str, side: Side, qty: u64) {
        let entry = self.outstanding_entry(instrument);
        match side {
            Side::Buy => entry.buy = entry.buy.saturating_sub(qty),
            Side::Sell => entry.sell = entry.sell.saturating_sub(qty),
        }
    }

    /// The quota remaining for a side, given the position-limit `l`.
    /// `buy_quota = max(0, l - position - outstanding_buys)`,
    /// `sell_quota = max(0, l + position - outstanding_sells)`.
    pub fn remaining_quota(&self, instrument: &str, side: Side, l: u64) -> u64 {
        let position = self.position(instrument);
        let outstanding = self.outstanding_for(instrument);
        let l = l as i64;
        let quota = match side {
            Side::Buy => l - position - outstanding.buy as i64,
            Side::Sell => l + position - outstanding.sell as i64,
        };
        quota.max(0) as u64
    }

    /// Reject admission if `qty` would push the side past its quota.
    pub fn check_quota(
        &self,
        instrument: &str,
        side: Side,
        qty: u64,
        l: u64,
    ) -> Result<(), ExchangeError> {
        let quota = self.remaining_quota(instrument, side, l);
        if qty > quota {
            return Err(ExchangeError::OrderExceedsPositionLimit {
                instrument: instrument.to_string(),
                side,
                qty,
                quota,
            });
        }
        Ok(())
    }

    /// Apply a fill of `qty` at `price` on the given side, updating
    /// position, average cost, realised P&L, and cash. Does not touch
    /// outstanding; the caller releases that separately per fill.
    pub fn apply_fill(&mut self, instrument: &str, side: Side, qty: u64, price: u128) {
        let position = self
            .positions
            .entry(instrument.to_string())
            .or_insert_with(Position::default);
        let q = qty as i64;
        let p = price as i128;

        match side {
            Side::Buy => {
                if position.qty >= 0 {
                    let new_qty = position.qty + q;
                    position.avg_cost = if position.qty > 0 {
                        let old_notional = position.avg_cost as i128 * position.qty as i128;
                        ((old_notional + p * q as i128) / new_qty as i128) as u128
                    } else {
                        price
                    };
                    position.qty = new_qty;
                } else {
                    let covering = q.min(-position.qty);
                    self.realised_pnl += covering as i128 * (position.avg_cost as i128 - p);
                    let new_qty = position.qty + q;
                    if new_qty != 0 {
                        if new_qty < 0 {
                            // still short: average cost is unchanged
                        } else {
                            position.avg_cost = price;
                        }
                    }
                    position.qty = new_qty;
                }
                self.cash -= p * q as i128;
            }
            Side::Sell => {
                if position.qty <= 0 {
                    let new_qty = position.qty - q;
                    position.avg_cost = if position.qty < 0 {
                        let old_notional = position.avg_cost as i128 * (-position.qty) as i128;
                        ((old_notional + p * q as i128) / (-new_qty) as i128) as u128
                    } else {
                        price
                    };
                    position.qty = new_qty;
                } else {
                    let selling = q.min(position.qty);
                    self.realised_pnl += selling as i128 * (p - position.avg_cost as i128);
                    let new_qty = position.qty - q;
                    if new_qty != 0 {
                        if new_qty > 0 {
                            // still long: average cost is unchanged
                        } else {
                            position.avg_cost = price;
                        }
                    }
                    position.qty = new_qty;
                }
                self.cash += p * q as i128;
            }
        }

        if position.qty == 0 {
            self.positions.remove(instrument);
        }
    }

    pub fn charge_fee(&mut self, fee: u128) {
        self.cash -= fee as i128;
    }

    pub fn cash_in(&mut self, amount: u128) {
        self.cash += amount as i128;
    }

    pub fn withdraw(&mut self, amount: u128) -> Result<(), ExchangeError> {
        if (amount as i128) > self.cash {
            return Err(ExchangeError::InsufficientBalance {
                requested: amount,
                available: self.cash.max(0) as u128,
            });
        }
        self.cash -= amount as i128;
        Ok(())
    }
}
