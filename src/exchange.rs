//! The exchange coordinator: routes orders to the right book, settles
//! trades against participant accounts, enforces position-limit quotas
//! before admission, and exposes permission-gated market-data reads.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::account::ParticipantAccount;
use crate::action_log::ActionLogEntry;
use crate::book::{BookSnapshot, OrderBook, PriceLevelSnapshot, StopTrigger};
use crate::error::ExchangeError;
use crate::fees::FeeSchedule;
use crate::order::{Order, OrderId, OrderKind, Side, UnderlyingKind};
use crate::trade::Trade;
use crate::utils::current_time_millis;

const L2_PERMISSION: u8 = 2;
const L3_PERMISSION: u8 = 3;

/// Top-of-book view. Any registered participant may read this.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct L1View {
    pub instrument: String,
    pub best_bid: Option<u128>,
    pub best_bid_qty: Option<u64>,
    pub best_ask: Option<u128>,
    pub best_ask_qty: Option<u64>,
    pub last_price: Option<u128>,
    pub last_qty: Option<u64>,
    pub timestamp: u64,
}

/// Aggregated depth-of-book view. Requires permission level ≥ 2.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct L2View {
    pub instrument: String,
    /// Best-first.
    pub bids: Vec<PriceLevelSnapshot>,
    /// Best-first.
    pub asks: Vec<PriceLevelSnapshot>,
}

/// One order as it appears in an L3 view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct L3OrderInfo {
    pub order_id: OrderId,
    pub qty: u64,
    pub user_id: String,
    pub order_type: OrderKind,
    pub timestamp: u64,
}

/// One price level's FIFO order queue in an L3 view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct L3PriceLevel {
    pub price: u128,
    pub orders: Vec<L3OrderInfo>,
}

/// Full per-order depth view. Requires permission level ≥ 3.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct L3View {
    pub instrument: String,
    /// Best-first.
    pub bids: Vec<L3PriceLevel>,
    /// Best-first.
    pub asks: Vec<L3PriceLevel>,
}

/// Remaining admission quota on each side, per spec.md §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaView {
    pub buy: u64,
    pub sell: u64,
}

fn to_l3_orders(levels: Vec<(u128, Vec<Order>)>) -> Vec<L3PriceLevel> {
    levels
        .into_iter()
        .map(|(price, orders)| L3PriceLevel {
            price,
            orders: orders
                .into_iter()
                .map(|o| L3OrderInfo {
                    order_id: o.id,
                    qty: o.remaining_qty,
                    user_id: o.participant_id,
                    order_type: o.kind,
                    timestamp: o.created_at,
                })
                .collect(),
        })
        .collect()
}

/// The exchange: the single point of admission, routing, and settlement
/// across every instrument's order book and every participant's account.
pub struct ExchangeCoordinator {
    accounts: HashMap<String, ParticipantAccount>,
    books: HashMap<String, OrderBook>,
    fee_schedule: FeeSchedule,
    accumulated_fees: u128,
    quota_limit: u64,
}

impl ExchangeCoordinator {
    /// A new exchange with the default position-limit quota (100) and no
    /// trading fee.
    pub fn new() -> Self {
        ExchangeCoordinator {
            accounts: HashMap::new(),
            books: HashMap::new(),
            fee_schedule: FeeSchedule::default(),
            accumulated_fees: 0,
            quota_limit: 100,
        }
    }

    pub fn with_quota_limit(mut self, quota_limit: u64) -> Self {
        self.quota_limit = quota_limit;
        self
    }

    pub fn with_fee_schedule(mut self, fee_schedule: FeeSchedule) -> Self {
        self.fee_schedule = fee_schedule;
        self
    }

    pub fn accumulated_fees(&self) -> u128 {
        self.accumulated_fees
    }

    fn account(&self, user: &str) -> Result<&ParticipantAccount, ExchangeError> {
        self.accounts
            .get(user)
            .ok_or_else(|| ExchangeError::UserNotFound(user.to_string()))
    }

    fn account_mut(&mut self, user: &str) -> Result<&mut ParticipantAccount, ExchangeError> {
        self.accounts
            .get_mut(user)
            .ok_or_else(|| ExchangeError::UserNotFound(user.to_string()))
    }

    fn book(&self, instrument: &str) -> Result<&OrderBook, ExchangeError> {
        self.books
            .get(instrument)
            .ok_or_else(|| ExchangeError::InstrumentNotFound(instrument.to_string()))
    }

    fn book_mut(&mut self, instrument: &str) -> Result<&mut OrderBook, ExchangeError> {
        self.books
            .get_mut(instrument)
            .ok_or_else(|| ExchangeError::InstrumentNotFound(instrument.to_string()))
    }

    /// Register a new participant. Rejects a second registration under the
    /// same id.
    pub fn register_user(
        &mut self,
        id: impl Into<String>,
        display_name: impl Into<String>,
        initial_cash: i128,
        permission_level: u8,
    ) -> Result<(), ExchangeError> {
        let id = id.into();
        if self.accounts.contains_key(&id) {
            return Err(ExchangeError::DuplicateUser(id));
        }
        let display_name = display_name.into();
        let mut account = ParticipantAccount::new(
            id.clone(),
            display_name.clone(),
            permission_level,
            initial_cash,
        );
        account.log(ActionLogEntry::Register {
            timestamp: current_time_millis(),
            participant_id: id.clone(),
            display_name,
            starting_cash: initial_cash,
        });
        trace!(participant = %id, "registered participant");
        self.accounts.insert(id, account);
        Ok(())
    }

    /// Add a new instrument's order book. A no-op if the instrument already
    /// exists.
    pub fn add_instrument(&mut self, instrument: impl Into<String>, stp_enabled: bool) {
        let instrument = instrument.into();
        self.books
            .entry(instrument.clone())
            .or_insert_with(|| OrderBook::new(instrument, stp_enabled));
    }

    /// Submit an order on behalf of `user` into `instrument`'s book.
    /// Rolls back the quota reservation if the book rejects the order.
    pub fn place_order(
        &mut self,
        user: &str,
        instrument: &str,
        kind: OrderKind,
        side: Side,
        qty: u64,
        price: Option<u128>,
        stop_price: Option<u128>,
    ) -> Result<OrderId, ExchangeError> {
        self.account(user)?;
        self.book(instrument)?;

        self.account(user)?
            .check_quota(instrument, side, qty, self.quota_limit)?;

        let id = OrderId::new();
        let order = Order::new(
            id,
            user,
            side,
            kind,
            qty,
            current_time_millis(),
            price,
            stop_price,
        )?;

        self.account_mut(user)?
            .reserve_outstanding(instrument, side, qty);

        match self.book_mut(instrument)?.submit(order) {
            Ok(outcome) => {
                self.settle_trades(instrument, &outcome.trades);
                if outcome.discarded_qty > 0 {
                    self.on_discard(user, instrument, side, outcome.discarded_qty);
                }
                self.process_stop_triggers(instrument, outcome.stop_triggers);
                self.account_mut(user)?.log(ActionLogEntry::PlaceOrder {
                    timestamp: current_time_millis(),
                    participant_id: user.to_string(),
                    display_name: self.account(user)?.display_name().to_string(),
                    order_id: id,
                    instrument: instrument.to_string(),
                    kind,
                    side,
                    qty,
                    price,
                    stop_price,
                });
                trace!(%user, %instrument, order_id = %id, "order placed");
                Ok(id)
            }
            Err(err) => {
                self.account_mut(user)?
                    .release_outstanding(instrument, side, qty);
                Err(err)
            }
        }
    }

    /// Cancel a resting or untriggered-stop order. Returns `false` if the
    /// id is unknown, never an error for that case (spec.md §7).
    pub fn cancel_order(
        &mut self,
        user: &str,
        instrument: &str,
        order_id: OrderId,
    ) -> Result<bool, ExchangeError> {
        self.account(user)?;
        let discard = self.book_mut(instrument)?.cancel(order_id);
        match discard {
            None => Ok(false),
            Some(discard) => {
                if let Some(acc) = self.accounts.get_mut(&discard.participant_id) {
                    acc.release_outstanding(instrument, discard.side, discard.qty);
                }
                self.account_mut(user)?.log(ActionLogEntry::CancelOrder {
                    timestamp: current_time_millis(),
                    participant_id: user.to_string(),
                    display_name: self.account(user)?.display_name().to_string(),
                    order_id,
                    instrument: instrument.to_string(),
                });
                trace!(%user, %instrument, order_id = %order_id, "order cancelled");
                Ok(true)
            }
        }
    }

    /// Modify a resting or stop order. Nets the quantity delta against the
    /// owner's outstanding counter and settles any trades the resubmission
    /// immediately produces.
    pub fn modify_order(
        &mut self,
        user: &str,
        instrument: &str,
        order_id: OrderId,
        new_qty: u64,
        new_price: Option<u128>,
        new_stop_price: Option<u128>,
    ) -> Result<OrderId, ExchangeError> {
        self.account(user)?;
        let side = self
            .book(instrument)?
            .order_info(order_id)
            .ok_or(ExchangeError::OrderNotFound(order_id))?
            .side;

        let outcome =
            self.book_mut(instrument)?
                .modify(order_id, new_qty, new_price, new_stop_price)?;

        let account = self.account_mut(user)?;
        account.release_outstanding(instrument, side, outcome.old_remaining_qty);
        account.reserve_outstanding(instrument, side, outcome.new_submitted_qty);

        let new_id = outcome.outcome.order_id;
        self.settle_trades(instrument, &outcome.outcome.trades);
        if outcome.outcome.discarded_qty > 0 {
            self.on_discard(user, instrument, side, outcome.outcome.discarded_qty);
        }
        self.process_stop_triggers(instrument, outcome.outcome.stop_triggers);

        self.account_mut(user)?.log(ActionLogEntry::ModifyOrder {
            timestamp: current_time_millis(),
            participant_id: user.to_string(),
            display_name: self.account(user)?.display_name().to_string(),
            old_order_id: order_id,
            new_order_id: new_id,
            instrument: instrument.to_string(),
            new_qty,
            new_price,
        });
        trace!(%user, %instrument, old_order_id = %order_id, new_order_id = %new_id, "order modified");
        Ok(new_id)
    }

    pub fn cash_in(&mut self, user: &str, amount: u128) -> Result<(), ExchangeError> {
        let account = self.account_mut(user)?;
        account.cash_in(amount);
        let balance_after = account.cash();
        let display_name = account.display_name().to_string();
        account.log(ActionLogEntry::CashIn {
            timestamp: current_time_millis(),
            participant_id: user.to_string(),
            display_name,
            amount,
            balance_after,
        });
        Ok(())
    }

    pub fn cash_out(&mut self, user: &str, amount: u128) -> Result<(), ExchangeError> {
        let account = self.account_mut(user)?;
        account.withdraw(amount)?;
        let balance_after = account.cash();
        let display_name = account.display_name().to_string();
        account.log(ActionLogEntry::CashOut {
            timestamp: current_time_millis(),
            participant_id: user.to_string(),
            display_name,
            amount,
            balance_after,
        });
        Ok(())
    }

    pub fn get_cash(&self, user: &str) -> Result<i128, ExchangeError> {
        Ok(self.account(user)?.cash())
    }

    pub fn get_realised_pnl(&self, user: &str) -> Result<i128, ExchangeError> {
        Ok(self.account(user)?.realised_pnl())
    }

    pub fn get_positions(&self, user: &str) -> Result<Vec<(String, i64)>, ExchangeError> {
        Ok(self.account(user)?.positions())
    }

    pub fn get_remaining_quota(
        &self,
        user: &str,
        instrument: &str,
    ) -> Result<QuotaView, ExchangeError> {
        let account = self.account(user)?;
        Ok(QuotaView {
            buy: account.remaining_quota(instrument, Side::Buy, self.quota_limit),
            sell: account.remaining_quota(instrument, Side::Sell, self.quota_limit),
        })
    }

    /// Unrealised P&L in one instrument, marked to its last trade price.
    /// `None` (no trades yet in that instrument) marks flat at zero.
    pub fn get_unrealised_pnl(&self, user: &str, instrument: &str) -> Result<i128, ExchangeError> {
        let account = self.account(user)?;
        let book = self.book(instrument)?;
        Ok(Self::unrealised_pnl_one(account, book, instrument))
    }

    /// Unrealised P&L summed across every instrument the participant holds
    /// a position in.
    pub fn get_total_unrealised_pnl(&self, user: &str) -> Result<i128, ExchangeError> {
        let account = self.account(user)?;
        let mut total = 0i128;
        for (instrument, _) in account.positions() {
            if let Some(book) = self.books.get(&instrument) {
                total += Self::unrealised_pnl_one(account, book, &instrument);
            }
        }
        Ok(total)
    }

    fn unrealised_pnl_one(account: &ParticipantAccount, book: &OrderBook, instrument: &str) -> i128 {
        let position = account.position(instrument);
        if position == 0 {
            return 0;
        }
        let Some(mark) = book.last_trade_price() else {
            return 0;
        };
        let avg_cost = account.average_cost(instrument) as i128;
        position as i128 * (mark as i128 - avg_cost)
    }

    /// Notional exposure (`|position| * mark price`) in one instrument.
    pub fn get_exposure(&self, user: &str, instrument: &str) -> Result<u128, ExchangeError> {
        let account = self.account(user)?;
        let book = self.book(instrument)?;
        Ok(Self::exposure_one(account, book, instrument))
    }

    /// Total notional exposure across every instrument the participant
    /// holds a position in.
    pub fn get_total_exposure(&self, user: &str) -> Result<u128, ExchangeError> {
        let account = self.account(user)?;
        let mut total = 0u128;
        for (instrument, _) in account.positions() {
            if let Some(book) = self.books.get(&instrument) {
                total += Self::exposure_one(account, book, &instrument);
            }
        }
        Ok(total)
    }

    fn exposure_one(account: &ParticipantAccount, book: &OrderBook, instrument: &str) -> u128 {
        let position = account.position(instrument).unsigned_abs();
        let mark = book.last_trade_price().unwrap_or(0);
        position as u128 * mark
    }

    fn require_permission(&self, user: &str, required: u8) -> Result<(), ExchangeError> {
        let actual = self.account(user)?.permission_level();
        if actual < required {
            return Err(ExchangeError::PermissionDenied { required, actual });
        }
        Ok(())
    }

    /// Top-of-book. Any registered participant may read this.
    pub fn get_l1(&mut self, user: &str, instrument: &str) -> Result<L1View, ExchangeError> {
        self.account(user)?;
        let book = self.book_mut(instrument)?;
        let best_bid = book.best_bid();
        let best_bid_qty = best_bid.map(|p| book.qty_at_price(Side::Buy, p));
        let best_ask = book.best_ask();
        let best_ask_qty = best_ask.map(|p| book.qty_at_price(Side::Sell, p));
        Ok(L1View {
            instrument: instrument.to_string(),
            best_bid,
            best_bid_qty,
            best_ask,
            best_ask_qty,
            last_price: book.last_trade_price(),
            last_qty: book.last_trade_qty(),
            timestamp: current_time_millis(),
        })
    }

    /// Aggregated depth. Requires permission level ≥ 2.
    pub fn get_l2(
        &mut self,
        user: &str,
        instrument: &str,
        depth: usize,
    ) -> Result<L2View, ExchangeError> {
        self.require_permission(user, L2_PERMISSION)?;
        let book = self.book_mut(instrument)?;
        Ok(L2View {
            instrument: instrument.to_string(),
            bids: book.depth(Side::Buy, depth),
            asks: book.depth(Side::Sell, depth),
        })
    }

    /// Full per-order depth. Requires permission level ≥ 3.
    pub fn get_l3(
        &mut self,
        user: &str,
        instrument: &str,
        depth: usize,
    ) -> Result<L3View, ExchangeError> {
        self.require_permission(user, L3_PERMISSION)?;
        let book = self.book_mut(instrument)?;
        Ok(L3View {
            instrument: instrument.to_string(),
            bids: to_l3_orders(book.l3_depth(Side::Buy, depth)),
            asks: to_l3_orders(book.l3_depth(Side::Sell, depth)),
        })
    }

    /// A checksummable snapshot of one instrument's resting liquidity.
    pub fn book_snapshot(&self, instrument: &str) -> Result<BookSnapshot, ExchangeError> {
        Ok(self.book(instrument)?.snapshot())
    }

    /// One instrument's append-only trade history, in submission order.
    pub fn trade_log(&self, instrument: &str) -> Result<&crate::trade::TradeLog, ExchangeError> {
        Ok(self.book(instrument)?.trade_log())
    }

    /// Every order still live on one instrument's book: resting orders plus
    /// untriggered stops.
    pub fn pending_orders(&self, instrument: &str) -> Result<Vec<Order>, ExchangeError> {
        Ok(self.book(instrument)?.pending_orders())
    }

    fn settle_trades(&mut self, instrument: &str, trades: &[Trade]) {
        for trade in trades {
            self.on_trade(instrument, trade);
        }
    }

    /// Apply a fill to both participants: position/avg-cost/realised-P&L,
    /// cash, the flat per-fill fee on each side, and release the
    /// corresponding outstanding reservation.
    fn on_trade(&mut self, instrument: &str, trade: &Trade) {
        let fee = self.fee_schedule.fee_per_side();
        if let Some(acc) = self.accounts.get_mut(&trade.buy_participant) {
            acc.apply_fill(instrument, Side::Buy, trade.qty, trade.price);
            acc.release_outstanding(instrument, Side::Buy, trade.qty);
            acc.charge_fee(fee);
        }
        if let Some(acc) = self.accounts.get_mut(&trade.sell_participant) {
            acc.apply_fill(instrument, Side::Sell, trade.qty, trade.price);
            acc.release_outstanding(instrument, Side::Sell, trade.qty);
            acc.charge_fee(fee);
        }
        self.accumulated_fees += self.fee_schedule.fee_per_trade();
        trace!(%instrument, price = trade.price, qty = trade.qty, "trade settled");
    }

    /// Release the outstanding reservation for a quantity that neither
    /// traded nor rested (a market/IOC leftover, or a stop's synthesised
    /// order that ran out of liquidity).
    fn on_discard(&mut self, user: &str, instrument: &str, side: Side, qty: u64) {
        if let Some(acc) = self.accounts.get_mut(user) {
            acc.release_outstanding(instrument, side, qty);
        }
        trace!(%user, %instrument, qty, "order quantity discarded");
    }

    fn process_stop_triggers(&mut self, instrument: &str, triggers: Vec<StopTrigger>) {
        for trigger in triggers {
            self.on_stop_trigger(instrument, &trigger);
            if trigger.discarded_qty > 0 {
                self.on_discard(&trigger.participant_id, instrument, trigger.side, trigger.discarded_qty);
            }
        }
    }

    fn on_stop_trigger(&mut self, instrument: &str, trigger: &StopTrigger) {
        let underlying_kind = match trigger.underlying_kind {
            UnderlyingKind::Limit => OrderKind::Limit,
            UnderlyingKind::Market => OrderKind::Market,
        };
        if let Some(acc) = self.accounts.get_mut(&trigger.participant_id) {
            let display_name = acc.display_name().to_string();
            acc.log(ActionLogEntry::StopTriggered {
                timestamp: current_time_millis(),
                participant_id: trigger.participant_id.clone(),
                display_name,
                instrument: instrument.to_string(),
                stop_order_id: trigger.original_stop_id,
                new_order_id: trigger.new_order_id,
                underlying_kind,
                side: trigger.side,
                qty: trigger.qty,
                stop_price: trigger.stop_price,
                price: trigger.limit_price,
            });
        }
        trace!(%instrument, stop_id = %trigger.original_stop_id, new_order_id = %trigger.new_order_id, "stop order triggered");
    }
}

impl Default for ExchangeCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
