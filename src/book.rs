//! The per-instrument order book: price levels, the lazy best-price index,
//! the stop-order store, and the generic matching loop.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet, VecDeque};

use crate::error::ExchangeError;
use crate::order::{Order, OrderId, OrderKind, Side, UnderlyingKind};
use crate::trade::{Trade, TradeLog};

/// Where a known order-id currently lives, used by cancel/modify to locate
/// the order without a linear scan of the whole book.
#[derive(Debug, Clone, Copy)]
enum OrderLocation {
    Resting { side: Side, price: u128 },
    Stop { side: Side, stop_price: u128 },
}

/// An entry in the buy-side best-price index: max-priority on price, then
/// time priority (earliest `seq` wins) within a price.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct BidEntry {
    price: u128,
    seq: u64,
    order_id: OrderId,
}

impl Ord for BidEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.price
            .cmp(&other.price)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for BidEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The ask-side mirror of [`BidEntry`]: min-priority on price, then time
/// priority.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct AskEntry {
    price: u128,
    seq: u64,
    order_id: OrderId,
}

impl Ord for AskEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .price
            .cmp(&self.price)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for AskEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// What `cancel` hands back so the caller can release the reservation it
/// made against the participant's quota.
#[derive(Debug, Clone)]
pub struct Discard {
    pub participant_id: String,
    pub side: Side,
    pub qty: u64,
}

/// A stop order that fired during a match loop, for the exchange's action
/// log.
#[derive(Debug, Clone)]
pub struct StopTrigger {
    pub original_stop_id: OrderId,
    pub new_order_id: OrderId,
    pub participant_id: String,
    pub side: Side,
    pub qty: u64,
    pub stop_price: u128,
    pub underlying_kind: UnderlyingKind,
    pub limit_price: Option<u128>,
    /// Quantity of the synthesised order that neither traded nor rested
    /// (only possible when the underlying kind is market and liquidity ran
    /// out, or the synthesised order was itself self-trade-prevented).
    pub discarded_qty: u64,
}

/// The result of `submit`.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub order_id: OrderId,
    pub trades: Vec<Trade>,
    /// Quantity that neither traded nor rested (market/ioc running out of
    /// opposite-side liquidity). Zero for every other kind.
    pub discarded_qty: u64,
    pub stop_triggers: Vec<StopTrigger>,
}

/// The result of `modify`.
#[derive(Debug, Clone)]
pub struct ModifyOutcome {
    pub old_remaining_qty: u64,
    pub new_submitted_qty: u64,
    pub outcome: SubmitOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceLevelSnapshot {
    pub price: u128,
    pub quantity: u64,
}

/// A point-in-time, checksummable view of the book's resting liquidity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookSnapshot {
    pub instrument: String,
    /// Best-first (highest price first).
    pub bids: Vec<PriceLevelSnapshot>,
    /// Best-first (lowest price first).
    pub asks: Vec<PriceLevelSnapshot>,
    pub last_trade_price: Option<u128>,
}

impl BookSnapshot {
    /// A SHA-256 checksum over the snapshot's canonical JSON encoding, for
    /// the round-trip testable property (submit then cancel a non-crossing
    /// limit order and compare snapshots).
    pub fn checksum(&self) -> String {
        let encoded = serde_json::to_vec(self).expect("a snapshot is always serialisable");
        let mut hasher = Sha256::new();
        hasher.update(&encoded);
        format!("{:x}", hasher.finalize())
    }
}

/// Whether a resting price is acceptable to an incoming order of the given
/// kind/side/limit-price. Shared by the matching loop and the self-trade
/// pre-scan.
fn price_ok(kind: OrderKind, side: Side, own_price: Option<u128>, candidate_price: u128) -> bool {
    match kind {
        OrderKind::Market => true,
        OrderKind::Limit | OrderKind::Ioc | OrderKind::Fok => {
            let p = own_price.expect("validated at order construction");
            match side {
                Side::Buy => candidate_price <= p,
                Side::Sell => candidate_price >= p,
            }
        }
        OrderKind::PostOnly => false,
        OrderKind::StopLimit | OrderKind::StopMarket => false,
    }
}

/// A single instrument's order book.
pub struct OrderBook {
    instrument: String,
    next_seq: u64,
    bids: BTreeMap<u128, VecDeque<Order>>,
    asks: BTreeMap<u128, VecDeque<Order>>,
    best_bids: BinaryHeap<BidEntry>,
    best_asks: BinaryHeap<AskEntry>,
    cancelled: HashSet<OrderId>,
    locations: HashMap<OrderId, OrderLocation>,
    buy_stops: BTreeMap<u128, VecDeque<Order>>,
    sell_stops: BTreeMap<u128, VecDeque<Order>>,
    last_trade_price: Option<u128>,
    last_trade_qty: Option<u64>,
    stp_enabled: bool,
    trade_log: TradeLog,
}

impl OrderBook {
    pub fn new(instrument: impl Into<String>, stp_enabled: bool) -> Self {
        OrderBook {
            instrument: instrument.into(),
            next_seq: 0,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            best_bids: BinaryHeap::new(),
            best_asks: BinaryHeap::new(),
            cancelled: HashSet::new(),
            locations: HashMap::new(),
            buy_stops: BTreeMap::new(),
            sell_stops: BTreeMap::new(),
            last_trade_price: None,
            last_trade_qty: None,
            stp_enabled,
            trade_log: TradeLog::new(),
        }
    }

    /// This instrument's append-only trade history, in submission order.
    pub fn trade_log(&self) -> &TradeLog {
        &self.trade_log
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn last_trade_price(&self) -> Option<u128> {
        self.last_trade_price
    }

    pub fn last_trade_qty(&self) -> Option<u64> {
        self.last_trade_qty
    }

    /// Live quantity resting at `price` on `side`, cancelled orders
    /// excluded. Used for L1's best-bid/ask quantity.
    pub fn qty_at_price(&self, side: Side, price: u128) -> u64 {
        let levels = match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        };
        levels
            .get(&price)
            .map(|deque| {
                deque
                    .iter()
                    .filter(|o| !self.cancelled.contains(&o.id))
                    .map(|o| o.remaining_qty)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Aggregated depth, best-first, cancelled orders excluded, truncated
    /// to `depth` price levels. Used for L2 market data.
    pub fn depth(&mut self, side: Side, depth: usize) -> Vec<PriceLevelSnapshot> {
        self.compact(side);
        let levels = match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        };
        let cancelled = &self.cancelled;
        let iter: Box<dyn Iterator<Item = (&u128, &VecDeque<Order>)>> = match side {
            Side::Buy => Box::new(levels.iter().rev()),
            Side::Sell => Box::new(levels.iter()),
        };
        iter.filter_map(|(&price, deque)| {
            let qty: u64 = deque
                .iter()
                .filter(|o| !cancelled.contains(&o.id))
                .map(|o| o.remaining_qty)
                .sum();
            (qty > 0).then_some(PriceLevelSnapshot {
                price,
                quantity: qty,
            })
        })
        .take(depth)
        .collect()
    }

    /// Per-order depth, best-first, cancelled orders excluded, truncated
    /// to `depth` price levels, orders in FIFO order within each level.
    /// Used for L3 market data.
    pub fn l3_depth(&mut self, side: Side, depth: usize) -> Vec<(u128, Vec<Order>)> {
        self.compact(side);
        let levels = match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        };
        let cancelled = &self.cancelled;
        let iter: Box<dyn Iterator<Item = (&u128, &VecDeque<Order>)>> = match side {
            Side::Buy => Box::new(levels.iter().rev()),
            Side::Sell => Box::new(levels.iter()),
        };
        iter.filter_map(|(&price, deque)| {
            let orders: Vec<Order> = deque
                .iter()
                .filter(|o| !cancelled.contains(&o.id))
                .cloned()
                .collect();
            (!orders.is_empty()).then_some((price, orders))
        })
        .take(depth)
        .collect()
    }

    /// Submit a non-stop order for immediate matching, or a stop order for
    /// off-book storage. Stops the last-trade-price update of each fill
    /// makes ready are triggered from inside the match loop itself, between
    /// one fill and the next, so a stop crossed mid-walk trades immediately
    /// rather than after the triggering order's own matching finishes.
    pub fn submit(&mut self, order: Order) -> Result<SubmitOutcome, ExchangeError> {
        if order.kind.is_stop() {
            self.validate_stop_price(&order)?;
            let id = order.id;
            self.insert_stop(order);
            return Ok(SubmitOutcome {
                order_id: id,
                trades: Vec::new(),
                discarded_qty: 0,
                stop_triggers: Vec::new(),
            });
        }

        let order_id = order.id;
        if self.stp_enabled {
            self.check_self_trade(&order)?;
        }
        let (trades, discarded_qty, stop_triggers) = self.run_match_loop(order)?;

        Ok(SubmitOutcome {
            order_id,
            trades,
            discarded_qty,
            stop_triggers,
        })
    }

    /// Drain every stop order the current last-trade price makes ready,
    /// synthesising and submitting a fresh order for each through the same
    /// match loop. Re-triggered orders may themselves produce fills that
    /// make further stops ready; this loop re-reads `pop_one_ready_stop`
    /// after each one, so cascades resolve fully before returning.
    fn trigger_ready_stops(&mut self) -> Result<(Vec<Trade>, Vec<StopTrigger>), ExchangeError> {
        let mut trades = Vec::new();
        let mut stop_triggers = Vec::new();

        while let Some(stop) = self.pop_one_ready_stop() {
            let underlying_kind = stop
                .underlying_kind
                .expect("a stop order always carries an underlying kind");
            let stop_price = stop
                .stop_price
                .expect("a stop order always carries a stop price");
            let original_stop_id = stop.id;
            let new_order_id = OrderId::new();

            if self.stp_enabled && self.check_self_trade(&stop).is_err() {
                stop_triggers.push(StopTrigger {
                    original_stop_id,
                    new_order_id,
                    participant_id: stop.participant_id,
                    side: stop.side,
                    qty: stop.remaining_qty,
                    stop_price,
                    underlying_kind,
                    limit_price: stop.limit_price,
                    discarded_qty: stop.remaining_qty,
                });
                continue;
            }

            let qty = stop.remaining_qty;
            let participant_id = stop.participant_id.clone();
            let side = stop.side;
            let limit_price = stop.limit_price;
            let synthesised = Order {
                id: new_order_id,
                kind: match underlying_kind {
                    UnderlyingKind::Limit => OrderKind::Limit,
                    UnderlyingKind::Market => OrderKind::Market,
                },
                stop_price: None,
                underlying_kind: None,
                ..stop
            };
            let (new_trades, discarded_qty, nested_triggers) = self.run_match_loop(synthesised)?;
            trades.extend(new_trades);
            stop_triggers.push(StopTrigger {
                original_stop_id,
                new_order_id,
                participant_id,
                side,
                qty,
                stop_price,
                underlying_kind,
                limit_price,
                discarded_qty,
            });
            stop_triggers.extend(nested_triggers);
        }

        Ok((trades, stop_triggers))
    }

    /// Cancel a resting or untriggered-stop order. Returns `None` if the
    /// id is unknown.
    pub fn cancel(&mut self, id: OrderId) -> Option<Discard> {
        match *self.locations.get(&id)? {
            OrderLocation::Resting { side, .. } => {
                let order = self.take_resting(id)?;
                Some(Discard {
                    participant_id: order.participant_id,
                    side,
                    qty: order.remaining_qty,
                })
            }
            OrderLocation::Stop { side, .. } => {
                let order = self.take_stop(id)?;
                Some(Discard {
                    participant_id: order.participant_id,
                    side,
                    qty: order.remaining_qty,
                })
            }
        }
    }

    /// Modify a resting or stop order in place (pure quantity decrease) or
    /// via cancel-and-resubmit (price change, quantity increase, or any
    /// stop modification).
    pub fn modify(
        &mut self,
        id: OrderId,
        new_qty: u64,
        new_price: Option<u128>,
        new_stop_price: Option<u128>,
    ) -> Result<ModifyOutcome, ExchangeError> {
        if new_qty == 0 {
            return Err(ExchangeError::InvalidOrderQuantity);
        }
        let location = *self.locations.get(&id).ok_or(ExchangeError::OrderNotFound(id))?;
        match location {
            OrderLocation::Stop { .. } => {
                let old = self.take_stop(id).ok_or(ExchangeError::OrderNotFound(id))?;
                let old_remaining = old.remaining_qty;
                let new_order = Order::new(
                    OrderId::new(),
                    old.participant_id,
                    old.side,
                    old.kind,
                    new_qty,
                    crate::utils::current_time_millis(),
                    new_price.or(old.limit_price),
                    new_stop_price.or(old.stop_price),
                )?;
                let outcome = self.submit(new_order)?;
                Ok(ModifyOutcome {
                    old_remaining_qty: old_remaining,
                    new_submitted_qty: new_qty,
                    outcome,
                })
            }
            OrderLocation::Resting { side, price } => {
                let levels = match side {
                    Side::Buy => &self.bids,
                    Side::Sell => &self.asks,
                };
                let old = levels
                    .get(&price)
                    .and_then(|deque| deque.iter().find(|o| o.id == id))
                    .cloned()
                    .ok_or(ExchangeError::OrderNotFound(id))?;
                let old_remaining = old.remaining_qty;
                let price_changed = new_price.is_some_and(|p| p != price);
                let qty_increase = new_qty > old_remaining;

                if !price_changed && !qty_increase {
                    let levels = match side {
                        Side::Buy => &mut self.bids,
                        Side::Sell => &mut self.asks,
                    };
                    if let Some(deque) = levels.get_mut(&price) {
                        if let Some(o) = deque.iter_mut().find(|o| o.id == id) {
                            o.remaining_qty = new_qty;
                        }
                    }
                    return Ok(ModifyOutcome {
                        old_remaining_qty: old_remaining,
                        new_submitted_qty: new_qty,
                        outcome: SubmitOutcome {
                            order_id: id,
                            trades: Vec::new(),
                            discarded_qty: 0,
                            stop_triggers: Vec::new(),
                        },
                    });
                }

                self.take_resting(id);
                let new_order = Order::new(
                    OrderId::new(),
                    old.participant_id,
                    old.side,
                    old.kind,
                    new_qty,
                    crate::utils::current_time_millis(),
                    new_price.or(old.limit_price),
                    None,
                )?;
                let outcome = self.submit(new_order)?;
                Ok(ModifyOutcome {
                    old_remaining_qty: old_remaining,
                    new_submitted_qty: new_qty,
                    outcome,
                })
            }
        }
    }

    /// The current best bid, after compacting away any cancelled top
    /// entries.
    pub fn best_bid(&mut self) -> Option<u128> {
        self.peek_best(Side::Buy)
    }

    /// The current best ask, after compacting away any cancelled top
    /// entries.
    pub fn best_ask(&mut self) -> Option<u128> {
        self.peek_best(Side::Sell)
    }

    /// Every order still live on this book: resting plus untriggered
    /// stops.
    pub fn pending_orders(&self) -> Vec<Order> {
        let mut out = Vec::new();
        for deque in self.bids.values().chain(self.asks.values()) {
            for o in deque {
                if !self.cancelled.contains(&o.id) {
                    out.push(o.clone());
                }
            }
        }
        for deque in self.buy_stops.values().chain(self.sell_stops.values()) {
            out.extend(deque.iter().cloned());
        }
        out
    }

    /// A cloned view of a single order, resting or stop. Mainly useful to
    /// tests asserting order-map/price-level consistency.
    pub fn order_info(&self, id: OrderId) -> Option<Order> {
        match *self.locations.get(&id)? {
            OrderLocation::Resting { side, price } => {
                let levels = match side {
                    Side::Buy => &self.bids,
                    Side::Sell => &self.asks,
                };
                levels.get(&price)?.iter().find(|o| o.id == id).cloned()
            }
            OrderLocation::Stop { side, stop_price } => {
                let store = match side {
                    Side::Buy => &self.buy_stops,
                    Side::Sell => &self.sell_stops,
                };
                store
                    .get(&stop_price)?
                    .iter()
                    .find(|o| o.id == id)
                    .cloned()
            }
        }
    }

    /// A checksummable snapshot of resting liquidity, best price first on
    /// each side.
    pub fn snapshot(&self) -> BookSnapshot {
        let level_qty = |deque: &VecDeque<Order>| -> u64 {
            deque
                .iter()
                .filter(|o| !self.cancelled.contains(&o.id))
                .map(|o| o.remaining_qty)
                .sum()
        };
        let bids = self
            .bids
            .iter()
            .rev()
            .map(|(&price, deque)| PriceLevelSnapshot {
                price,
                quantity: level_qty(deque),
            })
            .filter(|l| l.quantity > 0)
            .collect();
        let asks = self
            .asks
            .iter()
            .map(|(&price, deque)| PriceLevelSnapshot {
                price,
                quantity: level_qty(deque),
            })
            .filter(|l| l.quantity > 0)
            .collect();
        BookSnapshot {
            instrument: self.instrument.clone(),
            bids,
            asks,
            last_trade_price: self.last_trade_price,
        }
    }

    fn peek_best(&mut self, side: Side) -> Option<u128> {
        self.compact(side);
        match side {
            Side::Buy => self.best_bids.peek().map(|e| e.price),
            Side::Sell => self.best_asks.peek().map(|e| e.price),
        }
    }

    /// Drop best-price-index entries whose order has already been
    /// cancelled, until the top of the heap points at a live order (or the
    /// heap empties).
    pub fn compact(&mut self, side: Side) {
        loop {
            let top = match side {
                Side::Buy => self.best_bids.peek().map(|e| (e.order_id, e.price)),
                Side::Sell => self.best_asks.peek().map(|e| (e.order_id, e.price)),
            };
            let Some((order_id, price)) = top else {
                return;
            };
            if !self.cancelled.contains(&order_id) {
                return;
            }
            match side {
                Side::Buy => {
                    self.best_bids.pop();
                }
                Side::Sell => {
                    self.best_asks.pop();
                }
            }
            self.cancelled.remove(&order_id);
            self.locations.remove(&order_id);
            let levels = match side {
                Side::Buy => &mut self.bids,
                Side::Sell => &mut self.asks,
            };
            if let Some(deque) = levels.get_mut(&price) {
                if deque.front().map(|o| o.id) == Some(order_id) {
                    deque.pop_front();
                }
                if deque.is_empty() {
                    levels.remove(&price);
                }
            }
        }
    }

    fn rest(&mut self, order: Order) {
        let side = order.side;
        let price = order
            .limit_price
            .expect("a resting order always carries a limit price");
        let seq = self.next_seq;
        self.next_seq += 1;
        self.locations
            .insert(order.id, OrderLocation::Resting { side, price });
        match side {
            Side::Buy => {
                self.best_bids.push(BidEntry {
                    price,
                    seq,
                    order_id: order.id,
                });
                self.bids.entry(price).or_default().push_back(order);
            }
            Side::Sell => {
                self.best_asks.push(AskEntry {
                    price,
                    seq,
                    order_id: order.id,
                });
                self.asks.entry(price).or_default().push_back(order);
            }
        }
    }

    fn take_resting(&mut self, id: OrderId) -> Option<Order> {
        let OrderLocation::Resting { side, price } = *self.locations.get(&id)? else {
            return None;
        };
        let levels = match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        };
        let order = levels.get(&price)?.iter().find(|o| o.id == id)?.clone();
        self.cancelled.insert(id);
        Some(order)
    }

    fn take_stop(&mut self, id: OrderId) -> Option<Order> {
        let OrderLocation::Stop { side, stop_price } = *self.locations.get(&id)? else {
            return None;
        };
        let store = match side {
            Side::Buy => &mut self.buy_stops,
            Side::Sell => &mut self.sell_stops,
        };
        let deque = store.get_mut(&stop_price)?;
        let pos = deque.iter().position(|o| o.id == id)?;
        let order = deque.remove(pos)?;
        if deque.is_empty() {
            store.remove(&stop_price);
        }
        self.locations.remove(&id);
        Some(order)
    }

    fn validate_stop_price(&self, order: &Order) -> Result<(), ExchangeError> {
        let sp = order
            .stop_price
            .expect("a stop order always carries a stop price");
        match (order.side, self.last_trade_price) {
            (Side::Buy, Some(last)) if sp <= last => {
                Err(ExchangeError::InvalidStopPrice { is_buy: true })
            }
            (Side::Sell, Some(last)) if sp >= last => {
                Err(ExchangeError::InvalidStopPrice { is_buy: false })
            }
            _ => Ok(()),
        }
    }

    fn insert_stop(&mut self, order: Order) {
        let side = order.side;
        let sp = order
            .stop_price
            .expect("a stop order always carries a stop price");
        self.locations
            .insert(order.id, OrderLocation::Stop { side, stop_price: sp });
        match side {
            Side::Buy => self.buy_stops.entry(sp).or_default().push_back(order),
            Side::Sell => self.sell_stops.entry(sp).or_default().push_back(order),
        }
    }

    /// Pop the single most-ready stop order across both sides, if the last
    /// trade price has made one eligible. Buy-stops are checked before
    /// sell-stops; the two sets can never overlap in triggering on the same
    /// last-trade-price update in a way that makes this ordering observable
    /// from outside the book.
    fn pop_one_ready_stop(&mut self) -> Option<Order> {
        let last = self.last_trade_price?;
        if let Some((&price, _)) = self.buy_stops.first_key_value() {
            if price <= last {
                let deque = self.buy_stops.get_mut(&price).expect("just peeked");
                let stop = deque.pop_front().expect("non-empty by construction");
                if deque.is_empty() {
                    self.buy_stops.remove(&price);
                }
                self.locations.remove(&stop.id);
                return Some(stop);
            }
        }
        if let Some((&price, _)) = self.sell_stops.last_key_value() {
            if price >= last {
                let deque = self.sell_stops.get_mut(&price).expect("just peeked");
                let stop = deque.pop_front().expect("non-empty by construction");
                if deque.is_empty() {
                    self.sell_stops.remove(&price);
                }
                self.locations.remove(&stop.id);
                return Some(stop);
            }
        }
        None
    }

    /// Scan the opposite side in best-first order; abort if a resting
    /// order from the same participant is encountered before either the
    /// incoming order's quantity is covered or price-ok fails.
    fn check_self_trade(&self, order: &Order) -> Result<(), ExchangeError> {
        let opp_side = order.side.opposite();
        let levels = match opp_side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        };
        let iter: Box<dyn Iterator<Item = (&u128, &VecDeque<Order>)>> = match opp_side {
            Side::Buy => Box::new(levels.iter().rev()),
            Side::Sell => Box::new(levels.iter()),
        };
        let mut cumulative: u64 = 0;
        for (&price, deque) in iter {
            if !price_ok(order.kind, order.side, order.limit_price, price) {
                break;
            }
            for resting in deque.iter() {
                if self.cancelled.contains(&resting.id) {
                    continue;
                }
                if resting.participant_id == order.participant_id {
                    return Err(ExchangeError::SelfTradePrevention {
                        order_id: order.id,
                        user_id: order.participant_id.clone(),
                    });
                }
                cumulative = cumulative.saturating_add(resting.remaining_qty);
                if cumulative >= order.remaining_qty {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Total live opposite-side quantity available at acceptable prices,
    /// capped early once it reaches `needed`. Used by the fill-or-kill
    /// pre-check.
    fn cumulative_available(
        &self,
        opp_side: Side,
        kind: OrderKind,
        side: Side,
        limit_price: Option<u128>,
        needed: u64,
    ) -> u64 {
        let levels = match opp_side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        };
        let iter: Box<dyn Iterator<Item = (&u128, &VecDeque<Order>)>> = match opp_side {
            Side::Buy => Box::new(levels.iter().rev()),
            Side::Sell => Box::new(levels.iter()),
        };
        let mut total: u64 = 0;
        for (&price, deque) in iter {
            if !price_ok(kind, side, limit_price, price) {
                break;
            }
            for o in deque.iter() {
                if self.cancelled.contains(&o.id) {
                    continue;
                }
                total = total.saturating_add(o.remaining_qty);
            }
            if total >= needed {
                break;
            }
        }
        total
    }

    /// Run the generic price/time-priority loop for a single non-stop
    /// order. Returns the trades produced, the quantity that neither traded
    /// nor rested, and every stop order triggered along the way (stops are
    /// triggered after each individual fill, not after the whole order is
    /// done matching, so a stop crossed mid-walk trades immediately).
    fn run_match_loop(
        &mut self,
        mut order: Order,
    ) -> Result<(Vec<Trade>, u64, Vec<StopTrigger>), ExchangeError> {
        let mut trades = Vec::new();
        let mut stop_triggers = Vec::new();
        let opp_side = order.side.opposite();

        if order.kind == OrderKind::Fok {
            let available = self.cumulative_available(
                opp_side,
                order.kind,
                order.side,
                order.limit_price,
                order.remaining_qty,
            );
            if available < order.remaining_qty {
                return Err(ExchangeError::FokInsufficientLiquidity);
            }
        }

        if order.kind == OrderKind::PostOnly {
            let crosses = match order.side {
                Side::Buy => self
                    .best_ask()
                    .is_some_and(|ask| order.limit_price.expect("validated") >= ask),
                Side::Sell => self
                    .best_bid()
                    .is_some_and(|bid| order.limit_price.expect("validated") <= bid),
            };
            if crosses {
                return Err(ExchangeError::PostOnlyViolation);
            }
            self.rest(order);
            return Ok((trades, 0, stop_triggers));
        }

        loop {
            let Some(head_price) = self.peek_best(opp_side) else {
                break;
            };
            if order.remaining_qty == 0 {
                break;
            }
            if !price_ok(order.kind, order.side, order.limit_price, head_price) {
                break;
            }

            let levels = match opp_side {
                Side::Buy => &mut self.bids,
                Side::Sell => &mut self.asks,
            };
            let deque = levels
                .get_mut(&head_price)
                .expect("best-price index points at a live level");
            let resting_done;
            let resting_id;
            let resting_participant;
            let trade_qty;
            {
                let resting = deque
                    .front_mut()
                    .expect("best-price index points at a live order");
                trade_qty = order.remaining_qty.min(resting.remaining_qty);
                order.remaining_qty -= trade_qty;
                resting.remaining_qty -= trade_qty;
                resting_done = resting.remaining_qty == 0;
                resting_id = resting.id;
                resting_participant = resting.participant_id.clone();
            }
            if resting_done {
                deque.pop_front();
                match opp_side {
                    Side::Buy => {
                        self.best_bids.pop();
                    }
                    Side::Sell => {
                        self.best_asks.pop();
                    }
                }
            }
            let level_now_empty = deque.is_empty();
            if level_now_empty {
                levels.remove(&head_price);
            }
            if resting_done {
                self.locations.remove(&resting_id);
            }

            let (buy_participant, sell_participant, buy_order_id, sell_order_id) = match order.side
            {
                Side::Buy => (
                    order.participant_id.clone(),
                    resting_participant,
                    order.id,
                    resting_id,
                ),
                Side::Sell => (
                    resting_participant,
                    order.participant_id.clone(),
                    resting_id,
                    order.id,
                ),
            };
            let trade = Trade::new(
                crate::utils::current_time_millis(),
                self.instrument.clone(),
                head_price,
                trade_qty,
                buy_participant,
                sell_participant,
                buy_order_id,
                sell_order_id,
                order.side,
            )?;
            self.last_trade_price = Some(head_price);
            self.last_trade_qty = Some(trade_qty);
            self.trade_log.record(trade.clone())?;
            trades.push(trade);

            let (triggered_trades, triggered) = self.trigger_ready_stops()?;
            trades.extend(triggered_trades);
            stop_triggers.extend(triggered);
        }

        let discarded_qty = match order.kind {
            OrderKind::Limit => {
                if order.remaining_qty > 0 {
                    self.rest(order);
                }
                0
            }
            OrderKind::Market | OrderKind::Ioc | OrderKind::Fok => order.remaining_qty,
            OrderKind::PostOnly | OrderKind::StopLimit | OrderKind::StopMarket => {
                unreachable!("handled before the match loop")
            }
        };

        Ok((trades, discarded_qty, stop_triggers))
    }
}
