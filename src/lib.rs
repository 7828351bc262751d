//! # exchange-engine
//!
//! A single-venue, in-memory, multi-instrument matching engine.
//!
//! The engine accepts orders from registered participants, matches them by
//! price/time priority, emits trades, and keeps per-participant positions,
//! cash, realised P&L, exposure, and position-limit quotas up to date.
//!
//! ## Scope
//!
//! The core is the per-instrument matching engine and order-book state
//! machine ([`book`]): price levels, best-price indexes, the seven
//! order-kind matchers (limit, market, IOC, FOK, post-only, stop-limit,
//! stop-market), stop-order triggering, self-trade prevention, lazy
//! cancellation, and order modification. Wrapped around it, the
//! [`exchange`] coordinator routes orders to the right book, settles
//! trades against participant accounts, and enforces position-limit quotas
//! before admission.
//!
//! Out of scope: a network protocol, durability/crash recovery,
//! clock synchronisation, fee scheduling beyond a flat per-fill fee,
//! margining, clearing, multi-venue routing, and currency conversion. This
//! crate is a library; a host process wires a façade (HTTP, persistence,
//! authentication, market-data feeds) around it.
//!
//! ## Concurrency
//!
//! The engine is single-threaded and cooperative by absence: every public
//! call on [`exchange::ExchangeCoordinator`] runs to completion before the
//! next is admitted. A host that wraps the engine in a multi-threaded
//! server must ensure only one thread holds it at a time; no intra-engine
//! locking is implemented or required.

pub mod account;
pub mod action_log;
pub mod book;
pub mod error;
pub mod exchange;
pub mod fees;
pub mod order;
pub mod trade;

pub mod prelude;
mod utils;

pub use account::ParticipantAccount;
pub use action_log::{ActionLog, ActionLogEntry};
pub use book::{BookSnapshot, OrderBook, PriceLevelSnapshot};
pub use error::ExchangeError;
pub use exchange::{ExchangeCoordinator, L1View, L2View, L3View, QuotaView};
pub use fees::FeeSchedule;
pub use order::{Order, OrderId, OrderKind, Side, UnderlyingKind};
pub use trade::{Trade, TradeLog};
pub use utils::current_time_millis;
