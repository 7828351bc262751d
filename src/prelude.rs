/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/10/25
******************************************************************************/

//! Prelude module that re-exports commonly used types.
//!
//! ```rust
//! use exchange_engine::prelude::*;
//! ```

// Core domain types
pub use crate::order::{Order, OrderId, OrderKind, Side, UnderlyingKind};
pub use crate::trade::{Trade, TradeLog};

// Order book
pub use crate::book::{BookSnapshot, OrderBook, PriceLevelSnapshot};

// Accounts and action log
pub use crate::account::ParticipantAccount;
pub use crate::action_log::{ActionLog, ActionLogEntry};

// The coordinator and its read models
pub use crate::exchange::{ExchangeCoordinator, L1View, L2View, L3View, QuotaView};

// Fees and errors
pub use crate::error::ExchangeError;
pub use crate::fees::FeeSchedule;

// Utility functions
pub use crate::utils::current_time_millis;
