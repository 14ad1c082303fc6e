//! Raspa execution layer.
//!
//! This crate contains the scratch-card payout engine and the ledger operations built on it:
//! round settlement, first-deposit rollover activation, deposit confirmation and withdrawals.
//!
//! ## Ledger invariants
//! - `balance` and `rollover_required` are never negative after a commit.
//! - A round reduces `rollover_required` by its stake (floored at zero) and never raises it;
//!   only first-deposit activation raises it, and that happens at most once per user.
//! - Every read-modify-write of a user's row runs under that row's [`LedgerHandle`]; a
//!   failure anywhere inside rolls back every write made through the handle.
//!
//! Storage is abstracted behind [`LedgerStore`] and [`Settings`]. [`Memory`] is an in-process
//! backend; the `mocks` feature adds its test hooks (row overwrites, fault injection).
//!
//! ## Playing a round (example)
//! ```rust,ignore
//! use raspa_execution::{play_round, Memory, RngDraw};
//! use raspa_types::Money;
//!
//! let memory = Memory::new();
//! let user = memory.create_account()?.id;
//! let mut draw = RngDraw(rand::thread_rng());
//! let outcome = play_round(&memory, &memory, &mut draw, user, Money::from_cents(100))?;
//! println!("won {} at {}x", outcome.prize.amount, outcome.prize.multiplier);
//! ```

pub mod deposit;
mod error;
pub mod prize;
pub mod rollover;
pub mod settlement;
pub mod store;
pub mod withdrawal;

mod memory;

#[cfg(test)]
mod concurrency_tests;

pub use deposit::{confirm_deposit, create_deposit, DepositConfirmation};
pub use error::LedgerError;
pub use prize::{compute_prize, compute_prize_with_draw, Draw, FixedDraw, Prize, RngDraw};
pub use rollover::activate_first_deposit_rollover;
pub use settlement::{play_round, RoundOutcome};
pub use store::{
    now_ms, read_rtp, write_rtp, LedgerHandle, LedgerStore, PaidTransition, Settings,
};
pub use withdrawal::{can_withdraw, request_withdrawal};

pub use memory::Memory;
