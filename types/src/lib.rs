//! Common types for the raspa scratch-card service: money, return-to-player settings,
//! ledger records and the JSON payloads exchanged over HTTP.

pub mod api;
mod constants;
mod ledger;
mod money;
mod rtp;
mod serde_decimal;

pub use constants::*;
pub use ledger::{
    Account, Deposit, DepositStatus, GameRound, NewRound, RoundMetadata, UserId, Withdrawal,
};
pub use money::{Money, MoneyError, MONEY_SCALE};
pub use rtp::{Rtp, RtpError};
