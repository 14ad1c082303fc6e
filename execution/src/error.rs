use raspa_types::{Money, UserId, ALLOWED_BETS};
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum LedgerError {
    #[error("invalid bet {bet}")]
    InvalidBet { bet: Money },
    #[error("user {0} not found")]
    UserNotFound(UserId),
    #[error("deposit {0} not found")]
    DepositNotFound(i64),
    #[error("insufficient funds (balance={balance}, required={required})")]
    InsufficientFunds { balance: Money, required: Money },
    #[error("rollover pending ({remaining} still to wager)")]
    RolloverPending { remaining: Money },
    #[error("amount must be positive (got {0})")]
    InvalidAmount(Money),
    /// Nothing was committed; the call is safe to retry.
    #[error("storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl LedgerError {
    /// Allowed stakes to echo back to the caller on a rejected bet.
    pub fn allowed_bets(&self) -> Option<&'static [Money]> {
        match self {
            LedgerError::InvalidBet { .. } => Some(&ALLOWED_BETS),
            _ => None,
        }
    }

    pub fn is_client_error(&self) -> bool {
        !matches!(self, LedgerError::Storage(_))
    }
}
