use crate::{Money, Rtp};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Balance and rollover state of a single user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: UserId,
    pub balance: Money,
    /// Bet volume still to be wagered before withdrawals are allowed.
    pub rollover_required: Money,
    pub first_deposit_made: bool,
    pub created_at_ms: u64,
}

impl Account {
    pub fn new(id: UserId, created_at_ms: u64) -> Self {
        Self {
            id,
            balance: Money::ZERO,
            rollover_required: Money::ZERO,
            first_deposit_made: false,
            created_at_ms,
        }
    }
}

/// Stored alongside each round as JSON.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundMetadata {
    pub rtp: Rtp,
}

impl RoundMetadata {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!(r#"{{"rtp":{}}}"#, self.rtp))
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// Round row as handed to storage; id and timestamp are assigned on insert.
#[derive(Clone, Debug, PartialEq)]
pub struct NewRound {
    pub user_id: UserId,
    pub bet_amount: Money,
    pub prize_amount: Money,
    pub multiplier: f64,
    pub metadata: RoundMetadata,
}

/// Immutable record of one play.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRound {
    pub id: i64,
    pub user_id: UserId,
    pub bet_amount: Money,
    pub prize_amount: Money,
    pub multiplier: f64,
    pub metadata: RoundMetadata,
    pub created_at_ms: u64,
}

impl GameRound {
    pub fn from_new(id: i64, round: NewRound, created_at_ms: u64) -> Self {
        Self {
            id,
            user_id: round.user_id,
            bet_amount: round.bet_amount,
            prize_amount: round.prize_amount,
            multiplier: round.multiplier,
            metadata: round.metadata,
            created_at_ms,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    Pending,
    Paid,
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::Pending => "pending",
            DepositStatus::Paid => "paid",
        }
    }
}

impl std::str::FromStr for DepositStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            other => Err(format!("unknown deposit status: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deposit {
    pub id: i64,
    pub user_id: UserId,
    pub amount: Money,
    pub status: DepositStatus,
    pub created_at_ms: u64,
    pub paid_at_ms: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    pub id: i64,
    pub user_id: UserId,
    pub amount: Money,
    pub created_at_ms: u64,
}
