//! Round settlement: one play, settled as a single transaction.
//!
//! Validation (allowed stake, user exists, balance covers the stake) happens before the
//! ledger row is locked and never writes. Under the lock the row is re-read, since a
//! concurrent round may have committed in between, and the balance check is repeated.

use crate::error::LedgerError;
use crate::prize::{compute_prize, Draw, Prize};
use crate::store::{read_rtp, LedgerStore, Settings};
use raspa_types::{is_allowed_bet, GameRound, Money, NewRound, RoundMetadata, Rtp, UserId};
use tracing::{debug, info};

#[derive(Clone, Debug, PartialEq)]
pub struct RoundOutcome {
    pub round: GameRound,
    pub prize: Prize,
    pub rtp: Rtp,
    pub new_balance: Money,
    pub new_rollover: Money,
}

impl RoundOutcome {
    pub fn response(&self) -> raspa_types::api::PlayResponse {
        raspa_types::api::PlayResponse {
            success: true,
            prize: self.prize.amount,
            final_balance: self.new_balance,
            multiplier: self.prize.multiplier,
            bet_amount: self.round.bet_amount,
        }
    }
}

pub fn play_round<D: Draw + ?Sized>(
    ledger: &dyn LedgerStore,
    settings: &dyn Settings,
    draw: &mut D,
    user: UserId,
    bet: Money,
) -> Result<RoundOutcome, LedgerError> {
    if !is_allowed_bet(bet) {
        return Err(LedgerError::InvalidBet { bet });
    }
    let account = ledger.account(user)?.ok_or(LedgerError::UserNotFound(user))?;
    if account.balance < bet {
        return Err(LedgerError::InsufficientFunds {
            balance: account.balance,
            required: bet,
        });
    }

    let mut handle = ledger.lock(user)?.ok_or(LedgerError::UserNotFound(user))?;
    let locked = handle.account().clone();
    if locked.balance < bet {
        debug!(%user, balance = %locked.balance, %bet, "balance changed before lock");
        return Err(LedgerError::InsufficientFunds {
            balance: locked.balance,
            required: bet,
        });
    }

    let rtp = read_rtp(settings)?;
    let prize = compute_prize(draw, bet, rtp);

    let new_balance = locked
        .balance
        .checked_sub(bet)
        .and_then(|balance| balance.checked_add(prize.amount))
        .ok_or_else(|| anyhow::anyhow!("balance overflow settling round for user {user}"))?;
    let new_rollover = locked.rollover_required.saturating_sub_floor_zero(bet);

    handle.set_balances(new_balance, new_rollover)?;
    let round = handle.append_round(NewRound {
        user_id: user,
        bet_amount: bet,
        prize_amount: prize.amount,
        multiplier: prize.multiplier,
        metadata: RoundMetadata { rtp },
    })?;
    handle.commit()?;

    info!(
        %user,
        round_id = round.id,
        %bet,
        prize = %prize.amount,
        multiplier = prize.multiplier,
        %rtp,
        balance = %new_balance,
        rollover = %new_rollover,
        "round settled"
    );

    Ok(RoundOutcome {
        round,
        prize,
        rtp,
        new_balance,
        new_rollover,
    })
}
