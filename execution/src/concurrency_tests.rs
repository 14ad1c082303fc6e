//! Concurrency tests for ledger serialization.
//!
//! Rounds for the same user must be linearized by the ledger lock: no lost updates and no
//! overdraft, whatever the interleaving of pre-lock validation.

#[cfg(test)]
mod tests {
    use crate::error::LedgerError;
    use crate::memory::Memory;
    use crate::prize::{FixedDraw, RngDraw};
    use crate::rollover::activate_first_deposit_rollover;
    use crate::settlement::play_round;
    use crate::store::LedgerStore;
    use rand::{rngs::StdRng, SeedableRng};
    use raspa_types::{Money, UserId};
    use std::sync::{Arc, Barrier};

    fn cents(value: i64) -> Money {
        Money::from_cents(value)
    }

    fn funded(memory: &Memory, balance: i64) -> UserId {
        let mut account = memory.create_account().unwrap();
        account.balance = cents(balance);
        memory.put_account(account.clone()).unwrap();
        account.id
    }

    #[test]
    fn balance_covering_one_bet_admits_exactly_one_round() {
        let memory = Arc::new(Memory::new());
        let user = funded(&memory, 1_000);
        let players = 16;
        let barrier = Arc::new(Barrier::new(players));

        let handles = (0..players)
            .map(|_| {
                let memory = memory.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    // Losing draw, so the winner cannot refill the balance.
                    play_round(
                        memory.as_ref(),
                        memory.as_ref(),
                        &mut FixedDraw(0.99),
                        user,
                        cents(1_000),
                    )
                })
            })
            .collect::<Vec<_>>();

        let mut succeeded = 0;
        for handle in handles {
            match handle.join().unwrap() {
                Ok(_) => succeeded += 1,
                Err(LedgerError::InsufficientFunds { .. }) => {}
                Err(err) => panic!("unexpected error: {err}"),
            }
        }

        assert_eq!(succeeded, 1);
        let account = memory.account(user).unwrap().unwrap();
        assert_eq!(account.balance, Money::ZERO);
        assert_eq!(memory.rounds(user, 100).unwrap().len(), 1);
    }

    #[test]
    fn parallel_rounds_do_not_lose_updates() {
        let memory = Arc::new(Memory::new());
        let start = 100_000;
        let users = (0..4).map(|_| funded(&memory, start)).collect::<Vec<_>>();
        let rounds_per_thread = 50;

        let handles = users
            .iter()
            .flat_map(|user| std::iter::repeat(*user).take(3))
            .enumerate()
            .map(|(seed, user)| {
                let memory = memory.clone();
                std::thread::spawn(move || {
                    let mut draw = RngDraw(StdRng::seed_from_u64(seed as u64));
                    for _ in 0..rounds_per_thread {
                        play_round(memory.as_ref(), memory.as_ref(), &mut draw, user, cents(100))
                            .unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        for user in users {
            let rounds = memory.rounds(user, 1_000).unwrap();
            assert_eq!(rounds.len(), 3 * rounds_per_thread);
            let net: i64 = rounds
                .iter()
                .map(|round| round.prize_amount.cents() - round.bet_amount.cents())
                .sum();
            let account = memory.account(user).unwrap().unwrap();
            assert_eq!(account.balance.cents(), start + net);
        }
    }

    #[test]
    fn activation_interleaved_with_rounds_keeps_rollover_consistent() {
        let memory = Arc::new(Memory::new());
        let user = funded(&memory, 50_000);
        let barrier = Arc::new(Barrier::new(3));

        let activators = (0..2)
            .map(|_| {
                let memory = memory.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    activate_first_deposit_rollover(memory.as_ref(), user, cents(50_000)).unwrap()
                })
            })
            .collect::<Vec<_>>();
        let player = {
            let memory = memory.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                for _ in 0..10 {
                    play_round(
                        memory.as_ref(),
                        memory.as_ref(),
                        &mut FixedDraw(0.99),
                        user,
                        cents(1_000),
                    )
                    .unwrap();
                }
            })
        };

        let applied = activators
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|applied| *applied)
            .count();
        player.join().unwrap();

        assert_eq!(applied, 1);
        let account = memory.account(user).unwrap().unwrap();
        assert_eq!(account.balance, cents(40_000));
        // Rounds before activation burn nothing, rounds after burn 10.00 each.
        assert!(account.rollover_required >= cents(40_000));
        assert!(account.rollover_required <= cents(50_000));
        assert!(account.first_deposit_made);
    }
}
