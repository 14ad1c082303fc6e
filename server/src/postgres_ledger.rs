//! Postgres ledger.
//!
//! Row locks are taken with `SELECT ... FOR UPDATE` inside an explicit transaction on a pooled
//! client. Settings go through a dedicated client so they never wait on the pool.

use anyhow::{anyhow, bail, Context, Result};
use postgres::{Client, NoTls, Row};
use raspa_execution::{now_ms, LedgerHandle, LedgerStore, PaidTransition, Settings};
use raspa_types::{
    Account, Deposit, DepositStatus, GameRound, Money, NewRound, RoundMetadata, UserId,
    Withdrawal,
};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};
use url::Url;

const ACCOUNT_COLUMNS: &str =
    "id, balance_cents, rollover_cents, first_deposit_made, created_at_ms";
const ROUND_COLUMNS: &str =
    "id, user_id, bet_cents, prize_cents, multiplier, metadata, created_at_ms";
const DEPOSIT_COLUMNS: &str = "id, user_id, amount_cents, status, created_at_ms, paid_at_ms";

pub struct PostgresLedger {
    url: String,
    clients: Vec<Mutex<Client>>,
    next: AtomicUsize,
    settings: Mutex<Client>,
}

impl PostgresLedger {
    pub fn connect(url: &str, pool_size: usize) -> Result<Self> {
        validate_postgres_url(url)?;
        let mut first = Client::connect(url, NoTls).context("open postgres ledger")?;
        init_schema_postgres(&mut first)?;

        let mut clients = vec![Mutex::new(first)];
        for _ in 1..pool_size.max(1) {
            let client = Client::connect(url, NoTls).context("open postgres ledger")?;
            clients.push(Mutex::new(client));
        }
        let settings = Client::connect(url, NoTls).context("open postgres settings client")?;
        info!(pool_size = clients.len(), "postgres ledger connected");
        Ok(Self {
            url: url.to_string(),
            clients,
            next: AtomicUsize::new(0),
            settings: Mutex::new(settings),
        })
    }

    /// Takes an idle client if there is one, otherwise waits on the next in rotation.
    fn client(&self) -> Result<MutexGuard<'_, Client>> {
        let guard = match self.clients.iter().find_map(|client| client.try_lock().ok()) {
            Some(guard) => guard,
            None => {
                let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.clients.len();
                self.clients[idx]
                    .lock()
                    .map_err(|_| anyhow!("postgres client poisoned"))?
            }
        };
        self.reconnect_if_closed(guard)
    }

    fn reconnect_if_closed<'a>(
        &self,
        mut guard: MutexGuard<'a, Client>,
    ) -> Result<MutexGuard<'a, Client>> {
        if guard.is_closed() {
            warn!("postgres client closed; reconnecting");
            *guard = Client::connect(&self.url, NoTls).context("reconnect postgres ledger")?;
        }
        Ok(guard)
    }
}

fn validate_postgres_url(url: &str) -> Result<()> {
    if allow_public_postgres() {
        return Ok(());
    }

    let parsed = Url::parse(url).context("parse postgres url")?;
    let scheme = parsed.scheme();
    if scheme != "postgres" && scheme != "postgresql" {
        bail!("postgres url must start with postgres:// or postgresql://");
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("postgres url missing host"))?;
    if host.eq_ignore_ascii_case("localhost") {
        return Ok(());
    }

    let host = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_private_ip(ip) {
            return Ok(());
        }
        bail!("postgres host is public; set RASPA_POSTGRES_ALLOW_PUBLIC=1 to override");
    }

    if allow_postgres_hostname() {
        return Ok(());
    }

    bail!("postgres host must be a private IP; set RASPA_POSTGRES_ALLOW_HOSTNAME=1 to allow hostnames");
}

fn env_flag(var: &str) -> bool {
    matches!(
        std::env::var(var).as_deref(),
        Ok("1") | Ok("true") | Ok("TRUE") | Ok("yes") | Ok("YES")
    )
}

fn allow_public_postgres() -> bool {
    env_flag("RASPA_POSTGRES_ALLOW_PUBLIC")
}

fn allow_postgres_hostname() -> bool {
    env_flag("RASPA_POSTGRES_ALLOW_HOSTNAME")
}

fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback(),
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unique_local() || v6.is_unicast_link_local(),
    }
}

fn init_schema_postgres(client: &mut Client) -> Result<()> {
    client
        .batch_execute(
            "CREATE TABLE IF NOT EXISTS accounts (
                id BIGSERIAL PRIMARY KEY,
                balance_cents BIGINT NOT NULL DEFAULT 0,
                rollover_cents BIGINT NOT NULL DEFAULT 0,
                first_deposit_made BOOLEAN NOT NULL DEFAULT FALSE,
                created_at_ms BIGINT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS game_rounds (
                id BIGSERIAL PRIMARY KEY,
                user_id BIGINT NOT NULL REFERENCES accounts(id),
                bet_cents BIGINT NOT NULL,
                prize_cents BIGINT NOT NULL,
                multiplier DOUBLE PRECISION NOT NULL,
                metadata TEXT NOT NULL,
                created_at_ms BIGINT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS game_rounds_user ON game_rounds(user_id, id);
            CREATE TABLE IF NOT EXISTS deposits (
                id BIGSERIAL PRIMARY KEY,
                user_id BIGINT NOT NULL REFERENCES accounts(id),
                amount_cents BIGINT NOT NULL,
                status TEXT NOT NULL,
                created_at_ms BIGINT NOT NULL,
                paid_at_ms BIGINT
            );
            CREATE TABLE IF NOT EXISTS withdrawals (
                id BIGSERIAL PRIMARY KEY,
                user_id BIGINT NOT NULL REFERENCES accounts(id),
                amount_cents BIGINT NOT NULL,
                created_at_ms BIGINT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS withdrawals_user ON withdrawals(user_id, id);
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )
        .context("init postgres ledger schema")?;
    Ok(())
}

fn to_i64(value: u64, label: &str) -> Result<i64> {
    i64::try_from(value).with_context(|| format!("convert {label} to i64"))
}

fn millis(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn account_row(row: &Row) -> Result<Account> {
    Ok(Account {
        id: UserId(row.try_get(0)?),
        balance: Money::from_cents(row.try_get(1)?),
        rollover_required: Money::from_cents(row.try_get(2)?),
        first_deposit_made: row.try_get(3)?,
        created_at_ms: millis(row.try_get(4)?),
    })
}

fn round_row(row: &Row) -> Result<GameRound> {
    let raw: String = row.try_get(5)?;
    Ok(GameRound {
        id: row.try_get(0)?,
        user_id: UserId(row.try_get(1)?),
        bet_amount: Money::from_cents(row.try_get(2)?),
        prize_amount: Money::from_cents(row.try_get(3)?),
        multiplier: row.try_get(4)?,
        metadata: RoundMetadata::from_json(&raw).context("decode round metadata")?,
        created_at_ms: millis(row.try_get(6)?),
    })
}

fn deposit_row(row: &Row) -> Result<Deposit> {
    let status: String = row.try_get(3)?;
    Ok(Deposit {
        id: row.try_get(0)?,
        user_id: UserId(row.try_get(1)?),
        amount: Money::from_cents(row.try_get(2)?),
        status: status.parse().map_err(|err: String| anyhow!(err))?,
        created_at_ms: millis(row.try_get(4)?),
        paid_at_ms: row.try_get::<_, Option<i64>>(5)?.map(millis),
    })
}

fn withdrawal_row(row: &Row) -> Result<Withdrawal> {
    Ok(Withdrawal {
        id: row.try_get(0)?,
        user_id: UserId(row.try_get(1)?),
        amount: Money::from_cents(row.try_get(2)?),
        created_at_ms: millis(row.try_get(3)?),
    })
}

impl LedgerStore for PostgresLedger {
    fn create_account(&self) -> Result<Account> {
        let mut client = self.client()?;
        let created_at_ms = now_ms();
        let row = client
            .query_one(
                "INSERT INTO accounts (created_at_ms) VALUES ($1) RETURNING id",
                &[&to_i64(created_at_ms, "created_at_ms")?],
            )
            .context("insert account")?;
        Ok(Account::new(UserId(row.try_get(0)?), created_at_ms))
    }

    fn account(&self, user: UserId) -> Result<Option<Account>> {
        let mut client = self.client()?;
        client
            .query_opt(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"),
                &[&user.0],
            )
            .context("select account")?
            .as_ref()
            .map(account_row)
            .transpose()
    }

    fn lock(&self, user: UserId) -> Result<Option<Box<dyn LedgerHandle + '_>>> {
        let mut client = self.client()?;
        client
            .batch_execute("BEGIN")
            .context("begin ledger transaction")?;
        let mut handle = PostgresHandle {
            client,
            account: Account::new(user, 0),
            finished: false,
        };
        let row = handle
            .client
            .query_opt(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 FOR UPDATE"),
                &[&user.0],
            )
            .context("lock account")?;
        match row {
            Some(row) => {
                handle.account = account_row(&row)?;
                Ok(Some(Box::new(handle)))
            }
            None => Ok(None),
        }
    }

    fn activate_first_deposit(&self, user: UserId, amount: Money) -> Result<bool> {
        let mut client = self.client()?;
        let changed = client
            .execute(
                "UPDATE accounts
                 SET rollover_cents = rollover_cents + $1, first_deposit_made = TRUE
                 WHERE id = $2 AND first_deposit_made = FALSE",
                &[&amount.cents(), &user.0],
            )
            .context("activate first deposit")?;
        Ok(changed == 1)
    }

    fn rounds(&self, user: UserId, limit: usize) -> Result<Vec<GameRound>> {
        let mut client = self.client()?;
        client
            .query(
                &format!(
                    "SELECT {ROUND_COLUMNS} FROM game_rounds
                     WHERE user_id = $1 ORDER BY id DESC LIMIT $2"
                ),
                &[&user.0, &to_i64(limit as u64, "limit")?],
            )
            .context("load rounds")?
            .iter()
            .map(round_row)
            .collect()
    }

    fn create_deposit(&self, user: UserId, amount: Money) -> Result<Option<Deposit>> {
        let mut client = self.client()?;
        let created_at_ms = now_ms();
        let row = client
            .query_opt(
                "INSERT INTO deposits (user_id, amount_cents, status, created_at_ms)
                 SELECT id, $2, $3, $4 FROM accounts WHERE id = $1
                 RETURNING id",
                &[
                    &user.0,
                    &amount.cents(),
                    &DepositStatus::Pending.as_str(),
                    &to_i64(created_at_ms, "created_at_ms")?,
                ],
            )
            .context("insert deposit")?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Deposit {
            id: row.try_get(0)?,
            user_id: user,
            amount,
            status: DepositStatus::Pending,
            created_at_ms,
            paid_at_ms: None,
        }))
    }

    fn deposit(&self, id: i64) -> Result<Option<Deposit>> {
        let mut client = self.client()?;
        client
            .query_opt(
                &format!("SELECT {DEPOSIT_COLUMNS} FROM deposits WHERE id = $1"),
                &[&id],
            )
            .context("select deposit")?
            .as_ref()
            .map(deposit_row)
            .transpose()
    }

    fn mark_deposit_paid(&self, id: i64) -> Result<PaidTransition> {
        let mut client = self.client()?;
        let mut tx = client.transaction().context("begin deposit confirmation")?;
        let flipped = tx
            .query_opt(
                &format!(
                    "UPDATE deposits SET status = $1, paid_at_ms = $2
                     WHERE id = $3 AND status = $4
                     RETURNING {DEPOSIT_COLUMNS}"
                ),
                &[
                    &DepositStatus::Paid.as_str(),
                    &to_i64(now_ms(), "paid_at_ms")?,
                    &id,
                    &DepositStatus::Pending.as_str(),
                ],
            )
            .context("flip deposit to paid")?;
        let Some(row) = flipped else {
            let existing = tx
                .query_opt(
                    &format!("SELECT {DEPOSIT_COLUMNS} FROM deposits WHERE id = $1"),
                    &[&id],
                )
                .context("select deposit")?;
            return Ok(match existing {
                Some(row) => PaidTransition::AlreadyPaid(deposit_row(&row)?),
                None => PaidTransition::Missing,
            });
        };
        let deposit = deposit_row(&row)?;
        tx.execute(
            "UPDATE accounts SET balance_cents = balance_cents + $1 WHERE id = $2",
            &[&deposit.amount.cents(), &deposit.user_id.0],
        )
        .context("credit deposit")?;
        tx.commit().context("commit deposit confirmation")?;
        Ok(PaidTransition::Applied(deposit))
    }

    fn withdrawals(&self, user: UserId, limit: usize) -> Result<Vec<Withdrawal>> {
        let mut client = self.client()?;
        client
            .query(
                "SELECT id, user_id, amount_cents, created_at_ms FROM withdrawals
                 WHERE user_id = $1 ORDER BY id DESC LIMIT $2",
                &[&user.0, &to_i64(limit as u64, "limit")?],
            )
            .context("load withdrawals")?
            .iter()
            .map(withdrawal_row)
            .collect()
    }
}

impl Settings for PostgresLedger {
    fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let guard = self
            .settings
            .lock()
            .map_err(|_| anyhow!("postgres settings client poisoned"))?;
        let mut client = self.reconnect_if_closed(guard)?;
        let row = client
            .query_opt("SELECT value FROM settings WHERE key = $1", &[&key])
            .context("read setting")?;
        row.map(|row| row.try_get(0).context("decode setting"))
            .transpose()
    }

    fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let guard = self
            .settings
            .lock()
            .map_err(|_| anyhow!("postgres settings client poisoned"))?;
        let mut client = self.reconnect_if_closed(guard)?;
        client
            .execute(
                "INSERT INTO settings (key, value) VALUES ($1, $2)
                 ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
                &[&key, &value],
            )
            .context("write setting")?;
        Ok(())
    }
}

struct PostgresHandle<'a> {
    client: MutexGuard<'a, Client>,
    account: Account,
    finished: bool,
}

impl LedgerHandle for PostgresHandle<'_> {
    fn account(&self) -> &Account {
        &self.account
    }

    fn set_balances(&mut self, balance: Money, rollover_required: Money) -> Result<()> {
        self.client
            .execute(
                "UPDATE accounts SET balance_cents = $1, rollover_cents = $2 WHERE id = $3",
                &[&balance.cents(), &rollover_required.cents(), &self.account.id.0],
            )
            .context("update balances")?;
        self.account.balance = balance;
        self.account.rollover_required = rollover_required;
        Ok(())
    }

    fn append_round(&mut self, round: NewRound) -> Result<GameRound> {
        let created_at_ms = now_ms();
        let row = self
            .client
            .query_one(
                "INSERT INTO game_rounds
                 (user_id, bet_cents, prize_cents, multiplier, metadata, created_at_ms)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 RETURNING id",
                &[
                    &round.user_id.0,
                    &round.bet_amount.cents(),
                    &round.prize_amount.cents(),
                    &round.multiplier,
                    &round.metadata.to_json(),
                    &to_i64(created_at_ms, "created_at_ms")?,
                ],
            )
            .context("insert round")?;
        Ok(GameRound::from_new(row.try_get(0)?, round, created_at_ms))
    }

    fn append_withdrawal(&mut self, amount: Money) -> Result<Withdrawal> {
        let created_at_ms = now_ms();
        let row = self
            .client
            .query_one(
                "INSERT INTO withdrawals (user_id, amount_cents, created_at_ms)
                 VALUES ($1, $2, $3)
                 RETURNING id",
                &[
                    &self.account.id.0,
                    &amount.cents(),
                    &to_i64(created_at_ms, "created_at_ms")?,
                ],
            )
            .context("insert withdrawal")?;
        Ok(Withdrawal {
            id: row.try_get(0)?,
            user_id: self.account.id,
            amount,
            created_at_ms,
        })
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.client
            .batch_execute("COMMIT")
            .context("commit ledger transaction")?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for PostgresHandle<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = self.client.batch_execute("ROLLBACK") {
            warn!(?err, user = %self.account.id, "postgres rollback failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raspa_execution::{confirm_deposit, create_deposit, play_round, FixedDraw};
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn private_ranges_are_private() {
        assert!(is_private_ip(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3))));
        assert!(is_private_ip(IpAddr::V4(Ipv4Addr::new(192, 168, 0, 9))));
        assert!(is_private_ip(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        assert!(is_private_ip(IpAddr::V6(Ipv6Addr::LOCALHOST)));
        assert!(!is_private_ip(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))));
    }

    #[test]
    fn url_validation_rejects_public_hosts_and_bad_schemes() {
        assert!(validate_postgres_url("postgres://raspa@localhost/raspa").is_ok());
        assert!(validate_postgres_url("postgresql://raspa@10.0.0.5:5432/raspa").is_ok());
        if !allow_public_postgres() {
            assert!(validate_postgres_url("postgres://raspa@8.8.8.8/raspa").is_err());
            assert!(validate_postgres_url("mysql://raspa@10.0.0.5/raspa").is_err());
        }
    }

    /// Runs against a live database when `RASPA_TEST_POSTGRES_URL` is set.
    #[test]
    fn live_round_trip() {
        let Ok(url) = std::env::var("RASPA_TEST_POSTGRES_URL") else {
            return;
        };
        let ledger = PostgresLedger::connect(&url, 2).unwrap();
        let user = ledger.create_account().unwrap().id;
        let deposit = create_deposit(&ledger, user, Money::from_cents(5_000)).unwrap();
        let confirmed = confirm_deposit(&ledger, deposit.id).unwrap();
        assert!(confirmed.credited && confirmed.rollover_applied);
        assert!(!confirm_deposit(&ledger, deposit.id).unwrap().credited);

        let outcome = play_round(
            &ledger,
            &ledger,
            &mut FixedDraw(0.99),
            user,
            Money::from_cents(1_000),
        )
        .unwrap();
        assert_eq!(outcome.new_balance, Money::from_cents(4_000));
        assert_eq!(ledger.rounds(user, 5).unwrap().len(), 1);
        {
            let mut handle = ledger.lock(user).unwrap().unwrap();
            handle.set_balances(Money::ZERO, Money::ZERO).unwrap();
        }
        let account = ledger.account(user).unwrap().unwrap();
        assert_eq!(account.balance, Money::from_cents(4_000));
    }
}
