//! SQLite ledger.
//!
//! Three connections share one WAL database: the writer runs every transaction
//! (`BEGIN IMMEDIATE`), the reader serves unlocked reads, and a third serves settings so a
//! round can read the RTP while it holds the writer.

use anyhow::{anyhow, Context, Result};
use raspa_execution::{now_ms, LedgerHandle, LedgerStore, PaidTransition, Settings};
use raspa_types::{
    Account, Deposit, DepositStatus, GameRound, Money, NewRound, RoundMetadata, UserId,
    Withdrawal,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::warn;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const ACCOUNT_COLUMNS: &str =
    "id, balance_cents, rollover_cents, first_deposit_made, created_at_ms";
const ROUND_COLUMNS: &str =
    "id, user_id, bet_cents, prize_cents, multiplier, metadata, created_at_ms";
const DEPOSIT_COLUMNS: &str = "id, user_id, amount_cents, status, created_at_ms, paid_at_ms";

pub struct SqliteLedger {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    settings: Mutex<Connection>,
}

impl SqliteLedger {
    pub fn open(path: &Path) -> Result<Self> {
        let writer = open_connection(path)?;
        init_schema_sqlite(&writer)?;
        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(open_connection(path)?),
            settings: Mutex::new(open_connection(path)?),
        })
    }

    fn writer(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| anyhow!("sqlite writer poisoned"))
    }

    fn reader(&self) -> Result<MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| anyhow!("sqlite reader poisoned"))
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("open sqlite ledger {}", path.display()))?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .context("set sqlite busy timeout")?;
    Ok(conn)
}

fn init_schema_sqlite(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         CREATE TABLE IF NOT EXISTS accounts (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             balance_cents INTEGER NOT NULL DEFAULT 0,
             rollover_cents INTEGER NOT NULL DEFAULT 0,
             first_deposit_made INTEGER NOT NULL DEFAULT 0,
             created_at_ms INTEGER NOT NULL
         );
         CREATE TABLE IF NOT EXISTS game_rounds (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             user_id INTEGER NOT NULL REFERENCES accounts(id),
             bet_cents INTEGER NOT NULL,
             prize_cents INTEGER NOT NULL,
             multiplier REAL NOT NULL,
             metadata TEXT NOT NULL,
             created_at_ms INTEGER NOT NULL
         );
         CREATE INDEX IF NOT EXISTS game_rounds_user ON game_rounds(user_id, id);
         CREATE TABLE IF NOT EXISTS deposits (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             user_id INTEGER NOT NULL REFERENCES accounts(id),
             amount_cents INTEGER NOT NULL,
             status TEXT NOT NULL,
             created_at_ms INTEGER NOT NULL,
             paid_at_ms INTEGER
         );
         CREATE TABLE IF NOT EXISTS withdrawals (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             user_id INTEGER NOT NULL REFERENCES accounts(id),
             amount_cents INTEGER NOT NULL,
             created_at_ms INTEGER NOT NULL
         );
         CREATE INDEX IF NOT EXISTS withdrawals_user ON withdrawals(user_id, id);
         CREATE TABLE IF NOT EXISTS settings (
             key TEXT PRIMARY KEY,
             value TEXT NOT NULL
         );",
    )
    .context("init sqlite ledger schema")?;
    Ok(())
}

fn to_i64(value: u64, label: &str) -> Result<i64> {
    i64::try_from(value).with_context(|| format!("convert {label} to i64"))
}

fn millis(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn account_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: UserId(row.get(0)?),
        balance: Money::from_cents(row.get(1)?),
        rollover_required: Money::from_cents(row.get(2)?),
        first_deposit_made: row.get(3)?,
        created_at_ms: millis(row.get(4)?),
    })
}

fn round_row(row: &Row<'_>) -> rusqlite::Result<GameRound> {
    let raw: String = row.get(5)?;
    let metadata = RoundMetadata::from_json(&raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(err)))?;
    Ok(GameRound {
        id: row.get(0)?,
        user_id: UserId(row.get(1)?),
        bet_amount: Money::from_cents(row.get(2)?),
        prize_amount: Money::from_cents(row.get(3)?),
        multiplier: row.get(4)?,
        metadata,
        created_at_ms: millis(row.get(6)?),
    })
}

fn deposit_row(row: &Row<'_>) -> rusqlite::Result<Deposit> {
    let status: String = row.get(3)?;
    let status = status
        .parse::<DepositStatus>()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, err.into()))?;
    Ok(Deposit {
        id: row.get(0)?,
        user_id: UserId(row.get(1)?),
        amount: Money::from_cents(row.get(2)?),
        status,
        created_at_ms: millis(row.get(4)?),
        paid_at_ms: row.get::<_, Option<i64>>(5)?.map(millis),
    })
}

fn withdrawal_row(row: &Row<'_>) -> rusqlite::Result<Withdrawal> {
    Ok(Withdrawal {
        id: row.get(0)?,
        user_id: UserId(row.get(1)?),
        amount: Money::from_cents(row.get(2)?),
        created_at_ms: millis(row.get(3)?),
    })
}

fn select_account(conn: &Connection, user: UserId) -> Result<Option<Account>> {
    conn.query_row(
        &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"),
        params![user.0],
        account_row,
    )
    .optional()
    .context("select account")
}

fn select_deposit(conn: &Connection, id: i64) -> Result<Option<Deposit>> {
    conn.query_row(
        &format!("SELECT {DEPOSIT_COLUMNS} FROM deposits WHERE id = ?1"),
        params![id],
        deposit_row,
    )
    .optional()
    .context("select deposit")
}

impl LedgerStore for SqliteLedger {
    fn create_account(&self) -> Result<Account> {
        let conn = self.writer()?;
        let created_at_ms = now_ms();
        conn.execute(
            "INSERT INTO accounts (created_at_ms) VALUES (?1)",
            params![to_i64(created_at_ms, "created_at_ms")?],
        )
        .context("insert account")?;
        Ok(Account::new(UserId(conn.last_insert_rowid()), created_at_ms))
    }

    fn account(&self, user: UserId) -> Result<Option<Account>> {
        select_account(&*self.reader()?, user)
    }

    fn lock(&self, user: UserId) -> Result<Option<Box<dyn LedgerHandle + '_>>> {
        let conn = self.writer()?;
        conn.execute_batch("BEGIN IMMEDIATE")
            .context("begin ledger transaction")?;
        let mut handle = SqliteHandle {
            conn,
            account: Account::new(user, 0),
            finished: false,
        };
        match select_account(&handle.conn, user)? {
            Some(account) => {
                handle.account = account;
                Ok(Some(Box::new(handle)))
            }
            // Dropping the handle rolls back the empty transaction.
            None => Ok(None),
        }
    }

    fn activate_first_deposit(&self, user: UserId, amount: Money) -> Result<bool> {
        let mut conn = self.writer()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("begin activation")?;
        let Some(account) = select_account(&tx, user)? else {
            return Ok(false);
        };
        let rollover = account
            .rollover_required
            .checked_add(amount)
            .context("rollover overflow")?;
        let changed = tx
            .execute(
                "UPDATE accounts SET rollover_cents = ?1, first_deposit_made = 1
                 WHERE id = ?2 AND first_deposit_made = 0",
                params![rollover.cents(), user.0],
            )
            .context("activate first deposit")?;
        tx.commit().context("commit activation")?;
        Ok(changed == 1)
    }

    fn rounds(&self, user: UserId, limit: usize) -> Result<Vec<GameRound>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ROUND_COLUMNS} FROM game_rounds WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![user.0, to_i64(limit as u64, "limit")?], round_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("load rounds")?;
        Ok(rows)
    }

    fn create_deposit(&self, user: UserId, amount: Money) -> Result<Option<Deposit>> {
        let mut conn = self.writer()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("begin deposit")?;
        if select_account(&tx, user)?.is_none() {
            return Ok(None);
        }
        let created_at_ms = now_ms();
        tx.execute(
            "INSERT INTO deposits (user_id, amount_cents, status, created_at_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                user.0,
                amount.cents(),
                DepositStatus::Pending.as_str(),
                to_i64(created_at_ms, "created_at_ms")?
            ],
        )
        .context("insert deposit")?;
        let id = tx.last_insert_rowid();
        tx.commit().context("commit deposit")?;
        Ok(Some(Deposit {
            id,
            user_id: user,
            amount,
            status: DepositStatus::Pending,
            created_at_ms,
            paid_at_ms: None,
        }))
    }

    fn deposit(&self, id: i64) -> Result<Option<Deposit>> {
        select_deposit(&*self.reader()?, id)
    }

    fn mark_deposit_paid(&self, id: i64) -> Result<PaidTransition> {
        let mut conn = self.writer()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("begin deposit confirmation")?;
        let paid_at_ms = now_ms();
        let changed = tx
            .execute(
                "UPDATE deposits SET status = ?1, paid_at_ms = ?2 WHERE id = ?3 AND status = ?4",
                params![
                    DepositStatus::Paid.as_str(),
                    to_i64(paid_at_ms, "paid_at_ms")?,
                    id,
                    DepositStatus::Pending.as_str()
                ],
            )
            .context("flip deposit to paid")?;
        let Some(deposit) = select_deposit(&tx, id)? else {
            return Ok(PaidTransition::Missing);
        };
        if changed == 0 {
            return Ok(PaidTransition::AlreadyPaid(deposit));
        }

        let owner = select_account(&tx, deposit.user_id)?.context("deposit owner missing")?;
        let balance = owner
            .balance
            .checked_add(deposit.amount)
            .context("balance overflow")?;
        tx.execute(
            "UPDATE accounts SET balance_cents = ?1 WHERE id = ?2",
            params![balance.cents(), owner.id.0],
        )
        .context("credit deposit")?;
        tx.commit().context("commit deposit confirmation")?;
        Ok(PaidTransition::Applied(deposit))
    }

    fn withdrawals(&self, user: UserId, limit: usize) -> Result<Vec<Withdrawal>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, amount_cents, created_at_ms FROM withdrawals
             WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![user.0, to_i64(limit as u64, "limit")?], withdrawal_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("load withdrawals")?;
        Ok(rows)
    }
}

impl Settings for SqliteLedger {
    fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self
            .settings
            .lock()
            .map_err(|_| anyhow!("sqlite settings poisoned"))?;
        conn.query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .context("read setting")
    }

    fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self
            .settings
            .lock()
            .map_err(|_| anyhow!("sqlite settings poisoned"))?;
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .context("write setting")?;
        Ok(())
    }
}

struct SqliteHandle<'a> {
    conn: MutexGuard<'a, Connection>,
    account: Account,
    finished: bool,
}

impl LedgerHandle for SqliteHandle<'_> {
    fn account(&self) -> &Account {
        &self.account
    }

    fn set_balances(&mut self, balance: Money, rollover_required: Money) -> Result<()> {
        self.conn
            .execute(
                "UPDATE accounts SET balance_cents = ?1, rollover_cents = ?2 WHERE id = ?3",
                params![balance.cents(), rollover_required.cents(), self.account.id.0],
            )
            .context("update balances")?;
        self.account.balance = balance;
        self.account.rollover_required = rollover_required;
        Ok(())
    }

    fn append_round(&mut self, round: NewRound) -> Result<GameRound> {
        let created_at_ms = now_ms();
        self.conn
            .execute(
                "INSERT INTO game_rounds
                 (user_id, bet_cents, prize_cents, multiplier, metadata, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    round.user_id.0,
                    round.bet_amount.cents(),
                    round.prize_amount.cents(),
                    round.multiplier,
                    round.metadata.to_json(),
                    to_i64(created_at_ms, "created_at_ms")?
                ],
            )
            .context("insert round")?;
        let id = self.conn.last_insert_rowid();
        Ok(GameRound::from_new(id, round, created_at_ms))
    }

    fn append_withdrawal(&mut self, amount: Money) -> Result<Withdrawal> {
        let created_at_ms = now_ms();
        self.conn
            .execute(
                "INSERT INTO withdrawals (user_id, amount_cents, created_at_ms)
                 VALUES (?1, ?2, ?3)",
                params![
                    self.account.id.0,
                    amount.cents(),
                    to_i64(created_at_ms, "created_at_ms")?
                ],
            )
            .context("insert withdrawal")?;
        Ok(Withdrawal {
            id: self.conn.last_insert_rowid(),
            user_id: self.account.id,
            amount,
            created_at_ms,
        })
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.conn
            .execute_batch("COMMIT")
            .context("commit ledger transaction")?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for SqliteHandle<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = self.conn.execute_batch("ROLLBACK") {
            warn!(?err, user = %self.account.id, "sqlite rollback failed");
        }
    }
}
