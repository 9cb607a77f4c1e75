// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! SQLite ledger store.
//!
//! Each unit of work is a `BEGIN IMMEDIATE` transaction on a pooled
//! connection. SQLite grants the write lock for the whole database at `BEGIN`,
//! so units of work are serialized there and wait at most `busy_timeout` for
//! their turn. Balance debits and collected-amount increments are single
//! `UPDATE ... RETURNING` statements computed against the stored value.
//!
//! The schema repeats the ledger invariants as constraints: non-negative
//! balances, positive amounts, the donor/anonymity pairing, unique idempotency
//! keys, and append-only donations.

use crate::base::{Amount, DonationId, GoalId, IdempotencyKey, UserId};
use crate::donation::{Donation, Donor, NewDonation};
use crate::error::StoreError;
use crate::goal::{Goal, NewGoal};
use crate::store::schema::{DONATION_COLUMNS, GOAL_COLUMNS, SCHEMA, USER_COLUMNS};
use crate::store::{DonationFilter, LedgerStore, LockSequence, Page, RowKey, UnitOfWork};
use crate::user::{NewUser, User};
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{
    Connection, ErrorCode, OptionalExtension as _, Row, Transaction, TransactionBehavior, ffi,
    params,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, message) => match failure.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => StoreError::LockTimeout,
                ErrorCode::ConstraintViolation
                    if failure.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                        && message
                            .as_deref()
                            .is_some_and(|message| message.contains("idempotency_key")) =>
                {
                    StoreError::DuplicateKey
                }
                ErrorCode::ConstraintViolation => {
                    StoreError::Constraint(message.clone().unwrap_or_else(|| err.to_string()))
                }
                _ => StoreError::Backend(err.to_string()),
            },
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::IntegralValueOutOfRange(..) => StoreError::Decode(err.to_string()),
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

/// The pool only fails a checkout after waiting out its connection timeout.
impl From<r2d2::Error> for StoreError {
    fn from(_: r2d2::Error) -> Self {
        StoreError::LockTimeout
    }
}

// ─── Row encoding ────────────────────────────────────────────────────────────

fn encode_dt(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn decode_dt(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId(row.get(0)?),
        name: row.get(1)?,
        balance: Amount(row.get(2)?),
        created_at: decode_dt(row, 3)?,
    })
}

fn goal_from_row(row: &Row<'_>) -> rusqlite::Result<Goal> {
    Ok(Goal {
        id: GoalId(row.get(0)?),
        title: row.get(1)?,
        description: row.get(2)?,
        target_amount: row.get::<_, Option<i64>>(3)?.map(Amount),
        collected_amount: Amount(row.get(4)?),
        is_active: row.get(5)?,
        created_at: decode_dt(row, 6)?,
    })
}

fn donation_from_row(row: &Row<'_>) -> rusqlite::Result<Donation> {
    let user_id = row.get::<_, Option<i64>>(1)?.map(UserId);
    let is_anonymous: bool = row.get(4)?;
    let donor = Donor::from_parts(user_id, is_anonymous).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(4, Type::Integer, Box::new(err))
    })?;
    Ok(Donation {
        id: DonationId(row.get(0)?),
        donor,
        goal_id: GoalId(row.get(2)?),
        amount: Amount(row.get(3)?),
        idempotency_key: row.get::<_, Option<String>>(5)?.map(IdempotencyKey),
        created_at: decode_dt(row, 6)?,
    })
}

/// SQLite treats a negative `LIMIT` as unbounded.
fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(-1)
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A ledger store backed by a single SQLite file.
///
/// Connections come from an `r2d2` pool; each one is opened in WAL mode with
/// foreign keys on and the configured busy timeout.
pub struct SqliteStore {
    path: PathBuf,
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEFAULT_POOL_SIZE: u32 = 8;

    /// Opens (or creates) a store at `path` and runs schema initialisation.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_timeout(path, Self::DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open_with_timeout(
        path: impl AsRef<Path>,
        busy_timeout: Duration,
    ) -> Result<Self, StoreError> {
        Self::open_with(path, busy_timeout, Self::DEFAULT_POOL_SIZE)
    }

    /// Opens a store with an explicit busy timeout and pool size.
    pub fn open_with(
        path: impl AsRef<Path>,
        busy_timeout: Duration,
        pool_size: u32,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let manager = SqliteConnectionManager::file(&path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA synchronous = NORMAL;",
            )
        });
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .min_idle(Some(1))
            .build(manager)
            .map_err(|err| StoreError::Backend(err.to_string()))?;

        pool.get()?.execute_batch(SCHEMA)?;
        tracing::debug!(path = %path.display(), pool_size, "opened sqlite ledger store");
        Ok(Self { path, pool })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LedgerStore for SqliteStore {
    fn transact<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn UnitOfWork) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut conn = self.pool.get().map_err(StoreError::from)?;
        // IMMEDIATE takes the database write lock up front
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let value = f(&mut SqliteUnitOfWork::new(&tx))?;
        tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }

    fn create_user(&self, new_user: NewUser) -> Result<User, StoreError> {
        new_user.check()?;
        let conn = self.pool.get()?;
        let user = conn.query_row(
            &format!(
                "INSERT INTO users (name, balance, created_at) VALUES (?1, ?2, ?3)
                 RETURNING {USER_COLUMNS}"
            ),
            params![new_user.name, new_user.balance.0, encode_dt(Utc::now())],
            user_from_row,
        )?;
        Ok(user)
    }

    fn create_goal(&self, new_goal: NewGoal) -> Result<Goal, StoreError> {
        new_goal.check()?;
        let conn = self.pool.get()?;
        let goal = conn.query_row(
            &format!(
                "INSERT INTO goals (title, description, target_amount, collected_amount, is_active, created_at)
                 VALUES (?1, ?2, ?3, 0, ?4, ?5)
                 RETURNING {GOAL_COLUMNS}"
            ),
            params![
                new_goal.title,
                new_goal.description,
                new_goal.target_amount.map(|amount| amount.0),
                new_goal.is_active,
                encode_dt(Utc::now()),
            ],
            goal_from_row,
        )?;
        Ok(goal)
    }

    fn set_goal_active(&self, goal_id: GoalId, is_active: bool) -> Result<Goal, StoreError> {
        let conn = self.pool.get()?;
        conn.query_row(
            &format!("UPDATE goals SET is_active = ?2 WHERE id = ?1 RETURNING {GOAL_COLUMNS}"),
            params![goal_id.0, is_active],
            goal_from_row,
        )
        .optional()?
        .ok_or(StoreError::NotFound)
    }

    fn user(&self, user_id: UserId) -> Result<Option<User>, StoreError> {
        let conn = self.pool.get()?;
        Ok(select_user(&conn, user_id)?)
    }

    fn goal(&self, goal_id: GoalId) -> Result<Option<Goal>, StoreError> {
        let conn = self.pool.get()?;
        Ok(select_goal(&conn, goal_id)?)
    }

    fn users(&self) -> Result<Vec<User>, StoreError> {
        let conn = self.pool.get()?;
        let users = conn
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))?
            .query_map([], user_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    fn goals(&self) -> Result<Vec<Goal>, StoreError> {
        let conn = self.pool.get()?;
        let goals = conn
            .prepare(&format!("SELECT {GOAL_COLUMNS} FROM goals ORDER BY id"))?
            .query_map([], goal_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(goals)
    }

    fn donation(&self, donation_id: DonationId) -> Result<Option<Donation>, StoreError> {
        let conn = self.pool.get()?;
        let donation = conn
            .query_row(
                &format!("SELECT {DONATION_COLUMNS} FROM donations WHERE id = ?1"),
                params![donation_id.0],
                donation_from_row,
            )
            .optional()?;
        Ok(donation)
    }

    fn donations(&self, filter: DonationFilter, page: Page) -> Result<Vec<Donation>, StoreError> {
        let (clause, id) = match filter {
            DonationFilter::All => ("1 = 1", None),
            DonationFilter::Goal(goal_id) => ("goal_id = ?3", Some(goal_id.0)),
            DonationFilter::User(user_id) => ("user_id = ?3", Some(user_id.0)),
        };
        let conn = self.pool.get()?;
        let mut statement = conn.prepare(&format!(
            "SELECT {DONATION_COLUMNS} FROM donations WHERE {clause}
             ORDER BY id LIMIT ?1 OFFSET ?2"
        ))?;
        let limit = sql_limit(page.limit);
        let offset = i64::try_from(page.offset).unwrap_or(i64::MAX);
        let donations = match id {
            Some(id) => statement
                .query_map(params![limit, offset, id], donation_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
            None => statement
                .query_map(params![limit, offset], donation_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
        };
        Ok(donations)
    }

    fn donation_total(&self, goal_id: GoalId) -> Result<Amount, StoreError> {
        let conn = self.pool.get()?;
        Ok(select_donation_total(&conn, goal_id)?)
    }
}

fn select_donation_total(conn: &Connection, goal_id: GoalId) -> rusqlite::Result<Amount> {
    conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM donations WHERE goal_id = ?1",
        params![goal_id.0],
        |row| row.get(0).map(Amount),
    )
}

fn select_user(conn: &Connection, user_id: UserId) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        params![user_id.0],
        user_from_row,
    )
    .optional()
}

fn select_goal(conn: &Connection, goal_id: GoalId) -> rusqlite::Result<Option<Goal>> {
    conn.query_row(
        &format!("SELECT {GOAL_COLUMNS} FROM goals WHERE id = ?1"),
        params![goal_id.0],
        goal_from_row,
    )
    .optional()
}

// ─── Unit of work ────────────────────────────────────────────────────────────

/// Unit of work over a [`SqliteStore`]: one immediate transaction.
///
/// Dropping the transaction without commit rolls it back.
pub struct SqliteUnitOfWork<'a> {
    tx: &'a Transaction<'a>,
    sequence: LockSequence,
    held: HashSet<RowKey>,
}

impl<'a> SqliteUnitOfWork<'a> {
    fn new(tx: &'a Transaction<'a>) -> Self {
        Self {
            tx,
            sequence: LockSequence::default(),
            held: HashSet::new(),
        }
    }

    fn acquire(&mut self, key: RowKey) -> Result<(), StoreError> {
        let already_held = self.held.contains(&key);
        self.sequence.acquire(key, already_held)?;
        self.held.insert(key);
        Ok(())
    }
}

impl UnitOfWork for SqliteUnitOfWork<'_> {
    fn lock_goal(&mut self, goal_id: GoalId) -> Result<Option<Goal>, StoreError> {
        self.acquire(RowKey::Goal(goal_id))?;
        Ok(select_goal(self.tx, goal_id)?)
    }

    fn lock_user(&mut self, user_id: UserId) -> Result<Option<User>, StoreError> {
        self.acquire(RowKey::User(user_id))?;
        Ok(select_user(self.tx, user_id)?)
    }

    fn debit_balance(
        &mut self,
        user_id: UserId,
        amount: Amount,
    ) -> Result<Option<User>, StoreError> {
        self.acquire(RowKey::User(user_id))?;
        let user = self
            .tx
            .query_row(
                &format!(
                    "UPDATE users SET balance = balance - ?2
                     WHERE id = ?1 AND balance >= ?2
                     RETURNING {USER_COLUMNS}"
                ),
                params![user_id.0, amount.0],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    fn credit_collected(&mut self, goal_id: GoalId, amount: Amount) -> Result<Goal, StoreError> {
        self.acquire(RowKey::Goal(goal_id))?;
        let headroom = i64::MAX.saturating_sub(amount.0);
        let goal = self
            .tx
            .query_row(
                &format!(
                    "UPDATE goals SET collected_amount = collected_amount + ?2
                     WHERE id = ?1 AND collected_amount <= ?3
                     RETURNING {GOAL_COLUMNS}"
                ),
                params![goal_id.0, amount.0, headroom],
                goal_from_row,
            )
            .optional()?;
        match goal {
            Some(goal) => Ok(goal),
            None if select_goal(self.tx, goal_id)?.is_some() => {
                Err(StoreError::Constraint("collected amount overflow".into()))
            }
            None => Err(StoreError::NotFound),
        }
    }

    fn insert_donation(&mut self, new_donation: NewDonation) -> Result<Donation, StoreError> {
        let donation = self.tx.query_row(
            &format!(
                "INSERT INTO donations (user_id, goal_id, amount, is_anonymous, idempotency_key, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 RETURNING {DONATION_COLUMNS}"
            ),
            params![
                new_donation.donor.user_id().map(|user_id| user_id.0),
                new_donation.goal_id.0,
                new_donation.amount.0,
                new_donation.donor.is_anonymous(),
                new_donation.idempotency_key.as_ref().map(IdempotencyKey::as_str),
                encode_dt(Utc::now()),
            ],
            donation_from_row,
        )?;
        Ok(donation)
    }

    fn find_by_idempotency_key(
        &mut self,
        key: &IdempotencyKey,
    ) -> Result<Option<Donation>, StoreError> {
        let donation = self
            .tx
            .query_row(
                &format!("SELECT {DONATION_COLUMNS} FROM donations WHERE idempotency_key = ?1"),
                params![key.as_str()],
                donation_from_row,
            )
            .optional()?;
        Ok(donation)
    }

    fn goal(&mut self, goal_id: GoalId) -> Result<Option<Goal>, StoreError> {
        Ok(select_goal(self.tx, goal_id)?)
    }

    fn user(&mut self, user_id: UserId) -> Result<Option<User>, StoreError> {
        Ok(select_user(self.tx, user_id)?)
    }

    fn donation_total(&mut self, goal_id: GoalId) -> Result<Amount, StoreError> {
        Ok(select_donation_total(self.tx, goal_id)?)
    }
}
