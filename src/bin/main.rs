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

use anyhow::{Context as _, bail};
use clap::Parser;
use crossbeam::channel;
use csv::{ReaderBuilder, Trim, Writer};
use donation_ledger::config::Backend;
use donation_ledger::{
    Amount, DonationLimits, DonationRequest, Engine, GoalId, IdempotencyKey, LedgerStore,
    MemoryStore, NewGoal, NewUser, Settings, SqliteStore, UserId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Donation Ledger - Replay donation CSV files
///
/// Seeds users and goals, replays donations concurrently and writes the
/// resulting goal totals to stdout.
#[derive(Parser, Debug)]
#[command(name = "donation-ledger")]
#[command(about = "Replays donation CSVs against the donation ledger", long_about = None)]
struct Args {
    /// Path to CSV file with donations
    ///
    /// Expected format: goal,user,amount,key (empty user = anonymous)
    #[arg(value_name = "FILE")]
    donations: PathBuf,

    /// Users to create first. Format: user,name,balance
    #[arg(long, value_name = "FILE")]
    users: Option<PathBuf>,

    /// Goals to create first. Format: goal,title,description,target,active
    #[arg(long, value_name = "FILE")]
    goals: Option<PathBuf>,

    /// Write final user balances here. Format: user,name,balance
    #[arg(long, value_name = "FILE")]
    balances: Option<PathBuf>,

    /// TOML settings file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Store backend, overriding the settings file
    #[arg(long, value_enum)]
    backend: Option<Backend>,

    /// SQLite database path, overriding the settings file
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    /// Number of worker threads
    #[arg(short = 'j', long, default_value_t = 4)]
    workers: usize,
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the report
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref()).context("failed to load settings")?;
    if let Some(backend) = args.backend {
        settings.store.backend = backend;
    }
    if let Some(db) = &args.db {
        settings.store.path = Some(db.clone());
    }

    match settings.store.backend {
        Backend::Memory => {
            let store = MemoryStore::with_lock_timeout(settings.engine.lock_timeout());
            run(Engine::with_config(store, settings.engine.clone()), &args, &settings)
        }
        Backend::Sqlite => {
            let Some(path) = &settings.store.path else {
                bail!("the sqlite backend needs a database path (--db or store.path)");
            };
            let store =
                SqliteStore::open_with(path, settings.store.busy_timeout(), settings.store.pool_size)
                .with_context(|| format!("failed to open store at {}", path.display()))?;
            run(Engine::with_config(store, settings.engine.clone()), &args, &settings)
        }
    }
}

fn run<S: LedgerStore>(engine: Engine<S>, args: &Args, settings: &Settings) -> anyhow::Result<()> {
    let users = match &args.users {
        Some(path) => Some(
            seed_users(engine.store(), open(path)?)
                .with_context(|| format!("failed to seed users from {}", path.display()))?,
        ),
        None => None,
    };
    let goals = match &args.goals {
        Some(path) => Some(
            seed_goals(engine.store(), open(path)?)
                .with_context(|| format!("failed to seed goals from {}", path.display()))?,
        ),
        None => None,
    };
    let ids = IdMap { users, goals };

    let summary = replay_donations(
        &engine,
        &settings.limits.to_limits(),
        &ids,
        open(&args.donations)?,
        args.workers,
    )
    .context("failed to replay donations")?;
    tracing::info!(
        accepted = summary.accepted,
        rejected = summary.rejected,
        "replay finished"
    );

    for goal in engine.store().goals()? {
        let report = engine.audit_goal(goal.id)?;
        if !report.balanced {
            bail!(
                "goal {} collected {} but its donations sum to {}",
                goal.id,
                report.collected,
                report.donated
            );
        }
    }

    write_goals(engine.store(), std::io::stdout()).context("failed to write goal report")?;
    if let Some(path) = &args.balances {
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        write_balances(engine.store(), file).context("failed to write balance report")?;
    }
    Ok(())
}

fn open(path: &Path) -> anyhow::Result<BufReader<File>> {
    let file =
        File::open(path).with_context(|| format!("failed to open '{}'", path.display()))?;
    Ok(BufReader::new(file))
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader)
}

/// Maps ids used in the input files to ids assigned by the store.
///
/// Without a seed file for a kind, input ids are taken as store ids. With one,
/// only ids listed in that file resolve.
#[derive(Debug, Default)]
struct IdMap {
    users: Option<HashMap<i64, UserId>>,
    goals: Option<HashMap<i64, GoalId>>,
}

impl IdMap {
    fn user(&self, raw: i64) -> Option<UserId> {
        match &self.users {
            Some(users) => users.get(&raw).copied(),
            None => Some(UserId(raw)),
        }
    }

    fn goal(&self, raw: i64) -> Option<GoalId> {
        match &self.goals {
            Some(goals) => goals.get(&raw).copied(),
            None => Some(GoalId(raw)),
        }
    }
}

/// Why a parsed row never reaches the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
enum RowError {
    #[error("amount is not a whole number of cents")]
    SubCent,
    #[error("user {0} is not in the users file")]
    UnknownUser(i64),
    #[error("goal {0} is not in the goals file")]
    UnknownGoal(i64),
}

#[derive(Debug, Deserialize)]
struct UserRecord {
    user: i64,
    name: String,
    #[serde(default)]
    balance: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct GoalRecord {
    goal: i64,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    target: Option<Decimal>,
    #[serde(default)]
    active: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct DonationRecord {
    goal: i64,
    #[serde(default)]
    user: Option<i64>,
    amount: Decimal,
    #[serde(default)]
    key: Option<String>,
}

impl DonationRecord {
    fn into_request(self, ids: &IdMap) -> Result<DonationRequest, RowError> {
        let amount = Amount::from_decimal(self.amount).ok_or(RowError::SubCent)?;
        let goal_id = ids.goal(self.goal).ok_or(RowError::UnknownGoal(self.goal))?;
        let request = match self.user {
            Some(user) => {
                let user_id = ids.user(user).ok_or(RowError::UnknownUser(user))?;
                DonationRequest::attributed(goal_id, user_id, amount)
            }
            None => DonationRequest::anonymous(goal_id, amount),
        };
        Ok(match self.key.filter(|key| !key.is_empty()) {
            Some(key) => request.with_idempotency_key(IdempotencyKey::new(key)),
            None => request,
        })
    }
}

/// Creates one user per row. Rows without a balance get the default balance.
fn seed_users<S: LedgerStore, R: Read>(
    store: &S,
    reader: R,
) -> anyhow::Result<HashMap<i64, UserId>> {
    let mut ids = HashMap::new();
    for result in csv_reader(reader).deserialize::<UserRecord>() {
        let record = result?;
        let mut new_user = NewUser::new(record.name);
        if let Some(balance) = record.balance {
            let Some(balance) = Amount::from_decimal(balance) else {
                bail!("user {}: balance {balance} is not a whole number of cents", record.user);
            };
            new_user = new_user.with_balance(balance);
        }
        let user = store.create_user(new_user)?;
        ids.insert(record.user, user.id);
    }
    Ok(ids)
}

fn seed_goals<S: LedgerStore, R: Read>(
    store: &S,
    reader: R,
) -> anyhow::Result<HashMap<i64, GoalId>> {
    let mut ids = HashMap::new();
    for result in csv_reader(reader).deserialize::<GoalRecord>() {
        let record = result?;
        let mut new_goal = NewGoal::new(record.title);
        if let Some(description) = record.description.filter(|d| !d.is_empty()) {
            new_goal = new_goal.with_description(description);
        }
        if let Some(target) = record.target {
            let Some(target) = Amount::from_decimal(target) else {
                bail!("goal {}: target {target} is not a whole number of cents", record.goal);
            };
            new_goal = new_goal.with_target(target);
        }
        if record.active == Some(false) {
            new_goal = new_goal.inactive();
        }
        let goal = store.create_goal(new_goal)?;
        ids.insert(record.goal, goal.id);
    }
    Ok(ids)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ReplaySummary {
    accepted: usize,
    rejected: usize,
}

/// Replays donations from a CSV reader on `workers` threads.
///
/// Rows are parsed on the calling thread and handed to the workers over a
/// bounded channel. Malformed rows, rows naming ids missing from a loaded
/// seed file, rows over the donation limits and donations the engine refuses
/// are skipped and counted as rejected.
///
/// # CSV Format
///
/// Expected columns: `goal, user, amount, key`
/// - `goal`: Goal id from the goals file
/// - `user`: User id from the users file; empty for an anonymous donation
/// - `amount`: Decimal amount in major units, at most two places
/// - `key`: Optional idempotency key
///
/// # Example
///
/// ```csv
/// goal,user,amount,key
/// 1,1,25.00,
/// 1,,25.00,card-7781
/// ```
///
/// # Errors
///
/// Returns a CSV error only if the reader itself fails.
fn replay_donations<S: LedgerStore, R: Read>(
    engine: &Engine<S>,
    limits: &DonationLimits,
    ids: &IdMap,
    reader: R,
    workers: usize,
) -> Result<ReplaySummary, csv::Error> {
    let workers = workers.max(1);
    let (sender, receiver) = channel::bounded::<DonationRequest>(workers * 64);

    thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let receiver = receiver.clone();
                scope.spawn(move || {
                    let mut summary = ReplaySummary::default();
                    for request in receiver {
                        let result = limits
                            .check(&request)
                            .and_then(|()| engine.donate(request));
                        match result {
                            Ok(_) => summary.accepted += 1,
                            Err(err) => {
                                tracing::debug!(%err, "skipping donation");
                                summary.rejected += 1;
                            }
                        }
                    }
                    summary
                })
            })
            .collect();
        drop(receiver);

        let mut skipped = 0;
        let mut read_error = None;
        for result in csv_reader(reader).deserialize::<DonationRecord>() {
            match result {
                Ok(record) => match record.into_request(ids) {
                    Ok(request) => {
                        if sender.send(request).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::debug!(%err, "skipping donation row");
                        skipped += 1;
                    }
                },
                Err(err) if err.is_io_error() => {
                    read_error = Some(err);
                    break;
                }
                Err(err) => {
                    tracing::debug!(%err, "skipping malformed row");
                    skipped += 1;
                }
            }
        }
        drop(sender);

        let mut summary = ReplaySummary {
            accepted: 0,
            rejected: skipped,
        };
        for handle in handles {
            let worker = handle
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
            summary.accepted += worker.accepted;
            summary.rejected += worker.rejected;
        }
        match read_error {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    })
}

#[derive(Debug, Serialize)]
struct GoalRow<'a> {
    goal: GoalId,
    title: &'a str,
    target: Option<Decimal>,
    collected: Decimal,
    active: bool,
}

/// Write goal totals to a CSV writer
///
/// # CSV Format
///
/// Columns: `goal, title, target, collected, active`
///
/// ```csv
/// goal,title,target,collected,active
/// 1,Clean water,100.00,50.00,true
/// ```
fn write_goals<S: LedgerStore, W: Write>(store: &S, writer: W) -> anyhow::Result<()> {
    let mut wtr = Writer::from_writer(writer);
    for goal in store.goals()? {
        wtr.serialize(GoalRow {
            goal: goal.id,
            title: &goal.title,
            target: goal.target_amount.map(Amount::to_decimal),
            collected: goal.collected_amount.to_decimal(),
            active: goal.is_active,
        })?;
    }
    wtr.flush()?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct BalanceRow<'a> {
    user: UserId,
    name: &'a str,
    balance: Decimal,
}

fn write_balances<S: LedgerStore, W: Write>(store: &S, writer: W) -> anyhow::Result<()> {
    let mut wtr = Writer::from_writer(writer);
    for user in store.users()? {
        wtr.serialize(BalanceRow {
            user: user.id,
            name: &user.name,
            balance: user.balance.to_decimal(),
        })?;
    }
    wtr.flush()?;
    Ok(())
}
