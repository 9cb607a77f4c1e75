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

//! SQLite schema for the ledger tables.

/// Idempotent DDL; safe to run on every open.
pub(crate) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    name       TEXT    NOT NULL,
    balance    INTEGER NOT NULL CHECK (balance >= 0),
    created_at TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS goals (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    title            TEXT    NOT NULL,
    description      TEXT,
    target_amount    INTEGER CHECK (target_amount IS NULL OR target_amount > 0),
    collected_amount INTEGER NOT NULL DEFAULT 0 CHECK (collected_amount >= 0),
    is_active        INTEGER NOT NULL DEFAULT 1,
    created_at       TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS donations (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id         INTEGER REFERENCES users (id),
    goal_id         INTEGER NOT NULL REFERENCES goals (id),
    amount          INTEGER NOT NULL CHECK (amount > 0),
    is_anonymous    INTEGER NOT NULL,
    idempotency_key TEXT UNIQUE,
    created_at      TEXT    NOT NULL,
    CHECK ((user_id IS NULL) = (is_anonymous = 1))
);

CREATE INDEX IF NOT EXISTS donations_goal_id ON donations (goal_id);
CREATE INDEX IF NOT EXISTS donations_user_id ON donations (user_id);

CREATE TRIGGER IF NOT EXISTS donations_no_update
BEFORE UPDATE ON donations
BEGIN
    SELECT RAISE(ABORT, 'donations are append-only');
END;

CREATE TRIGGER IF NOT EXISTS donations_no_delete
BEFORE DELETE ON donations
BEGIN
    SELECT RAISE(ABORT, 'donations are append-only');
END;
";

// Column lists shared by every query; the row decoders rely on this order.
pub(crate) const USER_COLUMNS: &str = "id, name, balance, created_at";

pub(crate) const GOAL_COLUMNS: &str =
    "id, title, description, target_amount, collected_amount, is_active, created_at";

pub(crate) const DONATION_COLUMNS: &str =
    "id, user_id, goal_id, amount, is_anonymous, idempotency_key, created_at";
