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

//! Engine public API integration tests.

use donation_ledger::config::EngineConfig;
use donation_ledger::{
    Amount, DonationError, DonationFilter, DonationRequest, Donor, Engine, Goal, GoalId,
    IdempotencyKey, LedgerStore, MemoryStore, NewGoal, NewUser, Page, UnitOfWork, User, UserId,
};
use std::sync::Barrier;
use std::thread;
use std::time::Duration;

fn seed(engine: &Engine) -> (Goal, User) {
    let goal = engine
        .store()
        .create_goal(NewGoal::new("Community garden").with_target(Amount(10_000)))
        .unwrap();
    let user = engine.store().create_user(NewUser::new("Ada")).unwrap();
    (goal, user)
}

fn collected(engine: &Engine, goal_id: GoalId) -> Amount {
    engine.goal(goal_id).unwrap().unwrap().collected_amount
}

fn balance(engine: &Engine, user_id: UserId) -> Amount {
    engine.user(user_id).unwrap().unwrap().balance
}

#[test]
fn attributed_then_anonymous_scenario() {
    let engine = Engine::default();
    let (goal, user) = seed(&engine);
    assert_eq!(user.balance, Amount(1_000_000));

    let first = engine
        .donate_to_goal(goal.id, Some(user.id), Amount(2500), false)
        .unwrap();
    assert_eq!(first.user.as_ref().unwrap().balance, Amount(997_500));
    assert_eq!(first.goal.collected_amount, Amount(2500));
    assert!(!first.donation.is_anonymous());

    let second = engine
        .donate_to_goal(goal.id, None, Amount(2500), true)
        .unwrap();
    assert_eq!(second.goal.collected_amount, Amount(5000));
    assert!(second.user.is_none());
    assert_eq!(second.donation.user_id(), None);
    assert!(second.donation.is_anonymous());

    // Anonymous donation leaves the user alone
    assert_eq!(balance(&engine, user.id), Amount(997_500));
    assert!(second.donation.id > first.donation.id);
}

#[test]
fn unknown_goal_is_rejected() {
    let engine = Engine::default();
    let (_, user) = seed(&engine);
    assert_eq!(
        engine.donate(DonationRequest::attributed(GoalId(99), user.id, Amount(10))),
        Err(DonationError::GoalNotFound(GoalId(99)))
    );
}

#[test]
fn unknown_user_is_rejected() {
    let engine = Engine::default();
    let (goal, _) = seed(&engine);
    assert_eq!(
        engine.donate(DonationRequest::attributed(goal.id, UserId(99), Amount(10))),
        Err(DonationError::UserNotFound(UserId(99)))
    );
    assert_eq!(collected(&engine, goal.id), Amount::ZERO);
}

#[test]
fn inactive_goal_is_rejected() {
    let engine = Engine::default();
    let (goal, user) = seed(&engine);
    engine.store().set_goal_active(goal.id, false).unwrap();

    assert_eq!(
        engine.donate(DonationRequest::anonymous(goal.id, Amount(10))),
        Err(DonationError::GoalInactive(goal.id))
    );

    engine.store().set_goal_active(goal.id, true).unwrap();
    engine
        .donate(DonationRequest::attributed(goal.id, user.id, Amount(10)))
        .unwrap();
}

#[test]
fn negative_and_zero_amounts_are_rejected() {
    let engine = Engine::default();
    let (goal, user) = seed(&engine);
    for amount in [Amount(0), Amount(-1)] {
        assert_eq!(
            engine.donate(DonationRequest::attributed(goal.id, user.id, amount)),
            Err(DonationError::InvalidAmount)
        );
    }
}

#[test]
fn insufficient_balance_leaves_no_trace() {
    let engine = Engine::default();
    let (goal, _) = seed(&engine);
    let poor = engine
        .store()
        .create_user(NewUser::new("Poor").with_balance(Amount(100)))
        .unwrap();

    assert_eq!(
        engine.donate(DonationRequest::attributed(goal.id, poor.id, Amount(101))),
        Err(DonationError::InsufficientBalance {
            user_id: poor.id,
            balance: Amount(100),
            requested: Amount(101),
        })
    );

    assert_eq!(balance(&engine, poor.id), Amount(100));
    assert_eq!(collected(&engine, goal.id), Amount::ZERO);
    assert!(
        engine
            .store()
            .donations(DonationFilter::All, Page::all())
            .unwrap()
            .is_empty()
    );
}

#[test]
fn exact_balance_can_be_donated() {
    let engine = Engine::default();
    let (goal, _) = seed(&engine);
    let user = engine
        .store()
        .create_user(NewUser::new("Exact").with_balance(Amount(300)))
        .unwrap();

    let receipt = engine
        .donate(DonationRequest::attributed(goal.id, user.id, Amount(300)))
        .unwrap();
    assert_eq!(receipt.user.unwrap().balance, Amount::ZERO);
}

#[test]
fn anonymous_donations_ignore_every_balance() {
    let engine = Engine::default();
    let (goal, user) = seed(&engine);

    engine
        .donate(DonationRequest::anonymous(goal.id, Amount(5_000_000)))
        .unwrap();

    assert_eq!(balance(&engine, user.id), User::DEFAULT_BALANCE);
    assert_eq!(collected(&engine, goal.id), Amount(5_000_000));
}

#[test]
fn goal_can_be_overfunded() {
    let engine = Engine::default();
    let (goal, _) = seed(&engine);
    let receipt = engine
        .donate(DonationRequest::anonymous(goal.id, Amount(15_000)))
        .unwrap();
    assert!(receipt.goal.is_funded());
    assert!(receipt.goal.is_active);
}

#[test]
fn idempotent_retry_does_not_double_charge() {
    let engine = Engine::default();
    let (goal, user) = seed(&engine);
    let request = DonationRequest::attributed(goal.id, user.id, Amount(700))
        .with_idempotency_key(IdempotencyKey::new("checkout-42"));

    let first = engine.donate(request.clone()).unwrap();
    let retry = engine.donate(request).unwrap();

    assert!(retry.replayed);
    assert_eq!(retry.donation.id, first.donation.id);
    assert_eq!(balance(&engine, user.id), Amount(999_300));
    assert_eq!(collected(&engine, goal.id), Amount(700));
}

#[test]
fn idempotency_key_reused_for_other_goal_conflicts() {
    let engine = Engine::default();
    let (goal, _) = seed(&engine);
    let other = engine.store().create_goal(NewGoal::new("Other")).unwrap();
    let key = IdempotencyKey::new("card-1");

    engine
        .donate(DonationRequest::anonymous(goal.id, Amount(50)).with_idempotency_key(key.clone()))
        .unwrap();
    assert_eq!(
        engine.donate(
            DonationRequest::anonymous(other.id, Amount(50)).with_idempotency_key(key.clone())
        ),
        Err(DonationError::IdempotencyConflict(key))
    );
    assert_eq!(collected(&engine, other.id), Amount::ZERO);
}

#[test]
fn racing_requests_with_one_key_apply_once() {
    let engine = Engine::default();
    let (goal, user) = seed(&engine);
    let request = DonationRequest::attributed(goal.id, user.id, Amount(100))
        .with_idempotency_key(IdempotencyKey::new("double-click"));
    let barrier = Barrier::new(8);

    let receipts: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let request = request.clone();
                let engine = &engine;
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    engine.donate(request).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(receipts.iter().filter(|r| !r.replayed).count(), 1);
    assert!(receipts.iter().all(|r| r.donation.id == receipts[0].donation.id));
    assert_eq!(balance(&engine, user.id), Amount(999_900));
    assert_eq!(collected(&engine, goal.id), Amount(100));
}

#[test]
fn listing_filters_by_goal_and_user() {
    let engine = Engine::default();
    let (goal, user) = seed(&engine);
    let other = engine.store().create_goal(NewGoal::new("Other")).unwrap();

    for _ in 0..12 {
        engine
            .donate(DonationRequest::attributed(goal.id, user.id, Amount(1)))
            .unwrap();
    }
    engine
        .donate(DonationRequest::anonymous(other.id, Amount(1)))
        .unwrap();

    let store = engine.store();
    assert_eq!(
        store
            .donations(DonationFilter::Goal(goal.id), Page::default())
            .unwrap()
            .len(),
        Page::DEFAULT_LIMIT
    );
    assert_eq!(
        store
            .donations(DonationFilter::Goal(goal.id), Page::new(10, 10))
            .unwrap()
            .len(),
        2
    );
    let anonymous = store
        .donations(DonationFilter::Goal(other.id), Page::all())
        .unwrap();
    assert_eq!(anonymous.len(), 1);
    assert_eq!(anonymous[0].donor, Donor::Anonymous);
    assert!(
        store
            .donations(DonationFilter::User(user.id), Page::all())
            .unwrap()
            .iter()
            .all(|d| d.goal_id == goal.id)
    );
    assert_eq!(store.donation_total(goal.id).unwrap(), Amount(12));
}

#[test]
fn audit_balances_after_mixed_traffic() {
    let engine = Engine::default();
    let (goal, user) = seed(&engine);
    engine
        .donate(DonationRequest::attributed(goal.id, user.id, Amount(2500)))
        .unwrap();
    engine
        .donate(DonationRequest::anonymous(goal.id, Amount(2500)))
        .unwrap();
    let _ = engine.donate(DonationRequest::attributed(goal.id, user.id, Amount(10_000_000)));

    let report = engine.audit_goal(goal.id).unwrap();
    assert!(report.balanced);
    assert_eq!(report.collected, Amount(5000));
    assert_eq!(report.donated, Amount(5000));
}

#[test]
fn lock_timeout_surfaces_after_retries() {
    let store = MemoryStore::with_lock_timeout(Duration::from_millis(20));
    let engine = Engine::with_config(
        store,
        EngineConfig {
            lock_timeout_ms: 20,
            max_retries: 2,
            retry_backoff_ms: 1,
        },
    );
    let (goal, _) = seed(&engine);

    // Hold the goal row from another unit of work
    let mut holder = engine.store().begin();
    holder.lock_goal(goal.id).unwrap();

    thread::scope(|scope| {
        let result = scope
            .spawn(|| engine.donate(DonationRequest::anonymous(goal.id, Amount(10))))
            .join()
            .unwrap();
        assert_eq!(result, Err(DonationError::TransactionTimeout));
    });
    drop(holder);

    engine
        .donate(DonationRequest::anonymous(goal.id, Amount(10)))
        .unwrap();
    assert_eq!(collected(&engine, goal.id), Amount(10));
}
