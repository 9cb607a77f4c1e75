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

//! Directory and unit-of-work behavior shared by every store backend.

use donation_ledger::{
    Amount, DonationFilter, DonationId, Donor, GoalId, IdempotencyKey, LedgerStore, MemoryStore,
    NewDonation, NewGoal, NewUser, Page, SqliteStore, StoreError, User, UserId,
};
use tempfile::TempDir;

fn sqlite() -> (TempDir, SqliteStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("ledger.db")).unwrap();
    (dir, store)
}

fn new_donation(goal_id: GoalId, donor: Donor, amount: i64, key: Option<&str>) -> NewDonation {
    NewDonation {
        donor,
        goal_id,
        amount: Amount(amount),
        idempotency_key: key.map(IdempotencyKey::new),
    }
}

fn directory_round_trip(store: &impl LedgerStore) {
    let ada = store.create_user(NewUser::new("Ada")).unwrap();
    let bob = store
        .create_user(NewUser::new("Bob").with_balance(Amount(42)))
        .unwrap();
    assert_eq!(ada.balance, User::DEFAULT_BALANCE);
    assert_eq!(bob.balance, Amount(42));
    assert!(bob.id > ada.id);

    let goal = store
        .create_goal(NewGoal::new("Library").with_target(Amount(500)))
        .unwrap();
    assert_eq!(goal.collected_amount, Amount::ZERO);
    assert!(goal.is_active);

    let users: Vec<_> = store.users().unwrap().into_iter().map(|u| u.name).collect();
    assert_eq!(users, vec!["Ada", "Bob"]);
    assert_eq!(store.goals().unwrap(), vec![goal.clone()]);

    let closed = store.set_goal_active(goal.id, false).unwrap();
    assert!(!closed.is_active);
    assert_eq!(store.goal(goal.id).unwrap(), Some(closed));

    assert_eq!(store.user(UserId(999)).unwrap(), None);
    assert_eq!(store.goal(GoalId(999)).unwrap(), None);
    assert_eq!(store.donation(DonationId(999)).unwrap(), None);
    assert_eq!(
        store.set_goal_active(GoalId(999), true),
        Err(StoreError::NotFound)
    );
}

fn invalid_rows_are_refused(store: &impl LedgerStore) {
    assert!(matches!(
        store.create_user(NewUser::new("Debt").with_balance(Amount(-1))),
        Err(StoreError::Constraint(_))
    ));
    assert!(matches!(
        store.create_goal(NewGoal::new("Nothing").with_target(Amount(0))),
        Err(StoreError::Constraint(_))
    ));
}

fn commit_makes_everything_visible(store: &impl LedgerStore) {
    let user = store.create_user(NewUser::new("Ada")).unwrap();
    let goal = store.create_goal(NewGoal::new("Library")).unwrap();

    let donation = store
        .transact(|uow| {
            uow.lock_goal(goal.id)?.unwrap();
            uow.lock_user(user.id)?.unwrap();
            uow.debit_balance(user.id, Amount(250))?.unwrap();
            let donation = uow.insert_donation(new_donation(
                goal.id,
                Donor::Attributed(user.id),
                250,
                Some("k"),
            ))?;
            let credited = uow.credit_collected(goal.id, Amount(250))?;
            assert_eq!(credited.collected_amount, Amount(250));
            assert_eq!(uow.donation_total(goal.id)?, Amount(250));
            Ok::<_, StoreError>(donation)
        })
        .unwrap();

    assert_eq!(store.donation(donation.id).unwrap(), Some(donation.clone()));
    assert_eq!(store.goal(goal.id).unwrap().unwrap().collected_amount, Amount(250));
    assert_eq!(store.user(user.id).unwrap().unwrap().balance, Amount(999_750));
    assert_eq!(store.donation_total(goal.id).unwrap(), Amount(250));

    let found = store
        .transact(|uow| uow.find_by_idempotency_key(&IdempotencyKey::new("k")))
        .unwrap();
    assert_eq!(found, Some(donation));
}

fn rollback_discards_everything(store: &impl LedgerStore) {
    let user = store.create_user(NewUser::new("Ada")).unwrap();
    let goal = store.create_goal(NewGoal::new("Library")).unwrap();

    let result = store.transact(|uow| {
        uow.lock_goal(goal.id)?;
        uow.debit_balance(user.id, Amount(250))?.unwrap();
        uow.insert_donation(new_donation(goal.id, Donor::Attributed(user.id), 250, Some("k")))?;
        uow.credit_collected(goal.id, Amount(250))?;
        Err::<(), _>(StoreError::Constraint("declined".into()))
    });
    assert_eq!(result, Err(StoreError::Constraint("declined".into())));

    assert_eq!(store.user(user.id).unwrap().unwrap().balance, User::DEFAULT_BALANCE);
    assert_eq!(store.goal(goal.id).unwrap().unwrap().collected_amount, Amount::ZERO);
    assert!(store.donations(DonationFilter::All, Page::all()).unwrap().is_empty());

    // The key is free again
    store
        .transact(|uow| uow.insert_donation(new_donation(goal.id, Donor::Anonymous, 1, Some("k"))))
        .unwrap();
}

fn lock_order_is_enforced(store: &impl LedgerStore) {
    let user = store.create_user(NewUser::new("Ada")).unwrap();
    let first = store.create_goal(NewGoal::new("One")).unwrap();
    let second = store.create_goal(NewGoal::new("Two")).unwrap();

    let result = store.transact(|uow| {
        uow.lock_goal(second.id)?;
        uow.lock_goal(first.id)
    });
    assert!(matches!(result, Err(StoreError::LockOrder { .. })));

    store
        .transact(|uow| {
            uow.lock_goal(first.id)?;
            uow.lock_goal(second.id)?;
            uow.lock_user(user.id)?;
            // Re-locking a held row is fine
            uow.lock_goal(first.id)
        })
        .unwrap();
}

fn missing_rows_lock_as_none(store: &impl LedgerStore) {
    store
        .transact(|uow| {
            assert_eq!(uow.lock_goal(GoalId(404))?, None);
            assert_eq!(uow.lock_user(UserId(404))?, None);
            assert_eq!(uow.debit_balance(UserId(404), Amount(1))?, None);
            Ok::<_, StoreError>(())
        })
        .unwrap();
    let credit = store.transact(|uow| uow.credit_collected(GoalId(405), Amount(1)));
    assert_eq!(credit, Err(StoreError::NotFound));
}

macro_rules! backend_tests {
    ($($name:ident),* $(,)?) => {
        mod memory {
            $(
                #[test]
                fn $name() {
                    super::$name(&donation_ledger::MemoryStore::new());
                }
            )*
        }

        mod sqlite {
            $(
                #[test]
                fn $name() {
                    let (_dir, store) = super::sqlite();
                    super::$name(&store);
                }
            )*
        }
    };
}

backend_tests!(
    directory_round_trip,
    invalid_rows_are_refused,
    commit_makes_everything_visible,
    rollback_discards_everything,
    lock_order_is_enforced,
    missing_rows_lock_as_none,
);

#[test]
fn memory_ids_start_at_one() {
    let store = MemoryStore::new();
    assert_eq!(store.create_user(NewUser::new("a")).unwrap().id, UserId(1));
    assert_eq!(store.create_goal(NewGoal::new("g")).unwrap().id, GoalId(1));
}
