// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of follows.
//
// follows is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// follows is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with follows.  If not,
// see <http://www.gnu.org/licenses/>.

//! # The follows Integration Tests
//!
//! # Introduction
//!
//! The functions in this crate express the behavior every [Backend] must exhibit when driven
//! through [FollowAccess]. Each integration test program in `tests` registers them against its own
//! fixture (an in-process [Store], or a live DynamoDB/Alternator endpoint) by way of [inventory];
//! `tests/common` holds the registrations so that every fixture runs the same suite.
//!
//! [Backend]: follows::storage::Backend
//! [Store]: follows::memory::Store
//! [inventory]: https://docs.rs/inventory/latest/inventory/
//!
//! Test functions return `Result<(), Failed>` ([Failed] comes from [libtest-mimic]). This lets me
//! use the `?` sigil on fallible code that I expect to succeed but am not interested in testing;
//! the properties under test are `assert!`ed.
//!
//! [libtest-mimic]: https://docs.rs/libtest-mimic/latest/libtest_mimic/index.html
//!
//! Fixtures may be shared (a long-lived DynamoDB table, e.g.), so every test mints its own handles
//! via [unique_handle] rather than assuming an empty table.
use follows::{
    access::{Error as AccessError, FollowAccess, Result as AccessResult},
    entities::{Follow, FolloweeCursor, FollowerCursor},
    storage::Backend,
};

use itertools::Itertools;
use libtest_mimic::Failed;
use tracing::debug;
use uuid::Uuid;

use std::{collections::HashSet, sync::Arc, time::Duration};

/// How many times to query the secondary index before giving up on it
const INDEX_ATTEMPTS: usize = 20;
/// How long to wait between index queries
const INDEX_INTERVAL: Duration = Duration::from_millis(250);

/// The [FollowAccess] handed to each test; the backend is erased so that one function pointer
/// type serves every fixture
pub type Access = Arc<FollowAccess<Arc<dyn Backend + Send + Sync>>>;

/// Return a handle of the form "@{base}-{uuid}" that no other test run will produce
pub fn unique_handle(base: &str) -> String {
    format!("@{}-{}", base, Uuid::new_v4().simple())
}

/// Walk every page of followees for `follower_handle`
pub async fn all_followees(
    access: &Access,
    follower_handle: &str,
    page_size: usize,
) -> AccessResult<Vec<Follow>> {
    let mut follows = Vec::new();
    let mut last: Option<FolloweeCursor> = None;
    loop {
        let page = access
            .get_page_of_followees(follower_handle, page_size, last.as_ref())
            .await?;
        follows.extend(page.items);
        match page.last_key {
            Some(cursor) => last = Some(cursor),
            None => break,
        }
    }
    Ok(follows)
}

/// Walk every page of followers for `followee_handle`
pub async fn all_followers(
    access: &Access,
    followee_handle: &str,
    page_size: usize,
) -> AccessResult<Vec<Follow>> {
    let mut follows = Vec::new();
    let mut last: Option<FollowerCursor> = None;
    loop {
        let page = access
            .get_page_of_followers(followee_handle, page_size, last.as_ref())
            .await?;
        follows.extend(page.items);
        match page.last_key {
            Some(cursor) => last = Some(cursor),
            None => break,
        }
    }
    Ok(follows)
}

/// Wait for the secondary index to show exactly `expected` followers of `followee_handle`
///
/// Global secondary indices are updated asynchronously on DynamoDB, so a write may not be visible
/// there right away. The in-memory store settles on the first check.
pub async fn settle_followers(
    access: &Access,
    followee_handle: &str,
    expected: usize,
) -> Result<(), Failed> {
    let mut seen = 0;
    for attempt in 0..INDEX_ATTEMPTS {
        seen = all_followers(access, followee_handle, 100).await?.len();
        if seen == expected {
            return Ok(());
        }
        debug!(
            "{} has {} followers in the index, expecting {} (check {})",
            followee_handle, seen, expected, attempt
        );
        tokio::time::sleep(INDEX_INTERVAL).await;
    }
    Err(format!(
        "{} still had {} followers in the index (expected {})",
        followee_handle, seen, expected
    )
    .into())
}

/// Put a [Follow], then read it back
pub async fn round_trip(access: Access) -> Result<(), Failed> {
    let follower = unique_handle("Fred");
    let followee = unique_handle("Barney");
    assert!(access.get_follow(&follower, &followee).await?.is_none());

    let follow = Follow::new(&follower, "Fred Flintstone", &followee, "Barney Rubble");
    access.put_follow(&follow).await?;
    assert!(Some(follow) == access.get_follow(&follower, &followee).await?);

    // The reverse relationship is a distinct follow
    assert!(access.get_follow(&followee, &follower).await?.is_none());
    Ok(())
}

/// A second put with the same handles replaces the first
pub async fn overwrite(access: Access) -> Result<(), Failed> {
    let follower = unique_handle("Fred");
    let followee = unique_handle("Barney");
    access
        .put_follow(&Follow::new(&follower, "Fred", &followee, "Barney"))
        .await?;
    let second = Follow::new(&follower, "Fred Flintstone", &followee, "Barney Rubble");
    access.put_follow(&second).await?;
    assert!(Some(second) == access.get_follow(&follower, &followee).await?);
    assert!(1 == all_followees(&access, &follower, 10).await?.len());
    Ok(())
}

/// Updating names touches the names, and only the names, of one follow
pub async fn update_isolation(access: Access) -> Result<(), Failed> {
    let follower = unique_handle("Fred");
    let barney = unique_handle("Barney");
    let wilma = unique_handle("Wilma");
    let to_barney = Follow::new(&follower, "Fred", &barney, "Barney");
    let to_wilma = Follow::new(&follower, "Fred", &wilma, "Wilma");
    access.put_follow(&to_barney).await?;
    access.put_follow(&to_wilma).await?;

    access
        .update_follow_names(&follower, &barney, "Updated Fred", "Updated Barney")
        .await?;
    assert!(
        Some(Follow::new(&follower, "Updated Fred", &barney, "Updated Barney"))
            == access.get_follow(&follower, &barney).await?
    );
    assert!(Some(to_wilma) == access.get_follow(&follower, &wilma).await?);
    Ok(())
}

/// Only existing follows are updated by `update_existing_follow_names`
pub async fn update_existing_refuses(access: Access) -> Result<(), Failed> {
    let follower = unique_handle("Fred");
    let followee = unique_handle("Barney");
    let err = access
        .update_existing_follow_names(&follower, &followee, "Fred", "Barney")
        .await;
    assert!(matches!(err, Err(AccessError::NoSuchFollow { .. })));
    assert!(access.get_follow(&follower, &followee).await?.is_none());

    access
        .put_follow(&Follow::new(&follower, "Fred", &followee, "Barney"))
        .await?;
    access
        .update_existing_follow_names(&follower, &followee, "F", "B")
        .await?;
    assert!(
        Some(Follow::new(&follower, "F", &followee, "B"))
            == access.get_follow(&follower, &followee).await?
    );
    Ok(())
}

/// Deleting removes the follow; deleting again (or deleting a follow that never existed) succeeds
pub async fn delete_idempotence(access: Access) -> Result<(), Failed> {
    let follower = unique_handle("Fred");
    let followee = unique_handle("Barney");
    access.delete_follow(&follower, &followee).await?;

    access
        .put_follow(&Follow::new(&follower, "Fred", &followee, "Barney"))
        .await?;
    access.delete_follow(&follower, &followee).await?;
    assert!(access.get_follow(&follower, &followee).await?.is_none());
    access.delete_follow(&follower, &followee).await?;
    settle_followers(&access, &followee, 0).await?;
    Ok(())
}

/// Following cursors visits every followee exactly once, in ascending order
pub async fn pagination_completeness(access: Access) -> Result<(), Failed> {
    let follower = unique_handle("Fred");
    let followees = (0..23)
        .map(|i| format!("{}_{}", unique_handle("Clint"), i))
        .collect::<Vec<String>>();
    for followee in &followees {
        access
            .put_follow(&Follow::new(&follower, "Fred", followee, "Clint"))
            .await?;
    }

    for page_size in [1, 5, 10, 23, 100] {
        let mut seen = Vec::new();
        let mut last: Option<FolloweeCursor> = None;
        let mut pages = 0;
        loop {
            let page = access
                .get_page_of_followees(&follower, page_size, last.as_ref())
                .await?;
            assert!(page.len() <= page_size);
            pages += 1;
            seen.extend(page.items.into_iter().map(|f| f.followee_handle));
            match page.last_key {
                Some(cursor) => last = Some(cursor),
                None => break,
            }
        }
        debug!("page size {}: {} pages", page_size, pages);
        assert!(seen.len() == followees.len());
        assert!(seen.iter().tuple_windows().all(|(a, b)| a < b));
        assert!(
            seen.iter().collect::<HashSet<_>>() == followees.iter().collect::<HashSet<_>>()
        );
    }
    Ok(())
}

/// Every follow is visible from both ends
pub async fn index_mirroring(access: Access) -> Result<(), Failed> {
    let followee = unique_handle("Clint");
    let followers = (0..12)
        .map(|i| format!("{}_{}", unique_handle("Fred"), i))
        .sorted()
        .collect::<Vec<String>>();
    for follower in &followers {
        access
            .put_follow(&Follow::new(follower, "Fred", &followee, "Clint"))
            .await?;
    }
    settle_followers(&access, &followee, followers.len()).await?;

    let first = access.get_page_of_followers(&followee, 7, None).await?;
    assert!(7 == first.len());
    let second = access
        .get_page_of_followers(&followee, 7, first.last_key.as_ref())
        .await?;
    assert!(5 == second.len());
    assert!(!second.has_more());
    let got = first
        .items
        .iter()
        .chain(second.items.iter())
        .map(|f| f.follower_handle.clone())
        .collect::<Vec<String>>();
    assert!(got == followers);

    // And each follower sees exactly its one followee
    for follower in &followers {
        let page = access.get_page_of_followees(follower, 10, None).await?;
        assert!(1 == page.len());
        assert!(page.items[0].followee_handle == followee);
    }
    Ok(())
}

/// The scripted scenario from `follows-demo`: twenty-five follows each way, a rename, a delete,
/// and two pages from each direction
pub async fn scripted_scenario(access: Access) -> Result<(), Failed> {
    let fred = unique_handle("FredFlintstone");
    let clint = unique_handle("ClintEastwood");
    for i in 1..=25 {
        access
            .put_follow(&Follow::new(
                &fred,
                "Fred Flintstone",
                format!("{}_{}", clint, i),
                format!("Clint Eastwood {}", i),
            ))
            .await?;
        access
            .put_follow(&Follow::new(
                format!("{}_{}", fred, i),
                format!("Fred Flintstone {}", i),
                &clint,
                "Clint Eastwood",
            ))
            .await?;
    }

    let clint_1 = format!("{}_1", clint);
    access
        .update_follow_names(&fred, &clint_1, "Updated Fred", "Updated Clint")
        .await?;
    assert!(
        Some(Follow::new(&fred, "Updated Fred", &clint_1, "Updated Clint"))
            == access.get_follow(&fred, &clint_1).await?
    );
    access.delete_follow(&format!("{}_1", fred), &clint).await?;
    settle_followers(&access, &clint, 24).await?;

    // Handles sort byte-wise: _1, _10, _11, ... _18 make up the first page
    let first = access.get_page_of_followees(&fred, 10, None).await?;
    let expected = [1, 10, 11, 12, 13, 14, 15, 16, 17, 18]
        .iter()
        .map(|i| format!("{}_{}", clint, i))
        .collect::<Vec<String>>();
    assert!(
        first
            .items
            .iter()
            .map(|f| f.followee_handle.clone())
            .collect::<Vec<String>>()
            == expected
    );
    assert!(first.items[0].follower_name == "Updated Fred");
    let second = access
        .get_page_of_followees(&fred, 10, first.last_key.as_ref())
        .await?;
    assert!(10 == second.len());
    assert!(second.items[0].followee_handle == format!("{}_19", clint));

    // Follower _1 is gone, so the index starts at _10 & the two pages hold 20 of the remaining 24
    let first = access.get_page_of_followers(&clint, 10, None).await?;
    assert!(first.items[0].follower_handle == format!("{}_10", fred));
    let second = access
        .get_page_of_followers(&clint, 10, first.last_key.as_ref())
        .await?;
    assert!(10 == second.len());
    assert!(second.has_more());
    let third = access
        .get_page_of_followers(&clint, 10, second.last_key.as_ref())
        .await?;
    assert!(4 == third.len());
    Ok(())
}

/// Malformed requests are rejected as validation errors
pub async fn rejects_malformed_requests(access: Access) -> Result<(), Failed> {
    let follower = unique_handle("Fred");
    assert!(access
        .put_follow(&Follow::new(&follower, "Fred", "", "Nobody"))
        .await
        .is_err_and(|err| err.is_validation()));
    assert!(access
        .get_page_of_followees(&follower, 0, None)
        .await
        .is_err_and(|err| err.is_validation()));
    assert!(access
        .get_follow(&"x".repeat(2048), &follower)
        .await
        .is_err_and(|err| err.is_validation()));
    Ok(())
}
