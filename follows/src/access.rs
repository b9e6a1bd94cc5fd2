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

//! # access
//!
//! [FollowAccess]: the follows data-access layer proper.
//!
//! Every operation here is a single round-trip to the [Backend]; there's no caching, batching,
//! retrying or coordination between calls. What [FollowAccess] *does* add is a validation boundary
//! (malformed handles & page sizes are rejected before anything is sent to the store), the mapping
//! between [Follow] & store items, and typed cursors for the two paged queries.
//!
//! Concurrent writes to the same key are resolved by the store: last writer wins.

use serde::Deserialize;
use serde_dynamo::aws_sdk_dynamodb_1::{from_item, from_items, to_item};
use snafu::{Backtrace, ResultExt, Snafu};
use tap::Pipe;
use tracing::debug;

use aws_sdk_dynamodb::types::AttributeValue;

use crate::{
    entities::{self, check_handle, DataPage, Follow, FolloweeCursor, FollowerCursor},
    storage::{self, Backend, Item, Query},
};

/// Partition key of the table; sort key of the index
pub const FOLLOWER_HANDLE: &str = "follower_handle";
/// Sort key of the table; partition key of the index
pub const FOLLOWEE_HANDLE: &str = "followee_handle";
pub const FOLLOWER_NAME: &str = "follower_name";
pub const FOLLOWEE_NAME: &str = "followee_name";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("The store's last evaluated key had no string attribute {attr}"))]
    BadLastKey { attr: String, backtrace: Backtrace },
    #[snafu(display("Page size must be between 1 & {}; got {page_size}", i32::MAX))]
    BadPageSize {
        page_size: usize,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to deserialize a Follow: {source}"))]
    De {
        source: serde_dynamo::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("There is no follow from {follower_handle} to {followee_handle}"))]
    NoSuchFollow {
        follower_handle: String,
        followee_handle: String,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to serialize {follow}: {source}"))]
    Ser {
        follow: Follow,
        source: serde_dynamo::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Storage error: {source}"))]
    Store { source: storage::Error },
    #[snafu(display("Invalid input: {source}"))]
    Validation { source: entities::Error },
}

impl Error {
    /// True if this error was raised locally, before any request was made of the store
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation { .. } | Error::BadPageSize { .. })
    }
    /// True if this error came from the store (or the transport to it)
    pub fn is_store(&self) -> bool {
        matches!(self, Error::Store { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Names of the table & index holding follows
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Configuration {
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_index")]
    pub index: String,
}

fn default_table() -> String {
    "follows".to_string()
}

fn default_index() -> String {
    "follows_index".to_string()
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            table: default_table(),
            index: default_index(),
        }
    }
}

fn primary_key(follower_handle: &str, followee_handle: &str) -> Item {
    Item::from([
        (
            FOLLOWER_HANDLE.to_string(),
            AttributeValue::S(follower_handle.to_string()),
        ),
        (
            FOLLOWEE_HANDLE.to_string(),
            AttributeValue::S(followee_handle.to_string()),
        ),
    ])
}

fn check_key(follower_handle: &str, followee_handle: &str) -> Result<()> {
    check_handle(FOLLOWER_HANDLE, follower_handle).context(ValidationSnafu)?;
    check_handle(FOLLOWEE_HANDLE, followee_handle).context(ValidationSnafu)
}

fn check_page_size(page_size: usize) -> Result<i32> {
    match i32::try_from(page_size) {
        Ok(limit) if limit > 0 => Ok(limit),
        _ => BadPageSizeSnafu { page_size }.fail(),
    }
}

/// Pull the string attribute `attr` out of a last-evaluated key
fn cursor_text(key: Item, attr: &str) -> Result<String> {
    match key.get(attr) {
        Some(AttributeValue::S(s)) => Ok(s.clone()),
        _ => BadLastKeySnafu { attr }.fail(),
    }
}

/// Data-access façade for [Follow]s
///
/// The [Backend] is supplied by the caller, who remains responsible for its lifetime.
pub struct FollowAccess<B> {
    backend: B,
    cfg: Configuration,
}

impl<B: Backend + Send + Sync> FollowAccess<B> {
    pub fn new(backend: B, cfg: Configuration) -> FollowAccess<B> {
        FollowAccess { backend, cfg }
    }
    pub fn backend(&self) -> &B {
        &self.backend
    }
    pub fn configuration(&self) -> &Configuration {
        &self.cfg
    }

    /// Write `follow`, replacing any existing [Follow] with the same handles
    pub async fn put_follow(&self, follow: &Follow) -> Result<()> {
        follow.check().context(ValidationSnafu)?;
        let item: Item = to_item(follow).context(SerSnafu {
            follow: follow.clone(),
        })?;
        debug!("put_follow: {}", follow);
        self.backend
            .put_item(&self.cfg.table, item)
            .await
            .context(StoreSnafu)
    }

    /// Look-up a [Follow] by its handles; `None` if there is no such follow
    pub async fn get_follow(
        &self,
        follower_handle: &str,
        followee_handle: &str,
    ) -> Result<Option<Follow>> {
        check_key(follower_handle, followee_handle)?;
        self.backend
            .get_item(
                &self.cfg.table,
                primary_key(follower_handle, followee_handle),
            )
            .await
            .context(StoreSnafu)?
            .map(|item| from_item(item).context(DeSnafu))
            .transpose()
    }

    /// Set both names on the [Follow] from `follower_handle` to `followee_handle`
    ///
    /// The handles are left untouched. Nb. that if there is no such follow, the store will create
    /// a record holding just the two handles & the two names; that is, this is an upsert of the
    /// names. Use [update_existing_follow_names] to refuse instead.
    ///
    /// [update_existing_follow_names]: FollowAccess::update_existing_follow_names
    pub async fn update_follow_names(
        &self,
        follower_handle: &str,
        followee_handle: &str,
        new_follower_name: &str,
        new_followee_name: &str,
    ) -> Result<()> {
        self.update_names(
            follower_handle,
            followee_handle,
            new_follower_name,
            new_followee_name,
            false,
        )
        .await
        .map(|_| ())
    }

    /// As [update_follow_names], but fail with [Error::NoSuchFollow] rather than create a record
    ///
    /// [update_follow_names]: FollowAccess::update_follow_names
    pub async fn update_existing_follow_names(
        &self,
        follower_handle: &str,
        followee_handle: &str,
        new_follower_name: &str,
        new_followee_name: &str,
    ) -> Result<()> {
        if self
            .update_names(
                follower_handle,
                followee_handle,
                new_follower_name,
                new_followee_name,
                true,
            )
            .await?
        {
            Ok(())
        } else {
            NoSuchFollowSnafu {
                follower_handle,
                followee_handle,
            }
            .fail()
        }
    }

    async fn update_names(
        &self,
        follower_handle: &str,
        followee_handle: &str,
        new_follower_name: &str,
        new_followee_name: &str,
        must_exist: bool,
    ) -> Result<bool> {
        check_key(follower_handle, followee_handle)?;
        debug!(
            "update_names: {} => {}: ({}, {}), must_exist: {}",
            follower_handle, followee_handle, new_follower_name, new_followee_name, must_exist
        );
        self.backend
            .update_item(
                &self.cfg.table,
                primary_key(follower_handle, followee_handle),
                Item::from([
                    (
                        FOLLOWER_NAME.to_string(),
                        AttributeValue::S(new_follower_name.to_string()),
                    ),
                    (
                        FOLLOWEE_NAME.to_string(),
                        AttributeValue::S(new_followee_name.to_string()),
                    ),
                ]),
                must_exist,
            )
            .await
            .context(StoreSnafu)
    }

    /// Remove the [Follow] from `follower_handle` to `followee_handle`, if there is one
    pub async fn delete_follow(&self, follower_handle: &str, followee_handle: &str) -> Result<()> {
        check_key(follower_handle, followee_handle)?;
        debug!("delete_follow: {} => {}", follower_handle, followee_handle);
        self.backend
            .delete_item(
                &self.cfg.table,
                primary_key(follower_handle, followee_handle),
            )
            .await
            .context(StoreSnafu)
    }

    /// Retrieve a page of the [Follow]s *from* `follower_handle`, in ascending order of followee
    /// handle
    ///
    /// Pass `None` for `last` to start at the beginning; else pass the cursor returned with the
    /// previous page.
    pub async fn get_page_of_followees(
        &self,
        follower_handle: &str,
        page_size: usize,
        last: Option<&FolloweeCursor>,
    ) -> Result<DataPage<Follow, FolloweeCursor>> {
        check_handle(FOLLOWER_HANDLE, follower_handle).context(ValidationSnafu)?;
        let limit = check_page_size(page_size)?;
        let (items, last_key) = self
            .page(
                None,
                FOLLOWER_HANDLE,
                follower_handle,
                limit,
                // The table's key is (follower, followee); we know the follower already
                last.map(|cursor| primary_key(follower_handle, cursor)),
            )
            .await?;
        DataPage::new(
            items,
            last_key
                .map(|key| cursor_text(key, FOLLOWEE_HANDLE))
                .transpose()?
                .map(FolloweeCursor::new),
        )
        .pipe(Ok)
    }

    /// Retrieve a page of the [Follow]s *to* `followee_handle`, in ascending order of follower
    /// handle
    ///
    /// This queries the secondary index. Pass `None` for `last` to start at the beginning; else
    /// pass the cursor returned with the previous page:
    ///
    /// ```no_run
    /// # use follows::{access::FollowAccess, memory::Store};
    /// # async fn next_page(access: FollowAccess<Store>) -> follows::access::Result<()> {
    /// let first = access.get_page_of_followers("@ClintEastwood", 10, None).await?;
    /// let second = access
    ///     .get_page_of_followers("@ClintEastwood", 10, first.last_key.as_ref())
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// A cursor from [get_page_of_followees] is a different type, and won't be accepted:
    ///
    /// ```compile_fail
    /// # use follows::{access::FollowAccess, memory::Store};
    /// # async fn next_page(access: FollowAccess<Store>) -> follows::access::Result<()> {
    /// let followees = access.get_page_of_followees("@FredFlintstone", 10, None).await?;
    /// let followers = access
    ///     .get_page_of_followers("@ClintEastwood", 10, followees.last_key.as_ref())
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// [get_page_of_followees]: FollowAccess::get_page_of_followees
    pub async fn get_page_of_followers(
        &self,
        followee_handle: &str,
        page_size: usize,
        last: Option<&FollowerCursor>,
    ) -> Result<DataPage<Follow, FollowerCursor>> {
        check_handle(FOLLOWEE_HANDLE, followee_handle).context(ValidationSnafu)?;
        let limit = check_page_size(page_size)?;
        let (items, last_key) = self
            .page(
                Some(self.cfg.index.clone()),
                FOLLOWEE_HANDLE,
                followee_handle,
                limit,
                // The index key is (followee, follower), the table key the reverse; both are
                // covered by the same two attributes.
                last.map(|cursor| primary_key(cursor, followee_handle)),
            )
            .await?;
        DataPage::new(
            items,
            last_key
                .map(|key| cursor_text(key, FOLLOWER_HANDLE))
                .transpose()?
                .map(FollowerCursor::new),
        )
        .pipe(Ok)
    }

    async fn page(
        &self,
        index: Option<String>,
        partition_attr: &str,
        partition_value: &str,
        limit: i32,
        exclusive_start_key: Option<Item>,
    ) -> Result<(Vec<Follow>, Option<Item>)> {
        let out = self
            .backend
            .query(Query {
                table: self.cfg.table.clone(),
                index,
                partition_attr: partition_attr.to_string(),
                partition_value: AttributeValue::S(partition_value.to_string()),
                limit,
                exclusive_start_key,
            })
            .await
            .context(StoreSnafu)?;
        debug!(
            "page: {} = {}: {} items; more: {}",
            partition_attr,
            partition_value,
            out.items.len(),
            out.last_evaluated_key.is_some()
        );
        Ok((
            from_items(out.items).context(DeSnafu)?,
            out.last_evaluated_key,
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use async_trait::async_trait;

    use crate::{
        memory::{KeySchema, Store},
        storage::QueryPage,
    };

    fn in_memory() -> FollowAccess<Arc<Store>> {
        let store = Arc::new(Store::new());
        store
            .create_table(
                "follows",
                KeySchema::new(FOLLOWER_HANDLE, FOLLOWEE_HANDLE),
                [(
                    "follows_index".to_string(),
                    KeySchema::new(FOLLOWEE_HANDLE, FOLLOWER_HANDLE),
                )],
            )
            .unwrap();
        FollowAccess::new(store, Configuration::default())
    }

    /// A [Backend] that counts calls & fails every one of them
    #[derive(Default)]
    struct Unreachable {
        calls: AtomicUsize,
    }

    #[derive(Debug, Snafu)]
    #[snafu(display("the store is down"))]
    struct Down;

    impl Unreachable {
        fn fail<T>(&self) -> std::result::Result<T, storage::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(storage::Error::new(Down))
        }
    }

    #[async_trait]
    impl Backend for Unreachable {
        async fn put_item(&self, _: &str, _: Item) -> std::result::Result<(), storage::Error> {
            self.fail()
        }
        async fn get_item(
            &self,
            _: &str,
            _: Item,
        ) -> std::result::Result<Option<Item>, storage::Error> {
            self.fail()
        }
        async fn update_item(
            &self,
            _: &str,
            _: Item,
            _: Item,
            _: bool,
        ) -> std::result::Result<bool, storage::Error> {
            self.fail()
        }
        async fn delete_item(&self, _: &str, _: Item) -> std::result::Result<(), storage::Error> {
            self.fail()
        }
        async fn query(&self, _: Query) -> std::result::Result<QueryPage, storage::Error> {
            self.fail()
        }
    }

    #[tokio::test]
    async fn validation_precedes_the_store() {
        let access = FollowAccess::new(Unreachable::default(), Configuration::default());

        let err = access
            .put_follow(&Follow::new("", "Fred", "@Barney", "Barney"))
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(access.get_follow("@Fred", "").await.unwrap_err().is_validation());
        assert!(access
            .update_follow_names("", "@Barney", "a", "b")
            .await
            .unwrap_err()
            .is_validation());
        assert!(access
            .delete_follow("@Fred", "")
            .await
            .unwrap_err()
            .is_validation());
        assert!(access
            .get_page_of_followees("@Fred", 0, None)
            .await
            .unwrap_err()
            .is_validation());
        assert!(access
            .get_page_of_followers("@Barney", i32::MAX as usize + 1, None)
            .await
            .unwrap_err()
            .is_validation());
        assert!(access
            .get_page_of_followers("", 10, None)
            .await
            .unwrap_err()
            .is_validation());
        assert_eq!(0, access.backend().calls.load(Ordering::SeqCst));

        // Well-formed requests make it to the store, whose errors come back unchanged
        let err = access.get_follow("@Fred", "@Barney").await.unwrap_err();
        assert!(err.is_store());
        match err {
            Error::Store { source } => assert!(source.into_inner().downcast::<Down>().is_ok()),
            _ => unreachable!(),
        }
        assert_eq!(1, access.backend().calls.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn crud() {
        let access = in_memory();
        let fred = Follow::new("@Fred", "Fred Flintstone", "@Barney", "Barney Rubble");

        assert_eq!(None, access.get_follow("@Fred", "@Barney").await.unwrap());
        access.put_follow(&fred).await.unwrap();
        assert_eq!(
            Some(fred.clone()),
            access.get_follow("@Fred", "@Barney").await.unwrap()
        );

        // Overwrite
        let renamed = Follow::new("@Fred", "Fred F.", "@Barney", "Barney R.");
        access.put_follow(&renamed).await.unwrap();
        assert_eq!(
            Some(renamed),
            access.get_follow("@Fred", "@Barney").await.unwrap()
        );

        access
            .update_follow_names("@Fred", "@Barney", "Updated Fred", "Updated Barney")
            .await
            .unwrap();
        assert_eq!(
            Some(Follow::new(
                "@Fred",
                "Updated Fred",
                "@Barney",
                "Updated Barney"
            )),
            access.get_follow("@Fred", "@Barney").await.unwrap()
        );

        access.delete_follow("@Fred", "@Barney").await.unwrap();
        access.delete_follow("@Fred", "@Barney").await.unwrap();
        assert_eq!(None, access.get_follow("@Fred", "@Barney").await.unwrap());
    }

    #[tokio::test]
    async fn updating_missing_follows() {
        let access = in_memory();

        let err = access
            .update_existing_follow_names("@Wilma", "@Betty", "Wilma", "Betty")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSuchFollow { .. }));
        assert_eq!(None, access.get_follow("@Wilma", "@Betty").await.unwrap());

        // The plain update materializes a record; with all four attributes present, it reads back
        // as a complete `Follow`
        access
            .update_follow_names("@Wilma", "@Betty", "Wilma", "Betty")
            .await
            .unwrap();
        assert_eq!(
            Some(Follow::new("@Wilma", "Wilma", "@Betty", "Betty")),
            access.get_follow("@Wilma", "@Betty").await.unwrap()
        );
    }

    #[tokio::test]
    async fn paging_both_ways() {
        let access = in_memory();
        for i in 1..=25 {
            access
                .put_follow(&Follow::new(
                    "@FredFlintstone",
                    "Fred Flintstone",
                    format!("@ClintEastwood_{}", i),
                    format!("Clint Eastwood {}", i),
                ))
                .await
                .unwrap();
        }
        access
            .put_follow(&Follow::new(
                "@BarneyRubble",
                "Barney Rubble",
                "@ClintEastwood_1",
                "Clint Eastwood 1",
            ))
            .await
            .unwrap();

        // Handles sort byte-wise: _1, _10, _11, ... _19, _2, _20, ...
        let mut expected = (1..=25)
            .map(|i| format!("@ClintEastwood_{}", i))
            .collect::<Vec<String>>();
        expected.sort();

        let first = access
            .get_page_of_followees("@FredFlintstone", 10, None)
            .await
            .unwrap();
        assert_eq!(10, first.len());
        assert_eq!(
            expected[..10],
            first
                .items
                .iter()
                .map(|f| f.followee_handle.clone())
                .collect::<Vec<String>>()
        );
        let cursor = first.last_key.unwrap();
        assert_eq!(expected[9], cursor.as_ref());

        let second = access
            .get_page_of_followees("@FredFlintstone", 10, Some(&cursor))
            .await
            .unwrap();
        assert_eq!(
            expected[10..20],
            second
                .items
                .iter()
                .map(|f| f.followee_handle.clone())
                .collect::<Vec<String>>()
        );
        let third = access
            .get_page_of_followees("@FredFlintstone", 10, second.last_key.as_ref())
            .await
            .unwrap();
        assert_eq!(5, third.len());
        assert!(!third.has_more());

        let mut walked = Vec::new();
        let mut last: Option<FolloweeCursor> = None;
        loop {
            let page = access
                .get_page_of_followees("@FredFlintstone", 7, last.as_ref())
                .await
                .unwrap();
            walked.extend(page.items.into_iter().map(|f| f.followee_handle));
            match page.last_key {
                Some(cursor) => last = Some(cursor),
                None => break,
            }
        }
        assert_eq!(expected, walked);

        let followers = access
            .get_page_of_followers("@ClintEastwood_1", 1, None)
            .await
            .unwrap();
        assert_eq!(1, followers.len());
        assert_eq!("@BarneyRubble", followers.items[0].follower_handle);
        let followers = access
            .get_page_of_followers("@ClintEastwood_1", 1, followers.last_key.as_ref())
            .await
            .unwrap();
        assert_eq!("@FredFlintstone", followers.items[0].follower_handle);

        let nobody = access
            .get_page_of_followers("@Nobody", 10, None)
            .await
            .unwrap();
        assert!(nobody.is_empty());
        assert!(!nobody.has_more());
    }
}
