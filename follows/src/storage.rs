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

//! # storage
//!
//! Abstractions for the follows storage layer.
//!
//! [Backend] is deliberately narrow: the five primitives DynamoDB offers for a single table
//! (point put, get, update & delete, plus a limited range query against the table or one of its
//! indices). Everything follows-specific lives one layer up, in [access].
//!
//! [access]: crate::access

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;

/// A single record, as DynamoDB sees it: a map from attribute name to value
pub type Item = HashMap<String, AttributeValue>;

/// The back-end's own error, boxed & otherwise untouched
///
/// Nothing in this crate interprets, retries or suppresses store failures; callers that need
/// resilience can get the original error back via [Error::into_inner] & down-cast it.
#[derive(Debug)]
pub struct Error {
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

impl Error {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error {
            source: Box::new(err),
        }
    }
    pub fn get_ref(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.source.as_ref()
    }
    pub fn into_inner(self) -> Box<dyn std::error::Error + Send + Sync + 'static> {
        self.source
    }
}

/// A range query over one partition of a table or index
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub table: String,
    /// Query this secondary index rather than the table itself
    pub index: Option<String>,
    /// Name of the partition key attribute (of the index, if one is named)
    pub partition_attr: String,
    pub partition_value: AttributeValue,
    /// Maximum number of items to evaluate; must be positive
    pub limit: i32,
    /// Resume strictly after this key; None means start at the beginning of the partition
    pub exclusive_start_key: Option<Item>,
}

impl Query {
    /// True if this query may be served with a strongly consistent read
    ///
    /// Global secondary indices only support eventually consistent reads.
    pub fn consistent_read(&self) -> bool {
        self.index.is_none()
    }
}

/// Results of a [Query], in ascending sort-key order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryPage {
    pub items: Vec<Item>,
    /// Key of the last item evaluated, if the query stopped short of the end of the partition (or
    /// stopped exactly at it, having hit its limit)
    pub last_evaluated_key: Option<Item>,
}

#[async_trait]
pub trait Backend {
    /// Write `item` to `table`, unconditionally replacing any existing item with the same key.
    async fn put_item(&self, table: &str, item: Item) -> Result<(), Error>;
    /// Fetch the item whose primary key is `key`; None if there is no such item.
    async fn get_item(&self, table: &str, key: Item) -> Result<Option<Item>, Error>;
    /// Set each of `attributes` on the item whose primary key is `key`.
    ///
    /// If there's no such item & `must_exist` is false, one will be created containing only `key`
    /// & `attributes`. If `must_exist` is true, nothing is written & the method returns false.
    /// Returns true if the update was applied.
    async fn update_item(
        &self,
        table: &str,
        key: Item,
        attributes: Item,
        must_exist: bool,
    ) -> Result<bool, Error>;
    /// Remove the item whose primary key is `key`; succeeds whether or not it existed.
    async fn delete_item(&self, table: &str, key: Item) -> Result<(), Error>;
    /// Retrieve (at most `query.limit`) items from one partition
    async fn query(&self, query: Query) -> Result<QueryPage, Error>;
}

#[async_trait]
impl<T> Backend for Arc<T>
where
    T: Backend + Send + Sync + ?Sized,
{
    async fn put_item(&self, table: &str, item: Item) -> Result<(), Error> {
        (**self).put_item(table, item).await
    }
    async fn get_item(&self, table: &str, key: Item) -> Result<Option<Item>, Error> {
        (**self).get_item(table, key).await
    }
    async fn update_item(
        &self,
        table: &str,
        key: Item,
        attributes: Item,
        must_exist: bool,
    ) -> Result<bool, Error> {
        (**self)
            .update_item(table, key, attributes, must_exist)
            .await
    }
    async fn delete_item(&self, table: &str, key: Item) -> Result<(), Error> {
        (**self).delete_item(table, key).await
    }
    async fn query(&self, query: Query) -> Result<QueryPage, Error> {
        (**self).query(query).await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn only_table_queries_read_consistently() {
        let mut query = Query {
            table: "follows".to_string(),
            index: None,
            partition_attr: "follower_handle".to_string(),
            partition_value: AttributeValue::S("@Fred".to_string()),
            limit: 10,
            exclusive_start_key: None,
        };
        assert!(query.consistent_read());
        query.index = Some("follows_index".to_string());
        query.partition_attr = "followee_handle".to_string();
        assert!(!query.consistent_read());
    }
}
