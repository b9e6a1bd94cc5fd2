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

//! # memory
//!
//! An in-process [Backend], for tests & for exercising the library without a DynamoDB to hand.
//!
//! [Store] mimics the parts of DynamoDB's behavior that callers of this crate can observe: items
//! are grouped by partition key & ordered byte-wise by sort key, secondary indices are maintained
//! on every write, a query's `limit` caps the number of items returned (with a
//! `LastEvaluatedKey` whenever it's reached), and an update of a missing key creates the item.
//! Only string-valued key attributes are supported, which is all this crate needs.
//!
//! [Backend]: crate::storage::Backend

use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
};

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use snafu::{Backtrace, OptionExt, Snafu};
use tracing::debug;

use crate::storage::{self, Item, Query, QueryPage};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Limit must be positive; got {limit}"))]
    BadLimit { limit: i32, backtrace: Backtrace },
    #[snafu(display("Key attribute {attr} is missing or isn't a string"))]
    KeyAttribute {
        attr: String,
        backtrace: Backtrace,
    },
    #[snafu(display("Query partition attribute was {actual}; expected {expected}"))]
    PartitionAttribute {
        actual: String,
        expected: String,
        backtrace: Backtrace,
    },
    #[snafu(display("The store's lock was poisoned"))]
    Poisoned { backtrace: Backtrace },
    #[snafu(display("Table {table} has no index named {index}"))]
    UnknownIndex {
        table: String,
        index: String,
        backtrace: Backtrace,
    },
    #[snafu(display("No table named {table}"))]
    UnknownTable { table: String, backtrace: Backtrace },
}

type Result<T> = std::result::Result<T, Error>;

/// A (partition key, sort key) pair of attribute names
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeySchema {
    pub partition: String,
    pub sort: String,
}

impl KeySchema {
    pub fn new(partition: impl Into<String>, sort: impl Into<String>) -> KeySchema {
        KeySchema {
            partition: partition.into(),
            sort: sort.into(),
        }
    }
    /// Pull this schema's key out of `item`
    fn key_of(&self, item: &Item) -> Result<(String, String)> {
        Ok((
            string_attr(item, &self.partition)?,
            string_attr(item, &self.sort)?,
        ))
    }
}

fn string_attr(item: &Item, attr: &str) -> Result<String> {
    item.get(attr)
        .and_then(|val| val.as_s().ok())
        .cloned()
        .context(KeyAttributeSnafu { attr })
}

struct Table {
    schema: KeySchema,
    indices: HashMap<String, KeySchema>,
    items: BTreeMap<(String, String), Item>,
}

impl Table {
    fn schema_for(&self, table: &str, index: &Option<String>) -> Result<&KeySchema> {
        match index {
            Some(index) => self.indices.get(index).context(UnknownIndexSnafu {
                table,
                index: index.clone(),
            }),
            None => Ok(&self.schema),
        }
    }
}

/// In-memory, DynamoDB-flavored table storage
#[derive(Default)]
pub struct Store {
    tables: Mutex<HashMap<String, Table>>,
}

impl Store {
    pub fn new() -> Store {
        Store::default()
    }
    /// Create (or re-create, empty) a table with the given primary key & global secondary
    /// indices
    pub fn create_table(
        &self,
        name: impl Into<String>,
        schema: KeySchema,
        indices: impl IntoIterator<Item = (String, KeySchema)>,
    ) -> std::result::Result<(), storage::Error> {
        self.tables
            .lock()
            .map_err(|_| storage::Error::new(PoisonedSnafu.build()))?
            .insert(
                name.into(),
                Table {
                    schema,
                    indices: indices.into_iter().collect(),
                    items: BTreeMap::new(),
                },
            );
        Ok(())
    }
    /// Run `f` against the table named `table`, under the lock
    fn with_table<T>(&self, table: &str, f: impl FnOnce(&mut Table) -> Result<T>) -> Result<T> {
        let mut tables = self.tables.lock().map_err(|_| PoisonedSnafu.build())?;
        let table = tables.get_mut(table).context(UnknownTableSnafu { table })?;
        f(table)
    }
}

#[async_trait]
impl storage::Backend for Store {
    async fn put_item(&self, table: &str, item: Item) -> std::result::Result<(), storage::Error> {
        self.with_table(table, |t| {
            let key = t.schema.key_of(&item)?;
            debug!("put_item: {:?}", key);
            t.items.insert(key, item);
            Ok(())
        })
        .map_err(storage::Error::new)
    }

    async fn get_item(
        &self,
        table: &str,
        key: Item,
    ) -> std::result::Result<Option<Item>, storage::Error> {
        self.with_table(table, |t| Ok(t.items.get(&t.schema.key_of(&key)?).cloned()))
            .map_err(storage::Error::new)
    }

    async fn update_item(
        &self,
        table: &str,
        key: Item,
        attributes: Item,
        must_exist: bool,
    ) -> std::result::Result<bool, storage::Error> {
        self.with_table(table, |t| {
            let k = t.schema.key_of(&key)?;
            if must_exist && !t.items.contains_key(&k) {
                debug!("update_item: {:?} doesn't exist", k);
                return Ok(false);
            }
            // Just like UpdateItem, a missing item is created from the key plus the new values
            t.items.entry(k).or_insert(key).extend(attributes);
            Ok(true)
        })
        .map_err(storage::Error::new)
    }

    async fn delete_item(&self, table: &str, key: Item) -> std::result::Result<(), storage::Error> {
        self.with_table(table, |t| {
            let k = t.schema.key_of(&key)?;
            t.items.remove(&k);
            Ok(())
        })
        .map_err(storage::Error::new)
    }

    async fn query(&self, query: Query) -> std::result::Result<QueryPage, storage::Error> {
        self.with_table(&query.table, |t| {
            if query.limit <= 0 {
                return BadLimitSnafu { limit: query.limit }.fail();
            }
            let schema = t.schema_for(&query.table, &query.index)?;
            if schema.partition != query.partition_attr {
                return PartitionAttributeSnafu {
                    actual: query.partition_attr.clone(),
                    expected: schema.partition.clone(),
                }
                .fail();
            }
            let partition = match &query.partition_value {
                AttributeValue::S(s) => s.clone(),
                _ => {
                    return KeyAttributeSnafu {
                        attr: query.partition_attr.clone(),
                    }
                    .fail()
                }
            };
            let start_after = query
                .exclusive_start_key
                .as_ref()
                .map(|key| string_attr(key, &schema.sort))
                .transpose()?;

            // Items without the index's key attributes simply don't appear in it
            let mut matches = t
                .items
                .values()
                .filter_map(|item| schema.key_of(item).ok().map(|key| (key, item)))
                .filter(|((pk, sk), _)| {
                    *pk == partition && start_after.as_ref().map_or(true, |after| sk > after)
                })
                .collect::<Vec<_>>();
            matches.sort_by(|(lhs, _), (rhs, _)| lhs.1.cmp(&rhs.1));

            let limit = query.limit as usize;
            let items = matches
                .into_iter()
                .take(limit)
                .map(|(_, item)| item.clone())
                .collect::<Vec<Item>>();

            let last_evaluated_key = if items.len() == limit {
                items
                    .last()
                    .map(|item| -> Result<Item> {
                        let mut key = Item::new();
                        for attr in [
                            &t.schema.partition,
                            &t.schema.sort,
                            &schema.partition,
                            &schema.sort,
                        ] {
                            key.insert(attr.clone(), AttributeValue::S(string_attr(item, attr)?));
                        }
                        Ok(key)
                    })
                    .transpose()?
            } else {
                None
            };

            debug!(
                "query of {}/{:?} for {:?}: {} items, last key {:?}",
                query.table,
                query.index,
                partition,
                items.len(),
                last_evaluated_key
            );

            Ok(QueryPage {
                items,
                last_evaluated_key,
            })
        })
        .map_err(storage::Error::new)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::storage::Backend;

    fn s(text: &str) -> AttributeValue {
        AttributeValue::S(text.to_string())
    }

    fn edge(from: &str, to: &str) -> Item {
        Item::from([
            ("from".to_string(), s(from)),
            ("to".to_string(), s(to)),
            ("note".to_string(), s(&format!("{from}->{to}"))),
        ])
    }

    fn store() -> Store {
        let store = Store::new();
        store
            .create_table(
                "edges",
                KeySchema::new("from", "to"),
                [("by_to".to_string(), KeySchema::new("to", "from"))],
            )
            .unwrap();
        store
    }

    fn query(index: Option<&str>, attr: &str, value: &str, limit: i32) -> Query {
        Query {
            table: "edges".to_string(),
            index: index.map(str::to_string),
            partition_attr: attr.to_string(),
            partition_value: s(value),
            limit,
            exclusive_start_key: None,
        }
    }

    #[tokio::test]
    async fn point_operations() {
        let store = store();
        store.put_item("edges", edge("a", "b")).await.unwrap();
        let key = Item::from([("from".to_string(), s("a")), ("to".to_string(), s("b"))]);
        assert_eq!(
            Some(edge("a", "b")),
            store.get_item("edges", key.clone()).await.unwrap()
        );

        // Missing key attributes are the store's problem to reject
        assert!(store
            .put_item("edges", Item::from([("from".to_string(), s("a"))]))
            .await
            .is_err());
        assert!(store.get_item("nodes", key.clone()).await.is_err());

        store.delete_item("edges", key.clone()).await.unwrap();
        assert_eq!(None, store.get_item("edges", key.clone()).await.unwrap());
        store.delete_item("edges", key.clone()).await.unwrap();
    }

    #[tokio::test]
    async fn updates() {
        let store = store();
        let key = Item::from([("from".to_string(), s("x")), ("to".to_string(), s("y"))]);
        let attrs = Item::from([("note".to_string(), s("updated"))]);

        assert!(!store
            .update_item("edges", key.clone(), attrs.clone(), true)
            .await
            .unwrap());
        assert_eq!(None, store.get_item("edges", key.clone()).await.unwrap());

        assert!(store
            .update_item("edges", key.clone(), attrs.clone(), false)
            .await
            .unwrap());
        let mut expected = key.clone();
        expected.extend(attrs);
        assert_eq!(
            Some(expected),
            store.get_item("edges", key.clone()).await.unwrap()
        );
    }

    #[tokio::test]
    async fn paging() {
        let store = store();
        for to in ["c", "a", "e", "b", "d"] {
            store.put_item("edges", edge("x", to)).await.unwrap();
        }
        store.put_item("edges", edge("y", "a")).await.unwrap();

        let page = store.query(query(None, "from", "x", 2)).await.unwrap();
        assert_eq!(
            vec![edge("x", "a"), edge("x", "b")],
            page.items,
        );
        let lek = page.last_evaluated_key.unwrap();
        assert_eq!(Some(&s("b")), lek.get("to"));

        let mut q = query(None, "from", "x", 2);
        q.exclusive_start_key = Some(lek);
        let page = store.query(q.clone()).await.unwrap();
        assert_eq!(vec![edge("x", "c"), edge("x", "d")], page.items);

        q.exclusive_start_key = page.last_evaluated_key;
        let page = store.query(q.clone()).await.unwrap();
        assert_eq!(vec![edge("x", "e")], page.items);
        assert!(page.last_evaluated_key.is_none());

        // The index
        let page = store.query(query(Some("by_to"), "to", "a", 10)).await.unwrap();
        assert_eq!(vec![edge("x", "a"), edge("y", "a")], page.items);
        assert!(page.last_evaluated_key.is_none());

        assert!(store.query(query(Some("by_from"), "from", "x", 1)).await.is_err());
        assert!(store.query(query(None, "to", "x", 1)).await.is_err());
        assert!(store.query(query(None, "from", "x", 0)).await.is_err());
    }

    #[tokio::test]
    async fn limit_reached_exactly() {
        let store = store();
        store.put_item("edges", edge("x", "a")).await.unwrap();
        store.put_item("edges", edge("x", "b")).await.unwrap();

        let page = store.query(query(None, "from", "x", 2)).await.unwrap();
        assert_eq!(2, page.items.len());
        let mut q = query(None, "from", "x", 2);
        q.exclusive_start_key = page.last_evaluated_key;
        assert!(q.exclusive_start_key.is_some());
        let page = store.query(q).await.unwrap();
        assert!(page.items.is_empty());
        assert!(page.last_evaluated_key.is_none());
    }
}
