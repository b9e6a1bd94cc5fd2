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

//! # dynamodb
//!
//! [Backend] implementation for DynamoDB (and ScyllaDB over the Alternator interface), along with
//! the code to create the follows schema.
//!
//! [Backend]: crate::storage::Backend

use std::time::Duration;

use async_trait::async_trait;
use aws_config::{meta::region::RegionProviderChain, BehaviorVersion, Region};
use aws_sdk_dynamodb::{
    config::{http::HttpResponse, Credentials as AwsCredentials},
    error::SdkError,
    operation::{create_table::CreateTableError, describe_table::DescribeTableError},
    types::{
        AttributeDefinition, BillingMode, GlobalSecondaryIndex, KeySchemaElement, KeyType,
        Projection, ProjectionType, ScalarAttributeType, TableStatus,
    },
};
use either::Either;
use itertools::Itertools;
use snafu::{Backtrace, OptionExt, ResultExt, Snafu};
use tracing::{debug, info};

use crate::{
    access::{Configuration, FOLLOWEE_HANDLE, FOLLOWER_HANDLE},
    storage::{self, Item, Query, QueryPage},
    util::{Credentials, DynamoLocation},
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to create table {table}: {source}"))]
    CreateTable {
        table: String,
        #[snafu(source(from(SdkError<CreateTableError, HttpResponse>, Box::new)))]
        source: Box<SdkError<CreateTableError, HttpResponse>>,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to describe table {table}: {source}"))]
    DescribeTable {
        table: String,
        #[snafu(source(from(SdkError<DescribeTableError, HttpResponse>, Box::new)))]
        source: Box<SdkError<DescribeTableError, HttpResponse>>,
        backtrace: Backtrace,
    },
    #[snafu(display("An update needs a key"))]
    EmptyKey { backtrace: Backtrace },
    #[snafu(display("Failed to build {name}: {source}"))]
    GenericBuildFailure {
        name: String,
        source: aws_sdk_dynamodb::error::BuildError,
        backtrace: Backtrace,
    },
    #[snafu(display("No attributes given to update"))]
    NoAttributes { backtrace: Backtrace },
    #[snafu(display("No endpoint URLs specified"))]
    NoEndpoints { backtrace: Backtrace },
    #[snafu(display("Table {table} still wasn't active after {attempts} checks"))]
    TableNotActive {
        table: String,
        attempts: usize,
        backtrace: Backtrace,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         the connection                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Build a DynamoDB client
///
/// `location` may name an AWS region, or give one or more endpoint URLs. In the latter case, only
/// the first is used; the region is then taken from the environment (falling back to us-west-2)
/// purely for request signing.
pub async fn create_client(
    location: &DynamoLocation,
    credentials: &Option<Credentials>,
) -> Result<::aws_sdk_dynamodb::Client> {
    use secrecy::ExposeSecret;
    let creds = credentials.as_ref().map(|Credentials((id, secret))| {
        AwsCredentials::new(
            id.expose_secret(),
            secret.expose_secret(),
            None,
            None,
            "follows",
        )
    });

    let mut loader = match &location.0 {
        Either::Left(region) => aws_config::defaults(BehaviorVersion::latest()).region(
            RegionProviderChain::first_try(Some(Region::new(region.clone())))
                .or_default_provider()
                .or_else(Region::new("us-west-2")),
        ),
        Either::Right(endpoints) => {
            let ep_url = endpoints.first().context(NoEndpointsSnafu)?;
            debug!("Using endpoint {} (of {})", ep_url, endpoints.len());
            aws_config::defaults(BehaviorVersion::latest())
                .endpoint_url(ep_url.as_str())
                .region(RegionProviderChain::default_provider().or_else(Region::new("us-west-2")))
        }
    };
    if let Some(creds) = creds {
        loader = loader.credentials_provider(creds);
    }
    Ok(::aws_sdk_dynamodb::Client::new(&loader.load().await))
}

/// A [Backend] that talks to DynamoDB
///
/// [Backend]: crate::storage::Backend
#[derive(Clone, Debug)]
pub struct Client {
    client: ::aws_sdk_dynamodb::Client,
}

impl Client {
    /// Wrap an existing SDK client; the caller owns its configuration & lifetime
    pub fn new(client: ::aws_sdk_dynamodb::Client) -> Client {
        Client { client }
    }
    pub async fn connect(
        location: &DynamoLocation,
        credentials: &Option<Credentials>,
    ) -> Result<Client> {
        Ok(Client::new(create_client(location, credentials).await?))
    }
    pub fn inner(&self) -> &::aws_sdk_dynamodb::Client {
        &self.client
    }
}

#[async_trait]
impl storage::Backend for Client {
    async fn put_item(&self, table: &str, item: Item) -> std::result::Result<(), storage::Error> {
        self.client
            .put_item()
            .table_name(table)
            .set_item(Some(item))
            .send()
            .await
            .map_err(storage::Error::new)?;
        Ok(())
    }

    async fn get_item(
        &self,
        table: &str,
        key: Item,
    ) -> std::result::Result<Option<Item>, storage::Error> {
        Ok(self
            .client
            .get_item()
            .table_name(table)
            .set_key(Some(key))
            .consistent_read(true)
            .send()
            .await
            .map_err(storage::Error::new)?
            .item)
    }

    async fn update_item(
        &self,
        table: &str,
        key: Item,
        attributes: Item,
        must_exist: bool,
    ) -> std::result::Result<bool, storage::Error> {
        if attributes.is_empty() {
            return Err(storage::Error::new(NoAttributesSnafu.build()));
        }
        // Attribute names go through placeholders so we needn't worry about reserved words
        let key_attr = key
            .keys()
            .min()
            .cloned()
            .context(EmptyKeySnafu)
            .map_err(storage::Error::new)?;
        let mut builder = self
            .client
            .update_item()
            .table_name(table)
            .set_key(Some(key));
        let mut clauses = Vec::with_capacity(attributes.len());
        for (i, (name, value)) in attributes
            .into_iter()
            .sorted_by(|lhs, rhs| lhs.0.cmp(&rhs.0))
            .enumerate()
        {
            builder = builder
                .expression_attribute_names(format!("#a{}", i), name)
                .expression_attribute_values(format!(":v{}", i), value);
            clauses.push(format!("#a{} = :v{}", i, i));
        }
        builder = builder.update_expression(format!("SET {}", clauses.join(", ")));
        if must_exist {
            builder = builder
                .condition_expression("attribute_exists(#k)")
                .expression_attribute_names("#k", key_attr);
        }

        use aws_sdk_dynamodb::operation::update_item::UpdateItemError::ConditionalCheckFailedException;
        match builder.send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                // If `must_exist` was set & the item wasn't there, the SDK expresses that as a
                // `ServiceError` wrapping a `ConditionalCheckFailedException`:
                if must_exist
                    && matches!(err, SdkError::ServiceError(ref inner) if matches!(inner.err(), ConditionalCheckFailedException(_)))
                {
                    debug!("update_item: conditional check failed");
                    Ok(false)
                } else {
                    Err(storage::Error::new(err))
                }
            }
        }
    }

    async fn delete_item(&self, table: &str, key: Item) -> std::result::Result<(), storage::Error> {
        self.client
            .delete_item()
            .table_name(table)
            .set_key(Some(key))
            .send()
            .await
            .map_err(storage::Error::new)?;
        Ok(())
    }

    async fn query(&self, query: Query) -> std::result::Result<QueryPage, storage::Error> {
        let out = self
            .client
            .query()
            .consistent_read(query.consistent_read())
            .table_name(query.table)
            .set_index_name(query.index)
            .key_condition_expression("#pk = :pk")
            .expression_attribute_names("#pk", query.partition_attr)
            .expression_attribute_values(":pk", query.partition_value)
            .limit(query.limit)
            .set_exclusive_start_key(query.exclusive_start_key)
            .send()
            .await
            .map_err(storage::Error::new)?;
        debug!(
            "query: {} items, last evaluated key {:?}",
            out.count, out.last_evaluated_key
        );
        Ok(QueryPage {
            items: out.items.unwrap_or_default(),
            last_evaluated_key: out.last_evaluated_key.filter(|key| !key.is_empty()),
        })
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             schema                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

macro_rules! table_attr {
    ($col_name:expr, $ty:ident) => {
        AttributeDefinition::builder()
            .attribute_name($col_name)
            .attribute_type(ScalarAttributeType::$ty)
            .build()
            .context(GenericBuildFailureSnafu {
                name: $col_name.to_string(),
            })?
    };
}

macro_rules! key_elem {
    ($col_name:expr, $ty:ident) => {
        KeySchemaElement::builder()
            .attribute_name($col_name)
            .key_type(KeyType::$ty)
            .build()
            .context(GenericBuildFailureSnafu {
                name: $col_name.to_string(),
            })?
    };
}

/// Create the follows table & its secondary index
///
/// The table is keyed on (`follower_handle`, `followee_handle`); the index reverses that. The
/// index projects all attributes so that a page of followers carries full [Follow]s.
///
/// [Follow]: crate::entities::Follow
pub async fn create_follows_table(
    client: &::aws_sdk_dynamodb::Client,
    cfg: &Configuration,
) -> Result<()> {
    let out = client
        .create_table()
        .table_name(&cfg.table)
        .billing_mode(BillingMode::PayPerRequest)
        .set_attribute_definitions(Some(vec![
            table_attr!(FOLLOWER_HANDLE, S),
            table_attr!(FOLLOWEE_HANDLE, S),
        ]))
        .set_key_schema(Some(vec![
            key_elem!(FOLLOWER_HANDLE, Hash),  // partition key
            key_elem!(FOLLOWEE_HANDLE, Range), // sort key
        ]))
        .global_secondary_indexes(
            GlobalSecondaryIndex::builder()
                .index_name(&cfg.index)
                .set_key_schema(Some(vec![
                    key_elem!(FOLLOWEE_HANDLE, Hash),
                    key_elem!(FOLLOWER_HANDLE, Range),
                ]))
                .projection(
                    Projection::builder()
                        .projection_type(ProjectionType::All)
                        .build(),
                )
                .build()
                .context(GenericBuildFailureSnafu {
                    name: cfg.index.clone(),
                })?,
        )
        .send()
        .await
        .context(CreateTableSnafu {
            table: cfg.table.clone(),
        })?;
    debug!("create {}: {:#?}", cfg.table, out);
    Ok(())
}

/// Poll until `table` reports itself ACTIVE, checking at most `attempts` times
///
/// DynamoDB creates tables asynchronously; ScyllaDB & DynamoDB Local generally report ACTIVE
/// immediately.
pub async fn wait_for_table(
    client: &::aws_sdk_dynamodb::Client,
    table: &str,
    attempts: usize,
    interval: Duration,
) -> Result<()> {
    for attempt in 0..attempts {
        let out = client
            .describe_table()
            .table_name(table)
            .send()
            .await
            .context(DescribeTableSnafu { table })?;
        let status = out.table().and_then(|t| t.table_status());
        if status == Some(&TableStatus::Active) {
            info!("Table {} is active.", table);
            return Ok(());
        }
        debug!("Table {} is {:?} (check {})", table, status, attempt);
        tokio::time::sleep(interval).await;
    }
    TableNotActiveSnafu { table, attempts }.fail()
}
