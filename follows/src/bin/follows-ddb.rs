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

//! # follows-ddb
//!
//! Create the follows DynamoDB schema: the `follows` table & its `follows_index` global secondary
//! index.
//!
//! This could have been scripted with the AWS CLI, but that would have introduced a dependency on
//! it, and the same code is handy for integration tests.

use clap::{crate_authors, crate_version, value_parser, Arg, ArgAction, ArgMatches, Command};
use follows::{
    access::Configuration,
    dynamodb::{create_client, create_follows_table, wait_for_table},
    util::{Credentials, DynamoLocation},
};
use snafu::{prelude::*, Backtrace};
use tracing::{info, Level};
use tracing_subscriber::{
    fmt::{self},
    layer::SubscriberExt,
    EnvFilter, Layer, Registry,
};

use std::{fmt::Display, io, time::Duration};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        crate error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Application error type
#[derive(Snafu)]
pub enum Error {
    #[snafu(display("Failed to create a DynamoDB client: {source}"))]
    Client {
        source: follows::dynamodb::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to parse RUST_LOG: {source}"))]
    EnvFilter {
        source: tracing_subscriber::filter::FromEnvError,
    },
    #[snafu(display("Failed to create the follows schema: {source}"))]
    Schema {
        source: follows::dynamodb::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to set the tracing subscriber: {source}"))]
    Subscriber {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self::Display::fmt(&self, f)
    }
}

type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              main                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

fn configure_logging(matches: &ArgMatches) -> Result<()> {
    let level = match (
        matches.get_flag("debug"),
        matches.get_flag("verbose"),
        matches.get_flag("quiet"),
    ) {
        (true, _, _) => Level::TRACE,
        (false, true, _) => Level::DEBUG,
        (false, false, true) => Level::ERROR,
        _ => Level::INFO,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env()
        .context(EnvFilterSnafu)?;
    let formatter: Box<dyn Layer<Registry> + Send + Sync> = if matches.get_flag("plain") {
        Box::new(fmt::Layer::default().compact().with_writer(io::stdout))
    } else {
        Box::new(fmt::Layer::default().json().with_writer(io::stdout))
    };
    tracing::subscriber::set_global_default(Registry::default().with(formatter).with(filter))
        .context(SubscriberSnafu)
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut matches = Command::new("follows-ddb")
        .version(crate_version!())
        .author(crate_authors!())
        .about("Create the follows DynamoDB schema.")
        .long_about("Create the follows table, keyed on (follower_handle, followee_handle), along with a global secondary index keyed on (followee_handle, follower_handle).")
        .arg(
            Arg::new("debug")
                .short('D')
                .long("debug")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .env("FOLLOWS_DDB_DEBUG")
                .help("produce debug output"),
        )
        .arg(
            Arg::new("plain")
                .short('p')
                .long("plain")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .env("FOLLOWS_DDB_PLAIN")
                .help("log in human-readable format, not JSON/structured logging"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .env("FOLLOWS_DDB_QUIET")
                .help("produce only error output"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .env("FOLLOWS_DDB_VERBOSE")
                .help("produce prolix output"),
        )
        .arg(
            Arg::new("creds")
                .short('c')
                .long("creds")
                .num_args(1)
                .env("FOLLOWS_DDB_CREDS")
                .value_parser(value_parser!(Credentials))
                .help("AWS credentials, given as \"KEY-ID,SECRET\""),
        )
        .arg(
            Arg::new("table")
                .short('t')
                .long("table")
                .num_args(1)
                .env("FOLLOWS_DDB_TABLE")
                .help("name of the follows table (default \"follows\")"),
        )
        .arg(
            Arg::new("index")
                .short('i')
                .long("index")
                .num_args(1)
                .env("FOLLOWS_DDB_INDEX")
                .help("name of the secondary index (default \"follows_index\")"),
        )
        .arg(
            Arg::new("wait")
                .short('w')
                .long("wait")
                .num_args(1)
                .value_parser(value_parser!(usize))
                .default_value("30")
                .env("FOLLOWS_DDB_WAIT")
                .help("check this many times, a second apart, for the new table to become active"),
        )
        .arg(
            Arg::new("location")
                .index(1)
                .value_parser(value_parser!(DynamoLocation))
                .required(true)
                .help("Network location of the DynamoDB cluster")
                .long_help("Network location of the DynamoDB/ScyllaDB cluster.

Specify as either an AWS region ('us-west-2', e.g.) or as an URL ('http://localhost:8000, e.g.)")
                .env("FOLLOWS_DDB_LOCATION")
        )
        .get_matches();
    configure_logging(&matches)?;

    info!("follows-ddb {}", crate_version!());

    let creds = matches.remove_one::<Credentials>("creds");
    let location = matches.remove_one::<DynamoLocation>("location").unwrap(/* required */);
    let defaults = Configuration::default();
    let cfg = Configuration {
        table: matches
            .remove_one::<String>("table")
            .unwrap_or(defaults.table),
        index: matches
            .remove_one::<String>("index")
            .unwrap_or(defaults.index),
    };
    let attempts = matches.remove_one::<usize>("wait").unwrap(/* defaulted */);

    let client = create_client(&location, &creds).await.context(ClientSnafu)?;
    create_follows_table(&client, &cfg)
        .await
        .context(SchemaSnafu)?;
    info!("Created table {} with index {}.", cfg.table, cfg.index);
    wait_for_table(&client, &cfg.table, attempts, Duration::from_secs(1))
        .await
        .context(SchemaSnafu)
}
