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

//! # follows-demo
//!
//! Exercise the follows data-access layer against scripted sample data.
//!
//! This is purely a manual smoke test: put twenty-five follows sharing a follower & twenty-five
//! sharing a followee, read one back, update its names, delete another, then fetch the first two
//! pages of followees & of followers. Results are logged as they come in. Run `follows-ddb` first
//! to create the schema, or pass `--in-memory` to run without a DynamoDB at all.

use clap::{crate_authors, crate_version, value_parser, Arg, ArgAction, ArgMatches, Command};
use follows::{
    access::{self, FollowAccess, FOLLOWEE_HANDLE, FOLLOWER_HANDLE},
    dynamodb,
    entities::Follow,
    memory::{KeySchema, Store},
    storage::Backend,
    util::{Credentials, DynamoLocation},
};
use serde::Deserialize;
use snafu::{prelude::*, IntoError};
use tracing::{info, Level};
use tracing_subscriber::{
    fmt::{self},
    layer::SubscriberExt,
    EnvFilter, Layer, Registry,
};

use std::{fmt::Display, io, path::PathBuf, str::FromStr};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        crate error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Snafu)]
pub enum Error {
    #[snafu(display("Failed to create a DynamoDB client: {source}"))]
    Client { source: dynamodb::Error },
    #[snafu(display("Unable to read configuration file {pth:?}: {source}"))]
    ConfigNotFound {
        pth: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Error parsing configuration file {pth:?}: {source}"))]
    ConfigParse {
        pth: PathBuf,
        source: toml::de::Error,
    },
    #[snafu(display("Failed to parse RUST_LOG: {source}"))]
    EnvFilter {
        source: tracing_subscriber::filter::FromEnvError,
    },
    #[snafu(display("While {step}, {source}"))]
    Follows { step: String, source: access::Error },
    #[snafu(display("Failed to create the in-memory store: {source}"))]
    Memory {
        source: follows::storage::Error,
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
//                                         configuration                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Where to find DynamoDB & how to authenticate to it
// Nb that we can only deserialize (i.e. not serialize) due to the presence of secrets in the
// struct
#[derive(Clone, Debug, Default, Deserialize)]
pub struct StorageConfig {
    /// AWS credentials: key ID & secret key. Unnecessary when talking to DynamoDB Local or an
    /// open ScyllaDB cluster over Alternator.
    credentials: Option<Credentials>,
    /// An AWS region, or one or more endpoint URLs
    #[serde(default)]
    location: DynamoLocation,
}

/// follows-demo configuration, version one
#[derive(Clone, Debug, Deserialize)]
struct ConfigV1 {
    #[serde(rename = "storage-config", default)]
    storage_config: StorageConfig,
    #[serde(default)]
    tables: access::Configuration,
    #[serde(rename = "page-size", default = "default_page_size")]
    page_size: usize,
}

fn default_page_size() -> usize {
    10
}

impl Default for ConfigV1 {
    fn default() -> Self {
        ConfigV1 {
            storage_config: StorageConfig::default(),
            tables: access::Configuration::default(),
            page_size: default_page_size(),
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "version")] // tag "internally"
enum Configuration {
    #[serde(rename = "1")]
    V1(ConfigV1),
}

/// Parse the follows-demo configuration file
///
/// If no file was named on the command line, try /etc/follows.toml, quietly falling back to
/// defaults if that's not there.
fn parse_config(cfg: &Option<PathBuf>) -> Result<ConfigV1> {
    let (pth, defaulted): (PathBuf, bool) = cfg.as_ref().map_or_else(
        || (PathBuf::from_str("/etc/follows.toml").unwrap(/* known good */), true),
        |p| (p.clone(), false),
    );
    match std::fs::read_to_string(&pth) {
        Ok(text) => match toml::from_str::<Configuration>(&text) {
            Ok(Configuration::V1(cfg)) => Ok(cfg),
            Err(err) => Err(ConfigParseSnafu { pth }.into_error(err)),
        },
        Err(err) => {
            if defaulted {
                Ok(ConfigV1::default())
            } else {
                Err(ConfigNotFoundSnafu { pth }.into_error(err))
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           the script                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

const FOLLOWER_HANDLE_BASE: &str = "@FredFlintstone";
const FOLLOWER_NAME_BASE: &str = "Fred Flintstone";
const FOLLOWEE_HANDLE_BASE: &str = "@ClintEastwood";
const FOLLOWEE_NAME_BASE: &str = "Clint Eastwood";

fn show(follows: &[Follow]) -> String {
    follows
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<String>>()
        .join("; ")
}

async fn run<B: Backend + Send + Sync>(access: &FollowAccess<B>, page_size: usize) -> Result<()> {
    info!("Putting 25 items with the same follower...");
    for i in 1..=25 {
        let follow = Follow::new(
            FOLLOWER_HANDLE_BASE,
            FOLLOWER_NAME_BASE,
            format!("{}_{}", FOLLOWEE_HANDLE_BASE, i),
            format!("{} {}", FOLLOWEE_NAME_BASE, i),
        );
        access.put_follow(&follow).await.context(FollowsSnafu {
            step: "putting a follow",
        })?;
        info!("Put item: {}", follow);
    }

    info!("Putting 25 items with the same followee...");
    for i in 1..=25 {
        let follow = Follow::new(
            format!("{}_{}", FOLLOWER_HANDLE_BASE, i),
            format!("{} {}", FOLLOWER_NAME_BASE, i),
            FOLLOWEE_HANDLE_BASE,
            FOLLOWEE_NAME_BASE,
        );
        access.put_follow(&follow).await.context(FollowsSnafu {
            step: "putting a follow",
        })?;
        info!("Put item: {}", follow);
    }

    let key_followee = format!("{}_1", FOLLOWEE_HANDLE_BASE);
    let retrieved = access
        .get_follow(FOLLOWER_HANDLE_BASE, &key_followee)
        .await
        .context(FollowsSnafu {
            step: "getting a follow",
        })?;
    info!("Retrieved item: {:?}", retrieved);

    access
        .update_follow_names(
            FOLLOWER_HANDLE_BASE,
            &key_followee,
            "Updated Fred",
            "Updated Clint",
        )
        .await
        .context(FollowsSnafu {
            step: "updating a follow",
        })?;
    let updated = access
        .get_follow(FOLLOWER_HANDLE_BASE, &key_followee)
        .await
        .context(FollowsSnafu {
            step: "getting the updated follow",
        })?;
    info!("Updated item: {:?}", updated);

    let deleted_follower = format!("{}_1", FOLLOWER_HANDLE_BASE);
    access
        .delete_follow(&deleted_follower, FOLLOWEE_HANDLE_BASE)
        .await
        .context(FollowsSnafu {
            step: "deleting a follow",
        })?;
    info!(
        "Deleted item: {}={}, {}={}",
        FOLLOWER_HANDLE, deleted_follower, FOLLOWEE_HANDLE, FOLLOWEE_HANDLE_BASE
    );

    info!("Querying paged followees for follower {}", FOLLOWER_HANDLE_BASE);
    let page = access
        .get_page_of_followees(FOLLOWER_HANDLE_BASE, page_size, None)
        .await
        .context(FollowsSnafu {
            step: "querying followees",
        })?;
    info!("First page of followees: {}", show(&page.items));
    match page.last_key {
        Some(cursor) => {
            let page = access
                .get_page_of_followees(FOLLOWER_HANDLE_BASE, page_size, Some(&cursor))
                .await
                .context(FollowsSnafu {
                    step: "querying followees",
                })?;
            info!("Second page of followees: {}", show(&page.items));
        }
        None => info!("No more pages for followees."),
    }

    info!("Querying paged followers for followee {}", FOLLOWEE_HANDLE_BASE);
    let page = access
        .get_page_of_followers(FOLLOWEE_HANDLE_BASE, page_size, None)
        .await
        .context(FollowsSnafu {
            step: "querying followers",
        })?;
    info!("First page of followers: {}", show(&page.items));
    match page.last_key {
        Some(cursor) => {
            let page = access
                .get_page_of_followers(FOLLOWEE_HANDLE_BASE, page_size, Some(&cursor))
                .await
                .context(FollowsSnafu {
                    step: "querying followers",
                })?;
            info!("Second page of followers: {}", show(&page.items));
        }
        None => info!("No more pages for followers."),
    }

    Ok(())
}

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
    let mut matches = Command::new("follows-demo")
        .version(crate_version!())
        .author(crate_authors!())
        .about("Exercise the follows data-access layer.")
        .long_about("Exercise the follows data-access layer with scripted sample data, logging the results.")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .num_args(1)
                .value_parser(value_parser!(PathBuf))
                .env("FOLLOWS_DEMO_CONFIG")
                .help("path to a configuration file (default /etc/follows.toml, if present)"),
        )
        .arg(
            Arg::new("creds")
                .short('C')
                .long("creds")
                .num_args(1)
                .env("FOLLOWS_DEMO_CREDS")
                .value_parser(value_parser!(Credentials))
                .help("AWS credentials, given as \"KEY-ID,SECRET\""),
        )
        .arg(
            Arg::new("debug")
                .short('D')
                .long("debug")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .env("FOLLOWS_DEMO_DEBUG")
                .help("produce debug output"),
        )
        .arg(
            Arg::new("in-memory")
                .short('m')
                .long("in-memory")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .env("FOLLOWS_DEMO_IN_MEMORY")
                .help("run against an in-process store rather than DynamoDB"),
        )
        .arg(
            Arg::new("page-size")
                .short('n')
                .long("page-size")
                .num_args(1)
                .value_parser(value_parser!(usize))
                .env("FOLLOWS_DEMO_PAGE_SIZE")
                .help("number of follows per page (default 10)"),
        )
        .arg(
            Arg::new("plain")
                .short('p')
                .long("plain")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .env("FOLLOWS_DEMO_PLAIN")
                .help("log in human-readable format, not JSON/structured logging"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .env("FOLLOWS_DEMO_QUIET")
                .help("produce only error output"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .env("FOLLOWS_DEMO_VERBOSE")
                .help("produce prolix output"),
        )
        .arg(
            Arg::new("location")
                .index(1)
                .value_parser(value_parser!(DynamoLocation))
                .help("Network location of the DynamoDB cluster")
                .long_help("Network location of the DynamoDB/ScyllaDB cluster; overrides the configuration file.

Specify as either an AWS region ('us-west-2', e.g.) or as an URL ('http://localhost:8000, e.g.)")
                .env("FOLLOWS_DEMO_LOCATION")
        )
        .get_matches();
    configure_logging(&matches)?;

    info!("follows-demo {}", crate_version!());

    let mut cfg = parse_config(&matches.remove_one::<PathBuf>("config"))?;
    if let Some(creds) = matches.remove_one::<Credentials>("creds") {
        cfg.storage_config.credentials = Some(creds);
    }
    if let Some(location) = matches.remove_one::<DynamoLocation>("location") {
        cfg.storage_config.location = location;
    }
    if let Some(page_size) = matches.remove_one::<usize>("page-size") {
        cfg.page_size = page_size;
    }

    if matches.get_flag("in-memory") {
        let store = Store::new();
        store
            .create_table(
                cfg.tables.table.clone(),
                KeySchema::new(FOLLOWER_HANDLE, FOLLOWEE_HANDLE),
                [(
                    cfg.tables.index.clone(),
                    KeySchema::new(FOLLOWEE_HANDLE, FOLLOWER_HANDLE),
                )],
            )
            .context(MemorySnafu)?;
        run(&FollowAccess::new(store, cfg.tables), cfg.page_size).await
    } else {
        info!("Connecting to {}", cfg.storage_config.location);
        let client = dynamodb::Client::connect(
            &cfg.storage_config.location,
            &cfg.storage_config.credentials,
        )
        .await
        .context(ClientSnafu)?;
        run(&FollowAccess::new(client, cfg.tables), cfg.page_size).await
    }
}
