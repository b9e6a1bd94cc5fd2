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

//! # The follows Integration Test Framework
//!
//! Configuration shared by every test program, along with the registry of contract tests. Each
//! program in `tests` supplies its own fixture (i.e. its own [Backend]) & runs everything
//! registered here against it.
//!
//! [Backend]: follows::storage::Backend

use follows::{
    access,
    util::{Credentials, DynamoLocation},
};
use follows_test::{
    delete_idempotence, index_mirroring, overwrite, pagination_completeness,
    rejects_malformed_requests, round_trip, scripted_scenario, update_existing_refuses,
    update_isolation, Access,
};

use libtest_mimic::Failed;
use serde::Deserialize;
use snafu::{prelude::*, IntoError};
use tap::Pipe;
use tracing::Level;

use std::{env, fs, future::Future, pin::Pin};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to parse {pth}: {source}"))]
    De {
        pth: String,
        source: toml::de::Error,
    },
    #[snafu(display("Failed to read FOLLOWS_TEST_CONFIG: {source}"))]
    Env { source: std::env::VarError },
    #[snafu(display("Failed to read {pth}: {source}"))]
    Read { pth: String, source: std::io::Error },
}

type Result<T> = std::result::Result<T, Error>;

/// Where to find a DynamoDB-compatible store for the tests that need one
#[derive(Clone, Debug, Deserialize)]
pub struct DynamoConfig {
    pub location: DynamoLocation,
    pub credentials: Option<Credentials>,
}

/// Common follows test configuration
#[derive(Clone, Debug, Deserialize)]
pub struct Configuration {
    /// Skip creating the follows table (i.e. assume it's already there)
    #[serde(rename = "no-setup", default)]
    pub no_setup: bool,
    #[serde(default)]
    pub logging: bool,
    #[serde(deserialize_with = "de_level::deserialize", default = "default_level")]
    pub log_level: Level,
    /// Tests requiring a live store are ignored when this is absent
    pub dynamo: Option<DynamoConfig>,
    #[serde(default)]
    pub tables: access::Configuration,
}

fn default_level() -> Level {
    Level::INFO
}

mod de_level {
    use std::str::FromStr;

    use serde::{Deserialize, Deserializer};
    use tracing::Level;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Level::from_str(&s).map_err(|_| {
            serde::de::Error::custom(format!("{} cannot be interepreted as a log level", s))
        })
    }
}

impl Configuration {
    /// Obtain a [Configuration]
    ///
    /// Check the `FOLLOWS_TEST_CONFIG` environment variable; if defined, attempt to parse a
    /// [Configuration] from the file named therein; else return a default instance.
    pub fn new() -> Result<Configuration> {
        match env::var("FOLLOWS_TEST_CONFIG") {
            Ok(f) => fs::read_to_string(&f)
                .context(ReadSnafu { pth: f.clone() })?
                .pipe(|s| toml::from_str::<Configuration>(&s))
                .context(DeSnafu { pth: f.clone() }),
            Err(env::VarError::NotPresent) => Ok(Configuration::default()),
            Err(err) => Err(EnvSnafu.into_error(err)),
        }
    }
}

impl Default for Configuration {
    /// Default configuration
    ///
    /// When invoked with a bare `cargo test` (i.e. without `FOLLOWS_TEST_CONFIG` set), this is the
    /// configuration that will be used, so be sure the tests will pass with it.
    fn default() -> Self {
        Configuration {
            no_setup: false,
            logging: false,
            log_level: Level::INFO,
            dynamo: None,
            tables: access::Configuration::default(),
        }
    }
}

pub type TestFuture = Pin<Box<dyn Future<Output = std::result::Result<(), Failed>> + Send>>;

pub struct FollowsTest {
    pub name: &'static str,
    pub test_fn: fn(Access) -> TestFuture,
}

inventory::collect!(FollowsTest);

inventory::submit!(FollowsTest {
    name: "000round_trip",
    test_fn: |access| Box::pin(round_trip(access)),
});

inventory::submit!(FollowsTest {
    name: "010overwrite",
    test_fn: |access| Box::pin(overwrite(access)),
});

inventory::submit!(FollowsTest {
    name: "020update_isolation",
    test_fn: |access| Box::pin(update_isolation(access)),
});

inventory::submit!(FollowsTest {
    name: "021update_existing_refuses",
    test_fn: |access| Box::pin(update_existing_refuses(access)),
});

inventory::submit!(FollowsTest {
    name: "030delete_idempotence",
    test_fn: |access| Box::pin(delete_idempotence(access)),
});

inventory::submit!(FollowsTest {
    name: "040pagination_completeness",
    test_fn: |access| Box::pin(pagination_completeness(access)),
});

inventory::submit!(FollowsTest {
    name: "041index_mirroring",
    test_fn: |access| Box::pin(index_mirroring(access)),
});

inventory::submit!(FollowsTest {
    name: "050scripted_scenario",
    test_fn: |access| Box::pin(scripted_scenario(access)),
});

inventory::submit!(FollowsTest {
    name: "060rejects_malformed_requests",
    test_fn: |access| Box::pin(rejects_malformed_requests(access)),
});
