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

//! # util
//!
//! Odds & ends shared by the library & the binaries, mostly concerned with telling the program
//! where its DynamoDB lives & how to authenticate to it.

use std::{fmt::Display, str::FromStr};

use either::Either;
use itertools::Itertools;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use tap::Pipe;
use url::Url;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          exactly_two                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug)]
pub struct ExactlyTwoError<T: std::iter::Iterator> {
    #[allow(clippy::type_complexity)]
    cause: Option<Either<T::Item, (T::Item, T::Item, T::Item)>>,
}

impl<T: std::iter::Iterator> Display for ExactlyTwoError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            Some(Either::Left(_one)) => write!(f, "ExactlyTwoError: One element"),
            Some(Either::Right(_three)) => write!(f, "ExactlyTwoError: Three or more elements"),
            None => write!(f, "ExactlyTwoError: no elements"),
        }
    }
}

/// Like [Itertools::exactly_one], but for pairs
pub fn exactly_two<T>(mut iter: T) -> std::result::Result<(T::Item, T::Item), ExactlyTwoError<T>>
where
    T: std::iter::Iterator,
{
    match iter.next() {
        Some(first) => match iter.next() {
            Some(second) => match iter.next() {
                Some(third) => Err(ExactlyTwoError {
                    cause: Some(Either::Right((first, second, third))),
                }),
                None => Ok((first, second)),
            },
            None => Err(ExactlyTwoError {
                cause: Some(Either::Left(first)),
            }),
        },
        None => Err(ExactlyTwoError { cause: None }),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          Credentials                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// AWS credentials: access key ID & secret access key
///
/// On the command line, give them as "ID,SECRET"; in a configuration file, as a two-element
/// array.
#[derive(Clone, Debug, Deserialize)]
pub struct Credentials(pub (SecretString, SecretString));

impl clap::builder::ValueParserFactory for Credentials {
    type Parser = CredentialsParser;

    fn value_parser() -> Self::Parser {
        CredentialsParser
    }
}

#[derive(Clone, Debug)]
pub struct CredentialsParser;

impl clap::builder::TypedValueParser for CredentialsParser {
    type Value = Credentials;

    fn parse_ref(
        &self,
        _cmd: &clap::Command,
        _arg: Option<&clap::Arg>,
        value: &std::ffi::OsStr,
    ) -> std::result::Result<Self::Value, clap::Error> {
        use clap::error::ErrorKind;
        value
            .to_str()
            .ok_or(clap::Error::new(ErrorKind::InvalidValue))?
            .split(',')
            .pipe(exactly_two)
            .map_err(|_| clap::Error::new(ErrorKind::WrongNumberOfValues))?
            .pipe(|p| (p.0.into(), p.1.into()))
            .pipe(Credentials)
            .pipe(Ok)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                finding DynamoDB on the network                                 //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug)]
pub struct BadLocation {
    text: String,
    source: url::ParseError,
}

impl Display for BadLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} is not a region or list of URLs: {}", self.text, self.source)
    }
}

impl std::error::Error for BadLocation {}

/// The network location of a DynamoDB (or ScyllaDB/Alternator) instance
///
/// This can be given as either an AWS region, or as a list of endpoint URLs. A single string that
/// parses as an URL is taken to be an endpoint; a single string that doesn't is taken to be a
/// region. A comma-separated list must consist entirely of URLs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DynamoLocation(pub Either<String, Vec<Url>>);

impl Default for DynamoLocation {
    /// DynamoDB Local's default endpoint
    fn default() -> Self {
        DynamoLocation(Either::Right(vec![
            Url::parse("http://localhost:8000").unwrap(/* known good */),
        ]))
    }
}

impl Display for DynamoLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Either::Left(region) => write!(f, "{}", region),
            Either::Right(urls) => write!(f, "{}", urls.iter().join(",")),
        }
    }
}

impl FromStr for DynamoLocation {
    type Err = BadLocation;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let vals = s.split(',').map(str::trim).collect::<Vec<&str>>();
        match vals.iter().exactly_one() {
            Ok(s) => Ok(DynamoLocation(match Url::parse(s) {
                Ok(url) => Either::Right(vec![url]),
                Err(_) => Either::Left(s.to_string()),
            })),
            Err(_) => {
                let urls: Vec<Url> = vals
                    .into_iter()
                    .map(Url::parse)
                    .collect::<std::result::Result<Vec<Url>, _>>()
                    .map_err(|source| BadLocation {
                        text: s.to_string(),
                        source,
                    })?;
                Ok(DynamoLocation(Either::Right(urls)))
            }
        }
    }
}

// In a configuration file, accept either a single string (parsed as above) or an array of URLs
impl<'de> Deserialize<'de> for DynamoLocation {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            One(String),
            Many(Vec<Url>),
        }
        match Repr::deserialize(deserializer)? {
            Repr::One(s) => s.parse::<DynamoLocation>().map_err(serde::de::Error::custom),
            Repr::Many(urls) => Ok(DynamoLocation(Either::Right(urls))),
        }
    }
}

impl clap::builder::ValueParserFactory for DynamoLocation {
    type Parser = DynamoLocationParser;

    fn value_parser() -> Self::Parser {
        DynamoLocationParser
    }
}

#[derive(Clone, Debug)]
pub struct DynamoLocationParser;

impl clap::builder::TypedValueParser for DynamoLocationParser {
    type Value = DynamoLocation;

    fn parse_ref(
        &self,
        _cmd: &clap::Command,
        _arg: Option<&clap::Arg>,
        value: &std::ffi::OsStr,
    ) -> std::result::Result<Self::Value, clap::Error> {
        use clap::error::ErrorKind;
        value
            .to_str()
            .ok_or(clap::Error::new(ErrorKind::InvalidValue))?
            .parse::<DynamoLocation>()
            .map_err(|_| clap::Error::new(ErrorKind::InvalidValue))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pairs() {
        assert!(exactly_two(Vec::<u8>::new().into_iter()).is_err());
        assert!(exactly_two(vec![1].into_iter()).is_err());
        assert_eq!((1, 2), exactly_two(vec![1, 2].into_iter()).unwrap());
        assert!(exactly_two(vec![1, 2, 3].into_iter()).is_err());
    }

    #[test]
    fn locations() {
        assert_eq!(
            DynamoLocation(Either::Left("us-west-2".to_string())),
            "us-west-2".parse::<DynamoLocation>().unwrap()
        );
        assert_eq!(
            DynamoLocation(Either::Right(vec![
                Url::parse("http://localhost:8000").unwrap()
            ])),
            "http://localhost:8000".parse::<DynamoLocation>().unwrap()
        );
        assert_eq!(
            DynamoLocation(Either::Right(vec![
                Url::parse("http://10.0.0.1:8000").unwrap(),
                Url::parse("http://10.0.0.2:8000").unwrap(),
            ])),
            "http://10.0.0.1:8000, http://10.0.0.2:8000"
                .parse::<DynamoLocation>()
                .unwrap()
        );
        assert!("us-west-2,us-east-1".parse::<DynamoLocation>().is_err());
    }

    #[test]
    fn url_lists() {
        let location = "http://a.example:8000,http://b.example:8000,http://c.example:8000"
            .parse::<DynamoLocation>()
            .unwrap();
        assert_eq!(
            vec!["a.example", "b.example", "c.example"],
            location
                .0
                .right()
                .unwrap()
                .iter()
                .map(|url| url.host_str().unwrap().to_string())
                .collect::<Vec<String>>()
        );
        assert!("http://a.example:8000,".parse::<DynamoLocation>().is_err());

        #[derive(Deserialize)]
        struct Cfg {
            location: DynamoLocation,
        }
        let cfg = toml::from_str::<Cfg>(
            r#"location = ["http://10.0.0.1:8000", "http://10.0.0.2:8000"]"#,
        )
        .unwrap();
        assert!(matches!(cfg.location.0, Either::Right(ref urls) if urls.len() == 2));
        let cfg = toml::from_str::<Cfg>(r#"location = "eu-west-1""#).unwrap();
        assert_eq!(DynamoLocation(Either::Left("eu-west-1".to_string())), cfg.location);
    }
}
