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

//! # entities
//!
//! The follows data model: the [Follow] edge itself, the per-query cursors handed back to callers,
//! and the [DataPage] envelope in which paged results are returned.

use std::{fmt::Display, ops::Deref};

use serde::{Deserialize, Serialize};
use snafu::{Backtrace, Snafu};

/// DynamoDB caps sort keys at 1024 bytes; every handle is the sort key of one of our two key
/// schemas.
pub const MAX_HANDLE_LEN: usize = 1024;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{field} may not be empty"))]
    EmptyHandle {
        field: &'static str,
        backtrace: Backtrace,
    },
    #[snafu(display("{field} is {len} bytes long; handles may be at most {MAX_HANDLE_LEN}"))]
    HandleTooLong {
        field: &'static str,
        len: usize,
        backtrace: Backtrace,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Check that `text` may serve as a key attribute; `field` names the attribute for the error
/// message.
pub fn check_handle(field: &'static str, text: &str) -> Result<()> {
    if text.is_empty() {
        EmptyHandleSnafu { field }.fail()
    } else if text.len() > MAX_HANDLE_LEN {
        HandleTooLongSnafu {
            field,
            len: text.len(),
        }
        .fail()
    } else {
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Follow                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A directed edge in the social graph: `follower_handle` follows `followee_handle`
///
/// The pair (`follower_handle`, `followee_handle`) is the identity of a [Follow]; the two names
/// are denormalized onto the edge for display & may change independently of it. The field names
/// are also the DynamoDB attribute names, so a [Follow] serializes directly to an item.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Follow {
    pub follower_handle: String,
    pub follower_name: String,
    pub followee_handle: String,
    pub followee_name: String,
}

impl Follow {
    pub fn new(
        follower_handle: impl Into<String>,
        follower_name: impl Into<String>,
        followee_handle: impl Into<String>,
        followee_name: impl Into<String>,
    ) -> Follow {
        Follow {
            follower_handle: follower_handle.into(),
            follower_name: follower_name.into(),
            followee_handle: followee_handle.into(),
            followee_name: followee_name.into(),
        }
    }
    /// Validate both key attributes
    pub fn check(&self) -> Result<()> {
        check_handle("follower_handle", &self.follower_handle)?;
        check_handle("followee_handle", &self.followee_handle)
    }
}

impl Display for Follow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}) => {} ({})",
            self.follower_handle, self.follower_name, self.followee_handle, self.followee_name
        )
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            cursors                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

// Each paged query gets its own cursor type so that the compiler refuses to accept a cursor from
// one kind of query in the other. Callers should treat them as opaque: hand back exactly what was
// returned.

macro_rules! define_cursor {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub(crate) fn new(text: String) -> $name {
                $name(text)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.deref()
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_cursor!(
    FolloweeCursor,
    "Continuation token for [FollowAccess::get_page_of_followees]\n\n[FollowAccess::get_page_of_followees]: crate::access::FollowAccess::get_page_of_followees"
);
define_cursor!(
    FollowerCursor,
    "Continuation token for [FollowAccess::get_page_of_followers]\n\n[FollowAccess::get_page_of_followers]: crate::access::FollowAccess::get_page_of_followers"
);

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            DataPage                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// One page of query results, in store order, along with the cursor from which to resume
///
/// `last_key` of `None` means there are no more results.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DataPage<T, C> {
    pub items: Vec<T>,
    pub last_key: Option<C>,
}

impl<T, C> DataPage<T, C> {
    pub fn new(items: Vec<T>, last_key: Option<C>) -> DataPage<T, C> {
        DataPage { items, last_key }
    }
    pub fn has_more(&self) -> bool {
        self.last_key.is_some()
    }
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
    pub fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn handles() {
        assert!(check_handle("follower_handle", "").is_err());
        assert!(check_handle("follower_handle", &"x".repeat(MAX_HANDLE_LEN + 1)).is_err());
        assert!(check_handle("follower_handle", &"x".repeat(MAX_HANDLE_LEN)).is_ok());
        assert!(check_handle("followee_handle", "@FredFlintstone").is_ok());

        assert!(Follow::new("", "Fred", "@Barney", "Barney").check().is_err());
        assert!(Follow::new("@Fred", "Fred", "", "Barney").check().is_err());
        // Names aren't key attributes; anything goes
        assert!(Follow::new("@Fred", "", "@Barney", "").check().is_ok());
    }

    #[test]
    fn cursors_are_transparent() {
        #[derive(Deserialize, Serialize)]
        struct Saved {
            cursor: FolloweeCursor,
        }
        let saved = toml::from_str::<Saved>("cursor = \"@ClintEastwood_18\"").unwrap();
        assert_eq!("@ClintEastwood_18", saved.cursor.as_ref());
        assert_eq!(
            "cursor = \"@ClintEastwood_18\"\n",
            toml::to_string(&saved).unwrap()
        );
    }
}
