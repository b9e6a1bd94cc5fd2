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

//! # follows
//!
//! A thin data-access layer over a DynamoDB table of "follow" relationships: directed edges in a
//! social graph, each recording that one handle follows another.
//!
//! The interesting type is [FollowAccess], which exposes put, get, update, delete & paged queries
//! in both directions (who does X follow; who follows X). It is parameterized on a storage
//! [Backend]: [dynamodb::Client] talks to DynamoDB (or ScyllaDB over Alternator), while
//! [memory::Store] keeps everything in-process.
//!
//! [FollowAccess]: access::FollowAccess
//! [Backend]: storage::Backend
pub mod access;
pub mod dynamodb;
pub mod entities;
pub mod memory;
pub mod storage;
pub mod util;
