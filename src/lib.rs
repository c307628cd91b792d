// Copyright (C) 2026 Marquee Developers <devs@marquee.example>
//
// This file is part of marquee.
//
// marquee is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// marquee is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with marquee.  If not,
// see <http://www.gnu.org/licenses/>.

//! # marquee
//!
//! A movie-catalog web service: user registration & JWT login, a movie/genre/person/crew
//! catalog, per-user reviews with denormalized rating statistics on each movie, a TTL'd
//! response cache in front of the movie list/detail reads, and fire-and-forget welcome
//! mail dispatched off the login hot path.
//!
//! The two invariants the rest of the code is organized around:
//!
//! 1. A movie's `average_rating`/`total_review_count` always equal the mean & count of its
//!    current review set; review mutations recompute them inside the same storage
//!    transaction (see [storage] & [memory]).
//!
//! 2. The response cache never serves a movie payload that predates a movie *or review*
//!    write to that movie (see [cache] & the invalidation calls in [catalog] and
//!    [reviews]).

pub mod assets;
pub mod authn;
pub mod background_tasks;
pub mod cache;
pub mod catalog;
pub mod entities;
pub mod http;
pub mod marquee;
pub mod memory;
pub mod metrics;
pub mod notify;
pub mod ratelimit;
pub mod ratings;
pub mod reviews;
pub mod storage;
pub mod token;
pub mod users;
