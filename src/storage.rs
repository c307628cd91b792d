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

//! # storage
//!
//! Abstractions for the marquee storage layer. Application code writes to [Backend]; the
//! concrete implementation is chosen at startup ([crate::memory] being the one shipped today).
//!
//! Two contracts worth calling out, both load-bearing for the catalog's consistency:
//!
//! - The review mutations (`add_review`, `update_review`, `delete_review`) recompute & persist
//!   the movie's derived `average_rating`/`total_review_count` *within the same transaction* as
//!   the mutation itself, and hand the fresh aggregates back as [MovieStats]. Either both commit
//!   or neither does.
//!
//! - Uniqueness of (movie, user) among reviews and of (movie, person, role) among crew credits
//!   is enforced *here*, under whatever locking the backend uses. Handler-level pre-checks are a
//!   courtesy; this is the authority of record, so two concurrent duplicate requests can't both
//!   land.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use snafu::{Backtrace, Snafu};

use crate::entities::{
    Genre, GenreId, GenreName, Movie, MovieCrew, MovieId, Person, PersonId, Rating, Review,
    ReviewId, Role, User, UserEmail, UserId,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("A user with e-mail address {email} already exists"))]
    EmailClaimed { email: UserEmail },
    #[snafu(display("The genre {name} already exists"))]
    DuplicateGenre { name: GenreName },
    #[snafu(display("{person} is already credited as {role} on {movie}"))]
    DuplicateCrew {
        movie: MovieId,
        person: PersonId,
        role: Role,
    },
    #[snafu(display("You have already reviewed this movie."))]
    DuplicateReview { movie: MovieId, user: UserId },
    #[snafu(display("No genre with id {id}"))]
    NoSuchGenre { id: GenreId },
    #[snafu(display("No movie with id {id}"))]
    NoSuchMovie { id: MovieId },
    #[snafu(display("No person with id {id}"))]
    NoSuchPerson { id: PersonId },
    #[snafu(display("No review with id {id}"))]
    NoSuchReview { id: ReviewId },
    // Infrastructure failure in the backing store; surfaces as a 5xx
    #[snafu(display("Storage backend failure: {source}"))]
    Backend {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
        backtrace: Backtrace,
    },
}

impl Error {
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error::Backend {
            source: Box::new(err),
            backtrace: Backtrace::capture(),
        }
    }
    /// Is this a conflict with existing data (as opposed to a validation or infrastructure
    /// failure)? Conflicts surface as 400s with an explanatory message.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::EmailClaimed { .. }
                | Error::DuplicateGenre { .. }
                | Error::DuplicateCrew { .. }
                | Error::DuplicateReview { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// The fresh aggregates for one movie, as recomputed by a review mutation
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MovieStats {
    pub movie: MovieId,
    pub average_rating: f64,
    pub total_review_count: u64,
}

/// Sort keys accepted by `get_movies`
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OrderKey {
    AverageRating,
    ReleaseDate,
    TotalReviewCount,
}

/// An ordering directive: a key plus direction ("-average_rating" style on the wire)
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Ordering {
    pub key: OrderKey,
    pub descending: bool,
}

/// Filter/search/order parameters for the movie list
///
/// An instance with nothing set (`is_empty()`) denotes the canonical unfiltered listing, which
/// is the only listing eligible for caching.
#[derive(Clone, Debug, Default)]
pub struct MovieQuery {
    pub genre: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub search: Option<String>,
    pub ordering: Option<Ordering>,
}

impl MovieQuery {
    pub fn is_empty(&self) -> bool {
        self.genre.is_none()
            && self.release_date.is_none()
            && self.search.is_none()
            && self.ordering.is_none()
    }
}

#[async_trait]
pub trait Backend {
    // users
    /// Add a user; fails with [Error::EmailClaimed] if the e-mail address is taken.
    async fn add_user(&self, user: &User) -> Result<()>;
    /// Retrieve a [User] by e-mail address. None means no user by that address.
    async fn user_for_email(&self, email: &UserEmail) -> Result<Option<User>>;
    async fn user_by_id(&self, id: &UserId) -> Result<Option<User>>;

    // genres
    /// Add a genre; fails with [Error::DuplicateGenre] if the name is taken.
    async fn add_genre(&self, genre: &Genre) -> Result<()>;
    /// All genres, sorted by name.
    async fn get_genres(&self) -> Result<Vec<Genre>>;
    async fn genre_by_id(&self, id: &GenreId) -> Result<Option<Genre>>;

    // persons
    async fn add_person(&self, person: &Person) -> Result<()>;
    /// All persons sorted by name, optionally restricted to those whose name contains `search`
    /// (case-insensitive).
    async fn get_persons(&self, search: Option<&str>) -> Result<Vec<Person>>;
    async fn person_by_id(&self, id: &PersonId) -> Result<Option<Person>>;

    // movies
    /// Add a movie. The caller is expected to have validated the genre set (non-empty, all
    /// known); this method re-checks membership & fails with [Error::NoSuchGenre] on a miss.
    async fn add_movie(&self, movie: &Movie) -> Result<()>;
    async fn movie_by_id(&self, id: &MovieId) -> Result<Option<Movie>>;
    /// Movies matching `query`; default order is release date, newest first.
    async fn get_movies(&self, query: &MovieQuery) -> Result<Vec<Movie>>;
    /// Replace a movie's authored fields. The derived aggregate fields on `movie` are ignored;
    /// whatever the review set implies is preserved.
    #[allow(clippy::too_many_arguments)]
    async fn update_movie(
        &self,
        id: &MovieId,
        title: String,
        description: String,
        release_date: NaiveDate,
        poster: Option<String>,
        video_file: Option<String>,
        genres: HashSet<GenreId>,
    ) -> Result<Movie>;
    /// Delete a movie and, transitively, its reviews & crew credits.
    async fn delete_movie(&self, id: &MovieId) -> Result<()>;

    // crew
    /// Add a crew credit; fails with [Error::DuplicateCrew] if the (movie, person, role) triple
    /// is already present.
    async fn add_crew(&self, crew: &MovieCrew) -> Result<()>;
    async fn crew_for_movie(&self, id: &MovieId) -> Result<Vec<MovieCrew>>;

    // reviews
    /// Add a review & recompute the movie's aggregates, atomically. Fails with
    /// [Error::DuplicateReview] if this user has already reviewed this movie.
    async fn add_review(&self, review: &Review) -> Result<MovieStats>;
    /// Re-rate an existing review & recompute the movie's aggregates, atomically.
    async fn update_review(
        &self,
        id: &ReviewId,
        rating: Rating,
        comment: Option<String>,
    ) -> Result<MovieStats>;
    /// Delete a review & recompute the movie's aggregates, atomically.
    async fn delete_review(&self, id: &ReviewId) -> Result<MovieStats>;
    async fn review_by_id(&self, id: &ReviewId) -> Result<Option<Review>>;
    /// A movie's reviews, newest first.
    async fn reviews_for_movie(&self, id: &MovieId) -> Result<Vec<Review>>;
}
