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

//! # in-memory storage backend
//!
//! The [storage::Backend](crate::storage::Backend) implementation shipped with marquee. All
//! tables live behind one `tokio::sync::RwLock`; every mutating operation runs entirely under
//! the write guard, which *is* the transaction boundary: a review insert and the recomputation
//! of its movie's aggregates commit together or not at all, and concurrent duplicate reviews
//! serialize on the guard so the uniqueness check can't race.
//!
//! Validation is performed up front, before any table is touched, so a failed operation leaves
//! the tables untouched (the rollback story is "we never started").

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;

use crate::{
    entities::{
        CrewId, Genre, GenreId, Movie, MovieCrew, MovieId, Person, PersonId, Rating, Review,
        ReviewId, User, UserEmail, UserId,
    },
    ratings,
    storage::{self, Backend, MovieQuery, MovieStats, OrderKey},
};

type Result<T> = std::result::Result<T, storage::Error>;

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, User>,
    users_by_email: HashMap<UserEmail, UserId>,
    genres: HashMap<GenreId, Genre>,
    persons: HashMap<PersonId, Person>,
    movies: HashMap<MovieId, Movie>,
    crew: HashMap<CrewId, MovieCrew>,
    reviews: HashMap<ReviewId, Review>,
}

impl Tables {
    /// Recompute & persist one movie's derived aggregate fields from its current review set.
    /// Must be called with the triggering review mutation already applied, under the same write
    /// guard.
    fn recompute_stats(&mut self, movie_id: &MovieId) -> Result<MovieStats> {
        let (average_rating, total_review_count) = ratings::aggregate(
            self.reviews
                .values()
                .filter(|review| review.movie == *movie_id)
                .map(|review| review.rating),
        );
        let movie = self
            .movies
            .get_mut(movie_id)
            .ok_or(storage::Error::NoSuchMovie { id: *movie_id })?;
        movie.average_rating = average_rating;
        movie.total_review_count = total_review_count;
        Ok(MovieStats {
            movie: *movie_id,
            average_rating,
            total_review_count,
        })
    }
    fn matches(&self, movie: &Movie, query: &MovieQuery) -> bool {
        if let Some(genre) = &query.genre {
            let hit = movie.genres.iter().any(|id| {
                self.genres
                    .get(id)
                    .map(|g| g.name.as_ref() == genre.as_str())
                    .unwrap_or(false)
            });
            if !hit {
                return false;
            }
        }
        if let Some(release_date) = &query.release_date {
            if movie.release_date != *release_date {
                return false;
            }
        }
        if let Some(search) = &query.search {
            let needle = search.to_lowercase();
            let in_text = movie.title.to_lowercase().contains(&needle)
                || movie.description.to_lowercase().contains(&needle);
            let in_crew = self
                .crew
                .values()
                .filter(|credit| credit.movie == movie.id)
                .filter_map(|credit| self.persons.get(&credit.person))
                .any(|person| person.name.to_lowercase().contains(&needle));
            if !in_text && !in_crew {
                return false;
            }
        }
        true
    }
}

/// The in-memory storage backend
#[derive(Default)]
pub struct Memory {
    tables: RwLock<Tables>,
}

impl Memory {
    pub fn new() -> Memory {
        Memory::default()
    }
}

#[async_trait]
impl Backend for Memory {
    async fn add_user(&self, user: &User) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.users_by_email.contains_key(user.email()) {
            return Err(storage::Error::EmailClaimed {
                email: user.email().clone(),
            });
        }
        tables
            .users_by_email
            .insert(user.email().clone(), user.id());
        tables.users.insert(user.id(), user.clone());
        Ok(())
    }

    async fn user_for_email(&self, email: &UserEmail) -> Result<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users_by_email
            .get(email)
            .and_then(|id| tables.users.get(id))
            .cloned())
    }

    async fn user_by_id(&self, id: &UserId) -> Result<Option<User>> {
        Ok(self.tables.read().await.users.get(id).cloned())
    }

    async fn add_genre(&self, genre: &Genre) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables
            .genres
            .values()
            .any(|g| g.name.as_ref() == genre.name.as_ref())
        {
            return Err(storage::Error::DuplicateGenre {
                name: genre.name.clone(),
            });
        }
        tables.genres.insert(genre.id, genre.clone());
        Ok(())
    }

    async fn get_genres(&self) -> Result<Vec<Genre>> {
        let tables = self.tables.read().await;
        let mut genres: Vec<Genre> = tables.genres.values().cloned().collect();
        genres.sort_by(|a, b| a.name.as_ref().cmp(b.name.as_ref()));
        Ok(genres)
    }

    async fn genre_by_id(&self, id: &GenreId) -> Result<Option<Genre>> {
        Ok(self.tables.read().await.genres.get(id).cloned())
    }

    async fn add_person(&self, person: &Person) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.persons.insert(person.id, person.clone());
        Ok(())
    }

    async fn get_persons(&self, search: Option<&str>) -> Result<Vec<Person>> {
        let tables = self.tables.read().await;
        let needle = search.map(str::to_lowercase);
        let mut persons: Vec<Person> = tables
            .persons
            .values()
            .filter(|person| match &needle {
                Some(needle) => person.name.to_lowercase().contains(needle),
                None => true,
            })
            .cloned()
            .collect();
        persons.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(persons)
    }

    async fn person_by_id(&self, id: &PersonId) -> Result<Option<Person>> {
        Ok(self.tables.read().await.persons.get(id).cloned())
    }

    async fn add_movie(&self, movie: &Movie) -> Result<()> {
        let mut tables = self.tables.write().await;
        for genre in &movie.genres {
            if !tables.genres.contains_key(genre) {
                return Err(storage::Error::NoSuchGenre { id: *genre });
            }
        }
        tables.movies.insert(movie.id, movie.clone());
        Ok(())
    }

    async fn movie_by_id(&self, id: &MovieId) -> Result<Option<Movie>> {
        Ok(self.tables.read().await.movies.get(id).cloned())
    }

    async fn get_movies(&self, query: &MovieQuery) -> Result<Vec<Movie>> {
        let tables = self.tables.read().await;
        let mut movies: Vec<Movie> = tables
            .movies
            .values()
            .filter(|movie| tables.matches(movie, query))
            .cloned()
            .collect();
        // Default order is newest release first; title breaks ties for a deterministic listing.
        match query.ordering {
            None => movies.sort_by(|a, b| {
                b.release_date
                    .cmp(&a.release_date)
                    .then_with(|| a.title.cmp(&b.title))
            }),
            Some(ordering) => {
                movies.sort_by(|a, b| {
                    let ord = match ordering.key {
                        OrderKey::AverageRating => a
                            .average_rating
                            .partial_cmp(&b.average_rating)
                            .unwrap_or(std::cmp::Ordering::Equal),
                        OrderKey::ReleaseDate => a.release_date.cmp(&b.release_date),
                        OrderKey::TotalReviewCount => {
                            a.total_review_count.cmp(&b.total_review_count)
                        }
                    };
                    let ord = ord.then_with(|| a.title.cmp(&b.title));
                    if ordering.descending {
                        ord.reverse()
                    } else {
                        ord
                    }
                });
            }
        }
        Ok(movies)
    }

    async fn update_movie(
        &self,
        id: &MovieId,
        title: String,
        description: String,
        release_date: NaiveDate,
        poster: Option<String>,
        video_file: Option<String>,
        genres: HashSet<GenreId>,
    ) -> Result<Movie> {
        let mut tables = self.tables.write().await;
        for genre in &genres {
            if !tables.genres.contains_key(genre) {
                return Err(storage::Error::NoSuchGenre { id: *genre });
            }
        }
        let movie = tables
            .movies
            .get_mut(id)
            .ok_or(storage::Error::NoSuchMovie { id: *id })?;
        movie.title = title;
        movie.description = description;
        movie.release_date = release_date;
        movie.poster = poster;
        movie.video_file = video_file;
        movie.genres = genres;
        // The aggregate fields are left alone; only review mutations may touch them.
        Ok(movie.clone())
    }

    async fn delete_movie(&self, id: &MovieId) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables
            .movies
            .remove(id)
            .ok_or(storage::Error::NoSuchMovie { id: *id })?;
        tables.reviews.retain(|_, review| review.movie != *id);
        tables.crew.retain(|_, credit| credit.movie != *id);
        Ok(())
    }

    async fn add_crew(&self, crew: &MovieCrew) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.movies.contains_key(&crew.movie) {
            return Err(storage::Error::NoSuchMovie { id: crew.movie });
        }
        if !tables.persons.contains_key(&crew.person) {
            return Err(storage::Error::NoSuchPerson { id: crew.person });
        }
        if tables.crew.values().any(|existing| {
            existing.movie == crew.movie
                && existing.person == crew.person
                && existing.role == crew.role
        }) {
            return Err(storage::Error::DuplicateCrew {
                movie: crew.movie,
                person: crew.person,
                role: crew.role,
            });
        }
        tables.crew.insert(crew.id, crew.clone());
        Ok(())
    }

    async fn crew_for_movie(&self, id: &MovieId) -> Result<Vec<MovieCrew>> {
        let tables = self.tables.read().await;
        let mut credits: Vec<MovieCrew> = tables
            .crew
            .values()
            .filter(|credit| credit.movie == *id)
            .cloned()
            .collect();
        credits.sort_by_key(|credit| (credit.role, credit.id.to_string()));
        Ok(credits)
    }

    async fn add_review(&self, review: &Review) -> Result<MovieStats> {
        let mut tables = self.tables.write().await;
        if !tables.movies.contains_key(&review.movie) {
            return Err(storage::Error::NoSuchMovie { id: review.movie });
        }
        // The uniqueness check and the insert happen under the same write guard, so two
        // concurrent reviews from one user can't both pass the check.
        if tables
            .reviews
            .values()
            .any(|existing| existing.movie == review.movie && existing.user == review.user)
        {
            return Err(storage::Error::DuplicateReview {
                movie: review.movie,
                user: review.user,
            });
        }
        tables.reviews.insert(review.id, review.clone());
        tables.recompute_stats(&review.movie)
    }

    async fn update_review(
        &self,
        id: &ReviewId,
        rating: Rating,
        comment: Option<String>,
    ) -> Result<MovieStats> {
        let mut tables = self.tables.write().await;
        let review = tables
            .reviews
            .get_mut(id)
            .ok_or(storage::Error::NoSuchReview { id: *id })?;
        review.rating = rating;
        review.comment = comment;
        let movie = review.movie;
        tables.recompute_stats(&movie)
    }

    async fn delete_review(&self, id: &ReviewId) -> Result<MovieStats> {
        let mut tables = self.tables.write().await;
        let review = tables
            .reviews
            .remove(id)
            .ok_or(storage::Error::NoSuchReview { id: *id })?;
        tables.recompute_stats(&review.movie)
    }

    async fn review_by_id(&self, id: &ReviewId) -> Result<Option<Review>> {
        Ok(self.tables.read().await.reviews.get(id).cloned())
    }

    async fn reviews_for_movie(&self, id: &MovieId) -> Result<Vec<Review>> {
        let tables = self.tables.read().await;
        let mut reviews: Vec<Review> = tables
            .reviews
            .values()
            .filter(|review| review.movie == *id)
            .cloned()
            .collect();
        reviews.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.to_string().cmp(&b.id.to_string()))
        });
        Ok(reviews)
    }
}
