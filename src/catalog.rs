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

//! # marquee Catalog API
//!
//! Movies, genres & persons. Reads are public; writes demand an administrator. The unfiltered
//! movie list and each movie's detail view are served from [ResponseCache](crate::cache); any
//! filter, search or ordering parameter bypasses the cache. Movie writes evict both the list key
//! and the movie's detail key before the response goes out, so a client that writes & immediately
//! re-reads sees its own write; the TTL is a backstop, not the consistency mechanism.

use std::{collections::HashSet, sync::Arc};

use axum::{
    extract::{rejection::ExtensionRejection, Path, Query, State},
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use snafu::{prelude::*, Backtrace};
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer};
use tracing::{debug, error, info};

use crate::{
    assets,
    authn::authenticate,
    cache::{movie_detail_key, MOVIES_LIST},
    counter_add,
    entities::{
        Genre, GenreId, GenreName, Movie, MovieId, Person, PersonId, Review, ReviewId, Role, User,
    },
    http::ErrorResponseBody,
    marquee::Marquee,
    metrics::{self, Sort},
    storage::{self, Backend as StorageBackend, MovieQuery, OrderKey, Ordering},
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to add genre: {source}"))]
    AddGenre { source: storage::Error },
    #[snafu(display("Failed to add movie: {source}"))]
    AddMovie { source: storage::Error },
    #[snafu(display("{source}"))]
    Asset { source: assets::Error },
    #[snafu(display("Failed to delete movie: {source}"))]
    DeleteMovie { source: storage::Error },
    #[snafu(display("This operation requires an administrator"))]
    Forbidden { backtrace: Backtrace },
    #[snafu(display("A movie must belong to at least one genre."))]
    NoGenres { backtrace: Backtrace },
    #[snafu(display("No movie with id {id}"))]
    NoSuchMovie { id: MovieId, backtrace: Backtrace },
    #[snafu(display("Storage failure: {source}"))]
    Storage { source: storage::Error },
    #[snafu(display("This operation requires authentication"))]
    Unauthenticated { backtrace: Backtrace },
    #[snafu(display("Failed to update movie: {source}"))]
    UpdateMovie { source: storage::Error },
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

impl Error {
    pub fn as_status_and_msg(&self) -> (StatusCode, String) {
        match self {
            ////////////////////////////////////////////////////////////////////////////////////////
            // Broken requests-- tell the caller how to fix it
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::AddGenre { source } if source.is_conflict() => {
                (StatusCode::BAD_REQUEST, format!("{}", source))
            }
            Error::AddMovie {
                source: source @ storage::Error::NoSuchGenre { .. },
            } => (StatusCode::BAD_REQUEST, format!("{}", source)),
            Error::UpdateMovie {
                source: source @ storage::Error::NoSuchGenre { .. },
            } => (StatusCode::BAD_REQUEST, format!("{}", source)),
            Error::Asset { source } => (StatusCode::BAD_REQUEST, format!("{}", source)),
            Error::NoGenres { .. } => (
                StatusCode::BAD_REQUEST,
                "A movie must belong to at least one genre.".to_string(),
            ),
            ////////////////////////////////////////////////////////////////////////////////////////
            // Authentication & authorization failures
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::Unauthenticated { .. } => {
                (StatusCode::UNAUTHORIZED, "Unauthorized".to_string())
            }
            Error::Forbidden { .. } => (StatusCode::FORBIDDEN, "Forbidden".to_string()),
            ////////////////////////////////////////////////////////////////////////////////////////
            // Missing resources
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::NoSuchMovie { id, .. } => {
                (StatusCode::NOT_FOUND, format!("No movie with id {}", id))
            }
            Error::UpdateMovie {
                source: storage::Error::NoSuchMovie { id, .. },
            } => (StatusCode::NOT_FOUND, format!("No movie with id {}", id)),
            Error::DeleteMovie {
                source: storage::Error::NoSuchMovie { id, .. },
            } => (StatusCode::NOT_FOUND, format!("No movie with id {}", id)),
            ////////////////////////////////////////////////////////////////////////////////////////
            // Internal failure-- own up to it:
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::AddGenre { source }
            | Error::AddMovie { source }
            | Error::DeleteMovie { source }
            | Error::Storage { source }
            | Error::UpdateMovie { source } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Internal server error: {:?}", source),
            ),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let (code, msg) = self.as_status_and_msg();
        (code, Json(ErrorResponseBody { error: msg })).into_response()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         authorization                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Writes to the catalog demand an administrator: 401 when the request carried no (valid)
/// credentials at all, 403 when it named a non-admin.
pub fn require_admin(
    user: &StdResult<Extension<User>, ExtensionRejection>,
) -> Result<&User> {
    match user {
        Ok(Extension(user)) if user.is_admin() => Ok(user),
        Ok(_) => ForbiddenSnafu.fail(),
        Err(_) => UnauthenticatedSnafu.fail(),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         serialization                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A crew credit as it appears inside a movie payload; `id` is the *person's* id, since that's
/// what a client will want to link on.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CrewRsp {
    pub id: PersonId,
    pub name: String,
    pub photo: Option<String>,
    pub role: Role,
    pub character_name: Option<String>,
}

/// A review as it appears on the wire; `user` is the reviewer's display name.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ReviewRsp {
    pub id: ReviewId,
    pub user: String,
    pub rating: u8,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A movie with its relations denormalized for the client: genres & crew nested, the three most
/// recent reviews inlined.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MovieRsp {
    pub id: MovieId,
    pub title: String,
    pub description: String,
    pub release_date: NaiveDate,
    pub poster: Option<String>,
    pub video_file: Option<String>,
    pub average_rating: f64,
    pub total_review_count: u64,
    pub genres: Vec<Genre>,
    pub crew: Vec<CrewRsp>,
    pub latest_reviews: Vec<ReviewRsp>,
}

/// How many reviews ride along on a movie payload
const LATEST_REVIEWS: usize = 3;

pub(crate) async fn review_response(
    storage: &(dyn StorageBackend + Send + Sync),
    review: &Review,
) -> storage::Result<ReviewRsp> {
    // A review whose author has vanished shouldn't take the payload down with it.
    let user = match storage.user_by_id(&review.user).await? {
        Some(user) => user.name().to_string(),
        None => "unknown".to_owned(),
    };
    Ok(ReviewRsp {
        id: review.id,
        user,
        rating: review.rating.get(),
        comment: review.comment.clone(),
        created_at: review.created_at,
    })
}

pub(crate) async fn movie_response(
    storage: &(dyn StorageBackend + Send + Sync),
    movie: &Movie,
) -> storage::Result<MovieRsp> {
    let mut genres = Vec::with_capacity(movie.genres.len());
    for id in &movie.genres {
        if let Some(genre) = storage.genre_by_id(id).await? {
            genres.push(genre);
        }
    }
    genres.sort_by(|lhs, rhs| lhs.name.as_ref().cmp(rhs.name.as_ref()));

    let mut crew = Vec::new();
    for credit in storage.crew_for_movie(&movie.id).await? {
        if let Some(person) = storage.person_by_id(&credit.person).await? {
            crew.push(CrewRsp {
                id: person.id,
                name: person.name,
                photo: person.photo,
                role: credit.role,
                character_name: credit.character_name,
            });
        }
    }

    let mut latest_reviews = Vec::with_capacity(LATEST_REVIEWS);
    for review in storage
        .reviews_for_movie(&movie.id)
        .await?
        .iter()
        .take(LATEST_REVIEWS)
    {
        latest_reviews.push(review_response(storage, review).await?);
    }

    Ok(MovieRsp {
        id: movie.id,
        title: movie.title.clone(),
        description: movie.description.clone(),
        release_date: movie.release_date,
        poster: movie.poster.clone(),
        video_file: movie.video_file.clone(),
        average_rating: movie.average_rating,
        total_review_count: movie.total_review_count,
        genres,
        crew,
        latest_reviews,
    })
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                    `/movies` (list & create)                                   //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("catalog.cache.hits", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("catalog.cache.misses", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("catalog.writes.successful", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("catalog.writes.failures", Sort::IntegralCounter) }

#[derive(Clone, Debug, Default, Deserialize)]
struct MovieListParams {
    genre: Option<String>,
    // Alias kept for clients of the original API, which filtered on the related field's name.
    #[serde(rename = "genres__name")]
    genres_name: Option<String>,
    release_date: Option<NaiveDate>,
    search: Option<String>,
    ordering: Option<String>,
}

impl MovieListParams {
    fn into_query(self) -> MovieQuery {
        MovieQuery {
            genre: self.genre.or(self.genres_name),
            release_date: self.release_date,
            search: self.search,
            // An unrecognized ordering value is ignored, not rejected.
            ordering: self.ordering.as_deref().and_then(parse_ordering),
        }
    }
}

fn parse_ordering(text: &str) -> Option<Ordering> {
    let (descending, name) = match text.strip_prefix('-') {
        Some(name) => (true, name),
        None => (false, text),
    };
    let key = match name {
        "average_rating" => OrderKey::AverageRating,
        "release_date" => OrderKey::ReleaseDate,
        "total_review_count" => OrderKey::TotalReviewCount,
        _ => return None,
    };
    Some(Ordering { key, descending })
}

/// List movies, optionally filtered
///
/// Query parameters: `genre` (genre name; `genres__name` is accepted as an alias),
/// `release_date` (exact), `search` (case-insensitive over title, description & crew names),
/// `ordering` (`average_rating`, `release_date` or `total_review_count`, prefix `-` for
/// descending). The *unfiltered* list is cached; the presence of any parameter sends the
/// request to storage.
async fn list_movies(
    State(state): State<Arc<Marquee>>,
    Query(params): Query<MovieListParams>,
) -> axum::response::Response {
    async fn list_movies1(query: &MovieQuery, state: &Marquee) -> Result<serde_json::Value> {
        let storage = state.storage.as_ref();
        let movies = storage.get_movies(query).await.context(StorageSnafu)?;
        let mut body = Vec::with_capacity(movies.len());
        for movie in &movies {
            body.push(movie_response(storage, movie).await.context(StorageSnafu)?);
        }
        serde_json::to_value(body)
            .map_err(storage::Error::backend)
            .context(StorageSnafu)
    }

    let query = params.into_query();
    if query.is_empty() {
        if let Some(body) = state.cache.get(MOVIES_LIST).await {
            debug!("movie list served from cache");
            counter_add!(state.instruments, "catalog.cache.hits", 1, &[]);
            return (StatusCode::OK, Json(body)).into_response();
        }
        counter_add!(state.instruments, "catalog.cache.misses", 1, &[]);
    }

    match list_movies1(&query, &state).await {
        Ok(body) => {
            if query.is_empty() {
                state.cache.put(MOVIES_LIST.to_owned(), body.clone()).await;
            }
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            err.into_response()
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
struct MovieReq {
    title: String,
    description: String,
    release_date: NaiveDate,
    poster: Option<String>,
    poster_size: Option<u64>,
    video_file: Option<String>,
    video_size: Option<u64>,
    genre_ids: Vec<GenreId>,
}

impl MovieReq {
    /// Upload policy & genre-set checks shared by create & update
    fn validate(&self) -> Result<HashSet<GenreId>> {
        ensure!(!self.genre_ids.is_empty(), NoGenresSnafu);
        if let Some(poster) = &self.poster {
            assets::validate_poster(poster, self.poster_size).context(AssetSnafu)?;
        }
        if let Some(video) = &self.video_file {
            assets::validate_video(video, self.video_size).context(AssetSnafu)?;
        }
        Ok(self.genre_ids.iter().copied().collect())
    }
}

/// Create a movie (admin only)
async fn create_movie(
    State(state): State<Arc<Marquee>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Json(req): Json<MovieReq>,
) -> axum::response::Response {
    async fn create_movie1(req: MovieReq, state: &Marquee) -> Result<MovieRsp> {
        let genres = req.validate()?;
        let movie = Movie::new(
            req.title,
            req.description,
            req.release_date,
            req.poster,
            req.video_file,
            genres,
        );
        state
            .storage
            .add_movie(&movie)
            .await
            .context(AddMovieSnafu)?;
        state.cache.invalidate(MOVIES_LIST).await;
        movie_response(state.storage.as_ref(), &movie)
            .await
            .context(StorageSnafu)
    }

    if let Err(err) = require_admin(&user) {
        counter_add!(state.instruments, "catalog.writes.failures", 1, &[]);
        return err.into_response();
    }
    match create_movie1(req, &state).await {
        Ok(rsp) => {
            info!("Created movie {} ({})", rsp.title, rsp.id);
            counter_add!(state.instruments, "catalog.writes.successful", 1, &[]);
            (StatusCode::CREATED, Json(rsp)).into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "catalog.writes.failures", 1, &[]);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                               `/movies/:id` (read, update, delete)                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Retrieve one movie, through the detail cache
async fn get_movie(
    State(state): State<Arc<Marquee>>,
    Path(id): Path<MovieId>,
) -> axum::response::Response {
    async fn get_movie1(id: &MovieId, state: &Marquee) -> Result<serde_json::Value> {
        let storage = state.storage.as_ref();
        let movie = storage
            .movie_by_id(id)
            .await
            .context(StorageSnafu)?
            .context(NoSuchMovieSnafu { id: *id })?;
        let body = movie_response(storage, &movie).await.context(StorageSnafu)?;
        serde_json::to_value(body)
            .map_err(storage::Error::backend)
            .context(StorageSnafu)
    }

    let key = movie_detail_key(&id);
    if let Some(body) = state.cache.get(&key).await {
        debug!("movie {} served from cache", id);
        counter_add!(state.instruments, "catalog.cache.hits", 1, &[]);
        return (StatusCode::OK, Json(body)).into_response();
    }
    counter_add!(state.instruments, "catalog.cache.misses", 1, &[]);

    match get_movie1(&id, &state).await {
        Ok(body) => {
            state.cache.put(key, body.clone()).await;
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            err.into_response()
        }
    }
}

/// Replace a movie's authored fields (admin only); aggregates are derived & survive the update
async fn update_movie(
    State(state): State<Arc<Marquee>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path(id): Path<MovieId>,
    Json(req): Json<MovieReq>,
) -> axum::response::Response {
    async fn update_movie1(id: &MovieId, req: MovieReq, state: &Marquee) -> Result<MovieRsp> {
        let genres = req.validate()?;
        let movie = state
            .storage
            .update_movie(
                id,
                req.title,
                req.description,
                req.release_date,
                req.poster,
                req.video_file,
                genres,
            )
            .await
            .context(UpdateMovieSnafu)?;
        state.cache.invalidate_movie(id).await;
        movie_response(state.storage.as_ref(), &movie)
            .await
            .context(StorageSnafu)
    }

    if let Err(err) = require_admin(&user) {
        counter_add!(state.instruments, "catalog.writes.failures", 1, &[]);
        return err.into_response();
    }
    match update_movie1(&id, req, &state).await {
        Ok(rsp) => {
            info!("Updated movie {}", id);
            counter_add!(state.instruments, "catalog.writes.successful", 1, &[]);
            (StatusCode::OK, Json(rsp)).into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "catalog.writes.failures", 1, &[]);
            err.into_response()
        }
    }
}

/// Delete a movie & its reviews/credits (admin only)
async fn delete_movie(
    State(state): State<Arc<Marquee>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path(id): Path<MovieId>,
) -> axum::response::Response {
    async fn delete_movie1(id: &MovieId, state: &Marquee) -> Result<()> {
        state
            .storage
            .delete_movie(id)
            .await
            .context(DeleteMovieSnafu)?;
        state.cache.invalidate_movie(id).await;
        Ok(())
    }

    if let Err(err) = require_admin(&user) {
        counter_add!(state.instruments, "catalog.writes.failures", 1, &[]);
        return err.into_response();
    }
    match delete_movie1(&id, &state).await {
        Ok(_) => {
            info!("Deleted movie {}", id);
            counter_add!(state.instruments, "catalog.writes.successful", 1, &[]);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "catalog.writes.failures", 1, &[]);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           `/genres`                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

async fn list_genres(State(state): State<Arc<Marquee>>) -> axum::response::Response {
    match state.storage.get_genres().await.context(StorageSnafu) {
        Ok(genres) => (StatusCode::OK, Json(genres)).into_response(),
        Err(err) => {
            error!("{:#?}", err);
            err.into_response()
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
struct GenreReq {
    name: GenreName,
}

/// Create a genre (admin only); names are unique
async fn create_genre(
    State(state): State<Arc<Marquee>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Json(req): Json<GenreReq>,
) -> axum::response::Response {
    async fn create_genre1(req: GenreReq, state: &Marquee) -> Result<Genre> {
        let genre = Genre::new(req.name);
        state
            .storage
            .add_genre(&genre)
            .await
            .context(AddGenreSnafu)?;
        Ok(genre)
    }

    if let Err(err) = require_admin(&user) {
        counter_add!(state.instruments, "catalog.writes.failures", 1, &[]);
        return err.into_response();
    }
    match create_genre1(req, &state).await {
        Ok(genre) => {
            info!("Created genre {}", genre.name);
            counter_add!(state.instruments, "catalog.writes.successful", 1, &[]);
            (StatusCode::CREATED, Json(genre)).into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "catalog.writes.failures", 1, &[]);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           `/persons`                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Default, Deserialize)]
struct PersonsParams {
    search: Option<String>,
}

async fn list_persons(
    State(state): State<Arc<Marquee>>,
    Query(params): Query<PersonsParams>,
) -> axum::response::Response {
    match state
        .storage
        .get_persons(params.search.as_deref())
        .await
        .context(StorageSnafu)
    {
        Ok(persons) => (StatusCode::OK, Json(persons)).into_response(),
        Err(err) => {
            error!("{:#?}", err);
            err.into_response()
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
struct PersonReq {
    name: String,
    photo: Option<String>,
    photo_size: Option<u64>,
    bio: Option<String>,
}

/// Create a person (admin only); the photo follows the poster upload policy
async fn create_person(
    State(state): State<Arc<Marquee>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Json(req): Json<PersonReq>,
) -> axum::response::Response {
    async fn create_person1(req: PersonReq, state: &Marquee) -> Result<Person> {
        if let Some(photo) = &req.photo {
            assets::validate_poster(photo, req.photo_size).context(AssetSnafu)?;
        }
        let person = Person::new(req.name, req.photo, req.bio);
        state
            .storage
            .add_person(&person)
            .await
            .context(StorageSnafu)?;
        Ok(person)
    }

    if let Err(err) = require_admin(&user) {
        counter_add!(state.instruments, "catalog.writes.failures", 1, &[]);
        return err.into_response();
    }
    match create_person1(req, &state).await {
        Ok(person) => {
            info!("Created person {} ({})", person.name, person.id);
            counter_add!(state.instruments, "catalog.writes.successful", 1, &[]);
            (StatusCode::CREATED, Json(person)).into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "catalog.writes.failures", 1, &[]);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Public API                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Return a router for the Catalog API
///
/// The returned [Router] will presumably be merged with other routers.
pub fn make_router(state: Arc<Marquee>) -> Router<Arc<Marquee>> {
    Router::new()
        .route("/movies", get(list_movies).post(create_movie))
        // PATCH is accepted as an alias for PUT; both take the full authored representation.
        .route(
            "/movies/:id",
            get(get_movie)
                .put(update_movie)
                .patch(update_movie)
                .delete(delete_movie),
        )
        .route("/genres", get(list_genres).post(create_genre))
        .route("/persons", get(list_persons).post(create_person))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            authenticate,
        ))
        // All responses are JSON; add the appropriate Content-Type header (but leave the existing
        // Content-Type header should a handler set it specially).
        .layer(SetResponseHeaderLayer::if_not_present(
            CONTENT_TYPE,
            HeaderValue::from_static("text/json; charset=utf-8"),
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
