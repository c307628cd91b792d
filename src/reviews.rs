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

//! # marquee Review & Crew API
//!
//! Per-movie reviews (one per user per movie) and crew credits. Review submission is throttled
//! per user; *attempts* burn budget, so a client replaying a rejected request is not exempt.
//! Every review mutation recomputes the movie's aggregates inside the storage transaction and
//! evicts both the movie-list and the movie's detail cache entries before responding, so the
//! catalog can never serve aggregates that predate a committed review.

use std::sync::Arc;

use axum::{
    extract::{rejection::ExtensionRejection, Path, State},
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use serde::Deserialize;
use snafu::{prelude::*, Backtrace};
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer};
use tracing::{error, info, warn};

use crate::{
    authn::authenticate,
    catalog::{require_admin, review_response, CrewRsp, ReviewRsp},
    counter_add, entities,
    entities::{MovieCrew, MovieId, PersonId, Rating, Review, ReviewId, Role, User},
    http::ErrorResponseBody,
    marquee::Marquee,
    metrics::{self, Sort},
    storage,
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to add crew credit: {source}"))]
    AddCrew { source: storage::Error },
    #[snafu(display("Failed to add review: {source}"))]
    AddReview { source: storage::Error },
    #[snafu(display("{source}"))]
    BadRating { source: entities::Error },
    #[snafu(display("Only the review's author (or an administrator) may do that"))]
    Forbidden { backtrace: Backtrace },
    #[snafu(display("No movie with id {id}"))]
    NoSuchMovie { id: MovieId, backtrace: Backtrace },
    #[snafu(display("No person with id {id}"))]
    NoSuchPerson { id: PersonId, backtrace: Backtrace },
    #[snafu(display("No review with id {id}"))]
    NoSuchReview { id: ReviewId, backtrace: Backtrace },
    #[snafu(display("Storage failure: {source}"))]
    Storage { source: storage::Error },
    #[snafu(display("Request was throttled."))]
    Throttled { backtrace: Backtrace },
    #[snafu(display("This operation requires authentication"))]
    Unauthenticated { backtrace: Backtrace },
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

impl Error {
    pub fn as_status_and_msg(&self) -> (StatusCode, String) {
        match self {
            ////////////////////////////////////////////////////////////////////////////////////////
            // Broken requests-- tell the caller how to fix it
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::AddCrew { source } if source.is_conflict() => {
                (StatusCode::BAD_REQUEST, format!("{}", source))
            }
            Error::AddReview { source } if source.is_conflict() => {
                (StatusCode::BAD_REQUEST, format!("{}", source))
            }
            Error::BadRating { source } => (StatusCode::BAD_REQUEST, format!("{}", source)),
            Error::NoSuchPerson { id, .. } => {
                (StatusCode::BAD_REQUEST, format!("No person with id {}", id))
            }
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
            Error::NoSuchReview { id, .. } => {
                (StatusCode::NOT_FOUND, format!("No review with id {}", id))
            }
            Error::AddReview {
                source: storage::Error::NoSuchMovie { id, .. },
            } => (StatusCode::NOT_FOUND, format!("No movie with id {}", id)),
            ////////////////////////////////////////////////////////////////////////////////////////
            // Too many requests
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::Throttled { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "Request was throttled.".to_string(),
            ),
            ////////////////////////////////////////////////////////////////////////////////////////
            // Internal failure-- own up to it:
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::AddCrew { source }
            | Error::AddReview { source }
            | Error::Storage { source } => (
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

fn require_user(user: &StdResult<Extension<User>, ExtensionRejection>) -> Result<&User> {
    match user {
        Ok(Extension(user)) => Ok(user),
        Err(_) => UnauthenticatedSnafu.fail(),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                    `/movies/:id/reviews`                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("review.writes.successful", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("review.writes.failures", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("review.throttled", Sort::IntegralCounter) }

/// A movie's reviews, newest first
async fn list_reviews(
    State(state): State<Arc<Marquee>>,
    Path(id): Path<MovieId>,
) -> axum::response::Response {
    async fn list_reviews1(id: &MovieId, state: &Marquee) -> Result<Vec<ReviewRsp>> {
        let storage = state.storage.as_ref();
        storage
            .movie_by_id(id)
            .await
            .context(StorageSnafu)?
            .context(NoSuchMovieSnafu { id: *id })?;
        let reviews = storage.reviews_for_movie(id).await.context(StorageSnafu)?;
        let mut body = Vec::with_capacity(reviews.len());
        for review in &reviews {
            body.push(review_response(storage, review).await.context(StorageSnafu)?);
        }
        Ok(body)
    }

    match list_reviews1(&id, &state).await {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(err) => {
            error!("{:#?}", err);
            err.into_response()
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
struct ReviewReq {
    rating: u8,
    comment: Option<String>,
}

/// Submit a review
///
/// One review per user per movie; a second submission is rejected with an explanation and
/// changes nothing. Submission is throttled per user, and the throttle counts *attempts*:
/// a rejected duplicate burns budget just like a success.
async fn create_review(
    State(state): State<Arc<Marquee>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path(id): Path<MovieId>,
    Json(req): Json<ReviewReq>,
) -> axum::response::Response {
    async fn create_review1(
        id: &MovieId,
        user: &User,
        req: &ReviewReq,
        state: &Marquee,
    ) -> Result<ReviewRsp> {
        ensure!(state.review_throttle.check(user.id()).await, ThrottledSnafu);
        let rating = Rating::new(req.rating).context(BadRatingSnafu)?;
        let review = Review::new(*id, user.id(), rating, req.comment.clone());
        let stats = state
            .storage
            .add_review(&review)
            .await
            .context(AddReviewSnafu)?;
        state.cache.invalidate_movie(id).await;
        info!(
            "movie {} now rated {} over {} reviews",
            id, stats.average_rating, stats.total_review_count
        );
        review_response(state.storage.as_ref(), &review)
            .await
            .context(StorageSnafu)
    }

    let user = match require_user(&user) {
        Ok(user) => user,
        Err(err) => {
            counter_add!(state.instruments, "review.writes.failures", 1, &[]);
            return err.into_response();
        }
    };
    match create_review1(&id, user, &req, &state).await {
        Ok(rsp) => {
            counter_add!(state.instruments, "review.writes.successful", 1, &[]);
            (StatusCode::CREATED, Json(rsp)).into_response()
        }
        Err(err @ Error::Throttled { .. }) => {
            warn!("user {} throttled on review submission", user.id());
            counter_add!(state.instruments, "review.throttled", 1, &[]);
            err.into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "review.writes.failures", 1, &[]);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                              `/movies/:id/reviews/:review_id`                                  //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Fetch a review & enforce that `user` may mutate it (author or admin)
async fn owned_review(
    state: &Marquee,
    user: &User,
    movie: &MovieId,
    review: &ReviewId,
) -> Result<Review> {
    let found = state
        .storage
        .review_by_id(review)
        .await
        .context(StorageSnafu)?
        .filter(|found| found.movie == *movie)
        .context(NoSuchReviewSnafu { id: *review })?;
    ensure!(
        found.user == user.id() || user.is_admin(),
        ForbiddenSnafu
    );
    Ok(found)
}

/// Re-rate a review (author or admin)
async fn update_review(
    State(state): State<Arc<Marquee>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path((movie_id, review_id)): Path<(MovieId, ReviewId)>,
    Json(req): Json<ReviewReq>,
) -> axum::response::Response {
    async fn update_review1(
        movie_id: &MovieId,
        review_id: &ReviewId,
        user: &User,
        req: &ReviewReq,
        state: &Marquee,
    ) -> Result<ReviewRsp> {
        owned_review(state, user, movie_id, review_id).await?;
        let rating = Rating::new(req.rating).context(BadRatingSnafu)?;
        let stats = state
            .storage
            .update_review(review_id, rating, req.comment.clone())
            .await
            .context(StorageSnafu)?;
        state.cache.invalidate_movie(movie_id).await;
        info!(
            "movie {} now rated {} over {} reviews",
            movie_id, stats.average_rating, stats.total_review_count
        );
        let review = state
            .storage
            .review_by_id(review_id)
            .await
            .context(StorageSnafu)?
            .context(NoSuchReviewSnafu { id: *review_id })?;
        review_response(state.storage.as_ref(), &review)
            .await
            .context(StorageSnafu)
    }

    let user = match require_user(&user) {
        Ok(user) => user,
        Err(err) => {
            counter_add!(state.instruments, "review.writes.failures", 1, &[]);
            return err.into_response();
        }
    };
    match update_review1(&movie_id, &review_id, user, &req, &state).await {
        Ok(rsp) => {
            counter_add!(state.instruments, "review.writes.successful", 1, &[]);
            (StatusCode::OK, Json(rsp)).into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "review.writes.failures", 1, &[]);
            err.into_response()
        }
    }
}

/// Retract a review (author or admin)
async fn delete_review(
    State(state): State<Arc<Marquee>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path((movie_id, review_id)): Path<(MovieId, ReviewId)>,
) -> axum::response::Response {
    async fn delete_review1(
        movie_id: &MovieId,
        review_id: &ReviewId,
        user: &User,
        state: &Marquee,
    ) -> Result<()> {
        owned_review(state, user, movie_id, review_id).await?;
        let stats = state
            .storage
            .delete_review(review_id)
            .await
            .context(StorageSnafu)?;
        state.cache.invalidate_movie(movie_id).await;
        info!(
            "movie {} now rated {} over {} reviews",
            movie_id, stats.average_rating, stats.total_review_count
        );
        Ok(())
    }

    let user = match require_user(&user) {
        Ok(user) => user,
        Err(err) => {
            counter_add!(state.instruments, "review.writes.failures", 1, &[]);
            return err.into_response();
        }
    };
    match delete_review1(&movie_id, &review_id, user, &state).await {
        Ok(_) => {
            counter_add!(state.instruments, "review.writes.successful", 1, &[]);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "review.writes.failures", 1, &[]);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      `/movies/:id/crew`                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A movie's crew credits, with the person's details joined in
async fn list_crew(
    State(state): State<Arc<Marquee>>,
    Path(id): Path<MovieId>,
) -> axum::response::Response {
    async fn list_crew1(id: &MovieId, state: &Marquee) -> Result<Vec<CrewRsp>> {
        let storage = state.storage.as_ref();
        storage
            .movie_by_id(id)
            .await
            .context(StorageSnafu)?
            .context(NoSuchMovieSnafu { id: *id })?;
        let mut body = Vec::new();
        for credit in storage.crew_for_movie(id).await.context(StorageSnafu)? {
            if let Some(person) = storage
                .person_by_id(&credit.person)
                .await
                .context(StorageSnafu)?
            {
                body.push(CrewRsp {
                    id: person.id,
                    name: person.name,
                    photo: person.photo,
                    role: credit.role,
                    character_name: credit.character_name,
                });
            }
        }
        Ok(body)
    }

    match list_crew1(&id, &state).await {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(err) => {
            error!("{:#?}", err);
            err.into_response()
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
struct CrewReq {
    person_id: PersonId,
    role: Role,
    character_name: Option<String>,
}

/// Credit a person on a movie (admin only); at most one credit per (movie, person, role)
async fn create_crew(
    State(state): State<Arc<Marquee>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path(id): Path<MovieId>,
    Json(req): Json<CrewReq>,
) -> axum::response::Response {
    async fn create_crew1(id: &MovieId, req: &CrewReq, state: &Marquee) -> Result<CrewRsp> {
        let storage = state.storage.as_ref();
        storage
            .movie_by_id(id)
            .await
            .context(StorageSnafu)?
            .context(NoSuchMovieSnafu { id: *id })?;
        let person = storage
            .person_by_id(&req.person_id)
            .await
            .context(StorageSnafu)?
            .context(NoSuchPersonSnafu { id: req.person_id })?;
        let credit = MovieCrew::new(*id, req.person_id, req.role, req.character_name.clone());
        storage.add_crew(&credit).await.context(AddCrewSnafu)?;
        // New credits show up in the movie payload & are searchable; drop the stale copies.
        state.cache.invalidate_movie(id).await;
        Ok(CrewRsp {
            id: person.id,
            name: person.name,
            photo: person.photo,
            role: credit.role,
            character_name: credit.character_name,
        })
    }

    if let Err(err) = require_admin(&user) {
        counter_add!(state.instruments, "review.writes.failures", 1, &[]);
        return err.into_response();
    }
    match create_crew1(&id, &req, &state).await {
        Ok(rsp) => {
            info!("Credited {} as {} on movie {}", rsp.name, rsp.role, id);
            counter_add!(state.instruments, "review.writes.successful", 1, &[]);
            (StatusCode::CREATED, Json(rsp)).into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "review.writes.failures", 1, &[]);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Public API                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Return a router for the Review & Crew API
///
/// The returned [Router] will presumably be merged with other routers.
pub fn make_router(state: Arc<Marquee>) -> Router<Arc<Marquee>> {
    Router::new()
        .route("/movies/:id/reviews", get(list_reviews).post(create_review))
        .route(
            "/movies/:id/reviews/:review_id",
            axum::routing::put(update_review).delete(delete_review),
        )
        .route("/movies/:id/crew", get(list_crew).post(create_crew))
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
