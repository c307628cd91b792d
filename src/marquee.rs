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

//! Shared application state & the composed router.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use axum::{routing::get, Router};
use chrono::Duration;
use http::{HeaderName, HeaderValue};
use tap::Pipe;
use tower_http::{
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

use crate::{
    background_tasks::Sender, cache::ResponseCache, catalog, metrics, ratelimit::FixedWindow,
    reviews, storage::Backend as StorageBackend, token::SigningKey, users,
};

/// Application state available to all handlers
pub struct Marquee {
    /// The issuer claim stamped into (and demanded of) every JWT
    pub issuer: String,
    pub storage: Box<dyn StorageBackend + Send + Sync>,
    pub cache: ResponseCache,
    pub signing_key: SigningKey,
    pub access_token_lifetime: Duration,
    pub refresh_token_lifetime: Duration,
    pub instruments: Arc<metrics::Instruments>,
    /// Handle by which handlers enqueue background work (welcome mail, today)
    pub task_sender: Sender,
    /// Per-user fixed-window throttle on review submission
    pub review_throttle: FixedWindow,
}

async fn healthcheck() -> &'static str {
    "GOOD"
}

/// Counter for generating request IDs; a u64 gives less information than the traditional UUID,
/// but it's enough, more easily readable, and a useful gauge of how long the server's been up.
#[derive(Clone, Debug, Default)]
struct RequestIdGenerator {
    counter: Arc<AtomicU64>,
}

impl MakeRequestId for RequestIdGenerator {
    fn make_request_id<B>(&mut self, _request: &axum::extract::Request<B>) -> Option<RequestId> {
        self.counter
            .fetch_add(1, Ordering::SeqCst)
            .to_string()
            .pipe(|s| RequestId::new(HeaderValue::from_str(&s).unwrap(/* known good */)))
            .pipe(Some)
    }
}

/// Make the [Router] that will be accessible to the world
///
/// Incoming requests should hit the `SetRequestIdLayer` *first*, so it's the last/outer layer
/// applied.
pub fn make_router(state: Arc<Marquee>) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .nest("/api/v1", users::make_router(state.clone()))
        .nest("/api/v1", catalog::make_router(state.clone()))
        .nest("/api/v1", reviews::make_router(state.clone()))
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
            "x-request-id",
        )))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(SetRequestIdLayer::new(
            HeaderName::from_static("x-request-id"),
            RequestIdGenerator::default(),
        ))
        .with_state(state)
}
