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

//! # marquee User API
//!
//! Registration, login & token refresh. Login vends an access/refresh token pair and, off the hot
//! path, enqueues the welcome mail; the caller's response never waits on (nor reflects) mail
//! delivery.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use snafu::{prelude::*, Backtrace};
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer};
use tracing::{error, info, warn};

use crate::{
    authn::{self, authenticate, check_password},
    counter_add, entities,
    entities::{User, UserEmail, UserId, Username},
    http::ErrorResponseBody,
    marquee::Marquee,
    metrics::{self, Sort},
    notify::SendWelcomeEmail,
    storage,
    token::{self, mint_access_token, mint_refresh_token, refresh_access_token},
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to add user to storage: {source}"))]
    AddUser { source: storage::Error },
    #[snafu(display("Failed to authenticate: {source}"))]
    Authn {
        #[snafu(source(from(authn::Error, Box::new)))]
        source: Box<authn::Error>,
    },
    #[snafu(display("Passwords do not match."))]
    PasswordMismatch { backtrace: Backtrace },
    #[snafu(display("Failed to refresh access token: {source}"))]
    Refresh {
        #[snafu(source(from(token::Error, Box::new)))]
        source: Box<token::Error>,
    },
    #[snafu(display("Failed to mint token: {source}"))]
    Token {
        #[snafu(source(from(token::Error, Box::new)))]
        source: Box<token::Error>,
    },
    #[snafu(display("Failed to create user: {source}"))]
    UserCreate { source: entities::Error },
}

type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn as_status_and_msg(&self) -> (StatusCode, String) {
        match self {
            ////////////////////////////////////////////////////////////////////////////////////////
            // Broken requests-- tell the caller how to fix it
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::PasswordMismatch { .. } => {
                (StatusCode::BAD_REQUEST, "Passwords do not match.".to_string())
            }
            Error::UserCreate { source } => (StatusCode::BAD_REQUEST, format!("{}", source)),
            Error::AddUser { source } if source.is_conflict() => {
                (StatusCode::BAD_REQUEST, format!("{}", source))
            }
            ////////////////////////////////////////////////////////////////////////////////////////
            // Authentication failure-- don't tell a potential attacker the way in which they failed
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::Authn { .. } => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            Error::Refresh { .. } => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ////////////////////////////////////////////////////////////////////////////////////////
            // Internal failure-- own up to it:
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::AddUser { source } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Internal server error adding user: {:?}", source),
            ),
            Error::Token { source } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Internal server error minting token: {:?}", source),
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
//                                         serialization                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The public representation of a [User]; appears in registration & login responses
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UserRsp {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserRsp {
    fn from(user: &User) -> UserRsp {
        UserRsp {
            id: user.id(),
            email: user.email().to_string(),
            name: user.name().to_string(),
            is_admin: user.is_admin(),
            created_at: *user.created_at(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           `/register`                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("user.registrations.successful", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("user.registrations.failures", Sort::IntegralCounter) }

#[derive(Clone, Debug, Deserialize)]
struct RegisterReq {
    name: Username,
    email: UserEmail,
    password: SecretString,
    password2: SecretString,
}

/// Register a new user
///
/// Parameters:
///
/// - name: the user's display name; arbitrary UTF-8 text sans control characters
///
/// - email: a valid e-mail address; this is the login identifier & must be unique
///
/// - password, password2: the password, twice; marquee stores only an Argon2id hash
///
/// There is, naturally, no authentication on this endpoint. Responds 201 with the new user's
/// public representation on success.
async fn register(
    State(state): State<Arc<Marquee>>,
    Json(req): Json<RegisterReq>,
) -> axum::response::Response {
    async fn register1(req: &RegisterReq, state: &Marquee) -> Result<UserRsp> {
        ensure!(
            req.password.expose_secret() == req.password2.expose_secret(),
            PasswordMismatchSnafu
        );
        let user =
            User::new(&req.name, &req.email, &req.password, false).context(UserCreateSnafu)?;
        state.storage.add_user(&user).await.context(AddUserSnafu)?;
        Ok(UserRsp::from(&user))
    }

    match register1(&req, &state).await {
        Ok(rsp) => {
            info!("Registered user {}", req.email);
            counter_add!(state.instruments, "user.registrations.successful", 1, &[]);
            (StatusCode::CREATED, Json(rsp)).into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "user.registrations.failures", 1, &[]);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            `/login`                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("user.logins.successful", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("user.logins.failures", Sort::IntegralCounter) }

#[derive(Clone, Debug, Deserialize)]
struct LoginReq {
    email: UserEmail,
    password: SecretString,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LoginRsp {
    pub access: String,
    pub refresh: String,
    pub user: UserRsp,
}

/// Login as an existing user
///
/// Vends a pair of JWTs: a short-lived access token to be supplied in the Authorization header
/// (bearer scheme) of subsequent requests, and a refresh token that `/token/refresh` will
/// exchange for fresh access tokens.
///
/// On success the welcome mail is enqueued for background delivery; its fate has no bearing on
/// this response.
async fn login(
    State(state): State<Arc<Marquee>>,
    Json(req): Json<LoginReq>,
) -> axum::response::Response {
    async fn login1(req: &LoginReq, state: &Marquee) -> Result<(User, LoginRsp)> {
        let user = check_password(state.storage.as_ref(), &req.email, &req.password)
            .await
            .context(AuthnSnafu)?;
        let access = mint_access_token(
            user.id(),
            &state.signing_key,
            &state.issuer,
            &state.access_token_lifetime,
        )
        .context(TokenSnafu)?;
        let refresh = mint_refresh_token(
            user.id(),
            &state.signing_key,
            &state.issuer,
            &state.refresh_token_lifetime,
        )
        .context(TokenSnafu)?;
        let rsp = LoginRsp {
            access,
            refresh,
            user: UserRsp::from(&user),
        };
        Ok((user, rsp))
    }

    match login1(&req, &state).await {
        Ok((user, rsp)) => {
            info!("Logged-in user {}", req.email);
            counter_add!(state.instruments, "user.logins.successful", 1, &[]);
            // Fire-and-forget; a full queue is the mail's problem, not the login's.
            if let Err(err) = state
                .task_sender
                .send(SendWelcomeEmail::new(
                    user.name().clone(),
                    user.email().clone(),
                ))
                .await
            {
                warn!("Failed to enqueue welcome mail for {}: {}", req.email, err);
            }
            (StatusCode::OK, Json(rsp)).into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "user.logins.failures", 1, &[]);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        `/token/refresh`                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("user.token-refreshes.successful", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("user.token-refreshes.failures", Sort::IntegralCounter) }

#[derive(Clone, Debug, Deserialize)]
struct RefreshReq {
    refresh: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RefreshRsp {
    pub access: String,
}

/// Exchange a refresh token for a fresh access token
async fn refresh(
    State(state): State<Arc<Marquee>>,
    Json(req): Json<RefreshReq>,
) -> axum::response::Response {
    fn refresh1(req: &RefreshReq, state: &Marquee) -> Result<(RefreshRsp, UserId)> {
        let (access, user) = refresh_access_token(
            &req.refresh,
            &state.signing_key,
            &state.issuer,
            &state.access_token_lifetime,
        )
        .context(RefreshSnafu)?;
        Ok((RefreshRsp { access }, user))
    }

    match refresh1(&req, &state) {
        Ok((rsp, user)) => {
            info!("Refreshed access token for user {}", user);
            counter_add!(state.instruments, "user.token-refreshes.successful", 1, &[]);
            (StatusCode::OK, Json(rsp)).into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "user.token-refreshes.failures", 1, &[]);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Public API                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Return a router for the User API
///
/// The returned [Router] will presumably be merged with other routers.
pub fn make_router(state: Arc<Marquee>) -> Router<Arc<Marquee>> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/token/refresh", post(refresh))
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
