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

//! In-process API tests: drive the composed router against the in-memory backend with
//! `tower::ServiceExt::oneshot`, no listening socket required.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::NaiveDate;
use http_body_util::BodyExt;
use secrecy::SecretString;
use serde_json::{json, Value};
use tower::ServiceExt;

use marquee::{
    background_tasks,
    cache::ResponseCache,
    entities::{
        Genre, GenreId, Movie, MovieCrew, MovieId, Person, PersonId, Rating, Review, ReviewId,
        User, UserEmail, UserId, Username,
    },
    marquee::{make_router, Marquee},
    memory::Memory,
    metrics::Instruments,
    ratelimit::FixedWindow,
    storage::{self, Backend, MovieQuery, MovieStats},
    token::SigningKey,
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            fixtures                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

const ISSUER: &str = "marquee.test";

fn signing_key() -> SigningKey {
    SigningKey::new(b"All that is gold does not glitter-- Not all who wander are lost.".to_vec())
        .unwrap(/* known good */)
}

fn make_state(storage: Box<dyn Backend + Send + Sync>, task_sender: background_tasks::Sender) -> Arc<Marquee> {
    Arc::new(Marquee {
        issuer: ISSUER.to_owned(),
        storage,
        cache: ResponseCache::new(300),
        signing_key: signing_key(),
        access_token_lifetime: chrono::Duration::seconds(300),
        refresh_token_lifetime: chrono::Duration::days(7),
        instruments: Arc::new(Instruments::new("marquee")),
        task_sender,
        review_throttle: FixedWindow::new(10, std::time::Duration::from_secs(60)),
    })
}

fn make_app_with_storage(storage: Box<dyn Backend + Send + Sync>) -> (Router, Arc<Marquee>) {
    // The queue's receiving half is dropped in most tests; login's enqueue is fire-and-forget
    // and mustn't care.
    let (task_sender, _queue) = background_tasks::channel(64);
    let state = make_state(storage, task_sender);
    (make_router(state.clone()), state)
}

fn make_app() -> (Router, Arc<Marquee>) {
    make_app_with_storage(Box::new(Memory::new()))
}

async fn send(
    app: &Router,
    method: &str,
    path: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn register(app: &Router, name: &str, email: &str, password: &str) -> (StatusCode, Value) {
    send(
        app,
        "POST",
        "/api/v1/register",
        None,
        Some(json!({"name": name, "email": email, "password": password, "password2": password})),
    )
    .await
}

/// Login & return the access token
async fn login(app: &Router, email: &str, password: &str) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/api/v1/login",
        None,
        Some(json!({"email": email, "password": password})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["access"].as_str().unwrap().to_owned()
}

/// Create an administrator directly in storage (there is deliberately no endpoint for this) and
/// return their access token.
async fn bootstrap_admin(app: &Router, state: &Marquee) -> String {
    let admin = User::new(
        &Username::new("Admin").unwrap(),
        &UserEmail::new("admin@marquee.test").unwrap(),
        &SecretString::from("correct horse battery staple"),
        true,
    )
    .unwrap();
    state.storage.add_user(&admin).await.unwrap();
    login(app, "admin@marquee.test", "correct horse battery staple").await
}

async fn make_genre(app: &Router, admin: &str, name: &str) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/api/v1/genres",
        Some(admin),
        Some(json!({"name": name})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_owned()
}

async fn make_movie(app: &Router, admin: &str, title: &str, genre_id: &str) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/api/v1/movies",
        Some(admin),
        Some(json!({
            "title": title,
            "description": "A mind-bending thriller",
            "release_date": "2010-07-16",
            "genre_ids": [genre_id],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_owned()
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                     registration & login                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[tokio::test]
async fn registration_and_login() {
    let (app, _state) = make_app();

    let (status, body) = register(&app, "Alice", "alice@example.com", "a sufficiently long password").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["name"], "Alice");
    assert_eq!(body["email"], "alice@example.com");
    assert_eq!(body["is_admin"], false);

    // mismatched passwords
    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/register",
        None,
        Some(json!({"name": "Bob", "email": "bob@example.com",
                    "password": "one password", "password2": "another password"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Passwords do not match.");

    // the e-mail address is claimed
    let (status, _) = register(&app, "Alice II", "alice@example.com", "a different password").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // wrong password
    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/login",
        None,
        Some(json!({"email": "alice@example.com", "password": "not my password"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // the real thing
    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/login",
        None,
        Some(json!({"email": "alice@example.com", "password": "a sufficiently long password"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["access"].is_string());
    assert!(body["refresh"].is_string());
    assert_eq!(body["user"]["name"], "Alice");

    // exchange the refresh token for a fresh access token
    let refresh = body["refresh"].as_str().unwrap();
    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/token/refresh",
        None,
        Some(json!({"refresh": refresh})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["access"].is_string());

    // an access token is not a refresh token
    let access = body["access"].as_str().unwrap();
    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/token/refresh",
        None,
        Some(json!({"refresh": access})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_sends_the_welcome_mail() {
    use marquee::notify::Notifier;

    struct Capture {
        sent: std::sync::Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Notifier for Capture {
        async fn send_email(
            &self,
            to: &UserEmail,
            _subject: &str,
            body: &str,
        ) -> marquee::notify::Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), body.to_owned()));
            Ok(())
        }
    }

    let (task_sender, queue) = background_tasks::channel(8);
    let capture = Arc::new(Capture {
        sent: std::sync::Mutex::new(Vec::new()),
    });
    let context = background_tasks::Context {
        notifier: capture.clone(),
    };
    let processor = background_tasks::new(
        queue,
        context,
        Some(background_tasks::Config {
            sleep_duration: std::time::Duration::from_millis(50),
            ..Default::default()
        }),
        Arc::new(Instruments::new("marquee")),
    )
    .unwrap();

    let state = make_state(Box::new(Memory::new()), task_sender);
    let app = make_router(state);

    register(&app, "Alice", "alice@example.com", "a sufficiently long password").await;
    login(&app, "alice@example.com", "a sufficiently long password").await;

    // The mail is delivered off the hot path; give the processor a beat.
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    processor
        .shutdown(std::time::Duration::from_secs(5))
        .await
        .unwrap();

    let sent = capture.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "alice@example.com");
    assert_eq!(sent[0].1, "Hi Alice, successfully logged into your account.");
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                     catalog authorization                                      //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[tokio::test]
async fn catalog_writes_demand_an_administrator() {
    let (app, state) = make_app();

    // anonymous
    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/genres",
        None,
        Some(json!({"name": "Sci-Fi"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // a mere mortal
    register(&app, "Alice", "alice@example.com", "a sufficiently long password").await;
    let alice = login(&app, "alice@example.com", "a sufficiently long password").await;
    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/genres",
        Some(&alice),
        Some(json!({"name": "Sci-Fi"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // an administrator
    let admin = bootstrap_admin(&app, &state).await;
    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/genres",
        Some(&admin),
        Some(json!({"name": "Sci-Fi"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // reads stay public
    let (status, body) = send(&app, "GET", "/api/v1/genres", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn movie_validation() {
    let (app, state) = make_app();
    let admin = bootstrap_admin(&app, &state).await;
    let genre = make_genre(&app, &admin, "Sci-Fi").await;

    // no genres at all
    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/movies",
        Some(&admin),
        Some(json!({
            "title": "Inception", "description": "d", "release_date": "2010-07-16",
            "genre_ids": [],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "A movie must belong to at least one genre.");

    // an unknown genre
    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/movies",
        Some(&admin),
        Some(json!({
            "title": "Inception", "description": "d", "release_date": "2010-07-16",
            "genre_ids": [GenreId::new().to_string()],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // a poster that isn't an image
    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/movies",
        Some(&admin),
        Some(json!({
            "title": "Inception", "description": "d", "release_date": "2010-07-16",
            "poster": "inception.gif", "genre_ids": [genre],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        "Unsupported file extension. Allowed: .jpg, .jpeg, .png, .webp"
    );

    // an oversized poster
    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/movies",
        Some(&admin),
        Some(json!({
            "title": "Inception", "description": "d", "release_date": "2010-07-16",
            "poster": "inception.jpg", "poster_size": 21 * 1024 * 1024,
            "genre_ids": [genre],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "File too large. Size should not exceed 20 MB.");
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                    reviews & aggregates                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[tokio::test]
async fn review_aggregates() {
    let (app, state) = make_app();
    let admin = bootstrap_admin(&app, &state).await;
    let genre = make_genre(&app, &admin, "Sci-Fi").await;
    let movie = make_movie(&app, &admin, "Inception", &genre).await;

    // No reviews yet.
    let (status, body) = send(&app, "GET", &format!("/api/v1/movies/{}", movie), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["average_rating"], 0.0);
    assert_eq!(body["total_review_count"], 0);

    register(&app, "Alice", "alice@example.com", "a sufficiently long password").await;
    register(&app, "Bob", "bob@example.com", "a sufficiently long password").await;
    let alice = login(&app, "alice@example.com", "a sufficiently long password").await;
    let bob = login(&app, "bob@example.com", "a sufficiently long password").await;

    // Alice rates it a 10...
    let reviews_path = format!("/api/v1/movies/{}/reviews", movie);
    let (status, body) = send(
        &app,
        "POST",
        &reviews_path,
        Some(&alice),
        Some(json!({"rating": 10, "comment": "Loved it"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user"], "Alice");

    let (_, body) = send(&app, "GET", &format!("/api/v1/movies/{}", movie), None, None).await;
    assert_eq!(body["average_rating"], 10.0);
    assert_eq!(body["total_review_count"], 1);

    // ...Bob a 5...
    let (status, _) = send(
        &app,
        "POST",
        &reviews_path,
        Some(&bob),
        Some(json!({"rating": 5})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, body) = send(&app, "GET", &format!("/api/v1/movies/{}", movie), None, None).await;
    assert_eq!(body["average_rating"], 7.5);
    assert_eq!(body["total_review_count"], 2);
    assert_eq!(body["latest_reviews"].as_array().unwrap().len(), 2);

    // ...and Alice tries to double-dip.
    let (status, body) = send(
        &app,
        "POST",
        &reviews_path,
        Some(&alice),
        Some(json!({"rating": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "You have already reviewed this movie.");

    // Aggregates are untouched by the rejected duplicate.
    let (_, body) = send(&app, "GET", &format!("/api/v1/movies/{}", movie), None, None).await;
    assert_eq!(body["average_rating"], 7.5);
    assert_eq!(body["total_review_count"], 2);
}

#[tokio::test]
async fn review_ownership() {
    let (app, state) = make_app();
    let admin = bootstrap_admin(&app, &state).await;
    let genre = make_genre(&app, &admin, "Sci-Fi").await;
    let movie = make_movie(&app, &admin, "Inception", &genre).await;

    register(&app, "Alice", "alice@example.com", "a sufficiently long password").await;
    register(&app, "Bob", "bob@example.com", "a sufficiently long password").await;
    let alice = login(&app, "alice@example.com", "a sufficiently long password").await;
    let bob = login(&app, "bob@example.com", "a sufficiently long password").await;

    let (_, body) = send(
        &app,
        "POST",
        &format!("/api/v1/movies/{}/reviews", movie),
        Some(&alice),
        Some(json!({"rating": 10})),
    )
    .await;
    let review = body["id"].as_str().unwrap().to_owned();
    let review_path = format!("/api/v1/movies/{}/reviews/{}", movie, review);

    // Bob may neither re-rate nor retract Alice's review
    let (status, _) = send(&app, "PUT", &review_path, Some(&bob), Some(json!({"rating": 1}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(&app, "DELETE", &review_path, Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Alice may re-rate...
    let (status, body) = send(
        &app,
        "PUT",
        &review_path,
        Some(&alice),
        Some(json!({"rating": 8, "comment": "On reflection"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rating"], 8);

    let (_, body) = send(&app, "GET", &format!("/api/v1/movies/{}", movie), None, None).await;
    assert_eq!(body["average_rating"], 8.0);

    // ...and retract.
    let (status, _) = send(&app, "DELETE", &review_path, Some(&alice), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = send(&app, "GET", &format!("/api/v1/movies/{}", movie), None, None).await;
    assert_eq!(body["average_rating"], 0.0);
    assert_eq!(body["total_review_count"], 0);
}

#[tokio::test]
async fn review_throttling() {
    let (app, state) = make_app();
    let admin = bootstrap_admin(&app, &state).await;
    let genre = make_genre(&app, &admin, "Sci-Fi").await;
    let movie = make_movie(&app, &admin, "Inception", &genre).await;

    register(&app, "Alice", "alice@example.com", "a sufficiently long password").await;
    let alice = login(&app, "alice@example.com", "a sufficiently long password").await;

    let reviews_path = format!("/api/v1/movies/{}/reviews", movie);

    // The first submission lands; the next nine burn budget as duplicates...
    let (status, _) = send(&app, "POST", &reviews_path, Some(&alice), Some(json!({"rating": 10}))).await;
    assert_eq!(status, StatusCode::CREATED);
    for _ in 0..9 {
        let (status, _) =
            send(&app, "POST", &reviews_path, Some(&alice), Some(json!({"rating": 10}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
    // ...and the eleventh attempt inside the window is throttled.
    let (status, body) =
        send(&app, "POST", &reviews_path, Some(&alice), Some(json!({"rating": 10}))).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "Request was throttled.");
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              crew                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[tokio::test]
async fn crew_credits() {
    let (app, state) = make_app();
    let admin = bootstrap_admin(&app, &state).await;
    let genre = make_genre(&app, &admin, "Sci-Fi").await;
    let movie = make_movie(&app, &admin, "Inception", &genre).await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/persons",
        Some(&admin),
        Some(json!({"name": "Leonardo DiCaprio", "bio": "Actor"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let person = body["id"].as_str().unwrap().to_owned();

    let crew_path = format!("/api/v1/movies/{}/crew", movie);
    let (status, body) = send(
        &app,
        "POST",
        &crew_path,
        Some(&admin),
        Some(json!({"person_id": person, "role": "actor", "character_name": "Cobb"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["name"], "Leonardo DiCaprio");
    assert_eq!(body["character_name"], "Cobb");

    // the same person in the same role again
    let (status, _) = send(
        &app,
        "POST",
        &crew_path,
        Some(&admin),
        Some(json!({"person_id": person, "role": "actor"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // but a different role is a different credit
    let (status, _) = send(
        &app,
        "POST",
        &crew_path,
        Some(&admin),
        Some(json!({"person_id": person, "role": "writer"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // credits ride along on the movie payload
    let (_, body) = send(&app, "GET", &format!("/api/v1/movies/{}", movie), None, None).await;
    assert_eq!(body["crew"].as_array().unwrap().len(), 2);

    // and crew names are searchable
    let (status, body) = send(&app, "GET", "/api/v1/movies?search=dicaprio", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["title"], "Inception");
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         cache behavior                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A [Backend] decorator that counts every delegated call; used to prove that cache hits
/// perform zero storage reads.
struct Counting {
    inner: Memory,
    calls: AtomicUsize,
}

impl Counting {
    fn new() -> Counting {
        Counting {
            inner: Memory::new(),
            calls: AtomicUsize::new(0),
        }
    }
}

/// Local newtype around [`Arc<Counting>`]; the orphan rule forbids implementing [Backend]
/// for `Arc<Counting>` directly from this crate.
struct CountingBackend(Arc<Counting>);

impl std::ops::Deref for CountingBackend {
    type Target = Counting;
    fn deref(&self) -> &Counting {
        &self.0
    }
}

#[async_trait]
impl Backend for CountingBackend {
    async fn add_user(&self, user: &User) -> storage::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.add_user(user).await
    }
    async fn user_for_email(&self, email: &UserEmail) -> storage::Result<Option<User>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.user_for_email(email).await
    }
    async fn user_by_id(&self, id: &UserId) -> storage::Result<Option<User>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.user_by_id(id).await
    }
    async fn add_genre(&self, genre: &Genre) -> storage::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.add_genre(genre).await
    }
    async fn get_genres(&self) -> storage::Result<Vec<Genre>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get_genres().await
    }
    async fn genre_by_id(&self, id: &GenreId) -> storage::Result<Option<Genre>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.genre_by_id(id).await
    }
    async fn add_person(&self, person: &Person) -> storage::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.add_person(person).await
    }
    async fn get_persons(&self, search: Option<&str>) -> storage::Result<Vec<Person>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get_persons(search).await
    }
    async fn person_by_id(&self, id: &PersonId) -> storage::Result<Option<Person>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.person_by_id(id).await
    }
    async fn add_movie(&self, movie: &Movie) -> storage::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.add_movie(movie).await
    }
    async fn movie_by_id(&self, id: &MovieId) -> storage::Result<Option<Movie>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.movie_by_id(id).await
    }
    async fn get_movies(&self, query: &MovieQuery) -> storage::Result<Vec<Movie>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get_movies(query).await
    }
    async fn update_movie(
        &self,
        id: &MovieId,
        title: String,
        description: String,
        release_date: NaiveDate,
        poster: Option<String>,
        video_file: Option<String>,
        genres: std::collections::HashSet<GenreId>,
    ) -> storage::Result<Movie> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner
            .update_movie(id, title, description, release_date, poster, video_file, genres)
            .await
    }
    async fn delete_movie(&self, id: &MovieId) -> storage::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_movie(id).await
    }
    async fn add_crew(&self, crew: &MovieCrew) -> storage::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.add_crew(crew).await
    }
    async fn crew_for_movie(&self, id: &MovieId) -> storage::Result<Vec<MovieCrew>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.crew_for_movie(id).await
    }
    async fn add_review(&self, review: &Review) -> storage::Result<MovieStats> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.add_review(review).await
    }
    async fn update_review(
        &self,
        id: &ReviewId,
        rating: Rating,
        comment: Option<String>,
    ) -> storage::Result<MovieStats> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.update_review(id, rating, comment).await
    }
    async fn delete_review(&self, id: &ReviewId) -> storage::Result<MovieStats> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_review(id).await
    }
    async fn review_by_id(&self, id: &ReviewId) -> storage::Result<Option<Review>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.review_by_id(id).await
    }
    async fn reviews_for_movie(&self, id: &MovieId) -> storage::Result<Vec<Review>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.reviews_for_movie(id).await
    }
}

#[tokio::test]
async fn cache_hits_perform_no_storage_reads() {
    let counting = Arc::new(Counting::new());
    let (app, state) = make_app_with_storage(Box::new(CountingBackend(counting.clone())));
    let admin = bootstrap_admin(&app, &state).await;
    let genre = make_genre(&app, &admin, "Sci-Fi").await;
    let movie = make_movie(&app, &admin, "Inception", &genre).await;

    // Prime both caches (anonymous, so authentication performs no lookups).
    let (_, list1) = send(&app, "GET", "/api/v1/movies", None, None).await;
    let (_, detail1) = send(&app, "GET", &format!("/api/v1/movies/{}", movie), None, None).await;

    // Cached reads touch storage not at all...
    let before = counting.calls.load(Ordering::SeqCst);
    let (_, list2) = send(&app, "GET", "/api/v1/movies", None, None).await;
    let (_, detail2) = send(&app, "GET", &format!("/api/v1/movies/{}", movie), None, None).await;
    assert_eq!(before, counting.calls.load(Ordering::SeqCst));
    assert_eq!(list1, list2);
    assert_eq!(detail1, detail2);

    // ...while a filtered read always hits storage.
    let before = counting.calls.load(Ordering::SeqCst);
    send(&app, "GET", "/api/v1/movies?genre=Sci-Fi", None, None).await;
    assert!(counting.calls.load(Ordering::SeqCst) > before);

    // "genres__name" is an accepted alias for the genre filter
    let (_, body) = send(&app, "GET", "/api/v1/movies?genres__name=Sci-Fi", None, None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["title"], "Inception");
    let (_, body) = send(&app, "GET", "/api/v1/movies?genres__name=Noir", None, None).await;
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn review_writes_invalidate_the_cache() {
    let (app, state) = make_app();
    let admin = bootstrap_admin(&app, &state).await;
    let genre = make_genre(&app, &admin, "Sci-Fi").await;
    let movie = make_movie(&app, &admin, "Inception", &genre).await;

    register(&app, "Alice", "alice@example.com", "a sufficiently long password").await;
    let alice = login(&app, "alice@example.com", "a sufficiently long password").await;

    // Prime both cache entries.
    send(&app, "GET", "/api/v1/movies", None, None).await;
    send(&app, "GET", &format!("/api/v1/movies/{}", movie), None, None).await;

    // A review lands...
    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/v1/movies/{}/reviews", movie),
        Some(&alice),
        Some(json!({"rating": 10})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // ...and the very next reads see the fresh aggregates.
    let (_, body) = send(&app, "GET", &format!("/api/v1/movies/{}", movie), None, None).await;
    assert_eq!(body["average_rating"], 10.0);
    assert_eq!(body["total_review_count"], 1);

    let (_, body) = send(&app, "GET", "/api/v1/movies", None, None).await;
    assert_eq!(body[0]["average_rating"], 10.0);
    assert_eq!(body[0]["total_review_count"], 1);
}

#[tokio::test]
async fn review_updates_invalidate_the_cache() {
    let (app, state) = make_app();
    let admin = bootstrap_admin(&app, &state).await;
    let genre = make_genre(&app, &admin, "Sci-Fi").await;
    let movie = make_movie(&app, &admin, "Inception", &genre).await;

    register(&app, "Alice", "alice@example.com", "a sufficiently long password").await;
    let alice = login(&app, "alice@example.com", "a sufficiently long password").await;

    let (_, body) = send(
        &app,
        "POST",
        &format!("/api/v1/movies/{}/reviews", movie),
        Some(&alice),
        Some(json!({"rating": 10})),
    )
    .await;
    let review = body["id"].as_str().unwrap().to_owned();

    // Prime both cache entries with the pre-update aggregates.
    let (_, body) = send(&app, "GET", &format!("/api/v1/movies/{}", movie), None, None).await;
    assert_eq!(body["average_rating"], 10.0);
    let (_, body) = send(&app, "GET", "/api/v1/movies", None, None).await;
    assert_eq!(body[0]["average_rating"], 10.0);

    // Alice re-rates...
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/api/v1/movies/{}/reviews/{}", movie, review),
        Some(&alice),
        Some(json!({"rating": 8})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // ...and the very next reads of both views carry the fresh average.
    let (_, body) = send(&app, "GET", &format!("/api/v1/movies/{}", movie), None, None).await;
    assert_eq!(body["average_rating"], 8.0);
    let (_, body) = send(&app, "GET", "/api/v1/movies", None, None).await;
    assert_eq!(body[0]["average_rating"], 8.0);
}

#[tokio::test]
async fn movie_updates_invalidate_the_cache() {
    let (app, state) = make_app();
    let admin = bootstrap_admin(&app, &state).await;
    let genre = make_genre(&app, &admin, "Sci-Fi").await;
    let movie = make_movie(&app, &admin, "Inception", &genre).await;

    send(&app, "GET", &format!("/api/v1/movies/{}", movie), None, None).await;

    let (status, _) = send(
        &app,
        "PUT",
        &format!("/api/v1/movies/{}", movie),
        Some(&admin),
        Some(json!({
            "title": "Inception (Director's Cut)",
            "description": "A mind-bending thriller",
            "release_date": "2010-07-16",
            "genre_ids": [genre],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app, "GET", &format!("/api/v1/movies/{}", movie), None, None).await;
    assert_eq!(body["title"], "Inception (Director's Cut)");

    // PATCH is an alias for PUT
    let (status, body) = send(
        &app,
        "PATCH",
        &format!("/api/v1/movies/{}", movie),
        Some(&admin),
        Some(json!({
            "title": "Inception",
            "description": "A mind-bending thriller",
            "release_date": "2010-07-16",
            "genre_ids": [genre],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Inception");
}
