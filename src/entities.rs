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

//! # marquee entities
//!
//! The domain types: refined newtypes for identifiers & user-supplied text, and the
//! User/Movie/Genre/Person/MovieCrew/Review records themselves. Each refined type validates in
//! its constructor and in `Deserialize`, so a handler holding one of these values never needs to
//! re-check it.

use std::{collections::HashSet, fmt::Display, ops::Deref, str::FromStr};

use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use chrono::{DateTime, NaiveDate, Utc};
use email_address::EmailAddress;
use lazy_static::lazy_static;
use password_hash::{rand_core::OsRng, PasswordHashString, SaltString};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use snafu::{prelude::*, Backtrace, IntoError};
use tap::Pipe;
use uuid::Uuid;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{email} is not a valid e-mail address"))]
    BadEmail { email: String, backtrace: Backtrace },
    #[snafu(display("{name} is not a valid genre name"))]
    BadGenreName { name: String, backtrace: Backtrace },
    #[snafu(display("Incorrect password"))]
    BadPassword { backtrace: Backtrace },
    #[snafu(display("Rating must be between 1 and 10; got {rating}"))]
    BadRating { rating: i64, backtrace: Backtrace },
    #[snafu(display("{text} is not a recognized crew role"))]
    BadRole { text: String, backtrace: Backtrace },
    #[snafu(display("{name} is not a valid display name"))]
    BadUsername { name: String, backtrace: Backtrace },
    CheckPassword {
        source: password_hash::errors::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to hash password: {source}"))]
    HashPassword {
        source: password_hash::errors::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Passwords may not be empty"))]
    PasswordEmpty { backtrace: Backtrace },
    #[snafu(display("Passwords may not begin or end in whitespace"))]
    PasswordWhitespace { backtrace: Backtrace },
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

fn mk_serde_de_err<'de, D: serde::Deserializer<'de>>(err: impl std::error::Error) -> D::Error {
    <D::Error as serde::de::Error>::custom(format!("{}", err))
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          Identifiers                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// define_id!
///
/// Declare a newtype struct wrapping [Uuid] to be used as an opaque identifier for one sort of
/// entity. All our identifiers are structurally the same, but I can't bring myself to use a single
/// type to identify users, movies and reviews alike; mixing them up should be a compile-time
/// error, not a 404.
macro_rules! define_id {
    ($type_name:ident) => {
        #[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
        #[serde(transparent)]
        pub struct $type_name(Uuid);
        impl $type_name {
            pub fn new() -> $type_name {
                $type_name(Uuid::new_v4())
            }
        }
        impl Default for $type_name {
            fn default() -> Self {
                Self::new()
            }
        }
        impl Display for $type_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0.as_hyphenated())
            }
        }
        impl FromStr for $type_name {
            type Err = uuid::Error;
            fn from_str(s: &str) -> StdResult<Self, Self::Err> {
                Ok($type_name(Uuid::parse_str(s)?))
            }
        }
    };
}

define_id!(UserId);
define_id!(MovieId);
define_id!(GenreId);
define_id!(PersonId);
define_id!(ReviewId);
define_id!(CrewId);

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Username                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

lazy_static! {
    // Display names may be arbitrary UTF-8 text, up to 255 characters, sans control characters.
    static ref USERNAME: Regex = Regex::new(r"^[^\p{Cc}]{1,255}$").unwrap(/* known good */);
}

fn check_username(s: &str) -> bool {
    USERNAME.is_match(s) && s.trim() == s
}

/// A refined type representing a marquee user's display name
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    pub fn new(name: &str) -> Result<Username> {
        check_username(name)
            .then_some(Username(name.to_owned()))
            .ok_or(
                BadUsernameSnafu {
                    name: name.to_owned(),
                }
                .build(),
            )
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        self.deref()
    }
}

impl Deref for Username {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// Implement `Deserialize` by hand to fail if the serialized value isn't a legit `Username`
impl<'de> Deserialize<'de> for Username {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        Username::try_from(s).map_err(mk_serde_de_err::<'de, D>)
    }
}

impl Display for Username {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Username {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Username::new(s)
    }
}

impl TryFrom<String> for Username {
    type Error = Error;

    fn try_from(name: String) -> std::result::Result<Self, Self::Error> {
        if check_username(&name) {
            Ok(Username(name))
        } else {
            BadUsernameSnafu { name }.fail()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           UserEmail                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A refined type representing an e-mail address; the login identity for marquee users
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct UserEmail(String);

impl UserEmail {
    pub fn new(email: &str) -> Result<UserEmail> {
        EmailAddress::is_valid(email)
            .then_some(UserEmail(email.to_string()))
            .context(BadEmailSnafu {
                email: email.to_string(),
            })
    }
}

impl AsRef<str> for UserEmail {
    fn as_ref(&self) -> &str {
        self.deref()
    }
}

impl Deref for UserEmail {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de> Deserialize<'de> for UserEmail {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        UserEmail::try_from(s).map_err(mk_serde_de_err::<'de, D>)
    }
}

impl Display for UserEmail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserEmail {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        UserEmail::new(s)
    }
}

impl TryFrom<String> for UserEmail {
    type Error = Error;

    fn try_from(email: String) -> std::result::Result<Self, Self::Error> {
        if EmailAddress::is_valid(&email) {
            Ok(UserEmail(email))
        } else {
            BadEmailSnafu { email }.fail()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Rating                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 10;

/// A refined type representing a review's rating: an integer in [1,10]
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Rating(u8);

impl Rating {
    pub fn new(rating: u8) -> Result<Rating> {
        ((MIN_RATING..=MAX_RATING).contains(&rating))
            .then_some(Rating(rating))
            .ok_or(
                BadRatingSnafu {
                    rating: rating as i64,
                }
                .build(),
            )
    }
    pub fn get(&self) -> u8 {
        self.0
    }
}

impl Display for Rating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Deserialize through i64 so an out-of-range request reports the offending value rather than a
// type error
impl<'de> Deserialize<'de> for Rating {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let n = <i64 as serde::Deserialize>::deserialize(deserializer)?;
        u8::try_from(n)
            .map_err(|_| BadRatingSnafu { rating: n }.build())
            .and_then(Rating::new)
            .map_err(mk_serde_de_err::<'de, D>)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           GenreName                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

const MAX_GENRE_NAME_LENGTH: usize = 100;

fn check_genre_name(s: &str) -> bool {
    !s.is_empty() && s.chars().count() <= MAX_GENRE_NAME_LENGTH && s.trim() == s
}

/// A refined type representing a genre's name; unique among genres
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct GenreName(String);

impl GenreName {
    pub fn new(name: &str) -> Result<GenreName> {
        check_genre_name(name)
            .then_some(GenreName(name.to_owned()))
            .ok_or(
                BadGenreNameSnafu {
                    name: name.to_owned(),
                }
                .build(),
            )
    }
}

impl AsRef<str> for GenreName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for GenreName {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        if check_genre_name(&s) {
            Ok(GenreName(s))
        } else {
            Err(mk_serde_de_err::<'de, D>(
                BadGenreNameSnafu { name: s }.build(),
            ))
        }
    }
}

impl Display for GenreName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GenreName {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        GenreName::new(s)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              Role                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A crew member's role on a movie
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Director,
    Actor,
    Writer,
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Role::Director => "director",
                Role::Actor => "actor",
                Role::Writer => "writer",
            }
        )
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "director" => Ok(Role::Director),
            "actor" => Ok(Role::Actor),
            "writer" => Ok(Role::Writer),
            text => BadRoleSnafu {
                text: text.to_owned(),
            }
            .fail(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              User                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A marquee user
///
/// The fields are private; a [User] can only be produced through [User::new] (which hashes the
/// password) or by the storage layer handing back what it was given. Passwords are never stored;
/// we keep an Argon2id hash of the salted password.
#[derive(Clone, Debug)]
pub struct User {
    id: UserId,
    name: Username,
    email: UserEmail,
    password_hash: PasswordHashString,
    is_admin: bool,
    created_at: DateTime<Utc>,
}

impl User {
    /// Create a new [User]
    ///
    /// This constructor will validate & hash the password, but will *not* check the e-mail
    /// address for uniqueness; that's the storage layer's job (it holds the authoritative
    /// constraint).
    pub fn new(
        name: &Username,
        email: &UserEmail,
        password: &SecretString,
        is_admin: bool,
    ) -> Result<User> {
        validate_password(password)?;
        let password_hash = User::hash_password(password)?;
        Ok(User {
            id: UserId::new(),
            name: name.clone(),
            email: email.clone(),
            password_hash,
            is_admin,
            created_at: Utc::now(),
        })
    }
    /// Validate a password against this user's stored hash
    pub fn check_password(&self, password: &SecretString) -> Result<()> {
        match Argon2::default().verify_password(
            password.expose_secret().as_bytes(),
            &self.password_hash.password_hash(),
        ) {
            Ok(_) => Ok(()),
            Err(password_hash::errors::Error::Password) => BadPasswordSnafu.fail(),
            Err(err) => Err(CheckPasswordSnafu.into_error(err)),
        }
    }
    pub fn created_at(&self) -> &DateTime<Utc> {
        &self.created_at
    }
    pub fn email(&self) -> &UserEmail {
        &self.email
    }
    pub fn id(&self) -> UserId {
        self.id
    }
    pub fn is_admin(&self) -> bool {
        self.is_admin
    }
    pub fn name(&self) -> &Username {
        &self.name
    }
    /// Salt & hash a password with Argon2id (default parameters: m=19456, t=2, p=1, per the
    /// OWASP password storage recommendations)
    fn hash_password(password: &SecretString) -> Result<PasswordHashString> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.expose_secret().as_bytes(), &salt)
            .context(HashPasswordSnafu)?
            .serialize()
            .pipe(Ok)
    }
}

fn validate_password(password: &SecretString) -> Result<()> {
    let exposed = password.expose_secret();
    ensure!(!exposed.is_empty(), PasswordEmptySnafu);
    ensure!(exposed.trim() == exposed, PasswordWhitespaceSnafu);
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        catalog entities                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A movie in the catalog
///
/// `average_rating` & `total_review_count` are derived from the movie's review set and are
/// recomputed by the storage layer on every review mutation; nothing else may write them.
#[derive(Clone, Debug)]
pub struct Movie {
    pub id: MovieId,
    pub title: String,
    pub description: String,
    pub release_date: NaiveDate,
    pub poster: Option<String>,
    pub video_file: Option<String>,
    pub genres: HashSet<GenreId>,
    pub average_rating: f64,
    pub total_review_count: u64,
    pub created_at: DateTime<Utc>,
}

impl Movie {
    /// Create a new [Movie] with an empty review set (average 0.0, count 0)
    pub fn new(
        title: String,
        description: String,
        release_date: NaiveDate,
        poster: Option<String>,
        video_file: Option<String>,
        genres: HashSet<GenreId>,
    ) -> Movie {
        Movie {
            id: MovieId::new(),
            title,
            description,
            release_date,
            poster,
            video_file,
            genres,
            average_rating: 0.0,
            total_review_count: 0,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Genre {
    pub id: GenreId,
    pub name: GenreName,
}

impl Genre {
    pub fn new(name: GenreName) -> Genre {
        Genre {
            id: GenreId::new(),
            name,
        }
    }
}

/// An actor, director, or writer
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Person {
    pub id: PersonId,
    pub name: String,
    pub photo: Option<String>,
    pub bio: Option<String>,
}

impl Person {
    pub fn new(name: String, photo: Option<String>, bio: Option<String>) -> Person {
        Person {
            id: PersonId::new(),
            name,
            photo,
            bio,
        }
    }
}

/// A (movie, person, role) credit; at most one per triple
///
/// `character_name` only makes sense for actors ("Iron Man"), but we don't enforce that; the
/// original catalog data has a few directors credited with cameo characters.
#[derive(Clone, Debug)]
pub struct MovieCrew {
    pub id: CrewId,
    pub movie: MovieId,
    pub person: PersonId,
    pub role: Role,
    pub character_name: Option<String>,
}

impl MovieCrew {
    pub fn new(
        movie: MovieId,
        person: PersonId,
        role: Role,
        character_name: Option<String>,
    ) -> MovieCrew {
        MovieCrew {
            id: CrewId::new(),
            movie,
            person,
            role,
            character_name,
        }
    }
}

/// One user's review of one movie; at most one per (movie, user) pair
#[derive(Clone, Debug)]
pub struct Review {
    pub id: ReviewId,
    pub movie: MovieId,
    pub user: UserId,
    pub rating: Rating,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Review {
    pub fn new(movie: MovieId, user: UserId, rating: Rating, comment: Option<String>) -> Review {
        Review {
            id: ReviewId::new(),
            movie,
            user,
            rating,
            comment,
            created_at: Utc::now(),
        }
    }
}
