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

//! # marquee Authentication Tokens
//!
//! marquee authenticates API requests with a pair of [JWT]s: a short-lived access token carried
//! in the `Authorization` header of each request, and a longer-lived refresh token that may be
//! exchanged for fresh access tokens at `/api/v1/token/refresh`. Both are HMAC-SHA256-signed
//! with a single server-side key; they are distinguished by audience (`api.{issuer}` versus
//! `refresh.{issuer}`), so one can never be presented in place of the other.
//!
//! [JWT]: https://www.rfc-editor.org/rfc/rfc7519.html

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use jwt::{Header, SignWithKey, Token, VerifyWithKey};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use snafu::{prelude::*, Backtrace};
use uuid::Uuid;

use crate::entities::UserId;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Token expired at {expires}"))]
    Expired {
        expires: DateTime<Utc>,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to create an HMAC: {source}"))]
    Hmac {
        source: hmac::digest::InvalidLength,
        backtrace: Backtrace,
    },
    #[snafu(display("Signing keys must be at least {MIN_KEY_LENGTH} bytes; got {length}"))]
    KeyTooShort { length: usize, backtrace: Backtrace },
    #[snafu(display("Invalid token: not before {not_before}"))]
    NotBefore {
        not_before: DateTime<Utc>,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to sign JWT claims: {source}"))]
    Signature {
        source: jwt::error::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Unknown token audience {audience}"))]
    UnknownAudience {
        audience: String,
        backtrace: Backtrace,
    },
    #[snafu(display("Unknown token issuer {issuer}"))]
    UnknownIssuer { issuer: String, backtrace: Backtrace },
    #[snafu(display("Verification failure: {source}"))]
    Verification {
        source: jwt::error::Error,
        backtrace: Backtrace,
    },
}

type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          signing key                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// HMAC-SHA256 is happiest with keys of at least the block size, but refuse anything below 32
/// bytes outright.
pub const MIN_KEY_LENGTH: usize = 32;

/// The server-side JWT signing key
pub struct SigningKey(secrecy::SecretBox<Vec<u8>>);

impl SigningKey {
    pub fn new(key: Vec<u8>) -> Result<SigningKey> {
        ensure!(
            key.len() >= MIN_KEY_LENGTH,
            KeyTooShortSnafu { length: key.len() }
        );
        Ok(SigningKey(secrecy::SecretBox::new(Box::new(key))))
    }
    fn mac(&self) -> Result<Hmac<Sha256>> {
        Hmac::new_from_slice(self.0.expose_secret()).context(HmacSnafu)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                  access & refresh tokens                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// marquee [JWT] [claims]
///
/// [claims]: https://pragmaticwebsecurity.com/articles/apisecurity/hard-parts-of-jwt.html
#[derive(Clone, Debug, Deserialize, Serialize)]
struct Claims {
    #[serde(rename = "iat")]
    issued_at: DateTime<Utc>,
    #[serde(rename = "iss")]
    issuer: String,
    #[serde(rename = "aud")]
    audience: String,
    #[serde(rename = "nbf")]
    not_before: DateTime<Utc>,
    #[serde(rename = "exp")]
    expires: DateTime<Utc>,
    #[serde(rename = "jti")]
    token_id: Uuid,
    #[serde(rename = "sub")]
    subject: UserId,
}

fn access_audience(issuer: &str) -> String {
    format!("api.{}", issuer)
}

fn refresh_audience(issuer: &str) -> String {
    format!("refresh.{}", issuer)
}

fn mint(user: UserId, key: &SigningKey, issuer: &str, audience: String, lifetime: &Duration) -> Result<String> {
    let now = Utc::now();
    let claims = Claims {
        issued_at: now,
        issuer: issuer.to_owned(),
        audience,
        not_before: now,
        expires: now + *lifetime,
        token_id: Uuid::new_v4(),
        subject: user,
    };
    Ok(Token::new(Header::default(), claims)
        .sign_with_key(&key.mac()?)
        .context(SignatureSnafu)?
        .as_str()
        .to_owned())
}

fn verify(token_string: &str, key: &SigningKey, issuer: &str, audience: String) -> Result<UserId> {
    let token: Token<Header, Claims, _> = token_string
        .verify_with_key(&key.mac()?)
        .context(VerificationSnafu)?;
    let claims = token.claims();

    let now = Utc::now();
    if now < claims.not_before {
        return NotBeforeSnafu {
            not_before: claims.not_before,
        }
        .fail();
    }
    if now > claims.expires {
        return ExpiredSnafu {
            expires: claims.expires,
        }
        .fail();
    }
    if issuer != claims.issuer {
        return UnknownIssuerSnafu {
            issuer: claims.issuer.clone(),
        }
        .fail();
    }
    if audience != claims.audience {
        return UnknownAudienceSnafu {
            audience: claims.audience.clone(),
        }
        .fail();
    }

    Ok(claims.subject)
}

/// Mint a new access token naming `user`, valid for `lifetime`
pub fn mint_access_token(
    user: UserId,
    key: &SigningKey,
    issuer: &str,
    lifetime: &Duration,
) -> Result<String> {
    mint(user, key, issuer, access_audience(issuer), lifetime)
}

/// Mint a new refresh token naming `user`, valid for `lifetime`
pub fn mint_refresh_token(
    user: UserId,
    key: &SigningKey,
    issuer: &str,
    lifetime: &Duration,
) -> Result<String> {
    mint(user, key, issuer, refresh_audience(issuer), lifetime)
}

/// Verify an access token & return the [UserId] it names
pub fn verify_access_token(token_string: &str, key: &SigningKey, issuer: &str) -> Result<UserId> {
    verify(token_string, key, issuer, access_audience(issuer))
}

/// Validate a refresh token; vend a new access token on success. Returns the [UserId] to which
/// the refresh token corresponds as a courtesy to the caller (for logging purposes, e.g.)
pub fn refresh_access_token(
    refresh_token_text: &str,
    key: &SigningKey,
    issuer: &str,
    lifetime: &Duration,
) -> Result<(String, UserId)> {
    let user = verify(refresh_token_text, key, issuer, refresh_audience(issuer))?;
    Ok((mint_access_token(user, key, issuer, lifetime)?, user))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SigningKey {
        // With apologies to J.R.R. Tolkein, but I needed 64 bytes exactly.
        SigningKey::new(
            b"All that is gold does not glitter-- Not all who wander are lost.".to_vec(),
        )
        .unwrap(/* known good */)
    }

    #[test]
    fn verify_minted_access_token() {
        let user = UserId::new();
        let key = key();

        let token = mint_access_token(user, &key, "marquee.example", &Duration::seconds(300))
            .unwrap(/* known good */);
        let verified = verify_access_token(&token, &key, "marquee.example");
        assert!(verified.is_ok());
        assert_eq!(user, verified.unwrap(/* known good */));
    }

    #[test]
    fn issuer_mismatch_fails() {
        let user = UserId::new();
        let key = key();
        let token = mint_access_token(user, &key, "marquee.example", &Duration::seconds(300))
            .unwrap(/* known good */);
        assert!(matches!(
            verify_access_token(&token, &key, "other.example"),
            Err(Error::UnknownIssuer { .. })
        ));
    }

    #[test]
    fn short_keys_are_rejected() {
        assert!(matches!(
            SigningKey::new(b"too short".to_vec()),
            Err(Error::KeyTooShort { .. })
        ));
    }

    #[test]
    fn refresh_flow() {
        let user = UserId::new();
        let key = key();

        let refresh = mint_refresh_token(user, &key, "marquee.example", &Duration::days(7))
            .unwrap(/* known good */);

        // A refresh token is not an access token.
        assert!(matches!(
            verify_access_token(&refresh, &key, "marquee.example"),
            Err(Error::UnknownAudience { .. })
        ));

        let (access, refreshed_user) =
            refresh_access_token(&refresh, &key, "marquee.example", &Duration::seconds(300))
                .unwrap(/* known good */);
        assert_eq!(user, refreshed_user);
        assert_eq!(
            user,
            verify_access_token(&access, &key, "marquee.example").unwrap(/* known good */)
        );

        // Nor is an access token a refresh token.
        assert!(matches!(
            refresh_access_token(&access, &key, "marquee.example", &Duration::seconds(300)),
            Err(Error::UnknownAudience { .. })
        ));
    }
}
