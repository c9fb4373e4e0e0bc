//! `Token` authorization: HS256-signed JWTs bound to a configured user's
//! password.
//!
//! A token carries the username (`sub`) and a SHA-256 hex digest of that
//! user's password (`pha`), so changing a password revokes every token issued
//! for it. With no users configured every request is accepted.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::settings::Settings;

pub const AUTH_SCHEME: &str = "Token";
pub const TOKEN_ISSUER: &str = "skiff";
const JWT_ALGORITHM: &str = "HS256";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing Authorization header")]
    MissingCredentials,
    #[error("invalid auth scheme {0:?}")]
    InvalidScheme(String),
    #[error("token decode error: {0}")]
    Malformed(String),
    #[error("token signature mismatch")]
    BadSignature,
    #[error("invalid user {0:?}")]
    InvalidUser(Option<String>),
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("no token secret configured")]
    MissingSecret,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pha: Option<String>,
    pub iat: i64,
    pub iss: String,
}

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

/// Check an `Authorization` header value and return the authenticated user.
///
/// Returns `None` when authentication is disabled.
pub fn authorize(settings: &Settings, header: Option<&str>) -> Result<Option<String>, AuthError> {
    if !settings.auth_enabled() {
        return Ok(None);
    }
    let header = header.ok_or(AuthError::MissingCredentials)?;
    let (scheme, token) = header.trim().split_once(' ').unwrap_or((header.trim(), ""));
    if !scheme.eq_ignore_ascii_case(AUTH_SCHEME) {
        return Err(AuthError::InvalidScheme(scheme.to_string()));
    }
    let claims = decode_token(secret(settings)?, token.trim())?;
    let expected = claims
        .sub
        .as_ref()
        .and_then(|username| settings.auth.get(username))
        .map(|password| password_hash(password));
    match (expected, claims.pha.as_deref()) {
        (Some(expected), Some(pha)) if constant_time_eq(expected.as_bytes(), pha.as_bytes()) => {
            Ok(claims.sub)
        }
        _ => Err(AuthError::InvalidUser(claims.sub)),
    }
}

/// Exchange credentials for a token. With authentication disabled an
/// anonymous token is issued; it stops working once users are configured.
pub fn issue_token(
    settings: &Settings,
    username: Option<&str>,
    password: Option<&str>,
) -> Result<String, AuthError> {
    let secret = secret(settings)?;
    if !settings.auth_enabled() {
        return encode_token(secret, &claims(None, None));
    }
    let username = username.ok_or(AuthError::InvalidCredentials)?;
    let stored = settings
        .auth
        .get(username)
        .ok_or(AuthError::InvalidCredentials)?;
    let given = password.unwrap_or_default();
    if !constant_time_eq(&Sha256::digest(stored), &Sha256::digest(given)) {
        return Err(AuthError::InvalidCredentials);
    }
    encode_token(
        secret,
        &claims(Some(username.to_string()), Some(password_hash(stored))),
    )
}

pub fn encode_token(secret: &str, claims: &Claims) -> Result<String, AuthError> {
    let header = Header {
        alg: JWT_ALGORITHM.to_string(),
        typ: "JWT".to_string(),
    };
    let signing_input = format!("{}.{}", encode_segment(&header)?, encode_segment(claims)?);
    let signature = mac(secret, &signing_input)?.finalize().into_bytes();
    Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)))
}

pub fn decode_token(secret: &str, token: &str) -> Result<Claims, AuthError> {
    let malformed = || AuthError::Malformed("expected three segments".into());
    let (signing_input, signature) = token.rsplit_once('.').ok_or_else(malformed)?;
    let (header, payload) = signing_input.split_once('.').ok_or_else(malformed)?;
    if payload.contains('.') {
        return Err(malformed());
    }
    let header: Header = decode_segment(header)?;
    if header.alg != JWT_ALGORITHM {
        return Err(AuthError::Malformed(format!("unsupported algorithm {}", header.alg)));
    }
    let signature = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|err| AuthError::Malformed(err.to_string()))?;
    mac(secret, signing_input)?
        .verify_slice(&signature)
        .map_err(|_| AuthError::BadSignature)?;
    decode_segment(payload)
}

/// Digest stored in the `pha` claim.
pub fn password_hash(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

fn claims(sub: Option<String>, pha: Option<String>) -> Claims {
    Claims {
        sub,
        pha,
        iat: OffsetDateTime::now_utc().unix_timestamp(),
        iss: TOKEN_ISSUER.to_string(),
    }
}

fn secret(settings: &Settings) -> Result<&str, AuthError> {
    settings
        .token_secret
        .as_deref()
        .filter(|secret| !secret.is_empty())
        .ok_or(AuthError::MissingSecret)
}

fn mac(secret: &str, input: &str) -> Result<HmacSha256, AuthError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::MissingSecret)?;
    mac.update(input.as_bytes());
    Ok(mac)
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String, AuthError> {
    let raw = serde_json::to_vec(value).map_err(|err| AuthError::Malformed(err.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(raw))
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T, AuthError> {
    let raw = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|err| AuthError::Malformed(err.to_string()))?;
    serde_json::from_slice(&raw).map_err(|err| AuthError::Malformed(err.to_string()))
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    left.len() == right.len()
        && left
            .iter()
            .zip(right)
            .fold(0_u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}
