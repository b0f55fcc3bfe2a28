/*
 * Copyright (C) 2020 Oakes, Gregory <gregoryoakes@fastmail.com>
 * Author: Oakes, Gregory <gregory.oakes@fastmail.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <http://www.gnu.org/licenses/>.
 */

use std::{fs, iter, sync::Arc};

use chrono::{DateTime, Duration, TimeZone, Utc};
use crypto::{digest::Digest, sha3::Sha3};
use jsonwebtoken::{
    decode as jwt_decode, encode as jwt_encode, errors::ErrorKind as JWTErrorKind, Algorithm,
    DecodingKey, EncodingKey, Header as JWTHeader, Validation,
};
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use warp::{
    http::StatusCode,
    reply::{json, with_status, Json, WithStatus},
    Filter, Rejection, Reply,
};

use crate::{guard, store::Store, user::User, util::Envelope, Error, JWTConfig};

/// Lifetime of an access token, in seconds.
pub const ACCESS_TOKEN_TTL: i64 = 2 * 60 * 60;
/// Lifetime of a refresh token, in seconds.
pub const REFRESH_TOKEN_TTL: i64 = 14 * 24 * 60 * 60;

const SALT_LEN: usize = 10;
const JTI_LEN: usize = 16;

pub fn api(
    store: Arc<dyn Store>,
    jwt_keys: Arc<JWTKeys>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let register = warp::path("register")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(guard::with_store(store.clone()))
        .and(guard::with_jwt_keys(jwt_keys.clone()))
        .and_then(register);

    let login = warp::path("login")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(guard::with_store(store.clone()))
        .and(guard::with_jwt_keys(jwt_keys.clone()))
        .and_then(login);

    let logout = warp::path("logout")
        .and(warp::path::end())
        .and(warp::post())
        .and(guard::authentic_user_header(store.clone(), jwt_keys.clone()))
        .and(guard::with_store(store.clone()))
        .and_then(logout);

    let refresh = warp::path!("token" / "refresh")
        .and(warp::post())
        .and(warp::body::json())
        .and(guard::with_store(store))
        .and(guard::with_jwt_keys(jwt_keys))
        .and_then(refresh);

    register.or(login).or(logout).or(refresh)
}

/// The keys used to sign and verify tokens.
pub struct JWTKeys {
    pub algorithm: Algorithm,
    pub encoder: EncodingKey,
    pub decoder: DecodingKey<'static>,
}

impl JWTKeys {
    pub fn from_secret(secret: &[u8]) -> Self {
        JWTKeys {
            algorithm: Algorithm::HS256,
            encoder: EncodingKey::from_secret(secret),
            decoder: DecodingKey::from_secret(secret).into_static(),
        }
    }

    /// Build keys from configuration, falling back to a random secret.
    pub fn new(config: Option<JWTConfig>) -> Result<Self, Error> {
        match config {
            Some(JWTConfig::Secret(secret)) => Ok(Self::from_secret(secret.as_bytes())),
            Some(JWTConfig::Rsa {
                private_key,
                public_key,
            }) => Ok(JWTKeys {
                algorithm: Algorithm::RS256,
                encoder: EncodingKey::from_rsa_pem(fs::read(private_key)?.as_ref())?,
                decoder: DecodingKey::from_rsa_pem(fs::read(public_key)?.as_ref())?.into_static(),
            }),
            None => {
                info!("no JWT key configured, tokens will not survive a restart");
                Ok(Self::from_secret(random_string(32).as_bytes()))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// The claims of a JWT bearer token.
///
/// `fam` is shared by every token descended from one login, refreshes
/// included. Revoking it ends the whole session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BearerToken {
    pub sub: i32,
    pub name: String,
    pub kind: TokenKind,
    pub jti: String,
    pub fam: String,
    pub iat: i64,
    pub exp: i64,
}

impl BearerToken {
    pub fn issue(user: &User, kind: TokenKind, fam: &str) -> Self {
        let now = Utc::now().timestamp();
        let ttl = match kind {
            TokenKind::Access => ACCESS_TOKEN_TTL,
            TokenKind::Refresh => REFRESH_TOKEN_TTL,
        };
        BearerToken {
            sub: user.id,
            name: user.name.clone(),
            kind,
            jti: random_string(JTI_LEN),
            fam: fam.to_string(),
            iat: now,
            exp: now + ttl,
        }
    }

    pub fn encode(&self, keys: &JWTKeys) -> Result<String, Error> {
        Ok(jwt_encode(
            &JWTHeader::new(keys.algorithm),
            self,
            &keys.encoder,
        )?)
    }

    pub fn verify_token(keys: &JWTKeys, raw: &str) -> Result<Self, Error> {
        let validation = Validation {
            leeway: 60,
            algorithms: vec![keys.algorithm],
            ..Default::default()
        };
        jwt_decode::<BearerToken>(raw, &keys.decoder, &validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                JWTErrorKind::ExpiredSignature => Error::TokenExpired,
                _ => Error::Unauthorized,
            })
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp(self.exp, 0)
    }

    /// Whether this token or its session has been revoked.
    pub async fn is_revoked(&self, store: &dyn Store) -> Result<bool, Error> {
        Ok(store.is_revoked(&self.jti).await? || store.is_revoked(&self.fam).await?)
    }
}

/// The input data type of a register or login request.
#[derive(Debug, Serialize, Deserialize)]
pub struct Login {
    pub name: String,
    pub password: String,
}

/// The response type of a register or login request.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResp {
    pub access_token: String,
    pub refresh_token: String,
    pub data: User,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshForm {
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    fn issue(user: &User, keys: &JWTKeys, fam: &str) -> Result<Self, Error> {
        Ok(TokenPair {
            access_token: BearerToken::issue(user, TokenKind::Access, fam).encode(keys)?,
            refresh_token: BearerToken::issue(user, TokenKind::Refresh, fam).encode(keys)?,
        })
    }
}

/// Start a new session for `user`.
fn login_resp(user: User, keys: &JWTKeys) -> Result<LoginResp, Error> {
    let TokenPair {
        access_token,
        refresh_token,
    } = TokenPair::issue(&user, keys, &random_string(JTI_LEN))?;
    Ok(LoginResp {
        access_token,
        refresh_token,
        data: user,
    })
}

pub async fn register(
    form: Login,
    store: Arc<dyn Store>,
    keys: Arc<JWTKeys>,
) -> Result<WithStatus<Json>, Rejection> {
    let name = form.name.trim();
    if name.is_empty() || name.chars().count() > 50 {
        return Err(Error::Validation("name must be 1 to 50 characters").into());
    }
    if form.password.is_empty() {
        return Err(Error::Validation("password is required").into());
    }

    let salt = random_string(SALT_LEN);
    let password_hash = secure_hash(&form.password, &salt);
    let user = store.create_user(name, &password_hash, &salt).await?;
    info!(user_id = user.id, "registered user");

    let resp = login_resp(user, &keys)?;
    Ok(with_status(json(&resp), StatusCode::CREATED))
}

pub async fn login(
    form: Login,
    store: Arc<dyn Store>,
    keys: Arc<JWTKeys>,
) -> Result<Json, Rejection> {
    let creds = store
        .find_credentials(form.name.trim())
        .await?
        .ok_or(Error::LoginFailed)?;
    if secure_hash(&form.password, &creds.salt) != creds.password_hash {
        debug!(user_id = creds.user_id, "password mismatch");
        return Err(Error::LoginFailed.into());
    }
    let user = store
        .find_user(creds.user_id)
        .await?
        .ok_or(Error::LoginFailed)?;
    info!(user_id = user.id, "user logged in");
    Ok(json(&login_resp(user, &keys)?))
}

pub async fn logout(tok: BearerToken, store: Arc<dyn Store>) -> Result<Json, Rejection> {
    // Refresh tokens of this session were all issued before now.
    let session_end = Utc::now() + Duration::seconds(REFRESH_TOKEN_TTL);
    store.revoke_token(&tok.fam, session_end).await?;
    store.revoke_token(&tok.jti, tok.expires_at()).await?;
    info!(user_id = tok.sub, "user logged out");
    Ok(json(&Envelope::ok("logged out", ())))
}

pub async fn refresh(
    form: RefreshForm,
    store: Arc<dyn Store>,
    keys: Arc<JWTKeys>,
) -> Result<Json, Rejection> {
    let tok = BearerToken::verify_token(&keys, &form.refresh_token)?;
    if tok.kind != TokenKind::Refresh || tok.is_revoked(&*store).await? {
        return Err(Error::Unauthorized.into());
    }
    let user = store.find_user(tok.sub).await?.ok_or(Error::Unauthorized)?;
    store.revoke_token(&tok.jti, tok.expires_at()).await?;
    debug!(user_id = user.id, "rotated refresh token");
    Ok(json(&TokenPair::issue(&user, &keys, &tok.fam)?))
}

pub fn secure_hash(password: &str, salt: &str) -> String {
    let mut hasher = Sha3::sha3_256();
    hasher.input_str(password);
    hasher.input_str(salt);
    hasher.result_str()
}

pub fn random_string(len: usize) -> String {
    let mut rng = thread_rng();
    iter::repeat(())
        .map(|()| rng.sample(Alphanumeric))
        .take(len)
        .collect::<String>()
}
