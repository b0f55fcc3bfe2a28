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

use std::convert::Infallible;

use jsonwebtoken::errors::ErrorKind as JWTErrorKind;
use mobc_postgres::tokio_postgres::error::SqlState;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use warp::{http::StatusCode, reject, Rejection, Reply};

/// Application error codes sent in the `code` field of error responses.
pub mod code {
    pub const VALIDATION: &str = "E01";
    pub const LOGIN_FAILED: &str = "E02";
    pub const UNAUTHORIZED: &str = "E03";
    pub const TOKEN_EXPIRED: &str = "E04";
    pub const CONFLICT: &str = "E05";
    pub const NOT_FOUND: &str = "E06";
    pub const MALFORMED: &str = "E07";
    pub const INTERNAL: &str = "E99";
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    DBPoolError(#[from] mobc::Error<mobc_postgres::tokio_postgres::Error>),
    #[error(transparent)]
    DBError(#[from] mobc_postgres::tokio_postgres::Error),
    #[error("validation failed: {0}")]
    Validation(&'static str),
    #[error("login failed")]
    LoginFailed,
    #[error("unauthorized request")]
    Unauthorized,
    #[error("token expired")]
    TokenExpired,
    #[error("resource already exists")]
    Conflict,
    #[error("resource not found")]
    NotFound,
    #[error("malformed request")]
    MalformedRequest,
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    JWTError(#[from] jsonwebtoken::errors::Error),
    #[error(transparent)]
    IOError(#[from] std::io::Error),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::LoginFailed | Error::Unauthorized | Error::TokenExpired => {
                StatusCode::UNAUTHORIZED
            }
            Error::Conflict => StatusCode::CONFLICT,
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::MalformedRequest => StatusCode::BAD_REQUEST,
            Error::JWTError(e) => match e.kind() {
                JWTErrorKind::InvalidIssuer
                | JWTErrorKind::InvalidSignature
                | JWTErrorKind::ExpiredSignature => StatusCode::UNAUTHORIZED,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::DBError(e) => match e.code() {
                Some(code) if *code == SqlState::UNIQUE_VIOLATION => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => code::VALIDATION,
            Error::LoginFailed => code::LOGIN_FAILED,
            Error::Unauthorized => code::UNAUTHORIZED,
            Error::TokenExpired => code::TOKEN_EXPIRED,
            Error::Conflict => code::CONFLICT,
            Error::NotFound => code::NOT_FOUND,
            Error::MalformedRequest => code::MALFORMED,
            Error::JWTError(e) => match e.kind() {
                JWTErrorKind::ExpiredSignature => code::TOKEN_EXPIRED,
                JWTErrorKind::InvalidIssuer | JWTErrorKind::InvalidSignature => {
                    code::UNAUTHORIZED
                }
                _ => code::INTERNAL,
            },
            Error::DBError(_) if self.status() == StatusCode::CONFLICT => code::CONFLICT,
            _ => code::INTERNAL,
        }
    }
}

impl reject::Reject for Error {}

impl From<Error> for Rejection {
    fn from(item: Error) -> Rejection {
        reject::custom(item)
    }
}

/// The body of every non-2xx response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResp {
    pub code: String,
    pub msg: String,
}

pub async fn handle_rejects(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, code, msg) = if let Some(e) = err.find::<Error>() {
        if e.status() == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %e, "request failed");
        } else {
            debug!(error = %e, "request rejected");
        }
        (e.status(), e.code(), e.to_string())
    } else if let Some(h) = err.find::<warp::reject::MissingHeader>() {
        if h.name().eq_ignore_ascii_case("authorization") {
            (
                StatusCode::UNAUTHORIZED,
                code::UNAUTHORIZED,
                "missing bearer token".to_string(),
            )
        } else {
            (StatusCode::BAD_REQUEST, code::MALFORMED, h.to_string())
        }
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, code::MALFORMED, e.to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            code::VALIDATION,
            "payload too large".to_string(),
        )
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            code::MALFORMED,
            "unsupported media type".to_string(),
        )
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, code::NOT_FOUND, "not found".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            code::MALFORMED,
            "method not allowed".to_string(),
        )
    } else {
        error!(rejection = ?err, "unhandled rejection");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            code::INTERNAL,
            "internal error".to_string(),
        )
    };

    let body = ErrorResp {
        code: code.to_string(),
        msg,
    };
    Ok(warp::reply::with_status(warp::reply::json(&body), status))
}
