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

use std::{convert::Infallible, path::PathBuf, sync::Arc};

use warp::{Filter, Rejection};

use crate::{
    auth::{BearerToken, JWTKeys, TokenKind},
    store::Store,
    Error,
};

pub fn with_store(
    store: Arc<dyn Store>,
) -> impl Filter<Extract = (Arc<dyn Store>,), Error = Infallible> + Clone {
    warp::any().map(move || store.clone())
}

pub fn with_jwt_keys(
    keys: Arc<JWTKeys>,
) -> impl Filter<Extract = (Arc<JWTKeys>,), Error = Infallible> + Clone {
    warp::any().map(move || keys.clone())
}

pub fn with_data_dir(
    data_dir: PathBuf,
) -> impl Filter<Extract = (PathBuf,), Error = Infallible> + Clone {
    warp::any().map(move || data_dir.clone())
}

/// Require a valid, unrevoked access token in the `Authorization` header.
pub fn authentic_user_header(
    store: Arc<dyn Store>,
    keys: Arc<JWTKeys>,
) -> impl Filter<Extract = (BearerToken,), Error = Rejection> + Clone {
    warp::header::<String>("Authorization")
        .and_then(move |h: String| verify_access(h, store.clone(), keys.clone()))
}

async fn verify_access(
    header: String,
    store: Arc<dyn Store>,
    keys: Arc<JWTKeys>,
) -> Result<BearerToken, Rejection> {
    let raw = bearer_value(&header).ok_or(Error::Unauthorized)?;
    let tok = BearerToken::verify_token(&keys, raw)?;
    if tok.kind != TokenKind::Access || tok.is_revoked(&*store).await? {
        return Err(Rejection::from(Error::Unauthorized));
    }
    Ok(tok)
}

fn bearer_value(header: &str) -> Option<&str> {
    let mut parts = header.splitn(2, ' ');
    match (parts.next(), parts.next()) {
        (Some(scheme), Some(token)) if scheme.eq_ignore_ascii_case("bearer") => {
            let token = token.trim();
            if token.is_empty() {
                None
            } else {
                Some(token)
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::bearer_value;

    #[test]
    fn parses_bearer_scheme() {
        assert_eq!(bearer_value("Bearer abc.def"), Some("abc.def"));
        assert_eq!(bearer_value("bearer  abc "), Some("abc"));
        assert_eq!(bearer_value("Bearer "), None);
        assert_eq!(bearer_value("Basic abc"), None);
        assert_eq!(bearer_value("abc"), None);
    }
}
