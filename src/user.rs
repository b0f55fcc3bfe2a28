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

use std::sync::Arc;

use mobc_postgres::tokio_postgres::row::Row;
use serde::{Deserialize, Serialize};
use tracing::debug;
use warp::{
    reply::{json, Json},
    Filter, Rejection, Reply,
};

use crate::{
    auth::{BearerToken, JWTKeys},
    guard,
    store::Store,
    util::Envelope,
    Error,
};

pub fn api(
    store: Arc<dyn Store>,
    jwt_keys: Arc<JWTKeys>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path("user")
        .and(warp::path::end())
        .and(warp::get())
        .and(guard::authentic_user_header(store.clone(), jwt_keys))
        .and(guard::with_store(store))
        .and_then(read_user)
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i32,
    pub name: String,
    pub boards_count: i64,
}

impl<'a> From<&'a Row> for User {
    fn from(item: &'a Row) -> Self {
        User {
            id: item.get("id"),
            name: item.get("name"),
            boards_count: item.get("boards_count"),
        }
    }
}

async fn read_user(tok: BearerToken, store: Arc<dyn Store>) -> Result<Json, Rejection> {
    debug!(user_id = tok.sub, "reading user profile");
    let user = store.find_user(tok.sub).await?.ok_or(Error::NotFound)?;
    Ok(json(&Envelope::ok("user loaded", user)))
}
