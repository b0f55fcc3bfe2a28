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

use warp::{Filter, Reply};

pub mod guard;

pub mod auth;
pub mod board;
pub mod user;

pub mod db;
pub mod store;

pub mod client;
pub mod storage;

pub mod config;
pub mod util;

mod error;
pub use config::{Config, JWTConfig};
pub use error::{code, handle_rejects, Error, ErrorResp};

use auth::JWTKeys;
use store::Store;

/// Compose the whole HTTP surface: the JSON API under `/api` and the stored
/// images under `/img`.
pub fn app(
    store: Arc<dyn Store>,
    jwt: Option<JWTConfig>,
    data_dir: PathBuf,
) -> Result<impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone, Error> {
    let jwt_keys = Arc::new(JWTKeys::new(jwt)?);

    let auth_api = auth::api(store.clone(), jwt_keys.clone());
    let user_api = user::api(store.clone(), jwt_keys.clone());
    let board_api = board::api(store, jwt_keys, data_dir.clone());

    let images = warp::path(board::IMG_DIR).and(warp::fs::dir(data_dir.join(board::IMG_DIR)));

    let route = warp::path("api")
        .and(auth_api.or(user_api).or(board_api))
        .or(images)
        .with(warp::filters::trace::request())
        .recover(handle_rejects);
    Ok(route)
}
