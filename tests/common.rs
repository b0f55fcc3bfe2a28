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

#![allow(dead_code)]

use std::{convert::Infallible, path::Path, sync::Arc};

use lazy_static::lazy_static;
use vuestagram::{
    app,
    auth::{Login, LoginResp},
    store::Store,
    ErrorResp, JWTConfig,
};
use warp::{Filter, Reply};

pub const BOUNDARY: &str = "------------------------0af30d233b54bac0";

lazy_static! {
    pub static ref PNG: Vec<u8> = {
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.extend_from_slice(b"not really a picture");
        bytes
    };
}

pub fn secret() -> String {
    "vuestagram-test-secret".to_string()
}

pub fn api(
    store: Arc<dyn Store>,
    data_dir: &Path,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone + 'static {
    app(
        store,
        Some(JWTConfig::Secret(secret())),
        data_dir.to_path_buf(),
    )
    .expect("app initialized")
}

pub async fn register<F>(api: &F, name: &str) -> LoginResp
where
    F: Filter + 'static,
    F::Extract: Reply + Send,
{
    let res = warp::test::request()
        .method("POST")
        .path("/api/register")
        .header("Content-Type", "application/json")
        .json(&Login {
            name: name.to_string(),
            password: "bar".to_string(),
        })
        .reply(api)
        .await;
    assert_eq!(res.status(), 201, "registration created new resource");
    serde_json::from_slice(res.body()).expect("register responds with valid data")
}

pub fn error_code(body: &[u8]) -> String {
    serde_json::from_slice::<ErrorResp>(body)
        .expect("error responses carry a code")
        .code
}

pub fn multipart_type() -> String {
    format!("multipart/form-data; boundary={}", BOUNDARY)
}

/// Encode a board submission the way a browser form would.
pub fn multipart_body(content: Option<&str>, img: Option<(&str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some(content) = content {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"content\"\r\n\r\n{}\r\n",
                BOUNDARY, content
            )
            .as_bytes(),
        );
    }
    if let Some((mime, bytes)) = img {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"img\"; filename=\"upload\"\r\nContent-Type: {}\r\n\r\n",
                BOUNDARY, mime
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}
