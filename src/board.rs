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

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use futures::stream::TryStreamExt;
use mobc_postgres::tokio_postgres::row::Row;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};
use warp::{
    http::StatusCode,
    multipart::FormData,
    reply::{json, with_status, Json, WithStatus},
    Filter, Rejection, Reply,
};

use crate::{
    auth::{BearerToken, JWTKeys},
    guard,
    store::Store,
    util::{self, Envelope},
    Error,
};

/// Number of boards in one feed page.
pub const PAGE_LIMIT: i64 = 20;
/// Maximum number of characters in a board's content.
pub const CONTENT_MAX_CHARS: usize = 200;
/// Directory, relative to the data dir, holding uploaded images.
pub const IMG_DIR: &str = "img";

const UPLOAD_LIMIT: u64 = 5 * 1024 * 1024;

const IMAGE_TYPES: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/bmp", "bmp"),
    ("image/webp", "webp"),
    ("image/svg+xml", "svg"),
];

pub fn api(
    store: Arc<dyn Store>,
    jwt_keys: Arc<JWTKeys>,
    data_dir: PathBuf,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let list_boards = warp::path!("board" / i32 / "list")
        .and(warp::get())
        .and(guard::authentic_user_header(store.clone(), jwt_keys.clone()))
        .and(guard::with_store(store.clone()))
        .and_then(list_boards);

    let more_boards = warp::path!("board" / i32)
        .and(warp::get())
        .and(guard::authentic_user_header(store.clone(), jwt_keys.clone()))
        .and(guard::with_store(store.clone()))
        .and_then(more_boards);

    let create_board = warp::path("board")
        .and(warp::path::end())
        .and(warp::post())
        .and(guard::authentic_user_header(store.clone(), jwt_keys))
        .and(warp::multipart::form().max_length(UPLOAD_LIMIT))
        .and(guard::with_store(store))
        .and(guard::with_data_dir(data_dir))
        .and_then(create_board);

    list_boards.or(more_boards).or(create_board)
}

/// A board joined with its owner's display name.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub id: i32,
    pub content: String,
    pub img: String,
    pub user_id: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub name: String,
}

impl<'a> From<&'a Row> for Board {
    fn from(item: &'a Row) -> Self {
        Board {
            id: item.get("id"),
            content: item.get("content"),
            img: item.get("img"),
            user_id: item.get("user_id"),
            created_at: item.get("created_at"),
            updated_at: item.get("updated_at"),
            name: item.get("name"),
        }
    }
}

/// The newest page of the feed. The cursor in the path is not used.
pub async fn list_boards(
    _last_id: i32,
    tok: BearerToken,
    store: Arc<dyn Store>,
) -> Result<Json, Rejection> {
    let boards = store.boards_page(None, PAGE_LIMIT).await?;
    debug!(user_id = tok.sub, count = boards.len(), "listed boards");
    Ok(json(&Envelope::ok("boards loaded", boards)))
}

/// The page of boards older than `last_id`. An empty page ends the feed.
pub async fn more_boards(
    last_id: i32,
    tok: BearerToken,
    store: Arc<dyn Store>,
) -> Result<Json, Rejection> {
    let boards = store.boards_page(Some(last_id), PAGE_LIMIT).await?;
    debug!(
        user_id = tok.sub,
        last_id,
        count = boards.len(),
        "listed more boards"
    );
    Ok(json(&Envelope::ok("more boards loaded", boards)))
}

struct ImagePart {
    bytes: Vec<u8>,
    content_type: Option<String>,
}

#[derive(Default)]
struct BoardForm {
    content: Option<String>,
    img: Option<ImagePart>,
}

/// A validated board submission.
#[derive(Debug)]
struct NewBoard {
    content: String,
    img: Vec<u8>,
    extension: &'static str,
}

async fn decode_board_form(mut form_data: FormData) -> Result<BoardForm, Error> {
    let mut form: BoardForm = Default::default();
    while let Some(part) = form_data
        .try_next()
        .await
        .map_err(|_| Error::MalformedRequest)?
    {
        let name = part.name().to_string();
        match name.as_str() {
            "content" => {
                let bytes = util::stream_bytes(part.stream())
                    .await
                    .map_err(|_| Error::MalformedRequest)?;
                form.content =
                    Some(String::from_utf8(bytes).map_err(|_| Error::MalformedRequest)?);
            }
            "img" => {
                let content_type = part.content_type().map(str::to_string);
                let bytes = util::stream_bytes(part.stream())
                    .await
                    .map_err(|_| Error::MalformedRequest)?;
                form.img = Some(ImagePart {
                    bytes,
                    content_type,
                });
            }
            _ => (),
        }
    }
    Ok(form)
}

/// Leading bytes of the accepted binary image formats.
const SIGNATURES: &[(&[u8], &str)] = &[
    (b"\xFF\xD8\xFF", "image/jpeg"),
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"BM", "image/bmp"),
];

/// The MIME type of a part header, without parameters. `image/jpg` is taken
/// as `image/jpeg`.
fn mime_essence(content_type: &str) -> String {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "image/jpg" => "image/jpeg".to_string(),
        _ => essence,
    }
}

/// Detect the image type from the file content.
fn sniff_image(bytes: &[u8]) -> Option<&'static str> {
    if let Some(mime) = SIGNATURES
        .iter()
        .find(|(sig, _)| bytes.starts_with(sig))
        .map(|(_, mime)| *mime)
    {
        return Some(mime);
    }
    if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(1024)]).to_ascii_lowercase();
    let head = head.trim_start_matches('\u{feff}').trim_start();
    if head.starts_with('<') && head.contains("<svg") {
        return Some("image/svg+xml");
    }
    None
}

fn image_extension(mime: &str) -> Option<&'static str> {
    IMAGE_TYPES
        .iter()
        .find(|(known, _)| *known == mime)
        .map(|(_, ext)| *ext)
}

fn validate(form: BoardForm) -> Result<NewBoard, Error> {
    let content = form.content.unwrap_or_default().trim().to_string();
    let len = content.chars().count();
    if len == 0 {
        return Err(Error::Validation("content is required"));
    }
    if len > CONTENT_MAX_CHARS {
        return Err(Error::Validation("content is too long"));
    }
    let img = form.img.ok_or(Error::Validation("img is required"))?;
    if img.bytes.is_empty() {
        return Err(Error::Validation("img is required"));
    }
    let sniffed = sniff_image(&img.bytes).ok_or(Error::Validation("img must be an image"))?;
    let declared = img.content_type.as_deref().map(mime_essence);
    if declared.as_deref() != Some(sniffed) {
        return Err(Error::Validation("img type does not match its content"));
    }
    let extension =
        image_extension(sniffed).ok_or(Error::Validation("img must be an image"))?;
    Ok(NewBoard {
        content,
        img: img.bytes,
        extension,
    })
}

/// Write the image under `<data_dir>/img` and return its stored path.
async fn save_image(data_dir: &Path, board: &NewBoard) -> Result<String, Error> {
    let dir = data_dir.join(IMG_DIR);
    fs::create_dir_all(&dir).await?;
    let filename = format!("{}.{}", util::hash(board.img.as_slice()), board.extension);
    fs::write(dir.join(&filename), &board.img).await?;
    Ok(format!("{}/{}", IMG_DIR, filename))
}

pub async fn create_board(
    tok: BearerToken,
    form: FormData,
    store: Arc<dyn Store>,
    data_dir: PathBuf,
) -> Result<WithStatus<Json>, Rejection> {
    let new_board = match validate(decode_board_form(form).await?) {
        Ok(b) => b,
        Err(e) => {
            debug!(user_id = tok.sub, error = %e, "board rejected");
            return Err(e.into());
        }
    };
    let img = save_image(&data_dir, &new_board).await?;
    let board = store
        .insert_board(tok.sub, &new_board.content, &img)
        .await?;
    info!(user_id = tok.sub, board_id = board.id, "board created");

    Ok(with_status(
        json(&Envelope::ok("board created", board)),
        StatusCode::CREATED,
    ))
}
