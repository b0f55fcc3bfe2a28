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

//! The client half of the board: a state store that mirrors the server's feed
//! and keeps the login tokens in durable storage.

use reqwest::{
    multipart::{Form, Part},
    Response,
};
use serde::de::DeserializeOwned;
use tracing::{debug, debug_span, info, warn};
use tracing_futures::Instrument;

use crate::{
    auth::{Login, LoginResp, RefreshForm, TokenPair},
    board::Board,
    storage::{Storage, StorageError},
    user::User,
    util::Envelope,
    ErrorResp,
};

/// The code reported when the server did not provide one.
pub const FALLBACK_CODE: &str = "FE99";

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    HttpError(#[from] reqwest::Error),
    #[error("server responded with status {status}")]
    Api {
        status: u16,
        code: Option<String>,
        msg: Option<String>,
    },
    #[error("not logged in")]
    NotLoggedIn,
    #[error(transparent)]
    StorageError(#[from] StorageError),
}

impl ClientError {
    /// The application code to show the user.
    pub fn code(&self) -> &str {
        match self {
            ClientError::Api {
                code: Some(code), ..
            } if !code.is_empty() => code.as_str(),
            _ => FALLBACK_CODE,
        }
    }
}

/// An image to attach to a new board.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

async fn parse<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json::<T>().await?);
    }
    let body = resp.json::<ErrorResp>().await.ok();
    Err(ClientError::Api {
        status: status.as_u16(),
        code: body.as_ref().map(|b| b.code.clone()),
        msg: body.map(|b| b.msg),
    })
}

/// Client-side state: auth flag, user info and the board feed.
///
/// Every operation takes `&mut self`, so one store never has two requests for
/// the same feed in flight.
pub struct ClientStore<S> {
    http: reqwest::Client,
    base_url: String,
    storage: S,
    auth_flag: bool,
    user_info: Option<User>,
    board_list: Vec<Board>,
    last_id: i32,
    no_more: bool,
}

impl<S: Storage> ClientStore<S> {
    /// Rebuild the in-memory state from whatever `storage` holds.
    pub fn restore<U: Into<String>>(base_url: U, storage: S) -> Result<Self, ClientError> {
        let saved = storage.load()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(ClientStore {
            http: reqwest::Client::new(),
            base_url,
            auth_flag: saved.access_token.is_some(),
            user_info: saved.user_info,
            board_list: Vec::new(),
            last_id: saved.last_id.unwrap_or(0),
            no_more: false,
            storage,
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_flag
    }

    pub fn user_info(&self) -> Option<&User> {
        self.user_info.as_ref()
    }

    pub fn boards(&self) -> &[Board] {
        &self.board_list
    }

    pub fn last_id(&self) -> i32 {
        self.last_id
    }

    /// Whether the feed has been read to its end.
    pub fn no_more_boards(&self) -> bool {
        self.no_more
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    fn access_token(&self) -> Result<String, ClientError> {
        self.storage
            .load()?
            .access_token
            .ok_or(ClientError::NotLoggedIn)
    }

    fn set_last_id(&mut self, id: Option<i32>) -> Result<(), ClientError> {
        self.last_id = id.unwrap_or(0);
        let mut saved = self.storage.load()?;
        saved.last_id = id;
        self.storage.save(&saved)?;
        Ok(())
    }

    fn set_user_info(&mut self, user: User) -> Result<(), ClientError> {
        let mut saved = self.storage.load()?;
        saved.user_info = Some(user.clone());
        self.storage.save(&saved)?;
        self.user_info = Some(user);
        Ok(())
    }

    async fn authenticate(
        &mut self,
        path: &str,
        name: &str,
        password: &str,
    ) -> Result<(), ClientError> {
        let form = Login {
            name: name.to_string(),
            password: password.to_string(),
        };
        let resp = self
            .http
            .post(&self.url(path))
            .json(&form)
            .send()
            .instrument(debug_span!("authenticate", path, name))
            .await?;
        let login: LoginResp = parse(resp).await?;

        let mut saved = self.storage.load()?;
        saved.access_token = Some(login.access_token);
        saved.refresh_token = Some(login.refresh_token);
        saved.user_info = Some(login.data.clone());
        self.storage.save(&saved)?;

        self.auth_flag = true;
        self.user_info = Some(login.data);
        info!(name, "logged in");
        Ok(())
    }

    /// Log in and keep the issued tokens.
    pub async fn login(&mut self, name: &str, password: &str) -> Result<(), ClientError> {
        self.authenticate("login", name, password).await
    }

    /// Create an account and log straight into it.
    pub async fn register(&mut self, name: &str, password: &str) -> Result<(), ClientError> {
        self.authenticate("register", name, password).await
    }

    async fn send_logout(&self) -> Result<(), ClientError> {
        let token = self.access_token()?;
        let resp = self
            .http
            .post(&self.url("logout"))
            .bearer_auth(token)
            .send()
            .await?;
        parse::<Envelope<()>>(resp).await?;
        Ok(())
    }

    /// Log out. Local state is cleared even when the server call fails; the
    /// server's error is still returned.
    pub async fn logout(&mut self) -> Result<(), ClientError> {
        let result = self.send_logout().await;
        if let Err(e) = &result {
            warn!(code = e.code(), error = %e, "logout request failed");
        }

        self.storage.clear()?;
        self.auth_flag = false;
        self.user_info = None;
        self.board_list.clear();
        self.last_id = 0;
        self.no_more = false;
        result
    }

    /// Trade the stored refresh token for a new token pair.
    pub async fn refresh_tokens(&mut self) -> Result<(), ClientError> {
        let mut saved = self.storage.load()?;
        let refresh_token = saved.refresh_token.take().ok_or(ClientError::NotLoggedIn)?;
        let resp = self
            .http
            .post(&self.url("token/refresh"))
            .json(&RefreshForm { refresh_token })
            .send()
            .await?;
        let pair: TokenPair = parse(resp).await?;
        saved.access_token = Some(pair.access_token);
        saved.refresh_token = Some(pair.refresh_token);
        self.storage.save(&saved)?;
        debug!("tokens refreshed");
        Ok(())
    }

    /// Replace the feed with the newest page. Returns the page length.
    pub async fn load_board_list(&mut self) -> Result<usize, ClientError> {
        let token = self.access_token()?;
        let resp = self
            .http
            .get(&self.url(&format!("board/{}/list", self.last_id)))
            .bearer_auth(token)
            .send()
            .instrument(debug_span!("load_board_list"))
            .await?;
        let page: Envelope<Vec<Board>> = parse(resp).await?;

        self.board_list = page.data;
        self.no_more = false;
        if let Some(id) = self.board_list.last().map(|b| b.id) {
            self.set_last_id(Some(id))?;
        }
        Ok(self.board_list.len())
    }

    /// Append the next older page. Once the server returns an empty page the
    /// feed is marked exhausted and later calls return `Ok(0)` without a
    /// request.
    pub async fn load_more(&mut self) -> Result<usize, ClientError> {
        if self.no_more {
            debug!("feed exhausted, not requesting more");
            return Ok(0);
        }
        let token = self.access_token()?;
        let resp = self
            .http
            .get(&self.url(&format!("board/{}", self.last_id)))
            .bearer_auth(token)
            .send()
            .instrument(debug_span!("load_more", last_id = self.last_id))
            .await?;
        let page: Envelope<Vec<Board>> = parse(resp).await?;

        match page.data.last().map(|b| b.id) {
            Some(id) => {
                let count = page.data.len();
                self.board_list.extend(page.data);
                self.set_last_id(Some(id))?;
                Ok(count)
            }
            None => {
                self.no_more = true;
                self.set_last_id(None)?;
                Ok(0)
            }
        }
    }

    /// Reload the user profile from the server.
    pub async fn refresh_user(&mut self) -> Result<(), ClientError> {
        let token = self.access_token()?;
        let resp = self
            .http
            .get(&self.url("user"))
            .bearer_auth(token)
            .send()
            .await?;
        let user: Envelope<User> = parse(resp).await?;
        self.set_user_info(user.data)
    }

    /// Post a board, then re-read the feed and the profile so the local state
    /// matches the server.
    pub async fn store_board(&mut self, content: &str, img: Upload) -> Result<Board, ClientError> {
        let token = self.access_token()?;
        let part = Part::bytes(img.bytes)
            .file_name(img.file_name)
            .mime_str(&img.mime)?;
        let form = Form::new()
            .text("content", content.to_string())
            .part("img", part);
        let resp = self
            .http
            .post(&self.url("board"))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .instrument(debug_span!("store_board"))
            .await?;
        let created: Envelope<Board> = parse(resp).await?;
        info!(board_id = created.data.id, "board posted");

        self.load_board_list().await?;
        self.refresh_user().await?;
        Ok(created.data)
    }
}
