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

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::{board::Board, user::User, Error};

/// The stored login credentials of a user.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user_id: i32,
    pub password_hash: String,
    pub salt: String,
}

/// Persistence used by the HTTP handlers.
///
/// Boards are only ever inserted and read; ids are assigned by the backend in
/// strictly increasing order.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a new user. Fails with `Error::Conflict` when the name is taken.
    async fn create_user(&self, name: &str, password_hash: &str, salt: &str)
        -> Result<User, Error>;

    async fn find_credentials(&self, name: &str) -> Result<Option<Credentials>, Error>;

    /// Look up a user together with its number of boards.
    async fn find_user(&self, id: i32) -> Result<Option<User>, Error>;

    /// Boards ordered by descending id, joined with their owner's name.
    ///
    /// With `before` set only boards with a smaller id are returned.
    async fn boards_page(&self, before: Option<i32>, limit: i64) -> Result<Vec<Board>, Error>;

    async fn insert_board(&self, user_id: i32, content: &str, img: &str) -> Result<Board, Error>;

    /// Remember a token or session id as revoked until it would have expired anyway.
    async fn revoke_token(&self, jti: &str, expires_at: DateTime<Utc>) -> Result<(), Error>;

    async fn is_revoked(&self, jti: &str) -> Result<bool, Error>;
}

struct UserRow {
    id: i32,
    name: String,
    password_hash: String,
    salt: String,
}

struct BoardRow {
    id: i32,
    user_id: i32,
    content: String,
    img: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct Tables {
    users: Vec<UserRow>,
    boards: Vec<BoardRow>,
    revoked: HashMap<String, DateTime<Utc>>,
}

impl Tables {
    fn user(&self, id: i32) -> Option<User> {
        self.users.iter().find(|u| u.id == id).map(|u| User {
            id: u.id,
            name: u.name.clone(),
            boards_count: self.boards.iter().filter(|b| b.user_id == u.id).count() as i64,
        })
    }

    fn joined(&self, row: &BoardRow) -> Result<Board, Error> {
        let owner = self
            .users
            .iter()
            .find(|u| u.id == row.user_id)
            .ok_or(Error::NotFound)?;
        Ok(Board {
            id: row.id,
            content: row.content.clone(),
            img: row.img.clone(),
            user_id: row.user_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            name: owner.name.clone(),
        })
    }
}

/// A process-local store, used when no database is configured and in tests.
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            tables: Mutex::new(Tables::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(
        &self,
        name: &str,
        password_hash: &str,
        salt: &str,
    ) -> Result<User, Error> {
        let mut tables = self.tables.lock().await;
        if tables.users.iter().any(|u| u.name == name) {
            return Err(Error::Conflict);
        }
        let id = tables.users.len() as i32 + 1;
        tables.users.push(UserRow {
            id,
            name: name.to_string(),
            password_hash: password_hash.to_string(),
            salt: salt.to_string(),
        });
        tables.user(id).ok_or(Error::NotFound)
    }

    async fn find_credentials(&self, name: &str) -> Result<Option<Credentials>, Error> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .iter()
            .find(|u| u.name == name)
            .map(|u| Credentials {
                user_id: u.id,
                password_hash: u.password_hash.clone(),
                salt: u.salt.clone(),
            }))
    }

    async fn find_user(&self, id: i32) -> Result<Option<User>, Error> {
        Ok(self.tables.lock().await.user(id))
    }

    async fn boards_page(&self, before: Option<i32>, limit: i64) -> Result<Vec<Board>, Error> {
        let tables = self.tables.lock().await;
        // Rows are kept in insertion order, which is ascending id order.
        tables
            .boards
            .iter()
            .rev()
            .filter(|b| before.map_or(true, |cursor| b.id < cursor))
            .take(limit.max(0) as usize)
            .map(|b| tables.joined(b))
            .collect()
    }

    async fn insert_board(&self, user_id: i32, content: &str, img: &str) -> Result<Board, Error> {
        let mut tables = self.tables.lock().await;
        if !tables.users.iter().any(|u| u.id == user_id) {
            return Err(Error::NotFound);
        }
        let now = Utc::now();
        let row = BoardRow {
            id: tables.boards.len() as i32 + 1,
            user_id,
            content: content.to_string(),
            img: img.to_string(),
            created_at: now,
            updated_at: now,
        };
        let board = tables.joined(&row)?;
        tables.boards.push(row);
        Ok(board)
    }

    async fn revoke_token(&self, jti: &str, expires_at: DateTime<Utc>) -> Result<(), Error> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        tables.revoked.retain(|_, exp| *exp > now);
        tables.revoked.insert(jti.to_string(), expires_at);
        Ok(())
    }

    async fn is_revoked(&self, jti: &str) -> Result<bool, Error> {
        Ok(self.tables.lock().await.revoked.contains_key(jti))
    }
}
