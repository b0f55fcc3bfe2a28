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

use std::{str::FromStr, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mobc::Connection;
use mobc_postgres::{
    tokio_postgres::{error::SqlState, Config, NoTls},
    PgConnectionManager,
};
use tracing::info;

use crate::{
    board::Board,
    store::{Credentials, Store},
    user::User,
    Error,
};

pub type Conn = Connection<PgConnectionManager<NoTls>>;
pub type Pool = mobc::Pool<PgConnectionManager<NoTls>>;

const DB_POOL_MAX_OPEN: u64 = 32;
const DB_POOL_MAX_IDLE: u64 = 8;
const DB_POOL_TIMEOUT_SECONDS: u64 = 15;

const BOARD_COLUMNS: &str = r#"
    boards.id, boards.content, boards.img, boards.user_id,
    boards.created_at, boards.updated_at, users.name
"#;

pub fn create_pool<'a>(db_url: &'a str) -> Result<Pool, Error> {
    let config = Config::from_str(db_url)?;

    let manager = PgConnectionManager::new(config, NoTls);
    Ok(mobc::Pool::builder()
        .max_open(DB_POOL_MAX_OPEN)
        .max_idle(DB_POOL_MAX_IDLE)
        .get_timeout(Some(Duration::from_secs(DB_POOL_TIMEOUT_SECONDS)))
        .build(manager))
}

pub async fn get_db_conn(db_pool: &Pool) -> Result<Conn, Error> {
    Ok(db_pool.get().await?)
}

pub async fn init_db(db_pool: &Pool) -> Result<(), Error> {
    let init_sql = include_str!("init.sql");
    let conn = get_db_conn(db_pool).await?;
    conn.batch_execute(init_sql).await.map_err(Error::DBError)?;
    Ok(())
}

pub async fn uninit_db(db_pool: &Pool) -> Result<(), Error> {
    let uninit_sql = include_str!("uninit.sql");
    let conn = get_db_conn(db_pool).await?;
    conn.batch_execute(uninit_sql)
        .await
        .map_err(Error::DBError)?;
    Ok(())
}

/// A `Store` backed by PostgreSQL.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Connect to `db_url` and make sure the schema exists.
    pub async fn connect(db_url: &str) -> Result<Self, Error> {
        let pool = create_pool(db_url)?;
        init_db(&pool).await?;
        info!("database schema ready");
        Ok(PgStore { pool })
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_user(
        &self,
        name: &str,
        password_hash: &str,
        salt: &str,
    ) -> Result<User, Error> {
        let conn = get_db_conn(&self.pool).await?;
        let row = conn
            .query_one(
                r#"
                INSERT INTO users (name, password_hash, salt)
                VALUES ($1, $2, $3)
                RETURNING id, name
                "#,
                &[&name, &password_hash, &salt],
            )
            .await
            .map_err(|e| match e.code() {
                Some(code) if *code == SqlState::UNIQUE_VIOLATION => Error::Conflict,
                _ => Error::DBError(e),
            })?;
        Ok(User {
            id: row.get("id"),
            name: row.get("name"),
            boards_count: 0,
        })
    }

    async fn find_credentials(&self, name: &str) -> Result<Option<Credentials>, Error> {
        let conn = get_db_conn(&self.pool).await?;
        let rows = conn
            .query(
                "SELECT id, password_hash, salt FROM users WHERE name = $1",
                &[&name],
            )
            .await?;
        Ok(rows.first().map(|row| Credentials {
            user_id: row.get("id"),
            password_hash: row.get("password_hash"),
            salt: row.get("salt"),
        }))
    }

    async fn find_user(&self, id: i32) -> Result<Option<User>, Error> {
        let conn = get_db_conn(&self.pool).await?;
        let rows = conn
            .query(
                r#"
                SELECT users.id, users.name, COUNT(boards.id) AS boards_count
                FROM users
                LEFT JOIN boards ON boards.user_id = users.id
                WHERE users.id = $1
                GROUP BY users.id
                "#,
                &[&id],
            )
            .await?;
        Ok(rows.first().map(User::from))
    }

    async fn boards_page(&self, before: Option<i32>, limit: i64) -> Result<Vec<Board>, Error> {
        let conn = get_db_conn(&self.pool).await?;
        let sql = format!(
            r#"
            SELECT {}
            FROM boards
            JOIN users ON users.id = boards.user_id
            WHERE ($1::INT4 IS NULL OR boards.id < $1)
            ORDER BY boards.id DESC
            LIMIT $2
            "#,
            BOARD_COLUMNS
        );
        Ok(conn
            .query(sql.as_str(), &[&before, &limit])
            .await?
            .iter()
            .map(Board::from)
            .collect())
    }

    async fn insert_board(&self, user_id: i32, content: &str, img: &str) -> Result<Board, Error> {
        let conn = get_db_conn(&self.pool).await?;
        let sql = format!(
            r#"
            WITH inserted AS (
                INSERT INTO boards (user_id, content, img)
                VALUES ($1, $2, $3)
                RETURNING *
            )
            SELECT {}
            FROM inserted AS boards
            JOIN users ON users.id = boards.user_id
            "#,
            BOARD_COLUMNS
        );
        let row = conn
            .query_one(sql.as_str(), &[&user_id, &content, &img])
            .await?;
        Ok(Board::from(&row))
    }

    async fn revoke_token(&self, jti: &str, expires_at: DateTime<Utc>) -> Result<(), Error> {
        let conn = get_db_conn(&self.pool).await?;
        conn.execute("DELETE FROM revoked_tokens WHERE expires_at < NOW()", &[])
            .await?;
        conn.execute(
            r#"
            INSERT INTO revoked_tokens (jti, expires_at)
            VALUES ($1, $2)
            ON CONFLICT (jti) DO NOTHING
            "#,
            &[&jti, &expires_at],
        )
        .await?;
        Ok(())
    }

    async fn is_revoked(&self, jti: &str) -> Result<bool, Error> {
        let conn = get_db_conn(&self.pool).await?;
        let rows = conn
            .query("SELECT 1 FROM revoked_tokens WHERE jti = $1", &[&jti])
            .await?;
        Ok(!rows.is_empty())
    }
}
