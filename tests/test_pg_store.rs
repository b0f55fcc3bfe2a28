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

//! Runs against a live PostgreSQL when `TEST_DATABASE_URL` is set, e.g. one
//! started with `pg_tmp`. Skipped otherwise.

use std::env;

use chrono::{Duration, Utc};
use vuestagram::{
    db::{uninit_db, PgStore},
    store::Store,
    Error,
};

async fn fresh_store() -> Option<PgStore> {
    let url = match env::var("TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("TEST_DATABASE_URL not set, skipping");
            return None;
        }
    };
    let store = PgStore::connect(&url).await.expect("database reachable");
    uninit_db(store.pool()).await.expect("schema dropped");
    Some(PgStore::connect(&url).await.expect("schema recreated"))
}

// One test so the tables are not reset under a concurrent one.
#[tokio::test]
async fn pg_store() {
    let store = match fresh_store().await {
        Some(store) => store,
        None => return,
    };

    // Users.
    let user = store.create_user("pg", "hash", "salt").await.unwrap();
    assert_eq!(user.boards_count, 0);
    match store.create_user("pg", "other", "salt").await {
        Err(Error::Conflict) => {}
        other => panic!("duplicate name accepted: {:?}", other.map(|u| u.id)),
    }
    let creds = store.find_credentials("pg").await.unwrap().expect("credentials");
    assert_eq!(creds.user_id, user.id);
    assert_eq!(creds.password_hash, "hash");
    assert!(store.find_credentials("nobody").await.unwrap().is_none());

    // Boards.
    let mut ids = Vec::new();
    for i in 0..25 {
        let board = store
            .insert_board(user.id, &format!("post {}", i), "img/x.png")
            .await
            .unwrap();
        assert_eq!(board.name, "pg", "new board is joined with its owner");
        assert_eq!(board.user_id, user.id);
        ids.push(board.id);
    }
    ids.reverse();

    let first = store.boards_page(None, 20).await.unwrap();
    assert_eq!(first.iter().map(|b| b.id).collect::<Vec<_>>(), ids[..20].to_vec());
    let rest = store.boards_page(Some(ids[19]), 20).await.unwrap();
    assert_eq!(rest.iter().map(|b| b.id).collect::<Vec<_>>(), ids[20..].to_vec());
    assert!(store.boards_page(Some(ids[24]), 20).await.unwrap().is_empty());

    let counted = store.find_user(user.id).await.unwrap().expect("user");
    assert_eq!(counted.boards_count, 25);
    assert!(store.find_user(user.id + 1000).await.unwrap().is_none());

    // Revocations.
    let later = Utc::now() + Duration::hours(1);
    assert!(!store.is_revoked("jti").await.unwrap());
    store.revoke_token("jti", later).await.unwrap();
    store.revoke_token("jti", later).await.unwrap();
    assert!(store.is_revoked("jti").await.unwrap());
}
