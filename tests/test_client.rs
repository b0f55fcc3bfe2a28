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
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use vuestagram::{
    client::{ClientStore, Upload, FALLBACK_CODE},
    storage::{FileStorage, MemoryStorage, Saved, Storage},
    store::{MemoryStore, Store},
};
use warp::Filter;

mod common;

/// Serve the app on an ephemeral port, counting every request it answers.
fn serve(store: Arc<dyn Store>, data_dir: &Path) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let routes = common::api(store, data_dir).with(warp::log::custom(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    let (addr, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    (format!("http://{}", addr), hits)
}

fn png() -> Upload {
    Upload {
        file_name: "cat.png".to_string(),
        mime: "image/png".to_string(),
        bytes: common::PNG.clone(),
    }
}

#[tokio::test]
async fn login_feed_and_logout() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = Arc::new(MemoryStore::new());
    let (base_url, hits) = serve(store.clone(), dir.path());
    let storage_path = dir.path().join("client.json");

    let mut client = ClientStore::restore(base_url.as_str(), FileStorage::new(&storage_path))
        .expect("client restored");
    assert!(!client.is_authenticated());

    client.register("alice", "pw").await.expect("registered");
    client.logout().await.expect("logged out");
    client.login("alice", "pw").await.expect("logged in");

    // Tokens and profile are kept durably.
    let saved = FileStorage::new(&storage_path).load().expect("storage readable");
    assert!(saved.access_token.map_or(false, |t| !t.is_empty()));
    assert!(saved.refresh_token.map_or(false, |t| !t.is_empty()));
    assert_eq!(saved.user_info.as_ref().map(|u| u.name.as_str()), Some("alice"));
    assert!(client.is_authenticated());

    let user_id = client.user_info().expect("user info").id;
    for i in 0..30 {
        store
            .insert_board(user_id, &format!("post {}", i), "img/x.png")
            .await
            .expect("board inserted");
    }

    assert_eq!(client.load_board_list().await.expect("first page"), 20);
    assert_eq!(client.last_id(), 11);

    assert_eq!(client.load_more().await.expect("second page"), 10);
    assert_eq!(client.boards().len(), 30);
    assert_eq!(client.last_id(), 1);
    assert_eq!(client.storage().load().unwrap().last_id, Some(1));
    assert!(
        client.boards().windows(2).all(|w| w[0].id > w[1].id),
        "feed stays in descending id order"
    );

    // The empty page ends the feed.
    let before = hits.load(Ordering::SeqCst);
    assert_eq!(client.load_more().await.expect("empty page"), 0);
    assert_eq!(hits.load(Ordering::SeqCst), before + 1);
    assert!(client.no_more_boards());
    assert_eq!(client.last_id(), 0);
    assert_eq!(client.storage().load().unwrap().last_id, None);
    assert_eq!(client.boards().len(), 30, "exhausting the feed keeps it");

    // No further requests once exhausted.
    assert_eq!(client.load_more().await.expect("no request"), 0);
    assert_eq!(client.load_more().await.expect("no request"), 0);
    assert_eq!(hits.load(Ordering::SeqCst), before + 1);

    client.logout().await.expect("logged out");
    assert!(!client.is_authenticated());
    assert!(client.user_info().is_none());
    assert!(client.boards().is_empty());
    assert!(!storage_path.exists(), "durable state is gone");

    let restored = ClientStore::restore(base_url.as_str(), FileStorage::new(&storage_path))
        .expect("client restored");
    assert!(!restored.is_authenticated());
}

#[tokio::test]
async fn store_board_reloads_server_state() {
    let dir = tempfile::tempdir().expect("temp dir");
    let (base_url, _) = serve(Arc::new(MemoryStore::new()), dir.path());
    let mut client =
        ClientStore::restore(base_url, MemoryStorage::default()).expect("client restored");

    client.register("bob", "pw").await.expect("registered");
    assert_eq!(client.load_board_list().await.expect("empty feed"), 0);

    let board = client.store_board("hello", png()).await.expect("posted");
    assert_eq!(board.name, "bob");
    assert_eq!(client.boards().first().map(|b| b.id), Some(board.id));
    assert_eq!(client.user_info().map(|u| u.boards_count), Some(1));
    assert_eq!(
        client
            .storage()
            .load()
            .unwrap()
            .user_info
            .map(|u| u.boards_count),
        Some(1),
        "refreshed profile is persisted"
    );

    let second = client.store_board("again", png()).await.expect("posted");
    assert_eq!(client.boards().len(), 2);
    assert_eq!(client.boards()[0].id, second.id);
    assert_eq!(client.user_info().map(|u| u.boards_count), Some(2));

    // Rejected posts surface the validation code and change nothing.
    let err = client
        .store_board(&"x".repeat(201), png())
        .await
        .expect_err("too long");
    assert_eq!(err.code(), "E01");
    let mut text = png();
    text.mime = "text/plain".to_string();
    let err = client.store_board("text", text).await.expect_err("not an image");
    assert_eq!(err.code(), "E01");
    let mut disguised = png();
    disguised.bytes = b"plain text wearing a png name".to_vec();
    let err = client
        .store_board("disguised", disguised)
        .await
        .expect_err("content is not an image");
    assert_eq!(err.code(), "E01");
    let err = client.store_board("   ", png()).await.expect_err("blank content");
    assert_eq!(err.code(), "E01");
    assert_eq!(client.boards().len(), 2);
    assert_eq!(client.user_info().map(|u| u.boards_count), Some(2));
}

#[tokio::test]
async fn failures_carry_codes() {
    let dir = tempfile::tempdir().expect("temp dir");
    let (base_url, _) = serve(Arc::new(MemoryStore::new()), dir.path());

    let mut client = ClientStore::restore(base_url.as_str(), MemoryStorage::default())
        .expect("client restored");
    let err = client.login("ghost", "pw").await.expect_err("unknown user");
    assert_eq!(err.code(), "E02");
    assert!(!client.is_authenticated());
    assert_eq!(client.storage().load().unwrap(), Saved::default());

    let err = client.load_board_list().await.expect_err("not logged in");
    assert_eq!(err.code(), FALLBACK_CODE);

    // A stale token is refused by the server.
    let mut stale = MemoryStorage::default();
    stale
        .save(&Saved {
            access_token: Some("stale".to_string()),
            ..Default::default()
        })
        .unwrap();
    let mut client = ClientStore::restore(base_url.as_str(), stale).expect("client restored");
    assert!(client.is_authenticated());
    let err = client.load_more().await.expect_err("stale token");
    assert_eq!(err.code(), "E03");
    assert!(!client.no_more_boards(), "errors do not end the feed");

    // Logout still clears local state.
    let err = client.logout().await.expect_err("stale token");
    assert_eq!(err.code(), "E03");
    assert!(!client.is_authenticated());
    assert_eq!(client.storage().load().unwrap(), Saved::default());
}

#[tokio::test]
async fn refresh_replaces_tokens() {
    let dir = tempfile::tempdir().expect("temp dir");
    let (base_url, _) = serve(Arc::new(MemoryStore::new()), dir.path());
    let mut client =
        ClientStore::restore(base_url, MemoryStorage::default()).expect("client restored");
    client.register("carol", "pw").await.expect("registered");

    let before = client.storage().load().unwrap();
    client.refresh_tokens().await.expect("refreshed");
    let after = client.storage().load().unwrap();
    assert_ne!(before.access_token, after.access_token);
    assert_ne!(before.refresh_token, after.refresh_token);
    assert_eq!(after.user_info, before.user_info);

    client.refresh_user().await.expect("new access token works");
}
