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
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::user::User;

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error(transparent)]
    IOError(#[from] io::Error),
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
}

/// What the client keeps across restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Saved {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user_info: Option<User>,
    #[serde(rename = "lastID")]
    pub last_id: Option<i32>,
}

/// Durable client storage.
pub trait Storage {
    fn load(&self) -> Result<Saved, StorageError>;
    fn save(&mut self, saved: &Saved) -> Result<(), StorageError>;
    fn clear(&mut self) -> Result<(), StorageError>;
}

/// Keeps the saved state in a JSON file, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        FileStorage { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for FileStorage {
    fn load(&self) -> Result<Saved, StorageError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Saved::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&mut self, saved: &Saved) -> Result<(), StorageError> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;
        let mut file = NamedTempFile::new_in(&parent)?;
        file.write_all(&serde_json::to_vec(saved)?)?;
        file.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Storage that lives as long as the client does.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    saved: Saved,
}

impl Storage for MemoryStorage {
    fn load(&self) -> Result<Saved, StorageError> {
        Ok(self.saved.clone())
    }

    fn save(&mut self, saved: &Saved) -> Result<(), StorageError> {
        self.saved = saved.clone();
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        self.saved = Saved::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn saved() -> Saved {
        Saved {
            access_token: Some("a".to_string()),
            refresh_token: Some("r".to_string()),
            user_info: Some(User {
                id: 1,
                name: "alice".to_string(),
                boards_count: 2,
            }),
            last_id: Some(40),
        }
    }

    #[test]
    fn file_storage_survives_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("client.json");

        let mut storage = FileStorage::new(&path);
        assert_eq!(storage.load().unwrap(), Saved::default());
        storage.save(&saved()).unwrap();

        let reopened = FileStorage::new(&path);
        assert_eq!(reopened.load().unwrap(), saved());

        storage.clear().unwrap();
        assert!(!path.exists());
        assert_eq!(reopened.load().unwrap(), Saved::default());
        storage.clear().unwrap();
    }

    #[test]
    fn saved_state_uses_client_keys() {
        let json = serde_json::to_value(saved()).unwrap();
        assert_eq!(json["accessToken"], "a");
        assert_eq!(json["refreshToken"], "r");
        assert_eq!(json["lastID"], 40);
        assert_eq!(json["userInfo"]["boards_count"], 2);
    }
}
