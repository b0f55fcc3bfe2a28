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

use std::{env, net::SocketAddr, path::PathBuf};

use crate::Error;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";
const APP_DIR: &str = "vuestagram";

/// How tokens are signed.
#[derive(Debug, Clone)]
pub enum JWTConfig {
    /// HS256 with a shared secret.
    Secret(String),
    /// RS256 with PEM encoded keys read from these paths.
    Rsa {
        private_key: PathBuf,
        public_key: PathBuf,
    },
}

/// Server configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres URL. Without one the server keeps everything in memory.
    pub database_url: Option<String>,
    pub bind_addr: SocketAddr,
    /// Root of the uploaded images.
    pub data_dir: PathBuf,
    pub jwt: Option<JWTConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr = lookup("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse()
            .map_err(|e| Error::Config(format!("BIND_ADDR: {}", e)))?;

        let data_dir = match lookup("DATA_DIR") {
            Some(d) => PathBuf::from(d),
            None => match (lookup("XDG_DATA_HOME"), lookup("HOME")) {
                (Some(parent), _) => PathBuf::from(parent).join(APP_DIR),
                (None, Some(home)) => PathBuf::from(home).join(".local/share").join(APP_DIR),
                (None, None) => {
                    return Err(Error::Config(
                        "one of DATA_DIR, XDG_DATA_HOME or HOME must be set".to_string(),
                    ))
                }
            },
        };

        let jwt = match lookup("JWT_SECRET") {
            Some(secret) if !secret.is_empty() => Some(JWTConfig::Secret(secret)),
            _ => match (lookup("JWT_PRIVATE_KEY"), lookup("JWT_PUBLIC_KEY")) {
                (Some(private), Some(public)) => Some(JWTConfig::Rsa {
                    private_key: PathBuf::from(private),
                    public_key: PathBuf::from(public),
                }),
                (None, None) => None,
                _ => {
                    return Err(Error::Config(
                        "JWT_PRIVATE_KEY and JWT_PUBLIC_KEY must be set together".to_string(),
                    ))
                }
            },
        };

        Ok(Config {
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            bind_addr,
            data_dir,
            jwt,
        })
    }
}
