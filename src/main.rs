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

use std::{process, sync::Arc};

use tracing::{error, info, warn};

use vuestagram::{app, db::PgStore, store::MemoryStore, store::Store, Config, Error};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(e) = run().await {
        error!(error = %e, "server failed");
        process::exit(1);
    }
}

async fn run() -> Result<(), Error> {
    let config = Config::from_env()?;

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => Arc::new(PgStore::connect(url).await?),
        None => {
            warn!("DATABASE_URL not set, boards are kept in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let routes = app(store, config.jwt, config.data_dir.clone())?;
    info!(
        addr = %config.bind_addr,
        data_dir = %config.data_dir.display(),
        "listening"
    );
    warp::serve(routes).run(config.bind_addr).await;
    Ok(())
}
