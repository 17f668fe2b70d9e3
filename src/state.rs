use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::sync::Arc;

use crate::config::Config;
use crate::market::{Marketplace, SqliteMarketRepository};

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    pub market: Marketplace,
}

impl AppState {
    pub fn new(db: DbPool, config: Config) -> Self {
        let market = Marketplace::new(Arc::new(SqliteMarketRepository::new(db.clone())));
        Self { db, config, market }
    }
}
