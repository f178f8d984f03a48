use std::{env, sync::Arc};

use log::{error, info};
use tallyboard_collab::{
    Collab, IdentityProvider, MemoryDatabase, MockIdentity, PgDatabase, SharedDatabase,
    WechatIdentity,
};
use tallyboard_server::run_server;

mod logging;

#[tokio::main]
async fn main() {
    logging::init_logger();

    let database: SharedDatabase = match env::var("DATABASE_URL") {
        Ok(url) => {
            info!("Connecting to database...");

            match PgDatabase::new(&url).await {
                Ok(db) => Arc::new(db),
                Err(e) => {
                    error!("Could not connect to database: {e}");
                    return;
                }
            }
        }
        Err(_) => {
            info!("DATABASE_URL not set, using in-memory storage");
            Arc::new(MemoryDatabase::new())
        }
    };

    let identity: Arc<dyn IdentityProvider> =
        match (env::var("WECHAT_APP_ID"), env::var("WECHAT_APP_SECRET")) {
            (Ok(app_id), Ok(app_secret)) => Arc::new(WechatIdentity::new(app_id, app_secret)),
            _ => {
                info!("WeChat credentials not set, using mock identity provider");
                Arc::new(MockIdentity)
            }
        };

    let collab = Arc::new(Collab::new(database, identity));

    run_server(collab).await
}
