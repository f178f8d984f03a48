mod auth;
mod context;
mod errors;
mod gateway;
mod rooms;
mod schemas;
mod serialized;
mod transactions;

use std::{
    env,
    net::{Ipv6Addr, SocketAddr},
    sync::Arc,
    thread,
};

use log::info;
use tallyboard_collab::Collab;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

pub use context::ServerContext;
use gateway::Gateway;

/// The default port the server will listen on.
pub const DEFAULT_PORT: u16 = 3000;

pub type Router = axum::Router<ServerContext>;

/// Starts the tallyboard server
pub async fn run_server(collab: Arc<Collab>) {
    let port = env::var("TALLYBOARD_SERVER_PORT")
        .map(|x| x.parse::<u16>().expect("Port must be a number"))
        .unwrap_or(DEFAULT_PORT);

    let addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, port).into();

    let gateway = Arc::new(Gateway::new());

    // Forward collab events into the gateway off the async runtime
    let events = collab.listen();
    let drain_gateway = gateway.clone();

    thread::spawn(move || {
        for event in events.iter() {
            drain_gateway.dispatch(event);
        }
    });

    let context = ServerContext { collab, gateway };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let version_one_router = Router::new()
        .nest("/auth", auth::router())
        .nest("/rooms", rooms::router())
        .nest("/transactions", transactions::router())
        .nest("/gateway", gateway::router());

    let root_router = Router::new()
        .nest("/v1", version_one_router)
        .layer(cors)
        .with_state(context);

    let listener = TcpListener::bind(&addr).await.expect("listens on address");

    info!("Listening on {addr}");

    axum::serve(listener, root_router.into_make_service())
        .await
        .expect("server runs");
}
