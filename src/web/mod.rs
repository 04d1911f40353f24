use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use once_cell::sync::OnceCell;
use salvo::prelude::*;
use tracing::info;

use crate::config::Config;
use crate::db::DatabaseManager;

pub mod handlers;
pub mod metrics;

use self::handlers::bindings::{create_binding, delete_binding, list_bindings};
use self::handlers::health::{get_status, health_check};
use self::metrics::metrics_endpoint;

#[derive(Clone)]
pub struct WebState {
    pub db_manager: Arc<DatabaseManager>,
    pub started_at: Instant,
}

static WEB_STATE: OnceCell<WebState> = OnceCell::new();

pub fn web_state() -> &'static WebState {
    WEB_STATE
        .get()
        .expect("web state is not initialized before handler execution")
}

pub fn create_router() -> Router {
    Router::new()
        .push(Router::with_path("health").get(health_check))
        .push(Router::with_path("status").get(get_status))
        .push(Router::with_path("metrics").get(metrics_endpoint))
        .push(
            Router::with_path("admin").push(
                Router::with_path("guilds/{guild_id}/bindings")
                    .get(list_bindings)
                    .post(create_binding)
                    .push(Router::with_path("{binding_id}").delete(delete_binding)),
            ),
        )
}

#[derive(Clone)]
pub struct WebServer {
    config: Arc<Config>,
}

impl WebServer {
    pub async fn new(config: Arc<Config>, db_manager: Arc<DatabaseManager>) -> Result<Self> {
        let _ = WEB_STATE.set(WebState {
            db_manager,
            started_at: Instant::now(),
        });

        Ok(Self { config })
    }

    pub async fn start(&self) -> Result<()> {
        let bind_addr = format!("{}:{}", self.config.web.bind_address, self.config.web.port);
        info!("starting web server on {}", bind_addr);

        let acceptor = TcpListener::new(bind_addr).bind().await;
        Server::new(acceptor).serve(create_router()).await;

        Ok(())
    }
}
