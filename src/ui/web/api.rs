use axum::{
    extract::{Extension, Path},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use clap::Parser;
use std::{net::SocketAddr, sync::Arc};

use super::response::*;
use crate::{
    database::NodeAuth,
    service::{NewServer, Provisioner},
};

async fn add_server(
    Json(payload): Json<AddServer>,
    Extension(service): Extension<Arc<Provisioner>>,
) -> impl IntoResponse {
    let auth = match NodeAuth::from_parts(&payload.auth_type, payload.password, payload.key_path) {
        Ok(auth) => auth,
        Err(e) => return Json(Err(e.to_string())),
    };

    Json(
        service
            .register_server(NewServer {
                host: payload.host,
                port: payload.port,
                username: payload.username,
                auth,
                config_path: payload.config_path,
            })
            .await
            .map(|node| AddServerResponse {
                id: node.id,
                public_key: node.public_key,
            })
            .map_err(|e| e.to_string()),
    )
}

async fn generate_key(
    Path(id): Path<i64>,
    Extension(service): Extension<Arc<Provisioner>>,
) -> impl IntoResponse {
    Json(
        service
            .generate_key(id)
            .await
            .map(|generated| GeneratedKeyResponse {
                key: generated.key,
                conf: generated.config,
            })
            .map_err(|e| e.to_string()),
    )
}

async fn list_servers(Extension(service): Extension<Arc<Provisioner>>) -> impl IntoResponse {
    Json(
        service
            .servers()
            .await
            .map(|nodes| {
                nodes
                    .into_iter()
                    .map(|node| ServerSummary {
                        id: node.id,
                        host: node.host,
                        endpoint: node.endpoint,
                        public_key: node.public_key,
                        active: node.active,
                    })
                    .collect::<Vec<_>>()
            })
            .map_err(|e| e.to_string()),
    )
}

async fn rm_server(
    Path(id): Path<i64>,
    Extension(service): Extension<Arc<Provisioner>>,
) -> impl IntoResponse {
    Json(service.remove_server(id).await.map_err(|e| e.to_string()))
}

#[derive(Debug, Parser)]
pub struct Config {
    #[clap(long, short, env = "LISTEN_ADDR", value_parser)]
    listen_addr: SocketAddr,
}

pub async fn start(
    config: Config,
    service: Provisioner,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = Router::new()
        .route("/admin/servers", get(list_servers))
        .route("/admin/server/add", post(add_server))
        .route("/admin/server/:id/generate-key", post(generate_key))
        .route("/admin/server/:id", delete(rm_server))
        .layer(Extension(Arc::new(service)));

    axum::Server::bind(&config.listen_addr)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}
