use serde::{Deserialize, Serialize};

fn default_ssh_port() -> u16 {
    22
}

#[derive(Deserialize)]
pub struct AddServer {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    pub auth_type: String,
    pub password: Option<String>,
    pub key_path: Option<String>,
    pub config_path: Option<String>,
}

#[derive(Serialize)]
pub struct AddServerResponse {
    pub id: i64,
    pub public_key: Option<String>,
}

#[derive(Serialize)]
pub struct GeneratedKeyResponse {
    pub key: String,
    pub conf: String,
}

#[derive(Serialize)]
pub struct ServerSummary {
    pub id: i64,
    pub host: String,
    pub endpoint: Option<String>,
    pub public_key: Option<String>,
    pub active: bool,
}
