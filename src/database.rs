use std::str::FromStr;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Row, SqlitePool,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("migrate error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("unknown auth mode: {0}")]
    UnknownAuthMode(String),
    #[error("missing credential for auth mode {0}")]
    MissingCredential(&'static str),
}

/// SSH credential for a node. The mode and its credential travel together,
/// so a password-mode row can never be read back without a password.
#[derive(Debug, Clone)]
pub enum NodeAuth {
    Password(String),
    KeyFile(String),
}

impl NodeAuth {
    pub fn from_parts(
        auth_type: &str,
        password: Option<String>,
        key_path: Option<String>,
    ) -> Result<Self> {
        match auth_type {
            "password" => password
                .map(Self::Password)
                .ok_or(DatabaseError::MissingCredential("password")),
            "key" => key_path
                .map(Self::KeyFile)
                .ok_or(DatabaseError::MissingCredential("key")),
            other => Err(DatabaseError::UnknownAuthMode(other.to_owned())),
        }
    }

    fn parts(&self) -> (&'static str, Option<&str>, Option<&str>) {
        match self {
            Self::Password(p) => ("password", Some(p), None),
            Self::KeyFile(p) => ("key", None, Some(p)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerNode {
    pub id: i64,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: NodeAuth,
    pub config_path: Option<String>,
    pub endpoint: Option<String>,
    pub public_key: Option<String>,
    pub active: bool,
}

pub struct NewServerNode {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: NodeAuth,
    pub config_path: Option<String>,
    pub endpoint: Option<String>,
    pub public_key: Option<String>,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

type Result<T> = std::result::Result<T, DatabaseError>;

impl Database {
    pub async fn new(connstr: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .connect_with(SqliteConnectOptions::from_str(connstr)?.create_if_missing(true))
            .await?;
        sqlx::migrate!().run(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn add_server(&self, node: &NewServerNode) -> Result<ServerNode> {
        let (auth_type, password, key_path) = node.auth.parts();

        let res = sqlx::query(
            "INSERT INTO servers(host, port, username, auth_type, password, key_path, config_path, endpoint, public_key, is_active)
            VALUES($1, $2, $3, $4, $5, $6, $7, $8, $9, 1)",
        )
        .bind(&node.host)
        .bind(node.port as i64)
        .bind(&node.username)
        .bind(auth_type)
        .bind(password)
        .bind(key_path)
        .bind(&node.config_path)
        .bind(&node.endpoint)
        .bind(&node.public_key)
        .execute(&self.pool)
        .await?;

        Ok(ServerNode {
            id: res.last_insert_rowid(),
            host: node.host.clone(),
            port: node.port,
            username: node.username.clone(),
            auth: node.auth.clone(),
            config_path: node.config_path.clone(),
            endpoint: node.endpoint.clone(),
            public_key: node.public_key.clone(),
            active: true,
        })
    }

    pub async fn server(&self, id: i64) -> Result<Option<ServerNode>> {
        let row = sqlx::query("SELECT * FROM servers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| Self::map_server(&r)).transpose()
    }

    pub async fn servers(&self) -> Result<Vec<ServerNode>> {
        sqlx::query("SELECT * FROM servers")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(Self::map_server)
            .collect()
    }

    pub async fn rm_server(&self, id: i64) -> Result<bool> {
        let res = sqlx::query("DELETE FROM servers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(res.rows_affected() > 0)
    }

    fn map_server(row: &SqliteRow) -> Result<ServerNode> {
        let auth_type: String = row.try_get("auth_type")?;
        let auth = NodeAuth::from_parts(
            &auth_type,
            row.try_get("password")?,
            row.try_get("key_path")?,
        )?;

        Ok(ServerNode {
            id: row.try_get("id")?,
            host: row.try_get("host")?,
            port: row.try_get::<i64, _>("port")? as u16,
            username: row.try_get("username")?,
            auth,
            config_path: row.try_get("config_path")?,
            endpoint: row.try_get("endpoint")?,
            public_key: row.try_get("public_key")?,
            active: row.try_get("is_active")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn mem_db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn add_and_fetch_roundtrip() {
        let db = mem_db().await;
        let node = db
            .add_server(&NewServerNode {
                host: "203.0.113.9".to_owned(),
                port: 2222,
                username: "root".to_owned(),
                auth: NodeAuth::Password("hunter2".to_owned()),
                config_path: None,
                endpoint: Some("203.0.113.9:51820".to_owned()),
                public_key: Some("srvpub=".to_owned()),
            })
            .await
            .unwrap();

        let got = db.server(node.id).await.unwrap().unwrap();
        assert_eq!(got.host, "203.0.113.9");
        assert_eq!(got.port, 2222);
        assert_eq!(got.endpoint.as_deref(), Some("203.0.113.9:51820"));
        assert_eq!(got.public_key.as_deref(), Some("srvpub="));
        assert!(got.active);
        assert!(matches!(got.auth, NodeAuth::Password(ref p) if p == "hunter2"));
    }

    #[tokio::test]
    async fn key_auth_maps_to_key_path_column() {
        let db = mem_db().await;
        let node = db
            .add_server(&NewServerNode {
                host: "node.example.net".to_owned(),
                port: 22,
                username: "ops".to_owned(),
                auth: NodeAuth::KeyFile("/etc/fleet/id_ed25519".to_owned()),
                config_path: Some("/etc/awg/wg0.conf".to_owned()),
                endpoint: None,
                public_key: None,
            })
            .await
            .unwrap();

        let got = db.server(node.id).await.unwrap().unwrap();
        assert!(matches!(got.auth, NodeAuth::KeyFile(ref p) if p == "/etc/fleet/id_ed25519"));
        assert_eq!(got.config_path.as_deref(), Some("/etc/awg/wg0.conf"));
        assert_eq!(got.endpoint, None);
    }

    #[tokio::test]
    async fn rm_server_reports_missing_rows() {
        let db = mem_db().await;
        assert!(!db.rm_server(42).await.unwrap());
    }

    #[test]
    fn auth_mode_rejects_unknown_and_incomplete() {
        assert!(matches!(
            NodeAuth::from_parts("agent", None, None),
            Err(DatabaseError::UnknownAuthMode(_))
        ));
        assert!(matches!(
            NodeAuth::from_parts("password", None, None),
            Err(DatabaseError::MissingCredential("password"))
        ));
    }
}
