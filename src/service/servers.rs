use tracing::{info, instrument, warn};

use super::{Provisioner, ServiceError};
use crate::{
    database::{NewServerNode, NodeAuth, ServerNode},
    remote::{CommandRunner, ExecError, RemoteCommands, SshExecutor},
};

pub struct NewServer {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: NodeAuth,
    pub config_path: Option<String>,
}

pub(crate) struct Derived {
    pub endpoint: String,
    pub public_key: Option<String>,
}

// `Key = Value` lookup, anchored at the start of a line.
fn directive<'a>(conf: &'a str, key: &str) -> Option<&'a str> {
    for line in conf.lines() {
        let rest = match line.strip_prefix(key) {
            Some(rest) => rest,
            None => continue,
        };
        let rest = match rest.trim_start().strip_prefix('=') {
            Some(rest) => rest,
            None => continue,
        };
        let value = rest.trim();
        if !value.is_empty() {
            return Some(value);
        }
    }

    None
}

pub(crate) fn extract_private_key(conf: &str) -> Option<&str> {
    directive(conf, "PrivateKey")
}

pub(crate) fn extract_listen_port(conf: &str) -> Option<u16> {
    directive(conf, "ListenPort").and_then(|v| v.parse().ok())
}

/// Reads the node's live config and derives its public identity. The
/// initial read is the only fatal step; everything else degrades to
/// "absent".
pub(crate) async fn probe_node<R: CommandRunner + ?Sized>(
    runner: &R,
    commands: &RemoteCommands,
    host: &str,
    config_path: &str,
) -> Result<Derived, ExecError> {
    let conf = runner.run(&commands.read_config(config_path)).await?;

    let public_key = match extract_private_key(&conf) {
        Some(private_key) => match runner.run(&commands.derive_public_key(private_key)).await {
            Ok(key) => Some(key),
            Err(e) => {
                warn!("public key derivation failed, registering without one: {e}");
                None
            }
        },
        None => None,
    };

    let endpoint = match extract_listen_port(&conf) {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_owned(),
    };

    Ok(Derived {
        endpoint,
        public_key,
    })
}

impl Provisioner {
    #[instrument(skip(self, server), fields(host = %server.host))]
    pub async fn register_server(&self, server: NewServer) -> Result<ServerNode, ServiceError> {
        let runner = SshExecutor::new(
            server.host.clone(),
            server.port,
            server.username.clone(),
            server.auth.clone(),
            self.connect_timeout,
        );
        let config_path = server
            .config_path
            .as_deref()
            .unwrap_or(&self.node_config_path);

        let derived = probe_node(&runner, &self.commands, &server.host, config_path)
            .await
            .map_err(ServiceError::Unreachable)?;

        let node = self
            .registry
            .add_server(&NewServerNode {
                host: server.host,
                port: server.port,
                username: server.username,
                auth: server.auth,
                config_path: server.config_path,
                endpoint: Some(derived.endpoint),
                public_key: derived.public_key,
            })
            .await?;

        info!("registered node {} at {}", node.id, node.host);
        Ok(node)
    }

    #[instrument(skip(self))]
    pub async fn server(&self, id: i64) -> Result<ServerNode, ServiceError> {
        self.registry.server(id).await?.ok_or(ServiceError::NotFound)
    }

    #[instrument(skip(self))]
    pub async fn servers(&self) -> Result<Vec<ServerNode>, ServiceError> {
        Ok(self.registry.servers().await?)
    }

    #[instrument(skip(self))]
    pub async fn remove_server(&self, id: i64) -> Result<(), ServiceError> {
        if !self.registry.rm_server(id).await? {
            return Err(ServiceError::NotFound);
        }

        let mut shared = self.shared.lock().await;
        shared.pool.forget_node(id);
        shared.node_locks.remove(&id);
        Ok(())
    }
}
