pub mod commands;
pub mod error;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use russh::{client, ChannelMsg, Disconnect};
use russh_keys::key;
use tracing::instrument;

pub use commands::RemoteCommands;
pub use error::ExecError;

use crate::database::{NodeAuth, ServerNode};

/// One remote invocation: a fresh authenticated session, exactly one
/// command, trimmed stdout back. Implemented over SSH in production and by
/// scripted fakes in tests.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str) -> Result<String, ExecError>;
}

pub struct SshExecutor {
    host: String,
    port: u16,
    username: String,
    auth: NodeAuth,
    connect_timeout: Duration,
}

struct AcceptingHandler;

#[async_trait]
impl client::Handler for AcceptingHandler {
    type Error = russh::Error;

    // Nodes are onboarded before any host key is known, so none is pinned.
    async fn check_server_key(
        &mut self,
        _server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

impl SshExecutor {
    pub fn new(
        host: String,
        port: u16,
        username: String,
        auth: NodeAuth,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            host,
            port,
            username,
            auth,
            connect_timeout,
        }
    }

    pub fn for_node(node: &ServerNode, connect_timeout: Duration) -> Self {
        Self::new(
            node.host.clone(),
            node.port,
            node.username.clone(),
            node.auth.clone(),
            connect_timeout,
        )
    }

    async fn session(&self) -> Result<client::Handle<AcceptingHandler>, ExecError> {
        let config = Arc::new(client::Config::default());
        let connect = client::connect(config, (self.host.as_str(), self.port), AcceptingHandler);

        let mut handle = match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                return Err(ExecError::Connect {
                    host: self.host.clone(),
                    port: self.port,
                    source: e,
                })
            }
            Err(_) => {
                return Err(ExecError::Timeout {
                    host: self.host.clone(),
                    port: self.port,
                })
            }
        };

        let authenticated = match &self.auth {
            NodeAuth::Password(password) => {
                handle
                    .authenticate_password(self.username.as_str(), password.as_str())
                    .await?
            }
            NodeAuth::KeyFile(path) => {
                let keypair = russh_keys::load_secret_key(path, None)?;
                handle
                    .authenticate_publickey(self.username.as_str(), Arc::new(keypair))
                    .await?
            }
        };
        if !authenticated {
            return Err(ExecError::Auth {
                user: self.username.clone(),
            });
        }

        Ok(handle)
    }
}

#[async_trait]
impl CommandRunner for SshExecutor {
    #[instrument(skip(self, command), fields(host = %self.host, port = self.port))]
    async fn run(&self, command: &str) -> Result<String, ExecError> {
        let mut session = self.session().await?;
        let mut channel = session.channel_open_session().await?;
        channel.exec(true, command).await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut status = 0u32;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status } => status = exit_status,
                _ => {}
            }
        }
        let _ = session
            .disconnect(Disconnect::ByApplication, "", "english")
            .await;

        // stderr output counts as failure even on a zero exit status
        if status != 0 || !stderr.is_empty() {
            return Err(ExecError::Command {
                status,
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            });
        }

        Ok(String::from_utf8_lossy(&stdout).trim().to_owned())
    }
}
