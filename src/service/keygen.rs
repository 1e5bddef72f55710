use thiserror::Error;
use tracing::{instrument, warn};

use super::{ClientProfile, Provisioner, ServiceError};
use crate::{
    database::ServerNode,
    encode::encode_vpn_conf,
    remote::{CommandRunner, ExecError, RemoteCommands, SshExecutor},
    service::servers::extract_listen_port,
    template::{ClientConfig, ALLOWED_IPS},
};

#[derive(Debug, Error)]
pub enum KeygenError {
    #[error("private key generation failed: {0}")]
    PrivateKey(#[source] ExecError),
    #[error("client public key derivation failed: {0}")]
    PublicKey(#[source] ExecError),
    #[error("preshared key generation failed: {0}")]
    Psk(#[source] ExecError),
    #[error("node has no registered public key")]
    MissingServerKey,
    #[error("node has no registered endpoint")]
    MissingEndpoint,
    #[error("config read failed: {0}")]
    ReadConfig(#[source] ExecError),
    #[error("no ListenPort in the node's live config")]
    MissingListenPort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeygenState {
    Start,
    PrivateKeyGenerated,
    PublicKeyDerived,
    PskGenerated,
    Validated,
    Assembled,
    Failed,
}

/// Key material for one client, alive only for the request that produced
/// it. Only the rendered config and the encoded URI leave the workflow.
pub struct ClientKeyMaterial {
    pub private_key: String,
    pub public_key: String,
    pub preshared_key: String,
    pub address: String,
}

pub struct Assembled {
    pub config: ClientConfig,
    pub material: ClientKeyMaterial,
}

pub struct GeneratedKey {
    pub key: String,
    pub config: String,
}

/// The strictly sequential generation chain. Each step consumes the
/// previous step's output; the first failure stops the chain, no further
/// remote calls are issued and nothing partial escapes.
pub struct KeyPipeline<'a> {
    runner: &'a dyn CommandRunner,
    commands: &'a RemoteCommands,
    node: &'a ServerNode,
    config_path: &'a str,
    state: KeygenState,
}

impl<'a> KeyPipeline<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        commands: &'a RemoteCommands,
        node: &'a ServerNode,
        config_path: &'a str,
    ) -> Self {
        Self {
            runner,
            commands,
            node,
            config_path,
            state: KeygenState::Start,
        }
    }

    pub fn state(&self) -> KeygenState {
        self.state
    }

    pub async fn run(
        &mut self,
        address: String,
        profile: &ClientProfile,
    ) -> Result<Assembled, KeygenError> {
        match self.drive(address, profile).await {
            Ok(assembled) => Ok(assembled),
            Err(e) => {
                self.state = KeygenState::Failed;
                Err(e)
            }
        }
    }

    async fn drive(
        &mut self,
        address: String,
        profile: &ClientProfile,
    ) -> Result<Assembled, KeygenError> {
        let private_key = self
            .runner
            .run(&self.commands.generate_private_key())
            .await
            .map_err(KeygenError::PrivateKey)?;
        self.state = KeygenState::PrivateKeyGenerated;

        let public_key = self
            .runner
            .run(&self.commands.derive_public_key(&private_key))
            .await
            .map_err(KeygenError::PublicKey)?;
        self.state = KeygenState::PublicKeyDerived;

        let preshared_key = self
            .runner
            .run(&self.commands.generate_preshared_key())
            .await
            .map_err(KeygenError::Psk)?;
        self.state = KeygenState::PskGenerated;

        let server_key = self
            .node
            .public_key
            .as_deref()
            .ok_or(KeygenError::MissingServerKey)?;

        let conf = self
            .runner
            .run(&self.commands.read_config(self.config_path))
            .await
            .map_err(KeygenError::ReadConfig)?;
        let live_port = extract_listen_port(&conf).ok_or(KeygenError::MissingListenPort)?;

        let endpoint = self
            .node
            .endpoint
            .as_deref()
            .ok_or(KeygenError::MissingEndpoint)?;
        // The registered endpoint is authoritative; the live port read is a
        // liveness check. A mismatch is surfaced, never silently unified.
        if endpoint != format!("{}:{}", self.node.host, live_port) {
            warn!("live listen port {live_port} diverges from registered endpoint {endpoint}");
        }
        self.state = KeygenState::Validated;

        let material = ClientKeyMaterial {
            private_key,
            public_key,
            preshared_key,
            address,
        };
        let config = ClientConfig {
            address: material.address.clone(),
            dns: profile.dns.clone(),
            private_key: material.private_key.clone(),
            obfuscation: profile.obfuscation.clone(),
            server_public_key: server_key.to_owned(),
            preshared_key: material.preshared_key.clone(),
            allowed_ips: ALLOWED_IPS.to_owned(),
            endpoint: endpoint.to_owned(),
            keepalive: profile.keepalive,
        };
        self.state = KeygenState::Assembled;

        Ok(Assembled { config, material })
    }
}

impl Provisioner {
    #[instrument(skip(self))]
    pub async fn generate_key(&self, server_id: i64) -> Result<GeneratedKey, ServiceError> {
        let node = self.server(server_id).await?;

        let lock = self.node_lock(server_id).await;
        let _guard = lock.lock().await;

        let addr = self.lease_address(server_id).await?;
        let runner = SshExecutor::for_node(&node, self.connect_timeout);
        let config_path = self.node_config_path(&node).to_owned();

        let mut pipeline = KeyPipeline::new(&runner, &self.commands, &node, &config_path);
        let assembled = match pipeline.run(format!("{addr}/32"), &self.profile).await {
            Ok(assembled) => assembled,
            Err(e) => {
                self.release_address(server_id, addr).await;
                return Err(e.into());
            }
        };

        let conf = assembled.config.render();
        let key = match encode_vpn_conf(&conf, self.resolver.as_ref()).await {
            Ok(key) => key,
            Err(e) => {
                self.release_address(server_id, addr).await;
                return Err(e.into());
            }
        };

        Ok(GeneratedKey { key, config: conf })
    }
}
