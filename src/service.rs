pub mod keygen;
pub mod servers;

use std::{collections::HashMap, net::Ipv4Addr, sync::Arc, time::Duration};

use cidr::Ipv4Cidr;
use clap::Parser;
use thiserror::Error;
use tokio::sync::Mutex;

pub use keygen::*;
pub use servers::*;

use crate::{
    database::{Database, DatabaseError, ServerNode},
    encode::{DnsResolver, EncodeError, Resolver},
    ipalloc::{clock_address, AllocMode, IpPool},
    remote::{ExecError, RemoteCommands},
    template::ObfuscationParams,
};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error("server not found")]
    NotFound,
    #[error("node unreachable: {0}")]
    Unreachable(#[source] ExecError),
    #[error(transparent)]
    Keygen(#[from] KeygenError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("client address pool exhausted")]
    IpPoolExhausted,
}

struct Shared {
    pool: IpPool,
    node_locks: HashMap<i64, Arc<Mutex<()>>>,
}

#[derive(Debug, Parser)]
pub struct Config {
    #[clap(long, env = "VPN_CONTAINER", value_parser, default_value = "amnezia-awg")]
    container: String,
    #[clap(
        long,
        env = "NODE_CONFIG_PATH",
        value_parser,
        default_value = "/opt/amnezia/awg/wg0.conf"
    )]
    node_config_path: String,
    #[clap(long, env = "CLIENT_SUBNET", value_parser, default_value = "10.8.1.0/24")]
    client_subnet: Ipv4Cidr,
    #[clap(long, env = "CLOCK_ALLOCATOR")]
    clock_allocator: bool,
    #[clap(long, env = "SSH_CONNECT_TIMEOUT", value_parser, default_value = "30")]
    connect_timeout: u64,
    #[clap(long, env = "CLIENT_DNS", value_parser, default_value = "1.1.1.1, 1.0.0.1")]
    client_dns: String,
    #[clap(long, env = "CLIENT_KEEPALIVE", value_parser, default_value = "25")]
    keepalive: u16,
}

/// Rendering knobs shared by every generated client config.
pub struct ClientProfile {
    pub dns: String,
    pub keepalive: u16,
    pub obfuscation: ObfuscationParams,
}

#[derive(Clone)]
pub struct Provisioner {
    registry: Database,

    shared: Arc<Mutex<Shared>>,

    commands: RemoteCommands,
    node_config_path: String,
    subnet: Ipv4Cidr,
    alloc: AllocMode,
    connect_timeout: Duration,
    profile: Arc<ClientProfile>,
    resolver: Arc<dyn Resolver>,
}

impl Provisioner {
    pub fn new(config: Config, db: Database) -> Self {
        let alloc = if config.clock_allocator {
            AllocMode::Clock
        } else {
            AllocMode::Pool
        };

        Self {
            registry: db,
            shared: Arc::new(Mutex::new(Shared {
                pool: IpPool::new(config.client_subnet),
                node_locks: HashMap::new(),
            })),
            commands: RemoteCommands::new(config.container),
            node_config_path: config.node_config_path,
            subnet: config.client_subnet,
            alloc,
            connect_timeout: Duration::from_secs(config.connect_timeout),
            profile: Arc::new(ClientProfile {
                dns: config.client_dns,
                keepalive: config.keepalive,
                obfuscation: ObfuscationParams::default(),
            }),
            resolver: Arc::new(DnsResolver),
        }
    }

    fn node_config_path<'a>(&'a self, node: &'a ServerNode) -> &'a str {
        node.config_path.as_deref().unwrap_or(&self.node_config_path)
    }

    // One guard per node id, held across a whole workflow so concurrent
    // requests cannot interleave remote commands on the same container.
    async fn node_lock(&self, id: i64) -> Arc<Mutex<()>> {
        self.shared
            .lock()
            .await
            .node_locks
            .entry(id)
            .or_default()
            .clone()
    }

    async fn lease_address(&self, node: i64) -> Result<Ipv4Addr, ServiceError> {
        match self.alloc {
            AllocMode::Clock => Ok(clock_address(&self.subnet)),
            AllocMode::Pool => self
                .shared
                .lock()
                .await
                .pool
                .lease(node)
                .map_err(|_| ServiceError::IpPoolExhausted),
        }
    }

    async fn release_address(&self, node: i64, addr: Ipv4Addr) {
        if let AllocMode::Pool = self.alloc {
            self.shared.lock().await.pool.release(node, addr);
        }
    }
}
