use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("connection to {host}:{port} failed: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: russh::Error,
    },
    #[error("connection to {host}:{port} timed out")]
    Timeout { host: String, port: u16 },
    #[error("authentication rejected for user {user}")]
    Auth { user: String },
    #[error("remote command exited with status {status}: {stderr}")]
    Command { status: u32, stderr: String },
    #[error("ssh key error: {0}")]
    Key(#[from] russh_keys::Error),
    #[error(transparent)]
    Ssh(#[from] russh::Error),
}
