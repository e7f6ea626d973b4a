//! SSH executor for running commands on fleet hosts.
//!
//! Key-based authentication only, using the russh library.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Config, Handle, Handler};
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::ssh_key::{HashAlg, PublicKey};
use russh::keys::PrivateKey;
use russh::{ChannelMsg, Disconnect};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::executor::{ExecRequest, RemoteExecutor, Target};

/// SSH port used for every host.
pub const SSH_PORT: u16 = 22;

/// How server host keys are checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Accept any host key without verification
    #[default]
    InsecureIgnore,
    /// Require the host key to be present in an OpenSSH known_hosts file
    KnownHosts(PathBuf),
}

/// Runs commands on hosts over SSH.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    username: String,
    host_key_policy: HostKeyPolicy,
}

impl SshExecutor {
    pub fn new(username: impl Into<String>, host_key_policy: HostKeyPolicy) -> Self {
        Self {
            username: username.into(),
            host_key_policy,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Connect, handshake and authenticate, all within `request.timeout`.
    async fn connect(&self, target: &Target, request: &ExecRequest) -> Result<Handle<SshHandler>> {
        if target.as_str().is_empty() {
            return Err(Error::ssh("Empty host address"));
        }

        let handler = SshHandler {
            host: target.as_str().to_string(),
            policy: self.host_key_policy.clone(),
        };
        let addr = (target.as_str(), SSH_PORT);

        debug!("Connecting to SSH at {}:{}", target, SSH_PORT);

        let timeout_result = tokio::time::timeout(request.timeout, async {
            let mut session = client::connect(Arc::new(Config::default()), addr, handler)
                .await
                .map_err(|e| Error::ssh(format!("Failed to connect: {}", e)))?;

            let key = load_key(&request.credential).await?;
            let hash_alg = key.algorithm().is_rsa().then_some(HashAlg::Sha256);
            let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg);

            let auth_result = session
                .authenticate_publickey(&self.username, key_with_hash)
                .await
                .map_err(|e| Error::ssh(format!("Key auth failed: {}", e)))?;

            if auth_result.success() {
                Ok(session)
            } else {
                Err(Error::ssh(format!(
                    "Authentication failed for user {}",
                    self.username
                )))
            }
        })
        .await;

        match timeout_result {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(format!(
                "SSH connection to {} after {:?}",
                target, request.timeout
            ))),
        }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(&self, target: &Target, request: &ExecRequest) -> Result<Vec<u8>> {
        let session = self.connect(target, request).await?;

        debug!("SSH exec on {}: {}", target, request.command);

        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| Error::ssh(format!("Failed to open channel: {}", e)))?;

        channel
            .exec(true, request.command.as_str())
            .await
            .map_err(|e| Error::ssh(format!("Failed to exec command: {}", e)))?;

        // Exit status may arrive after EOF, so read until the channel closes
        let mut msgs = Vec::new();
        while let Some(msg) = channel.wait().await {
            let closed = matches!(msg, ChannelMsg::Close);
            msgs.push(msg);
            if closed {
                break;
            }
        }

        if let Err(e) = session
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!("Failed to disconnect from {}: {}", target, e);
        }

        collect_output(msgs)
    }
}

/// Fold channel messages into the command's combined output.
///
/// stdout and stderr share one buffer in arrival order. Output is only
/// returned when the command exited with status 0.
fn collect_output(msgs: impl IntoIterator<Item = ChannelMsg>) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    let mut exit_status = None;
    let mut exit_signal = None;

    for msg in msgs {
        match msg {
            ChannelMsg::Data { data } => output.extend_from_slice(&data),
            ChannelMsg::ExtendedData { data, ext } => {
                if ext == 1 {
                    output.extend_from_slice(&data);
                }
            }
            ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
            ChannelMsg::ExitSignal { signal_name, .. } => {
                exit_signal = Some(format!("{:?}", signal_name));
            }
            ChannelMsg::Close => break,
            _ => {}
        }
    }

    if let Some(signal) = exit_signal {
        return Err(Error::Signal(signal));
    }

    match exit_status {
        Some(0) => Ok(output),
        Some(code) => Err(Error::ExitStatus(code)),
        None => Err(Error::ssh("Channel closed without exit status")),
    }
}

/// Client handler for russh.
struct SshHandler {
    host: String,
    policy: HostKeyPolicy,
}

impl Handler for SshHandler {
    type Error = russh::Error;

    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl std::future::Future<Output = std::result::Result<bool, Self::Error>> + Send {
        let verdict = verify_host_key(&self.host, server_public_key, &self.policy);
        async move { verdict }
    }
}

fn verify_host_key(
    host: &str,
    key: &PublicKey,
    policy: &HostKeyPolicy,
) -> std::result::Result<bool, russh::Error> {
    match policy {
        HostKeyPolicy::InsecureIgnore => Ok(true),
        HostKeyPolicy::KnownHosts(path) => {
            match russh::keys::check_known_hosts_path(host, SSH_PORT, key, path) {
                Ok(true) => Ok(true),
                Ok(false) => {
                    warn!("Host key for {} not found in {}", host, path.display());
                    Ok(false)
                }
                Err(e) => {
                    warn!("Host key check for {} failed: {}", host, e);
                    Err(e.into())
                }
            }
        }
    }
}

/// Load a private key from a file (OpenSSH or PEM encoding, unencrypted).
async fn load_key(path: &Path) -> Result<PrivateKey> {
    let key_data = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::ssh(format!("Failed to read key {}: {}", path.display(), e))
    })?;
    russh::keys::decode_secret_key(&key_data, None)
        .map_err(|e| Error::ssh(format!("Failed to parse key {}: {}", path.display(), e)))
}
