//! SSH command channel built on libssh2.
//!
//! Nodes must already trust the control host: authentication uses the SSH
//! agent first and then the configured (or default) private key files. No
//! passwords are ever sent.

use super::{CommandOutput, RemoteExecutor};
use crate::config::RemoteConfig;
use crate::utils::errors::{BackupError, Result};
use async_trait::async_trait;
use std::io::{ErrorKind, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SshExecutor {
    user: String,
    port: u16,
    connect_timeout: Duration,
    identity_files: Vec<PathBuf>,
}

impl SshExecutor {
    pub fn new(remote: &RemoteConfig) -> Self {
        let identity_files = if remote.identity_files.is_empty() {
            default_identity_files()
        } else {
            remote.identity_files.clone()
        };
        Self {
            user: remote.user.clone(),
            port: remote.ssh_port,
            connect_timeout: Duration::from_secs(remote.connect_timeout_secs),
            identity_files,
        }
    }

    fn connect(&self, host: &str) -> Result<ssh2::Session> {
        let unreachable = |reason: String| BackupError::Unreachable(format!("{}: {}", host, reason));

        let addrs = (host, self.port)
            .to_socket_addrs()
            .map_err(|e| unreachable(format!("cannot resolve address: {}", e)))?;

        let mut last_error = String::from("no addresses");
        let mut tcp = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    tcp = Some(stream);
                    break;
                }
                Err(e) => last_error = e.to_string(),
            }
        }
        let tcp = tcp.ok_or_else(|| unreachable(last_error))?;

        let mut sess = ssh2::Session::new().map_err(|e| unreachable(e.to_string()))?;
        sess.set_tcp_stream(tcp);
        sess.set_timeout(self.connect_timeout.as_millis() as u32);
        sess.handshake()
            .map_err(|e| unreachable(format!("SSH handshake failed: {}", e)))?;

        if sess.userauth_agent(&self.user).is_err() || !sess.authenticated() {
            for key in &self.identity_files {
                if sess.userauth_pubkey_file(&self.user, None, key, None).is_ok() && sess.authenticated() {
                    break;
                }
            }
        }

        if !sess.authenticated() {
            return Err(unreachable(format!("SSH authentication failed for user {}", self.user)));
        }

        // Long-running commands (du over a DBRoot) must not hit the handshake timeout
        sess.set_timeout(0);
        Ok(sess)
    }

    fn exec_blocking(&self, host: &str, command: &str) -> Result<CommandOutput> {
        let sess = self.connect(host)?;
        let io_err = |e: ssh2::Error| BackupError::Io(e.into());

        let mut channel = sess.channel_session().map_err(io_err)?;
        channel.exec(command).map_err(io_err)?;

        // Both streams are drained together so neither fills the channel window
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        sess.set_blocking(false);
        {
            let mut out = channel.stream(0);
            let mut err = channel.stderr();
            loop {
                let read = read_ready(&mut out, &mut stdout)? + read_ready(&mut err, &mut stderr)?;
                if read == 0 {
                    if channel.eof() {
                        break;
                    }
                    std::thread::sleep(DRAIN_POLL);
                }
            }
        }
        sess.set_blocking(true);

        channel.wait_close().map_err(io_err)?;
        let status = channel.exit_status().map_err(io_err)?;

        Ok(CommandOutput {
            status,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, host: &str, command: &str) -> Result<CommandOutput> {
        tracing::debug!(host, command, "Remote exec");
        let this = self.clone();
        let host = host.to_string();
        let command = command.to_string();
        tokio::task::spawn_blocking(move || this.exec_blocking(&host, &command))
            .await
            .map_err(|e| BackupError::Io(e.into()))?
    }
}

const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Append whatever `stream` has ready to `sink`; returns the bytes read.
fn read_ready(stream: &mut impl Read, sink: &mut Vec<u8>) -> std::io::Result<usize> {
    let mut buf = [0u8; 16 * 1024];
    let mut total = 0;
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => {
                sink.extend_from_slice(&buf[..n]);
                total += n;
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(total),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

fn default_identity_files() -> Vec<PathBuf> {
    let Some(home) = std::env::var_os("HOME") else {
        return Vec::new();
    };
    let ssh_dir = PathBuf::from(home).join(".ssh");
    ["id_ed25519", "id_ecdsa", "id_rsa"]
        .iter()
        .map(|name| ssh_dir.join(name))
        .filter(|path| path.exists())
        .collect()
}
