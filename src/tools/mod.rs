//! External Fabric tools
//!
//! Crypto material and the genesis block come from `cryptogen` and
//! `configtxgen`. Both sit behind traits so the controller only depends on
//! "generate material into this directory" and can be driven by mocks or by
//! an in-process generator instead of the binaries.

mod render;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::process::Command;
use tracing::{debug, info};

use crate::{Error, Result};

pub use render::{render_configtx, render_crypto_config, GENESIS_PROFILE, SYSTEM_CHANNEL};

/// Generates certificate and key material for every node of a network
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CryptoTool: Send + Sync {
    /// Generate a fresh crypto tree from `config` into `output`
    async fn generate(&self, config: &Path, output: &Path) -> Result<()>;

    /// Add material for nodes newly listed in `config` to the existing tree at `input`
    async fn extend(&self, config: &Path, input: &Path) -> Result<()>;
}

/// Produces channel configuration artifacts
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChannelTool: Send + Sync {
    /// Write the genesis block of `channel_id` using `profile` from the
    /// `configtx.yaml` found in `config_dir`
    async fn genesis_block(
        &self,
        config_dir: &Path,
        profile: &str,
        channel_id: &str,
        output: &Path,
    ) -> Result<()>;
}

/// `cryptogen` binary
#[derive(Clone, Debug)]
pub struct Cryptogen {
    binary: PathBuf,
}

impl Cryptogen {
    /// Use the binary at `binary` (or found on `PATH`)
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl CryptoTool for Cryptogen {
    async fn generate(&self, config: &Path, output: &Path) -> Result<()> {
        info!(output = %output.display(), "Generating crypto material");
        run_command(
            &self.binary,
            &[
                "generate".to_string(),
                format!("--config={}", config.display()),
                format!("--output={}", output.display()),
            ],
        )
        .await
        .map(drop)
    }

    async fn extend(&self, config: &Path, input: &Path) -> Result<()> {
        info!(input = %input.display(), "Extending crypto material");
        run_command(
            &self.binary,
            &[
                "extend".to_string(),
                format!("--config={}", config.display()),
                format!("--input={}", input.display()),
            ],
        )
        .await
        .map(drop)
    }
}

/// `configtxgen` binary
#[derive(Clone, Debug)]
pub struct Configtxgen {
    binary: PathBuf,
}

impl Configtxgen {
    /// Use the binary at `binary` (or found on `PATH`)
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl ChannelTool for Configtxgen {
    async fn genesis_block(
        &self,
        config_dir: &Path,
        profile: &str,
        channel_id: &str,
        output: &Path,
    ) -> Result<()> {
        info!(channel = %channel_id, output = %output.display(), "Generating genesis block");
        run_command(
            &self.binary,
            &[
                "-profile".to_string(),
                profile.to_string(),
                "-channelID".to_string(),
                channel_id.to_string(),
                "-outputBlock".to_string(),
                output.display().to_string(),
                "-configPath".to_string(),
                config_dir.display().to_string(),
            ],
        )
        .await
        .map(drop)
    }
}

/// Run a command to completion; a non-zero exit becomes
/// [`Error::ToolFailed`] carrying stdout and stderr
async fn run_command(cmd: &Path, args: &[String]) -> Result<String> {
    let command = format!("{} {}", cmd.display(), args.join(" "));
    debug!(command = %command, "Running external tool");

    let output = Command::new(cmd)
        .args(args)
        .output()
        .await
        .map_err(|e| Error::ToolFailed {
            command: command.clone(),
            output: e.to_string(),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::ToolFailed {
            command,
            output: format!("{stdout}{stderr}").trim().to_string(),
        });
    }
    Ok(stdout)
}
