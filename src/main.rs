//! fabnet - Fabric test network lifecycle on Kubernetes

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fabnet::config::{ArtifactLayout, LauncherSettings};
use fabnet::controller::{Action, Backends, Launcher};
use fabnet::network::NetworkSpec;
use fabnet::Error;

/// Launch, probe, extend or tear down a Hyperledger Fabric network on Kubernetes
#[derive(Parser, Debug)]
#[command(name = "fabnet", version, about, long_about = None)]
struct Cli {
    /// Path to the network specification YAML
    #[arg(short = 'i', long = "input")]
    spec: PathBuf,

    /// Kubeconfig of the target cluster
    #[arg(short = 'k', long = "kubeconfig", env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Lifecycle action
    #[arg(short = 'a', long = "action", value_enum, default_value_t = Action::Up)]
    action: Action,

    /// cryptogen binary
    #[arg(long, env = "CRYPTOGEN", default_value = "cryptogen")]
    cryptogen: PathBuf,

    /// configtxgen binary
    #[arg(long, env = "CONFIGTXGEN", default_value = "configtxgen")]
    configtxgen: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let action = cli.action;

    if let Err(e) = run(cli).await {
        error!(action = %action, error = %e, "Action failed");
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> fabnet::Result<()> {
    let kubeconfig = cli.kubeconfig.ok_or_else(|| {
        Error::config(
            "no kubeconfig given via -k or KUBECONFIG; the local container backend is not provided by this binary",
        )
    })?;

    let spec = NetworkSpec::load(&cli.spec).await?;
    let layout = ArtifactLayout::resolve(&cli.spec, &spec.artifacts_location)?;
    info!(
        spec = %cli.spec.display(),
        artifacts = %layout.root().display(),
        namespace = %spec.k8s.namespace,
        "Loaded network specification"
    );

    let settings = LauncherSettings::default();
    let backends = Backends::connect(
        &kubeconfig,
        &spec.k8s.namespace,
        &settings,
        cli.cryptogen,
        cli.configtxgen,
    )
    .await?;

    Launcher::new(spec, layout, settings, backends)
        .run(cli.action)
        .await
}
