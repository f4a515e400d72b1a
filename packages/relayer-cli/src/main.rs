use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use relayer_core::{
    network::{RelayerNetworkManager, StaticRelayerNetworkManager},
    verify::{calculate_node_id, CrossChainCertificate},
    Config, RelayerResponse,
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and summarize a relayer config file
    ValidateConfig {
        /// Config file path (.json or .toml)
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },
    /// Print the node id of a hex or base64 encoded relayer certificate
    NodeId {
        #[arg(short, long, value_name = "FILE")]
        cert: PathBuf,
    },
    /// Decode a hex encoded relayer response and check its signature
    VerifyResponse {
        #[arg(short, long, value_name = "FILE")]
        file: PathBuf,
    },
    /// Resolve the relayer owning a domain from the static network table
    Route {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
        #[arg(short, long)]
        domain: String,
    },
}

fn load_config(path: &Path) -> Result<Config> {
    Config::load(path).with_context(|| format!("failed to load {}", path.display()))
}

fn read_text(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(text.trim().to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::ValidateConfig { config } => {
            info!("Validating config file: {:?}", config);
            let config = load_config(&config)?;
            println!("Config is valid");
            println!("- process:");
            println!("  - sdp acl: {}", if config.process.sdp_acl_on { "on" } else { "off" });
            println!("  - fail limit: {}", config.process.ccmsg_fail_limit);
            println!("- network:");
            println!("  - rpc timeout: {} ms", config.network.rpc_timeout_ms);
            println!("  - poll interval: {} ms", config.network.poll_interval_ms);
            println!("  - batch size: {}", config.network.batch_size);
            println!("  - workers: {}", config.network.worker_threads);
            println!("  - relayer nodes: {}", config.network.nodes.len());
            for node in &config.network.nodes {
                println!("    - {} ({}): {:?}", node.domains.join(", "), node.sig_algo, node.endpoints);
            }
            println!("  - channels: {}", config.network.channels.len());
            for channel in &config.network.channels {
                println!("    - {} -> {}", channel.sender_domain, channel.receiver_domain);
            }
            match &config.credential {
                Some(credential) => println!("- credential: {:?} ({})", credential.cert_path, credential.sig_algo),
                None => println!("- credential: none"),
            }
            Ok(())
        }
        Commands::NodeId { cert } => {
            let cert = CrossChainCertificate::from_text(&read_text(&cert)?)?;
            if !cert.is_relayer_cert() {
                warn!("Certificate {} is a {:?} certificate, not a relayer one", cert.id, cert.cert_type);
            }
            println!("{}", calculate_node_id(&cert.encode()?));
            Ok(())
        }
        Commands::VerifyResponse { file } => {
            let raw = hex::decode(read_text(&file)?).context("response file is not hex")?;
            let response = RelayerResponse::decode(&raw)?;
            println!("code: {}", response.response_code);
            println!("message: {}", response.response_message);
            println!("payload: {}", response.response_payload);
            println!("sig algo: {}", response.sig_algo);
            println!("node id: {}", response.calc_relayer_node_id());
            println!("success: {}", response.is_success());
            match response.verify() {
                Ok(true) => println!("signature: valid"),
                Ok(false) => bail!("signature: invalid"),
                Err(e) => bail!("signature: cannot verify: {}", e),
            }
            Ok(())
        }
        Commands::Route { config, domain } => {
            let config = load_config(&config)?;
            let manager = StaticRelayerNetworkManager::from_config(&config.network, None)?;
            let node_id = match manager.find_remote_relayer(&domain).await? {
                Some(node_id) => node_id,
                None => bail!("no relayer owns domain {}", domain),
            };
            println!("{}", node_id);
            if let Some(node) = manager.get_relayer_node(&node_id, false).await? {
                for endpoint in &node.endpoints {
                    println!("  {}", endpoint);
                }
            }
            Ok(())
        }
    }
}
