//! zmail: send and read encrypted messages carried in shielded memos.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use zmail_core::cancel::CancelToken;
use zmail_core::types::SpendingKey;
use zmail_rpc::SendStrategy;
use zmail_service::{MessageService, ScanRequest, ZmailConfig};
use zmail_wallet::ProvingParameters;

/// Environment variable read before prompting for a spending key.
const SPENDING_KEY_ENV: &str = "ZMAIL_SPENDING_KEY";

/// Encrypted messaging over shielded transaction memos.
#[derive(Parser)]
#[command(name = "zmail")]
#[command(version, about = "Encrypted messages in shielded memos.")]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// JSON-RPC endpoint, overriding the configuration.
    #[arg(short, long, global = true)]
    rpc_endpoint: Option<String>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log output format: "text" or "json".
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show what the endpoint supports and which send path would be used.
    Detect,
    /// Send a message.
    Send(SendArgs),
    /// Acknowledge a received message.
    Receipt(ReceiptArgs),
    /// Scan an address for messages.
    Scan(ScanArgs),
    /// Wait for a transaction to confirm.
    Wait(WaitArgs),
}

#[derive(Args)]
struct SendArgs {
    /// Sender shielded address.
    #[arg(short, long)]
    from: String,

    /// Recipient shielded address.
    #[arg(short, long)]
    to: String,

    /// Message text. Read from stdin when omitted.
    #[arg(short, long)]
    message: Option<String>,

    /// Value attached to each part, in zatoshis.
    #[arg(short, long)]
    amount: Option<u64>,

    /// Wait for this many confirmations of the first part.
    #[arg(short, long)]
    wait: Option<u64>,
}

#[derive(Args)]
struct ReceiptArgs {
    #[arg(short, long)]
    from: String,

    #[arg(short, long)]
    to: String,

    /// Txid being acknowledged.
    #[arg(long)]
    txid: String,
}

#[derive(Args)]
struct ScanArgs {
    /// Address to scan.
    #[arg(short, long)]
    address: String,

    /// Lowest block height to include.
    #[arg(long, default_value = "0")]
    from_height: u64,

    /// Highest block height to include (default: tip plus mempool).
    #[arg(long)]
    to_height: Option<u64>,

    /// Also try the key derived from the spending key.
    #[arg(long)]
    use_spending_key: bool,

    /// Print messages as JSON lines.
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct WaitArgs {
    #[arg(long)]
    txid: String,

    /// Confirmations to wait for.
    #[arg(short, long, default_value = "1")]
    confirmations: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, &cli.log_format);

    let mut config = ZmailConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(endpoint) = cli.rpc_endpoint {
        config.rpc.endpoint = endpoint;
    }

    let service = MessageService::connect(&config).context("Failed to set up message service")?;
    let cancel = cancel_on_ctrl_c();

    match cli.command {
        Commands::Detect => detect(&service, &config).await,
        Commands::Send(args) => send(&service, args, &cancel).await,
        Commands::Receipt(args) => receipt(&service, args, &cancel).await,
        Commands::Scan(args) => scan(&service, args, &cancel).await,
        Commands::Wait(args) => wait(&service, &args.txid, args.confirmations, &cancel).await,
    }
}

/// Pass `format = "json"` for one JSON object per event.
fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

/// Token that fires on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancelToken {
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            trigger.cancel();
        }
    });
    cancel
}

async fn detect(service: &MessageService, config: &ZmailConfig) -> Result<()> {
    let router = service.router();
    let caps = router.refresh().await;

    println!("\n=== ENDPOINT ===");
    println!("Endpoint:           {}", router.endpoint());
    println!("Provider:           {}", caps.provider_type);
    println!("Local node:         {}", caps.is_local_node);
    println!("Wallet methods:     {}", caps.supports_wallet_methods);
    println!("z_sendmany:         {}", caps.supports_z_send_many);
    println!("z_importkey:        {}", caps.supports_z_import_key);
    println!("sendrawtransaction: {}", caps.supports_send_raw_transaction);

    match router.select_strategy().await {
        Ok(strategy) => println!("Send path:          {}", strategy.name()),
        Err(e) => println!("Send path:          none ({e})"),
    }

    match config.prover.proof_service() {
        Ok(Some(prover)) => {
            let state = if prover.health().await { "healthy" } else { "not answering" };
            println!("Proof service:      {state}");
        }
        Ok(None) => println!("Proof service:      not configured"),
        Err(e) => println!("Proof service:      {e}"),
    }

    match ProvingParameters::locate(config.prover.params_dir.as_deref()) {
        Ok(params) => println!("Proving params:     {}", params.dir.display()),
        Err(e) => println!("Proving params:     {e}"),
    }
    Ok(())
}

async fn send(service: &MessageService, args: SendArgs, cancel: &CancelToken) -> Result<()> {
    let content = match args.message {
        Some(message) => message,
        None => read_stdin()?,
    };
    let key = spending_key()?;

    let record = service
        .send_message(&args.from, &args.to, &key, &content, args.amount, cancel)
        .await
        .context("Failed to send message")?;

    println!("\n=== MESSAGE SENT ===");
    println!("Message ID: {}", record.id);
    println!("Parts:      {}", record.txids.len());
    for (index, txid) in record.txids.iter().enumerate() {
        println!("  [{index}] {txid}");
    }

    if let (Some(target), Some(first)) = (args.wait, record.first_txid()) {
        wait(service, first, target, cancel).await?;
    }
    Ok(())
}

async fn receipt(
    service: &MessageService,
    args: ReceiptArgs,
    cancel: &CancelToken,
) -> Result<()> {
    let key = spending_key()?;
    let record = service
        .send_receipt(&args.from, &args.to, &key, &args.txid, cancel)
        .await
        .context("Failed to send receipt")?;
    println!("Receipt sent: {}", record.first_txid().unwrap_or("-"));
    Ok(())
}

async fn scan(service: &MessageService, args: ScanArgs, cancel: &CancelToken) -> Result<()> {
    let viewing_key = if args.use_spending_key { Some(spending_key()?) } else { None };
    let request = ScanRequest {
        address: args.address,
        viewing_key,
        from_height: args.from_height,
        to_height: args.to_height,
    };

    let assembly = service
        .scan_for_messages(&request, cancel, |p| {
            if p.scanned % 100 == 0 || p.scanned == p.total {
                info!(scanned = p.scanned, total = p.total, found = p.found, "scanning");
            }
        })
        .await
        .context("Scan failed")?;

    for message in &assembly.messages {
        if args.json {
            let line = serde_json::json!({
                "id": message.id(),
                "type": message.message_type,
                "height": message.height,
                "timestamp": message.timestamp,
                "txids": message.txids,
                "content": message.content,
            });
            println!("{line}");
        } else {
            let height = message.height.map_or("mempool".to_string(), |h| h.to_string());
            println!("\n--- {} ({:?}, {height}) ---", message.id(), message.message_type);
            println!("{}", message.content);
        }
    }
    if !args.json {
        println!(
            "\n{} message(s), {} incomplete group(s)",
            assembly.messages.len(),
            assembly.incomplete.len()
        );
    }
    Ok(())
}

async fn wait(
    service: &MessageService,
    txid: &str,
    target: u64,
    cancel: &CancelToken,
) -> Result<()> {
    let confirmations = service
        .wait_for_confirmations(txid, target, cancel, |c| {
            info!(txid, confirmations = c, target, "waiting for confirmations");
        })
        .await
        .with_context(|| format!("Failed waiting for {txid}"))?;
    println!("{txid}: {confirmations} confirmation(s)");
    Ok(())
}

/// Spending key from the environment, or a no-echo prompt.
fn spending_key() -> Result<SpendingKey> {
    let key = match std::env::var(SPENDING_KEY_ENV) {
        Ok(key) => key,
        Err(_) => {
            rpassword::prompt_password("Spending key: ").context("Failed to read spending key")?
        }
    };
    let key = SpendingKey::new(key.trim());
    if key.is_blank() {
        bail!("Spending key must not be empty");
    }
    Ok(key)
}

fn read_stdin() -> Result<String> {
    let content = std::io::read_to_string(std::io::stdin()).context("Failed to read stdin")?;
    let content = content.trim_end_matches(['\r', '\n']).to_string();
    if content.is_empty() {
        bail!("No message given");
    }
    Ok(content)
}
