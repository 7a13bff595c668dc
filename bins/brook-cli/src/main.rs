//! brook-cli: command-line wallet for Bitcoin testnet.
//!
//! Wallet state lives in a JSON file under the data directory; chain data
//! comes from an Esplora instance.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::debug;

use brook_core::types::BranchKind;
use brook_esplora::EsploraClient;
use brook_store::FileStore;
use brook_wallet::{EngineConfig, ErrorKind, NextAddressRule, Wallet, WalletError, WalletSession};

use crate::config::{CliConfig, Overrides};

/// Brook command-line wallet interface.
#[derive(Parser)]
#[command(name = "brook-cli")]
#[command(version, about = "HD wallet for Bitcoin testnet")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Data directory (default: ~/.brook, or $BROOK_DATA_DIR).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Esplora API root (default: Blockstream testnet, or $BROOK_ESPLORA_URL).
    #[arg(long, global = true)]
    esplora_url: Option<String>,

    /// Request timeout in seconds.
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Pick active addresses by position instead of lowest unused index.
    #[arg(long, global = true)]
    positional: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Wallet management subcommands.
    Wallet {
        #[command(subcommand)]
        action: WalletAction,
    },
    /// Show the active receiving (or change) address.
    Address(AddressArgs),
    /// Show confirmed and unconfirmed balance.
    Balance,
    /// Re-run address discovery on both branches and refresh UTXOs.
    Refresh,
    /// Send a payment.
    Send(SendArgs),
    /// Remove all stored wallet state.
    Logout,
}

#[derive(Subcommand)]
enum WalletAction {
    /// Generate a new 12-word wallet and log in with it.
    Create,
    /// Log in with an existing recovery phrase.
    Import(ImportArgs),
}

#[derive(Args)]
struct ImportArgs {
    /// Recovery phrase. If not provided, will prompt without echo.
    #[arg(short, long)]
    phrase: Option<String>,
}

#[derive(Args)]
struct AddressArgs {
    /// Show the active change address instead.
    #[arg(long)]
    change: bool,

    /// List every discovered address of the branch.
    #[arg(long)]
    all: bool,
}

#[derive(Args)]
struct SendArgs {
    /// Recipient testnet address.
    #[arg(short, long)]
    to: String,

    /// Amount in satoshis.
    #[arg(short, long)]
    amount: u64,

    /// Fee rate in sat/byte (default: 2).
    #[arg(short, long)]
    fee_rate: Option<u64>,

    /// Build and sign, print the hex, do not broadcast.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = CliConfig::load(Overrides {
        data_dir: cli.global.data_dir.clone(),
        esplora_url: cli.global.esplora_url.clone(),
        timeout_secs: cli.global.timeout_secs,
        log_level: cli.global.log_level.clone(),
    })?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.log_level)),
        )
        .init();
    debug!(data_dir = %cfg.data_dir.display(), esplora = %cfg.esplora_url, "configuration loaded");

    let wallet = open_wallet(&cfg, cli.global.positional).await?;

    let result = match cli.command {
        Commands::Wallet { action } => match action {
            WalletAction::Create => wallet_create(&wallet).await,
            WalletAction::Import(args) => wallet_import(&wallet, args).await,
        },
        Commands::Address(args) => wallet_address(&wallet, args).await,
        Commands::Balance => wallet_balance(&wallet).await,
        Commands::Refresh => wallet_refresh(&wallet).await,
        Commands::Send(args) => wallet_send(&wallet, args).await,
        Commands::Logout => wallet_logout(&wallet).await,
    };
    result.map_err(explain)
}

async fn open_wallet(cfg: &CliConfig, positional: bool) -> Result<Wallet> {
    let provider = EsploraClient::new(&cfg.esplora()).context("Failed to build HTTP client")?;
    let store = FileStore::open(cfg.store_path())
        .await
        .with_context(|| format!("Failed to open wallet state: {}", cfg.store_path().display()))?;
    let engine = EngineConfig {
        next_address_rule: if positional {
            NextAddressRule::PositionalMatch
        } else {
            NextAddressRule::LowestUnused
        },
        ..EngineConfig::default()
    };
    Ok(Wallet::new(Arc::new(provider), Arc::new(store), engine))
}

/// Generate a phrase, show it once, then log in with it.
async fn wallet_create(wallet: &Wallet) -> Result<()> {
    if wallet.store().load_mnemonic().await?.is_some() {
        bail!("A wallet is already stored; run `brook-cli logout` first");
    }
    let mnemonic = Wallet::create_mnemonic()?;

    println!("\n=== WALLET CREATED ===");
    println!("\nRECOVERY PHRASE ({} WORDS):", mnemonic.word_count());
    println!("  {}", mnemonic.phrase());
    println!("\nWARNING: This phrase will NOT be shown again.");
    println!("Anyone with this phrase can spend your funds.");

    let session = wallet.login(mnemonic.phrase()).await?;
    print_session(&session);
    Ok(())
}

async fn wallet_import(wallet: &Wallet, args: ImportArgs) -> Result<()> {
    let phrase = match args.phrase {
        Some(p) => p,
        None => rpassword::prompt_password("Recovery phrase: ").context("Failed to read phrase")?,
    };
    let session = wallet.login(&phrase).await?;
    println!("\n=== WALLET IMPORTED ===");
    print_session(&session);
    Ok(())
}

async fn wallet_address(wallet: &Wallet, args: AddressArgs) -> Result<()> {
    let session = require_session(wallet).await?;
    let kind = if args.change {
        BranchKind::Change
    } else {
        BranchKind::Receiving
    };
    if args.all {
        for record in session.branch(kind).records() {
            let mark = if record.is_used { "used" } else { "unused" };
            println!("{:>4}  {}  {}  {}", record.index, record.address, record.derive_path, mark);
        }
        return Ok(());
    }
    match session.active_address(kind) {
        Some(addr) => println!("{addr}"),
        None => bail!("No {kind} address discovered yet; run `brook-cli refresh`"),
    }
    Ok(())
}

async fn wallet_balance(wallet: &Wallet) -> Result<()> {
    let mut session = require_session(wallet).await?;
    let balance = wallet.refresh_utxos(&mut session).await?;
    println!("Confirmed:   {} sat", balance.confirmed);
    println!("Unconfirmed: {} sat", balance.unconfirmed);
    println!("Total:       {} sat ({} UTXOs)", balance.total(), balance.utxo_count);
    Ok(())
}

async fn wallet_refresh(wallet: &Wallet) -> Result<()> {
    let mut session = require_session(wallet).await?;
    for kind in BranchKind::ALL {
        wallet.rediscover(&mut session, kind).await?;
    }
    wallet.refresh_utxos(&mut session).await?;
    print_session(&session);
    Ok(())
}

async fn wallet_send(wallet: &Wallet, args: SendArgs) -> Result<()> {
    let mut session = require_session(wallet).await?;
    wallet.refresh_utxos(&mut session).await?;

    if args.dry_run {
        let signed = wallet
            .prepare_send(&session, &args.to, args.amount, args.fee_rate)
            .await?;
        println!("txid: {}", signed.txid());
        println!("fee:  {} sat", signed.fee);
        println!("{}", signed.hex);
        return Ok(());
    }

    let receipt = wallet
        .send(&mut session, &args.to, args.amount, args.fee_rate)
        .await?;
    println!("\n=== TRANSACTION SENT ===");
    println!("Txid:   {}", receipt.txid);
    println!("To:     {}", args.to);
    println!("Amount: {} sat", args.amount);
    println!("Fee:    {} sat", receipt.fee);
    if let Some(change) = &receipt.change_address {
        println!("Change: {change}");
    }
    if let Some(next) = &receipt.next_change_address {
        println!("Next change address: {next}");
    }
    if !receipt.persisted {
        eprintln!("WARNING: wallet state could not be saved; run `brook-cli refresh` before sending again.");
    }
    Ok(())
}

async fn wallet_logout(wallet: &Wallet) -> Result<()> {
    wallet.logout().await?;
    println!("Wallet state removed.");
    Ok(())
}

async fn require_session(wallet: &Wallet) -> Result<WalletSession> {
    wallet
        .restore()
        .await?
        .context("No wallet stored; run `brook-cli wallet create` or `wallet import`")
}

fn print_session(session: &WalletSession) {
    let balance = session.balance();
    println!(
        "Receiving address: {}",
        session.active_receiving_address().unwrap_or("-")
    );
    println!("Change address:    {}", session.active_change_address().unwrap_or("-"));
    println!(
        "Known addresses:   {} receiving, {} change",
        session.branch(BranchKind::Receiving).len(),
        session.branch(BranchKind::Change).len()
    );
    println!(
        "Balance:           {} sat confirmed, {} sat unconfirmed",
        balance.confirmed, balance.unconfirmed
    );
}

/// Prefix wallet errors with a short hint for the user.
fn explain(err: anyhow::Error) -> anyhow::Error {
    let Some(wallet_err) = err.downcast_ref::<WalletError>() else {
        return err;
    };
    let hint = match wallet_err.kind() {
        ErrorKind::InvalidMnemonic => "The recovery phrase is not valid",
        ErrorKind::Provider => "Could not reach the blockchain data provider",
        ErrorKind::InsufficientFunds => "Not enough confirmed funds",
        ErrorKind::UnconfirmedInput => "Wait for pending transactions to confirm",
        ErrorKind::Broadcast => "The network rejected the transaction",
        ErrorKind::InvalidAddress => "Recipient is not a valid testnet address",
        ErrorKind::InvalidAmount => "Amount or fee rate is not valid",
        ErrorKind::Internal => return err,
    };
    err.context(hint)
}
