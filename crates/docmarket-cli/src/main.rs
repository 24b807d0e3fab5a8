// DocMarket CLI - browse, sell and buy documents registered on-chain

mod session;
mod view;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::Colorize;
use docmarket_core::{truncate_address, UploadForm, MAX_AMOUNT};
use docmarket_market::contract::units::format_ether;
use docmarket_market::wallet::WalletEvent;
use docmarket_market::{MarketConfig, Marketplace, WalletError, WalletGateway};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use session::SavedSession;

/// DocMarket - a document marketplace on an ERC-1155 style registry
#[derive(Parser)]
#[command(name = "docmarket")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, inspect or switch the wallet
    Wallet {
        #[command(subcommand)]
        action: WalletAction,
    },
    /// Browse and manage listed documents
    Docs {
        #[command(subcommand)]
        action: DocsAction,
    },
    /// Upload a file, register it on-chain and list it for sale
    Upload {
        /// Path to the file to upload
        path: String,

        #[arg(short, long)]
        title: String,

        #[arg(short, long)]
        description: String,

        /// Price per unit in ETH
        #[arg(short, long)]
        price: String,

        /// Number of units to register and list
        #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..=MAX_AMOUNT))]
        amount: u64,
    },
    /// Buy units of a listed document
    Buy {
        id: i64,

        #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
        quantity: u64,
    },
    /// Manage the shopping cart
    Cart {
        #[command(subcommand)]
        action: CartAction,
    },
    /// Show your purchase history
    Purchases,
    /// ERC-20 token operations
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
    /// Airdrop claims and settings
    Airdrop {
        #[command(subcommand)]
        action: AirdropAction,
    },
    /// Approve or revoke an operator for all of your document units
    Approval {
        operator: String,

        /// Revoke instead of approve
        #[arg(long)]
        revoke: bool,
    },
    /// Finish uploads and purchases whose store write did not complete
    Reconcile {
        /// Keep running, one pass every N seconds, until Ctrl-C
        #[arg(long, value_name = "SECONDS")]
        every: Option<u64>,
    },
    /// Show unsettled pending writes
    Ledger,
}

#[derive(Subcommand)]
enum WalletAction {
    /// Request accounts from the provider and remember the first one
    Connect,
    /// Forget the connected account
    Disconnect,
    /// Show the connected account, chain and balance
    Status,
    /// Ask the wallet to switch to the expected chain
    Switch,
    /// Print account and chain changes as they happen
    Watch {
        /// Stop after this many seconds
        #[arg(long, default_value_t = 60)]
        seconds: u64,
    },
}

#[derive(Subcommand)]
enum DocsAction {
    /// Active documents, newest first
    List,
    /// Search active documents by title or description
    Search { query: String },
    /// Show one document
    Show { id: i64 },
    /// Show the on-chain record, price and holdings of a document
    Onchain {
        id: i64,

        /// Account to read holdings for (defaults to the connected account)
        #[arg(long)]
        account: Option<String>,
    },
    /// Your documents, active or not
    Mine,
    /// Show a document in the listing again
    Activate { id: i64 },
    /// Hide a document from the listing
    Deactivate { id: i64 },
    /// Delete a document's listing row (on-chain units are unaffected)
    Delete { id: i64 },
    /// Purchases of one of your documents
    Sales { id: i64 },
}

#[derive(Subcommand)]
enum CartAction {
    /// Add a document (quantities of the same document are summed)
    Add {
        id: i64,

        #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
        quantity: u64,
    },
    Remove { id: i64 },
    /// Set the quantity of a line (0 removes it)
    Set { id: i64, quantity: u64 },
    List,
    Clear,
    /// Buy every line; failed lines stay in the cart
    Checkout,
}

#[derive(Subcommand)]
enum TokenAction {
    Info,
    Balance { account: Option<String> },
    Allowance { owner: String, spender: String },
    Approve { spender: String, amount: String },
    Transfer { to: String, amount: String },
    TransferFrom {
        from: String,
        to: String,
        amount: String,
    },
}

#[derive(Subcommand)]
enum AirdropAction {
    /// Claim the airdrop for the connected account
    Request,
    /// Whether an account has already claimed
    Status { account: Option<String> },
    /// Current airdrop amount
    Amount,
    /// Set the airdrop amount in whole tokens (registry owner only)
    SetAmount { amount: String },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("DOCMARKET_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Wallet { action } => handle_wallet(action).await,
        Commands::Docs { action } => handle_docs(action).await,
        Commands::Upload {
            path,
            title,
            description,
            price,
            amount,
        } => handle_upload(&path, title, description, price, amount).await,
        Commands::Buy { id, quantity } => handle_buy(id, quantity).await,
        Commands::Cart { action } => handle_cart(action).await,
        Commands::Purchases => handle_purchases().await,
        Commands::Token { action } => handle_token(action).await,
        Commands::Airdrop { action } => handle_airdrop(action).await,
        Commands::Approval { operator, revoke } => handle_approval(&operator, !revoke).await,
        Commands::Reconcile { every } => handle_reconcile(every).await,
        Commands::Ledger => handle_ledger().await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Configuration, marketplace and state directory for one invocation.
struct App {
    config: MarketConfig,
    market: Marketplace,
    state_dir: PathBuf,
}

impl App {
    async fn open() -> anyhow::Result<Self> {
        let config = MarketConfig::from_env()?;
        tracing::debug!(registry = %config.registry_address, token = %config.token_address, "configuration loaded");
        let market = Marketplace::from_config(&config).await?;
        Ok(Self {
            config,
            market,
            state_dir: session::state_dir()?,
        })
    }

    /// Opens the marketplace and resumes the saved wallet session.
    async fn open_connected() -> anyhow::Result<Self> {
        let app = Self::open().await?;
        resume_session(app.market.wallet(), &app.state_dir).await?;
        Ok(app)
    }
}

/// Restores the saved account on `wallet`, printing the chain banner if needed.
async fn resume_session(wallet: &WalletGateway, state_dir: &Path) -> anyhow::Result<()> {
    let saved = session::load_session(state_dir)?.ok_or(WalletError::NotConnected)?;
    let restored = wallet.restore(&saved.account).await?;
    let Some(current) = restored else {
        session::clear_session(state_dir)?;
        return Err(anyhow::anyhow!(
            "The wallet no longer exposes {}. Run `docmarket wallet connect` again",
            saved.account
        ));
    };
    view::print_chain_warning(wallet.chain_warning(&current.chain_id));
    Ok(())
}

async fn handle_wallet(action: WalletAction) -> anyhow::Result<()> {
    let config = MarketConfig::from_env()?;
    let wallet = Arc::new(WalletGateway::from_config(&config)?);
    let state_dir = session::state_dir()?;

    match action {
        WalletAction::Connect => {
            let current = wallet.connect().await?;
            session::save_session(
                &state_dir,
                &SavedSession {
                    account: current.account.clone(),
                    chain_id: current.chain_id.clone(),
                    connected_at: Utc::now(),
                },
            )?;
            view::success("Wallet connected");
            println!();
            println!("  Account: {}", current.account);
            println!("  Chain:   {}", current.chain_id);
            view::print_chain_warning(wallet.chain_warning(&current.chain_id));
            Ok(())
        }
        WalletAction::Disconnect => {
            session::clear_session(&state_dir)?;
            wallet.disconnect();
            view::success("Wallet disconnected");
            Ok(())
        }
        WalletAction::Status => {
            resume_session(&wallet, &state_dir).await?;
            let balance = wallet.balance(None).await?;
            let current = wallet.session().ok_or(WalletError::NotConnected)?;
            println!("  Account: {}", current.account);
            println!("  Chain:   {}", current.chain_id);
            println!("  Balance: {} ETH", format_ether(balance));
            Ok(())
        }
        WalletAction::Switch => {
            resume_session(&wallet, &state_dir).await?;
            wallet.switch_to_expected_chain().await?;
            if let Some(current) = wallet.session() {
                session::save_session(
                    &state_dir,
                    &SavedSession {
                        account: current.account,
                        chain_id: current.chain_id.clone(),
                        connected_at: Utc::now(),
                    },
                )?;
                view::success(&format!("Switched to {}", current.chain_id));
            }
            Ok(())
        }
        WalletAction::Watch { seconds } => {
            resume_session(&wallet, &state_dir).await?;
            let mut events = wallet.subscribe();
            let listener = wallet.listen(config.poll_interval)?;
            println!(
                "Watching wallet for {} seconds (Ctrl-C to stop)...",
                seconds
            );

            let deadline = tokio::time::sleep(Duration::from_secs(seconds));
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    _ = tokio::signal::ctrl_c() => break,
                    event = events.recv() => match event {
                        Ok(WalletEvent::AccountsChanged(accounts)) => match accounts.first() {
                            Some(account) => println!("Account changed: {}", account),
                            None => println!("{}", "Wallet locked or disconnected".yellow()),
                        },
                        Ok(WalletEvent::ChainChanged(chain_id)) => {
                            println!("Chain changed: {}", chain_id);
                            view::print_chain_warning(wallet.chain_warning(&chain_id));
                        }
                        Ok(WalletEvent::Disconnected) => {
                            println!("{}", "Provider disconnected".yellow());
                            break;
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            listener.unsubscribe();
            Ok(())
        }
    }
}

async fn handle_docs(action: DocsAction) -> anyhow::Result<()> {
    match action {
        DocsAction::List => {
            let app = App::open().await?;
            view::print_documents(&app.market.listing().await?);
        }
        DocsAction::Search { query } => {
            let app = App::open().await?;
            view::print_documents(&app.market.search(&query).await?);
        }
        DocsAction::Show { id } => {
            let app = App::open().await?;
            view::print_document(&app.market.document(id).await?);
        }
        DocsAction::Onchain { id, account } => {
            let app = App::open().await?;
            if account.is_none() {
                resume_session(app.market.wallet(), &app.state_dir).await?;
            }
            let onchain_id = u64::try_from(id)
                .map_err(|_| anyhow::anyhow!("Invalid document id {}", id))?;
            let record = app.market.onchain_document(onchain_id).await?;
            let price = app
                .market
                .onchain_price(onchain_id, &record.creator.to_string())
                .await?;
            let held = app
                .market
                .holdings(onchain_id, account.as_deref())
                .await?;
            println!("{}", record.title.bold());
            println!();
            println!("  Creator:      {}", record.creator);
            println!("  Total supply: {}", record.total_supply);
            println!("  File:         {}", record.file_url);
            println!("  Listed price: {} ETH", price.normalized());
            println!("  Held:         {}", held);
        }
        DocsAction::Mine => {
            let app = App::open_connected().await?;
            view::print_documents(&app.market.my_documents().await?);
        }
        DocsAction::Activate { id } => {
            let app = App::open_connected().await?;
            let docs = app.market.activate(id).await?;
            view::success(&format!("Document {} is listed again", id));
            view::print_documents(&docs);
        }
        DocsAction::Deactivate { id } => {
            let app = App::open_connected().await?;
            let docs = app.market.deactivate(id).await?;
            view::success(&format!("Document {} hidden from the listing", id));
            view::print_documents(&docs);
        }
        DocsAction::Delete { id } => {
            let app = App::open_connected().await?;
            let docs = app.market.delete(id).await?;
            view::success(&format!("Document {} deleted", id));
            view::print_documents(&docs);
        }
        DocsAction::Sales { id } => {
            let app = App::open_connected().await?;
            view::print_purchases(&app.market.sales(id).await?);
        }
    }
    Ok(())
}

async fn handle_upload(
    path: &str,
    title: String,
    description: String,
    price: String,
    amount: u64,
) -> anyhow::Result<()> {
    let file_path = Path::new(path);
    let bytes = tokio::fs::read(file_path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read '{}': {}", path, e))?;
    let file_name = file_path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string());

    let form = UploadForm {
        title,
        description,
        price,
        amount,
        file_name,
        file_size: bytes.len() as u64,
    };
    // Fail on bad input before touching the network.
    form.validate()?;

    let app = App::open_connected().await?;
    println!("Uploading {} and registering it on-chain...", path);
    let receipt = app.market.upload_document(form, bytes).await?;

    view::success("Document uploaded and listed");
    println!();
    println!("  ID:          {}", receipt.document.id);
    println!("  File:        {}", receipt.document.file_url);
    println!("  Register tx: {}", receipt.register_tx);
    println!("  List tx:     {}", receipt.list_tx);
    Ok(())
}

async fn handle_buy(id: i64, quantity: u64) -> anyhow::Result<()> {
    let app = App::open_connected().await?;
    let receipt = app.market.buy(id, quantity).await?;
    view::success(&format!(
        "Bought {} x document {} for {} ETH",
        quantity,
        id,
        receipt.purchase.total_price.normalized()
    ));
    println!("  Tx: {}", receipt.tx_hash);
    Ok(())
}

async fn handle_cart(action: CartAction) -> anyhow::Result<()> {
    let state_dir = session::state_dir()?;
    let mut cart = session::load_cart(&state_dir)?;

    match action {
        CartAction::Add { id, quantity } => {
            let app = App::open().await?;
            let doc = app.market.document(id).await?;
            if !doc.is_active {
                return Err(anyhow::anyhow!("{} is not available for purchase", doc.title));
            }
            let total = cart.add(doc.to_cart_item(quantity));
            session::save_cart(&state_dir, &cart)?;
            view::success(&format!("{} in cart: {}", doc.title, total));
        }
        CartAction::Remove { id } => {
            if cart.remove(id).is_none() {
                return Err(anyhow::anyhow!("Document {} is not in the cart", id));
            }
            session::save_cart(&state_dir, &cart)?;
            view::print_cart(&cart);
        }
        CartAction::Set { id, quantity } => {
            if !cart.set_quantity(id, quantity) {
                return Err(anyhow::anyhow!("Document {} is not in the cart", id));
            }
            session::save_cart(&state_dir, &cart)?;
            view::print_cart(&cart);
        }
        CartAction::List => view::print_cart(&cart),
        CartAction::Clear => {
            cart.clear();
            session::save_cart(&state_dir, &cart)?;
            view::success("Cart cleared");
        }
        CartAction::Checkout => {
            if cart.is_empty() {
                println!("{}", "Your cart is empty.".dimmed());
                return Ok(());
            }
            let app = App::open_connected().await?;
            let report = app.market.checkout(&mut cart).await?;
            session::save_cart(&state_dir, &cart)?;

            for bought in &report.purchased {
                view::success(&format!(
                    "Bought {} x document {} ({})",
                    bought.purchase.quantity,
                    bought.purchase.doc_id,
                    view::short_hash(&bought.tx_hash)
                ));
            }
            for line in &report.unsettled {
                eprintln!(
                    "{} {}: {}",
                    "⚠".yellow().bold(),
                    line.item.title,
                    line.error
                );
                eprintln!(
                    "  Removed from the cart; the transaction may still be mined. \
                     Run `docmarket reconcile` to finish entry {}",
                    line.ledger_id
                );
            }
            for (item, error) in &report.failed {
                eprintln!("{} {}: {}", "✗".red().bold(), item.title, error);
            }
            if !report.failed.is_empty() {
                return Err(anyhow::anyhow!(
                    "{} of {} items could not be bought and remain in the cart",
                    report.failed.len(),
                    report.failed.len() + report.purchased.len() + report.unsettled.len()
                ));
            }
        }
    }
    Ok(())
}

async fn handle_purchases() -> anyhow::Result<()> {
    let app = App::open_connected().await?;
    view::print_purchases(&app.market.my_purchases().await?);
    Ok(())
}

async fn handle_token(action: TokenAction) -> anyhow::Result<()> {
    let app = match &action {
        TokenAction::Info | TokenAction::Allowance { .. } => App::open().await?,
        TokenAction::Balance { account: Some(_) } => App::open().await?,
        _ => App::open_connected().await?,
    };
    let info = app.market.token_info().await?;

    match action {
        TokenAction::Info => {
            println!("{} ({})", info.name.bold(), info.symbol);
            println!();
            println!("  Address:      {}", info.address);
            println!("  Decimals:     {}", info.decimals);
            println!(
                "  Total supply: {}",
                info.format(app.market.token().total_supply().await?)
            );
        }
        TokenAction::Balance { account } => {
            let balance = app.market.token_balance(account.as_deref()).await?;
            println!("{}", info.format(balance));
        }
        TokenAction::Allowance { owner, spender } => {
            let allowance = app.market.token_allowance(&owner, &spender).await?;
            println!("{}", info.format(allowance));
        }
        TokenAction::Approve { spender, amount } => {
            let receipt = app.market.approve(&spender, &amount).await?;
            view::success(&format!(
                "{} may spend {} {}",
                truncate_address(&spender),
                amount,
                info.symbol
            ));
            println!("  Tx: {}", receipt.transaction_hash);
        }
        TokenAction::Transfer { to, amount } => {
            let receipt = app.market.transfer(&to, &amount).await?;
            view::success(&format!(
                "Sent {} {} to {}",
                amount,
                info.symbol,
                truncate_address(&to)
            ));
            println!("  Tx: {}", receipt.transaction_hash);
        }
        TokenAction::TransferFrom { from, to, amount } => {
            let receipt = app.market.transfer_from(&from, &to, &amount).await?;
            view::success(&format!(
                "Moved {} {} from {} to {}",
                amount,
                info.symbol,
                truncate_address(&from),
                truncate_address(&to)
            ));
            println!("  Tx: {}", receipt.transaction_hash);
        }
    }
    Ok(())
}

async fn handle_airdrop(action: AirdropAction) -> anyhow::Result<()> {
    match action {
        AirdropAction::Request => {
            let app = App::open_connected().await?;
            let receipt = app.market.request_airdrop().await?;
            let info = app.market.token_info().await?;
            let balance = app.market.token_balance(None).await?;
            view::success("Airdrop received");
            println!("  Balance: {}", info.format(balance));
            println!("  Tx:      {}", receipt.transaction_hash);
        }
        AirdropAction::Status { account } => {
            let app = if account.is_some() {
                App::open().await?
            } else {
                App::open_connected().await?
            };
            let received = app.market.airdrop_status(account.as_deref()).await?;
            if received {
                println!("Airdrop already received");
            } else {
                println!("Airdrop not yet claimed");
            }
        }
        AirdropAction::Amount => {
            let app = App::open().await?;
            let info = app.market.token_info().await?;
            println!("{}", info.format(app.market.airdrop_amount().await?));
        }
        AirdropAction::SetAmount { amount } => {
            let app = App::open_connected().await?;
            let receipt = app.market.set_airdrop_amount(&amount).await?;
            view::success(&format!("Airdrop amount set to {}", amount));
            println!("  Tx: {}", receipt.transaction_hash);
        }
    }
    Ok(())
}

async fn handle_approval(operator: &str, approved: bool) -> anyhow::Result<()> {
    let app = App::open_connected().await?;
    let receipt = app.market.set_approval_for_all(operator, approved).await?;
    let verb = if approved { "approved" } else { "revoked" };
    view::success(&format!("Operator {} {}", truncate_address(operator), verb));
    println!("  Tx: {}", receipt.transaction_hash);
    Ok(())
}

async fn handle_reconcile(every: Option<u64>) -> anyhow::Result<()> {
    let app = App::open().await?;
    // Resubmitting a listing needs the seller's wallet; without one those
    // entries are skipped.
    if let Err(e) = resume_session(app.market.wallet(), &app.state_dir).await {
        tracing::info!(error = %e, "reconciling without a wallet session");
    }
    let reconciler = Arc::new(app.market.reconciler(app.config.stale_after));

    match every {
        None => {
            let report = reconciler.run_once().await?;
            println!(
                "Mirrored: {}  Advanced: {}  Failed: {}  Untouched: {}",
                report.mirrored, report.advanced, report.failed, report.untouched
            );
        }
        Some(seconds) => {
            println!("Reconciling every {} seconds (Ctrl-C to stop)...", seconds);
            let task = reconciler.spawn(Duration::from_secs(seconds.max(1)));
            tokio::signal::ctrl_c().await?;
            task.abort();
        }
    }
    Ok(())
}

async fn handle_ledger() -> anyhow::Result<()> {
    let app = App::open().await?;
    let entries = app.market.ledger().unsettled().await?;
    if entries.is_empty() {
        println!("{}", "No unsettled writes.".dimmed());
        return Ok(());
    }
    for entry in &entries {
        println!("{}", view::pending_row(entry));
    }
    Ok(())
}
