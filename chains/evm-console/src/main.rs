use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use console_core::api::BackendClient;
use console_core::config::{NetworkConfig, StorageConfig};
use console_core::database::DatabaseManager;
use console_core::engine::{
    AmountPolicy, BalanceRefresh, BatchController, BatchSummary, ControlHandle, TargetResolution,
    TaskExecutor, TaskSource, TaskStatus, WithdrawExecutor,
};
use console_core::mapping::AddressMappingResolver;
use console_core::security::CredentialCipher;
use console_core::session::SessionContext;
use console_core::traits::{
    AddressMapping, ExchangeCredentials, ExchangeGateway, MappingStore, WalletFilter, WalletStore,
};
use console_core::wallet_manager::{KeyUnlocker, WalletManager, WalletRecord};
use console_core::setup_logger;
use dialoguer::{theme::ColorfulTheme, Password};
use dotenv::dotenv;
use evm_console::client::{ChainClient, EvmClient};
use evm_console::config::EvmConfig;
use evm_console::executor::TransferExecutor;
use evm_console::wallet_factory::{generate_wallets, parse_import_lines};
use rust_decimal::Decimal;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Batch wallet console for EVM chains", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "chains/evm-console/config.toml")]
    config: String,
    /// Network name from the config; defaults to `[chain].default_network`.
    #[arg(short, long, global = true)]
    network: Option<String>,
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
    #[arg(short, long)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate wallets and store them sealed under the passphrase.
    CreateWallets {
        #[arg(long)]
        project: String,
        #[arg(long, default_value_t = 10)]
        count: usize,
        #[arg(long)]
        remark: Option<String>,
    },
    /// Import `address,key[,phrase]` lines.
    ImportWallets {
        file: PathBuf,
        #[arg(long)]
        project: String,
        #[arg(long)]
        remark: Option<String>,
    },
    /// Import `source,target` address pairs.
    ImportMappings {
        file: PathBuf,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        remark: Option<String>,
    },
    /// List stored projects.
    Projects,
    /// List exchange accounts known to the back-end.
    Exchanges,
    /// Manage or query one exchange account on the back-end.
    Exchange {
        #[command(subcommand)]
        action: ExchangeAction,
    },
    /// Show the balance of every wallet in a project.
    Balances {
        #[arg(long)]
        project: String,
        /// ERC-20 contract or configured token symbol; native balance when omitted.
        #[arg(long)]
        token: Option<String>,
    },
    /// Send from every wallet in a project to its mapped target, or to `--to`.
    Transfer {
        #[arg(long)]
        project: String,
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        token: Option<String>,
        #[command(flatten)]
        amount: AmountArgs,
        #[command(flatten)]
        opts: RunArgs,
    },
    /// Send from one wallet to every address in a file.
    Distribute {
        #[arg(long)]
        project: String,
        /// Funding wallet address (must belong to the project).
        #[arg(long)]
        from: String,
        targets: PathBuf,
        #[arg(long)]
        token: Option<String>,
        #[command(flatten)]
        amount: AmountArgs,
        #[command(flatten)]
        opts: RunArgs,
    },
    /// Withdraw from an exchange account to every address in a file.
    Withdraw {
        #[arg(long)]
        exchange: String,
        /// Exchange-side network name, e.g. "ERC20" or "BSC".
        #[arg(long)]
        chain: String,
        #[arg(long)]
        coin: String,
        targets: PathBuf,
        #[command(flatten)]
        amount: AmountArgs,
        #[command(flatten)]
        opts: RunArgs,
    },
}

#[derive(Subcommand, Debug)]
enum ExchangeAction {
    /// Store a new account. API key, secret and passphrase are prompted for.
    Add {
        name: String,
        #[arg(long)]
        platform: String,
        /// Proxy the back-end uses for this account.
        #[arg(long)]
        ip: Option<String>,
    },
    /// Replace an account's settings. Prompts left empty keep the stored value.
    Update {
        name: String,
        #[arg(long, default_value = "")]
        platform: String,
        #[arg(long)]
        ip: Option<String>,
    },
    Remove { name: String },
    /// Check that the passphrase opens the account's credentials.
    Show { name: String },
    /// Free/used/total per coin.
    Balance {
        name: String,
        #[arg(long)]
        coin: Option<String>,
    },
    /// Withdrawal fee and minimum for a coin on an exchange-side network.
    Fee {
        name: String,
        #[arg(long)]
        coin: String,
        #[arg(long)]
        chain: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum AmountMode {
    Fixed,
    Full,
    Random,
    Remaining,
}

#[derive(Args, Debug)]
struct AmountArgs {
    #[arg(long, value_enum, default_value = "fixed")]
    mode: AmountMode,
    /// Amount for `fixed`.
    #[arg(long)]
    amount: Option<Decimal>,
    #[arg(long)]
    min: Option<Decimal>,
    #[arg(long)]
    max: Option<Decimal>,
    /// Balance left behind for `remaining`.
    #[arg(long)]
    keep: Option<Decimal>,
    /// Native reserve for `full`; defaults to `[engine].native_reserve`.
    #[arg(long)]
    reserve: Option<Decimal>,
}

impl AmountArgs {
    fn policy(&self, default_reserve: Decimal) -> Result<AmountPolicy> {
        let policy = match self.mode {
            AmountMode::Fixed => AmountPolicy::fixed(self.amount.context("--amount is required")?)?,
            AmountMode::Full => AmountPolicy::full_balance(self.reserve.unwrap_or(default_reserve))?,
            AmountMode::Random => AmountPolicy::random_range(
                self.min.context("--min is required")?,
                self.max.context("--max is required")?,
            )?,
            AmountMode::Remaining => {
                AmountPolicy::remaining_above(self.keep.context("--keep is required")?)?
            }
        };
        Ok(policy)
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Extra passes over failed tasks after the first run.
    #[arg(long, default_value_t = 0)]
    retry_rounds: u32,
    /// Run unselected tasks too (all tasks start selected).
    #[arg(long)]
    all: bool,
}

struct Stores {
    wallets: Arc<dyn WalletStore>,
    mappings: Arc<dyn MappingStore>,
    backend: Option<BackendClient>,
}

impl Stores {
    async fn open(config: &EvmConfig) -> Result<Self> {
        match &config.console.storage {
            StorageConfig::Sqlite { path } => {
                let db = DatabaseManager::new(path)
                    .await?
                    .with_cipher(CredentialCipher::new(config.console.security.iv_mode));
                let db = Arc::new(db);
                Ok(Self {
                    wallets: db.clone(),
                    mappings: db,
                    backend: None,
                })
            }
            StorageConfig::Backend { base_url } => {
                let client = BackendClient::new(base_url.as_str(), config.console.transport_cipher())?;
                Ok(Self {
                    wallets: Arc::new(client.clone()),
                    mappings: Arc::new(client.clone()),
                    backend: Some(client),
                })
            }
        }
    }

    fn backend(&self) -> Result<&BackendClient> {
        self.backend
            .as_ref()
            .context("exchange features need [storage] type = \"backend\"")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    let log_guard = setup_logger(&cli.log_dir, cli.verbose);

    info!("Loading config from: {}", cli.config);
    let config = match EvmConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load config: {:#}", e);
            return Ok(());
        }
    };

    let result = run(cli, config).await;
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    // Flush the file writer before the process exits.
    drop(log_guard);
    result
}

async fn run(cli: Cli, config: EvmConfig) -> Result<()> {
    let stores = Stores::open(&config).await?;
    let unlocker = KeyUnlocker::new(
        CredentialCipher::new(config.console.security.iv_mode),
        config.console.transport_cipher(),
    );
    let manager = WalletManager::new(stores.wallets.clone(), unlocker.clone());

    match cli.command {
        Command::Projects => {
            for project in manager.projects().await? {
                info!("{}", project);
            }
        }
        Command::Exchanges => {
            for account in stores.backend()?.exchanges().await? {
                info!("{} ({})", account.name, account.platform.unwrap_or_default());
            }
        }
        Command::Exchange { action } => {
            manage_exchange(stores.backend()?, action).await?;
        }
        Command::CreateWallets {
            project,
            count,
            remark,
        } => {
            let session = open_session(None)?.with_project(project.as_str());
            let wallets = generate_wallets(count, &mut rand::thread_rng())?;
            let inserted = manager
                .import(&wallets, &project, remark.as_deref(), &session)
                .await?;
            for wallet in &wallets {
                info!("{}", wallet.address);
            }
            info!("Created {} wallets in project '{}'", inserted, project);
        }
        Command::ImportWallets {
            file,
            project,
            remark,
        } => {
            let session = open_session(None)?.with_project(project.as_str());
            let wallets = parse_import_lines(&read_file(&file)?)?;
            let inserted = manager
                .import(&wallets, &project, remark.as_deref(), &session)
                .await?;
            info!(
                "Imported {} of {} wallets into '{}' ({} already present)",
                inserted,
                wallets.len(),
                project,
                wallets.len().saturating_sub(inserted)
            );
        }
        Command::ImportMappings {
            file,
            project,
            remark,
        } => {
            let mappings = parse_mappings(&read_file(&file)?)?;
            let written = stores
                .mappings
                .import_mappings(&mappings, project.as_deref(), remark.as_deref())
                .await?;
            info!("Imported {} address mappings", written);
        }
        Command::Balances { project, token } => {
            let session = open_session(None)?.with_project(project.as_str());
            let wallets = manager.load(&WalletFilter::project(&project), &session).await?;
            let (client, network) = connect(&config, cli.network.as_deref()).await?;
            let executor = build_executor(client, network, token.as_deref()).await?;
            let symbol = executor
                .token_metadata()
                .map(|t| t.symbol.clone())
                .unwrap_or_else(|| network.native_symbol.clone());

            let mut total = Decimal::ZERO;
            for wallet in &wallets {
                match executor.balance(&wallet.address).await {
                    Ok(balance) => {
                        total += balance;
                        info!("#{:<4} {} {} {}", wallet.index, wallet.address, balance, symbol);
                    }
                    Err(e) => warn!("#{:<4} {} balance failed: {}", wallet.index, wallet.address, e),
                }
            }
            info!("{} wallets, total {} {}", wallets.len(), total, symbol);
        }
        Command::Transfer {
            project,
            to,
            token,
            amount,
            opts,
        } => {
            let session = open_session(cli.network.as_deref())?.with_project(project.as_str());
            let wallets = load_verified(&manager, &project, &session).await?;
            let policy = amount.policy(config.console.engine.native_reserve)?;

            let targets = match to {
                Some(to) => TargetResolution::Single(to),
                None => {
                    let sources: Vec<String> = wallets.iter().map(|w| w.address.clone()).collect();
                    let map = AddressMappingResolver::new(stores.mappings.as_ref())
                        .resolve(&sources)
                        .await?;
                    TargetResolution::Mapped(map)
                }
            };

            let (client, network) = connect(&config, cli.network.as_deref()).await?;
            let executor = build_executor(client, network, token.as_deref()).await?;
            let mut controller = new_controller(&config, executor, unlocker);
            controller.generate_tasks(wallets.iter().map(TaskSource::from).collect(), targets, policy)?;
            drive(&mut controller, &session, &opts, config.console.engine.balance_refresh).await?;
        }
        Command::Distribute {
            project,
            from,
            targets,
            token,
            amount,
            opts,
        } => {
            let session = open_session(cli.network.as_deref())?.with_project(project.as_str());
            let wallets = load_verified(&manager, &project, &session).await?;
            let source = wallets
                .iter()
                .find(|w| w.address.eq_ignore_ascii_case(from.trim()))
                .with_context(|| format!("{} is not a wallet of project '{}'", from, project))?;
            let policy = amount.policy(config.console.engine.native_reserve)?;

            let (client, network) = connect(&config, cli.network.as_deref()).await?;
            let executor = build_executor(client, network, token.as_deref()).await?;
            let mut controller = new_controller(&config, executor, unlocker);
            controller.generate_distribution(
                TaskSource::from(source),
                read_addresses(&targets)?,
                policy,
            )?;
            drive(&mut controller, &session, &opts, BalanceRefresh::BeforeEach).await?;
        }
        Command::Withdraw {
            exchange,
            chain,
            coin,
            targets,
            amount,
            opts,
        } => {
            let session = open_session(None)?;
            let backend = stores.backend()?;
            match backend.withdraw_fee(&exchange, &coin, &chain, &session).await {
                Ok(fee) => info!(
                    "{} on {}: fee {}, minimum {}",
                    coin,
                    chain,
                    fee.fee.map(|f| f.to_string()).unwrap_or_else(|| "n/a".to_string()),
                    fee.min_withdraw.map(|m| m.to_string()).unwrap_or_else(|| "n/a".to_string())
                ),
                Err(e) => warn!("Withdraw fee lookup failed: {}", e),
            }
            let executor = WithdrawExecutor::new(backend.clone(), exchange.as_str(), chain, coin);
            let policy = amount.policy(config.console.engine.native_reserve)?;

            let mut controller = new_controller(&config, executor, unlocker);
            controller.generate_withdrawals(&exchange, read_addresses(&targets)?, policy)?;
            drive(&mut controller, &session, &opts, BalanceRefresh::BeforeEach).await?;
        }
    }

    Ok(())
}

/// `WALLET_PASSWORD` first, then an interactive prompt.
fn open_session(network: Option<&str>) -> Result<SessionContext> {
    let password = match env::var("WALLET_PASSWORD") {
        Ok(p) if !p.is_empty() => p,
        _ => Password::with_theme(&ColorfulTheme::default())
            .with_prompt("Enter wallet password")
            .interact()
            .context("WALLET_PASSWORD is not set and no terminal is available for a prompt")?,
    };
    let session = SessionContext::new(password)?;
    Ok(match network {
        Some(network) => session.with_network(network),
        None => session,
    })
}

/// Loads the project and checks the passphrase against its first key before
/// any task exists.
async fn load_verified(
    manager: &WalletManager,
    project: &str,
    session: &SessionContext,
) -> Result<Vec<WalletRecord>> {
    let wallets = manager.load(&WalletFilter::project(project), session).await?;
    let Some(first) = wallets.iter().find(|w| w.signing_key().is_some()) else {
        bail!("project '{}' has no wallets with keys", project);
    };
    manager
        .verify(first, session)
        .context("wallet password does not open this project's keys")?;
    info!("Wallet password validated successfully.");
    Ok(wallets)
}

async fn connect<'a>(
    config: &'a EvmConfig,
    requested: Option<&str>,
) -> Result<(EvmClient, &'a NetworkConfig)> {
    let name = config
        .network_name(requested)
        .context("no networks configured")?;
    let network = config.console.network(name)?;
    let client = EvmClient::connect(network, config.confirm_timeout()).await?;
    info!("Using {} (chain ID: {})", network.name, client.chain_id());
    Ok((client, network))
}

/// `token` is a symbol from the network's `tokens` table or a contract address.
async fn build_executor(
    client: EvmClient,
    network: &NetworkConfig,
    token: Option<&str>,
) -> Result<TransferExecutor<EvmClient>> {
    let Some(token) = token else {
        return Ok(TransferExecutor::native(client));
    };
    let configured = network.token(token);
    let contract = configured.map_or(token, |t| t.contract_address.as_str());
    let executor = TransferExecutor::token(client, contract).await?;

    let expected = configured.and_then(|t| t.decimals);
    if let (Some(expected), Some(meta)) = (expected, executor.token_metadata()) {
        if expected != meta.decimals {
            warn!(
                "{} reports {} decimals, config says {}; using the contract value",
                meta.symbol, meta.decimals, expected
            );
        }
    }
    Ok(executor)
}

fn prompt_secret(label: &str, allow_empty: bool) -> Result<String> {
    Password::with_theme(&ColorfulTheme::default())
        .with_prompt(label)
        .allow_empty_password(allow_empty)
        .interact()
        .with_context(|| format!("no terminal available to read {}", label))
}

async fn manage_exchange(backend: &BackendClient, action: ExchangeAction) -> Result<()> {
    match action {
        ExchangeAction::Add { name, platform, ip } => {
            let session = open_session(None)?;
            let account = ExchangeCredentials {
                name,
                platform,
                apikey: prompt_secret("API key", false)?,
                secret: prompt_secret("API secret", false)?,
                password: prompt_secret("API passphrase (empty if none)", true)?,
                ip,
            };
            backend.insert_exchange(&account, &session).await?;
            info!("Added exchange account '{}'", account.name);
        }
        ExchangeAction::Update { name, platform, ip } => {
            let session = open_session(None)?;
            let account = ExchangeCredentials {
                name,
                platform,
                apikey: prompt_secret("New API key (empty keeps)", true)?,
                secret: prompt_secret("New API secret (empty keeps)", true)?,
                password: prompt_secret("New API passphrase (empty keeps)", true)?,
                ip,
            };
            backend.update_exchange(&account, &session).await?;
            info!("Updated exchange account '{}'", account.name);
        }
        ExchangeAction::Remove { name } => {
            let removed = backend.delete_exchange(&name).await?;
            info!("Removed {} exchange account(s) named '{}'", removed, name);
        }
        ExchangeAction::Show { name } => {
            let session = open_session(None)?;
            match backend.exchange_account(&name, &session).await? {
                Some(account) => info!(
                    "{} ({}) credentials open, passphrase {}, proxy {}",
                    account.name,
                    account.platform,
                    if account.password.is_empty() { "none" } else { "set" },
                    account.ip.as_deref().unwrap_or("-")
                ),
                None => bail!("exchange account '{}' not found or password does not open it", name),
            }
        }
        ExchangeAction::Balance { name, coin } => {
            let session = open_session(None)?;
            for balance in backend.balances(&name, coin.as_deref(), &session).await? {
                info!(
                    "{:<8} free {} used {} total {}",
                    balance.coin, balance.free, balance.used, balance.total
                );
            }
        }
        ExchangeAction::Fee { name, coin, chain } => {
            let session = open_session(None)?;
            let fee = backend.withdraw_fee(&name, &coin, &chain, &session).await?;
            info!(
                "{} on {}: fee {}, minimum {}, enabled {}",
                fee.coin,
                fee.network,
                fee.fee.map(|f| f.to_string()).unwrap_or_else(|| "n/a".to_string()),
                fee.min_withdraw.map(|m| m.to_string()).unwrap_or_else(|| "n/a".to_string()),
                fee.enabled.map(|e| e.to_string()).unwrap_or_else(|| "n/a".to_string())
            );
        }
    }
    Ok(())
}

fn new_controller<E: TaskExecutor>(
    config: &EvmConfig,
    executor: E,
    unlocker: KeyUnlocker,
) -> BatchController<E> {
    BatchController::new(executor, unlocker)
        .with_interval(config.interval())
        .with_balance_refresh(config.console.engine.balance_refresh)
}

/// First Ctrl+C cancels the batch after the in-flight task; a second one
/// aborts the process.
fn listen_for_interrupt(control: ControlHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!("Unable to listen for shutdown signal: {}", e);
            return;
        }
        warn!("🛑 Received Ctrl+C. Stopping after the current task (again to abort)...");
        control.cancel();
        if signal::ctrl_c().await.is_ok() {
            error!("🛑 Second Ctrl+C. Aborting now");
            std::process::exit(130);
        }
    })
}

/// SIGUSR1 pauses the batch between tasks, SIGUSR2 resumes it.
#[cfg(unix)]
fn listen_for_pause(control: ControlHandle) -> Option<JoinHandle<()>> {
    use tokio::signal::unix::{signal as unix_signal, SignalKind};

    let mut pause = unix_signal(SignalKind::user_defined1()).ok()?;
    let mut resume = unix_signal(SignalKind::user_defined2()).ok()?;
    Some(tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(()) = pause.recv() => {
                    info!("⏸ Paused. Send SIGUSR2 to resume");
                    control.pause();
                }
                Some(()) = resume.recv() => {
                    info!("▶ Resumed");
                    control.resume();
                }
                else => break,
            }
        }
    }))
}

#[cfg(not(unix))]
fn listen_for_pause(_control: ControlHandle) -> Option<JoinHandle<()>> {
    None
}

/// Runs the batch with operator signals wired in, then retries failures
/// unless the operator cancelled.
async fn drive<E: TaskExecutor>(
    controller: &mut BatchController<E>,
    session: &SessionContext,
    opts: &RunArgs,
    refresh: BalanceRefresh,
) -> Result<BatchSummary> {
    let needs_balance = controller.policy().is_some_and(|p| p.needs_balance());
    if refresh == BalanceRefresh::Snapshot && needs_balance {
        let updated = controller.snapshot_balances().await;
        info!("Captured balances for {} tasks", updated);
    }

    let control = controller.control();
    let interrupt = listen_for_interrupt(control.clone());
    let pauser = listen_for_pause(control.clone());

    let mut summary = controller.run_all(session, !opts.all).await?;
    for round in 1..=opts.retry_rounds {
        if control.is_cancelled() {
            warn!("Cancelled by operator, skipping remaining retry rounds");
            break;
        }
        if summary.error == 0 || !controller.tasks().iter().any(|t| t.is_retryable()) {
            break;
        }
        info!("Retry round {}/{}", round, opts.retry_rounds);
        summary = controller.retry_failed(session).await?;
    }
    interrupt.abort();
    if let Some(pauser) = pauser {
        pauser.abort();
    }

    for task in controller.tasks() {
        if task.status() == TaskStatus::Error {
            warn!(
                "#{} {} -> {}: {}",
                task.id(),
                task.from(),
                task.to(),
                task.error_message().unwrap_or("unknown error")
            );
        }
    }
    info!("{}", summary);
    Ok(summary)
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn read_addresses(path: &Path) -> Result<Vec<String>> {
    Ok(read_file(path)?
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn parse_mappings(text: &str) -> Result<Vec<AddressMapping>> {
    text.lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(line_no, line)| {
            let (source, target) = line
                .split_once(',')
                .with_context(|| format!("line {}: expected source,target", line_no))?;
            Ok(AddressMapping {
                source_address: source.trim().to_string(),
                target_address: target.trim().to_string(),
                project: None,
                remark: None,
            })
        })
        .collect()
}
