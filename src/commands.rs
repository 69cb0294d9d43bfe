use std::error::Error;

use fetchledger::config::Config;
use fetchledger::ledger::{FjallStore, LedgerService, OpContext, VersionStateStore};
use fetchledger::models::{AttemptRecord, IndexVersion, ModuleVersionState, PackageVersionState};
use serde::Serialize;

use crate::cli::{Commands, FailuresArgs, InsertArgs, ModuleArgs, NextArgs, RecordArgs};

type CliResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

pub async fn run(command: Commands, config: Config) -> CliResult<()> {
    match command {
        Commands::Config => print!("{}", config.to_toml()?),
        Commands::Insert(args) => insert(&open_ledger(&config)?, args).await?,
        Commands::Next(args) => next(&open_ledger(&config)?, &config, args).await?,
        Commands::Record(args) => record(&open_ledger(&config)?, args).await?,
        Commands::Show(args) => show(&open_ledger(&config)?, args).await?,
        Commands::Stats => {
            let ledger = open_ledger(&config)?;
            print_json(&ledger.get_version_stats(&OpContext::background()).await?)?
        }
        Commands::Failures(FailuresArgs { limit }) => {
            let ledger = open_ledger(&config)?;
            let failed = ledger
                .get_recent_failed_versions(&OpContext::background(), limit)
                .await?;
            print_json(&failed)?
        }
        Commands::Requeue(args) => {
            let ledger = open_ledger(&config)?;
            ledger
                .requeue_module_version(&OpContext::background(), &args.module_path, &args.version)
                .await?;
            ledger.persist().await?;
        }
    }
    Ok(())
}

fn open_ledger(config: &Config) -> CliResult<LedgerService> {
    let store = FjallStore::open(&config.store.path)?.with_policy(config.scheduler.retry_policy());
    Ok(LedgerService::new(store)
        .with_operation_timeout(config.scheduler.operation_timeout.as_duration()))
}

async fn insert(ledger: &LedgerService, args: InsertArgs) -> CliResult<()> {
    let ctx = OpContext::background();
    let mut version = IndexVersion::new(args.path, args.version);
    version.timestamp = args.timestamp;
    ledger.insert_index_versions(&ctx, vec![version]).await?;
    ledger.persist().await?;
    Ok(())
}

async fn next(ledger: &LedgerService, config: &Config, args: NextArgs) -> CliResult<()> {
    let ctx = OpContext::background();
    let limit = args.limit.unwrap_or(config.scheduler.batch_size);
    let states = if args.claim {
        let lease = args.lease.unwrap_or(config.scheduler.lease).as_duration();
        let claimed = ledger.claim_next_modules_to_fetch(&ctx, limit, lease).await?;
        ledger.persist().await?;
        claimed
    } else {
        ledger.get_next_modules_to_fetch(&ctx, limit).await?
    };
    tracing::debug!(metrics = ?ledger.metrics(), "Served fetch candidates");
    print_json(&states)
}

async fn record(ledger: &LedgerService, args: RecordArgs) -> CliResult<()> {
    let ctx = OpContext::background();
    let packages = args
        .packages
        .into_iter()
        .map(|(path, status)| {
            PackageVersionState::new(path, &args.module_path, &args.version, status)
        })
        .collect();

    let attempt = AttemptRecord::builder()
        .module_path(&args.module_path)
        .version(&args.version)
        .app_version(args.app_version)
        .go_mod_path(args.go_mod_path)
        .status(args.status)
        .maybe_error(args.error)
        .package_states(packages)
        .build();

    ledger.upsert_module_version_state(&ctx, attempt).await?;
    ledger.persist().await?;

    let state = ledger
        .get_module_version_state(&ctx, &args.module_path, &args.version)
        .await?;
    print_json(&state)
}

#[derive(Serialize)]
struct ModuleReport {
    state: ModuleVersionState,
    packages: Vec<PackageVersionState>,
}

async fn show(ledger: &LedgerService, args: ModuleArgs) -> CliResult<()> {
    let ctx = OpContext::background();
    let state = ledger
        .get_module_version_state(&ctx, &args.module_path, &args.version)
        .await?;
    let packages = ledger
        .get_package_version_states_for_module(&ctx, &args.module_path, &args.version)
        .await?;
    print_json(&ModuleReport { state, packages })
}

fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
