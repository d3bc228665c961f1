use anyhow::{Context, Result};
use balsync_config::{load_layered_yaml, report_unused_keys, UnusedKeyPolicy};
use balsync_core::{Entity, EntityId, RemoteStore};
use balsync_db::PgBalanceStore;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;

#[derive(Parser)]
#[command(name = "balsync")]
#[command(about = "BalSync operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> host...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Validate layered config and report keys nothing reads
    ConfigCheck {
        /// Paths in merge order
        #[arg(required = true)]
        paths: Vec<String>,

        /// Fail when unused keys are present
        #[arg(long, default_value_t = false)]
        strict: bool,
    },

    /// Out-of-band balance edits, bypassing every running engine
    Store {
        #[command(subcommand)]
        cmd: StoreCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply SQL migrations.
    Migrate,
}

#[derive(Subcommand)]
enum StoreCmd {
    /// Print the stored record for one entity
    Get {
        #[arg(long)]
        entity: EntityId,
    },

    /// Overwrite the stored balance (last writer wins)
    Set {
        #[arg(long)]
        entity: EntityId,

        #[arg(long)]
        balance: Decimal,

        /// Display name stored alongside the balance
        #[arg(long, default_value = "")]
        name: String,
    },

    /// Atomically add a signed delta; inserts starting + delta when absent
    Add {
        #[arg(long)]
        entity: EntityId,

        #[arg(long, allow_hyphen_values = true)]
        delta: Decimal,

        #[arg(long, default_value = "")]
        name: String,

        #[arg(long, default_value = "100.00")]
        starting: Decimal,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env.local if present (dev convenience).
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = balsync_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = balsync_db::status(&pool).await?;
                    println!("db_ok={} has_balances_table={}", s.ok, s.has_balances_table);
                }
                DbCmd::Migrate => {
                    balsync_db::migrate(&pool).await?;
                    println!("db_migrate=ok");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::ConfigCheck { paths, strict } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = load_layered_yaml(&path_refs)?;
            let policy = if strict {
                UnusedKeyPolicy::Fail
            } else {
                UnusedKeyPolicy::Warn
            };
            let report = report_unused_keys(&loaded.config_json, policy)?;
            for ptr in &report.unused_leaf_pointers {
                eprintln!("unused_key={ptr}");
            }
            let cfg = loaded.typed()?;
            println!("config_ok=true config_hash={}", loaded.config_hash);
            println!(
                "poll_interval_secs={} auto_save_interval_secs={} starting_balance={}",
                cfg.sync.poll_interval_secs, cfg.sync.auto_save_interval_secs, cfg.sync.starting_balance
            );
        }

        Commands::Store { cmd } => {
            let pool = balsync_db::connect_from_env().await?;
            let store = PgBalanceStore::new(pool);
            match cmd {
                StoreCmd::Get { entity } => match store.fetch_record(entity).await? {
                    Some(r) => println!(
                        "entity_id={} name={} balance={} updated_at={}",
                        r.entity_id,
                        r.name,
                        r.balance,
                        r.updated_at.to_rfc3339()
                    ),
                    None => println!("entity_id={entity} record=none"),
                },
                StoreCmd::Set {
                    entity,
                    balance,
                    name,
                } => {
                    let balance = balsync_core::to_store_precision(balance);
                    store
                        .write_absolute(&Entity::new(entity, name), balance)
                        .await
                        .context("store set failed")?;
                    tracing::info!(entity = %entity, balance = %balance, "store overwritten");
                    println!("entity_id={entity} balance={balance}");
                }
                StoreCmd::Add {
                    entity,
                    delta,
                    name,
                    starting,
                } => {
                    let delta = balsync_core::to_store_precision(delta);
                    let after = store
                        .apply_delta(&Entity::new(entity, name), delta, starting)
                        .await
                        .context("store add failed")?;
                    tracing::info!(entity = %entity, delta = %delta, after = %after, "store delta applied");
                    println!("entity_id={entity} delta={delta} balance={after}");
                }
            }
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();
}
