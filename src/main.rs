use clap::Parser;
use escrow_core::application::engine::{EscrowEngine, EscrowView};
use escrow_core::application::policies::PlatformPolicyRegistry;
use escrow_core::domain::ports::{EscrowFilter, EscrowStoreRef, OrderDirectory, SettingsStoreRef};
use escrow_core::domain::scope::ActorContext;
use escrow_core::infrastructure::in_memory::{
    InMemoryEscrowStore, InMemoryOrderDirectory, InMemorySettingsStore,
};
use escrow_core::interfaces::csv::escrow_writer::EscrowWriter;
use escrow_core::interfaces::csv::seed_reader::SeedReader;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input seed CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[cfg(feature = "storage-rocksdb")]
    #[arg(long)]
    db_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let (store, settings): (EscrowStoreRef, SettingsStoreRef) = build_stores(&cli)?;
    let directory = Arc::new(InMemoryOrderDirectory::new());
    let policies = Arc::new(PlatformPolicyRegistry::new(settings));
    let engine = EscrowEngine::new(store.clone(), directory.clone(), policies);

    // Seed rows: register the order summary first, then create the escrow.
    // Rows that fail validation are reported and skipped.
    let file = File::open(cli.input).into_diagnostic()?;
    let reader = SeedReader::new(file);
    let actor = ActorContext::system();
    for record in reader.records() {
        match record {
            Ok(record) => {
                directory.register_order(record.order_summary());
                if let Err(e) = engine.create(record.create_command(), &actor).await {
                    eprintln!("Error creating escrow: {}", e);
                }
            }
            Err(e) => {
                eprintln!("Error reading seed row: {}", e);
            }
        }
    }

    // Output final state, ordered by order id for stable diffs.
    let mut escrows = store
        .select(&EscrowFilter::default())
        .await
        .into_diagnostic()?;
    escrows.sort_by(|a, b| a.order_id.cmp(&b.order_id));

    let mut views = Vec::with_capacity(escrows.len());
    for escrow in escrows {
        let order = directory
            .order_summary(&escrow.order_id)
            .await
            .into_diagnostic()?;
        views.push(EscrowView::assemble(escrow, order));
    }

    let stdout = io::stdout();
    let mut writer = EscrowWriter::new(stdout.lock());
    writer.write_escrows(views).into_diagnostic()?;

    Ok(())
}

#[cfg(feature = "storage-rocksdb")]
fn build_stores(cli: &Cli) -> Result<(EscrowStoreRef, SettingsStoreRef)> {
    use escrow_core::infrastructure::rocksdb::RocksDBStore;

    if let Some(db_path) = &cli.db_path {
        let store = RocksDBStore::open(db_path).into_diagnostic()?;
        Ok((Arc::new(store.clone()), Arc::new(store)))
    } else {
        Ok((
            Arc::new(InMemoryEscrowStore::new()),
            Arc::new(InMemorySettingsStore::new()),
        ))
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn build_stores(_cli: &Cli) -> Result<(EscrowStoreRef, SettingsStoreRef)> {
    Ok((
        Arc::new(InMemoryEscrowStore::new()),
        Arc::new(InMemorySettingsStore::new()),
    ))
}
