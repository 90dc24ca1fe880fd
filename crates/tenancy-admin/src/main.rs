//! Tenancy admin
//!
//! Operator tool for schema-per-tenant PostgreSQL databases.

mod cli;

use clap::Parser;
use helios_tenancy::backends::postgres::PostgresBackend;
use helios_tenancy::{Backend, RequestContext, TenancyEngine};
use tracing::{info, warn};

use cli::{Cli, Command, load_objects};

/// Initializes tracing with `RUST_LOG`, falling back to `level`.
fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("helios_tenancy={},tenancy_admin={}", level, level))
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn create_backend(cli: &Cli) -> anyhow::Result<PostgresBackend> {
    let backend = match cli.database_url.as_deref() {
        Some(url) => {
            info!("Initializing PostgreSQL backend from connection string");
            PostgresBackend::from_connection_string(url).await?
        }
        None => {
            info!("Initializing PostgreSQL backend from environment variables");
            PostgresBackend::from_env().await?
        }
    };
    Ok(backend)
}

/// Context for the command: deadline from the flags, cancelled on Ctrl-C.
fn command_context(cli: &Cli) -> RequestContext {
    let ctx = RequestContext::new().with_timeout(cli.timeout());
    let token = ctx.cancellation_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            token.cancel();
        }
    });
    ctx
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let backend = create_backend(&cli).await?;
    let engine = TenancyEngine::start(backend, cli.tenancy_config()).await?;
    let ctx = command_context(&cli);
    let provisioner = engine.provisioner();

    match &cli.command {
        Command::Provision {
            tenant,
            objects_dir,
        } => {
            let objects = load_objects(objects_dir)?;
            let schema = provisioner.provision(&ctx, tenant, &objects).await?;
            println!("provisioned {} ({} objects)", schema, objects.len());
        }
        Command::Exists { tenant } => {
            let exists = provisioner.schema_exists(&ctx, tenant).await?;
            println!("{}", exists);
        }
        Command::Drop { tenant, cascade } => {
            provisioner.drop_tenant(&ctx, tenant, *cascade).await?;
            println!("dropped {}", tenant);
        }
        Command::Check => {
            engine.backend().health_check().await?;
            let mut admin = engine.admin().lock().await;
            let rows = admin.query("SHOW search_path").await?;
            let path = rows.first().and_then(|row| row.get(0)).unwrap_or_default();
            println!("ok: administrative connection locked to {}", path);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);
    run(cli).await
}
