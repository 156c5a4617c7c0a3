use std::collections::HashSet;

use admin_authz::config::AuthzConfig;
use admin_authz::db::seed;
use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::migrate::Migrator;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

static MIGRATOR: Migrator = sqlx::migrate!();

#[derive(Parser, Debug)]
#[command(author, version, about = "admin-authz maintenance tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Insert the built-in permission catalog and the super-admin role
    SeedCatalog,
    /// Assign a role directly to a user (by email)
    GrantRole {
        email: String,
        /// Role name; defaults to the configured super-admin role
        #[arg(long)]
        role: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Try to load env from CWD; fall back to the crate-local `.env`.
    if dotenv().is_err() {
        let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();
    let pool = get_pool().await?;

    match cli.command {
        Commands::MigrateRun => {
            MIGRATOR.run(&pool).await.context("failed to run migrations")?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            print_status(&pool).await?;
        }
        Commands::SeedCatalog => {
            let config = AuthzConfig::from_env()?;
            let inserted = seed::seed_catalog(&pool, &config.super_admin_role).await?;
            println!("Seeded catalog ({inserted} new rows)");
        }
        Commands::GrantRole { email, role } => {
            let role = match role {
                Some(role) => role,
                None => AuthzConfig::from_env()?.super_admin_role,
            };
            let (user_id, role_id) = seed::grant_role(&pool, &email, &role).await?;
            println!("Granted role {role} ({role_id}) to {email} ({user_id})");
        }
    }

    Ok(())
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to database")
}

async fn print_status(pool: &SqlitePool) -> anyhow::Result<()> {
    // If the migrations table doesn't exist, nothing is applied yet
    let table: Option<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'",
    )
    .fetch_optional(pool)
    .await?;

    let applied_versions: HashSet<i64> = if table.is_some() {
        sqlx::query_scalar("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?
            .into_iter()
            .collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in MIGRATOR.iter() {
        let status = if applied_versions.contains(&migration.version) {
            "applied"
        } else {
            "pending"
        };
        let desc = migration.description.trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, migration.version, name);
    }

    Ok(())
}
