//! Identity CLI - administrative commands
//!
//! Usage:
//!   identity init-schema
//!   identity create-superuser --login <login> [--password <password>]
//!
//! Author: hephaex@gmail.com

use anyhow::Context;
use clap::{Parser, Subcommand};
use identity_api::auth::{hash_password, password::check_password_policy};
use identity_core::{
    AppConfig, CredentialStore, NewUser, PgIdentityStore, RoleStore, SUPERUSER_ROLE,
};

#[derive(Parser)]
#[command(name = "identity")]
#[command(about = "Identity service administration CLI")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database tables if they do not exist
    InitSchema,
    /// Create a user holding the superuser role
    ///
    /// An existing user with the same login is granted the role instead.
    CreateSuperuser {
        /// Login of the superuser
        #[arg(long)]
        login: String,
        /// Password for a newly created user
        #[arg(long, env = "IDENTITY_SUPERUSER_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = AppConfig::load()?;

    let store = PgIdentityStore::new(&config.database.postgres_url, config.database.pool_size)
        .await
        .context("failed to connect to PostgreSQL")?;
    store.init_schema().await?;

    let result = match cli.command {
        Commands::InitSchema => {
            println!("Schema is up to date");
            Ok(())
        }
        Commands::CreateSuperuser { login, password } => {
            create_superuser(&store, &login, password.as_deref()).await
        }
    };

    store.close().await;
    result
}

async fn create_superuser(
    store: &PgIdentityStore,
    login: &str,
    password: Option<&str>,
) -> anyhow::Result<()> {
    let user = match store.find_by_login(login).await? {
        Some(user) => {
            tracing::info!(login = %login, "User exists, granting superuser role");
            user
        }
        None => {
            let password = password.context(
                "a password is required to create a new user (--password or IDENTITY_SUPERUSER_PASSWORD)",
            )?;
            check_password_policy(password)?;

            let user = store
                .create_user(NewUser {
                    login: login.to_string(),
                    password_hash: hash_password(password)?,
                    first_name: String::new(),
                    last_name: String::new(),
                })
                .await?;
            tracing::info!(login = %login, user_id = %user.id, "User created");
            user
        }
    };

    let role = match store.find_role_by_name(SUPERUSER_ROLE).await? {
        Some(role) => role,
        None => store.create_role(SUPERUSER_ROLE).await?,
    };

    if store.roles_of(user.id).await?.contains(SUPERUSER_ROLE) {
        println!("'{}' is already a superuser", user.login);
        return Ok(());
    }

    store.assign_role(user.id, role.id).await?;
    println!("'{}' ({}) is now a superuser", user.login, user.id);

    Ok(())
}
