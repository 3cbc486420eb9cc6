//! `arcad` - a headless controller for the Arca secrets vault.
//!
//! This binary is the host-facing driver other front ends (a GUI, a test
//! harness, an operator's shell) would otherwise embed directly: it wires up
//! `arca_core::Controller` and exposes its operations as subcommands.
//!
//! There is no inactivity monitor here — `serve` simply blocks until
//! interrupted. A host that wants auto-lock-on-idle calls `Controller::lock`
//! on its own timer; that policy is not this binary's concern.

use arca_core::backup::ImportOptions;
use arca_core::model::ApiKeyPermissions;
use arca_core::{Controller, ControllerPaths, CoreError};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "arcad")]
#[command(about = "Arca secrets vault - headless controller")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new vault at the configured path.
    Init {
        #[arg(long, env = "ARCA_MASTER_PASSWORD")]
        password: String,
    },
    /// Unlock the vault and run the IPC server until interrupted.
    Serve {
        #[arg(long, env = "ARCA_MASTER_PASSWORD")]
        password: String,
    },
    /// Unlock, add a secret, persist, lock.
    AddSecret {
        #[arg(long, env = "ARCA_MASTER_PASSWORD")]
        password: String,
        key: String,
        value: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Unlock, list secret keys, lock.
    ListSecrets {
        #[arg(long, env = "ARCA_MASTER_PASSWORD")]
        password: String,
    },
    /// Unlock, generate a full-access API key, lock.
    GenerateKey {
        #[arg(long, env = "ARCA_MASTER_PASSWORD")]
        password: String,
        name: String,
    },
    /// Unlock, export the vault to an encrypted backup archive, lock.
    Export {
        #[arg(long, env = "ARCA_MASTER_PASSWORD")]
        password: String,
        #[arg(long)]
        export_password: String,
        path: PathBuf,
    },
    /// Unlock, import secrets and API-key stubs from a backup archive, lock.
    Import {
        #[arg(long, env = "ARCA_MASTER_PASSWORD")]
        password: String,
        #[arg(long)]
        export_password: String,
        path: PathBuf,
        #[arg(long)]
        overwrite_existing: bool,
    },
    /// Unlock, print recent audit log entries, lock.
    AuditRecent {
        #[arg(long, env = "ARCA_MASTER_PASSWORD")]
        password: String,
        #[arg(default_value_t = 20)]
        count: usize,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

fn describe(err: CoreError) -> String {
    err.to_string()
}

fn open_and_unlock(password: &str) -> Result<Controller, String> {
    let controller = Controller::new(ControllerPaths::default()).map_err(|e| e.to_string())?;
    controller.unlock(password).map_err(describe)?;
    Ok(controller)
}

fn main() -> Result<(), String> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { password } => {
            let controller =
                Controller::new(ControllerPaths::default()).map_err(|e| e.to_string())?;
            controller.create_vault(&password).map_err(describe)?;
            println!("vault created");
        }

        Commands::Serve { password } => {
            let controller = open_and_unlock(&password)?;
            tracing::info!("arcad serving, press ctrl-c to stop");
            block_until_interrupted();
            controller.shutdown();
        }

        Commands::AddSecret { password, key, value, description } => {
            let controller = open_and_unlock(&password)?;
            controller.add_secret(key, value, description).map_err(describe)?;
            controller.shutdown();
            println!("secret added");
        }

        Commands::ListSecrets { password } => {
            let controller = open_and_unlock(&password)?;
            let secrets = controller.list_secrets().map_err(describe)?;
            for secret in secrets {
                println!("{}", secret.key);
            }
            controller.shutdown();
        }

        Commands::GenerateKey { password, name } => {
            let controller = open_and_unlock(&password)?;
            let (plaintext, entry) = controller
                .generate_api_key(name, None, ApiKeyPermissions::full())
                .map_err(describe)?;
            println!("id: {}", entry.id);
            println!("key: {plaintext}");
            controller.shutdown();
        }

        Commands::Export { password, export_password, path } => {
            let controller = open_and_unlock(&password)?;
            controller.export(&export_password, &path).map_err(describe)?;
            controller.shutdown();
            println!("exported to {}", path.display());
        }

        Commands::Import { password, export_password, path, overwrite_existing } => {
            let controller = open_and_unlock(&password)?;
            let result = controller
                .import(&export_password, &path, &ImportOptions { overwrite_existing })
                .map_err(describe)?;
            println!(
                "imported {} secrets ({} overwritten, {} skipped), {} api key stubs ({} skipped)",
                result.secrets_imported,
                result.secrets_overwritten,
                result.secrets_skipped,
                result.api_keys_imported,
                result.api_keys_skipped
            );
            controller.shutdown();
        }

        Commands::AuditRecent { password, count } => {
            let controller = open_and_unlock(&password)?;
            for entry in controller.audit_recent(count) {
                println!(
                    "{} {} {} {} success={}",
                    entry.timestamp,
                    entry.api_key_name,
                    entry.action,
                    entry.secret_key.unwrap_or_default(),
                    entry.success
                );
            }
            controller.shutdown();
        }
    }

    Ok(())
}

/// Parks the main thread so `serve` stays up until the process receives
/// `SIGINT`/`SIGTERM` and the OS tears it down; the retrieval pack carries no
/// signal-handling crate, so there is nothing to catch the signal with here.
fn block_until_interrupted() {
    loop {
        std::thread::park();
    }
}
