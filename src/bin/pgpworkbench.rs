//! pgpworkbench: guided OpenPGP operations from the command line
//!
//! Commands:
//!   inspect <key>                       - show key metadata (`--json` for machine output)
//!   encrypt -r <key>... [-i in] [-o out] - encrypt to one or more recipients
//!   decrypt -k <key> [-i in] [-o out]    - decrypt with a private key
//!   sign -k <key> [--detached]           - cleartext or detached signature
//!   verify -k <key> [-s sig]             - verify cleartext, inline or detached signatures
//!
//! Texts are read from files, or from stdin when `-i` is omitted.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use secrecy::{ExposeSecret, SecretString};
use tracing_subscriber::EnvFilter;

use pgpworkbench::{
    armor, Config, DecryptWorkflow, EncryptWorkflow, ExpiryStatus, Field, InspectWorkflow,
    KeyInfo, Progress, RpgpBackend, SignWorkflow, VerifyWorkflow, Workflow,
};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "pgpworkbench",
    version,
    about = "Guided OpenPGP encrypt, decrypt, sign, verify and key inspection"
)]
struct Cli {
    /// Path to pgpworkbench.toml configuration file
    #[arg(long, short = 'c', env = "PGPWORKBENCH_CONFIG", default_value = "pgpworkbench.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show metadata of an armored public or private key
    Inspect {
        /// Armored key file
        key: PathBuf,
        /// Print the key information as JSON
        #[arg(long)]
        json: bool,
    },

    /// Encrypt a message to one or more recipients
    Encrypt {
        /// Recipient public key file (repeatable; a file may hold several keys)
        #[arg(long, short = 'r', required = true)]
        recipient: Vec<PathBuf>,
        /// Plaintext file (default: stdin)
        #[arg(long, short = 'i')]
        input: Option<PathBuf>,
        /// Output file (default: stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Decrypt a message with a private key
    Decrypt {
        /// Private key file
        #[arg(long, short = 'k')]
        key: PathBuf,
        /// Armored message file (default: stdin)
        #[arg(long, short = 'i')]
        input: Option<PathBuf>,
        /// Output file (default: stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Read the passphrase from this environment variable instead of prompting
        #[arg(long)]
        passphrase_env: Option<String>,
    },

    /// Sign a message with a private key
    Sign {
        /// Private key file
        #[arg(long, short = 'k')]
        key: PathBuf,
        /// Message file (default: stdin)
        #[arg(long, short = 'i')]
        input: Option<PathBuf>,
        /// Output file (default: stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Produce a detached signature instead of a cleartext-signed message
        #[arg(long)]
        detached: bool,
        /// Read the passphrase from this environment variable instead of prompting
        #[arg(long)]
        passphrase_env: Option<String>,
    },

    /// Verify a signed message or a detached signature
    Verify {
        /// Signer public key file
        #[arg(long, short = 'k')]
        key: PathBuf,
        /// Signed message, or the signed data when --signature is given (default: stdin)
        #[arg(long, short = 'i')]
        input: Option<PathBuf>,
        /// Detached signature file
        #[arg(long, short = 's')]
        signature: Option<PathBuf>,
    },
}

// ── Entry point ────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Arc::new(
        Config::load(&cli.config)
            .with_context(|| format!("loading config: {}", cli.config.display()))?,
    );
    let backend = Arc::new(RpgpBackend::new());

    match cli.command {
        Commands::Inspect { key, json } => {
            cmd_inspect(&InspectWorkflow::new(backend, Arc::clone(&config)), &config, &key, json)
                .await
        }
        Commands::Encrypt { recipient, input, output } => {
            cmd_encrypt(
                &EncryptWorkflow::new(backend, config),
                &recipient,
                input.as_deref(),
                output.as_deref(),
            )
            .await
        }
        Commands::Decrypt { key, input, output, passphrase_env } => {
            cmd_decrypt(
                &DecryptWorkflow::new(backend, config),
                &key,
                input.as_deref(),
                output.as_deref(),
                passphrase_env.as_deref(),
            )
            .await
        }
        Commands::Sign { key, input, output, detached, passphrase_env } => {
            cmd_sign(
                &SignWorkflow::new(backend, config),
                &key,
                input.as_deref(),
                output.as_deref(),
                detached,
                passphrase_env.as_deref(),
            )
            .await
        }
        Commands::Verify { key, input, signature } => {
            cmd_verify(
                &VerifyWorkflow::new(backend, config),
                &key,
                input.as_deref(),
                signature.as_deref(),
            )
            .await
        }
    }
}

// ── Commands ───────────────────────────────────────────────────────────────────

async fn cmd_inspect(
    workflow: &InspectWorkflow,
    config: &Config,
    key: &Path,
    json: bool,
) -> Result<()> {
    let text = read_text(Some(key))?;
    let info = workflow.inspect(&text).await?;
    workflow.clear_all();

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        print_key_info(&info, config);
    }
    Ok(())
}

async fn cmd_encrypt(
    workflow: &EncryptWorkflow,
    recipients: &[PathBuf],
    input: Option<&Path>,
    output: Option<&Path>,
) -> Result<()> {
    for path in recipients {
        let text = read_text(Some(path))?;
        let blocks = armor::split_blocks(&text);
        if blocks.is_empty() {
            // Let the inspector report what is wrong with it.
            workflow.add_recipient(&text)?;
        }
        for block in blocks {
            workflow.add_recipient(block)?;
        }
    }
    workflow.set_field(Field::Message, &read_text(input)?)?;

    workflow.submit().await?;
    let ciphertext = workflow.output().context("encryption produced no output")?;
    workflow.clear_all();
    write_text(output, &ciphertext)
}

async fn cmd_decrypt(
    workflow: &DecryptWorkflow,
    key: &Path,
    input: Option<&Path>,
    output: Option<&Path>,
    passphrase_env: Option<&str>,
) -> Result<()> {
    workflow.set_field(Field::PrivateKey, &read_text(Some(key))?)?;
    workflow.set_field(Field::Message, &read_text(input)?)?;
    supply_passphrase(workflow, passphrase_env).await?;

    workflow.submit().await?;
    let plaintext = workflow.output().context("decryption produced no output")?;
    workflow.clear_all();
    write_text(output, &plaintext)
}

async fn cmd_sign(
    workflow: &SignWorkflow,
    key: &Path,
    input: Option<&Path>,
    output: Option<&Path>,
    detached: bool,
    passphrase_env: Option<&str>,
) -> Result<()> {
    workflow.set_field(Field::PrivateKey, &read_text(Some(key))?)?;
    workflow.set_field(Field::Message, &read_text(input)?)?;
    workflow.set_detached(detached);
    supply_passphrase(workflow, passphrase_env).await?;

    workflow.submit().await?;
    let signed = workflow.output().context("signing produced no output")?;
    workflow.clear_all();
    write_text(output, &signed)
}

async fn cmd_verify(
    workflow: &VerifyWorkflow,
    key: &Path,
    input: Option<&Path>,
    signature: Option<&Path>,
) -> Result<()> {
    workflow.set_field(Field::PublicKey, &read_text(Some(key))?)?;
    workflow.set_field(Field::Message, &read_text(input)?)?;
    if let Some(path) = signature {
        workflow.set_field(Field::Signature, &read_text(Some(path))?)?;
    }

    workflow.submit().await?;
    let result = workflow.result().context("verification produced no result")?;
    workflow.clear_all();

    if !result.valid {
        anyhow::bail!(
            "BAD signature: {}",
            result.error.as_deref().unwrap_or("signature does not verify")
        );
    }
    eprintln!(
        "Good signature from {}{}",
        result.signed_by.as_deref().unwrap_or("(no user ID)"),
        result
            .signed_at
            .map(|t| format!(", made {}", t.format("%Y-%m-%d %H:%M:%S UTC")))
            .unwrap_or_default()
    );
    if let Some(message) = result.message {
        print!("{message}");
    }
    Ok(())
}

// ── Helpers ────────────────────────────────────────────────────────────────────

/// Validate the key and, if it is protected, set the passphrase from the
/// environment or an interactive prompt.
async fn supply_passphrase<W: Workflow>(workflow: &W, passphrase_env: Option<&str>) -> Result<()> {
    if workflow.validate_key().await? != Progress::NeedsPassphrase {
        return Ok(());
    }
    let passphrase = read_passphrase(passphrase_env)?;
    workflow.set_field(Field::Passphrase, passphrase.expose_secret())?;
    Ok(())
}

fn read_passphrase(passphrase_env: Option<&str>) -> Result<SecretString> {
    if let Some(var) = passphrase_env {
        let value = std::env::var(var)
            .with_context(|| format!("passphrase variable {var} is not set"))?;
        return Ok(SecretString::from(value));
    }
    let value = rpassword::prompt_password("Passphrase: ").context("reading passphrase")?;
    Ok(SecretString::from(value))
}

fn read_text(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display())),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("reading stdin")?;
            Ok(text)
        }
    }
}

fn write_text(path: Option<&Path>, text: &str) -> Result<()> {
    match path {
        Some(path) => std::fs::write(path, text)
            .with_context(|| format!("writing {}", path.display())),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(text.as_bytes())?;
            stdout.flush()?;
            Ok(())
        }
    }
}

fn print_key_info(info: &KeyInfo, config: &Config) {
    println!("Type:         {}", info.kind);
    println!("Fingerprint:  {}", info.fingerprint);
    println!("Key ID:       {}", info.key_id);
    println!("Algorithm:    {}", describe_algorithm(&info.algorithm, info.curve.as_deref(), info.bit_size));
    println!("Created:      {}", info.created.format("%Y-%m-%d"));

    let expiry = match info.expiry_status(Utc::now(), config) {
        ExpiryStatus::Never => "never".to_string(),
        ExpiryStatus::Expired => "EXPIRED".to_string(),
        ExpiryStatus::ExpiringThisWeek { days } | ExpiryStatus::ExpiringSoon { days } => {
            format!("in {days} days")
        }
        ExpiryStatus::Valid => "valid".to_string(),
    };
    match info.expiration_date {
        Some(date) => println!("Expires:      {} ({expiry})", date.format("%Y-%m-%d")),
        None => println!("Expires:      {expiry}"),
    }
    if info.is_private() {
        let protection = if info.is_encrypted { "passphrase-protected" } else { "unprotected" };
        println!("Protection:   {protection}");
    }
    if info.is_revoked {
        println!("Revoked:      yes");
    }
    println!("Capabilities: {}", info.capabilities.tags().join(", "));
    for uid in &info.user_ids {
        println!("User ID:      {uid}");
    }
    for subkey in &info.subkeys {
        println!(
            "Subkey:       {} {} [{}]{}",
            subkey.key_id,
            describe_algorithm(&subkey.algorithm, subkey.curve.as_deref(), subkey.bit_size),
            subkey.capabilities.tags().join(", "),
            if subkey.is_revoked { " (revoked)" } else { "" }
        );
    }
}

fn describe_algorithm(algorithm: &str, curve: Option<&str>, bit_size: Option<u32>) -> String {
    match (curve, bit_size) {
        (Some(curve), _) => format!("{algorithm} ({curve})"),
        (None, Some(bits)) => format!("{algorithm} {bits}"),
        (None, None) => algorithm.to_string(),
    }
}
