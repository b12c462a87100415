use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use termcolor::{BufferWriter, ColorChoice, ColorSpec, WriteColor};
use tokio::sync::oneshot;

use signit::config::{TIMESTAMP_SERVERS, resolve_timestamp_server};
use signit::output::{self, print_log_line};
use signit::signer::locate::{SIGNTOOL_INSTALL_INSTRUCTIONS, find_signtool, resolve_signtool};
use signit::{
    BatchCallbacks, BatchSummary, CredentialDiscovery, Identity, SignitConfig, Signer, StoreScope,
    error, success, warn,
};

// Colored status output ignores write errors (`let _ =`); stdin reads and
// file checks propagate with `?`.

#[derive(Parser)]
#[command(name = "signit")]
#[command(version, about = "Discover code signing certificates and batch-sign files with signtool")]
struct Cli {
    /// Path to config file (TOML)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Certificate store scope: user or machine
    #[arg(long, global = true)]
    store: Option<StoreScope>,

    /// Emit diagnostics as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Enable debug diagnostics
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List code signing certificates with a private key
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Sign files with signtool
    Sign {
        /// Files to sign, in order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// SHA-1 thumbprint of the certificate to use
        #[arg(long, alias = "fingerprint")]
        thumbprint: Option<String>,

        /// Timestamp server preset name or URL
        #[arg(long)]
        timestamp: Option<String>,

        /// Path to signtool.exe
        #[arg(long)]
        signtool: Option<PathBuf>,

        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// List timestamp server presets
    Servers,

    /// Show which signtool.exe would be used
    Locate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    signit::logging::init_tracing(cli.log_json, cli.verbose);

    let mut config = match &cli.config {
        Some(path) => SignitConfig::load(path)
            .await
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SignitConfig::default(),
    };
    if let Some(store) = cli.store {
        config.store = store;
    }

    match cli.command {
        Command::List { json } => run_list(&config, json).await,
        Command::Sign {
            files,
            thumbprint,
            timestamp,
            signtool,
            yes,
        } => {
            if let Some(signtool) = signtool {
                config.signtool_path = Some(signtool);
            }
            if let Some(timestamp) = timestamp {
                config.timestamp_url = timestamp;
            }
            let success = run_sign(&config, files, thumbprint.as_deref(), yes).await?;
            if !success {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Servers => {
            show_servers();
            Ok(())
        }
        Command::Locate => run_locate(&config),
    }
}

async fn run_list(config: &SignitConfig, json: bool) -> Result<()> {
    let identities = CredentialDiscovery::from_config(config)
        .discover(config.store)
        .await
        .context("Failed to read the certificate store")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&identities)?);
    } else {
        output::print_identities(&identities);
    }
    Ok(())
}

fn normalize_thumbprint(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

fn select_identity(identities: Vec<Identity>, thumbprint: Option<&str>) -> Result<Identity> {
    match thumbprint {
        Some(wanted) => {
            let wanted = normalize_thumbprint(wanted);
            identities
                .into_iter()
                .find(|identity| normalize_thumbprint(&identity.fingerprint) == wanted)
                .with_context(|| format!("No usable signing certificate with thumbprint {wanted}"))
        }
        None => {
            let mut identities = identities;
            match identities.len() {
                0 => bail!("No code signing certificates with a private key found"),
                1 => Ok(identities.remove(0)),
                n => {
                    output::print_identities(&identities);
                    bail!("{n} certificates found; choose one with --thumbprint")
                }
            }
        }
    }
}

/// Keep existing files in the given order, dropping repeats.
fn collect_files(files: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(files.len());
    for file in files {
        if !file.is_file() {
            bail!("Not a file: {}", file.display());
        }
        if seen.insert(file.clone()) {
            kept.push(file);
        }
    }
    Ok(kept)
}

async fn run_sign(
    config: &SignitConfig,
    files: Vec<PathBuf>,
    thumbprint: Option<&str>,
    assume_yes: bool,
) -> Result<bool> {
    let signtool = resolve_signtool(config.signtool_path.as_deref())?;
    let timestamp_url = resolve_timestamp_server(&config.timestamp_url)?;
    let files = collect_files(files)?;

    let identities = CredentialDiscovery::from_config(config)
        .discover(config.store)
        .await
        .context("Failed to read the certificate store")?;
    let identity = select_identity(identities, thumbprint)?;

    if !assume_yes {
        let question = format!(
            "Sign {} file(s) with certificate '{}'?",
            files.len(),
            identity.subject
        );
        if !output::prompt_yes_no(&question)? {
            warn!("Signing cancelled");
            return Ok(true);
        }
    }

    output::print_batch_header(&identity, &timestamp_url, files.len());

    let (done_tx, mut done_rx) = oneshot::channel();
    let callbacks = BatchCallbacks::new()
        .on_line(print_log_line)
        .on_complete(move |outcomes| {
            let _ = done_tx.send(outcomes);
        });

    let signer = Signer::new(signtool);
    let handle = signer.sign_all(files, identity.fingerprint, timestamp_url, callbacks);

    let outcomes = tokio::select! {
        result = &mut done_rx => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; finishing the current file");
            handle.cancel();
            done_rx.await
        }
    }
    .context("Signing batch ended without a result")?;
    handle.wait().await;

    let summary = BatchSummary::from_outcomes(&outcomes);
    output::print_summary(&summary);

    if summary.all_succeeded() {
        success!("All {} file(s) signed", summary.total);
    } else {
        error!("{} of {} file(s) failed", summary.failed, summary.total);
    }
    Ok(summary.all_succeeded())
}

fn show_servers() {
    let bufwtr = BufferWriter::stdout(ColorChoice::Auto);
    let mut buffer = bufwtr.buffer();
    for (name, url) in TIMESTAMP_SERVERS {
        let _ = buffer.set_color(ColorSpec::new().set_bold(true));
        let _ = write!(&mut buffer, "{name:<12}");
        let _ = buffer.reset();
        let _ = writeln!(&mut buffer, "{url}");
    }
    let _ = bufwtr.print(&buffer);
}

fn run_locate(config: &SignitConfig) -> Result<()> {
    match config.signtool_path.as_deref() {
        Some(path) => report_signtool(resolve_signtool(Some(path))?.as_path()),
        None => match find_signtool() {
            Some(path) => report_signtool(&path),
            None => {
                error!("{SIGNTOOL_INSTALL_INSTRUCTIONS}");
                std::process::exit(1);
            }
        },
    }
    Ok(())
}

fn report_signtool(path: &Path) {
    success!("Found: {}", path.display());
}
