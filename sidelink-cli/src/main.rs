//! CLI for the sidelink streaming package installer.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use sidelink::{Control, Destination, Installer};
use sidelink_proto::{Client, TcpTransport};

#[derive(Parser)]
#[command(name = "sidelink", version, about = "Stream packages from a host and install them")]
struct Cli {
    /// Host endpoint to connect to.
    #[arg(long, global = true, default_value = "127.0.0.1:2000")]
    host: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List packages exported by the host.
    #[command(visible_alias = "ls")]
    List,

    /// Stream a package from the host and install it.
    Install {
        /// Package name as shown by `list`.
        name: String,

        /// Destination root (defaults to $SIDELINK_HOME or the platform
        /// data directory).
        #[arg(long)]
        dest: Option<String>,

        /// Keep the package's required-firmware field instead of zeroing it.
        #[arg(long)]
        keep_required_version: bool,
    },

    /// Ask the host process to shut down.
    Exit,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = Cli::parse().dispatch() {
        eprintln!("sidelink: {e:#}");
        std::process::exit(1);
    }
}

impl Cli {
    fn dispatch(self) -> Result<()> {
        let mut transport = TcpTransport::connect(&self.host)
            .with_context(|| format!("connecting to {}", self.host))?;

        match self.command {
            Command::List => list(&mut transport),
            Command::Install {
                name,
                dest,
                keep_required_version,
            } => install(&mut transport, &name, dest.as_deref(), keep_required_version),
            Command::Exit => {
                Client::new(&mut transport).exit()?;
                Ok(())
            }
        }
    }
}

fn list(transport: &mut TcpTransport) -> Result<()> {
    let entries = Client::new(transport).list()?;
    if entries.is_empty() {
        println!("No packages.");
        return Ok(());
    }
    println!("{:<60} {:>10}", "NAME", "SIZE");
    for entry in &entries {
        println!("{:<60} {:>10}", entry.name, human_size(entry.size));
    }
    Ok(())
}

fn install(
    transport: &mut TcpTransport,
    name: &str,
    dest: Option<&str>,
    keep_required_version: bool,
) -> Result<()> {
    // The listing is the only place the package size comes from.
    let entries = Client::new(&mut *transport).list()?;
    let Some(entry) = entries.iter().find(|e| e.name == name) else {
        bail!("host does not export {name:?}");
    };
    let size = entry.size;

    let mut dest = match dest {
        Some(root) => Destination::open(root)?,
        None => Destination::open_default()?,
    };

    let report = Installer::new(&mut dest.storage, &mut dest.db, &mut dest.registry)
        .with_tickets(&mut dest.tickets)
        .ignore_required_version(!keep_required_version)
        .install(transport, name, size, |done, total| {
            if total > 0 {
                let percent = done.saturating_mul(100) / total.max(1);
                eprint!("\r{} / {} ({percent}%)   ", human_size(done), human_size(total));
            } else {
                eprint!("\r{}   ", human_size(done));
            }
            Control::Continue
        })?;
    eprintln!();

    println!(
        "installed {} content items, {} streamed",
        report.contents_installed,
        human_size(report.installed_bytes)
    );
    for meta in &report.metas {
        match meta.key {
            Some(key) => println!("  title {:016x} v{}", key.id, key.version),
            None => println!("  {} installed via degraded container scan", meta.id),
        }
        if !meta.registered {
            println!("  note: title record not pushed; a reboot may be needed");
        }
    }
    Ok(())
}

/// Formats bytes into a human-readable size string.
#[allow(clippy::cast_precision_loss)]
fn human_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    for unit in UNITS {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} TB")
}
