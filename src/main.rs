use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::de::DeserializeOwned;
use std::io::Write;
use std::path::{Path, PathBuf};
use termcolor::{BufferWriter, ColorChoice};

use kodegen_bundler_signgroup::config::{ENV_EXPORT_METHOD, ENV_TEAM_ID};
use kodegen_bundler_signgroup::output::{
    print_ambiguity, print_failure, print_listing, print_resolution, print_trace,
};
use kodegen_bundler_signgroup::{
    load_targets, resolve, success, AmbiguityPolicy, ExportMethod, ExportOptions,
    IdentityDocument, IdentityStore, Outcome, ResolveConfig, TargetDocument,
};

// Terminal colouring and status lines ignore write errors (`let _ =`); file
// reads, the export options write and JSON output propagate them.

#[derive(Parser)]
#[command(name = "kodegen_signgroup")]
#[command(version, about = "Resolve the code signing group for an archive export")]
struct Cli {
    /// Path to config file (TOML); defaults to ~/.config/kodegen/signgroup.toml
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pick a certificate and one profile per target bundle
    Resolve(ResolveArgs),

    /// List installed certificates and provisioning profiles
    List {
        /// Identity document (JSON)
        #[arg(long)]
        identities: Option<PathBuf>,
    },
}

#[derive(Args)]
struct ResolveArgs {
    /// Identity document (JSON)
    #[arg(long)]
    identities: Option<PathBuf>,

    /// Targets document (JSON)
    #[arg(long)]
    targets: Option<PathBuf>,

    /// development, ad-hoc, enterprise, app-store or none
    #[arg(long, env = ENV_EXPORT_METHOD)]
    method: Option<String>,

    /// Only consider certificates and profiles of this team
    #[arg(long, env = ENV_TEAM_ID)]
    team_id: Option<String>,

    /// The archive was signed with a platform-managed profile
    #[arg(long)]
    archived_with_managed_profile: bool,

    /// Fail instead of warning when several signing groups match
    #[arg(long)]
    strict: bool,

    /// Write exportOptions.plist to this path
    #[arg(long)]
    export_options: Option<PathBuf>,

    /// Print the resolution as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = ResolveConfig::load_or_default(cli.config.as_deref()).await?;

    match cli.command {
        Command::Resolve(args) => run_resolve(config, args).await,
        Command::List { identities } => {
            if let Some(path) = identities {
                config.identities = path;
            }
            let store = load_store(&config.identities).await?;
            print_listing(&store);
            Ok(())
        }
    }
}

async fn run_resolve(mut config: ResolveConfig, args: ResolveArgs) -> Result<()> {
    config.apply_overrides(args.method.as_deref(), args.team_id.as_deref());
    if let Some(path) = args.identities {
        config.identities = path;
    }
    if let Some(path) = args.targets {
        config.targets = path;
    }
    if let Some(path) = args.export_options {
        config.export_options = Some(path);
    }
    if args.archived_with_managed_profile {
        config.archived_with_managed_profile = true;
    }
    if args.strict {
        config.ambiguity = AmbiguityPolicy::Fail;
    }

    let export_options = config.export_options_path()?.map(Path::to_path_buf);
    if config.export_method()? == ExportMethod::NoResign {
        success!("Export method 'none': the archive keeps its existing signature");
        return Ok(());
    }

    let store = load_store(&config.identities).await?;
    let document: TargetDocument = read_json(&config.targets).await?;
    let request = config.request(load_targets(document)?)?;

    let resolution = match resolve(&store, &request) {
        Ok(Outcome::Resolved(resolution)) => resolution,
        Ok(Outcome::NotResigned) => return Ok(()),
        Err(err) => {
            print_failure(&err);
            std::process::exit(1);
        }
    };

    if args.json {
        let bufwtr = BufferWriter::stdout(ColorChoice::Never);
        let mut buffer = bufwtr.buffer();
        writeln!(&mut buffer, "{}", serde_json::to_string_pretty(&resolution)?)?;
        bufwtr.print(&buffer)?;
    } else {
        print_trace(&resolution.trace);
        if let Some(ambiguity) = &resolution.ambiguity {
            print_ambiguity(ambiguity);
        }
        print_resolution(&resolution);
    }

    if let Some(path) = &export_options {
        let xml = ExportOptions::from_resolved(&resolution.group).to_xml()?;
        tokio::fs::write(path, xml)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        success!("Wrote export options to {}", path.display());
    }

    Ok(())
}

async fn load_store(path: &Path) -> Result<IdentityStore> {
    let document: IdentityDocument = read_json(path).await?;
    Ok(IdentityStore::load(document, chrono::Utc::now())?)
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}
