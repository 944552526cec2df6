mod cmd;

use clap::{Parser, Subcommand};

use cairn_core::backend::fs::FsBackend;
use cairn_core::error::{CairnError, Result};
use cairn_core::repository::Repository;

#[derive(Parser)]
#[command(
    name = "cairn",
    version,
    about = "Content-addressed, deduplicating snapshot backups",
    after_help = "\
Environment variables:
  CAIRN_REPOSITORY   Default repository path (overridden by -R)
  CAIRN_PASSPHRASE   Repository passphrase (skips interactive use)

Exit codes:
  0  success
  1  user error
  2  repository error"
)]
struct Cli {
    /// Repository path (defaults to CAIRN_REPOSITORY)
    #[arg(short = 'R', long = "repository", global = true)]
    repository: Option<String>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new repository
    Init {
        /// Encrypt the repository (passphrase from CAIRN_PASSPHRASE)
        #[arg(long)]
        encrypted: bool,
    },

    /// Take a snapshot of a directory
    Backup {
        /// Snapshot name
        #[arg(long, default_value = "")]
        name: String,

        /// Tags attached to the snapshot (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Directory to snapshot
        source: String,
    },

    /// Restore a snapshot into a directory
    Restore {
        /// Snapshot id, unique prefix, or "latest"
        snapshot: String,

        /// Target directory
        target: String,
    },

    /// List snapshots, or a snapshot's tree
    Ls {
        /// Snapshot id, unique prefix, or "latest"
        snapshot: Option<String>,

        /// Path inside the snapshot
        #[arg(default_value = "/")]
        path: String,
    },

    /// Show repository information
    Info,

    /// Verify packfiles and snapshot reachability
    Check,

    /// Repository maintenance
    Maintenance {
        /// Remove packfiles referenced by no state
        #[arg(long)]
        remove_orphans: bool,

        /// Merge all published states into one
        #[arg(long)]
        merge_states: bool,

        /// Forcibly remove the advisory lock
        #[arg(long)]
        break_lock: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let verbose = cli.verbose > 0;
    let code = match run(cli, verbose) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {e}");
            exit_code(&e)
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli, verbose: bool) -> Result<()> {
    match cli.command {
        Commands::Init { encrypted } => cmd::init::run(&repo_path(&cli.repository)?, encrypted),
        Commands::Backup { name, tags, source } => {
            let repo = open_repo(&cli.repository)?;
            cmd::backup::run(&repo, &source, name, tags, verbose)
        }
        Commands::Restore { snapshot, target } => {
            let repo = open_repo(&cli.repository)?;
            cmd::restore::run(&repo, &snapshot, &target, verbose)
        }
        Commands::Ls { snapshot, path } => {
            let repo = open_repo(&cli.repository)?;
            match snapshot {
                None => cmd::ls::list_snapshots(&repo),
                Some(snapshot) => cmd::ls::list_tree(&repo, &snapshot, &path),
            }
        }
        Commands::Info => {
            let repo = open_repo(&cli.repository)?;
            cmd::info::run(&repo)
        }
        Commands::Check => {
            let repo = open_repo(&cli.repository)?;
            cmd::check::run(&repo)
        }
        Commands::Maintenance {
            remove_orphans,
            merge_states,
            break_lock,
        } => {
            let repo = open_repo(&cli.repository)?;
            cmd::maintenance::run(&repo, remove_orphans, merge_states, break_lock)
        }
    }
}

fn repo_path(repository: &Option<String>) -> Result<String> {
    repository
        .clone()
        .or_else(|| std::env::var("CAIRN_REPOSITORY").ok())
        .ok_or_else(|| {
            CairnError::InvalidParams(
                "no repository given (use -R or set CAIRN_REPOSITORY)".into(),
            )
        })
}

fn open_repo(repository: &Option<String>) -> Result<Repository> {
    let path = repo_path(repository)?;
    let passphrase = std::env::var("CAIRN_PASSPHRASE").ok();
    Repository::open(Box::new(FsBackend::new(&path)), passphrase.as_deref())
}

/// Exit-code policy: user mistakes are 1, repository-side failures are 2.
fn exit_code(e: &CairnError) -> i32 {
    match e {
        CairnError::InvalidParams(_) | CairnError::Config(_) | CairnError::NotFound(_) => 1,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_policy() {
        assert_eq!(exit_code(&CairnError::InvalidParams("x".into())), 1);
        assert_eq!(exit_code(&CairnError::NotFound("x".into())), 1);
        assert_eq!(exit_code(&CairnError::WrongKey), 2);
        assert_eq!(exit_code(&CairnError::Corruption("x".into())), 2);
        assert_eq!(
            exit_code(&CairnError::Io(std::io::Error::other("x"))),
            2
        );
    }
}
