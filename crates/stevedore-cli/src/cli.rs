use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "stevedore",
    version,
    about = "Maintenance for content-addressed pack repositories",
    after_help = "\
Repository layout:
  <repo>/stevedore.config   repository marker; the maintenance lock lives at
                            <repo>/stevedore.config.mlock
  <repo>/blobs/             pack (p*, q*), index (n*) and manifest (m*) blobs

Only the recorded maintenance owner (user@host) may run maintenance; use
`stevedore init --owner` to set it."
)]
pub(crate) struct Cli {
    /// Path to the repository directory
    #[arg(short = 'R', long = "repo", global = true, default_value = ".")]
    pub repo: String,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Initialize a repository and record the maintenance owner
    Init {
        /// Maintenance owner as user@host (defaults to the local identity)
        #[arg(long)]
        owner: Option<String>,
    },

    /// Pack blob operations
    Blob {
        #[command(subcommand)]
        command: BlobCommand,
    },

    /// Content operations
    Content {
        #[command(subcommand)]
        command: ContentCommand,
    },

    /// Manifest operations
    Manifest {
        #[command(subcommand)]
        command: ManifestCommand,
    },

    /// Repository maintenance
    Maintenance {
        #[command(subcommand)]
        command: MaintenanceCommand,
    },
}

#[derive(Subcommand)]
pub(crate) enum BlobCommand {
    /// Garbage-collect unused blobs
    Gc {
        /// Whether to delete unused blobs (anything but 'yes' only reports)
        #[arg(long, default_value = "")]
        delete: String,

        /// Number of parallel blob deletions
        #[arg(long, default_value_t = 16)]
        parallel: usize,

        /// Only GC blobs with the given prefix
        #[arg(long, default_value = "")]
        prefix: String,

        /// Safety level (full|none)
        #[arg(long, default_value = "full")]
        safety: String,
    },
}

#[derive(Subcommand)]
pub(crate) enum ContentCommand {
    /// Rewrite contents into fresh packs using the most recent format
    Rewrite {
        /// Identifiers of contents to rewrite
        ids: Vec<String>,

        /// Number of parallel workers
        #[arg(long, default_value_t = 16)]
        parallelism: usize,

        /// Rewrite contents from short packs
        #[arg(long = "short")]
        short_packs: bool,

        /// Rewrite contents whose pack format is older than this version
        #[arg(long, default_value_t = -1)]
        format_version: i32,

        /// Only rewrite contents from pack blobs with the given prefix
        #[arg(long, default_value = "")]
        pack_prefix: String,

        /// Lower bound of the content id range to rewrite
        #[arg(long)]
        content_id_range_min: Option<String>,

        /// Upper bound of the content id range to rewrite
        #[arg(long)]
        content_id_range_max: Option<String>,

        /// Do not actually rewrite, only print what would happen
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Safety level (full|none)
        #[arg(long, default_value = "full")]
        safety: String,
    },
}

#[derive(Subcommand)]
pub(crate) enum ManifestCommand {
    /// List manifest items
    #[command(alias = "ls")]
    List {
        /// Only show manifests with matching key:value labels
        #[arg(long = "filter")]
        filter: Vec<String>,

        /// Label keys to sort by
        #[arg(long = "sort")]
        sort: Vec<String>,

        /// Emit JSON instead of rows
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub(crate) enum MaintenanceCommand {
    /// Run repository maintenance
    Run {
        /// Maintenance mode (auto|quick|full)
        #[arg(long, default_value = "auto")]
        mode: String,

        /// Safety level (full|none)
        #[arg(long, default_value = "full")]
        safety: String,
    },

    /// Show maintenance parameters and schedule
    Info,
}
