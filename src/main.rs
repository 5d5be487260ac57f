//! exnavy - notebook setup toolkit

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use exnavy::archive::{extract_package, extract_rerooted};
use exnavy::config::{self, ConfigValue};
use exnavy::downloaders::{self, DownloadRequest};
use exnavy::git::{self, CloneOptions, CloneOutcome, PatchOptions, PatchSource, UpdateOptions, UpdateOutcome};
use exnavy::packages::{self, DepsPlatform};
use exnavy::settings::Settings;
use exnavy::{env, util};

#[derive(Parser)]
#[command(name = "exnavy")]
#[command(version)]
#[command(about = "Archive, download and repository helpers for notebook environments")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Parallel jobs for batch operations
    #[arg(short, long, global = true)]
    jobs: Option<usize>,

    /// Default download directory
    #[arg(long, global = true, env = "EXNAVY_DOWNLOADS")]
    downloads: Option<PathBuf>,

    /// Authorization header sent to Hugging Face
    #[arg(long, global = true, env = "EXNAVY_AUTH_HEADER", hide_env_values = true)]
    header: Option<String>,

    /// Hide progress bars
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract an archive, stripping wrapper directories
    Extract {
        /// ZIP, RAR, .tar, .tar.gz or .tar.lz4 archive
        archive: PathBuf,
        /// Destination directory
        destination: PathBuf,
        /// Keep member paths as they are in the archive
        #[arg(long)]
        flat: bool,
        /// Keep files that already exist (only with --flat)
        #[arg(long, requires = "flat")]
        no_overwrite: bool,
    },

    /// Download one or more files
    Download {
        /// URLs, Drive links or mounted Drive paths
        #[arg(required = true)]
        urls: Vec<String>,
        /// Output directory (defaults to --downloads)
        #[arg(short, long)]
        dst: Option<PathBuf>,
        /// Output filename (single URL only)
        #[arg(short, long)]
        filename: Option<String>,
    },

    /// Fetch a file from a GitHub repository's master branch
    Github {
        /// owner/repo
        repo: String,
        /// Path of the file in the repository
        filename: String,
        #[arg(short, long)]
        dst: Option<PathBuf>,
    },

    /// Clone one or more repositories
    Clone {
        #[arg(required = true)]
        urls: Vec<String>,
        /// Directory clones are created in
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Target directory name (single URL only)
        #[arg(long)]
        directory: Option<PathBuf>,
        #[arg(short, long)]
        branch: Option<String>,
        /// Commit to check out after cloning
        #[arg(long)]
        commit: Option<String>,
        #[arg(short, long)]
        recursive: bool,
    },

    /// Fetch and pull repositories
    Update {
        /// Repository directories
        repos: Vec<PathBuf>,
        /// Update every repository directly under this directory
        #[arg(long, conflicts_with = "repos")]
        all: Option<PathBuf>,
        #[arg(long)]
        fetch: bool,
        /// Skip `git pull`
        #[arg(long)]
        no_pull: bool,
        /// Remote to fetch from
        #[arg(long)]
        remote: Option<String>,
    },

    /// Check out a branch or commit
    Checkout {
        dir: PathBuf,
        reference: String,
        /// Create the branch
        #[arg(short = 'b', long)]
        create: bool,
    },

    /// Reset a repository to a commit
    Reset {
        dir: PathBuf,
        commit: String,
        #[arg(long)]
        hard: bool,
    },

    /// Apply a patch file or URL to a repository
    Patch {
        /// Patch URL or local path
        source: String,
        /// Repository to patch
        #[arg(long)]
        repo: PathBuf,
        /// Where downloaded patches are kept
        #[arg(long, default_value = ".")]
        patch_dir: PathBuf,
        #[arg(long)]
        whitespace_fix: bool,
    },

    /// Show name, commit and branch of a repository
    RepoInfo { dir: PathBuf },

    /// Read and edit configuration files
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Download and install a dependency bundle
    Deps {
        url: String,
        /// Working directory for the bundle
        #[arg(short, long, default_value = "deps")]
        dst: PathBuf,
        #[arg(long, value_enum)]
        platform: Option<DepsPlatform>,
    },

    /// Mount a writable directory over a read-only one
    UnionMount {
        lower: PathBuf,
        upper: PathBuf,
        mountpoint: PathBuf,
    },

    /// Show the notebook host and GPU
    Env,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print a configuration file
    Get { path: PathBuf },
    /// Replace a string on every line of a file
    SetLine {
        path: PathBuf,
        old: String,
        new: String,
    },
    /// Print the lines of a Pastebin paste
    Pastebin { id: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Only initialize logging if verbose or RUST_LOG is set
    if cli.verbose || std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env()
                    .add_directive(if cli.verbose { "exnavy=debug".parse()? } else { "exnavy=warn".parse()? }),
            )
            .init();
    }

    let mut settings = Settings::load();
    if let Some(jobs) = cli.jobs {
        settings.jobs = Some(jobs);
    }
    if let Some(dir) = &cli.downloads {
        settings.downloads_dir = dir.to_string_lossy().into_owned();
    }
    if let Some(header) = &cli.header {
        settings.auth_header = header.clone();
    }
    settings.validate()?;

    if let Some(jobs) = settings.jobs {
        rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build_global()
            .context("Failed to configure thread pool")?;
    }

    let show_progress = !cli.quiet;

    match cli.command {
        Commands::Extract {
            archive,
            destination,
            flat,
            no_overwrite,
        } => {
            let stats = if flat {
                extract_package(&archive, &destination, !no_overwrite)?
            } else {
                extract_rerooted(&archive, &destination)?
            };
            println!(
                "Extracted {} files ({}) to {}",
                stats.written,
                util::format_size(stats.bytes),
                destination.display()
            );
            if stats.skipped > 0 {
                println!("Kept {} existing files", stats.skipped);
            }
        }

        Commands::Download { urls, dst, filename } => {
            let dst = dst.unwrap_or_else(|| settings.downloads_dir());
            if filename.is_some() && urls.len() > 1 {
                bail!("--filename can only be used with a single URL");
            }

            if let [url] = urls.as_slice() {
                let request = DownloadRequest {
                    filename,
                    header: settings.auth_header().map(str::to_string),
                    ..DownloadRequest::new(url.clone(), &dst)
                };
                let path = downloaders::download(&request)?;
                println!("{} ({})", path.display(), util::file_size(&path)?);
            } else {
                let results = downloaders::batch_download(&urls, &dst, settings.auth_header(), show_progress);
                report(results.iter().map(|(url, r)| (url.as_str(), r.as_ref().map(|p| p.display().to_string()).map_err(|e| format!("{:#}", e)))))?;
            }
        }

        Commands::Github { repo, filename, dst } => {
            let dst = dst.unwrap_or_else(|| settings.downloads_dir());
            let path = downloaders::download_from_github(&repo, &filename, &dst)?;
            println!("{}", path.display());
        }

        Commands::Clone {
            urls,
            cwd,
            directory,
            branch,
            commit,
            recursive,
        } => {
            if directory.is_some() && urls.len() > 1 {
                bail!("--directory can only be used with a single URL");
            }
            let cwd = cwd.or_else(|| {
                Some(PathBuf::from(&settings.repos_dir)).filter(|p| !p.as_os_str().is_empty())
            });
            let template = CloneOptions {
                cwd,
                directory,
                branch,
                commit,
                recursive,
                quiet: cli.quiet,
                ..Default::default()
            };

            if let [url] = urls.as_slice() {
                let opts = CloneOptions {
                    url: url.clone(),
                    ..template
                };
                println!("{}", describe_clone(&git::clone(&opts)?));
            } else {
                let results = git::batch_clone(&urls, &template, show_progress);
                report(results.iter().map(|(url, r)| {
                    (url.as_str(), r.as_ref().map(describe_clone).map_err(|e| e.to_string()))
                }))?;
            }
        }

        Commands::Update {
            repos,
            all,
            fetch,
            no_pull,
            remote,
        } => {
            let repos = match all {
                Some(parent) => git::discover_repos(&parent)?,
                None if repos.is_empty() => vec![PathBuf::from(".")],
                None => repos,
            };
            let opts = UpdateOptions {
                fetch,
                pull: !no_pull,
                remote,
                ..Default::default()
            };

            let results = git::batch_update(&repos, &opts, show_progress);
            report(results.iter().map(|(repo, r)| {
                let line = r.as_ref().map(|outcome| match outcome {
                    UpdateOutcome::UpToDate => "up to date".to_string(),
                    UpdateOutcome::Updated { from, to } => {
                        format!("updated {} -> {}", git::short(from), git::short(to))
                    }
                });
                (repo.to_string_lossy(), line.map_err(|e| e.to_string()))
            }))?;
        }

        Commands::Checkout {
            dir,
            reference,
            create,
        } => {
            git::checkout(&dir, &reference, create)?;
            println!("Checked out {}", reference);
        }

        Commands::Reset { dir, commit, hard } => {
            git::reset(&dir, &commit, hard)?;
            println!("Reset to {}", commit);
        }

        Commands::Patch {
            source,
            repo,
            patch_dir,
            whitespace_fix,
        } => {
            let source = if source.starts_with("http://") || source.starts_with("https://") {
                PatchSource::Url(source)
            } else {
                PatchSource::File(PathBuf::from(source))
            };
            let applied = git::apply_patch(&PatchOptions {
                source,
                patch_dir,
                repo_dir: repo,
                whitespace_fix,
                args: Vec::new(),
            })?;
            println!("Applied {}", applied.display());
        }

        Commands::RepoInfo { dir } => {
            let info = git::inspect(&dir)?;
            println!("Name:   {}", info.name);
            println!("Commit: {}", info.commit);
            println!("Branch: {}", info.branch);
        }

        Commands::Config { action } => match action {
            ConfigAction::Get { path } => match config::read_config(&path)? {
                ConfigValue::Structured(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                ConfigValue::Text(text) => print!("{}", text),
            },
            ConfigAction::SetLine { path, old, new } => {
                let changed = config::change_line(&path, &old, &new)?;
                println!("Changed {} lines in {}", changed, path.display());
            }
            ConfigAction::Pastebin { id } => {
                for line in config::read_pastebin(&id)? {
                    println!("{}", line);
                }
            }
        },

        Commands::Deps { url, dst, platform } => {
            let platform = platform.unwrap_or_else(DepsPlatform::current);
            let installed = packages::install_deps(&url, &dst, platform)?;
            println!("Installed {} packages", installed.len());
        }

        Commands::UnionMount {
            lower,
            upper,
            mountpoint,
        } => {
            packages::union_mount(&lower, &upper, &mountpoint)?;
            println!("Mounted {}", mountpoint.display());
        }

        Commands::Env => {
            println!("Host: {}", env::detect_host().name());
            match (env::gpu_name(), env::gpu_free_memory_mib()) {
                (Ok(name), Ok(free)) => println!("GPU:  {} ({} MiB free)", name, free),
                (Ok(name), Err(_)) => println!("GPU:  {}", name),
                (Err(e), _) => println!("GPU:  none ({:#})", e),
            }
        }
    }

    Ok(())
}

fn describe_clone(outcome: &CloneOutcome) -> String {
    match outcome {
        CloneOutcome::Cloned(path) => format!("cloned into {}", path.display()),
        CloneOutcome::AlreadyExists(path) => format!("already exists at {}", path.display()),
    }
}

/// Print one line per batch item and fail if any item failed
fn report<K, I>(results: I) -> Result<()>
where
    K: std::fmt::Display,
    I: IntoIterator<Item = (K, std::result::Result<String, String>)>,
{
    let mut failed = 0;
    for (key, result) in results {
        match result {
            Ok(line) => println!("{}: {}", key, line),
            Err(e) => {
                failed += 1;
                println!("{}: FAILED ({})", key, e);
            }
        }
    }
    if failed > 0 {
        bail!("{} item(s) failed", failed);
    }
    Ok(())
}
