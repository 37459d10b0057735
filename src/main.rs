//! romdepot - canonical archive engine command line interface

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use romdepot::archive::{archive_empty_folders, ContainerFormat, EntrySource, NewEntry, WriteOptions};
use romdepot::dedup::merge_collections;
use romdepot::ops::{
    analyze_path, extract_all, fsck, rebuild_from_depot, rebuild_set, AnalyzeOptions, FsckOptions,
};
use romdepot::{
    open, BulkPolicy, Depot, Error, HashKind, HashKinds, HashRecord, IoResultExt, WriteOutcome,
    DEFAULT_DEPTH,
};

#[derive(Parser)]
#[command(name = "romdepot")]
#[command(about = "canonical archive engine - depot store and torrentzip/torrent7z builder")]
#[command(version)]
struct Cli {
    /// depot path
    #[arg(short, long, default_value = ".", env = "ROMDEPOT_DEPOT")]
    depot: PathBuf,

    /// more log output (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Zip,
    #[value(name = "7z")]
    SevenZip,
}

impl From<Format> for ContainerFormat {
    fn from(f: Format) -> Self {
        match f {
            Format::Zip => ContainerFormat::Zip,
            Format::SevenZip => ContainerFormat::SevenZip,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// initialize a new depot
    Init {
        /// path to create the depot at
        #[arg(default_value = ".")]
        path: PathBuf,

        /// number of shard directory levels
        #[arg(long, default_value_t = DEFAULT_DEPTH)]
        depth: usize,
    },

    /// store files in the depot as TorrentGZ
    Add {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// print hash records for the files of containers
    Scan {
        #[arg(required = true)]
        containers: Vec<PathBuf>,

        /// digests to compute, comma separated (default from depot config)
        #[arg(long, value_delimiter = ',')]
        hashes: Vec<HashKind>,

        /// crc32 from the entry tables only
        #[arg(long)]
        quick: bool,

        /// succeed when at least one entry could be read
        #[arg(long)]
        succeed_if_any: bool,
    },

    /// list the entries of a container
    Ls {
        container: PathBuf,
    },

    /// report whether containers already have their canonical layout
    Check {
        #[arg(required = true)]
        containers: Vec<PathBuf>,
    },

    /// build canonical containers from catalogs, sourcing payloads from the depot
    Build {
        /// catalogs in precedence order
        #[arg(required = true)]
        catalogs: Vec<PathBuf>,

        /// output directory
        #[arg(short, long)]
        out: PathBuf,

        #[arg(short, long, value_enum, default_value = "zip")]
        format: Format,
    },

    /// pack a directory of loose files into one canonical container
    Pack {
        source: PathBuf,

        /// output directory
        #[arg(short, long)]
        out: PathBuf,

        #[arg(short, long, value_enum, default_value = "zip")]
        format: Format,

        /// stamp entries with file modification times
        #[arg(long)]
        real_dates: bool,
    },

    /// extract every entry of a container
    Extract {
        container: PathBuf,

        destination: PathBuf,

        /// succeed when at least one entry was extracted
        #[arg(long)]
        succeed_if_any: bool,
    },

    /// list directory markers with nothing beneath them
    EmptyDirs {
        container: PathBuf,
    },

    /// verify depot integrity
    Fsck {
        /// decompress every object and check its sha1
        #[arg(long)]
        verify: bool,
    },
}

/// a catalog file: a list of hash records
#[derive(Deserialize)]
struct Catalog {
    #[serde(default)]
    records: Vec<HashRecord>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn policy(succeed_if_any: bool, fallback: BulkPolicy) -> BulkPolicy {
    if succeed_if_any {
        BulkPolicy::SucceedIfAny
    } else {
        fallback
    }
}

fn run(cli: Cli) -> romdepot::Result<()> {
    match cli.command {
        Commands::Init { path, depth } => {
            Depot::init(&path, depth)?;
            println!("initialized depot at {}", path.display());
        }

        Commands::Add { files } => {
            let depot = Depot::open(&cli.depot)?;
            for file in files {
                let stored = depot.add_file(&file)?;
                let state = match stored.outcome {
                    WriteOutcome::Written => "stored",
                    WriteOutcome::Unchanged => "present",
                };
                println!("{} {} {}", stored.sha1, state, file.display());
            }
        }

        Commands::Scan {
            containers,
            hashes,
            quick,
            succeed_if_any,
        } => {
            let config = Depot::open(&cli.depot)
                .map(|d| d.config().clone())
                .unwrap_or_default();
            let mut opts = AnalyzeOptions::from(&config);
            if !hashes.is_empty() {
                opts.hashes = hashes.into_iter().collect();
            }
            if quick {
                opts.hashes = HashKinds::CRC_ONLY;
            }
            opts.policy = policy(succeed_if_any, opts.policy);

            for container in containers {
                let analysis = analyze_path(&container, &opts)?;
                for record in &analysis.records {
                    print_record(record);
                }
                for failure in &analysis.failures {
                    eprintln!("{}: {}: {}", container.display(), failure.entry, failure.error);
                }
            }
        }

        Commands::Ls { container } => {
            let archive = open(&container)?;
            for entry in archive.entries() {
                let crc = entry.crc32.map(|c| c.to_hex()).unwrap_or_else(|| "-".into());
                println!("{:>12} {} {}", entry.size, crc, entry.path);
            }
        }

        Commands::Check { containers } => {
            let mut nonstandard = 0;
            for container in &containers {
                let archive = open(container)?;
                let state = if archive.is_standardized() {
                    "ok"
                } else {
                    nonstandard += 1;
                    "not canonical"
                };
                println!("{} {} {}", archive.kind(), state, container.display());
            }
            if nonstandard > 0 {
                return Err(Error::BulkFailure {
                    failed: nonstandard,
                    total: containers.len(),
                });
            }
        }

        Commands::Build {
            catalogs,
            out,
            format,
        } => {
            let depot = Depot::open(&cli.depot)?;
            let collections = catalogs
                .iter()
                .map(|path| load_catalog(path))
                .collect::<romdepot::Result<Vec<_>>>()?;

            let mut groups: BTreeMap<String, Vec<HashRecord>> = BTreeMap::new();
            for record in merge_collections(collections) {
                groups
                    .entry(record.parent().to_string())
                    .or_default()
                    .push(record);
            }

            let mut incomplete = 0;
            for (group, records) in groups {
                let report = rebuild_from_depot(&depot, &out, &group, format.into(), records)?;
                for record in &report.missing {
                    eprintln!("missing {}/{}", group, record.name);
                }
                if !report.is_complete() {
                    incomplete += 1;
                }
                println!("{} {:?}", report.path.display(), report.outcome);
            }
            if incomplete > 0 {
                println!("{} sets incomplete", incomplete);
            }
        }

        Commands::Pack {
            source,
            out,
            format,
            real_dates,
        } => {
            let group = source
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("set")
                .to_string();
            let entries = loose_entries(&source, &group)?;
            let opts = WriteOptions { real_dates };
            let (path, outcome) = rebuild_set(&out, &group, format.into(), entries, &opts)?;
            println!("{} {:?}", path.display(), outcome);
        }

        Commands::Extract {
            container,
            destination,
            succeed_if_any,
        } => {
            let fallback = Depot::open(&cli.depot)
                .map(|d| d.config().on_entry_error)
                .unwrap_or_default();
            let mut archive = open(&container)?;
            let report = extract_all(
                archive.as_mut(),
                &destination,
                policy(succeed_if_any, fallback),
            )?;
            for failure in &report.failures {
                eprintln!("{}: {}", failure.entry, failure.error);
            }
            println!(
                "extracted {} files, {} directories to {}",
                report.files,
                report.directories,
                destination.display()
            );
        }

        Commands::EmptyDirs { container } => {
            let archive = open(&container)?;
            for dir in archive_empty_folders(archive.as_ref()) {
                println!("{}", dir);
            }
        }

        Commands::Fsck { verify } => {
            let depot = Depot::open(&cli.depot)?;
            let report = fsck(&depot, &FsckOptions { verify })?;

            println!("objects checked: {}", report.objects_checked);

            if !report.misplaced.is_empty() {
                println!("\nmisplaced objects:");
                for path in &report.misplaced {
                    println!("  {}", path.display());
                }
            }

            if !report.nonstandard.is_empty() {
                println!("\nnon-standard objects:");
                for path in &report.nonstandard {
                    println!("  {}", path.display());
                }
            }

            if !report.corrupt.is_empty() {
                println!("\ncorrupt objects:");
                for obj in &report.corrupt {
                    println!("  {}: {}", obj.sha1, obj.message);
                }
            }

            if !report.unknown.is_empty() {
                println!("\nunknown files: {}", report.unknown.len());
            }

            if report.is_ok() {
                println!("\ndepot is healthy");
            } else {
                println!("\ndepot has issues");
                return Err(Error::corrupt(
                    depot.path(),
                    "depot integrity check failed",
                ));
            }
        }
    }

    Ok(())
}

fn print_record(record: &HashRecord) {
    let hex = |v: Option<String>| v.unwrap_or_else(|| "-".into());
    println!(
        "{}\t{}\t{}\t{}\t{}\t{}",
        record.parent(),
        record.name,
        record.size.map(|s| s.to_string()).unwrap_or_else(|| "-".into()),
        hex(record.hashes.crc32.map(|h| h.to_hex())),
        hex(record.hashes.md5.map(|h| h.to_hex())),
        hex(record.hashes.sha1.map(|h| h.to_hex())),
    );
}

fn load_catalog(path: &Path) -> romdepot::Result<Vec<HashRecord>> {
    let content = fs::read_to_string(path).with_path(path)?;
    let catalog: Catalog = toml::from_str(&content)?;
    Ok(catalog.records)
}

/// every file and empty directory below `root` as a new entry
fn loose_entries(root: &Path, group: &str) -> romdepot::Result<Vec<NewEntry>> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(|e| Error::Io {
            path: root.to_path_buf(),
            source: e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("walkdir error")),
        })?;
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let mut record = HashRecord::new(name, group);
        if entry.file_type().is_dir() {
            let is_empty = fs::read_dir(entry.path())
                .with_path(entry.path())?
                .next()
                .is_none();
            if is_empty {
                entries.push(NewEntry::new(record, EntrySource::Directory));
            }
        } else if entry.file_type().is_file() {
            let meta = entry.metadata().map_err(|e| Error::Io {
                path: entry.path().to_path_buf(),
                source: e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("walkdir error")),
            })?;
            if let Ok(modified) = meta.modified() {
                let stamp = chrono::DateTime::<chrono::Local>::from(modified);
                record.date = Some(stamp.format("%Y/%m/%d %H:%M:%S").to_string());
            }
            entries.push(NewEntry::new(
                record.with_size(meta.len()),
                EntrySource::File(entry.path().to_path_buf()),
            ));
        }
    }
    Ok(entries)
}
