//! nvpk - NovusPack package command line interface

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use novuspack::compression::{recommend, CompressionType};
use novuspack::format::HeaderFlags;
use novuspack::{import_dir, Cancellation, Config, Package};

#[derive(Parser)]
#[command(name = "nvpk")]
#[command(about = "inspect and build NovusPack (.nvpk) packages")]
#[command(version)]
struct Cli {
    /// config file
    #[arg(short, long, env = "NVPK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// show package header and summary
    Info {
        /// package file
        package: PathBuf,
    },

    /// list file paths
    Ls {
        /// package file
        package: PathBuf,

        /// glob pattern, e.g. "/assets/**/*.png"
        pattern: Option<String>,
    },

    /// show effective tags of a path
    Tags {
        /// package file
        package: PathBuf,

        /// path inside the package
        path: String,

        /// only tags inherited from ancestor directories
        #[arg(long)]
        inherited: bool,
    },

    /// write a file's content to stdout
    Cat {
        /// package file
        package: PathBuf,

        /// path inside the package
        path: String,
    },

    /// build a package from a directory
    Pack {
        /// source directory
        source: PathBuf,

        /// package file to write
        package: PathBuf,

        /// fail if the package file already exists
        #[arg(long)]
        no_overwrite: bool,
    },

    /// set the package comment; an empty text clears it
    Comment {
        /// package file
        package: PathBuf,

        /// comment text
        text: String,
    },

    /// recommend a compression type for the package content
    Advise {
        /// package file
        package: PathBuf,
    },
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn run(cli: Cli) -> novuspack::Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let cancel = Cancellation::new();

    match cli.command {
        Commands::Info { package } => {
            let pkg = Package::open(&package, &cancel)?;
            let header = pkg.header();

            println!("format version: {}", header.format_version);
            println!("vendor id:      {:#010x}", header.vendor_id);
            println!("app id:         {:#018x}", header.app_id);
            println!("files:          {}", pkg.file_count());
            println!("path metadata:  {}", pkg.path_metadata().len());
            println!("signatures:     {}", pkg.signatures().len());
            let compression = CompressionType::from_code(header.flags.compression())
                .map_or_else(|| format!("unknown ({})", header.flags.compression()), |c| c.to_string());
            println!("compression:    {}", compression);
            println!("flags:          {}", flag_names(header.flags).join(", "));
            if let Some(comment) = pkg.comment() {
                println!();
                println!("{}", comment);
            }
        }

        Commands::Ls { package, pattern } => {
            let pkg = Package::open(&package, &cancel)?;
            let paths = match pattern {
                Some(pattern) => pkg.find(&pattern)?,
                None => pkg
                    .files()
                    .flat_map(|f| f.paths.iter().map(|p| p.as_str()))
                    .collect(),
            };
            for path in paths {
                println!("{}", path);
            }
        }

        Commands::Tags {
            package,
            path,
            inherited,
        } => {
            let pkg = Package::open(&package, &cancel)?;
            let graph = pkg.path_metadata();
            let tags = if inherited {
                graph.inherited_tags(&path)?
            } else if pkg.file_by_path(&path).is_some() {
                pkg.file_tags(&path)?
            } else {
                graph.effective_tags(&path)?
            };
            for tag in tags {
                println!("{} ({}) = {}", tag.key, tag.value_type, tag.value);
            }
        }

        Commands::Cat { package, path } => {
            let pkg = Package::open(&package, &cancel)?;
            let data = pkg.read_file(&path, &cancel)?;
            io::stdout()
                .write_all(&data)
                .map_err(|e| novuspack::Error::Io { path: "stdout".into(), source: e })?;
        }

        Commands::Pack {
            source,
            package,
            no_overwrite,
        } => {
            let mut pkg = Package::with_config(&config);
            let report = import_dir(&mut pkg, &source, &cancel)?;
            pkg.write_with(&package, &config, !no_overwrite, &cancel)?;
            println!(
                "packed {} files, {} directories, {} symlinks ({} bytes) into {}",
                report.files,
                report.directories,
                report.symlinks,
                report.bytes,
                package.display()
            );
        }

        Commands::Comment { package, text } => {
            let mut pkg = Package::open(&package, &cancel)?;
            pkg.set_comment(Some(text))?;
            pkg.write_with(&package, &config, true, &cancel)?;
        }

        Commands::Advise { package } => {
            let pkg = Package::open(&package, &cancel)?;
            let stats = pkg.stats();
            let rec = recommend(&stats);
            println!("{} ({})", rec.compression, rec.reason);
            println!(
                "{} files, {} bytes, {} bytes already compressed",
                stats.file_count,
                stats.total_size,
                stats.precompressed_bytes()
            );
        }
    }

    Ok(())
}

fn flag_names(flags: HeaderFlags) -> Vec<&'static str> {
    let names = [
        (HeaderFlags::HAS_SIGNATURES, "signatures"),
        (HeaderFlags::HAS_COMPRESSED_FILES, "compressed"),
        (HeaderFlags::HAS_ENCRYPTED_FILES, "encrypted"),
        (HeaderFlags::HAS_EXTENDED_ATTRS, "xattrs"),
        (HeaderFlags::HAS_COMMENT, "comment"),
        (HeaderFlags::HAS_PER_FILE_TAGS, "tags"),
        (HeaderFlags::HAS_SPECIAL_METADATA, "path-metadata"),
        (HeaderFlags::METADATA_ONLY, "metadata-only"),
    ];
    let set: Vec<&'static str> = names
        .iter()
        .filter(|(bit, _)| flags.contains(*bit))
        .map(|(_, name)| *name)
        .collect();
    if set.is_empty() {
        vec!["none"]
    } else {
        set
    }
}
