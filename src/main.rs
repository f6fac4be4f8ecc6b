//! dio - version history for database files
//!
//! This is the main entry point for the dio command-line interface.

use std::path::PathBuf;
use std::process::ExitCode;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use dio::config::StoreConfig;
use dio::storage::{
    BranchName, CommitId, CommitRequest, DatabasePath, InvalidNameError, Repository, Signature,
    StorageError,
};

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

type CliResult<T> = Result<T, CliError>;

fn usage(message: impl Into<String>) -> CliError {
    CliError::Usage(message.into())
}

/// Options shared by every command.
struct Options {
    storage: Option<PathBuf>,
    verbose: bool,
    branch: Option<String>,
    message: Option<String>,
    author: Option<String>,
    email: Option<String>,
    name: Option<String>,
    output: Option<PathBuf>,
    delete: bool,
    positional: Vec<String>,
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let options = match parse_args(&args) {
        Ok(Some(options)) => options,
        Ok(None) => return ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Run 'dio --help' for usage.");
            return ExitCode::FAILURE;
        }
    };

    init_logging(options.verbose);

    match run(options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "dio=debug" } else { "dio=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_args(args: &[String]) -> CliResult<Option<Options>> {
    let mut options = Options {
        storage: None,
        verbose: false,
        branch: None,
        message: None,
        author: None,
        email: None,
        name: None,
        output: None,
        delete: false,
        positional: Vec::new(),
    };

    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        let mut value = || {
            i += 1;
            args.get(i)
                .cloned()
                .ok_or_else(|| usage(format!("{} needs a value", flag)))
        };
        match flag {
            "-s" | "--storage" => options.storage = Some(PathBuf::from(value()?)),
            "-b" | "--branch" => options.branch = Some(value()?),
            "-m" | "--message" => options.message = Some(value()?),
            "--author" => options.author = Some(value()?),
            "--email" => options.email = Some(value()?),
            "--name" => options.name = Some(value()?),
            "-o" | "--output" => options.output = Some(PathBuf::from(value()?)),
            "-d" | "--delete" => options.delete = true,
            "-v" | "--verbose" => options.verbose = true,
            "-h" | "--help" => {
                print_help();
                return Ok(None);
            }
            "--version" => {
                println!("dio v{}", env!("CARGO_PKG_VERSION"));
                return Ok(None);
            }
            arg if arg.starts_with('-') => {
                return Err(usage(format!("unknown option: {}", arg)));
            }
            arg => options.positional.push(arg.to_string()),
        }
        i += 1;
    }

    if options.positional.is_empty() {
        return Err(usage("no command given"));
    }
    Ok(Some(options))
}

fn print_help() {
    println!("dio - version history for database files");
    println!();
    println!("Usage: dio [OPTIONS] COMMAND [ARGS]");
    println!();
    println!("Commands:");
    println!("  commit FILE                 Record the current contents of FILE");
    println!("  log DATABASE                Show the history of a branch");
    println!("  branches DATABASE           List branches and their heads");
    println!("  branch DATABASE NAME [ID]   Point NAME at ID (default: current head), or delete with -d");
    println!("  index DATABASE              List every recorded commit, oldest first");
    println!("  reindex DATABASE            Rebuild the index from the branch heads");
    println!("  restore COMMIT              Write the database stored in COMMIT");
    println!();
    println!("Options:");
    println!("  -s, --storage DIR     Storage root (default: $DIO_STORAGE_DIR or .dio)");
    println!("  -b, --branch NAME     Branch to use (default: $DIO_BRANCH or master)");
    println!("  -m, --message TEXT    Commit message");
    println!("      --author NAME     Commit author (default: $DIO_AUTHOR)");
    println!("      --email EMAIL     Author email (default: $DIO_EMAIL)");
    println!("      --name PATH       Database name to record FILE under (default: file name)");
    println!("  -o, --output PATH     Where restore writes (default: the stored file name)");
    println!("  -d, --delete          Delete the branch instead of moving it");
    println!("  -v, --verbose         Enable verbose output");
    println!("  -h, --help            Show this help message");
    println!("  --version             Show version");
}

fn run(options: Options) -> CliResult<()> {
    let mut config = StoreConfig::from_env()?;
    if let Some(storage) = &options.storage {
        config = config.root(storage);
    }
    let branch = match &options.branch {
        Some(name) => BranchName::new(name.as_str())?,
        None => config.default_branch.clone(),
    };

    let repo = Repository::open(config)?;
    let command = options.positional[0].as_str();
    let args = &options.positional[1..];

    match command {
        "commit" => cmd_commit(&repo, &options, args, branch),
        "log" => {
            let db = database_arg(args)?;
            for (i, commit) in repo.log(&db, &branch)?.iter().enumerate() {
                if i > 0 {
                    println!();
                }
                print!("{}", commit.display_text());
            }
            Ok(())
        }
        "branches" => {
            let db = database_arg(args)?;
            for (name, head) in &repo.branches(&db)? {
                let marker = if *name == branch { "*" } else { " " };
                println!("{} {} {}", marker, name, head);
            }
            Ok(())
        }
        "branch" => cmd_branch(&repo, &options, args, &branch),
        "index" => {
            let db = database_arg(args)?;
            for commit in repo.read_index(&db)? {
                println!("{} {} {}", commit.id().short(), commit.timestamp().format("%Y-%m-%d"), commit.summary());
            }
            Ok(())
        }
        "reindex" => {
            let db = database_arg(args)?;
            let commits = repo.rebuild_index(&db)?;
            println!("Rebuilt index of {} with {} commit(s)", db, commits.len());
            Ok(())
        }
        "restore" => {
            let id = args
                .first()
                .ok_or_else(|| usage("restore needs a commit ID"))?;
            let (name, bytes) = repo.snapshot(CommitId::from_hex(id)?)?;
            let path = options.output.clone().unwrap_or_else(|| PathBuf::from(name));
            std::fs::write(&path, &bytes).map_err(|source| CliError::Io {
                path: path.clone(),
                source,
            })?;
            println!("Wrote {} bytes to {}", bytes.len(), path.display());
            Ok(())
        }
        other => Err(usage(format!("unknown command: {}", other))),
    }
}

fn database_arg(args: &[String]) -> CliResult<DatabasePath> {
    let name = args.first().ok_or_else(|| usage("missing DATABASE argument"))?;
    Ok(DatabasePath::new(name.as_str())?)
}

fn cmd_commit(
    repo: &Repository,
    options: &Options,
    args: &[String],
    branch: BranchName,
) -> CliResult<()> {
    let file = PathBuf::from(args.first().ok_or_else(|| usage("commit needs a FILE"))?);
    let db = match &options.name {
        Some(name) => DatabasePath::new(name.as_str())?,
        None => DatabasePath::from_file(&file)?,
    };

    let config = repo.config();
    let author = options.author.clone().or_else(|| config.author_name.clone());
    let email = options.email.clone().or_else(|| config.author_email.clone());
    let (Some(author), Some(email)) = (author, email) else {
        return Err(usage("commit needs --author and --email (or DIO_AUTHOR and DIO_EMAIL)"));
    };
    let message = options
        .message
        .clone()
        .ok_or_else(|| usage("commit needs a message (-m)"))?;

    let bytes = std::fs::read(&file).map_err(|source| CliError::Io {
        path: file.clone(),
        source,
    })?;
    let request = CommitRequest::new(Signature::new(author, email), message).branch(branch.clone());
    let commit = repo.commit_database(&db, &bytes, request)?;

    println!("[{} {}] {}", branch, commit.id().short(), commit.summary());
    Ok(())
}

fn cmd_branch(
    repo: &Repository,
    options: &Options,
    args: &[String],
    current: &BranchName,
) -> CliResult<()> {
    let db = database_arg(args)?;
    let name = BranchName::new(
        args.get(1)
            .ok_or_else(|| usage("branch needs a NAME"))?
            .as_str(),
    )?;

    if options.delete {
        let head = repo.delete_branch(&db, &name)?;
        println!("Deleted branch {} (was {})", name, head.short());
        return Ok(());
    }

    let target = match args.get(2) {
        Some(id) => CommitId::from_hex(id)?,
        None => repo.head(&db, current)?,
    };
    match repo.set_branch(&db, &name, target)? {
        Some(previous) => println!("Moved branch {} from {} to {}", name, previous.short(), target.short()),
        None => println!("Created branch {} at {}", name, target.short()),
    }
    Ok(())
}
