// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    clap::{Arg, ArgMatches, Command},
    debian_repo_sync::{
        config::RepositoryConfig,
        error::DebianError,
        interrupt::Interrupted,
        merge::DumpStyle,
        store::{filesystem::FilesystemTargetStore, TargetStore},
        sync::{
            pull::PullSource, update::UpdateSource, SyncOptions, SyncRunner, SyncSource,
            SyncSummary,
        },
    },
    log::{error, info, warn, LevelFilter},
    std::path::PathBuf,
    thiserror::Error,
};

const CONFIG_ABOUT: &str = "\
Repository Configuration

The repository is described by a YAML file, `repository.yaml` in the current
directory unless `--config` says otherwise. Relative paths in it are relative
to the directory containing the file.

base_dir (optional) (string)
   Root of the repository. Pool files are written below it.

db_dir (optional) (string)
   Directory holding the package lists of all targets. Defaults to `db`.

log_dir (optional) (string)
   Directory change logs are written to. Defaults to `logs`.

distributions (list)
   The distributions of the repository. Each has a `codename`, lists of
   `components`, `udeb_components` and `architectures` (`source` for source
   packages), the `pulls` and `updates` rules applied to it, in order, and
   optionally an `override` file and a `log` file name.

   A rule named `-` marks everything the distribution holds for deletion.
   Packages not offered again by a later rule are removed.

pull_rules (list)
   Rules offering the packages of another distribution (`from`).

update_rules (list)
   Rules offering the packages of the mirrored repository at `source_dir`,
   suite `suite`.

Rules may restrict `components`, `udeb_components` and `architectures`.
Architecture entries of the form `from>into` offer packages of architecture
`from` to targets of architecture `into`. A `filter_list` assigns one of
install, deinstall, purge, hold, supersede or error to packages, by name.
";

const PULL_ABOUT: &str = "\
Pull packages between distributions.

Every target of the given distributions (all distributions with pull rules if
none are given) is merged with the packages its pull rules offer, then the
changes are committed.

Targets that would lose at least 10 packages and more than a fifth of their
content are not committed unless --ignore-big-deletes is given. If any needed
file cannot be acquired nothing is committed unless --keep-going is given.
";

const UPDATE_ABOUT: &str = "\
Update distributions from mirrored upstream repositories.

Works like `pull`, with packages offered by the indices of the mirrors named
by update rules. Files are copied from the mirrors into the pool.
";

#[derive(Debug, Error)]
pub enum DrtError {
    #[error("argument parsing error: {0:?}")]
    Clap(#[from] clap::Error),

    #[error("{0}")]
    Debian(#[from] DebianError),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("invalid sub-command: {0}")]
    InvalidSubCommand(String),

    #[error("{0} targets failed and {1} packages could not be committed")]
    Incomplete(usize, usize),
}

pub type Result<T> = std::result::Result<T, DrtError>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum RuleKind {
    Pull,
    Update,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Mode {
    Commit,
    Check(DumpStyle),
}

fn add_codenames_arg(command: Command<'_>) -> Command<'_> {
    command.arg(
        Arg::new("codename")
            .multiple_values(true)
            .help("Distributions to process. Defaults to all with rules of this kind"),
    )
}

pub async fn run_cli() -> Result<()> {
    let default_threads = format!("{}", num_cpus::get());

    let app = Command::new("Debian Repository Tool")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Gregory Szorc <gregory.szorc@gmail.com>")
        .about("Keep the distributions of a Debian repository in sync")
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .takes_value(true)
                .default_value("repository.yaml")
                .global(true)
                .allow_invalid_utf8(true)
                .help("Path to the repository configuration file"),
        )
        .arg(
            Arg::new("max-parallel-io")
                .long("max-parallel-io")
                .takes_value(true)
                .default_value(&default_threads)
                .global(true)
                .help("Maximum number of parallel I/O operations to perform"),
        )
        .arg(
            Arg::new("ignore-big-deletes")
                .long("ignore-big-deletes")
                .global(true)
                .help("Commit targets even if they would lose many packages"),
        )
        .arg(
            Arg::new("keep-going")
                .long("keep-going")
                .global(true)
                .help("Commit even if some files could not be acquired"),
        )
        .arg(
            Arg::new("predelete")
                .long("predelete")
                .global(true)
                .help("Remove outdated packages before installing their replacements"),
        );

    let app = app
        .subcommand(add_codenames_arg(
            Command::new("pull")
                .about("Pull packages between distributions")
                .long_about(PULL_ABOUT),
        ))
        .subcommand(add_codenames_arg(
            Command::new("checkpull").about("Describe what pull would change"),
        ))
        .subcommand(add_codenames_arg(
            Command::new("dumppull")
                .about("Print what pull would change as tab separated fields"),
        ))
        .subcommand(add_codenames_arg(
            Command::new("update")
                .about("Update distributions from mirrored repositories")
                .long_about(UPDATE_ABOUT),
        ))
        .subcommand(add_codenames_arg(
            Command::new("checkupdate").about("Describe what update would change"),
        ))
        .subcommand(add_codenames_arg(
            Command::new("dumpupdate")
                .about("Print what update would change as tab separated fields"),
        ))
        .subcommand(
            Command::new("list")
                .about("List the packages of a distribution")
                .arg(Arg::new("codename").required(true)),
        );

    let mut app =
        app.subcommand(Command::new("config").about("Print documentation about the configuration"));

    let matches = app.clone().get_matches();

    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    builder.init();

    match matches.subcommand() {
        Some(("pull", args)) => command_sync(args, RuleKind::Pull, Mode::Commit).await,
        Some(("checkpull", args)) => {
            command_sync(args, RuleKind::Pull, Mode::Check(DumpStyle::Human)).await
        }
        Some(("dumppull", args)) => {
            command_sync(args, RuleKind::Pull, Mode::Check(DumpStyle::Machine)).await
        }
        Some(("update", args)) => command_sync(args, RuleKind::Update, Mode::Commit).await,
        Some(("checkupdate", args)) => {
            command_sync(args, RuleKind::Update, Mode::Check(DumpStyle::Human)).await
        }
        Some(("dumpupdate", args)) => {
            command_sync(args, RuleKind::Update, Mode::Check(DumpStyle::Machine)).await
        }
        Some(("list", args)) => command_list(args).await,
        Some(("config", _)) => {
            println!("{}", CONFIG_ABOUT);
            Ok(())
        }
        Some((command, _)) => Err(DrtError::InvalidSubCommand(command.to_string())),
        None => {
            app.print_help()?;
            Ok(())
        }
    }
}

fn load_config(args: &ArgMatches) -> Result<RepositoryConfig> {
    let path = args
        .value_of_os("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("repository.yaml"));

    Ok(RepositoryConfig::from_path(&path)?)
}

/// Sets the returned flag when the process receives Ctrl-C.
fn install_interrupt_handler() -> Interrupted {
    let interrupted = Interrupted::new();
    let flag = interrupted.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; stopping at the next safe point");
            flag.interrupt();
        }
    });

    interrupted
}

fn print_summary(summary: &SyncSummary) {
    for target in &summary.abstained {
        warn!("{}: not committed, too many deletions", target);
    }
    for (target, e) in &summary.failed {
        error!("{}: {}", target, e);
    }
    for (target, name, e) in &summary.package_failures {
        error!("{}: {}: {}", target, name, e);
    }

    info!(
        "{} targets committed, {} packages added, {} removed",
        summary.committed, summary.added, summary.removed
    );
}

async fn command_sync(args: &ArgMatches, kind: RuleKind, mode: Mode) -> Result<()> {
    let config = load_config(args)?;

    let options = SyncOptions {
        max_parallel_io: args.value_of_t::<usize>("max-parallel-io")?,
        ignore_big_deletes: args.is_present("ignore-big-deletes"),
        keep_going: args.is_present("keep-going"),
        predelete: args.is_present("predelete"),
    };

    let codenames = match args.values_of("codename") {
        Some(values) => values.map(|s| s.to_string()).collect::<Vec<_>>(),
        None => config
            .distributions
            .iter()
            .filter(|d| match kind {
                RuleKind::Pull => !d.pulls.is_empty(),
                RuleKind::Update => !d.updates.is_empty(),
            })
            .map(|d| d.codename.clone())
            .collect(),
    };

    let source: Box<dyn SyncSource + '_> = match kind {
        RuleKind::Pull => Box::new(PullSource::new(&config)?),
        RuleKind::Update => Box::new(UpdateSource::new(&config)?),
    };

    let runner = SyncRunner::new(&config, options, install_interrupt_handler());

    match mode {
        Mode::Check(style) => {
            let search = runner.search(source.as_ref(), &codenames).await?;

            search.dump(|target, record| match style {
                DumpStyle::Human => println!("{}: {}", target, record.render(style)),
                DumpStyle::Machine => println!("{}\t{}", target, record.render(style)),
            });

            for (target, e) in &search.failed {
                error!("{}: {}", target, e);
            }

            if search.failed.is_empty() {
                Ok(())
            } else {
                Err(DrtError::Incomplete(search.failed.len(), 0))
            }
        }
        Mode::Commit => {
            let summary = runner.run(source.as_ref(), &codenames).await?;
            print_summary(&summary);

            if summary.is_success() {
                Ok(())
            } else {
                Err(DrtError::Incomplete(
                    summary.failed.len(),
                    summary.package_failures.len(),
                ))
            }
        }
    }
}

async fn command_list(args: &ArgMatches) -> Result<()> {
    let config = load_config(args)?;

    let codename = args.value_of("codename").unwrap_or_default();
    let dist = config.distribution(codename)?;

    for target in dist.targets() {
        let store = FilesystemTargetStore::open(&config.db_dir, target.clone(), None).await?;

        for record in store.packages() {
            let record = record?;
            println!("{}: {} {}", target, record.name, record.version);
        }
    }

    Ok(())
}
