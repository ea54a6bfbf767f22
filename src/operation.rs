//! What the command line tool can do for you.
//!
//! This module implements all the commands users can ask the tool to
//! perform on a block store. They are encapsulated in the type
//! [`Operation`] which can determine the command from the command line
//! argumments and then execute it.

use std::cmp;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use clap::{Args, ArgMatches, FromArgMatches, Parser};
use log::error;
use crate::block::BLOCK_SIZE;
use crate::config::Config;
use crate::error::{ExitError, Failed};
use crate::log::Logger;
use crate::store::BlockFileStore;
use crate::utils::fatal;


//------------ Operation -----------------------------------------------------

/// The command to execute.
///
/// This type collects all the commands we have defined plus any possible
/// extra configuration they support.
///
/// You can create a value from the command line arguments. First, you add
/// all necessary sub-commands and arguments to a clap `Command` via
/// [`config_args`] and then process the argument matches into a value in
/// [`from_arg_matches`]. Finally, you can execute the created command
/// through the [`run`] method.
///
/// [`config_args`]: #method.config_args
/// [`from_arg_matches`]: #method.from_arg_matches
/// [`run`]: #method.run
#[derive(Clone, Debug)]
pub enum Operation {
    Init(Init),
    List(List),
    Stat(Stat),
    Cat(Cat),
    Append(Append),
    Remove(Remove),
    Move(Move),
    Clear(Clear),
    Verify(Verify),
    Sanitize(Sanitize),
    PrintConfig(PrintConfig),
}

impl Operation {
    /// Prepares everything.
    ///
    /// Call this before doing anything else.
    pub fn prepare() -> Result<(), Failed> {
        Logger::init()
    }

    /// Adds the command configuration to a clap app.
    pub fn config_args(app: clap::Command) -> clap::Command {
        let app = Init::config_args(app);
        let app = List::config_args(app);
        let app = Stat::config_args(app);
        let app = Cat::config_args(app);
        let app = Append::config_args(app);
        let app = Remove::config_args(app);
        let app = Move::config_args(app);
        let app = Clear::config_args(app);
        let app = Verify::config_args(app);
        let app = Sanitize::config_args(app);
        PrintConfig::config_args(app)
    }

    /// Creates a command from clap matches.
    pub fn from_arg_matches(
        matches: &ArgMatches,
        cur_dir: &Path,
    ) -> Result<Self, Failed> {
        Ok(match matches.subcommand() {
            Some(("init", _)) => Operation::Init(Init),
            Some(("ls", matches)) => {
                Operation::List(List::from_arg_matches(matches)?)
            }
            Some(("stat", matches)) => {
                Operation::Stat(Stat::from_arg_matches(matches)?)
            }
            Some(("cat", matches)) => {
                Operation::Cat(Cat::from_arg_matches(matches)?)
            }
            Some(("append", matches)) => {
                Operation::Append(Append::from_arg_matches(matches, cur_dir)?)
            }
            Some(("rm", matches)) => {
                Operation::Remove(Remove::from_arg_matches(matches)?)
            }
            Some(("mv", matches)) => {
                Operation::Move(Move::from_arg_matches(matches)?)
            }
            Some(("clear", _)) => Operation::Clear(Clear),
            Some(("verify", _)) => Operation::Verify(Verify),
            Some(("sanitize", _)) => Operation::Sanitize(Sanitize),
            Some(("config", _)) => Operation::PrintConfig(PrintConfig),
            _ => {
                error!(
                    "Failed: a command is required.\n\
                     \nCommonly used commands are:\
                     \n   ls        Lists all files in the store\
                     \n   cat       Writes the content of a file to stdout\
                     \n   append    Appends data to a file\
                     \n   verify    Checks the consistency of the store\
                     \n\
                     \nSee blockfile -h for a usage summary."
                );
                return Err(Failed)
            }
        })
    }

    /// Runs the command.
    ///
    /// Switches logging to the configured target first.
    pub fn run(self, config: Config) -> Result<(), ExitError> {
        Logger::switch_logging(&config)?;
        self.execute(&config, &mut io::stdout().lock())
    }

    /// Executes the command with logging already set up.
    ///
    /// Output meant for the user goes to `out`.
    fn execute(
        self, config: &Config, out: &mut dyn Write
    ) -> Result<(), ExitError> {
        match self {
            Operation::Init(cmd) => cmd.run(config),
            Operation::List(cmd) => cmd.run(config, out),
            Operation::Stat(cmd) => cmd.run(config, out),
            Operation::Cat(cmd) => cmd.run(config, out),
            Operation::Append(cmd) => cmd.run(config),
            Operation::Remove(cmd) => cmd.run(config),
            Operation::Move(cmd) => cmd.run(config),
            Operation::Clear(cmd) => cmd.run(config),
            Operation::Verify(cmd) => cmd.run(config, out),
            Operation::Sanitize(cmd) => cmd.run(config, out),
            Operation::PrintConfig(cmd) => cmd.run(config, out),
        }
    }
}


//------------ Init ----------------------------------------------------------

/// Creates the store directories.
#[derive(Clone, Debug)]
pub struct Init;

impl Init {
    /// Adds the command configuration to a clap app.
    pub fn config_args(app: clap::Command) -> clap::Command {
        app.subcommand(clap::Command::new("init")
            .about("Creates the store if it doesn’t exist yet")
        )
    }

    fn run(self, config: &Config) -> Result<(), ExitError> {
        BlockFileStore::init(config)?;
        Ok(())
    }
}


//------------ List ----------------------------------------------------------

/// Lists all files.
#[derive(Clone, Debug, Parser)]
pub struct List {
    /// Include the size of each file
    #[arg(short, long)]
    long: bool,
}

impl List {
    /// Adds the command configuration to a clap app.
    pub fn config_args(app: clap::Command) -> clap::Command {
        app.subcommand(
            List::augment_args(
                clap::Command::new("ls")
                    .about("Lists all files in the store")
            )
        )
    }

    /// Creates a command from clap matches.
    pub fn from_arg_matches(matches: &ArgMatches) -> Result<Self, Failed> {
        parse_args(matches)
    }

    fn run(
        self, config: &Config, out: &mut dyn Write
    ) -> Result<(), ExitError> {
        with_store(config, |store| {
            let mut names: Vec<_> = store.list_keys()?.into_iter().collect();
            names.sort_unstable();
            let mut listing = String::new();
            for name in names {
                if self.long {
                    // A file could only vanish under a concurrent writer.
                    if let Some(size) = store.size(&name)? {
                        listing.push_str(
                            &format!("{:>12} {}\n", size, name)
                        );
                    }
                }
                else {
                    listing.push_str(&name);
                    listing.push('\n');
                }
            }
            write_out(out, listing.as_bytes())
        })
    }
}


//------------ Stat ----------------------------------------------------------

/// Prints the size of a file.
#[derive(Clone, Debug, Parser)]
pub struct Stat {
    /// Name of the file
    #[arg(value_name = "NAME")]
    name: String,
}

impl Stat {
    /// Adds the command configuration to a clap app.
    pub fn config_args(app: clap::Command) -> clap::Command {
        app.subcommand(
            Stat::augment_args(
                clap::Command::new("stat")
                    .about("Prints the size of a file")
            )
        )
    }

    /// Creates a command from clap matches.
    pub fn from_arg_matches(matches: &ArgMatches) -> Result<Self, Failed> {
        parse_args(matches)
    }

    fn run(
        self, config: &Config, out: &mut dyn Write
    ) -> Result<(), ExitError> {
        with_store(config, |store| {
            match store.size(&self.name)? {
                Some(size) => {
                    write_out(out, format!("{}\n", size).as_bytes())
                }
                None => {
                    error!("No such file: '{}'.", self.name);
                    Err(ExitError::Generic)
                }
            }
        })
    }
}


//------------ Cat -----------------------------------------------------------

/// Writes the content of a file to stdout.
#[derive(Clone, Debug, Parser)]
pub struct Cat {
    /// Name of the file
    #[arg(value_name = "NAME")]
    name: String,

    /// Start reading at this position
    #[arg(long, value_name = "OCTETS", default_value_t = 0)]
    position: u64,

    /// Read at most this many octets
    #[arg(long, value_name = "OCTETS")]
    length: Option<u64>,
}

impl Cat {
    /// Adds the command configuration to a clap app.
    pub fn config_args(app: clap::Command) -> clap::Command {
        app.subcommand(
            Cat::augment_args(
                clap::Command::new("cat")
                    .about("Writes the content of a file to stdout")
            )
        )
    }

    /// Creates a command from clap matches.
    pub fn from_arg_matches(matches: &ArgMatches) -> Result<Self, Failed> {
        parse_args(matches)
    }

    fn run(
        self, config: &Config, out: &mut dyn Write
    ) -> Result<(), ExitError> {
        with_store(config, |store| {
            if !store.contains(&self.name)? {
                error!("No such file: '{}'.", self.name);
                return Err(ExitError::Generic)
            }
            let mut position = self.position;
            let mut left = self.length.unwrap_or(u64::MAX);
            let mut buf = vec![0; BLOCK_SIZE];
            while left > 0 {
                let len = cmp::min(left, BLOCK_SIZE as u64) as usize;
                let read = match store.load(
                    &self.name, position, &mut buf, 0, len
                )? {
                    Some(read) => read,
                    None => break,
                };
                write_out(out, &buf[..read])?;
                position += read as u64;
                left -= read as u64;
            }
            Ok(())
        })
    }
}


//------------ Append --------------------------------------------------------

/// Appends data to a file.
#[derive(Clone, Debug, Parser)]
pub struct Append {
    /// Name of the file
    #[arg(value_name = "NAME")]
    name: String,

    /// Read the data from this file instead of stdin
    #[arg(value_name = "PATH")]
    input: Option<PathBuf>,
}

impl Append {
    /// Adds the command configuration to a clap app.
    pub fn config_args(app: clap::Command) -> clap::Command {
        app.subcommand(
            Append::augment_args(
                clap::Command::new("append")
                    .about("Appends data to a file, creating it if necessary")
            )
        )
    }

    /// Creates a command from clap matches.
    pub fn from_arg_matches(
        matches: &ArgMatches,
        cur_dir: &Path,
    ) -> Result<Self, Failed> {
        let mut res: Self = parse_args(matches)?;
        res.input = res.input.map(|path| cur_dir.join(path));
        Ok(res)
    }

    fn run(self, config: &Config) -> Result<(), ExitError> {
        let data = match self.input {
            Some(ref path) => fatal::read_file(path)?,
            None => {
                let mut data = Vec::new();
                if let Err(err) = io::stdin().lock().read_to_end(&mut data) {
                    error!("Failed to read from stdin: {}", err);
                    return Err(ExitError::Generic)
                }
                data
            }
        };
        with_store(config, |store| {
            store.append(&self.name, &data, 0, data.len())?;
            Ok(())
        })
    }
}


//------------ Remove --------------------------------------------------------

/// Removes a file.
#[derive(Clone, Debug, Parser)]
pub struct Remove {
    /// Name of the file
    #[arg(value_name = "NAME")]
    name: String,
}

impl Remove {
    /// Adds the command configuration to a clap app.
    pub fn config_args(app: clap::Command) -> clap::Command {
        app.subcommand(
            Remove::augment_args(
                clap::Command::new("rm").about("Removes a file")
            )
        )
    }

    /// Creates a command from clap matches.
    pub fn from_arg_matches(matches: &ArgMatches) -> Result<Self, Failed> {
        parse_args(matches)
    }

    fn run(self, config: &Config) -> Result<(), ExitError> {
        with_store(config, |store| {
            store.remove(&self.name)?;
            Ok(())
        })
    }
}


//------------ Move ----------------------------------------------------------

/// Renames a file.
#[derive(Clone, Debug, Parser)]
pub struct Move {
    /// Current name of the file
    #[arg(value_name = "SOURCE")]
    source: String,

    /// New name of the file, replacing any existing file
    #[arg(value_name = "DEST")]
    dest: String,
}

impl Move {
    /// Adds the command configuration to a clap app.
    pub fn config_args(app: clap::Command) -> clap::Command {
        app.subcommand(
            Move::augment_args(
                clap::Command::new("mv").about("Renames a file")
            )
        )
    }

    /// Creates a command from clap matches.
    pub fn from_arg_matches(matches: &ArgMatches) -> Result<Self, Failed> {
        parse_args(matches)
    }

    fn run(self, config: &Config) -> Result<(), ExitError> {
        with_store(config, |store| {
            store.rename(&self.source, &self.dest)?;
            Ok(())
        })
    }
}


//------------ Clear ---------------------------------------------------------

/// Removes all files.
#[derive(Clone, Debug)]
pub struct Clear;

impl Clear {
    /// Adds the command configuration to a clap app.
    pub fn config_args(app: clap::Command) -> clap::Command {
        app.subcommand(clap::Command::new("clear")
            .about("Removes all files from the store")
        )
    }

    fn run(self, config: &Config) -> Result<(), ExitError> {
        with_store(config, |store| {
            store.clear()?;
            Ok(())
        })
    }
}


//------------ Verify --------------------------------------------------------

/// Checks the consistency of the store.
#[derive(Clone, Debug)]
pub struct Verify;

impl Verify {
    /// Adds the command configuration to a clap app.
    pub fn config_args(app: clap::Command) -> clap::Command {
        app.subcommand(clap::Command::new("verify")
            .about("Checks the consistency of the store")
        )
    }

    fn run(
        self, config: &Config, out: &mut dyn Write
    ) -> Result<(), ExitError> {
        with_store(config, |store| {
            let stats = store.verify()?;
            writeln!(out, "Block store {}:", config.store_dir.display())
                .map_err(output_failed)?;
            stats.write(out).map_err(output_failed)
        })
    }
}


//------------ Sanitize ------------------------------------------------------

/// Removes orphaned blocks.
#[derive(Clone, Debug)]
pub struct Sanitize;

impl Sanitize {
    /// Adds the command configuration to a clap app.
    pub fn config_args(app: clap::Command) -> clap::Command {
        app.subcommand(clap::Command::new("sanitize")
            .about("Removes blocks that don’t belong to any file")
        )
    }

    fn run(
        self, config: &Config, out: &mut dyn Write
    ) -> Result<(), ExitError> {
        with_store(config, |store| {
            let removed = store.sanitize()?;
            writeln!(out, "Removed {} orphaned blocks.", removed)
                .map_err(output_failed)
        })
    }
}


//------------ PrintConfig ---------------------------------------------------

/// Shows the current configuration.
#[derive(Clone, Debug)]
pub struct PrintConfig;

impl PrintConfig {
    /// Adds the command configuration to a clap app.
    pub fn config_args(app: clap::Command) -> clap::Command {
        app.subcommand(clap::Command::new("config")
            .about("Prints the current config and exits")
        )
    }

    /// Prints the current configuration and exits.
    fn run(
        self, config: &Config, out: &mut dyn Write
    ) -> Result<(), ExitError> {
        writeln!(out, "{}", config).map_err(output_failed)
    }
}


//------------ Helpers -------------------------------------------------------

/// Converts clap matches into a subcommand’s arguments.
fn parse_args<T: FromArgMatches>(matches: &ArgMatches) -> Result<T, Failed> {
    T::from_arg_matches(matches).map_err(|err| {
        error!("Invalid command line arguments: {}", err);
        Failed
    })
}

/// Opens the store, runs `op` on it, and closes it again.
///
/// The store is closed even if `op` fails. In this case, the error of `op`
/// is returned.
fn with_store<F>(config: &Config, op: F) -> Result<(), ExitError>
where F: FnOnce(&BlockFileStore) -> Result<(), ExitError> {
    let store = BlockFileStore::open(config)?;
    let res = op(&store);
    let closed = store.close().map_err(ExitError::from);
    res?;
    closed
}

/// Writes data to the command output.
fn write_out(out: &mut dyn Write, data: &[u8]) -> Result<(), ExitError> {
    out.write_all(data).map_err(output_failed)
}

/// Logs a failure to write the command output.
fn output_failed(err: io::Error) -> ExitError {
    error!("Failed to write output: {}", err);
    ExitError::Generic
}


//============ Tests =========================================================
