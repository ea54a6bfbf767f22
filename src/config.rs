//! Configuration.
//!
//! This module primarily contains the type [`Config`] that holds all the
//! configuration used by the block store and its command line tool. It can
//! be loaded both from a TOML formatted config file and command line
//! options.

use std::{env, fmt, fs};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use clap::{Command, Args, ArgAction, ArgMatches, FromArgMatches, Parser};
use dirs::home_dir;
use log::{LevelFilter, error};
#[cfg(unix)] use syslog::Facility;
use crate::error::Failed;


//------------ Defaults for Some Values --------------------------------------

/// The default size of the page cache of each keyspace in octets.
const DEFAULT_CACHE_CAPACITY: u64 = 64 * 1024 * 1024;

/// The default interval for background flushes in milliseconds.
const DEFAULT_FLUSH_EVERY: u64 = 500;

/// The default syslog facility.
#[cfg(unix)]
const DEFAULT_SYSLOG_FACILITY: Facility = Facility::LOG_DAEMON;


//------------ Config --------------------------------------------------------

/// Block store configuration.
///
/// All values are public and can be accessed directly.
///
/// The function [`config_args`] can be used to add the configuration’s
/// arguments to a clap command. Its matches can then be used to create the
/// config via [`from_arg_matches`]. Finally, [`to_toml`] can be used to
/// produce a TOML value that contains a configuration file content
/// representing the current configuration.
///
/// [`config_args`]: #method.config_args
/// [`from_arg_matches`]: #method.from_arg_matches
/// [`to_toml`]: #method.to_toml
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// Path to the directory that contains the two keyspaces.
    pub store_dir: PathBuf,

    /// Should we delete all content of the store when opening it?
    pub fresh: bool,

    /// The size of the page cache of each keyspace in octets.
    pub cache_capacity: u64,

    /// The interval of background flushes.
    ///
    /// If this is `None`, the keyspaces are only flushed on close.
    pub flush_every: Option<Duration>,

    /// The minimum log level to actually log.
    pub log_level: LevelFilter,

    /// Where to log to?
    pub log_target: LogTarget,
}


impl Config {
    /// Adds the basic arguments to a clapp app.
    ///
    /// The function follows clap’s builder pattern: it takes an app,
    /// adds a bunch of arguments to it and returns it at the end.
    pub fn config_args(app: Command) -> Command {
        GlobalArgs::augment_args(app)
    }

    /// Creates a configuration from command line matches.
    ///
    /// The function attempts to create configuration from the command line
    /// arguments provided via `matches`. It will try to read a config file
    /// if provided via the config file option (`-c` or `--config`) or a
    /// file in `$HOME/.blockfile.conf` otherwise. If the latter doesn’t
    /// exist either, starts with a default configuration.
    ///
    /// All relative paths given in command line arguments will be interpreted
    /// relative to `cur_dir`. Conversely, paths in the config file are
    /// treated as relative to the config file’s directory.
    pub fn from_arg_matches(
        matches: &ArgMatches,
        cur_dir: &Path,
    ) -> Result<Self, Failed> {
        let mut res = Self::create_base_config(
            Self::path_value_of(matches, "config", cur_dir)
                .as_ref().map(AsRef::as_ref)
        )?;
        res.apply_arg_matches(matches, cur_dir)?;
        Ok(res)
    }

    /// Applies the basic command line arguments to a configuration.
    ///
    /// The path arguments in `matches` will be interpreted relative to
    /// `cur_dir`.
    fn apply_arg_matches(
        &mut self,
        matches: &ArgMatches,
        cur_dir: &Path,
    ) -> Result<(), Failed> {
        let args = match GlobalArgs::from_arg_matches(matches) {
            Ok(args) => args,
            Err(err) => {
                error!("Invalid command line arguments: {}", err);
                return Err(Failed)
            }
        };

        // log_target
        self.apply_log_matches(&args, cur_dir)?;

        // store_dir
        if let Some(dir) = args.store_dir {
            self.store_dir = cur_dir.join(dir)
        }
        if self.store_dir == Path::new("") {
            error!(
                "Couldn’t determine default store directory: \
                 no home directory.\n\
                 Please specify the store directory with the -d option."
            );
            return Err(Failed)
        }

        // fresh
        if args.fresh {
            self.fresh = true
        }

        // cache_capacity
        if let Some(value) = args.cache_capacity {
            self.cache_capacity = value
        }

        // flush_every
        if let Some(value) = args.flush_every {
            self.flush_every = flush_every_from_millis(value)
        }

        // log_level
        if args.verbose > 1 {
            self.log_level = LevelFilter::Debug
        }
        else if args.verbose == 1 {
            self.log_level = LevelFilter::Info
        }
        else if args.quiet > 1 {
            self.log_level = LevelFilter::Off
        }
        else if args.quiet == 1 {
            self.log_level = LevelFilter::Error
        }

        Ok(())
    }

    /// Applies the logging-specific command line arguments to the config.
    ///
    /// This is the Unix version that also considers syslog as a valid
    /// target.
    #[cfg(unix)]
    fn apply_log_matches(
        &mut self,
        args: &GlobalArgs,
        cur_dir: &Path,
    ) -> Result<(), Failed> {
        if args.syslog {
            if let Some(facility) = args.syslog_facility.as_ref() {
                self.log_target = LogTarget::Syslog(
                    match Facility::from_str(facility) {
                        Ok(value) => value,
                        Err(_) => {
                            error!("Invalid value for syslog-facility.");
                            return Err(Failed);
                        }
                    }
                )
            }
            else if !matches!(self.log_target, LogTarget::Syslog(_)) {
                // Keep a facility from the config file.
                self.log_target = LogTarget::Syslog(DEFAULT_SYSLOG_FACILITY)
            }
        }
        else if let Some(file) = args.logfile.as_ref() {
            if file == "-" {
                self.log_target = LogTarget::Stderr
            }
            else {
                self.log_target = LogTarget::File(cur_dir.join(file))
            }
        }
        Ok(())
    }

    /// Applies the logging-specific command line arguments to the config.
    ///
    /// This is the non-Unix version that does not use syslog.
    #[cfg(not(unix))]
    #[allow(clippy::unnecessary_wraps)]
    fn apply_log_matches(
        &mut self,
        args: &GlobalArgs,
        cur_dir: &Path,
    ) -> Result<(), Failed> {
        if let Some(file) = args.logfile.as_ref() {
            if file == "-" {
                self.log_target = LogTarget::Stderr
            }
            else {
                self.log_target = LogTarget::File(cur_dir.join(file))
            }
        }
        Ok(())
    }

    /// Returns a path value in arg matches.
    ///
    /// This expands a relative path based on the given directory.
    fn path_value_of(
        matches: &ArgMatches,
        key: &str,
        dir: &Path
    ) -> Option<PathBuf> {
        matches.get_one::<PathBuf>(key).map(|path| dir.join(path))
    }

    /// Creates the correct base configuration for the given config file path.
    ///
    /// If no config path is given, tries to read the default config in
    /// `$HOME/.blockfile.conf`. If that doesn’t exist, creates a default
    /// config.
    fn create_base_config(path: Option<&Path>) -> Result<Self, Failed> {
        let file = match path {
            Some(path) => {
                match ConfigFile::read(path)? {
                    Some(file) => file,
                    None => {
                        error!("Cannot read config file {}", path.display());
                        return Err(Failed);
                    }
                }
            }
            None => {
                match home_dir() {
                    Some(dir) => match ConfigFile::read(
                                            &dir.join(".blockfile.conf"))? {
                        Some(file) => file,
                        None => return Ok(Self::default()),
                    }
                    None => return Ok(Self::default())
                }
            }
        };
        Self::from_config_file(file)
    }

    /// Creates a base config from a config file.
    ///
    /// Values missing from the file are taken from the default config.
    fn from_config_file(mut file: ConfigFile) -> Result<Self, Failed> {
        let default = Self::default();
        let log_target = Self::log_target_from_config_file(&mut file)?;
        let res = Config {
            store_dir: {
                file.take_path("store-dir")?.unwrap_or(default.store_dir)
            },
            fresh: false,
            cache_capacity: {
                file.take_u64("cache-capacity")?
                    .unwrap_or(default.cache_capacity)
            },
            flush_every: match file.take_u64("flush-every")? {
                Some(value) => flush_every_from_millis(value),
                None => default.flush_every,
            },
            log_level: {
                file.take_from_str("log-level")?.unwrap_or(default.log_level)
            },
            log_target,
        };
        file.check_exhausted()?;
        Ok(res)
    }

    /// Determines the logging target from the config file.
    ///
    /// This is the Unix version that also deals with syslog.
    #[cfg(unix)]
    fn log_target_from_config_file(
        file: &mut ConfigFile
    ) -> Result<LogTarget, Failed> {
        let facility = file.take_string("syslog-facility")?;
        let facility = facility.as_ref().map(AsRef::as_ref)
                               .unwrap_or("daemon");
        let facility = match Facility::from_str(facility) {
            Ok(value) => value,
            Err(_) => {
                error!(
                    "Failed in config file {}: invalid syslog-facility.",
                    file.path.display()
                );
                return Err(Failed);
            }
        };
        let log_target = file.take_string("log")?;
        let log_file = file.take_path("log-file")?;
        match log_target.as_ref().map(AsRef::as_ref) {
            Some("stderr") | None =>  Ok(LogTarget::Stderr),
            Some("syslog") => Ok(LogTarget::Syslog(facility)),
            Some("file") => {
                match log_file {
                    Some(file) => Ok(LogTarget::File(file)),
                    None => {
                        error!(
                            "Failed in config file {}: \
                             log target \"file\" requires 'log-file' value.",
                            file.path.display()
                        );
                        Err(Failed)
                    }
                }
            }
            Some(value) => {
                error!(
                    "Failed in config file {}: \
                     invalid log target '{}'",
                     file.path.display(),
                     value
                );
                Err(Failed)
            }
        }
    }

    /// Determines the logging target from the config file.
    ///
    /// This is the non-Unix version that only logs to stderr or a file.
    #[cfg(not(unix))]
    fn log_target_from_config_file(
        file: &mut ConfigFile
    ) -> Result<LogTarget, Failed> {
        let log_target = file.take_string("log")?;
        let log_file = file.take_path("log-file")?;
        match log_target.as_ref().map(AsRef::as_ref) {
            Some("stderr") | None => Ok(LogTarget::Stderr),
            Some("file") => {
                match log_file {
                    Some(file) => Ok(LogTarget::File(file)),
                    None => {
                        error!(
                            "Failed in config file {}: \
                             log target \"file\" requires 'log-file' value.",
                            file.path.display()
                        );
                        Err(Failed)
                    }
                }
            }
            Some(value) => {
                error!(
                    "Failed in config file {}: \
                     invalid log target '{}'",
                    file.path.display(), value
                );
                Err(Failed)
            }
        }
    }

    /// Creates a default config with the given store directory.
    fn default_with_store_dir(store_dir: PathBuf) -> Self {
        Config {
            store_dir,
            fresh: false,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            flush_every: flush_every_from_millis(DEFAULT_FLUSH_EVERY),
            log_level: LevelFilter::Warn,
            log_target: LogTarget::default(),
        }
    }

    /// Returns a TOML representation of the config.
    ///
    /// The `fresh` flag is a command line option only and is not included.
    pub fn to_toml(&self) -> toml::Value {
        let mut res = toml::value::Table::new();
        res.insert(
            "store-dir".into(),
            self.store_dir.display().to_string().into()
        );
        res.insert(
            "cache-capacity".into(),
            i64::try_from(self.cache_capacity).unwrap_or(i64::MAX).into()
        );
        res.insert(
            "flush-every".into(),
            match self.flush_every {
                Some(every) => {
                    i64::try_from(every.as_millis()).unwrap_or(i64::MAX)
                }
                None => 0
            }.into()
        );
        res.insert(
            "log-level".into(),
            self.log_level.to_string().to_lowercase().into()
        );
        match self.log_target {
            #[cfg(unix)]
            LogTarget::Syslog(facility) => {
                res.insert("log".into(), "syslog".into());
                res.insert(
                    "syslog-facility".into(),
                    facility_to_string(facility).into()
                );
            }
            LogTarget::Stderr => {
                res.insert("log".into(), "stderr".into());
            }
            LogTarget::File(ref file) => {
                res.insert("log".into(), "file".into());
                res.insert(
                    "log-file".into(),
                    file.display().to_string().into()
                );
            }
        }
        res.into()
    }
}


//--- Default

impl Default for Config {
    fn default() -> Self {
        Config::default_with_store_dir(
            match home_dir() {
                Some(dir) => dir.join(".blockfile").join("store"),
                None => PathBuf::from(""),
            }
        )
    }
}


//--- Display

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_toml())
    }
}


//------------ LogTarget -----------------------------------------------------

/// The target to log to.
#[derive(Clone, Debug, Default)]
pub enum LogTarget {
    /// Syslog.
    ///
    /// The argument is the syslog facility to use.
    #[cfg(unix)]
    Syslog(Facility),

    /// Stderr.
    #[default]
    Stderr,

    /// A file.
    ///
    /// The argument is the file name.
    File(PathBuf)
}


//--- PartialEq and Eq

impl PartialEq for LogTarget {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            #[cfg(unix)]
            (&LogTarget::Syslog(s), &LogTarget::Syslog(o)) => {
                (s as usize) == (o as usize)
            }
            (&LogTarget::Stderr, &LogTarget::Stderr) => true,
            (&LogTarget::File(ref s), &LogTarget::File(ref o)) => {
                s == o
            }
            _ => false
        }
    }
}

impl Eq for LogTarget { }


//------------ GlobalArgs ----------------------------------------------------

/// The global command line arguments.
#[derive(Clone, Debug, Parser)]
struct GlobalArgs {
    /// Read base configuration from this file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Sets the store directory
    #[arg(short = 'd', long, value_name = "PATH")]
    store_dir: Option<PathBuf>,

    /// Delete all files in the store before starting
    #[arg(long)]
    fresh: bool,

    /// Size of the page cache of each keyspace
    #[arg(long, value_name = "BYTES")]
    cache_capacity: Option<u64>,

    /// Interval between background flushes (0 to only flush on close)
    #[arg(long, value_name = "MILLISECONDS")]
    flush_every: Option<u64>,

    /// Log more information, twice for even more
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Log less information, twice for no information
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "verbose")]
    quiet: u8,

    /// Log to syslog
    #[cfg(unix)]
    #[arg(long)]
    syslog: bool,

    /// Facility to use for syslog logging
    #[cfg(unix)]
    #[arg(long, value_name = "FACILITY")]
    syslog_facility: Option<String>,

    /// Log to this file
    #[arg(long, value_name = "PATH")]
    logfile: Option<String>,
}


//------------ ConfigFile ----------------------------------------------------

/// The content of a config file.
///
/// This is a thin wrapper around `toml::Table` to make dealing with it more
/// convenient.
#[derive(Clone, Debug)]
struct ConfigFile {
    /// The content of the file.
    content: toml::value::Table,

    /// The path to the config file.
    path: PathBuf,

    /// The directory we found the file in.
    ///
    /// This is used in relative paths.
    dir: PathBuf,
}

impl ConfigFile {
    /// Reads the config file at the given path.
    ///
    /// If there is no such file, returns `None`. If there is a file but it
    /// is broken, aborts.
    #[allow(clippy::verbose_file_reads)]
    fn read(path: &Path) -> Result<Option<Self>, Failed> {
        let mut file = match fs::File::open(path) {
            Ok(file) => file,
            Err(_) => return Ok(None)
        };
        let mut config = String::new();
        if let Err(err) = file.read_to_string(&mut config) {
            error!(
                "Failed to read config file {}: {}",
                path.display(), err
            );
            return Err(Failed);
        }
        Self::parse(&config, path).map(Some)
    }

    /// Parses the content of the file from a string.
    fn parse(content: &str, path: &Path) -> Result<Self, Failed> {
        let content = match toml::from_str(content) {
            Ok(toml::Value::Table(content)) => content,
            Ok(_) => {
                error!(
                    "Failed to parse config file {}: Not a mapping.",
                    path.display()
                );
                return Err(Failed);
            }
            Err(err) => {
                error!(
                    "Failed to parse config file {}: {}",
                    path.display(), err
                );
                return Err(Failed);
            }
        };
        let path = if path.is_relative() {
            match env::current_dir() {
                Ok(dir) => dir.join(path),
                Err(err) => {
                    error!(
                        "Fatal: Can't determine current directory: {}.",
                        err
                    );
                    return Err(Failed);
                }
            }
        }
        else {
            path.into()
        };
        let dir = match path.parent() {
            Some(dir) => dir.into(),
            None => {
                error!(
                    "Fatal: config file {} has no parent directory.",
                    path.display()
                );
                return Err(Failed);
            }
        };
        Ok(ConfigFile { content, path, dir })
    }

    /// Takes an unsigned integer value from the config file.
    ///
    /// The value is taken from the given `key`. Returns `Ok(None)` if there
    /// is no such key. Returns an error if the key exists but the value
    /// isn’t an integer or if it is negative.
    fn take_u64(&mut self, key: &str) -> Result<Option<u64>, Failed> {
        match self.content.remove(key) {
            Some(value) => {
                if let toml::Value::Integer(res) = value {
                    match u64::try_from(res) {
                        Ok(res) => Ok(Some(res)),
                        Err(_) => {
                            error!(
                                "Failed in config file {}: \
                                '{}' expected to be a positive integer.",
                                self.path.display(), key
                            );
                            Err(Failed)
                        }
                    }
                }
                else {
                    error!(
                        "Failed in config file {}: \
                         '{}' expected to be an integer.",
                        self.path.display(), key
                    );
                    Err(Failed)
                }
            }
            None => Ok(None)
        }
    }

    /// Takes a string value from the config file.
    ///
    /// The value is taken from the given `key`. Returns `Ok(None)` if there
    /// is no such key. Returns an error if the key exists but the value
    /// isn’t a string.
    fn take_string(&mut self, key: &str) -> Result<Option<String>, Failed> {
        match self.content.remove(key) {
            Some(value) => {
                if let toml::Value::String(res) = value {
                    Ok(Some(res))
                }
                else {
                    error!(
                        "Failed in config file {}: \
                         '{}' expected to be a string.",
                        self.path.display(), key
                    );
                    Err(Failed)
                }
            }
            None => Ok(None)
        }
    }

    /// Takes a string encoded value from the config file.
    ///
    /// The value is taken from the given `key`. It is expected to be a
    /// string and will be converted to the final type via `FromStr::from_str`.
    ///
    /// Returns `Ok(None)` if the key doesn’t exist. Returns an error if the
    /// key exists but the value isn’t a string or conversion fails.
    fn take_from_str<T>(&mut self, key: &str) -> Result<Option<T>, Failed>
    where T: FromStr, T::Err: fmt::Display {
        match self.take_string(key)? {
            Some(value) => {
                match T::from_str(&value) {
                    Ok(some) => Ok(Some(some)),
                    Err(err) => {
                        error!(
                            "Failed in config file {}: \
                             illegal value in '{}': {}.",
                            self.path.display(), key, err
                        );
                        Err(Failed)
                    }
                }
            }
            None => Ok(None)
        }
    }

    /// Takes a path value from the config file.
    ///
    /// The path is taken from the given `key`. It must be a string value.
    /// It is treated as relative to the directory of the config file. If it
    /// is indeed a relative path, it is expanded accordingly and an absolute
    /// path is returned.
    ///
    /// Returns `Ok(None)` if the key does not exist. Returns an error if the
    /// key exists but the value isn’t a string.
    fn take_path(&mut self, key: &str) -> Result<Option<PathBuf>, Failed> {
        self.take_string(key).map(|opt| opt.map(|path| self.dir.join(path)))
    }

    /// Checks whether the config file is now empty.
    ///
    /// If it isn’t, logs a complaint and returns an error.
    fn check_exhausted(&self) -> Result<(), Failed> {
        if !self.content.is_empty() {
            let keys: Vec<_> = self.content.keys().map(String::as_str).collect();
            error!(
                "Failed in config file {}: Unknown settings {}.",
                self.path.display(), keys.join(",")
            );
            Err(Failed)
        }
        else {
            Ok(())
        }
    }
}


//------------ Helpers -------------------------------------------------------

/// Converts a flush interval in milliseconds into the config value.
///
/// An interval of zero disables background flushing.
fn flush_every_from_millis(millis: u64) -> Option<Duration> {
    if millis == 0 {
        None
    }
    else {
        Some(Duration::from_millis(millis))
    }
}

/// Converts the syslog facility name to the facility type.
#[cfg(unix)]
fn facility_to_string(facility: Facility) -> String {
    use syslog::Facility::*;

    match facility {
        LOG_KERN => "kern",
        LOG_USER => "user",
        LOG_MAIL => "mail",
        LOG_DAEMON => "daemon",
        LOG_AUTH => "auth",
        LOG_SYSLOG => "syslog",
        LOG_LPR => "lpr",
        LOG_NEWS => "news",
        LOG_UUCP => "uucp",
        LOG_CRON => "cron",
        LOG_AUTHPRIV => "authpriv",
        LOG_FTP => "ftp",
        LOG_LOCAL0 => "local0",
        LOG_LOCAL1 => "local1",
        LOG_LOCAL2 => "local2",
        LOG_LOCAL3 => "local3",
        LOG_LOCAL4 => "local4",
        LOG_LOCAL5 => "local5",
        LOG_LOCAL6 => "local6",
        LOG_LOCAL7 => "local7",
    }.into()
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;

    fn get_default_config() -> Config {
        // Set $HOME so that home_dir always succeeds.
        ::std::env::set_var("HOME", "/home/test");
        Config::default()
    }

    fn process_basic_args(args: &[&str]) -> Config {
        let mut config = get_default_config();
        config.apply_arg_matches(
            &Config::config_args(Command::new("blockfile"))
                .get_matches_from(args),
            Path::new("/test")
        ).unwrap();
        config
    }

    #[test]
    #[cfg(unix)]
    fn default_config() {
        let config = get_default_config();
        assert_eq!(
            config.store_dir,
            home_dir().unwrap().join(".blockfile").join("store")
        );
        assert!(!config.fresh);
        assert_eq!(config.cache_capacity, DEFAULT_CACHE_CAPACITY);
        assert_eq!(
            config.flush_every,
            Some(Duration::from_millis(DEFAULT_FLUSH_EVERY))
        );
        assert_eq!(config.log_level, LevelFilter::Warn);
        assert_eq!(config.log_target, LogTarget::Stderr);
    }

    #[test]
    #[cfg(unix)] // ... because of drive letters in absolute paths on Windows.
    fn good_config_file() {
        let config = ConfigFile::parse(
            "store-dir = \"store\"\n\
             cache-capacity = 1048576\n\
             flush-every = 0\n\
             log-level = \"info\"\n\
             log = \"file\"\n\
             log-file = \"/var/log/blockfile.log\"",
            Path::new("/test/blockfile.conf")
        ).unwrap();
        let config = Config::from_config_file(config).unwrap();
        assert_eq!(config.store_dir.to_str().unwrap(), "/test/store");
        assert_eq!(config.cache_capacity, 1048576);
        assert_eq!(config.flush_every, None);
        assert_eq!(config.log_level, LevelFilter::Info);
        assert_eq!(
            config.log_target,
            LogTarget::File(PathBuf::from("/var/log/blockfile.log"))
        );

        let config = ConfigFile::parse(
            "log = \"syslog\"\n\
             syslog-facility = \"local3\"",
            Path::new("/test/blockfile.conf")
        ).unwrap();
        let config = Config::from_config_file(config).unwrap();
        assert_eq!(config.log_target, LogTarget::Syslog(Facility::LOG_LOCAL3));
    }

    #[test]
    #[cfg(unix)]
    fn minimal_config_file() {
        let config = ConfigFile::parse(
            "", Path::new("/test/blockfile.conf")
        ).unwrap();
        let config = Config::from_config_file(config).unwrap();
        assert_eq!(config, get_default_config());
    }

    #[test]
    fn bad_config_file() {
        for content in [
            "store-dir = 12",
            "cache-capacity = -1",
            "cache-capacity = \"big\"",
            "log-level = \"loud\"",
            "log = \"file\"",
            "log = \"somewhere\"",
            "repository-dir = \"/repo\"",
            "[store]",
        ] {
            let config = ConfigFile::parse(
                content, Path::new("/test/blockfile.conf")
            ).unwrap();
            assert!(Config::from_config_file(config).is_err(), "{}", content);
        }
        assert!(
            ConfigFile::parse("store-dir", Path::new("/test/blockfile.conf"))
                .is_err()
        );
    }

    #[test]
    fn read_your_own_config() {
        let mut out_config = get_default_config();
        out_config.log_target = LogTarget::File("/var/log/bf.log".into());
        out_config.flush_every = None;
        let out_file = format!("{}", out_config.to_toml());
        let in_file = ConfigFile::parse(
            &out_file, Path::new("/test/blockfile.conf")
        ).unwrap();
        let in_config = Config::from_config_file(in_file).unwrap();
        assert_eq!(out_config, in_config);
    }

    #[test]
    #[cfg(unix)]
    fn basic_args() {
        let config = process_basic_args(&[
            "blockfile", "-d", "store", "--fresh",
            "--cache-capacity", "4096", "--flush-every", "0",
            "--syslog", "--syslog-facility", "auth"
        ]);
        assert_eq!(config.store_dir, Path::new("/test/store"));
        assert!(config.fresh);
        assert_eq!(config.cache_capacity, 4096);
        assert_eq!(config.flush_every, None);
        assert_eq!(config.log_target, LogTarget::Syslog(Facility::LOG_AUTH));

        let config = process_basic_args(&[
            "blockfile", "--store-dir", "/store", "--logfile", "bf.log"
        ]);
        assert_eq!(config.store_dir, Path::new("/store"));
        assert!(!config.fresh);
        assert_eq!(config.log_target, LogTarget::File("/test/bf.log".into()));
    }

    #[test]
    fn verbosity() {
        let config = process_basic_args(&["blockfile"]);
        assert_eq!(config.log_level, LevelFilter::Warn);
        let config = process_basic_args(&["blockfile", "-v"]);
        assert_eq!(config.log_level, LevelFilter::Info);
        let config = process_basic_args(&["blockfile", "-vv"]);
        assert_eq!(config.log_level, LevelFilter::Debug);
        let config = process_basic_args(&["blockfile", "-q"]);
        assert_eq!(config.log_level, LevelFilter::Error);
        let config = process_basic_args(&["blockfile", "-qq"]);
        assert_eq!(config.log_level, LevelFilter::Off);
    }

    #[test]
    fn check_args() {
        crate::operation::Operation::config_args(
            GlobalArgs::augment_args(Command::new("test"))
        ).debug_assert();
    }
}
