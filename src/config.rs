//! Configuration.
//!
//! This module primarily contains the type [`Config`] that holds all the
//! configuration used by chainfix. It can be loaded both from a TOML
//! formatted config file and command line options.

use std::{env, fmt, fs};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use clap::{
    Command, Args, ArgAction, ArgMatches, FromArgMatches, Parser,
    crate_version,
};
use dirs::home_dir;
use log::{LevelFilter, error};
use crate::error::Failed;


//------------ Defaults for Some Values --------------------------------------

/// The default number of fixer threads.
const DEFAULT_FIX_THREADS: usize = 100;

/// The default number of issuer fetches per chain.
const DEFAULT_MAX_FETCHES: usize = 8;

/// The default interval for logging the fixer counters.
const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// The default time failed fetches are remembered.
const DEFAULT_FAILURE_TTL: Duration = Duration::from_secs(0);

/// The default timeout for fetching an issuer certificate.
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// The default timeout for connecting to a server.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// The default maximum size of a fetched resource.
const DEFAULT_MAX_FETCH_SIZE: u64 = 1_000_000;

/// The default user agent for fetching.
const DEFAULT_USER_AGENT: &str = concat!("chainfix/", crate_version!());

/// The name of the config file in the home directory.
const DEFAULT_CONFIG_FILE: &str = ".chainfix.conf";


//------------ Config --------------------------------------------------------

/// Chainfix configuration.
///
/// All values are public and can be accessed directly.
///
/// The function [`config_args`][Self::config_args] can be used to add the
/// options to a clap command. Its matches can then be used to create the
/// config via [`from_arg_matches`][Self::from_arg_matches]. Finally,
/// [`to_toml`][Self::to_toml] produces a TOML value representing the
/// current configuration in config file format.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// Path to a PEM file with the trusted root certificates.
    pub roots: Option<PathBuf>,

    /// The number of worker threads fixing chains.
    pub fix_threads: usize,

    /// The maximum number of chains waiting for a worker.
    ///
    /// If this is `None`, the queue is unbounded.
    pub queue_size: Option<usize>,

    /// The maximum number of issuer fetches for a single chain.
    pub max_fetches: usize,

    /// The interval for logging the fixer counters.
    ///
    /// A zero interval disables reporting.
    pub report_interval: Duration,

    /// How long a failed fetch is remembered for later chains.
    pub failure_ttl: Duration,

    /// The timeout for fetching an issuer certificate.
    pub fetch_timeout: Option<Duration>,

    /// The timeout for connecting to a server.
    pub connect_timeout: Option<Duration>,

    /// The maximum size of a fetched resource in bytes.
    pub max_fetch_size: u64,

    /// The user agent used when fetching.
    pub user_agent: String,

    /// Proxies to use when fetching.
    pub proxies: Vec<String>,

    /// The log levels to be logged.
    pub log_level: LevelFilter,

    /// The target to log to.
    pub log_target: LogTarget,
}


impl Config {
    /// Adds the basic arguments to a clap command.
    ///
    /// The function follows clap’s builder pattern: it takes a command,
    /// adds a bunch of arguments to it and returns it at the end.
    pub fn config_args(app: Command) -> Command {
        GlobalArgs::augment_args(app)
    }

    /// Creates a configuration from command line matches.
    ///
    /// The function attempts to create configuration from the command line
    /// arguments provided via `matches`. It will try to read a config file
    /// if provided via the config file option (`-c` or `--config`) or a
    /// file in `$HOME/.chainfix.conf` otherwise. If the latter doesn’t
    /// exist either, starts with a default configuration.
    ///
    /// All relative paths given in command line arguments will be
    /// interpreted relative to `cur_dir`. Conversely, paths in the config
    /// file are treated as relative to the config file’s directory.
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

    /// Applies the command line arguments to a configuration.
    ///
    /// The path arguments in `matches` will be interpreted relative to
    /// `cur_dir`.
    fn apply_arg_matches(
        &mut self,
        matches: &ArgMatches,
        cur_dir: &Path,
    ) -> Result<(), Failed> {
        let args = GlobalArgs::from_arg_matches(
            matches
        ).expect("bug in command line arguments parser");

        // log_target
        if let Some(file) = args.logfile.as_ref() {
            if file == "-" {
                self.log_target = LogTarget::Stderr
            }
            else {
                self.log_target = LogTarget::File(cur_dir.join(file))
            }
        }

        // roots
        if let Some(path) = args.roots {
            self.roots = Some(cur_dir.join(path))
        }

        // fix_threads
        if let Some(value) = args.fix_threads {
            if value == 0 {
                error!("Invalid value for --fix-threads: must not be 0.");
                return Err(Failed)
            }
            self.fix_threads = value
        }

        // queue_size
        if let Some(value) = args.queue_size {
            self.queue_size = non_zero(value)
        }

        // max_fetches
        if let Some(value) = args.max_fetches {
            self.max_fetches = value
        }

        // report_interval
        if let Some(value) = args.report_interval {
            self.report_interval = Duration::from_secs(value)
        }

        // failure_ttl
        if let Some(value) = args.failure_ttl {
            self.failure_ttl = Duration::from_secs(value)
        }

        // fetch_timeout
        if let Some(value) = args.fetch_timeout {
            self.fetch_timeout = non_zero_secs(value)
        }

        // connect_timeout
        if let Some(value) = args.connect_timeout {
            self.connect_timeout = non_zero_secs(value)
        }

        // max_fetch_size
        if let Some(value) = args.max_fetch_size {
            self.max_fetch_size = value
        }

        // user_agent
        if let Some(value) = args.user_agent {
            self.user_agent = value
        }

        // proxies
        if let Some(list) = args.proxy {
            self.proxies = list
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
    /// `$HOME/.chainfix.conf`. If that doesn’t exist, creates a default
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
                        &dir.join(DEFAULT_CONFIG_FILE)
                    )? {
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
    fn from_config_file(mut file: ConfigFile) -> Result<Self, Failed> {
        let log_target = Self::log_target_from_config_file(&mut file)?;
        let res = Config {
            roots: file.take_path("roots")?,
            fix_threads: {
                match file.take_usize("fix-threads")? {
                    Some(0) => {
                        error!(
                            "Failed in config file {}: \
                             'fix-threads' must not be 0.",
                            file.path.display()
                        );
                        return Err(Failed)
                    }
                    Some(value) => value,
                    None => DEFAULT_FIX_THREADS,
                }
            },
            queue_size: {
                file.take_usize("queue-size")?.and_then(non_zero)
            },
            max_fetches: {
                file.take_usize("max-fetches")?.unwrap_or(DEFAULT_MAX_FETCHES)
            },
            report_interval: {
                file.take_u64("report-interval")?.map(Duration::from_secs)
                    .unwrap_or(DEFAULT_REPORT_INTERVAL)
            },
            failure_ttl: {
                file.take_u64("failure-ttl")?.map(Duration::from_secs)
                    .unwrap_or(DEFAULT_FAILURE_TTL)
            },
            fetch_timeout: {
                match file.take_u64("fetch-timeout")? {
                    Some(value) => non_zero_secs(value),
                    None => Some(DEFAULT_FETCH_TIMEOUT),
                }
            },
            connect_timeout: {
                match file.take_u64("connect-timeout")? {
                    Some(value) => non_zero_secs(value),
                    None => Some(DEFAULT_CONNECT_TIMEOUT),
                }
            },
            max_fetch_size: {
                file.take_u64("max-fetch-size")?
                    .unwrap_or(DEFAULT_MAX_FETCH_SIZE)
            },
            user_agent: {
                file.take_string("user-agent")?
                    .unwrap_or_else(|| DEFAULT_USER_AGENT.into())
            },
            proxies: {
                file.take_string_array("proxies")?.unwrap_or_default()
            },
            log_level: {
                file.take_from_str("log-level")?.unwrap_or(LevelFilter::Warn)
            },
            log_target,
        };
        file.check_exhausted()?;
        Ok(res)
    }

    /// Determines the logging target from the config file.
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

    /// Returns a TOML representation of the config.
    pub fn to_toml(&self) -> toml::Value {
        let mut res = toml::value::Table::new();
        if let Some(roots) = self.roots.as_ref() {
            res.insert("roots".into(), roots.display().to_string().into());
        }
        res.insert("fix-threads".into(), (self.fix_threads as i64).into());
        res.insert(
            "queue-size".into(),
            (self.queue_size.unwrap_or(0) as i64).into()
        );
        res.insert("max-fetches".into(), (self.max_fetches as i64).into());
        res.insert(
            "report-interval".into(),
            (self.report_interval.as_secs() as i64).into()
        );
        res.insert(
            "failure-ttl".into(),
            (self.failure_ttl.as_secs() as i64).into()
        );
        res.insert(
            "fetch-timeout".into(),
            (
                self.fetch_timeout.map(|t| t.as_secs()).unwrap_or(0) as i64
            ).into()
        );
        res.insert(
            "connect-timeout".into(),
            (
                self.connect_timeout.map(|t| t.as_secs()).unwrap_or(0) as i64
            ).into()
        );
        res.insert(
            "max-fetch-size".into(), (self.max_fetch_size as i64).into()
        );
        res.insert("user-agent".into(), self.user_agent.clone().into());
        res.insert(
            "proxies".into(),
            toml::Value::Array(
                self.proxies.iter().map(|p| p.clone().into()).collect()
            )
        );
        res.insert("log-level".into(), self.log_level.to_string().into());
        match self.log_target {
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
        Config {
            roots: None,
            fix_threads: DEFAULT_FIX_THREADS,
            queue_size: None,
            max_fetches: DEFAULT_MAX_FETCHES,
            report_interval: DEFAULT_REPORT_INTERVAL,
            failure_ttl: DEFAULT_FAILURE_TTL,
            fetch_timeout: Some(DEFAULT_FETCH_TIMEOUT),
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            max_fetch_size: DEFAULT_MAX_FETCH_SIZE,
            user_agent: DEFAULT_USER_AGENT.into(),
            proxies: Vec::new(),
            log_level: LevelFilter::Warn,
            log_target: LogTarget::default(),
        }
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
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum LogTarget {
    /// Stderr.
    #[default]
    Stderr,

    /// A file.
    ///
    /// The argument is the file name.
    File(PathBuf)
}


//------------ GlobalArgs ----------------------------------------------------

/// The global command line arguments.
#[derive(Clone, Debug, Parser)]
struct GlobalArgs {
    /// Read base configuration from this file
    #[arg(short, long, value_name="PATH")]
    config: Option<PathBuf>,

    /// PEM file with the trusted root certificates
    #[arg(short, long, value_name="PATH")]
    roots: Option<PathBuf>,

    /// Number of threads fixing chains
    #[arg(long, value_name="COUNT")]
    fix_threads: Option<usize>,

    /// Maximum number of chains waiting to be fixed, 0 for no limit
    #[arg(long, value_name="COUNT")]
    queue_size: Option<usize>,

    /// Maximum number of issuer fetches per chain
    #[arg(long, value_name="COUNT")]
    max_fetches: Option<usize>,

    /// Seconds between progress reports, 0 for none
    #[arg(long, value_name="SECONDS")]
    report_interval: Option<u64>,

    /// Seconds to remember failed fetches
    #[arg(long, value_name="SECONDS")]
    failure_ttl: Option<u64>,

    /// Timeout for fetching an issuer certificate, 0 for none
    #[arg(long, value_name="SECONDS")]
    fetch_timeout: Option<u64>,

    /// Timeout for connecting to a server, 0 for none
    #[arg(long, value_name="SECONDS")]
    connect_timeout: Option<u64>,

    /// Maximum size of a fetched issuer certificate in bytes
    #[arg(long, value_name="BYTES")]
    max_fetch_size: Option<u64>,

    /// User agent to use when fetching
    #[arg(long, value_name="AGENT")]
    user_agent: Option<String>,

    /// Proxy server for fetching issuer certificates
    #[arg(long, value_name="URI")]
    proxy: Option<Vec<String>>,

    /// Log more information, twice for even more
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Log less information, twice for no information
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "verbose")]
    quiet: u8,

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
        let dir = path.parent().map(Into::into).unwrap_or_default();
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
                    u64::try_from(res).map(Some).map_err(|_| {
                        error!(
                            "Failed in config file {}: \
                            '{}' expected to be a positive integer.",
                            self.path.display(), key
                        );
                        Failed
                    })
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

    /// Takes an unsigned integer value from the config file.
    ///
    /// The value is taken from the given `key`. Returns `Ok(None)` if there
    /// is no such key. Returns an error if the key exists but the value
    /// isn’t an integer or if it is negative.
    fn take_usize(&mut self, key: &str) -> Result<Option<usize>, Failed> {
        match self.take_u64(key)? {
            Some(value) => {
                usize::try_from(value).map(Some).map_err(|_| {
                    error!(
                        "Failed in config file {}: \
                         '{}' is too large.",
                        self.path.display(), key
                    );
                    Failed
                })
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
    /// string and will be converted to the final type via
    /// `FromStr::from_str`.
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

    /// Takes an array of strings from the config file.
    ///
    /// The value is taken from the entry with the given `key` and, if
    /// present, the entry is removed. The value must be an array of
    /// strings. If the key is not present, returns `Ok(None)`. If the entry
    /// is present but not an array of strings, returns an error.
    fn take_string_array(
        &mut self,
        key: &str
    ) -> Result<Option<Vec<String>>, Failed> {
        match self.content.remove(key) {
            Some(toml::Value::Array(vec)) => {
                let mut res = Vec::new();
                for value in vec.into_iter() {
                    if let toml::Value::String(value) = value {
                        res.push(value)
                    }
                    else {
                        error!(
                            "Failed in config file {}: \
                            '{}' expected to be a array of strings.",
                            self.path.display(),
                            key
                        );
                        return Err(Failed);
                    }
                }
                Ok(Some(res))
            }
            Some(_) => {
                error!(
                    "Failed in config file {}: \
                     '{}' expected to be a array of strings.",
                    self.path.display(), key
                );
                Err(Failed)
            }
            None => Ok(None)
        }
    }

    /// Checks whether the config file is now empty.
    ///
    /// If it isn’t, logs a complaint and returns an error.
    fn check_exhausted(&self) -> Result<(), Failed> {
        if !self.content.is_empty() {
            error!(
                "Failed in config file {}: Unknown settings {}.",
                self.path.display(),
                self.content.keys().map(String::as_str)
                    .collect::<Vec<_>>().join(",")
            );
            Err(Failed)
        }
        else {
            Ok(())
        }
    }
}


//------------ Helpers -------------------------------------------------------

/// Converts a count where zero means no limit.
fn non_zero(value: usize) -> Option<usize> {
    if value == 0 {
        None
    }
    else {
        Some(value)
    }
}

/// Converts seconds where zero means no timeout.
fn non_zero_secs(value: u64) -> Option<Duration> {
    if value == 0 {
        None
    }
    else {
        Some(Duration::from_secs(value))
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    fn process_basic_args(args: &[&str]) -> Config {
        let mut config = Config::default();
        config.apply_arg_matches(
            &Config::config_args(Command::new("chainfix"))
                .get_matches_from(args),
            Path::new("/test")
        ).unwrap();
        config
    }

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.roots, None);
        assert_eq!(config.fix_threads, 100);
        assert_eq!(config.queue_size, None);
        assert_eq!(config.max_fetches, DEFAULT_MAX_FETCHES);
        assert_eq!(config.report_interval, Duration::from_secs(1));
        assert_eq!(config.failure_ttl, Duration::ZERO);
        assert_eq!(config.fetch_timeout, Some(DEFAULT_FETCH_TIMEOUT));
        assert!(config.user_agent.starts_with("chainfix/"));
        assert!(config.proxies.is_empty());
        assert_eq!(config.log_level, LevelFilter::Warn);
        assert_eq!(config.log_target, LogTarget::Stderr);
    }

    #[test]
    #[cfg(unix)] // ... because of drive letters in absolute paths on Windows.
    fn good_config_file() {
        let config = ConfigFile::parse(
            "roots = \"roots.pem\"\n\
             fix-threads = 12\n\
             queue-size = 500\n\
             max-fetches = 3\n\
             report-interval = 10\n\
             failure-ttl = 60\n\
             fetch-timeout = 0\n\
             connect-timeout = 5\n\
             max-fetch-size = 4096\n\
             user-agent = \"test/1.0\"\n\
             proxies = [\"socks5://127.0.0.1:1080\"]\n\
             log-level = \"info\"\n\
             log = \"file\"\n\
             log-file = \"/var/log/chainfix.log\"",
            Path::new("/test/chainfix.conf")
        ).unwrap();
        let config = Config::from_config_file(config).unwrap();
        assert_eq!(config.roots, Some(PathBuf::from("/test/roots.pem")));
        assert_eq!(config.fix_threads, 12);
        assert_eq!(config.queue_size, Some(500));
        assert_eq!(config.max_fetches, 3);
        assert_eq!(config.report_interval, Duration::from_secs(10));
        assert_eq!(config.failure_ttl, Duration::from_secs(60));
        assert_eq!(config.fetch_timeout, None);
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.max_fetch_size, 4096);
        assert_eq!(config.user_agent, "test/1.0");
        assert_eq!(config.proxies, vec!["socks5://127.0.0.1:1080"]);
        assert_eq!(config.log_level, LevelFilter::Info);
        assert_eq!(
            config.log_target,
            LogTarget::File(PathBuf::from("/var/log/chainfix.log"))
        );
    }

    #[test]
    fn minimal_config_file() {
        let config = ConfigFile::parse(
            "", Path::new("/test/chainfix.conf")
        ).unwrap();
        let config = Config::from_config_file(config).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn bad_config_file() {
        fn check(content: &str) {
            let config = ConfigFile::parse(
                content, Path::new("/test/chainfix.conf")
            ).unwrap();
            assert!(Config::from_config_file(config).is_err(), "{}", content);
        }

        check("fix-threads = 0");
        check("fix-threads = -4");
        check("max-fetches = \"many\"");
        check("proxies = \"socks5://127.0.0.1:1080\"");
        check("proxies = [1, 2]");
        check("log = \"file\"");
        check("log = \"syslog\"");
        check("log-level = \"chatty\"");
        check("validation-threads = 4");
        assert!(
            ConfigFile::parse("[1, 2", Path::new("/test/chainfix.conf"))
                .is_err()
        );
    }

    #[test]
    fn read_your_own_config() {
        let mut out_config = Config::default();
        out_config.roots = Some(PathBuf::from("/etc/ssl/roots.pem"));
        out_config.queue_size = Some(20);
        out_config.proxies = vec!["http://proxy.example:3128".into()];
        out_config.log_target = LogTarget::File("/tmp/chainfix.log".into());
        let out_file = format!("{}", out_config.to_toml());
        let in_file = ConfigFile::parse(
            &out_file, Path::new("/test/chainfix.conf")
        ).unwrap();
        let in_config = Config::from_config_file(in_file).unwrap();
        assert_eq!(out_config, in_config);
    }

    #[test]
    fn config_file_from_args() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chainfix.conf");
        fs::File::create(&path).unwrap().write_all(
            b"roots = \"roots.pem\"\nmax-fetches = 2\n"
        ).unwrap();
        let matches = Config::config_args(Command::new("chainfix"))
            .get_matches_from([
                "chainfix", "-c", path.to_str().unwrap(), "--max-fetches", "5"
            ]);
        let config = Config::from_arg_matches(
            &matches, Path::new("/test")
        ).unwrap();
        assert_eq!(config.roots, Some(dir.path().join("roots.pem")));
        assert_eq!(config.max_fetches, 5);

        let matches = Config::config_args(Command::new("chainfix"))
            .get_matches_from([
                "chainfix", "-c",
                dir.path().join("missing.conf").to_str().unwrap()
            ]);
        assert!(Config::from_arg_matches(&matches, Path::new("/")).is_err());
    }

    #[test]
    #[cfg(unix)]
    fn basic_args() {
        let config = process_basic_args(&[
            "chainfix", "-r", "roots.pem", "--fix-threads", "7",
            "--queue-size", "0", "--max-fetches", "4",
            "--report-interval", "0", "--failure-ttl", "30",
            "--fetch-timeout", "0", "--connect-timeout", "3",
            "--max-fetch-size", "2048", "--user-agent", "agent/2",
            "--proxy", "http://a.example", "--proxy", "http://b.example",
            "--logfile", "fix.log",
        ]);
        assert_eq!(config.roots, Some(PathBuf::from("/test/roots.pem")));
        assert_eq!(config.fix_threads, 7);
        assert_eq!(config.queue_size, None);
        assert_eq!(config.max_fetches, 4);
        assert_eq!(config.report_interval, Duration::ZERO);
        assert_eq!(config.failure_ttl, Duration::from_secs(30));
        assert_eq!(config.fetch_timeout, None);
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.max_fetch_size, 2048);
        assert_eq!(config.user_agent, "agent/2");
        assert_eq!(
            config.proxies, vec!["http://a.example", "http://b.example"]
        );
        assert_eq!(
            config.log_target, LogTarget::File(PathBuf::from("/test/fix.log"))
        );

        let config = process_basic_args(&["chainfix", "--logfile", "-"]);
        assert_eq!(config.log_target, LogTarget::Stderr);
    }

    #[test]
    fn zero_fix_threads_rejected() {
        let mut config = Config::default();
        assert!(config.apply_arg_matches(
            &Config::config_args(Command::new("chainfix"))
                .get_matches_from(["chainfix", "--fix-threads", "0"]),
            Path::new("/test")
        ).is_err());
    }

    #[test]
    fn verbosity() {
        let config = process_basic_args(&["chainfix"]);
        assert_eq!(config.log_level, LevelFilter::Warn);
        let config = process_basic_args(&["chainfix", "-v"]);
        assert_eq!(config.log_level, LevelFilter::Info);
        let config = process_basic_args(&["chainfix", "-vv"]);
        assert_eq!(config.log_level, LevelFilter::Debug);
        let config = process_basic_args(&["chainfix", "-q"]);
        assert_eq!(config.log_level, LevelFilter::Error);
        let config = process_basic_args(&["chainfix", "-qq"]);
        assert_eq!(config.log_level, LevelFilter::Off);
    }

    #[test]
    fn check_args() {
        crate::operation::Operation::config_args(
            GlobalArgs::augment_args(Command::new("test"))
        ).debug_assert();
    }
}
