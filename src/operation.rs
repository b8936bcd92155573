//! What chainfix can do for you.
//!
//! This module implements all the commands users can ask chainfix to
//! perform. They are encapsulated in the type [`Operation`] which can
//! determine the command from the command line argumments and then execute
//! it.

use std::{fs, io, thread};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{mpsc, Arc};
use bytes::Bytes;
use clap::{Args, ArgMatches, FromArgMatches, Parser};
use log::{error, info, warn};
use crate::cache::UrlCache;
use crate::cert::{Cert, CertPool, DedupedChain};
use crate::config::Config;
use crate::error::{ExitError, Failed};
use crate::fetch::HttpClient;
use crate::fix::FixError;
use crate::fixer::Fixer;
use crate::ledger::Ledger;
use crate::log::Logger;
use crate::output::OutputFormat;
use crate::verify::ChainVerifier;


//------------ Operation -----------------------------------------------------

/// The command to execute.
///
/// This type collects all the commands we have defined plus any possible
/// extra configuration they support.
///
/// You can create a value from the command line arguments. First, you add
/// all necessary sub-commands and arguments to a clap `Command` via
/// [`config_args`][Self::config_args] and then process the argument
/// matches into a value in [`from_arg_matches`][Self::from_arg_matches].
/// Finally, you can execute the created command through the
/// [`run`][Self::run] method.
pub enum Operation {
    Fix(Fix),
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
        let app = Fix::config_args(app);
        PrintConfig::config_args(app)
    }

    /// Creates a command from clap matches.
    pub fn from_arg_matches(
        matches: &ArgMatches,
        cur_dir: &Path,
    ) -> Result<Self, Failed> {
        Ok(match matches.subcommand() {
            Some(("fix", matches)) => {
                Operation::Fix(Fix::from_arg_matches(matches, cur_dir)?)
            }
            Some(("config", _)) => {
                Operation::PrintConfig(PrintConfig)
            }
            _ => {
                error!(
                    "Failed: a command is required.\n\
                     \nCommonly used commands are:\
                     \n   fix     Completes certificate chains\
                     \n   config  Prints the current configuration\
                     \n\
                     \nSee chainfix -h for a usage summary."
                );
                return Err(Failed)
            }
        })
    }

    /// Runs the command.
    ///
    /// Logging is switched to the configured target first.
    pub fn run(self, config: Config) -> Result<(), ExitError> {
        Logger::switch_logging(&config)?;
        match self {
            Operation::Fix(cmd) => cmd.run(&config),
            Operation::PrintConfig(cmd) => cmd.run(&config),
        }
    }
}


//------------ Fix -----------------------------------------------------------

/// Fix the chains in a set of files.
pub struct Fix {
    /// The files with the chains.
    ///
    /// Each file is a PEM bundle. The first certificate is the leaf, all
    /// others are the candidate chain.
    files: Vec<PathBuf>,

    /// The desired output format.
    format: OutputFormat,

    /// The destination of the output.
    ///
    /// If this is `None`, output goes to stdout.
    output: Option<PathBuf>,
}

/// The command line arguments for the fix sub-command.
#[derive(Clone, Debug, Parser)]
struct FixArgs {
    /// The format of the output
    #[arg(
        short = 'o', long = "output", value_name = "FORMAT",
        default_value = OutputFormat::DEFAULT_VALUE,
    )]
    format: String,

    /// The destination of the output
    #[arg(long, value_name = "PATH", default_value = "-")]
    output_file: PathBuf,

    /// PEM files with a leaf certificate and its candidate chain
    #[arg(value_name = "FILE", required = true)]
    files: Vec<PathBuf>,
}

impl Fix {
    /// Adds the command configuration to a clap app.
    pub fn config_args(app: clap::Command) -> clap::Command {
        app.subcommand(
            FixArgs::augment_args(
                clap::Command::new("fix")
                    .about("Completes certificate chains")
            )
        )
    }

    /// Creates a command from clap matches.
    pub fn from_arg_matches(
        matches: &ArgMatches,
        cur_dir: &Path,
    ) -> Result<Self, Failed> {
        let args = FixArgs::from_arg_matches(
            matches
        ).expect("bug in command line arguments parser");

        let format = match OutputFormat::from_str(&args.format) {
            Ok(format) => format,
            Err(_) => {
                error!("Unknown output format '{}'", args.format);
                return Err(Failed)
            }
        };

        let output = if args.output_file == Path::new("-") {
            None
        }
        else {
            Some(cur_dir.join(args.output_file))
        };

        Ok(Fix {
            files: args.files.into_iter().map(|path| {
                cur_dir.join(path)
            }).collect(),
            format,
            output,
        })
    }

    /// Fixes all chains.
    ///
    /// Returns [`ExitError::Unfixed`] if at least one chain couldn’t be
    /// fixed.
    fn run(self, config: &Config) -> Result<(), ExitError> {
        let roots = Arc::new(load_roots(config)?);
        let mut submissions = Vec::with_capacity(self.files.len());
        for path in &self.files {
            submissions.push(load_submission(path)?);
        }
        let target = self.open_target()?;

        let client = HttpClient::new(config)?;
        let cache = Arc::new(
            UrlCache::new(Arc::new(client), config.failure_ttl)
        );
        let (chains_tx, chains_rx) = mpsc::channel();
        let (errors_tx, errors_rx) = mpsc::channel();
        let fixer = Fixer::new(
            config, cache, Arc::new(Ledger::new()),
            Arc::new(ChainVerifier::new()), chains_tx, errors_tx,
        )?;

        let format = self.format;
        let (metrics, written) = thread::scope(|scope| {
            let writer = scope.spawn(move || {
                write_output(format, target, chains_rx, errors_rx)
            });
            for (leaf, chain) in submissions {
                if fixer.queue_chain(leaf, chain, &roots).is_err() {
                    // We never close the fixer before we are done.
                    break
                }
            }
            let metrics = fixer.wait();
            let written = match writer.join() {
                Ok(res) => res,
                Err(_) => {
                    error!("Output thread has panicked.");
                    Err(Failed)
                }
            };
            (metrics, written)
        });
        let metrics = metrics?;
        written?;

        info!(
            "Fixed {} chains, failed to fix {}, skipped {}.",
            metrics.fixed, metrics.not_fixed, metrics.skipped
        );
        if metrics.not_fixed > 0 {
            Err(ExitError::Unfixed)
        }
        else {
            Ok(())
        }
    }

    /// Opens the output target.
    fn open_target(&self) -> Result<Box<dyn io::Write + Send>, Failed> {
        match self.output {
            Some(ref path) => {
                match fs::File::create(path) {
                    Ok(file) => Ok(Box::new(io::BufWriter::new(file))),
                    Err(err) => {
                        error!(
                            "Failed to open output file '{}': {}",
                            path.display(), err
                        );
                        Err(Failed)
                    }
                }
            }
            None => Ok(Box::new(io::BufWriter::new(io::stdout())))
        }
    }
}

/// Loads the root certificates configured in `config`.
fn load_roots(config: &Config) -> Result<CertPool, Failed> {
    let path = match config.roots.as_ref() {
        Some(path) => path,
        None => {
            error!(
                "No root certificates configured. \
                 Please provide them via the -r option."
            );
            return Err(Failed)
        }
    };
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) => {
            error!(
                "Failed to read root certificates from {}: {}",
                path.display(), err
            );
            return Err(Failed)
        }
    };
    match CertPool::from_pem(&data) {
        Ok(pool) if !pool.is_empty() => {
            info!(
                "Loaded {} root certificates from {}.",
                pool.len(), path.display()
            );
            Ok(pool)
        }
        Ok(_) => {
            error!("No root certificates found in {}.", path.display());
            Err(Failed)
        }
        Err(err) => {
            error!(
                "Failed to load root certificates from {}: {}",
                path.display(), err
            );
            Err(Failed)
        }
    }
}

/// Loads a leaf certificate and its candidate chain from a file.
fn load_submission(path: &Path) -> Result<(Cert, DedupedChain), Failed> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) => {
            error!("Failed to read {}: {}", path.display(), err);
            return Err(Failed)
        }
    };
    let mut certs = match Cert::decode_bundle(Bytes::from(data)) {
        Ok(certs) => certs.into_iter(),
        Err(err) => {
            error!("Failed to load {}: {}", path.display(), err);
            return Err(Failed)
        }
    };
    match certs.next() {
        Some(leaf) => Ok((leaf, certs.collect())),
        None => {
            error!("No certificates in {}.", path.display());
            Err(Failed)
        }
    }
}

/// Writes everything arriving on the channels until they are closed.
fn write_output(
    format: OutputFormat,
    mut target: Box<dyn io::Write + Send>,
    chains: mpsc::Receiver<Vec<Cert>>,
    errors: mpsc::Receiver<FixError>,
) -> Result<(), Failed> {
    let res = (|| {
        for chain in chains {
            format.output_chain(&chain, &mut target)?;
        }
        for err in errors {
            warn!("{}", err);
            format.output_error(&err, &mut target)?;
        }
        target.flush()
    })();
    res.map_err(|err| {
        error!("Failed to write output: {}", err);
        Failed
    })
}


//------------ PrintConfig ---------------------------------------------------

/// Shows the current configuration.
pub struct PrintConfig;

impl PrintConfig {
    /// Adds the command configuration to a clap app.
    pub fn config_args(app: clap::Command) -> clap::Command {
        app.subcommand(
            clap::Command::new("config")
                .about("Prints the current config and exits")
        )
    }

    /// Prints the current configuration to stdout and exits.
    fn run(self, config: &Config) -> Result<(), ExitError> {
        println!("{}", config);
        Ok(())
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;
    use crate::test::TestPki;

    fn matches(args: &[&str]) -> ArgMatches {
        Operation::config_args(
            Config::config_args(clap::Command::new("chainfix"))
        ).get_matches_from(args)
    }

    #[test]
    fn fix_args() {
        let op = Operation::from_arg_matches(
            &matches(&[
                "chainfix", "fix", "--output", "json",
                "--output-file", "out.json", "a.pem", "/b.pem"
            ]),
            Path::new("/test")
        ).unwrap();
        let fix = match op {
            Operation::Fix(fix) => fix,
            _ => panic!("expected fix command"),
        };
        assert_eq!(fix.format, OutputFormat::Json);
        assert_eq!(fix.output, Some(PathBuf::from("/test/out.json")));
        assert_eq!(
            fix.files,
            vec![PathBuf::from("/test/a.pem"), PathBuf::from("/b.pem")]
        );

        let op = Operation::from_arg_matches(
            &matches(&["chainfix", "fix", "a.pem"]), Path::new("/test")
        ).unwrap();
        match op {
            Operation::Fix(fix) => {
                assert_eq!(fix.format, OutputFormat::Pem);
                assert_eq!(fix.output, None);
            }
            _ => panic!("expected fix command"),
        }
    }

    #[test]
    fn bad_args() {
        assert!(Operation::from_arg_matches(
            &matches(&["chainfix", "fix", "-o", "csv", "a.pem"]),
            Path::new("/test")
        ).is_err());
        assert!(Operation::from_arg_matches(
            &matches(&["chainfix"]), Path::new("/test")
        ).is_err());
        assert!(matches!(
            Operation::from_arg_matches(
                &matches(&["chainfix", "config"]), Path::new("/test")
            ),
            Ok(Operation::PrintConfig(_))
        ));
    }

    #[test]
    fn submissions_from_files() {
        let pki = TestPki::new();
        let root = pki.root("Root");
        let inter = pki.intermediate("Inter", &root, &[]);
        let leaf = pki.leaf("leaf", &inter, &[]);
        let dir = tempfile::tempdir().unwrap();

        let path = dir.path().join("chain.pem");
        fs::write(
            &path,
            format!(
                "{}{}{}", leaf.cert().to_pem(), inter.cert().to_pem(),
                inter.cert().to_pem()
            )
        ).unwrap();
        let (loaded_leaf, chain) = load_submission(&path).unwrap();
        assert_eq!(loaded_leaf, leaf.cert());
        assert_eq!(chain.as_slice(), &[inter.cert()]);

        let path = dir.path().join("empty.pem");
        fs::write(&path, "").unwrap();
        assert!(load_submission(&path).is_err());
        assert!(load_submission(&dir.path().join("missing.pem")).is_err());
    }

    #[test]
    fn fix_files() {
        let pki = TestPki::new();
        let root = pki.root("Root");
        let inter = pki.intermediate("Inter", &root, &[]);
        let leaf = pki.leaf("leaf", &inter, &[]);
        let stray = pki.leaf("stray", &pki.root("Stray"), &[]);
        let dir = tempfile::tempdir().unwrap();

        let roots = dir.path().join("roots.pem");
        fs::write(&roots, root.cert().to_pem()).unwrap();
        let good = dir.path().join("good.pem");
        fs::write(
            &good, format!("{}{}", leaf.cert().to_pem(), inter.cert().to_pem())
        ).unwrap();
        let bad = dir.path().join("bad.pem");
        fs::write(&bad, stray.cert().to_pem()).unwrap();
        let out = dir.path().join("out.json");

        let mut config = Config::default();
        config.roots = Some(roots);
        config.fix_threads = 2;
        config.report_interval = Duration::ZERO;

        let fix = Fix {
            files: vec![good.clone()],
            format: OutputFormat::Json,
            output: Some(out.clone()),
        };
        assert!(fix.run(&config).is_ok());
        let content = fs::read_to_string(&out).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("\"type\":\"chain\""));

        let fix = Fix {
            files: vec![good, bad],
            format: OutputFormat::Json,
            output: Some(out.clone()),
        };
        assert_eq!(fix.run(&config), Err(ExitError::Unfixed));
        let content = fs::read_to_string(&out).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("\"kind\":\"unreconstructible\""));
    }

    #[test]
    fn roots_are_required() {
        let config = Config::default();
        assert!(load_roots(&config).is_err());
    }
}
