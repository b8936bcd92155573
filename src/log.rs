//! Logging.
//!
//! All diagnostic output is done via the `log` crate. The global logger is
//! a rerouting logger so that we can start logging to stderr right away
//! and switch to whatever the configuration asks for once it is known.

use std::io;
use log::{LevelFilter, Metadata, error};
use crate::config::{Config, LogTarget};
use crate::error::Failed;


//------------ Logger --------------------------------------------------------

/// Sets up and switches logging.
pub struct Logger;

impl Logger {
    /// Initialize logging.
    ///
    /// All diagnostic output is done via logging, never to stderr directly.
    /// Thus, it is important to initialize logging before doing anything
    /// else that may result in such output. This function does exactly
    /// that. It sets a maximum log level of `warn`, leading only printing
    /// important information, and directs all logging to stderr.
    pub fn init() -> Result<(), Failed> {
        if let Err(err) = log_reroute::init() {
            eprintln!("Failed to initialize logger: {}.\nAborting.", err);
            return Err(Failed)
        }
        let (level, logger) = Self::stderr_dispatch(
            LevelFilter::Warn
        ).into_log();
        log_reroute::reroute_boxed(logger);
        log::set_max_level(level);
        Ok(())
    }

    /// Switches logging to the configured target.
    ///
    /// Once the configuration has been successfully loaded, logging should
    /// be switched to whatever the user asked for via this method.
    pub fn switch_logging(config: &Config) -> Result<(), Failed> {
        let dispatch = match config.log_target {
            LogTarget::Stderr => Self::stderr_dispatch(config.log_level),
            LogTarget::File(ref path) => {
                let file = match fern::log_file(path) {
                    Ok(file) => file,
                    Err(err) => {
                        error!(
                            "Failed to open log file '{}': {}",
                            path.display(), err
                        );
                        return Err(Failed)
                    }
                };
                Self::base_dispatch(config.log_level, true).chain(file)
            }
        };
        let (level, logger) = dispatch.into_log();
        log_reroute::reroute_boxed(logger);
        log::set_max_level(level);
        Ok(())
    }

    /// Creates a dispatch writing to stderr.
    fn stderr_dispatch(level: LevelFilter) -> fern::Dispatch {
        Self::base_dispatch(level, false).chain(io::stderr())
    }

    /// Creates the dispatch with formatting and filtering but no output.
    fn base_dispatch(level: LevelFilter, timestamp: bool) -> fern::Dispatch {
        let res = fern::Dispatch::new()
            .level(level)
            .filter(move |metadata| !should_ignore(metadata, level));
        if timestamp {
            res.format(|out, message, record| {
                out.finish(format_args!(
                    "[{}] [{}] {}",
                    chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                    record.level(),
                    message
                ))
            })
        }
        else {
            res.format(|out, message, record| {
                out.finish(format_args!("[{}] {}", record.level(), message))
            })
        }
    }
}


//------------ Helpers -------------------------------------------------------

/// Determines whether a log record should be ignored.
///
/// This filters out messages by libraries that we don’t really want to
/// see.
fn should_ignore(metadata: &Metadata, log_level: LevelFilter) -> bool {
    let module = metadata.target();

    // log::Level sorts more important first.

    if metadata.level() > log::Level::Error {
        // From rustls, only log errors.
        if module.starts_with("rustls") {
            return true
        }
    }
    if log_level >= LevelFilter::Trace {
        // Don’t filter anything else if we are in trace.
        return false
    }

    // Ignore these modules unless they are errors.
    metadata.level() > log::Level::Error && (
           module.starts_with("hyper")
        || module.starts_with("reqwest")
        || module.starts_with("h2")
    )
}


//============ Tests =========================================================
