//! Output of fixed chains and errors.

use std::{fmt, io};
use std::str::FromStr;
use serde::Serialize;
use crate::cert::Cert;
use crate::fix::FixError;


//------------ OutputFormat --------------------------------------------------

/// The output format for fixed chains.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutputFormat {
    /// PEM format.
    ///
    /// Each chain is a sequence of PEM encoded certificates starting with
    /// the leaf and ending with the root. Chains are separated by an empty
    /// line. Errors are not part of the output.
    Pem,

    /// JSON lines.
    ///
    /// Each chain and each error is a JSON object on a line of its own.
    /// Objects have a `"type"` of either `"chain"` or `"error"`.
    /// Certificates are given as base64 encoded DER and the leaf is
    /// identified by the hex encoded SHA-256 fingerprint.
    Json,
}

impl OutputFormat {
    /// The value to pass to clap as a default value.
    pub const DEFAULT_VALUE: &'static str = "pem";

    /// Outputs a fixed chain to `target` in this format.
    pub fn output_chain<W: io::Write>(
        self,
        chain: &[Cert],
        target: &mut W,
    ) -> Result<(), io::Error> {
        ignore_broken_pipe(match self {
            OutputFormat::Pem => pem_chain(chain, target),
            OutputFormat::Json => json_chain(chain, target),
        })
    }

    /// Outputs an error to `target` in this format.
    ///
    /// Formats that don’t have errors silently skip them.
    pub fn output_error<W: io::Write>(
        self,
        err: &FixError,
        target: &mut W,
    ) -> Result<(), io::Error> {
        ignore_broken_pipe(match self {
            OutputFormat::Pem => Ok(()),
            OutputFormat::Json => json_error(err, target),
        })
    }
}


//--- FromStr

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pem" => Ok(OutputFormat::Pem),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("unknown output format: {}", value))
        }
    }
}


//--- Display

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            OutputFormat::Pem => "pem",
            OutputFormat::Json => "json",
        })
    }
}


//------------ pem -----------------------------------------------------------

fn pem_chain<W: io::Write>(
    chain: &[Cert], target: &mut W
) -> Result<(), io::Error> {
    for cert in chain {
        target.write_all(cert.to_pem().as_bytes())?;
    }
    writeln!(target)
}


//------------ json ----------------------------------------------------------

/// A single line of JSON output.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Record<'a> {
    Chain {
        leaf: String,
        chain: Vec<String>,
    },
    Error {
        kind: &'static str,
        leaf: String,
        url: Option<&'a str>,
        error: &'a str,
        chain: Vec<String>,
    },
}

fn json_chain<W: io::Write>(
    chain: &[Cert], target: &mut W
) -> Result<(), io::Error> {
    let leaf = match chain.first() {
        Some(leaf) => leaf.fingerprint().to_string(),
        None => return Ok(())
    };
    json_record(&Record::Chain { leaf, chain: encode_certs(chain) }, target)
}

fn json_error<W: io::Write>(
    err: &FixError, target: &mut W
) -> Result<(), io::Error> {
    json_record(
        &Record::Error {
            kind: err.kind.as_str(),
            leaf: err.leaf.fingerprint().to_string(),
            url: err.url.as_deref(),
            error: &err.error,
            chain: encode_certs(&err.chain),
        },
        target
    )
}

fn json_record<W: io::Write>(
    record: &Record, target: &mut W
) -> Result<(), io::Error> {
    serde_json::to_writer(&mut *target, record)?;
    writeln!(target)
}

fn encode_certs(certs: &[Cert]) -> Vec<String> {
    certs.iter().map(|cert| base64::encode(cert.der())).collect()
}


//------------ Helpers -------------------------------------------------------

/// Treats a broken pipe as success.
///
/// This happens when output is piped into something like `head`.
fn ignore_broken_pipe(res: Result<(), io::Error>) -> Result<(), io::Error> {
    match res {
        Err(ref err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        res => res
    }
}


//============ Tests =========================================================
