//! Verification of certificate chains.
//!
//! The fixer treats verification as a capability described by the
//! [`Verify`] trait: given a leaf and a set of [`VerifyOptions`], return all
//! chains from the leaf to one of the roots or an error. The
//! [`ChainVerifier`] implements this on top of x509-parser.
//!
//! Path building is deliberately simple. Issuers are matched by the raw
//! encoding of their subject name, signatures are checked, and a
//! certificate explicitly marked as not being a CA is never used as an
//! issuer. Every path found is returned, so cross-signed intermediates
//! lead to several chains.

use std::fmt;
use std::collections::HashMap;
use std::sync::Arc;
use x509_parser::prelude::X509Certificate;
use crate::cert::{Cert, CertPool, DedupedChain, Fingerprint};


/// The maximum number of certificates in a chain including leaf and root.
const MAX_CHAIN_DEPTH: usize = 16;

/// The maximum number of chains returned for a single leaf.
///
/// Heavily cross-signed hierarchies can otherwise lead to a combinatorial
/// explosion of paths.
const MAX_CHAINS: usize = 32;

/// The maximum number of issuer candidates considered for a single leaf.
///
/// Many certificates sharing a name and key form a graph with a huge
/// number of paths none of which may lead to a root.
const MAX_ISSUER_CHECKS: usize = 1000;


//------------ Verify --------------------------------------------------------

/// A type that can verify a certificate against a set of options.
pub trait Verify: Send + Sync {
    /// Verifies `leaf`.
    ///
    /// Upon success, returns all chains found, each starting with the leaf
    /// and ending with a certificate from `opts.roots`. The returned list
    /// is never empty.
    fn verify(
        &self, leaf: &Cert, opts: &VerifyOptions
    ) -> Result<Vec<Vec<Cert>>, VerifyError>;
}

impl<T: Verify + ?Sized> Verify for Arc<T> {
    fn verify(
        &self, leaf: &Cert, opts: &VerifyOptions
    ) -> Result<Vec<Vec<Cert>>, VerifyError> {
        self.as_ref().verify(leaf, opts)
    }
}


//------------ KeyUsage ------------------------------------------------------

/// The extended key usage a leaf needs to have.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyUsage {
    /// Any usage is fine.
    Any,

    /// The leaf must be usable for TLS servers.
    ServerAuth,
}


//------------ VerifyOptions -------------------------------------------------

/// The options for verifying a certificate.
#[derive(Clone, Debug)]
pub struct VerifyOptions {
    /// The trust anchors.
    pub roots: Arc<CertPool>,

    /// The certificates available for building chains.
    pub intermediates: CertPool,

    /// Don’t check the validity period of certificates.
    pub disable_time_checks: bool,

    /// The required extended key usage of the leaf.
    pub key_usage: KeyUsage,
}

impl VerifyOptions {
    /// Creates the options used for fixing a chain.
    ///
    /// The chain’s certificates become the intermediates. Since we are
    /// dealing with whatever has been logged at some point, validity times
    /// are ignored and any key usage is accepted.
    pub fn for_fixing(chain: &DedupedChain, roots: Arc<CertPool>) -> Self {
        VerifyOptions {
            roots,
            intermediates: chain.into(),
            disable_time_checks: true,
            key_usage: KeyUsage::Any,
        }
    }
}


//------------ ChainVerifier -------------------------------------------------

/// A verifier based on x509-parser.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChainVerifier;

impl ChainVerifier {
    pub fn new() -> Self {
        ChainVerifier
    }
}

impl Verify for ChainVerifier {
    fn verify(
        &self, leaf: &Cert, opts: &VerifyOptions
    ) -> Result<Vec<Vec<Cert>>, VerifyError> {
        leaf.with_parsed(|parsed| {
            if !opts.disable_time_checks && !parsed.validity().is_valid() {
                return Err(VerifyError::Expired)
            }
            if opts.key_usage == KeyUsage::ServerAuth {
                check_server_auth(parsed)?;
            }
            Ok(())
        })?;

        if opts.roots.contains(leaf) {
            return Ok(vec![vec![leaf.clone()]])
        }

        let mut builder = PathBuilder::new(opts);
        builder.extend(&mut vec![leaf.clone()]);
        if !builder.res.is_empty() {
            Ok(builder.res)
        }
        else if builder.exhausted() {
            Err(VerifyError::TooComplex)
        }
        else {
            Err(VerifyError::UnknownAuthority)
        }
    }
}


//------------ PathBuilder ---------------------------------------------------

/// The state of a depth-first search for chains.
struct PathBuilder<'a> {
    opts: &'a VerifyOptions,

    /// Results of signature checks keyed by (subject, issuer).
    signatures: HashMap<(Fingerprint, Fingerprint), bool>,

    /// The number of issuer checks we may still perform.
    budget: usize,

    /// The chains found so far.
    res: Vec<Vec<Cert>>,
}

impl<'a> PathBuilder<'a> {
    fn new(opts: &'a VerifyOptions) -> Self {
        PathBuilder {
            opts,
            signatures: HashMap::new(),
            budget: MAX_ISSUER_CHECKS,
            res: Vec::new(),
        }
    }

    fn exhausted(&self) -> bool {
        self.budget == 0
    }

    /// Extends `path` by all possible issuers of its last certificate.
    fn extend(&mut self, path: &mut Vec<Cert>) {
        let opts = self.opts;
        let current = match path.last() {
            Some(cert) => cert.clone(),
            None => return,
        };

        for root in self.issuers_in(&current, &opts.roots, path, false) {
            if self.res.len() >= MAX_CHAINS {
                return
            }
            let mut chain = path.clone();
            chain.push(root.clone());
            self.res.push(chain);
        }

        if path.len() + 1 >= MAX_CHAIN_DEPTH {
            return
        }
        // A root sitting among the intermediates has been tried above.
        let inters = self.issuers_in(
            &current, &opts.intermediates, path, true
        );
        for inter in inters {
            if self.res.len() >= MAX_CHAINS || self.exhausted() {
                return
            }
            path.push(inter.clone());
            self.extend(path);
            path.pop();
        }
    }

    /// Returns the certificates in `pool` that have issued `cert`.
    ///
    /// Certificates already in `path` and, if `skip_roots` is set, those
    /// among the roots are ignored. Every candidate considered uses up
    /// one unit of the budget. Once it is gone, the list is cut short.
    fn issuers_in(
        &mut self,
        cert: &Cert,
        pool: &'a CertPool,
        path: &[Cert],
        skip_roots: bool,
    ) -> Vec<&'a Cert> {
        let opts = self.opts;
        cert.with_parsed(|parsed| {
            let mut res = Vec::new();
            for issuer in pool.candidate_issuers(cert) {
                if self.exhausted() {
                    break
                }
                self.budget -= 1;
                if path.contains(issuer)
                    || (skip_roots && opts.roots.contains(issuer))
                {
                    continue
                }
                if self.is_issuer(cert, parsed, issuer) {
                    res.push(issuer)
                }
            }
            res
        })
    }

    /// Checks whether `issuer` has issued `cert`.
    ///
    /// `parsed` is the parsed version of `cert`.
    fn is_issuer(
        &mut self, cert: &Cert, parsed: &X509Certificate, issuer: &Cert
    ) -> bool {
        if !issuer.may_issue() {
            return false
        }
        let key = (cert.fingerprint(), issuer.fingerprint());
        if let Some(res) = self.signatures.get(&key) {
            return *res
        }
        let check_time = !self.opts.disable_time_checks;
        let res = issuer.with_parsed(|parsed_issuer| {
            if check_time && !parsed_issuer.validity().is_valid() {
                return false
            }
            parsed.verify_signature(
                Some(parsed_issuer.public_key())
            ).is_ok()
        });
        self.signatures.insert(key, res);
        res
    }
}


//------------ Helpers -------------------------------------------------------

/// Checks that a certificate may be used as a TLS server certificate.
///
/// A certificate without the extended key usage extension is usable for
/// anything.
fn check_server_auth(cert: &X509Certificate) -> Result<(), VerifyError> {
    match cert.extended_key_usage() {
        Ok(Some(eku)) => {
            if eku.value.any || eku.value.server_auth {
                Ok(())
            }
            else {
                Err(VerifyError::IncompatibleUsage)
            }
        }
        Ok(None) => Ok(()),
        Err(err) => Err(VerifyError::Malformed(err.to_string())),
    }
}


//------------ VerifyError ---------------------------------------------------

/// Verification of a certificate failed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VerifyError {
    /// No chain to any of the roots could be built.
    UnknownAuthority,

    /// The leaf is outside its validity period.
    Expired,

    /// The leaf cannot be used for the requested purpose.
    IncompatibleUsage,

    /// Some part of the leaf could not be parsed.
    Malformed(String),

    /// Too many candidate issuers had to be considered.
    TooComplex,
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VerifyError::UnknownAuthority => {
                f.write_str("certificate signed by unknown authority")
            }
            VerifyError::Expired => {
                f.write_str("certificate is expired or not yet valid")
            }
            VerifyError::IncompatibleUsage => {
                f.write_str("certificate specifies an incompatible key usage")
            }
            VerifyError::Malformed(err) => {
                write!(f, "malformed certificate: {}", err)
            }
            VerifyError::TooComplex => {
                f.write_str("too many possible issuers to consider")
            }
        }
    }
}

impl std::error::Error for VerifyError { }


//============ Tests =========================================================
