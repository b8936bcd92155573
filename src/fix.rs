//! Fixing a single chain.
//!
//! This module contains the unit of work of the fixer, the [`FixTask`],
//! and the algorithm run for it. The algorithm goes like this:
//!
//! * If the chain has been seen before, it is skipped.
//! * The leaf is verified against the candidate chain and the roots. If
//!   that works, we are done.
//! * Otherwise, the next untried issuer URL is fetched. URLs are tried in
//!   the order they were discovered: first those of the leaf, then those
//!   of the candidate chain, then those of fetched certificates. If the
//!   fetch produced new certificates, they are added to the intermediates
//!   and we try verifying again.
//! * If we run out of URLs or have fetched too often, the chain is given
//!   up on and a [`FixError`] explains why.
//!
//! All the shared state a task needs is collected in a [`FixEnv`].

use std::fmt;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use bytes::Bytes;
use log::debug;
use crate::cache::UrlCache;
use crate::cert::{Cert, CertPool, DedupedChain, Fingerprint, ParseError};
use crate::fetch::FetchError;
use crate::ledger::{ChainIdentity, Ledger};
use crate::metrics::FixerMetrics;
use crate::verify::{Verify, VerifyError, VerifyOptions};


//------------ FixEnv --------------------------------------------------------

/// Everything shared between tasks.
pub struct FixEnv {
    /// The cache for fetching issuer certificates.
    pub cache: Arc<UrlCache>,

    /// The ledger of chains already processed.
    pub ledger: Arc<Ledger>,

    /// The verifier to use.
    pub verifier: Arc<dyn Verify>,

    /// The counters to update.
    pub metrics: Arc<FixerMetrics>,

    /// The maximum number of issuer fetches for a single task.
    pub max_fetches: usize,
}


//------------ FixTask -------------------------------------------------------

/// A leaf certificate with its candidate chain waiting to be fixed.
#[derive(Clone, Debug)]
pub struct FixTask {
    leaf: Cert,
    chain: DedupedChain,
    opts: VerifyOptions,
}

impl FixTask {
    /// Creates a new task with the options for fixing.
    pub fn new(leaf: Cert, chain: DedupedChain, roots: Arc<CertPool>) -> Self {
        let opts = VerifyOptions::for_fixing(&chain, roots);
        Self::with_options(leaf, chain, opts)
    }

    /// Creates a new task with explicit verification options.
    pub fn with_options(
        leaf: Cert, chain: DedupedChain, opts: VerifyOptions
    ) -> Self {
        FixTask { leaf, chain, opts }
    }

    pub fn leaf(&self) -> &Cert {
        &self.leaf
    }

    pub fn chain(&self) -> &DedupedChain {
        &self.chain
    }

    /// Runs the fix algorithm.
    pub fn handle(self, env: &FixEnv) -> Outcome {
        let identity = ChainIdentity::new(&self.leaf, &self.chain);
        if !env.ledger.claim_if_absent(identity) {
            debug!("Chain for {} already processed, skipping.", self.leaf);
            env.metrics.inc_skipped();
            return Outcome::Skipped
        }
        let res = Fixing::new(self, env).run();

        // A fetch may well work next time, so the chain may come again.
        if let Outcome::Failed(ref err) = res {
            if err.kind == FixErrorKind::FetchFailed {
                env.ledger.release(&identity);
            }
        }
        res
    }
}


//------------ Outcome -------------------------------------------------------

/// The result of handling a task.
#[derive(Debug)]
pub enum Outcome {
    /// The chain had been processed before.
    Skipped,

    /// The leaf verified via all the given chains.
    Fixed(Vec<Vec<Cert>>),

    /// We gave up.
    Failed(FixError),
}


//------------ Fixing --------------------------------------------------------

/// The state of fixing one chain.
struct Fixing<'a> {
    env: &'a FixEnv,

    leaf: Cert,

    /// The current options. Fetched certificates go into the intermediates.
    opts: VerifyOptions,

    /// Issuer URLs yet to be tried in order of discovery.
    urls: VecDeque<String>,

    /// All URLs ever queued so we never queue one twice.
    seen_urls: HashSet<String>,

    /// The number of fetches performed so far.
    fetches: usize,

    /// The first fetch that failed.
    fetch_failure: Option<(String, FetchError)>,

    /// The first fetched content that failed to decode.
    parse_failure: Option<(String, Bytes, ParseError)>,

    /// The error of the last verification attempt.
    verify_error: Option<VerifyError>,
}

impl<'a> Fixing<'a> {
    fn new(task: FixTask, env: &'a FixEnv) -> Self {
        let mut res = Fixing {
            env,
            leaf: task.leaf,
            opts: task.opts,
            urls: VecDeque::new(),
            seen_urls: HashSet::new(),
            fetches: 0,
            fetch_failure: None,
            parse_failure: None,
            verify_error: None,
        };
        let leaf = res.leaf.clone();
        res.queue_urls(&leaf);
        for cert in task.chain.iter() {
            res.queue_urls(cert);
        }
        res
    }

    fn run(mut self) -> Outcome {
        let mut changed = true;
        loop {
            if changed {
                if let Some(chains) = self.verify() {
                    self.env.metrics.inc_fixed();
                    return Outcome::Fixed(chains)
                }
            }
            if self.fetches >= self.env.max_fetches {
                debug!(
                    "Giving up on {} after {} fetches.",
                    self.leaf, self.fetches
                );
                break
            }
            let url = match self.urls.pop_front() {
                Some(url) => url,
                None => break,
            };
            self.fetches += 1;
            changed = self.fetch(&url);
        }
        self.env.metrics.inc_not_fixed();
        Outcome::Failed(self.into_error())
    }

    /// Adds the issuer URLs of a certificate to the end of the queue.
    fn queue_urls(&mut self, cert: &Cert) {
        for url in cert.issuer_urls() {
            if self.seen_urls.insert(url.clone()) {
                self.urls.push_back(url.clone())
            }
        }
    }

    /// Tries to verify the leaf with the current intermediates.
    fn verify(&mut self) -> Option<Vec<Vec<Cert>>> {
        match self.env.verifier.verify(&self.leaf, &self.opts) {
            Ok(chains) if !chains.is_empty() => {
                let mut seen = HashSet::new();
                Some(chains.into_iter().filter(|chain| {
                    seen.insert(
                        chain.iter().map(Cert::fingerprint)
                            .collect::<Vec<Fingerprint>>()
                    )
                }).collect())
            }
            Ok(_) => {
                self.verify_error = Some(VerifyError::UnknownAuthority);
                None
            }
            Err(err) => {
                self.verify_error = Some(err);
                None
            }
        }
    }

    /// Fetches a URL and adds whatever it contains to the intermediates.
    ///
    /// Returns whether any new certificates were added.
    fn fetch(&mut self, url: &str) -> bool {
        let fetched = match self.env.cache.get(url) {
            Ok(fetched) => fetched,
            Err(err) => {
                debug!("{}: cannot fetch issuer {}: {}", self.leaf, url, err);
                self.env.metrics.inc_not_reconstructed();
                if self.fetch_failure.is_none() {
                    self.fetch_failure = Some((url.into(), err));
                }
                return false
            }
        };
        if fetched.cached {
            self.env.metrics.inc_already_done();
        }
        let certs = match Cert::decode_bundle(fetched.data.clone()) {
            Ok(certs) => certs,
            Err(err) => {
                debug!("{}: bad issuer at {}: {}", self.leaf, url, err);
                self.env.metrics.inc_not_reconstructed();
                if self.parse_failure.is_none() {
                    self.parse_failure = Some(
                        (url.into(), fetched.data, err)
                    );
                }
                return false
            }
        };
        self.env.metrics.inc_reconstructed();

        let mut added = false;
        for cert in certs {
            if self.opts.intermediates.add(cert.clone()) {
                self.queue_urls(&cert);
                added = true;
            }
        }
        added
    }

    /// Converts the final state into the error to report.
    fn into_error(self) -> FixError {
        let chain = self.opts.intermediates.iter().cloned().collect();
        let err = if let Some((url, err)) = self.fetch_failure {
            FixError {
                kind: FixErrorKind::FetchFailed,
                leaf: self.leaf,
                chain,
                url: Some(url),
                bad: None,
                error: err.to_string(),
            }
        }
        else if let Some((url, data, err)) = self.parse_failure {
            FixError {
                kind: FixErrorKind::ParseFailed,
                leaf: self.leaf,
                chain,
                url: Some(url),
                bad: Some(data),
                error: err.to_string(),
            }
        }
        else {
            FixError {
                kind: FixErrorKind::Unreconstructible,
                leaf: self.leaf,
                chain,
                url: None,
                bad: None,
                error: match self.verify_error {
                    Some(err) => err.to_string(),
                    None => String::from("verification never attempted"),
                }
            }
        };
        debug!("{}", err);
        err
    }
}


//------------ FixErrorKind --------------------------------------------------

/// What went wrong when fixing a chain.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FixErrorKind {
    /// No chain could be built despite trying everything.
    Unreconstructible,

    /// An issuer certificate could not be fetched.
    FetchFailed,

    /// A fetched issuer certificate could not be decoded.
    ParseFailed,
}

impl FixErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FixErrorKind::Unreconstructible => "unreconstructible",
            FixErrorKind::FetchFailed => "fetch-failed",
            FixErrorKind::ParseFailed => "parse-failed",
        }
    }
}

impl fmt::Display for FixErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            FixErrorKind::Unreconstructible => "unreconstructible chain",
            FixErrorKind::FetchFailed => "fetch failure",
            FixErrorKind::ParseFailed => "parse failure",
        })
    }
}


//------------ FixError ------------------------------------------------------

/// A chain could not be fixed.
#[derive(Clone, Debug)]
pub struct FixError {
    /// The kind of failure.
    pub kind: FixErrorKind,

    /// The leaf certificate of the chain.
    pub leaf: Cert,

    /// The intermediates available when we gave up.
    ///
    /// This includes the original candidate chain and everything fetched.
    pub chain: Vec<Cert>,

    /// The URL involved in a fetch or parse failure.
    pub url: Option<String>,

    /// The data that failed to parse.
    pub bad: Option<Bytes>,

    /// A description of the error.
    pub error: String,
}

impl fmt::Display for FixError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} for {}", self.kind, self.leaf)?;
        if let Some(url) = self.url.as_ref() {
            write!(f, " at {}", url)?;
        }
        write!(f, ": {}", self.error)
    }
}

impl std::error::Error for FixError { }


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;
    use crate::metrics::MetricsSnapshot;
    use crate::test::{CountingVerifier, MockFetcher, TestPki};

    const ROOT_URL: &str = "http://ca.example/root.cer";
    const INTER_URL: &str = "http://ca.example/inter.cer";
    const UPPER_URL: &str = "http://ca.example/upper.cer";

    struct Setup {
        fetcher: Arc<MockFetcher>,
        verifier: Arc<CountingVerifier>,
        env: FixEnv,
    }

    impl Setup {
        fn new(max_fetches: usize) -> Self {
            let fetcher = Arc::new(MockFetcher::new());
            let verifier = Arc::new(CountingVerifier::new());
            let env = FixEnv {
                cache: Arc::new(
                    UrlCache::new(fetcher.clone(), Duration::ZERO)
                ),
                ledger: Arc::new(Ledger::new()),
                verifier: verifier.clone(),
                metrics: Default::default(),
                max_fetches,
            };
            Setup { fetcher, verifier, env }
        }

        fn handle(&self, leaf: Cert, chain: &[Cert], roots: &[Cert]) -> Outcome {
            let mut pool = CertPool::new();
            for root in roots {
                pool.add(root.clone());
            }
            FixTask::new(
                leaf, chain.iter().cloned().collect(), Arc::new(pool)
            ).handle(&self.env)
        }

        fn metrics(&self) -> MetricsSnapshot {
            self.env.metrics.snapshot()
        }
    }

    fn fixed(outcome: Outcome) -> Vec<Vec<Cert>> {
        match outcome {
            Outcome::Fixed(chains) => chains,
            other => panic!("expected fixed chains, got {:?}", other),
        }
    }

    fn failed(outcome: Outcome) -> FixError {
        match outcome {
            Outcome::Failed(err) => err,
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn verifying_chain_needs_no_fetch() {
        let pki = TestPki::new();
        let root = pki.root("Root");
        let inter = pki.intermediate("Inter", &root, &[ROOT_URL]);
        let leaf = pki.leaf("leaf", &inter, &[INTER_URL]);

        let setup = Setup::new(8);
        let chains = fixed(setup.handle(
            leaf.cert(), &[inter.cert()], &[root.cert()]
        ));
        assert_eq!(
            chains, vec![vec![leaf.cert(), inter.cert(), root.cert()]]
        );
        assert_eq!(setup.fetcher.total_calls(), 0);
        let metrics = setup.metrics();
        assert_eq!(metrics.fixed, 1);
        assert_eq!(metrics.reconstructed, 0);
        assert_eq!(metrics.not_fixed, 0);
    }

    #[test]
    fn fetches_missing_issuer() {
        let pki = TestPki::new();
        let root = pki.root("Root");
        let inter = pki.intermediate("Inter", &root, &[ROOT_URL]);
        let leaf = pki.leaf("leaf", &inter, &[INTER_URL]);

        let setup = Setup::new(8);
        setup.fetcher.serve(INTER_URL, inter.der.clone());
        let chains = fixed(setup.handle(leaf.cert(), &[], &[root.cert()]));
        assert_eq!(
            chains, vec![vec![leaf.cert(), inter.cert(), root.cert()]]
        );
        assert_eq!(setup.fetcher.calls(INTER_URL), 1);
        assert_eq!(setup.fetcher.calls(ROOT_URL), 0);
        let metrics = setup.metrics();
        assert_eq!(metrics.reconstructed, 1);
        assert_eq!(metrics.fixed, 1);
        assert_eq!(setup.verifier.calls(), 2);
    }

    #[test]
    fn follows_issuers_of_fetched_certificates() {
        let pki = TestPki::new();
        let root = pki.root("Root");
        let upper = pki.intermediate("Upper", &root, &[ROOT_URL]);
        let lower = pki.intermediate("Lower", &upper, &[UPPER_URL]);
        let leaf = pki.leaf("leaf", &lower, &[INTER_URL]);

        let setup = Setup::new(8);
        setup.fetcher.serve(INTER_URL, lower.der.clone());
        setup.fetcher.serve(UPPER_URL, upper.cert().to_pem().into_bytes());
        let chains = fixed(setup.handle(leaf.cert(), &[], &[root.cert()]));
        assert_eq!(
            chains,
            vec![vec![leaf.cert(), lower.cert(), upper.cert(), root.cert()]]
        );
        assert_eq!(setup.metrics().reconstructed, 2);
    }

    #[test]
    fn candidate_chain_urls_are_used() {
        let pki = TestPki::new();
        let root = pki.root("Root");
        let upper = pki.intermediate("Upper", &root, &[ROOT_URL]);
        let lower = pki.intermediate("Lower", &upper, &[UPPER_URL]);
        let leaf = pki.leaf("leaf", &lower, &[]);

        let setup = Setup::new(8);
        setup.fetcher.serve(UPPER_URL, upper.der.clone());
        let chains = fixed(setup.handle(
            leaf.cert(), &[lower.cert()], &[root.cert()]
        ));
        assert_eq!(chains[0].len(), 4);
    }

    #[test]
    fn falls_back_to_second_url() {
        let pki = TestPki::new();
        let root = pki.root("Root");
        let inter = pki.intermediate("Inter", &root, &[]);
        let leaf = pki.leaf(
            "leaf", &inter, &["http://down.example/i.cer", INTER_URL]
        );

        let setup = Setup::new(8);
        setup.fetcher.serve(INTER_URL, inter.der.clone());
        let chains = fixed(setup.handle(leaf.cert(), &[], &[root.cert()]));
        assert_eq!(chains.len(), 1);
        let metrics = setup.metrics();
        assert_eq!(metrics.not_reconstructed, 1);
        assert_eq!(metrics.reconstructed, 1);
        assert_eq!(metrics.fixed, 1);
    }

    #[test]
    fn stops_at_first_verifying_url() {
        let pki = TestPki::new();
        let root = pki.root("Root");
        let inter = pki.intermediate("Inter", &root, &[]);
        let leaf = pki.leaf(
            "leaf", &inter, &[INTER_URL, "http://mirror.example/i.cer"]
        );

        let setup = Setup::new(8);
        setup.fetcher.serve(INTER_URL, inter.der.clone());
        setup.fetcher.serve("http://mirror.example/i.cer", inter.der.clone());
        fixed(setup.handle(leaf.cert(), &[], &[root.cert()]));
        assert_eq!(setup.fetcher.calls("http://mirror.example/i.cer"), 0);
    }

    #[test]
    fn no_urls_is_unreconstructible() {
        let pki = TestPki::new();
        let root = pki.root("Root");
        let inter = pki.intermediate("Inter", &root, &[]);
        let leaf = pki.leaf("leaf", &inter, &[]);

        let setup = Setup::new(8);
        let err = failed(setup.handle(leaf.cert(), &[], &[root.cert()]));
        assert_eq!(err.kind, FixErrorKind::Unreconstructible);
        assert_eq!(err.leaf, leaf.cert());
        assert!(err.chain.is_empty());
        assert_eq!(err.error, VerifyError::UnknownAuthority.to_string());
        assert_eq!(setup.metrics().not_fixed, 1);
        assert_eq!(setup.metrics().fixed, 0);
    }

    #[test]
    fn fetch_failure_is_reported() {
        let pki = TestPki::new();
        let root = pki.root("Root");
        let inter = pki.intermediate("Inter", &root, &[]);
        let leaf = pki.leaf("leaf", &inter, &[INTER_URL]);

        let setup = Setup::new(8);
        setup.fetcher.fail(
            INTER_URL, FetchError::Transport("connection refused".into())
        );
        let err = failed(setup.handle(leaf.cert(), &[], &[root.cert()]));
        assert_eq!(err.kind, FixErrorKind::FetchFailed);
        assert_eq!(err.url.as_deref(), Some(INTER_URL));
        assert_eq!(err.error, "connection refused");
        let metrics = setup.metrics();
        assert_eq!(metrics.not_reconstructed, 1);
        assert_eq!(metrics.not_fixed, 1);
    }

    #[test]
    fn fetch_failure_allows_resubmission() {
        let pki = TestPki::new();
        let root = pki.root("Root");
        let inter = pki.intermediate("Inter", &root, &[]);
        let leaf = pki.leaf("leaf", &inter, &[INTER_URL]);

        let setup = Setup::new(8);
        setup.fetcher.fail(INTER_URL, FetchError::Status(503));
        let err = failed(setup.handle(leaf.cert(), &[], &[root.cert()]));
        assert_eq!(err.kind, FixErrorKind::FetchFailed);

        setup.fetcher.serve(INTER_URL, inter.der.clone());
        let chains = fixed(setup.handle(leaf.cert(), &[], &[root.cert()]));
        assert_eq!(
            chains, vec![vec![leaf.cert(), inter.cert(), root.cert()]]
        );
        assert_eq!(setup.fetcher.calls(INTER_URL), 2);
        let metrics = setup.metrics();
        assert_eq!(metrics.skipped, 0);
        assert_eq!(metrics.fixed, 1);
        assert_eq!(metrics.not_fixed, 1);

        // Once fixed, the chain stays claimed.
        assert!(matches!(
            setup.handle(leaf.cert(), &[], &[root.cert()]),
            Outcome::Skipped
        ));
    }

    #[test]
    fn other_failures_stay_claimed() {
        let pki = TestPki::new();
        let root = pki.root("Root");
        let inter = pki.intermediate("Inter", &root, &[]);
        let leaf = pki.leaf("leaf", &inter, &[INTER_URL]);

        let setup = Setup::new(8);
        setup.fetcher.serve(INTER_URL, b"<html>moved</html>".to_vec());
        let err = failed(setup.handle(leaf.cert(), &[], &[root.cert()]));
        assert_eq!(err.kind, FixErrorKind::ParseFailed);
        assert!(matches!(
            setup.handle(leaf.cert(), &[], &[root.cert()]),
            Outcome::Skipped
        ));
        assert_eq!(setup.metrics().skipped, 1);
    }

    #[test]
    fn parse_failure_is_reported() {
        let pki = TestPki::new();
        let root = pki.root("Root");
        let inter = pki.intermediate("Inter", &root, &[]);
        let leaf = pki.leaf("leaf", &inter, &[INTER_URL]);

        let setup = Setup::new(8);
        setup.fetcher.serve(INTER_URL, b"<html>moved</html>".to_vec());
        let err = failed(setup.handle(leaf.cert(), &[], &[root.cert()]));
        assert_eq!(err.kind, FixErrorKind::ParseFailed);
        assert_eq!(err.url.as_deref(), Some(INTER_URL));
        assert_eq!(
            err.bad.as_ref().map(AsRef::as_ref),
            Some(b"<html>moved</html>".as_ref())
        );
    }

    #[test]
    fn fetch_budget_is_honoured() {
        let pki = TestPki::new();
        let root = pki.root("Root");
        let upper = pki.intermediate("Upper", &root, &[ROOT_URL]);
        let lower = pki.intermediate("Lower", &upper, &[UPPER_URL]);
        let leaf = pki.leaf("leaf", &lower, &[INTER_URL]);

        // The root is never trusted, so fetching goes on until the
        // budget is exhausted.
        let other_root = pki.root("Other Root");
        let setup = Setup::new(2);
        setup.fetcher.serve(INTER_URL, lower.der.clone());
        setup.fetcher.serve(UPPER_URL, upper.der.clone());
        setup.fetcher.serve(ROOT_URL, root.der.clone());
        let err = failed(setup.handle(
            leaf.cert(), &[], &[other_root.cert()]
        ));
        assert_eq!(err.kind, FixErrorKind::Unreconstructible);
        assert_eq!(err.chain, vec![lower.cert(), upper.cert()]);
        assert_eq!(setup.fetcher.calls(ROOT_URL), 0);
        assert_eq!(setup.metrics().reconstructed, 2);
    }

    #[test]
    fn issuer_loops_terminate() {
        let pki = TestPki::new();
        let root = pki.root("Root");
        let inter = pki.intermediate("Inter", &root, &[INTER_URL]);
        let leaf = pki.leaf("leaf", &inter, &[INTER_URL]);

        let setup = Setup::new(100);
        setup.fetcher.serve(INTER_URL, inter.der.clone());
        let other_root = pki.root("Other Root");
        let err = failed(setup.handle(
            leaf.cert(), &[], &[other_root.cert()]
        ));
        assert_eq!(err.kind, FixErrorKind::Unreconstructible);
        assert_eq!(setup.fetcher.calls(INTER_URL), 1);
    }

    #[test]
    fn resubmission_is_skipped() {
        let pki = TestPki::new();
        let root = pki.root("Root");
        let inter = pki.intermediate("Inter", &root, &[]);
        let leaf = pki.leaf("leaf", &inter, &[INTER_URL]);

        let setup = Setup::new(8);
        setup.fetcher.serve(INTER_URL, inter.der.clone());
        fixed(setup.handle(leaf.cert(), &[], &[root.cert()]));
        let verifies = setup.verifier.calls();
        let fetches = setup.fetcher.total_calls();
        let before = setup.metrics();

        assert!(matches!(
            setup.handle(leaf.cert(), &[], &[root.cert()]),
            Outcome::Skipped
        ));
        assert_eq!(setup.verifier.calls(), verifies);
        assert_eq!(setup.fetcher.total_calls(), fetches);
        let after = setup.metrics();
        assert_eq!(after.skipped, before.skipped + 1);
        assert_eq!(
            MetricsSnapshot { skipped: before.skipped, ..after }, before
        );
    }

    #[test]
    fn cached_issuer_counts_as_already_done() {
        let pki = TestPki::new();
        let root = pki.root("Root");
        let inter = pki.intermediate("Inter", &root, &[]);
        let leaf_a = pki.leaf("a", &inter, &[INTER_URL]);
        let leaf_b = pki.leaf("b", &inter, &[INTER_URL]);

        let setup = Setup::new(8);
        setup.fetcher.serve(INTER_URL, inter.der.clone());
        fixed(setup.handle(leaf_a.cert(), &[], &[root.cert()]));
        fixed(setup.handle(leaf_b.cert(), &[], &[root.cert()]));
        assert_eq!(setup.fetcher.calls(INTER_URL), 1);
        let metrics = setup.metrics();
        assert_eq!(metrics.already_done, 1);
        assert_eq!(metrics.reconstructed, 2);
        assert_eq!(metrics.fixed, 2);
    }

    #[test]
    fn emitted_chains_verify_again() {
        let pki = TestPki::new();
        let root = pki.root("Root");
        let inter = pki.intermediate("Inter", &root, &[]);
        let leaf = pki.leaf("leaf", &inter, &[INTER_URL]);
        let mut roots = CertPool::new();
        roots.add(root.cert());
        let roots = Arc::new(roots);

        let setup = Setup::new(8);
        setup.fetcher.serve(INTER_URL, inter.der.clone());
        let chains = fixed(setup.handle(leaf.cert(), &[], &[root.cert()]));
        for chain in chains {
            let rest: DedupedChain = chain[1..].iter().cloned().collect();
            let opts = VerifyOptions::for_fixing(&rest, roots.clone());
            let again = setup.env.verifier.verify(&chain[0], &opts).unwrap();
            assert!(again.contains(&chain));
        }
    }
}
