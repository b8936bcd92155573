//! The ledger of chains already processed.
//!
//! Log scanners see the same chains over and over again. The [`Ledger`]
//! remembers the identity of every chain the fixer has started working on
//! so that resubmissions are dropped before any work is done. Chains that
//! failed because an issuer couldn’t be fetched are released again so a
//! later resubmission gets another go.

use std::fmt;
use std::collections::HashSet;
use ring::digest;
use crate::cert::{Cert, DedupedChain, Fingerprint};
use crate::utils::sync::Mutex;


//------------ ChainIdentity -------------------------------------------------

/// The identity of a leaf certificate together with its candidate chain.
///
/// The identity is a digest over the leaf’s fingerprint followed by the
/// sorted fingerprints of the chain. The order of the chain is irrelevant:
/// the same bag of certificates in a different order leads to the same
/// result when fixing.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct ChainIdentity([u8; 32]);

impl ChainIdentity {
    pub fn new(leaf: &Cert, chain: &DedupedChain) -> Self {
        let mut fingerprints: Vec<Fingerprint> = chain.iter().map(
            Cert::fingerprint
        ).collect();
        fingerprints.sort_unstable();

        let mut ctx = digest::Context::new(&digest::SHA256);
        ctx.update(leaf.fingerprint().as_slice());
        for fingerprint in &fingerprints {
            ctx.update(fingerprint.as_slice());
        }
        let mut res = [0u8; 32];
        res.copy_from_slice(ctx.finish().as_ref());
        ChainIdentity(res)
    }
}

impl fmt::Debug for ChainIdentity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("ChainIdentity(")?;
        for ch in &self.0 {
            write!(f, "{:02x}", ch)?;
        }
        f.write_str(")")
    }
}


//------------ Ledger --------------------------------------------------------

/// A concurrency-safe set of processed chains.
///
/// Entries are only removed through [`release`][Self::release].
#[derive(Debug, Default)]
pub struct Ledger {
    seen: Mutex<HashSet<ChainIdentity>>,
}

impl Ledger {
    pub fn new() -> Self {
        Default::default()
    }

    /// Claims the identity for the caller.
    ///
    /// Returns `true` if the identity wasn’t present before. Of several
    /// threads claiming the same identity, only one will ever see `true`.
    pub fn claim_if_absent(&self, identity: ChainIdentity) -> bool {
        self.seen.lock().insert(identity)
    }

    /// Forgets the identity so it can be claimed again.
    pub fn release(&self, identity: &ChainIdentity) {
        self.seen.lock().remove(identity);
    }

    pub fn contains(&self, identity: &ChainIdentity) -> bool {
        self.seen.lock().contains(identity)
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use crate::test::TestPki;

    #[test]
    fn identity_ignores_chain_order() {
        let pki = TestPki::new();
        let root = pki.root("Root");
        let inter = pki.intermediate("Inter", &root, &[]);
        let leaf = pki.leaf("leaf", &inter, &[]).cert();
        let (root, inter) = (root.cert(), inter.cert());

        let forward: DedupedChain = vec![
            inter.clone(), root.clone()
        ].into_iter().collect();
        let backward: DedupedChain = vec![
            root.clone(), inter.clone()
        ].into_iter().collect();
        let short: DedupedChain = vec![inter.clone()].into_iter().collect();

        assert_eq!(
            ChainIdentity::new(&leaf, &forward),
            ChainIdentity::new(&leaf, &backward)
        );
        assert_ne!(
            ChainIdentity::new(&leaf, &forward),
            ChainIdentity::new(&leaf, &short)
        );

        // The leaf is not just another chain member.
        let swapped: DedupedChain = vec![
            leaf.clone(), root.clone()
        ].into_iter().collect();
        assert_ne!(
            ChainIdentity::new(&inter, &swapped),
            ChainIdentity::new(&leaf, &forward)
        );
    }

    #[test]
    fn claim_once() {
        let pki = TestPki::new();
        let leaf = pki.root("Leaf").cert();
        let id = ChainIdentity::new(&leaf, &DedupedChain::new());

        let ledger = Ledger::new();
        assert!(!ledger.contains(&id));
        assert!(ledger.claim_if_absent(id));
        assert!(!ledger.claim_if_absent(id));
        assert!(ledger.contains(&id));
        assert_eq!(ledger.len(), 1);

        ledger.release(&id);
        assert!(ledger.is_empty());
        assert!(ledger.claim_if_absent(id));
    }

    #[test]
    fn concurrent_claims() {
        let pki = TestPki::new();
        let leaf = pki.root("Leaf").cert();
        let id = ChainIdentity::new(&leaf, &DedupedChain::new());

        let ledger = Arc::new(Ledger::new());
        let winners = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(32));
        let handles: Vec<_> = (0..32).map(|_| {
            let ledger = ledger.clone();
            let winners = winners.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                if ledger.claim_if_absent(id) {
                    winners.fetch_add(1, Ordering::SeqCst);
                }
            })
        }).collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }
}
