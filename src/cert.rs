//! Certificates and collections of certificates.
//!
//! The fixer never looks deep into certificates. It needs to know who a
//! certificate was issued to and by, where the issuer can be fetched from,
//! and a stable identity. [`Cert`] keeps exactly that next to the DER
//! encoding and leaves everything else to the verifier.
//!
//! Certificates are collected either in a [`DedupedChain`], the ordered
//! candidate chain submitted along with a leaf, or a [`CertPool`], an
//! unordered set indexed by subject name used for roots and intermediates.

use std::{fmt, io};
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use bytes::Bytes;
use ring::digest;
use x509_parser::prelude::{
    FromDer, GeneralName, ParsedExtension, X509Certificate
};


/// The object identifier of the id-ad-caIssuers access method.
const CA_ISSUERS_OID: &str = "1.3.6.1.5.5.7.48.2";


//------------ Fingerprint ---------------------------------------------------

/// The SHA-256 digest of a certificate’s DER encoding.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Calculates the fingerprint of the given data.
    pub fn of(data: &[u8]) -> Self {
        let digest = digest::digest(&digest::SHA256, data);
        let mut res = [0u8; 32];
        res.copy_from_slice(digest.as_ref());
        Fingerprint(res)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for ch in &self.0 {
            write!(f, "{:02x}", ch)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}


//------------ Cert ----------------------------------------------------------

/// A parsed X.509 certificate.
///
/// Values are cheap to clone. Two certificates are equal if their DER
/// encodings are equal.
#[derive(Clone)]
pub struct Cert(Arc<CertInner>);

struct CertInner {
    /// The complete DER encoding.
    der: Bytes,

    /// The digest of `der`.
    fingerprint: Fingerprint,

    /// The raw DER encoding of the subject name.
    subject: Bytes,

    /// The raw DER encoding of the issuer name.
    issuer: Bytes,

    /// The subject in human readable form for diagnostics.
    subject_name: String,

    /// The caIssuers URLs from the AIA extension in order of appearance.
    issuer_urls: Vec<String>,

    /// The cA flag of the basic constraints extension if present.
    is_ca: Option<bool>,
}

impl Cert {
    /// Decodes a certificate from exactly one DER encoded value.
    pub fn decode(der: Bytes) -> Result<Self, ParseError> {
        let (rest, cert) = X509Certificate::from_der(der.as_ref()).map_err(
            |err| ParseError::Malformed(err.to_string())
        )?;
        if !rest.is_empty() {
            return Err(ParseError::TrailingData)
        }
        let is_ca = cert.basic_constraints().map_err(|err| {
            ParseError::Malformed(err.to_string())
        })?.map(|ext| ext.value.ca);
        let inner = CertInner {
            fingerprint: Fingerprint::of(der.as_ref()),
            subject: Bytes::copy_from_slice(cert.subject().as_raw()),
            issuer: Bytes::copy_from_slice(cert.issuer().as_raw()),
            subject_name: cert.subject().to_string(),
            issuer_urls: ca_issuer_urls(&cert),
            is_ca,
            der: der.clone(),
        };
        Ok(Cert(Arc::new(inner)))
    }

    /// Decodes all certificates contained in some data.
    ///
    /// The data can be a PEM bundle, a single DER encoded certificate or
    /// a sequence of concatenated DER encoded certificates. This covers
    /// what servers typically hand out at AIA locations, apart from
    /// PKCS#7 bundles which are rejected.
    pub fn decode_bundle(data: Bytes) -> Result<Vec<Self>, ParseError> {
        let res = if is_pem(data.as_ref()) {
            let ders = rustls_pemfile::certs(&mut data.as_ref()).map_err(
                |err: io::Error| ParseError::Pem(err.to_string())
            )?;
            ders.into_iter().map(|der| {
                Cert::decode(Bytes::from(der))
            }).collect::<Result<Vec<_>, _>>()?
        }
        else {
            let mut res = Vec::new();
            let mut start = 0;
            while start < data.len() {
                let (rest, _) = X509Certificate::from_der(
                    &data.as_ref()[start..]
                ).map_err(|err| ParseError::Malformed(err.to_string()))?;
                let end = data.len() - rest.len();
                res.push(Cert::decode(data.slice(start..end))?);
                start = end;
            }
            res
        };
        if res.is_empty() {
            Err(ParseError::Empty)
        }
        else {
            Ok(res)
        }
    }

    pub fn der(&self) -> &Bytes {
        &self.0.der
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.0.fingerprint
    }

    /// Returns the raw DER encoding of the subject name.
    pub fn subject(&self) -> &[u8] {
        self.0.subject.as_ref()
    }

    /// Returns the raw DER encoding of the issuer name.
    pub fn issuer(&self) -> &[u8] {
        self.0.issuer.as_ref()
    }

    pub fn subject_name(&self) -> &str {
        &self.0.subject_name
    }

    /// Returns the caIssuers URLs of the certificate.
    pub fn issuer_urls(&self) -> &[String] {
        &self.0.issuer_urls
    }

    /// Returns whether the certificate may issue other certificates.
    ///
    /// Certificates without a basic constraints extension are given the
    /// benefit of the doubt.
    pub fn may_issue(&self) -> bool {
        self.0.is_ca.unwrap_or(true)
    }

    /// Returns whether subject and issuer name are the same.
    pub fn is_self_issued(&self) -> bool {
        self.0.subject == self.0.issuer
    }

    /// Re-parses the DER encoding for the full certificate.
    ///
    /// This can’t fail since the certificate has been parsed successfully
    /// before.
    pub(crate) fn with_parsed<F, T>(&self, op: F) -> T
    where F: FnOnce(&X509Certificate) -> T {
        let (_, cert) = X509Certificate::from_der(
            self.0.der.as_ref()
        ).expect("re-parsing a previously parsed certificate");
        op(&cert)
    }

    /// Returns the certificate in PEM format.
    pub fn to_pem(&self) -> String {
        let data = base64::encode(self.0.der.as_ref());
        let mut res = String::with_capacity(data.len() + 64);
        res.push_str("-----BEGIN CERTIFICATE-----\n");
        // Base64 output is pure ASCII, so chunking the bytes is fine.
        for line in data.as_bytes().chunks(64) {
            res.push_str(&String::from_utf8_lossy(line));
            res.push('\n');
        }
        res.push_str("-----END CERTIFICATE-----\n");
        res
    }
}

impl PartialEq for Cert {
    fn eq(&self, other: &Self) -> bool {
        self.0.fingerprint == other.0.fingerprint
    }
}

impl Eq for Cert { }

impl Hash for Cert {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.fingerprint.hash(state)
    }
}

impl fmt::Debug for Cert {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Cert")
            .field("subject", &self.0.subject_name)
            .field("fingerprint", &format_args!("{}", self.0.fingerprint))
            .finish()
    }
}

impl fmt::Display for Cert {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "'{}' ({})", self.0.subject_name, self.0.fingerprint)
    }
}


//------------ DedupedChain --------------------------------------------------

/// An ordered sequence of certificates without duplicates.
///
/// This is the candidate chain that accompanies a leaf certificate.
/// Certificates are added in order but a certificate already present is
/// silently dropped.
#[derive(Clone, Debug, Default)]
pub struct DedupedChain {
    certs: Vec<Cert>,
}

impl DedupedChain {
    pub fn new() -> Self {
        Default::default()
    }

    /// Appends a certificate unless it is already present.
    ///
    /// Returns whether the certificate was added.
    pub fn push(&mut self, cert: Cert) -> bool {
        if self.certs.contains(&cert) {
            false
        }
        else {
            self.certs.push(cert);
            true
        }
    }

    pub fn as_slice(&self) -> &[Cert] {
        &self.certs
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cert> + '_ {
        self.certs.iter()
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }
}

impl FromIterator<Cert> for DedupedChain {
    fn from_iter<I: IntoIterator<Item = Cert>>(iter: I) -> Self {
        let mut res = Self::new();
        for cert in iter {
            res.push(cert);
        }
        res
    }
}


//------------ CertPool ------------------------------------------------------

/// An unordered set of certificates indexed by subject name.
#[derive(Clone, Debug, Default)]
pub struct CertPool {
    /// The certificates in the order they were added.
    certs: Vec<Cert>,

    /// The indexes into `certs` by raw subject name.
    by_subject: HashMap<Bytes, Vec<usize>>,

    /// The fingerprints of all certificates.
    known: HashSet<Fingerprint>,
}

impl CertPool {
    pub fn new() -> Self {
        Default::default()
    }

    /// Creates a pool from a PEM bundle.
    pub fn from_pem(data: &[u8]) -> Result<Self, ParseError> {
        if !is_pem(data) {
            return Err(ParseError::Pem("no PEM data found".into()))
        }
        let mut res = Self::new();
        for cert in Cert::decode_bundle(Bytes::copy_from_slice(data))? {
            res.add(cert);
        }
        Ok(res)
    }

    /// Adds a certificate unless it is already present.
    ///
    /// Returns whether the certificate was added.
    pub fn add(&mut self, cert: Cert) -> bool {
        if !self.known.insert(cert.fingerprint()) {
            return false
        }
        self.by_subject.entry(
            cert.0.subject.clone()
        ).or_default().push(self.certs.len());
        self.certs.push(cert);
        true
    }

    pub fn contains(&self, cert: &Cert) -> bool {
        self.known.contains(&cert.fingerprint())
    }

    /// Returns all certificates whose subject is the issuer of `cert`.
    pub fn candidate_issuers<'a>(
        &'a self, cert: &Cert
    ) -> impl Iterator<Item = &'a Cert> + 'a {
        self.by_subject.get(cert.issuer()).into_iter().flat_map(
            move |indexes| indexes.iter().map(move |idx| &self.certs[*idx])
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cert> + '_ {
        self.certs.iter()
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }
}

impl<'a> From<&'a DedupedChain> for CertPool {
    fn from(chain: &'a DedupedChain) -> Self {
        let mut res = Self::new();
        for cert in chain.iter() {
            res.add(cert.clone());
        }
        res
    }
}


//------------ ParseError ----------------------------------------------------

/// Data could not be decoded into certificates.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParseError {
    /// The DER encoding is broken.
    Malformed(String),

    /// There is data after the certificate.
    TrailingData,

    /// The PEM armor is broken.
    Pem(String),

    /// There were no certificates at all.
    Empty,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParseError::Malformed(err) => {
                write!(f, "malformed certificate: {}", err)
            }
            ParseError::TrailingData => {
                f.write_str("trailing data after certificate")
            }
            ParseError::Pem(err) => write!(f, "invalid PEM data: {}", err),
            ParseError::Empty => f.write_str("no certificates found"),
        }
    }
}

impl std::error::Error for ParseError { }


//------------ Helpers -------------------------------------------------------

/// Returns whether the data looks like PEM rather than DER.
fn is_pem(data: &[u8]) -> bool {
    let start = data.iter().position(|ch| {
        !ch.is_ascii_whitespace()
    }).unwrap_or(data.len());
    data[start..].starts_with(b"-----BEGIN")
}

/// Extracts the caIssuers URLs from the AIA extension.
fn ca_issuer_urls(cert: &X509Certificate) -> Vec<String> {
    let mut res = Vec::new();
    for ext in cert.extensions() {
        if let ParsedExtension::AuthorityInfoAccess(aia)
            = ext.parsed_extension()
        {
            for desc in &aia.accessdescs {
                if desc.access_method.to_id_string() != CA_ISSUERS_OID {
                    continue
                }
                if let GeneralName::URI(uri) = desc.access_location {
                    let uri = uri.to_string();
                    if !res.contains(&uri) {
                        res.push(uri)
                    }
                }
            }
        }
    }
    res
}


//============ Tests =========================================================
