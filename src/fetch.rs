//! Fetching issuer certificates.
//!
//! The fixer doesn’t care how certificates are fetched. It uses anything
//! implementing the [`Fetch`] trait. The [`HttpClient`] provided here does
//! the real thing via reqwest’s blocking client which fits well with the
//! fixer’s worker threads.

use std::fmt;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use bytes::Bytes;
use log::error;
use reqwest::{redirect, Proxy, Url};
use reqwest::blocking::{Client, ClientBuilder};
use crate::config::Config;
use crate::error::Failed;


//------------ Fetch ---------------------------------------------------------

/// A type that can fetch the content behind a URL.
pub trait Fetch: Send + Sync {
    /// Fetches the complete content of the resource at `url`.
    fn fetch(&self, url: &str) -> Result<Bytes, FetchError>;
}

impl<T: Fetch + ?Sized> Fetch for Arc<T> {
    fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        self.as_ref().fetch(url)
    }
}


//------------ HttpClient ----------------------------------------------------

/// The HTTP client for fetching issuer certificates.
#[derive(Clone, Debug)]
pub struct HttpClient {
    /// The (blocking) reqwest client.
    client: Client,

    /// The timeout for requests.
    timeout: Option<Duration>,

    /// The maximum size of a response body.
    max_size: u64,
}

impl HttpClient {
    /// Creates a new client based on the config.
    ///
    /// Since the blocking client spawns a runtime thread, this must not
    /// be called from within an async context.
    pub fn new(config: &Config) -> Result<Self, Failed> {
        let mut builder = Self::create_builder();
        builder = builder.user_agent(&config.user_agent);
        builder = builder.timeout(None); // Set per request.
        builder = builder.redirect(
            redirect::Policy::custom(Self::redirect_policy)
        );
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if config.proxies.is_empty() {
            builder = builder.no_proxy();
        }
        for proxy in &config.proxies {
            let proxy = match Proxy::all(proxy) {
                Ok(proxy) => proxy,
                Err(err) => {
                    error!("Invalid proxy '{}': {}", proxy, err);
                    return Err(Failed)
                }
            };
            builder = builder.proxy(proxy);
        }
        let client = match builder.build() {
            Ok(client) => client,
            Err(err) => {
                error!("Failed to initialize HTTP client: {}.", err);
                return Err(Failed)
            }
        };
        Ok(HttpClient {
            client,
            timeout: config.fetch_timeout,
            max_size: config.max_fetch_size,
        })
    }

    #[cfg(not(feature = "native-tls"))]
    fn create_builder() -> ClientBuilder {
        Client::builder().use_rustls_tls()
    }

    #[cfg(feature = "native-tls")]
    fn create_builder() -> ClientBuilder {
        Client::builder().use_native_tls()
    }

    /// The redirect policy.
    ///
    /// Issuer certificates are frequently served from CDNs, so redirects
    /// to other hosts are fine. We stop after five of them and never leave
    /// HTTP or HTTPS.
    fn redirect_policy(attempt: redirect::Attempt) -> redirect::Action {
        if attempt.previous().len() > 4 {
            return attempt.stop();
        }
        if matches!(attempt.url().scheme(), "http" | "https") {
            attempt.follow()
        }
        else {
            attempt.stop()
        }
    }
}

impl Fetch for HttpClient {
    fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        let parsed = Url::parse(url).map_err(|err| {
            FetchError::InvalidUrl(format!("{}: {}", url, err))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl(
                format!("{}: unsupported scheme", url)
            ))
        }
        let mut request = self.client.get(parsed);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().map_err(|err| {
            FetchError::Transport(err.to_string())
        })?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()))
        }
        if let Some(len) = response.content_length() {
            if len > self.max_size {
                return Err(FetchError::TooLarge)
            }
        }

        // Read one byte more than allowed so we can tell if there’s more.
        let mut data = Vec::new();
        response.take(self.max_size + 1).read_to_end(&mut data).map_err(
            |err| FetchError::Transport(err.to_string())
        )?;
        if data.len() as u64 > self.max_size {
            return Err(FetchError::TooLarge)
        }
        Ok(data.into())
    }
}


//------------ FetchError ----------------------------------------------------

/// Fetching a resource failed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FetchError {
    /// The URL cannot be fetched by us.
    InvalidUrl(String),

    /// The server responded with a non-success status code.
    Status(u16),

    /// The resource is larger than we are willing to accept.
    TooLarge,

    /// Something went wrong on the way.
    Transport(String),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FetchError::InvalidUrl(err) => write!(f, "invalid URL {}", err),
            FetchError::Status(status) => {
                write!(f, "server responded with status {}", status)
            }
            FetchError::TooLarge => f.write_str("response too large"),
            FetchError::Transport(err) => f.write_str(err),
        }
    }
}

impl std::error::Error for FetchError { }


//============ Tests =========================================================
