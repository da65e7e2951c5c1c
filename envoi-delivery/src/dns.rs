//! Finding the mail servers for a destination domain.
//!
//! MX hosts are used in the order the resolver returns them. Without MX
//! records the domain itself is the mail host, provided it has an address.

use std::time::Duration;

use async_trait::async_trait;
use envoi_common::internal;
use hickory_resolver::{
    ResolveError, TokioResolver, config::ResolverOpts, name_server::TokioConnectionProvider,
};
use thiserror::Error;
use tokio::time::{error::Elapsed, timeout};

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(1);

/// Errors that can occur during DNS resolution.
#[derive(Debug, Error)]
pub enum DnsError {
    /// No MX records and no address records for the domain.
    #[error("No mail servers found for domain: {0}")]
    NoMailServers(String),

    /// DNS query failed due to network or resolver issues.
    #[error("DNS lookup failed: {0}")]
    LookupFailed(#[from] ResolveError),

    /// DNS query timed out.
    #[error("DNS query timed out for domain: {0}")]
    Timeout(String),
}

/// Anything that can list the mail hosts for a domain.
#[async_trait]
pub trait MailServerLookup: Send + Sync {
    /// Host names to try, in order.
    async fn find_servers(&self, domain: &str) -> Result<Vec<String>, DnsError>;
}

/// Resolves mail servers using the system DNS configuration.
#[derive(Debug)]
pub struct DnsResolver {
    resolver: TokioResolver,
    deadline: Duration,
}

impl DnsResolver {
    /// # Errors
    ///
    /// Returns an error if the system DNS configuration cannot be loaded.
    pub fn new() -> Result<Self, DnsError> {
        let mut opts = ResolverOpts::default();
        opts.timeout = LOOKUP_TIMEOUT;
        opts.attempts = 1;

        let resolver = TokioResolver::builder(TokioConnectionProvider::default())?
            .with_options(opts)
            .build();

        Ok(Self {
            resolver,
            deadline: LOOKUP_TIMEOUT,
        })
    }

    async fn query_mx(&self, domain: &str) -> Answer<Vec<String>> {
        Answer::from_lookup(
            domain,
            timeout(self.deadline, self.resolver.mx_lookup(domain))
                .await
                .map(|result| {
                    result.map(|lookup| {
                        lookup
                            .iter()
                            .map(|mx| mx.exchange().to_utf8())
                            .collect::<Vec<_>>()
                    })
                }),
        )
    }

    async fn query_address(&self, domain: &str) -> Answer<bool> {
        Answer::from_lookup(
            domain,
            timeout(self.deadline, self.resolver.lookup_ip(domain))
                .await
                .map(|result| result.map(|lookup| lookup.iter().next().is_some())),
        )
    }
}

/// What a single DNS query came back with.
#[derive(Debug)]
enum Answer<T> {
    Records(T),
    /// The name does not exist, or has no records of the queried type.
    NoRecords,
    Failed(DnsError),
}

impl<T> Answer<T> {
    fn from_lookup(domain: &str, result: Result<Result<T, ResolveError>, Elapsed>) -> Self {
        match result {
            Err(_) => Self::Failed(DnsError::Timeout(domain.to_string())),
            Ok(Ok(records)) => Self::Records(records),
            Ok(Err(err)) if err.is_no_records_found() || err.is_nx_domain() => Self::NoRecords,
            Ok(Err(err)) => Self::Failed(err.into()),
        }
    }
}

/// MX host names in resolver order, without the trailing root dot. Empty
/// when the domain has no MX records.
fn mx_hosts(mx: Answer<Vec<String>>) -> Result<Vec<String>, DnsError> {
    match mx {
        Answer::Records(names) => Ok(names
            .iter()
            .map(|name| name.trim_end_matches('.'))
            .filter(|host| !host.is_empty())
            .map(str::to_string)
            .collect()),
        Answer::NoRecords => Ok(Vec::new()),
        Answer::Failed(err) => Err(err),
    }
}

/// The domain itself as its only mail host, if it has an address.
fn address_fallback(domain: &str, address: Answer<bool>) -> Result<Vec<String>, DnsError> {
    match address {
        Answer::Records(true) => Ok(vec![domain.to_string()]),
        Answer::Records(false) | Answer::NoRecords => {
            Err(DnsError::NoMailServers(domain.to_string()))
        }
        Answer::Failed(err) => Err(err),
    }
}

#[async_trait]
impl MailServerLookup for DnsResolver {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn find_servers(&self, domain: &str) -> Result<Vec<String>, DnsError> {
        let hosts = mx_hosts(self.query_mx(domain).await).inspect_err(|err| {
            internal!(level = WARN, "MX lookup failed for {domain}: {err}");
        })?;

        if !hosts.is_empty() {
            internal!(level = DEBUG, "MX hosts for {domain}: {hosts:?}");
            return Ok(hosts);
        }

        internal!(level = DEBUG, "No MX records for {domain}, trying the domain itself");
        address_fallback(domain, self.query_address(domain).await)
    }
}
