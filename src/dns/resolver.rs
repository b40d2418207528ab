//! DoH-first hostname resolver with conventional fallback

use crate::Result;
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info};

/// Default public DoH endpoint (JSON answer format).
pub const DEFAULT_DOH_ENDPOINT: &str = "https://dns.google/resolve";

/// Bound on a single DoH round trip.
pub const DEFAULT_DOH_TIMEOUT_SECS: u64 = 3;

/// DNS type code for A records.
const TYPE_A: u16 = 1;

/// JSON reply body from a DoH endpoint.
#[derive(Debug, Deserialize)]
struct DohReply {
    #[serde(rename = "Answer", default)]
    answer: Vec<DohRecord>,
}

/// One record of the `Answer` array.
#[derive(Debug, Deserialize)]
struct DohRecord {
    #[serde(rename = "type")]
    rtype: u16,
    data: String,
}

/// Hostname resolver, DoH-first with a single conventional fallback.
///
/// `resolve` never fails: DoH errors, timeouts and empty answers all
/// collapse into the fallback path, and a fallback failure yields an empty
/// list. No result is ever cached; every caller re-resolves.
pub struct Resolver {
    client: reqwest::Client,
    endpoint: String,
}

impl Resolver {
    /// Create a resolver against the given DoH endpoint.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        info!("DNS resolver using DoH endpoint {}", endpoint);
        Ok(Resolver {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    /// Resolver with the default endpoint and timeout.
    pub fn with_defaults() -> Result<Self> {
        Self::new(
            DEFAULT_DOH_ENDPOINT,
            Duration::from_secs(DEFAULT_DOH_TIMEOUT_SECS),
        )
    }

    /// Resolve a hostname to an ordered list of addresses.
    ///
    /// Returns an empty list when both DoH and the conventional fallback
    /// fail or produce no usable records.
    pub async fn resolve(&self, host: &str) -> Vec<IpAddr> {
        // IP literals need no lookup at all
        if let Ok(ip) = host.parse::<IpAddr>() {
            return vec![ip];
        }

        match self.query_doh(host).await {
            Ok(ips) if !ips.is_empty() => {
                debug!("DNS {} -> {:?} (doh)", host, ips);
                return ips;
            }
            Ok(_) => debug!("DoH returned no usable answers for {}", host),
            Err(e) => debug!("DoH query failed for {}: {}", host, e),
        }

        let ips = Self::fallback_lookup(host).await;
        if ips.is_empty() {
            debug!("DNS {} unresolvable (doh + fallback failed)", host);
        } else {
            debug!("DNS {} -> {:?} (fallback)", host, ips);
        }
        ips
    }

    /// One GET against the DoH endpoint, requesting A records as JSON.
    async fn query_doh(&self, host: &str) -> Result<Vec<IpAddr>> {
        let reply: DohReply = self
            .client
            .get(&self.endpoint)
            .query(&[("name", host), ("type", "A")])
            .header(reqwest::header::ACCEPT, "application/dns-json")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(collect_addresses(&reply))
    }

    /// Conventional system resolution, used exactly once when DoH yields
    /// nothing. Errors are swallowed into an empty list.
    async fn fallback_lookup(host: &str) -> Vec<IpAddr> {
        match tokio::net::lookup_host((host, 0u16)).await {
            Ok(addrs) => addrs
                .map(|a| a.ip())
                .filter(|ip| ip.is_ipv4())
                .collect(),
            Err(e) => {
                debug!("fallback resolution failed for {}: {}", host, e);
                Vec::new()
            }
        }
    }
}

/// Pull A-record addresses out of a reply, preserving answer order.
/// Records of other types (CNAME chains and the like) and records whose
/// data does not parse as an address are skipped.
fn collect_addresses(reply: &DohReply) -> Vec<IpAddr> {
    reply
        .answer
        .iter()
        .filter(|r| r.rtype == TYPE_A)
        .filter_map(|r| r.data.parse().ok())
        .collect()
}
