// src/geo.rs
use crate::error::{Result, VpnError};
use serde::Deserialize;
use std::future::Future;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Response from the geo-IP service.
///
/// `GET {base}/json` describes the caller's own address, `GET {base}/{ip}/json`
/// any other one. Only `ip` is guaranteed.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct IpInfo {
    pub ip: String,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub loc: Option<String>,
    pub org: Option<String>,
    pub timezone: Option<String>,
}

pub trait GeoLookup {
    /// Looks up `ip`, or the externally visible address of this host when `None`.
    fn lookup(&self, ip: Option<Ipv4Addr>) -> impl Future<Output = Result<IpInfo>> + Send;
}

#[derive(Debug, Clone)]
pub struct IpInfoClient {
    client: reqwest::Client,
    base_url: String,
}

impl IpInfoClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url_for(&self, ip: Option<Ipv4Addr>) -> String {
        match ip {
            Some(ip) => format!("{}/{}/json", self.base_url, ip),
            None => format!("{}/json", self.base_url),
        }
    }
}

impl GeoLookup for IpInfoClient {
    async fn lookup(&self, ip: Option<Ipv4Addr>) -> Result<IpInfo> {
        let url = self.url_for(ip);
        log::info!("Querying location: {}", url);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(VpnError::Network(format!(
                "{} returned status {}",
                url,
                response.status()
            )));
        }
        Ok(response.json::<IpInfo>().await?)
    }
}
