// src/locate.rs
//! Geographic location of VPN server endpoints and the persisted locations table.

use crate::error::{Result, VpnError};
use crate::geo::{GeoLookup, IpInfo};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static ENDPOINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Endpoint\s*=\s*(?P<ip>\d+\.\d+\.\d+\.\d+)").expect("valid endpoint pattern")
});

static INTERFACE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<region>[A-Za-z]+)(?P<number>\d+)-(?P<descriptor>.+)$")
        .expect("valid interface pattern")
});

const CONFIG_EXTENSION: &str = "conf";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoFields {
    pub country: String,
    pub region: String,
    pub city: String,
}

impl From<IpInfo> for GeoFields {
    fn from(info: IpInfo) -> Self {
        Self {
            country: info.country.unwrap_or_default(),
            region: info.region.unwrap_or_default(),
            city: info.city.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub path: PathBuf,
    pub interface: String,
    pub endpoint: Option<Ipv4Addr>,
    pub geo: Option<GeoFields>,
    /// Set when this record could only be partially resolved.
    pub error: Option<String>,
}

/// Canonical ordering key of an interface name such as `de12-wireguard`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SortKey {
    pub region: String,
    pub number: u32,
    pub descriptor: String,
}

impl SortKey {
    pub fn parse(interface: &str) -> Result<Self> {
        let malformed = || VpnError::MalformedInterfaceName(interface.to_string());
        let caps = INTERFACE_RE.captures(interface).ok_or_else(malformed)?;
        Ok(Self {
            region: caps["region"].to_string(),
            number: caps["number"].parse().map_err(|_| malformed())?,
            descriptor: caps["descriptor"].to_string(),
        })
    }
}

/// Well-formed names first in `SortKey` order, then malformed ones by name.
pub fn sort_servers(servers: &mut [ServerConfig]) {
    servers.sort_by_cached_key(|server| {
        let key = SortKey::parse(&server.interface).ok();
        (key.is_none(), key, server.interface.clone())
    });
}

pub fn expand_paths<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        let path = path.as_ref();
        if path.is_dir() {
            let mut found = Vec::new();
            for entry in std::fs::read_dir(path)? {
                let entry_path = entry?.path();
                if entry_path.is_file()
                    && entry_path.extension().is_some_and(|ext| ext == CONFIG_EXTENSION)
                {
                    found.push(entry_path);
                }
            }
            found.sort();
            files.extend(found);
        } else {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

pub fn extract_endpoint(conf: &str) -> Option<Ipv4Addr> {
    ENDPOINT_RE
        .captures(conf)
        .and_then(|caps| caps["ip"].parse().ok())
}

/// `wg-quick` names the interface after the config file: `/x/de1-wireguard.conf` is `de1-wireguard`.
pub fn interface_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Resolves the server location of every config file found under `paths`.
///
/// Problems with a single file (unreadable, no endpoint, failed lookup, malformed
/// name) are logged and noted on that record; they never abort the batch.
pub async fn resolve<P, G>(paths: &[P], geo: &G) -> Result<Vec<ServerConfig>>
where
    P: AsRef<Path>,
    G: GeoLookup,
{
    let mut servers = Vec::new();
    for path in expand_paths(paths)? {
        servers.push(resolve_one(path, geo).await);
    }
    sort_servers(&mut servers);
    Ok(servers)
}

async fn resolve_one<G: GeoLookup>(path: PathBuf, geo: &G) -> ServerConfig {
    let mut server = ServerConfig {
        interface: interface_name(&path),
        path,
        endpoint: None,
        geo: None,
        error: None,
    };

    if let Err(e) = SortKey::parse(&server.interface) {
        log::warn!("{}: {}", server.path.display(), e);
        server.error = Some(e.to_string());
    }

    let conf = match std::fs::read_to_string(&server.path) {
        Ok(conf) => conf,
        Err(e) => {
            log::warn!("Cannot read wireguard config file {}: {}", server.path.display(), e);
            server.error = Some(e.to_string());
            return server;
        }
    };

    let Some(ip) = extract_endpoint(&conf) else {
        log::warn!(
            "Cannot find endpoint IP in wireguard config file {}",
            server.path.display()
        );
        return server;
    };
    server.endpoint = Some(ip);

    match geo.lookup(Some(ip)).await {
        Ok(info) => server.geo = Some(info.into()),
        Err(e) => {
            log::warn!("Location lookup for {} ({}) failed: {}", server.interface, ip, e);
            server.error = Some(e.to_string());
        }
    }
    server
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationEntry {
    #[serde(alias = "conf")]
    pub interface: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub city: String,
}

#[derive(Serialize)]
struct PathRow<'a> {
    conf: &'a str,
    ip: &'a str,
    country: &'a str,
    region: &'a str,
    city: &'a str,
}

impl LocationEntry {
    fn from_server(server: &ServerConfig) -> Self {
        let geo = server.geo.clone().unwrap_or_default();
        Self {
            interface: server.interface.clone(),
            ip: server.endpoint.map(|ip| ip.to_string()).unwrap_or_default(),
            country: geo.country,
            region: geo.region,
            city: geo.city,
        }
    }

    /// What to hand to `wg-quick up`: the config path in the `conf` variant, else the name.
    pub fn connect_target(&self) -> &str {
        &self.interface
    }

    pub fn interface_name(&self) -> String {
        interface_name(Path::new(&self.interface))
    }

    /// `de4-wireguard` in Hesse shows as `DE - Hesse - Frankfurt am Main (de4)`.
    pub fn display_label(&self) -> String {
        let name = self.interface_name();
        let prefix = name.split('-').next().unwrap_or_default();
        format!(
            "{} - {} - {} ({})",
            self.country, self.region, self.city, prefix
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstColumn {
    Interface,
    Path,
}

pub fn write_locations<W: Write>(
    servers: &[ServerConfig],
    first_column: FirstColumn,
    out: W,
) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    for server in servers {
        let entry = LocationEntry::from_server(server);
        match first_column {
            FirstColumn::Interface => writer.serialize(&entry)?,
            FirstColumn::Path => {
                let path = server.path.to_string_lossy();
                writer.serialize(PathRow {
                    conf: &path,
                    ip: &entry.ip,
                    country: &entry.country,
                    region: &entry.region,
                    city: &entry.city,
                })?
            }
        }
    }
    if servers.is_empty() {
        let header = match first_column {
            FirstColumn::Interface => "interface",
            FirstColumn::Path => "conf",
        };
        writer.write_record([header, "ip", "country", "region", "city"])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_locations<R: Read>(input: R) -> Result<Vec<LocationEntry>> {
    let mut reader = csv::Reader::from_reader(input);
    let mut entries = Vec::new();
    for row in reader.deserialize() {
        entries.push(row?);
    }
    Ok(entries)
}

pub fn load_locations(path: &Path) -> Result<Vec<LocationEntry>> {
    let file = std::fs::File::open(path).map_err(|e| {
        std::io::Error::new(
            e.kind(),
            format!(
                "cannot open locations file {} ({}); create it with `mozvpn geolocate`",
                path.display(),
                e
            ),
        )
    })?;
    read_locations(file)
}

#[derive(Debug, Clone, Default)]
pub struct LocationFilter {
    pub city: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
}

impl LocationFilter {
    pub fn is_empty(&self) -> bool {
        self.city.is_none() && self.country.is_none() && self.region.is_none()
    }

    fn matches(&self, entry: &LocationEntry) -> bool {
        let field = |want: &Option<String>, have: &str| {
            want.as_ref()
                .is_none_or(|want| want.eq_ignore_ascii_case(have))
        };
        field(&self.city, &entry.city)
            && field(&self.country, &entry.country)
            && field(&self.region, &entry.region)
    }

    fn describe(&self) -> String {
        [
            ("city", &self.city),
            ("country", &self.country),
            ("region", &self.region),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.as_ref().map(|v| format!("{}={}", name, v)))
        .collect::<Vec<_>>()
        .join(", ")
    }
}

pub fn find_location<'a>(
    entries: &'a [LocationEntry],
    filter: &LocationFilter,
) -> Result<&'a LocationEntry> {
    if filter.is_empty() {
        return Err(VpnError::NoServerSelected);
    }
    entries
        .iter()
        .find(|entry| filter.matches(entry))
        .ok_or_else(|| VpnError::NoMatchingServer(filter.describe()))
}
