use std::{net::IpAddr, path::PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    constants::{
        DEFAULT_RETRIES, DEFAULT_RETRY_INTERVAL, MAX_RETRANSMITS, MIN_RETRANSMIT_INTERVAL,
    },
    types::{Address, AddressError},
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid address '{addr}': {source}")]
    Address {
        addr: String,
        source: AddressError,
    },

    #[error("Map-Server '{0}' has an empty authentication key")]
    EmptyKey(String),

    #[error("Only HMAC-SHA1-96 (key-type 1) is supported, got {0}")]
    UnsupportedKeyType(u8),

    #[error("Device role '{role:?}' requires at least one {what}")]
    RoleRequires { role: DeviceRole, what: String },

    #[error("EID '{0}' is not an IP prefix")]
    EidNotAPrefix(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceRole {
    Xtr,
    Ms,
    Mr,
    Rtr,
    Mn,
}

/// The daemon's TOML-shaped configuration as deserialized from disk.
/// [`Config::build`] turns it into validated [`Settings`]; a failure
/// there keeps the daemon from starting at all.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    pub device: Option<DeviceRole>,

    /// Path of the management IPC socket.
    pub ipc_socket: Option<PathBuf>,

    #[serde(default)]
    pub control: ControlOptions,

    #[serde(default)]
    pub rloc_probing: ProbingOptions,

    #[serde(default)]
    pub map_servers: Vec<MapServerOptions>,

    #[serde(default)]
    pub map_resolvers: Vec<String>,

    /// EID prefixes this node is authoritative for.
    #[serde(default)]
    pub mappings: Vec<DbMappingOptions>,

    /// Administratively preloaded map-cache entries.
    #[serde(default)]
    pub static_cache: Vec<StaticCacheOptions>,

    #[serde(default)]
    pub petrs: Vec<RlocOptions>,

    /// Site registrations accepted when acting as a Map-Server.
    #[serde(default)]
    pub sites: Vec<SiteOptions>,

    /// Interfaces whose RLOCs an RTR anchors under the wildcard EID.
    #[serde(default)]
    pub rtr_ifaces: Vec<RtrIfaceOptions>,

    /// Ask the Map-Servers for NAT-traversal info at startup.
    #[serde(default)]
    pub nat_traversal: bool,

    /// RTRs a Map-Server hands out in Info-Replies.
    #[serde(default)]
    pub rtrs: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ControlOptions {
    #[serde(default = "default_true")]
    pub bind_v4: bool,

    #[serde(default)]
    pub bind_v6: bool,
}

impl Default for ControlOptions {
    fn default() -> Self {
        Self {
            bind_v4: true,
            bind_v6: false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProbingOptions {
    /// Seconds between probes of each cached locator; 0 disables probing.
    #[serde(default = "default_probe_interval")]
    pub interval: i64,

    #[serde(default = "default_retries")]
    pub retries: i64,

    #[serde(default = "default_retry_interval")]
    pub retries_interval: i64,
}

impl Default for ProbingOptions {
    fn default() -> Self {
        Self {
            interval: default_probe_interval(),
            retries: default_retries(),
            retries_interval: default_retry_interval(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MapServerOptions {
    pub address: String,

    #[serde(default = "default_key_type")]
    pub key_type: u8,

    pub key: String,

    #[serde(default)]
    pub proxy_reply: bool,
}

#[derive(Debug, Deserialize)]
pub struct DbMappingOptions {
    pub eid: String,

    /// Interface the locators ride on, for rebinding on address change.
    pub iface: Option<String>,

    #[serde(default)]
    pub rlocs: Vec<RlocOptions>,
}

#[derive(Debug, Deserialize)]
pub struct StaticCacheOptions {
    pub eid: String,

    #[serde(default)]
    pub rlocs: Vec<RlocOptions>,
}

#[derive(Debug, Deserialize)]
pub struct RlocOptions {
    pub address: String,

    #[serde(default = "default_priority")]
    pub priority: u8,

    #[serde(default = "default_weight")]
    pub weight: u8,
}

#[derive(Debug, Deserialize)]
pub struct SiteOptions {
    pub eid_prefix: String,

    #[serde(default = "default_key_type")]
    pub key_type: u8,

    pub key: String,

    #[serde(default)]
    pub accept_more_specifics: bool,

    #[serde(default)]
    pub proxy_reply: bool,

    #[serde(default)]
    pub merge_registrations: bool,
}

#[derive(Debug, Deserialize)]
pub struct RtrIfaceOptions {
    pub iface: String,
    pub address: String,

    #[serde(default = "default_priority")]
    pub priority: u8,

    #[serde(default = "default_weight")]
    pub weight: u8,
}

fn default_true() -> bool {
    true
}

fn default_probe_interval() -> i64 {
    30
}

fn default_retries() -> i64 {
    DEFAULT_RETRIES as i64
}

fn default_retry_interval() -> i64 {
    DEFAULT_RETRY_INTERVAL as i64
}

fn default_key_type() -> u8 {
    1
}

fn default_priority() -> u8 {
    1
}

fn default_weight() -> u8 {
    100
}

/// Validated runtime settings with every address parsed.
#[derive(Debug)]
pub struct Settings {
    pub role: DeviceRole,
    pub ipc_socket: PathBuf,
    pub bind_v4: bool,
    pub bind_v6: bool,
    pub probing: ProbingParams,
    pub map_servers: Vec<MapServer>,
    pub map_resolvers: Vec<IpAddr>,
    pub mappings: Vec<DbMapping>,
    pub static_cache: Vec<DbMapping>,
    pub petrs: Vec<Rloc>,
    pub sites: Vec<Site>,
    pub rtr_ifaces: Vec<RtrIface>,
    pub nat_traversal: bool,
    pub rtrs: Vec<IpAddr>,
}

#[derive(Debug, Clone, Copy)]
pub struct ProbingParams {
    /// 0 disables probing.
    pub interval: u64,
    pub retries: u8,
    pub retry_interval: u64,
}

#[derive(Debug, Clone)]
pub struct MapServer {
    pub addr: IpAddr,
    pub key: String,
    pub proxy_reply: bool,
}

#[derive(Debug, Clone)]
pub struct Rloc {
    pub addr: Address,
    pub priority: u8,
    pub weight: u8,
}

#[derive(Debug, Clone)]
pub struct DbMapping {
    pub eid: Address,
    pub iface: Option<String>,
    pub rlocs: Vec<Rloc>,
}

#[derive(Debug, Clone)]
pub struct Site {
    pub prefix: Address,
    pub key: String,
    pub accept_more_specifics: bool,
    pub proxy_reply: bool,
    pub merge_registrations: bool,
}

#[derive(Debug, Clone)]
pub struct RtrIface {
    pub iface: String,
    pub addr: Address,
    pub priority: u8,
    pub weight: u8,
}

impl Config {
    /// Validate and parse into runtime [`Settings`]. Every rejection here
    /// is fatal at load time.
    pub fn build(self) -> Result<Settings, ConfigError> {
        let role = self.device.unwrap_or(DeviceRole::Xtr);
        let probing = validate_probing(&self.rloc_probing);

        let mut map_servers = Vec::new();
        for ms in &self.map_servers {
            if ms.key_type != 1 {
                return Err(ConfigError::UnsupportedKeyType(ms.key_type));
            }
            if ms.key.is_empty() {
                return Err(ConfigError::EmptyKey(ms.address.clone()));
            }
            let addr = parse_ip(&ms.address)?;
            // The original appends blindly; duplicated servers would
            // double every Map-Register.
            if map_servers.iter().any(|m: &MapServer| m.addr == addr) {
                debug!(address = %addr, "duplicate map-server dropped");
                continue;
            }
            map_servers.push(MapServer {
                addr,
                key: ms.key.clone(),
                proxy_reply: ms.proxy_reply,
            });
        }

        let mut map_resolvers = Vec::new();
        for mr in &self.map_resolvers {
            let addr = parse_ip(mr)?;
            if map_resolvers.contains(&addr) {
                debug!(address = %addr, "duplicate map-resolver dropped");
                continue;
            }
            map_resolvers.push(addr);
        }

        let mappings = self
            .mappings
            .iter()
            .map(|m| parse_db_mapping(&m.eid, m.iface.clone(), &m.rlocs))
            .collect::<Result<Vec<_>, _>>()?;

        let static_cache = self
            .static_cache
            .iter()
            .map(|m| parse_db_mapping(&m.eid, None, &m.rlocs))
            .collect::<Result<Vec<_>, _>>()?;

        let petrs = self
            .petrs
            .iter()
            .map(parse_rloc)
            .collect::<Result<Vec<_>, _>>()?;

        let mut sites = Vec::new();
        for s in &self.sites {
            if s.key_type != 1 {
                return Err(ConfigError::UnsupportedKeyType(s.key_type));
            }
            if s.key.is_empty() {
                return Err(ConfigError::EmptyKey(s.eid_prefix.clone()));
            }
            let prefix = parse_prefix(&s.eid_prefix)?;
            sites.push(Site {
                prefix,
                key: s.key.clone(),
                accept_more_specifics: s.accept_more_specifics,
                proxy_reply: s.proxy_reply,
                merge_registrations: s.merge_registrations,
            });
        }

        let mut rtrs = Vec::new();
        for r in &self.rtrs {
            let addr = parse_ip(r)?;
            if rtrs.contains(&addr) {
                debug!(address = %addr, "duplicate rtr dropped");
                continue;
            }
            rtrs.push(addr);
        }

        let rtr_ifaces = self
            .rtr_ifaces
            .iter()
            .map(|r| {
                Ok(RtrIface {
                    iface: r.iface.clone(),
                    addr: parse_addr(&r.address)?,
                    priority: r.priority,
                    weight: r.weight,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        match role {
            DeviceRole::Xtr | DeviceRole::Mn if mappings.is_empty() => {
                return Err(ConfigError::RoleRequires {
                    role,
                    what: "database mapping".into(),
                });
            }
            DeviceRole::Ms if sites.is_empty() => {
                return Err(ConfigError::RoleRequires {
                    role,
                    what: "site".into(),
                });
            }
            DeviceRole::Rtr if rtr_ifaces.is_empty() => {
                return Err(ConfigError::RoleRequires {
                    role,
                    what: "rtr-iface".into(),
                });
            }
            _ => {}
        }

        Ok(Settings {
            role,
            ipc_socket: self
                .ipc_socket
                .unwrap_or_else(|| PathBuf::from("/var/run/ovr-lispd.sock")),
            bind_v4: self.control.bind_v4,
            bind_v6: self.control.bind_v6,
            probing,
            map_servers,
            map_resolvers,
            mappings,
            static_cache,
            petrs,
            sites,
            rtr_ifaces,
            nat_traversal: self.nat_traversal,
            rtrs,
        })
    }
}

/// Clamp the probing knobs into their working ranges, warning about what
/// was adjusted.
fn validate_probing(opts: &ProbingOptions) -> ProbingParams {
    let interval = opts.interval.max(0) as u64;
    if interval > 0 {
        debug!(interval, "RLOC probing enabled");
    } else {
        debug!("RLOC probing disabled");
    }

    let mut retries = opts.retries;
    if retries > MAX_RETRANSMITS as i64 {
        warn!(
            "RLOC probing retries should be between 0 and {}; using {}",
            MAX_RETRANSMITS, MAX_RETRANSMITS
        );
        retries = MAX_RETRANSMITS as i64;
    } else if retries < 0 {
        warn!(
            "RLOC probing retries should be between 0 and {}; using 0",
            MAX_RETRANSMITS
        );
        retries = 0;
    }

    let mut retry_interval = opts.retries_interval;
    if interval > 0 && retries > 0 {
        if retry_interval < MIN_RETRANSMIT_INTERVAL as i64 {
            warn!(
                "RLOC probing retry interval raised to {} seconds",
                MIN_RETRANSMIT_INTERVAL
            );
            retry_interval = MIN_RETRANSMIT_INTERVAL as i64;
        } else if retry_interval > interval as i64 {
            warn!("RLOC probing retry interval capped at the probe interval");
            retry_interval = interval as i64;
        }
    }

    ProbingParams {
        interval,
        retries: retries as u8,
        retry_interval: retry_interval.max(1) as u64,
    }
}

fn parse_addr(s: &str) -> Result<Address, ConfigError> {
    s.parse().map_err(|source| ConfigError::Address {
        addr: s.to_string(),
        source,
    })
}

fn parse_prefix(s: &str) -> Result<Address, ConfigError> {
    let addr = parse_addr(s)?;
    if !addr.is_prefix() {
        return Err(ConfigError::EidNotAPrefix(s.to_string()));
    }
    Ok(addr.normalize())
}

fn parse_ip(s: &str) -> Result<IpAddr, ConfigError> {
    match parse_addr(s)?.ip() {
        Some(ip) => Ok(ip),
        None => Err(ConfigError::Address {
            addr: s.to_string(),
            source: AddressError::Parse(s.to_string()),
        }),
    }
}

fn parse_rloc(r: &RlocOptions) -> Result<Rloc, ConfigError> {
    Ok(Rloc {
        addr: parse_addr(&r.address)?,
        priority: r.priority,
        weight: r.weight,
    })
}

fn parse_db_mapping(
    eid: &str,
    iface: Option<String>,
    rlocs: &[RlocOptions],
) -> Result<DbMapping, ConfigError> {
    let eid = parse_addr(eid)?.into_prefix().normalize();
    Ok(DbMapping {
        eid,
        iface,
        rlocs: rlocs
            .iter()
            .map(parse_rloc)
            .collect::<Result<Vec<_>, _>>()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xtr_config() -> Config {
        Config {
            device: Some(DeviceRole::Xtr),
            map_servers: vec![MapServerOptions {
                address: "192.0.2.1".into(),
                key_type: 1,
                key: "s".into(),
                proxy_reply: false,
            }],
            mappings: vec![DbMappingOptions {
                eid: "10.0.0.0/24".into(),
                iface: Some("eth0".into()),
                rlocs: vec![RlocOptions {
                    address: "198.51.100.1".into(),
                    priority: 1,
                    weight: 100,
                }],
            }],
            ..Default::default()
        }
    }

    #[test]
    fn valid_xtr_config_builds() {
        let settings = xtr_config().build().unwrap();

        assert_eq!(settings.role, DeviceRole::Xtr);
        assert_eq!(settings.map_servers.len(), 1);
        assert_eq!(settings.mappings[0].eid, "10.0.0.0/24".parse().unwrap());
    }

    #[test]
    fn duplicate_map_servers_are_dropped() {
        let mut cfg = xtr_config();
        cfg.map_servers.push(MapServerOptions {
            address: "192.0.2.1".into(),
            key_type: 1,
            key: "s".into(),
            proxy_reply: false,
        });

        let settings = cfg.build().unwrap();
        assert_eq!(settings.map_servers.len(), 1);
    }

    #[test]
    fn empty_key_rejected() {
        let mut cfg = xtr_config();
        cfg.map_servers[0].key = String::new();

        assert!(matches!(cfg.build(), Err(ConfigError::EmptyKey(_))));
    }

    #[test]
    fn wrong_key_type_rejected() {
        let mut cfg = xtr_config();
        cfg.map_servers[0].key_type = 2;

        assert!(matches!(
            cfg.build(),
            Err(ConfigError::UnsupportedKeyType(2))
        ));
    }

    #[test]
    fn ms_requires_sites() {
        let cfg = Config {
            device: Some(DeviceRole::Ms),
            ..Default::default()
        };

        assert!(matches!(cfg.build(), Err(ConfigError::RoleRequires { .. })));
    }

    #[test]
    fn probing_params_clamped() {
        let params = validate_probing(&ProbingOptions {
            interval: 30,
            retries: 99,
            retries_interval: 500,
        });

        assert_eq!(params.retries, MAX_RETRANSMITS);
        assert_eq!(params.retry_interval, 30);
    }

    #[test]
    fn bad_address_rejected() {
        let mut cfg = xtr_config();
        cfg.map_resolvers.push("not-an-ip".into());

        assert!(matches!(cfg.build(), Err(ConfigError::Address { .. })));
    }
}
