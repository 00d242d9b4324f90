//! The load balancer's declarative configuration model.
//!
//! Every scalar is encoded as a JSON string and absent values are omitted, so a
//! farm that only carries a name and backends updates just its backend set.

use crate::FarmName;
use serde::{Serialize, Serializer};
use std::{fmt, net::IpAddr, str::FromStr};

/// A declarative push: farms are upserted by name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FarmSet {
    pub farms: Vec<Farm>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Farm {
    pub name: FarmName,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub family: Option<Family>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub virtual_addr: Option<IpAddr>,

    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "display")]
    pub virtual_ports: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<Scheduler>,

    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "display")]
    pub sched_param: Option<FieldParam>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub helper: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_prefix: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,

    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "on_off")]
    pub intra_connect: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "display")]
    pub persistence: Option<FieldParam>,

    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "display")]
    pub persist_ttl: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub iface: Option<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub backends: Vec<Backend>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Backend {
    pub name: String,

    pub ip_addr: IpAddr,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,

    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "display")]
    pub port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "display")]
    pub est_connlimit: Option<u32>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    #[default]
    Ipv4,
    Ipv6,
}

/// Forwarding mode of a farm.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Snat,
    Dnat,
    Dsr,
    StlsDsr,
    Local,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub enum Scheduler {
    #[default]
    #[serde(rename = "rr")]
    RoundRobin,
    #[serde(rename = "symhash")]
    SymHash,
    #[serde(rename = "hash")]
    Hash,
}

/// A packet field used for hashing or persistence.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PacketField {
    SrcIp,
    DstIp,
    SrcPort,
    DstPort,
    SrcMac,
    DstMac,
}

/// A field-valued farm parameter that may be explicitly disabled.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum FieldParam {
    #[default]
    None,
    Field(PacketField),
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    #[default]
    Up,
    Down,
    Off,
}

// === impl FarmSet ===

impl FarmSet {
    pub fn is_empty(&self) -> bool {
        self.farms.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &FarmName> + '_ {
        self.farms.iter().map(|f| &f.name)
    }

    pub fn get(&self, name: &str) -> Option<&Farm> {
        self.farms.iter().find(|f| f.name.as_str() == name)
    }

    /// Returns the backend list of the named farm, adding a backends-only farm
    /// entry if the set does not declare it yet.
    pub fn backends_mut(&mut self, name: &FarmName) -> &mut Vec<Backend> {
        let idx = match self.farms.iter().position(|f| f.name == *name) {
            Some(idx) => idx,
            None => {
                self.farms.push(Farm {
                    name: name.clone(),
                    ..Default::default()
                });
                self.farms.len() - 1
            }
        };
        &mut self.farms[idx].backends
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl FromIterator<Farm> for FarmSet {
    fn from_iter<T: IntoIterator<Item = Farm>>(iter: T) -> Self {
        Self {
            farms: iter.into_iter().collect(),
        }
    }
}

// === impl Family ===

impl Family {
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Self::Ipv4,
            IpAddr::V6(_) => Self::Ipv6,
        }
    }
}

// === impl Mode ===

impl FromStr for Mode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "snat" => Ok(Self::Snat),
            "dnat" => Ok(Self::Dnat),
            "dsr" => Ok(Self::Dsr),
            "stlsdsr" => Ok(Self::StlsDsr),
            "local" => Ok(Self::Local),
            _ => Err(()),
        }
    }
}

// === impl PacketField ===

impl PacketField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SrcIp => "srcip",
            Self::DstIp => "dstip",
            Self::SrcPort => "srcport",
            Self::DstPort => "dstport",
            Self::SrcMac => "srcmac",
            Self::DstMac => "dstmac",
        }
    }
}

impl FromStr for PacketField {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "srcip" => Ok(Self::SrcIp),
            "dstip" => Ok(Self::DstIp),
            "srcport" => Ok(Self::SrcPort),
            "dstport" => Ok(Self::DstPort),
            "srcmac" => Ok(Self::SrcMac),
            "dstmac" => Ok(Self::DstMac),
            _ => Err(()),
        }
    }
}

impl fmt::Display for PacketField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl FieldParam ===

impl fmt::Display for FieldParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Field(field) => field.fmt(f),
        }
    }
}

fn display<T, S>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
where
    T: fmt::Display,
    S: Serializer,
{
    match value {
        Some(v) => serializer.collect_str(v),
        None => serializer.serialize_none(),
    }
}

fn on_off<S: Serializer>(value: &Option<bool>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(true) => serializer.serialize_str("on"),
        Some(false) => serializer.serialize_str("off"),
        None => serializer.serialize_none(),
    }
}
