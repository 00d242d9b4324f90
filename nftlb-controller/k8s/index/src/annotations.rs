//! Interprets a service's annotations and built-in fields as farm parameters.
//!
//! Annotation keys are matched by their trailing word (case-insensitively), so
//! `service.kubernetes.io/kube-nftlb-load-balancer-mode` configures `mode`.
//! Values that cannot be interpreted are ignored in favor of defaults.

use nftlb_controller_core::{Family, FieldParam, Mode, PacketField, Scheduler};
use nftlb_controller_k8s_api::{ResourceExt, Service, ServiceSpec};
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::IpAddr;

/// The longest session affinity timeout the cluster accepts.
const MAX_PERSIST_TTL_SECS: u32 = 86_400;

static TRAILING_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new("[A-Za-z]+$").expect("trailing word regex must compile"));

static LEADING_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[A-Za-z]+").expect("leading word regex must compile"));

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FarmParams {
    pub family: Family,
    pub mode: Mode,
    pub scheduler: Scheduler,
    pub sched_param: FieldParam,
    pub helper: Option<String>,
    pub log: Option<String>,
    pub log_prefix: Option<String>,
    pub persistence: Option<FieldParam>,
    pub persist_ttl: Option<u32>,

    /// Applies to every backend of every farm derived from the service.
    pub connection_ceiling: Option<u32>,
}

/// Annotation fields understood by the interpreter.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Field {
    Mode,
    Scheduler,
    Helper,
    Log,
    LogPrefix,
    Persistence,
    MaxConns,
}

pub fn interpret(service: &Service) -> FarmParams {
    let spec = service.spec.as_ref();
    let mut params = FarmParams {
        family: family(spec),
        persist_ttl: persist_ttl(spec),
        ..Default::default()
    };

    let mut log_prefix = None;
    let mut persistence = None;
    for (key, value) in service.annotations() {
        let Some(field) = annotation_field(key) else {
            continue;
        };
        match field {
            Field::Mode => match value.parse() {
                Ok(mode) => params.mode = mode,
                Err(()) => tracing::debug!(%key, %value, "Ignoring invalid mode"),
            },
            Field::Scheduler => match scheduler(value) {
                Some((scheduler, param)) => {
                    params.scheduler = scheduler;
                    params.sched_param = param;
                }
                None => tracing::debug!(%key, %value, "Ignoring invalid scheduler"),
            },
            Field::Helper => params.helper = Some(value.clone()),
            Field::Log => params.log = Some(value.clone()),
            Field::LogPrefix => log_prefix = Some(value.clone()),
            Field::Persistence => match value.parse() {
                Ok(field) => persistence = Some(FieldParam::Field(field)),
                Err(()) => tracing::debug!(%key, %value, "Ignoring invalid persistence"),
            },
            Field::MaxConns => match value.trim().parse::<u32>() {
                Ok(0) => {}
                Ok(ceiling) => params.connection_ceiling = Some(ceiling),
                Err(error) => tracing::debug!(%key, %value, %error, "Ignoring invalid maxconns"),
            },
        }
    }

    // A prefix only makes sense when logging is enabled.
    if params
        .log
        .as_deref()
        .is_some_and(|log| !log.is_empty() && log != "none")
    {
        params.log_prefix = log_prefix;
    }

    params.persistence = persistence.or_else(|| affinity_persistence(spec));
    params
}

/// The address family of the service's cluster address, IPv4 unless the
/// address parses as IPv6.
fn family(spec: Option<&ServiceSpec>) -> Family {
    spec.and_then(|s| s.cluster_ip.as_deref())
        .and_then(|ip| ip.parse::<IpAddr>().ok())
        .map(|ip| Family::of(&ip))
        .unwrap_or_default()
}

fn annotation_field(key: &str) -> Option<Field> {
    let word = TRAILING_WORD.find(key)?.as_str().to_ascii_lowercase();
    match word.as_str() {
        "mode" => Some(Field::Mode),
        "scheduler" => Some(Field::Scheduler),
        "helper" => Some(Field::Helper),
        "log" => Some(Field::Log),
        "logprefix" => Some(Field::LogPrefix),
        "persistence" => Some(Field::Persistence),
        "maxconns" => Some(Field::MaxConns),
        _ => None,
    }
}

/// Parses `rr`, `symhash`, or `hash-<field>`.
fn scheduler(value: &str) -> Option<(Scheduler, FieldParam)> {
    match value {
        "rr" => return Some((Scheduler::RoundRobin, FieldParam::None)),
        "symhash" => return Some((Scheduler::SymHash, FieldParam::None)),
        _ => {}
    }

    let kind = LEADING_WORD.find(value)?;
    if !kind.as_str().eq_ignore_ascii_case("hash") {
        return None;
    }
    let field = TRAILING_WORD.find(value)?;
    if field.start() <= kind.end() {
        return None;
    }
    let field = field.as_str().parse::<PacketField>().ok()?;
    Some((Scheduler::Hash, FieldParam::Field(field)))
}

fn affinity_persistence(spec: Option<&ServiceSpec>) -> Option<FieldParam> {
    match spec?.session_affinity.as_deref()? {
        "ClientIP" => Some(FieldParam::Field(PacketField::SrcIp)),
        "None" => Some(FieldParam::None),
        _ => None,
    }
}

fn persist_ttl(spec: Option<&ServiceSpec>) -> Option<u32> {
    let secs = spec?
        .session_affinity_config
        .as_ref()?
        .client_ip
        .as_ref()?
        .timeout_seconds?;
    u32::try_from(secs)
        .ok()
        .filter(|secs| *secs <= MAX_PERSIST_TTL_SECS)
}
