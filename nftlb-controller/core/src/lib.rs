#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod alias;
mod error;
pub mod farm;
mod naming;
pub mod sink;

pub use self::{
    alias::{AliasOp, BackendExec, PodLookup},
    error::Error,
    farm::{Backend, Family, Farm, FarmSet, FieldParam, Mode, PacketField, Scheduler, State},
    naming::{port_name, FarmName, FarmRole, DEFAULT_PORT_NAME},
    sink::{ConfigSink, SinkError, SinkOp},
};
pub use nftlb_controller_k8s_api::ResourceId;

pub const CONTROLLER_NAME: &str = "nftlb-controller";
