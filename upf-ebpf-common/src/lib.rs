//! Types and pure algorithms shared between the BPF kernel program and the
//! userspace loader.
//!
//! This crate is `no_std` (except under `cfg(test)`, where the standard test
//! harness needs `std`) so it compiles for both targets:
//! - `bpfel-unknown-none` (the kernel-side XDP program, `upf-ebpf-xdp`)
//! - the host target (the userspace loader, `upf-ebpf`)
//!
//! Enable the `aya-pod` feature in the userspace crate to get `aya::Pod`
//! impls for every map value defined here.
#![cfg_attr(not(test), no_std)]

pub mod csum;
pub mod far;
pub mod flow;
pub mod nat;
pub mod notify;
pub mod pdr;
pub mod qer;
pub mod ratelimit;
pub mod sdf;
pub mod stats;
pub mod urr;
pub mod wire;

pub use far::FarInfo;
pub use flow::{FlowKey, FlowStats};
pub use nat::{FiveTuple, NatEntry};
pub use notify::{CpNotification, NoNeighNotification};
pub use pdr::{PdrInfo, SdfRules};
pub use qer::QerInfo;
pub use sdf::SdfFilter;
pub use stats::{RouteStats, UpfStatistic};
pub use urr::UrrCounter;
