// eBPF/XDP is Linux-only. This crate does not compile for other targets.
#![cfg(target_os = "linux")]

pub mod loader;

pub use loader::UpfLoader;
pub use upf_ebpf_common as common;

#[derive(Debug, thiserror::Error)]
pub enum UpfError {
    #[error("failed to load BPF object: {0}")]
    Load(#[from] aya::EbpfError),

    #[error("XDP program '{0}' not found in BPF object")]
    ProgramNotFound(&'static str),

    #[error("BPF program is not an XDP program: {0}")]
    ProgramType(#[source] aya::programs::ProgramError),

    #[error("failed to load XDP program into kernel: {0}")]
    ProgramLoad(#[source] aya::programs::ProgramError),

    #[error("failed to attach XDP program to interface: {0}")]
    Attach(#[source] aya::programs::ProgramError),

    #[error("map '{0}' not found in BPF object")]
    MapNotFound(&'static str),

    #[error("map '{0}' has an unexpected type: {1}")]
    MapType(&'static str, #[source] aya::maps::MapError),

    #[error("failed to resolve interface '{0}' to an ifindex: {1}")]
    InterfaceIndex(String, #[source] std::io::Error),
}
