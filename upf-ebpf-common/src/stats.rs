//! Per-CPU telemetry counters read by the userspace loader and exported as
//! metrics.

/// FIB-assisted routing outcomes, one array slot per `bpf_fib_lookup`
/// return code bucket the router distinguishes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RouteStats {
    pub success: u64,
    pub no_neigh: u64,
    pub blackhole: u64,
    pub unreachable: u64,
    pub prohibit: u64,
    pub frag_needed: u64,
    pub other_error: u64,
}

#[cfg(feature = "aya-pod")]
unsafe impl aya::Pod for RouteStats {}

/// Indices into the per-CPU `UpfStatistic` array map, one counter per
/// pipeline stage outcome the datapath increments.
pub mod stat_index {
    pub const UPLINK_PACKETS: u32 = 0;
    pub const DOWNLINK_PACKETS: u32 = 1;
    pub const UPLINK_BYTES: u32 = 2;
    pub const DOWNLINK_BYTES: u32 = 3;
    pub const PDR_MISS: u32 = 4;
    pub const FAR_MISS: u32 = 5;
    pub const QER_MISS: u32 = 6;
    pub const GATE_CLOSED_DROPS: u32 = 7;
    pub const RATE_LIMIT_DROPS: u32 = 8;
    pub const SDF_NO_MATCH_DROPS: u32 = 9;
    pub const NAT_PORT_EXHAUSTED: u32 = 10;
    pub const MALFORMED_PACKETS: u32 = 11;
    pub const XDP_ABORTED: u32 = 12;
    pub const XDP_PASS: u32 = 13;
    pub const XDP_TX: u32 = 14;
    pub const XDP_REDIRECT: u32 = 15;
    pub const GTP_ECHO_REPLIES: u32 = 16;

    pub const COUNT: u32 = 17;
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpfStatistic {
    pub value: u64,
}

#[cfg(feature = "aya-pod")]
unsafe impl aya::Pod for UpfStatistic {}
