//! Ring-buffer payloads sent from the datapath up to the control plane.

/// Sent when a downlink FAR's action mask includes `BUFF` or `NOCP`, per
/// §4.4 step 8: `{ local_seid, pdr_id, qfi }`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CpNotification {
    pub local_seid: u64,
    pub pdr_id: u32,
    pub qfi: u8,
    _pad: [u8; 3],
}

#[cfg(feature = "aya-pod")]
unsafe impl aya::Pod for CpNotification {}

/// Sent when FIB lookup returns `BPF_FIB_LKUP_RET_NO_NEIGH`: the router
/// knows the next hop but has no resolved link-layer address, and punts to
/// userspace to trigger neighbor resolution instead of dropping silently.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NoNeighNotification {
    pub ifindex: u32,
    pub is_ipv6: u8,
    _pad: [u8; 3],
    pub next_hop_addr: u32,
    pub next_hop_addr6: [u8; 16],
}

#[cfg(feature = "aya-pod")]
unsafe impl aya::Pod for NoNeighNotification {}
