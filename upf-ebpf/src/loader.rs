use aya::maps::{HashMap as AyaHashMap, MapData, PerCpuArray, RingBuf};
use aya::programs::{Xdp, XdpFlags};
use aya::{Ebpf, EbpfLoader};
use tracing::info;

use upf_ebpf_common::{
    far::FarInfo, flow::FlowKey, flow::FlowStats, nat::FiveTuple, nat::NatEntry, notify::CpNotification,
    notify::NoNeighNotification, pdr::PdrInfo, qer::QerInfo, stats::RouteStats, stats::UpfStatistic,
};

use crate::UpfError;

/// Raw bytes of the compiled XDP BPF object, embedded at compile time.
/// `include_bytes_aligned!` ensures 8-byte alignment required by aya's ELF parser.
static XDP_BPF_BYTES: &[u8] = aya::include_bytes_aligned!(concat!(env!("OUT_DIR"), "/upf_xdp.bpf.o"));

const PROGRAM_NAME: &str = "upf_xdp";

/// Process-lifetime constants patched into the BPF program's globals before
/// load, per §3/§6: interface indices, VLAN tags and the two feature flags.
#[derive(Debug, Clone, Copy)]
pub struct UpfConfig {
    pub n3_ifindex: u32,
    pub n6_ifindex: u32,
    pub n3_vlan: u16,
    pub n6_vlan: u16,
    pub masquerade: bool,
    pub flowact: bool,
}

/// Owns the loaded BPF object and the two XDP attachments (N3, N6), and
/// exposes typed accessors onto the shared tables described in §6.
pub struct UpfLoader {
    ebpf: Ebpf,
    n3_interface: String,
    n6_interface: String,
}

impl UpfLoader {
    /// Load the XDP program and attach it to both the N3 and N6 interfaces.
    ///
    /// Mirrors the `rlimit` removal and `EbpfLoader::set_global` patching
    /// pattern used for the former TCP-fingerprinting probe, generalized to
    /// the UPF's configuration constants.
    pub fn load(n3_interface: &str, n6_interface: &str, config: UpfConfig) -> Result<Self, UpfError> {
        #[cfg(target_os = "linux")]
        unsafe {
            let rlim = libc::rlimit { rlim_cur: libc::RLIM_INFINITY, rlim_max: libc::RLIM_INFINITY };
            let _ = libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim);
        }

        let mut ebpf = EbpfLoader::new()
            .set_global("n3_ifindex", &config.n3_ifindex, true)
            .set_global("n6_ifindex", &config.n6_ifindex, true)
            .set_global("n3_vlan", &config.n3_vlan, true)
            .set_global("n6_vlan", &config.n6_vlan, true)
            .set_global("masquerade", &(config.masquerade as u8), true)
            .set_global("flowact", &(config.flowact as u8), true)
            .load(XDP_BPF_BYTES)
            .map_err(UpfError::Load)?;

        let program: &mut Xdp = ebpf
            .program_mut(PROGRAM_NAME)
            .ok_or(UpfError::ProgramNotFound(PROGRAM_NAME))?
            .try_into()
            .map_err(UpfError::ProgramType)?;
        program.load().map_err(UpfError::ProgramLoad)?;

        program.attach(n3_interface, XdpFlags::default()).map_err(UpfError::Attach)?;
        // A single loaded program instance is attached twice: aya clones the
        // fd-backed link per interface, consistent with the spec's "same
        // underlying components, dispatch on ingress interface" design.
        let program: &mut Xdp = ebpf
            .program_mut(PROGRAM_NAME)
            .ok_or(UpfError::ProgramNotFound(PROGRAM_NAME))?
            .try_into()
            .map_err(UpfError::ProgramType)?;
        program.attach(n6_interface, XdpFlags::default()).map_err(UpfError::Attach)?;

        info!(n3_interface, n6_interface, ?config, "UPF XDP datapath attached");

        Ok(Self { ebpf, n3_interface: n3_interface.to_string(), n6_interface: n6_interface.to_string() })
    }

    pub fn n3_interface(&self) -> &str {
        &self.n3_interface
    }

    pub fn n6_interface(&self) -> &str {
        &self.n6_interface
    }

    fn hash_map<K: aya::Pod, V: aya::Pod>(&self, name: &'static str) -> Result<AyaHashMap<&MapData, K, V>, UpfError> {
        let map_data = self.ebpf.map(name).ok_or(UpfError::MapNotFound(name))?;
        AyaHashMap::try_from(map_data).map_err(|e| UpfError::MapType(name, e))
    }

    pub fn pdrs_uplink(&self) -> Result<AyaHashMap<&MapData, u32, PdrInfo>, UpfError> {
        self.hash_map("pdrs_uplink")
    }

    pub fn pdrs_downlink_ip4(&self) -> Result<AyaHashMap<&MapData, u32, PdrInfo>, UpfError> {
        self.hash_map("pdrs_downlink_ip4")
    }

    pub fn pdrs_downlink_ip6(&self) -> Result<AyaHashMap<&MapData, [u8; 16], PdrInfo>, UpfError> {
        self.hash_map("pdrs_downlink_ip6")
    }

    pub fn fars(&self) -> Result<AyaHashMap<&MapData, u32, FarInfo>, UpfError> {
        self.hash_map("far_map")
    }

    pub fn qers(&self) -> Result<AyaHashMap<&MapData, u32, QerInfo>, UpfError> {
        self.hash_map("qer_map")
    }

    pub fn nat_table(&self) -> Result<AyaHashMap<&MapData, FiveTuple, NatEntry>, UpfError> {
        self.hash_map("nat_ct")
    }

    /// Flow-level accounting table, for control-plane idle-flow expiry and
    /// flow-granular visibility. Read-only from userspace in practice, but
    /// exposed as a regular map handle like the other tables.
    pub fn flow_stats(&self) -> Result<AyaHashMap<&MapData, FlowKey, FlowStats>, UpfError> {
        self.hash_map("flow_stats")
    }

    pub fn urr_counters(&self) -> Result<PerCpuArray<&MapData, upf_ebpf_common::urr::UrrCounter>, UpfError> {
        let map_data = self.ebpf.map("urr_map").ok_or(UpfError::MapNotFound("urr_map"))?;
        PerCpuArray::try_from(map_data).map_err(|e| UpfError::MapType("urr_map", e))
    }

    pub fn uplink_statistics(&self) -> Result<PerCpuArray<&MapData, UpfStatistic>, UpfError> {
        let map_data = self.ebpf.map("uplink_statistics").ok_or(UpfError::MapNotFound("uplink_statistics"))?;
        PerCpuArray::try_from(map_data).map_err(|e| UpfError::MapType("uplink_statistics", e))
    }

    pub fn downlink_statistics(&self) -> Result<PerCpuArray<&MapData, UpfStatistic>, UpfError> {
        let map_data = self.ebpf.map("downlink_statistics").ok_or(UpfError::MapNotFound("downlink_statistics"))?;
        PerCpuArray::try_from(map_data).map_err(|e| UpfError::MapType("downlink_statistics", e))
    }

    pub fn uplink_route_stats(&self) -> Result<PerCpuArray<&MapData, RouteStats>, UpfError> {
        let map_data = self.ebpf.map("uplink_route_stats").ok_or(UpfError::MapNotFound("uplink_route_stats"))?;
        PerCpuArray::try_from(map_data).map_err(|e| UpfError::MapType("uplink_route_stats", e))
    }

    pub fn downlink_route_stats(&self) -> Result<PerCpuArray<&MapData, RouteStats>, UpfError> {
        let map_data = self.ebpf.map("downlink_route_stats").ok_or(UpfError::MapNotFound("downlink_route_stats"))?;
        PerCpuArray::try_from(map_data).map_err(|e| UpfError::MapType("downlink_route_stats", e))
    }

    /// Borrow the control-plane notification ring buffer. The caller is
    /// expected to poll this with a `tokio::io::unix::AsyncFd` or similar in
    /// the runtime's event loop; fire-and-forget per §9.
    pub fn cp_notifications(&mut self) -> Result<RingBuf<&mut MapData>, UpfError> {
        let map_data = self.ebpf.map_mut("nocp_map").ok_or(UpfError::MapNotFound("nocp_map"))?;
        RingBuf::try_from(map_data).map_err(|e| UpfError::MapType("nocp_map", e))
    }

    pub fn no_neigh_notifications(&mut self) -> Result<RingBuf<&mut MapData>, UpfError> {
        let map_data = self.ebpf.map_mut("no_neigh_map").ok_or(UpfError::MapNotFound("no_neigh_map"))?;
        RingBuf::try_from(map_data).map_err(|e| UpfError::MapType("no_neigh_map", e))
    }
}

/// Decode one ring-buffer record into its typed notification. `aya`'s
/// `RingBuf` hands back raw byte slices; the payload is a `#[repr(C)]` POD
/// type written by the kernel side with `reserve`/`submit`, so a bytewise
/// copy is sound as long as the slice length matches.
pub fn decode_cp_notification(bytes: &[u8]) -> Option<CpNotification> {
    if bytes.len() != core::mem::size_of::<CpNotification>() {
        return None;
    }
    Some(unsafe { core::ptr::read_unaligned(bytes.as_ptr() as *const CpNotification) })
}

pub fn decode_no_neigh_notification(bytes: &[u8]) -> Option<NoNeighNotification> {
    if bytes.len() != core::mem::size_of::<NoNeighNotification>() {
        return None;
    }
    Some(unsafe { core::ptr::read_unaligned(bytes.as_ptr() as *const NoNeighNotification) })
}
