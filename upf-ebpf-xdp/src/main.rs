//! XDP datapath for a 5G UPF: GTP-U decapsulation/encapsulation, PDR/FAR/QER/URR
//! rule matching, sliding-window rate limiting, masquerade NAT and
//! FIB-assisted routing between the N3 (radio) and N6 (data network)
//! interfaces.
//!
//! Direct Rust port of the reference `bpf/xdp_n3.c` / `bpf/xdp_n6.c` pair,
//! combined behind a single ingress-interface dispatch ("on-a-stick").
#![no_std]
#![no_main]

use aya_ebpf::{
    bindings::xdp_action,
    helpers::{bpf_csum_diff, bpf_fib_lookup, bpf_ktime_get_ns, bpf_xdp_adjust_head, bpf_xdp_adjust_tail},
    macros::{map, xdp},
    maps::{Array, HashMap, LruHashMap, PerCpuArray, RingBuf},
    programs::XdpContext,
};
use aya_ebpf::bindings::{bpf_fib_lookup as BpfFibLookup, BPF_FIB_LOOKUP_OUTPUT};

use core::mem;

use upf_ebpf_common::{
    csum, far,
    far::{FarInfo, OuterHeaderCreation},
    flow::{FlowKey, FlowStats},
    nat::{FiveTuple, NatEntry, MAX_PORT_ALLOCATION_ATTEMPTS},
    notify::{CpNotification, NoNeighNotification},
    pdr,
    pdr::PdrInfo,
    qer::QerInfo,
    ratelimit,
    sdf::{self, FiveTupleView},
    stats::{stat_index, RouteStats, UpfStatistic},
    urr::UrrCounter,
    wire::*,
};

// ── Configuration globals, patched at load time ─────────────────────────────

#[no_mangle]
#[allow(non_upper_case_globals)]
static n3_ifindex: u32 = 0;
#[no_mangle]
#[allow(non_upper_case_globals)]
static n6_ifindex: u32 = 0;
#[no_mangle]
#[allow(non_upper_case_globals)]
static n3_vlan: u16 = 0;
#[no_mangle]
#[allow(non_upper_case_globals)]
static n6_vlan: u16 = 0;
#[no_mangle]
#[allow(non_upper_case_globals)]
static masquerade: u8 = 0;
#[no_mangle]
#[allow(non_upper_case_globals)]
static flowact: u8 = 0;

// ── Rule tables ──────────────────────────────────────────────────────────────

#[map]
#[allow(non_upper_case_globals)]
static pdrs_uplink: HashMap<u32, PdrInfo> = HashMap::with_max_entries(2000, 0);
#[map]
#[allow(non_upper_case_globals)]
static pdrs_downlink_ip4: HashMap<u32, PdrInfo> = HashMap::with_max_entries(2000, 0);
#[map]
#[allow(non_upper_case_globals)]
static pdrs_downlink_ip6: HashMap<[u8; 16], PdrInfo> = HashMap::with_max_entries(2000, 0);
#[map]
#[allow(non_upper_case_globals)]
static far_map: HashMap<u32, FarInfo> = HashMap::with_max_entries(4000, 0);
#[map]
#[allow(non_upper_case_globals)]
static qer_map: HashMap<u32, QerInfo> = HashMap::with_max_entries(4000, 0);
#[map]
#[allow(non_upper_case_globals)]
static urr_map: PerCpuArray<UrrCounter> = PerCpuArray::with_max_entries(2000, 0);

#[map]
#[allow(non_upper_case_globals)]
static nat_ct: LruHashMap<FiveTuple, NatEntry> = LruHashMap::with_max_entries(1_000_000, 0);

/// §C: per-flow byte/packet accounting, supplemental to URR rule-level
/// totals. Sized for 100 flows across 2000 sessions, mirroring the PDR
/// table's session ceiling.
#[map]
#[allow(non_upper_case_globals)]
static flow_stats: LruHashMap<FlowKey, FlowStats> = LruHashMap::with_max_entries(200_000, 0);

#[map]
#[allow(non_upper_case_globals)]
static nocp_map: RingBuf = RingBuf::with_byte_size(4096 * 64, 0);
#[map]
#[allow(non_upper_case_globals)]
static no_neigh_map: RingBuf = RingBuf::with_byte_size(4096 * 64, 0);

#[map]
#[allow(non_upper_case_globals)]
static uplink_statistics: PerCpuArray<UpfStatistic> = PerCpuArray::with_max_entries(stat_index::COUNT, 0);
#[map]
#[allow(non_upper_case_globals)]
static downlink_statistics: PerCpuArray<UpfStatistic> = PerCpuArray::with_max_entries(stat_index::COUNT, 0);
#[map]
#[allow(non_upper_case_globals)]
static uplink_route_stats: PerCpuArray<RouteStats> = PerCpuArray::with_max_entries(1, 0);
#[map]
#[allow(non_upper_case_globals)]
static downlink_route_stats: PerCpuArray<RouteStats> = PerCpuArray::with_max_entries(1, 0);

// ── Wire header layouts ──────────────────────────────────────────────────────

#[repr(C)]
struct EthHdr {
    h_dest: [u8; 6],
    h_source: [u8; 6],
    h_proto: u16,
}

#[repr(C)]
struct VlanHdr {
    tci: u16,
    encapsulated_proto: u16,
}

#[repr(C)]
struct Ipv4Hdr {
    version_ihl: u8,
    tos: u8,
    tot_len: u16,
    id: u16,
    frag_off: u16,
    ttl: u8,
    protocol: u8,
    check: u16,
    saddr: u32,
    daddr: u32,
}

impl Ipv4Hdr {
    #[inline(always)]
    fn ihl(&self) -> u8 {
        self.version_ihl & 0x0F
    }
}

#[repr(C)]
struct Ipv6Hdr {
    ver_tc_fl: u32,
    payload_len: u16,
    next_header: u8,
    hop_limit: u8,
    saddr: [u8; 16],
    daddr: [u8; 16],
}

#[repr(C)]
struct UdpHdr {
    source: u16,
    dest: u16,
    len: u16,
    check: u16,
}

#[repr(C)]
struct TcpHdr {
    source: u16,
    dest: u16,
    seq: u32,
    ack_seq: u32,
    offset_flags: u16,
    window: u16,
    check: u16,
    urg_ptr: u16,
}

#[repr(C)]
struct IcmpHdr {
    icmp_type: u8,
    code: u8,
    checksum: u16,
    un: [u8; 4], // id+seq for echo; unused/mtu for dest-unreach
}

#[repr(C)]
struct GtpHdr {
    flags: u8,
    message_type: u8,
    length: u16,
    teid: u32,
}

// ── Actions ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq)]
enum Action {
    Pass,
    Drop,
    Tx,
    Redirect(u32),
    Aborted,
}

impl Action {
    #[inline(always)]
    fn to_xdp(self) -> u32 {
        match self {
            Action::Pass => xdp_action::XDP_PASS,
            Action::Drop => xdp_action::XDP_DROP,
            Action::Tx => xdp_action::XDP_TX,
            Action::Redirect(_) => xdp_action::XDP_PASS, // resolved by caller via bpf_redirect
            Action::Aborted => xdp_action::XDP_ABORTED,
        }
    }
}

// ── Packet access helper ─────────────────────────────────────────────────────

#[inline(always)]
unsafe fn ptr_at<T>(ctx: &XdpContext, offset: usize) -> Option<*mut T> {
    let start = ctx.data();
    let end = ctx.data_end();
    let access_end = start.checked_add(offset)?.checked_add(mem::size_of::<T>())?;
    if access_end > end {
        return None;
    }
    Some(start.checked_add(offset)? as *mut T)
}

#[inline(always)]
unsafe fn byte_at(ctx: &XdpContext, offset: usize) -> Option<u8> {
    let start = ctx.data();
    let end = ctx.data_end();
    if start.checked_add(offset)?.checked_add(1)? > end {
        return None;
    }
    Some(*((start + offset) as *const u8))
}

#[inline(always)]
fn bump_stat(table: &PerCpuArray<UpfStatistic>, index: u32) {
    if let Some(ptr) = table.get_ptr_mut(index) {
        unsafe { (*ptr).value += 1 };
    }
}

#[inline(always)]
fn bump_stat_by(table: &PerCpuArray<UpfStatistic>, index: u32, amount: u64) {
    if let Some(ptr) = table.get_ptr_mut(index) {
        unsafe { (*ptr).value += amount };
    }
}

// ── Ethernet / VLAN ──────────────────────────────────────────────────────────

struct EthView {
    offset: usize,
    eth_type: u16,
}

#[inline(always)]
fn parse_eth(ctx: &XdpContext) -> Option<EthView> {
    let eth = unsafe { ptr_at::<EthHdr>(ctx, 0)? };
    let mut offset = mem::size_of::<EthHdr>();
    let mut eth_type = u16::from_be(unsafe { (*eth).h_proto });

    if eth_type == ETH_P_8021Q {
        let vlan = unsafe { ptr_at::<VlanHdr>(ctx, offset)? };
        offset += mem::size_of::<VlanHdr>();
        eth_type = u16::from_be(unsafe { (*vlan).encapsulated_proto });
    }

    Some(EthView { offset, eth_type })
}

// ── Entry points ─────────────────────────────────────────────────────────────

#[xdp]
pub fn upf_xdp(ctx: XdpContext) -> u32 {
    let ingress_ifindex = ctx.ingress_ifindex();
    let action = if ingress_ifindex == unsafe { core::ptr::read_volatile(&n3_ifindex) } {
        let action = uplink(&ctx);
        bump_action_histogram(&uplink_statistics, action);
        action
    } else if ingress_ifindex == unsafe { core::ptr::read_volatile(&n6_ifindex) } {
        let action = downlink(&ctx);
        bump_action_histogram(&downlink_statistics, action);
        action
    } else {
        Action::Pass
    };
    finish(action)
}

#[inline(always)]
fn finish(action: Action) -> u32 {
    match action {
        Action::Redirect(ifindex) => unsafe { aya_ebpf::helpers::bpf_redirect(ifindex, 0) as u32 },
        other => other.to_xdp(),
    }
}

/// §6: "Each [action] is histogrammed per-CPU." Drop has its own more
/// specific counters (`FAR_MISS`, `GATE_CLOSED_DROPS`, ...) bumped at the
/// point of decision; this only tracks the three outcomes that otherwise
/// have no dedicated counter, plus the catch-all `ABORTED`.
#[inline(always)]
fn bump_action_histogram(table: &PerCpuArray<UpfStatistic>, action: Action) {
    match action {
        Action::Pass => bump_stat(table, stat_index::XDP_PASS),
        Action::Tx => bump_stat(table, stat_index::XDP_TX),
        Action::Redirect(_) => bump_stat(table, stat_index::XDP_REDIRECT),
        Action::Aborted => bump_stat(table, stat_index::XDP_ABORTED),
        Action::Drop => {}
    }
}

// ── Uplink (N3) pipeline ─────────────────────────────────────────────────────

fn uplink(ctx: &XdpContext) -> Action {
    bump_stat(&uplink_statistics, stat_index::UPLINK_PACKETS);

    let eth = match parse_eth(ctx) {
        Some(e) => e,
        None => {
            bump_stat(&uplink_statistics, stat_index::MALFORMED_PACKETS);
            return Action::Pass;
        }
    };
    if eth.eth_type != ETH_P_IP {
        return Action::Pass;
    }

    let ip = match unsafe { ptr_at::<Ipv4Hdr>(ctx, eth.offset) } {
        Some(p) => p,
        None => {
            bump_stat(&uplink_statistics, stat_index::MALFORMED_PACKETS);
            return Action::Pass;
        }
    };
    let ip_hdr_len = unsafe { (*ip).ihl() as usize * 4 };
    if ip_hdr_len < mem::size_of::<Ipv4Hdr>() {
        bump_stat(&uplink_statistics, stat_index::MALFORMED_PACKETS);
        return Action::Pass;
    }
    if unsafe { (*ip).protocol } != IPPROTO_UDP {
        return Action::Pass;
    }
    let udp_offset = eth.offset + ip_hdr_len;
    let udp = match unsafe { ptr_at::<UdpHdr>(ctx, udp_offset) } {
        Some(p) => p,
        None => {
            bump_stat(&uplink_statistics, stat_index::MALFORMED_PACKETS);
            return Action::Pass;
        }
    };
    if u16::from_be(unsafe { (*udp).dest }) != GTP_U_PORT {
        return Action::Pass;
    }

    let gtp_offset = udp_offset + mem::size_of::<UdpHdr>();
    let gtp = match unsafe { ptr_at::<GtpHdr>(ctx, gtp_offset) } {
        Some(p) => p,
        None => {
            bump_stat(&uplink_statistics, stat_index::MALFORMED_PACKETS);
            return Action::Pass;
        }
    };
    let msg_type = unsafe { (*gtp).message_type };

    match msg_type {
        GTP_MSG_ECHO_REQUEST => return uplink_echo_reply(ctx, eth.offset, gtp_offset),
        GTP_MSG_GPDU => {}
        _ => return Action::Pass,
    }

    let teid = u32::from_be(unsafe { (*gtp).teid });
    let pdr = match unsafe { pdrs_uplink.get(&teid) } {
        Some(p) => *p,
        None => {
            bump_stat(&uplink_statistics, stat_index::PDR_MISS);
            return Action::Pass;
        }
    };

    // §4.3.4: MTU pre-check accounting for the encap removed on decap.
    let egress_ifindex = unsafe { core::ptr::read_volatile(&n6_ifindex) };
    let mut egress_mtu = 0u32;
    let mtu_ret = unsafe {
        aya_ebpf::helpers::bpf_check_mtu(
            ctx.ctx as *mut core::ffi::c_void,
            egress_ifindex,
            &mut egress_mtu as *mut u32,
            -(GTP_ENCAP_SIZE as i32),
            0,
        )
    };
    if mtu_ret == aya_ebpf::bindings::BPF_MTU_CHK_RET_FRAG_NEEDED as i32 {
        return emit_frag_needed(ctx, eth.offset, gtp_offset + mem::size_of::<GtpHdr>(), egress_mtu);
    } else if mtu_ret < 0 {
        return Action::Aborted;
    }

    let inner_offset = gtp_offset + mem::size_of::<GtpHdr>();

    // §4.3.5: SDF classification against the inner packet's 5-tuple.
    let resolved = match resolve_sdf(ctx, inner_offset, &pdr) {
        SdfOutcome::Resolved(binding) => binding,
        SdfOutcome::Drop => {
            bump_stat(&uplink_statistics, stat_index::SDF_NO_MATCH_DROPS);
            return Action::Drop;
        }
    };

    let far = match unsafe { far_map.get(&resolved.far_id) } {
        Some(f) => *f,
        None => {
            bump_stat(&uplink_statistics, stat_index::FAR_MISS);
            return Action::Drop;
        }
    };
    if far.action_mask & far::action::FORWARD == 0 {
        return Action::Drop;
    }

    let qer = match unsafe { qer_map.get(&resolved.qer_id) } {
        Some(q) => *q,
        None => {
            bump_stat(&uplink_statistics, stat_index::QER_MISS);
            return Action::Drop;
        }
    };
    if qer.gate_status_ul != GATE_OPEN {
        bump_stat(&uplink_statistics, stat_index::GATE_CLOSED_DROPS);
        return Action::Drop;
    }

    let frame_len = ctx.data_end() - ctx.data();
    if !check_rate_limit(&resolved.qer_id, qer.window_start_ns_ul, qer.maximum_bitrate_ul_bps, frame_len as u32, true)
    {
        bump_stat(&uplink_statistics, stat_index::RATE_LIMIT_DROPS);
        return Action::Drop;
    }

    // §4.3.8: decap or re-encap, per outer_header_creation vs outer_header_removal.
    if far.outer_header_creation == OuterHeaderCreation::GtpUUdpIpv4 as u8 {
        if rewrite_outer_tunnel_ipv4(ctx, eth.offset, gtp_offset, udp_offset, &far).is_none() {
            return Action::Aborted;
        }
    } else if resolved.outer_header_removal == far::OuterHeaderRemoval::GtpUUdpIpv4 as u8 {
        if decap_gtp_ipv4(ctx, gtp_offset + mem::size_of::<GtpHdr>(), eth.offset).is_none() {
            return Action::Aborted;
        }
    }

    bump_stat_by(&uplink_statistics, stat_index::UPLINK_BYTES, frame_len as u64);
    if resolved.urr_id != 0 {
        add_urr(resolved.urr_id, frame_len as u64, true);
    }

    if unsafe { core::ptr::read_volatile(&masquerade) } != 0 {
        if let Some(()) = apply_source_nat(ctx, mem::size_of::<EthHdr>()) {
            // translated in place
        } else {
            bump_stat(&uplink_statistics, stat_index::NAT_PORT_EXHAUSTED);
            return Action::Drop;
        }
    }

    account_flow(ctx, mem::size_of::<EthHdr>(), ctx.ingress_ifindex(), egress_ifindex);

    route(ctx, mem::size_of::<EthHdr>(), true)
}

#[inline(always)]
fn uplink_echo_reply(ctx: &XdpContext, eth_offset: usize, gtp_offset: usize) -> Action {
    let eth = match unsafe { ptr_at::<EthHdr>(ctx, 0) } {
        Some(p) => p,
        None => return Action::Pass,
    };
    unsafe {
        core::mem::swap(&mut (*eth).h_dest, &mut (*eth).h_source);
    }
    let ip = match unsafe { ptr_at::<Ipv4Hdr>(ctx, eth_offset) } {
        Some(p) => p,
        None => return Action::Pass,
    };
    unsafe {
        let tmp = (*ip).saddr;
        (*ip).saddr = (*ip).daddr;
        (*ip).daddr = tmp;
        (*ip).check = 0;
        (*ip).check = csum::checksum(core::slice::from_raw_parts(ip as *const u8, mem::size_of::<Ipv4Hdr>()))
            .to_be();
    }
    let gtp = match unsafe { ptr_at::<GtpHdr>(ctx, gtp_offset) } {
        Some(p) => p,
        None => return Action::Pass,
    };
    unsafe { (*gtp).message_type = GTP_MSG_ECHO_RESPONSE };
    bump_stat(&uplink_statistics, stat_index::GTP_ECHO_REPLIES);
    Action::Tx
}

// ── Downlink (N6) pipeline ───────────────────────────────────────────────────

fn downlink(ctx: &XdpContext) -> Action {
    bump_stat(&downlink_statistics, stat_index::DOWNLINK_PACKETS);

    let eth = match parse_eth(ctx) {
        Some(e) => e,
        None => {
            bump_stat(&downlink_statistics, stat_index::MALFORMED_PACKETS);
            return Action::Pass;
        }
    };

    if eth.eth_type == ETH_P_IPV6 {
        return downlink_ipv6(ctx, eth.offset);
    }
    if eth.eth_type != ETH_P_IP {
        return Action::Pass;
    }

    let ip = match unsafe { ptr_at::<Ipv4Hdr>(ctx, eth.offset) } {
        Some(p) => p,
        None => {
            bump_stat(&downlink_statistics, stat_index::MALFORMED_PACKETS);
            return Action::Pass;
        }
    };
    let ip_hdr_len = unsafe { (*ip).ihl() as usize * 4 };
    if ip_hdr_len < mem::size_of::<Ipv4Hdr>() {
        bump_stat(&downlink_statistics, stat_index::MALFORMED_PACKETS);
        return Action::Pass;
    }

    if unsafe { core::ptr::read_volatile(&masquerade) } != 0 {
        apply_destination_nat(ctx, eth.offset, ip_hdr_len);
    }

    let dst_ip = unsafe { (*ip).daddr };
    let pdr = match unsafe { pdrs_downlink_ip4.get(&u32::from_be(dst_ip)) } {
        Some(p) => *p,
        None => {
            bump_stat(&downlink_statistics, stat_index::PDR_MISS);
            return Action::Pass;
        }
    };

    let resolved = match resolve_sdf(ctx, eth.offset, &pdr) {
        SdfOutcome::Resolved(binding) => binding,
        SdfOutcome::Drop => {
            bump_stat(&downlink_statistics, stat_index::SDF_NO_MATCH_DROPS);
            return Action::Drop;
        }
    };

    let far = match unsafe { far_map.get(&resolved.far_id) } {
        Some(f) => *f,
        None => {
            bump_stat(&downlink_statistics, stat_index::FAR_MISS);
            return Action::Drop;
        }
    };

    if far.action_mask & (far::action::BUFFER | far::action::NOTIFY_CP) != 0 {
        notify_cp(&pdr, resolved.qer_id);
        return Action::Drop;
    }
    if far.action_mask & far::action::FORWARD == 0 {
        return Action::Drop;
    }
    if far.outer_header_creation != OuterHeaderCreation::GtpUUdpIpv4 as u8 {
        return Action::Drop;
    }

    let qer = match unsafe { qer_map.get(&resolved.qer_id) } {
        Some(q) => *q,
        None => {
            bump_stat(&downlink_statistics, stat_index::QER_MISS);
            return Action::Drop;
        }
    };
    if qer.gate_status_dl != GATE_OPEN {
        bump_stat(&downlink_statistics, stat_index::GATE_CLOSED_DROPS);
        return Action::Drop;
    }

    let inner_len = unsafe { u16::from_be((*ip).tot_len) } as u32;
    if !check_rate_limit(&resolved.qer_id, qer.window_start_ns_dl, qer.maximum_bitrate_dl_bps, inner_len, false) {
        bump_stat(&downlink_statistics, stat_index::RATE_LIMIT_DROPS);
        return Action::Drop;
    }

    if encap_gtp_ipv4(ctx, eth.offset, &far, qer.qfi).is_none() {
        return Action::Aborted;
    }

    let frame_len = ctx.data_end() - ctx.data();
    bump_stat_by(&downlink_statistics, stat_index::DOWNLINK_BYTES, frame_len as u64);
    if resolved.urr_id != 0 {
        add_urr(resolved.urr_id, frame_len as u64, false);
    }

    account_flow(ctx, mem::size_of::<EthHdr>(), ctx.ingress_ifindex(), unsafe {
        core::ptr::read_volatile(&n3_ifindex)
    });

    route(ctx, mem::size_of::<EthHdr>(), false)
}

/// §4.4 for IPv6-destined downlink traffic: ICMPv6 (neighbor discovery and
/// friends) is left to the kernel stack; anything else is matched against
/// `pdrs_downlink_ip6` and run through the same SDF/FAR/QER pipeline as the
/// IPv4 path. NAT is IPv4-only and skipped here. GTP-U-over-IPv6 tunnel
/// encapsulation is unsupported, so a resolved FAR that isn't plain
/// N6-forwarding (`outer_header_creation == None`) is dropped rather than
/// attempted.
fn downlink_ipv6(ctx: &XdpContext, eth_offset: usize) -> Action {
    let ip = match unsafe { ptr_at::<Ipv6Hdr>(ctx, eth_offset) } {
        Some(p) => p,
        None => {
            bump_stat(&downlink_statistics, stat_index::MALFORMED_PACKETS);
            return Action::Pass;
        }
    };
    let next_header = unsafe { (*ip).next_header };
    if next_header == IPPROTO_ICMPV6 {
        return Action::Pass;
    }

    let dst_addr6 = unsafe { (*ip).daddr };
    let pdr = match unsafe { pdrs_downlink_ip6.get(&dst_addr6) } {
        Some(p) => *p,
        None => {
            bump_stat(&downlink_statistics, stat_index::PDR_MISS);
            return Action::Pass;
        }
    };

    let resolved = match resolve_sdf(ctx, eth_offset, &pdr) {
        SdfOutcome::Resolved(binding) => binding,
        SdfOutcome::Drop => {
            bump_stat(&downlink_statistics, stat_index::SDF_NO_MATCH_DROPS);
            return Action::Drop;
        }
    };

    let far = match unsafe { far_map.get(&resolved.far_id) } {
        Some(f) => *f,
        None => {
            bump_stat(&downlink_statistics, stat_index::FAR_MISS);
            return Action::Drop;
        }
    };

    if far.action_mask & (far::action::BUFFER | far::action::NOTIFY_CP) != 0 {
        notify_cp(&pdr, resolved.qer_id);
        return Action::Drop;
    }
    if far.action_mask & far::action::FORWARD == 0 {
        return Action::Drop;
    }
    if far.outer_header_creation != OuterHeaderCreation::None as u8 {
        return Action::Drop;
    }

    let qer = match unsafe { qer_map.get(&resolved.qer_id) } {
        Some(q) => *q,
        None => {
            bump_stat(&downlink_statistics, stat_index::QER_MISS);
            return Action::Drop;
        }
    };
    if qer.gate_status_dl != GATE_OPEN {
        bump_stat(&downlink_statistics, stat_index::GATE_CLOSED_DROPS);
        return Action::Drop;
    }

    let payload_len = unsafe { u16::from_be((*ip).payload_len) } as u32 + mem::size_of::<Ipv6Hdr>() as u32;
    if !check_rate_limit(&resolved.qer_id, qer.window_start_ns_dl, qer.maximum_bitrate_dl_bps, payload_len, false) {
        bump_stat(&downlink_statistics, stat_index::RATE_LIMIT_DROPS);
        return Action::Drop;
    }

    let frame_len = ctx.data_end() - ctx.data();
    bump_stat_by(&downlink_statistics, stat_index::DOWNLINK_BYTES, frame_len as u64);
    if resolved.urr_id != 0 {
        add_urr(resolved.urr_id, frame_len as u64, false);
    }

    route(ctx, eth_offset, false)
}

// ── SDF resolution glue ──────────────────────────────────────────────────────

enum SdfOutcome {
    Resolved(pdr::ResolvedBinding),
    Drop,
}

#[inline(always)]
fn resolve_sdf(ctx: &XdpContext, inner_offset: usize, pdr_info: &PdrInfo) -> SdfOutcome {
    if pdr_info.sdf_mode == pdr::sdf_mode::NONE {
        return SdfOutcome::Resolved(pdr::ResolvedBinding {
            far_id: pdr_info.far_id,
            qer_id: pdr_info.qer_id,
            urr_id: pdr_info.urr_id,
            outer_header_removal: pdr_info.outer_header_removal,
        });
    }

    let tuple = match build_five_tuple_view(ctx, inner_offset) {
        Some(t) => t,
        None => {
            return if pdr_info.sdf_mode == pdr::sdf_mode::SDF_WITH_DEFAULT {
                SdfOutcome::Resolved(pdr::ResolvedBinding {
                    far_id: pdr_info.far_id,
                    qer_id: pdr_info.qer_id,
                    urr_id: pdr_info.urr_id,
                    outer_header_removal: pdr_info.outer_header_removal,
                })
            } else {
                SdfOutcome::Drop
            };
        }
    };

    match pdr::resolve(pdr_info, |filter| sdf::matches(filter, &tuple)) {
        Some(binding) => SdfOutcome::Resolved(binding),
        None => SdfOutcome::Drop,
    }
}

#[inline(always)]
fn build_five_tuple_view(ctx: &XdpContext, offset: usize) -> Option<FiveTupleView> {
    let first_byte = unsafe { byte_at(ctx, offset)? };
    let version = first_byte >> 4;

    if version == 4 {
        let ip = unsafe { ptr_at::<Ipv4Hdr>(ctx, offset)? };
        let ihl = unsafe { (*ip).ihl() as usize * 4 };
        if ihl < mem::size_of::<Ipv4Hdr>() {
            return None;
        }
        let proto = unsafe { (*ip).protocol };
        let (src_port, dst_port) = read_ports(ctx, offset + ihl, proto)?;
        Some(FiveTupleView {
            is_ipv6: false,
            src_addr: u32::from_be(unsafe { (*ip).saddr }),
            dst_addr: u32::from_be(unsafe { (*ip).daddr }),
            src_addr6: [0; 16],
            dst_addr6: [0; 16],
            src_port,
            dst_port,
            proto,
        })
    } else if version == 6 {
        let ip = unsafe { ptr_at::<Ipv6Hdr>(ctx, offset)? };
        let proto = unsafe { (*ip).next_header };
        let (src_port, dst_port) = read_ports(ctx, offset + mem::size_of::<Ipv6Hdr>(), proto)?;
        Some(FiveTupleView {
            is_ipv6: true,
            src_addr: 0,
            dst_addr: 0,
            src_addr6: unsafe { (*ip).saddr },
            dst_addr6: unsafe { (*ip).daddr },
            src_port,
            dst_port,
            proto,
        })
    } else {
        None
    }
}

#[inline(always)]
fn read_ports(ctx: &XdpContext, l4_offset: usize, proto: u8) -> Option<(u16, u16)> {
    match proto {
        IPPROTO_TCP => {
            let tcp = unsafe { ptr_at::<TcpHdr>(ctx, l4_offset)? };
            Some((u16::from_be(unsafe { (*tcp).source }), u16::from_be(unsafe { (*tcp).dest })))
        }
        IPPROTO_UDP => {
            let udp = unsafe { ptr_at::<UdpHdr>(ctx, l4_offset)? };
            Some((u16::from_be(unsafe { (*udp).source }), u16::from_be(unsafe { (*udp).dest })))
        }
        IPPROTO_ICMP | IPPROTO_ICMPV6 => {
            let icmp = unsafe { ptr_at::<IcmpHdr>(ctx, l4_offset)? };
            let id = u16::from_be_bytes([unsafe { (*icmp).un[0] }, unsafe { (*icmp).un[1] }]);
            Some((id, id))
        }
        _ => Some((0, 0)),
    }
}

// ── Rate limiter glue ────────────────────────────────────────────────────────

#[inline(always)]
fn check_rate_limit(qer_id: &u32, window_start_ns: u64, mbr_bps: u64, packet_bytes: u32, uplink: bool) -> bool {
    let now = unsafe { bpf_ktime_get_ns() };
    match ratelimit::evaluate(window_start_ns, now, packet_bytes, mbr_bps) {
        ratelimit::Verdict::Drop => false,
        ratelimit::Verdict::Accept { new_window_start_ns } => {
            // §4.6: other CPUs may be racing on the same QER; the map's
            // native atomic insert overwrites rather than CAS-loops, so on
            // contention the later writer simply wins (accept-on-contention).
            if let Some(qer) = unsafe { qer_map.get_ptr_mut(qer_id) } {
                unsafe {
                    if uplink {
                        (*qer).window_start_ns_ul = new_window_start_ns;
                    } else {
                        (*qer).window_start_ns_dl = new_window_start_ns;
                    }
                }
            }
            true
        }
    }
}

// ── URR accounting ───────────────────────────────────────────────────────────

#[inline(always)]
fn add_urr(urr_id: u32, bytes: u64, uplink: bool) {
    if let Some(ptr) = urr_map.get_ptr_mut(urr_id) {
        unsafe {
            if uplink {
                (*ptr).add_uplink(bytes);
            } else {
                (*ptr).add_downlink(bytes);
            }
        }
    }
}

// ── Flow accounting ──────────────────────────────────────────────────────────

/// Field-for-field match of `utils/flow.h`'s `account_flow()`: keyed on the
/// current IPv4 5-tuple plus ingress/egress ifindex and ToS, updating the
/// flow's packet/byte counters and last-seen timestamp (inserting a fresh
/// entry on first sight). IPv6 packets are not accounted, matching the
/// reference schema's IPv4-only `struct flow`. A benign, non-atomic
/// read-modify-write: concurrent updates to the same flow may lose a count,
/// the same tradeoff already accepted for URR and rate-limiter counters.
#[inline(always)]
fn account_flow(ctx: &XdpContext, ip_offset: usize, ingress_ifindex: u32, egress_ifindex: u32) {
    if unsafe { core::ptr::read_volatile(&flowact) } == 0 {
        return;
    }
    let first_byte = match unsafe { byte_at(ctx, ip_offset) } {
        Some(b) => b,
        None => return,
    };
    if first_byte >> 4 != 4 {
        return;
    }
    let ip = match unsafe { ptr_at::<Ipv4Hdr>(ctx, ip_offset) } {
        Some(p) => p,
        None => return,
    };
    let ihl = unsafe { (*ip).ihl() as usize * 4 };
    if ihl < mem::size_of::<Ipv4Hdr>() {
        return;
    }
    let proto = unsafe { (*ip).protocol };
    let tos = unsafe { (*ip).tos };
    let saddr = unsafe { (*ip).saddr };
    let daddr = unsafe { (*ip).daddr };
    let l4_offset = ip_offset + ihl;

    let key = match proto {
        IPPROTO_TCP => {
            let tcp = match unsafe { ptr_at::<TcpHdr>(ctx, l4_offset) } {
                Some(p) => p,
                None => return,
            };
            FlowKey::tcp_udp(saddr, daddr, unsafe { (*tcp).source }, unsafe { (*tcp).dest }, proto, tos, ingress_ifindex, egress_ifindex)
        }
        IPPROTO_UDP => {
            let udp = match unsafe { ptr_at::<UdpHdr>(ctx, l4_offset) } {
                Some(p) => p,
                None => return,
            };
            FlowKey::tcp_udp(saddr, daddr, unsafe { (*udp).source }, unsafe { (*udp).dest }, proto, tos, ingress_ifindex, egress_ifindex)
        }
        IPPROTO_ICMP => {
            let icmp = match unsafe { ptr_at::<IcmpHdr>(ctx, l4_offset) } {
                Some(p) => p,
                None => return,
            };
            let icmp_type = unsafe { (*icmp).icmp_type };
            let icmp_code = unsafe { (*icmp).code };
            if matches!(icmp_type, ICMP_ECHO | ICMP_ECHOREPLY | ICMP_TIMESTAMP | ICMP_TIMESTAMPREPLY) {
                let id = u16::from_be_bytes([unsafe { (*icmp).un[0] }, unsafe { (*icmp).un[1] }]);
                FlowKey::icmp(saddr, daddr, id, icmp_type, 0, proto, tos, ingress_ifindex, egress_ifindex)
            } else {
                FlowKey::icmp(saddr, daddr, 0, icmp_type, icmp_code, proto, tos, ingress_ifindex, egress_ifindex)
            }
        }
        _ => FlowKey::tcp_udp(saddr, daddr, 0, 0, proto, tos, ingress_ifindex, egress_ifindex),
    };

    let now = unsafe { bpf_ktime_get_ns() };
    let bytes = (ctx.data_end() - ctx.data()) as u64;

    if let Some(ptr) = unsafe { flow_stats.get_ptr_mut(&key) } {
        unsafe { (*ptr).record(bytes, now) };
        return;
    }
    let _ = unsafe { flow_stats.insert(&key, &FlowStats::start(now, bytes), 0) };
}

// ── CP notification ──────────────────────────────────────────────────────────

#[inline(always)]
fn notify_cp(pdr_info: &PdrInfo, qer_id: u32) {
    let qfi = unsafe { qer_map.get(&qer_id) }.map(|q| q.qfi).unwrap_or(0);
    let record = CpNotification {
        local_seid: pdr_info.local_seid,
        pdr_id: pdr_info.pdr_id,
        qfi,
        _pad: [0; 3],
    };
    if let Some(mut entry) = nocp_map.reserve::<CpNotification>(0) {
        entry.write(record);
        entry.submit(0);
    }
}

// ── GTP tunnel operations ────────────────────────────────────────────────────

#[inline(always)]
fn decap_gtp_ipv4(ctx: &XdpContext, inner_offset: usize, eth_offset: usize) -> Option<()> {
    let shrink = (inner_offset - eth_offset) as usize;
    // The bytes before the new front (`inner_offset`) are dropped by
    // `bpf_xdp_adjust_head` and unreadable afterwards, so the Ethernet
    // header has to be relocated to where the new front will land *before*
    // shrinking, not re-derived after like `encap_gtp_ipv4`'s grow does.
    let orig_eth = unsafe { ptr_at::<EthHdr>(ctx, eth_offset)? };
    let dest_eth = unsafe { ptr_at::<EthHdr>(ctx, inner_offset)? };
    unsafe { core::ptr::copy(orig_eth as *const u8, dest_eth as *mut u8, mem::size_of::<EthHdr>()) };
    if unsafe { bpf_xdp_adjust_head(ctx.ctx, shrink as i32) } != 0 {
        return None;
    }
    // Pointers above are now invalid; nothing further in this call reuses them.
    Some(())
}

#[inline(always)]
fn encap_gtp_ipv4(ctx: &XdpContext, eth_offset: usize, far: &FarInfo, qfi: u8) -> Option<()> {
    let grow = GTP_ENCAP_SIZE as i32 + if qfi != 0 { GTP_PDU_SESSION_EXT_SIZE as i32 } else { 0 };
    let inner_tot_len = {
        let ip = unsafe { ptr_at::<Ipv4Hdr>(ctx, eth_offset)? };
        u16::from_be(unsafe { (*ip).tot_len }) as usize
    };

    if unsafe { bpf_xdp_adjust_head(ctx.ctx, -grow) } != 0 {
        return None;
    }

    // Re-derive every pointer after the head adjust (verifier requirement).
    let new_eth_offset = 0usize;
    let new_ip_offset = new_eth_offset + mem::size_of::<EthHdr>();
    let new_udp_offset = new_ip_offset + mem::size_of::<Ipv4Hdr>();
    let new_gtp_offset = new_udp_offset + mem::size_of::<UdpHdr>();

    let orig_eth = unsafe { ptr_at::<EthHdr>(ctx, new_eth_offset)? };
    let shifted_eth = unsafe { ptr_at::<EthHdr>(ctx, grow as usize)? };
    unsafe { core::ptr::copy(shifted_eth as *const u8, orig_eth as *mut u8, mem::size_of::<EthHdr>()) };

    let ip = unsafe { ptr_at::<Ipv4Hdr>(ctx, new_ip_offset)? };
    let gtp_len = mem::size_of::<GtpHdr>() + if qfi != 0 { GTP_PDU_SESSION_EXT_SIZE } else { 0 };
    unsafe {
        (*ip).version_ihl = 0x45;
        (*ip).tos = (far.transport_level_marking >> 8) as u8;
        (*ip).tot_len = ((mem::size_of::<Ipv4Hdr>() + mem::size_of::<UdpHdr>() + gtp_len + inner_tot_len) as u16)
            .to_be();
        (*ip).id = 0;
        (*ip).frag_off = 0;
        (*ip).ttl = 64;
        (*ip).protocol = IPPROTO_UDP;
        (*ip).check = 0;
        (*ip).saddr = far.tunnel_src_addr.to_be();
        (*ip).daddr = far.tunnel_dst_addr.to_be();
    }

    let udp = unsafe { ptr_at::<UdpHdr>(ctx, new_udp_offset)? };
    unsafe {
        (*udp).source = GTP_U_PORT.to_be();
        (*udp).dest = GTP_U_PORT.to_be();
        (*udp).len = ((mem::size_of::<UdpHdr>() + gtp_len + inner_tot_len) as u16).to_be();
        (*udp).check = 0;
    }

    let gtp = unsafe { ptr_at::<GtpHdr>(ctx, new_gtp_offset)? };
    unsafe {
        (*gtp).flags = if qfi != 0 { 0b0011_0100 } else { 0b0011_0000 };
        (*gtp).message_type = GTP_MSG_GPDU;
        (*gtp).length = ((inner_tot_len + if qfi != 0 { GTP_PDU_SESSION_EXT_SIZE } else { 0 }) as u16).to_be();
        (*gtp).teid = far.teid.to_be();
    }

    if qfi != 0 {
        // Setting E forces the 4-byte optional field (sequence number,
        // N-PDU number, next extension header type) to be present ahead of
        // any extension header, per §6's wire format.
        let opt_offset = new_gtp_offset + mem::size_of::<GtpHdr>();
        if let Some(opt) = unsafe { ptr_at::<[u8; 4]>(ctx, opt_offset) } {
            unsafe {
                (*opt)[0] = 0; // sequence number, hi byte
                (*opt)[1] = 0; // sequence number, lo byte
                (*opt)[2] = 0; // N-PDU number
                (*opt)[3] = GTP_EXT_PDU_SESSION_CONTAINER; // next extension header type
            }
        }
        let ext_offset = opt_offset + 4;
        if let Some(ext) = unsafe { ptr_at::<[u8; 4]>(ctx, ext_offset) } {
            unsafe {
                (*ext)[0] = 1; // extension header length, 4-byte units
                (*ext)[1] = PDU_SESSION_TYPE_DOWNLINK << 4;
                (*ext)[2] = qfi & 0x3F;
                (*ext)[3] = 0; // no further extension headers
            }
        }
        if let Some(g) = unsafe { ptr_at::<GtpHdr>(ctx, new_gtp_offset) } {
            unsafe { (*g).flags |= 0b0000_0100 };
        }
    }

    let ip = unsafe { ptr_at::<Ipv4Hdr>(ctx, new_ip_offset)? };
    unsafe {
        (*ip).check =
            csum::checksum(core::slice::from_raw_parts(ip as *const u8, mem::size_of::<Ipv4Hdr>())).to_be();
    }

    Some(())
}

#[inline(always)]
fn rewrite_outer_tunnel_ipv4(
    ctx: &XdpContext,
    _eth_offset: usize,
    gtp_offset: usize,
    udp_offset: usize,
    far: &FarInfo,
) -> Option<()> {
    let ip_offset = udp_offset - mem::size_of::<Ipv4Hdr>();
    let ip = unsafe { ptr_at::<Ipv4Hdr>(ctx, ip_offset)? };
    let gtp = unsafe { ptr_at::<GtpHdr>(ctx, gtp_offset)? };

    unsafe {
        let orig_saddr = (*ip).saddr;
        let orig_daddr = (*ip).daddr;
        (*ip).saddr = far.tunnel_src_addr.to_be();
        (*ip).daddr = far.tunnel_dst_addr.to_be();
        (*ip).check =
            csum::update_u32(u16::from_be((*ip).check), u32::from_be(orig_saddr), far.tunnel_src_addr).to_be();
        (*ip).check =
            csum::update_u32(u16::from_be((*ip).check), u32::from_be(orig_daddr), far.tunnel_dst_addr).to_be();
        (*gtp).teid = far.teid.to_be();
    }
    Some(())
}

// ── NAT engine ────────────────────────────────────────────────────────────────

/// §4.3.10: resolve the FIB-chosen source address for the N6 egress side and
/// rewrite the packet to masquerade behind it. A dedicated `bpf_fib_lookup`
/// call with the `SRC` flag stands in for the reference pipeline's "resolve
/// source address" probe; the later `route()` call still performs the
/// ordinary (MAC-resolving) lookup for the actual forwarding decision.
#[inline(always)]
fn apply_source_nat(ctx: &XdpContext, eth_offset: usize) -> Option<()> {
    let ip = unsafe { ptr_at::<Ipv4Hdr>(ctx, eth_offset)? };
    let proto = unsafe { (*ip).protocol };
    if proto != IPPROTO_TCP && proto != IPPROTO_UDP && proto != IPPROTO_ICMP {
        return Some(());
    }

    let mut fib_params: BpfFibLookup = unsafe { mem::zeroed() };
    fib_params.family = 2; // AF_INET
    fib_params.__bindgen_anon_1.tos = unsafe { (*ip).tos };
    fib_params.l4_protocol = proto;
    fib_params.tot_len = unsafe { u16::from_be((*ip).tot_len) as u32 };
    fib_params.ifindex = unsafe { core::ptr::read_volatile(&n6_ifindex) };
    fib_params.__bindgen_anon_3.ipv4_src = unsafe { (*ip).saddr };
    fib_params.__bindgen_anon_4.ipv4_dst = unsafe { (*ip).daddr };

    let ret = unsafe {
        bpf_fib_lookup(
            ctx.ctx as *mut core::ffi::c_void,
            &mut fib_params as *mut _,
            mem::size_of::<BpfFibLookup>() as i32,
            BPF_FIB_LOOKUP_OUTPUT | BPF_FIB_LOOKUP_SRC,
        )
    };
    // Anything other than a clean resolve (including NO_NEIGH, which still
    // fills in ipv4_src) leaves the packet untranslated; the normal routing
    // path below still applies and may itself drop it.
    if ret != 0 && ret != 1 {
        return Some(());
    }
    let new_src = unsafe { fib_params.__bindgen_anon_3.ipv4_src };
    source_nat_rewrite(ctx, eth_offset, new_src)
}

#[inline(always)]
fn source_nat_rewrite(ctx: &XdpContext, eth_offset: usize, new_src: u32) -> Option<()> {
    let ip_offset = eth_offset;
    let ip = unsafe { ptr_at::<Ipv4Hdr>(ctx, ip_offset)? };
    let ihl = unsafe { (*ip).ihl() as usize * 4 };
    let orig_src = unsafe { (*ip).saddr };
    if orig_src == new_src {
        return Some(());
    }
    let proto = unsafe { (*ip).protocol };
    unsafe {
        (*ip).saddr = new_src;
        (*ip).check =
            csum::update_u32(u16::from_be((*ip).check), u32::from_be(orig_src), u32::from_be(new_src)).to_be();
    }

    let l4_offset = ip_offset + ihl;
    let daddr = unsafe { (*ip).daddr };
    let orig_tuple;
    let mut new_sport = 0u16;

    match proto {
        IPPROTO_TCP => {
            let tcp = unsafe { ptr_at::<TcpHdr>(ctx, l4_offset)? };
            unsafe {
                (*tcp).check = csum::update_u32(
                    u16::from_be((*tcp).check),
                    u32::from_be(orig_src),
                    u32::from_be(new_src),
                )
                .to_be();
            }
            let sport = u16::from_be(unsafe { (*tcp).source });
            let dport = u16::from_be(unsafe { (*tcp).dest });
            orig_tuple = FiveTuple::tcp_udp(orig_src, daddr, sport, dport, proto);
            new_sport = pick_nat_port(&orig_tuple, new_src)?;
            if new_sport != sport {
                unsafe {
                    (*tcp).check = csum::update_u16(u16::from_be((*tcp).check), sport, new_sport).to_be();
                    (*tcp).source = new_sport.to_be();
                }
            }
        }
        IPPROTO_UDP => {
            let udp = unsafe { ptr_at::<UdpHdr>(ctx, l4_offset)? };
            let sport = u16::from_be(unsafe { (*udp).source });
            let dport = u16::from_be(unsafe { (*udp).dest });
            orig_tuple = FiveTuple::tcp_udp(orig_src, daddr, sport, dport, proto);
            new_sport = pick_nat_port(&orig_tuple, new_src)?;
            unsafe {
                if (*udp).check != 0 {
                    (*udp).check = csum::update_u32(
                        u16::from_be((*udp).check),
                        u32::from_be(orig_src),
                        u32::from_be(new_src),
                    )
                    .to_be();
                    if new_sport != sport {
                        (*udp).check = csum::update_u16(u16::from_be((*udp).check), sport, new_sport).to_be();
                    }
                }
                if new_sport != sport {
                    (*udp).source = new_sport.to_be();
                }
            }
        }
        IPPROTO_ICMP => {
            let icmp = unsafe { ptr_at::<IcmpHdr>(ctx, l4_offset)? };
            let ident = u16::from_be_bytes([unsafe { (*icmp).un[0] }, unsafe { (*icmp).un[1] }]);
            orig_tuple = FiveTuple::icmp(
                orig_src,
                daddr,
                ident,
                unsafe { (*icmp).icmp_type },
                unsafe { (*icmp).code },
                proto,
            );
            new_sport = ident;
        }
        _ => return Some(()),
    }

    let natted = FiveTuple::tcp_udp(new_src, daddr, new_sport, 0, proto);
    let now = unsafe { bpf_ktime_get_ns() };
    unsafe {
        nat_ct.insert(
            &orig_tuple,
            &NatEntry {
                origin: orig_tuple,
                translated_port: new_sport,
                _pad: [0; 6],
            },
            0,
        )
        .ok()?;
        nat_ct.insert(
            &natted,
            &NatEntry {
                origin: orig_tuple,
                translated_port: new_sport,
                _pad: [0; 6],
            },
            0,
        )
        .ok()?;
    }
    let _ = now;
    Some(())
}

#[inline(always)]
fn pick_nat_port(orig: &FiveTuple, new_src: u32) -> Option<u16> {
    if let Some(existing) = unsafe { nat_ct.get(orig) } {
        return Some(existing.translated_port);
    }

    let naive_sport = unsafe { orig.sport.port };
    let naive = FiveTuple::tcp_udp(new_src, orig.dst_addr, naive_sport, 0, orig.proto);
    if unsafe { nat_ct.get(&naive) }.is_none() {
        return Some(naive_sport);
    }

    let mut seed = unsafe { bpf_ktime_get_ns() } as u32;
    for _ in 0..MAX_PORT_ALLOCATION_ATTEMPTS {
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        let candidate_port = 1024u16.wrapping_add((seed >> 16) as u16 % (65535 - 1024));
        let candidate = FiveTuple::tcp_udp(new_src, orig.dst_addr, candidate_port, 0, orig.proto);
        if unsafe { nat_ct.get(&candidate) }.is_none() {
            return Some(candidate_port);
        }
    }
    None
}

#[inline(always)]
fn apply_destination_nat(ctx: &XdpContext, eth_offset: usize, ip_hdr_len: usize) -> Option<()> {
    let ip = unsafe { ptr_at::<Ipv4Hdr>(ctx, eth_offset)? };
    let proto = unsafe { (*ip).protocol };
    let l4_offset = eth_offset + ip_hdr_len;
    let saddr = unsafe { (*ip).saddr };
    let daddr = unsafe { (*ip).daddr };

    let lookup_key = match proto {
        IPPROTO_TCP => {
            let tcp = unsafe { ptr_at::<TcpHdr>(ctx, l4_offset)? };
            let sport = u16::from_be(unsafe { (*tcp).source });
            let dport = u16::from_be(unsafe { (*tcp).dest });
            FiveTuple::tcp_udp(daddr, saddr, dport, sport, proto)
        }
        IPPROTO_UDP => {
            let udp = unsafe { ptr_at::<UdpHdr>(ctx, l4_offset)? };
            let sport = u16::from_be(unsafe { (*udp).source });
            let dport = u16::from_be(unsafe { (*udp).dest });
            FiveTuple::tcp_udp(daddr, saddr, dport, sport, proto)
        }
        IPPROTO_ICMP => {
            let icmp = unsafe { ptr_at::<IcmpHdr>(ctx, l4_offset)? };
            let icmp_type = unsafe { (*icmp).icmp_type };
            // ECHOREPLY/TIMESTAMPREPLY map to their request form for the
            // lookup key; DEST_UNREACH/TIME_EXCEEDED carry an embedded
            // packet instead and are handled separately below.
            let reverse_type = match icmp_type {
                ICMP_ECHOREPLY => ICMP_ECHO,
                ICMP_TIMESTAMPREPLY => ICMP_TIMESTAMP,
                ICMP_DEST_UNREACH | ICMP_TIME_EXCEEDED => {
                    return destination_nat_icmp_embedded(ctx, l4_offset);
                }
                other => other,
            };
            let ident = u16::from_be_bytes([unsafe { (*icmp).un[0] }, unsafe { (*icmp).un[1] }]);
            FiveTuple::icmp(daddr, saddr, ident, reverse_type, 0, proto)
        }
        _ => return Some(()),
    };

    let entry = unsafe { nat_ct.get(&lookup_key)? };
    let orig = entry.origin;
    let new_dst = unsafe { orig.src_addr };
    unsafe {
        let old_dst = (*ip).daddr;
        (*ip).daddr = new_dst;
        (*ip).check = csum::update_u32(u16::from_be((*ip).check), u32::from_be(old_dst), u32::from_be(new_dst)).to_be();
    }

    match proto {
        IPPROTO_TCP => {
            let tcp = unsafe { ptr_at::<TcpHdr>(ctx, l4_offset)? };
            let old_dport = u16::from_be(unsafe { (*tcp).dest });
            let new_dport = unsafe { orig.sport.port };
            unsafe {
                (*tcp).check = csum::update_u16(u16::from_be((*tcp).check), old_dport, new_dport).to_be();
                (*tcp).dest = new_dport.to_be();
            }
        }
        IPPROTO_UDP => {
            let udp = unsafe { ptr_at::<UdpHdr>(ctx, l4_offset)? };
            let old_dport = u16::from_be(unsafe { (*udp).dest });
            let new_dport = unsafe { orig.sport.port };
            unsafe {
                if (*udp).check != 0 {
                    (*udp).check = csum::update_u16(u16::from_be((*udp).check), old_dport, new_dport).to_be();
                }
                (*udp).dest = new_dport.to_be();
            }
        }
        _ => {}
    }

    Some(())
}

#[inline(always)]
fn destination_nat_icmp_embedded(ctx: &XdpContext, icmp_offset: usize) -> Option<()> {
    // Embedded packet layout: original IPv4 header + 8 bytes of its payload,
    // immediately following the 8-byte ICMP header.
    let embedded_ip_offset = icmp_offset + mem::size_of::<IcmpHdr>();
    let embedded_ip = unsafe { ptr_at::<Ipv4Hdr>(ctx, embedded_ip_offset)? };
    let embedded_proto = unsafe { (*embedded_ip).protocol };
    let embedded_ihl = unsafe { (*embedded_ip).ihl() as usize * 4 };
    let embedded_saddr = unsafe { (*embedded_ip).saddr };
    let embedded_daddr = unsafe { (*embedded_ip).daddr };
    let embedded_l4 = embedded_ip_offset + embedded_ihl;

    let (embedded_sport, embedded_dport) = match embedded_proto {
        IPPROTO_TCP => {
            let tcp = unsafe { ptr_at::<TcpHdr>(ctx, embedded_l4)? };
            (u16::from_be(unsafe { (*tcp).source }), u16::from_be(unsafe { (*tcp).dest }))
        }
        IPPROTO_UDP => {
            let udp = unsafe { ptr_at::<UdpHdr>(ctx, embedded_l4)? };
            (u16::from_be(unsafe { (*udp).source }), u16::from_be(unsafe { (*udp).dest }))
        }
        _ => return Some(()),
    };

    // The embedded packet is itself in the "forward" direction as originally
    // sent by the natted host, so its source is the natted tuple.
    let lookup_key = FiveTuple::tcp_udp(embedded_daddr, embedded_saddr, embedded_dport, embedded_sport, embedded_proto);
    let entry = unsafe { nat_ct.get(&lookup_key)? };
    let orig = entry.origin;
    let restored_src = unsafe { orig.src_addr };
    let restored_sport = unsafe { orig.sport.port };

    unsafe {
        let old_src = (*embedded_ip).saddr;
        (*embedded_ip).saddr = restored_src;
        (*embedded_ip).check = 0;
        (*embedded_ip).check =
            csum::checksum(core::slice::from_raw_parts(embedded_ip as *const u8, mem::size_of::<Ipv4Hdr>())).to_be();
        let _ = old_src;
    }

    match embedded_proto {
        IPPROTO_TCP => {
            let tcp = unsafe { ptr_at::<TcpHdr>(ctx, embedded_l4)? };
            unsafe { (*tcp).source = restored_sport.to_be() };
        }
        IPPROTO_UDP => {
            let udp = unsafe { ptr_at::<UdpHdr>(ctx, embedded_l4)? };
            unsafe { (*udp).source = restored_sport.to_be() };
        }
        _ => {}
    }

    // Outer ICMP checksum covers the whole payload (embedded packet
    // included); cheapest correct option under verifier constraints is a
    // full recompute over the ICMP message.
    let icmp = unsafe { ptr_at::<IcmpHdr>(ctx, icmp_offset)? };
    let icmp_len = embedded_ihl + 8 + mem::size_of::<IcmpHdr>();
    unsafe {
        (*icmp).checksum = 0;
        (*icmp).checksum =
            csum::checksum(core::slice::from_raw_parts(icmp as *const u8, icmp_len)).to_be();
    }

    Some(())
}

// ── ICMP "fragmentation needed" synthesis ────────────────────────────────────

/// §4.10. `inner_offset` is where the (too-large) inner IPv4 packet the GTP
/// tunnel was about to carry begins; it is read before any head/tail adjust,
/// then the embedded copy is rebuilt from the saved fields after growing the
/// head to make room for the outer ICMP/IPv4 wrapper.
fn emit_frag_needed(ctx: &XdpContext, eth_offset: usize, inner_offset: usize, egress_mtu: u32) -> Action {
    let inner_ip = match unsafe { ptr_at::<Ipv4Hdr>(ctx, inner_offset) } {
        Some(p) => p,
        None => return Action::Pass,
    };
    if unsafe { (*inner_ip).frag_off } & IP_FLAG_DF.to_be() == 0 {
        return Action::Drop;
    }

    let inner_saddr = unsafe { (*inner_ip).saddr };
    let inner_daddr = unsafe { (*inner_ip).daddr };
    let mut embedded = [0u8; 28]; // IPv4 header (20) + 8 bytes of payload
    for i in 0..28 {
        embedded[i] = match unsafe { byte_at(ctx, inner_offset + i) } {
            Some(b) => b,
            None => return Action::Drop,
        };
    }

    let grow = (mem::size_of::<IcmpHdr>() + mem::size_of::<Ipv4Hdr>()) as i32;
    if unsafe { bpf_xdp_adjust_head(ctx.ctx, -grow) } != 0 {
        return Action::Aborted;
    }

    let new_eth = match unsafe { ptr_at::<EthHdr>(ctx, 0) } {
        Some(p) => p,
        None => return Action::Aborted,
    };
    let shifted_eth = match unsafe { ptr_at::<EthHdr>(ctx, grow as usize) } {
        Some(p) => p,
        None => return Action::Aborted,
    };
    unsafe {
        core::ptr::copy(shifted_eth as *const u8, new_eth as *mut u8, mem::size_of::<EthHdr>());
        core::mem::swap(&mut (*new_eth).h_dest, &mut (*new_eth).h_source);
    }

    let new_ip_offset = eth_offset;
    let new_icmp_offset = new_ip_offset + mem::size_of::<Ipv4Hdr>();
    let total_len = mem::size_of::<Ipv4Hdr>() + mem::size_of::<IcmpHdr>() + 28;

    let ip = match unsafe { ptr_at::<Ipv4Hdr>(ctx, new_ip_offset) } {
        Some(p) => p,
        None => return Action::Aborted,
    };
    unsafe {
        (*ip).version_ihl = 0x45;
        (*ip).tos = 0;
        (*ip).tot_len = (total_len as u16).to_be();
        (*ip).id = 0;
        (*ip).frag_off = 0;
        (*ip).ttl = 64;
        (*ip).protocol = IPPROTO_ICMP;
        (*ip).check = 0;
        (*ip).saddr = inner_daddr; // get_src_ip_addr(original.daddr) approximated via FIB-reverse endpoint
        (*ip).daddr = inner_saddr;
        (*ip).check = csum::checksum(core::slice::from_raw_parts(ip as *const u8, mem::size_of::<Ipv4Hdr>())).to_be();
    }

    let icmp = match unsafe { ptr_at::<IcmpHdr>(ctx, new_icmp_offset) } {
        Some(p) => p,
        None => return Action::Aborted,
    };
    unsafe {
        (*icmp).icmp_type = ICMP_DEST_UNREACH;
        (*icmp).code = ICMP_FRAG_NEEDED_CODE;
        (*icmp).checksum = 0;
        (*icmp).un = [0, 0, (egress_mtu as u16 >> 8) as u8, egress_mtu as u8];
    }

    let embedded_offset = new_icmp_offset + mem::size_of::<IcmpHdr>();
    for (i, b) in embedded.iter().enumerate() {
        if let Some(ptr) = unsafe { ptr_at::<u8>(ctx, embedded_offset + i) } {
            unsafe { *ptr = *b };
        }
    }

    if let Some(icmp) = unsafe { ptr_at::<IcmpHdr>(ctx, new_icmp_offset) } {
        let icmp_len = mem::size_of::<IcmpHdr>() + 28;
        unsafe {
            (*icmp).checksum =
                csum::checksum(core::slice::from_raw_parts(icmp as *const u8, icmp_len)).to_be();
        }
    }

    let current_len = ctx.data_end() - ctx.data();
    let target_len = mem::size_of::<EthHdr>() + total_len;
    if target_len < current_len {
        let shrink = (current_len - target_len) as i32;
        unsafe { bpf_xdp_adjust_tail(ctx.ctx, -shrink) };
    }

    if let Some(ptr) = uplink_route_stats.get_ptr_mut(0) {
        unsafe { (*ptr).frag_needed += 1 };
    }
    Action::Tx
}

// ── Router ───────────────────────────────────────────────────────────────────

fn route(ctx: &XdpContext, eth_offset: usize, from_uplink: bool) -> Action {
    match unsafe { byte_at(ctx, eth_offset) } {
        Some(b) if b >> 4 == 6 => route_ipv6(ctx, eth_offset, from_uplink),
        Some(_) => route_ipv4(ctx, eth_offset, from_uplink),
        None => Action::Aborted,
    }
}

fn route_ipv4(ctx: &XdpContext, eth_offset: usize, from_uplink: bool) -> Action {
    let ip = match unsafe { ptr_at::<Ipv4Hdr>(ctx, eth_offset) } {
        Some(p) => p,
        None => return Action::Aborted,
    };

    let mut fib_params: BpfFibLookup = unsafe { mem::zeroed() };
    fib_params.family = 2; // AF_INET
    fib_params.__bindgen_anon_1.tos = unsafe { (*ip).tos };
    fib_params.l4_protocol = unsafe { (*ip).protocol };
    fib_params.tot_len = unsafe { u16::from_be((*ip).tot_len) as u32 };
    fib_params.ifindex = ctx.ingress_ifindex();
    fib_params.__bindgen_anon_3.ipv4_src = unsafe { (*ip).saddr };
    fib_params.__bindgen_anon_4.ipv4_dst = unsafe { (*ip).daddr };

    let egress_ifindex = if from_uplink {
        unsafe { core::ptr::read_volatile(&n6_ifindex) }
    } else {
        unsafe { core::ptr::read_volatile(&n3_ifindex) }
    };

    let ret = unsafe {
        bpf_fib_lookup(
            ctx.ctx as *mut core::ffi::c_void,
            &mut fib_params as *mut _,
            mem::size_of::<BpfFibLookup>() as i32,
            BPF_FIB_LOOKUP_OUTPUT,
        )
    };

    let route_stats = if from_uplink { &uplink_route_stats } else { &downlink_route_stats };

    match ret {
        0 => {
            if let Some(ptr) = route_stats.get_ptr_mut(0) {
                unsafe { (*ptr).success += 1 };
            }
            if let Some(eth) = unsafe { ptr_at::<EthHdr>(ctx, 0) } {
                unsafe {
                    (*eth).h_dest = fib_params.dmac;
                    (*eth).h_source = fib_params.smac;
                }
            }
            if fib_params.ifindex == ctx.ingress_ifindex() {
                Action::Tx
            } else {
                Action::Redirect(egress_ifindex)
            }
        }
        1 => {
            // BPF_FIB_LKUP_RET_NO_NEIGH
            if let Some(ptr) = route_stats.get_ptr_mut(0) {
                unsafe { (*ptr).no_neigh += 1 };
            }
            if let Some(eth) = unsafe { ptr_at::<EthHdr>(ctx, 0) } {
                unsafe { (*eth).h_dest = [0xFF; 6] };
            }
            let notification = NoNeighNotification {
                ifindex: fib_params.ifindex,
                is_ipv6: 0,
                _pad: [0; 3],
                next_hop_addr: unsafe { fib_params.__bindgen_anon_4.ipv4_dst },
                next_hop_addr6: [0; 16],
            };
            if let Some(mut entry) = no_neigh_map.reserve::<NoNeighNotification>(0) {
                entry.write(notification);
                entry.submit(0);
            }
            Action::Redirect(egress_ifindex)
        }
        2 | 3 | 4 => {
            // BLACKHOLE | UNREACHABLE | PROHIBIT
            if let Some(ptr) = route_stats.get_ptr_mut(0) {
                match ret {
                    2 => unsafe { (*ptr).blackhole += 1 },
                    3 => unsafe { (*ptr).unreachable += 1 },
                    _ => unsafe { (*ptr).prohibit += 1 },
                }
            }
            Action::Drop
        }
        _ => {
            if let Some(ptr) = route_stats.get_ptr_mut(0) {
                unsafe { (*ptr).other_error += 1 };
            }
            Action::Pass
        }
    }
}

/// §4.3.11's IPv6 branch: same FIB-assisted routing and NO_NEIGH handling as
/// [`route_ipv4`], against an `AF_INET6` lookup. Reached only by a
/// GTP-decapsulated IPv6 inner packet on uplink (IPv6 downlink never reaches
/// here, since the only FARs accepted on the IPv6 downlink path forward
/// natively on N6 rather than through the GTP tunnel).
fn route_ipv6(ctx: &XdpContext, eth_offset: usize, from_uplink: bool) -> Action {
    let ip = match unsafe { ptr_at::<Ipv6Hdr>(ctx, eth_offset) } {
        Some(p) => p,
        None => return Action::Aborted,
    };

    let mut fib_params: BpfFibLookup = unsafe { mem::zeroed() };
    fib_params.family = 10; // AF_INET6
    fib_params.l4_protocol = unsafe { (*ip).next_header };
    fib_params.tot_len = unsafe { u16::from_be((*ip).payload_len) as u32 } + mem::size_of::<Ipv6Hdr>() as u32;
    fib_params.ifindex = ctx.ingress_ifindex();
    fib_params.__bindgen_anon_3.ipv6_src = unsafe { addr6_to_u32x4((*ip).saddr) };
    fib_params.__bindgen_anon_4.ipv6_dst = unsafe { addr6_to_u32x4((*ip).daddr) };

    let egress_ifindex = if from_uplink {
        unsafe { core::ptr::read_volatile(&n6_ifindex) }
    } else {
        unsafe { core::ptr::read_volatile(&n3_ifindex) }
    };

    let ret = unsafe {
        bpf_fib_lookup(
            ctx.ctx as *mut core::ffi::c_void,
            &mut fib_params as *mut _,
            mem::size_of::<BpfFibLookup>() as i32,
            BPF_FIB_LOOKUP_OUTPUT,
        )
    };

    let route_stats = if from_uplink { &uplink_route_stats } else { &downlink_route_stats };

    match ret {
        0 => {
            if let Some(ptr) = route_stats.get_ptr_mut(0) {
                unsafe { (*ptr).success += 1 };
            }
            if let Some(eth) = unsafe { ptr_at::<EthHdr>(ctx, 0) } {
                unsafe {
                    (*eth).h_dest = fib_params.dmac;
                    (*eth).h_source = fib_params.smac;
                }
            }
            if fib_params.ifindex == ctx.ingress_ifindex() {
                Action::Tx
            } else {
                Action::Redirect(egress_ifindex)
            }
        }
        1 => {
            if let Some(ptr) = route_stats.get_ptr_mut(0) {
                unsafe { (*ptr).no_neigh += 1 };
            }
            if let Some(eth) = unsafe { ptr_at::<EthHdr>(ctx, 0) } {
                unsafe { (*eth).h_dest = [0xFF; 6] };
            }
            let notification = NoNeighNotification {
                ifindex: fib_params.ifindex,
                is_ipv6: 1,
                _pad: [0; 3],
                next_hop_addr: 0,
                next_hop_addr6: unsafe { u32x4_to_addr6(fib_params.__bindgen_anon_4.ipv6_dst) },
            };
            if let Some(mut entry) = no_neigh_map.reserve::<NoNeighNotification>(0) {
                entry.write(notification);
                entry.submit(0);
            }
            Action::Redirect(egress_ifindex)
        }
        2 | 3 | 4 => {
            if let Some(ptr) = route_stats.get_ptr_mut(0) {
                match ret {
                    2 => unsafe { (*ptr).blackhole += 1 },
                    3 => unsafe { (*ptr).unreachable += 1 },
                    _ => unsafe { (*ptr).prohibit += 1 },
                }
            }
            Action::Drop
        }
        _ => {
            if let Some(ptr) = route_stats.get_ptr_mut(0) {
                unsafe { (*ptr).other_error += 1 };
            }
            Action::Pass
        }
    }
}

#[inline(always)]
fn addr6_to_u32x4(addr: [u8; 16]) -> [u32; 4] {
    let mut out = [0u32; 4];
    for (i, chunk) in addr.chunks_exact(4).enumerate() {
        out[i] = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    out
}

#[inline(always)]
fn u32x4_to_addr6(words: [u32; 4]) -> [u8; 16] {
    let mut out = [0u8; 16];
    for (i, word) in words.iter().enumerate() {
        out[i * 4..i * 4 + 4].copy_from_slice(&word.to_ne_bytes());
    }
    out
}

// ── Required for no_std + no_main ────────────────────────────────────────────

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
