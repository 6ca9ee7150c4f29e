//! Wire-format constants shared by the parser, the GTP tunnel operations and
//! the userspace loader. Values are taken straight from the protocols
//! involved (802.1Q, IPv4, GTP-U) rather than any implementation.

pub const ETH_P_IP: u16 = 0x0800;
pub const ETH_P_IPV6: u16 = 0x86DD;
pub const ETH_P_8021Q: u16 = 0x8100;

pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;
pub const IPPROTO_ICMPV6: u8 = 58;

/// UDP destination port carrying GTP-U traffic.
pub const GTP_U_PORT: u16 = 2152;

/// `IPv4(20) + UDP(8) + GTP-U(8)`, the size of the outer encapsulation this
/// datapath adds/removes. Does not include the optional GTP-U extension
/// area (`GTP_PDU_SESSION_EXT_SIZE`), which is added separately when a QFI
/// is set.
pub const GTP_ENCAP_SIZE: usize = 20 + 8 + 8;
/// Size of the GTP-U extension area carrying a PDU Session Container: the
/// mandatory 4-byte optional field (sequence number, N-PDU number, next
/// extension header type) that the `E` flag requires, plus the 4-byte PDU
/// Session Container extension header itself.
pub const GTP_PDU_SESSION_EXT_SIZE: usize = 8;

pub const GTP_MSG_ECHO_REQUEST: u8 = 0x01;
pub const GTP_MSG_ECHO_RESPONSE: u8 = 0x02;
pub const GTP_MSG_ERROR_INDICATION: u8 = 0x1A;
pub const GTP_MSG_END_MARKER: u8 = 0xFE;
pub const GTP_MSG_GPDU: u8 = 0xFF;

/// PDU Session Container extension header type, carried in the GTP-U
/// "next extension header type" byte.
pub const GTP_EXT_PDU_SESSION_CONTAINER: u8 = 0x85;
/// Downlink PDU type carried inside the PDU Session Container.
pub const PDU_SESSION_TYPE_DOWNLINK: u8 = 0;

pub const ICMP_ECHO: u8 = 8;
pub const ICMP_ECHOREPLY: u8 = 0;
pub const ICMP_TIMESTAMP: u8 = 13;
pub const ICMP_TIMESTAMPREPLY: u8 = 14;
pub const ICMP_DEST_UNREACH: u8 = 3;
pub const ICMP_TIME_EXCEEDED: u8 = 11;
pub const ICMP_FRAG_NEEDED_CODE: u8 = 4;

/// Don't-fragment and more-fragments bits within IPv4 `frag_off`, network
/// byte order.
pub const IP_FLAG_DF: u16 = 0x4000;
pub const IP_FLAG_MF: u16 = 0x2000;
pub const IP_OFFSET_MASK: u16 = 0x1FFF;

/// Gate status values stored in a [`crate::qer::QerInfo`].
pub const GATE_OPEN: u8 = 0;
pub const GATE_CLOSED: u8 = 1;

/// `bpf_fib_lookup` flag (uapi `linux/bpf.h`), additional to
/// `BPF_FIB_LOOKUP_OUTPUT`: asks the kernel to resolve and fill in the
/// source address the stack would use to reach the destination, which is
/// how the uplink masquerade path obtains its "FIB-chosen source IPv4" per
/// §4.7/§4.3.10.
pub const BPF_FIB_LOOKUP_SRC: u32 = 1 << 4;
