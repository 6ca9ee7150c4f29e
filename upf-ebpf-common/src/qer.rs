//! QoS Enforcement Rule table entries.

use crate::wire::GATE_OPEN;

/// Value type of the QER map, keyed by `qer_id` (`u32`).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QerInfo {
    pub gate_status_ul: u8,
    pub gate_status_dl: u8,
    _pad: [u8; 6],
    pub maximum_bitrate_ul_bps: u64,
    pub maximum_bitrate_dl_bps: u64,
    /// Sliding-window origin, nanoseconds, mutated by the datapath via CAS.
    pub window_start_ns_ul: u64,
    pub window_start_ns_dl: u64,
    pub qfi: u8,
    _pad2: [u8; 7],
}

impl Default for QerInfo {
    fn default() -> Self {
        Self {
            gate_status_ul: GATE_OPEN,
            gate_status_dl: GATE_OPEN,
            _pad: [0; 6],
            maximum_bitrate_ul_bps: 0,
            maximum_bitrate_dl_bps: 0,
            window_start_ns_ul: 0,
            window_start_ns_dl: 0,
            qfi: 0,
            _pad2: [0; 7],
        }
    }
}

#[cfg(feature = "aya-pod")]
unsafe impl aya::Pod for QerInfo {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::GATE_CLOSED;

    #[test]
    fn default_qer_gate_is_open_and_unmetered() {
        let qer = QerInfo::default();
        assert_eq!(qer.gate_status_ul, GATE_OPEN);
        assert_eq!(qer.gate_status_dl, GATE_OPEN);
        assert_eq!(qer.maximum_bitrate_ul_bps, 0);
        assert_ne!(GATE_OPEN, GATE_CLOSED);
    }
}
