//! Usage Reporting Rule counters.
//!
//! A per-CPU counter updated with a plain (non-atomic) add on every packet
//! that resolves to a given `urr_id` — per-CPU BPF map semantics make the
//! update race-free without an atomic RMW.

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UrrCounter {
    pub uplink_packets: u64,
    pub uplink_bytes: u64,
    pub downlink_packets: u64,
    pub downlink_bytes: u64,
}

impl UrrCounter {
    #[inline(always)]
    pub fn add_uplink(&mut self, bytes: u64) {
        self.uplink_packets += 1;
        self.uplink_bytes += bytes;
    }

    #[inline(always)]
    pub fn add_downlink(&mut self, bytes: u64) {
        self.downlink_packets += 1;
        self.downlink_bytes += bytes;
    }
}

#[cfg(feature = "aya-pod")]
unsafe impl aya::Pod for UrrCounter {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently_per_direction() {
        let mut c = UrrCounter::default();
        c.add_uplink(100);
        c.add_uplink(50);
        c.add_downlink(200);
        assert_eq!(c.uplink_packets, 2);
        assert_eq!(c.uplink_bytes, 150);
        assert_eq!(c.downlink_packets, 1);
        assert_eq!(c.downlink_bytes, 200);
    }
}
