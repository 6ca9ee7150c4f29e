//! Sliding-window byte-rate enforcement, per QER.
//!
//! The arithmetic is pure (no atomics, no map access) so it can be unit
//! tested directly; the caller (the kernel-side pipeline) is responsible for
//! loading `window_start_ns` with an atomic read and writing it back with a
//! compare-and-swap, retrying or accepting on contention per its own policy.

/// Outcome of a single rate-limiter evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The packet fits the instantaneous budget. Carries the new value the
    /// caller should attempt to CAS into `window_start_ns`.
    Accept { new_window_start_ns: u64 },
    /// The packet exceeds the budget; `window_start_ns` is left untouched.
    Drop,
}

/// Evaluate whether a packet of `packet_bytes` bytes fits within
/// `maximum_bitrate_bps` given the QER's current `window_start_ns` and the
/// current monotonic time `now_ns`.
///
/// Algorithm (spec): elapsed = now - window_start; capacity_bits = mbr *
/// elapsed / 1e9. If the packet's bits exceed capacity, drop without
/// advancing the window. Otherwise charge the packet's transmission time
/// against the window and accept.
pub fn evaluate(window_start_ns: u64, now_ns: u64, packet_bytes: u32, maximum_bitrate_bps: u64) -> Verdict {
    if maximum_bitrate_bps == 0 {
        return Verdict::Drop;
    }
    let elapsed_ns = now_ns.saturating_sub(window_start_ns);
    let packet_bits = (packet_bytes as u128) * 8;

    // capacity_bits = mbr * elapsed_ns / 1e9, computed in u128 to avoid
    // overflow at gigabit rates over multi-second elapsed windows.
    let capacity_bits = (maximum_bitrate_bps as u128) * (elapsed_ns as u128) / 1_000_000_000u128;

    if packet_bits > capacity_bits {
        return Verdict::Drop;
    }

    // cost_ns = packet_bits * 1e9 / mbr
    let cost_ns = packet_bits * 1_000_000_000u128 / (maximum_bitrate_bps as u128);
    let new_window_start_ns = window_start_ns.saturating_add(cost_ns as u64);
    Verdict::Accept { new_window_start_ns }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_packet_after_window_start_with_zero_elapsed_is_dropped() {
        // elapsed == 0 means zero capacity, so any nonzero-size packet
        // exceeds the instantaneous budget until time has advanced.
        let v = evaluate(1_000, 1_000, 100, 1_000_000);
        assert_eq!(v, Verdict::Drop);
    }

    #[test]
    fn packet_within_budget_advances_window() {
        // 1 Mbps, 1 second elapsed -> 1,000,000 bits capacity. A 1000-byte
        // (8000-bit) packet easily fits.
        let v = evaluate(0, 1_000_000_000, 1000, 1_000_000);
        match v {
            Verdict::Accept { new_window_start_ns } => assert!(new_window_start_ns > 0),
            Verdict::Drop => panic!("expected accept"),
        }
    }

    #[test]
    fn sustained_rate_stays_within_ten_percent_of_mbr() {
        let mbr: u64 = 1_000_000; // 1 Mbps
        let packet_bytes = 1250u32; // 10,000 bits
        let mut window_start = 0u64;
        let mut now = 0u64;
        let mut admitted_bits: u128 = 0;
        let step_ns = 1_000_000u64; // candidate packet arrival cadence: 1ms
        let one_second_ns = 1_000_000_000u64;

        while now < one_second_ns * 5 {
            match evaluate(window_start, now, packet_bytes, mbr) {
                Verdict::Accept { new_window_start_ns } => {
                    window_start = new_window_start_ns;
                    admitted_bits += (packet_bytes as u128) * 8;
                }
                Verdict::Drop => {}
            }
            now += step_ns;
        }

        let observed_bps = admitted_bits as f64 / 5.0;
        let bound = mbr as f64 * 1.10;
        assert!(observed_bps <= bound, "observed {observed_bps} exceeds bound {bound}");
    }
}
