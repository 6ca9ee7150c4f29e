//! Packet Detection Rule table entries, unified across the uplink (N3,
//! TEID-keyed) and downlink (N6, UE-address-keyed) lookup tables.

use crate::sdf::SdfFilter;

/// `pdr.sdf_mode` values.
pub mod sdf_mode {
    /// No SDF filtering: always use the top-level `far_id`/`qer_id`/`urr_id`.
    pub const NONE: u8 = 0;
    /// SDF-only: a non-matching packet is dropped.
    pub const SDF_ONLY: u8 = 1;
    /// SDF with a default: a non-matching packet falls back to the
    /// top-level `far_id`/`qer_id`/`urr_id`.
    pub const SDF_WITH_DEFAULT: u8 = 2;
}

/// Maximum number of [`SdfRules`] entries carried inline per [`PdrInfo`].
/// A fixed, small bound keeps the struct `Copy` and verifier-friendly; the
/// control plane rejects configurations that need more.
pub const MAX_SDF_RULES: usize = 4;

/// One alternate `{far_id, qer_id, urr_id, outer_header_removal, sdf_filter}`
/// binding, selected when `sdf_filter` matches the inner packet's 5-tuple.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SdfRules {
    pub far_id: u32,
    pub qer_id: u32,
    pub urr_id: u32,
    pub outer_header_removal: u8,
    _pad: [u8; 3],
    pub sdf_filter: SdfFilter,
}

impl Default for SdfRules {
    fn default() -> Self {
        Self {
            far_id: 0,
            qer_id: 0,
            urr_id: 0,
            outer_header_removal: 0xFF,
            _pad: [0; 3],
            sdf_filter: SdfFilter::default(),
        }
    }
}

/// Value type of the PDR tables. The uplink table is keyed by `(n3_teid)`;
/// the downlink table is keyed by the UE's IP address. Both tables share
/// this value type, per the unified schema.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PdrInfo {
    pub local_seid: u64,
    pub imsi: u64,
    pub pdr_id: u32,
    pub far_id: u32,
    pub qer_id: u32,
    pub urr_id: u32,
    pub outer_header_removal: u8,
    pub sdf_mode: u8,
    pub sdf_rule_count: u8,
    _pad: u8,
    pub sdf_rules: [SdfRules; MAX_SDF_RULES],
}

impl Default for PdrInfo {
    fn default() -> Self {
        Self {
            local_seid: 0,
            imsi: 0,
            pdr_id: 0,
            far_id: 0,
            qer_id: 0,
            urr_id: 0,
            outer_header_removal: 0xFF,
            sdf_mode: sdf_mode::NONE,
            sdf_rule_count: 0,
            _pad: 0,
            sdf_rules: [SdfRules::default(); MAX_SDF_RULES],
        }
    }
}

#[cfg(feature = "aya-pod")]
unsafe impl aya::Pod for PdrInfo {}

/// Outcome of resolving a PDR (plus its SDF rules, if any) against an inner
/// packet's 5-tuple: which `{far_id, qer_id, urr_id, outer_header_removal}`
/// binding applies, or that the packet must be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedBinding {
    pub far_id: u32,
    pub qer_id: u32,
    pub urr_id: u32,
    pub outer_header_removal: u8,
}

/// Resolve which FAR/QER/URR binding a PDR yields for an inner packet,
/// given a 5-tuple match function supplied by the caller (so this stays
/// free of any packet-buffer access and is host-testable).
pub fn resolve<M>(pdr: &PdrInfo, matches: M) -> Option<ResolvedBinding>
where
    M: Fn(&SdfFilter) -> bool,
{
    match pdr.sdf_mode {
        sdf_mode::NONE => Some(ResolvedBinding {
            far_id: pdr.far_id,
            qer_id: pdr.qer_id,
            urr_id: pdr.urr_id,
            outer_header_removal: pdr.outer_header_removal,
        }),
        sdf_mode::SDF_ONLY | sdf_mode::SDF_WITH_DEFAULT => {
            let count = (pdr.sdf_rule_count as usize).min(MAX_SDF_RULES);
            for rule in &pdr.sdf_rules[..count] {
                if matches(&rule.sdf_filter) {
                    return Some(ResolvedBinding {
                        far_id: rule.far_id,
                        qer_id: rule.qer_id,
                        urr_id: rule.urr_id,
                        outer_header_removal: rule.outer_header_removal,
                    });
                }
            }
            if pdr.sdf_mode == sdf_mode::SDF_WITH_DEFAULT {
                Some(ResolvedBinding {
                    far_id: pdr.far_id,
                    qer_id: pdr.qer_id,
                    urr_id: pdr.urr_id,
                    outer_header_removal: pdr.outer_header_removal,
                })
            } else {
                None
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdr_with_mode(mode: u8) -> PdrInfo {
        let mut pdr = PdrInfo::default();
        pdr.far_id = 1;
        pdr.qer_id = 1;
        pdr.urr_id = 1;
        pdr.sdf_mode = mode;
        pdr
    }

    #[test]
    fn no_sdf_mode_always_uses_top_level_ids() {
        let pdr = pdr_with_mode(sdf_mode::NONE);
        let resolved = resolve(&pdr, |_| false).unwrap();
        assert_eq!(resolved.far_id, 1);
    }

    #[test]
    fn sdf_only_drops_on_no_match() {
        let mut pdr = pdr_with_mode(sdf_mode::SDF_ONLY);
        pdr.sdf_rule_count = 1;
        pdr.sdf_rules[0].far_id = 9;
        assert!(resolve(&pdr, |_| false).is_none());
    }

    #[test]
    fn sdf_only_uses_matching_rule() {
        let mut pdr = pdr_with_mode(sdf_mode::SDF_ONLY);
        pdr.sdf_rule_count = 2;
        pdr.sdf_rules[0].far_id = 7;
        pdr.sdf_rules[1].far_id = 9;
        let mut call = 0;
        let resolved = resolve(&pdr, |_| {
            call += 1;
            call == 2
        })
        .unwrap();
        assert_eq!(resolved.far_id, 9);
    }

    #[test]
    fn sdf_with_default_falls_back_on_no_match() {
        let mut pdr = pdr_with_mode(sdf_mode::SDF_WITH_DEFAULT);
        pdr.sdf_rule_count = 1;
        pdr.sdf_rules[0].far_id = 9;
        let resolved = resolve(&pdr, |_| false).unwrap();
        assert_eq!(resolved.far_id, 1);
    }
}
