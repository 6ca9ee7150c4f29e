//! Periodically drains the per-CPU statistics, route-stat and URR maps
//! through [`upf_ebpf::UpfLoader`]'s typed accessors and republishes them as
//! Prometheus counters. BPF-side counters are cumulative absolute values
//! read fresh every tick; this tracks the last-seen totals so the exported
//! OpenTelemetry counters, which are add-only, only ever move forward.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::warn;
use upf_ebpf::UpfLoader;
use upf_ebpf_common::stats::{stat_index, RouteStats, UpfStatistic};

use super::metrics::Metrics;

#[derive(Default, Clone, Copy)]
struct Snapshot {
    uplink_stats: [u64; stat_index::COUNT as usize],
    downlink_stats: [u64; stat_index::COUNT as usize],
    uplink_route: RouteStats,
    downlink_route: RouteStats,
}

pub struct Collector {
    loader: Arc<Mutex<UpfLoader>>,
    metrics: Arc<Metrics>,
    urr_ids: Vec<u32>,
    last: Snapshot,
    last_urr: HashMap<u32, (u64, u64)>,
}

impl Collector {
    pub fn new(loader: Arc<Mutex<UpfLoader>>, metrics: Arc<Metrics>, urr_ids: Vec<u32>) -> Self {
        Self {
            loader,
            metrics,
            urr_ids,
            last: Snapshot::default(),
            last_urr: HashMap::new(),
        }
    }

    /// Runs the scrape loop until the process exits. Intended to be spawned
    /// as its own `tokio` task.
    pub async fn run(mut self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(err) = self.tick().await {
                warn!(%err, "telemetry collector tick failed");
            }
        }
    }

    async fn tick(&mut self) -> Result<(), upf_ebpf::UpfError> {
        let loader = self.loader.lock().await;

        let uplink_stats = sum_statistics(&loader.uplink_statistics()?);
        let downlink_stats = sum_statistics(&loader.downlink_statistics()?);
        let uplink_route = sum_route_stats(&loader.uplink_route_stats()?);
        let downlink_route = sum_route_stats(&loader.downlink_route_stats()?);

        let urr_arr = loader.urr_counters()?;
        let mut urr = HashMap::with_capacity(self.urr_ids.len());
        for &id in &self.urr_ids {
            if let Ok(values) = urr_arr.get(&id, 0) {
                let (ul, dl) = values
                    .iter()
                    .fold((0u64, 0u64), |(ul, dl), v| (ul + v.uplink_bytes, dl + v.downlink_bytes));
                urr.insert(id, (ul, dl));
            }
        }

        drop(loader);

        self.publish(uplink_stats, downlink_stats, uplink_route, downlink_route, &urr);

        self.last = Snapshot {
            uplink_stats,
            downlink_stats,
            uplink_route,
            downlink_route,
        };
        self.last_urr = urr;
        Ok(())
    }

    fn publish(
        &self,
        uplink_stats: [u64; stat_index::COUNT as usize],
        downlink_stats: [u64; stat_index::COUNT as usize],
        uplink_route: RouteStats,
        downlink_route: RouteStats,
        urr: &HashMap<u32, (u64, u64)>,
    ) {
        let m = &self.metrics;
        let add = |c: &opentelemetry::metrics::Counter<u64>, prev: u64, now: u64| {
            c.add(now.saturating_sub(prev), &[]);
        };

        add(&m.uplink_packets_total, self.last.uplink_stats[stat_index::UPLINK_PACKETS as usize], uplink_stats[stat_index::UPLINK_PACKETS as usize]);
        add(&m.downlink_packets_total, self.last.downlink_stats[stat_index::DOWNLINK_PACKETS as usize], downlink_stats[stat_index::DOWNLINK_PACKETS as usize]);
        add(&m.uplink_bytes_total, self.last.uplink_stats[stat_index::UPLINK_BYTES as usize], uplink_stats[stat_index::UPLINK_BYTES as usize]);
        add(&m.downlink_bytes_total, self.last.downlink_stats[stat_index::DOWNLINK_BYTES as usize], downlink_stats[stat_index::DOWNLINK_BYTES as usize]);

        add(&m.pdr_miss_total, self.last.uplink_stats[stat_index::PDR_MISS as usize] + self.last.downlink_stats[stat_index::PDR_MISS as usize], uplink_stats[stat_index::PDR_MISS as usize] + downlink_stats[stat_index::PDR_MISS as usize]);
        add(&m.far_miss_total, self.last.uplink_stats[stat_index::FAR_MISS as usize] + self.last.downlink_stats[stat_index::FAR_MISS as usize], uplink_stats[stat_index::FAR_MISS as usize] + downlink_stats[stat_index::FAR_MISS as usize]);
        add(&m.qer_miss_total, self.last.uplink_stats[stat_index::QER_MISS as usize] + self.last.downlink_stats[stat_index::QER_MISS as usize], uplink_stats[stat_index::QER_MISS as usize] + downlink_stats[stat_index::QER_MISS as usize]);
        add(&m.gate_closed_drops_total, self.last.uplink_stats[stat_index::GATE_CLOSED_DROPS as usize] + self.last.downlink_stats[stat_index::GATE_CLOSED_DROPS as usize], uplink_stats[stat_index::GATE_CLOSED_DROPS as usize] + downlink_stats[stat_index::GATE_CLOSED_DROPS as usize]);
        add(&m.rate_limit_drops_total, self.last.uplink_stats[stat_index::RATE_LIMIT_DROPS as usize] + self.last.downlink_stats[stat_index::RATE_LIMIT_DROPS as usize], uplink_stats[stat_index::RATE_LIMIT_DROPS as usize] + downlink_stats[stat_index::RATE_LIMIT_DROPS as usize]);
        add(&m.sdf_no_match_drops_total, self.last.uplink_stats[stat_index::SDF_NO_MATCH_DROPS as usize] + self.last.downlink_stats[stat_index::SDF_NO_MATCH_DROPS as usize], uplink_stats[stat_index::SDF_NO_MATCH_DROPS as usize] + downlink_stats[stat_index::SDF_NO_MATCH_DROPS as usize]);
        add(&m.nat_port_exhausted_total, self.last.uplink_stats[stat_index::NAT_PORT_EXHAUSTED as usize], uplink_stats[stat_index::NAT_PORT_EXHAUSTED as usize]);
        add(&m.malformed_packets_total, self.last.uplink_stats[stat_index::MALFORMED_PACKETS as usize] + self.last.downlink_stats[stat_index::MALFORMED_PACKETS as usize], uplink_stats[stat_index::MALFORMED_PACKETS as usize] + downlink_stats[stat_index::MALFORMED_PACKETS as usize]);
        add(&m.gtp_echo_replies_total, self.last.uplink_stats[stat_index::GTP_ECHO_REPLIES as usize], uplink_stats[stat_index::GTP_ECHO_REPLIES as usize]);

        let drop_reasons = [
            stat_index::PDR_MISS,
            stat_index::FAR_MISS,
            stat_index::QER_MISS,
            stat_index::GATE_CLOSED_DROPS,
            stat_index::RATE_LIMIT_DROPS,
            stat_index::SDF_NO_MATCH_DROPS,
            stat_index::NAT_PORT_EXHAUSTED,
            stat_index::MALFORMED_PACKETS,
        ];
        let sum_drops = |stats: &[u64; stat_index::COUNT as usize]| -> u64 {
            drop_reasons.iter().map(|&i| stats[i as usize]).sum()
        };
        add(
            &m.xdp_drop_total,
            sum_drops(&self.last.uplink_stats) + sum_drops(&self.last.downlink_stats),
            sum_drops(&uplink_stats) + sum_drops(&downlink_stats),
        );

        add(&m.xdp_pass_total, self.last.uplink_stats[stat_index::XDP_PASS as usize] + self.last.downlink_stats[stat_index::XDP_PASS as usize], uplink_stats[stat_index::XDP_PASS as usize] + downlink_stats[stat_index::XDP_PASS as usize]);
        add(&m.xdp_tx_total, self.last.uplink_stats[stat_index::XDP_TX as usize] + self.last.downlink_stats[stat_index::XDP_TX as usize], uplink_stats[stat_index::XDP_TX as usize] + downlink_stats[stat_index::XDP_TX as usize]);
        add(&m.xdp_redirect_total, self.last.uplink_stats[stat_index::XDP_REDIRECT as usize] + self.last.downlink_stats[stat_index::XDP_REDIRECT as usize], uplink_stats[stat_index::XDP_REDIRECT as usize] + downlink_stats[stat_index::XDP_REDIRECT as usize]);
        add(&m.xdp_aborted_total, self.last.uplink_stats[stat_index::XDP_ABORTED as usize] + self.last.downlink_stats[stat_index::XDP_ABORTED as usize], uplink_stats[stat_index::XDP_ABORTED as usize] + downlink_stats[stat_index::XDP_ABORTED as usize]);

        add(&m.uplink_route_success_total, self.last.uplink_route.success, uplink_route.success);
        add(&m.uplink_route_no_neigh_total, self.last.uplink_route.no_neigh, uplink_route.no_neigh);
        add(&m.uplink_route_dropped_total, self.last.uplink_route.blackhole + self.last.uplink_route.unreachable + self.last.uplink_route.prohibit, uplink_route.blackhole + uplink_route.unreachable + uplink_route.prohibit);
        add(&m.downlink_route_success_total, self.last.downlink_route.success, downlink_route.success);
        add(&m.downlink_route_no_neigh_total, self.last.downlink_route.no_neigh, downlink_route.no_neigh);
        add(&m.downlink_route_dropped_total, self.last.downlink_route.blackhole + self.last.downlink_route.unreachable + self.last.downlink_route.prohibit, downlink_route.blackhole + downlink_route.unreachable + downlink_route.prohibit);

        let (prev_ul, prev_dl) = urr.keys().fold((0u64, 0u64), |(pul, pdl), id| {
            let (lul, ldl) = self.last_urr.get(id).copied().unwrap_or((0, 0));
            (pul + lul, pdl + ldl)
        });
        let (now_ul, now_dl) = urr.values().fold((0u64, 0u64), |(ul, dl), (u, d)| (ul + u, dl + d));
        add(&m.urr_uplink_bytes_total, prev_ul, now_ul);
        add(&m.urr_downlink_bytes_total, prev_dl, now_dl);
    }
}

fn sum_statistics(arr: &aya::maps::PerCpuArray<&aya::maps::MapData, UpfStatistic>) -> [u64; stat_index::COUNT as usize] {
    let mut out = [0u64; stat_index::COUNT as usize];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = arr
            .get(&(i as u32), 0)
            .map(|values| values.iter().map(|v| v.value).sum())
            .unwrap_or(0);
    }
    out
}

fn sum_route_stats(arr: &aya::maps::PerCpuArray<&aya::maps::MapData, RouteStats>) -> RouteStats {
    let values = match arr.get(&0, 0) {
        Ok(v) => v,
        Err(_) => return RouteStats::default(),
    };
    values.iter().fold(RouteStats::default(), |acc, v| RouteStats {
        success: acc.success + v.success,
        no_neigh: acc.no_neigh + v.no_neigh,
        blackhole: acc.blackhole + v.blackhole,
        unreachable: acc.unreachable + v.unreachable,
        prohibit: acc.prohibit + v.prohibit,
        frag_needed: acc.frag_needed + v.frag_needed,
        other_error: acc.other_error + v.other_error,
    })
}
