use crate::telemetry::handle_metrics;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Meter, UpDownCounter};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

/// Datapath telemetry, mirroring the per-CPU counters the XDP program keeps
/// (`UpfStatistic`, `RouteStats`, `UrrCounter`) as Prometheus series. Values
/// are periodically pulled from the BPF maps by [`super::collector`]; this
/// struct only owns the OpenTelemetry instrument handles.
#[derive(Clone)]
pub struct Metrics {
    pub uplink_packets_total: Counter<u64>,
    pub downlink_packets_total: Counter<u64>,
    pub uplink_bytes_total: Counter<u64>,
    pub downlink_bytes_total: Counter<u64>,

    pub pdr_miss_total: Counter<u64>,
    pub far_miss_total: Counter<u64>,
    pub qer_miss_total: Counter<u64>,
    pub gate_closed_drops_total: Counter<u64>,
    pub rate_limit_drops_total: Counter<u64>,
    pub sdf_no_match_drops_total: Counter<u64>,
    pub nat_port_exhausted_total: Counter<u64>,
    pub malformed_packets_total: Counter<u64>,
    pub gtp_echo_replies_total: Counter<u64>,

    pub xdp_pass_total: Counter<u64>,
    pub xdp_drop_total: Counter<u64>,
    pub xdp_tx_total: Counter<u64>,
    pub xdp_redirect_total: Counter<u64>,
    pub xdp_aborted_total: Counter<u64>,

    pub uplink_route_success_total: Counter<u64>,
    pub uplink_route_no_neigh_total: Counter<u64>,
    pub uplink_route_dropped_total: Counter<u64>,
    pub downlink_route_success_total: Counter<u64>,
    pub downlink_route_no_neigh_total: Counter<u64>,
    pub downlink_route_dropped_total: Counter<u64>,

    pub urr_uplink_bytes_total: Counter<u64>,
    pub urr_downlink_bytes_total: Counter<u64>,

    pub nat_table_entries: UpDownCounter<i64>,
}

impl Metrics {
    fn new(meter: Meter) -> Self {
        Self {
            uplink_packets_total: meter
                .u64_counter("upf_uplink_packets_total")
                .with_description("Packets received on N3")
                .build(),
            downlink_packets_total: meter
                .u64_counter("upf_downlink_packets_total")
                .with_description("Packets received on N6")
                .build(),
            uplink_bytes_total: meter
                .u64_counter("upf_uplink_bytes_total")
                .with_description("Bytes received on N3")
                .build(),
            downlink_bytes_total: meter
                .u64_counter("upf_downlink_bytes_total")
                .with_description("Bytes received on N6")
                .build(),

            pdr_miss_total: meter
                .u64_counter("upf_pdr_miss_total")
                .with_description("Packets with no matching PDR")
                .build(),
            far_miss_total: meter
                .u64_counter("upf_far_miss_total")
                .with_description("Packets whose PDR referenced a missing FAR")
                .build(),
            qer_miss_total: meter
                .u64_counter("upf_qer_miss_total")
                .with_description("Packets whose PDR referenced a missing QER")
                .build(),
            gate_closed_drops_total: meter
                .u64_counter("upf_gate_closed_drops_total")
                .with_description("Packets dropped by a closed QER gate")
                .build(),
            rate_limit_drops_total: meter
                .u64_counter("upf_rate_limit_drops_total")
                .with_description("Packets dropped by the sliding-window rate limiter")
                .build(),
            sdf_no_match_drops_total: meter
                .u64_counter("upf_sdf_no_match_drops_total")
                .with_description("Packets dropped by SDF-only non-match")
                .build(),
            nat_port_exhausted_total: meter
                .u64_counter("upf_nat_port_exhausted_total")
                .with_description("Source NAT attempts that exhausted port retries")
                .build(),
            malformed_packets_total: meter
                .u64_counter("upf_malformed_packets_total")
                .with_description("Packets that failed header parsing")
                .build(),
            gtp_echo_replies_total: meter
                .u64_counter("upf_gtp_echo_replies_total")
                .with_description("GTP-U echo requests answered")
                .build(),

            xdp_pass_total: meter.u64_counter("upf_xdp_pass_total").build(),
            xdp_drop_total: meter.u64_counter("upf_xdp_drop_total").build(),
            xdp_tx_total: meter.u64_counter("upf_xdp_tx_total").build(),
            xdp_redirect_total: meter.u64_counter("upf_xdp_redirect_total").build(),
            xdp_aborted_total: meter.u64_counter("upf_xdp_aborted_total").build(),

            uplink_route_success_total: meter
                .u64_counter("upf_uplink_route_success_total")
                .build(),
            uplink_route_no_neigh_total: meter
                .u64_counter("upf_uplink_route_no_neigh_total")
                .build(),
            uplink_route_dropped_total: meter
                .u64_counter("upf_uplink_route_dropped_total")
                .build(),
            downlink_route_success_total: meter
                .u64_counter("upf_downlink_route_success_total")
                .build(),
            downlink_route_no_neigh_total: meter
                .u64_counter("upf_downlink_route_no_neigh_total")
                .build(),
            downlink_route_dropped_total: meter
                .u64_counter("upf_downlink_route_dropped_total")
                .build(),

            urr_uplink_bytes_total: meter
                .u64_counter("upf_urr_uplink_bytes_total")
                .with_description("Cumulative uplink bytes across all URRs")
                .build(),
            urr_downlink_bytes_total: meter
                .u64_counter("upf_urr_downlink_bytes_total")
                .with_description("Cumulative downlink bytes across all URRs")
                .build(),

            nat_table_entries: meter
                .i64_up_down_counter("upf_nat_table_entries")
                .with_description("Entries currently held in the NAT connection table")
                .build(),
        }
    }
}

pub fn init_metrics() -> Result<(Arc<Metrics>, Registry), Box<dyn std::error::Error + Send + Sync>>
{
    let registry = Registry::default();

    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()?;

    let meter_provider = SdkMeterProvider::builder().with_reader(exporter).build();

    global::set_meter_provider(meter_provider);

    let meter = global::meter("upf");
    let metrics = Arc::new(Metrics::new(meter));

    Ok((metrics, registry))
}

/// Minimal standalone metrics server, kept for deployments that only want
/// `/metrics` without the health/ready/live endpoints `server::
/// start_observability_server` also serves.
pub async fn start_metrics_server(
    port: u16,
    registry: Registry,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let registry = Arc::new(registry);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(?addr, "Metrics server started on dedicated port");

    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .map_err(|e| std::io::Error::other(format!("Failed to setup SIGTERM handler: {e}")))?;
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .map_err(|e| std::io::Error::other(format!("Failed to setup SIGINT handler: {e}")))?;

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("Metrics server: Received SIGTERM, shutting down");
                break;
            }
            _ = sigint.recv() => {
                info!("Metrics server: Received SIGINT, shutting down");
                break;
            }
            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok((stream, peer)) => (stream, peer),
                    Err(e) => {
                        warn!(error = %e, "Metrics server: accept error");
                        continue;
                    }
                };

                let registry = registry.clone();
                tokio::spawn(async move {
                    let svc = hyper::service::service_fn(move |req: Request<Incoming>| {
                        let registry = registry.clone();
                        async move {
                            if req.uri().path() == "/metrics" {
                                match handle_metrics(&registry) {
                                    Ok(resp) => Ok::<_, hyper::Error>(resp),
                                    Err(_) => {
                                        let body = Full::new(Bytes::from("Internal Server Error"))
                                            .map_err(|never| match never {})
                                            .boxed();
                                        let mut resp = hyper::Response::new(body);
                                        *resp.status_mut() = hyper::StatusCode::INTERNAL_SERVER_ERROR;
                                        Ok(resp)
                                    }
                                }
                            } else {
                                let body = Full::new(Bytes::from("Not Found"))
                                    .map_err(|never| match never {})
                                    .boxed();
                                let mut resp = hyper::Response::new(body);
                                *resp.status_mut() = hyper::StatusCode::NOT_FOUND;
                                Ok(resp)
                            }
                        }
                    });

                    let builder = ConnBuilder::new(TokioExecutor::new());
                    if let Err(e) = builder.serve_connection(TokioIo::new(stream), svc).await {
                        warn!(?peer, error = %e, "Metrics server: serve_connection error");
                    }
                });
            }
        }
    }

    info!("Metrics server stopped");
    Ok(())
}
