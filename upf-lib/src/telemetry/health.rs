use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::Response;
use hyper::StatusCode;
use serde_json::json;
use upf_ebpf::UpfLoader;

use crate::error::Result;

type RespBody = BoxBody<Bytes, hyper::Error>;

fn json_response(status: StatusCode, body: serde_json::Value) -> Result<Response<RespBody>> {
    let body_bytes = serde_json::to_vec(&body)
        .map_err(|e| crate::error::UpfError::Http(format!("failed to serialize response: {e}")))?;
    let body = Full::new(Bytes::from(body_bytes))
        .map_err(|never| match never {})
        .boxed();
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(body)
        .map_err(|e| crate::error::UpfError::Http(format!("failed to build response: {e}")))
}

/// Always returns 200 if the process is running.
pub fn health_check_response() -> Result<Response<RespBody>> {
    json_response(StatusCode::OK, json!({"status": "healthy"}))
}

/// Returns 200 once the XDP program is attached to both interfaces and the
/// rule-table maps are reachable; 503 otherwise. Checked by probing the
/// per-CPU statistics maps, which exist iff the load succeeded.
pub fn ready_check_response(loader: &UpfLoader) -> Result<Response<RespBody>> {
    if loader.uplink_statistics().is_ok() && loader.downlink_statistics().is_ok() {
        json_response(
            StatusCode::OK,
            json!({
                "status": "ready",
                "n3_interface": loader.n3_interface(),
                "n6_interface": loader.n6_interface(),
            }),
        )
    } else {
        json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            json!({"status": "not_ready", "reason": "datapath_maps_unreachable"}),
        )
    }
}

/// Always returns 200 if the process is running.
pub fn live_check_response() -> Result<Response<RespBody>> {
    json_response(StatusCode::OK, json!({"status": "alive"}))
}
