use crate::calc::{round_off_1_decimal, Components, RawComponents};
use crate::grading::SchoolLevel;
use crate::ipc::error::ok;
use crate::ipc::helpers::{get_optional_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_grading_scale(state: &mut AppState, req: &Request) -> serde_json::Value {
    let level = SchoolLevel::normalize(get_optional_str(&req.params, "level").as_deref());
    let bands = state
        .scales
        .level(level)
        .map(|s| s.bands().to_vec())
        .unwrap_or_default();
    ok(&req.id, json!({ "level": level.as_str(), "bands": bands }))
}

/// Pure calculator: no workspace needed and nothing is stored.
fn handle_grading_preview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let raw: RawComponents = match serde_json::from_value(req.params.clone()) {
        Ok(v) => v,
        Err(_) if req.params.is_null() => RawComponents::default(),
        Err(e) => return HandlerErr::bad_params(e.to_string()).response(&req.id),
    };
    let level = SchoolLevel::normalize(get_optional_str(&req.params, "level").as_deref());
    let components = Components::clamped(&raw);
    let total = components.total();
    let band = state.scales.grade(total, level);
    ok(
        &req.id,
        json!({
            "level": level.as_str(),
            "components": components,
            "total": round_off_1_decimal(total),
            "grade": band.map(|b| b.code.clone()),
            "remark": band.map(|b| b.remark.clone()),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grading.scale" => Some(handle_grading_scale(state, req)),
        "grading.preview" => Some(handle_grading_preview(state, req)),
        _ => None,
    }
}
