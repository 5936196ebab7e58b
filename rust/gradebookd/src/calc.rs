use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;

pub const CLASSWORK_MAX: f64 = 30.0;
pub const HOMEWORK_MAX: f64 = 10.0;
pub const PROJECT_MAX: f64 = 10.0;
pub const EXAM_MAX: f64 = 50.0;

/// Raw component scores exactly as submitted; any of them may be absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawComponents {
    pub classwork: Option<f64>,
    pub homework: Option<f64>,
    pub project: Option<f64>,
    pub exam: Option<f64>,
}

/// Component scores after clamping into their fixed ranges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Components {
    pub classwork: f64,
    pub homework: f64,
    pub project: f64,
    pub exam: f64,
}

fn clamp_component(v: Option<f64>, max: f64) -> f64 {
    match v {
        Some(x) if x.is_finite() => x.clamp(0.0, max),
        Some(x) if x == f64::INFINITY => max,
        _ => 0.0,
    }
}

impl Components {
    /// Missing components count as 0; out-of-range values are silently clamped.
    pub fn clamped(raw: &RawComponents) -> Self {
        Self {
            classwork: clamp_component(raw.classwork, CLASSWORK_MAX),
            homework: clamp_component(raw.homework, HOMEWORK_MAX),
            project: clamp_component(raw.project, PROJECT_MAX),
            exam: clamp_component(raw.exam, EXAM_MAX),
        }
    }

    /// Sum of the four components, held at hundredths so that equal marks
    /// entered with different splits compare equal.
    pub fn total(&self) -> f64 {
        round_hundredths(self.classwork + self.homework + self.project + self.exam)
    }
}

pub fn round_hundredths(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn hundredths(x: f64) -> i64 {
    (x * 100.0).round() as i64
}

/// `Int(10*x + 0.5) / 10`, used for displayed averages.
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

/// Competition ranking ("1224"): ties share a position and the next distinct
/// score resumes at its 1-based sorted index. Scores compare at hundredths.
/// Entries without a score get no position.
pub fn competition_rank<K>(entries: &[(K, Option<f64>)]) -> HashMap<K, i64>
where
    K: Clone + Eq + Hash,
{
    let mut scored: Vec<(&K, i64)> = entries
        .iter()
        .filter_map(|(k, s)| s.filter(|v| !v.is_nan()).map(|v| (k, hundredths(v))))
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1));

    let mut positions = HashMap::with_capacity(scored.len());
    let mut position = 1_i64;
    let mut prev: Option<i64> = None;
    for (i, (key, score)) in scored.into_iter().enumerate() {
        if prev.map(|p| p != score).unwrap_or(false) {
            position = (i as i64) + 1;
        }
        positions.insert(key.clone(), position);
        prev = Some(score);
    }
    positions
}
