use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const SCALE_MIN: i64 = 0;
pub const SCALE_MAX: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchoolLevel {
    Primary,
    Jhs,
    Shs,
}

impl SchoolLevel {
    pub const ALL: [SchoolLevel; 3] = [SchoolLevel::Primary, SchoolLevel::Jhs, SchoolLevel::Shs];

    pub fn as_str(self) -> &'static str {
        match self {
            SchoolLevel::Primary => "PRIMARY",
            SchoolLevel::Jhs => "JHS",
            SchoolLevel::Shs => "SHS",
        }
    }

    pub fn parse(raw: &str) -> Option<SchoolLevel> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PRIMARY" => Some(SchoolLevel::Primary),
            "JHS" => Some(SchoolLevel::Jhs),
            "SHS" => Some(SchoolLevel::Shs),
            _ => None,
        }
    }

    /// Class levels such as "Creche" or "Kindergarten" grade on the PRIMARY scale.
    pub fn normalize(raw: Option<&str>) -> SchoolLevel {
        raw.and_then(SchoolLevel::parse).unwrap_or(SchoolLevel::Primary)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeBand {
    pub min: i64,
    pub max: i64,
    pub code: String,
    pub remark: String,
}

impl GradeBand {
    fn new(min: i64, max: i64, code: &str, remark: &str) -> Self {
        Self {
            min,
            max,
            code: code.to_string(),
            remark: remark.to_string(),
        }
    }
}

/// Bands of one level, ascending by `min`, covering `[0,100]` exactly.
#[derive(Debug, Clone, Serialize)]
pub struct LevelScale {
    bands: Vec<GradeBand>,
}

impl LevelScale {
    pub fn new(level: SchoolLevel, mut bands: Vec<GradeBand>) -> CoreResult<Self> {
        let fail = |msg: String| Err(CoreError::Config(format!("{}: {}", level.as_str(), msg)));

        if bands.is_empty() {
            return fail("no bands configured".to_string());
        }
        bands.sort_by_key(|b| b.min);

        for b in &bands {
            if b.min > b.max {
                return fail(format!("band {}..{} has min > max", b.min, b.max));
            }
            if b.code.trim().is_empty() {
                return fail(format!("band {}..{} has an empty code", b.min, b.max));
            }
        }
        if bands[0].min != SCALE_MIN {
            return fail(format!("scores {}..{} are not covered", SCALE_MIN, bands[0].min - 1));
        }
        for pair in bands.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.min <= prev.max {
                return fail(format!(
                    "bands {}..{} and {}..{} overlap",
                    prev.min, prev.max, next.min, next.max
                ));
            }
            if next.min > prev.max + 1 {
                return fail(format!("scores {}..{} are not covered", prev.max + 1, next.min - 1));
            }
        }
        let last = &bands[bands.len() - 1];
        if last.max != SCALE_MAX {
            return fail(format!("band {}..{} must end at {}", last.min, last.max, SCALE_MAX));
        }

        Ok(Self { bands })
    }

    pub fn bands(&self) -> &[GradeBand] {
        &self.bands
    }

    /// Band for a clamped total. Fractional totals fall in the band holding
    /// `floor(total)`; `None` only for totals outside `[0,100]` or a gap.
    pub fn grade(&self, total: f64) -> Option<&GradeBand> {
        if !total.is_finite() || total < SCALE_MIN as f64 || total > SCALE_MAX as f64 {
            return None;
        }
        self.bands
            .iter()
            .rev()
            .find(|b| (b.min as f64) <= total)
            .filter(|b| total < (b.max + 1) as f64)
    }
}

#[derive(Debug, Clone)]
pub struct GradingScales {
    levels: BTreeMap<SchoolLevel, LevelScale>,
}

impl GradingScales {
    /// Builds from raw level keys; every key must be a known level and all
    /// three levels must be present.
    pub fn from_levels(raw: BTreeMap<String, Vec<GradeBand>>) -> CoreResult<Self> {
        let mut levels = BTreeMap::new();
        for (key, bands) in raw {
            let Some(level) = SchoolLevel::parse(&key) else {
                return Err(CoreError::Config(format!("unknown level '{}'", key)));
            };
            if levels.contains_key(&level) {
                return Err(CoreError::Config(format!("level {} defined twice", level.as_str())));
            }
            levels.insert(level, LevelScale::new(level, bands)?);
        }
        for level in SchoolLevel::ALL {
            if !levels.contains_key(&level) {
                return Err(CoreError::Config(format!("level {} is missing", level.as_str())));
            }
        }
        Ok(Self { levels })
    }

    pub fn builtin() -> CoreResult<Self> {
        let mut raw = BTreeMap::new();
        raw.insert(
            "PRIMARY".to_string(),
            vec![
                GradeBand::new(80, 100, "1", "Highest"),
                GradeBand::new(70, 79, "2", "Higher"),
                GradeBand::new(60, 69, "3", "High"),
                GradeBand::new(50, 59, "4", "High Average"),
                GradeBand::new(40, 49, "5", "Average"),
                GradeBand::new(30, 39, "6", "Low Average"),
                GradeBand::new(25, 29, "7", "Below Average"),
                GradeBand::new(20, 24, "8", "Low"),
                GradeBand::new(0, 19, "9", "Very Low"),
            ],
        );
        raw.insert(
            "JHS".to_string(),
            secondary_bands(["1", "2", "3", "4", "5", "6", "7", "8", "9"]),
        );
        raw.insert(
            "SHS".to_string(),
            secondary_bands(["A1", "B2", "B3", "C4", "C5", "C6", "D7", "E8", "F9"]),
        );
        Self::from_levels(raw)
    }

    pub fn level(&self, level: SchoolLevel) -> Option<&LevelScale> {
        self.levels.get(&level)
    }

    pub fn grade(&self, total: f64, level: SchoolLevel) -> Option<&GradeBand> {
        self.level(level).and_then(|s| s.grade(total))
    }
}

fn secondary_bands(codes: [&str; 9]) -> Vec<GradeBand> {
    let ranges: [(i64, i64, &str); 9] = [
        (80, 100, "Excellent"),
        (70, 79, "Very Good"),
        (60, 69, "Good"),
        (55, 59, "Credit"),
        (50, 54, "Credit"),
        (45, 49, "Credit"),
        (40, 44, "Pass"),
        (35, 39, "Pass"),
        (0, 34, "Fail"),
    ];
    ranges
        .iter()
        .zip(codes)
        .map(|((min, max, remark), code)| GradeBand::new(*min, *max, code, remark))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scales() -> GradingScales {
        GradingScales::builtin().expect("builtin scale is valid")
    }

    #[test]
    fn every_integer_total_has_exactly_one_band() {
        let s = scales();
        for level in SchoolLevel::ALL {
            let scale = s.level(level).expect("level");
            for total in 0..=100 {
                let hits = scale
                    .bands()
                    .iter()
                    .filter(|b| b.min <= total && total <= b.max)
                    .count();
                assert_eq!(hits, 1, "{} total {}", level.as_str(), total);
                let band = scale.grade(total as f64).expect("grade");
                assert!(band.min <= total && total <= band.max);
            }
        }
    }

    #[test]
    fn primary_boundaries() {
        let s = scales();
        let g = |t: f64| s.grade(t, SchoolLevel::Primary).map(|b| b.code.as_str());
        assert_eq!(g(100.0), Some("1"));
        assert_eq!(g(80.0), Some("1"));
        assert_eq!(g(79.0), Some("2"));
        assert_eq!(g(50.0), Some("4"));
        assert_eq!(g(40.0), Some("5"));
        assert_eq!(g(0.0), Some("9"));
    }

    #[test]
    fn fractional_totals_grade_by_floor() {
        let s = scales();
        let band = s.grade(79.5, SchoolLevel::Shs).expect("grade");
        assert_eq!(band.code, "B2");
        let band = s.grade(34.9, SchoolLevel::Jhs).expect("grade");
        assert_eq!(band.remark, "Fail");
    }

    #[test]
    fn out_of_range_totals_have_no_grade() {
        let s = scales();
        assert!(s.grade(-0.5, SchoolLevel::Primary).is_none());
        assert!(s.grade(100.5, SchoolLevel::Primary).is_none());
        assert!(s.grade(f64::NAN, SchoolLevel::Primary).is_none());
    }

    #[test]
    fn gap_in_unchecked_scale_yields_no_grade() {
        let scale = LevelScale {
            bands: vec![
                GradeBand::new(0, 40, "F", "Fail"),
                GradeBand::new(60, 100, "P", "Pass"),
            ],
        };
        assert!(scale.grade(50.0).is_none());
        assert!(scale.grade(40.99).is_some());
        assert!(scale.grade(41.0).is_none());
        assert_eq!(scale.grade(60.0).map(|b| b.code.as_str()), Some("P"));
    }

    #[test]
    fn level_normalization_defaults_to_primary() {
        assert_eq!(SchoolLevel::normalize(Some("jhs")), SchoolLevel::Jhs);
        assert_eq!(SchoolLevel::normalize(Some(" Shs ")), SchoolLevel::Shs);
        assert_eq!(SchoolLevel::normalize(Some("Kindergarten")), SchoolLevel::Primary);
        assert_eq!(SchoolLevel::normalize(None), SchoolLevel::Primary);
    }

    #[test]
    fn construction_rejects_gaps_and_overlaps() {
        let gap = LevelScale::new(
            SchoolLevel::Primary,
            vec![GradeBand::new(0, 49, "B", "Low"), GradeBand::new(51, 100, "A", "High")],
        );
        assert!(matches!(gap, Err(CoreError::Config(m)) if m.contains("50..50")));

        let overlap = LevelScale::new(
            SchoolLevel::Primary,
            vec![GradeBand::new(0, 50, "B", "Low"), GradeBand::new(50, 100, "A", "High")],
        );
        assert!(matches!(overlap, Err(CoreError::Config(m)) if m.contains("overlap")));

        let short = LevelScale::new(SchoolLevel::Jhs, vec![GradeBand::new(0, 99, "A", "All")]);
        assert!(matches!(short, Err(CoreError::Config(_))));
    }

    #[test]
    fn missing_level_is_a_config_error() {
        let mut raw = BTreeMap::new();
        raw.insert("PRIMARY".to_string(), vec![GradeBand::new(0, 100, "P", "Pass")]);
        let err = GradingScales::from_levels(raw).expect_err("JHS and SHS missing");
        assert!(err.to_string().contains("missing"));
    }
}
