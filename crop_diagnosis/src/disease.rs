use serde::{Deserialize, Serialize};
use std::fmt;

/// The five categories the classifier was trained on, in output index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiseaseLabel {
    #[serde(rename = "Cassava Bacterial Blight (CBB)")]
    BacterialBlight,
    #[serde(rename = "Cassava Brown Streak Disease (CBSD)")]
    BrownStreak,
    #[serde(rename = "Cassava Green Mottle (CGM)")]
    GreenMottle,
    #[serde(rename = "Cassava Mosaic Disease (CMD)")]
    Mosaic,
    #[serde(rename = "Healthy")]
    Healthy,
}

impl DiseaseLabel {
    pub const ALL: [DiseaseLabel; 5] = [
        DiseaseLabel::BacterialBlight,
        DiseaseLabel::BrownStreak,
        DiseaseLabel::GreenMottle,
        DiseaseLabel::Mosaic,
        DiseaseLabel::Healthy,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|label| label.as_str() == name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DiseaseLabel::BacterialBlight => "Cassava Bacterial Blight (CBB)",
            DiseaseLabel::BrownStreak => "Cassava Brown Streak Disease (CBSD)",
            DiseaseLabel::GreenMottle => "Cassava Green Mottle (CGM)",
            DiseaseLabel::Mosaic => "Cassava Mosaic Disease (CMD)",
            DiseaseLabel::Healthy => "Healthy",
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, DiseaseLabel::Healthy)
    }
}

impl fmt::Display for DiseaseLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Level {
    None,
    Low,
    Medium,
    High,
}

// Lookups take display names so labels coming back from clients can be
// rated too. Anything unrecognised is rated Medium.

pub fn severity(name: &str) -> Level {
    match DiseaseLabel::from_name(name) {
        Some(DiseaseLabel::Healthy) => Level::None,
        Some(DiseaseLabel::BacterialBlight) | Some(DiseaseLabel::BrownStreak) => Level::High,
        Some(DiseaseLabel::GreenMottle) => Level::Low,
        Some(DiseaseLabel::Mosaic) | None => Level::Medium,
    }
}

pub fn spread_risk(name: &str) -> Level {
    match DiseaseLabel::from_name(name) {
        Some(DiseaseLabel::Healthy) => Level::None,
        Some(DiseaseLabel::BacterialBlight) | Some(DiseaseLabel::Mosaic) => Level::High,
        Some(DiseaseLabel::GreenMottle) => Level::Low,
        Some(DiseaseLabel::BrownStreak) | None => Level::Medium,
    }
}

pub fn treatment_cost(name: &str) -> Level {
    match DiseaseLabel::from_name(name) {
        Some(DiseaseLabel::Healthy) => Level::None,
        Some(DiseaseLabel::BrownStreak) => Level::High,
        Some(DiseaseLabel::GreenMottle) => Level::Low,
        Some(DiseaseLabel::BacterialBlight) | Some(DiseaseLabel::Mosaic) | None => {
            Level::Medium
        }
    }
}

/// Catalog entry served by `GET /diseases`.
#[derive(Debug, Clone, Serialize)]
pub struct DiseaseProfile {
    pub label: DiseaseLabel,
    pub severity: Level,
    pub spread_risk: Level,
    pub treatment_cost: Level,
}

impl From<DiseaseLabel> for DiseaseProfile {
    fn from(label: DiseaseLabel) -> Self {
        Self {
            label,
            severity: severity(label.as_str()),
            spread_risk: spread_risk(label.as_str()),
            treatment_cost: treatment_cost(label.as_str()),
        }
    }
}

pub fn catalog() -> Vec<DiseaseProfile> {
    DiseaseLabel::ALL.into_iter().map(DiseaseProfile::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_order_matches_classifier_head() {
        assert_eq!(DiseaseLabel::from_index(0), Some(DiseaseLabel::BacterialBlight));
        assert_eq!(DiseaseLabel::from_index(3), Some(DiseaseLabel::Mosaic));
        assert_eq!(DiseaseLabel::from_index(4), Some(DiseaseLabel::Healthy));
        assert_eq!(DiseaseLabel::from_index(5), None);
    }

    #[test]
    fn names_round_trip_through_serde() {
        for label in DiseaseLabel::ALL {
            let json = serde_json::to_string(&label).unwrap();
            assert_eq!(json, format!("\"{}\"", label.as_str()));
            assert_eq!(DiseaseLabel::from_name(label.as_str()), Some(label));
        }
    }

    #[test]
    fn healthy_rates_none_everywhere() {
        assert_eq!(severity("Healthy"), Level::None);
        assert_eq!(spread_risk("Healthy"), Level::None);
        assert_eq!(treatment_cost("Healthy"), Level::None);
    }

    #[test]
    fn disease_ratings() {
        assert_eq!(severity("Cassava Bacterial Blight (CBB)"), Level::High);
        assert_eq!(severity("Cassava Brown Streak Disease (CBSD)"), Level::High);
        assert_eq!(severity("Cassava Green Mottle (CGM)"), Level::Low);
        assert_eq!(severity("Cassava Mosaic Disease (CMD)"), Level::Medium);

        assert_eq!(spread_risk("Cassava Bacterial Blight (CBB)"), Level::High);
        assert_eq!(spread_risk("Cassava Brown Streak Disease (CBSD)"), Level::Medium);
        assert_eq!(spread_risk("Cassava Green Mottle (CGM)"), Level::Low);
        assert_eq!(spread_risk("Cassava Mosaic Disease (CMD)"), Level::High);

        assert_eq!(treatment_cost("Cassava Bacterial Blight (CBB)"), Level::Medium);
        assert_eq!(treatment_cost("Cassava Brown Streak Disease (CBSD)"), Level::High);
        assert_eq!(treatment_cost("Cassava Green Mottle (CGM)"), Level::Low);
        assert_eq!(treatment_cost("Cassava Mosaic Disease (CMD)"), Level::Medium);
    }

    #[test]
    fn unknown_names_default_to_medium() {
        for name in ["", "Leaf Rust", "healthy"] {
            assert_eq!(severity(name), Level::Medium);
            assert_eq!(spread_risk(name), Level::Medium);
            assert_eq!(treatment_cost(name), Level::Medium);
        }
    }

    #[test]
    fn catalog_lists_every_label_once() {
        let catalog = catalog();
        assert_eq!(catalog.len(), 5);
        assert_eq!(catalog[4].label, DiseaseLabel::Healthy);
        assert_eq!(catalog[0].severity, Level::High);
    }
}
