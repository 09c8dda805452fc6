use serde::{Deserialize, Serialize};

/// Self-declared gender of a voter.
/// Declaration order is the display order used by results breakdowns.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    #[serde(rename = "Prefer not to say")]
    PreferNotToSay,
    #[default]
    Unknown,
}

impl Gender {
    pub const ALL: [Gender; 4] = [
        Gender::Male,
        Gender::Female,
        Gender::PreferNotToSay,
        Gender::Unknown,
    ];
}

/// Self-declared age bracket of a voter.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AgeGroup {
    #[serde(rename = "18-25")]
    From18To25,
    #[serde(rename = "26-35")]
    From26To35,
    #[serde(rename = "36-45")]
    From36To45,
    #[serde(rename = "46-60")]
    From46To60,
    #[serde(rename = "60+")]
    Over60,
    #[default]
    Unknown,
}

impl AgeGroup {
    pub const ALL: [AgeGroup; 6] = [
        AgeGroup::From18To25,
        AgeGroup::From26To35,
        AgeGroup::From36To45,
        AgeGroup::From46To60,
        AgeGroup::Over60,
        AgeGroup::Unknown,
    ];
}

/// The coarse demographic bucket attached to a vote for results breakdowns.
/// Deliberately too coarse to identify an individual voter on its own.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Demographic {
    pub gender: Gender,
    pub age_group: AgeGroup,
    pub country: String,
}

impl Default for Demographic {
    fn default() -> Self {
        Self {
            gender: Gender::Unknown,
            age_group: AgeGroup::Unknown,
            country: "Unknown".to_string(),
        }
    }
}
