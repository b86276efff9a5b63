use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FashionError;

/// The eight attribute tasks of the FashionAI competition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FashionTask {
    CollarDesign,
    SkirtLength,
    LapelDesign,
    NecklineDesign,
    CoatLength,
    NeckDesign,
    PantLength,
    SleeveLength,
}

impl FashionTask {
    pub const ALL: [FashionTask; 8] = [
        FashionTask::CollarDesign,
        FashionTask::SkirtLength,
        FashionTask::LapelDesign,
        FashionTask::NecklineDesign,
        FashionTask::CoatLength,
        FashionTask::NeckDesign,
        FashionTask::PantLength,
        FashionTask::SleeveLength,
    ];

    /// Name used in directory layouts and manifests.
    pub fn name(&self) -> &'static str {
        match self {
            FashionTask::CollarDesign => "collar_design_labels",
            FashionTask::SkirtLength => "skirt_length_labels",
            FashionTask::LapelDesign => "lapel_design_labels",
            FashionTask::NecklineDesign => "neckline_design_labels",
            FashionTask::CoatLength => "coat_length_labels",
            FashionTask::NeckDesign => "neck_design_labels",
            FashionTask::PantLength => "pant_length_labels",
            FashionTask::SleeveLength => "sleeve_length_labels",
        }
    }

    pub fn num_classes(&self) -> usize {
        match self {
            FashionTask::CollarDesign => 5,
            FashionTask::SkirtLength => 6,
            FashionTask::LapelDesign => 5,
            FashionTask::NecklineDesign => 10,
            FashionTask::CoatLength => 8,
            FashionTask::NeckDesign => 5,
            FashionTask::PantLength => 6,
            FashionTask::SleeveLength => 9,
        }
    }
}

impl fmt::Display for FashionTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FashionTask {
    type Err = FashionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FashionTask::ALL
            .iter()
            .copied()
            .find(|task| task.name() == s)
            .ok_or_else(|| {
                let valid = FashionTask::ALL
                    .iter()
                    .map(FashionTask::name)
                    .collect::<Vec<_>>()
                    .join(", ");
                FashionError::UnknownTask(s.to_string(), valid)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_task_name() {
        for task in FashionTask::ALL {
            assert_eq!(task.name().parse::<FashionTask>().unwrap(), task);
        }
    }

    #[test]
    fn class_counts_match_competition() {
        let total: usize = FashionTask::ALL.iter().map(|t| t.num_classes()).sum();
        assert_eq!(total, 54);
        assert_eq!(FashionTask::NecklineDesign.num_classes(), 10);
        assert_eq!(FashionTask::SkirtLength.num_classes(), 6);
    }

    #[test]
    fn unknown_task_lists_valid_names() {
        let err = "hat_labels".parse::<FashionTask>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("hat_labels"));
        assert!(msg.contains("sleeve_length_labels"));
    }
}
