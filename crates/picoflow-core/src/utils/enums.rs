use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::PicoFlowError;

/// Upper reference-multiplicity bounds (inclusive) of the centrality classes at
/// $`\sqrt{s_{NN}} = 27`$ GeV, from most peripheral to most central. Events above the last
/// threshold belong to the 0-5% class.
pub const REF_MULT_THRESHOLDS_27GEV: [i32; 9] = [19, 31, 46, 67, 93, 128, 172, 230, 267];

/// Centrality classes defined by reference-multiplicity bands.
///
/// The classes carry the integer ids used throughout STAR-style flow analyses, where `-1` marks
/// the most peripheral (80-100%) class and `8` the most central (0-5%) class.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Centrality {
    /// 80-100%, refMult ≤ 19
    Peripheral80To100,
    /// 70-80%, 19 < refMult ≤ 31
    Bin70To80,
    /// 60-70%, 31 < refMult ≤ 46
    Bin60To70,
    /// 50-60%, 46 < refMult ≤ 67
    Bin50To60,
    /// 40-50%, 67 < refMult ≤ 93
    Bin40To50,
    /// 30-40%, 93 < refMult ≤ 128
    Bin30To40,
    /// 20-30%, 128 < refMult ≤ 172
    Bin20To30,
    /// 10-20%, 172 < refMult ≤ 230
    Bin10To20,
    /// 5-10%, 230 < refMult ≤ 267
    Bin5To10,
    /// 0-5%, refMult > 267
    Central0To5,
}

impl Centrality {
    /// Every class, ordered from most peripheral to most central.
    pub const ALL: [Centrality; 10] = [
        Centrality::Peripheral80To100,
        Centrality::Bin70To80,
        Centrality::Bin60To70,
        Centrality::Bin50To60,
        Centrality::Bin40To50,
        Centrality::Bin30To40,
        Centrality::Bin20To30,
        Centrality::Bin10To20,
        Centrality::Bin5To10,
        Centrality::Central0To5,
    ];

    /// Classify an event by its reference multiplicity.
    pub fn from_ref_mult(ref_mult: i32) -> Self {
        let index = REF_MULT_THRESHOLDS_27GEV
            .iter()
            .position(|&upper| ref_mult <= upper)
            .unwrap_or(REF_MULT_THRESHOLDS_27GEV.len());
        Self::ALL[index]
    }

    /// Position of the class in [`Centrality::ALL`].
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// The conventional class id, `-1` (80-100%) through `8` (0-5%).
    pub fn id(&self) -> i32 {
        self.index() as i32 - 1
    }

    /// Look up a class from its id.
    pub fn from_id(id: i32) -> Option<Self> {
        id.checked_add(1)
            .and_then(|index| usize::try_from(index).ok())
            .and_then(|index| Self::ALL.get(index).copied())
    }

    /// Inclusive reference-multiplicity range covered by the class.
    pub fn ref_mult_range(&self) -> (i32, i32) {
        let index = self.index();
        let low = if index == 0 {
            i32::MIN
        } else {
            REF_MULT_THRESHOLDS_27GEV[index - 1] + 1
        };
        let high = REF_MULT_THRESHOLDS_27GEV
            .get(index)
            .copied()
            .unwrap_or(i32::MAX);
        (low, high)
    }

    /// Human-readable percentile label, e.g. `"20-30%"`.
    pub fn label(&self) -> &'static str {
        match self {
            Centrality::Peripheral80To100 => "80-100%",
            Centrality::Bin70To80 => "70-80%",
            Centrality::Bin60To70 => "60-70%",
            Centrality::Bin50To60 => "50-60%",
            Centrality::Bin40To50 => "40-50%",
            Centrality::Bin30To40 => "30-40%",
            Centrality::Bin20To30 => "20-30%",
            Centrality::Bin10To20 => "10-20%",
            Centrality::Bin5To10 => "5-10%",
            Centrality::Central0To5 => "0-5%",
        }
    }

    /// Name of the per-class $`v_2`$ histogram.
    pub fn histogram_name(&self) -> &'static str {
        match self {
            Centrality::Peripheral80To100 => "hV280",
            Centrality::Bin70To80 => "hV270",
            Centrality::Bin60To70 => "hV260",
            Centrality::Bin50To60 => "hV250",
            Centrality::Bin40To50 => "hV240",
            Centrality::Bin30To40 => "hV230",
            Centrality::Bin20To30 => "hV220",
            Centrality::Bin10To20 => "hV210",
            Centrality::Bin5To10 => "hV25",
            Centrality::Central0To5 => "hV20",
        }
    }
}

impl Display for Centrality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for Centrality {
    type Err = PicoFlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let with_percent = if trimmed.ends_with('%') {
            trimmed.to_string()
        } else {
            format!("{trimmed}%")
        };
        Self::ALL
            .iter()
            .find(|class| class.label() == with_percent || class.histogram_name() == trimmed)
            .copied()
            .ok_or_else(|| PicoFlowError::ParseError {
                name: s.to_string(),
                object: "Centrality".to_string(),
            })
    }
}

/// Which flavour of the flow analysis to run.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisVariant {
    /// All charges, one inclusive per-event $`v_2`$ histogram.
    #[default]
    Inclusive,
    /// Negative tracks only, per-event $`v_2`$ split into ten centrality classes.
    Centrality,
}

impl Display for AnalysisVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisVariant::Inclusive => write!(f, "inclusive"),
            AnalysisVariant::Centrality => write!(f, "centrality"),
        }
    }
}

impl FromStr for AnalysisVariant {
    type Err = PicoFlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "inclusive" | "incl" | "all" => Ok(Self::Inclusive),
            "centrality" | "cent" | "binned" => Ok(Self::Centrality),
            _ => Err(PicoFlowError::ParseError {
                name: s.to_string(),
                object: "AnalysisVariant".to_string(),
            }),
        }
    }
}
