//! PPE class vocabulary.
//!
//! Model exports name their classes differently ("Hardhat", "helmet",
//! "NO-Hardhat", "no_vest", ...). `PpeClass` folds those labels into a small
//! fixed vocabulary for colouring and compliance counting, while the raw
//! label is still what gets displayed.

use serde::{Deserialize, Serialize};

/// Default class list shown on the landing page.
pub const DEFAULT_CLASSES: &[(&str, &str)] = &[
    ("Person", "Human detection"),
    ("Helmet", "Proper helmet usage"),
    ("Vest", "Safety vest compliance"),
    ("No-Helmet", "Missing helmet violation"),
    ("No-Vest", "Missing vest violation"),
];

/// Normalized PPE class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PpeClass {
    Person,
    Helmet,
    Vest,
    NoHelmet,
    NoVest,
    /// Any other label the model emits
    Other(String),
}

impl PpeClass {
    /// Classify a raw model label.
    pub fn from_label(label: &str) -> Self {
        let norm = normalize(label);
        match norm.as_str() {
            "person" | "worker" => PpeClass::Person,
            "helmet" | "hardhat" | "hard hat" => PpeClass::Helmet,
            "vest" | "safety vest" => PpeClass::Vest,
            "no helmet" | "no hardhat" | "no hard hat" => PpeClass::NoHelmet,
            "no vest" | "no safety vest" => PpeClass::NoVest,
            _ => PpeClass::Other(label.to_string()),
        }
    }

    /// Whether the label reports missing equipment.
    pub fn is_violation(&self) -> bool {
        match self {
            PpeClass::NoHelmet | PpeClass::NoVest => true,
            PpeClass::Other(label) => normalize(label).starts_with("no "),
            _ => false,
        }
    }

    /// Box colour (RGB).
    ///
    /// Violations are red-family, compliant equipment green-family, people
    /// blue; unknown labels get a stable palette entry from their name.
    pub fn color(&self) -> [u8; 3] {
        match self {
            PpeClass::Person => [56, 128, 255],
            PpeClass::Helmet => [34, 197, 94],
            PpeClass::Vest => [16, 185, 129],
            PpeClass::NoHelmet => [239, 68, 68],
            PpeClass::NoVest => [249, 115, 22],
            PpeClass::Other(_) if self.is_violation() => [220, 38, 38],
            PpeClass::Other(label) => {
                let hash = label
                    .bytes()
                    .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
                PALETTE[(hash as usize) % PALETTE.len()]
            }
        }
    }
}

const PALETTE: &[[u8; 3]] = &[
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [146, 204, 23],
    [61, 219, 134],
    [26, 147, 52],
    [0, 212, 187],
    [44, 153, 168],
    [0, 194, 255],
    [52, 69, 147],
    [100, 115, 255],
    [0, 24, 236],
    [132, 56, 255],
    [82, 0, 133],
    [203, 56, 255],
    [255, 149, 200],
    [255, 55, 199],
];

/// Lowercase, with `-` and `_` folded to spaces.
fn normalize(label: &str) -> String {
    label
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == '-' || c == '_' { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
