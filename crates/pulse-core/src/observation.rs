//! Raw observations - immutable multi-field submissions about one entity
//!
//! Each field is a five-level categorical answer. Levels carry an ordinal
//! index (0..=4); the scores attached to those indices live in the
//! signal tuning table, not here.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EntityKey, PulseError};

macro_rules! five_level_scale {
    (
        $(#[$meta:meta])*
        $name:ident, $scale:literal, [$($variant:ident => $text:literal),+ $(,)?]
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: [$name; 5] = [$($name::$variant),+];

            /// Ordinal index on the five-point scale (0 = lowest)
            pub fn ordinal(self) -> usize {
                self as usize
            }

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = PulseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(PulseError::UnknownLevel {
                        scale: $scale,
                        value: other.to_owned(),
                    }),
                }
            }
        }
    };
}

five_level_scale!(
    /// Primary field: what share of the respondent's circle agrees
    ShareLevel, "share", [
        AlmostNone => "almost_none",
        Few => "few",
        AboutHalf => "about_half",
        Most => "most",
        AlmostAll => "almost_all",
    ]
);

five_level_scale!(
    /// Secondary field: how the respondent compares the precinct to the
    /// previous result
    ComparisonLevel, "comparison", [
        MuchLower => "much_lower",
        Lower => "lower",
        AboutSame => "about_same",
        Higher => "higher",
        MuchHigher => "much_higher",
    ]
);

five_level_scale!(
    /// Tertiary field: how sure the respondent is
    CertaintyLevel, "certainty", [
        VeryUnsure => "very_unsure",
        Unsure => "unsure",
        Neutral => "neutral",
        Sure => "sure",
        VerySure => "very_sure",
    ]
);

/// One submission about one entity. Immutable once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawObservation {
    pub entity_key: EntityKey,
    pub primary: ShareLevel,
    pub secondary: ComparisonLevel,
    pub tertiary: CertaintyLevel,
    pub submitted_at: DateTime<Utc>,
}

impl RawObservation {
    pub fn new(
        entity_key: impl Into<EntityKey>,
        primary: ShareLevel,
        secondary: ComparisonLevel,
        tertiary: CertaintyLevel,
    ) -> Self {
        RawObservation {
            entity_key: entity_key.into(),
            primary,
            secondary,
            tertiary,
            submitted_at: Utc::now(),
        }
    }

    /// Parse from the textual level names used by intake forms
    pub fn parse(
        entity_key: impl Into<EntityKey>,
        primary: &str,
        secondary: &str,
        tertiary: &str,
    ) -> Result<Self, PulseError> {
        Ok(RawObservation::new(
            entity_key,
            primary.parse()?,
            secondary.parse()?,
            tertiary.parse()?,
        ))
    }

    pub fn at(mut self, submitted_at: DateTime<Utc>) -> Self {
        self.submitted_at = submitted_at;
        self
    }
}
