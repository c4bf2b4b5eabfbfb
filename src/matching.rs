//! Audience matching for walks.
//!
//! A walk can restrict its audience by sex and by age band. The same rules
//! decide which walks a user sees when browsing and which users are alerted
//! when a walk is created. Neighborhood is informational only and never
//! participates in matching.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::accounts::User;
use crate::walks::{Walk, WalkConditions};

/// Canonical sex value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sex {
    M,
    F,
    X,
}

impl Sex {
    /// Normalize legacy and current spellings. Unrecognized input yields `None`.
    pub fn normalize(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "M" | "MALE" => Some(Self::M),
            "F" | "FEMALE" => Some(Self::F),
            "X" | "PREFER NOT TO SAY" | "N/A" | "OTHER" => Some(Self::X),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M => "M",
            Self::F => "F",
            Self::X => "X",
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalize a list, dropping unrecognized values.
pub fn normalize_sex_list(values: &[String]) -> HashSet<Sex> {
    values.iter().filter_map(|v| Sex::normalize(v)).collect()
}

/// Non-overlapping age bands a walk can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgeBand {
    From18To24,
    From25To34,
    From35To44,
    From45To54,
    From55To64,
    From65To74,
    From75,
}

impl AgeBand {
    pub const ALL: [AgeBand; 7] = [
        Self::From18To24,
        Self::From25To34,
        Self::From35To44,
        Self::From45To54,
        Self::From55To64,
        Self::From65To74,
        Self::From75,
    ];

    pub fn parse(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.label() == label.trim())
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::From18To24 => "18-24",
            Self::From25To34 => "25-34",
            Self::From35To44 => "35-44",
            Self::From45To54 => "45-54",
            Self::From55To64 => "55-64",
            Self::From65To74 => "65-74",
            Self::From75 => "75+",
        }
    }

    pub fn contains(&self, age: u32) -> bool {
        match self {
            Self::From18To24 => (18..=24).contains(&age),
            Self::From25To34 => (25..=34).contains(&age),
            Self::From35To44 => (35..=44).contains(&age),
            Self::From45To54 => (45..=54).contains(&age),
            Self::From55To64 => (55..=64).contains(&age),
            Self::From65To74 => (65..=74).contains(&age),
            Self::From75 => age >= 75,
        }
    }
}

/// Bucket label used by admin statistics. Ages under 18 fall into the first
/// band; a missing or zero age is "Unknown".
pub fn age_bucket(age: Option<u32>) -> &'static str {
    match age {
        None | Some(0) => "Unknown",
        Some(a) if a < 25 => "18-24",
        Some(a) if a < 35 => "25-34",
        Some(a) if a < 45 => "35-44",
        Some(a) if a < 55 => "45-54",
        Some(a) if a < 65 => "55-64",
        Some(a) if a < 75 => "65-74",
        Some(_) => "75+",
    }
}

/// Whether a user with `sex` and `age` is in the audience of `conditions`.
///
/// A sex restriction with no recognizable values does not restrict. A user
/// without an age never passes an age restriction.
pub fn conditions_admit(conditions: &WalkConditions, sex: Option<&str>, age: Option<u32>) -> bool {
    let allowed_sex = normalize_sex_list(&conditions.sex);
    if !allowed_sex.is_empty() {
        match sex.and_then(Sex::normalize) {
            Some(s) if allowed_sex.contains(&s) => {}
            _ => return false,
        }
    }

    let bands: Vec<AgeBand> = conditions
        .age_groups
        .iter()
        .filter_map(|g| AgeBand::parse(g))
        .collect();
    if !conditions.age_groups.is_empty() {
        match age {
            Some(a) if bands.iter().any(|b| b.contains(a)) => {}
            _ => return false,
        }
    }

    true
}

/// Whether `user` matches the audience of `walk`. Walks without conditions
/// admit everyone.
pub fn walk_admits(walk: &Walk, user: &User) -> bool {
    match &walk.conditions {
        Some(conditions) => conditions_admit(conditions, user.sex.as_deref(), user.age),
        None => true,
    }
}

/// Pick the users to alert about a newly created walk: notifications on,
/// same city, not the organizer, account still open, and inside the walk's
/// audience.
pub fn select_recipients<'a>(walk: &Walk, users: &'a [User]) -> Vec<&'a User> {
    users
        .iter()
        .filter(|u| u.notifications_enabled)
        .filter(|u| !u.is_cancelled)
        .filter(|u| u.user_id != walk.organizer_id)
        .filter(|u| u.city.as_deref() == Some(walk.city.as_str()))
        .filter(|u| walk_admits(walk, u))
        .collect()
}
