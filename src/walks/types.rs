//! Walk and booking documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::store::Document;

/// Treat an explicit `null` the same as a missing list.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Audience restrictions of a walk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WalkConditions {
    /// Allowed sexes. Empty means anyone.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub sex: Vec<String>,
    /// Allowed age bands such as `"25-34"`. Empty means any age.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub age_groups: Vec<String>,
    /// Free text, informational only.
    #[serde(default)]
    pub country_region: Option<String>,
}

impl WalkConditions {
    pub fn is_unrestricted(&self) -> bool {
        self.sex.is_empty() && self.age_groups.is_empty()
    }
}

fn default_max_participants() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Walk {
    pub walk_id: String,
    pub title: String,
    /// `YYYY-MM-DD`.
    pub date: String,
    /// `HH:MM`; `h:mm AM/PM` is tolerated.
    pub time: String,
    pub city: String,
    pub neighborhood: String,
    pub starting_point: String,
    #[serde(default)]
    pub ending_point: Option<String>,
    #[serde(default)]
    pub duration_hours: Option<f64>,
    #[serde(default = "default_max_participants")]
    pub max_participants: u32,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub conditions: Option<WalkConditions>,
    pub organizer_id: String,
    pub organizer_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document for Walk {
    const COLLECTION: &'static str = "walks";

    fn key(&self) -> String {
        self.walk_id.clone()
    }
}

/// Body of `POST /walks`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewWalk {
    pub title: String,
    pub date: String,
    pub time: String,
    pub city: String,
    pub neighborhood: String,
    pub starting_point: String,
    #[serde(default)]
    pub ending_point: Option<String>,
    #[serde(default)]
    pub duration_hours: Option<f64>,
    #[serde(default = "default_max_participants")]
    pub max_participants: u32,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub conditions: Option<WalkConditions>,
}

/// Body of `PUT /walks/{id}`. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WalkUpdate {
    pub title: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub city: Option<String>,
    pub neighborhood: Option<String>,
    pub starting_point: Option<String>,
    pub ending_point: Option<String>,
    pub duration_hours: Option<f64>,
    pub max_participants: Option<u32>,
    pub description: Option<String>,
    pub conditions: Option<WalkConditions>,
}

impl WalkUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.date.is_none()
            && self.time.is_none()
            && self.city.is_none()
            && self.neighborhood.is_none()
            && self.starting_point.is_none()
            && self.ending_point.is_none()
            && self.duration_hours.is_none()
            && self.max_participants.is_none()
            && self.description.is_none()
            && self.conditions.is_none()
    }

    pub fn apply(self, walk: &mut Walk) {
        if let Some(v) = self.title {
            walk.title = v;
        }
        if let Some(v) = self.date {
            walk.date = v;
        }
        if let Some(v) = self.time {
            walk.time = v;
        }
        if let Some(v) = self.city {
            walk.city = v;
        }
        if let Some(v) = self.neighborhood {
            walk.neighborhood = v;
        }
        if let Some(v) = self.starting_point {
            walk.starting_point = v;
        }
        if let Some(v) = self.ending_point {
            walk.ending_point = Some(v);
        }
        if let Some(v) = self.duration_hours {
            walk.duration_hours = Some(v);
        }
        if let Some(v) = self.max_participants {
            walk.max_participants = v;
        }
        if let Some(v) = self.description {
            walk.description = Some(v);
        }
        if let Some(v) = self.conditions {
            walk.conditions = Some(v);
        }
        walk.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    #[default]
    Active,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub booking_id: String,
    pub walk_id: String,
    pub user_id: String,
    pub user_name: String,
    pub user_email: String,
    pub booked_at: DateTime<Utc>,
    #[serde(default)]
    pub status: BookingStatus,
}

impl Booking {
    pub fn is_active(&self) -> bool {
        self.status == BookingStatus::Active
    }
}

impl Document for Booking {
    const COLLECTION: &'static str = "bookings";

    fn key(&self) -> String {
        self.booking_id.clone()
    }
}
