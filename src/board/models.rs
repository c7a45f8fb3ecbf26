use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Fresh random identifier.
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Opaque lead identity.
    LeadId
);
string_id!(StageId);
string_id!(PipelineId);
string_id!(EmployeeId);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Contacted,
    Qualified,
    Lost,
    Other,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Contacted => "contacted",
            Self::Qualified => "qualified",
            Self::Lost => "lost",
            Self::Other => "other",
        }
    }
}

impl FromStr for LeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "contacted" => Ok(Self::Contacted),
            "qualified" => Ok(Self::Qualified),
            "lost" => Ok(Self::Lost),
            "other" => Ok(Self::Other),
            _ => Err(format!("Invalid lead status: {}", s)),
        }
    }
}

/// A prospective customer tracked through the stages of one pipeline.
///
/// A lead belongs to exactly one stage at a time. Its pipeline never changes
/// once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lead {
    pub id: LeadId,
    pub name: String,
    pub phone: String,
    pub alt_phone: Option<String>,
    pub location: String,
    pub age: Option<u32>,
    pub status: Option<LeadStatus>,
    pub stage_id: StageId,
    pub pipeline_id: PipelineId,
    pub owner_id: Option<EmployeeId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    /// Board ordering: most recently updated first, id as tie-breaker.
    pub fn board_order(&self, other: &Lead) -> Ordering {
        other
            .updated_at
            .cmp(&self.updated_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// One kanban column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stage {
    pub id: StageId,
    pub name: String,
    pub pipeline_id: PipelineId,
    pub order_index: i64,
    pub color: Option<String>,
}

/// A named collection of stages scoped to one branch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pipeline {
    pub id: PipelineId,
    pub name: String,
    pub branch: String,
}

/// Which leads the acting employee may see on the board.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "employee_id")]
pub enum OwnershipScope {
    #[default]
    All,
    OwnedBy(EmployeeId),
}

impl OwnershipScope {
    pub fn admits(&self, lead: &Lead) -> bool {
        match self {
            Self::All => true,
            Self::OwnedBy(employee) => lead.owner_id.as_ref() == Some(employee),
        }
    }
}

/// One bounded, filtered fetch of a single stage.
#[derive(Debug, Clone, PartialEq)]
pub struct PageQuery {
    pub stage_id: StageId,
    pub pipeline_id: PipelineId,
    pub scope: OwnershipScope,
    pub search: String,
    pub offset: usize,
    pub limit: usize,
}

/// Rows returned by a store plus the total matching the filter for the stage.
#[derive(Debug, Clone, PartialEq)]
pub struct LeadPage {
    pub leads: Vec<Lead>,
    pub total_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewStage {
    pub name: String,
    pub color: Option<String>,
    pub pipeline_id: PipelineId,
    pub order_index: i64,
}

/// Partial update for a stage. `color: Some(None)` clears the color.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StagePatch {
    pub name: Option<String>,
    pub color: Option<Option<String>>,
}

impl StagePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.color.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewLead {
    pub name: String,
    pub phone: String,
    pub alt_phone: Option<String>,
    pub location: String,
    pub age: Option<u32>,
    pub status: Option<LeadStatus>,
    pub stage_id: StageId,
    pub pipeline_id: PipelineId,
    pub owner_id: Option<EmployeeId>,
}

/// Case-insensitive match of the search text against the lead's searchable fields.
pub fn matches_search(lead: &Lead, search: &str) -> bool {
    let needle = search.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    [
        Some(lead.name.as_str()),
        Some(lead.phone.as_str()),
        lead.alt_phone.as_deref(),
        Some(lead.location.as_str()),
    ]
    .into_iter()
    .flatten()
    .any(|field| field.to_lowercase().contains(&needle))
}
