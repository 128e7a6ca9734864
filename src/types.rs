use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a published program.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgramStatus {
    #[default]
    Active,
    Closed,
}

impl fmt::Display for ProgramStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgramStatus::Active => f.write_str("Active"),
            ProgramStatus::Closed => f.write_str("Closed"),
        }
    }
}

/// Reward text per severity tier. Formatting is up to the program owner.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BountyRanges {
    pub low: String,
    pub medium: String,
    pub high: String,
    pub critical: String,
}

/// Scope entry ids arrive from the browser either as numbers or strings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryId {
    Number(u64),
    Text(String),
}

impl Default for EntryId {
    fn default() -> Self {
        EntryId::Text(String::new())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeEntry {
    pub id: EntryId,
    #[serde(rename = "type")]
    pub kind: String,
    pub target: String,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub bounty_ranges: BountyRanges,
    #[serde(default)]
    pub markdown: String,
    #[serde(default)]
    pub scope: Vec<ScopeEntry>,
    #[serde(default)]
    pub status: ProgramStatus,
    #[serde(default)]
    pub reports: u64,
    #[serde(default = "default_bounties")]
    pub bounties: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

pub(crate) fn default_bounties() -> String {
    "$0".to_string()
}

/// Fields a company supplies when publishing a program. Server-managed keys
/// (`id`, `status`, `reports`, timestamps) are not part of the draft and are
/// dropped during deserialization.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProgramDraft {
    pub name: String,
    pub description: String,
    pub bounty_ranges: BountyRanges,
    pub markdown: String,
    pub scope: Vec<ScopeEntry>,
    pub bounties: Option<String>,
}

/// Partial update. `None` keeps the stored value.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProgramPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub bounty_ranges: Option<BountyRanges>,
    pub markdown: Option<String>,
    pub scope: Option<Vec<ScopeEntry>>,
    pub status: Option<ProgramStatus>,
    pub bounties: Option<String>,
}

impl ProgramPatch {
    #[cfg(test)]
    pub(crate) fn status(status: ProgramStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Apply the supplied fields onto `program`. Identity, creation time and
    /// the report counter are not reachable from a patch.
    pub fn apply_to(self, program: &mut Program) {
        if let Some(name) = self.name {
            program.name = name;
        }
        if let Some(description) = self.description {
            program.description = description;
        }
        if let Some(ranges) = self.bounty_ranges {
            program.bounty_ranges = ranges;
        }
        if let Some(markdown) = self.markdown {
            program.markdown = markdown;
        }
        if let Some(scope) = self.scope {
            program.scope = scope;
        }
        if let Some(status) = self.status {
            program.status = status;
        }
        if let Some(bounties) = self.bounties {
            program.bounties = bounties;
        }
    }
}
