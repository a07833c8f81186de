//! Live vs desired state reconciliation
//!
//! A pure comparison of two resource snapshots. Nothing here touches a
//! platform; plugins build the snapshots and report the verdict.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Attribute map of a resource
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// A resource in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Unique within one snapshot
    pub address: String,

    #[serde(default)]
    pub attributes: Attributes,

    /// Planned actions, only present in desired snapshots built from a plan
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
}

impl Resource {
    pub fn new(address: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            address: address.into(),
            attributes,
            actions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

/// One difference between the snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub address: String,
    pub kind: ChangeKind,

    /// Live attributes; absent for creates
    pub current: Option<Attributes>,

    /// Desired attributes; absent for deletes
    pub desired: Option<Attributes>,

    /// Planned actions of the desired resource, if any
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
}

impl Change {
    /// One-line operator description
    pub fn reason(&self) -> String {
        if !self.actions.is_empty() {
            return format!("{} will be {}", self.address, self.actions.join(", "));
        }
        let verb = match self.kind {
            ChangeKind::Create => "created",
            ChangeKind::Update => "updated",
            ChangeKind::Delete => "deleted",
        };
        format!("{} will be {}", self.address, verb)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    InSync,
    OutOfSync,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::InSync => "IN_SYNC",
            SyncStatus::OutOfSync => "OUT_OF_SYNC",
        }
    }
}

/// Reconciliation outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: SyncStatus,
    pub changes: Vec<Change>,

    /// Empty when in sync
    pub short_reason: String,

    /// One line per change
    pub reasons: Vec<String>,
}

impl Verdict {
    pub fn is_in_sync(&self) -> bool {
        self.status == SyncStatus::InSync
    }

    /// Reasons joined one per line
    pub fn reason(&self) -> String {
        self.reasons.join("\n")
    }
}

/// Compare `live` against `desired`.
///
/// Creates and updates follow the order of `desired`, then deletes follow the
/// order of `live`. Attribute maps are compared deeply and key order never
/// matters.
pub fn reconcile(live: &[Resource], desired: &[Resource]) -> Verdict {
    let live_index: HashMap<&str, &Resource> =
        live.iter().map(|r| (r.address.as_str(), r)).collect();
    let desired_index: HashMap<&str, &Resource> =
        desired.iter().map(|r| (r.address.as_str(), r)).collect();

    let mut changes = Vec::new();

    for want in desired {
        match live_index.get(want.address.as_str()) {
            None => changes.push(Change {
                address: want.address.clone(),
                kind: ChangeKind::Create,
                current: None,
                desired: Some(want.attributes.clone()),
                actions: want.actions.clone(),
            }),
            Some(have) if have.attributes != want.attributes => changes.push(Change {
                address: want.address.clone(),
                kind: ChangeKind::Update,
                current: Some(have.attributes.clone()),
                desired: Some(want.attributes.clone()),
                actions: want.actions.clone(),
            }),
            Some(_) => {}
        }
    }

    for have in live {
        if !desired_index.contains_key(have.address.as_str()) {
            changes.push(Change {
                address: have.address.clone(),
                kind: ChangeKind::Delete,
                current: Some(have.attributes.clone()),
                desired: None,
                actions: Vec::new(),
            });
        }
    }

    let reasons: Vec<String> = changes.iter().map(Change::reason).collect();
    let (status, short_reason) = if changes.is_empty() {
        (SyncStatus::InSync, String::new())
    } else {
        (
            SyncStatus::OutOfSync,
            format!("{} resources need to be updated", changes.len()),
        )
    };

    Verdict {
        status,
        changes,
        short_reason,
        reasons,
    }
}
