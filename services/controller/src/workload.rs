//! Workload units and placement constraints.
//!
//! A [`WorkloadUnit`] is the controller's read-only view of one indivisible
//! schedulable request from the orchestrator. The controller never mutates
//! workloads; it only decides what capacity to stand up for them.

use std::collections::BTreeMap;

use flotilla_id::WorkloadId;
use serde::{Deserialize, Serialize};

use crate::resources::ResourceVector;

/// A taint applied to pool nodes; workloads must tolerate it to be placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taint {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// A toleration declared by a workload.
///
/// A toleration with `value: None` tolerates any value for its key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toleration {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Toleration {
    /// Returns true if this toleration covers the given taint.
    pub fn tolerates(&self, taint: &Taint) -> bool {
        self.key == taint.key && (self.value.is_none() || self.value == taint.value)
    }
}

/// Placement constraints attached to a workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementConstraints {
    /// Labels the hosting node must carry (matched against pool and SKU labels).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub required_labels: BTreeMap<String, String>,

    /// Zones the workload may be placed in; empty means any zone.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<String>,

    /// Taints the workload tolerates.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,

    /// Workloads sharing an anti-affinity group must land on distinct nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anti_affinity_group: Option<String>,
}

impl PlacementConstraints {
    /// Returns true if every taint in `taints` is tolerated.
    pub fn tolerates_all(&self, taints: &[Taint]) -> bool {
        taints
            .iter()
            .all(|taint| self.tolerations.iter().any(|t| t.tolerates(taint)))
    }

    /// Returns true if the given zone is acceptable.
    pub fn allows_zone(&self, zone: &str) -> bool {
        self.zones.is_empty() || self.zones.iter().any(|z| z == zone)
    }

    /// Returns true if `labels` satisfies all required labels.
    pub fn labels_satisfied(&self, labels: &BTreeMap<String, String>) -> bool {
        self.required_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}

/// An indivisible schedulable request, owned by the external orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadUnit {
    pub workload_id: WorkloadId,

    /// Human-readable name, for logs and the status surface only.
    pub name: String,

    /// Resource demands.
    pub demands: ResourceVector,

    /// Placement constraints.
    #[serde(default)]
    pub constraints: PlacementConstraints,

    /// Priority class; higher schedules first within a packing pass.
    #[serde(default)]
    pub priority: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taint(key: &str, value: Option<&str>) -> Taint {
        Taint {
            key: key.to_string(),
            value: value.map(str::to_string),
        }
    }

    #[test]
    fn test_toleration_exact_value() {
        let tol = Toleration {
            key: "dedicated".to_string(),
            value: Some("batch".to_string()),
        };
        assert!(tol.tolerates(&taint("dedicated", Some("batch"))));
        assert!(!tol.tolerates(&taint("dedicated", Some("web"))));
        assert!(!tol.tolerates(&taint("other", Some("batch"))));
    }

    #[test]
    fn test_toleration_wildcard_value() {
        let tol = Toleration {
            key: "dedicated".to_string(),
            value: None,
        };
        assert!(tol.tolerates(&taint("dedicated", Some("batch"))));
        assert!(tol.tolerates(&taint("dedicated", None)));
    }

    #[test]
    fn test_constraints_tolerates_all() {
        let constraints = PlacementConstraints {
            tolerations: vec![Toleration {
                key: "dedicated".to_string(),
                value: None,
            }],
            ..Default::default()
        };
        assert!(constraints.tolerates_all(&[taint("dedicated", Some("x"))]));
        assert!(!constraints.tolerates_all(&[
            taint("dedicated", Some("x")),
            taint("spot-only", None)
        ]));
        assert!(constraints.tolerates_all(&[]));
    }

    #[test]
    fn test_constraints_zone_filter() {
        let constraints = PlacementConstraints {
            zones: vec!["zone-a".to_string()],
            ..Default::default()
        };
        assert!(constraints.allows_zone("zone-a"));
        assert!(!constraints.allows_zone("zone-b"));

        let unconstrained = PlacementConstraints::default();
        assert!(unconstrained.allows_zone("zone-b"));
    }

    #[test]
    fn test_required_labels_subset() {
        let mut required = BTreeMap::new();
        required.insert("family".to_string(), "m".to_string());
        let constraints = PlacementConstraints {
            required_labels: required,
            ..Default::default()
        };

        let mut labels = BTreeMap::new();
        labels.insert("family".to_string(), "m".to_string());
        labels.insert("size".to_string(), "large".to_string());
        assert!(constraints.labels_satisfied(&labels));

        labels.insert("family".to_string(), "c".to_string());
        assert!(!constraints.labels_satisfied(&labels));
    }
}
