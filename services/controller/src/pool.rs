//! NodePool configuration.
//!
//! Pools are the operator surface: each one scopes a slice of the fleet with
//! SKU requirements, a capacity-type preference order, aggregate resource
//! limits, a disruption budget, and consolidation settings. Pools are loaded
//! from a TOML file at startup and versioned with a canonical spec hash so
//! the status surface can report which configuration a decision was made
//! against.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use flotilla_id::PoolId;
use flotilla_reconcile::SpecHash;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::CapacityType;
use crate::resources::ResourceVector;
use crate::workload::{Taint, WorkloadUnit};

/// Errors loading or validating pool configuration.
///
/// All of these are configuration errors: fatal at load, never retried.
#[derive(Debug, Error)]
pub enum PoolConfigError {
    #[error("failed to read pool file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse pool file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("pool '{0}' declared more than once")]
    DuplicateName(String),

    #[error("pool '{name}' is invalid: {reason}")]
    Invalid { name: String, reason: String },
}

/// SKU requirements for a pool.
///
/// Empty lists mean "no restriction" for that axis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolRequirements {
    /// Allowed SKU categories (e.g. general, compute, memory).
    #[serde(default)]
    pub categories: Vec<String>,

    /// Allowed SKU families.
    #[serde(default)]
    pub families: Vec<String>,

    /// Allowed SKU sizes.
    #[serde(default)]
    pub sizes: Vec<String>,

    /// Allowed availability zones.
    #[serde(default)]
    pub zones: Vec<String>,
}

/// Disruption settings for a pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisruptionBudget {
    /// Maximum number of nodes in this pool disrupted concurrently.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,

    /// Whether the consolidation pass considers this pool.
    #[serde(default = "default_true")]
    pub consolidation: bool,

    /// Nodes whose busiest resource dimension is below this ratio are
    /// consolidation candidates.
    #[serde(default = "default_underutilization")]
    pub underutilization_threshold: f64,
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent() -> u32 {
    1
}

fn default_underutilization() -> f64 {
    0.5
}

impl Default for DisruptionBudget {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            consolidation: true,
            underutilization_threshold: default_underutilization(),
        }
    }
}

/// A versioned pool definition.
#[derive(Debug, Clone)]
pub struct NodePool {
    pub pool_id: PoolId,
    pub name: String,
    pub requirements: PoolRequirements,

    /// Capacity types in preference order (e.g. spot before on-demand).
    pub capacity_type_order: Vec<CapacityType>,

    /// Aggregate ceiling across all Ready nodes in the pool.
    pub limits: ResourceVector,

    pub disruption: DisruptionBudget,

    /// Labels carried by every node launched for this pool.
    pub labels: BTreeMap<String, String>,

    /// Taints applied to every node launched for this pool.
    pub taints: Vec<Taint>,

    /// How long a launched instance may take to register before its claim fails.
    pub registration_timeout: Duration,

    /// Hash of the pool definition, recomputed at load.
    pub spec_hash: SpecHash,
}

impl NodePool {
    /// Returns true if the workload's constraints are compatible with this
    /// pool: it tolerates the pool taints, accepts at least one allowed zone,
    /// and does not require labels the pool can never provide.
    ///
    /// SKU-level labels (family/size/category) are checked later by the fit
    /// simulator; here only pool-level labels are considered, so a workload
    /// requiring a SKU label is still admitted.
    pub fn admits(&self, workload: &WorkloadUnit) -> bool {
        if !workload.constraints.tolerates_all(&self.taints) {
            return false;
        }
        if !self.requirements.zones.is_empty()
            && !workload.constraints.zones.is_empty()
            && !self
                .requirements
                .zones
                .iter()
                .any(|z| workload.constraints.allows_zone(z))
        {
            return false;
        }
        // Pool-level labels the workload requires must match if present.
        workload
            .constraints
            .required_labels
            .iter()
            .all(|(k, v)| match self.labels.get(k) {
                Some(have) => have == v,
                None => true, // may be satisfied by SKU labels
            })
    }
}

// =============================================================================
// File format
// =============================================================================

#[derive(Debug, Deserialize)]
struct PoolFile {
    #[serde(default, rename = "pool")]
    pools: Vec<PoolEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PoolEntry {
    name: String,

    #[serde(default)]
    requirements: PoolRequirements,

    #[serde(default = "default_capacity_order")]
    capacity_type_order: Vec<CapacityType>,

    #[serde(default)]
    limits: ResourceVector,

    #[serde(default)]
    disruption: DisruptionBudget,

    #[serde(default)]
    labels: BTreeMap<String, String>,

    #[serde(default)]
    taints: Vec<Taint>,

    #[serde(default = "default_registration_timeout_secs")]
    registration_timeout_secs: u64,
}

fn default_capacity_order() -> Vec<CapacityType> {
    vec![CapacityType::Spot, CapacityType::OnDemand]
}

fn default_registration_timeout_secs() -> u64 {
    300
}

/// The loaded set of pools, keyed by ID.
#[derive(Debug, Clone, Default)]
pub struct PoolSet {
    pools: Vec<NodePool>,
}

impl PoolSet {
    /// Load pools from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PoolConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| PoolConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&raw)
    }

    /// Parse pools from TOML text.
    pub fn parse(raw: &str) -> Result<Self, PoolConfigError> {
        let file: PoolFile = toml::from_str(raw)?;

        let mut seen = std::collections::HashSet::new();
        let mut pools = Vec::with_capacity(file.pools.len());
        for entry in file.pools {
            if !seen.insert(entry.name.clone()) {
                return Err(PoolConfigError::DuplicateName(entry.name));
            }
            pools.push(Self::build(entry)?);
        }

        Ok(Self { pools })
    }

    fn build(entry: PoolEntry) -> Result<NodePool, PoolConfigError> {
        if entry.name.is_empty() {
            return Err(PoolConfigError::Invalid {
                name: "<unnamed>".to_string(),
                reason: "name must not be empty".to_string(),
            });
        }
        if entry.capacity_type_order.is_empty() {
            return Err(PoolConfigError::Invalid {
                name: entry.name,
                reason: "capacity_type_order must not be empty".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&entry.disruption.underutilization_threshold) {
            return Err(PoolConfigError::Invalid {
                name: entry.name,
                reason: "underutilization_threshold must be within [0, 1]".to_string(),
            });
        }

        let spec_hash = SpecHash::from_json(&serde_json::to_value(&entry).map_err(|e| {
            PoolConfigError::Invalid {
                name: entry.name.clone(),
                reason: e.to_string(),
            }
        })?);

        Ok(NodePool {
            pool_id: PoolId::new(),
            name: entry.name,
            requirements: entry.requirements,
            capacity_type_order: entry.capacity_type_order,
            limits: entry.limits,
            disruption: entry.disruption,
            labels: entry.labels,
            taints: entry.taints,
            registration_timeout: Duration::from_secs(entry.registration_timeout_secs),
            spec_hash,
        })
    }

    /// Construct a pool set directly (tests and dev wiring).
    pub fn from_pools(pools: Vec<NodePool>) -> Self {
        Self { pools }
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodePool> {
        self.pools.iter()
    }

    pub fn get(&self, pool_id: PoolId) -> Option<&NodePool> {
        self.pools.iter().find(|p| p.pool_id == pool_id)
    }

    pub fn by_name(&self, name: &str) -> Option<&NodePool> {
        self.pools.iter().find(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}
