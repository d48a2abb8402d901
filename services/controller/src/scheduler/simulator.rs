//! The fit simulator: multi-dimensional bin-packing of unplaced workloads
//! onto candidate SKUs.
//!
//! `simulate` is a pure function: no side effects, safe to call repeatedly
//! and speculatively. Given the same inputs it always produces the same
//! plan; candidate ordering ties are broken by price and then SKU ID.

use std::collections::HashSet;

use flotilla_id::WorkloadId;
use serde::Serialize;
use thiserror::Error;

use crate::catalog::{CapacitySku, CapacityType};
use crate::pool::NodePool;
use crate::resources::ResourceVector;
use crate::workload::WorkloadUnit;

/// Why no packing solution exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InfeasibleReason {
    /// Some workload is incompatible with every candidate SKU.
    NoMatchingSku,

    /// A plan exists but would push the pool past its resource limits.
    ResourceLimitExceeded,

    /// Candidate SKUs exist but none has an available offering in the
    /// pool's capacity-type preference order.
    NoOfferedCapacity,
}

/// No packing solution exists for the current constraints.
///
/// Surfaced as a status condition; not retried automatically, since it
/// requires constraint relaxation to resolve.
#[derive(Debug, Clone, Error)]
#[error("infeasible ({reason:?}): {detail}")]
pub struct Infeasible {
    pub reason: InfeasibleReason,
    pub detail: String,
}

/// One launch decision in a packing plan: a SKU, how many instances of it,
/// and which workloads each instance hosts.
#[derive(Debug, Clone, Serialize)]
pub struct PlanEntry {
    pub sku_id: String,
    pub capacity_type: CapacityType,
    pub zone: String,
    pub price_per_hour: f64,

    /// Allocatable capacity of one instance of this SKU.
    pub capacity_each: ResourceVector,

    /// Workload assignment per replica; `assignments.len()` is the replica
    /// count and every inner set fits within `capacity_each`.
    pub assignments: Vec<Vec<WorkloadId>>,
}

impl PlanEntry {
    pub fn replicas(&self) -> u32 {
        self.assignments.len() as u32
    }

    pub fn hourly_cost(&self) -> f64 {
        self.price_per_hour * self.assignments.len() as f64
    }
}

/// A feasible packing of all input workloads.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PackingPlan {
    pub entries: Vec<PlanEntry>,
}

impl PackingPlan {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn node_count(&self) -> u32 {
        self.entries.iter().map(PlanEntry::replicas).sum()
    }

    pub fn total_hourly_cost(&self) -> f64 {
        self.entries.iter().map(PlanEntry::hourly_cost).sum()
    }

    /// All workloads assigned across the plan. Simulation never silently
    /// drops a workload: this always equals the input set for an `Ok` plan.
    pub fn assigned_workloads(&self) -> Vec<WorkloadId> {
        self.entries
            .iter()
            .flat_map(|e| e.assignments.iter().flatten().copied())
            .collect()
    }
}

/// Inputs to a simulation pass.
pub struct SimulatorInput<'a> {
    /// Workloads the orchestrator cannot currently place.
    pub unplaced: &'a [WorkloadUnit],

    /// Catalog SKUs matching the pool's requirements.
    pub candidates: &'a [CapacitySku],

    /// Capacity already committed to the pool (live nodes + in-flight
    /// claims), checked against the pool limits.
    pub committed: &'a ResourceVector,

    pub pool: &'a NodePool,
}

/// Compute a feasible packing of the unplaced workloads, or an
/// [`Infeasible`] result with a reason code.
///
/// SKUs are tried in preference order: first by the position of their best
/// available offering in the pool's capacity-type order (so spot-capable
/// shapes sort before on-demand-only ones when the pool prefers spot), then
/// by current price, then by SKU ID for determinism. Workloads are packed
/// first-fit-decreasing onto the best SKU; anything that cannot share that
/// shape falls through to the next one.
pub fn simulate(input: SimulatorInput<'_>) -> Result<PackingPlan, Infeasible> {
    let SimulatorInput {
        unplaced,
        candidates,
        committed,
        pool,
    } = input;

    if unplaced.is_empty() {
        return Ok(PackingPlan::default());
    }

    if candidates.is_empty() {
        return Err(Infeasible {
            reason: InfeasibleReason::NoMatchingSku,
            detail: format!("no SKU matches requirements of pool '{}'", pool.name),
        });
    }

    // Order candidates: capacity-type preference, then price, then SKU ID.
    let mut ordered: Vec<(&CapacitySku, CapacityType, f64, usize)> = candidates
        .iter()
        .filter_map(|sku| {
            sku.best_offering(&pool.capacity_type_order).map(|(ct, price)| {
                let pref = pool
                    .capacity_type_order
                    .iter()
                    .position(|c| *c == ct)
                    .unwrap_or(usize::MAX);
                (sku, ct, price, pref)
            })
        })
        .collect();

    if ordered.is_empty() {
        return Err(Infeasible {
            reason: InfeasibleReason::NoOfferedCapacity,
            detail: format!(
                "{} candidate SKUs for pool '{}' but none currently offered",
                candidates.len(),
                pool.name
            ),
        });
    }

    ordered.sort_by(|a, b| {
        a.3.cmp(&b.3)
            .then(a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal))
            .then(a.0.sku_id.cmp(&b.0.sku_id))
    });

    // Decreasing demand order, higher priority first; workload ID breaks ties.
    let mut remaining: Vec<&WorkloadUnit> = unplaced.iter().collect();
    remaining.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(b.demands.cpu_millis.cmp(&a.demands.cpu_millis))
            .then(b.demands.memory_bytes.cmp(&a.demands.memory_bytes))
            .then(a.workload_id.cmp(&b.workload_id))
    });

    let mut entries = Vec::new();
    for (sku, capacity_type, price, _) in &ordered {
        if remaining.is_empty() {
            break;
        }

        let (eligible, rest): (Vec<_>, Vec<_>) = remaining
            .into_iter()
            .partition(|w| workload_fits_sku(w, sku, pool));
        remaining = rest;

        if eligible.is_empty() {
            continue;
        }

        let assignments = pack_first_fit(&eligible, &sku.capacity);
        entries.push(PlanEntry {
            sku_id: sku.sku_id.clone(),
            capacity_type: *capacity_type,
            zone: sku.zone.clone(),
            price_per_hour: *price,
            capacity_each: sku.capacity.clone(),
            assignments,
        });
    }

    if !remaining.is_empty() {
        let names: Vec<_> = remaining.iter().map(|w| w.name.as_str()).collect();
        return Err(Infeasible {
            reason: InfeasibleReason::NoMatchingSku,
            detail: format!("no offered SKU satisfies workloads: {}", names.join(", ")),
        });
    }

    // Limit check: committed capacity plus this plan must stay within the
    // pool ceiling on every limited dimension.
    let mut total = committed.clone();
    for entry in &entries {
        for _ in 0..entry.replicas() {
            total.add(&entry.capacity_each);
        }
    }
    if exceeds_limits(&total, &pool.limits) {
        return Err(Infeasible {
            reason: InfeasibleReason::ResourceLimitExceeded,
            detail: format!(
                "plan would commit {}m CPU / {} bytes memory against pool limits",
                total.cpu_millis, total.memory_bytes
            ),
        });
    }

    Ok(PackingPlan { entries })
}

/// A zero limit on a dimension means unlimited.
fn exceeds_limits(total: &ResourceVector, limits: &ResourceVector) -> bool {
    (limits.cpu_millis > 0 && total.cpu_millis > limits.cpu_millis)
        || (limits.memory_bytes > 0 && total.memory_bytes > limits.memory_bytes)
        || (limits.ephemeral_bytes > 0 && total.ephemeral_bytes > limits.ephemeral_bytes)
        || limits
            .extended
            .iter()
            .any(|(name, limit)| *limit > 0 && total.extended.get(name).copied().unwrap_or(0) > *limit)
}

fn workload_fits_sku(workload: &WorkloadUnit, sku: &CapacitySku, pool: &NodePool) -> bool {
    if !sku.capacity.fits(&workload.demands) {
        return false;
    }
    if !workload.constraints.allows_zone(&sku.zone) {
        return false;
    }
    if !workload.constraints.tolerates_all(&pool.taints) {
        return false;
    }
    let mut labels = pool.labels.clone();
    labels.extend(sku.labels.as_map());
    workload.constraints.labels_satisfied(&labels)
}

struct Bin {
    used: ResourceVector,
    groups: HashSet<String>,
    workloads: Vec<WorkloadId>,
}

/// First-fit packing over pre-sorted workloads. Workloads sharing an
/// anti-affinity group never land in the same bin.
fn pack_first_fit(workloads: &[&WorkloadUnit], capacity: &ResourceVector) -> Vec<Vec<WorkloadId>> {
    let mut bins: Vec<Bin> = Vec::new();

    for workload in workloads {
        let group = workload.constraints.anti_affinity_group.as_deref();
        let slot = bins.iter_mut().find(|bin| {
            let mut used = bin.used.clone();
            used.add(&workload.demands);
            capacity.fits(&used) && group.is_none_or(|g| !bin.groups.contains(g))
        });

        match slot {
            Some(bin) => {
                bin.used.add(&workload.demands);
                bin.workloads.push(workload.workload_id);
                if let Some(g) = group {
                    bin.groups.insert(g.to_string());
                }
            }
            None => {
                let mut bin = Bin {
                    used: workload.demands.clone(),
                    groups: HashSet::new(),
                    workloads: vec![workload.workload_id],
                };
                if let Some(g) = group {
                    bin.groups.insert(g.to_string());
                }
                bins.push(bin);
            }
        }
    }

    bins.into_iter().map(|b| b.workloads).collect()
}
