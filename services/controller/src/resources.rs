//! Multi-dimensional resource vectors.
//!
//! All packing and limit arithmetic in the controller runs over
//! [`ResourceVector`]: CPU in millicores, memory and ephemeral storage in
//! bytes, plus named extended resources (accelerators and the like). The
//! vector is a plain value type so the fit simulator can clone and mutate
//! scratch copies without touching shared state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Resource demands or capacity across all tracked dimensions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceVector {
    /// CPU in millicores (1000 = one vCPU).
    #[serde(default)]
    pub cpu_millis: u64,

    /// Memory in bytes.
    #[serde(default)]
    pub memory_bytes: u64,

    /// Ephemeral storage in bytes.
    #[serde(default)]
    pub ephemeral_bytes: u64,

    /// Extended resources by name (e.g. accelerators).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extended: BTreeMap<String, u64>,
}

impl ResourceVector {
    /// A vector with only CPU and memory set, the common case.
    pub fn cpu_mem(cpu_millis: u64, memory_bytes: u64) -> Self {
        Self {
            cpu_millis,
            memory_bytes,
            ..Default::default()
        }
    }

    /// Returns true if every dimension of `demand` fits within `self`.
    pub fn fits(&self, demand: &ResourceVector) -> bool {
        if demand.cpu_millis > self.cpu_millis
            || demand.memory_bytes > self.memory_bytes
            || demand.ephemeral_bytes > self.ephemeral_bytes
        {
            return false;
        }
        demand
            .extended
            .iter()
            .all(|(name, amount)| self.extended.get(name).is_some_and(|have| have >= amount))
    }

    /// Adds `other` into `self`, saturating on overflow.
    pub fn add(&mut self, other: &ResourceVector) {
        self.cpu_millis = self.cpu_millis.saturating_add(other.cpu_millis);
        self.memory_bytes = self.memory_bytes.saturating_add(other.memory_bytes);
        self.ephemeral_bytes = self.ephemeral_bytes.saturating_add(other.ephemeral_bytes);
        for (name, amount) in &other.extended {
            *self.extended.entry(name.clone()).or_insert(0) += amount;
        }
    }

    /// Subtracts `other` from `self`, saturating at zero per dimension.
    pub fn subtract(&mut self, other: &ResourceVector) {
        self.cpu_millis = self.cpu_millis.saturating_sub(other.cpu_millis);
        self.memory_bytes = self.memory_bytes.saturating_sub(other.memory_bytes);
        self.ephemeral_bytes = self.ephemeral_bytes.saturating_sub(other.ephemeral_bytes);
        for (name, amount) in &other.extended {
            if let Some(have) = self.extended.get_mut(name) {
                *have = have.saturating_sub(*amount);
            }
        }
    }

    /// Returns the sum of a sequence of vectors.
    pub fn sum<'a, I: IntoIterator<Item = &'a ResourceVector>>(vectors: I) -> Self {
        let mut total = ResourceVector::default();
        for v in vectors {
            total.add(v);
        }
        total
    }

    /// Returns true if all dimensions are zero.
    pub fn is_zero(&self) -> bool {
        self.cpu_millis == 0
            && self.memory_bytes == 0
            && self.ephemeral_bytes == 0
            && self.extended.values().all(|v| *v == 0)
    }

    /// Utilization of `self` against `capacity` as the maximum ratio across
    /// the CPU and memory dimensions, in `[0.0, 1.0+]`.
    ///
    /// Used by the consolidation pass: a node is underutilized when its
    /// busiest dimension is still below the pool threshold.
    pub fn utilization_against(&self, capacity: &ResourceVector) -> f64 {
        let cpu = ratio(self.cpu_millis, capacity.cpu_millis);
        let mem = ratio(self.memory_bytes, capacity.memory_bytes);
        cpu.max(mem)
    }
}

fn ratio(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fits_all_dimensions() {
        let capacity = ResourceVector::cpu_mem(4000, 8 << 30);
        assert!(capacity.fits(&ResourceVector::cpu_mem(4000, 8 << 30)));
        assert!(capacity.fits(&ResourceVector::cpu_mem(1000, 2 << 30)));
        assert!(!capacity.fits(&ResourceVector::cpu_mem(4001, 1 << 30)));
        assert!(!capacity.fits(&ResourceVector::cpu_mem(1000, 9 << 30)));
    }

    #[test]
    fn test_fits_extended_resources() {
        let mut capacity = ResourceVector::cpu_mem(4000, 8 << 30);
        capacity.extended.insert("gpu".to_string(), 2);

        let mut demand = ResourceVector::cpu_mem(1000, 1 << 30);
        demand.extended.insert("gpu".to_string(), 1);
        assert!(capacity.fits(&demand));

        demand.extended.insert("gpu".to_string(), 3);
        assert!(!capacity.fits(&demand));

        demand.extended.remove("gpu");
        demand.extended.insert("fpga".to_string(), 1);
        assert!(!capacity.fits(&demand));
    }

    #[test]
    fn test_add_subtract_roundtrip() {
        let mut v = ResourceVector::cpu_mem(2000, 4 << 30);
        let delta = ResourceVector::cpu_mem(500, 1 << 30);

        v.add(&delta);
        assert_eq!(v.cpu_millis, 2500);

        v.subtract(&delta);
        assert_eq!(v, ResourceVector::cpu_mem(2000, 4 << 30));
    }

    #[test]
    fn test_subtract_saturates() {
        let mut v = ResourceVector::cpu_mem(100, 100);
        v.subtract(&ResourceVector::cpu_mem(500, 500));
        assert!(v.is_zero());
    }

    #[test]
    fn test_utilization_is_max_dimension() {
        let capacity = ResourceVector::cpu_mem(4000, 8 << 30);
        let used = ResourceVector::cpu_mem(1000, 6 << 30);
        let util = used.utilization_against(&capacity);
        assert!((util - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_utilization_zero_capacity() {
        let used = ResourceVector::cpu_mem(100, 100);
        assert_eq!(used.utilization_against(&ResourceVector::default()), 0.0);
    }
}
