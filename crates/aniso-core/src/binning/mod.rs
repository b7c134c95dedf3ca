//! Energy binning: quantile bin edges and total partition of a particle
//! population, preserving per-pixel grouping inside each bin.

use crate::domain::{AnisoError, AnisoResult, ParticleRecord};
use crate::numerics::deterministic_argsort;
use crate::store::ParticleStore;

/// One energy bin's sub-population. The contained store keeps the parent
/// resolution and pixel grouping.
#[derive(Debug, Clone)]
pub struct BinnedParticleSet {
    bin: usize,
    lower: f64,
    upper: f64,
    store: ParticleStore,
}

impl BinnedParticleSet {
    pub fn bin(&self) -> usize {
        self.bin
    }

    pub fn lower(&self) -> f64 {
        self.lower
    }

    pub fn upper(&self) -> f64 {
        self.upper
    }

    pub fn store(&self) -> &ParticleStore {
        &self.store
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

/// Quantile bin edges over a population's energies: `num_bins + 1` values,
/// non-decreasing, spanning the observed range. With fewer distinct energies
/// than bins the edges collapse and empty bins are permitted downstream.
pub fn compute_bin_edges(energies: &[f64], num_bins: usize) -> AnisoResult<Vec<f64>> {
    if num_bins == 0 {
        return Err(AnisoError::configuration(
            "binning must request at least one bin",
        ));
    }
    if energies.is_empty() {
        return Err(AnisoError::insufficient_data(
            "cannot compute bin edges over an empty population",
        ));
    }

    let order = deterministic_argsort(energies);
    let count = energies.len();
    let mut edges = Vec::with_capacity(num_bins + 1);
    for split in 0..num_bins {
        edges.push(energies[order[split * count / num_bins]]);
    }
    edges.push(energies[order[count - 1]]);
    Ok(edges)
}

/// Assigns every particle to the unique bin with
/// `edges[i] <= energy < edges[i + 1]`, the final bin upper-inclusive.
/// Energies outside the edge span clamp into the first or last bin so the
/// partition stays total for arbitrary caller-supplied edges.
pub fn partition(store: &ParticleStore, edges: &[f64]) -> AnisoResult<Vec<BinnedParticleSet>> {
    if edges.len() < 2 {
        return Err(AnisoError::configuration(format!(
            "partition requires at least 2 bin edges, got {}",
            edges.len()
        )));
    }
    if edges.windows(2).any(|pair| pair[0] > pair[1]) {
        return Err(AnisoError::configuration(
            "bin edges must be non-decreasing",
        ));
    }

    let num_bins = edges.len() - 1;
    let interior = &edges[1..num_bins];
    let mut populations: Vec<Vec<ParticleRecord>> = vec![Vec::new(); num_bins];
    for record in store.all_particles() {
        let bin = interior.partition_point(|&edge| edge <= record.energy);
        populations[bin].push(*record);
    }

    populations
        .into_iter()
        .enumerate()
        .map(|(bin, records)| {
            Ok(BinnedParticleSet {
                bin,
                lower: edges[bin],
                upper: edges[bin + 1],
                store: ParticleStore::load(store.resolution(), records)?,
            })
        })
        .collect()
}
