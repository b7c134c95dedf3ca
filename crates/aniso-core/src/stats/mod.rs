//! Per-pixel two-sample Kolmogorov–Smirnov testing against a full-sky
//! reference, with configurable angular pooling of sparse pixels.

use crate::domain::{AnisoResult, EnergyWindow, PixelMap};
use crate::numerics::{ks_statistic, ks_two_sample_p_value, mean, sorted_copy, stable_sum};
use crate::pixelization::Pixelization;
use crate::reweigh::PhysicalConstants;
use crate::store::ParticleStore;
use rayon::prelude::*;

/// Result for a pixel whose pooled neighborhood holds no particles in the
/// window. NaN cannot collide with a genuine p-value in [0, 1].
pub const SENTINEL_NO_DATA: f64 = f64::NAN;

pub fn is_sentinel(value: f64) -> bool {
    value.is_nan()
}

/// Energies inside one window, gathered per pixel, plus the shared reference
/// sample. Built once per window and reused across every pooling width.
pub struct WindowSamples {
    per_pixel: Vec<Vec<f64>>,
    reference_sorted: Vec<f64>,
    reference_mean: f64,
}

impl WindowSamples {
    pub fn reference_len(&self) -> usize {
        self.reference_sorted.len()
    }

    pub fn pixel_sample_len(&self, pixel: usize) -> usize {
        self.per_pixel[pixel].len()
    }
}

pub struct KolmogorovEngine<'a> {
    store: &'a ParticleStore,
    pixelization: &'a Pixelization,
    constants: PhysicalConstants,
}

impl<'a> KolmogorovEngine<'a> {
    pub fn new(
        store: &'a ParticleStore,
        pixelization: &'a Pixelization,
        constants: PhysicalConstants,
    ) -> Self {
        Self {
            store,
            pixelization,
            constants,
        }
    }

    /// Gathers the window's per-pixel energies and the full-sky reference
    /// sample. The reference is fully assembled here, before any per-pixel
    /// test runs.
    pub fn window_samples(&self, window: EnergyWindow) -> AnisoResult<WindowSamples> {
        let lower = self.constants.sim_units_from_tev(window.lower_tev());
        let upper = self.constants.sim_units_from_tev(window.upper_tev());

        let npix = self.store.npix();
        let mut per_pixel: Vec<Vec<f64>> = vec![Vec::new(); npix];
        for record in self.store.all_particles() {
            if record.energy >= lower && record.energy <= upper {
                per_pixel[record.pixel].push(record.energy);
            }
        }

        let reference: Vec<f64> = per_pixel.iter().flatten().copied().collect();
        let reference_mean = mean(&reference).unwrap_or(0.0);
        Ok(WindowSamples {
            per_pixel,
            reference_sorted: sorted_copy(&reference),
            reference_mean,
        })
    }

    /// One directional p-value per pixel: magnitude is the two-sample KS
    /// p-value of the pooled neighborhood against the reference, sign is the
    /// direction of the mean-energy deviation from the reference. Pixels
    /// with empty neighborhoods hold [`SENTINEL_NO_DATA`].
    pub fn significance_map_from(&self, samples: &WindowSamples, width: u32) -> PixelMap {
        let npix = self.store.npix();
        let values: Vec<f64> = (0..npix)
            .into_par_iter()
            .map(|pixel| self.pixel_statistic(samples, pixel, width))
            .collect();
        PixelMap::new(values)
    }

    /// Convenience wrapper for a single (window, width) configuration.
    pub fn significance_map(&self, window: EnergyWindow, width: u32) -> AnisoResult<PixelMap> {
        let samples = self.window_samples(window)?;
        Ok(self.significance_map_from(&samples, width))
    }

    fn pixel_statistic(&self, samples: &WindowSamples, pixel: usize, width: u32) -> f64 {
        let neighborhood = self.pixelization.neighborhood(pixel, width);
        let mut pooled = Vec::new();
        for member in neighborhood {
            pooled.extend_from_slice(&samples.per_pixel[member]);
        }
        if pooled.is_empty() {
            return SENTINEL_NO_DATA;
        }

        let pooled_mean = stable_sum(&pooled) / pooled.len() as f64;
        let pooled_sorted = sorted_copy(&pooled);
        let statistic = match ks_statistic(&pooled_sorted, &samples.reference_sorted) {
            Some(statistic) => statistic,
            None => return SENTINEL_NO_DATA,
        };
        let p_value =
            ks_two_sample_p_value(statistic, pooled_sorted.len(), samples.reference_len());
        let sign = if pooled_mean >= samples.reference_mean {
            1.0
        } else {
            -1.0
        };
        sign * p_value
    }
}
