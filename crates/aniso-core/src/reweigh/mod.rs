//! Importance reweighing of raw simulation counts to a target energy
//! spectrum, producing per-bin flux and arrival-time maps.
//!
//! Weights are the ratio of target to generation spectral density; the
//! generation spectrum is a process-wide constant of the simulation run.

use crate::binning::BinnedParticleSet;
use crate::domain::{ParticleRecord, PixelMap};
use crate::numerics::{stable_sum, stable_weighted_mean};
use std::f64::consts::PI;

const SPEED_OF_LIGHT: f64 = 299_792_458.0;
const ELEMENTARY_CHARGE: f64 = 1.602_176_63e-19;
const PROTON_MASS: f64 = 1.672_621_92e-27;

/// Explicit unit-conversion constants, passed into the engines at
/// construction. Simulation energies are in proton rest-mass quanta.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicalConstants {
    proton_rest_energy_tev: f64,
}

impl PhysicalConstants {
    pub fn standard() -> Self {
        Self {
            proton_rest_energy_tev: PROTON_MASS * SPEED_OF_LIGHT * SPEED_OF_LIGHT
                / (ELEMENTARY_CHARGE * 1.0e12),
        }
    }

    pub fn proton_rest_energy_tev(self) -> f64 {
        self.proton_rest_energy_tev
    }

    pub fn tev_from_sim_units(self, energy: f64) -> f64 {
        energy * self.proton_rest_energy_tev
    }

    pub fn sim_units_from_tev(self, energy_tev: f64) -> f64 {
        energy_tev / self.proton_rest_energy_tev
    }
}

/// Power-law spectral density `normalization * e^-index` in simulation units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerLawSpectrum {
    pub index: f64,
    pub normalization: f64,
}

impl PowerLawSpectrum {
    pub fn new(index: f64, normalization: f64) -> Self {
        Self {
            index,
            normalization,
        }
    }

    pub fn density(&self, energy: f64) -> f64 {
        if energy <= 0.0 {
            return 0.0;
        }
        self.normalization * energy.powf(-self.index)
    }
}

/// Observed spectral shape: a power law steepening by `delta_index` above
/// the knee, continuous at the break.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObservationalProfile {
    pub knee_tev: f64,
    pub delta_index: f64,
}

impl ObservationalProfile {
    pub fn new(knee_tev: f64, delta_index: f64) -> Self {
        Self {
            knee_tev,
            delta_index,
        }
    }
}

/// The spectrum the raw counts are reweighed to represent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetSpectrum {
    PowerLaw(PowerLawSpectrum),
    Observational {
        physical_index: f64,
        profile: ObservationalProfile,
    },
}

impl TargetSpectrum {
    pub fn density(&self, energy: f64, constants: &PhysicalConstants) -> f64 {
        if energy <= 0.0 {
            return 0.0;
        }
        match self {
            Self::PowerLaw(power_law) => power_law.density(energy),
            Self::Observational {
                physical_index,
                profile,
            } => {
                let knee = constants.sim_units_from_tev(profile.knee_tev);
                if energy <= knee {
                    energy.powf(-physical_index)
                } else {
                    knee.powf(profile.delta_index)
                        * energy.powf(-(physical_index + profile.delta_index))
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReweighConfig {
    /// Spectrum the simulation generator drew energies from.
    pub generation: PowerLawSpectrum,
    pub target: TargetSpectrum,
    /// Diagnostic mode: bypass importance weights, keeping simulation
    /// weights only.
    pub unweighted: bool,
}

pub struct ReweighEngine {
    config: ReweighConfig,
    constants: PhysicalConstants,
}

impl ReweighEngine {
    pub fn new(config: ReweighConfig, constants: PhysicalConstants) -> Self {
        Self { config, constants }
    }

    pub fn constants(&self) -> &PhysicalConstants {
        &self.constants
    }

    /// Importance weight for one energy; 1 in unweighted mode, 0 where the
    /// generation density cannot support the sample.
    pub fn importance_weight(&self, energy: f64) -> f64 {
        if self.config.unweighted {
            return 1.0;
        }
        let generated = self.config.generation.density(energy);
        if !(generated > 0.0) || !generated.is_finite() {
            return 0.0;
        }
        self.config.target.density(energy, &self.constants) / generated
    }

    fn contribution(&self, record: &ParticleRecord) -> f64 {
        self.importance_weight(record.energy) * record.sim_weight
    }

    /// Reweighed flux per pixel for one energy bin: summed weights over the
    /// pixel solid angle. Unpopulated pixels hold exactly 0.
    pub fn flux_map(&self, bin: &BinnedParticleSet) -> PixelMap {
        let npix = bin.store().npix();
        let pixel_solid_angle = 4.0 * PI / npix as f64;
        let values = (0..npix)
            .map(|pixel| {
                let contributions: Vec<f64> = bin
                    .store()
                    .particles_in_pixel(pixel)
                    .map(|record| self.contribution(record))
                    .collect();
                stable_sum(&contributions) / pixel_solid_angle
            })
            .collect();
        PixelMap::new(values)
    }

    /// Importance-weighted mean arrival time per pixel for one energy bin.
    /// Unpopulated pixels (and pixels whose weights sum to 0) hold 0 by
    /// convention; callers treat 0 as "no data".
    pub fn time_map(&self, bin: &BinnedParticleSet) -> PixelMap {
        let npix = bin.store().npix();
        let values = (0..npix)
            .map(|pixel| {
                let mut times = Vec::new();
                let mut weights = Vec::new();
                for record in bin.store().particles_in_pixel(pixel) {
                    times.push(record.arrival_time);
                    weights.push(self.contribution(record));
                }
                stable_weighted_mean(&times, &weights).unwrap_or(0.0)
            })
            .collect();
        PixelMap::new(values)
    }

    /// Flux and time maps for every bin, in bin order.
    pub fn maps_for_bins(&self, bins: &[BinnedParticleSet]) -> (Vec<PixelMap>, Vec<PixelMap>) {
        let flux = bins.iter().map(|bin| self.flux_map(bin)).collect();
        let time = bins.iter().map(|bin| self.time_map(bin)).collect();
        (flux, time)
    }
}
