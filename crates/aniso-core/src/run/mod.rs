//! Batch orchestration: sequences binning, reweighing, and statistical
//! testing over every requested configuration, collecting results into an
//! explicitly ordered output layout.
//!
//! A failure in one configuration is logged and recorded without aborting
//! its siblings; only a store-level problem aborts the whole run.

use crate::binning::{compute_bin_edges, partition};
use crate::domain::{AnisoResult, EnergyWindow, PixelMap};
use crate::io::OutputArchive;
use crate::pixelization::Pixelization;
use crate::reweigh::{PhysicalConstants, ReweighConfig, ReweighEngine};
use crate::stats::KolmogorovEngine;
use crate::store::ParticleStore;
use rayon::prelude::*;
use std::fmt::{Display, Formatter};
use tracing::{info, warn};

/// Full request for one analysis pass over a particle store.
#[derive(Debug, Clone)]
pub struct AnalysisPlan {
    pub binnings: Vec<usize>,
    pub widths: Vec<u32>,
    /// Window bounds in TeV; validated per configuration so a bad row skips
    /// only itself.
    pub limits: Vec<(f64, f64)>,
    pub reweigh: ReweighConfig,
    pub constants: PhysicalConstants,
}

/// Identity of one produced output row. The archive layout is exactly the
/// order of these keys, not an accident of loop accumulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKey {
    Flux { binning: usize, bin: usize },
    Time { binning: usize, bin: usize },
    Kolmogorov { limit: usize, width: u32 },
}

impl Display for OutputKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flux { binning, bin } => write!(f, "flux[binning={binning},bin={bin}]"),
            Self::Time { binning, bin } => write!(f, "time[binning={binning},bin={bin}]"),
            Self::Kolmogorov { limit, width } => {
                write!(f, "kolmogorov[limit={limit},width={width}]")
            }
        }
    }
}

/// The layout a plan produces when every configuration succeeds: flux rows
/// (binnings in request order, bins ascending), then time rows in the same
/// order, then significance rows (limits in request order, widths in request
/// order within each limit).
pub fn expected_layout(plan: &AnalysisPlan) -> Vec<OutputKey> {
    let mut keys = Vec::new();
    for &binning in &plan.binnings {
        for bin in 0..binning {
            keys.push(OutputKey::Flux { binning, bin });
        }
    }
    for &binning in &plan.binnings {
        for bin in 0..binning {
            keys.push(OutputKey::Time { binning, bin });
        }
    }
    for (limit, _) in plan.limits.iter().enumerate() {
        for &width in &plan.widths {
            keys.push(OutputKey::Kolmogorov { limit, width });
        }
    }
    keys
}

/// A configuration that failed and was excluded from the output maps.
#[derive(Debug, Clone)]
pub struct SkippedConfiguration {
    pub description: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct AnalysisOutput {
    pub npix: usize,
    pub flux: Vec<PixelMap>,
    pub time: Vec<PixelMap>,
    pub kolmogorov: Vec<PixelMap>,
    /// One padded row of bin edges per successful binning, all
    /// `max_bins + 1` columns wide.
    pub bin_limits: Vec<Vec<f64>>,
    /// Keys for the rows actually produced, in archive order.
    pub layout: Vec<OutputKey>,
    pub skipped: Vec<SkippedConfiguration>,
    bins: Vec<usize>,
    widths: Vec<u32>,
    limits: Vec<(f64, f64)>,
}

impl AnalysisOutput {
    /// Assembles the on-disk archive; the configuration tables are carried
    /// verbatim from the plan.
    pub fn to_archive(&self) -> OutputArchive {
        OutputArchive {
            npix: self.npix,
            flux: self.flux.iter().map(|map| map.values().to_vec()).collect(),
            time: self.time.iter().map(|map| map.values().to_vec()).collect(),
            kolmogorov: self
                .kolmogorov
                .iter()
                .map(|map| map.values().to_vec())
                .collect(),
            bin_limits: self.bin_limits.clone(),
            bins: self.bins.clone(),
            widths: self.widths.clone(),
            limits: self.limits.clone(),
        }
    }
}

struct BinningProduct {
    binning: usize,
    edges_row: Vec<f64>,
    flux: Vec<PixelMap>,
    time: Vec<PixelMap>,
}

fn pad_edges(edges: &[f64], max_bins: usize) -> Vec<f64> {
    let mut row = edges.to_vec();
    row.resize(max_bins + 1, 0.0);
    row
}

fn binning_product(
    store: &ParticleStore,
    engine: &ReweighEngine,
    energies: &[f64],
    binning: usize,
    max_bins: usize,
) -> AnisoResult<BinningProduct> {
    let edges = compute_bin_edges(energies, binning)?;
    let bins = partition(store, &edges)?;
    info!(binning, "creating reweighed flux and time maps");
    let (flux, time) = engine.maps_for_bins(&bins);
    Ok(BinningProduct {
        binning,
        edges_row: pad_edges(&edges, max_bins),
        flux,
        time,
    })
}

pub fn run_analysis(store: &ParticleStore, plan: &AnalysisPlan) -> AnisoResult<AnalysisOutput> {
    let npix = store.npix();
    let max_bins = plan.binnings.iter().copied().max().unwrap_or(0);
    let energies = store.energies();
    let engine = ReweighEngine::new(plan.reweigh, plan.constants);

    let mut skipped = Vec::new();
    let mut layout = Vec::new();

    // Binned products: independent per binning, computed in parallel,
    // collected in request order.
    let binning_results: Vec<(usize, AnisoResult<BinningProduct>)> = plan
        .binnings
        .par_iter()
        .map(|&binning| {
            (
                binning,
                binning_product(store, &engine, &energies, binning, max_bins),
            )
        })
        .collect();

    let mut flux = Vec::new();
    let mut time = Vec::new();
    let mut bin_limits = Vec::new();
    let mut products = Vec::new();
    for (binning, result) in binning_results {
        match result {
            Ok(product) => products.push(product),
            Err(error) => {
                warn!(binning, %error, "skipping binning configuration");
                skipped.push(SkippedConfiguration {
                    description: format!("binning={binning}"),
                    reason: error.to_string(),
                });
            }
        }
    }
    for product in &products {
        for bin in 0..product.flux.len() {
            layout.push(OutputKey::Flux {
                binning: product.binning,
                bin,
            });
        }
    }
    for product in &products {
        for bin in 0..product.time.len() {
            layout.push(OutputKey::Time {
                binning: product.binning,
                bin,
            });
        }
    }
    for product in products {
        bin_limits.push(product.edges_row);
        flux.extend(product.flux);
        time.extend(product.time);
    }

    // Significance maps share one pixel geometry and, per window, one
    // reference sample assembled before any per-pixel test.
    let mut kolmogorov = Vec::new();
    if !plan.limits.is_empty() && !plan.widths.is_empty() {
        let pixelization = Pixelization::new(store.resolution());
        let ks_engine = KolmogorovEngine::new(store, &pixelization, plan.constants);

        for (limit_index, &(lower, upper)) in plan.limits.iter().enumerate() {
            let window = match EnergyWindow::new(lower, upper) {
                Ok(window) => window,
                Err(error) => {
                    warn!(limit = limit_index, %error, "skipping limit configuration");
                    for &width in &plan.widths {
                        skipped.push(SkippedConfiguration {
                            description: format!(
                                "limit={limit_index} ({lower}, {upper}) width={width}"
                            ),
                            reason: error.to_string(),
                        });
                    }
                    continue;
                }
            };

            let samples = ks_engine.window_samples(window)?;
            for &width in &plan.widths {
                info!(
                    lower, upper, width,
                    "performing Kolmogorov-Smirnov test on energy distribution"
                );
                kolmogorov.push(ks_engine.significance_map_from(&samples, width));
                layout.push(OutputKey::Kolmogorov {
                    limit: limit_index,
                    width,
                });
            }
        }
    }

    Ok(AnalysisOutput {
        npix,
        flux,
        time,
        kolmogorov,
        bin_limits,
        layout,
        skipped,
        bins: plan.binnings.clone(),
        widths: plan.widths.clone(),
        limits: plan.limits.clone(),
    })
}
