use super::CliError;
use super::helpers::{load_particle_store, rotate_maps};
use aniso_core::binning::{compute_bin_edges, partition};
use aniso_core::config::{JobConfig, load_job_config};
use aniso_core::domain::EnergyWindow;
use aniso_core::io::{read_bins_table, read_limits_table, read_widths_table, write_maps_archive};
use aniso_core::pixelization::Pixelization;
use aniso_core::reweigh::{PhysicalConstants, ReweighEngine};
use aniso_core::run::{AnalysisPlan, run_analysis};
use aniso_core::stats::KolmogorovEngine;
use aniso_core::store::ParticleStore;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(clap::Args)]
pub(super) struct AnalyzeArgs {
    /// Job configuration path
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// File containing limits for distribution tests
    #[arg(short, long, default_value = "./limits")]
    limits: PathBuf,

    /// File containing binning schemes for binned tests
    #[arg(short, long, default_value = "./bins")]
    bins: PathBuf,

    /// File containing pooling widths for neighborhood tests
    #[arg(short, long, default_value = "./widths")]
    widths: PathBuf,

    /// Particle archive path; defaults to the configured location
    #[arg(short, long)]
    particles: Option<PathBuf>,

    /// Output archive path; defaults to nside=<nside>.npz
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(clap::Args)]
pub(super) struct JobArgs {
    /// Job configuration path
    #[arg(long, default_value = "config.json")]
    config: PathBuf,
}

pub(super) fn run_analyze_command(args: AnalyzeArgs) -> Result<i32, CliError> {
    let config = load_job_config(&args.config).map_err(CliError::Analysis)?;

    let binnings = read_bins_table(&args.bins).map_err(CliError::Analysis)?;
    let limits = read_limits_table(&args.limits).map_err(CliError::Analysis)?;
    let widths = read_widths_table(&args.widths).map_err(CliError::Analysis)?;

    let particle_path = args.particles.unwrap_or_else(|| config.particle_file());
    let store = load_particle_store(&particle_path, &config)?;

    let plan = AnalysisPlan {
        binnings,
        widths,
        limits,
        reweigh: config.reweigh_config(false),
        constants: PhysicalConstants::standard(),
    };
    let output = run_analysis(&store, &plan).map_err(CliError::Analysis)?;
    for skipped in &output.skipped {
        warn!(
            configuration = %skipped.description,
            reason = %skipped.reason,
            "configuration skipped"
        );
    }

    let output_path = args
        .output
        .unwrap_or_else(|| PathBuf::from(format!("nside={}.npz", store.resolution().nside())));
    output
        .to_archive()
        .write(&output_path)
        .map_err(CliError::Analysis)?;
    info!(path = %output_path.display(), rows = output.layout.len(), "wrote map archive");
    Ok(0)
}

pub(super) fn run_job_command(args: JobArgs) -> Result<i32, CliError> {
    let config = load_job_config(&args.config).map_err(CliError::Analysis)?;
    let store = load_particle_store(&config.particle_file(), &config)?;
    let pixelization = Pixelization::new(store.resolution());
    let constants = PhysicalConstants::standard();

    std::fs::create_dir_all(&config.map_dir).map_err(|source| {
        CliError::Analysis(aniso_core::domain::AnisoError::io(
            format!(
                "failed to create map directory '{}'",
                config.map_dir.display()
            ),
            source,
        ))
    })?;

    let energies = store.energies();
    for &binning in &config.binnings {
        if let Err(error) = run_binning_pass(
            &config,
            &store,
            &pixelization,
            constants,
            &energies,
            binning,
        ) {
            warn!(binning, %error, "skipping binning configuration");
        }
    }

    if config.run_kolmogorov {
        run_kolmogorov_pass(&config, &store, &pixelization, constants)?;
    }

    info!("job complete");
    Ok(0)
}

fn run_binning_pass(
    config: &JobConfig,
    store: &ParticleStore,
    pixelization: &Pixelization,
    constants: PhysicalConstants,
    energies: &[f64],
    binning: usize,
) -> Result<(), CliError> {
    let edges = compute_bin_edges(energies, binning).map_err(CliError::Analysis)?;
    let bins = partition(store, &edges).map_err(CliError::Analysis)?;

    let mut passes = vec![("standard", false)];
    if config.unweighted_pass {
        passes.push(("unweighted", true));
    }

    for (label, unweighted) in passes {
        info!(binning, label, "creating sky maps");
        let engine = ReweighEngine::new(config.reweigh_config(unweighted), constants);
        let (flux, time) = engine.maps_for_bins(&bins);
        let flux = rotate_maps(&flux, pixelization, &config.rotation)?;
        let time = rotate_maps(&time, pixelization, &config.rotation)?;

        let path = config.map_dir.join(format!("{label}_bins={binning}.npz"));
        write_maps_archive(
            &path,
            store.npix(),
            &[("flux", &flux), ("time", &time)],
        )
        .map_err(CliError::Analysis)?;
        info!(path = %path.display(), "wrote map archive");
    }
    Ok(())
}

fn run_kolmogorov_pass(
    config: &JobConfig,
    store: &ParticleStore,
    pixelization: &Pixelization,
    constants: PhysicalConstants,
) -> Result<(), CliError> {
    let (lower, upper) = config.kolmogorov_limits;
    let window = match EnergyWindow::new(lower, upper) {
        Ok(window) => window,
        Err(error) => {
            warn!(lower, upper, %error, "skipping Kolmogorov-Smirnov configuration");
            return Ok(());
        }
    };

    info!(
        lower,
        upper,
        width = config.kolmogorov_width,
        "performing Kolmogorov-Smirnov test on energy distribution"
    );
    let engine = KolmogorovEngine::new(store, pixelization, constants);
    let map = engine
        .significance_map(window, config.kolmogorov_width)
        .map_err(CliError::Analysis)?;
    let rotated = rotate_maps(&[map], pixelization, &config.rotation)?;

    let path = config.map_dir.join("kolmogorov.npz");
    write_maps_archive(&path, store.npix(), &[("kolmogorov", &rotated)])
        .map_err(CliError::Analysis)?;
    info!(path = %path.display(), "wrote map archive");
    Ok(())
}
