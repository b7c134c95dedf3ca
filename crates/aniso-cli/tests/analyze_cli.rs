use aniso_core::domain::{ParticleRecord, Resolution};
use aniso_core::io::{OutputArchive, write_particle_archive};
use aniso_core::reweigh::PhysicalConstants;
use aniso_core::store::ParticleStore;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn write_config(dir: &Path, nside: usize) -> std::path::PathBuf {
    let config_path = dir.join("config.json");
    let config = serde_json::json!({
        "nside": nside,
        "particle_data_location": dir.join("particles").display().to_string(),
        "raw_data_location": dir.join("raw").display().to_string(),
        "binnings": [2],
        "imposed_distribution": [1.0, 1.0],
        "observational?": false,
        "observational_parameters": [-1.0, -1.0],
        "kolmogorov?": true,
        "plot_unweighted?": false,
        "physical_index": 2.7,
        "map_data_location": dir.join("maps").display().to_string(),
        "kolmogorov_width": 0,
        "kolmogorov_limits": [1.0, 10.0]
    });
    fs::write(&config_path, config.to_string()).expect("config should write");
    config_path
}

fn write_particles(dir: &Path, nside: usize) -> std::path::PathBuf {
    let resolution = Resolution::new(nside).expect("nside should be valid");
    let constants = PhysicalConstants::standard();
    let records: Vec<ParticleRecord> = (0..resolution.npix())
        .map(|pixel| {
            ParticleRecord::new(
                pixel,
                constants.sim_units_from_tev(1.0 + (pixel % 8) as f64),
                pixel as f64,
            )
        })
        .collect();
    let store = ParticleStore::load(resolution, records).expect("store should load");

    let particle_dir = dir.join("particles");
    fs::create_dir_all(&particle_dir).expect("particle dir should create");
    let path = particle_dir.join(format!("particles_nside={nside}.npz"));
    write_particle_archive(&path, &store).expect("particle archive should write");
    path
}

fn write_tables(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf, std::path::PathBuf) {
    let bins = dir.join("bins");
    let limits = dir.join("limits");
    let widths = dir.join("widths");
    fs::write(&bins, "2\n3\n").expect("bins should write");
    fs::write(&limits, "1.0 10.0\n").expect("limits should write");
    fs::write(&widths, "0\n1\n").expect("widths should write");
    (bins, limits, widths)
}

#[test]
fn analyze_command_writes_a_complete_map_archive() {
    let temp = TempDir::new().expect("tempdir should be created");
    let config_path = write_config(temp.path(), 2);
    write_particles(temp.path(), 2);
    let (bins, limits, widths) = write_tables(temp.path());
    let output_path = temp.path().join("nside=2.npz");

    let output = Command::new(env!("CARGO_BIN_EXE_anisomap"))
        .arg("analyze")
        .arg("--config")
        .arg(&config_path)
        .arg("--bins")
        .arg(&bins)
        .arg("--limits")
        .arg(&limits)
        .arg("--widths")
        .arg(&widths)
        .arg("--output")
        .arg(&output_path)
        .output()
        .expect("command should spawn");

    assert!(
        output.status.success(),
        "command should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let archive = OutputArchive::read(&output_path).expect("archive should read");
    assert_eq!(archive.bins, vec![2, 3]);
    assert_eq!(archive.widths, vec![0, 1]);
    assert_eq!(archive.limits, vec![(1.0, 10.0)]);
    assert_eq!(archive.npix, 48);
    assert_eq!(archive.flux.len(), 5);
    assert_eq!(archive.time.len(), 5);
    assert_eq!(archive.kolmogorov.len(), 2);
}

#[test]
fn job_command_writes_per_binning_and_kolmogorov_archives() {
    let temp = TempDir::new().expect("tempdir should be created");
    let config_path = write_config(temp.path(), 2);
    write_particles(temp.path(), 2);

    let output = Command::new(env!("CARGO_BIN_EXE_anisomap"))
        .arg("job")
        .arg("--config")
        .arg(&config_path)
        .output()
        .expect("command should spawn");

    assert!(
        output.status.success(),
        "command should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(temp.path().join("maps/standard_bins=2.npz").exists());
    assert!(temp.path().join("maps/kolmogorov.npz").exists());
}

#[test]
fn missing_configuration_exits_with_the_io_code() {
    let temp = TempDir::new().expect("tempdir should be created");
    let output = Command::new(env!("CARGO_BIN_EXE_anisomap"))
        .arg("analyze")
        .arg("--config")
        .arg(temp.path().join("absent.json"))
        .output()
        .expect("command should spawn");

    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ERROR"), "stderr was: {stderr}");
}

#[test]
fn malformed_configuration_exits_with_the_input_code() {
    let temp = TempDir::new().expect("tempdir should be created");
    let config_path = temp.path().join("config.json");
    fs::write(&config_path, "{ not json").expect("config should write");

    let output = Command::new(env!("CARGO_BIN_EXE_anisomap"))
        .arg("analyze")
        .arg("--config")
        .arg(&config_path)
        .output()
        .expect("command should spawn");

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn resolution_mismatch_is_a_data_format_failure() {
    let temp = TempDir::new().expect("tempdir should be created");
    // Config declares nside 4 but the archive carries nside 2.
    let config_path = write_config(temp.path(), 4);
    let particle_path = write_particles(temp.path(), 2);
    let renamed = temp.path().join("particles/particles_nside=4.npz");
    fs::rename(&particle_path, &renamed).expect("rename should succeed");
    let (bins, limits, widths) = write_tables(temp.path());

    let output = Command::new(env!("CARGO_BIN_EXE_anisomap"))
        .arg("analyze")
        .arg("--config")
        .arg(&config_path)
        .arg("--bins")
        .arg(&bins)
        .arg("--limits")
        .arg(&limits)
        .arg("--widths")
        .arg(&widths)
        .output()
        .expect("command should spawn");

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("nside"), "stderr was: {stderr}");
}
