//! Job configuration: the on-disk JSON record and its validated in-memory
//! form.
//!
//! The file format keeps the historical shape, including `-1` sentinels for
//! unused observational parameters; those convert to proper optional values
//! here at the I/O edge and nowhere else.

use crate::domain::{AnisoError, AnisoResult, Resolution};
use crate::pixelization::FrameRotation;
use crate::reweigh::{ObservationalProfile, PowerLawSpectrum, ReweighConfig, TargetSpectrum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const OBSERVATIONAL_SENTINEL: f64 = -1.0;

/// Raw serde image of `config.json`. Field names and sentinel conventions
/// match the external format exactly.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct JobConfigFile {
    pub nside: usize,
    pub particle_data_location: String,
    pub raw_data_location: String,
    pub binnings: Vec<usize>,
    pub imposed_distribution: Vec<f64>,
    #[serde(rename = "observational?")]
    pub observational: bool,
    pub observational_parameters: Vec<f64>,
    #[serde(rename = "kolmogorov?")]
    pub kolmogorov: bool,
    #[serde(rename = "plot_unweighted?")]
    pub plot_unweighted: bool,
    pub physical_index: f64,
    pub map_data_location: String,
    pub kolmogorov_width: u32,
    pub kolmogorov_limits: Vec<f64>,
    /// Optional z-y-z Euler angles in degrees for the output frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_rotation: Option<Vec<f64>>,
}

/// Validated job configuration used by the engines.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub resolution: Resolution,
    pub particle_dir: PathBuf,
    pub raw_dir: PathBuf,
    pub binnings: Vec<usize>,
    pub generation: PowerLawSpectrum,
    pub observational: Option<ObservationalProfile>,
    pub run_kolmogorov: bool,
    pub unweighted_pass: bool,
    pub physical_index: f64,
    pub map_dir: PathBuf,
    pub kolmogorov_width: u32,
    pub kolmogorov_limits: (f64, f64),
    pub rotation: FrameRotation,
}

impl JobConfig {
    pub fn from_file_record(record: JobConfigFile) -> AnisoResult<Self> {
        let resolution = Resolution::new(record.nside)
            .map_err(|_| AnisoError::configuration("'nside' must be at least 1"))?;

        if record.binnings.is_empty() {
            return Err(AnisoError::configuration(
                "'binnings' must list at least one bin count",
            ));
        }
        if record.binnings.iter().any(|&binning| binning == 0) {
            return Err(AnisoError::configuration(
                "'binnings' entries must be at least 1",
            ));
        }

        if record.imposed_distribution.len() != 2 {
            return Err(AnisoError::configuration(format!(
                "'imposed_distribution' must hold [index, normalization], got {} values",
                record.imposed_distribution.len()
            )));
        }
        let generation = PowerLawSpectrum::new(
            record.imposed_distribution[0],
            record.imposed_distribution[1],
        );
        if !generation.index.is_finite()
            || !generation.normalization.is_finite()
            || generation.normalization <= 0.0
        {
            return Err(AnisoError::configuration(
                "'imposed_distribution' values must be finite with positive normalization",
            ));
        }

        if !record.physical_index.is_finite() {
            return Err(AnisoError::configuration("'physical_index' must be finite"));
        }

        let observational = if record.observational {
            if record.observational_parameters.len() != 2 {
                return Err(AnisoError::configuration(format!(
                    "'observational_parameters' must hold [knee_tev, delta_index], got {} values",
                    record.observational_parameters.len()
                )));
            }
            let knee_tev = record.observational_parameters[0];
            let delta_index = record.observational_parameters[1];
            if knee_tev <= 0.0 || !knee_tev.is_finite() || !delta_index.is_finite() {
                return Err(AnisoError::configuration(
                    "'observational_parameters' must be finite with a positive knee energy",
                ));
            }
            Some(ObservationalProfile::new(knee_tev, delta_index))
        } else {
            None
        };

        if record.kolmogorov_limits.len() != 2 {
            return Err(AnisoError::configuration(format!(
                "'kolmogorov_limits' must hold [lower, upper], got {} values",
                record.kolmogorov_limits.len()
            )));
        }

        let rotation = match &record.frame_rotation {
            None => FrameRotation::identity(),
            Some(angles) if angles.len() == 3 => FrameRotation::from_euler_zyz(
                angles[0].to_radians(),
                angles[1].to_radians(),
                angles[2].to_radians(),
            ),
            Some(angles) => {
                return Err(AnisoError::configuration(format!(
                    "'frame_rotation' must hold three Euler angles, got {} values",
                    angles.len()
                )));
            }
        };

        Ok(Self {
            resolution,
            particle_dir: PathBuf::from(record.particle_data_location),
            raw_dir: PathBuf::from(record.raw_data_location),
            binnings: record.binnings,
            generation,
            observational,
            run_kolmogorov: record.kolmogorov,
            unweighted_pass: record.plot_unweighted,
            physical_index: record.physical_index,
            map_dir: PathBuf::from(record.map_data_location),
            kolmogorov_width: record.kolmogorov_width,
            kolmogorov_limits: (record.kolmogorov_limits[0], record.kolmogorov_limits[1]),
            rotation,
        })
    }

    /// Projects back to the external record shape, restoring the `-1`
    /// sentinels for an unused observational profile.
    pub fn to_file_record(&self) -> JobConfigFile {
        let observational_parameters = match self.observational {
            Some(profile) => vec![profile.knee_tev, profile.delta_index],
            None => vec![OBSERVATIONAL_SENTINEL, OBSERVATIONAL_SENTINEL],
        };
        JobConfigFile {
            nside: self.resolution.nside(),
            particle_data_location: self.particle_dir.display().to_string(),
            raw_data_location: self.raw_dir.display().to_string(),
            binnings: self.binnings.clone(),
            imposed_distribution: vec![self.generation.index, self.generation.normalization],
            observational: self.observational.is_some(),
            observational_parameters,
            kolmogorov: self.run_kolmogorov,
            plot_unweighted: self.unweighted_pass,
            physical_index: self.physical_index,
            map_data_location: self.map_dir.display().to_string(),
            kolmogorov_width: self.kolmogorov_width,
            kolmogorov_limits: vec![self.kolmogorov_limits.0, self.kolmogorov_limits.1],
            frame_rotation: None,
        }
    }

    /// The target spectrum the raw counts are reweighed to: the
    /// observational profile when configured, the physical power law
    /// otherwise.
    pub fn target_spectrum(&self) -> TargetSpectrum {
        match self.observational {
            Some(profile) => TargetSpectrum::Observational {
                physical_index: self.physical_index,
                profile,
            },
            None => TargetSpectrum::PowerLaw(PowerLawSpectrum::new(self.physical_index, 1.0)),
        }
    }

    pub fn reweigh_config(&self, unweighted: bool) -> ReweighConfig {
        ReweighConfig {
            generation: self.generation,
            target: self.target_spectrum(),
            unweighted,
        }
    }

    pub fn particle_file(&self) -> PathBuf {
        self.particle_dir
            .join(format!("particles_nside={}.npz", self.resolution.nside()))
    }
}

pub fn load_job_config(path: &Path) -> AnisoResult<JobConfig> {
    let content = std::fs::read_to_string(path).map_err(|source| {
        AnisoError::io(
            format!("failed to read configuration '{}'", path.display()),
            source,
        )
    })?;
    let record: JobConfigFile = serde_json::from_str(&content).map_err(|source| {
        AnisoError::configuration(format!(
            "failed to parse configuration '{}': {source}",
            path.display()
        ))
    })?;
    JobConfig::from_file_record(record)
}

#[cfg(test)]
mod tests {
    use super::{JobConfig, JobConfigFile, OBSERVATIONAL_SENTINEL, load_job_config};
    use crate::domain::AnisoError;
    use crate::reweigh::TargetSpectrum;
    use std::fs;
    use tempfile::TempDir;

    fn record() -> JobConfigFile {
        JobConfigFile {
            nside: 16,
            particle_data_location: "data/particles".to_string(),
            raw_data_location: "data/raw".to_string(),
            binnings: vec![5, 10],
            imposed_distribution: vec![1.0, 1.0],
            observational: false,
            observational_parameters: vec![OBSERVATIONAL_SENTINEL, OBSERVATIONAL_SENTINEL],
            kolmogorov: true,
            plot_unweighted: false,
            physical_index: 2.7,
            map_data_location: "data/maps".to_string(),
            kolmogorov_width: 2,
            kolmogorov_limits: vec![1.0, 10.0],
            frame_rotation: None,
        }
    }

    #[test]
    fn sentinel_parameters_become_none_at_the_edge() {
        let config = JobConfig::from_file_record(record()).expect("config should validate");
        assert!(config.observational.is_none());
        assert!(matches!(
            config.target_spectrum(),
            TargetSpectrum::PowerLaw(_)
        ));
    }

    #[test]
    fn observational_parameters_round_trip_through_the_sentinel_format() {
        let mut file_record = record();
        file_record.observational = true;
        file_record.observational_parameters = vec![3.0, 0.66];

        let config = JobConfig::from_file_record(file_record.clone()).expect("config");
        let profile = config.observational.expect("profile should be set");
        assert_eq!(profile.knee_tev, 3.0);
        assert_eq!(profile.delta_index, 0.66);
        assert_eq!(config.to_file_record(), file_record);

        let disabled = JobConfig::from_file_record(record()).expect("config");
        assert_eq!(
            disabled.to_file_record().observational_parameters,
            vec![OBSERVATIONAL_SENTINEL, OBSERVATIONAL_SENTINEL]
        );
    }

    #[test]
    fn invalid_fields_surface_configuration_errors() {
        let mut no_binnings = record();
        no_binnings.binnings.clear();
        assert!(matches!(
            JobConfig::from_file_record(no_binnings),
            Err(AnisoError::Configuration(_))
        ));

        let mut bad_imposed = record();
        bad_imposed.imposed_distribution = vec![1.0];
        assert!(JobConfig::from_file_record(bad_imposed).is_err());

        let mut bad_observational = record();
        bad_observational.observational = true;
        bad_observational.observational_parameters =
            vec![OBSERVATIONAL_SENTINEL, OBSERVATIONAL_SENTINEL];
        assert!(JobConfig::from_file_record(bad_observational).is_err());

        let mut bad_rotation = record();
        bad_rotation.frame_rotation = Some(vec![90.0]);
        assert!(JobConfig::from_file_record(bad_rotation).is_err());
    }

    #[test]
    fn particle_file_name_embeds_the_resolution() {
        let config = JobConfig::from_file_record(record()).expect("config");
        assert!(
            config
                .particle_file()
                .ends_with("particles_nside=16.npz")
        );
    }

    #[test]
    fn json_round_trip_preserves_renamed_flags() {
        let json = serde_json::to_string(&record()).expect("record should serialize");
        assert!(json.contains("\"observational?\""));
        assert!(json.contains("\"kolmogorov?\""));
        assert!(json.contains("\"plot_unweighted?\""));
        let parsed: JobConfigFile = serde_json::from_str(&json).expect("record should parse");
        assert_eq!(parsed, record());
    }

    #[test]
    fn load_job_config_reports_parse_failures() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("config.json");
        fs::write(&path, "{ not json").expect("file should write");
        let error = load_job_config(&path).expect_err("bad json should fail");
        assert!(matches!(error, AnisoError::Configuration(_)));

        let missing = load_job_config(&temp.path().join("absent.json"))
            .expect_err("missing file should fail");
        assert!(matches!(missing, AnisoError::Io { .. }));
    }

    #[test]
    fn reweigh_config_carries_the_unweighted_flag() {
        let config = JobConfig::from_file_record(record()).expect("config");
        assert!(!config.reweigh_config(false).unweighted);
        assert!(config.reweigh_config(true).unweighted);
    }
}
