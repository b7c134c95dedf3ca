use super::CliError;
use aniso_core::config::JobConfig;
use aniso_core::domain::PixelMap;
use aniso_core::io::read_particle_archive;
use aniso_core::pixelization::{FrameRotation, Pixelization, rotate_map};
use aniso_core::store::ParticleStore;
use std::path::Path;
use tracing::info;

pub(super) fn load_particle_store(
    path: &Path,
    config: &JobConfig,
) -> Result<ParticleStore, CliError> {
    let store =
        read_particle_archive(path, Some(config.resolution)).map_err(CliError::Analysis)?;
    info!(
        path = %path.display(),
        nside = store.resolution().nside(),
        particles = store.len(),
        "loaded particle store"
    );
    Ok(store)
}

pub(super) fn rotate_maps(
    maps: &[PixelMap],
    pixelization: &Pixelization,
    rotation: &FrameRotation,
) -> Result<Vec<PixelMap>, CliError> {
    maps.iter()
        .map(|map| {
            rotate_map(map.values(), pixelization, rotation)
                .map(PixelMap::new)
                .map_err(CliError::Analysis)
        })
        .collect()
}
