//! HEALPix geometry for the analysis engines: pixel centers, angular-disc
//! neighborhoods, and nearest-pixel map rotation between reference frames.
//!
//! All pixel indexing uses the ring scheme.

use crate::domain::{AnisoError, AnisoResult, Resolution};
use scorus::coordinates::SphCoord;
use scorus::healpix::pix::{ang2pix_ring, pix2ang_ring};
use scorus::healpix::utils::{npix2nside, nside2npix};
use std::f64::consts::PI;

/// Recovers a resolution from a dense map length via the HEALPix inverse,
/// rejecting lengths that do not correspond to any `nside`.
pub fn resolution_from_npix(npix: usize) -> AnisoResult<Resolution> {
    if npix == 0 {
        return Err(AnisoError::data_format(
            "map length 0 is not a valid pixel count",
        ));
    }
    let nside = npix2nside(npix);
    if nside == 0 || nside2npix(nside) != npix {
        return Err(AnisoError::data_format(format!(
            "map length {npix} is not a valid pixel count"
        )));
    }
    Resolution::new(nside)
}

fn unit_vector(direction: SphCoord<f64>) -> [f64; 3] {
    let (sin_pol, cos_pol) = direction.pol.sin_cos();
    let (sin_az, cos_az) = direction.az.sin_cos();
    [sin_pol * cos_az, sin_pol * sin_az, cos_pol]
}

fn direction_of(vector: [f64; 3]) -> SphCoord<f64> {
    let pol = vector[2].clamp(-1.0, 1.0).acos();
    let mut az = vector[1].atan2(vector[0]);
    if az < 0.0 {
        az += 2.0 * PI;
    }
    SphCoord::new(pol, az)
}

/// Precomputed pixel-center geometry for one resolution. Build once per run
/// and share across every window and width configuration.
#[derive(Debug, Clone)]
pub struct Pixelization {
    resolution: Resolution,
    centers: Vec<[f64; 3]>,
}

impl Pixelization {
    pub fn new(resolution: Resolution) -> Self {
        let nside = resolution.nside();
        let npix = nside2npix(nside);
        let centers = (0..npix)
            .map(|pixel| unit_vector(pix2ang_ring::<f64>(nside, pixel)))
            .collect();
        Self {
            resolution,
            centers,
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn npix(&self) -> usize {
        self.centers.len()
    }

    pub fn center(&self, pixel: usize) -> [f64; 3] {
        self.centers[pixel]
    }

    /// Characteristic angular spacing between neighboring pixel centers,
    /// `sqrt(4 pi / npix)` radians.
    pub fn characteristic_spacing(&self) -> f64 {
        (4.0 * PI / self.npix() as f64).sqrt()
    }

    pub fn angular_distance(&self, first: usize, second: usize) -> f64 {
        let a = self.centers[first];
        let b = self.centers[second];
        let dot = a[0] * b[0] + a[1] * b[1] + a[2] * b[2];
        dot.clamp(-1.0, 1.0).acos()
    }

    /// All pixels whose centers lie within `radius` radians of `pixel`'s
    /// center, in ascending index order. Always contains `pixel` itself.
    pub fn disc(&self, pixel: usize, radius: f64) -> Vec<usize> {
        let center = self.centers[pixel];
        let threshold = radius.min(PI).cos();
        self.centers
            .iter()
            .enumerate()
            .filter(|(candidate, other)| {
                let dot = center[0] * other[0] + center[1] * other[1] + center[2] * other[2];
                *candidate == pixel || dot >= threshold
            })
            .map(|(candidate, _)| candidate)
            .collect()
    }

    /// Pooling neighborhood for an integer width: width 0 is exactly the
    /// pixel itself; width `w` pools the angular disc of radius
    /// `(w + 1/2) * characteristic_spacing`. Sample size is monotone in `w`.
    pub fn neighborhood(&self, pixel: usize, width: u32) -> Vec<usize> {
        if width == 0 {
            return vec![pixel];
        }
        let radius = (f64::from(width) + 0.5) * self.characteristic_spacing();
        self.disc(pixel, radius)
    }
}

/// Rigid rotation between reference frames, applied to pixel maps by
/// nearest-pixel reassignment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRotation {
    matrix: [[f64; 3]; 3],
}

impl FrameRotation {
    pub const fn identity() -> Self {
        Self {
            matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    /// Intrinsic z-y-z Euler rotation, angles in radians.
    pub fn from_euler_zyz(psi: f64, theta: f64, phi: f64) -> Self {
        let rz_psi = Self::about_z(psi);
        let ry_theta = Self::about_y(theta);
        let rz_phi = Self::about_z(phi);
        rz_psi.compose(&ry_theta).compose(&rz_phi)
    }

    fn about_z(angle: f64) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self {
            matrix: [[cos, -sin, 0.0], [sin, cos, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    fn about_y(angle: f64) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self {
            matrix: [[cos, 0.0, sin], [0.0, 1.0, 0.0], [-sin, 0.0, cos]],
        }
    }

    fn compose(&self, other: &Self) -> Self {
        let mut matrix = [[0.0; 3]; 3];
        for (row, out_row) in matrix.iter_mut().enumerate() {
            for (column, out) in out_row.iter_mut().enumerate() {
                *out = (0..3)
                    .map(|k| self.matrix[row][k] * other.matrix[k][column])
                    .sum();
            }
        }
        Self { matrix }
    }

    pub fn apply(&self, vector: [f64; 3]) -> [f64; 3] {
        let m = &self.matrix;
        [
            m[0][0] * vector[0] + m[0][1] * vector[1] + m[0][2] * vector[2],
            m[1][0] * vector[0] + m[1][1] * vector[1] + m[1][2] * vector[2],
            m[2][0] * vector[0] + m[2][1] * vector[1] + m[2][2] * vector[2],
        ]
    }

    /// Inverse rotation; the matrix is orthonormal so this is the transpose.
    pub fn inverse_apply(&self, vector: [f64; 3]) -> [f64; 3] {
        let m = &self.matrix;
        [
            m[0][0] * vector[0] + m[1][0] * vector[1] + m[2][0] * vector[2],
            m[0][1] * vector[0] + m[1][1] * vector[1] + m[2][1] * vector[2],
            m[0][2] * vector[0] + m[1][2] * vector[1] + m[2][2] * vector[2],
        ]
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }
}

impl Default for FrameRotation {
    fn default() -> Self {
        Self::identity()
    }
}

/// Re-expresses a map in a rotated frame: each output pixel takes the value
/// of the source pixel its rotated center falls into.
pub fn rotate_map(
    map: &[f64],
    pixelization: &Pixelization,
    rotation: &FrameRotation,
) -> AnisoResult<Vec<f64>> {
    if map.len() != pixelization.npix() {
        return Err(AnisoError::data_format(format!(
            "map length {} does not match pixelization length {}",
            map.len(),
            pixelization.npix()
        )));
    }
    if rotation.is_identity() {
        return Ok(map.to_vec());
    }

    let nside = pixelization.resolution().nside();
    let rotated = (0..pixelization.npix())
        .map(|pixel| {
            let source_direction = direction_of(rotation.inverse_apply(pixelization.center(pixel)));
            map[ang2pix_ring::<f64>(nside, source_direction)]
        })
        .collect();
    Ok(rotated)
}
