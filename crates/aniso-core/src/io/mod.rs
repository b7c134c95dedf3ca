//! On-disk interfaces: compressed `.npz` archives for particle data and
//! result maps, and the whitespace-delimited bins/limits/widths tables.

use crate::domain::{AnisoError, AnisoResult, ParticleRecord, PixelMap, Resolution};
use crate::store::ParticleStore;
use ndarray::{Array1, Array2, Ix1, Ix2, IxDyn, OwnedRepr};
use ndarray_npy::{NpzReader, NpzWriter};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

fn open_reader(path: &Path) -> AnisoResult<NpzReader<BufReader<File>>> {
    let file = File::open(path).map_err(|source| {
        AnisoError::io(format!("failed to open archive '{}'", path.display()), source)
    })?;
    NpzReader::new(BufReader::new(file)).map_err(|source| {
        AnisoError::data_format(format!(
            "'{}' is not a readable npz archive: {source}",
            path.display()
        ))
    })
}

fn archive_names(reader: &mut NpzReader<BufReader<File>>, path: &Path) -> AnisoResult<Vec<String>> {
    reader.names().map_err(|source| {
        AnisoError::data_format(format!(
            "failed to list entries of '{}': {source}",
            path.display()
        ))
    })
}

fn has_entry(names: &[String], name: &str) -> bool {
    names
        .iter()
        .any(|entry| entry == name || entry.trim_end_matches(".npy") == name)
}

fn read_f64_column(
    reader: &mut NpzReader<BufReader<File>>,
    path: &Path,
    name: &str,
) -> AnisoResult<Vec<f64>> {
    let array = reader
        .by_name::<OwnedRepr<f64>, Ix1>(name)
        .map_err(|source| {
            AnisoError::data_format(format!(
                "failed to decode array '{name}' in '{}': {source}",
                path.display()
            ))
        })?;
    Ok(array.to_vec())
}

fn read_i64_column(
    reader: &mut NpzReader<BufReader<File>>,
    path: &Path,
    name: &str,
) -> AnisoResult<Vec<i64>> {
    let array = reader
        .by_name::<OwnedRepr<i64>, Ix1>(name)
        .map_err(|source| {
            AnisoError::data_format(format!(
                "failed to decode array '{name}' in '{}': {source}",
                path.display()
            ))
        })?;
    Ok(array.to_vec())
}

fn read_i64_scalar(
    reader: &mut NpzReader<BufReader<File>>,
    path: &Path,
    name: &str,
) -> AnisoResult<i64> {
    let array = reader
        .by_name::<OwnedRepr<i64>, IxDyn>(name)
        .map_err(|source| {
            AnisoError::data_format(format!(
                "failed to decode array '{name}' in '{}': {source}",
                path.display()
            ))
        })?;
    array.iter().next().copied().ok_or_else(|| {
        AnisoError::data_format(format!(
            "array '{name}' in '{}' is empty",
            path.display()
        ))
    })
}

/// Reads a particle archive into a validated store. The archive's `nside`
/// entry declares the resolution; when `expected` is given the two must
/// agree.
pub fn read_particle_archive(
    path: &Path,
    expected: Option<Resolution>,
) -> AnisoResult<ParticleStore> {
    let mut reader = open_reader(path)?;
    let names = archive_names(&mut reader, path)?;
    for required in ["nside", "pixel", "energy", "arrival_time"] {
        if !has_entry(&names, required) {
            return Err(AnisoError::missing_field(required));
        }
    }

    let nside = read_i64_scalar(&mut reader, path, "nside")?;
    if nside < 1 {
        return Err(AnisoError::data_format(format!(
            "archive '{}' declares invalid nside {nside}",
            path.display()
        )));
    }
    let resolution = Resolution::new(nside as usize)?;
    if let Some(expected) = expected
        && expected != resolution
    {
        return Err(AnisoError::data_format(format!(
            "archive '{}' declares nside {} but the configuration requires {}",
            path.display(),
            resolution.nside(),
            expected.nside()
        )));
    }

    let pixels = read_i64_column(&mut reader, path, "pixel")?;
    let energies = read_f64_column(&mut reader, path, "energy")?;
    let times = read_f64_column(&mut reader, path, "arrival_time")?;
    let weights = if has_entry(&names, "sim_weight") {
        read_f64_column(&mut reader, path, "sim_weight")?
    } else {
        vec![1.0; pixels.len()]
    };

    if energies.len() != pixels.len() || times.len() != pixels.len() || weights.len() != pixels.len()
    {
        return Err(AnisoError::data_format(format!(
            "archive '{}' has mismatched record arrays: pixel {}, energy {}, arrival_time {}, sim_weight {}",
            path.display(),
            pixels.len(),
            energies.len(),
            times.len(),
            weights.len()
        )));
    }

    let npix = resolution.npix();
    let records = pixels
        .iter()
        .zip(&energies)
        .zip(&times)
        .zip(&weights)
        .enumerate()
        .map(|(index, (((&pixel, &energy), &time), &weight))| {
            if pixel < 0 || pixel as usize >= npix {
                return Err(AnisoError::data_format(format!(
                    "record {index} has pixel {pixel} out of range for npix {npix}"
                )));
            }
            Ok(ParticleRecord::new(pixel as usize, energy, time).with_sim_weight(weight))
        })
        .collect::<AnisoResult<Vec<ParticleRecord>>>()?;

    ParticleStore::load(resolution, records)
}

/// Writes a store back out in the particle-archive layout. Used by fixture
/// tooling and round-trip tests.
pub fn write_particle_archive(path: &Path, store: &ParticleStore) -> AnisoResult<()> {
    let file = File::create(path).map_err(|source| {
        AnisoError::io(
            format!("failed to create archive '{}'", path.display()),
            source,
        )
    })?;
    let mut writer = NpzWriter::new_compressed(BufWriter::new(file));

    let write_error = |source: ndarray_npy::WriteNpzError| {
        AnisoError::data_format(format!(
            "failed to write archive '{}': {source}",
            path.display()
        ))
    };

    let nside = Array1::from(vec![store.resolution().nside() as i64]);
    let pixel: Array1<i64> = store.all_particles().map(|r| r.pixel as i64).collect();
    let energy: Array1<f64> = store.all_particles().map(|r| r.energy).collect();
    let arrival_time: Array1<f64> = store.all_particles().map(|r| r.arrival_time).collect();
    let sim_weight: Array1<f64> = store.all_particles().map(|r| r.sim_weight).collect();

    writer.add_array("nside", &nside).map_err(write_error)?;
    writer.add_array("pixel", &pixel).map_err(write_error)?;
    writer.add_array("energy", &energy).map_err(write_error)?;
    writer
        .add_array("arrival_time", &arrival_time)
        .map_err(write_error)?;
    writer
        .add_array("sim_weight", &sim_weight)
        .map_err(write_error)?;
    writer.finish().map_err(write_error)?;
    Ok(())
}

fn parse_table_lines<T>(
    path: &Path,
    parse_line: impl Fn(usize, &[&str]) -> AnisoResult<T>,
) -> AnisoResult<Vec<T>> {
    let content = std::fs::read_to_string(path).map_err(|source| {
        AnisoError::io(format!("failed to read table '{}'", path.display()), source)
    })?;

    let mut rows = Vec::new();
    for (line_number, line) in content.lines().enumerate() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() || fields[0].starts_with('#') {
            continue;
        }
        rows.push(parse_line(line_number + 1, &fields)?);
    }
    Ok(rows)
}

/// One bin count per line.
pub fn read_bins_table(path: &Path) -> AnisoResult<Vec<usize>> {
    parse_table_lines(path, |line, fields| {
        if fields.len() != 1 {
            return Err(AnisoError::data_format(format!(
                "'{}' line {line}: expected one bin count, got {} fields",
                path.display(),
                fields.len()
            )));
        }
        fields[0].parse::<usize>().map_err(|_| {
            AnisoError::data_format(format!(
                "'{}' line {line}: invalid bin count '{}'",
                path.display(),
                fields[0]
            ))
        })
    })
}

/// One integer pooling width per line.
pub fn read_widths_table(path: &Path) -> AnisoResult<Vec<u32>> {
    parse_table_lines(path, |line, fields| {
        if fields.len() != 1 {
            return Err(AnisoError::data_format(format!(
                "'{}' line {line}: expected one width, got {} fields",
                path.display(),
                fields.len()
            )));
        }
        fields[0].parse::<u32>().map_err(|_| {
            AnisoError::data_format(format!(
                "'{}' line {line}: invalid width '{}'",
                path.display(),
                fields[0]
            ))
        })
    })
}

/// Two floats per line: lower and upper window bounds in TeV. Window
/// validity (lower < upper) is checked per configuration, not at load, so a
/// bad row cannot abort its siblings.
pub fn read_limits_table(path: &Path) -> AnisoResult<Vec<(f64, f64)>> {
    parse_table_lines(path, |line, fields| {
        if fields.len() != 2 {
            return Err(AnisoError::data_format(format!(
                "'{}' line {line}: expected lower and upper limits, got {} fields",
                path.display(),
                fields.len()
            )));
        }
        let parse = |field: &str| {
            field.parse::<f64>().map_err(|_| {
                AnisoError::data_format(format!(
                    "'{}' line {line}: invalid limit '{field}'",
                    path.display()
                ))
            })
        };
        Ok((parse(fields[0])?, parse(fields[1])?))
    })
}

/// Everything one analysis run writes to its output archive. The input
/// tables round-trip verbatim next to the produced maps.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputArchive {
    pub npix: usize,
    pub flux: Vec<Vec<f64>>,
    pub time: Vec<Vec<f64>>,
    pub kolmogorov: Vec<Vec<f64>>,
    pub bin_limits: Vec<Vec<f64>>,
    pub bins: Vec<usize>,
    pub widths: Vec<u32>,
    pub limits: Vec<(f64, f64)>,
}

fn matrix_from_rows(rows: &[Vec<f64>], columns: usize, name: &str) -> AnisoResult<Array2<f64>> {
    let mut flat = Vec::with_capacity(rows.len() * columns);
    for (index, row) in rows.iter().enumerate() {
        if row.len() != columns {
            return Err(AnisoError::data_format(format!(
                "'{name}' row {index} has {} columns, expected {columns}",
                row.len()
            )));
        }
        flat.extend_from_slice(row);
    }
    Array2::from_shape_vec((rows.len(), columns), flat)
        .map_err(|source| AnisoError::data_format(format!("'{name}' shape error: {source}")))
}

fn rows_from_matrix(matrix: &Array2<f64>) -> Vec<Vec<f64>> {
    matrix.rows().into_iter().map(|row| row.to_vec()).collect()
}

impl OutputArchive {
    pub fn write(&self, path: &Path) -> AnisoResult<()> {
        let file = File::create(path).map_err(|source| {
            AnisoError::io(
                format!("failed to create archive '{}'", path.display()),
                source,
            )
        })?;
        let mut writer = NpzWriter::new_compressed(BufWriter::new(file));
        let write_error = |source: ndarray_npy::WriteNpzError| {
            AnisoError::data_format(format!(
                "failed to write archive '{}': {source}",
                path.display()
            ))
        };

        let bin_limit_columns = self.bin_limits.first().map(Vec::len).unwrap_or(0);
        let flux = matrix_from_rows(&self.flux, self.npix, "flux")?;
        let time = matrix_from_rows(&self.time, self.npix, "time")?;
        let kolmogorov = matrix_from_rows(&self.kolmogorov, self.npix, "kolmogorov")?;
        let bin_limits = matrix_from_rows(&self.bin_limits, bin_limit_columns, "binlimits")?;
        let limit_rows: Vec<Vec<f64>> = self
            .limits
            .iter()
            .map(|&(lower, upper)| vec![lower, upper])
            .collect();
        let limits = matrix_from_rows(&limit_rows, 2, "limits")?;
        let bins: Array1<i64> = self.bins.iter().map(|&b| b as i64).collect();
        let widths: Array1<i64> = self.widths.iter().map(|&w| i64::from(w)).collect();

        writer.add_array("flux", &flux).map_err(write_error)?;
        writer.add_array("time", &time).map_err(write_error)?;
        writer
            .add_array("kolmogorov", &kolmogorov)
            .map_err(write_error)?;
        writer
            .add_array("binlimits", &bin_limits)
            .map_err(write_error)?;
        writer.add_array("limits", &limits).map_err(write_error)?;
        writer.add_array("bins", &bins).map_err(write_error)?;
        writer.add_array("widths", &widths).map_err(write_error)?;
        writer.finish().map_err(write_error)?;
        Ok(())
    }

    pub fn read(path: &Path) -> AnisoResult<Self> {
        let mut reader = open_reader(path)?;
        let names = archive_names(&mut reader, path)?;
        for required in [
            "flux",
            "time",
            "kolmogorov",
            "binlimits",
            "limits",
            "bins",
            "widths",
        ] {
            if !has_entry(&names, required) {
                return Err(AnisoError::missing_field(required));
            }
        }

        let read_matrix = |reader: &mut NpzReader<BufReader<File>>, name: &str| {
            reader
                .by_name::<OwnedRepr<f64>, Ix2>(name)
                .map_err(|source| {
                    AnisoError::data_format(format!(
                        "failed to decode array '{name}' in '{}': {source}",
                        path.display()
                    ))
                })
        };

        let flux = read_matrix(&mut reader, "flux")?;
        let time = read_matrix(&mut reader, "time")?;
        let kolmogorov = read_matrix(&mut reader, "kolmogorov")?;
        let bin_limits = read_matrix(&mut reader, "binlimits")?;
        let limits = read_matrix(&mut reader, "limits")?;
        let bins = read_i64_column(&mut reader, path, "bins")?;
        let widths = read_i64_column(&mut reader, path, "widths")?;

        let npix = flux.ncols();
        Ok(Self {
            npix,
            flux: rows_from_matrix(&flux),
            time: rows_from_matrix(&time),
            kolmogorov: rows_from_matrix(&kolmogorov),
            bin_limits: rows_from_matrix(&bin_limits),
            bins: bins.iter().map(|&b| b as usize).collect(),
            widths: widths.iter().map(|&w| w as u32).collect(),
            limits: rows_from_matrix(&limits)
                .into_iter()
                .map(|row| (row[0], row[1]))
                .collect(),
        })
    }
}

/// Writes named stacks of per-pixel maps, one 2-D array per name. Used for
/// the per-binning job outputs.
pub fn write_maps_archive(
    path: &Path,
    npix: usize,
    groups: &[(&str, &[PixelMap])],
) -> AnisoResult<()> {
    let file = File::create(path).map_err(|source| {
        AnisoError::io(
            format!("failed to create archive '{}'", path.display()),
            source,
        )
    })?;
    let mut writer = NpzWriter::new_compressed(BufWriter::new(file));
    let write_error = |source: ndarray_npy::WriteNpzError| {
        AnisoError::data_format(format!(
            "failed to write archive '{}': {source}",
            path.display()
        ))
    };

    for (name, maps) in groups {
        let rows: Vec<Vec<f64>> = maps.iter().map(|map| map.values().to_vec()).collect();
        let matrix = matrix_from_rows(&rows, npix, name)?;
        writer.add_array(*name, &matrix).map_err(write_error)?;
    }
    writer.finish().map_err(write_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        OutputArchive, read_bins_table, read_limits_table, read_particle_archive,
        read_widths_table, write_maps_archive, write_particle_archive,
    };
    use crate::domain::{AnisoError, ParticleRecord, PixelMap, Resolution};
    use crate::store::ParticleStore;
    use std::fs;
    use tempfile::TempDir;

    fn sample_store() -> ParticleStore {
        let resolution = Resolution::new(2).expect("nside 2 should be valid");
        let records = vec![
            ParticleRecord::new(0, 1.5, 10.0),
            ParticleRecord::new(47, 2.5, 20.0).with_sim_weight(0.5),
        ];
        ParticleStore::load(resolution, records).expect("store should load")
    }

    #[test]
    fn particle_archive_round_trips() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("particles.npz");
        let store = sample_store();

        write_particle_archive(&path, &store).expect("write should succeed");
        let loaded = read_particle_archive(&path, None).expect("read should succeed");

        assert_eq!(loaded.resolution(), store.resolution());
        assert_eq!(loaded.len(), store.len());
        let energies: Vec<f64> = loaded.all_particles().map(|r| r.energy).collect();
        assert_eq!(energies, vec![1.5, 2.5]);
        let weights: Vec<f64> = loaded.all_particles().map(|r| r.sim_weight).collect();
        assert_eq!(weights, vec![1.0, 0.5]);
    }

    #[test]
    fn particle_archive_rejects_resolution_mismatch() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("particles.npz");
        write_particle_archive(&path, &sample_store()).expect("write should succeed");

        let other = Resolution::new(4).expect("nside 4 should be valid");
        let error = read_particle_archive(&path, Some(other))
            .expect_err("resolution mismatch should fail");
        assert!(matches!(error, AnisoError::DataFormat(_)));
    }

    #[test]
    fn missing_archive_surfaces_an_io_error() {
        let temp = TempDir::new().expect("tempdir should be created");
        let error = read_particle_archive(&temp.path().join("absent.npz"), None)
            .expect_err("missing file should fail");
        assert!(matches!(error, AnisoError::Io { .. }));
    }

    #[test]
    fn tables_parse_whitespace_delimited_rows() {
        let temp = TempDir::new().expect("tempdir should be created");
        let bins_path = temp.path().join("bins");
        let limits_path = temp.path().join("limits");
        let widths_path = temp.path().join("widths");

        fs::write(&bins_path, "5\n10\n").expect("bins table should write");
        fs::write(&limits_path, "1.0 10.0\n0.5  2.5\n").expect("limits table should write");
        fs::write(&widths_path, "0\n2\n").expect("widths table should write");

        assert_eq!(read_bins_table(&bins_path).expect("bins"), vec![5, 10]);
        assert_eq!(
            read_limits_table(&limits_path).expect("limits"),
            vec![(1.0, 10.0), (0.5, 2.5)]
        );
        assert_eq!(read_widths_table(&widths_path).expect("widths"), vec![0, 2]);
    }

    #[test]
    fn malformed_table_rows_report_the_line() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("limits");
        fs::write(&path, "1.0 10.0\n3.0\n").expect("table should write");
        let error = read_limits_table(&path).expect_err("short row should fail");
        let message = error.to_string();
        assert!(message.contains("line 2"), "message was: {message}");
    }

    #[test]
    fn inverted_limit_rows_load_without_error() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("limits");
        fs::write(&path, "10.0 1.0\n").expect("table should write");
        assert_eq!(
            read_limits_table(&path).expect("limits"),
            vec![(10.0, 1.0)]
        );
    }

    #[test]
    fn output_archive_round_trips_tables_verbatim() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("nside=2.npz");
        let archive = OutputArchive {
            npix: 4,
            flux: vec![vec![1.0, 0.0, 0.0, 2.0], vec![0.5, 0.5, 0.0, 0.0]],
            time: vec![vec![0.0; 4], vec![1.0; 4]],
            kolmogorov: vec![vec![0.9, -0.1, f64::NAN, 1.0]],
            bin_limits: vec![vec![1.0, 2.0, 3.0]],
            bins: vec![2],
            widths: vec![0, 1],
            limits: vec![(1.0, 10.0)],
        };

        archive.write(&path).expect("write should succeed");
        let loaded = OutputArchive::read(&path).expect("read should succeed");

        assert_eq!(loaded.bins, archive.bins);
        assert_eq!(loaded.widths, archive.widths);
        assert_eq!(loaded.limits, archive.limits);
        assert_eq!(loaded.bin_limits, archive.bin_limits);
        assert_eq!(loaded.flux, archive.flux);
        assert_eq!(loaded.time, archive.time);
        assert_eq!(loaded.kolmogorov.len(), 1);
        assert!(loaded.kolmogorov[0][2].is_nan());
        assert_eq!(loaded.kolmogorov[0][3], 1.0);
    }

    #[test]
    fn maps_archive_writes_named_stacks() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("standard_bins=2.npz");
        let flux = [PixelMap::new(vec![1.0, 2.0]), PixelMap::new(vec![3.0, 4.0])];
        let time = [PixelMap::new(vec![0.0, 0.5]), PixelMap::new(vec![0.5, 0.0])];

        write_maps_archive(&path, 2, &[("flux", &flux), ("time", &time)])
            .expect("write should succeed");
        assert!(path.exists());
    }
}
