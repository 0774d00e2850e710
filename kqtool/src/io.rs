use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use kqcore::tracking::feature::ChromatographicFeature;
use kqcore::{NoiseSeed, Spectrum, TrackerModel, TrackingParameters};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Everything needed to run the tracker, loadable from a JSON file.
///
/// Missing sections fall back to their defaults; without a `noise_seed` the seed
/// has to come from the command line or a ghost scan.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub parameters: TrackingParameters,
    pub model: TrackerModel,
    pub noise_seed: Option<NoiseSeed>,
}

impl RunConfig {
    pub fn from_json(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let reader = BufReader::new(File::open(path)?);
        let config: RunConfig = serde_json::from_reader(reader)?;
        Ok(config)
    }
}

/// Reads a run stored as a JSON array of `{ "time", "mz", "intensity" }` objects.
pub fn read_run_json(path: &Path) -> Result<Vec<Spectrum>, Box<dyn std::error::Error>> {
    let reader = BufReader::new(File::open(path)?);
    let spectra: Vec<Spectrum> = serde_json::from_reader(reader)?;
    debug!("read {} spectra from {}", spectra.len(), path.display());
    Ok(spectra)
}

/// Reads a run from a file of `time<TAB>mz<TAB>intensity` lines.
pub fn read_run_tsv(path: &Path) -> Result<Vec<Spectrum>, Box<dyn std::error::Error>> {
    let reader = BufReader::new(File::open(path)?);
    let spectra = parse_run_tsv(reader)?;
    debug!("read {} spectra from {}", spectra.len(), path.display());
    Ok(spectra)
}

/// Consecutive lines sharing a time form one spectrum. Blank lines and lines
/// starting with `#` are skipped.
pub fn parse_run_tsv<R: BufRead>(reader: R) -> Result<Vec<Spectrum>, Box<dyn std::error::Error>> {
    let mut spectra = Vec::new();
    let mut current: Option<(f64, Vec<f64>, Vec<f64>)> = None;

    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        if fields.len() != 3 {
            return Err(format!("line {}: expected 3 tab separated fields, found {}", number + 1, fields.len()).into());
        }
        let parse = |field: &str| -> Result<f64, Box<dyn std::error::Error>> {
            field.parse::<f64>().map_err(|e| format!("line {}: {}: {:?}", number + 1, e, field).into())
        };
        let (time, mz, intensity) = (parse(fields[0])?, parse(fields[1])?, parse(fields[2])?);

        if let Some((t, mzs, intensities)) = current.as_mut() {
            if *t == time {
                mzs.push(mz);
                intensities.push(intensity);
                continue;
            }
        }
        if let Some((t, mzs, intensities)) = current.take() {
            spectra.push(Spectrum::from_unsorted(t, mzs, intensities));
        }
        current = Some((time, vec![mz], vec![intensity]));
    }

    if let Some((t, mzs, intensities)) = current {
        spectra.push(Spectrum::from_unsorted(t, mzs, intensities));
    }
    Ok(spectra)
}

pub fn write_features<W: Write>(writer: W, features: &[ChromatographicFeature]) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = BufWriter::new(writer);
    serde_json::to_writer_pretty(&mut writer, features)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

pub fn write_features_json(path: &Path, features: &[ChromatographicFeature]) -> Result<(), Box<dyn std::error::Error>> {
    write_features(File::create(path)?, features)?;
    debug!("wrote {} features to {}", features.len(), path.display());
    Ok(())
}
