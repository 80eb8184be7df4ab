use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};

use super::model::{CompoundLibrary, CompoundLibraryEntry, FittedPeak, Spectrum};
use crate::analysis::pipeline::fit_spectrum;
use crate::config::AnalysisConfig;
use crate::error::{RamanError, Result};

// ---------------------------------------------------------------------------
// SpectralLibrary – persistent compound library
// ---------------------------------------------------------------------------

/// Known compounds persisted as one JSON document keyed by label.
///
/// Mutations only touch memory; [`SpectralLibrary::persist`] writes the
/// document back. Matching works on the immutable [`CompoundLibrary`] map
/// returned by [`SpectralLibrary::snapshot`].
#[derive(Debug, Clone)]
pub struct SpectralLibrary {
    path: PathBuf,
    entries: CompoundLibrary,
}

impl SpectralLibrary {
    /// An empty library that will be written to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SpectralLibrary {
            path: path.into(),
            entries: CompoundLibrary::new(),
        }
    }

    /// Read the library at `path`; a missing file yields an empty library.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            debug!("{} does not exist yet, starting empty", path.display());
            return Ok(Self::new(path));
        }
        let reader = BufReader::new(File::open(&path)?);
        let entries: CompoundLibrary = serde_json::from_reader(reader)?;
        info!("opened library {} ({} compounds)", path.display(), entries.len());
        Ok(SpectralLibrary { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, label: &str) -> bool {
        self.entries.contains_key(label)
    }

    /// Labels in sorted order.
    pub fn labels(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// # Errors
    ///
    /// [`RamanError::MissingReference`] if no entry has this label.
    pub fn load(&self, label: &str) -> Result<&CompoundLibraryEntry> {
        self.entries
            .get(label)
            .ok_or_else(|| RamanError::missing_reference(label))
    }

    /// Store `spectrum` under `label`, replacing any previous entry, which is
    /// returned.
    pub fn save(
        &mut self,
        label: &str,
        spectrum: Spectrum,
        peaks: Option<Vec<FittedPeak>>,
    ) -> Option<CompoundLibraryEntry> {
        let mut entry = CompoundLibraryEntry::new(label, spectrum);
        entry.peaks = peaks;
        self.insert(label, entry)
    }

    pub fn insert(&mut self, label: &str, entry: CompoundLibraryEntry) -> Option<CompoundLibraryEntry> {
        debug!("storing {label} ({} points)", entry.spectrum.len());
        self.entries.insert(label.to_string(), entry)
    }

    pub fn remove(&mut self, label: &str) -> Result<CompoundLibraryEntry> {
        self.entries
            .remove(label)
            .ok_or_else(|| RamanError::missing_reference(label))
    }

    pub fn snapshot(&self) -> &CompoundLibrary {
        &self.entries
    }

    /// Fit every entry that has no cached peaks. Returns how many were fitted.
    pub fn ensure_fitted(&mut self, config: &AnalysisConfig) -> Result<usize> {
        let mut fitted = 0;
        for (label, entry) in self.entries.iter_mut().filter(|(_, e)| e.peaks.is_none()) {
            let report = fit_spectrum(&entry.spectrum, config)?;
            info!("{label}: cached {} fitted peaks", report.peaks().len());
            entry.peaks = Some(report.fit.peaks);
            fitted += 1;
        }
        Ok(fitted)
    }

    /// Write the library to a sibling `.tmp` file, then rename it over `path`.
    pub fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut tmp_name = self.path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp = self.path.with_file_name(tmp_name);

        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer_pretty(&mut writer, &self.entries)?;
        writer.flush()?;
        drop(writer);
        std::fs::rename(&tmp, &self.path)?;
        info!("saved {} compounds to {}", self.entries.len(), self.path.display());
        Ok(())
    }
}
