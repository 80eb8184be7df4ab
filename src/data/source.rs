//! Where reference spectra come from: cached JCAMP-DX files on disk and,
//! with the `nist` feature, the NIST Chemistry WebBook.

use std::path::{Path, PathBuf};

use log::info;

use super::jcamp::{read_jcamp, ReferenceSpectrum};
use super::model::{CompoundLibraryEntry, MetadataValue};
use super::store::SpectralLibrary;
use crate::error::{RamanError, Result};

/// Compounds of the default reference library and their CAS registry numbers.
pub const STANDARD_LIBRARY: [(&str, &str); 7] = [
    ("water", "7732-18-5"),
    ("carbon monoxide", "630-08-0"),
    ("carbon dioxide", "124-38-9"),
    ("formic acid", "64-18-6"),
    ("isopropyl alcohol", "67-63-0"),
    ("ethanol", "64-17-5"),
    ("acetone", "67-64-1"),
];

/// Strip the dashes from a CAS registry number: `7732-18-5` → `7732185`.
pub fn normalize_cas(cas: &str) -> String {
    cas.trim().chars().filter(|c| *c != '-').collect()
}

/// Something that can produce the reference spectrum of a CAS number.
pub trait SpectrumSource {
    fn fetch(&self, cas: &str) -> Result<ReferenceSpectrum>;
}

/// A directory of `{cas}_NIST_IR.jdx` files.
#[derive(Debug, Clone)]
pub struct JcampDirectory {
    dir: PathBuf,
}

impl JcampDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        JcampDirectory { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, cas: &str) -> PathBuf {
        self.dir.join(format!("{}_NIST_IR.jdx", normalize_cas(cas)))
    }
}

impl SpectrumSource for JcampDirectory {
    fn fetch(&self, cas: &str) -> Result<ReferenceSpectrum> {
        let path = self.path_for(cas);
        if !path.is_file() {
            return Err(RamanError::missing_reference(format!(
                "CAS {cas} (no file {})",
                path.display()
            )));
        }
        read_jcamp(&path)
    }
}

#[cfg(feature = "nist")]
pub use webbook::NistWebBook;

#[cfg(feature = "nist")]
mod webbook {
    use log::{debug, info};
    use reqwest::blocking::Client;
    use reqwest::StatusCode;

    use super::{normalize_cas, JcampDirectory, SpectrumSource};
    use crate::data::jcamp::{read_jcamp, ReferenceSpectrum};
    use crate::error::{RamanError, Result};

    const WEBBOOK_URL: &str = "https://webbook.nist.gov/cgi/cbook.cgi";
    const NOT_FOUND: &str = "##TITLE=Spectrum not found.";

    /// Downloads IR spectra from the NIST Chemistry WebBook into a
    /// [`JcampDirectory`] cache. Files already cached are not fetched again.
    pub struct NistWebBook {
        client: Client,
        cache: JcampDirectory,
    }

    impl NistWebBook {
        pub fn new(cache: JcampDirectory) -> Result<Self> {
            let client = Client::builder()
                .build()
                .map_err(|e| RamanError::Download(e.to_string()))?;
            Ok(NistWebBook { client, cache })
        }

        pub fn url_for(cas: &str) -> String {
            format!("{WEBBOOK_URL}?JCAMP=C{}&Index=1&Type=IR", normalize_cas(cas))
        }

        fn download(&self, cas: &str) -> Result<()> {
            let url = Self::url_for(cas);
            debug!("GET {url}");
            let response = self
                .client
                .get(&url)
                .send()
                .map_err(|e| RamanError::Download(e.to_string()))?;
            let status = response.status();
            let body = response
                .text()
                .map_err(|e| RamanError::Download(e.to_string()))?;
            if body.trim_start().starts_with(NOT_FOUND) {
                return Err(RamanError::missing_reference(format!(
                    "CAS {cas} is not in the NIST WebBook"
                )));
            }
            if status != StatusCode::OK {
                return Err(RamanError::Download(format!("{url} returned {status}")));
            }

            std::fs::create_dir_all(self.cache.dir())?;
            let path = self.cache.path_for(cas);
            std::fs::write(&path, body)?;
            info!("downloaded {} to {}", normalize_cas(cas), path.display());
            Ok(())
        }
    }

    impl SpectrumSource for NistWebBook {
        fn fetch(&self, cas: &str) -> Result<ReferenceSpectrum> {
            let path = self.cache.path_for(cas);
            if path.is_file() {
                info!("{} already cached", path.display());
            } else {
                self.download(cas)?;
            }
            read_jcamp(&path)
        }
    }

    #[cfg(test)]
    mod test {
        use super::*;

        #[test]
        fn webbook_url() {
            assert_eq!(
                NistWebBook::url_for("7732-18-5"),
                "https://webbook.nist.gov/cgi/cbook.cgi?JCAMP=C7732185&Index=1&Type=IR"
            );
        }
    }
}

/// Store `reference` in `library` as absorbance, under `label` or the
/// upper-cased title. Returns the key used.
pub fn add_reference(
    library: &mut SpectralLibrary,
    reference: ReferenceSpectrum,
    label: Option<&str>,
) -> Result<String> {
    let reference = reference.to_absorbance()?;
    let key = match label {
        Some(l) => l.to_string(),
        None if !reference.title.trim().is_empty() => reference.title.trim().to_uppercase(),
        None => {
            return Err(RamanError::invalid_input(
                "reference spectrum has no title; a label is required",
            ))
        }
    };

    let mut entry = CompoundLibraryEntry::new(key.as_str(), reference.spectrum);
    entry
        .metadata
        .insert("title".to_string(), MetadataValue::from(reference.title.as_str()));
    entry
        .metadata
        .insert("xunits".to_string(), MetadataValue::from(reference.x_units.as_str()));
    entry
        .metadata
        .insert("yunits".to_string(), MetadataValue::from(reference.y_units.as_str()));
    if let Some(cas) = &reference.cas {
        entry
            .metadata
            .insert("cas".to_string(), MetadataValue::from(normalize_cas(cas).as_str()));
    }
    library.insert(&key, entry);
    info!("{key} loaded into {}", library.path().display());
    Ok(key)
}

/// Fetch every compound of [`STANDARD_LIBRARY`] from `source` into `library`.
pub fn add_standard_library(
    library: &mut SpectralLibrary,
    source: &dyn SpectrumSource,
) -> Result<Vec<String>> {
    STANDARD_LIBRARY
        .iter()
        .map(|(_, cas)| add_reference(library, source.fetch(cas)?, None))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tempfile::tempdir;

    const WATER_JDX: &str = "\
##TITLE=Water
##CAS REGISTRY NO=7732-18-5
##XUNITS=1/CM
##YUNITS=TRANSMITTANCE
##XYDATA=(X++(Y..Y))
1000 0.9 0.8 0.7
1003 0.6 0.5
##END=
";

    #[test]
    fn cas_numbers() {
        assert_eq!(normalize_cas("7732-18-5"), "7732185");
        assert_eq!(normalize_cas(" 64175 "), "64175");
        assert_eq!(STANDARD_LIBRARY.len(), 7);
        assert!(STANDARD_LIBRARY.iter().any(|(name, cas)| *name == "ethanol" && *cas == "64-17-5"));
    }

    #[test]
    fn directory_lookup() {
        let dir = tempdir().unwrap();
        let source = JcampDirectory::new(dir.path());
        assert_eq!(
            source.path_for("7732-18-5"),
            dir.path().join("7732185_NIST_IR.jdx")
        );
        assert!(matches!(
            source.fetch("7732-18-5"),
            Err(RamanError::MissingReference(_))
        ));

        std::fs::write(source.path_for("7732185"), WATER_JDX).unwrap();
        let water = source.fetch("7732-18-5").unwrap();
        assert_eq!(water.title, "Water");
        assert_eq!(water.spectrum.len(), 5);
    }

    #[test]
    fn references_stored_as_absorbance() {
        let dir = tempdir().unwrap();
        let source = JcampDirectory::new(dir.path());
        std::fs::write(source.path_for("7732185"), WATER_JDX).unwrap();
        let mut library = SpectralLibrary::new(dir.path().join("lib.json"));

        let key = add_reference(&mut library, source.fetch("7732185").unwrap(), None).unwrap();
        assert_eq!(key, "WATER");
        let entry = library.load("WATER").unwrap();
        assert_abs_diff_eq!(entry.spectrum.y()[0], 0.1, epsilon = 1e-12);
        assert_eq!(entry.metadata["yunits"], MetadataValue::from("ABSORBANCE"));
        assert_eq!(entry.metadata["cas"], MetadataValue::from("7732185"));
        assert!(entry.peaks.is_none());

        let custom = add_reference(&mut library, source.fetch("7732185").unwrap(), Some("H2O")).unwrap();
        assert_eq!(custom, "H2O");
        assert_eq!(library.labels(), vec!["H2O", "WATER"]);
    }

    #[test]
    fn standard_library_stops_at_first_missing_file() {
        let dir = tempdir().unwrap();
        let source = JcampDirectory::new(dir.path());
        std::fs::write(source.path_for("7732185"), WATER_JDX).unwrap();
        let mut library = SpectralLibrary::new(dir.path().join("lib.json"));
        let result = add_standard_library(&mut library, &source);
        assert!(matches!(result, Err(RamanError::MissingReference(_))));
        assert!(library.contains("WATER"));
    }
}
