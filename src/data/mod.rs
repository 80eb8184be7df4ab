/// Data layer: core types, file formats, reference sources and the library.
///
/// Architecture:
/// ```text
///  .json / .csv / .parquet        .jdx               NIST WebBook
///        │                          │                     │
///        ▼                          ▼                     ▼
///   ┌──────────┐             ┌──────────┐          ┌──────────┐
///   │  loader   │            │  jcamp   │ ◄─────── │  source   │  cache {cas}_NIST_IR.jdx
///   └──────────┘             └──────────┘          └──────────┘
///        │                          │  ReferenceSpectrum
///        ▼                          ▼
///   ┌──────────────┐         ┌──────────────────┐
///   │ SpectralDataset│        │  store            │  label → CompoundLibraryEntry (JSON)
///   └──────────────┘         └──────────────────┘
///        │                          │  snapshot()
///        └──────────► analysis ◄────┘
/// ```

pub mod jcamp;
pub mod loader;
pub mod model;
pub mod source;
pub mod store;
