//! Catalog Module - Map Lists and Source Lists
//! ===========================================
//!
//! Both catalogs are plain text, one record per line, whitespace separated.
//! Blank lines and lines starting with `#` are ignored. Record order is
//! significant and preserved: map order is the canonical map sequence of a
//! campaign, source order gives each source its identity.
//!
//! Map list:
//! ```text
//! <counts> <exposure> <emin> <emax> <tstart> <tstop> [<galcoeff> <isocoeff>]
//! ```
//!
//! Source list:
//! ```text
//! <flux> <l> <b> <index> <fixflag> <minsqrtts> <name> [<locationlimit>]
//! ```

use gammasim_env::{EnergyBand, FixFlag, SourceDescriptor, TimeRange};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors reading or writing catalogs.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Cannot access catalog {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("Catalog {} has no entries", .0.display())]
    Empty(PathBuf),
}

fn parse_field<T: std::str::FromStr>(token: &str, what: &str, line: usize) -> Result<T, CatalogError> {
    token.parse().map_err(|_| CatalogError::Parse {
        line,
        reason: format!("invalid {} '{}'", what, token),
    })
}

/// Yields (1-based line number, tokens) for every record line.
fn records(text: &str) -> impl Iterator<Item = (usize, Vec<&str>)> {
    text.lines().enumerate().filter_map(|(i, line)| {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            None
        } else {
            Some((i + 1, trimmed.split_whitespace().collect()))
        }
    })
}

fn read_text(path: &Path) -> Result<String, CatalogError> {
    fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// =============================================================================
// MAP LIST
// =============================================================================

/// One row of a map list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapEntry {
    /// Counts map reference
    pub counts: PathBuf,
    /// Exposure map reference
    pub exposure: PathBuf,
    pub band: EnergyBand,
    pub time: TimeRange,
    /// Diffuse-emission coefficient (absent = no background model)
    pub gal_coeff: Option<f64>,
    /// Isotropic-emission coefficient
    pub iso_coeff: Option<f64>,
}

impl MapEntry {
    /// True when the entry carries background coefficients.
    pub fn has_background(&self) -> bool {
        self.gal_coeff.is_some()
    }
}

/// Ordered list of map entries.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MapCatalog {
    entries: Vec<MapEntry>,
}

impl MapCatalog {
    /// Reads a map list file.
    ///
    /// # Errors
    /// * `CatalogError::Io` - file missing or unreadable
    /// * `CatalogError::Parse` - malformed line
    /// * `CatalogError::Empty` - no entries
    pub fn read(path: &Path) -> Result<Self, CatalogError> {
        let catalog = Self::parse(&read_text(path)?)?;
        if catalog.is_empty() {
            return Err(CatalogError::Empty(path.to_path_buf()));
        }
        Ok(catalog)
    }

    /// Parses map list text.
    pub fn parse(text: &str) -> Result<Self, CatalogError> {
        let mut entries = Vec::new();
        for (line, tokens) in records(text) {
            if !matches!(tokens.len(), 6 | 8) {
                return Err(CatalogError::Parse {
                    line,
                    reason: format!(
                        "expected 6 columns (or 8 with coefficients), found {}",
                        tokens.len()
                    ),
                });
            }
            let emin: f64 = parse_field(tokens[2], "emin", line)?;
            let emax: f64 = parse_field(tokens[3], "emax", line)?;
            if emin >= emax {
                return Err(CatalogError::Parse {
                    line,
                    reason: format!("empty energy band {}-{}", emin, emax),
                });
            }
            let (gal_coeff, iso_coeff) = if tokens.len() == 8 {
                (
                    Some(parse_field(tokens[6], "galcoeff", line)?),
                    Some(parse_field(tokens[7], "isocoeff", line)?),
                )
            } else {
                (None, None)
            };
            entries.push(MapEntry {
                counts: PathBuf::from(tokens[0]),
                exposure: PathBuf::from(tokens[1]),
                band: EnergyBand::new(emin, emax),
                time: TimeRange::new(
                    parse_field(tokens[4], "tstart", line)?,
                    parse_field(tokens[5], "tstop", line)?,
                ),
                gal_coeff,
                iso_coeff,
            });
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[MapEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// SOURCE LIST
// =============================================================================

/// Ordered list of point sources.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceCatalog {
    sources: Vec<SourceDescriptor>,
}

impl SourceCatalog {
    pub fn from_sources(sources: Vec<SourceDescriptor>) -> Self {
        Self { sources }
    }

    /// Reads a source list file. An empty list is valid.
    pub fn read(path: &Path) -> Result<Self, CatalogError> {
        Self::parse(&read_text(path)?)
    }

    /// Parses source list text.
    pub fn parse(text: &str) -> Result<Self, CatalogError> {
        let mut sources = Vec::new();
        for (line, tokens) in records(text) {
            if !matches!(tokens.len(), 7 | 8) {
                return Err(CatalogError::Parse {
                    line,
                    reason: format!("expected 7 or 8 columns, found {}", tokens.len()),
                });
            }
            let flux: f64 = parse_field(tokens[0], "flux", line)?;
            if flux < 0.0 {
                return Err(CatalogError::Parse {
                    line,
                    reason: format!("negative flux {}", flux),
                });
            }
            let mut source = SourceDescriptor::new(
                tokens[6],
                parse_field(tokens[1], "l", line)?,
                parse_field(tokens[2], "b", line)?,
                parse_field(tokens[3], "index", line)?,
                flux,
                FixFlag::from_code(parse_field(tokens[4], "fixflag", line)?),
            );
            source.min_sqrt_ts = parse_field(tokens[5], "minsqrtts", line)?;
            if let Some(limit) = tokens.get(7) {
                source.location_limit = parse_field(limit, "locationlimit", line)?;
            }
            sources.push(source);
        }
        Ok(Self { sources })
    }

    pub fn sources(&self) -> &[SourceDescriptor] {
        &self.sources
    }

    pub fn into_sources(self) -> Vec<SourceDescriptor> {
        self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Formats the catalog in source-list syntax.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for s in &self.sources {
            let _ = writeln!(
                out,
                "{:e} {} {} {} {} {} {} {}",
                s.flux,
                s.l,
                s.b,
                s.index,
                s.fix_flag.code(),
                s.min_sqrt_ts,
                s.name,
                s.location_limit
            );
        }
        out
    }

    /// Writes the catalog, replacing the file.
    pub fn write(&self, path: &Path) -> Result<(), CatalogError> {
        fs::write(path, self.to_text()).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Appends the catalog to a file, creating it if needed.
    pub fn append_to(&self, path: &Path) -> Result<(), CatalogError> {
        let io_err = |source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io_err)?;
        file.write_all(self.to_text().as_bytes()).map_err(io_err)
    }
}
