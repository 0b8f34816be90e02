//! Common types shared by the fit engine and the map stores.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use std::path::PathBuf;

/// Energy band bounds in MeV.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyBand {
    pub emin: f64,
    pub emax: f64,
}

impl EnergyBand {
    pub fn new(emin: f64, emax: f64) -> Self {
        Self { emin, emax }
    }

    /// Geometric centre of the band.
    pub fn center(&self) -> f64 {
        (self.emin * self.emax).sqrt()
    }

    pub fn contains(&self, energy: f64) -> bool {
        energy >= self.emin && energy <= self.emax
    }
}

impl std::fmt::Display for EnergyBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.emin, self.emax)
    }
}

/// Observation time bounds in seconds (mission elapsed time).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub tstart: f64,
    pub tstop: f64,
}

impl TimeRange {
    pub fn new(tstart: f64, tstop: f64) -> Self {
        Self { tstart, tstop }
    }

    /// Smallest range covering both `self` and `other`.
    pub fn span(&self, other: &TimeRange) -> TimeRange {
        TimeRange {
            tstart: self.tstart.min(other.tstart),
            tstop: self.tstop.max(other.tstop),
        }
    }
}

/// Signed longitude difference `l - reference`, reduced into (-180, 180].
pub fn longitude_offset(l: f64, reference: f64) -> f64 {
    let d = (l - reference + 180.0).rem_euclid(360.0) - 180.0;
    if d == -180.0 {
        180.0
    } else {
        d
    }
}

/// Longitude reduced into [0, 360).
pub fn normalize_longitude(l: f64) -> f64 {
    let wrapped = l.rem_euclid(360.0);
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Pixel grid of a sky map.
///
/// Maps use a flat-sky grid centred on `(center_l, center_b)`: pixel
/// `(row, col)` has its centre at
/// `l = center_l + (col + 0.5 - cols/2) * bin_size_deg` and
/// `b = center_b + (row + 0.5 - rows/2) * bin_size_deg`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapGeometry {
    /// Galactic longitude of the map centre (degrees)
    pub center_l: f64,

    /// Galactic latitude of the map centre (degrees)
    pub center_b: f64,

    /// Pixel edge (degrees)
    pub bin_size_deg: f64,

    pub rows: usize,
    pub cols: usize,
}

impl MapGeometry {
    pub fn new(center_l: f64, center_b: f64, bin_size_deg: f64, rows: usize, cols: usize) -> Self {
        Self {
            center_l,
            center_b,
            bin_size_deg,
            rows,
            cols,
        }
    }

    /// Returns the (l, b) of a pixel centre.
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let l = self.center_l + (col as f64 + 0.5 - self.cols as f64 / 2.0) * self.bin_size_deg;
        let b = self.center_b + (row as f64 + 0.5 - self.rows as f64 / 2.0) * self.bin_size_deg;
        (l, b)
    }

    /// Returns the pixel containing (l, b), if it lies on the map.
    ///
    /// Longitudes are compared modulo 360°, so `l = 359.5` falls on a map
    /// centred at `l = 0`.
    pub fn pixel_of(&self, l: f64, b: f64) -> Option<(usize, usize)> {
        let col = longitude_offset(l, self.center_l) / self.bin_size_deg + self.cols as f64 / 2.0;
        let row = (b - self.center_b) / self.bin_size_deg + self.rows as f64 / 2.0;
        if col < 0.0 || row < 0.0 {
            return None;
        }
        let (row, col) = (row.floor() as usize, col.floor() as usize);
        (row < self.rows && col < self.cols).then_some((row, col))
    }

    pub fn contains(&self, l: f64, b: f64) -> bool {
        self.pixel_of(l, b).is_some()
    }

    /// Largest radius (degrees) that fits inside the map around its centre.
    pub fn half_extent_deg(&self) -> f64 {
        self.rows.min(self.cols) as f64 * self.bin_size_deg / 2.0
    }

    /// Pixel solid angle in square degrees.
    pub fn pixel_area_deg2(&self) -> f64 {
        self.bin_size_deg * self.bin_size_deg
    }

    /// True when both grids have identical shape, scale and centre.
    pub fn same_grid(&self, other: &MapGeometry) -> bool {
        const EPS: f64 = 1e-9;
        self.rows == other.rows
            && self.cols == other.cols
            && (self.bin_size_deg - other.bin_size_deg).abs() < EPS
            && (self.center_l - other.center_l).abs() < EPS
            && (self.center_b - other.center_b).abs() < EPS
    }
}

/// A binned sky map: counts, exposure (cm² s) or diffuse intensity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkyMap {
    pub geometry: MapGeometry,
    pub band: EnergyBand,
    pub time: TimeRange,

    /// Pixel values, `rows x cols`
    pub data: DMatrix<f64>,
}

impl SkyMap {
    /// Creates an all-zero map on the given grid.
    pub fn zeros(geometry: MapGeometry, band: EnergyBand, time: TimeRange) -> Self {
        Self {
            data: DMatrix::zeros(geometry.rows, geometry.cols),
            geometry,
            band,
            time,
        }
    }

    /// Creates a map filled with a constant value.
    pub fn filled(geometry: MapGeometry, band: EnergyBand, time: TimeRange, value: f64) -> Self {
        Self {
            data: DMatrix::from_element(geometry.rows, geometry.cols, value),
            geometry,
            band,
            time,
        }
    }

    /// Sum of all pixel values.
    pub fn total(&self) -> f64 {
        self.data.sum()
    }

    /// True when `other` can be added pixel by pixel to `self`.
    pub fn compatible(&self, other: &SkyMap) -> bool {
        self.geometry.same_grid(&other.geometry) && self.data.shape() == other.data.shape()
    }

    /// Nearest-pixel resampling of `self` onto another grid.
    ///
    /// Target pixels whose centre falls outside `self` are zero.
    pub fn resample_onto(&self, target: &MapGeometry) -> SkyMap {
        if self.geometry.same_grid(target) {
            return self.clone();
        }
        let mut out = SkyMap::zeros(*target, self.band, self.time);
        for row in 0..target.rows {
            for col in 0..target.cols {
                let (l, b) = target.pixel_center(row, col);
                if let Some((r, c)) = self.geometry.pixel_of(l, b) {
                    out.data[(row, col)] = self.data[(r, c)];
                }
            }
        }
        out
    }
}

impl AddAssign<&SkyMap> for SkyMap {
    /// Pixel-wise sum. Both maps must share a grid.
    fn add_assign(&mut self, rhs: &SkyMap) {
        assert!(
            self.compatible(rhs),
            "cannot add sky maps on different grids"
        );
        self.data += &rhs.data;
        self.time = self.time.span(&rhs.time);
    }
}

/// Per-source constraint state during a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FixFlag {
    /// Flux and position free
    Free,

    /// Flux free, position held
    PartiallyFixed,

    /// Nothing fitted; the source contributes as known background
    AllFixed,
}

impl FixFlag {
    /// Decodes the integer flag of the source-list format.
    ///
    /// `0` is all fixed, `1` and `2` (flux-only / position-only) are
    /// partially fixed, anything with both bits set is free. The two partial
    /// codes are not distinguished, so `code()` writes either back as `1`.
    pub fn from_code(code: i32) -> Self {
        match code {
            c if c <= 0 => FixFlag::AllFixed,
            1 | 2 => FixFlag::PartiallyFixed,
            _ => FixFlag::Free,
        }
    }

    /// Source-list code of the flag. `PartiallyFixed` is always `1`.
    pub fn code(&self) -> i32 {
        match self {
            FixFlag::AllFixed => 0,
            FixFlag::PartiallyFixed => 1,
            FixFlag::Free => 3,
        }
    }

    pub fn fits_flux(&self) -> bool {
        !matches!(self, FixFlag::AllFixed)
    }

    pub fn fits_position(&self) -> bool {
        matches!(self, FixFlag::Free)
    }
}

/// Fit outcome attached to a source.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FitResult {
    /// Test statistic
    pub ts: f64,

    /// 1-sigma flux error (ph cm⁻² s⁻¹)
    pub flux_error: f64,

    /// Flux upper limit at the configured confidence level
    pub upper_limit: f64,

    /// Location contour radius at the configured confidence level (degrees)
    pub location_error: f64,
}

/// A point source: ground truth for simulation, seed and output of a fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub name: String,

    /// Galactic longitude (degrees)
    pub l: f64,

    /// Galactic latitude (degrees)
    pub b: f64,

    /// Photon spectral index (positive, dN/dE ∝ E^-index)
    pub index: f64,

    /// Integral flux above 100 MeV (ph cm⁻² s⁻¹)
    pub flux: f64,

    pub fix_flag: FixFlag,

    /// Minimum √TS for the source to stay free in a refinement pass
    pub min_sqrt_ts: f64,

    /// Maximum allowed position shift during a fit (degrees, 0 = none)
    pub location_limit: f64,

    #[serde(default)]
    pub fit: FitResult,
}

impl SourceDescriptor {
    pub fn new(name: &str, l: f64, b: f64, index: f64, flux: f64, fix_flag: FixFlag) -> Self {
        Self {
            name: name.to_string(),
            l,
            b,
            index,
            flux,
            fix_flag,
            min_sqrt_ts: 0.0,
            location_limit: 0.0,
            fit: FitResult::default(),
        }
    }

    pub fn ts(&self) -> f64 {
        self.fit.ts
    }
}

/// Paths of the three instrument response files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePaths {
    /// Point-spread (PSD) table
    pub psd: PathBuf,

    /// Effective-area (SAR) table
    pub sar: PathBuf,

    /// Energy-dispersion (EDP) table
    pub edp: PathBuf,
}

/// One (counts, exposure, diffuse) triple handed to the fit engine.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisMap {
    pub counts: SkyMap,
    pub exposure: SkyMap,
    pub diffuse: SkyMap,

    /// Diffuse-emission coefficient, if the map list provides one
    pub gal_coeff: Option<f64>,

    /// Isotropic-emission coefficient (units of 1e-5 ph cm⁻² s⁻¹ sr⁻¹)
    pub iso_coeff: Option<f64>,
}

/// Whether an emission coefficient is held or fitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CoefficientMode {
    #[default]
    Fixed,
    Free,
}

impl CoefficientMode {
    /// Decodes the integer mode of the legacy parameter files.
    pub fn from_code(code: i32) -> Self {
        if code == 0 {
            CoefficientMode::Fixed
        } else {
            CoefficientMode::Free
        }
    }
}

/// Diffuse and isotropic emission handling for a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EmissionModes {
    pub diffuse: CoefficientMode,
    pub isotropic: CoefficientMode,
}

/// Per-fit numeric parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitParams {
    /// Analysis radius around each source (degrees)
    pub radius_deg: f64,

    /// Upper-limit confidence level (0-1)
    pub upper_limit_cl: f64,

    /// Location contour confidence level (0-1)
    pub location_cl: f64,
}

impl Default for FitParams {
    fn default() -> Self {
        Self {
            radius_deg: 10.0,
            upper_limit_cl: 0.95,
            location_cl: 0.95,
        }
    }
}
