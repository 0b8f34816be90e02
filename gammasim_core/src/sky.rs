//! Sky geometry, PSF and spectral helpers shared by simulation and fitting.

use gammasim_env::{EnergyBand, MapGeometry, SkyMap};
use nalgebra::DMatrix;
use std::f64::consts::PI;

/// Reference energy of catalog fluxes (MeV): fluxes are integral above it.
pub const FLUX_REFERENCE_MEV: f64 = 100.0;

/// Unit of the isotropic coefficient (ph cm⁻² s⁻¹ per pixel).
pub const ISOTROPIC_UNIT: f64 = 1e-5;

/// PSF templates are truncated beyond this many sigmas.
const PSF_TRUNCATION_SIGMAS: f64 = 5.0;

/// Great-circle distance between two (l, b) positions in degrees.
pub fn angular_distance_deg(l1: f64, b1: f64, l2: f64, b2: f64) -> f64 {
    let (b1, b2) = (b1.to_radians(), b2.to_radians());
    let dl = (l2 - l1).to_radians();
    let db = b2 - b1;
    let a = (db / 2.0).sin().powi(2) + b1.cos() * b2.cos() * (dl / 2.0).sin().powi(2);
    (2.0 * a.sqrt().min(1.0).asin()).to_degrees()
}

/// Fraction of the integral flux above 100 MeV that falls inside `band`,
/// for a power law `dN/dE ∝ E^-index`.
///
/// Indices ≤ 1 are not normalizable above the reference energy; the
/// whole flux is assigned to the band.
pub fn band_fraction(index: f64, band: &EnergyBand) -> f64 {
    let slope = 1.0 - index;
    if slope >= -1e-9 {
        return 1.0;
    }
    let lo = (band.emin / FLUX_REFERENCE_MEV).powf(slope);
    let hi = (band.emax / FLUX_REFERENCE_MEV).powf(slope);
    (lo - hi).max(0.0)
}

/// Fraction of a Gaussian PSF of width `sigma_deg` falling in one pixel
/// at distance `distance_deg` from the source.
pub fn psf_weight(distance_deg: f64, sigma_deg: f64, pixel_area_deg2: f64) -> f64 {
    let s2 = sigma_deg * sigma_deg;
    (-distance_deg * distance_deg / (2.0 * s2)).exp() / (2.0 * PI * s2) * pixel_area_deg2
}

/// PSF template of a unit-flux source on a grid.
///
/// Pixels further than five sigmas are zero.
pub fn psf_template(geometry: &MapGeometry, l: f64, b: f64, sigma_deg: f64) -> DMatrix<f64> {
    let area = geometry.pixel_area_deg2();
    let cutoff = PSF_TRUNCATION_SIGMAS * sigma_deg;
    DMatrix::from_fn(geometry.rows, geometry.cols, |row, col| {
        let (pl, pb) = geometry.pixel_center(row, col);
        let d = angular_distance_deg(pl, pb, l, b);
        if d > cutoff {
            0.0
        } else {
            psf_weight(d, sigma_deg, area)
        }
    })
}

/// Expected background counts of a map.
///
/// `(gal · diffuse + iso · 1e-5) · exposure`, pixel by pixel. A missing
/// diffuse map contributes nothing.
pub fn background_counts(exposure: &SkyMap, diffuse: Option<&SkyMap>, gal: f64, iso: f64) -> DMatrix<f64> {
    let mut intensity = DMatrix::from_element(exposure.geometry.rows, exposure.geometry.cols, iso * ISOTROPIC_UNIT);
    if let Some(diffuse) = diffuse {
        let aligned = diffuse.resample_onto(&exposure.geometry);
        intensity += aligned.data * gal;
    }
    intensity.component_mul(&exposure.data)
}
