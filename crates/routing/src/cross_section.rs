//! Channel cross-section hydraulics
//!
//! Depth/discharge/volume conversions for generic rectangular, triangular
//! and trapezoidal cross-sections under Manning's steady-state flow, plus
//! the Newton-Raphson depth-from-discharge inversion used by the MCT
//! router.
//!
//! Reference:
//! Reggiani, P., Todini, E., & Meissner, D. (2016). On mass and momentum
//! conservation in the variable-parameter Muskingum method. Journal of
//! Hydrology, 543, 562-576.

use std::f64::consts::FRAC_PI_2;

/// Manning exponent (5/3)
const ALPHA: f64 = 5.0 / 3.0;

/// Convergence threshold for the depth correction [m]
const DEPTH_TOL: f64 = 1e-6;

/// Iteration budget for the Newton-Raphson depth search. Exceeding it is
/// not an error: the last iterate is returned.
const MAX_DEPTH_ITERS: usize = 1000;

/// Hydraulic quantities of a cross-section at a given water depth.
#[derive(Debug, Clone, Copy)]
pub struct FlowGeometry {
    /// Steady-state discharge [m3/s]
    pub discharge: f64,
    /// Wet area [m2]
    pub area: f64,
    /// Cross-section width at the water surface [m]
    pub surface_width: f64,
    /// Wet contour [m]
    pub wetted_perimeter: f64,
    /// Kinematic wave celerity [m/s]
    pub celerity: f64,
}

/// A channel cross-section: rectangular, triangular or trapezoidal.
///
/// The side angle is measured from the horizontal; `PI/2` (vertical
/// banks) selects the rectangular family, a zero bottom width the
/// triangular one. All conversions are pure and reentrant.
#[derive(Debug, Clone, Copy)]
pub struct CrossSection {
    /// Width of the riverbed [m]; 0 for a triangular section
    pub bottom_width: f64,
    /// Angle of the riverbed side [rad]; `PI/2` for a rectangular section
    pub side_angle: f64,
    /// Manning roughness coefficient [s/m^(1/3)]
    pub manning_n: f64,
    /// Riverbed slope (tan of the bed angle)
    pub bed_slope: f64,
}

/// Riverbed side angle [rad] from the dx/dy side slope of the bank.
///
/// A zero side slope (vertical banks) maps to `PI/2`, the rectangular
/// family.
pub fn side_angle_from_slope(dxdy: f64) -> f64 {
    if dxdy <= 0.0 {
        FRAC_PI_2
    } else {
        (1.0 / dxdy).atan()
    }
}

impl CrossSection {
    /// Cotangent and sine of the side angle; (0, 1) for the rectangular
    /// family so that the generic formulas below collapse to the
    /// rectangular ones.
    fn shape_factors(&self) -> (f64, f64) {
        if self.side_angle < FRAC_PI_2 {
            let (sin, cos) = self.side_angle.sin_cos();
            (cos / sin, sin)
        } else {
            (0.0, 1.0)
        }
    }

    /// Discharge and hydraulic geometry from water depth (Manning).
    ///
    /// `y` is the water depth above the riverbed bottom [m].
    pub fn discharge_from_depth(&self, y: f64) -> FlowGeometry {
        let (c, s) = self.shape_factors();
        let b = self.bottom_width;
        let rs0 = self.bed_slope.sqrt();

        let area = (b + y * c) * y;
        let surface_width = b + 2.0 * y * c;
        let wetted_perimeter = b + 2.0 * y / s;
        let discharge = rs0 / self.manning_n * area.powf(ALPHA) / wetted_perimeter.powf(ALPHA - 1.0);
        let celerity =
            (discharge / 3.0) * (5.0 / area - 4.0 / (wetted_perimeter * surface_width * s));

        FlowGeometry {
            discharge,
            area,
            surface_width,
            wetted_perimeter,
            celerity,
        }
    }

    /// Water depth from a steady-state discharge, by Newton-Raphson on
    /// `f(y) = Q(y) - q` with `f'(y) = surface_width(y) * celerity(y)`.
    ///
    /// The initial estimate is closed-form per cross-section family.
    /// Non-convergence within the iteration budget returns the last
    /// iterate; that imprecision is accepted by the routing scheme.
    /// `q` must be positive (callers substitute a small epsilon for zero).
    pub fn depth_from_discharge(&self, q: f64) -> f64 {
        let (c, s) = self.shape_factors();
        let b = self.bottom_width;
        let rs0 = self.bed_slope.sqrt();
        let n = self.manning_n;

        // First approximation from the steady-state rating of the
        // matching simple section
        let mut y = if b == 0.0 {
            // triangular
            (n * q / rs0).powf(3.0 / 8.0) * (2.0 / s).powf(0.25) / c.powf(5.0 / 8.0)
        } else {
            // rectangular, and seed for the trapezoidal refinement
            (n * q / (rs0 * b)).powf(1.0 / ALPHA)
        };
        if b != 0.0 && self.side_angle < FRAC_PI_2 {
            // trapezoidal
            y = (n * q / rs0).powf(1.0 / ALPHA) * (b + 2.0 * y / s).powf(0.4) / (b + c * y);
        }

        for _ in 0..MAX_DEPTH_ITERS {
            let g = self.discharge_from_depth(y);
            let fy = g.discharge - q;
            let dfy = g.surface_width * g.celerity;
            let dy = fy / dfy;
            y -= dy;
            if dy.abs() < DEPTH_TOL {
                break;
            }
        }
        y
    }

    /// Water depth from a stored volume over a reach of length `length`.
    pub fn depth_from_volume(&self, volume: f64, length: f64) -> f64 {
        let (c, _) = self.shape_factors();
        let b = self.bottom_width;
        let area = volume / length;
        if c.abs() < 1e-6 {
            // rectangular
            area / b
        } else {
            // triangular or trapezoidal: invert area = (b + y c) y
            (-b + (b * b + 4.0 * area * c).sqrt()) / (2.0 * c)
        }
    }

    /// Discharge from a stored volume over a reach of length `length`.
    pub fn discharge_from_volume(&self, volume: f64, length: f64) -> f64 {
        let y = self.depth_from_volume(volume, length);
        self.discharge_from_depth(y).discharge
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn trapezoidal() -> CrossSection {
        CrossSection {
            bottom_width: 5.0,
            side_angle: side_angle_from_slope(2.0),
            manning_n: 0.03,
            bed_slope: 0.001,
        }
    }

    fn rectangular() -> CrossSection {
        CrossSection {
            bottom_width: 5.0,
            side_angle: FRAC_PI_2,
            manning_n: 0.03,
            bed_slope: 0.001,
        }
    }

    fn triangular() -> CrossSection {
        CrossSection {
            bottom_width: 0.0,
            side_angle: side_angle_from_slope(2.0),
            manning_n: 0.03,
            bed_slope: 0.001,
        }
    }

    #[test]
    fn test_rectangular_rating() {
        // Hand-checked Manning rating for a rectangular section:
        // a = b*y, p = b + 2y
        let xs = rectangular();
        let y = 1.5;
        let g = xs.discharge_from_depth(y);
        let a: f64 = 5.0 * y;
        let p: f64 = 5.0 + 2.0 * y;
        let expected = 0.001_f64.sqrt() / 0.03 * a.powf(5.0 / 3.0) / p.powf(2.0 / 3.0);
        assert_relative_eq!(g.discharge, expected, max_relative = 1e-12);
        assert_abs_diff_eq!(g.surface_width, 5.0);
        assert_abs_diff_eq!(g.area, a);
        assert_abs_diff_eq!(g.wetted_perimeter, p);
    }

    #[test]
    fn test_round_trip_trapezoidal() {
        let xs = trapezoidal();
        for q in [0.5, 5.0, 50.0, 500.0] {
            let y = xs.depth_from_discharge(q);
            assert!(y > 0.0);
            let back = xs.discharge_from_depth(y).discharge;
            assert_relative_eq!(back, q, max_relative = 1e-4);
        }
    }

    #[test]
    fn test_round_trip_rectangular_and_triangular() {
        for xs in [rectangular(), triangular()] {
            for q in [1.0, 25.0, 250.0] {
                let y = xs.depth_from_discharge(q);
                let back = xs.discharge_from_depth(y).discharge;
                assert_relative_eq!(back, q, max_relative = 1e-4);
            }
        }
    }

    #[test]
    fn test_celerity_exceeds_mean_velocity() {
        // Kinematic celerity is faster than the mean flow velocity for
        // these section families
        let xs = trapezoidal();
        let g = xs.discharge_from_depth(2.0);
        let velocity = g.discharge / g.area;
        assert!(g.celerity > velocity);
    }

    #[test]
    fn test_depth_from_volume() {
        let length = 1000.0;

        // Rectangular: v = b * y * length
        let xs = rectangular();
        let y = xs.depth_from_volume(5.0 * 2.0 * length, length);
        assert_relative_eq!(y, 2.0, max_relative = 1e-12);

        // Trapezoidal: a = (b + y c) y
        let xs = trapezoidal();
        let c = 2.0;
        let depth = 1.7;
        let area = (5.0 + depth * c) * depth;
        let y = xs.depth_from_volume(area * length, length);
        assert_relative_eq!(y, depth, max_relative = 1e-9);
    }

    #[test]
    fn test_discharge_from_volume_matches_rating() {
        let xs = trapezoidal();
        let length = 1000.0;
        let y = 1.2;
        let area = (5.0 + y * 2.0) * y;
        let q = xs.discharge_from_volume(area * length, length);
        assert_relative_eq!(q, xs.discharge_from_depth(y).discharge, max_relative = 1e-9);
    }

    #[test]
    fn test_depth_monotonic_in_discharge() {
        let xs = trapezoidal();
        let mut prev = 0.0;
        for q in [0.1, 1.0, 10.0, 100.0] {
            let y = xs.depth_from_discharge(q);
            assert!(y > prev, "depth must grow with discharge");
            prev = y;
        }
    }
}
