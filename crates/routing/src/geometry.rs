//! Derived channel geometry
//!
//! Compresses the channel geometry maps onto the network's pixel indexing
//! and derives the quantities the routers need: the kinematic wave alpha
//! coefficient (Manning steady-state flow referenced at half bankfull
//! depth, Ven Te Chow, Applied Hydrology, sec. 9.6), bankfull cross-section
//! geometry and the per-pixel cross-sections for the MCT depth solver.

use fluvia_core::{Error, Raster, Result};

use crate::cross_section::{side_angle_from_slope, CrossSection};
use crate::network::{ChannelNetwork, RoutingMethod};

/// Scalar parameters of the geometry derivation.
#[derive(Debug, Clone, Copy)]
pub struct GeometryParams {
    /// Manning exponent of the storage-discharge relation `A = alpha * Q^beta`.
    /// Fixed at 3/5 by Manning's equation.
    pub beta: f64,
    /// Lower bound applied to the bed slope; a zero gradient would make
    /// alpha undefined.
    pub min_slope: f64,
    /// Upper bound applied to the bed slope of MCT pixels.
    pub mct_slope_cap: f64,
}

impl Default for GeometryParams {
    fn default() -> Self {
        Self {
            beta: 0.6,
            min_slope: 1e-4,
            mct_slope_cap: 1e-3,
        }
    }
}

/// Channel geometry input maps, one value per raster cell.
#[derive(Debug, Clone, Copy)]
pub struct GeometryMaps<'a> {
    /// Channel length within the cell [m]
    pub length: &'a Raster<f64>,
    /// Channel bed gradient (tan of the bed angle)
    pub gradient: &'a Raster<f64>,
    /// Manning roughness coefficient [s/m^(1/3)]
    pub manning: &'a Raster<f64>,
    /// Calibration multiplier on the Manning coefficient (peak timing)
    pub manning_calibration: &'a Raster<f64>,
    /// Channel bottom width [m]
    pub bottom_width: &'a Raster<f64>,
    /// Bankfull water depth [m]
    pub bankfull_depth: &'a Raster<f64>,
    /// dx/dy slope of the riverbed side (0 = vertical banks)
    pub side_slope: &'a Raster<f64>,
    /// Cell area [m2], for velocity/sinuosity diagnostics
    pub pixel_area: &'a Raster<f64>,
}

/// Compressed, derived channel geometry. Immutable after construction.
#[derive(Debug, Clone)]
pub struct ChannelGeometry {
    /// Storage-discharge exponent
    pub beta: f64,
    /// 1 / beta
    pub inv_beta: f64,
    /// Channel length [m]
    pub length: Vec<f64>,
    /// 1 / length [1/m]
    pub inv_length: Vec<f64>,
    /// Bed gradient, floored at `min_slope` and capped on MCT pixels
    pub gradient: Vec<f64>,
    /// Calibrated Manning coefficient
    pub manning: Vec<f64>,
    /// Calibration multiplier the Manning coefficient was scaled by
    pub manning_calibration: Vec<f64>,
    /// Channel bottom width [m]
    pub bottom_width: Vec<f64>,
    /// dx/dy side slope of the banks
    pub side_slope: Vec<f64>,
    /// Side angle [rad]
    pub side_angle: Vec<f64>,
    /// Bankfull depth [m]
    pub bankfull_depth: Vec<f64>,
    /// Channel width at bankfull depth [m]
    pub upper_width: Vec<f64>,
    /// Cross-section area at bankfull [m2] (trapezoid area)
    pub bankfull_area: Vec<f64>,
    /// Kinematic wave alpha for the main channel
    pub alpha: Vec<f64>,
    /// 1 / alpha
    pub inv_alpha: Vec<f64>,
    /// Cell area [m2]
    pub pixel_area: Vec<f64>,
    /// Wetted perimeter at the half-bankfull reference depth [m]
    wetted_perimeter_ref: Vec<f64>,
}

impl ChannelGeometry {
    /// Compress the geometry maps and derive alpha, bankfull geometry and
    /// cross-sections. `methods` selects the pixels whose bed slope is
    /// capped at `params.mct_slope_cap`.
    pub fn new(
        network: &ChannelNetwork,
        maps: GeometryMaps<'_>,
        methods: &[RoutingMethod],
        params: &GeometryParams,
    ) -> Result<Self> {
        let n = network.num_pixels();
        if methods.len() != n {
            return Err(Error::FieldLength {
                expected: n,
                actual: methods.len(),
            });
        }

        let length = network.compress(maps.length)?;
        let raw_gradient = network.compress(maps.gradient)?;
        let manning_map = network.compress(maps.manning)?;
        let manning_calibration = network.compress(maps.manning_calibration)?;
        let bottom_width = network.compress(maps.bottom_width)?;
        let bankfull_depth = network.compress(maps.bankfull_depth)?;
        let side_slope = network.compress(maps.side_slope)?;
        let pixel_area = network.compress(maps.pixel_area)?;

        validate_positive("length", &length)?;
        validate_positive("manning", &manning_map)?;
        validate_positive("manning_calibration", &manning_calibration)?;
        validate_non_negative("bottom_width", &bottom_width)?;
        validate_non_negative("bankfull_depth", &bankfull_depth)?;
        validate_non_negative("side_slope", &side_slope)?;
        validate_positive("pixel_area", &pixel_area)?;
        if params.beta <= 0.0 || params.min_slope <= 0.0 {
            return Err(Error::InvalidParameter {
                name: "beta/min_slope",
                value: format!("{}/{}", params.beta, params.min_slope),
                reason: "must be positive".into(),
            });
        }

        // Bed slope: floored globally, capped on MCT pixels where the
        // variable-parameter scheme becomes unstable on steep reaches
        let gradient: Vec<f64> = raw_gradient
            .iter()
            .zip(methods)
            .map(|(&g, &m)| {
                let g = g.max(params.min_slope);
                match m {
                    RoutingMethod::Mct => g.min(params.mct_slope_cap),
                    RoutingMethod::Kinematic => g,
                }
            })
            .collect();

        let manning: Vec<f64> = manning_map
            .iter()
            .zip(&manning_calibration)
            .map(|(&n0, &cal)| n0 * cal)
            .collect();

        let side_angle: Vec<f64> = side_slope.iter().map(|&s| side_angle_from_slope(s)).collect();

        let upper_width: Vec<f64> = bottom_width
            .iter()
            .zip(&side_slope)
            .zip(&bankfull_depth)
            .map(|((&b, &s), &d)| b + 2.0 * s * d)
            .collect();

        // Trapezoid area at bankfull
        let bankfull_area: Vec<f64> = bankfull_depth
            .iter()
            .zip(&upper_width)
            .zip(&bottom_width)
            .map(|((&d, &uw), &b)| 0.5 * d * (uw + b))
            .collect();

        // Wetted perimeter at the alpha reference depth (half bankfull,
        // Pythagoras on the bank sides)
        let wetted_perimeter_ref: Vec<f64> = bottom_width
            .iter()
            .zip(&bankfull_depth)
            .zip(&side_slope)
            .map(|((&b, &d), &s)| {
                let y = 0.5 * d;
                b + 2.0 * (y * y + (y * s) * (y * s)).sqrt()
            })
            .collect();
        validate_positive("wetted perimeter at half bankfull", &wetted_perimeter_ref)?;

        let alpha = alpha_from(&manning, &gradient, &wetted_perimeter_ref, params.beta);
        let inv_alpha: Vec<f64> = alpha.iter().map(|&a| 1.0 / a).collect();
        let inv_length: Vec<f64> = length.iter().map(|&l| 1.0 / l).collect();

        Ok(Self {
            beta: params.beta,
            inv_beta: 1.0 / params.beta,
            length,
            inv_length,
            gradient,
            manning,
            manning_calibration,
            bottom_width,
            side_slope,
            side_angle,
            bankfull_depth,
            upper_width,
            bankfull_area,
            alpha,
            inv_alpha,
            pixel_area,
            wetted_perimeter_ref,
        })
    }

    /// Number of channel pixels
    pub fn num_pixels(&self) -> usize {
        self.length.len()
    }

    /// Cross-section of `pixel` for the depth solver
    pub fn cross_section(&self, pixel: usize) -> CrossSection {
        CrossSection {
            bottom_width: self.bottom_width[pixel],
            side_angle: self.side_angle[pixel],
            manning_n: self.manning[pixel],
            bed_slope: self.gradient[pixel],
        }
    }

    /// Cross-section area at half bankfull [m2], the cold-start default
    pub fn half_bankfull_area(&self, pixel: usize) -> f64 {
        0.5 * self.bankfull_area[pixel]
    }

    /// Kinematic alpha for an alternative Manning calibration, used for
    /// the floodplain line of split routing:
    /// `manning2 = manning / calibration * calibration2`.
    pub fn alpha_for_calibration(&self, calibration2: &[f64]) -> Result<Vec<f64>> {
        if calibration2.len() != self.num_pixels() {
            return Err(Error::FieldLength {
                expected: self.num_pixels(),
                actual: calibration2.len(),
            });
        }
        let manning2: Vec<f64> = self
            .manning
            .iter()
            .zip(&self.manning_calibration)
            .zip(calibration2)
            .map(|((&n, &cal), &cal2)| n / cal * cal2)
            .collect();
        validate_positive("manning_calibration2", &manning2)?;
        Ok(alpha_from(
            &manning2,
            &self.gradient,
            &self.wetted_perimeter_ref,
            self.beta,
        ))
    }
}

/// `alpha = (n / sqrt(s0))^beta * P^(2 beta / 3)` per pixel
fn alpha_from(manning: &[f64], gradient: &[f64], perimeter: &[f64], beta: f64) -> Vec<f64> {
    let alp_pow = 2.0 / 3.0 * beta;
    manning
        .iter()
        .zip(gradient)
        .zip(perimeter)
        .map(|((&n, &s0), &p)| (n / s0.sqrt()).powf(beta) * p.powf(alp_pow))
        .collect()
}

fn validate_positive(name: &'static str, values: &[f64]) -> Result<()> {
    for (pix, &v) in values.iter().enumerate() {
        if !(v > 0.0) || !v.is_finite() {
            return Err(Error::InvalidParameter {
                name,
                value: format!("{v}"),
                reason: format!("must be positive and finite at channel pixel {pix}"),
            });
        }
    }
    Ok(())
}

fn validate_non_negative(name: &'static str, values: &[f64]) -> Result<()> {
    for (pix, &v) in values.iter().enumerate() {
        if !(v >= 0.0) || !v.is_finite() {
            return Err(Error::InvalidParameter {
                name,
                value: format!("{v}"),
                reason: format!("must be non-negative and finite at channel pixel {pix}"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn strip_network() -> ChannelNetwork {
        let flow_dir = Raster::from_vec(vec![1, 1, 0u8], 1, 3).unwrap();
        let channels = Raster::filled(1, 3, 1u8);
        ChannelNetwork::from_flow_direction(&flow_dir, &channels).unwrap()
    }

    fn uniform_maps(rows: usize, cols: usize) -> Vec<Raster<f64>> {
        vec![
            Raster::filled(rows, cols, 1000.0), // length
            Raster::filled(rows, cols, 0.001),  // gradient
            Raster::filled(rows, cols, 0.03),   // manning
            Raster::filled(rows, cols, 1.0),    // calibration
            Raster::filled(rows, cols, 5.0),    // bottom width
            Raster::filled(rows, cols, 2.0),    // bankfull depth
            Raster::filled(rows, cols, 2.0),    // side slope
            Raster::filled(rows, cols, 25.0e6), // pixel area
        ]
    }

    fn geometry_maps(maps: &[Raster<f64>]) -> GeometryMaps<'_> {
        GeometryMaps {
            length: &maps[0],
            gradient: &maps[1],
            manning: &maps[2],
            manning_calibration: &maps[3],
            bottom_width: &maps[4],
            bankfull_depth: &maps[5],
            side_slope: &maps[6],
            pixel_area: &maps[7],
        }
    }

    #[test]
    fn test_alpha_hand_check() {
        let net = strip_network();
        let maps = uniform_maps(1, 3);
        let methods = vec![RoutingMethod::Kinematic; 3];
        let geom =
            ChannelGeometry::new(&net, geometry_maps(&maps), &methods, &GeometryParams::default())
                .unwrap();

        // Reference depth 1.0 (half of bankfull 2.0):
        // P = 5 + 2*sqrt(1 + 4) = 9.472...
        let p: f64 = 5.0 + 2.0 * 5.0_f64.sqrt();
        let alp_term = (0.03 / 0.001_f64.sqrt()).powf(0.6);
        let expected = alp_term * p.powf(0.4);
        assert_relative_eq!(geom.alpha[1], expected, max_relative = 1e-12);

        // Bankfull geometry: upper width 5 + 2*2*2 = 13, area 0.5*2*(13+5) = 18
        assert_relative_eq!(geom.upper_width[0], 13.0, max_relative = 1e-12);
        assert_relative_eq!(geom.bankfull_area[0], 18.0, max_relative = 1e-12);
        assert_relative_eq!(geom.half_bankfull_area(0), 9.0, max_relative = 1e-12);
    }

    #[test]
    fn test_slope_floor_and_mct_cap() {
        let net = strip_network();
        let mut maps = uniform_maps(1, 3);
        maps[1] = Raster::from_vec(vec![0.0, 0.01, 0.01], 1, 3).unwrap();
        let methods = vec![
            RoutingMethod::Kinematic,
            RoutingMethod::Kinematic,
            RoutingMethod::Mct,
        ];
        let geom =
            ChannelGeometry::new(&net, geometry_maps(&maps), &methods, &GeometryParams::default())
                .unwrap();

        assert_eq!(geom.gradient[0], 1e-4, "zero slope must be floored");
        assert_eq!(geom.gradient[1], 0.01, "kinematic slope stays");
        assert_eq!(geom.gradient[2], 1e-3, "MCT slope is capped");
    }

    #[test]
    fn test_floodplain_alpha_is_larger() {
        // A higher floodplain Manning calibration must slow the virtual
        // channel down, i.e. produce a larger alpha
        let net = strip_network();
        let maps = uniform_maps(1, 3);
        let methods = vec![RoutingMethod::Kinematic; 3];
        let geom =
            ChannelGeometry::new(&net, geometry_maps(&maps), &methods, &GeometryParams::default())
                .unwrap();

        let alpha2 = geom.alpha_for_calibration(&vec![5.0; 3]).unwrap();
        for pix in 0..3 {
            assert!(alpha2[pix] > geom.alpha[pix]);
        }
    }

    #[test]
    fn test_invalid_manning_rejected() {
        let net = strip_network();
        let mut maps = uniform_maps(1, 3);
        maps[2] = Raster::filled(1, 3, 0.0);
        let methods = vec![RoutingMethod::Kinematic; 3];
        assert!(matches!(
            ChannelGeometry::new(&net, geometry_maps(&maps), &methods, &GeometryParams::default()),
            Err(Error::InvalidParameter { .. })
        ));
    }
}
