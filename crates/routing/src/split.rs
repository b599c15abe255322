//! Split routing coordinator
//!
//! Above a bankfull discharge threshold, routes the excess flow through a
//! second virtual channel with an increased Manning coefficient,
//! representing floodplain attenuation without changing the network
//! topology. Both lines run the kinematic wave router, each with its own
//! alpha; the results are recombined by superposition against the
//! bankfull threshold discharge.

use fluvia_core::{Error, Result};

use crate::geometry::ChannelGeometry;
use crate::kinematic::KinematicRouter;
use crate::network::ChannelNetwork;
use crate::schedule::RoutingOrder;
use crate::state::SplitState;

/// Sideflow magnitudes below this go wholly to the main channel; the
/// proportional split of near-zero sideflow is numerical noise.
const SIDEFLOW_EPS: f64 = 1e-7;

/// Split-routing parameters and the floodplain-line router.
#[derive(Debug, Clone)]
pub struct SplitRouting {
    /// Bankfull threshold discharge [m3/s]: over-bankfull flow starts
    /// here (a multiple of the long-term average discharge)
    q_limit: Vec<f64>,
    /// Main-channel storage at the bankfull threshold [m3]
    m3_limit: Vec<f64>,
    /// Virtual floodplain-line storage at the activation of the second
    /// line [m3]
    flood_storage_start: Vec<f64>,
    /// Virtual floodplain-line outflow at activation [m3/s]; kinematic
    /// routing of a near-empty line travels unrealistically slowly, so
    /// the second line starts from this discharge rather than zero
    flood_discharge_start: Vec<f64>,
    /// Kinematic router of the floodplain line (increased roughness)
    flood_router: KinematicRouter,
    inv_length: Vec<f64>,
}

impl SplitRouting {
    /// Derive the split-routing thresholds and the floodplain router.
    ///
    /// `avg_discharge` is the long-term average discharge map (from a
    /// pre-run), `multiplier` the calibration factor on it, and
    /// `calibration2` the floodplain Manning calibration map.
    pub fn new(
        network: &ChannelNetwork,
        geometry: &ChannelGeometry,
        order: RoutingOrder,
        avg_discharge: &[f64],
        multiplier: f64,
        calibration2: &[f64],
        dt: f64,
    ) -> Result<Self> {
        let n = network.num_pixels();
        if avg_discharge.len() != n {
            return Err(Error::FieldLength {
                expected: n,
                actual: avg_discharge.len(),
            });
        }

        let alpha2 = geometry.alpha_for_calibration(calibration2)?;

        let q_limit: Vec<f64> = avg_discharge.iter().map(|&q| q * multiplier).collect();

        // Storage equivalents of the threshold discharge under each line's
        // rating (Manning's equation)
        let m3_limit: Vec<f64> = (0..n)
            .map(|p| geometry.alpha[p] * geometry.length[p] * q_limit[p].powf(geometry.beta))
            .collect();
        let flood_storage_start: Vec<f64> = (0..n)
            .map(|p| alpha2[p] * geometry.length[p] * q_limit[p].powf(geometry.beta))
            .collect();

        // Net threshold outflow of each pixel: its own threshold minus
        // what arrives from upstream at threshold
        let upstream_limit = network.upstream_sum(&q_limit);
        let flood_discharge_start: Vec<f64> = q_limit
            .iter()
            .zip(&upstream_limit)
            .map(|(&q, &up)| q - up)
            .collect();

        let flood_router =
            KinematicRouter::new(order, alpha2, &geometry.length, geometry.beta, dt)?;

        Ok(Self {
            q_limit,
            m3_limit,
            flood_storage_start,
            flood_discharge_start,
            flood_router,
            inv_length: geometry.inv_length.clone(),
        })
    }

    /// Bankfull threshold discharge [m3/s]
    pub fn q_limit(&self) -> &[f64] {
        &self.q_limit
    }

    /// Floodplain-line storage at activation [m3]
    pub fn flood_storage_start(&self) -> &[f64] {
        &self.flood_storage_start
    }

    /// Floodplain-line state for a fresh or warm start.
    ///
    /// `overbank_area` is the persisted above-bankfull cross-section area
    /// (zeros on cold start); `main_sideflow` the persisted last
    /// main-channel sideflow.
    pub fn initial_flood_state(
        &self,
        geometry: &ChannelGeometry,
        overbank_area: Vec<f64>,
        main_sideflow: Vec<f64>,
    ) -> SplitState {
        let n = self.q_limit.len();
        let flood_storage: Vec<f64> = (0..n)
            .map(|p| overbank_area[p] * geometry.length[p] + self.flood_storage_start[p])
            .collect();
        let flood_discharge: Vec<f64> = (0..n)
            .map(|p| self.flood_router.discharge_from_storage(p, flood_storage[p]))
            .collect();
        SplitState {
            flood_discharge,
            flood_storage,
            overbank_area,
            main_sideflow,
        }
    }

    /// Run both routing lines for one sub-step and recombine.
    ///
    /// `sideflow` is the total lateral inflow [m3/s per m]; the partition
    /// between the lines is proportional to each line's storage fraction
    /// once the combined storage exceeds the bankfull threshold volume.
    /// Outputs: the main line updates `kin_discharge`/`kin_storage`, the
    /// floodplain line updates `flood`, and the recombined channel totals
    /// go to `discharge`/`storage`.
    #[allow(clippy::too_many_arguments)]
    pub fn step(
        &self,
        network: &ChannelNetwork,
        main_router: &KinematicRouter,
        kin_discharge: &mut [f64],
        kin_storage: &mut [f64],
        flood: &mut SplitState,
        discharge: &mut [f64],
        storage: &mut [f64],
        sideflow: &[f64],
    ) {
        let n = self.q_limit.len();

        // Partition the sideflow between the two lines. The activation
        // test uses the combined storage above the floodplain reference,
        // not the main line alone, which can dip below the threshold
        // between sub-steps and destabilize the split.
        let mut flood_sideflow = vec![0.0; n];
        for p in 0..n {
            let combined = kin_storage[p] + flood.flood_storage[p];
            let ratio = if combined > 0.0 {
                kin_storage[p] / combined
            } else {
                0.0
            };
            let active = combined - self.flood_storage_start[p] > self.m3_limit[p];
            let mut main_side = if active { ratio * sideflow[p] } else { sideflow[p] };
            if sideflow[p].abs() < SIDEFLOW_EPS {
                main_side = sideflow[p];
            }
            flood.main_sideflow[p] = main_side;
            // The floodplain line additionally carries its constant
            // activation discharge
            flood_sideflow[p] =
                sideflow[p] - main_side + self.flood_discharge_start[p] * self.inv_length[p];
        }

        // Main channel (riverbed roughness)
        main_router.route(network, kin_discharge, &flood.main_sideflow);
        main_router.commit_storage(kin_discharge, kin_storage);

        // Floodplain line (increased roughness); its storage never drops
        // below the activation reference volume
        self.flood_router
            .route(network, &mut flood.flood_discharge, &flood_sideflow);
        for p in 0..n {
            let v2 = self
                .flood_router
                .storage_from_discharge(p, flood.flood_discharge[p])
                .max(self.flood_storage_start[p]);
            flood.flood_storage[p] = v2;
            flood.overbank_area[p] = (v2 - self.flood_storage_start[p]) * self.inv_length[p];
            flood.flood_discharge[p] = self.flood_router.discharge_from_storage(p, v2);
        }

        // Superposition of the two lines against the threshold
        for p in 0..n {
            discharge[p] =
                (kin_discharge[p] + flood.flood_discharge[p] - self.q_limit[p]).max(0.0);
            storage[p] = kin_storage[p] + flood.flood_storage[p] - self.flood_storage_start[p];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{GeometryMaps, GeometryParams};
    use crate::network::RoutingMethod;
    use fluvia_core::Raster;

    fn setup() -> (ChannelNetwork, ChannelGeometry, KinematicRouter, SplitRouting) {
        let n = 3;
        let flow_dir = Raster::from_vec(vec![1, 1, 0u8], 1, n).unwrap();
        let channels = Raster::filled(1, n, 1u8);
        let network = ChannelNetwork::from_flow_direction(&flow_dir, &channels).unwrap();

        let length = Raster::filled(1, n, 1000.0);
        let gradient = Raster::filled(1, n, 0.001);
        let manning = Raster::filled(1, n, 0.03);
        let calibration = Raster::filled(1, n, 1.0);
        let bottom_width = Raster::filled(1, n, 5.0);
        let bankfull_depth = Raster::filled(1, n, 2.0);
        let side_slope = Raster::filled(1, n, 2.0);
        let pixel_area = Raster::filled(1, n, 25.0e6);
        let maps = GeometryMaps {
            length: &length,
            gradient: &gradient,
            manning: &manning,
            manning_calibration: &calibration,
            bottom_width: &bottom_width,
            bankfull_depth: &bankfull_depth,
            side_slope: &side_slope,
            pixel_area: &pixel_area,
        };
        let methods = vec![RoutingMethod::Kinematic; n];
        let geometry =
            ChannelGeometry::new(&network, maps, &methods, &GeometryParams::default()).unwrap();

        let dt = 3600.0;
        let main_router = KinematicRouter::new(
            network.order().clone(),
            geometry.alpha.clone(),
            &geometry.length,
            geometry.beta,
            dt,
        )
        .unwrap();
        let split = SplitRouting::new(
            &network,
            &geometry,
            network.order().clone(),
            &[10.0, 20.0, 30.0],
            2.0,
            &[5.0; 3],
            dt,
        )
        .unwrap();
        (network, geometry, main_router, split)
    }

    #[test]
    fn test_thresholds() {
        let (_, geometry, _, split) = setup();
        assert_eq!(split.q_limit(), &[20.0, 40.0, 60.0]);
        // Floodplain line is slower, so its threshold volume is larger
        for p in 0..3 {
            assert!(split.flood_storage_start()[p] > split.m3_limit[p]);
        }
        // Net threshold outflow: own limit minus upstream limit
        assert_eq!(split.flood_discharge_start[0], 20.0);
        assert_eq!(split.flood_discharge_start[1], 40.0 - 20.0);
        assert_eq!(split.flood_discharge_start[2], 60.0 - 40.0);
        let _ = geometry;
    }

    #[test]
    fn test_recombination_bounds() {
        let (network, geometry, main_router, split) = setup();
        let n = 3;

        let mut kin_discharge = vec![30.0, 50.0, 70.0];
        let mut kin_storage: Vec<f64> = (0..n)
            .map(|p| main_router.storage_from_discharge(p, kin_discharge[p]))
            .collect();
        let mut flood =
            split.initial_flood_state(&geometry, vec![4.0, 4.0, 4.0], vec![0.0; n]);
        let mut discharge = vec![0.0; n];
        let mut storage = vec![0.0; n];
        let sideflow = vec![0.02; n]; // strong lateral inflow per m

        for _ in 0..4 {
            split.step(
                &network,
                &main_router,
                &mut kin_discharge,
                &mut kin_storage,
                &mut flood,
                &mut discharge,
                &mut storage,
                &sideflow,
            );
            for p in 0..n {
                assert!(discharge[p] >= 0.0);
                assert!(
                    discharge[p] + split.q_limit()[p] >= kin_discharge[p],
                    "recombined discharge must cover the main line"
                );
                assert!(flood.flood_storage[p] >= split.flood_storage_start()[p]);
                assert!(flood.overbank_area[p] >= 0.0);
                assert!(storage[p] >= 0.0);
            }
        }
    }

    #[test]
    fn test_tiny_sideflow_goes_to_main_channel() {
        let (network, geometry, main_router, split) = setup();
        let n = 3;

        let mut kin_discharge = vec![100.0; n]; // far above bankfull
        let mut kin_storage: Vec<f64> = (0..n)
            .map(|p| main_router.storage_from_discharge(p, kin_discharge[p]))
            .collect();
        let mut flood =
            split.initial_flood_state(&geometry, vec![50.0; n], vec![0.0; n]);
        let mut discharge = vec![0.0; n];
        let mut storage = vec![0.0; n];
        let sideflow = vec![5e-8; n]; // below the split epsilon

        split.step(
            &network,
            &main_router,
            &mut kin_discharge,
            &mut kin_storage,
            &mut flood,
            &mut discharge,
            &mut storage,
            &sideflow,
        );
        for p in 0..n {
            assert_eq!(flood.main_sideflow[p], 5e-8);
        }
    }

    #[test]
    fn test_cold_flood_state_starts_at_threshold() {
        let (_, geometry, _, split) = setup();
        let flood = split.initial_flood_state(&geometry, vec![0.0; 3], vec![0.0; 3]);
        for p in 0..3 {
            assert_eq!(flood.flood_storage[p], split.flood_storage_start()[p]);
            // At the activation volume the virtual line discharges the
            // threshold flow
            approx::assert_relative_eq!(
                flood.flood_discharge[p],
                split.q_limit()[p],
                max_relative = 1e-9
            );
        }
    }
}
