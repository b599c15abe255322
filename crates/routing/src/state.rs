//! Routing state and warm-start persistence
//!
//! The per-pixel mutable quantities evolved every routing sub-step, plus
//! the serializable end-of-run snapshot that lets a later run resume
//! bit-for-bit. In any initial-condition field the sentinel value
//! [`INIT_SENTINEL`] means "no value supplied": the engine substitutes
//! the derived cold-start default (half-bankfull storage, zero overbank
//! volume, unit Courant number, zero Reynolds number).

use serde::{Deserialize, Serialize};

/// "No initial value supplied" marker in initial-condition fields
pub const INIT_SENTINEL: f64 = -9999.0;

/// Replace sentinel entries by a per-pixel derived default.
pub fn resolve_initial(values: &[f64], mut default: impl FnMut(usize) -> f64) -> Vec<f64> {
    values
        .iter()
        .enumerate()
        .map(|(pix, &v)| if v == INIT_SENTINEL { default(pix) } else { v })
        .collect()
}

/// Mutable per-pixel routing state, compressed to channel pixels.
///
/// `discharge`/`storage` are the combined channel quantities exposed to
/// external collaborators; the remaining fields are the per-method
/// working state.
#[derive(Debug, Clone)]
pub struct RoutingState {
    /// Combined channel outflow at the end of the last sub-step [m3/s]
    pub discharge: Vec<f64>,
    /// Combined channel storage at the end of the last sub-step [m3]
    pub storage: Vec<f64>,
    /// Main-channel (kinematic line) outflow [m3/s]
    pub kin_discharge: Vec<f64>,
    /// Main-channel (kinematic line) storage [m3]
    pub kin_storage: Vec<f64>,
    /// Flow velocity diagnostic [m/s]
    pub velocity: Vec<f64>,
    /// Travel distance diagnostic over one model timestep [m]
    pub travel_distance: Vec<f64>,
    /// Split-routing state, present when the floodplain line is active
    pub split: Option<SplitState>,
    /// MCT state, present when MCT routing is active
    pub mct: Option<MctState>,
}

/// State of the floodplain (second) line of split routing.
#[derive(Debug, Clone)]
pub struct SplitState {
    /// Virtual total outflow of the floodplain line [m3/s]
    pub flood_discharge: Vec<f64>,
    /// Virtual total storage of the floodplain line [m3]
    pub flood_storage: Vec<f64>,
    /// Overbank cross-section area above bankfull [m2]
    pub overbank_area: Vec<f64>,
    /// Sideflow routed to the main channel in the last sub-step
    /// [m3/s per m of channel]
    pub main_sideflow: Vec<f64>,
}

/// MCT working state.
#[derive(Debug, Clone)]
pub struct MctState {
    /// Inflow at the start of the last sub-step, I(t) [m3/s]
    pub prev_inflow: Vec<f64>,
    /// Corrected Courant number at the start of the last sub-step
    pub courant: Vec<f64>,
    /// Corrected cell Reynolds number at the start of the last sub-step
    pub reynolds: Vec<f64>,
}

/// Serializable end-of-run state, keyed by compressed pixel index.
///
/// Field names follow the warm-start contract: reloading a snapshot as
/// initial conditions resumes the run bit-for-bit. Optional fields are
/// present only when the corresponding routing mode was active.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateSnapshot {
    /// Total cross-section area [m2] (combined storage / channel length)
    pub cross_section_area: Vec<f64>,
    /// Combined channel outflow [m3/s]
    pub discharge: Vec<f64>,
    /// Overbank cross-section area [m2] (split routing)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overbank_area: Option<Vec<f64>>,
    /// Main-channel sideflow of the last sub-step (split routing)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_sideflow: Option<Vec<f64>>,
    /// MCT inflow at time t [m3/s]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mct_inflow: Option<Vec<f64>>,
    /// MCT outflow at time t [m3/s]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mct_outflow: Option<Vec<f64>>,
    /// MCT Courant number at time t
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub courant: Option<Vec<f64>>,
    /// MCT cell Reynolds number at time t
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reynolds: Option<Vec<f64>>,
}

/// Initial conditions for engine start-up. Every field may carry
/// [`INIT_SENTINEL`] entries (or be absent) to request the cold-start
/// default for that pixel.
#[derive(Debug, Clone, Default)]
pub struct InitialConditions {
    pub cross_section_area: Option<Vec<f64>>,
    pub discharge: Option<Vec<f64>>,
    pub overbank_area: Option<Vec<f64>>,
    pub main_sideflow: Option<Vec<f64>>,
    pub mct_inflow: Option<Vec<f64>>,
    pub mct_outflow: Option<Vec<f64>>,
    pub courant: Option<Vec<f64>>,
    pub reynolds: Option<Vec<f64>>,
}

impl InitialConditions {
    /// Cold start: every field takes its derived default
    pub fn cold_start() -> Self {
        Self::default()
    }
}

impl From<StateSnapshot> for InitialConditions {
    fn from(snapshot: StateSnapshot) -> Self {
        Self {
            cross_section_area: Some(snapshot.cross_section_area),
            discharge: Some(snapshot.discharge),
            overbank_area: snapshot.overbank_area,
            main_sideflow: snapshot.main_sideflow,
            mct_inflow: snapshot.mct_inflow,
            mct_outflow: snapshot.mct_outflow,
            courant: snapshot.courant,
            reynolds: snapshot.reynolds,
        }
    }
}
