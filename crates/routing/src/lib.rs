//! # Fluvia Routing
//!
//! River channel routing on raster drainage networks.
//!
//! Water moves along a local-drain-direction field from upstream pixels
//! to a single downstream pixel until reaching the catchment outlets.
//! The crate provides:
//!
//! - **network**: drainage topology from a D8 flow-direction raster,
//!   with downstream/upstream lookups and catchment labels
//! - **schedule**: topological batch partition; pixels within a batch
//!   are independent and routed in parallel
//! - **kinematic**: the 4-point implicit kinematic wave router
//! - **mct**: variable-parameter Muskingum-Cunge-Todini routing with the
//!   Newton-Raphson depth-from-discharge solver (**cross_section**)
//! - **split**: main-channel/floodplain split routing above bankfull
//! - **engine**: routing-mode resolution and the sub-step driver
//! - **state**: routing state, cold/warm start and persistence
//! - **mass_balance**: advisory per-catchment closure accounting

pub mod cross_section;
pub mod engine;
pub mod geometry;
pub mod kinematic;
pub mod mass_balance;
pub mod mct;
pub mod network;
pub mod schedule;
pub mod split;
pub mod state;

pub(crate) mod maybe_rayon;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::cross_section::{side_angle_from_slope, CrossSection, FlowGeometry};
    pub use crate::engine::{RoutingConfig, RoutingEngine, RoutingMode, Sideflow, SplitParams};
    pub use crate::geometry::{ChannelGeometry, GeometryMaps, GeometryParams};
    pub use crate::kinematic::KinematicRouter;
    pub use crate::mass_balance::{CatchmentBalance, MassBalance};
    pub use crate::mct::MctRouter;
    pub use crate::network::{ChannelNetwork, RoutingMethod};
    pub use crate::schedule::RoutingOrder;
    pub use crate::state::{InitialConditions, RoutingState, StateSnapshot, INIT_SENTINEL};
    pub use fluvia_core::prelude::*;
}
