pub mod placement;

pub use placement::{
    ExtensionTag, PlacementConfig, PlacementPlan, PlacementSummary,
    DEFAULT_START_CELL,
};
