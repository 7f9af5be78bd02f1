//! Geometric substrate over paragraph embeddings.
//!
//! Stage C builds the k-NN/mutual/strong graph, its weakly connected
//! components and size-capped regions; stage D inverts the mutual-edge
//! similarity distribution into basins and a signal-strength verdict.

pub mod basin;
pub mod substrate;
pub mod types;

pub use basin::invert_basins;
pub use substrate::{SimilarityMatrix, SubstrateBuilder};
pub use types::{
    BasinInversion, BasinStatus, EdgeClass, Region, RegionKind, RegionProfile, Substrate,
    SubstrateEdge, SubstrateNode,
};
