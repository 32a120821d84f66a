//! Pyramidal Lucas-Kanade tracking of planar templates.
//!
//! A tracker is seeded with a template image and the quadrilateral outlining
//! the target in it, then follows that target through later frames by
//! refining a [`PlanarTransformation`] coarse to fine.

pub mod arena;
pub mod array;
pub mod error;
pub mod geometry;
pub mod gradient;
pub mod grid;
pub mod histogram;
pub mod homography;
pub mod interp;
pub mod pose;
pub mod pyramid;
pub mod select;
pub mod serialize;
pub mod solve;
pub mod tracker;
pub mod transform;
pub mod verify;

pub use array::{Array2, ImageU8};
pub use error::{Result, TrackerError};
pub use geometry::{Corner, Point, Point3, Quadrilateral, Rectangle};
pub use tracker::config::{Planar6dofConfig, Planar6dofUpdateParams, SlowConfig, TrackerConfig, UpdateParams};
pub use tracker::dense::DenseTracker;
pub use tracker::planar6dof::Planar6dofTracker;
pub use tracker::sampled::SampledProjectiveTracker;
pub use tracker::slow::{SlowParams, SlowTracker};
pub use tracker::TrackResult;
pub use transform::{PlanarTransformation, TransformType};
pub use verify::VerifyResult;
