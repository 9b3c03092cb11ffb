//! Sparse map data structures.
//!
//! The map is a flat set of 3D points, each backed by observations in two
//! or more images:
//! - [`MapPoint`] observes which images support it (`observations`)
//! - [`Map3D`] owns the points and answers the fusion query (nearest
//!   committed point within a merge radius)
//!
//! Consumers never touch these types directly during a live run; they read
//! [`ColoredPoint`] copies through the shared map handle.

pub mod map3d;
pub mod point;
pub mod types;

pub use map3d::{ColoredPoint, Map3D, ViewObservations};
pub use point::MapPoint;
pub use types::PointId;
