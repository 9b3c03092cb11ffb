//! Incremental sparse 3D mapping from pose-tagged image sequences.
//!
//! Turns timestamped images with approximate pose priors into a sparse 3D
//! point map plus per-image camera associations, incrementally:
//!
//! 1. Candidate pairs from a temporal look-back window ([`pairs`])
//! 2. Cache-checked feature extraction and matching with epipolar pruning
//!    ([`cache`], [`engine`])
//! 3. Connected-component grouping of surviving pairs ([`components`])
//! 4. Seed triangulation and greedy next-view expansion with map fusion
//!    and outlier rejection ([`engine`], [`map`])
//! 5. Versioned, thread-safe publication of the growing map ([`publish`])
//!
//! Poses are known a priori and only structure is solved. Image decoding,
//! the descriptor algorithm and any nonlinear refinement are external
//! capabilities plugged in through the [`features::FeatureExtractor`],
//! [`features::DescriptorMatcher`] and [`optimize::MapOptimizer`] traits.

pub mod cache;
pub mod camera;
pub mod components;
pub mod engine;
pub mod features;
pub mod geometry;
pub mod map;
pub mod optimize;
pub mod pairs;
pub mod publish;

pub use engine::{spawn_reconstruction, Checkpoint, SfmConfig, SfmEngine};
pub use publish::{ProcStatus, SharedMap};
