//! Per-image features, pair correspondences, and the external capability
//! seams for detection and matching.
//!
//! The descriptor algorithm itself lives outside this crate: keypoints and
//! descriptors are plain data produced by a [`FeatureExtractor`], and raw
//! correspondences come from a [`DescriptorMatcher`]. Everything downstream
//! (epipolar pruning, pair bookkeeping, reconstruction) only relies on the
//! shapes defined here.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::camera::ImageData;

/// A detected image keypoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Pyramid level the keypoint was detected at.
    pub octave: i32,
}

/// Opaque descriptor row; width is fixed by the extractor.
pub type Descriptor = Vec<u8>;

/// Keypoints, descriptors and color samples for one image.
///
/// Computed once per image and cached. The three vectors are parallel;
/// `colors` may be empty when the extractor does not sample the source
/// image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Features {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
    /// RGB sample under each keypoint.
    pub colors: Vec<[u8; 3]>,
}

impl Features {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    /// Color sample for a keypoint, mid-gray when none was recorded.
    pub fn color(&self, idx: usize) -> [u8; 3] {
        self.colors.get(idx).copied().unwrap_or([128, 128, 128])
    }
}

/// A candidate image pair. Always stored with `first < second` so the pair
/// is a canonical identity for caching, indexing and graph edges.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ImagePair {
    pub first: usize,
    pub second: usize,
}

impl ImagePair {
    /// Build the canonical pair for two distinct image ids.
    pub fn new(a: usize, b: usize) -> Self {
        debug_assert_ne!(a, b);
        if a < b {
            Self { first: a, second: b }
        } else {
            Self { first: b, second: a }
        }
    }
}

impl std::fmt::Display for ImagePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.first, self.second)
    }
}

/// One correspondence between a pair's images: keypoint `query_idx` in the
/// first image matches keypoint `train_idx` in the second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub query_idx: usize,
    pub train_idx: usize,
    pub distance: f32,
}

/// The surviving correspondences of one image pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Matches {
    pub pair: ImagePair,
    pub matches: Vec<Match>,
}

/// Detects keypoints and computes descriptors for one image.
///
/// Implementations own image decoding; the engine never touches pixels.
pub trait FeatureExtractor: Send {
    fn extract(&self, image: &ImageData) -> Result<Features>;
}

/// Produces raw correspondences between two feature sets.
///
/// Geometric plausibility is not this trait's concern; the engine prunes
/// the result against the pair's epipolar geometry afterwards.
pub trait DescriptorMatcher: Send {
    fn match_features(&self, query: &Features, train: &Features) -> Vec<Match>;
}
