//! The incremental reconstruction engine.
//!
//! Drives the full pipeline over ingested images:
//! 1. Candidate pair generation from the temporal look-back window
//! 2. Cache-checked feature extraction and descriptor matching
//! 3. Epipolar pruning of correspondences against the pose priors
//! 4. Component grouping and dominant-set selection
//! 5. Seed triangulation, then greedy maximal-connectivity expansion with
//!    fusion and outlier filtering, publishing a versioned snapshot after
//!    every committed view
//!
//! Camera poses are externally supplied priors used as-is; only structure
//! is solved. Data-quality failures (weak pairs, unreachable views,
//! degenerate triangulations) drop the offending unit and continue; the
//! only fatal errors are data-invariant violations such as intrinsics
//! missing for a referenced channel.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{ensure, Context, Result};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::CacheStorage;
use crate::camera::{CameraInfo, CameraIntrinsics, CameraView, ImageData};
use crate::components::PairComponents;
use crate::features::{
    DescriptorMatcher, FeatureExtractor, Features, ImagePair, Keypoint, Match, Matches,
};
use crate::geometry::{
    epipolar_line_distance, fundamental_matrix, reprojection_error, triangulate_dlt,
};
use crate::optimize::{MapOptimizer, NoopOptimizer};
use crate::pairs::generate_pairs;
use crate::publish::{ProcStatus, SharedMap};

mod checkpoint;

pub use checkpoint::{Checkpoint, CHECKPOINT_FORMAT};

/// Reconstruction thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SfmConfig {
    /// Maximum pixel reprojection error for a committed observation.
    pub repr_error_thresh: f64,
    /// Triangulations closer than this to a committed point merge into it.
    pub max_merge_dist: f64,
}

impl Default for SfmConfig {
    fn default() -> Self {
        Self {
            repr_error_thresh: 1.0,
            max_merge_dist: 1.0,
        }
    }
}

/// The matching thresholds of the last `match_image_features` call. Part of
/// the cache key, so re-runs with different thresholds never alias entries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchParams {
    pub skip_thresh: usize,
    pub max_line_dist: f64,
    pub use_cache: bool,
}

/// A triangulated point before fusion and commit.
struct PointCandidate {
    position: Vector3<f64>,
    color: [f32; 3],
    observations: [(usize, usize); 2],
}

/// The reconstruction state machine.
///
/// One engine owns all pipeline state; consumers hold the [`SharedMap`]
/// handle returned by [`SfmEngine::shared_map`] and read versioned
/// snapshots while the engine runs on a worker thread.
pub struct SfmEngine {
    config: SfmConfig,
    intrinsics: Vec<CameraIntrinsics>,
    images: Vec<ImageData>,
    views: Vec<CameraView>,
    features: Vec<Features>,
    pairs: Vec<ImagePair>,
    image_matches: Vec<Matches>,
    matches_index: HashMap<ImagePair, usize>,
    components: PairComponents,
    todo_views: BTreeSet<usize>,
    used_views: BTreeSet<usize>,
    match_params: Option<MatchParams>,
    shared: Arc<SharedMap>,
    cache: Option<CacheStorage>,
    extractor: Box<dyn FeatureExtractor>,
    matcher: Box<dyn DescriptorMatcher>,
    optimizer: Box<dyn MapOptimizer>,
}

impl SfmEngine {
    pub fn new(
        intrinsics: Vec<CameraIntrinsics>,
        extractor: Box<dyn FeatureExtractor>,
        matcher: Box<dyn DescriptorMatcher>,
    ) -> Self {
        Self {
            config: SfmConfig::default(),
            intrinsics,
            images: Vec::new(),
            views: Vec::new(),
            features: Vec::new(),
            pairs: Vec::new(),
            image_matches: Vec::new(),
            matches_index: HashMap::new(),
            components: PairComponents::new(),
            todo_views: BTreeSet::new(),
            used_views: BTreeSet::new(),
            match_params: None,
            shared: SharedMap::new(),
            cache: None,
            extractor,
            matcher,
            optimizer: Box::new(NoopOptimizer),
        }
    }

    pub fn with_config(mut self, config: SfmConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach an artifact cache for features and matches.
    pub fn with_cache(mut self, cache: CacheStorage) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Replace the inert refinement stage.
    pub fn with_optimizer(mut self, optimizer: Box<dyn MapOptimizer>) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn config(&self) -> &SfmConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────
    // Ingestion and pipeline stages
    // ─────────────────────────────────────────────────────────────────────

    /// Ingest a batch of images and derive their camera views from the pose
    /// priors. Fails if any image references a channel without intrinsics.
    ///
    /// With `make_pairs`, candidate pairs are regenerated over all ingested
    /// images using the `look_back` window.
    pub fn add_images(
        &mut self,
        images: Vec<ImageData>,
        make_pairs: bool,
        look_back: usize,
    ) -> Result<()> {
        ensure!(!images.is_empty(), "no images to ingest");
        for image in &images {
            ensure!(
                image.channel < self.intrinsics.len(),
                "no intrinsics for channel {} referenced by {}",
                image.channel,
                image.filename
            );
        }

        for image in images {
            self.views.push(CameraView {
                channel: image.channel,
                pose: image.pose(),
            });
            self.images.push(image);
        }

        if make_pairs {
            self.pairs = generate_pairs(&self.images, look_back);
        }

        info!(
            images = self.images.len(),
            pairs = self.pairs.len(),
            "ingested images"
        );
        Ok(())
    }

    /// Compute (or load cached) features for every ingested image.
    ///
    /// Extraction failures drop the image's features and continue; such an
    /// image simply never survives matching.
    pub fn extract_features(&mut self) -> Result<()> {
        ensure!(!self.images.is_empty(), "no images ingested");

        self.features.clear();
        for (image_id, image) in self.images.iter().enumerate() {
            let key = features_key(image);
            let cached = self.cache.as_ref().and_then(|c| c.get::<Features>(&key));
            let features = match cached {
                Some(features) => features,
                None => match self.extractor.extract(image) {
                    Ok(features) => {
                        if let Some(cache) = &self.cache {
                            cache.put(&key, &features);
                        }
                        features
                    }
                    Err(err) => {
                        warn!(
                            image_id,
                            filename = %image.filename,
                            err = %err,
                            "feature extraction failed, image will not match"
                        );
                        Features::default()
                    }
                },
            };
            debug!(image_id, keypoints = features.len(), "features ready");
            self.features.push(features);
        }
        Ok(())
    }

    /// Match every candidate pair, prune against epipolar geometry and drop
    /// weak pairs.
    ///
    /// Correspondences whose symmetric epipolar-line distance exceeds
    /// `max_line_dist` are discarded; pairs with fewer than `skip_thresh`
    /// survivors are dropped entirely. Surviving pairs register edges in
    /// the component grouping. Cached results make a re-run idempotent.
    pub fn match_image_features(
        &mut self,
        skip_thresh: usize,
        max_line_dist: f64,
        use_cache: bool,
    ) -> Result<()> {
        ensure!(
            self.features.len() == self.images.len(),
            "features not extracted"
        );
        ensure!(!self.pairs.is_empty(), "no candidate pairs generated");

        let params = MatchParams {
            skip_thresh,
            max_line_dist,
            use_cache,
        };
        self.match_params = Some(params);
        self.image_matches.clear();
        self.matches_index.clear();
        self.components = PairComponents::new();

        let mut dropped = 0usize;
        for index in 0..self.pairs.len() {
            let pair = self.pairs[index];
            let key = self.matches_key(pair, &params);

            let cached = if use_cache {
                self.cache.as_ref().and_then(|c| c.get::<Matches>(&key))
            } else {
                None
            };
            let was_cached = cached.is_some();

            let surviving = match cached {
                Some(matches) => matches,
                None => {
                    let raw = self.matcher.match_features(
                        &self.features[pair.first],
                        &self.features[pair.second],
                    );
                    self.prune_epipolar(pair, raw, max_line_dist)
                }
            };

            if use_cache && !was_cached {
                if let Some(cache) = &self.cache {
                    cache.put(&key, &surviving);
                }
            }

            if surviving.matches.len() < skip_thresh {
                debug!(
                    pair = %pair,
                    survivors = surviving.matches.len(),
                    "pair below skip threshold, dropped"
                );
                dropped += 1;
                continue;
            }

            let slot = self.image_matches.len();
            self.matches_index.insert(pair, slot);
            self.image_matches.push(surviving);
            self.components.union(pair.first, pair.second);
        }

        info!(
            surviving = self.image_matches.len(),
            dropped,
            "matched candidate pairs"
        );
        Ok(())
    }

    /// Discard correspondences that violate the pair's epipolar geometry.
    fn prune_epipolar(&self, pair: ImagePair, raw: Vec<Match>, max_line_dist: f64) -> Matches {
        let view1 = &self.views[pair.first];
        let view2 = &self.views[pair.second];
        let k1 = &self.intrinsics[view1.channel];
        let k2 = &self.intrinsics[view2.channel];
        let feats1 = &self.features[pair.first];
        let feats2 = &self.features[pair.second];

        let f = fundamental_matrix(&view1.pose, k1, &view2.pose, k2);

        let matches = raw
            .into_iter()
            .filter(|m| {
                let (Some(kp1), Some(kp2)) = (
                    feats1.keypoints.get(m.query_idx),
                    feats2.keypoints.get(m.train_idx),
                ) else {
                    return false;
                };
                let p1 = (kp1.x as f64, kp1.y as f64);
                let p2 = (kp2.x as f64, kp2.y as f64);
                epipolar_line_distance(&f, p1, p2) <= max_line_dist
            })
            .collect();

        Matches { pair, matches }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reconstruction
    // ─────────────────────────────────────────────────────────────────────

    /// Select the seed pair and triangulate it.
    ///
    /// The seed is the surviving pair with the most matches inside the
    /// dominant component; ties keep the first in generation order. Its two
    /// images become the used set, the rest of the dominant component the
    /// todo set, and the map restarts from the seed triangulation.
    pub fn init_reconstruction(&mut self) -> Result<()> {
        ensure!(!self.images.is_empty(), "no images ingested");
        ensure!(
            !self.image_matches.is_empty(),
            "no surviving matches, run match_image_features first"
        );

        let dominant = self.components.dominant();
        let excluded = self.images.len() - dominant.len();
        if excluded > 0 {
            info!(
                excluded,
                dominant = dominant.len(),
                "images outside the dominant component are excluded"
            );
        }

        let mut best: Option<(ImagePair, usize)> = None;
        for matches in &self.image_matches {
            if !dominant.contains(&matches.pair.first) || !dominant.contains(&matches.pair.second)
            {
                continue;
            }
            let count = matches.matches.len();
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((matches.pair, count));
            }
        }
        let (seed, seed_matches) =
            best.context("no matched pair inside the dominant component")?;
        info!(pair = %seed, matches = seed_matches, "seed pair selected");

        self.used_views = BTreeSet::from([seed.first, seed.second]);
        self.todo_views = dominant
            .into_iter()
            .filter(|view| !self.used_views.contains(view))
            .collect();

        let candidates = self.triangulate_pair(seed);
        let (inserted, merged) = self.commit_candidates(candidates, true);
        info!(points = inserted, merged, "seed triangulation committed");
        Ok(())
    }

    /// Run the incremental loop to completion or cancellation.
    ///
    /// Cancellation (`set_proc_status(Finish)` from any thread) is honored
    /// at the per-view boundary; an in-flight view always commits first.
    pub fn reconstruct_all(&mut self) -> Result<()> {
        ensure!(
            !self.used_views.is_empty(),
            "reconstruction is not initialised"
        );

        while !self.todo_views.is_empty() {
            if self.shared.is_finished() {
                info!(
                    remaining = self.todo_views.len(),
                    "cancellation requested, stopping at view boundary"
                );
                break;
            }

            let Some((next, support)) = self.select_next_view() else {
                info!(
                    remaining = self.todo_views.len(),
                    "no remaining view shares matches with the reconstruction"
                );
                break;
            };

            debug!(view = next, support, "expanding to next view");
            self.reconstruct_next_view(next);
            self.todo_views.remove(&next);
            self.used_views.insert(next);
        }

        if !self.shared.is_finished() {
            self.optimize_map()?;
        }
        self.shared.set_status(ProcStatus::Finish);
        self.final_stats();
        Ok(())
    }

    /// The todo view with the greatest total surviving-match support
    /// against the used set. Views are scanned in ascending id and only a
    /// strictly greater support displaces the current best, so ties keep
    /// the smallest id. `None` when no todo view has any support.
    fn select_next_view(&self) -> Option<(usize, usize)> {
        let mut best: Option<(usize, usize)> = None;
        for &view in &self.todo_views {
            let support = self.match_support(view);
            if support > 0 && best.map_or(true, |(_, s)| support > s) {
                best = Some((view, support));
            }
        }
        best
    }

    /// Total surviving matches between `view` and the used set.
    fn match_support(&self, view: usize) -> usize {
        self.used_views
            .iter()
            .filter_map(|&used| self.matches_index.get(&ImagePair::new(view, used)))
            .map(|&slot| self.image_matches[slot].matches.len())
            .sum()
    }

    /// Triangulate `next` against every used view it shares matches with
    /// and commit the result as one published step.
    fn reconstruct_next_view(&self, next: usize) {
        let mut candidates = Vec::new();
        for &used in &self.used_views {
            let pair = ImagePair::new(next, used);
            if self.matches_index.contains_key(&pair) {
                candidates.extend(self.triangulate_pair(pair));
            }
        }

        let (inserted, merged) = self.commit_candidates(candidates, false);
        debug!(
            view = next,
            inserted,
            merged,
            map_size = self.shared.map_size(),
            "view committed"
        );
    }

    /// Triangulate one pair's matches into point candidates.
    ///
    /// Degenerate solves and candidates whose reprojection error exceeds
    /// the threshold in either view are dropped here and never retried.
    fn triangulate_pair(&self, pair: ImagePair) -> Vec<PointCandidate> {
        let Some(&slot) = self.matches_index.get(&pair) else {
            return Vec::new();
        };
        let matches = &self.image_matches[slot];

        let view1 = &self.views[pair.first];
        let view2 = &self.views[pair.second];
        let k1 = &self.intrinsics[view1.channel];
        let k2 = &self.intrinsics[view2.channel];
        let feats1 = &self.features[pair.first];
        let feats2 = &self.features[pair.second];

        let mut candidates = Vec::new();
        let mut degenerate = 0usize;
        let mut rejected = 0usize;

        for m in &matches.matches {
            let (Some(kp1), Some(kp2)) = (
                feats1.keypoints.get(m.query_idx),
                feats2.keypoints.get(m.train_idx),
            ) else {
                continue;
            };
            let p1 = (kp1.x as f64, kp1.y as f64);
            let p2 = (kp2.x as f64, kp2.y as f64);

            let xn1 = k1.normalize(p1.0, p1.1);
            let xn2 = k2.normalize(p2.0, p2.1);
            let Some(position) = triangulate_dlt(&xn1, &xn2, &view1.pose, &view2.pose) else {
                degenerate += 1;
                continue;
            };

            let err1 = reprojection_error(&position, &view1.pose, k1, p1);
            let err2 = reprojection_error(&position, &view2.pose, k2, p2);
            match (err1, err2) {
                (Some(e1), Some(e2)) if e1.max(e2) <= self.config.repr_error_thresh => {
                    let c1 = feats1.color(m.query_idx);
                    let c2 = feats2.color(m.train_idx);
                    let color = [
                        (c1[0] as f32 + c2[0] as f32) / 2.0,
                        (c1[1] as f32 + c2[1] as f32) / 2.0,
                        (c1[2] as f32 + c2[2] as f32) / 2.0,
                    ];
                    candidates.push(PointCandidate {
                        position,
                        color,
                        observations: [(pair.first, m.query_idx), (pair.second, m.train_idx)],
                    });
                }
                _ => rejected += 1,
            }
        }

        if degenerate + rejected > 0 {
            debug!(
                pair = %pair,
                kept = candidates.len(),
                degenerate,
                rejected,
                "correspondences dropped during triangulation"
            );
        }
        candidates
    }

    /// Commit candidates as one published mutation: fuse each into a
    /// nearby committed point when one exists, insert otherwise. Returns
    /// (inserted, merged).
    fn commit_candidates(&self, candidates: Vec<PointCandidate>, reset: bool) -> (usize, usize) {
        let max_merge_dist = self.config.max_merge_dist;
        self.shared.publish(move |map| {
            if reset {
                map.clear();
            }
            let mut inserted = 0usize;
            let mut merged = 0usize;
            for candidate in candidates {
                match map.nearest_within(&candidate.position, max_merge_dist) {
                    Some(id) => {
                        if let Some(point) = map.get_mut(id) {
                            point.absorb(candidate.observations, candidate.color);
                        }
                        merged += 1;
                    }
                    None => {
                        map.insert(candidate.position, candidate.color, candidate.observations);
                        inserted += 1;
                    }
                }
            }
            (inserted, merged)
        })
    }

    /// Run the pluggable refinement stage over the current map.
    pub fn optimize_map(&self) -> Result<()> {
        self.shared.publish(|map| {
            self.optimizer
                .optimize(map, &self.views, &self.intrinsics, &self.features)
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Introspection and lifecycle
    // ─────────────────────────────────────────────────────────────────────

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn map_size(&self) -> usize {
        self.shared.map_size()
    }

    pub fn image(&self, image_id: usize) -> Option<&ImageData> {
        self.images.get(image_id)
    }

    pub fn keypoint(&self, image_id: usize, keypoint_idx: usize) -> Option<Keypoint> {
        self.features
            .get(image_id)
            .and_then(|f| f.keypoints.get(keypoint_idx))
            .copied()
    }

    pub fn camera_info(&self, image_id: usize) -> Option<CameraInfo> {
        let view = self.views.get(image_id)?;
        Some(CameraInfo {
            channel: view.channel,
            pose: view.pose.clone(),
            intrinsics: self.intrinsics[view.channel],
        })
    }

    pub fn features(&self, image_id: usize) -> Option<&Features> {
        self.features.get(image_id)
    }

    pub fn pairs(&self) -> &[ImagePair] {
        &self.pairs
    }

    pub fn matches(&self, pair: ImagePair) -> Option<&Matches> {
        self.matches_index
            .get(&pair)
            .map(|&slot| &self.image_matches[slot])
    }

    pub fn todo_views(&self) -> &BTreeSet<usize> {
        &self.todo_views
    }

    pub fn used_views(&self) -> &BTreeSet<usize> {
        &self.used_views
    }

    /// The handle consumers use to read versioned snapshots.
    pub fn shared_map(&self) -> Arc<SharedMap> {
        Arc::clone(&self.shared)
    }

    pub fn set_proc_status(&self, status: ProcStatus) {
        self.shared.set_status(status);
    }

    pub fn is_finished(&self) -> bool {
        self.shared.is_finished()
    }

    /// Bump the snapshot version and wake waiting consumers.
    pub fn emit_map_update(&self) {
        self.shared.emit_update();
    }

    /// Log a one-line summary of the run.
    pub fn final_stats(&self) {
        info!(
            images = self.images.len(),
            pairs = self.pairs.len(),
            matched_pairs = self.image_matches.len(),
            used_views = self.used_views.len(),
            todo_views = self.todo_views.len(),
            map_points = self.map_size(),
            version = self.shared.version(),
            "reconstruction summary"
        );
    }

    fn matches_key(&self, pair: ImagePair, params: &MatchParams) -> String {
        let a = &self.images[pair.first];
        let b = &self.images[pair.second];
        format!(
            "matches-{}-{}-{}-{}-{}-{}-s{}-d{}",
            a.record,
            a.channel,
            a.filename,
            b.record,
            b.channel,
            b.filename,
            params.skip_thresh,
            params.max_line_dist
        )
    }
}

impl std::fmt::Display for SfmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SfmEngine: {} images, {} candidate pairs, {} matched, {} map points ({} used, {} todo)",
            self.images.len(),
            self.pairs.len(),
            self.image_matches.len(),
            self.map_size(),
            self.used_views.len(),
            self.todo_views.len()
        )
    }
}

fn features_key(image: &ImageData) -> String {
    format!(
        "features-{}-{}-{}",
        image.record, image.channel, image.filename
    )
}

/// Move the engine onto a worker thread and run the reconstruction.
///
/// Returns the shared map handle for consumers and the worker's join
/// handle, which yields the engine back for inspection or checkpointing.
/// The status always reaches `Finish`, even when the worker fails early,
/// so blocked consumers wake up.
pub fn spawn_reconstruction(
    mut engine: SfmEngine,
) -> (Arc<SharedMap>, JoinHandle<Result<SfmEngine>>) {
    let shared = engine.shared_map();
    let handle = std::thread::spawn(move || {
        let result = engine
            .init_reconstruction()
            .and_then(|_| engine.reconstruct_all());
        if result.is_err() {
            engine.shared.set_status(ProcStatus::Finish);
        }
        result.map(|_| engine)
    });
    (shared, handle)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    fn built_engine(num_views: usize, num_points: usize) -> SfmEngine {
        let points = world_points(num_points);
        let (images, extractor) = synthetic_views(num_views, &points);
        let mut engine = SfmEngine::new(
            vec![test_intrinsics()],
            Box::new(extractor),
            Box::new(EqualityMatcher),
        )
        .with_config(SfmConfig {
            repr_error_thresh: 0.5,
            max_merge_dist: 0.1,
        });
        engine.add_images(images, true, 3).unwrap();
        engine
    }

    #[test]
    fn test_add_images_requires_intrinsics() {
        let (images, extractor) = synthetic_views(2, &world_points(4));
        let mut engine =
            SfmEngine::new(Vec::new(), Box::new(extractor), Box::new(EqualityMatcher));

        assert!(engine.add_images(images, true, 3).is_err());
        assert_eq!(engine.image_count(), 0);
    }

    #[test]
    fn test_full_pipeline_reconstructs_every_point() {
        let num_points = 20;
        let mut engine = built_engine(4, num_points);

        engine.extract_features().unwrap();
        engine.match_image_features(5, 2.0, false).unwrap();
        engine.init_reconstruction().unwrap();
        engine.reconstruct_all().unwrap();

        assert!(engine.is_finished());
        assert!(engine.todo_views().is_empty());
        assert_eq!(engine.used_views().len(), 4);
        assert_eq!(engine.map_size(), num_points);

        // Every point ends up observed by all four views.
        let shared = engine.shared_map();
        shared.with_map(|map| {
            for point in map.points() {
                assert_eq!(point.num_observations(), 4);
            }
        });
    }

    #[test]
    fn test_version_strictly_increases_per_view() {
        let mut engine = built_engine(5, 15);
        engine.extract_features().unwrap();
        engine.match_image_features(5, 2.0, false).unwrap();
        engine.init_reconstruction().unwrap();

        let shared = engine.shared_map();
        let after_init = shared.version();
        assert!(after_init > 0);

        engine.reconstruct_all().unwrap();
        // Three expansion steps plus the refinement pass.
        assert_eq!(shared.version(), after_init + 3 + 1);
    }

    #[test]
    fn test_high_reprojection_error_never_committed() {
        let num_points = 10;
        let points = world_points(num_points);
        let (images, mut extractor) = synthetic_views(3, &points);

        // Push one observation in the last view far off its true
        // projection. The loose line threshold lets it through matching,
        // the reprojection gate must reject it.
        extractor
            .by_filename
            .get_mut("002.jpg")
            .unwrap()
            .keypoints[0]
            .y += 30.0;

        let mut engine = SfmEngine::new(
            vec![test_intrinsics()],
            Box::new(extractor),
            Box::new(EqualityMatcher),
        )
        .with_config(SfmConfig {
            repr_error_thresh: 0.5,
            max_merge_dist: 0.1,
        });
        engine.add_images(images, true, 3).unwrap();
        engine.extract_features().unwrap();
        engine.match_image_features(5, 100.0, false).unwrap();
        engine.init_reconstruction().unwrap();
        engine.reconstruct_all().unwrap();

        assert_eq!(engine.map_size(), num_points);
        let shared = engine.shared_map();
        shared.with_map(|map| {
            let near_first = map
                .nearest_within(&points[0], 0.1)
                .expect("clean views still triangulate the point");
            // View 2's corrupted observation was filtered, the others
            // survive.
            let point = map.get(near_first).unwrap();
            assert_eq!(point.num_observations(), 2);
            assert!(!point.observations.contains_key(&2));
        });
    }

    #[test]
    fn test_select_next_view_tie_breaks_to_lowest_id() {
        let points = world_points(4);
        let (images, extractor) = synthetic_views(3, &points);
        let mut engine = SfmEngine::new(
            vec![test_intrinsics()],
            Box::new(extractor),
            Box::new(EqualityMatcher),
        );
        engine.add_images(images, true, 2).unwrap();

        // Hand-built match state: views 1 and 2 have equal support against
        // the used view 0.
        let m1 = Matches {
            pair: ImagePair::new(0, 1),
            matches: vec![
                Match { query_idx: 0, train_idx: 0, distance: 0.0 },
                Match { query_idx: 1, train_idx: 1, distance: 0.0 },
            ],
        };
        let m2 = Matches {
            pair: ImagePair::new(0, 2),
            matches: vec![
                Match { query_idx: 0, train_idx: 0, distance: 0.0 },
                Match { query_idx: 2, train_idx: 2, distance: 0.0 },
            ],
        };
        engine.matches_index.insert(m1.pair, 0);
        engine.matches_index.insert(m2.pair, 1);
        engine.image_matches = vec![m1, m2];
        engine.used_views = BTreeSet::from([0]);
        engine.todo_views = BTreeSet::from([1, 2]);

        assert_eq!(engine.select_next_view(), Some((1, 2)));
    }

    #[test]
    fn test_unreachable_view_terminates() {
        let points = world_points(6);
        let (images, extractor) = synthetic_views(3, &points);
        let mut engine = SfmEngine::new(
            vec![test_intrinsics()],
            Box::new(extractor),
            Box::new(EqualityMatcher),
        );
        engine.add_images(images, true, 2).unwrap();

        // A used set, and a todo view with no surviving matches at all.
        engine.used_views = BTreeSet::from([0, 1]);
        engine.todo_views = BTreeSet::from([2]);

        engine.reconstruct_all().unwrap();

        assert!(engine.is_finished());
        assert_eq!(engine.todo_views(), &BTreeSet::from([2]));
    }

    #[test]
    fn test_cancellation_at_view_boundary() {
        let mut engine = built_engine(4, 12);
        engine.extract_features().unwrap();
        engine.match_image_features(5, 2.0, false).unwrap();
        engine.init_reconstruction().unwrap();

        let before = engine.map_size();
        engine.set_proc_status(ProcStatus::Finish);
        engine.reconstruct_all().unwrap();

        // Nothing was expanded after the cancellation request.
        assert_eq!(engine.map_size(), before);
        assert_eq!(engine.used_views().len(), 2);
        assert!(!engine.todo_views().is_empty());
    }

    #[test]
    fn test_matching_determinism_under_cache() {
        let dir = tempfile::tempdir().unwrap();

        let run = |cache_dir: &std::path::Path| -> Vec<(ImagePair, usize)> {
            let points = world_points(12);
            let (images, extractor) = synthetic_views(3, &points);
            let mut engine = SfmEngine::new(
                vec![test_intrinsics()],
                Box::new(extractor),
                Box::new(EqualityMatcher),
            )
            .with_cache(CacheStorage::new(cache_dir).unwrap());
            engine.add_images(images, true, 2).unwrap();
            engine.extract_features().unwrap();
            engine.match_image_features(3, 2.0, true).unwrap();

            let mut counts: Vec<(ImagePair, usize)> = engine
                .matches_index
                .iter()
                .map(|(&pair, &slot)| (pair, engine.image_matches[slot].matches.len()))
                .collect();
            counts.sort();
            counts
        };

        let cold = run(dir.path());
        let warm = run(dir.path());
        assert_eq!(cold, warm);
        assert!(!cold.is_empty());
    }

    #[test]
    fn test_spawn_reconstruction_wakes_consumer() {
        let mut engine = built_engine(4, 10);
        engine.extract_features().unwrap();
        engine.match_image_features(5, 2.0, false).unwrap();

        let (shared, handle) = spawn_reconstruction(engine);

        // Wait through versions until the worker finishes; every snapshot
        // must be internally consistent.
        let mut last = 0u64;
        loop {
            let version = shared.wait_for_update(last);
            let (points, seen) = shared.points_snapshot();
            assert!(seen >= version);
            for point in &points {
                assert!(point.position.z > 0.0);
            }
            if shared.is_finished() && version == last {
                break;
            }
            last = version;
        }

        let engine = handle.join().unwrap().unwrap();
        assert!(engine.is_finished());
        assert_eq!(engine.map_size(), 10);
    }
}
