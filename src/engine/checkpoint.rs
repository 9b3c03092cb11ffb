//! Checkpoint and restore of the full pipeline state.
//!
//! A [`Checkpoint`] is an explicit, versioned snapshot of everything the
//! engine accumulated: configuration, ingested data, features, pairs,
//! matches, view sets, component grouping and the map itself. Restoring
//! into an engine resumes the pipeline exactly where the capture left it;
//! the external capabilities (extractor, matcher, optimizer) are the
//! engine's own and are not part of the snapshot.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::camera::{CameraIntrinsics, CameraView, ImageData};
use crate::components::PairComponents;
use crate::features::{Features, ImagePair, Matches};
use crate::map::Map3D;

use super::{MatchParams, SfmConfig, SfmEngine};

/// On-disk format version. Bumped on any incompatible layout change.
pub const CHECKPOINT_FORMAT: u32 = 1;

/// A complete snapshot of the pipeline state.
#[derive(Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub format: u32,
    pub config: SfmConfig,
    pub match_params: Option<MatchParams>,
    pub intrinsics: Vec<CameraIntrinsics>,
    pub images: Vec<ImageData>,
    pub views: Vec<CameraView>,
    pub features: Vec<Features>,
    pub pairs: Vec<ImagePair>,
    pub image_matches: Vec<Matches>,
    pub matches_index: HashMap<ImagePair, usize>,
    pub components: PairComponents,
    pub todo_views: BTreeSet<usize>,
    pub used_views: BTreeSet<usize>,
    pub map: Map3D,
    pub map_version: u64,
}

impl Checkpoint {
    /// Capture the engine's current state, including a consistent copy of
    /// the shared map and its version.
    pub fn capture(engine: &SfmEngine) -> Self {
        let (map, map_version) = engine.shared.checkpoint_state();
        Self {
            format: CHECKPOINT_FORMAT,
            config: engine.config,
            match_params: engine.match_params,
            intrinsics: engine.intrinsics.clone(),
            images: engine.images.clone(),
            views: engine.views.clone(),
            features: engine.features.clone(),
            pairs: engine.pairs.clone(),
            image_matches: engine.image_matches.clone(),
            matches_index: engine.matches_index.clone(),
            components: engine.components.clone(),
            todo_views: engine.todo_views.clone(),
            used_views: engine.used_views.clone(),
            map,
            map_version,
        }
    }

    /// Write the checkpoint to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("cannot create checkpoint {}", path.display()))?;
        bincode::serialize_into(BufWriter::new(file), self)
            .with_context(|| format!("cannot write checkpoint {}", path.display()))?;
        info!(path = %path.display(), "checkpoint written");
        Ok(())
    }

    /// Read a checkpoint from a file, rejecting unknown format versions.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("cannot open checkpoint {}", path.display()))?;
        let checkpoint: Self = bincode::deserialize_from(BufReader::new(file))
            .with_context(|| format!("cannot decode checkpoint {}", path.display()))?;
        ensure!(
            checkpoint.format == CHECKPOINT_FORMAT,
            "unsupported checkpoint format {} (expected {})",
            checkpoint.format,
            CHECKPOINT_FORMAT
        );
        Ok(checkpoint)
    }
}

impl SfmEngine {
    /// Snapshot the complete pipeline state.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint::capture(self)
    }

    /// Replace the engine's state with a previously captured checkpoint.
    ///
    /// The shared map handle is kept, so consumers holding it observe the
    /// restored state; the status resets to `Reconstruction`.
    pub fn restore(&mut self, checkpoint: Checkpoint) -> Result<()> {
        ensure!(
            checkpoint.format == CHECKPOINT_FORMAT,
            "unsupported checkpoint format {} (expected {})",
            checkpoint.format,
            CHECKPOINT_FORMAT
        );
        ensure!(
            checkpoint.images.len() == checkpoint.views.len(),
            "checkpoint image and view counts disagree"
        );

        self.config = checkpoint.config;
        self.match_params = checkpoint.match_params;
        self.intrinsics = checkpoint.intrinsics;
        self.images = checkpoint.images;
        self.views = checkpoint.views;
        self.features = checkpoint.features;
        self.pairs = checkpoint.pairs;
        self.image_matches = checkpoint.image_matches;
        self.matches_index = checkpoint.matches_index;
        self.components = checkpoint.components;
        self.todo_views = checkpoint.todo_views;
        self.used_views = checkpoint.used_views;
        self.shared.restore(checkpoint.map, checkpoint.map_version);

        info!(
            images = self.images.len(),
            map_points = self.map_size(),
            "checkpoint restored"
        );
        Ok(())
    }
}
