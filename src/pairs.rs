//! Candidate pair generation.
//!
//! Each image is paired with its `look_back` temporal predecessors on the
//! same channel, plus the time-nearest image on every other channel. Pairs
//! are emitted in canonical `first < second` form, deduplicated, in a
//! deterministic order (per image, nearest predecessor first, then the
//! cross-channel partner).

use std::collections::{BTreeMap, HashSet};

use crate::camera::ImageData;
use crate::features::ImagePair;

/// Generate the candidate pairs for a list of ingested images.
///
/// Image ids are positions in `images`; per-channel temporal order is
/// ingestion order. `look_back` bounds how far back on the same channel an
/// image connects.
pub fn generate_pairs(images: &[ImageData], look_back: usize) -> Vec<ImagePair> {
    // Per-channel image ids, in ingestion (temporal) order.
    let mut channels: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    let mut pos_in_channel = vec![0usize; images.len()];
    for (id, image) in images.iter().enumerate() {
        let members = channels.entry(image.channel).or_default();
        pos_in_channel[id] = members.len();
        members.push(id);
    }

    let mut pairs = Vec::new();
    let mut seen: HashSet<ImagePair> = HashSet::new();
    let mut push = |pairs: &mut Vec<ImagePair>, pair: ImagePair| {
        if seen.insert(pair) {
            pairs.push(pair);
        }
    };

    for (id, image) in images.iter().enumerate() {
        let own = &channels[&image.channel];
        let pos = pos_in_channel[id];

        // Same-channel look-back window, nearest predecessor first.
        for back in 1..=look_back.min(pos) {
            push(&mut pairs, ImagePair::new(own[pos - back], id));
        }

        // Time-nearest image on each other channel.
        for (&channel, members) in &channels {
            if channel == image.channel {
                continue;
            }
            if let Some(partner) = nearest_in_time(images, members, image.timestamp) {
                push(&mut pairs, ImagePair::new(partner, id));
            }
        }
    }

    pairs
}

/// The member with minimal timestamp distance; ties resolve to the earlier
/// image.
fn nearest_in_time(images: &[ImageData], members: &[usize], timestamp: f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for &id in members {
        let dist = (images[id].timestamp - timestamp).abs();
        if best.map_or(true, |(_, d)| dist < d) {
            best = Some((id, dist));
        }
    }
    best.map(|(id, _)| id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn image(channel: usize, timestamp: f64) -> ImageData {
        ImageData {
            record: "r0".into(),
            channel,
            filename: format!("{channel}-{timestamp}.jpg"),
            timestamp,
            rotation: Vector3::zeros(),
            translation: Vector3::zeros(),
        }
    }

    #[test]
    fn test_look_back_window() {
        let images: Vec<_> = (0..10).map(|i| image(0, i as f64)).collect();
        let pairs = generate_pairs(&images, 5);

        // Every pair is canonical and unique.
        let unique: HashSet<_> = pairs.iter().copied().collect();
        assert_eq!(unique.len(), pairs.len());
        assert!(pairs.iter().all(|p| p.first < p.second));

        // Image i >= 5 pairs with exactly i-1 .. i-5.
        for i in 5..10usize {
            let partners: HashSet<usize> = pairs
                .iter()
                .filter(|p| p.second == i)
                .map(|p| p.first)
                .collect();
            let expected: HashSet<usize> = (i - 5..i).collect();
            assert_eq!(partners, expected, "image {i}");
        }

        // 1+2+3+4+4*5 pairs in total for look_back 5 over 10 images.
        assert_eq!(pairs.len(), 1 + 2 + 3 + 4 + 5 + 5 + 5 + 5 + 5);
    }

    #[test]
    fn test_cross_channel_nearest() {
        let images = vec![
            image(0, 0.0), // 0
            image(0, 1.0), // 1
            image(1, 0.9), // 2
            image(1, 5.0), // 3
        ];
        let pairs = generate_pairs(&images, 2);

        // Image 1 (t=1.0) is nearest to image 2 (t=0.9) on channel 1.
        assert!(pairs.contains(&ImagePair::new(1, 2)));
        // Image 3 (t=5.0) is nearest to image 1 (t=1.0) on channel 0.
        assert!(pairs.contains(&ImagePair::new(1, 3)));
        // No same-channel look-back can reach across channels.
        assert!(!pairs.contains(&ImagePair::new(0, 3)));
    }

    #[test]
    fn test_no_duplicates_with_mutual_nearest() {
        // Mutually-nearest cross-channel partners would produce the same
        // pair twice without deduplication.
        let images = vec![image(0, 0.0), image(1, 0.0)];
        let pairs = generate_pairs(&images, 3);
        assert_eq!(pairs, vec![ImagePair::new(0, 1)]);
    }

    #[test]
    fn test_single_image_no_pairs() {
        let images = vec![image(0, 0.0)];
        assert!(generate_pairs(&images, 5).is_empty());
    }
}
