use std::collections::{BTreeMap, BTreeSet};

use crate::my_types::*;
use crate::window::CloneId;

/// Observations of one feature, keyed by the window slot they were made in.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureTrack {
    pub id: FeatureId,
    /// Undistorted rays `(x, y, 1)` in the camera frame
    pub observations: BTreeMap<CloneId, Vector3d>,
}

impl FeatureTrack {
    pub fn new(id: FeatureId, slot: CloneId, ray: Vector3d) -> Self {
        let mut observations = BTreeMap::new();
        observations.insert(slot, ray);
        Self { id, observations }
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

/// Owns every live track. Tracks leave the table either as ready tracks,
/// handed to the caller to be measured, or as retired tracks that can no
/// longer contribute.
#[derive(Debug, Default)]
pub struct FeatureTrackManager {
    tracks: BTreeMap<FeatureId, FeatureTrack>,
}

impl FeatureTrackManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the features of the image cloned into `slot`. Tracks not
    /// observed in this image are lost: they are removed and returned.
    pub fn observe(
        &mut self,
        slot: CloneId,
        observations: &[(FeatureId, Vector3d)],
    ) -> Vec<FeatureTrack> {
        let mut seen = BTreeSet::new();
        for &(id, ray) in observations {
            if !seen.insert(id) {
                continue;
            }
            self.tracks
                .entry(id)
                .and_modify(|track| {
                    track.observations.insert(slot, ray);
                })
                .or_insert_with(|| FeatureTrack::new(id, slot, ray));
        }

        let lost: Vec<FeatureId> = self
            .tracks
            .keys()
            .filter(|id| !seen.contains(*id))
            .copied()
            .collect();
        lost.iter()
            .filter_map(|id| self.tracks.remove(id))
            .collect()
    }

    /// Remove and return tracks observed in every one of `slots`.
    pub fn take_mature(&mut self, slots: &[CloneId]) -> Vec<FeatureTrack> {
        if slots.is_empty() {
            return vec![];
        }
        let mature: Vec<FeatureId> = self
            .tracks
            .values()
            .filter(|track| slots.iter().all(|s| track.observations.contains_key(s)))
            .map(|track| track.id)
            .collect();
        mature
            .iter()
            .filter_map(|id| self.tracks.remove(id))
            .collect()
    }

    /// Forget observations made in an evicted slot. Tracks left without
    /// any observation are dropped and their ids returned.
    pub fn retire_slot(&mut self, slot: CloneId) -> Vec<FeatureId> {
        let mut retired = vec![];
        self.tracks.retain(|&id, track| {
            let emptied = track.observations.remove(&slot).is_some() && track.is_empty();
            if emptied {
                retired.push(id);
            }
            !emptied
        });
        retired
    }

    pub fn get(&self, id: FeatureId) -> Option<&FeatureTrack> {
        self.tracks.get(&id)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ray(x: f64) -> Vector3d {
        Vector3d::new(x, 0., 1.)
    }

    #[test]
    fn test_lifecycle() {
        let mut manager = FeatureTrackManager::new();
        let lost = manager.observe(CloneId(0), &[(1, ray(0.1)), (2, ray(0.2))]);
        assert!(lost.is_empty());
        assert_eq!(manager.len(), 2);

        let lost = manager.observe(CloneId(1), &[(1, ray(0.11)), (3, ray(0.3))]);
        assert_eq!(lost.len(), 1);
        assert_eq!(lost[0].id, 2);
        assert_eq!(lost[0].len(), 1);

        let track = manager.get(1).unwrap();
        assert_eq!(track.len(), 2);
        assert!(track.observations.contains_key(&CloneId(1)));
        assert_eq!(track.observations[&CloneId(0)], ray(0.1));
        assert_eq!(manager.get(3).unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_ids_keep_first_ray() {
        let mut manager = FeatureTrackManager::new();
        manager.observe(CloneId(0), &[(7, ray(0.1)), (7, ray(0.9))]);
        assert_eq!(manager.get(7).unwrap().observations[&CloneId(0)], ray(0.1));
    }

    #[test]
    fn test_take_mature() {
        let mut manager = FeatureTrackManager::new();
        manager.observe(CloneId(0), &[(1, ray(0.)), (2, ray(0.))]);
        manager.observe(CloneId(1), &[(1, ray(0.)), (2, ray(0.)), (3, ray(0.))]);
        manager.observe(CloneId(2), &[(1, ray(0.)), (2, ray(0.)), (3, ray(0.))]);

        let slots = [CloneId(0), CloneId(1), CloneId(2)];
        let mut mature: Vec<_> = manager.take_mature(&slots).iter().map(|t| t.id).collect();
        mature.sort();
        assert_eq!(mature, vec![1, 2]);
        assert_eq!(manager.len(), 1);
        assert!(manager.take_mature(&[]).is_empty());
    }

    #[test]
    fn test_retire_slot() {
        let mut manager = FeatureTrackManager::new();
        manager.observe(CloneId(0), &[(1, ray(0.)), (2, ray(0.))]);
        manager.observe(CloneId(1), &[(1, ray(0.)), (2, ray(0.))]);
        // feature 3 is only anchored in the slot being evicted
        manager.tracks.insert(3, FeatureTrack::new(3, CloneId(0), ray(0.)));

        let retired = manager.retire_slot(CloneId(0));
        assert_eq!(retired, vec![3]);
        assert_eq!(manager.get(1).unwrap().len(), 1);
        assert_eq!(manager.get(2).unwrap().len(), 1);
        assert!(manager.get(2).unwrap().observations.contains_key(&CloneId(1)));
    }
}
