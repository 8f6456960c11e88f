use std::collections::VecDeque;

use crate::my_types::*;

/// Stable id of a window slot. Ids grow by one per processed image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CloneId(pub u64);

/// Pose snapshot taken when an image was processed.
#[derive(Clone, Debug)]
pub struct SlideState {
    pub id: CloneId,
    pub time: f64,
    /// Takes a vector from the body frame to the global frame
    pub orientation: Quaterniond,
    pub position: Vector3d,
    pub velocity: Vector3d,
}

/// FIFO of clones. The position of a clone in this sequence is also the
/// index of its block in the error covariance.
#[derive(Debug)]
pub struct SlidingWindow {
    states: VecDeque<SlideState>,
    max_len: usize,
    next_id: u64,
}

impl SlidingWindow {
    pub fn new(max_len: usize) -> Self {
        Self {
            states: VecDeque::with_capacity(max_len + 1),
            max_len: max_len.max(1),
            next_id: 0,
        }
    }

    pub fn push(
        &mut self,
        time: f64,
        orientation: Quaterniond,
        position: Vector3d,
        velocity: Vector3d,
    ) -> CloneId {
        let id = CloneId(self.next_id);
        self.next_id += 1;
        self.states.push_back(SlideState {
            id,
            time,
            orientation,
            position,
            velocity,
        });
        id
    }

    pub fn pop_oldest(&mut self) -> Option<SlideState> {
        self.states.pop_front()
    }

    /// Number of clones that must go for the window to respect its bound.
    pub fn overflow(&self) -> usize {
        self.states.len().saturating_sub(self.max_len)
    }

    pub fn position_of(&self, id: CloneId) -> Option<usize> {
        // ids are strictly increasing front to back
        self.states.binary_search_by_key(&id, |s| s.id).ok()
    }

    pub fn get(&self, id: CloneId) -> Option<&SlideState> {
        self.position_of(id).map(|i| &self.states[i])
    }

    pub fn ids(&self) -> Vec<CloneId> {
        self.states.iter().map(|s| s.id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SlideState> {
        self.states.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SlideState> {
        self.states.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_at(window: &mut SlidingWindow, x: f64) -> CloneId {
        window.push(
            x,
            Quaterniond::identity(),
            Vector3d::new(x, 0., 0.),
            Vector3d::zeros(),
        )
    }

    #[test]
    fn test_fifo_ids_and_positions() {
        let mut window = SlidingWindow::new(3);
        let ids: Vec<_> = (0..5).map(|i| push_at(&mut window, i as f64)).collect();
        assert_eq!(window.len(), 5);
        assert_eq!(window.overflow(), 2);

        assert_eq!(window.pop_oldest().map(|s| s.id), Some(ids[0]));
        assert_eq!(window.pop_oldest().map(|s| s.id), Some(ids[1]));
        assert_eq!(window.overflow(), 0);

        assert_eq!(window.position_of(ids[2]), Some(0));
        assert_eq!(window.position_of(ids[4]), Some(2));
        assert_eq!(window.position_of(ids[0]), None);
        assert_eq!(window.get(ids[3]).map(|s| s.position.x), Some(3.));
        assert_eq!(window.iter().last().map(|s| s.id), Some(ids[4]));
        assert_eq!(window.ids(), ids[2..].to_vec());
    }

    #[test]
    fn test_zero_length_is_clamped() {
        let window = SlidingWindow::new(0);
        assert_eq!(window.max_len(), 1);
        assert!(window.is_empty());
    }
}
