use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::segment::Segment;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TrackerError {
    #[error("segment {0} is still open")]
    SegmentStillOpen(u32),

    #[error("no active segment")]
    NoActiveSegment,
}

/// Ordered segments sharing one continuity identity.
///
/// Pure bookkeeping: paths are computed here but files are created, sized
/// and deleted by the caller. Indices are handed out contiguously from 0;
/// pruning only ever drops from the front, so the retained indices stay a
/// contiguous range ending at the newest segment.
#[derive(Debug, Clone)]
pub struct SegmentTracker {
    continuity_id: Uuid,
    directory: PathBuf,
    extension: String,
    segments: VecDeque<Segment>,
    opened: u32,
}

impl SegmentTracker {
    pub fn new(continuity_id: Uuid, directory: PathBuf, extension: &str) -> Self {
        Self {
            continuity_id,
            directory,
            extension: extension.trim_start_matches('.').to_string(),
            segments: VecDeque::new(),
            opened: 0,
        }
    }

    /// Path the next opened segment will write to.
    pub fn next_path(&self) -> PathBuf {
        self.directory
            .join(format!("segment_{:05}.{}", self.opened, self.extension))
    }

    /// Open the next segment. Fails while another segment is still open.
    pub fn open(&mut self, path: PathBuf, now: DateTime<Utc>) -> Result<Segment, TrackerError> {
        if let Some(active) = self.active() {
            return Err(TrackerError::SegmentStillOpen(active.index));
        }
        let segment = Segment {
            id: Uuid::new_v4(),
            index: self.opened,
            continuity_id: self.continuity_id,
            path,
            started_at: now,
            ended_at: None,
            size_bytes: 0,
        };
        self.segments.push_back(segment.clone());
        self.opened += 1;
        Ok(segment)
    }

    /// Stamp end time and final size on the active segment.
    pub fn finalize_active(&mut self, now: DateTime<Utc>, size_bytes: u64) -> Result<Segment, TrackerError> {
        let active = self
            .segments
            .iter_mut()
            .rev()
            .find(|s| s.is_active())
            .ok_or(TrackerError::NoActiveSegment)?;
        active.ended_at = Some(now.max(active.started_at));
        active.size_bytes = size_bytes;
        Ok(active.clone())
    }

    /// Finalize the active segment and open `next_path` in one step.
    ///
    /// Returns `(finished, started)`.
    pub fn rotate(
        &mut self,
        next_path: PathBuf,
        now: DateTime<Utc>,
        finished_size: u64,
    ) -> Result<(Segment, Segment), TrackerError> {
        let finished = self.finalize_active(now, finished_size)?;
        let started = self.open(next_path, now)?;
        Ok((finished, started))
    }

    /// Record the latest observed size of the active segment.
    pub fn update_active_size(&mut self, size_bytes: u64) {
        if let Some(active) = self.segments.iter_mut().rev().find(|s| s.is_active()) {
            active.size_bytes = size_bytes;
        }
    }

    /// Drop the oldest finished segments until at most `max` remain.
    ///
    /// The active segment is never pruned.
    pub fn prune(&mut self, max: usize) -> Vec<Segment> {
        let mut pruned = Vec::new();
        while self.segments.len() > max {
            match self.segments.front() {
                Some(oldest) if !oldest.is_active() => {
                    if let Some(segment) = self.segments.pop_front() {
                        pruned.push(segment);
                    }
                }
                _ => break,
            }
        }
        pruned
    }

    pub fn active(&self) -> Option<&Segment> {
        self.segments.iter().rev().find(|s| s.is_active())
    }

    pub fn segments(&self) -> Vec<Segment> {
        self.segments.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segments opened over the tracker's lifetime, pruned ones included.
    pub fn opened(&self) -> u32 {
        self.opened
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use proptest::prelude::*;

    fn tracker() -> SegmentTracker {
        SegmentTracker::new(Uuid::new_v4(), PathBuf::from("/rec/cam1/c"), "mp4")
    }

    #[test]
    fn next_path_is_zero_padded() {
        let mut t = tracker();
        assert_eq!(t.next_path(), PathBuf::from("/rec/cam1/c/segment_00000.mp4"));
        let path = t.next_path();
        t.open(path, Utc::now()).unwrap();
        assert_eq!(t.next_path(), PathBuf::from("/rec/cam1/c/segment_00001.mp4"));
    }

    #[test]
    fn open_rejects_second_active_segment() {
        let mut t = tracker();
        t.open(t.next_path(), Utc::now()).unwrap();
        assert_eq!(
            t.open(t.next_path(), Utc::now()).unwrap_err(),
            TrackerError::SegmentStillOpen(0)
        );
    }

    #[test]
    fn finalize_without_active_fails() {
        let mut t = tracker();
        assert_eq!(t.finalize_active(Utc::now(), 0).unwrap_err(), TrackerError::NoActiveSegment);
    }

    #[test]
    fn rotate_shares_continuity_and_increments_index() {
        let mut t = tracker();
        let start = Utc::now();
        t.open(t.next_path(), start).unwrap();

        let later = start + ChronoDuration::seconds(30);
        let (finished, started) = t.rotate(t.next_path(), later, 2048).unwrap();

        assert_eq!(finished.index, 0);
        assert_eq!(finished.ended_at, Some(later));
        assert_eq!(finished.size_bytes, 2048);
        assert_eq!(started.index, 1);
        assert_eq!(started.continuity_id, finished.continuity_id);
        assert!(started.is_active());
        assert_eq!(finished.duration_at(Utc::now()).as_secs(), 30);
    }

    #[test]
    fn prune_drops_oldest_and_keeps_active() {
        let mut t = tracker();
        t.open(t.next_path(), Utc::now()).unwrap();
        for _ in 0..3 {
            t.rotate(t.next_path(), Utc::now(), 1).unwrap();
        }

        let pruned = t.prune(3);
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].index, 0);
        assert_eq!(t.segments().first().unwrap().index, 1);

        // Only the active segment may remain; it is never pruned.
        let pruned = t.prune(0);
        assert_eq!(pruned.len(), 2);
        assert_eq!(t.len(), 1);
        assert!(t.active().is_some());
        assert_eq!(t.opened(), 4);
    }

    proptest! {
        #[test]
        fn indices_stay_contiguous_with_one_active(rotations in 0usize..40, keep in 1usize..10) {
            let mut t = tracker();
            t.open(t.next_path(), Utc::now()).unwrap();
            for i in 0..rotations {
                t.rotate(t.next_path(), Utc::now(), i as u64).unwrap();
                t.prune(keep);
            }

            let segments = t.segments();
            prop_assert_eq!(segments.iter().filter(|s| s.is_active()).count(), 1);
            prop_assert!(segments.len() <= keep.max(1));
            let first = segments[0].index;
            for (offset, segment) in segments.iter().enumerate() {
                prop_assert_eq!(segment.index, first + offset as u32);
            }
            prop_assert_eq!(segments.last().unwrap().index as usize, rotations);
        }
    }
}
