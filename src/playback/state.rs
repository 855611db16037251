//! Classification of registered media.

use std::collections::BTreeMap;

use crate::core::time::Seconds;
use crate::media::adapter::MediaId;

/// Bucket a registered media belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    /// Eligible for clock-driven alignment
    Syncing,
    /// Waiting for data
    Buffering,
    /// Current position is past its duration
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Member {
    bucket: Bucket,
    duration: Seconds,
}

/// Every registered media with its bucket and duration.
///
/// A single map keyed by id means a media is always in exactly one bucket.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    members: BTreeMap<MediaId, Member>,
}

impl Classification {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a media
    pub fn insert(&mut self, id: MediaId, bucket: Bucket, duration: Seconds) {
        self.members.insert(id, Member { bucket, duration });
    }

    /// Move a media to `bucket`. Returns the previous bucket, `None` if unknown.
    pub fn move_to(&mut self, id: MediaId, bucket: Bucket) -> Option<Bucket> {
        let member = self.members.get_mut(&id)?;
        let previous = member.bucket;
        member.bucket = bucket;
        Some(previous)
    }

    pub fn remove(&mut self, id: MediaId) -> Option<Bucket> {
        self.members.remove(&id).map(|member| member.bucket)
    }

    pub fn bucket_of(&self, id: MediaId) -> Option<Bucket> {
        self.members.get(&id).map(|member| member.bucket)
    }

    pub fn duration_of(&self, id: MediaId) -> Option<Seconds> {
        self.members.get(&id).map(|member| member.duration)
    }

    /// Ids in `bucket`, in registration order
    pub fn ids_in(&self, bucket: Bucket) -> Vec<MediaId> {
        self.members
            .iter()
            .filter(|(_, member)| member.bucket == bucket)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn count(&self, bucket: Bucket) -> usize {
        self.members.values().filter(|member| member.bucket == bucket).count()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Longest media overall. Ties go to the earliest registered.
    pub fn longest(&self) -> Option<(MediaId, Seconds)> {
        Self::pick_longest(self.members.iter())
    }

    /// Longest media among `buckets`
    pub fn longest_in(&self, buckets: &[Bucket]) -> Option<(MediaId, Seconds)> {
        Self::pick_longest(
            self.members
                .iter()
                .filter(|(_, member)| buckets.contains(&member.bucket)),
        )
    }

    fn pick_longest<'a>(
        members: impl Iterator<Item = (&'a MediaId, &'a Member)>,
    ) -> Option<(MediaId, Seconds)> {
        let mut best: Option<(MediaId, Seconds)> = None;
        for (id, member) in members {
            match best {
                Some((_, duration)) if duration >= member.duration => {}
                _ => best = Some((*id, member.duration)),
            }
        }
        best
    }
}
