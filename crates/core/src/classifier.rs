//! Obs-tree classifier.
//!
//! An encounter stores no "field" attribute on its Obs. Which part of a report an Obs
//! represents is derived from its concept alone, using the bucket table in
//! [`crate::config::ConceptTable`], every time a report is read.

use crate::config::ConceptTable;
use crate::model::Obs;
use crate::store::{ObsStore, StoreResult};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConceptBucket {
    Result,
    PresentedForm,
    Name,
    Status,
    ImagingStudy,
}

impl ConceptBucket {
    pub const ALL: [ConceptBucket; 5] = [
        ConceptBucket::Result,
        ConceptBucket::PresentedForm,
        ConceptBucket::Name,
        ConceptBucket::Status,
        ConceptBucket::ImagingStudy,
    ];
}

/// Obs partitioned by bucket. Every bucket is present, possibly empty.
#[derive(Clone, Debug, Default)]
pub struct BucketMap {
    buckets: BTreeMap<ConceptBucket, Vec<Obs>>,
}

impl BucketMap {
    fn empty() -> Self {
        Self {
            buckets: ConceptBucket::ALL
                .into_iter()
                .map(|bucket| (bucket, Vec::new()))
                .collect(),
        }
    }

    pub fn get(&self, bucket: ConceptBucket) -> &[Obs] {
        self.buckets.get(&bucket).map(Vec::as_slice).unwrap_or(&[])
    }

    fn push(&mut self, bucket: ConceptBucket, obs: Obs) {
        self.buckets.entry(bucket).or_default().push(obs);
    }
}

/// Partition top-level Obs by concept. Obs matching no bucket are dropped.
pub fn classify(top_level: Vec<Obs>, concepts: &ConceptTable) -> BucketMap {
    let mut map = BucketMap::empty();
    for obs in top_level {
        if let Some(bucket) = concepts.bucket_for(&obs.concept.code) {
            map.push(bucket, obs);
        }
    }
    map
}

/// Like [`classify`], but groups whose concept matches no bucket are descended into and their
/// members classified in their place, to any depth.
pub fn classify_nested<S>(
    top_level: Vec<Obs>,
    concepts: &ConceptTable,
    store: &S,
) -> StoreResult<BucketMap>
where
    S: ObsStore + ?Sized,
{
    let mut map = BucketMap::empty();
    let mut pending = top_level;
    pending.reverse();

    while let Some(obs) = pending.pop() {
        if let Some(bucket) = concepts.bucket_for(&obs.concept.code) {
            map.push(bucket, obs);
            continue;
        }
        let mut members = store.group_members(obs.uuid, false)?;
        members.reverse();
        pending.extend(members);
    }

    Ok(map)
}
