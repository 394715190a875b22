//! Gauge vectors for unconfigured backups and the bookkeeping behind them
//!
//! A series is present with value `1` while it is asserted and removed once
//! it is not; a `0` is never exported.

use crate::backup::{MissingClaim, OwnerIdentity};
use crate::Result;
use dashmap::DashMap;
use prometheus::proto::MetricFamily;
use prometheus::{GaugeVec, Opts, Registry};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use tracing::debug;

pub const MISSING_METRIC_NAME: &str = "backupmonitor_missing";

const VOLUME_HELP: &str = "Kubernetes volume not backed up or excluded for velero restic backups";
const CLAIM_HELP: &str = "Persistent volume claim without a velero backup or exclusion";

pub const VOLUME_LABELS: [&str; 4] = ["namespace", "owner_kind", "owner_name", "volume_name"];
pub const CLAIM_LABELS: [&str; 2] = ["namespace", "pvc_name"];

/// One asserted `(owner, volume)` series
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MissingVolume {
    pub owner: OwnerIdentity,
    pub volume_name: String,
}

/// volume name -> keys of the pods reporting it missing
type VolumeMembers = BTreeMap<String, BTreeSet<String>>;

/// Per-owner missing-volume series.
///
/// A series for `(owner, volume)` is asserted exactly while at least one
/// known pod of that owner reports the volume missing. Membership is sharded
/// by owner; every change to an owner's members and the matching gauge
/// update happen under that owner's shard lock.
pub struct MissingVolumeMetrics {
    gauge: GaugeVec,
    buckets: DashMap<OwnerIdentity, VolumeMembers>,
    /// pod key -> owner it was last recorded under
    members: DashMap<String, OwnerIdentity>,
}

impl MissingVolumeMetrics {
    pub fn new() -> Result<Self> {
        let gauge = GaugeVec::new(Opts::new(MISSING_METRIC_NAME, VOLUME_HELP), &VOLUME_LABELS)?;

        Ok(Self {
            gauge,
            buckets: DashMap::new(),
            members: DashMap::new(),
        })
    }

    pub fn register(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.gauge.clone()))?;
        Ok(())
    }

    /// Record that `member` (a pod key) of `owner` misses exactly `volumes`.
    ///
    /// Volumes the member reported before but not anymore are released, so
    /// a pod that becomes covered retracts its series unless a sibling still
    /// misses the same volume. Asserting the same set again changes nothing.
    pub fn assert_missing(&self, owner: &OwnerIdentity, member: &str, volumes: &[String]) {
        let previous = self.members.get(member).map(|r| r.value().clone());
        if let Some(previous) = previous.filter(|p| p != owner) {
            debug!(%member, from = %previous, to = %owner, "pod changed owner");
            self.release(&previous, member, &BTreeSet::new());
        }

        let wanted: BTreeSet<&str> = volumes.iter().map(String::as_str).collect();
        self.release(owner, member, &wanted);

        if wanted.is_empty() {
            self.members.remove(member);
            return;
        }

        {
            let mut owner_volumes = self.buckets.entry(owner.clone()).or_default();
            for volume in &wanted {
                owner_volumes
                    .entry(volume.to_string())
                    .or_default()
                    .insert(member.to_string());
                self.gauge
                    .with_label_values(&Self::labels(owner, volume))
                    .set(1.0);
            }
        }
        self.members.insert(member.to_string(), owner.clone());
    }

    /// Forget `member` under `owner`, retracting series nobody else reports
    pub fn retract_subject(&self, owner: &OwnerIdentity, member: &str) {
        self.release(owner, member, &BTreeSet::new());

        if let Some((_, recorded)) = self.members.remove(member) {
            if &recorded != owner {
                self.release(&recorded, member, &BTreeSet::new());
            }
        }
    }

    /// Forget `member` under whatever owner it was last recorded with.
    ///
    /// Returns `false` when the member was not contributing to any series.
    pub fn retract_member(&self, member: &str) -> bool {
        match self.members.remove(member) {
            Some((_, owner)) => {
                self.release(&owner, member, &BTreeSet::new());
                true
            }
            None => false,
        }
    }

    fn release(&self, owner: &OwnerIdentity, member: &str, keep: &BTreeSet<&str>) {
        if let Some(mut owner_volumes) = self.buckets.get_mut(owner) {
            owner_volumes.retain(|volume, members| {
                if keep.contains(volume.as_str()) {
                    return true;
                }
                members.remove(member);
                if members.is_empty() {
                    self.retract_series(owner, volume);
                    return false;
                }
                true
            });
        }
        self.buckets.remove_if(owner, |_, volumes| volumes.is_empty());
    }

    fn retract_series(&self, owner: &OwnerIdentity, volume: &str) {
        debug!(%owner, %volume, "retracting missing backup series");
        if let Err(e) = self.gauge.remove_label_values(&Self::labels(owner, volume)) {
            debug!(%owner, %volume, "series was not present: {}", e);
        }
    }

    fn labels<'a>(owner: &'a OwnerIdentity, volume: &'a str) -> [&'a str; 4] {
        [
            owner.namespace.as_str(),
            owner.kind.as_str(),
            owner.name.as_str(),
            volume,
        ]
    }

    /// Currently asserted series, sorted
    pub fn asserted(&self) -> Vec<MissingVolume> {
        let mut series: Vec<MissingVolume> = self
            .buckets
            .iter()
            .flat_map(|entry| {
                let owner = entry.key().clone();
                entry
                    .value()
                    .keys()
                    .map(|volume| MissingVolume {
                        owner: owner.clone(),
                        volume_name: volume.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        series.sort();
        series
    }

    /// Pod keys currently reporting `volume` missing for `owner`
    pub fn members(&self, owner: &OwnerIdentity, volume: &str) -> Vec<String> {
        self.buckets
            .get(owner)
            .and_then(|volumes| volumes.get(volume).map(|m| m.iter().cloned().collect()))
            .unwrap_or_default()
    }

    pub fn gauge(&self) -> &GaugeVec {
        &self.gauge
    }
}

/// Per-claim missing series, recomputed from scratch on every rebuild
pub struct MissingClaimMetrics {
    gauge: GaugeVec,
    asserted: Mutex<BTreeSet<MissingClaim>>,
}

impl MissingClaimMetrics {
    pub fn new() -> Result<Self> {
        let gauge = GaugeVec::new(Opts::new(MISSING_METRIC_NAME, CLAIM_HELP), &CLAIM_LABELS)?;

        Ok(Self {
            gauge,
            asserted: Mutex::new(BTreeSet::new()),
        })
    }

    /// Clear every series and assert exactly `missing`, returning the
    /// resulting metric families.
    ///
    /// Rebuilds are serialized; a concurrent reader of the raw gauge may
    /// briefly observe an empty vector.
    pub fn full_rebuild(&self, missing: Vec<MissingClaim>) -> Vec<MetricFamily> {
        let mut asserted = self.asserted.lock().unwrap_or_else(|e| e.into_inner());

        self.gauge.reset();
        for claim in &missing {
            self.gauge
                .with_label_values(&[claim.namespace.as_str(), claim.pvc_name.as_str()])
                .set(1.0);
        }
        *asserted = missing.into_iter().collect();

        prometheus::core::Collector::collect(&self.gauge)
    }

    pub fn asserted(&self) -> Vec<MissingClaim> {
        let asserted = self.asserted.lock().unwrap_or_else(|e| e.into_inner());
        asserted.iter().cloned().collect()
    }

    pub fn gauge(&self) -> &GaugeVec {
        &self.gauge
    }
}
