use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::Coordinate;

/// Indices of achieved spots. Ordered so snapshots compare and serialize stably.
pub type AchievedSet = BTreeSet<usize>;

/// Ledger contents as stored remotely, keyed by the decimal spot index.
pub type LedgerDocuments = BTreeMap<String, LedgerDocument>;

/// Records keyed by spot index. At most one record per spot.
pub type AchievementMap = BTreeMap<usize, AchievementRecord>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spot {
    /// Position in the loaded catalog. The only identity a spot has.
    pub index: usize,
    pub label: String,
    pub coordinate: Coordinate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementRecord {
    pub spot_index: usize,
    pub achieved_by_user_id: String,
    pub achieved_by_nickname: String,
    /// Spot label at the time of the write.
    #[serde(default)]
    pub address: String,
    pub achieved_at: DateTime<Utc>,
}

/// Wire shape of a single ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerDocument {
    #[serde(default = "default_achieved")]
    pub achieved: bool,
    pub user_id: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub address: String,
    pub timestamp: DateTime<Utc>,
}

fn default_achieved() -> bool {
    true
}

impl AchievementRecord {
    /// Decode one wire entry. Keys that are not a decimal index and entries
    /// flagged as not achieved yield `None`.
    pub fn from_document(key: &str, doc: &LedgerDocument) -> Option<Self> {
        if !doc.achieved {
            return None;
        }
        let spot_index = key.trim().parse::<usize>().ok()?;
        Some(Self {
            spot_index,
            achieved_by_user_id: doc.user_id.clone(),
            achieved_by_nickname: doc.nickname.clone(),
            address: doc.address.clone(),
            achieved_at: doc.timestamp,
        })
    }

    pub fn to_document(&self) -> (String, LedgerDocument) {
        (
            self.spot_index.to_string(),
            LedgerDocument {
                achieved: true,
                user_id: self.achieved_by_user_id.clone(),
                nickname: self.achieved_by_nickname.clone(),
                address: self.address.clone(),
                timestamp: self.achieved_at,
            },
        )
    }
}

pub fn records_from_documents(docs: &LedgerDocuments) -> AchievementMap {
    docs.iter()
        .filter_map(|(key, doc)| AchievementRecord::from_document(key, doc))
        .map(|record| (record.spot_index, record))
        .collect()
}

pub fn documents_from_records(records: &AchievementMap) -> LedgerDocuments {
    records.values().map(AchievementRecord::to_document).collect()
}

pub fn achieved_set(records: &AchievementMap) -> AchievedSet {
    records.keys().copied().collect()
}
