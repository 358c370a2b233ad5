//! Read-side merge of all persisted batches. The snapshot is the spine;
//! every other artifact is optional and joined in when present.

use std::collections::BTreeMap;

use anyhow::Context;
use wmate_core::{BenefitRecord, CrawlDetail, Enrichment, Snapshot, TargetFlags};
use wmate_extract::fields::parse_regions;
use wmate_storage::BatchStore;

/// One benefit with everything the pipeline knows about it.
#[derive(Debug)]
pub struct MergedBenefit<'a> {
    pub record: &'a BenefitRecord,
    pub detail: Option<&'a CrawlDetail>,
    pub enrichment: Option<&'a Enrichment>,
    pub flags: Option<&'a TargetFlags>,
    /// Persisted regions, or a read-time derivation from the title and
    /// source agency when extraction found none. Never written back.
    pub regions: Option<Vec<String>>,
}

pub struct BenefitViews {
    snapshot: Snapshot,
    details: BTreeMap<String, CrawlDetail>,
    /// Enrichment sources in precedence order; first hit per id wins.
    enrichment_sources: Vec<BTreeMap<String, Enrichment>>,
    flags: BTreeMap<String, TargetFlags>,
}

impl BenefitViews {
    /// Loads the snapshot (required) and joins whatever other batches
    /// exist on disk. A generated enrichment batch outranks the
    /// rule-based one for the ids it covers.
    pub async fn load(store: &BatchStore) -> anyhow::Result<Self> {
        let snapshot = store
            .load_snapshot()
            .await?
            .context("no snapshot on disk, run the snapshot stage first")?;
        let details = store
            .load_detail(false)
            .await?
            .map(|b| b.items)
            .unwrap_or_default();

        let mut enrichment_sources = Vec::new();
        if let Some(batch) = store.load_generated().await? {
            enrichment_sources.push(batch.items);
        }
        if let Some(batch) = store.load_enriched().await? {
            enrichment_sources.push(batch.items);
        }

        let flags = store
            .load_targets()
            .await?
            .map(|b| b.items)
            .unwrap_or_default();

        Ok(Self {
            snapshot,
            details,
            enrichment_sources,
            flags,
        })
    }

    pub fn len(&self) -> usize {
        self.snapshot.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.items.is_empty()
    }

    fn merge<'a>(&'a self, record: &'a BenefitRecord) -> MergedBenefit<'a> {
        let detail = record.service_id().and_then(|id| self.details.get(id));
        let enrichment = self
            .enrichment_sources
            .iter()
            .find_map(|source| source.get(&record.id));
        let flags = self.flags.get(&record.id);

        let regions = record.eligibility.region.clone().or_else(|| {
            let fallback = format!("{} {}", record.source.name, record.title);
            let derived = parse_regions(&fallback);
            (!derived.is_empty()).then_some(derived)
        });

        MergedBenefit {
            record,
            detail,
            enrichment,
            flags,
            regions,
        }
    }

    pub fn get(&self, id: &str) -> Option<MergedBenefit<'_>> {
        self.snapshot
            .items
            .iter()
            .find(|r| r.id == id)
            .map(|r| self.merge(r))
    }

    pub fn iter(&self) -> impl Iterator<Item = MergedBenefit<'_>> {
        self.snapshot.items.iter().map(|r| self.merge(r))
    }
}
