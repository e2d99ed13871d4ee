use billboard_contracts::records::{
    AssetPayload, GeneratedAsset, RecordLocation, TemplatePosterRecord,
};
use billboard_contracts::PosterResult;
use tracing::debug;

use super::TemplatePosterStore;

/// Minimum number of stored overrides before they replace fresh generation.
const MIN_STORED_VARIANTS: usize = 2;

/// Builds `desired_count` outputs from stored template overrides.
///
/// Returns an empty list when fewer than two variants are wanted or fewer than
/// two overrides are stored; the caller then generates every variant itself.
/// Extra outputs cycle through the stored records round-robin, each one an
/// independent clone.
pub fn resolve_variants(
    store: &TemplatePosterStore,
    desired_count: usize,
) -> PosterResult<Vec<GeneratedAsset>> {
    if desired_count < MIN_STORED_VARIANTS {
        return Ok(Vec::new());
    }
    let records = store.list()?;
    if records.len() < MIN_STORED_VARIANTS {
        debug!(stored = records.len(), "not enough stored variants to reuse");
        return Ok(Vec::new());
    }

    let assets = records
        .iter()
        .map(|record| asset_for_record(store, record))
        .collect::<PosterResult<Vec<_>>>()?;
    Ok((0..desired_count)
        .map(|idx| assets[idx % assets.len()].clone())
        .collect())
}

fn asset_for_record(
    store: &TemplatePosterStore,
    record: &TemplatePosterRecord,
) -> PosterResult<GeneratedAsset> {
    let payload = match &record.location {
        RecordLocation::Storage { url: Some(url), .. } => AssetPayload::PublicUrl(url.clone()),
        RecordLocation::Storage { key, url: None, .. } => AssetPayload::StorageKey(key.clone()),
        RecordLocation::Local { .. } => AssetPayload::Inline(store.read_bytes(record)?),
    };
    Ok(GeneratedAsset {
        id: None,
        filename: record.filename.clone(),
        media_type: record.content_type.clone(),
        width: record.width,
        height: record.height,
        payload,
    })
}
