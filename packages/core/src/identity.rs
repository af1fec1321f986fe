//! Instance identity resolution.

use snafu::ResultExt;
use tracing::{debug, info};

use crate::error::{Error, MetadataLookupFailedSnafu, ProviderError, Result};
use crate::metadata::{INSTANCE_ID_KEY, MetadataSource};

const ZONE_KEY: &str = "placement/availability-zone";

/// Who and where the calling instance is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceIdentity {
    pub instance_id: String,
    pub zone: String,
    pub region: String,
}

/// Derives the region from an availability zone by dropping its zone letter.
///
/// `"us-east-1a"` becomes `"us-east-1"`.
pub fn region_from_zone(zone: &str) -> &str {
    match zone.char_indices().next_back() {
        Some((index, _)) => &zone[..index],
        None => zone,
    }
}

/// Resolves the calling instance's id, zone and region.
pub fn resolve_identity(source: &dyn MetadataSource) -> Result<InstanceIdentity> {
    debug!("Fetching current instance-id from the metadata service");
    let instance_id = source.probe().map_err(|e| Error::MetadataUnavailable {
        message: e.to_string(),
    })?;
    let instance_id = non_empty(INSTANCE_ID_KEY, instance_id)?;
    info!("Found instance-id: '{}'", instance_id);

    debug!("Fetching current AZ from the metadata service");
    let zone = lookup(source, ZONE_KEY)?;
    info!("Found AZ: '{}'", zone);

    let region = region_from_zone(&zone).to_string();
    info!("Computed region: '{}'", region);

    Ok(InstanceIdentity {
        instance_id,
        zone,
        region,
    })
}

fn lookup(source: &dyn MetadataSource, key: &str) -> Result<String> {
    let value = source
        .get(key)
        .context(MetadataLookupFailedSnafu { key })?;
    non_empty(key, value)
}

fn non_empty(key: &str, value: String) -> Result<String> {
    if value.is_empty() {
        return Err(Error::MetadataLookupFailed {
            key: key.to_string(),
            source: ProviderError::new("empty value"),
        });
    }
    Ok(value)
}
