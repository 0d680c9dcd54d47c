pub mod flares;
pub mod http;
pub mod kp_index;
pub mod proton_flux;
pub mod solar_wind;

use reqwest::Client;

use crate::ingest::types::{SourceAdapter, SourceDescriptor, SourceKind};

/// Build the adapter for a descriptor. The set of kinds is closed.
pub fn build_adapter(
    desc: SourceDescriptor,
    client: Client,
    nasa_api_key: &str,
) -> Box<dyn SourceAdapter> {
    match desc.kind {
        SourceKind::KpIndex => Box::new(kp_index::KpIndexProvider::new(desc, client)),
        SourceKind::SolarWind => Box::new(solar_wind::SolarWindProvider::new(desc, client)),
        SourceKind::ProtonFlux => Box::new(proton_flux::ProtonFluxProvider::new(desc, client)),
        SourceKind::XrayFlares | SourceKind::DonkiFlares => Box::new(
            flares::FlareProvider::new(desc, client, nasa_api_key.to_string()),
        ),
    }
}

/// Build all adapters sorted by ascending priority (ties keep config order).
pub fn build_adapters(
    mut descriptors: Vec<SourceDescriptor>,
    client: Client,
    nasa_api_key: &str,
) -> Vec<Box<dyn SourceAdapter>> {
    descriptors.sort_by_key(|d| d.priority);
    descriptors
        .into_iter()
        .map(|d| build_adapter(d, client.clone(), nasa_api_key))
        .collect()
}
