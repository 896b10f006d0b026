pub mod adapter;
pub mod http;
pub mod nws;
pub mod usgs;

use std::sync::Arc;

use hazardwatch_common::{FileConfig, ProviderFetchError};
use tracing::info;

pub use adapter::{ProviderAdapter, RawItem};
pub use nws::NwsAdapter;
pub use usgs::UsgsAdapter;

/// Build the enabled adapters in their fixed evaluation order.
pub fn build_adapters(
    config: &FileConfig,
) -> Result<Vec<Arc<dyn ProviderAdapter>>, ProviderFetchError> {
    let providers = &config.providers;
    let mut adapters: Vec<Arc<dyn ProviderAdapter>> = Vec::new();

    if providers.usgs.enabled {
        let floor = config
            .thresholds
            .earthquake
            .as_ref()
            .and_then(|eq| eq.min_magnitude);
        adapters.push(Arc::new(UsgsAdapter::new(
            &providers.usgs,
            &providers.user_agent,
            floor,
        )?));
    }
    if providers.nws.enabled {
        adapters.push(Arc::new(NwsAdapter::new(
            &providers.nws,
            &providers.user_agent,
        )?));
    }

    info!(
        providers = ?adapters.iter().map(|a| a.id().to_string()).collect::<Vec<_>>(),
        "Provider adapters ready"
    );
    Ok(adapters)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_providers_are_skipped() {
        let mut config = FileConfig::default();
        let all = build_adapters(&config).unwrap();
        assert_eq!(
            all.iter().map(|a| a.id()).collect::<Vec<_>>(),
            vec!["usgs", "nws"]
        );

        config.providers.usgs.enabled = false;
        let only_nws = build_adapters(&config).unwrap();
        assert_eq!(only_nws.len(), 1);
        assert_eq!(only_nws[0].id(), "nws");
    }
}
