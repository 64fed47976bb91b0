use crate::extractor::api::ApiResolver;
use crate::extractor::cipher::decipher_from_config;
use crate::extractor::fetch::Fetcher;
use crate::extractor::limiter::RequestLimiter;
use crate::extractor::page::PageResolver;
use crate::extractor::traits::MetadataResolver;
use crate::utils::config::{ResolverKind, Settings};
use crate::utils::error::Result;
use reqwest::Client;
use std::sync::Arc;
use tracing::{info, warn};

/// Turn the configured [`ResolverKind`] into the resolver used for the whole run.
///
/// The limiter is shared by every request the returned resolver makes, so a
/// process should build one resolver and clone the `Arc`.
pub fn build_resolver(
    settings: &Settings,
    client: Client,
    limiter: Arc<RequestLimiter>,
) -> Result<Arc<dyn MetadataResolver>> {
    let fetcher = Fetcher::new(client, limiter, settings.retry_policy(), settings.read_timeout());
    let decipher = Arc::from(decipher_from_config(settings.cipher_operations.as_deref())?);
    let page = Arc::new(PageResolver::new(
        fetcher.clone(),
        &settings.web_base_url,
        decipher,
    ));

    let api_key = settings
        .api_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty());

    let resolver: Arc<dyn MetadataResolver> = match (settings.resolver, api_key) {
        (ResolverKind::Api, Some(key)) => Arc::new(ApiResolver::new(
            fetcher,
            &settings.api_base_url,
            key.to_string(),
            page,
        )),
        (ResolverKind::Api, None) => {
            warn!("API resolver selected without an api_key, falling back to page resolver");
            page
        }
        (ResolverKind::Page, _) => page,
    };

    info!("Using {} resolver", resolver.id());
    Ok(resolver)
}
