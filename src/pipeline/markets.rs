//! Market-data provider integration (batched reference prices)
//!
//! Logical contract of the provider:
//! - `/coins/list` - full token catalog `{id, symbol}`; fetched through the
//!   24h TTL cache (stale-on-error) because the list is large and changes
//!   slowly
//! - `/simple/price?ids=...` - batched per-id `{usd, usd_24h_vol,
//!   usd_market_cap}`; consumed in chunks of at most 250 ids per call
//!
//! The gap filler looks prices up by SYMBOL, not by mint: the provider does
//! not index this network's mints. This is a deliberately weak join - the
//! first catalog entry matching a symbol wins.

use super::error::{PipelineError, PipelineResult};
use super::fetch::{NowFn, RateLimitedClient, TtlCache};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Maximum identifiers per batched price call
const PRICE_BATCH_LIMIT: usize = 250;
/// Token catalog cache TTL
const CATALOG_TTL: Duration = Duration::from_secs(24 * 3600);
/// SOL/USD reference price cache TTL
const SOL_PRICE_TTL: Duration = Duration::from_secs(60);

/// Catalog id used for the SOL/USD reference price
const SOL_CATALOG_ID: &str = "solana";

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub symbol: String,
}

/// One batched price row
#[derive(Debug, Clone, Copy)]
pub struct MarketTicker {
    pub usd: f64,
    pub volume_24h: Option<f64>,
    pub market_cap: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PriceRow {
    usd: Option<f64>,
    usd_24h_vol: Option<f64>,
    usd_market_cap: Option<f64>,
}

/// Market-data service: catalog + batched prices over one rate-limited
/// provider client
pub struct MarketDataService {
    client: Arc<RateLimitedClient>,
    base_url: String,
    catalog: TtlCache<Arc<Vec<CatalogEntry>>>,
    sol_usd: TtlCache<f64>,
}

impl MarketDataService {
    pub fn new(client: Arc<RateLimitedClient>, base_url: &str, now_fn: NowFn) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            catalog: TtlCache::new(CATALOG_TTL, now_fn.clone()),
            sol_usd: TtlCache::new(SOL_PRICE_TTL, now_fn),
        }
    }

    /// Full token catalog, cached 24h and served stale when the refresh
    /// fails
    async fn catalog(&self) -> PipelineResult<Arc<Vec<CatalogEntry>>> {
        let client = &self.client;
        let url = format!("{}/coins/list", self.base_url);
        self.catalog
            .get_or_refresh(|| async move {
                let value = client.get_json(&url).await?;
                let entries: Vec<CatalogEntry> = serde_json::from_value(value)
                    .map_err(|e| PipelineError::unavailable(format!("bad catalog payload: {}", e)))?;
                log::info!("📚 Token catalog refreshed: {} entries", entries.len());
                Ok(Arc::new(entries))
            })
            .await
    }

    /// Resolve symbols to catalog ids. Case-insensitive; first match wins.
    /// Symbols with no catalog entry are simply absent from the result.
    async fn resolve_symbols(&self, symbols: &[String]) -> PipelineResult<HashMap<String, String>> {
        let catalog = self.catalog().await?;
        let mut id_to_symbol: HashMap<String, String> = HashMap::new();
        let wanted: HashMap<String, &String> =
            symbols.iter().map(|s| (s.to_lowercase(), s)).collect();

        for entry in catalog.iter() {
            if let Some(original) = wanted.get(&entry.symbol.to_lowercase()) {
                id_to_symbol
                    .entry(entry.id.clone())
                    .or_insert_with(|| (*original).clone());
            }
        }

        Ok(id_to_symbol)
    }

    /// Batched USD prices for a set of symbols.
    ///
    /// Returns a map keyed by the requested symbol. Unknown symbols and ids
    /// the provider returned no price for are absent, not errors.
    pub async fn prices_by_symbol(
        &self,
        symbols: &[String],
    ) -> PipelineResult<HashMap<String, MarketTicker>> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }

        let id_to_symbol = self.resolve_symbols(symbols).await?;
        if id_to_symbol.is_empty() {
            return Ok(HashMap::new());
        }

        let ids: Vec<&String> = id_to_symbol.keys().collect();
        let mut result = HashMap::new();

        for chunk in ids.chunks(PRICE_BATCH_LIMIT) {
            let joined = chunk.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(",");
            let url = format!(
                "{}/simple/price?ids={}&vs_currencies=usd&include_24hr_vol=true&include_market_cap=true",
                self.base_url, joined
            );

            let value = self.client.get_json(&url).await?;
            let rows: HashMap<String, PriceRow> = serde_json::from_value(value)
                .map_err(|e| PipelineError::unavailable(format!("bad price payload: {}", e)))?;

            for (id, row) in rows {
                let (Some(symbol), Some(usd)) = (id_to_symbol.get(&id), row.usd) else {
                    continue;
                };
                result.insert(
                    symbol.clone(),
                    MarketTicker {
                        usd,
                        volume_24h: row.usd_24h_vol,
                        market_cap: row.usd_market_cap,
                    },
                );
            }
        }

        Ok(result)
    }

    /// Cached SOL/USD reference price (used by the adapter to normalize
    /// swap amounts to USD)
    pub async fn sol_usd(&self) -> PipelineResult<f64> {
        let client = &self.client;
        let url = format!(
            "{}/simple/price?ids={}&vs_currencies=usd",
            self.base_url, SOL_CATALOG_ID
        );
        self.sol_usd
            .get_or_refresh(|| async move {
                let value = client.get_json(&url).await?;
                value[SOL_CATALOG_ID]["usd"]
                    .as_f64()
                    .filter(|p| *p > 0.0)
                    .ok_or_else(|| PipelineError::unavailable("no SOL/USD price in payload"))
            })
            .await
    }
}
