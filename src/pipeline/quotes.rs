//! Quote provider integration (price impact + round-trip USD price)
//!
//! Logical contract: `{inputAsset, outputAsset, amount, slippage}` →
//! `{outAmount, priceImpactPct}`. Amounts are in UI units of the input
//! asset. Used two ways:
//! - Stage B's price-impact gate: quote a fixed SOL notional into the
//!   candidate token and read the impact percentage
//! - deriving a token's USD price by quoting one token unit into the USD
//!   reference asset (round trip through the quote engine's routing)

use super::error::{PipelineError, PipelineResult};
use super::fetch::RateLimitedClient;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

/// Wrapped-SOL mint, the input side of impact probes
pub const SOL_MINT: &str = "So11111111111111111111111111111111111111112";
/// USD reference asset for round-trip pricing
pub const USD_REFERENCE_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

/// Default slippage passed to the quote engine, basis points
const DEFAULT_SLIPPAGE_BPS: u16 = 100;

/// One quote response
#[derive(Debug, Clone, Copy)]
pub struct Quote {
    /// Output amount in UI units of the output asset
    pub out_amount: f64,
    /// Price degradation of this trade size, percent
    pub price_impact_pct: f64,
}

#[derive(Debug, Deserialize)]
struct QuotePayload {
    #[serde(rename = "outAmount")]
    out_amount: f64,
    #[serde(rename = "priceImpactPct")]
    price_impact_pct: f64,
}

/// Seam for the quote source so Stage B is testable with a scripted
/// provider
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Quote `amount` UI units of `input_mint` into `output_mint`.
    ///
    /// An unroutable pair or malformed payload is `DataUnavailable`, not a
    /// transport error: the caller skips the item.
    async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: f64,
        slippage_bps: u16,
    ) -> PipelineResult<Quote>;
}

/// HTTP quote client over the rate-limited fetch layer
pub struct HttpQuoteClient {
    client: Arc<RateLimitedClient>,
    base_url: String,
}

impl HttpQuoteClient {
    pub fn new(client: Arc<RateLimitedClient>, base_url: &str) -> Self {
        Self { client, base_url: base_url.trim_end_matches('/').to_string() }
    }
}

#[async_trait]
impl QuoteProvider for HttpQuoteClient {
    async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: f64,
        slippage_bps: u16,
    ) -> PipelineResult<Quote> {
        let url = format!(
            "{}/quote?inputMint={}&outputMint={}&amount={}&slippageBps={}",
            self.base_url, input_mint, output_mint, amount, slippage_bps
        );

        let value = self.client.get_json(&url).await?;
        let payload: QuotePayload = serde_json::from_value(value).map_err(|e| {
            PipelineError::unavailable(format!(
                "no usable quote for {} -> {}: {}",
                input_mint, output_mint, e
            ))
        })?;

        Ok(Quote { out_amount: payload.out_amount, price_impact_pct: payload.price_impact_pct })
    }
}

/// Price impact (percent) of buying `notional_sol` worth of `mint`
pub async fn price_impact(
    provider: &dyn QuoteProvider,
    mint: &str,
    notional_sol: f64,
) -> PipelineResult<f64> {
    let quote = provider.quote(SOL_MINT, mint, notional_sol, DEFAULT_SLIPPAGE_BPS).await?;
    Ok(quote.price_impact_pct)
}

/// USD price of one unit of `mint`, derived by quoting it into the USD
/// reference asset
pub async fn usd_price(provider: &dyn QuoteProvider, mint: &str) -> PipelineResult<f64> {
    let quote = provider.quote(mint, USD_REFERENCE_MINT, 1.0, DEFAULT_SLIPPAGE_BPS).await?;
    if quote.out_amount <= 0.0 {
        return Err(PipelineError::unavailable(format!("zero-value quote for {}", mint)));
    }
    Ok(quote.out_amount)
}
