// Shared pipeline constants, passed explicitly to ingestion and the
// reconcilers instead of being duplicated inside each source variant.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Transaction type assumed when a row carries none ("rental" or "sales").
    pub default_transaction_type: String,

    /// Price above which a type-less Zillow row is assumed to be a sale.
    pub sales_price_threshold: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            default_transaction_type: "rental".to_string(),
            sales_price_threshold: 50_000.0,
        }
    }
}
