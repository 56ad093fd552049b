//! Trade records — the ingestion-side data type.
//!
//! A [`TradeRecord`] serializes to the raw topic payload
//! `{"token_address", "price_in_sol", "block_time"}` published by the producer.
//! The field names are part of the wire contract.

use serde::{Deserialize, Serialize};

use crate::error::FeedError;

/// One trade row from the source dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub token_address: String,
    pub price_in_sol: f64,
    /// Timestamp or free-form time string, passed through verbatim.
    pub block_time: String,
}

impl TradeRecord {
    /// Build a record, rejecting values that violate the record invariants.
    ///
    /// The price must be finite and non-negative; the token and block time must
    /// be non-empty after trimming.
    pub fn new(token_address: &str, price_in_sol: f64, block_time: &str) -> Result<Self, FeedError> {
        let record = Self {
            token_address: token_address.trim().to_string(),
            price_in_sol,
            block_time: block_time.trim().to_string(),
        };
        record.validate()?;
        Ok(record)
    }

    /// Check the record invariants.
    pub fn validate(&self) -> Result<(), FeedError> {
        if self.token_address.is_empty() {
            return Err(FeedError::Parse("empty token_address".into()));
        }
        if self.block_time.is_empty() {
            return Err(FeedError::Parse("empty block_time".into()));
        }
        if !self.price_in_sol.is_finite() || self.price_in_sol < 0.0 {
            return Err(FeedError::Parse(format!("invalid price_in_sol {}", self.price_in_sol)));
        }
        Ok(())
    }

    /// Encode as the raw topic payload.
    pub fn to_payload(&self) -> Result<Vec<u8>, FeedError> {
        serde_json::to_vec(self).map_err(|e| FeedError::Parse(e.to_string()))
    }
}

impl std::fmt::Display for TradeRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Trade({} {:.8} @ {})", self.token_address, self.price_in_sol, self.block_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_negative_and_non_finite_prices() {
        assert!(TradeRecord::new("BTC", -1.0, "t1").is_err());
        assert!(TradeRecord::new("BTC", f64::NAN, "t1").is_err());
        assert!(TradeRecord::new("BTC", f64::INFINITY, "t1").is_err());
        assert!(TradeRecord::new("BTC", 0.0, "t1").is_ok());
    }

    #[test]
    fn rejects_blank_fields() {
        assert!(TradeRecord::new("  ", 1.0, "t1").is_err());
        assert!(TradeRecord::new("BTC", 1.0, "").is_err());
    }

    #[test]
    fn payload_uses_raw_field_names() {
        let rec = TradeRecord::new("So11111111111111111111111111111111111111112", 0.25, "2024-03-01T00:00:00Z")
            .unwrap();
        let v: serde_json::Value = serde_json::from_slice(&rec.to_payload().unwrap()).unwrap();
        assert_eq!(v["token_address"], "So11111111111111111111111111111111111111112");
        assert_eq!(v["price_in_sol"], 0.25);
        assert_eq!(v["block_time"], "2024-03-01T00:00:00Z");
    }
}
