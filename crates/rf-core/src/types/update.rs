//! The fan-out wire message.
//!
//! [`Update`] is what the gateway consumes from the broker and pushes to
//! viewers, one JSON object per WebSocket frame:
//!
//! ```json
//! {"token":"BTC","time":"2024-03-01T00:00:00Z","price":101.5,"indicator":54.2}
//! ```

use serde::{Deserialize, Serialize};

use super::trade::TradeRecord;
use crate::error::FeedError;

/// A per-token price/indicator point. Immutable once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub token: String,
    pub time: String,
    pub price: f64,
    /// Indicator value computed upstream. Older payloads name this field `rsi`.
    #[serde(default, alias = "rsi")]
    pub indicator: f64,
}

impl Update {
    /// Decode a topic payload.
    ///
    /// Accepts the Update shape, or a raw trade payload which maps to an Update
    /// with `indicator = 0.0`.
    pub fn decode(payload: &[u8]) -> Result<Self, FeedError> {
        if let Ok(update) = serde_json::from_slice::<Update>(payload) {
            return Ok(update);
        }
        match serde_json::from_slice::<TradeRecord>(payload) {
            Ok(trade) => {
                trade.validate()?;
                Ok(trade.into())
            }
            Err(e) => Err(FeedError::Parse(format!("undecodable payload: {e}"))),
        }
    }

    /// Encode as a JSON text frame.
    pub fn to_json(&self) -> Result<String, FeedError> {
        serde_json::to_string(self).map_err(|e| FeedError::Parse(e.to_string()))
    }
}

impl From<TradeRecord> for Update {
    fn from(trade: TradeRecord) -> Self {
        Self { token: trade.token_address, time: trade.block_time, price: trade.price_in_sol, indicator: 0.0 }
    }
}

impl std::fmt::Display for Update {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Update({} {:.8} ind={:.2} @ {})", self.token, self.price, self.indicator, self.time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_update_shape() {
        let u = Update::decode(br#"{"token":"BTC","time":"t1","price":100.0,"indicator":55.5}"#).unwrap();
        assert_eq!(u.token, "BTC");
        assert_eq!(u.time, "t1");
        assert!((u.price - 100.0).abs() < 1e-12);
        assert!((u.indicator - 55.5).abs() < 1e-12);
    }

    #[test]
    fn decode_legacy_rsi_field() {
        let u = Update::decode(br#"{"token":"ETH","time":"t2","price":50.0,"rsi":70.0}"#).unwrap();
        assert!((u.indicator - 70.0).abs() < 1e-12);
    }

    #[test]
    fn decode_raw_trade_payload() {
        let u = Update::decode(br#"{"token_address":"SOL","price_in_sol":1.25,"block_time":"t3"}"#).unwrap();
        assert_eq!(u, Update { token: "SOL".into(), time: "t3".into(), price: 1.25, indicator: 0.0 });
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Update::decode(b"not json").is_err());
        assert!(Update::decode(br#"{"token":"BTC"}"#).is_err());
        assert!(Update::decode(br#"{"token_address":"SOL","price_in_sol":-3.0,"block_time":"t"}"#).is_err());
    }

    #[test]
    fn json_field_names() {
        let u = Update { token: "BTC".into(), time: "t1".into(), price: 1.0, indicator: 2.0 };
        let v: serde_json::Value = serde_json::from_str(&u.to_json().unwrap()).unwrap();
        assert_eq!(v["token"], "BTC");
        assert_eq!(v["time"], "t1");
        assert_eq!(v["price"], 1.0);
        assert_eq!(v["indicator"], 2.0);
    }
}
