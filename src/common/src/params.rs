//! Persisted trading parameters.
//!
//! These values control the analyzer filters and entry sizing. They can
//! be changed at runtime through the control plane and are saved to a
//! JSON file in the data directory.

use std::path::Path;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("failed to read/write params file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse params file: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid parameters: {0}")]
    Invalid(String),
}

/// Adjustable trading parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingParams {
    // Spread filters
    pub min_spread: Decimal,
    pub max_spread: Decimal,

    // Volume filters
    pub min_volume_usd: Decimal,
    pub min_depth_usd: Decimal,
    pub max_duration_hours: u32,

    // Capital limits
    pub capital_per_trade: Decimal,
    pub max_open_positions: u32,
    pub max_total_exposure: Decimal,

    // Execution
    /// Offset applied to the best bid when recommending quote prices.
    pub order_offset: Decimal,
    /// 0 = no automatic timeout close.
    pub position_timeout_seconds: u64,
    pub min_time_between_trades: u64,

    /// Optional restriction to specific assets; `None` = all discovered.
    pub target_assets: Option<Vec<String>>,

    // Controls
    pub auto_trading_enabled: bool,
    pub require_confirmation: bool,
}

impl Default for TradingParams {
    fn default() -> Self {
        Self {
            min_spread: dec!(0.06),
            max_spread: dec!(0.25),
            min_volume_usd: dec!(20000),
            min_depth_usd: dec!(50),
            max_duration_hours: 24,
            capital_per_trade: dec!(50),
            max_open_positions: 5,
            max_total_exposure: dec!(500),
            order_offset: dec!(0.01),
            position_timeout_seconds: 0,
            min_time_between_trades: 5,
            target_assets: None,
            auto_trading_enabled: false,
            require_confirmation: true,
        }
    }
}

impl TradingParams {
    /// Validate hard constraints. Invalid parameters must be rejected at
    /// update time, keeping the previous configuration in place.
    pub fn validate(&self) -> Result<(), ParamsError> {
        let mut errors = Vec::new();

        if self.min_spread < dec!(0.01) {
            errors.push("min_spread must be >= 0.01".to_string());
        }
        if self.min_spread > self.max_spread {
            errors.push("min_spread must be <= max_spread".to_string());
        }
        if self.capital_per_trade < dec!(1) {
            errors.push("capital_per_trade must be >= $1".to_string());
        }
        if self.max_open_positions < 1 {
            errors.push("max_open_positions must be >= 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ParamsError::Invalid(errors.join("; ")))
        }
    }

    /// Soft exposure check: worst case of all positions filled at full size.
    pub fn exposure_warning(&self) -> Option<String> {
        let worst_case = self.capital_per_trade * Decimal::from(self.max_open_positions);
        if worst_case > self.max_total_exposure {
            Some(format!(
                "capital_per_trade x max_open_positions (${}) exceeds max_total_exposure (${})",
                worst_case, self.max_total_exposure
            ))
        } else {
            None
        }
    }

    /// Load parameters from a JSON file, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> Result<Self, ParamsError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let params: Self = serde_json::from_str(&contents)?;
        Ok(params)
    }

    /// Save parameters to a JSON file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ParamsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let params = TradingParams::default();
        assert!(params.validate().is_ok());
        assert!(params.exposure_warning().is_none());
    }

    #[test]
    fn test_rejects_inverted_spread_bounds() {
        let params = TradingParams {
            min_spread: dec!(0.30),
            max_spread: dec!(0.25),
            ..Default::default()
        };
        assert!(matches!(params.validate(), Err(ParamsError::Invalid(_))));
    }

    #[test]
    fn test_rejects_tiny_min_spread() {
        let params = TradingParams {
            min_spread: dec!(0.001),
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_exposure_warning() {
        let params = TradingParams {
            capital_per_trade: dec!(200),
            max_open_positions: 5,
            max_total_exposure: dec!(500),
            ..Default::default()
        };
        assert!(params.validate().is_ok());
        assert!(params.exposure_warning().is_some());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params/trading_params.json");

        let params = TradingParams {
            min_spread: dec!(0.08),
            auto_trading_enabled: true,
            target_assets: Some(vec!["BTC".to_string()]),
            ..Default::default()
        };

        params.save(&path).unwrap();
        let loaded = TradingParams::load(&path).unwrap();
        assert_eq!(loaded, params);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = TradingParams::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(loaded, TradingParams::default());
    }

    #[test]
    fn test_load_ignores_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{"min_spread": "0.10"}"#).unwrap();

        let loaded = TradingParams::load(&path).unwrap();
        assert_eq!(loaded.min_spread, dec!(0.10));
        assert_eq!(loaded.max_spread, TradingParams::default().max_spread);
    }
}
