// =============================================================================
// Symbol Filter — allow/deny gate applied at snapshot time
// =============================================================================
//
// A symbol that fails the filter never appears in any snapshot list. The
// watchlist, when non-empty, acts as an allow-list and bypasses the volume
// and change floors (exclusions still apply).

use serde::{Deserialize, Serialize};

/// Base assets treated as stablecoins when `exclude_stablecoins` is set.
const STABLECOIN_BASES: &[&str] = &[
    "USDC", "BUSD", "TUSD", "DAI", "FDUSD", "USDP", "EUR", "AEUR", "PAX",
];

fn default_only_quote() -> String {
    "USDT".to_string()
}

fn default_true() -> bool {
    true
}

/// Filter settings. Every field has a serde default so partial configs load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// 24h quote-volume floor; a symbol must exceed this (strictly) to pass.
    #[serde(default)]
    pub min_volume_24h: f64,

    /// Minimum absolute 24h percent change.
    #[serde(default)]
    pub min_change_24h: f64,

    /// Required quote asset suffix; empty disables the check.
    #[serde(default = "default_only_quote")]
    pub only_quote: String,

    #[serde(default = "default_true")]
    pub exclude_stablecoins: bool,

    /// Symbols always rejected.
    #[serde(default)]
    pub excluded: Vec<String>,

    /// When non-empty, only these symbols pass.
    #[serde(default)]
    pub watchlist: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self::all()
    }
}

impl FilterConfig {
    /// Everything with a USDT quote except stablecoins.
    pub fn all() -> Self {
        Self {
            min_volume_24h: 0.0,
            min_change_24h: 0.0,
            only_quote: default_only_quote(),
            exclude_stablecoins: true,
            excluded: Vec::new(),
            watchlist: Vec::new(),
        }
    }

    /// High-liquidity names only.
    pub fn high_volume() -> Self {
        Self {
            min_volume_24h: 50_000_000.0,
            ..Self::all()
        }
    }

    /// Liquid symbols with a meaningful 24h move.
    pub fn big_movers() -> Self {
        Self {
            min_volume_24h: 10_000_000.0,
            min_change_24h: 5.0,
            ..Self::all()
        }
    }

    /// Majors watchlist.
    pub fn top_tier() -> Self {
        Self {
            watchlist: [
                "BTCUSDT", "ETHUSDT", "BNBUSDT", "SOLUSDT", "XRPUSDT", "ADAUSDT",
                "DOGEUSDT", "AVAXUSDT", "LINKUSDT", "DOTUSDT",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            ..Self::all()
        }
    }

    /// Resolve a named preset.
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "all" => Some(Self::all()),
            "highVolume" => Some(Self::high_volume()),
            "bigMovers" => Some(Self::big_movers()),
            "topTier" => Some(Self::top_tier()),
            _ => None,
        }
    }
}

/// The gate itself. Holds a config snapshot; swap the whole value to retune.
#[derive(Debug, Clone, Default)]
pub struct SymbolFilter {
    config: FilterConfig,
}

impl SymbolFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: FilterConfig) {
        self.config = config;
    }

    /// Whether a symbol passes, judged on its current ticker.
    pub fn pass(&self, symbol: &str, change_24h: f64, quote_volume_24h: f64) -> bool {
        let cfg = &self.config;

        if cfg.excluded.iter().any(|s| s == symbol) {
            return false;
        }

        if !cfg.only_quote.is_empty() && !symbol.ends_with(&cfg.only_quote) {
            return false;
        }

        if cfg.exclude_stablecoins && is_stablecoin(symbol, &cfg.only_quote) {
            return false;
        }

        if !cfg.watchlist.is_empty() {
            return cfg.watchlist.iter().any(|s| s == symbol);
        }

        if quote_volume_24h <= cfg.min_volume_24h && cfg.min_volume_24h > 0.0 {
            return false;
        }

        if change_24h.abs() < cfg.min_change_24h {
            return false;
        }

        true
    }
}

/// A symbol is a stablecoin pair when its base (symbol minus quote suffix)
/// is a known stable asset.
fn is_stablecoin(symbol: &str, quote: &str) -> bool {
    let base = if !quote.is_empty() && symbol.ends_with(quote) {
        &symbol[..symbol.len() - quote.len()]
    } else {
        symbol
    };
    STABLECOIN_BASES.iter().any(|s| *s == base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn big_movers_excludes_stablecoin_even_with_big_move() {
        let filter = SymbolFilter::new(FilterConfig::big_movers());
        // USDC base is a stablecoin; a 20% move does not rescue it.
        assert!(!filter.pass("USDCUSDT", 20.0, 50_000_000.0));
    }

    #[test]
    fn big_movers_includes_liquid_mover() {
        let filter = SymbolFilter::new(FilterConfig::big_movers());
        assert!(filter.pass("DOGEUSDT", 6.0, 20_000_000.0));
    }

    #[test]
    fn volume_floor_is_strict() {
        let filter = SymbolFilter::new(FilterConfig::big_movers());
        // Exactly at the floor is excluded.
        assert!(!filter.pass("DOGEUSDT", 6.0, 10_000_000.0));
        assert!(filter.pass("DOGEUSDT", 6.0, 10_000_001.0));
    }

    #[test]
    fn change_floor_counts_both_directions() {
        let filter = SymbolFilter::new(FilterConfig::big_movers());
        assert!(filter.pass("DOGEUSDT", -6.0, 20_000_000.0));
        assert!(!filter.pass("DOGEUSDT", 4.9, 20_000_000.0));
    }

    #[test]
    fn quote_suffix_is_required() {
        let filter = SymbolFilter::new(FilterConfig::all());
        assert!(!filter.pass("BTCBUSD", 1.0, 1_000_000.0));
        assert!(filter.pass("BTCUSDT", 1.0, 1_000_000.0));
    }

    #[test]
    fn watchlist_acts_as_allow_list() {
        let filter = SymbolFilter::new(FilterConfig::top_tier());
        assert!(filter.pass("BTCUSDT", 0.1, 1_000.0));
        assert!(!filter.pass("PEPEUSDT", 30.0, 500_000_000.0));
    }

    #[test]
    fn excluded_beats_watchlist() {
        let mut cfg = FilterConfig::top_tier();
        cfg.excluded.push("BTCUSDT".to_string());
        let filter = SymbolFilter::new(cfg);
        assert!(!filter.pass("BTCUSDT", 0.1, 1_000.0));
    }

    #[test]
    fn presets_resolve_by_name() {
        for name in ["all", "highVolume", "bigMovers", "topTier"] {
            assert!(FilterConfig::preset(name).is_some(), "missing preset {name}");
        }
        assert!(FilterConfig::preset("nope").is_none());
    }
}
