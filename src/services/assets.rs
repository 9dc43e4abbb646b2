//! Asset registry: code canonicalization and pair resolution
//!
//! Kraken reports most assets under native codes (`XXBT`, `ZUSD`, `XXDG`)
//! while order placement and humans use standard tickers (`BTC`, `USD`,
//! `DOGE`). The mapping is a fixed table plus identity for everything else;
//! round-tripping through `standardize` is the canonical form inside the
//! engine. The registry also holds the tradable-pair catalog and answers
//! "is there a market from asset X to the target fiat, and what is its
//! minimum order size?".

use super::exchange::PairInfo;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::RwLock;

/// Primary native code for each recognized standard ticker. `nativize`
/// reads this forward, `standardize` backward.
const CODE_TABLE: &[(&str, &str)] = &[
    ("XXBT", "BTC"),
    ("XETH", "ETH"),
    ("XXDG", "DOGE"),
    ("XXLM", "XLM"),
    ("XXRP", "XRP"),
    ("XLTC", "LTC"),
    ("XETC", "ETC"),
    ("XMLN", "MLN"),
    ("XREP", "REP"),
    ("XZEC", "ZEC"),
    ("XXMR", "XMR"),
    ("ZUSD", "USD"),
    ("ZEUR", "EUR"),
    ("ZGBP", "GBP"),
    ("ZCAD", "CAD"),
    ("ZJPY", "JPY"),
    ("ZAUD", "AUD"),
    ("ZCHF", "CHF"),
];

/// Short-form native spellings the exchange also uses. Lossy: these
/// standardize fine but nativize back to the primary code above.
const NATIVE_ALIASES: &[(&str, &str)] = &[("XBT", "BTC"), ("XDG", "DOGE")];

/// Native -> standard. Identity for anything the table does not know.
pub fn standardize(native: &str) -> String {
    let code = native.trim().to_uppercase();
    for (n, s) in CODE_TABLE.iter().chain(NATIVE_ALIASES) {
        if *n == code {
            return (*s).to_string();
        }
    }
    code
}

/// Standard -> primary native. Identity for anything the table does not know.
pub fn nativize(standard: &str) -> String {
    let code = standard.trim().to_uppercase();
    for (n, s) in CODE_TABLE {
        if *s == code {
            return (*n).to_string();
        }
    }
    code
}

/// Per-ticker minimum-order-size fallbacks for pairs whose catalog entry
/// omits `ordermin`
const MINIMUM_FALLBACKS: &[(&str, Decimal)] = &[
    ("BTC", dec!(0.0001)),
    ("ETH", dec!(0.01)),
    ("DOGE", dec!(20)),
    ("XRP", dec!(10)),
    ("LTC", dec!(0.05)),
    ("SOL", dec!(0.1)),
    ("ADA", dec!(15)),
];

/// Generic floor when neither the catalog nor the fallback table knows
const MINIMUM_FLOOR: Decimal = dec!(0.0001);

#[derive(Debug, Clone)]
pub struct PairEntry {
    /// The exchange's opaque symbol, used verbatim in order placement
    pub pair_symbol: String,
    pub base: String,
    pub quote: String,
    pub ordermin: Option<Decimal>,
}

/// A resolved market from one asset to the target fiat
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPair {
    pub pair_symbol: String,
    pub minimum_order_size: Decimal,
}

/// Catalog of tradable pairs toward one target fiat.
///
/// Effectively immutable after the initial `load`; `refresh` replaces the
/// indexes wholesale and exists for operators, not for correctness.
pub struct AssetRegistry {
    /// Target fiat in standard form
    target_fiat: String,
    /// Indexed by both the pair's native name and its altname
    by_symbol: RwLock<HashMap<String, PairEntry>>,
}

impl AssetRegistry {
    pub fn new(target_fiat: &str) -> Self {
        Self {
            target_fiat: standardize(target_fiat),
            by_symbol: RwLock::new(HashMap::new()),
        }
    }

    /// Populate from the `AssetPairs` catalog
    pub fn load(&self, catalog: HashMap<String, PairInfo>) {
        let mut by_symbol = HashMap::with_capacity(catalog.len() * 2);
        for (name, info) in catalog {
            let entry = PairEntry {
                pair_symbol: name.clone(),
                base: info.base.clone(),
                quote: info.quote.clone(),
                ordermin: info.ordermin,
            };
            by_symbol.insert(info.altname.clone(), entry.clone());
            by_symbol.insert(name, entry);
        }
        *self.by_symbol.write().expect("registry lock poisoned") = by_symbol;
    }

    /// Replace the catalog. Same as `load`; named for intent.
    pub fn refresh(&self, catalog: HashMap<String, PairInfo>) {
        self.load(catalog);
    }

    pub fn pair_count(&self) -> usize {
        self.by_symbol.read().expect("registry lock poisoned").len()
    }

    /// Target fiat in standard form
    pub fn target_fiat(&self) -> &str {
        &self.target_fiat
    }

    /// True when the asset is the target fiat, in either spelling
    pub fn is_target_fiat(&self, asset: &str) -> bool {
        standardize(asset) == self.target_fiat
    }

    /// Resolve the market from `asset` (any spelling) to the target fiat.
    ///
    /// The same economic market can be listed under several symbol
    /// conventions (`XETHZUSD` vs `ETHUSD`), so a small ordered candidate
    /// set is tried against both indexes; the first hit wins.
    pub fn pair_for(&self, asset: &str) -> Option<ResolvedPair> {
        let std_base = standardize(asset);
        let std_quote = &self.target_fiat;
        if std_base == *std_quote {
            return None;
        }
        let native_base = nativize(&std_base);
        let native_quote = nativize(std_quote);

        let mut candidates = vec![
            format!("{}{}", native_base, native_quote),
            format!("{}{}", std_base, std_quote),
            format!("{}{}", native_base, std_quote),
            format!("{}{}", std_base, native_quote),
        ];
        // Short native spellings (XBT, XDG) show up in some listings
        for (alias, standard) in NATIVE_ALIASES {
            if *standard == std_base {
                candidates.push(format!("{}{}", alias, std_quote));
                candidates.push(format!("{}{}", alias, native_quote));
            }
        }

        let by_symbol = self.by_symbol.read().expect("registry lock poisoned");
        for candidate in &candidates {
            if let Some(entry) = by_symbol.get(candidate) {
                let minimum = entry
                    .ordermin
                    .unwrap_or_else(|| fallback_minimum(&std_base));
                return Some(ResolvedPair {
                    pair_symbol: entry.pair_symbol.clone(),
                    minimum_order_size: minimum,
                });
            }
        }
        None
    }

    /// Minimum order size for an asset: exact catalog hit, then the
    /// per-ticker table, then the generic floor.
    pub fn minimum_order_size(&self, asset: &str) -> Decimal {
        match self.pair_for(asset) {
            Some(resolved) => resolved.minimum_order_size,
            None => fallback_minimum(&standardize(asset)),
        }
    }
}

fn fallback_minimum(standard: &str) -> Decimal {
    for (ticker, minimum) in MINIMUM_FALLBACKS {
        if *ticker == standard {
            return *minimum;
        }
    }
    MINIMUM_FLOOR
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> HashMap<String, PairInfo> {
        let mut pairs = HashMap::new();
        pairs.insert(
            "XETHZUSD".to_string(),
            PairInfo {
                altname: "ETHUSD".to_string(),
                base: "XETH".to_string(),
                quote: "ZUSD".to_string(),
                ordermin: Some(dec!(0.01)),
            },
        );
        pairs.insert(
            "XXBTZUSD".to_string(),
            PairInfo {
                altname: "XBTUSD".to_string(),
                base: "XXBT".to_string(),
                quote: "ZUSD".to_string(),
                ordermin: Some(dec!(0.0001)),
            },
        );
        pairs.insert(
            "XDGUSD".to_string(),
            PairInfo {
                altname: "XDGUSD".to_string(),
                base: "XXDG".to_string(),
                quote: "ZUSD".to_string(),
                ordermin: None,
            },
        );
        pairs.insert(
            "SOLUSD".to_string(),
            PairInfo {
                altname: "SOLUSD".to_string(),
                base: "SOL".to_string(),
                quote: "ZUSD".to_string(),
                ordermin: Some(dec!(0.1)),
            },
        );
        pairs
    }

    fn registry() -> AssetRegistry {
        let registry = AssetRegistry::new("USD");
        registry.load(catalog());
        registry
    }

    #[test]
    fn standardize_known_codes() {
        assert_eq!(standardize("XXBT"), "BTC");
        assert_eq!(standardize("XBT"), "BTC");
        assert_eq!(standardize("XXDG"), "DOGE");
        assert_eq!(standardize("ZUSD"), "USD");
        assert_eq!(standardize("SOL"), "SOL");
    }

    #[test]
    fn nativize_known_codes() {
        assert_eq!(nativize("BTC"), "XXBT");
        assert_eq!(nativize("DOGE"), "XXDG");
        assert_eq!(nativize("USD"), "ZUSD");
        assert_eq!(nativize("SOL"), "SOL");
    }

    #[test]
    fn standard_codes_round_trip() {
        for (_, standard) in CODE_TABLE {
            assert_eq!(standardize(&nativize(standard)), *standard);
        }
    }

    #[test]
    fn primary_native_codes_round_trip() {
        for (native, _) in CODE_TABLE {
            assert_eq!(nativize(&standardize(native)), *native);
        }
    }

    #[test]
    fn aliases_standardize_but_lose_spelling() {
        assert_eq!(standardize("XBT"), "BTC");
        assert_eq!(nativize(&standardize("XBT")), "XXBT");
    }

    #[test]
    fn pair_for_resolves_native_concatenation() {
        let resolved = registry().pair_for("ETH").unwrap();
        assert_eq!(resolved.pair_symbol, "XETHZUSD");
        assert_eq!(resolved.minimum_order_size, dec!(0.01));
    }

    #[test]
    fn pair_for_resolves_from_native_spelling() {
        let resolved = registry().pair_for("XETH").unwrap();
        assert_eq!(resolved.pair_symbol, "XETHZUSD");
    }

    #[test]
    fn pair_for_resolves_altname_only_listing() {
        let resolved = registry().pair_for("SOL").unwrap();
        assert_eq!(resolved.pair_symbol, "SOLUSD");
    }

    #[test]
    fn pair_for_memecoin_mangling() {
        // The pair is listed only under the short XDG spelling; the alias
        // candidates must find it from either code form.
        let resolved = registry().pair_for("DOGE").unwrap();
        assert_eq!(resolved.pair_symbol, "XDGUSD");
        let resolved = registry().pair_for("XXDG").unwrap();
        assert_eq!(resolved.pair_symbol, "XDGUSD");
    }

    #[test]
    fn target_fiat_never_resolves() {
        assert!(registry().pair_for("USD").is_none());
        assert!(registry().pair_for("ZUSD").is_none());
    }

    #[test]
    fn unknown_asset_has_no_market() {
        assert!(registry().pair_for("WHAT").is_none());
    }

    #[test]
    fn minimum_cascade() {
        let registry = registry();
        // Exact catalog hit
        assert_eq!(registry.minimum_order_size("ETH"), dec!(0.01));
        // Catalog entry without ordermin falls back to the ticker table
        assert_eq!(registry.minimum_order_size("DOGE"), dec!(20));
        // Nothing known: generic floor
        assert_eq!(registry.minimum_order_size("WHAT"), MINIMUM_FLOOR);
    }

    #[test]
    fn is_target_fiat_both_spellings() {
        let registry = registry();
        assert!(registry.is_target_fiat("USD"));
        assert!(registry.is_target_fiat("ZUSD"));
        assert!(!registry.is_target_fiat("ETH"));
    }
}
