//! The resolution ladder: identifier, exact name, alias, fuzzy, unresolved.
//! First hit wins within its confidence band; failures are answers too.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use filing_spine_core::config::ResolverConfig;
use filing_spine_core::models::{ResolutionMethod, Scheme};

use crate::normalize::{canonical_name, normalize_ticker};
use crate::snapshot::{OwnerClaim, SpineSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionWarning {
    /// Fuzzy candidates too close together, or exact names colliding
    Ambiguous,
    /// The identifier is known but no claim covers as_of
    NoActiveClaim,
    /// The store tier could not honor the temporal query
    AsOfIgnored,
    /// Merge redirects form a cycle; resolved to the original id
    RedirectCycle,
}

/// Outcome of one resolution attempt. An unresolved outcome is still a
/// valid answer: the mention persists and backfill can revisit it.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub entity_id: Option<Uuid>,
    pub method: ResolutionMethod,
    pub confidence: f64,
    pub warnings: Vec<ResolutionWarning>,
}

impl Resolution {
    fn unresolved(warnings: Vec<ResolutionWarning>) -> Resolution {
        Resolution {
            entity_id: None,
            method: ResolutionMethod::Unresolved,
            confidence: 0.0,
            warnings,
        }
    }
}

/// Context the ladder consults beyond the raw text
#[derive(Debug, Clone, Default)]
pub struct ResolutionContext {
    /// The filing's resolved filer, when known
    pub filer_entity_id: Option<Uuid>,
    /// Surrounding sentence, available to downstream curation
    pub sentence: Option<String>,
}

static TICKER_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{1,5}(?:[.-][A-Z]{1,2})?$").expect("static ticker regex"));

/// Identifier scheme a candidate's shape implies, if any
fn identifier_shape(text: &str) -> Option<(Scheme, String)> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.len() <= 10 && trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Some((Scheme::Cik, format!("{:0>10}", trimmed)));
    }
    if trimmed.len() == 20 && trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Some((Scheme::Lei, trimmed.to_uppercase()));
    }
    if trimmed.len() == 9 && trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Some((Scheme::Cusip, trimmed.to_uppercase()));
    }
    let ticker = normalize_ticker(trimmed);
    if ticker == trimmed.to_uppercase() && TICKER_SHAPE.is_match(&ticker) {
        return Some((Scheme::Ticker, ticker));
    }
    None
}

pub struct Resolver {
    snapshot: Arc<SpineSnapshot>,
    config: ResolverConfig,
}

impl Resolver {
    pub fn new(snapshot: Arc<SpineSnapshot>, config: ResolverConfig) -> Self {
        Self { snapshot, config }
    }

    pub fn snapshot(&self) -> &SpineSnapshot {
        &self.snapshot
    }

    /// Resolve a candidate span as of a point in time.
    pub fn resolve(
        &self,
        candidate: &str,
        _ctx: &ResolutionContext,
        as_of: NaiveDate,
    ) -> Resolution {
        // Rung 1: exact identifier match
        if let Some((scheme, value)) = identifier_shape(candidate) {
            let claims = self.snapshot.identifier_claims(scheme, &value);
            if !claims.is_empty() {
                return self.resolve_identifier(claims, as_of);
            }
            // A ticker-shaped token that is not a known identifier falls
            // through: short uppercase names ("TSMC") are names too.
            if scheme != Scheme::Ticker {
                return Resolution::unresolved(vec![]);
            }
        }

        // Rung 2: exact name match on canonical or historical names
        let named = self.snapshot.entities_named(candidate);
        if !named.is_empty() {
            let mut distinct: Vec<Uuid> = named.to_vec();
            distinct.sort();
            distinct.dedup();
            if distinct.len() > 1 {
                return Resolution::unresolved(vec![ResolutionWarning::Ambiguous]);
            }
            return self.finish(distinct[0], ResolutionMethod::Exact, 1.0, vec![]);
        }

        // Rung 3: alias match
        let aliases = self.snapshot.alias_entries(candidate);
        if !aliases.is_empty() {
            let mut distinct: Vec<Uuid> = aliases.iter().map(|a| a.entity_id).collect();
            distinct.sort();
            distinct.dedup();
            if distinct.len() > 1 {
                return Resolution::unresolved(vec![ResolutionWarning::Ambiguous]);
            }
            let best = aliases
                .iter()
                .map(|a| a.kind.confidence())
                .fold(f64::MIN, f64::max);
            return self.finish(distinct[0], ResolutionMethod::Alias, best, vec![]);
        }

        // Rung 4: fuzzy over canonicalized names
        self.resolve_fuzzy(candidate)
    }

    fn resolve_identifier(&self, claims: &[OwnerClaim], as_of: NaiveDate) -> Resolution {
        let mut covering: Vec<&OwnerClaim> = claims.iter().filter(|c| c.covers(as_of)).collect();

        if covering.is_empty() {
            return Resolution::unresolved(vec![ResolutionWarning::NoActiveClaim]);
        }

        if covering.len() > 1 {
            // Ticker collision: prefer the claim whose listing's exchange
            // ranks highest in the configured ordering
            covering.sort_by_key(|c| self.exchange_rank(c.exchange.as_deref()));
        }

        self.finish(covering[0].entity_id, ResolutionMethod::Exact, 1.0, vec![])
    }

    fn exchange_rank(&self, exchange: Option<&str>) -> usize {
        exchange
            .and_then(|e| {
                self.config
                    .exchange_priority
                    .iter()
                    .position(|p| p.eq_ignore_ascii_case(e))
            })
            .unwrap_or(usize::MAX)
    }

    fn resolve_fuzzy(&self, candidate: &str) -> Resolution {
        let needle = canonical_name(candidate);
        if needle.is_empty() {
            return Resolution::unresolved(vec![]);
        }

        let mut best: Option<(f64, Uuid)> = None;
        let mut second: f64 = 0.0;

        for name in self.snapshot.fuzzy_pool() {
            let score = strsim::jaro_winkler(&needle, &name.normalized);
            match best {
                Some((best_score, best_id)) => {
                    if score > best_score {
                        if best_id != name.entity_id {
                            second = best_score;
                        }
                        best = Some((score, name.entity_id));
                    } else if name.entity_id != best_id && score > second {
                        second = score;
                    }
                }
                None => best = Some((score, name.entity_id)),
            }
        }

        let Some((score, entity_id)) = best else {
            return Resolution::unresolved(vec![]);
        };

        if score < self.config.fuzzy_threshold {
            return Resolution::unresolved(vec![]);
        }
        if score - second < self.config.fuzzy_margin {
            return Resolution::unresolved(vec![ResolutionWarning::Ambiguous]);
        }

        self.finish(entity_id, ResolutionMethod::Fuzzy, score, vec![])
    }

    fn finish(
        &self,
        entity_id: Uuid,
        method: ResolutionMethod,
        confidence: f64,
        mut warnings: Vec<ResolutionWarning>,
    ) -> Resolution {
        let (canonical, cycle) = self.snapshot.resolve_redirect(entity_id);
        if cycle {
            warnings.push(ResolutionWarning::RedirectCycle);
        }
        Resolution {
            entity_id: Some(canonical),
            method,
            confidence,
            warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::AliasKindView;

    fn config() -> ResolverConfig {
        ResolverConfig {
            fuzzy_threshold: 0.92,
            fuzzy_margin: 0.03,
            exchange_priority: vec!["NYSE".to_string(), "Nasdaq".to_string(), "OTC".to_string()],
            source_precedence: vec!["sec_submissions".to_string(), "sec_tickers".to_string()],
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn ticker_claim(
        entity: Uuid,
        exchange: &str,
        from: NaiveDate,
        to: Option<NaiveDate>,
    ) -> OwnerClaim {
        OwnerClaim {
            entity_id: entity,
            exchange: Some(exchange.to_string()),
            valid_from: from,
            valid_to: to,
            status: "ACTIVE".to_string(),
        }
    }

    #[test]
    fn test_ticker_reuse_resolves_by_as_of() {
        // REQUIREMENT: Tickers reused after delisting resolve to different
        // entities depending on as_of; a gap resolves to nobody with
        // NO_ACTIVE_CLAIM (spec scenario B)

        let company_a = Uuid::new_v4();
        let company_b = Uuid::new_v4();

        let snapshot = SpineSnapshot::builder()
            .claim(
                Scheme::Ticker,
                "XYZ",
                ticker_claim(company_a, "NYSE", d(2005, 1, 1), Some(d(2018, 6, 30))),
            )
            .claim(
                Scheme::Ticker,
                "XYZ",
                ticker_claim(company_b, "Nasdaq", d(2020, 3, 15), None),
            )
            .build();
        let resolver = Resolver::new(Arc::new(snapshot), config());
        let ctx = ResolutionContext::default();

        let in_a = resolver.resolve("XYZ", &ctx, d(2010, 1, 1));
        assert_eq!(in_a.entity_id, Some(company_a));
        assert_eq!(in_a.method, ResolutionMethod::Exact);
        assert_eq!(in_a.confidence, 1.0);

        let in_b = resolver.resolve("XYZ", &ctx, d(2022, 1, 1));
        assert_eq!(in_b.entity_id, Some(company_b));

        let gap = resolver.resolve("XYZ", &ctx, d(2019, 1, 1));
        assert_eq!(gap.entity_id, None);
        assert!(gap.warnings.contains(&ResolutionWarning::NoActiveClaim));
    }

    #[test]
    fn test_ticker_collision_breaks_on_exchange_priority() {
        // REQUIREMENT: Ticker collisions prefer the claim whose listing's
        // exchange ranks highest in the configured ordering
        let on_otc = Uuid::new_v4();
        let on_nyse = Uuid::new_v4();

        let snapshot = SpineSnapshot::builder()
            .claim(
                Scheme::Ticker,
                "DUAL",
                ticker_claim(on_otc, "OTC", d(2020, 1, 1), None),
            )
            .claim(
                Scheme::Ticker,
                "DUAL",
                ticker_claim(on_nyse, "NYSE", d(2020, 1, 1), None),
            )
            .build();
        let resolver = Resolver::new(Arc::new(snapshot), config());

        let hit = resolver.resolve("DUAL", &ResolutionContext::default(), d(2023, 1, 1));
        assert_eq!(hit.entity_id, Some(on_nyse));
    }

    #[test]
    fn test_cik_resolves_at_entity_level() {
        let apple = Uuid::new_v4();
        let snapshot = SpineSnapshot::builder()
            .claim(
                Scheme::Cik,
                "0000320193",
                OwnerClaim {
                    entity_id: apple,
                    exchange: None,
                    valid_from: d(1997, 1, 1),
                    valid_to: None,
                    status: "ACTIVE".to_string(),
                },
            )
            .build();
        let resolver = Resolver::new(Arc::new(snapshot), config());

        // Unpadded digits normalize to the padded CIK form
        let hit = resolver.resolve("320193", &ResolutionContext::default(), d(2024, 1, 1));
        assert_eq!(hit.entity_id, Some(apple));
    }

    #[test]
    fn test_exact_name_and_alias_rungs() {
        let apple = Uuid::new_v4();
        let snapshot = SpineSnapshot::builder()
            .name("Apple Inc.", apple)
            .alias("Apple Computer, Inc.", apple, AliasKindView::FormerName)
            .build();
        let resolver = Resolver::new(Arc::new(snapshot), config());
        let ctx = ResolutionContext::default();

        let exact = resolver.resolve("Apple Inc.", &ctx, d(2024, 1, 1));
        assert_eq!(exact.entity_id, Some(apple));
        assert_eq!(exact.method, ResolutionMethod::Exact);

        let alias = resolver.resolve("Apple Computer, Inc.", &ctx, d(2024, 1, 1));
        assert_eq!(alias.entity_id, Some(apple));
        assert_eq!(alias.method, ResolutionMethod::Alias);
        assert!(alias.confidence >= 0.9 && alias.confidence <= 0.99);
    }

    #[test]
    fn test_fuzzy_threshold_and_margin() {
        // REQUIREMENT: Fuzzy matches return only when score >= threshold
        // and the gap to the second-best entity >= margin
        let tsmc = Uuid::new_v4();
        let other = Uuid::new_v4();

        let snapshot = SpineSnapshot::builder()
            .name("Taiwan Semiconductor Manufacturing Company Limited", tsmc)
            .name("Continental Resources Inc", other)
            .build();
        let resolver = Resolver::new(Arc::new(snapshot), config());
        let ctx = ResolutionContext::default();

        // Close misspelling clears both bars (and misses the exact rung)
        let hit = resolver.resolve(
            "Taiwan Semiconductor Manufactuing Co. Ltd.",
            &ctx,
            d(2024, 1, 1),
        );
        assert_eq!(hit.entity_id, Some(tsmc));
        assert_eq!(hit.method, ResolutionMethod::Fuzzy);
        assert!(hit.confidence >= 0.92);

        // Unrelated text clears neither
        let miss = resolver.resolve("Bakery Holdings of Vermont", &ctx, d(2024, 1, 1));
        assert_eq!(miss.entity_id, None);
        assert_eq!(miss.method, ResolutionMethod::Unresolved);
    }

    #[test]
    fn test_ambiguity_produces_warning_not_guess() {
        // Two distinct entities canonicalize to the same name. An exact hit
        // on the shared name is ambiguous, and a fuzzy hit near both fails
        // the margin; neither may guess.
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let snapshot = SpineSnapshot::builder()
            .name("Acme Industries LLC", a)
            .name("Acme Industries Corp", b)
            .build();
        let resolver = Resolver::new(Arc::new(snapshot), config());
        let ctx = ResolutionContext::default();

        let exact_collision = resolver.resolve("Acme Industries Inc", &ctx, d(2024, 1, 1));
        assert_eq!(exact_collision.entity_id, None);
        assert!(exact_collision
            .warnings
            .contains(&ResolutionWarning::Ambiguous));

        // Misspelled candidate: both entities score identically
        let fuzzy_tie = resolver.resolve("Acme Industris", &ctx, d(2024, 1, 1));
        assert_eq!(fuzzy_tie.entity_id, None);
        assert!(fuzzy_tie.warnings.contains(&ResolutionWarning::Ambiguous));
    }

    #[test]
    fn test_resolution_follows_merge_redirects() {
        // REQUIREMENT: Lookups follow redirects transitively
        let old = Uuid::new_v4();
        let survivor = Uuid::new_v4();

        let snapshot = SpineSnapshot::builder()
            .name("Legacy Widgets Corp", old)
            .redirect(old, survivor)
            .build();
        let resolver = Resolver::new(Arc::new(snapshot), config());

        let hit = resolver.resolve(
            "Legacy Widgets Corp",
            &ResolutionContext::default(),
            d(2024, 1, 1),
        );
        assert_eq!(hit.entity_id, Some(survivor));
    }

    #[test]
    fn test_resolution_is_deterministic_for_a_snapshot() {
        // REQUIREMENT: Resolving the same candidate with the same as_of is
        // deterministic given an unchanged snapshot
        let tsmc = Uuid::new_v4();
        let snapshot = Arc::new(SpineSnapshot::builder().name("TSMC", tsmc).build());
        let resolver = Resolver::new(snapshot, config());
        let ctx = ResolutionContext::default();

        let first = resolver.resolve("TSMC", &ctx, d(2024, 1, 1));
        for _ in 0..5 {
            let again = resolver.resolve("TSMC", &ctx, d(2024, 1, 1));
            assert_eq!(again.entity_id, first.entity_id);
            assert_eq!(again.method, first.method);
            assert_eq!(again.confidence, first.confidence);
        }
    }

    #[test]
    fn test_identifier_shapes() {
        assert_eq!(
            identifier_shape("320193"),
            Some((Scheme::Cik, "0000320193".to_string()))
        );
        assert_eq!(
            identifier_shape("AAPL"),
            Some((Scheme::Ticker, "AAPL".to_string()))
        );
        assert_eq!(
            identifier_shape("BRK.B"),
            Some((Scheme::Ticker, "BRK.B".to_string()))
        );
        assert_eq!(
            identifier_shape("HWUPKR0MPOU8FGXBT394"),
            Some((Scheme::Lei, "HWUPKR0MPOU8FGXBT394".to_string()))
        );
        assert_eq!(
            identifier_shape("037833100"),
            Some((Scheme::Cik, "0037833100".to_string()))
        );
        assert_eq!(identifier_shape("Apple Inc."), None);
    }
}
