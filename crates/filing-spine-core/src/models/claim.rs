use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::database::DatabasePool;
use crate::error::{AppError, AppResult};
use crate::schema::identifier_claims;

/// Level of the identifier hierarchy a claim attaches to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OwnerType {
    Entity,
    Security,
    Listing,
}

impl OwnerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerType::Entity => "ENTITY",
            OwnerType::Security => "SECURITY",
            OwnerType::Listing => "LISTING",
        }
    }

    pub fn parse(s: &str) -> Option<OwnerType> {
        match s.to_uppercase().as_str() {
            "ENTITY" => Some(OwnerType::Entity),
            "SECURITY" => Some(OwnerType::Security),
            "LISTING" => Some(OwnerType::Listing),
            _ => None,
        }
    }
}

/// Identifier schemes and the hierarchy level each belongs to.
/// CIK/LEI/EIN identify the entity, CUSIP/ISIN/FIGI the security,
/// TICKER the listing. Claims at the wrong level are refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scheme {
    Cik,
    Lei,
    Ein,
    Cusip,
    Isin,
    Figi,
    Ticker,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Cik => "CIK",
            Scheme::Lei => "LEI",
            Scheme::Ein => "EIN",
            Scheme::Cusip => "CUSIP",
            Scheme::Isin => "ISIN",
            Scheme::Figi => "FIGI",
            Scheme::Ticker => "TICKER",
        }
    }

    pub fn parse(s: &str) -> Option<Scheme> {
        match s.to_uppercase().as_str() {
            "CIK" => Some(Scheme::Cik),
            "LEI" => Some(Scheme::Lei),
            "EIN" => Some(Scheme::Ein),
            "CUSIP" => Some(Scheme::Cusip),
            "ISIN" => Some(Scheme::Isin),
            "FIGI" => Some(Scheme::Figi),
            "TICKER" => Some(Scheme::Ticker),
            _ => None,
        }
    }

    pub fn owner_level(&self) -> OwnerType {
        match self {
            Scheme::Cik | Scheme::Lei | Scheme::Ein => OwnerType::Entity,
            Scheme::Cusip | Scheme::Isin | Scheme::Figi => OwnerType::Security,
            Scheme::Ticker => OwnerType::Listing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimStatus {
    Active,
    Inactive,
    Superseded,
    Disputed,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Active => "ACTIVE",
            ClaimStatus::Inactive => "INACTIVE",
            ClaimStatus::Superseded => "SUPERSEDED",
            ClaimStatus::Disputed => "DISPUTED",
        }
    }
}

/// A time-bounded assertion that an identifier belongs to an owner.
/// Claims are closed by setting valid_to; they are never edited in place.
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = identifier_claims)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct IdentifierClaim {
    pub id: Uuid,
    pub owner_type: String,
    pub owner_id: Uuid,
    pub scheme: String,
    pub value: String,
    pub valid_from: NaiveDate,
    pub valid_to: Option<NaiveDate>,
    pub status: String,
    pub source: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable, Validate, Deserialize)]
#[diesel(table_name = identifier_claims)]
pub struct NewIdentifierClaim {
    pub owner_type: String,
    pub owner_id: Uuid,
    pub scheme: String,
    #[validate(length(min = 1, max = 50))]
    pub value: String,
    pub valid_from: NaiveDate,
    pub valid_to: Option<NaiveDate>,
    pub status: String,
    #[validate(length(min = 1, max = 50))]
    pub source: String,
    #[validate(range(min = 0.0, max = 1.0))]
    pub confidence: f64,
}

impl IdentifierClaim {
    /// True when this claim covers the given date: valid_from inclusive,
    /// valid_to exclusive, null valid_to = open.
    pub fn covers(&self, as_of: NaiveDate) -> bool {
        self.valid_from <= as_of && self.valid_to.map_or(true, |end| as_of < end)
    }

    /// Record a new claim, serializing writes per (scheme, value) and
    /// refusing an ACTIVE claim that overlaps another owner's ACTIVE claim
    /// in time. Historical reassignment requires the prior claim closed.
    pub async fn record(
        pool: &DatabasePool,
        new_claim: &NewIdentifierClaim,
    ) -> AppResult<IdentifierClaim> {
        use crate::schema::identifier_claims::dsl;

        new_claim.validate()?;

        let scheme = Scheme::parse(&new_claim.scheme).ok_or_else(|| {
            AppError::Validation(format!("unknown identifier scheme {}", new_claim.scheme))
        })?;
        let owner = OwnerType::parse(&new_claim.owner_type).ok_or_else(|| {
            AppError::Validation(format!("unknown owner type {}", new_claim.owner_type))
        })?;
        if scheme.owner_level() != owner {
            return Err(AppError::Validation(format!(
                "{} claims belong on {}, not {}",
                scheme.as_str(),
                scheme.owner_level().as_str(),
                owner.as_str()
            )));
        }
        if let Some(end) = new_claim.valid_to {
            if end <= new_claim.valid_from {
                return Err(AppError::Validation(
                    "claim valid_to must be after valid_from".to_string(),
                ));
            }
        }

        let mut conn = pool.get().await?;
        let new_claim = new_claim.clone();

        conn.transaction::<IdentifierClaim, AppError, _>(|conn| {
            async move {
                // Lock the claim set for this (scheme, value) so concurrent
                // writers see each other's rows.
                let existing: Vec<IdentifierClaim> = dsl::identifier_claims
                    .filter(dsl::scheme.eq(&new_claim.scheme))
                    .filter(dsl::value.eq(&new_claim.value))
                    .for_update()
                    .load(conn)
                    .await?;

                if new_claim.status == ClaimStatus::Active.as_str() {
                    for claim in &existing {
                        if claim.status != ClaimStatus::Active.as_str() {
                            continue;
                        }
                        if claim.owner_id == new_claim.owner_id
                            && claim.owner_type == new_claim.owner_type
                        {
                            continue;
                        }
                        if ranges_overlap(
                            new_claim.valid_from,
                            new_claim.valid_to,
                            claim.valid_from,
                            claim.valid_to,
                        ) {
                            return Err(AppError::Conflict(format!(
                                "active {} claim {} overlaps owner {} in [{}, {:?})",
                                new_claim.scheme,
                                new_claim.value,
                                claim.owner_id,
                                claim.valid_from,
                                claim.valid_to
                            )));
                        }
                    }
                }

                let claim = diesel::insert_into(dsl::identifier_claims)
                    .values(&new_claim)
                    .get_result(conn)
                    .await?;
                Ok(claim)
            }
            .scope_boxed()
        })
        .await
    }

    /// Close an open claim. Closing is the only mutation claims admit.
    pub async fn close(
        pool: &DatabasePool,
        claim_id: Uuid,
        valid_to: NaiveDate,
        status: ClaimStatus,
    ) -> AppResult<IdentifierClaim> {
        use crate::schema::identifier_claims::dsl;

        let mut conn = pool.get().await?;
        let claim = diesel::update(
            dsl::identifier_claims
                .filter(dsl::id.eq(claim_id))
                .filter(dsl::valid_to.is_null()),
        )
        .set((dsl::valid_to.eq(valid_to), dsl::status.eq(status.as_str())))
        .get_result::<IdentifierClaim>(&mut conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found(format!("open claim {}", claim_id)))?;
        Ok(claim)
    }

    /// Claims for a (scheme, value) whose validity covers as_of
    pub async fn active_at(
        pool: &DatabasePool,
        scheme: Scheme,
        value: &str,
        as_of: NaiveDate,
    ) -> AppResult<Vec<IdentifierClaim>> {
        use crate::schema::identifier_claims::dsl;

        let mut conn = pool.get().await?;
        let rows = dsl::identifier_claims
            .filter(dsl::scheme.eq(scheme.as_str()))
            .filter(dsl::value.eq(value))
            .filter(dsl::status.eq(ClaimStatus::Active.as_str()))
            .filter(dsl::valid_from.le(as_of))
            .filter(dsl::valid_to.is_null().or(dsl::valid_to.gt(as_of)))
            .load::<IdentifierClaim>(&mut conn)
            .await?;
        Ok(rows)
    }

    /// All claims attached to an owner, ordered by valid_from
    pub async fn for_owner(
        pool: &DatabasePool,
        owner_type: OwnerType,
        owner_id: Uuid,
    ) -> AppResult<Vec<IdentifierClaim>> {
        use crate::schema::identifier_claims::dsl;

        let mut conn = pool.get().await?;
        let rows = dsl::identifier_claims
            .filter(dsl::owner_type.eq(owner_type.as_str()))
            .filter(dsl::owner_id.eq(owner_id))
            .order(dsl::valid_from.asc())
            .load::<IdentifierClaim>(&mut conn)
            .await?;
        Ok(rows)
    }

    /// Every claim of a scheme, for snapshot loading
    pub async fn all_of_scheme(pool: &DatabasePool, scheme: Scheme) -> AppResult<Vec<IdentifierClaim>> {
        use crate::schema::identifier_claims::dsl;

        let mut conn = pool.get().await?;
        let rows = dsl::identifier_claims
            .filter(dsl::scheme.eq(scheme.as_str()))
            .load::<IdentifierClaim>(&mut conn)
            .await?;
        Ok(rows)
    }
}

/// Half-open [from, to) interval overlap; None = unbounded
fn ranges_overlap(
    a_from: NaiveDate,
    a_to: Option<NaiveDate>,
    b_from: NaiveDate,
    b_to: Option<NaiveDate>,
) -> bool {
    let a_before_b_end = b_to.map_or(true, |end| a_from < end);
    let b_before_a_end = a_to.map_or(true, |end| b_from < end);
    a_before_b_end && b_before_a_end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestContainer;
    use serial_test::serial;

    fn ticker_claim(
        owner: Uuid,
        value: &str,
        from: (i32, u32, u32),
        to: Option<(i32, u32, u32)>,
    ) -> NewIdentifierClaim {
        NewIdentifierClaim {
            owner_type: OwnerType::Listing.as_str().to_string(),
            owner_id: owner,
            scheme: Scheme::Ticker.as_str().to_string(),
            value: value.to_string(),
            valid_from: NaiveDate::from_ymd_opt(from.0, from.1, from.2).unwrap(),
            valid_to: to.map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap()),
            status: ClaimStatus::Active.as_str().to_string(),
            source: "sec_tickers".to_string(),
            confidence: 1.0,
        }
    }

    #[test]
    fn test_ranges_overlap() {
        let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day).unwrap();

        // Disjoint closed ranges
        assert!(!ranges_overlap(
            d(2005, 1, 1),
            Some(d(2018, 6, 30)),
            d(2020, 3, 15),
            None
        ));
        // Adjacent ranges do not overlap (half-open)
        assert!(!ranges_overlap(
            d(2005, 1, 1),
            Some(d(2018, 6, 30)),
            d(2018, 6, 30),
            None
        ));
        // Contained range overlaps
        assert!(ranges_overlap(
            d(2010, 1, 1),
            Some(d(2012, 1, 1)),
            d(2005, 1, 1),
            None
        ));
    }

    #[test]
    fn test_scheme_hierarchy_levels() {
        // REQUIREMENT: TICKER lives on Listing, CUSIP/ISIN/FIGI on Security,
        // CIK/LEI/EIN on Entity
        assert_eq!(Scheme::Ticker.owner_level(), OwnerType::Listing);
        assert_eq!(Scheme::Cusip.owner_level(), OwnerType::Security);
        assert_eq!(Scheme::Cik.owner_level(), OwnerType::Entity);
    }

    #[test]
    fn test_covers_is_half_open() {
        let claim = IdentifierClaim {
            id: Uuid::new_v4(),
            owner_type: "LISTING".to_string(),
            owner_id: Uuid::new_v4(),
            scheme: "TICKER".to_string(),
            value: "XYZ".to_string(),
            valid_from: NaiveDate::from_ymd_opt(2005, 1, 1).unwrap(),
            valid_to: NaiveDate::from_ymd_opt(2018, 6, 30),
            status: "ACTIVE".to_string(),
            source: "sec_tickers".to_string(),
            confidence: 1.0,
            created_at: Utc::now(),
        };

        assert!(claim.covers(NaiveDate::from_ymd_opt(2005, 1, 1).unwrap()));
        assert!(claim.covers(NaiveDate::from_ymd_opt(2010, 1, 1).unwrap()));
        // A claim closed on date D is not returned for as_of >= D
        assert!(!claim.covers(NaiveDate::from_ymd_opt(2018, 6, 30).unwrap()));
    }

    #[tokio::test]
    #[serial]
    async fn test_overlapping_active_claims_are_rejected() {
        // REQUIREMENT: No two ACTIVE claims for one (scheme, value) may
        // overlap in time on different owners
        // PURPOSE: Verify the write-time overlap guard and that closed prior
        // claims permit ticker reuse

        let container = TestContainer::new().await;
        let pool = container.pool();

        let listing_a = Uuid::new_v4();
        let listing_b = Uuid::new_v4();

        IdentifierClaim::record(pool, &ticker_claim(listing_a, "XYZ", (2005, 1, 1), None))
            .await
            .unwrap();

        // Open claim on A blocks B entirely
        let overlap =
            IdentifierClaim::record(pool, &ticker_claim(listing_b, "XYZ", (2020, 3, 15), None))
                .await;
        assert!(matches!(overlap, Err(AppError::Conflict(_))));

        // Close A, then B's claim is admissible
        let open = IdentifierClaim::active_at(
            pool,
            Scheme::Ticker,
            "XYZ",
            NaiveDate::from_ymd_opt(2010, 1, 1).unwrap(),
        )
        .await
        .unwrap();
        IdentifierClaim::close(
            pool,
            open[0].id,
            NaiveDate::from_ymd_opt(2018, 6, 30).unwrap(),
            ClaimStatus::Inactive,
        )
        .await
        .unwrap();

        IdentifierClaim::record(pool, &ticker_claim(listing_b, "XYZ", (2020, 3, 15), None))
            .await
            .unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn test_active_at_honors_temporal_bounds() {
        // REQUIREMENT: as_of selects claims by [valid_from, valid_to)
        // PURPOSE: Ticker reuse must resolve to different owners by date

        let container = TestContainer::new().await;
        let pool = container.pool();

        let listing_a = Uuid::new_v4();
        let listing_b = Uuid::new_v4();

        IdentifierClaim::record(
            pool,
            &ticker_claim(listing_a, "XYZ", (2005, 1, 1), Some((2018, 6, 30))),
        )
        .await
        .unwrap();
        IdentifierClaim::record(pool, &ticker_claim(listing_b, "XYZ", (2020, 3, 15), None))
            .await
            .unwrap();

        let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day).unwrap();

        let in_a = IdentifierClaim::active_at(pool, Scheme::Ticker, "XYZ", d(2010, 1, 1))
            .await
            .unwrap();
        assert_eq!(in_a.len(), 1);
        assert_eq!(in_a[0].owner_id, listing_a);

        let in_b = IdentifierClaim::active_at(pool, Scheme::Ticker, "XYZ", d(2022, 1, 1))
            .await
            .unwrap();
        assert_eq!(in_b.len(), 1);
        assert_eq!(in_b[0].owner_id, listing_b);

        // Gap between the claims: nobody holds the ticker
        let gap = IdentifierClaim::active_at(pool, Scheme::Ticker, "XYZ", d(2019, 1, 1))
            .await
            .unwrap();
        assert!(gap.is_empty());
    }

    #[tokio::test]
    #[serial]
    async fn test_wrong_hierarchy_level_is_refused() {
        // REQUIREMENT: Hierarchy rules are inviolable
        // PURPOSE: A TICKER claim attached to an Entity must be rejected

        let container = TestContainer::new().await;
        let pool = container.pool();

        let mut wrong = ticker_claim(Uuid::new_v4(), "AAPL", (2020, 1, 1), None);
        wrong.owner_type = OwnerType::Entity.as_str().to_string();

        let result = IdentifierClaim::record(pool, &wrong).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
