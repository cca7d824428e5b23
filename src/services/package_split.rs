//! Package split arithmetic
//!
//! Breaks a package purchase down into its basis-point allocations
//! (vesting, liquidity pool, treasury, referral). Amounts are computed with
//! BigDecimal and the remainder is assigned to the largest allocation, so
//! the parts always sum exactly to the purchase amount.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{AppError, AppErrorKind, AppResult, DomainError};

pub const TOTAL_BPS: i64 = 10_000;

/// Basis-point terms for a package
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageTerms {
    pub vesting_bps: i64,
    pub pool_bps: i64,
    pub treasury_bps: i64,
    pub referral_bps: i64,
}

impl PackageTerms {
    pub fn total_bps(&self) -> i64 {
        self.vesting_bps + self.pool_bps + self.treasury_bps + self.referral_bps
    }
}

/// Exact USD breakdown of a purchase
#[derive(Debug, Clone, Serialize)]
pub struct SplitBreakdown {
    pub total_usd: String,
    pub vesting_usd: String,
    pub pool_usd: String,
    pub treasury_usd: String,
    pub referral_usd: String,
}

fn bps_share(total: &BigDecimal, bps: i64) -> BigDecimal {
    (total * BigDecimal::from(bps) / BigDecimal::from(TOTAL_BPS)).with_scale(6)
}

fn invalid_split(reason: impl Into<String>) -> AppError {
    AppError::new(AppErrorKind::Domain(DomainError::InvalidPackageSplit {
        reason: reason.into(),
    }))
}

/// Compute the exact split of `amount_usd` under the given terms.
///
/// Every allocation is rounded to 6 decimal places; the rounding remainder
/// lands in the vesting share, which is the dominant allocation in every
/// package.
pub fn compute_split(amount_usd: &str, terms: &PackageTerms) -> AppResult<SplitBreakdown> {
    if terms.vesting_bps < 0 || terms.pool_bps < 0 || terms.treasury_bps < 0 || terms.referral_bps < 0
    {
        return Err(invalid_split("basis points cannot be negative"));
    }
    if terms.total_bps() != TOTAL_BPS {
        return Err(invalid_split(format!(
            "allocations sum to {} bps, expected {}",
            terms.total_bps(),
            TOTAL_BPS
        )));
    }

    let total = BigDecimal::from_str(amount_usd)
        .map_err(|e| invalid_split(format!("invalid amount '{}': {}", amount_usd, e)))?;
    if total <= BigDecimal::from(0) {
        return Err(invalid_split("amount must be greater than 0"));
    }
    let total = total.with_scale(6);

    let pool = bps_share(&total, terms.pool_bps);
    let treasury = bps_share(&total, terms.treasury_bps);
    let referral = bps_share(&total, terms.referral_bps);
    // Remainder absorbs rounding so the parts reconstruct the total exactly
    let vesting = &total - &pool - &treasury - &referral;

    if vesting < BigDecimal::from(0) {
        return Err(invalid_split("rounding left a negative vesting share"));
    }

    Ok(SplitBreakdown {
        total_usd: total.to_string(),
        vesting_usd: vesting.to_string(),
        pool_usd: pool.to_string(),
        treasury_usd: treasury.to_string(),
        referral_usd: referral.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standard_terms() -> PackageTerms {
        PackageTerms {
            vesting_bps: 7000,
            pool_bps: 2000,
            treasury_bps: 500,
            referral_bps: 500,
        }
    }

    fn as_decimal(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn split_parts_sum_exactly_to_total() {
        let split = compute_split("100", &standard_terms()).unwrap();

        let sum = as_decimal(&split.vesting_usd)
            + as_decimal(&split.pool_usd)
            + as_decimal(&split.treasury_usd)
            + as_decimal(&split.referral_usd);
        assert_eq!(sum, as_decimal(&split.total_usd));
        assert_eq!(as_decimal(&split.pool_usd), as_decimal("20.000000"));
        assert_eq!(as_decimal(&split.referral_usd), as_decimal("5.000000"));
    }

    #[test]
    fn awkward_amounts_still_sum_exactly() {
        // 33.333333 against 1/3-ish splits forces rounding in every share
        let terms = PackageTerms {
            vesting_bps: 3334,
            pool_bps: 3333,
            treasury_bps: 3333,
            referral_bps: 0,
        };
        let split = compute_split("33.333333", &terms).unwrap();

        let sum = as_decimal(&split.vesting_usd)
            + as_decimal(&split.pool_usd)
            + as_decimal(&split.treasury_usd)
            + as_decimal(&split.referral_usd);
        assert_eq!(sum, as_decimal(&split.total_usd));
    }

    #[test]
    fn terms_must_sum_to_ten_thousand_bps() {
        let mut terms = standard_terms();
        terms.pool_bps = 1999;
        assert!(compute_split("100", &terms).is_err());
    }

    #[test]
    fn rejects_nonpositive_and_garbage_amounts() {
        assert!(compute_split("0", &standard_terms()).is_err());
        assert!(compute_split("-5", &standard_terms()).is_err());
        assert!(compute_split("abc", &standard_terms()).is_err());
    }
}
