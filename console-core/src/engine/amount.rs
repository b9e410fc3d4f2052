//! Amount policies and inter-task interval sampling.

use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::time::Duration;

use super::AssetKind;
use crate::error::ValidationError;

/// Fractional digits kept for random draws and remainder amounts.
pub const AMOUNT_PRECISION: u32 = 6;

/// Longest pause between tasks, in seconds.
pub const MAX_INTERVAL_SECS: f64 = 86_400.0;

const MICRO_UNITS: u64 = 10u64.pow(AMOUNT_PRECISION);

/// Largest bound a random range accepts; draws happen in micro-units.
pub fn max_random_amount() -> Decimal {
    Decimal::MAX / Decimal::from(MICRO_UNITS)
}

/// Amount chosen for one task, plus whether it is worth sending at all.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedAmount {
    pub amount: Decimal,
    pub eligible: bool,
}

impl ResolvedAmount {
    fn clamped(amount: Decimal) -> Self {
        if amount > Decimal::ZERO {
            Self {
                amount,
                eligible: true,
            }
        } else {
            Self {
                amount: Decimal::ZERO,
                eligible: false,
            }
        }
    }
}

/// How each task's amount is derived. Built only through the validating
/// constructors, so a policy in hand is always well formed.
#[derive(Debug, Clone, PartialEq)]
pub enum AmountPolicy {
    Fixed(FixedAmount),
    FullBalance(FullBalance),
    RandomRange(RandomRange),
    RemainingAbove(RemainingAbove),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FixedAmount {
    value: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FullBalance {
    native_reserve: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RandomRange {
    min: Decimal,
    max: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemainingAbove {
    keep: Decimal,
}

impl AmountPolicy {
    pub fn fixed(value: Decimal) -> Result<Self, ValidationError> {
        if value <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount {
                field: "amount".to_string(),
            });
        }
        Ok(AmountPolicy::Fixed(FixedAmount { value }))
    }

    /// `native_reserve` is only subtracted for native-asset batches.
    pub fn full_balance(native_reserve: Decimal) -> Result<Self, ValidationError> {
        if native_reserve.is_sign_negative() {
            return Err(ValidationError::NegativeAmount {
                field: "native_reserve".to_string(),
            });
        }
        Ok(AmountPolicy::FullBalance(FullBalance { native_reserve }))
    }

    pub fn random_range(min: Decimal, max: Decimal) -> Result<Self, ValidationError> {
        if min <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount {
                field: "min".to_string(),
            });
        }
        if max <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount {
                field: "max".to_string(),
            });
        }
        let limit = max_random_amount();
        if max > limit {
            return Err(ValidationError::AmountTooLarge {
                field: "max".to_string(),
                limit: limit.trunc().to_string(),
            });
        }
        if min > max {
            return Err(ValidationError::InvalidRange {
                min: min.to_string(),
                max: max.to_string(),
            });
        }
        Ok(AmountPolicy::RandomRange(RandomRange { min, max }))
    }

    pub fn remaining_above(keep: Decimal) -> Result<Self, ValidationError> {
        if keep.is_sign_negative() {
            return Err(ValidationError::NegativeAmount {
                field: "keep".to_string(),
            });
        }
        Ok(AmountPolicy::RemainingAbove(RemainingAbove { keep }))
    }

    /// Whether resolution depends on the source balance.
    pub fn needs_balance(&self) -> bool {
        matches!(
            self,
            AmountPolicy::FullBalance(_) | AmountPolicy::RemainingAbove(_)
        )
    }

    /// `balance` is ignored by policies that do not need it.
    /// `override_amount` only applies to [`AmountPolicy::Fixed`].
    pub fn resolve<R: Rng + ?Sized>(
        &self,
        balance: Decimal,
        asset: AssetKind,
        override_amount: Option<Decimal>,
        rng: &mut R,
    ) -> ResolvedAmount {
        match self {
            AmountPolicy::Fixed(p) => p.resolve(override_amount),
            AmountPolicy::FullBalance(p) => p.resolve(balance, asset),
            AmountPolicy::RandomRange(p) => p.resolve(rng),
            AmountPolicy::RemainingAbove(p) => p.resolve(balance),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            AmountPolicy::Fixed(p) => format!("fixed {}", p.value),
            AmountPolicy::FullBalance(p) => format!("full balance (reserve {})", p.native_reserve),
            AmountPolicy::RandomRange(p) => format!("random {}..={}", p.min, p.max),
            AmountPolicy::RemainingAbove(p) => format!("all above {}", p.keep),
        }
    }
}

impl FixedAmount {
    fn resolve(&self, override_amount: Option<Decimal>) -> ResolvedAmount {
        ResolvedAmount::clamped(override_amount.unwrap_or(self.value))
    }
}

impl FullBalance {
    fn resolve(&self, balance: Decimal, asset: AssetKind) -> ResolvedAmount {
        match asset {
            AssetKind::Token => ResolvedAmount::clamped(balance),
            AssetKind::Native => {
                if balance <= self.native_reserve {
                    return ResolvedAmount::clamped(Decimal::ZERO);
                }
                ResolvedAmount::clamped(truncate(balance - self.native_reserve))
            }
        }
    }
}

impl RandomRange {
    fn resolve<R: Rng + ?Sized>(&self, rng: &mut R) -> ResolvedAmount {
        let scale = Decimal::from(MICRO_UNITS);
        let lo = self.min.checked_mul(scale).and_then(|v| v.ceil().to_i128());
        let hi = self.max.checked_mul(scale).and_then(|v| v.floor().to_i128());

        let amount = match (lo, hi) {
            (Some(lo), Some(hi)) if lo <= hi => {
                Decimal::from_i128_with_scale(rng.gen_range(lo..=hi), AMOUNT_PRECISION)
                    .normalize()
            }
            // No micro-unit step fits inside the range.
            _ => self.min,
        };
        ResolvedAmount::clamped(amount)
    }
}

impl RemainingAbove {
    fn resolve(&self, balance: Decimal) -> ResolvedAmount {
        if balance <= self.keep {
            return ResolvedAmount::clamped(Decimal::ZERO);
        }
        ResolvedAmount::clamped(truncate(balance - self.keep))
    }
}

fn truncate(value: Decimal) -> Decimal {
    value
        .round_dp_with_strategy(AMOUNT_PRECISION, RoundingStrategy::ToZero)
        .normalize()
}

/// Pause between consecutive tasks, drawn uniformly from `[min, max]` seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalRange {
    min_secs: f64,
    max_secs: f64,
}

impl IntervalRange {
    /// A max below min collapses the range to min. Negative or non-finite
    /// bounds count as zero; bounds above [`MAX_INTERVAL_SECS`] are capped.
    pub fn new(min_secs: f64, max_secs: f64) -> Self {
        let min_secs = sanitize(min_secs);
        let max_secs = sanitize(max_secs).max(min_secs);
        Self { min_secs, max_secs }
    }

    pub fn none() -> Self {
        Self::new(0.0, 0.0)
    }

    pub fn min_secs(&self) -> f64 {
        self.min_secs
    }

    pub fn max_secs(&self) -> f64 {
        self.max_secs
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.max_secs <= self.min_secs {
            return Duration::from_secs_f64(self.min_secs);
        }
        Duration::from_secs_f64(rng.gen_range(self.min_secs..=self.max_secs))
    }
}

impl Default for IntervalRange {
    fn default() -> Self {
        Self::new(3.0, 8.0)
    }
}

fn sanitize(secs: f64) -> f64 {
    if secs.is_finite() && secs > 0.0 {
        secs.min(MAX_INTERVAL_SECS)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_random_draw_has_six_decimals() {
        let policy = AmountPolicy::random_range(d("0.1"), d("0.2")).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let resolved = policy.resolve(Decimal::ZERO, AssetKind::Native, None, &mut rng);
            assert!(resolved.eligible);
            assert!(resolved.amount >= d("0.1") && resolved.amount <= d("0.2"));
            assert!(resolved.amount.scale() <= AMOUNT_PRECISION);
        }
    }

    #[test]
    fn test_range_without_micro_step_falls_back_to_min() {
        let policy = AmountPolicy::random_range(d("0.0000001"), d("0.0000009")).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let resolved = policy.resolve(Decimal::ZERO, AssetKind::Native, None, &mut rng);
        assert_eq!(resolved.amount, d("0.0000001"));
    }

    #[test]
    fn test_interval_collapses_inverted_range() {
        let interval = IntervalRange::new(5.0, 2.0);
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(interval.sample(&mut rng), Duration::from_secs(5));
        assert_eq!(IntervalRange::new(-1.0, f64::NAN).max_secs(), 0.0);
    }

    #[test]
    fn test_huge_interval_is_capped() {
        let interval = IntervalRange::new(1e300, 1e308);
        assert_eq!(interval.max_secs(), MAX_INTERVAL_SECS);
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(
            interval.sample(&mut rng),
            Duration::from_secs_f64(MAX_INTERVAL_SECS)
        );
    }

    #[test]
    fn test_random_range_rejects_unscalable_bound() {
        let err = AmountPolicy::random_range(d("1"), d("79228162514264337593543950")).unwrap_err();
        assert!(matches!(err, ValidationError::AmountTooLarge { .. }));

        let limit = max_random_amount().trunc();
        let policy = AmountPolicy::random_range(d("1"), limit).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let resolved = policy.resolve(Decimal::ZERO, AssetKind::Native, None, &mut rng);
        assert!(resolved.eligible);
        assert!(resolved.amount >= d("1") && resolved.amount <= limit);
    }
}
