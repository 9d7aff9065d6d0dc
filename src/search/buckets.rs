//! Price histogram policy shared by every search backend.
//!
//! Both the engine aggregation and the relational fallback count documents
//! against the same boundaries and go through [`normalize_metrics`], so the
//! two code paths always agree on the shape of a metrics snapshot.

use std::fmt;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};

use crate::models::{GameMetrics, PriceBucket};

/// Ascending, strictly positive upper edges. `[50, 100, 200]` yields
/// `[0,50) [50,100) [100,200) [200,∞)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketPolicy {
    bounds: Vec<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketPolicyError(String);

impl fmt::Display for BucketPolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid price buckets: {}", self.0)
    }
}

impl std::error::Error for BucketPolicyError {}

impl BucketPolicy {
    pub fn new(bounds: Vec<Decimal>) -> Result<Self, BucketPolicyError> {
        if bounds.is_empty() {
            return Err(BucketPolicyError("at least one boundary is required".into()));
        }
        if bounds.iter().any(|b| *b <= Decimal::ZERO) {
            return Err(BucketPolicyError("boundaries must be positive".into()));
        }
        if bounds.windows(2).any(|w| w[0] >= w[1]) {
            return Err(BucketPolicyError("boundaries must be strictly ascending".into()));
        }
        Ok(Self { bounds })
    }

    /// `[0,w) [w,2w) … [upper,∞)`.
    pub fn fixed_width(width: Decimal, upper: Decimal) -> Result<Self, BucketPolicyError> {
        if width <= Decimal::ZERO || upper < width {
            return Err(BucketPolicyError(format!("width {width} / upper bound {upper}")));
        }
        let mut bounds = Vec::new();
        let mut edge = width;
        while edge <= upper {
            bounds.push(edge);
            edge += width;
        }
        Self::new(bounds)
    }

    pub fn bounds(&self) -> &[Decimal] {
        &self.bounds
    }

    /// `(from, to)` pairs in ascending order; the last one is open-ended.
    pub fn ranges(&self) -> Vec<(Decimal, Option<Decimal>)> {
        let mut out = Vec::with_capacity(self.bounds.len() + 1);
        let mut from = Decimal::ZERO;
        for b in &self.bounds {
            out.push((from, Some(*b)));
            from = *b;
        }
        out.push((from, None));
        out
    }

    pub fn len(&self) -> usize {
        self.bounds.len() + 1
    }

    /// Index of the bucket holding `price`.
    pub fn bucket_of(&self, price: Decimal) -> usize {
        self.bounds.iter().take_while(|b| price >= **b).count()
    }

    /// Stable key for the bucket starting at `from`, used to name engine
    /// range buckets.
    pub fn key_for(from: Decimal) -> String {
        format!("from_{}", from.normalize())
    }
}

impl Default for BucketPolicy {
    fn default() -> Self {
        Self {
            bounds: vec![Decimal::from(50), Decimal::from(100), Decimal::from(200)],
        }
    }
}

impl FromStr for BucketPolicy {
    type Err = BucketPolicyError;

    /// Comma separated boundaries, e.g. `50,100,200`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bounds = s
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| Decimal::from_str(p).map_err(|_| BucketPolicyError(format!("'{p}' is not a number"))))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(bounds)
    }
}

/// Raw aggregation output before normalization.
#[derive(Debug, Default, Clone)]
pub struct RawMetrics {
    pub count: u64,
    pub avg: Option<Decimal>,
    pub min: Option<Decimal>,
    pub max: Option<Decimal>,
    /// `(from, doc_count)` as reported by the backend; may be empty or partial.
    pub buckets: Vec<(Decimal, u64)>,
}

/// Builds the external snapshot: every policy bucket present, missing ones
/// counted as zero, price stats nulled on an empty catalog, average rounded
/// to cents.
pub fn normalize_metrics(policy: &BucketPolicy, raw: RawMetrics) -> GameMetrics {
    let buckets = policy
        .ranges()
        .into_iter()
        .map(|(from, to)| PriceBucket {
            from,
            to,
            doc_count: raw
                .buckets
                .iter()
                .filter(|(f, _)| *f == from)
                .map(|(_, c)| *c)
                .sum(),
        })
        .collect();

    if raw.count == 0 {
        return GameMetrics {
            count: 0,
            avg_price: None,
            min_price: None,
            max_price: None,
            buckets,
        };
    }

    GameMetrics {
        count: raw.count,
        avg_price: raw
            .avg
            .map(|a| a.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)),
        min_price: raw.min.map(|m| m.round_dp(2)),
        max_price: raw.max.map(|m| m.round_dp(2)),
        buckets,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(v: i64) -> Decimal {
        Decimal::from(v)
    }

    #[test]
    fn default_policy_has_four_buckets() {
        let p = BucketPolicy::default();
        assert_eq!(p.len(), 4);
        assert_eq!(
            p.ranges(),
            vec![
                (d(0), Some(d(50))),
                (d(50), Some(d(100))),
                (d(100), Some(d(200))),
                (d(200), None),
            ]
        );
    }

    #[test]
    fn bucket_of_uses_half_open_intervals() {
        let p = BucketPolicy::default();
        assert_eq!(p.bucket_of(d(0)), 0);
        assert_eq!(p.bucket_of("49.99".parse().unwrap()), 0);
        assert_eq!(p.bucket_of(d(50)), 1);
        assert_eq!(p.bucket_of(d(199)), 2);
        assert_eq!(p.bucket_of(d(200)), 3);
        assert_eq!(p.bucket_of(d(10_000)), 3);
    }

    #[test]
    fn fixed_width_matches_explicit_bounds() {
        let p = BucketPolicy::fixed_width(d(10), d(30)).unwrap();
        assert_eq!(p.bounds(), &[d(10), d(20), d(30)]);
        assert!(BucketPolicy::fixed_width(d(0), d(30)).is_err());
    }

    #[test]
    fn parses_from_config_string() {
        let p: BucketPolicy = " 50, 100 ,200 ".parse().unwrap();
        assert_eq!(p, BucketPolicy::default());
        assert!("100,50".parse::<BucketPolicy>().is_err());
        assert!("0,50".parse::<BucketPolicy>().is_err());
        assert!("abc".parse::<BucketPolicy>().is_err());
        assert!("".parse::<BucketPolicy>().is_err());
    }

    #[test]
    fn empty_input_yields_all_zero_buckets_and_null_stats() {
        let policy = BucketPolicy::default();
        let from_empty_list = normalize_metrics(&policy, RawMetrics::default());
        let from_zero_buckets = normalize_metrics(
            &policy,
            RawMetrics {
                count: 0,
                avg: Some(d(0)),
                buckets: policy.ranges().iter().map(|(f, _)| (*f, 0)).collect(),
                ..Default::default()
            },
        );

        assert_eq!(from_empty_list, from_zero_buckets);
        assert_eq!(from_empty_list.count, 0);
        assert_eq!(from_empty_list.avg_price, None);
        assert_eq!(from_empty_list.min_price, None);
        assert_eq!(from_empty_list.max_price, None);
        assert_eq!(from_empty_list.buckets.len(), 4);
        assert!(from_empty_list.buckets.iter().all(|b| b.doc_count == 0));
    }

    #[test]
    fn partial_buckets_are_filled_in() {
        let m = normalize_metrics(
            &BucketPolicy::default(),
            RawMetrics {
                count: 3,
                avg: Some("33.3333".parse().unwrap()),
                min: Some(d(10)),
                max: Some(d(60)),
                buckets: vec![(d(0), 2), (d(50), 1)],
            },
        );
        assert_eq!(m.avg_price, Some("33.33".parse().unwrap()));
        let counts: Vec<u64> = m.buckets.iter().map(|b| b.doc_count).collect();
        assert_eq!(counts, vec![2, 1, 0, 0]);
        assert_eq!(m.buckets[3].to, None);
    }
}
