//! Auction mechanism configuration.
//!
//! A [`Mechanism`] is a single tagged variant per concrete auction family.
//! All configuration is validated at construction; the clearing kernel can
//! therefore assume every mechanism value it receives is well formed.

use rust_decimal::{
    Decimal,
    MathematicalOps as _,
};
use serde::{
    Deserialize,
    Serialize,
};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MechanismError {
    #[error("supply schedule must contain at least one point")]
    EmptySupplySchedule,
    #[error("supply schedule points must be non-decreasing in price and quantity")]
    NonMonotoneSupply,
    #[error("supply schedule point at price `{0}` lies outside [floor, ceiling]")]
    PointOutOfBounds(Decimal),
    #[error("price floor `{floor}` must be strictly below price ceiling `{ceiling}`")]
    InvalidPriceBounds { floor: Decimal, ceiling: Decimal },
    #[error("supply quantities must be non-negative")]
    NegativeSupply,
    #[error("refund rate `{0}` must lie within [0, 1]")]
    InvalidRefundRate(Decimal),
    #[error("prize distribution must be non-empty with non-negative weights")]
    InvalidPrizeDistribution,
    #[error("top-k prize structure requires k >= 1, got `{0}`")]
    InvalidTopK(usize),
    #[error("combinatorial auctions support at most 64 items, got `{0}`")]
    TooManyItems(u32),
    #[error(
        "augmented tie-break weights must be non-negative and sum to at most 1, got ({w_q}, {w_t})"
    )]
    InvalidTieBreakWeights { w_q: f64, w_t: f64 },
}

/// How ties between equally priced bids are broken.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum TieBreakRule {
    /// Pick one tied bid uniformly at random. Deterministic for a fixed seed.
    Random { seed: u64 },
    /// Pick the tied bid with the earliest ingress timestamp.
    FirstCome,
    /// Pick the tied bid whose bidder id is lexicographically largest.
    HighestId,
    /// Keep the whole tied set; the caller divides the remaining allocation
    /// pro-rata by quantity.
    Proportional,
    /// Score tied bids by `w_q * ln(1 + quantity) + w_t * (-timestamp)` and
    /// order them highest score first.
    Augmented { quantity_weight: f64, time_weight: f64 },
}

impl TieBreakRule {
    /// Validates rule parameters.
    ///
    /// # Errors
    /// Returns an error for augmented weights that are negative or sum
    /// above 1.
    pub fn validate(&self) -> Result<(), MechanismError> {
        if let Self::Augmented {
            quantity_weight: w_q,
            time_weight: w_t,
        } = *self
        {
            if w_q < 0.0 || w_t < 0.0 || w_q + w_t > 1.0 {
                return Err(MechanismError::InvalidTieBreakWeights { w_q, w_t });
            }
        }
        Ok(())
    }
}

/// Interpolation model applied between two adjacent supply schedule points.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElasticityModel {
    Linear,
    Exponential,
    Logarithmic,
}

/// A single `(price, quantity)` point of a supply schedule.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SupplyPoint {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// A monotone non-decreasing supply function `S(p)` over `[floor, ceiling]`.
///
/// Supply is defined by an ordered set of points. Below the first point the
/// schedule is flat at the first quantity, above the last point it is flat at
/// the last quantity, and between points it follows the configured
/// [`ElasticityModel`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SupplySchedule {
    points: Vec<SupplyPoint>,
    model: ElasticityModel,
    price_floor: Decimal,
    price_ceiling: Decimal,
}

impl SupplySchedule {
    /// Builds a schedule from ordered points.
    ///
    /// # Errors
    /// Returns an error if the point set is empty or not monotone
    /// non-decreasing, if any point lies outside `[floor, ceiling]`, or if
    /// the bounds are inverted.
    pub fn new(
        points: Vec<SupplyPoint>,
        model: ElasticityModel,
        price_floor: Decimal,
        price_ceiling: Decimal,
    ) -> Result<Self, MechanismError> {
        if price_floor >= price_ceiling {
            return Err(MechanismError::InvalidPriceBounds {
                floor: price_floor,
                ceiling: price_ceiling,
            });
        }
        if points.is_empty() {
            return Err(MechanismError::EmptySupplySchedule);
        }
        for pair in points.windows(2) {
            if pair[1].price < pair[0].price || pair[1].quantity < pair[0].quantity {
                return Err(MechanismError::NonMonotoneSupply);
            }
        }
        for point in &points {
            if point.quantity.is_sign_negative() {
                return Err(MechanismError::NegativeSupply);
            }
            if point.price < price_floor || point.price > price_ceiling {
                return Err(MechanismError::PointOutOfBounds(point.price));
            }
        }
        Ok(Self {
            points,
            model,
            price_floor,
            price_ceiling,
        })
    }

    /// A flat schedule offering `quantity` at every price in the band.
    ///
    /// # Errors
    /// Returns an error if the bounds are inverted or `quantity` is negative.
    pub fn flat(
        quantity: Decimal,
        price_floor: Decimal,
        price_ceiling: Decimal,
    ) -> Result<Self, MechanismError> {
        Self::new(
            vec![SupplyPoint {
                price: price_floor,
                quantity,
            }],
            ElasticityModel::Linear,
            price_floor,
            price_ceiling,
        )
    }

    #[must_use]
    pub fn price_floor(&self) -> Decimal {
        self.price_floor
    }

    #[must_use]
    pub fn price_ceiling(&self) -> Decimal {
        self.price_ceiling
    }

    /// Evaluates `S(p)`, clamping `p` into `[floor, ceiling]`.
    #[must_use]
    pub fn quantity_at(&self, price: Decimal) -> Decimal {
        let price = price.clamp(self.price_floor, self.price_ceiling);
        let first = self.points.first().expect("schedule is never empty");
        if price <= first.price {
            return first.quantity;
        }
        let last = self.points.last().expect("schedule is never empty");
        if price >= last.price {
            return last.quantity;
        }
        let right = self
            .points
            .iter()
            .position(|point| point.price >= price)
            .expect("price is below the last point");
        let hi = self.points[right];
        let lo = self.points[right - 1];
        if hi.price == lo.price {
            return hi.quantity;
        }
        let t = (price - lo.price) / (hi.price - lo.price);
        interpolate(lo.quantity, hi.quantity, t, self.model)
    }
}

/// Interpolates between `lo` and `hi` at parameter `t` in `[0, 1]`.
fn interpolate(lo: Decimal, hi: Decimal, t: Decimal, model: ElasticityModel) -> Decimal {
    match model {
        ElasticityModel::Linear => lo + (hi - lo) * t,
        ElasticityModel::Exponential => {
            // lo * (hi/lo)^t, defined only for positive endpoints.
            if lo <= Decimal::ZERO || hi <= Decimal::ZERO {
                return lo + (hi - lo) * t;
            }
            let ratio = hi / lo;
            lo * (t * ratio.ln()).exp()
        }
        ElasticityModel::Logarithmic => {
            // Front-loaded growth: ln(1 + 9t) / ln(10) maps [0,1] onto [0,1].
            let nine = Decimal::from(9);
            let ten = Decimal::from(10);
            lo + (hi - lo) * ((Decimal::ONE + nine * t).ln() / ten.ln())
        }
    }
}

/// Uniform-price auction with an elastic supply schedule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UniformElastic {
    pub schedule: SupplySchedule,
    pub tie_break: TieBreakRule,
    /// Bisection convergence tolerance for the clearing price search.
    pub tolerance: Decimal,
}

impl UniformElastic {
    /// # Errors
    /// Returns an error if the tie-break rule is invalid.
    pub fn new(schedule: SupplySchedule, tie_break: TieBreakRule) -> Result<Self, MechanismError> {
        tie_break.validate()?;
        Ok(Self {
            schedule,
            tie_break,
            tolerance: Decimal::new(1, 6),
        })
    }
}

/// How the prize pool of an all-pay auction is distributed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "structure", rename_all = "snake_case")]
pub enum PrizeStructure {
    WinnerTakesAll,
    /// Prize shares pro-rata to bid amounts.
    Proportional,
    /// The top `k` bidders split the prize by `distribution` weights,
    /// normalized to sum to 1.
    TopK { k: usize, distribution: Vec<Decimal> },
}

/// All-pay auction: every participant pays, winners split the prize.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AllPay {
    pub prize_structure: PrizeStructure,
    /// Fraction of a losing bid refunded to its bidder.
    pub refund_rate: Decimal,
}

impl AllPay {
    /// # Errors
    /// Returns an error if the refund rate is outside `[0, 1]` or the prize
    /// distribution is empty, negative, or sums to zero.
    pub fn new(prize_structure: PrizeStructure, refund_rate: Decimal) -> Result<Self, MechanismError> {
        if refund_rate.is_sign_negative() || refund_rate > Decimal::ONE {
            return Err(MechanismError::InvalidRefundRate(refund_rate));
        }
        if let PrizeStructure::TopK {
            k,
            ref distribution,
        } = prize_structure
        {
            if k == 0 {
                return Err(MechanismError::InvalidTopK(k));
            }
            if distribution.is_empty()
                || distribution.len() != k
                || distribution.iter().any(Decimal::is_sign_negative)
                || distribution.iter().sum::<Decimal>() == Decimal::ZERO
            {
                return Err(MechanismError::InvalidPrizeDistribution);
            }
        }
        Ok(Self {
            prize_structure,
            refund_rate,
        })
    }
}

/// Single-round combinatorial auction over a small item universe.
///
/// Each bid names a bundle of items (a bitmask over `num_items`) in its
/// metadata; winner determination maximizes total bid value subject to every
/// item being allocated at most once.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Combinatorial {
    pub num_items: u32,
    /// Bid counts at or below this threshold are cross-checked against an
    /// exhaustive search in tests.
    pub exhaustive_threshold: usize,
}

impl Combinatorial {
    /// # Errors
    /// Returns an error if the item universe exceeds 64 items.
    pub fn new(num_items: u32) -> Result<Self, MechanismError> {
        if num_items > 64 {
            return Err(MechanismError::TooManyItems(num_items));
        }
        Ok(Self {
            num_items,
            exhaustive_threshold: 20,
        })
    }
}

/// The family of sealed-bid mechanisms the clearing kernel understands.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mechanism", rename_all = "snake_case")]
pub enum Mechanism {
    /// Highest bid wins and pays its own amount.
    FirstPrice,
    /// Highest bid wins and pays the second-highest amount.
    Vickrey,
    UniformElastic(UniformElastic),
    AllPay(AllPay),
    Combinatorial(Combinatorial),
}

impl Mechanism {
    /// Short stable name used in events and log fields.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::FirstPrice => "first_price",
            Self::Vickrey => "vickrey",
            Self::UniformElastic(_) => "uniform_elastic",
            Self::AllPay(_) => "all_pay",
            Self::Combinatorial(_) => "combinatorial",
        }
    }
}
