#![deny(warnings)]

//! Core funding domain for funding-sim.
//!
//! This crate defines the calculator parameter sets, the payment curve shared
//! by both calculator kinds, and the six-hour-day calendar used to render
//! absolute simulated time as display dates.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// Curve coefficients with a magnitude at or below this are treated as absent.
pub const COEFFICIENT_THRESHOLD: f64 = 1e-9;

/// Fallback payout cadence in seconds (thirty six-hour days).
pub const DEFAULT_PAY_PERIOD: f64 = 648_000.0;

/// Pay periods below this many seconds are considered misconfigured.
pub const MIN_PAY_PERIOD: f64 = 60.0;

const SECONDS_PER_MINUTE: i64 = 60;
const SECONDS_PER_HOUR: i64 = SECONDS_PER_MINUTE * 60;
/// Days last six hours, the display convention of the simulated homeworld.
pub const SECONDS_PER_DAY: i64 = SECONDS_PER_HOUR * 6;
const DAYS_PER_MONTH: i64 = 30;

/// Persisted mode string for the flat-curve calculator.
pub const MODE_BASIC: &str = "BasicFunding";
/// Persisted mode string for the reputation-priced calculator.
pub const MODE_REP: &str = "RepFunding";

/// The defined calculator kinds, in cycling order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CalculatorKind {
    Basic,
    Rep,
}

impl CalculatorKind {
    /// Kinds in the order mode switching cycles through them.
    pub const ALL: [CalculatorKind; 2] = [CalculatorKind::Basic, CalculatorKind::Rep];

    /// The mode string stored in configuration documents.
    pub fn as_str(self) -> &'static str {
        match self {
            CalculatorKind::Basic => MODE_BASIC,
            CalculatorKind::Rep => MODE_REP,
        }
    }

    /// Resolve a persisted mode string. Unrecognized modes yield `None`.
    pub fn from_mode(mode: &str) -> Option<CalculatorKind> {
        match mode {
            MODE_BASIC => Some(CalculatorKind::Basic),
            MODE_REP => Some(CalculatorKind::Rep),
            _ => None,
        }
    }
}

/// Parameters of the basic payment curve.
///
/// The n-th payment is `basePay + linearPay*n + sqrtPay*sqrt(n) +
/// logarithmicPay*ln(n)` with `n = index * paymentNumberMultiplier +
/// paymentNumberOffset`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BasicFunding {
    /// Seconds between payouts.
    pub pay_period: f64,
    /// Scale applied to the payment ordinal before curve evaluation.
    pub payment_number_multiplier: f64,
    /// Offset applied to the payment ordinal before curve evaluation.
    pub payment_number_offset: f64,
    /// Flat component, always included.
    pub base_pay: f64,
    /// Coefficient of the linear term.
    pub linear_pay: f64,
    /// Coefficient of the square-root term.
    pub sqrt_pay: f64,
    /// Coefficient of the natural-log term.
    pub logarithmic_pay: f64,
}

impl Default for BasicFunding {
    fn default() -> Self {
        BasicFunding {
            pay_period: DEFAULT_PAY_PERIOD,
            payment_number_multiplier: 0.0,
            payment_number_offset: 0.0,
            base_pay: 0.0,
            linear_pay: 0.0,
            sqrt_pay: 0.0,
            logarithmic_pay: 0.0,
        }
    }
}

impl BasicFunding {
    fn adjusted_index(&self, payment_index: i64) -> f64 {
        payment_index as f64 * self.payment_number_multiplier + self.payment_number_offset
    }

    /// Evaluate the payment curve before truncation.
    ///
    /// The square-root and logarithmic terms clamp the adjusted index to a
    /// minimum of 1, so a negative offset or multiplier cannot produce NaN.
    /// The linear term uses the adjusted index as-is.
    pub fn curve_amount(&self, payment_index: i64) -> f64 {
        let n = self.adjusted_index(payment_index);
        let mut amount = self.base_pay;
        if self.linear_pay.abs() > COEFFICIENT_THRESHOLD {
            amount += self.linear_pay * n;
        }
        if self.sqrt_pay.abs() > COEFFICIENT_THRESHOLD {
            amount += self.sqrt_pay * n.max(1.0).sqrt();
        }
        if self.logarithmic_pay.abs() > COEFFICIENT_THRESHOLD {
            amount += self.logarithmic_pay * n.max(1.0).ln();
        }
        amount
    }

    /// Payment for an ordinal, truncated toward zero to whole currency units.
    ///
    /// Example:
    /// let mut funding = BasicFunding::default();
    /// funding.base_pay = 1000.0;
    /// assert_eq!(funding.payment(1), 1000);
    pub fn payment(&self, payment_index: i64) -> i64 {
        self.curve_amount(payment_index) as i64
    }

    /// Reset a misconfigured pay period to the default cadence.
    pub fn normalize(&mut self) {
        if self.pay_period.is_nan() || self.pay_period < MIN_PAY_PERIOD {
            debug!(
                pay_period = self.pay_period,
                "pay period below floor, using default cadence"
            );
            self.pay_period = DEFAULT_PAY_PERIOD;
        }
    }

    /// Read a parameter by its document key.
    pub fn field(&self, key: &str) -> Option<f64> {
        match key {
            "payPeriod" => Some(self.pay_period),
            "paymentNumberMultiplier" => Some(self.payment_number_multiplier),
            "paymentNumberOffset" => Some(self.payment_number_offset),
            "basePay" => Some(self.base_pay),
            "linearPay" => Some(self.linear_pay),
            "sqrtPay" => Some(self.sqrt_pay),
            "logarithmicPay" => Some(self.logarithmic_pay),
            _ => None,
        }
    }

    /// Write a parameter by its document key. Returns false for unknown keys.
    pub fn set_field(&mut self, key: &str, value: f64) -> bool {
        match key {
            "payPeriod" => self.pay_period = value,
            "paymentNumberMultiplier" => self.payment_number_multiplier = value,
            "paymentNumberOffset" => self.payment_number_offset = value,
            "basePay" => self.base_pay = value,
            "linearPay" => self.linear_pay = value,
            "sqrtPay" => self.sqrt_pay = value,
            "logarithmicPay" => self.logarithmic_pay = value,
            _ => return false,
        }
        true
    }
}

/// Parameters of the reputation-priced payment curve: the basic curve plus a
/// reputation bonus on each payout and a reputation cost after it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RepFunding {
    #[serde(flatten)]
    pub basic: BasicFunding,
    /// Currency granted per point of adjusted reputation.
    pub rep_bonus_payment_rate: f64,
    /// Reputation deducted before the bonus is computed.
    pub rep_bonus_payment_threshold: f64,
    /// Fraction of adjusted reputation spent after each payout.
    pub rep_cost_rate: f64,
}

impl RepFunding {
    /// Reputation counted toward the bonus, after the threshold deduction.
    pub fn adjusted_reputation(&self, current_reputation: f64) -> f64 {
        if self.rep_bonus_payment_threshold > COEFFICIENT_THRESHOLD {
            current_reputation - self.rep_bonus_payment_threshold
        } else {
            current_reputation
        }
    }

    /// Payment for an ordinal at the given reputation, truncated toward zero.
    pub fn payment(&self, payment_index: i64, current_reputation: f64) -> i64 {
        let mut amount = self.basic.curve_amount(payment_index);
        let rep = self.adjusted_reputation(current_reputation);
        if rep > COEFFICIENT_THRESHOLD && self.rep_bonus_payment_rate > COEFFICIENT_THRESHOLD {
            amount += rep * self.rep_bonus_payment_rate;
        }
        amount as i64
    }

    /// Reputation delta owed after a committed payout, if any. Always negative.
    pub fn reputation_cost(&self, current_reputation: f64) -> Option<f64> {
        let rep = self.adjusted_reputation(current_reputation);
        if rep > COEFFICIENT_THRESHOLD && self.rep_cost_rate > COEFFICIENT_THRESHOLD {
            Some(-(rep * self.rep_cost_rate))
        } else {
            None
        }
    }

    pub fn normalize(&mut self) {
        self.basic.normalize();
    }

    /// Read a parameter by its document key.
    pub fn field(&self, key: &str) -> Option<f64> {
        match key {
            "repBonusPaymentRate" => Some(self.rep_bonus_payment_rate),
            "repBonusPaymentThreshold" => Some(self.rep_bonus_payment_threshold),
            "repCostRate" => Some(self.rep_cost_rate),
            _ => self.basic.field(key),
        }
    }

    /// Write a parameter by its document key. Returns false for unknown keys.
    pub fn set_field(&mut self, key: &str, value: f64) -> bool {
        match key {
            "repBonusPaymentRate" => self.rep_bonus_payment_rate = value,
            "repBonusPaymentThreshold" => self.rep_bonus_payment_threshold = value,
            "repCostRate" => self.rep_cost_rate = value,
            _ => return self.basic.set_field(key, value),
        }
        true
    }
}

/// A full funding configuration: the persisted mode string, the lock flag,
/// and the parameter sets for both calculator kinds.
///
/// The mode is kept as the raw persisted string; an unrecognized mode simply
/// resolves to no active calculator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FundingConfig {
    pub mode: String,
    pub locked: bool,
    #[serde(rename = "BasicFunding")]
    pub basic: BasicFunding,
    #[serde(rename = "RepFunding")]
    pub rep: RepFunding,
}

impl FundingConfig {
    /// Resolve the active calculator, if the mode names a defined kind.
    pub fn calculator(&self) -> Option<FundingCalculator<'_>> {
        match CalculatorKind::from_mode(&self.mode)? {
            CalculatorKind::Basic => Some(FundingCalculator::Basic(&self.basic)),
            CalculatorKind::Rep => Some(FundingCalculator::Rep(&self.rep)),
        }
    }

    /// Log the mode and both parameter sets.
    pub fn log_summary(&self) {
        info!(mode = %self.mode, locked = self.locked, "funding configuration");
        debug!(
            pay_period = self.basic.pay_period,
            base_pay = self.basic.base_pay,
            linear_pay = self.basic.linear_pay,
            sqrt_pay = self.basic.sqrt_pay,
            logarithmic_pay = self.basic.logarithmic_pay,
            "basic funding curve"
        );
        debug!(
            pay_period = self.rep.basic.pay_period,
            base_pay = self.rep.basic.base_pay,
            rep_bonus_payment_rate = self.rep.rep_bonus_payment_rate,
            rep_bonus_payment_threshold = self.rep.rep_bonus_payment_threshold,
            rep_cost_rate = self.rep.rep_cost_rate,
            "reputation funding curve"
        );
    }
}

/// Borrowed view of the active calculator.
#[derive(Clone, Copy, Debug)]
pub enum FundingCalculator<'a> {
    Basic(&'a BasicFunding),
    Rep(&'a RepFunding),
}

impl FundingCalculator<'_> {
    pub fn kind(&self) -> CalculatorKind {
        match self {
            FundingCalculator::Basic(_) => CalculatorKind::Basic,
            FundingCalculator::Rep(_) => CalculatorKind::Rep,
        }
    }

    pub fn pay_period(&self) -> f64 {
        match self {
            FundingCalculator::Basic(c) => c.pay_period,
            FundingCalculator::Rep(c) => c.basic.pay_period,
        }
    }

    /// Payment for an ordinal. The reputation snapshot is ignored by the
    /// basic kind and defaults to zero for the reputation kind.
    pub fn payment(&self, payment_index: i64, reputation: Option<f64>) -> i64 {
        match self {
            FundingCalculator::Basic(c) => c.payment(payment_index),
            FundingCalculator::Rep(c) => c.payment(payment_index, reputation.unwrap_or(0.0)),
        }
    }

    /// Reputation deduction owed after a committed payout, if any.
    pub fn reputation_cost(&self, reputation: Option<f64>) -> Option<f64> {
        match self {
            FundingCalculator::Basic(_) => None,
            FundingCalculator::Rep(c) => c.reputation_cost(reputation.unwrap_or(0.0)),
        }
    }
}

/// A display date derived from absolute simulated time.
///
/// Year, month, day, and day-of-year are 1-based; months may run past twelve
/// for homeworlds with long years.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Date {
    pub year: i64,
    pub month: i64,
    pub day: i64,
    pub day_of_year: i64,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// The absolute time this date was derived from, in seconds.
    pub ut: f64,
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Year {} Day {}", self.year, self.day_of_year)
    }
}

/// Converts absolute simulated time into display dates.
///
/// The year length comes from the host (the homeworld's orbital period in
/// seconds); days are six hours and months thirty days regardless of it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Calendar {
    seconds_per_year: i64,
}

impl Calendar {
    /// Build a calendar from a year length in seconds. Fractional lengths
    /// are floored; anything shorter than one day counts as one day.
    pub fn new(year_length_seconds: f64) -> Self {
        let floored = if year_length_seconds.is_finite() {
            year_length_seconds.floor() as i64
        } else {
            0
        };
        Calendar {
            seconds_per_year: floored.max(SECONDS_PER_DAY),
        }
    }

    /// Whole seconds in one year of this calendar.
    pub fn seconds_per_year(&self) -> i64 {
        self.seconds_per_year
    }

    /// Convert an absolute time to a display date.
    ///
    /// Example:
    /// let calendar = Calendar::new(9_203_544.6);
    /// let date = calendar.date_of(0.0);
    /// assert_eq!((date.year, date.day_of_year), (1, 1));
    pub fn date_of(&self, ut: f64) -> Date {
        let seconds_per_year = self.seconds_per_year as f64;
        let mut t = ut;

        let year = (t / seconds_per_year).floor() as i64;
        t -= year as f64 * seconds_per_year;

        let day_of_year = (t / SECONDS_PER_DAY as f64).floor() as i64;
        t -= (day_of_year * SECONDS_PER_DAY) as f64;

        let hour = (t / SECONDS_PER_HOUR as f64).floor() as i64;
        t -= (hour * SECONDS_PER_HOUR) as f64;

        let minute = (t / SECONDS_PER_MINUTE as f64).floor() as i64;
        t -= (minute * SECONDS_PER_MINUTE) as f64;

        let month = day_of_year / DAYS_PER_MONTH;
        let day = day_of_year - month * DAYS_PER_MONTH;

        Date {
            year: year + 1,
            month: month + 1,
            day: day + 1,
            day_of_year: day_of_year + 1,
            hour: hour as u8,
            minute: minute as u8,
            second: t as u8,
            ut,
        }
    }
}
