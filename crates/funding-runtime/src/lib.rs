#![deny(warnings)]

//! Runtime driver for the funding subsystem.
//!
//! Responsibilities:
//! - host integration traits for time, currency, and reputation
//! - the payout ledger and forward payout projection
//! - the payout scheduler (catch-up, one payout per tick, disable on
//!   unusable config)
//! - the `Scenario` session object and its save-document round trip

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use funding_config::{ConfigDoc, ConfigStore};
use funding_core::{Calendar, Date, FundingCalculator, FundingConfig};

/// Source of the current simulation time, in seconds.
pub trait Clock {
    fn now(&self) -> f64;
}

/// Host currency account. Balances are whole currency units.
pub trait CurrencyAccount {
    fn funds(&self) -> i64;
    fn add_funds(&mut self, amount: i64);
}

/// Host reputation account. Adjustments may be rejected by the host.
pub trait ReputationAccount {
    fn reputation(&self) -> f64;
    fn add_reputation(&mut self, delta: f64) -> Result<(), AccountError>;
}

/// Reported by a [`ReputationAccount`] that refused an adjustment.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("account rejected adjustment: {0}")]
pub struct AccountError(pub String);

/// Fixed-time clock for tests and offline runs.
///
/// Example: `let mut clock = ManualClock(0.0); clock.advance(21_600.0);`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ManualClock(pub f64);

impl ManualClock {
    pub fn set(&mut self, now: f64) {
        self.0 = now;
    }

    pub fn advance(&mut self, delta: f64) {
        self.0 += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.0
    }
}

/// One settled payout: when it landed, what it paid, and the account
/// balance right after it was credited.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineItem {
    pub date: Date,
    pub amount: i64,
    pub balance: i64,
}

/// Append-only record of settled payouts, oldest first.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    items: Vec<LineItem>,
}

impl Ledger {
    pub fn entries(&self) -> &[LineItem] {
        &self.items
    }

    pub fn last(&self) -> Option<&LineItem> {
        self.items.last()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Time of the next payout given the active pay period: one period
    /// after the last settled payout, or one period from time zero when
    /// nothing has settled yet.
    pub fn next_payout_time(&self, period: f64) -> f64 {
        match self.items.last() {
            Some(item) => item.date.ut + period,
            None => period,
        }
    }

    fn record(&mut self, item: LineItem) {
        debug_assert!(item.amount > 0);
        self.items.push(item);
    }
}

/// One row of a forward projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectedPayout {
    pub date: Date,
    pub amount: i64,
    /// Sum of projected amounts up to and including this row.
    pub cumulative: i64,
    /// Starting balance plus all projected amounts so far.
    pub balance: i64,
}

/// Iterator over upcoming payouts under the current effective config.
///
/// Reputation is sampled once up front and held constant, so rows are a
/// what-if under today's standing rather than a forecast of it.
#[derive(Debug, Clone)]
pub struct Projection<'a> {
    calculator: FundingCalculator<'a>,
    calendar: Calendar,
    next_time: f64,
    remaining: usize,
    cumulative: i64,
    balance: i64,
    reputation: Option<f64>,
}

impl<'a> Projection<'a> {
    pub fn new(
        calculator: FundingCalculator<'a>,
        calendar: Calendar,
        start_time: f64,
        count: usize,
        starting_balance: i64,
        reputation: Option<f64>,
    ) -> Self {
        Self {
            calculator,
            calendar,
            next_time: start_time,
            remaining: count,
            cumulative: 0,
            balance: starting_balance,
            reputation,
        }
    }
}

impl Iterator for Projection<'_> {
    type Item = ProjectedPayout;

    fn next(&mut self) -> Option<ProjectedPayout> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let period = self.calculator.pay_period();
        let index = (self.next_time / period).round() as i64;
        let amount = self.calculator.payment(index, self.reputation);
        self.cumulative += amount;
        self.balance += amount;

        let row = ProjectedPayout {
            date: self.calendar.date_of(self.next_time),
            amount,
            cumulative: self.cumulative,
            balance: self.balance,
        };
        self.next_time += period;
        Some(row)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Projection<'_> {}

/// Emitted by [`PayoutScheduler::tick`] when a payout settles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PayoutEvent {
    pub date: Date,
    pub payment_index: i64,
    pub amount: i64,
    /// Currency balance after the payout was credited.
    pub balance: i64,
}

/// Drives payouts along the period grid.
///
/// Starts uninitialized; the first tick snaps onto the grid point at or
/// before the current time without paying anything. After that, at most
/// one payout settles per tick, so a long gap is caught up one payout
/// per tick rather than in a single burst.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayoutScheduler {
    last_payout_time: Option<f64>,
    disabled: bool,
}

impl PayoutScheduler {
    pub fn new(last_payout_time: Option<f64>) -> Self {
        Self {
            last_payout_time,
            disabled: false,
        }
    }

    pub fn last_payout_time(&self) -> Option<f64> {
        self.last_payout_time
    }

    /// True once the scheduler has shut itself down over an unusable
    /// config. Disabled is terminal for the life of the value.
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Advances the schedule to `now`, settling at most one payout.
    ///
    /// A payout due strictly before `now` is computed from the active
    /// config, credited to `currency`, and recorded in `ledger`; any
    /// reputation price is then applied to `reputation` without
    /// affecting the already-settled payout. Returns the settled payout,
    /// or `None` when nothing was due.
    pub fn tick(
        &mut self,
        now: f64,
        config: &ConfigStore,
        ledger: &mut Ledger,
        calendar: &Calendar,
        currency: &mut dyn CurrencyAccount,
        mut reputation: Option<&mut dyn ReputationAccount>,
    ) -> Option<PayoutEvent> {
        if self.disabled {
            return None;
        }

        let calculator = match config.calculator() {
            Some(calculator) => calculator,
            None => {
                warn!(mode = %config.effective().mode, "no calculator for mode, disabling payouts");
                self.disabled = true;
                return None;
            }
        };

        let period = calculator.pay_period();
        if !period.is_finite() || period <= 0.0 {
            warn!(period, "unusable pay period, disabling payouts");
            self.disabled = true;
            return None;
        }

        let last = match self.last_payout_time {
            Some(last) => last,
            None => {
                // Snap onto the latest grid point strictly before now.
                let grid = ((now / period).ceil() as i64 - 1).max(0) as f64 * period;
                info!(grid, now, "initialized payout schedule");
                self.last_payout_time = Some(grid);
                grid
            }
        };

        let payout_time = last + period;
        if payout_time >= now {
            return None;
        }

        let payment_index = (payout_time / period).round() as i64;
        let reputation_now = reputation.as_deref().map(|account| account.reputation());
        let amount = calculator.payment(payment_index, reputation_now);

        // The grid advances even for a worthless payout, otherwise a
        // zero-paying config would pin the schedule in place forever.
        self.last_payout_time = Some(payout_time);
        if amount <= 0 {
            debug!(payment_index, amount, "skipping non-positive payout");
            return None;
        }

        let before = currency.funds();
        currency.add_funds(amount);
        let balance = currency.funds();
        let date = calendar.date_of(payout_time);
        ledger.record(LineItem {
            date,
            amount,
            balance,
        });
        info!(payment_index, amount, before, balance, "payout settled");

        if let Some(cost) = calculator.reputation_cost(reputation_now) {
            if let Some(account) = reputation.as_deref_mut() {
                let before = account.reputation();
                match account.add_reputation(cost) {
                    Ok(()) => {
                        info!(before, after = account.reputation(), cost, "reputation charged");
                    }
                    Err(err) => warn!(%err, cost, "reputation charge rejected"),
                }
            }
        }

        Some(PayoutEvent {
            date,
            payment_index,
            amount,
            balance,
        })
    }
}

fn default_last_payout_time() -> i64 {
    -1
}

/// Persisted ledger entry. Times are stored as whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemDoc {
    pub ut: i64,
    pub amount: i64,
    pub balance: i64,
}

/// Save-file shape for one scenario.
///
/// `last_payout_amount` only appears in saves written before the ledger
/// existed; it is consumed during load and never written back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveDoc {
    #[serde(rename = "FundingConfig", default)]
    pub funding_config: ConfigDoc,
    #[serde(rename = "lastPayoutTime", default = "default_last_payout_time")]
    pub last_payout_time: i64,
    #[serde(rename = "History", default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<LineItemDoc>>,
    #[serde(rename = "lastPayoutAmount", default, skip_serializing)]
    pub last_payout_amount: Option<i64>,
}

impl Default for SaveDoc {
    fn default() -> Self {
        Self {
            funding_config: ConfigDoc::default(),
            last_payout_time: -1,
            history: None,
            last_payout_amount: None,
        }
    }
}

/// One running funding session: layered config, payout history, and the
/// scheduler state, bound to a calendar.
#[derive(Debug, Clone)]
pub struct Scenario {
    config: ConfigStore,
    ledger: Ledger,
    scheduler: PayoutScheduler,
    calendar: Calendar,
}

impl Scenario {
    /// Builds a session from definition documents and an optional save.
    ///
    /// Without a save the session starts fresh: empty ledger, scheduler
    /// uninitialized. Saves from before the ledger existed carry only a
    /// last payout; that payout is reconstructed as a single ledger entry
    /// against the current balance.
    pub fn load(
        definitions: &[ConfigDoc],
        save: Option<&SaveDoc>,
        calendar: Calendar,
        current_funds: i64,
    ) -> Self {
        let (config, scheduler, ledger) = match save {
            Some(save) => {
                let config = ConfigStore::load(definitions, Some(&save.funding_config));
                let last_payout_time = if save.last_payout_time < 0 {
                    None
                } else {
                    Some(save.last_payout_time as f64)
                };

                let mut ledger = Ledger::default();
                match &save.history {
                    Some(history) => {
                        for item in history.iter().filter(|item| item.amount > 0) {
                            ledger.record(LineItem {
                                date: calendar.date_of(item.ut as f64),
                                amount: item.amount,
                                balance: item.balance,
                            });
                        }
                    }
                    None => {
                        if save.last_payout_time > 0 {
                            if let Some(amount) = save.last_payout_amount.filter(|&a| a > 0) {
                                info!(
                                    ut = save.last_payout_time,
                                    amount, "migrating pre-ledger save"
                                );
                                ledger.record(LineItem {
                                    date: calendar.date_of(save.last_payout_time as f64),
                                    amount,
                                    balance: current_funds,
                                });
                            }
                        }
                    }
                }

                (config, PayoutScheduler::new(last_payout_time), ledger)
            }
            None => (
                ConfigStore::load(definitions, None),
                PayoutScheduler::default(),
                Ledger::default(),
            ),
        };

        Self {
            config,
            ledger,
            scheduler,
            calendar,
        }
    }

    pub fn save(&self) -> SaveDoc {
        SaveDoc {
            funding_config: self.config.override_doc().clone(),
            last_payout_time: match self.scheduler.last_payout_time() {
                Some(time) => time.round() as i64,
                None => -1,
            },
            history: Some(
                self.ledger
                    .entries()
                    .iter()
                    .map(|item| LineItemDoc {
                        ut: item.date.ut.round() as i64,
                        amount: item.amount,
                        balance: item.balance,
                    })
                    .collect(),
            ),
            last_payout_amount: None,
        }
    }

    /// Runs one scheduler step at the clock's current time.
    pub fn tick(
        &mut self,
        clock: &dyn Clock,
        currency: &mut dyn CurrencyAccount,
        reputation: Option<&mut dyn ReputationAccount>,
    ) -> Option<PayoutEvent> {
        self.scheduler.tick(
            clock.now(),
            &self.config,
            &mut self.ledger,
            &self.calendar,
            currency,
            reputation,
        )
    }

    pub fn last_payout(&self) -> Option<&LineItem> {
        self.ledger.last()
    }

    pub fn last_payout_time(&self) -> Option<f64> {
        self.scheduler.last_payout_time()
    }

    pub fn is_disabled(&self) -> bool {
        self.scheduler.is_disabled()
    }

    /// The layered configuration with overrides applied.
    pub fn effective_config(&self) -> &FundingConfig {
        self.config.effective()
    }

    /// The merged install defaults, for "reset to default" displays.
    pub fn base_config(&self) -> &FundingConfig {
        self.config.base()
    }

    pub fn is_locked(&self) -> bool {
        self.config.is_locked()
    }

    /// Date of the next payout under the active config, or `None` when
    /// the active mode has no calculator.
    pub fn next_payout_date(&self) -> Option<Date> {
        let calculator = self.config.calculator()?;
        let time = self.ledger.next_payout_time(calculator.pay_period());
        Some(self.calendar.date_of(time))
    }

    /// Date one period after `date`.
    pub fn payout_date_after(&self, date: &Date) -> Option<Date> {
        let calculator = self.config.calculator()?;
        Some(self.calendar.date_of(date.ut + calculator.pay_period()))
    }

    /// Projects the next `count` payouts starting from the first one not
    /// yet settled.
    pub fn project(
        &self,
        count: usize,
        starting_balance: i64,
        reputation: Option<f64>,
    ) -> Option<Projection<'_>> {
        let calculator = self.config.calculator()?;
        let start = self.ledger.next_payout_time(calculator.pay_period());
        Some(Projection::new(
            calculator,
            self.calendar,
            start,
            count,
            starting_balance,
            reputation,
        ))
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ConfigStore {
        &mut self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn calendar(&self) -> &Calendar {
        &self.calendar
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use funding_config::ParamValue;
    use funding_core::{MODE_BASIC, MODE_REP};
    use proptest::prelude::*;

    #[derive(Debug, Default)]
    struct TestBank {
        funds: i64,
    }

    impl CurrencyAccount for TestBank {
        fn funds(&self) -> i64 {
            self.funds
        }

        fn add_funds(&mut self, amount: i64) {
            self.funds += amount;
        }
    }

    #[derive(Debug)]
    struct TestStanding {
        reputation: f64,
        reject: bool,
    }

    impl TestStanding {
        fn new(reputation: f64) -> Self {
            Self {
                reputation,
                reject: false,
            }
        }
    }

    impl ReputationAccount for TestStanding {
        fn reputation(&self) -> f64 {
            self.reputation
        }

        fn add_reputation(&mut self, delta: f64) -> Result<(), AccountError> {
            if self.reject {
                return Err(AccountError("frozen".to_string()));
            }
            self.reputation += delta;
            Ok(())
        }
    }

    fn calendar() -> Calendar {
        Calendar::new(9_203_544.6)
    }

    fn basic_definition(entries: &[(&str, &str)]) -> ConfigDoc {
        let mut doc = ConfigDoc {
            mode: Some(MODE_BASIC.to_string()),
            ..ConfigDoc::default()
        };
        for &(key, value) in entries {
            doc.basic.insert(key.to_string(), ParamValue::new(value));
        }
        doc
    }

    fn rep_definition(entries: &[(&str, &str)]) -> ConfigDoc {
        let mut doc = ConfigDoc {
            mode: Some(MODE_REP.to_string()),
            ..ConfigDoc::default()
        };
        for &(key, value) in entries {
            doc.rep.insert(key.to_string(), ParamValue::new(value));
        }
        doc
    }

    fn linear_docs() -> Vec<ConfigDoc> {
        vec![basic_definition(&[
            ("payPeriod", "100"),
            ("paymentNumberMultiplier", "1"),
            ("linearPay", "100"),
        ])]
    }

    fn scheduled_save(last_payout_time: i64) -> SaveDoc {
        SaveDoc {
            last_payout_time,
            ..SaveDoc::default()
        }
    }

    #[test]
    fn first_tick_snaps_without_paying() {
        let docs = linear_docs();
        let mut scenario = Scenario::load(&docs, None, calendar(), 0);
        let mut bank = TestBank::default();

        let mut clock = ManualClock(250.0);
        assert_eq!(scenario.tick(&clock, &mut bank, None), None);
        assert_eq!(scenario.last_payout_time(), Some(200.0));
        assert_eq!(bank.funds, 0);
        assert!(scenario.ledger().is_empty());

        // Nothing new is due until the clock moves past the next grid point.
        assert_eq!(scenario.tick(&clock, &mut bank, None), None);

        clock.set(305.0);
        let event = scenario.tick(&clock, &mut bank, None).unwrap();
        assert_eq!(event.payment_index, 3);
        assert_eq!(event.amount, 300);
        assert_eq!(event.balance, 300);
        assert_eq!(scenario.last_payout_time(), Some(300.0));
        assert_eq!(bank.funds, 300);
        assert_eq!(scenario.ledger().len(), 1);
    }

    #[test]
    fn snap_lands_on_exact_grid_point() {
        let docs = linear_docs();
        let mut scenario = Scenario::load(&docs, None, calendar(), 0);
        let mut bank = TestBank::default();

        // now exactly on the grid: snap to the point one period earlier,
        // and the payout at now itself is not yet due (strictly-before).
        let mut clock = ManualClock(500.0);
        assert_eq!(scenario.tick(&clock, &mut bank, None), None);
        assert_eq!(scenario.last_payout_time(), Some(400.0));
        assert_eq!(scenario.tick(&clock, &mut bank, None), None);

        clock.set(500.1);
        let event = scenario.tick(&clock, &mut bank, None).unwrap();
        assert_eq!(event.payment_index, 5);
    }

    #[test]
    fn snap_before_first_period_goes_to_zero() {
        let docs = linear_docs();
        let mut scenario = Scenario::load(&docs, None, calendar(), 0);
        let mut bank = TestBank::default();

        assert_eq!(scenario.tick(&ManualClock(50.0), &mut bank, None), None);
        assert_eq!(scenario.last_payout_time(), Some(0.0));
    }

    #[test]
    fn catch_up_pays_one_per_tick() {
        let docs = linear_docs();
        let save = scheduled_save(0);
        let mut scenario = Scenario::load(&docs, Some(&save), calendar(), 0);
        let mut bank = TestBank::default();
        let clock = ManualClock(550.0);

        let mut events = Vec::new();
        for _ in 0..10 {
            if let Some(event) = scenario.tick(&clock, &mut bank, None) {
                events.push(event);
            }
        }

        let indices: Vec<i64> = events.iter().map(|e| e.payment_index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4, 5]);
        assert_eq!(scenario.last_payout_time(), Some(500.0));
        assert_eq!(bank.funds, 100 + 200 + 300 + 400 + 500);

        let balances: Vec<i64> = scenario.ledger().entries().iter().map(|i| i.balance).collect();
        assert_eq!(balances, vec![100, 300, 600, 1000, 1500]);
    }

    #[test]
    fn unusable_mode_disables_permanently() {
        let docs = vec![ConfigDoc {
            mode: Some("SubsidyFunding".to_string()),
            ..ConfigDoc::default()
        }];
        let save = scheduled_save(0);
        let mut scenario = Scenario::load(&docs, Some(&save), calendar(), 0);
        let mut bank = TestBank::default();
        let clock = ManualClock(500.0);

        assert_eq!(scenario.tick(&clock, &mut bank, None), None);
        assert!(scenario.is_disabled());

        // Repairing the config does not revive a disabled scheduler.
        scenario.config_mut().switch_mode(1);
        assert!(scenario.config().calculator().is_some());
        assert_eq!(scenario.tick(&clock, &mut bank, None), None);
        assert!(scenario.is_disabled());
        assert_eq!(bank.funds, 0);
        assert!(scenario.ledger().is_empty());
    }

    #[test]
    fn worthless_payout_advances_grid_silently() {
        let docs = vec![basic_definition(&[("payPeriod", "100")])];
        let save = scheduled_save(0);
        let mut scenario = Scenario::load(&docs, Some(&save), calendar(), 0);
        let mut bank = TestBank::default();
        let clock = ManualClock(250.0);

        assert_eq!(scenario.tick(&clock, &mut bank, None), None);
        assert_eq!(scenario.last_payout_time(), Some(100.0));
        assert_eq!(scenario.tick(&clock, &mut bank, None), None);
        assert_eq!(scenario.last_payout_time(), Some(200.0));
        assert_eq!(scenario.tick(&clock, &mut bank, None), None);
        assert_eq!(scenario.last_payout_time(), Some(200.0));
        assert_eq!(bank.funds, 0);
        assert!(scenario.ledger().is_empty());
    }

    #[test]
    fn reputation_prices_and_charges() {
        let docs = vec![rep_definition(&[
            ("payPeriod", "100"),
            ("basePay", "1000"),
            ("repBonusPaymentRate", "10"),
            ("repCostRate", "0.05"),
        ])];
        let save = scheduled_save(0);
        let mut scenario = Scenario::load(&docs, Some(&save), calendar(), 0);
        let mut bank = TestBank::default();
        let mut standing = TestStanding::new(100.0);
        let clock = ManualClock(150.0);

        let event = scenario.tick(&clock, &mut bank, Some(&mut standing)).unwrap();
        assert_eq!(event.amount, 2000);
        assert_eq!(bank.funds, 2000);
        assert!((standing.reputation - 95.0).abs() < 1e-9);
    }

    #[test]
    fn rejected_reputation_charge_keeps_payout() {
        let docs = vec![rep_definition(&[
            ("payPeriod", "100"),
            ("basePay", "1000"),
            ("repBonusPaymentRate", "10"),
            ("repCostRate", "0.05"),
        ])];
        let save = scheduled_save(0);
        let mut scenario = Scenario::load(&docs, Some(&save), calendar(), 0);
        let mut bank = TestBank::default();
        let mut standing = TestStanding::new(100.0);
        standing.reject = true;
        let clock = ManualClock(150.0);

        let event = scenario.tick(&clock, &mut bank, Some(&mut standing)).unwrap();
        assert_eq!(event.amount, 2000);
        assert_eq!(bank.funds, 2000);
        assert_eq!(scenario.ledger().len(), 1);
        assert!((standing.reputation - 100.0).abs() < 1e-9);
    }

    #[test]
    fn missing_reputation_account_prices_at_zero() {
        let docs = vec![rep_definition(&[
            ("payPeriod", "100"),
            ("basePay", "1000"),
            ("repBonusPaymentRate", "10"),
            ("repCostRate", "0.05"),
        ])];
        let save = scheduled_save(0);
        let mut scenario = Scenario::load(&docs, Some(&save), calendar(), 0);
        let mut bank = TestBank::default();

        let event = scenario.tick(&ManualClock(150.0), &mut bank, None).unwrap();
        assert_eq!(event.amount, 1000);
        assert_eq!(bank.funds, 1000);
    }

    #[test]
    fn ledger_next_payout_time() {
        let mut ledger = Ledger::default();
        assert_eq!(ledger.next_payout_time(100.0), 100.0);

        ledger.record(LineItem {
            date: calendar().date_of(500.0),
            amount: 1,
            balance: 1,
        });
        assert_eq!(ledger.next_payout_time(100.0), 600.0);
    }

    #[test]
    fn projection_walks_the_grid() {
        let docs = linear_docs();
        let save = scheduled_save(0);
        let mut scenario = Scenario::load(&docs, Some(&save), calendar(), 0);
        let mut bank = TestBank::default();
        let clock = ManualClock(250.0);
        while scenario.tick(&clock, &mut bank, None).is_some() {}
        assert_eq!(scenario.ledger().len(), 2);

        let rows: Vec<ProjectedPayout> =
            scenario.project(4, bank.funds, None).unwrap().collect();
        assert_eq!(rows.len(), 4);

        let amounts: Vec<i64> = rows.iter().map(|r| r.amount).collect();
        assert_eq!(amounts, vec![300, 400, 500, 600]);

        let cumulative: Vec<i64> = rows.iter().map(|r| r.cumulative).collect();
        assert_eq!(cumulative, vec![300, 700, 1200, 1800]);

        // bank held 300 after indices 1 and 2 settled.
        let balances: Vec<i64> = rows.iter().map(|r| r.balance).collect();
        assert_eq!(balances, vec![600, 1000, 1500, 2100]);

        assert_eq!(rows[0].date.ut, 300.0);
        assert_eq!(rows[3].date.ut, 600.0);
    }

    #[test]
    fn projection_from_fresh_session_starts_at_first_period() {
        let docs = linear_docs();
        let scenario = Scenario::load(&docs, None, calendar(), 0);

        let rows: Vec<ProjectedPayout> = scenario.project(2, 0, None).unwrap().collect();
        assert_eq!(rows[0].date.ut, 100.0);
        assert_eq!(rows[0].amount, 100);
        assert_eq!(rows[1].amount, 200);
    }

    #[test]
    fn projection_is_repeatable() {
        let docs = linear_docs();
        let scenario = Scenario::load(&docs, None, calendar(), 0);

        let first: Vec<ProjectedPayout> = scenario.project(5, 123, None).unwrap().collect();
        let second: Vec<ProjectedPayout> = scenario.project(5, 123, None).unwrap().collect();
        assert_eq!(first, second);
        assert_eq!(scenario.project(5, 123, None).unwrap().len(), 5);
    }

    #[test]
    fn next_payout_date_tracks_ledger() {
        let docs = linear_docs();
        let save = scheduled_save(0);
        let mut scenario = Scenario::load(&docs, Some(&save), calendar(), 0);
        assert_eq!(scenario.next_payout_date().unwrap().ut, 100.0);

        let mut bank = TestBank::default();
        scenario.tick(&ManualClock(150.0), &mut bank, None).unwrap();
        let next = scenario.next_payout_date().unwrap();
        assert_eq!(next.ut, 200.0);

        let after = scenario.payout_date_after(&next).unwrap();
        assert_eq!(after.ut, 300.0);
    }

    #[test]
    fn session_exposes_config_queries() {
        let docs = linear_docs();
        let mut scenario = Scenario::load(&docs, None, calendar(), 0);
        assert!(!scenario.is_locked());
        assert_eq!(scenario.effective_config().basic.linear_pay, 100.0);
        assert_eq!(scenario.base_config().basic.linear_pay, 100.0);

        scenario.config_mut().set_override("linearPay", "250").unwrap();
        scenario.config_mut().lock();
        assert!(scenario.is_locked());
        assert_eq!(scenario.effective_config().basic.linear_pay, 250.0);
        assert_eq!(scenario.base_config().basic.linear_pay, 100.0);
    }

    #[test]
    fn save_round_trips_through_json() {
        let docs = linear_docs();
        let save = scheduled_save(0);
        let mut scenario = Scenario::load(&docs, Some(&save), calendar(), 0);
        let mut bank = TestBank::default();
        let clock = ManualClock(350.0);
        while scenario.tick(&clock, &mut bank, None).is_some() {}
        scenario
            .config_mut()
            .set_override("payPeriod", "86400")
            .unwrap();

        let json = serde_json::to_string(&scenario.save()).unwrap();
        let restored_doc: SaveDoc = serde_json::from_str(&json).unwrap();
        let restored = Scenario::load(&docs, Some(&restored_doc), calendar(), bank.funds);

        assert_eq!(restored.last_payout_time(), scenario.last_payout_time());
        assert_eq!(restored.ledger().entries(), scenario.ledger().entries());
        assert_eq!(restored.config().effective(), scenario.config().effective());
    }

    #[test]
    fn save_doc_uses_wire_names() {
        let docs = linear_docs();
        let save = scheduled_save(0);
        let mut scenario = Scenario::load(&docs, Some(&save), calendar(), 0);
        let mut bank = TestBank::default();
        scenario.tick(&ManualClock(150.0), &mut bank, None).unwrap();

        let json = serde_json::to_string(&scenario.save()).unwrap();
        assert!(json.contains("\"FundingConfig\""));
        assert!(json.contains("\"lastPayoutTime\":100"));
        assert!(json.contains("\"History\""));
        assert!(json.contains("\"ut\":100"));
        assert!(!json.contains("lastPayoutAmount"));
    }

    #[test]
    fn legacy_save_migrates_last_payout() {
        let json = r#"{
            "FundingConfig": { "mode": "BasicFunding" },
            "lastPayoutTime": 648000,
            "lastPayoutAmount": 50000
        }"#;
        let save: SaveDoc = serde_json::from_str(json).unwrap();
        let scenario = Scenario::load(&linear_docs(), Some(&save), calendar(), 123_456);

        assert_eq!(scenario.ledger().len(), 1);
        let item = scenario.ledger().last().unwrap();
        assert_eq!(item.amount, 50_000);
        assert_eq!(item.balance, 123_456);
        assert_eq!(item.date.ut, 648_000.0);
        assert_eq!(scenario.last_payout_time(), Some(648_000.0));
    }

    #[test]
    fn legacy_save_without_payout_stays_empty() {
        let save = SaveDoc {
            last_payout_time: 648_000,
            last_payout_amount: Some(0),
            ..SaveDoc::default()
        };
        let scenario = Scenario::load(&linear_docs(), Some(&save), calendar(), 123_456);
        assert!(scenario.ledger().is_empty());
        assert_eq!(scenario.last_payout_time(), Some(648_000.0));
    }

    #[test]
    fn loaded_history_drops_non_positive_amounts() {
        let save = SaveDoc {
            last_payout_time: 300,
            history: Some(vec![
                LineItemDoc {
                    ut: 100,
                    amount: 100,
                    balance: 100,
                },
                LineItemDoc {
                    ut: 200,
                    amount: 0,
                    balance: 100,
                },
                LineItemDoc {
                    ut: 300,
                    amount: -5,
                    balance: 95,
                },
            ]),
            ..SaveDoc::default()
        };
        let scenario = Scenario::load(&linear_docs(), Some(&save), calendar(), 0);
        assert_eq!(scenario.ledger().len(), 1);
        assert_eq!(scenario.ledger().last().unwrap().amount, 100);
    }

    #[test]
    fn manual_clock_moves() {
        let mut clock = ManualClock::default();
        assert_eq!(clock.now(), 0.0);
        clock.advance(21_600.0);
        assert_eq!(clock.now(), 21_600.0);
        clock.set(5.0);
        assert_eq!(clock.now(), 5.0);
    }

    proptest! {
        #[test]
        fn schedule_never_moves_backwards(times in proptest::collection::vec(0.0f64..10_000.0, 1..40)) {
            let docs = linear_docs();
            let mut scenario = Scenario::load(&docs, None, calendar(), 0);
            let mut bank = TestBank::default();
            let mut previous: Option<f64> = None;

            for now in times {
                let before = scenario.last_payout_time();
                let event = scenario.tick(&ManualClock(now), &mut bank, None);
                let after = scenario.last_payout_time();

                if let (Some(b), Some(a)) = (before, after) {
                    prop_assert!(a >= b);
                    if event.is_some() {
                        prop_assert!((a - b - 100.0).abs() < 1e-6);
                    }
                }
                if let (Some(p), Some(a)) = (previous, after) {
                    prop_assert!(a >= p);
                }
                previous = after;
            }
        }

        #[test]
        fn ledger_balance_tracks_bank(extra_periods in 1usize..30) {
            let docs = linear_docs();
            let save = scheduled_save(0);
            let mut scenario = Scenario::load(&docs, Some(&save), calendar(), 0);
            let mut bank = TestBank::default();
            let clock = ManualClock(100.0 * extra_periods as f64 + 50.0);

            while scenario.tick(&clock, &mut bank, None).is_some() {}

            prop_assert_eq!(scenario.ledger().len(), extra_periods);
            let total: i64 = scenario.ledger().entries().iter().map(|i| i.amount).sum();
            prop_assert_eq!(total, bank.funds);
            prop_assert_eq!(scenario.ledger().last().unwrap().balance, bank.funds);
        }
    }
}
