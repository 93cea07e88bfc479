#![deny(warnings)]

//! Headless driver for the funding subsystem: merges definition files,
//! applies save overrides and interactive edits, advances the payout
//! schedule to a target time, and prints a budget report.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use funding_config::{fields, load_definitions, ConfigDoc, ConfigStore};
use funding_core::{Calendar, CalculatorKind, FundingConfig};
use funding_runtime::{
    AccountError, CurrencyAccount, ManualClock, ReputationAccount, SaveDoc, Scenario,
};

struct Args {
    definitions: PathBuf,
    save: Option<PathBuf>,
    warp_to: f64,
    funds: i64,
    reputation: Option<f64>,
    year_length: f64,
    project: usize,
    sets: Vec<(String, String)>,
    clears: Vec<String>,
    mode: Option<i32>,
    lock: bool,
    show_settings: bool,
}

fn parse_args() -> Args {
    let mut args = Args {
        definitions: PathBuf::from("assets/definitions"),
        save: None,
        warp_to: 0.0,
        funds: 0,
        reputation: None,
        year_length: 9_203_544.6,
        project: 10,
        sets: Vec::new(),
        clears: Vec::new(),
        mode: None,
        lock: false,
        show_settings: false,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--definitions" => {
                if let Some(v) = it.next() {
                    args.definitions = PathBuf::from(v);
                }
            }
            "--save" => args.save = it.next().map(PathBuf::from),
            "--warp-to" => {
                if let Some(v) = it.next().and_then(|s| s.parse().ok()) {
                    args.warp_to = v;
                }
            }
            "--funds" => {
                if let Some(v) = it.next().and_then(|s| s.parse().ok()) {
                    args.funds = v;
                }
            }
            "--reputation" => args.reputation = it.next().and_then(|s| s.parse().ok()),
            "--year-length" => {
                if let Some(v) = it.next().and_then(|s| s.parse().ok()) {
                    args.year_length = v;
                }
            }
            "--project" => {
                if let Some(v) = it.next().and_then(|s| s.parse().ok()) {
                    args.project = v;
                }
            }
            "--set" => {
                if let Some((field, value)) = it.next().as_deref().and_then(|v| v.split_once('=')) {
                    args.sets.push((field.to_string(), value.to_string()));
                }
            }
            "--clear" => {
                if let Some(v) = it.next() {
                    args.clears.push(v);
                }
            }
            "--mode" => args.mode = it.next().and_then(|s| s.parse().ok()),
            "--lock" => args.lock = true,
            "--show-settings" => args.show_settings = true,
            _ => {}
        }
    }
    args
}

struct SimBank {
    funds: i64,
}

impl CurrencyAccount for SimBank {
    fn funds(&self) -> i64 {
        self.funds
    }

    fn add_funds(&mut self, amount: i64) {
        self.funds += amount;
    }
}

struct SimStanding {
    reputation: f64,
}

impl ReputationAccount for SimStanding {
    fn reputation(&self) -> f64 {
        self.reputation
    }

    fn add_reputation(&mut self, delta: f64) -> Result<(), AccountError> {
        self.reputation += delta;
        Ok(())
    }
}

fn countdown(calendar: &Calendar, seconds: f64) -> String {
    let span = calendar.date_of(seconds.max(0.0));
    format!(
        "{}d {:02}:{:02}:{:02}",
        span.day_of_year - 1,
        span.hour,
        span.minute,
        span.second
    )
}

fn field_value(config: &FundingConfig, kind: CalculatorKind, key: &str) -> f64 {
    let value = match kind {
        CalculatorKind::Basic => config.basic.field(key),
        CalculatorKind::Rep => config.rep.field(key),
    };
    value.unwrap_or(0.0)
}

fn print_settings(config: &ConfigStore) {
    let effective = config.effective();
    let kind = match CalculatorKind::from_mode(&effective.mode) {
        Some(kind) => kind,
        None => {
            println!("Mode {} has no editable settings", effective.mode);
            return;
        }
    };

    println!("Mode: {} | locked: {}", effective.mode, config.is_locked());
    let overrides = config.override_doc().section(kind);
    for spec in fields(kind) {
        let current = field_value(effective, kind, spec.key);
        let base = field_value(config.base(), kind, spec.key);
        let decimals = spec.decimals as usize;
        let marker = if overrides.contains_key(spec.key) {
            " *"
        } else {
            ""
        };
        println!(
            "  {:<24} {:>16.*}{} (default {:.*})",
            spec.label, decimals, current, marker, decimals, base
        );
    }
}

fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .init();

    let args = parse_args();
    info!(
        definitions = %args.definitions.display(),
        git_sha = env!("GIT_SHA"),
        build_date = env!("BUILD_DATE"),
        "starting funding CLI"
    );

    let blocks = load_definitions(&args.definitions)
        .with_context(|| format!("loading definitions from {}", args.definitions.display()))?;
    let definitions: Vec<ConfigDoc> = blocks.into_iter().map(|block| block.config).collect();

    let save_doc = match &args.save {
        Some(path) if path.exists() => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading save {}", path.display()))?;
            let doc: SaveDoc = serde_json::from_str(&text)
                .with_context(|| format!("parsing save {}", path.display()))?;
            Some(doc)
        }
        _ => None,
    };

    let calendar = Calendar::new(args.year_length);
    let mut scenario = Scenario::load(&definitions, save_doc.as_ref(), calendar, args.funds);

    // Edits land before the schedule runs, like settings changed on load.
    for (field, value) in &args.sets {
        if let Err(e) = scenario.config_mut().set_override(field, value) {
            warn!(field = %field, error = %e, "override rejected");
        }
    }
    for field in &args.clears {
        if let Err(e) = scenario.config_mut().clear_override(field) {
            warn!(field = %field, error = %e, "clear rejected");
        }
    }
    if let Some(direction) = args.mode {
        scenario.config_mut().switch_mode(direction);
    }
    if args.lock {
        scenario.config_mut().lock();
    }

    let mut bank = SimBank { funds: args.funds };
    let mut standing = args.reputation.map(|reputation| SimStanding { reputation });

    // One tick per pending period, until the schedule stops moving.
    let clock = ManualClock(args.warp_to);
    loop {
        let before = scenario.last_payout_time();
        let event = match standing.as_mut() {
            Some(account) => scenario.tick(&clock, &mut bank, Some(account)),
            None => scenario.tick(&clock, &mut bank, None),
        };
        if let Some(event) = event {
            println!(
                "Payout #{} | {} | amount: {} | balance: {}",
                event.payment_index, event.date, event.amount, event.balance
            );
        } else if scenario.last_payout_time() == before {
            break;
        }
    }
    if scenario.is_disabled() {
        warn!("payouts are disabled for this configuration");
    }

    println!(
        "Funding OK | mode: {} | definitions: {} | ledger entries: {}",
        scenario.effective_config().mode,
        definitions.len(),
        scenario.ledger().len()
    );

    if let Some(item) = scenario.last_payout() {
        println!(
            "Last payout | {} | amount: {} | balance: {}",
            item.date, item.amount, item.balance
        );
    }
    if let Some(next) = scenario.next_payout_date() {
        println!(
            "Next payout | {} | in {}",
            next,
            countdown(&calendar, next.ut - clock.0)
        );
    }

    if args.show_settings {
        print_settings(scenario.config());
    }

    let reputation_now = standing.as_ref().map(|account| account.reputation);
    if let Some(projection) = scenario.project(args.project, bank.funds, reputation_now) {
        println!(
            "{:<20} {:>12} {:>14} {:>14}",
            "Date", "Payout", "Cumulative", "Balance"
        );
        for row in projection {
            println!(
                "{:<20} {:>12} {:>14} {:>14}",
                row.date.to_string(),
                row.amount,
                row.cumulative,
                row.balance
            );
        }
    }

    if let Some(path) = &args.save {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(&scenario.save())?;
        std::fs::write(path, text).with_context(|| format!("writing save {}", path.display()))?;
        info!(path = %path.display(), "save written");
    }

    Ok(())
}
