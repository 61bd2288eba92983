//! # Decision Engine
//!
//! Converts one cycle's facts into a production/stop decision. Rules live in
//! an ordered table and are evaluated top to bottom; the first match wins:
//!
//! 1. safety overcurrent stop (any previous state)
//! 2. emergency battery stop (only while producing)
//! 3. production-enable clauses
//! 4. production-disable clauses
//! 5. otherwise the previous state is kept
//!
//! Enable and disable thresholds deliberately overlap: a running load keeps
//! running while any enable clause still holds, so a reading sitting on one
//! boundary does not toggle the load every cycle.

use chrono::{DateTime, FixedOffset, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

use crate::domain::{DeviceReading, ProductionState, WeatherFacts};

/// Forecast horizon a clause looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionSource {
    Current,
    OneHour,
    ThreeHour,
}

impl ConditionSource {
    fn condition<'a>(&self, weather: &'a WeatherFacts) -> &'a str {
        match self {
            Self::Current => &weather.current_condition,
            Self::OneHour => &weather.forecast_1h_condition,
            Self::ThreeHour => &weather.forecast_3h_condition,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Current => "now",
            Self::OneHour => "1h",
            Self::ThreeHour => "3h",
        }
    }
}

/// Favorable now and at the forecast horizon, enough battery, early enough
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutlookClause {
    pub min_battery_pct: f64,
    pub before_hour: u32,
    /// Also require non-zero PV production
    #[serde(default)]
    pub require_production: bool,
}

/// Weather-independent surplus: enough PV power (and optionally battery)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurplusClause {
    #[serde(default)]
    pub min_battery_pct: Option<f64>,
    pub min_power_w: f64,
    pub before_hour: u32,
}

/// Every tunable number and keyword of the rule table
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DecisionThresholds {
    #[validate(range(min = 0.0))]
    pub max_phase_power_w: f64,
    #[validate(range(min = 0.0))]
    pub max_total_power_w: f64,

    #[validate(range(min = 0.0, max = 100.0))]
    pub emergency_battery_pct: f64,
    #[validate(range(max = 23))]
    pub afternoon_after_hour: u32,
    #[validate(range(min = 0.0, max = 100.0))]
    pub afternoon_battery_pct: f64,

    /// Applied once against the 1h forecast and once against the 3h forecast
    pub outlook_clauses: Vec<OutlookClause>,
    pub surplus_clauses: Vec<SurplusClause>,
    #[validate(range(min = 0.0, max = 100.0))]
    pub full_battery_pct: f64,
    pub full_battery_min_power_w: f64,

    #[validate(range(min = 0.0, max = 100.0))]
    pub disable_battery_pct: f64,
    pub disable_power_w: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub unfavorable_battery_ceiling_pct: f64,
    pub unfavorable_power_ceiling_w: f64,

    pub favorable_keywords: Vec<String>,
    pub unfavorable_keywords: Vec<String>,
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        let outlook = |min_battery_pct, before_hour, require_production| OutlookClause {
            min_battery_pct,
            before_hour,
            require_production,
        };
        let surplus = |min_battery_pct, min_power_w, before_hour| SurplusClause {
            min_battery_pct,
            min_power_w,
            before_hour,
        };
        Self {
            max_phase_power_w: 2000.0,
            max_total_power_w: 5000.0,
            emergency_battery_pct: 20.0,
            afternoon_after_hour: 14,
            afternoon_battery_pct: 80.0,
            outlook_clauses: vec![
                outlook(40.0, 12, true),
                outlook(65.0, 12, false),
                outlook(55.0, 11, false),
                outlook(45.0, 10, false),
            ],
            surplus_clauses: vec![
                surplus(Some(60.0), 2500.0, 10),
                surplus(Some(70.0), 2250.0, 11),
                surplus(Some(80.0), 2000.0, 12),
                surplus(None, 3500.0, 13),
            ],
            full_battery_pct: 90.0,
            full_battery_min_power_w: 50.0,
            disable_battery_pct: 90.0,
            disable_power_w: 100.0,
            unfavorable_battery_ceiling_pct: 95.0,
            unfavorable_power_ceiling_w: 1000.0,
            favorable_keywords: [
                "sunny",
                "clear",
                "clear sky",
                "scattered clouds",
                "few clouds",
                "broken clouds",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            unfavorable_keywords: [
                "rain", "storm", "thunder", "snow", "fog", "haze", "sleet", "blizzard", "dust",
                "sand", "ash", "tornado", "hurricane", "lightning",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

// ============================================================================
// Rule Table
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RuleStage {
    Safety,
    Emergency,
    Enable,
    Disable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    PhaseOvercurrent { max_phase_w: f64, max_total_w: f64 },
    BatteryBelow { pct: f64 },
    BatteryBelowAfterHour { after_hour: u32, pct: f64 },
    FavorableOutlook { horizon: ConditionSource, clause: OutlookClause },
    PowerSurplus(SurplusClause),
    FullBattery { above_pct: f64, above_power_w: f64 },
    BatteryAtOrBelow { pct: f64 },
    PowerAtOrBelow { watts: f64 },
    UnfavorableWeather { source: ConditionSource, battery_ceiling_pct: f64, power_ceiling_w: f64 },
}

/// Facts a rule is evaluated against
#[derive(Debug, Clone, Copy)]
pub struct RuleInputs<'a> {
    pub prev: ProductionState,
    pub reading: &'a DeviceReading,
    pub weather: &'a WeatherFacts,
    pub hour: u32,
}

#[derive(Debug, Clone)]
struct Keywords {
    favorable: Vec<String>,
    unfavorable: Vec<String>,
}

impl Keywords {
    fn matches(list: &[String], condition: &str) -> bool {
        let condition = condition.to_lowercase();
        list.iter().any(|keyword| condition.contains(keyword.as_str()))
    }
}

impl Condition {
    fn matches(&self, inputs: &RuleInputs<'_>, keywords: &Keywords) -> bool {
        let reading = inputs.reading;
        let battery = reading.battery_pct;
        let power = reading.pv_power_w;
        match self {
            Self::PhaseOvercurrent { max_phase_w, max_total_w } => {
                reading.phase_power_w.max_phase() > *max_phase_w
                    || reading.phase_power_w.effective_total() > *max_total_w
            }
            Self::BatteryBelow { pct } => battery < *pct,
            Self::BatteryBelowAfterHour { after_hour, pct } => {
                inputs.hour > *after_hour && battery < *pct
            }
            Self::FavorableOutlook { horizon, clause } => {
                Keywords::matches(&keywords.favorable, &inputs.weather.current_condition)
                    && Keywords::matches(&keywords.favorable, horizon.condition(inputs.weather))
                    && (!clause.require_production || power > 0.0)
                    && battery >= clause.min_battery_pct
                    && inputs.hour < clause.before_hour
            }
            Self::PowerSurplus(clause) => {
                clause.min_battery_pct.map_or(true, |min| battery >= min)
                    && power >= clause.min_power_w
                    && inputs.hour < clause.before_hour
            }
            Self::FullBattery { above_pct, above_power_w } => {
                battery > *above_pct && power > *above_power_w
            }
            Self::BatteryAtOrBelow { pct } => battery <= *pct,
            Self::PowerAtOrBelow { watts } => power <= *watts,
            Self::UnfavorableWeather { source, battery_ceiling_pct, power_ceiling_w } => {
                Keywords::matches(&keywords.unfavorable, source.condition(inputs.weather))
                    && battery <= *battery_ceiling_pct
                    && power <= *power_ceiling_w
            }
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PhaseOvercurrent { max_phase_w, max_total_w } => write!(
                f,
                "phase power above {max_phase_w:.0}W or total above {max_total_w:.0}W"
            ),
            Self::BatteryBelow { pct } => write!(f, "battery below {pct:.0}%"),
            Self::BatteryBelowAfterHour { after_hour, pct } => {
                write!(f, "battery below {pct:.0}% after {after_hour}:59")
            }
            Self::FavorableOutlook { horizon, clause } => write!(
                f,
                "favorable weather now and {}, battery >= {:.0}%{} before {}:00",
                horizon.label(),
                clause.min_battery_pct,
                if clause.require_production { ", producing" } else { "" },
                clause.before_hour
            ),
            Self::PowerSurplus(clause) => {
                if let Some(min) = clause.min_battery_pct {
                    write!(f, "battery >= {min:.0}%, ")?;
                }
                write!(f, "power >= {:.0}W before {}:00", clause.min_power_w, clause.before_hour)
            }
            Self::FullBattery { above_pct, above_power_w } => {
                write!(f, "battery above {above_pct:.0}% with power above {above_power_w:.0}W")
            }
            Self::BatteryAtOrBelow { pct } => write!(f, "battery at or below {pct:.0}%"),
            Self::PowerAtOrBelow { watts } => write!(f, "power at or below {watts:.0}W"),
            Self::UnfavorableWeather { source, battery_ceiling_pct, power_ceiling_w } => write!(
                f,
                "unfavorable weather {} with battery <= {:.0}% and power <= {:.0}W",
                source.label(),
                battery_ceiling_pct,
                power_ceiling_w
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub name: String,
    pub stage: RuleStage,
    /// Only considered when the previous state equals this
    pub requires: Option<ProductionState>,
    pub condition: Condition,
    pub outcome: ProductionState,
}

impl Rule {
    fn new(name: impl Into<String>, stage: RuleStage, condition: Condition, outcome: ProductionState) -> Self {
        Self {
            name: name.into(),
            stage,
            requires: None,
            condition,
            outcome,
        }
    }

    fn only_when(mut self, prev: ProductionState) -> Self {
        self.requires = Some(prev);
        self
    }

    fn applies(&self, inputs: &RuleInputs<'_>, keywords: &Keywords) -> bool {
        self.requires.map_or(true, |required| required == inputs.prev)
            && self.condition.matches(inputs, keywords)
    }
}

/// Build the ordered rule table from thresholds
pub fn rule_table(t: &DecisionThresholds) -> Vec<Rule> {
    use ProductionState::{Production, Stop};

    let mut rules = vec![
        Rule::new(
            "safety-overcurrent",
            RuleStage::Safety,
            Condition::PhaseOvercurrent {
                max_phase_w: t.max_phase_power_w,
                max_total_w: t.max_total_power_w,
            },
            Stop,
        ),
        Rule::new(
            "emergency-battery-low",
            RuleStage::Emergency,
            Condition::BatteryBelow { pct: t.emergency_battery_pct },
            Stop,
        )
        .only_when(Production),
        Rule::new(
            "emergency-battery-afternoon",
            RuleStage::Emergency,
            Condition::BatteryBelowAfterHour {
                after_hour: t.afternoon_after_hour,
                pct: t.afternoon_battery_pct,
            },
            Stop,
        )
        .only_when(Production),
    ];

    for horizon in [ConditionSource::OneHour, ConditionSource::ThreeHour] {
        for (i, clause) in t.outlook_clauses.iter().enumerate() {
            rules.push(Rule::new(
                format!("enable-outlook-{}-{}", horizon.label(), i + 1),
                RuleStage::Enable,
                Condition::FavorableOutlook { horizon, clause: *clause },
                Production,
            ));
        }
    }
    for (i, clause) in t.surplus_clauses.iter().enumerate() {
        rules.push(Rule::new(
            format!("enable-surplus-{}", i + 1),
            RuleStage::Enable,
            Condition::PowerSurplus(*clause),
            Production,
        ));
    }
    rules.push(Rule::new(
        "enable-full-battery",
        RuleStage::Enable,
        Condition::FullBattery {
            above_pct: t.full_battery_pct,
            above_power_w: t.full_battery_min_power_w,
        },
        Production,
    ));

    rules.push(Rule::new(
        "disable-battery",
        RuleStage::Disable,
        Condition::BatteryAtOrBelow { pct: t.disable_battery_pct },
        Stop,
    ));
    rules.push(Rule::new(
        "disable-power",
        RuleStage::Disable,
        Condition::PowerAtOrBelow { watts: t.disable_power_w },
        Stop,
    ));
    for source in [ConditionSource::Current, ConditionSource::OneHour, ConditionSource::ThreeHour] {
        rules.push(Rule::new(
            format!("disable-weather-{}", source.label()),
            RuleStage::Disable,
            Condition::UnfavorableWeather {
                source,
                battery_ceiling_pct: t.unfavorable_battery_ceiling_pct,
                power_ceiling_w: t.unfavorable_power_ceiling_w,
            },
            Stop,
        ));
    }

    rules
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub previous: ProductionState,
    pub state: ProductionState,
    /// Name of the rule that fired, `None` when the state was kept
    pub rule: Option<String>,
    pub stage: Option<RuleStage>,
    pub reasons: Vec<String>,
}

impl Decision {
    pub fn changed(&self) -> bool {
        self.state != self.previous
    }
}

/// Pure evaluation of the rule table; performs no I/O.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    rules: Vec<Rule>,
    keywords: Keywords,
}

impl DecisionEngine {
    pub fn new(thresholds: &DecisionThresholds) -> Self {
        let lower = |list: &[String]| list.iter().map(|k| k.to_lowercase()).collect();
        Self {
            rules: rule_table(thresholds),
            keywords: Keywords {
                favorable: lower(&thresholds.favorable_keywords),
                unfavorable: lower(&thresholds.unfavorable_keywords),
            },
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn evaluate(
        &self,
        prev: ProductionState,
        reading: &DeviceReading,
        weather: &WeatherFacts,
        now: DateTime<FixedOffset>,
    ) -> Decision {
        let reading = reading.sanitized();
        let inputs = RuleInputs {
            prev,
            reading: &reading,
            weather,
            hour: now.hour(),
        };

        match self.rules.iter().find(|rule| rule.applies(&inputs, &self.keywords)) {
            Some(rule) => Decision {
                previous: prev,
                state: rule.outcome,
                rule: Some(rule.name.clone()),
                stage: Some(rule.stage),
                reasons: vec![
                    format!("{}: {}", rule.name, rule.condition),
                    facts_summary(&inputs),
                ],
            },
            None => Decision {
                previous: prev,
                state: prev,
                rule: None,
                stage: None,
                reasons: vec!["no rule matched".to_string(), facts_summary(&inputs)],
            },
        }
    }
}

fn facts_summary(inputs: &RuleInputs<'_>) -> String {
    format!(
        "battery {:.0}%, power {:.0}W, phases {:.0}/{:.0}/{:.0}W (total {:.0}W), weather {} / {} / {}, hour {}",
        inputs.reading.battery_pct,
        inputs.reading.pv_power_w,
        inputs.reading.phase_power_w.l1,
        inputs.reading.phase_power_w.l2,
        inputs.reading.phase_power_w.l3,
        inputs.reading.phase_power_w.total,
        inputs.weather.current_condition,
        inputs.weather.forecast_1h_condition,
        inputs.weather.forecast_3h_condition,
        inputs.hour
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PhasePowers;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rstest::rstest;
    use ProductionState::{Production, Stop};

    fn at_hour(hour: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 6, 1, hour, 5, 0)
            .unwrap()
    }

    fn weather(now: &str, in_1h: &str, in_3h: &str) -> WeatherFacts {
        WeatherFacts {
            current_condition: now.to_string(),
            forecast_1h_condition: in_1h.to_string(),
            forecast_3h_condition: in_3h.to_string(),
            ..WeatherFacts::fallback()
        }
    }

    fn reading(battery_pct: f64, pv_power_w: f64) -> DeviceReading {
        DeviceReading {
            battery_pct,
            pv_power_w,
            ..Default::default()
        }
    }

    fn engine() -> DecisionEngine {
        DecisionEngine::new(&DecisionThresholds::default())
    }

    #[test]
    fn test_sunny_morning_with_full_battery_starts_production() {
        let decision = engine().evaluate(
            Stop,
            &reading(95.0, 3000.0),
            &weather("clear sky", "few clouds", "overcast clouds"),
            at_hour(9),
        );
        assert_eq!(decision.state, Production);
        assert!(decision.changed());
        assert_eq!(decision.stage, Some(RuleStage::Enable));
        assert_eq!(decision.rule.as_deref(), Some("enable-outlook-1h-1"));
    }

    #[test]
    fn test_total_overcurrent_stops_immediately() {
        let mut facts = reading(100.0, 6000.0);
        facts.phase_power_w = PhasePowers { l1: 1700.0, l2: 1700.0, l3: 1800.0, total: 5200.0 };
        let decision = engine().evaluate(
            Production,
            &facts,
            &weather("clear sky", "clear sky", "clear sky"),
            at_hour(10),
        );
        assert_eq!(decision.state, Stop);
        assert_eq!(decision.stage, Some(RuleStage::Safety));
    }

    #[test]
    fn test_overcurrent_while_stopped_is_not_a_change() {
        let mut facts = reading(100.0, 6000.0);
        facts.phase_power_w.l2 = 2100.0;
        let decision = engine().evaluate(Stop, &facts, &WeatherFacts::fallback(), at_hour(10));
        assert_eq!(decision.state, Stop);
        assert!(!decision.changed());
    }

    #[rstest]
    #[case::low_battery(15.0, 3000.0, 10)]
    #[case::afternoon_below_watermark(75.0, 4000.0, 15)]
    fn test_emergency_stop_while_producing(#[case] battery: f64, #[case] power: f64, #[case] hour: u32) {
        let decision = engine().evaluate(
            Production,
            &reading(battery, power),
            &weather("clear sky", "clear sky", "clear sky"),
            at_hour(hour),
        );
        assert_eq!(decision.state, Stop);
        assert_eq!(decision.stage, Some(RuleStage::Emergency));
    }

    #[test]
    fn test_emergency_rules_ignore_stopped_load() {
        // Afternoon, battery 75%, strong sun: no enable clause fits at 15:00
        // and the disable watermark applies, so the stage is Disable.
        let decision = engine().evaluate(
            Stop,
            &reading(75.0, 4000.0),
            &weather("clear sky", "clear sky", "clear sky"),
            at_hour(15),
        );
        assert_eq!(decision.state, Stop);
        assert_eq!(decision.stage, Some(RuleStage::Disable));
    }

    #[rstest]
    #[case::surplus_early(60.0, 2500.0, 9, "enable-surplus-1")]
    #[case::surplus_any_battery(10.0, 3600.0, 12, "enable-surplus-4")]
    #[case::full_battery(91.0, 60.0, 16, "enable-full-battery")]
    fn test_enable_clauses(
        #[case] battery: f64,
        #[case] power: f64,
        #[case] hour: u32,
        #[case] expected_rule: &str,
    ) {
        let decision = engine().evaluate(
            Stop,
            &reading(battery, power),
            &weather("overcast clouds", "overcast clouds", "overcast clouds"),
            at_hour(hour),
        );
        assert_eq!(decision.state, Production);
        assert_eq!(decision.rule.as_deref(), Some(expected_rule));
    }

    #[test]
    fn test_outlook_against_three_hour_forecast() {
        let decision = engine().evaluate(
            Stop,
            &reading(66.0, 0.0),
            &weather("clear sky", "light rain", "sunny"),
            at_hour(11),
        );
        assert_eq!(decision.state, Production);
        assert_eq!(decision.rule.as_deref(), Some("enable-outlook-3h-2"));
    }

    #[test]
    fn test_unfavorable_forecast_stops_production() {
        let t = DecisionThresholds {
            disable_battery_pct: 50.0,
            ..Default::default()
        };
        let decision = DecisionEngine::new(&t).evaluate(
            Production,
            &reading(85.0, 40.0),
            &weather("overcast clouds", "overcast clouds", "Thunderstorm with rain"),
            at_hour(13),
        );
        assert_eq!(decision.state, Stop);
        assert_eq!(decision.rule.as_deref(), Some("disable-power"));

        let decision = DecisionEngine::new(&t).evaluate(
            Production,
            &reading(85.0, 800.0),
            &weather("overcast clouds", "overcast clouds", "Thunderstorm with rain"),
            at_hour(13),
        );
        assert_eq!(decision.rule.as_deref(), Some("disable-weather-3h"));
    }

    #[test]
    fn test_keyword_matching_is_case_insensitive() {
        let decision = engine().evaluate(
            Stop,
            &reading(70.0, 100.0),
            &weather("Clear Sky", "SCATTERED CLOUDS", "rain"),
            at_hour(8),
        );
        assert_eq!(decision.state, Production);
    }

    #[test]
    fn test_non_finite_inputs_are_coerced_to_zero() {
        let facts = DeviceReading {
            battery_pct: f64::NAN,
            pv_power_w: f64::INFINITY,
            ..Default::default()
        };
        let decision = engine().evaluate(Production, &facts, &WeatherFacts::fallback(), at_hour(9));
        // Battery reads as 0% -> emergency stop
        assert_eq!(decision.state, Stop);
        assert_eq!(decision.rule.as_deref(), Some("emergency-battery-low"));
    }

    #[test]
    fn test_identical_inputs_are_idempotent() {
        let engine = engine();
        let facts = reading(95.0, 3000.0);
        let w = weather("clear sky", "few clouds", "clear sky");
        let first = engine.evaluate(Stop, &facts, &w, at_hour(9));
        let second = engine.evaluate(first.state, &facts, &w, at_hour(9));
        assert_eq!(second.state, first.state);
        assert!(!second.changed());
    }

    #[test]
    fn test_hysteresis_band_never_changes_state() {
        // Widened band: stop only at or below 50%, enable needs > 90%
        let t = DecisionThresholds {
            disable_battery_pct: 50.0,
            ..Default::default()
        };
        let engine = DecisionEngine::new(&t);
        let neutral = weather("overcast clouds", "overcast clouds", "overcast clouds");

        for prev in [Production, Stop] {
            let mut state = prev;
            for (battery, power) in [(70.0, 500.0), (72.0, 900.0), (68.0, 300.0), (85.0, 1500.0)] {
                let decision = engine.evaluate(state, &reading(battery, power), &neutral, at_hour(13));
                assert!(decision.rule.is_none(), "unexpected rule {:?}", decision.rule);
                state = decision.state;
            }
            assert_eq!(state, prev);
        }
    }

    #[test]
    fn test_rule_table_order() {
        let rules = rule_table(&DecisionThresholds::default());
        let stages: Vec<RuleStage> = rules.iter().map(|r| r.stage).collect();
        let first_enable = stages.iter().position(|s| *s == RuleStage::Enable).unwrap();
        let first_disable = stages.iter().position(|s| *s == RuleStage::Disable).unwrap();
        assert_eq!(stages[0], RuleStage::Safety);
        assert!(stages[1..first_enable].iter().all(|s| *s == RuleStage::Emergency));
        assert!(stages[first_enable..first_disable].iter().all(|s| *s == RuleStage::Enable));
        assert!(stages[first_disable..].iter().all(|s| *s == RuleStage::Disable));
        // 4 outlook clauses x 2 horizons + 4 surplus + full battery
        assert_eq!(first_disable - first_enable, 13);
    }

    proptest! {
        #[test]
        fn prop_overcurrent_always_stops(
            battery in 0.0f64..=100.0,
            power in 0.0f64..10_000.0,
            hot_phase in 2000.5f64..6000.0,
            other in 0.0f64..2000.0,
            hour in 0u32..24,
            producing in any::<bool>(),
            sunny in any::<bool>(),
        ) {
            let prev = if producing { Production } else { Stop };
            let mut facts = reading(battery, power);
            facts.phase_power_w = PhasePowers { l1: other, l2: hot_phase, l3: other, total: 0.0 };
            let sky = if sunny { "clear sky" } else { "heavy intensity rain" };
            let decision = engine().evaluate(prev, &facts, &weather(sky, sky, sky), at_hour(hour));
            prop_assert_eq!(decision.state, Stop);
            prop_assert_eq!(decision.stage, Some(RuleStage::Safety));
        }

        #[test]
        fn prop_low_battery_stops_production(
            battery in 0.0f64..19.99,
            power in 0.0f64..10_000.0,
            hour in 0u32..24,
        ) {
            let decision = engine().evaluate(
                Production,
                &reading(battery, power),
                &weather("clear sky", "clear sky", "clear sky"),
                at_hour(hour),
            );
            prop_assert_eq!(decision.state, Stop);
        }
    }
}
