//! Retention tier schedules
//!
//! A schedule is a small fixed set of named tiers. Each tier has a minimum
//! interval between snapshots and a number of snapshots to retain
//! (`0` = unlimited). A schedule-wide `slop` is subtracted from every
//! interval so that a scheduler firing a little early does not skip a tier.

use crate::error::ScheduleConfigError;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// The fixed set of tier names
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierName {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl TierName {
    pub const ALL: [TierName; 5] = [
        TierName::Hourly,
        TierName::Daily,
        TierName::Weekly,
        TierName::Monthly,
        TierName::Yearly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TierName::Hourly => "hourly",
            TierName::Daily => "daily",
            TierName::Weekly => "weekly",
            TierName::Monthly => "monthly",
            TierName::Yearly => "yearly",
        }
    }

    /// Default minimum interval
    ///
    /// Each is slightly shorter than the nominal cadence to absorb cron
    /// kickoff jitter.
    pub fn default_interval(&self) -> Duration {
        match self {
            TierName::Hourly => Duration::minutes(55),
            TierName::Daily => Duration::hours(23),
            TierName::Weekly => Duration::days(6) + Duration::hours(12),
            TierName::Monthly => Duration::days(30),
            TierName::Yearly => Duration::days(364) + Duration::hours(12),
        }
    }
}

impl fmt::Display for TierName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TierName {
    type Err = ScheduleConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TierName::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ScheduleConfigError::UnknownTier(s.to_string()))
    }
}

/// A named retention policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tier {
    pub name: TierName,
    pub min_interval: Duration,
    /// Snapshots to retain; `0` means unlimited
    pub keep_count: u32,
}

impl Tier {
    pub fn new(name: TierName, min_interval: Duration, keep_count: u32) -> Self {
        Self {
            name,
            min_interval,
            keep_count,
        }
    }

    /// Tier with its default interval
    pub fn with_default_interval(name: TierName, keep_count: u32) -> Self {
        Self::new(name, name.default_interval(), keep_count)
    }
}

/// Scalar as written in a config file
///
/// Keep counts are validated here rather than by the deserializer so that a
/// bad value is reported as a schedule error naming the tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarSpec {
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for ScalarSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarSpec::Int(n) => write!(f, "{}", n),
            ScalarSpec::Float(x) => write!(f, "{}", x),
            ScalarSpec::Text(s) => write!(f, "'{}'", s),
        }
    }
}

/// Tier definition as written in a config file
///
/// Either a bare keep count (`daily = 7`) or a table
/// (`weekly = { keep = 4, interval = "6d12h" }`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TierSpec {
    Keep(ScalarSpec),
    Detailed {
        keep: ScalarSpec,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        interval: Option<String>,
    },
}

impl TierSpec {
    fn parts(&self) -> (&ScalarSpec, Option<&str>) {
        match self {
            TierSpec::Keep(keep) => (keep, None),
            TierSpec::Detailed { keep, interval } => (keep, interval.as_deref()),
        }
    }
}

fn keep_count(tier: &str, value: &ScalarSpec) -> Result<u32, ScheduleConfigError> {
    let n = match value {
        ScalarSpec::Int(n) => *n,
        ScalarSpec::Text(s) => s.trim().parse::<i64>().map_err(|_| {
            ScheduleConfigError::NonIntegerKeep {
                tier: tier.to_string(),
                value: value.to_string(),
            }
        })?,
        ScalarSpec::Float(_) => {
            return Err(ScheduleConfigError::NonIntegerKeep {
                tier: tier.to_string(),
                value: value.to_string(),
            })
        }
    };
    if n < 0 {
        return Err(ScheduleConfigError::NegativeKeep {
            tier: tier.to_string(),
            value: n,
        });
    }
    u32::try_from(n).map_err(|_| ScheduleConfigError::NonIntegerKeep {
        tier: tier.to_string(),
        value: value.to_string(),
    })
}

/// Parse a compact duration such as `55m`, `23h`, `6d12h` or `1w`
///
/// Units: `s`, `m`, `h`, `d`, `w`. Every number needs a unit.
pub fn parse_interval(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total = Duration::zero();
    let mut digits = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        if digits.is_empty() {
            return Err(format!("expected a number before '{}'", c));
        }
        let n: i64 = digits
            .parse()
            .map_err(|_| format!("number too large: {}", digits))?;
        let part = match c {
            's' => Duration::try_seconds(n),
            'm' => Duration::try_minutes(n),
            'h' => Duration::try_hours(n),
            'd' => Duration::try_days(n),
            'w' => Duration::try_weeks(n),
            other => return Err(format!("unknown unit '{}'", other)),
        }
        .ok_or_else(|| "duration out of range".to_string())?;
        total = total
            .checked_add(&part)
            .ok_or_else(|| "duration out of range".to_string())?;
        digits.clear();
    }
    if !digits.is_empty() {
        return Err(format!("missing unit after '{}'", digits));
    }
    Ok(total)
}

/// Render a duration in the same compact form `parse_interval` accepts
pub fn format_interval(d: Duration) -> String {
    let mut secs = d.num_seconds();
    if secs == 0 {
        return "0s".to_string();
    }
    let mut out = String::new();
    if secs < 0 {
        out.push('-');
        secs = -secs;
    }
    for (unit, size) in [("d", 86_400), ("h", 3_600), ("m", 60), ("s", 1)] {
        if secs >= size {
            out.push_str(&format!("{}{}", secs / size, unit));
            secs %= size;
        }
    }
    out
}

/// The statically configured set of tiers for a site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierSchedule {
    tiers: BTreeMap<TierName, Tier>,
    slop: Duration,
}

impl TierSchedule {
    /// Build a schedule, rejecting empty tier sets and oversize slop
    pub fn new(
        tiers: impl IntoIterator<Item = Tier>,
        slop: Duration,
    ) -> Result<Self, ScheduleConfigError> {
        let tiers: BTreeMap<TierName, Tier> = tiers.into_iter().map(|t| (t.name, t)).collect();
        if tiers.is_empty() {
            return Err(ScheduleConfigError::Empty);
        }
        if slop < Duration::zero() {
            return Err(ScheduleConfigError::Slop {
                input: format_interval(slop),
                reason: "must not be negative".to_string(),
            });
        }
        for tier in tiers.values() {
            if tier.min_interval <= Duration::zero() {
                return Err(ScheduleConfigError::Interval {
                    tier: tier.name.to_string(),
                    input: format_interval(tier.min_interval),
                    reason: "must be positive".to_string(),
                });
            }
            if slop >= tier.min_interval {
                return Err(ScheduleConfigError::SlopTooLarge {
                    tier: tier.name.to_string(),
                });
            }
        }
        Ok(Self { tiers, slop })
    }

    /// Build a schedule from config-file definitions
    pub fn from_specs<'a>(
        specs: impl IntoIterator<Item = (&'a String, &'a TierSpec)>,
        slop: &str,
    ) -> Result<Self, ScheduleConfigError> {
        let slop = parse_interval(slop).map_err(|reason| ScheduleConfigError::Slop {
            input: slop.to_string(),
            reason,
        })?;

        let mut tiers = Vec::new();
        for (name, spec) in specs {
            let tier_name: TierName = name.parse()?;
            let (keep, interval) = spec.parts();
            let keep = keep_count(name, keep)?;
            let min_interval = match interval {
                Some(raw) => {
                    parse_interval(raw).map_err(|reason| ScheduleConfigError::Interval {
                        tier: name.clone(),
                        input: raw.to_string(),
                        reason,
                    })?
                }
                None => tier_name.default_interval(),
            };
            tiers.push(Tier::new(tier_name, min_interval, keep));
        }
        Self::new(tiers, slop)
    }

    pub fn get(&self, name: TierName) -> Option<&Tier> {
        self.tiers.get(&name)
    }

    /// Look up a tier by its index key
    pub fn get_by_key(&self, name: &str) -> Option<&Tier> {
        name.parse::<TierName>().ok().and_then(|n| self.tiers.get(&n))
    }

    pub fn tiers(&self) -> impl Iterator<Item = &Tier> {
        self.tiers.values()
    }

    pub fn slop(&self) -> Duration {
        self.slop
    }

    /// Interval after slop has been applied
    pub fn effective_interval(&self, tier: &Tier) -> Duration {
        tier.min_interval - self.slop
    }
}
