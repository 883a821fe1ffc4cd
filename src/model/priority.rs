// src/model/priority.rs

//! Two-tier priority policy attached to every sequence.

use std::fmt;

/// Highest priority a sequence or host threshold can carry.
pub const MAX_PRIORITY: u8 = 5;

/// Scheduling policy of a sequence.
///
/// The first `maxjobs` running jobs are admitted at `priority`; once that
/// cap is reached the sequence may continue at `priority2` for up to
/// `maxjobs2` further jobs. A cap of zero means unlimited. `maxperhost`
/// bounds how many of the sequence's jobs may share one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityPolicy {
    pub priority: u8,
    pub maxjobs: u32,
    pub priority2: u8,
    pub maxjobs2: u32,
    pub maxperhost: u32,
}

impl Default for PriorityPolicy {
    fn default() -> Self {
        Self {
            priority: 3,
            maxjobs: 0,
            priority2: 0,
            maxjobs2: 0,
            maxperhost: 0,
        }
    }
}

impl PriorityPolicy {
    /// Decode a ten-digit preset: `maxjobs pri maxjobs2 pri2 maxperhost`,
    /// two digits each. Anything that is not ten digits yields the default.
    pub fn from_preset(code: &str) -> Self {
        if code.len() != 10 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Self::default();
        }
        let field = |i: usize| code[i..i + 2].parse::<u32>().unwrap_or(0);
        Self {
            maxjobs: field(0),
            priority: clamp_priority(field(2)),
            maxjobs2: field(4),
            priority2: clamp_priority(field(6)),
            maxperhost: field(8),
        }
    }

    /// Parse the argument forms accepted by `SETSCHED sched`:
    ///
    /// - a named preset (`default`, `offhours`, `nice`, `xnice`, `hold`)
    /// - a bare priority digit `0`..`5`
    /// - `maxjobs pri`
    /// - `maxjobs pri maxjobs2 pri2`
    /// - `maxjobs pri maxjobs2 pri2 maxperhost`
    pub fn from_args(args: &[&str]) -> Option<Self> {
        let num = |s: &str| s.parse::<u32>().ok();

        match args {
            [single] => match single.to_lowercase().as_str() {
                "default" => Some(Self::from_preset("0003000000")),
                "offhours" => Some(Self::from_preset("0001000000")),
                "nice" => Some(Self::from_preset("0403000200")),
                "xnice" => Some(Self::from_preset("0202000100")),
                "hold" => Some(Self::from_preset("0000000000")),
                digit @ ("0" | "1" | "2" | "3" | "4" | "5") => Some(Self {
                    priority: digit.parse().ok()?,
                    ..Self::default()
                }),
                _ => None,
            },
            [maxjobs, pri] => Some(Self {
                maxjobs: num(maxjobs)?,
                priority: clamp_priority(num(pri)?),
                ..Self::zeroed()
            }),
            [maxjobs, pri, maxjobs2, pri2] => Some(Self {
                maxjobs: num(maxjobs)?,
                priority: clamp_priority(num(pri)?),
                maxjobs2: num(maxjobs2)?,
                priority2: clamp_priority(num(pri2)?),
                maxperhost: 0,
            }),
            [maxjobs, pri, maxjobs2, pri2, maxperhost] => Some(Self {
                maxjobs: num(maxjobs)?,
                priority: clamp_priority(num(pri)?),
                maxjobs2: num(maxjobs2)?,
                priority2: clamp_priority(num(pri2)?),
                maxperhost: num(maxperhost)?,
            }),
            _ => None,
        }
    }

    fn zeroed() -> Self {
        Self {
            priority: 0,
            maxjobs: 0,
            priority2: 0,
            maxjobs2: 0,
            maxperhost: 0,
        }
    }

    /// Priority at which the sequence competes given `running` jobs already
    /// admitted. Zero means the sequence has exhausted every tier.
    pub fn effective_priority(&self, running: u32) -> u8 {
        if self.maxjobs == 0 || running < self.maxjobs {
            return self.priority;
        }
        if self.maxjobs2 != 0 && running >= self.maxjobs.saturating_add(self.maxjobs2) {
            return 0;
        }
        self.priority2
    }

    /// The `info.seq` lines that persist this policy.
    pub fn record_lines(&self) -> Vec<String> {
        vec![
            format!("priority {}", self.priority),
            format!("maxjobs {}", self.maxjobs),
            format!("priority2 {}", self.priority2),
            format!("maxjobs2 {}", self.maxjobs2),
            format!("maxperhost {}", self.maxperhost),
        ]
    }
}

pub fn clamp_priority(value: u32) -> u8 {
    value.min(u32::from(MAX_PRIORITY)) as u8
}

impl fmt::Display for PriorityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cap = |n: u32| {
            if n == 0 {
                "unlimited".to_string()
            } else {
                n.to_string()
            }
        };
        write!(f, "{} jobs at pri {}", cap(self.maxjobs), self.priority)?;
        if self.maxjobs > 0 && self.priority2 > 0 {
            write!(f, ", {} jobs at pri {}", cap(self.maxjobs2), self.priority2)?;
        }
        if self.maxperhost > 0 {
            write!(f, ", no more than {} jobs per server", self.maxperhost)?;
        }
        Ok(())
    }
}
