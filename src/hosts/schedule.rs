// src/hosts/schedule.rs

//! Weekly availability table: 7 days x 24 hours, each slot holding the
//! host's priority threshold and usable CPU count.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::model::MAX_PRIORITY;

pub const SLOTS_PER_WEEK: usize = 7 * 24;

static AVAIL_LINE: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)(?:-(\d+))?\s+(\d+)(?:-(\d+))?\s+(\d+)\s+(\d+)\s*$")
});

/// One `avail` line: `days hours priority cpus`, e.g. `1-5 9-17 4 2`.
///
/// Day and hour ranges wrap around, so `5-1` covers Friday through Monday
/// and `22-6` covers the night.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailWindow {
    pub day_start: u8,
    pub day_end: u8,
    pub hour_start: u8,
    pub hour_end: u8,
    pub priority: u8,
    pub cpus: u32,
}

impl AvailWindow {
    pub fn parse(line: &str) -> Result<Self, String> {
        let re = AVAIL_LINE.as_ref().map_err(|e| e.to_string())?;
        let caps = re
            .captures(line)
            .ok_or_else(|| format!("malformed avail line {line:?} (expected \"days hours pri cpus\")"))?;

        let num = |i: usize| -> Option<u32> { caps.get(i).and_then(|m| m.as_str().parse().ok()) };

        let day_start = num(1).ok_or("bad day")?;
        let day_end = num(2).unwrap_or(day_start);
        let hour_start = num(3).ok_or("bad hour")?;
        let hour_end = num(4).unwrap_or(hour_start);
        let priority = num(5).ok_or("bad priority")?;
        let cpus = num(6).ok_or("bad cpu count")?;

        if day_start > 6 || day_end > 6 {
            return Err(format!("avail line {line:?}: days must be within 0-6"));
        }
        if hour_start > 23 || hour_end > 23 {
            return Err(format!("avail line {line:?}: hours must be within 0-23"));
        }
        if priority > u32::from(MAX_PRIORITY) {
            return Err(format!(
                "avail line {line:?}: priority must be within 0-{MAX_PRIORITY}"
            ));
        }

        Ok(Self {
            day_start: day_start as u8,
            day_end: day_end as u8,
            hour_start: hour_start as u8,
            hour_end: hour_end as u8,
            priority: priority as u8,
            cpus,
        })
    }
}

impl fmt::Display for AvailWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{} {}-{} {} {}",
            self.day_start, self.day_end, self.hour_start, self.hour_end, self.priority, self.cpus
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeeklySchedule {
    priority: Vec<u8>,
    cpus: Vec<u32>,
}

impl WeeklySchedule {
    /// Every slot open at `priority` with `cpus` CPUs.
    pub fn uniform(priority: u8, cpus: u32) -> Self {
        Self {
            priority: vec![priority; SLOTS_PER_WEEK],
            cpus: vec![cpus; SLOTS_PER_WEEK],
        }
    }

    /// Build from `avail` windows; later windows override earlier ones.
    /// Without any window the host is open all week at threshold 1.
    pub fn from_windows(windows: &[AvailWindow], default_cpus: u32) -> Self {
        let mut schedule = Self::uniform(1, default_cpus);
        for w in windows {
            schedule.apply(w);
        }
        schedule
    }

    fn apply(&mut self, w: &AvailWindow) {
        let mut day_end = u32::from(w.day_end);
        let mut hour_end = u32::from(w.hour_end);
        if day_end < u32::from(w.day_start) {
            day_end += 7;
        }
        if hour_end < u32::from(w.hour_start) {
            hour_end += 24;
        }
        for d in u32::from(w.day_start)..=day_end {
            for h in u32::from(w.hour_start)..=hour_end {
                let idx = slot_index(d % 7, h % 24);
                self.priority[idx] = w.priority;
                self.cpus[idx] = w.cpus;
            }
        }
    }

    /// Threshold and CPU count for a weekday (0 = Sunday) and hour.
    /// The threshold is clamped to 1..=5.
    pub fn slot(&self, weekday: u32, hour: u32) -> (u8, u32) {
        let idx = slot_index(weekday % 7, hour % 24);
        (self.priority[idx].clamp(1, MAX_PRIORITY), self.cpus[idx])
    }
}

fn slot_index(day: u32, hour: u32) -> usize {
    (day * 24 + hour) as usize
}
