use std::fmt;
use std::str::FromStr;

/// Status of a single job, stored on disk as a single character.
///
/// - `W` waiting
/// - `S` shipped to a host, not yet confirmed running
/// - `R` running
/// - `B` bad (failed)
/// - `D` done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JobStatus {
    #[default]
    Waiting,
    Shipped,
    Running,
    Bad,
    Done,
}

impl JobStatus {
    pub fn as_char(self) -> char {
        match self {
            JobStatus::Waiting => 'W',
            JobStatus::Shipped => 'S',
            JobStatus::Running => 'R',
            JobStatus::Bad => 'B',
            JobStatus::Done => 'D',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'W' => Some(JobStatus::Waiting),
            'S' => Some(JobStatus::Shipped),
            'R' => Some(JobStatus::Running),
            'B' => Some(JobStatus::Bad),
            'D' => Some(JobStatus::Done),
            _ => None,
        }
    }

    /// Shipped and running both occupy a host slot.
    pub fn is_running(self) -> bool {
        matches!(self, JobStatus::Shipped | JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .chars()
            .next()
            .and_then(JobStatus::from_char)
            .ok_or_else(|| format!("invalid job status: {s:?} (expected one of W S R B D)"))
    }
}

/// Status of a sequence.
///
/// `Private` (`X`) marks a sequence that is finished or removed and will be
/// dropped from the queue at the next cleanup pass; `Moving` (`M`) is a
/// transient state used by external tools and is treated like `Private`
/// for scheduling purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SequenceStatus {
    #[default]
    Ready,
    Postponed,
    Killed,
    Private,
    Moving,
}

impl SequenceStatus {
    pub fn as_char(self) -> char {
        match self {
            SequenceStatus::Ready => 'R',
            SequenceStatus::Postponed => 'P',
            SequenceStatus::Killed => 'K',
            SequenceStatus::Private => 'X',
            SequenceStatus::Moving => 'M',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'R' => Some(SequenceStatus::Ready),
            'P' => Some(SequenceStatus::Postponed),
            'K' => Some(SequenceStatus::Killed),
            'X' => Some(SequenceStatus::Private),
            'M' => Some(SequenceStatus::Moving),
            _ => None,
        }
    }
}

impl fmt::Display for SequenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl FromStr for SequenceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .chars()
            .next()
            .and_then(SequenceStatus::from_char)
            .ok_or_else(|| format!("invalid sequence status: {s:?} (expected one of R P K X M)"))
    }
}

/// Liveness state of a worker host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HostStatus {
    Up,
    /// Administratively taken out of rotation (`DELSERVER`).
    Down,
    /// No response within the liveness window.
    Dead,
    #[default]
    Unknown,
}

impl HostStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HostStatus::Up => "up",
            HostStatus::Down => "down",
            HostStatus::Dead => "dead",
            HostStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "up" => Ok(HostStatus::Up),
            "down" => Ok(HostStatus::Down),
            "dead" => Ok(HostStatus::Dead),
            "unknown" => Ok(HostStatus::Unknown),
            other => Err(format!(
                "invalid host status: {other} (expected up, down, dead or unknown)"
            )),
        }
    }
}
