/// Crawl state definitions
///
/// A page (and, through its root page, a whole crawl session) moves through these
/// states exactly once, in the order the pipeline allows.
use std::fmt;

/// Represents the current stage of a page in the crawl pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    // ===== Active States =====
    /// Known but not yet started
    Pending,

    /// Plain HTTP fetch in flight
    Fetching,

    /// Script-executing render in flight
    Rendering,

    /// Text and links being pulled out of the HTML
    Extracting,

    /// Discovered links being normalized, filtered and queued
    Linking,

    // ===== Terminal States =====
    /// Page finished and its document persisted (or deliberately skipped)
    Done,

    /// Page could not be turned into a document
    Failed,
}

impl PipelineState {
    /// Returns true if no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Returns true if the transition `self -> next` is permitted
    ///
    /// `Failed` is reachable from every active state; everything else follows
    /// `Pending -> Fetching -> {Rendering | Extracting} -> Linking -> Done`,
    /// with `Rendering -> Extracting` for the render fallback. A fetch that yields
    /// a duplicate page may go straight to `Done`.
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;

        if self.is_terminal() {
            return false;
        }

        match (self, next) {
            (_, Failed) => true,
            (Pending, Fetching) => true,
            (Fetching, Rendering) | (Fetching, Extracting) | (Fetching, Done) => true,
            (Rendering, Extracting) => true,
            (Extracting, Linking) | (Extracting, Done) => true,
            (Linking, Done) => true,
            _ => false,
        }
    }

    /// Converts the state to its stored string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Rendering => "rendering",
            Self::Extracting => "extracting",
            Self::Linking => "linking",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Parses a state from its stored string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "fetching" => Some(Self::Fetching),
            "rendering" => Some(Self::Rendering),
            "extracting" => Some(Self::Extracting),
            "linking" => Some(Self::Linking),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Records the path a page takes through the pipeline
///
/// Illegal transitions are refused and leave the trail unchanged.
#[derive(Debug, Clone)]
pub struct StateTrail {
    states: Vec<PipelineState>,
}

impl StateTrail {
    pub fn new() -> Self {
        Self {
            states: vec![PipelineState::Pending],
        }
    }

    pub fn current(&self) -> PipelineState {
        *self.states.last().unwrap_or(&PipelineState::Pending)
    }

    /// Moves to `next`, returning false if the transition is not allowed
    pub fn advance(&mut self, next: PipelineState) -> bool {
        if self.current().can_transition_to(next) {
            self.states.push(next);
            true
        } else {
            tracing::warn!(from = %self.current(), to = %next, "refused pipeline transition");
            false
        }
    }

    pub fn states(&self) -> &[PipelineState] {
        &self.states
    }

    /// True if `seq` appears in order (not necessarily adjacent) in the trail
    pub fn passed_through(&self, seq: &[PipelineState]) -> bool {
        let mut wanted = seq.iter().peekable();
        for state in &self.states {
            if wanted.peek() == Some(&state) {
                wanted.next();
            }
        }
        wanted.peek().is_none()
    }
}

impl Default for StateTrail {
    fn default() -> Self {
        Self::new()
    }
}
