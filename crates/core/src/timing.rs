use std::time::{Duration, Instant};

/// One timing event: elapsed time since session start, and the delta since
/// the previous recorded event. Question-issue markers carry a zero delta,
/// the convention for "the clock resets here".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingSample {
    pub at: Duration,
    pub delta: Duration,
}

/// Per-session timing bookkeeping. Answer deltas feed the response-latency
/// part of the grading rubric; zero-delta question markers are excluded
/// from the average.
#[derive(Debug)]
pub struct Timings {
    started: Instant,
    samples: Vec<TimingSample>,
}

impl Timings {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            samples: Vec::new(),
        }
    }

    /// Wall-clock time since the session started. Advisory display state
    /// only, never authoritative over session completion.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn samples(&self) -> &[TimingSample] {
        &self.samples
    }

    fn last_event_at(&self) -> Duration {
        self.samples.last().map(|s| s.at).unwrap_or_default()
    }

    /// Records an accepted student input with its delta since the last event.
    pub fn record_answer(&mut self) {
        let at = self.started.elapsed();
        let delta = at.saturating_sub(self.last_event_at());
        self.samples.push(TimingSample { at, delta });
    }

    /// Records a question issue with a zero delta, so the time a student
    /// spends thinking about a fresh question is not billed to the previous
    /// answer.
    pub fn record_question_marker(&mut self) {
        let at = self.started.elapsed();
        self.samples.push(TimingSample {
            at,
            delta: Duration::ZERO,
        });
    }

    /// Drops the most recent sample. Used to roll back an answer whose
    /// grading step failed and therefore never happened.
    pub fn discard_last(&mut self) {
        self.samples.pop();
    }

    pub fn average_answer_delta(&self) -> Option<Duration> {
        average_answer_delta(&self.samples)
    }
}

/// Mean of the non-zero deltas. `None` when no answer sample exists, so an
/// all-marker history never divides by zero.
pub fn average_answer_delta(samples: &[TimingSample]) -> Option<Duration> {
    let deltas: Vec<Duration> = samples
        .iter()
        .map(|s| s.delta)
        .filter(|d| !d.is_zero())
        .collect();
    if deltas.is_empty() {
        return None;
    }
    let total: Duration = deltas.iter().sum();
    Some(total / deltas.len() as u32)
}
