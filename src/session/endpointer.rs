//! Utterance endpointing by silence debouncing.
//!
//! Derives utterance boundaries from recognition events: every event re-arms
//! a quiet-period deadline, and when the deadline elapses with a non-empty
//! working transcript the buffered text becomes one utterance.

use crate::session::messages::{SpeechEvent, Utterance};
use std::time::{Duration, Instant};
use tracing::debug;

/// Silence-based utterance endpointer.
///
/// Pure state machine: the owner drives time through [`deadline`] and
/// [`take_due`], so the silence timer is cancelable by construction (the
/// owner simply stops polling after [`clear`]).
///
/// [`deadline`]: SilenceEndpointer::deadline
/// [`take_due`]: SilenceEndpointer::take_due
/// [`clear`]: SilenceEndpointer::clear
pub struct SilenceEndpointer {
    quiet_period: Duration,
    /// Working transcript. Replaced wholesale by each newer final event so a
    /// long session never accumulates stale finals.
    transcript: String,
    /// Volatile preview built from interim events after the latest final.
    preview: String,
    /// Sequence index of the last consumed final event.
    last_final_index: Option<u64>,
    /// Arrival time of the first event contributing to the current
    /// transcript.
    started_at: Option<Instant>,
    deadline: Option<Instant>,
}

impl SilenceEndpointer {
    /// Create an endpointer with the given quiet period.
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            transcript: String::new(),
            preview: String::new(),
            last_final_index: None,
            started_at: None,
            deadline: None,
        }
    }

    /// Consume one recognition event.
    ///
    /// A final event with a sequence index above the last consumed final
    /// replaces the working transcript; interim events after that final
    /// concatenate onto the preview. Stale events (at or below the last
    /// final's index) are dropped. Every accepted event re-arms the silence
    /// deadline.
    pub fn ingest(&mut self, event: &SpeechEvent, now: Instant) {
        if let Some(last) = self.last_final_index
            && event.sequence_index <= last
        {
            debug!(
                sequence_index = event.sequence_index,
                "dropping stale recognition event"
            );
            return;
        }

        if event.is_final {
            self.transcript = event.text.trim().to_owned();
            self.preview.clear();
            self.last_final_index = Some(event.sequence_index);
        } else {
            self.preview.push_str(&event.text);
        }

        self.started_at.get_or_insert(now);
        self.deadline = Some(now + self.quiet_period);
    }

    /// Deadline at which the working transcript finalizes, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Finalize the working transcript if the deadline has elapsed.
    ///
    /// Returns `None` when the deadline has not passed, or when the
    /// transcript is empty or whitespace-only (in which case the buffered
    /// state is discarded and no utterance is emitted for silence).
    pub fn take_due(&mut self, now: Instant) -> Option<Utterance> {
        let deadline = self.deadline?;
        if now < deadline {
            return None;
        }

        let text = std::mem::take(&mut self.transcript);
        let started_at = self.started_at.take().unwrap_or(now);
        self.preview.clear();
        self.deadline = None;

        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        Some(Utterance {
            text: text.to_owned(),
            started_at,
            finalized_at: deadline,
        })
    }

    /// The line shown to the user while listening: the working transcript
    /// followed by any interim preview.
    pub fn preview_line(&self) -> String {
        match (self.transcript.is_empty(), self.preview.is_empty()) {
            (true, true) => String::new(),
            (false, true) => self.transcript.clone(),
            (true, false) => self.preview.clone(),
            (false, false) => format!("{} {}", self.transcript, self.preview),
        }
    }

    /// Discard all buffered state and disarm the deadline.
    ///
    /// Also forgets the last-consumed final index: sequence indexes restart
    /// with each stream instance, and events from a superseded instance are
    /// already dropped upstream by the instance-token check.
    pub fn clear(&mut self) {
        self.transcript.clear();
        self.preview.clear();
        self.last_final_index = None;
        self.started_at = None;
        self.deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn final_event(index: u64, text: &str) -> SpeechEvent {
        SpeechEvent {
            instance: 0,
            sequence_index: index,
            text: text.into(),
            is_final: true,
        }
    }

    fn interim_event(index: u64, text: &str) -> SpeechEvent {
        SpeechEvent {
            instance: 0,
            sequence_index: index,
            text: text.into(),
            is_final: false,
        }
    }

    const QUIET: Duration = Duration::from_millis(1800);

    #[test]
    fn one_final_plus_quiet_period_emits_one_utterance() {
        let mut ep = SilenceEndpointer::new(QUIET);
        let t0 = Instant::now();

        ep.ingest(&final_event(0, "me estoy ahogando"), t0);
        assert_eq!(ep.deadline(), Some(t0 + QUIET));

        // Not yet due.
        assert!(ep.take_due(t0 + QUIET / 2).is_none());

        let utterance = ep.take_due(t0 + QUIET).expect("utterance due");
        assert_eq!(utterance.text, "me estoy ahogando");
        assert_eq!(utterance.started_at, t0);
        assert_eq!(utterance.finalized_at, t0 + QUIET);

        // Exactly one: state cleared, deadline disarmed.
        assert!(ep.deadline().is_none());
        assert!(ep.take_due(t0 + QUIET * 2).is_none());
    }

    #[test]
    fn newer_final_replaces_transcript_instead_of_appending() {
        let mut ep = SilenceEndpointer::new(QUIET);
        let t0 = Instant::now();

        ep.ingest(&final_event(0, "abc"), t0);
        ep.ingest(&final_event(1, "xyz"), t0 + Duration::from_millis(500));

        let utterance = ep.take_due(t0 + Duration::from_secs(10)).expect("due");
        assert_eq!(utterance.text, "xyz");
    }

    #[test]
    fn every_event_rearms_the_deadline() {
        let mut ep = SilenceEndpointer::new(QUIET);
        let t0 = Instant::now();

        ep.ingest(&final_event(0, "sigo"), t0);
        let t1 = t0 + Duration::from_millis(1000);
        ep.ingest(&interim_event(1, "hablando"), t1);

        assert_eq!(ep.deadline(), Some(t1 + QUIET));
        // The original deadline has passed but the re-armed one has not.
        assert!(ep.take_due(t0 + QUIET).is_none());
    }

    #[test]
    fn whitespace_only_transcript_emits_nothing() {
        let mut ep = SilenceEndpointer::new(QUIET);
        let t0 = Instant::now();

        ep.ingest(&final_event(0, "   "), t0);
        assert!(ep.take_due(t0 + QUIET).is_none());
        assert!(ep.deadline().is_none());
    }

    #[test]
    fn interim_events_build_a_preview_until_the_next_final() {
        let mut ep = SilenceEndpointer::new(QUIET);
        let t0 = Instant::now();

        ep.ingest(&final_event(0, "primera frase"), t0);
        ep.ingest(&interim_event(1, "y "), t0);
        ep.ingest(&interim_event(2, "algo mas"), t0);
        assert_eq!(ep.preview_line(), "primera frase y algo mas");

        // A newer final replaces the transcript and clears the preview.
        ep.ingest(&final_event(3, "segunda frase"), t0);
        assert_eq!(ep.preview_line(), "segunda frase");
    }

    #[test]
    fn stale_events_are_dropped() {
        let mut ep = SilenceEndpointer::new(QUIET);
        let t0 = Instant::now();

        ep.ingest(&final_event(5, "actual"), t0);
        ep.ingest(&final_event(3, "viejo"), t0);
        ep.ingest(&interim_event(4, " ruido"), t0);

        assert_eq!(ep.preview_line(), "actual");
    }

    #[test]
    fn clear_discards_buffered_state() {
        let mut ep = SilenceEndpointer::new(QUIET);
        let t0 = Instant::now();

        ep.ingest(&final_event(0, "descartar"), t0);
        ep.clear();

        assert!(ep.deadline().is_none());
        assert_eq!(ep.preview_line(), "");
        assert!(ep.take_due(t0 + QUIET).is_none());
    }
}
