// Copyright (c) 2026 Palimpsest Contributors. Licensed under AGPLv3.
//! Event Sampler — burst throttling.
//!
//! Producers (pointer drags, continuous resizes) can emit hundreds of events
//! per second; the sampler bounds that to at most one emission per window,
//! latest-wins.
//!
//! # Semantics
//! - First event, or any event arriving after the window has elapsed, is
//!   emitted immediately; a pending buffered event is superseded by it
//! - Events inside the window replace the single buffered slot
//! - `flush` emits the buffered event regardless of elapsed time
//! - A zero window disables batching entirely
//!
//! Sampler state is updated *before* the caller sees the emission, so a
//! failing sink cannot leave the sampler inconsistent.

use crate::event::EventDraft;
use std::time::{Duration, Instant};

pub struct EventSampler {
    window: Duration,
    buffered: Option<EventDraft>,
    buffered_at: Option<Instant>,
    last_emission: Option<Instant>,
}

impl EventSampler {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            buffered: None,
            buffered_at: None,
            last_emission: None,
        }
    }

    /// Offer an event. Returns the event to emit now, if any; `None` means it
    /// was buffered (replacing any earlier buffered event).
    pub fn record_event(&mut self, draft: EventDraft) -> Option<EventDraft> {
        let now = Instant::now();
        let window_open = self
            .last_emission
            .map(|at| now.duration_since(at) >= self.window)
            .unwrap_or(true);

        if self.window.is_zero() || window_open {
            // Latest wins: anything still buffered is superseded.
            self.buffered = None;
            self.buffered_at = None;
            self.last_emission = Some(now);
            return Some(draft);
        }

        self.buffered = Some(draft);
        self.buffered_at = Some(now);
        None
    }

    /// Emit the buffered event regardless of elapsed time. No-op when the
    /// buffer is empty.
    pub fn flush(&mut self) -> Option<EventDraft> {
        let draft = self.buffered.take()?;
        self.buffered_at = None;
        self.last_emission = Some(Instant::now());
        Some(draft)
    }

    /// Change the window for subsequent events only.
    pub fn set_sampling_interval(&mut self, window: Duration) {
        self.window = window;
    }

    pub fn has_buffered(&self) -> bool {
        self.buffered.is_some()
    }

    /// Age of the currently buffered event, for backpressure monitoring.
    pub fn buffered_age(&self) -> Option<Duration> {
        self.buffered_at.map(|at| at.elapsed())
    }
}
