//! Onset-driven cue placement.
//!
//! Two modes: *reposition* moves an existing cue selection onto the nearest
//! non-overlapping onset candidates, *populate* fills a track from scratch
//! with fixed-length cues, best candidates first. Neither mode mutates the
//! timeline directly; every operation is emitted as a forward/backward edit
//! batch and handed to the external undo log.

use serde::Serialize;
use std::cmp::Ordering;

use crate::analysis::onset::OnsetCandidate;

/// Cue length used by populate mode.
pub const POPULATE_CUE_LENGTH_MS: f64 = 500.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct CueId(pub u64);

/// A timed marker on the timeline. The lead-in extends the occupied
/// interval backward from the start; the cue itself runs
/// `[start, start + length]`.
#[derive(Clone, Debug, Serialize)]
pub struct Cue {
    pub id: CueId,
    pub start_ms: f64,
    pub length_ms: f64,
    pub lead_in_ms: f64,
}

impl Cue {
    pub fn end_ms(&self) -> f64 {
        self.start_ms + self.length_ms
    }
}

/// Symmetric interval test: cues collide when either one starts (lead-in
/// included) before the other ends.
pub fn overlaps(a: &Cue, b: &Cue) -> bool {
    a.start_ms - a.lead_in_ms <= b.end_ms() && b.start_ms - b.lead_in_ms <= a.end_ms()
}

/// One reversible timeline mutation.
#[derive(Clone, Debug)]
pub enum CueEdit {
    Move { id: CueId, from_ms: f64, to_ms: f64 },
    Create { cue: Cue },
    Remove { cue: Cue },
}

impl CueEdit {
    pub fn inverted(&self) -> CueEdit {
        match self {
            CueEdit::Move { id, from_ms, to_ms } => CueEdit::Move {
                id: *id,
                from_ms: *to_ms,
                to_ms: *from_ms,
            },
            CueEdit::Create { cue } => CueEdit::Remove { cue: cue.clone() },
            CueEdit::Remove { cue } => CueEdit::Create { cue: cue.clone() },
        }
    }
}

/// Edits making up one user-visible operation.
#[derive(Clone, Debug, Default)]
pub struct EditBatch {
    pub label: String,
    pub edits: Vec<CueEdit>,
}

impl EditBatch {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            edits: Vec::new(),
        }
    }

    /// The undo counterpart: each edit inverted, applied in reverse order.
    pub fn inverted(&self) -> EditBatch {
        EditBatch {
            label: self.label.clone(),
            edits: self.edits.iter().rev().map(CueEdit::inverted).collect(),
        }
    }
}

/// The undo/command collaborator. Receives a forward/backward action pair
/// per user-visible operation; applying either side is the sink's business.
pub trait CommandSink {
    fn submit(&mut self, forward: EditBatch, backward: EditBatch);
}

/// Where a repositioned cue ended up. `resolved` is false when every
/// candidate overlapped some other selected cue and the cue was left at the
/// last position tried.
#[derive(Clone, Debug, Serialize)]
pub struct Placement {
    pub id: CueId,
    pub start_ms: f64,
    pub resolved: bool,
}

/// Options for populate mode.
#[derive(Clone, Copy, Debug)]
pub struct PopulateOptions {
    pub length_ms: f64,
    pub lead_in_ms: f64,
    pub max_cues: Option<usize>,
}

impl Default for PopulateOptions {
    fn default() -> Self {
        Self {
            length_ms: POPULATE_CUE_LENGTH_MS,
            lead_in_ms: 0.0,
            max_cues: None,
        }
    }
}

/// Move each selected cue, in selection order, to the candidate closest to
/// its current start whose interval clears every other selected cue.
///
/// Overlap checks run against the working positions, so a cue placed earlier
/// in the selection is respected by the ones after it. The emitted batch
/// carries one `Move` per cue that actually changed position.
pub fn reposition(
    selection: &[Cue],
    candidates: &[OnsetCandidate],
    sink: &mut dyn CommandSink,
) -> Vec<Placement> {
    let mut working: Vec<Cue> = selection.to_vec();
    let mut placements = Vec::with_capacity(selection.len());
    let mut batch = EditBatch::new("Align cues to onsets");

    for i in 0..working.len() {
        let origin = working[i].start_ms;

        // Candidates by ascending distance from the cue's current start.
        let mut by_distance: Vec<&OnsetCandidate> = candidates.iter().collect();
        by_distance.sort_by(|a, b| {
            (a.time_ms - origin)
                .abs()
                .partial_cmp(&(b.time_ms - origin).abs())
                .unwrap_or(Ordering::Equal)
        });

        let mut resolved = false;
        let mut last_tried = None;
        for candidate in by_distance {
            let mut tentative = working[i].clone();
            tentative.start_ms = candidate.time_ms;
            last_tried = Some(candidate.time_ms);

            let clear = working
                .iter()
                .enumerate()
                .all(|(j, other)| j == i || !overlaps(&tentative, other));
            if clear {
                working[i] = tentative;
                resolved = true;
                break;
            }
        }

        if !resolved {
            if let Some(tried) = last_tried {
                // Candidate list exhausted: the cue stays at the last
                // position tried, flagged so callers can surface it.
                working[i].start_ms = tried;
                log::warn!(
                    "cue {:?}: no non-overlapping candidate, left at {:.1}ms",
                    working[i].id,
                    tried
                );
            }
        }

        if working[i].start_ms != origin {
            batch.edits.push(CueEdit::Move {
                id: working[i].id,
                from_ms: origin,
                to_ms: working[i].start_ms,
            });
        }
        placements.push(Placement {
            id: working[i].id,
            start_ms: working[i].start_ms,
            resolved,
        });
    }

    if !batch.edits.is_empty() {
        let backward = batch.inverted();
        sink.submit(batch, backward);
    }
    placements
}

/// Clear a track's cues and fill it from the candidate list, best energy
/// first. Each candidate gets a fixed-length cue unless it would overlap a
/// cue already placed on the track. Candidates are expected in detector
/// order (energy descending).
pub fn populate(
    existing: &[Cue],
    candidates: &[OnsetCandidate],
    options: &PopulateOptions,
    next_id: &mut u64,
    sink: &mut dyn CommandSink,
) -> Vec<Cue> {
    let mut batch = EditBatch::new("Populate track with detected cues");
    for cue in existing {
        batch.edits.push(CueEdit::Remove { cue: cue.clone() });
    }

    let mut placed: Vec<Cue> = Vec::new();
    for candidate in candidates {
        if let Some(max) = options.max_cues {
            if placed.len() >= max {
                break;
            }
        }
        let cue = Cue {
            id: CueId(*next_id),
            start_ms: candidate.time_ms,
            length_ms: options.length_ms,
            lead_in_ms: options.lead_in_ms,
        };
        if placed.iter().any(|other| overlaps(&cue, other)) {
            continue;
        }
        *next_id += 1;
        batch.edits.push(CueEdit::Create { cue: cue.clone() });
        placed.push(cue);
    }

    log::info!(
        "populate: {} cues placed from {} candidates",
        placed.len(),
        candidates.len()
    );
    let backward = batch.inverted();
    sink.submit(batch, backward);
    placed
}
