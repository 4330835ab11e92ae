// src/tracker.rs
//
// Distance-based multi-object tracker for bio-behavioral video streams.
// Binds per-frame detections to persistent track identities and keeps
// identities alive across brief occlusions.
//
// Design:
//   - Greedy global matching over the detection/track distance matrix;
//     the most spatially unambiguous detections claim their track first
//   - Acceptance radius grows linearly with coasting time, tolerating
//     accumulated drift uncertainty
//   - Match quality blends spatial proximity, body-size consistency and
//     track maturity into one multiplicative factor, which doubles as the
//     EMA weight for the track's smoothed size
//   - Coasting tracks extrapolate along their smoothed velocity, clamped
//     to one nominal frame displacement

use crate::config::TrackingConfig;
use crate::types::{euclidean, Detection, ValueMap};
use tracing::{debug, info};

/// EMA weight for the per-frame displacement estimate.
const VELOCITY_EMA_WEIGHT: f64 = 0.1;

/// Per-coasting-frame shrink applied to an unclamped velocity.
const VELOCITY_DECAY: f64 = 0.95;

/// Coasting inflation step for the range factor (one tenth per frame).
const COAST_INFLATION_STEP: f64 = 0.1;

/// Below this, a track's mean size carries no evidence and cannot veto.
const MIN_MEAN_SIZE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    /// Matched this frame.
    Active,
    /// Unmatched but not yet evicted; position extrapolated.
    Coasting,
}

/// A persistent identity bound to detections over time.
#[derive(Debug, Clone)]
pub struct Track {
    /// Assigned once at spawn, monotonically increasing, never reused.
    pub id: u64,
    /// Current best position estimate (measured or extrapolated).
    pub position: (f64, f64),
    /// Exponentially-smoothed per-frame displacement.
    pub velocity: (f64, f64),
    /// Exponentially-smoothed body-size estimate.
    pub mean_size: f64,
    /// Consecutive matched frames.
    pub active_count: u32,
    /// Consecutive unmatched frames.
    pub inactive_count: u32,
    pub last_active_frame: i64,
    /// Transient per-frame flag: did a detection bind this frame?
    pub assigned: bool,
    /// Last bound detection's passthrough fields.
    pub original_values: ValueMap,
}

impl Track {
    fn new(id: u64, detection: &Detection, frame_index: i64) -> Self {
        Self {
            id,
            position: detection.position,
            velocity: (0.0, 0.0),
            mean_size: detection.size,
            active_count: 0,
            inactive_count: 0,
            last_active_frame: frame_index,
            assigned: true,
            original_values: detection.original_values.clone(),
        }
    }

    pub fn state(&self) -> TrackState {
        if self.assigned {
            TrackState::Active
        } else {
            TrackState::Coasting
        }
    }

    /// Bind a detection to this track and fold its measurements into the
    /// smoothed estimates.
    fn assign(
        &mut self,
        detection: &Detection,
        distance: f64,
        frame_index: i64,
        config: &TrackingConfig,
    ) -> MatchEvent {
        let active_factor =
            ((self.active_count as f64 + 1.0) / (config.min_active as f64 + 1.0)).min(1.0);

        let range_factor = if self.inactive_count == 0 {
            1.0 - distance / config.move_distance
        } else {
            let inflation = (self.inactive_count as f64 * COAST_INFLATION_STEP).min(1.0);
            (1.0 - distance / (config.move_distance * inflation)) / inflation
        }
        .clamp(0.0, 1.0);

        let reference_size = if detection.size > 0.0 {
            detection.size
        } else {
            self.mean_size
        };
        let length_factor = if self.mean_size < MIN_MEAN_SIZE {
            1.0
        } else {
            (1.0 - (reference_size - self.mean_size).abs() / self.mean_size).max(0.0)
        };

        let match_factor = active_factor * range_factor * length_factor;

        self.mean_size = self.mean_size * (1.0 - match_factor) + reference_size * match_factor;

        let displacement = (
            detection.position.0 - self.position.0,
            detection.position.1 - self.position.1,
        );
        self.velocity = (
            self.velocity.0 * (1.0 - VELOCITY_EMA_WEIGHT) + displacement.0 * VELOCITY_EMA_WEIGHT,
            self.velocity.1 * (1.0 - VELOCITY_EMA_WEIGHT) + displacement.1 * VELOCITY_EMA_WEIGHT,
        );

        self.position = detection.position;
        self.active_count += 1;
        self.inactive_count = 0;
        self.last_active_frame = frame_index;
        self.assigned = true;
        self.original_values = detection.original_values.clone();

        MatchEvent {
            frame: frame_index,
            track_id: self.id,
            distance,
            match_factor,
            active_factor,
            range_factor,
            length_factor,
        }
    }

    /// Advance an unmatched track along its velocity. The single-frame
    /// displacement is bounded by `move_distance`; below the bound the
    /// stored velocity shrinks 5% per coasting frame.
    fn coast(&mut self, move_distance: f64) {
        let magnitude = (self.velocity.0 * self.velocity.0 + self.velocity.1 * self.velocity.1)
            .sqrt();
        if magnitude > move_distance {
            let scale = move_distance / magnitude;
            self.velocity = (self.velocity.0 * scale, self.velocity.1 * scale);
            self.position.0 += self.velocity.0;
            self.position.1 += self.velocity.1;
        } else {
            self.position.0 += self.velocity.0;
            self.position.1 += self.velocity.1;
            self.velocity = (
                self.velocity.0 * VELOCITY_DECAY,
                self.velocity.1 * VELOCITY_DECAY,
            );
        }
        self.active_count = 0;
        self.inactive_count += 1;
    }
}

/// One accepted assignment, recorded for the debug side channel.
#[derive(Debug, Clone)]
pub struct MatchEvent {
    pub frame: i64,
    pub track_id: u64,
    pub distance: f64,
    pub match_factor: f64,
    pub active_factor: f64,
    pub range_factor: f64,
    pub length_factor: f64,
}

/// Summary returned when a tracker is finished.
#[derive(Debug, Clone, Copy)]
pub struct TrackerSummary {
    pub tracks_spawned: u64,
    pub tracks_live: usize,
}

pub struct Tracker {
    config: TrackingConfig,
    tracks: Vec<Track>,
    next_id: u64,
    match_events: Vec<MatchEvent>,
}

impl Tracker {
    pub fn new(config: TrackingConfig) -> Self {
        Self {
            config,
            tracks: Vec::with_capacity(32),
            next_id: 1,
            match_events: Vec::new(),
        }
    }

    /// Process one frame's detections, in strictly increasing frame order.
    /// Returns the live-track set: matched tracks carry this frame's
    /// passthrough fields, coasting tracks their last-known ones.
    pub fn process_frame(&mut self, frame_index: i64, detections: &[Detection]) -> &[Track] {
        self.match_events.clear();

        // Age out tracks past the inactivity threshold. Eviction is
        // immediate and permanent; the id is never reassigned.
        let max_inactive = self.config.max_inactive as i64;
        self.tracks.retain(|track| {
            if frame_index - track.last_active_frame > max_inactive {
                info!(
                    "Track {} evicted at frame {} (inactive since frame {})",
                    track.id, frame_index, track.last_active_frame
                );
                return false;
            }
            true
        });
        for track in &mut self.tracks {
            track.assigned = false;
        }

        // Distance matrix + greedy matching. Each detection's candidates
        // are sorted by ascending distance, and detections are processed in
        // ascending order of their own best distance so the least ambiguous
        // claims happen first.
        let mut matched = vec![false; detections.len()];
        if !self.tracks.is_empty() && !detections.is_empty() {
            let mut candidate_rows: Vec<(usize, Vec<(usize, f64)>)> = detections
                .iter()
                .enumerate()
                .map(|(di, detection)| {
                    let mut row: Vec<(usize, f64)> = self
                        .tracks
                        .iter()
                        .enumerate()
                        .map(|(ti, track)| (ti, euclidean(detection.position, track.position)))
                        .collect();
                    row.sort_by(|a, b| a.1.total_cmp(&b.1));
                    (di, row)
                })
                .collect();
            candidate_rows.sort_by(|a, b| a.1[0].1.total_cmp(&b.1[0].1));

            for (di, row) in &candidate_rows {
                for (ti, distance) in row {
                    let track = &mut self.tracks[*ti];
                    if track.assigned {
                        continue;
                    }
                    let gate = self.config.max_move_distance
                        + track.inactive_count as f64 * self.config.move_distance;
                    if *distance < gate {
                        let event =
                            track.assign(&detections[*di], *distance, frame_index, &self.config);
                        debug!(
                            "Track {} matched at frame {} (distance {:.2}, factor {:.3})",
                            event.track_id, frame_index, event.distance, event.match_factor
                        );
                        self.match_events.push(event);
                        matched[*di] = true;
                        break;
                    }
                }
            }
        }

        // Unmatched detections spawn new tracks.
        for (di, detection) in detections.iter().enumerate() {
            if !matched[di] {
                let track = Track::new(self.next_id, detection, frame_index);
                debug!(
                    "Track {} spawned at frame {} ({:.1},{:.1})",
                    track.id, frame_index, track.position.0, track.position.1
                );
                self.next_id += 1;
                self.tracks.push(track);
            }
        }

        // Unmatched tracks coast: extrapolate along decayed velocity.
        let move_distance = self.config.move_distance;
        for track in &mut self.tracks {
            if !track.assigned {
                track.coast(move_distance);
            }
        }

        &self.tracks
    }

    pub fn live_tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Assignments accepted during the most recent frame.
    pub fn last_match_events(&self) -> &[MatchEvent] {
        &self.match_events
    }

    pub fn finish(self) -> TrackerSummary {
        TrackerSummary {
            tracks_spawned: self.next_id - 1,
            tracks_live: self.tracks.len(),
        }
    }
}
