//! Detection state carried across frames

use crate::config::StateScope;
use crate::detector::FaceBbox;
use crate::landmarks::ImagePointCache;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Eyes-closed debounce state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EyeClosureState {
    /// Counter at zero
    #[default]
    Open,
    /// Below threshold, not yet for enough frames
    Rising,
    /// Below threshold for at least the configured number of frames
    Flagged,
}

/// Consecutive-frame counter for eyes-closed detection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EyeClosureDebouncer {
    counter: u32,
}

impl EyeClosureDebouncer {
    /// Feed one EAR sample, returns whether eyes-closed is raised.
    ///
    /// An undefined EAR leaves the counter untouched and raises nothing.
    pub fn update(&mut self, ear: Option<f64>, threshold: f64, min_frames: u32) -> bool {
        match ear {
            Some(ear) if ear < threshold => {
                self.counter = self.counter.saturating_add(1);
                self.counter >= min_frames
            }
            Some(_) => {
                self.counter = 0;
                false
            }
            None => false,
        }
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn state(&self, min_frames: u32) -> EyeClosureState {
        match self.counter {
            0 => EyeClosureState::Open,
            c if c < min_frames => EyeClosureState::Rising,
            _ => EyeClosureState::Flagged,
        }
    }
}

/// One face slot and the state it owns
#[derive(Debug, Clone)]
pub struct FaceTrack {
    pub id: u64,
    /// Rectangle from the last frame the face was seen in
    pub rect: Option<FaceBbox>,
    pub missed_frames: u32,
    pub debouncer: EyeClosureDebouncer,
    pub image_points: ImagePointCache,
}

impl FaceTrack {
    fn new(id: u64) -> Self {
        Self {
            id,
            rect: None,
            missed_frames: 0,
            debouncer: EyeClosureDebouncer::default(),
            image_points: ImagePointCache::default(),
        }
    }
}

/// State of one monitoring session, owned by the caller
#[derive(Debug, Default)]
pub struct SessionState {
    tracks: Vec<FaceTrack>,
    next_track_id: u64,
    frames_processed: u64,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracks(&self) -> &[FaceTrack] {
        &self.tracks
    }

    pub fn track_mut(&mut self, index: usize) -> Option<&mut FaceTrack> {
        self.tracks.get_mut(index)
    }

    /// Frames that went through the full pipeline
    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    /// Map each detection to a track, returns track indices in detection order.
    ///
    /// `Shared` keeps a single slot for every face. `PerFace` matches
    /// detections to the previous rectangles greedily by IoU, best pair first,
    /// and opens a new track for every unmatched detection.
    pub fn assign(&mut self, faces: &[FaceBbox], scope: StateScope, min_iou: f32) -> Vec<usize> {
        match scope {
            StateScope::Shared => {
                self.tracks.truncate(1);
                if self.tracks.is_empty() {
                    self.open_track();
                }
                if let Some(last) = faces.last() {
                    self.tracks[0].rect = Some(last.clone());
                    self.tracks[0].missed_frames = 0;
                }
                vec![0; faces.len()]
            }
            StateScope::PerFace => self.associate(faces, min_iou),
        }
    }

    fn associate(&mut self, faces: &[FaceBbox], min_iou: f32) -> Vec<usize> {
        let mut candidates: Vec<(f32, usize, usize)> = Vec::new();
        for (d, face) in faces.iter().enumerate() {
            for (t, track) in self.tracks.iter().enumerate() {
                if let Some(rect) = &track.rect {
                    let iou = rect.iou(face);
                    if iou >= min_iou {
                        candidates.push((iou, d, t));
                    }
                }
            }
        }
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut matched: Vec<Option<usize>> = vec![None; faces.len()];
        let mut taken = vec![false; self.tracks.len()];
        for (_, d, t) in candidates {
            if matched[d].is_none() && !taken[t] {
                matched[d] = Some(t);
                taken[t] = true;
            }
        }

        faces
            .iter()
            .zip(matched)
            .map(|(face, slot)| {
                let index = slot.unwrap_or_else(|| self.open_track());
                let track = &mut self.tracks[index];
                track.rect = Some(face.clone());
                track.missed_frames = 0;
                index
            })
            .collect()
    }

    fn open_track(&mut self) -> usize {
        let id = self.next_track_id;
        self.next_track_id += 1;
        self.tracks.push(FaceTrack::new(id));
        debug!("Opened face track {}", id);
        self.tracks.len() - 1
    }

    /// Close out a processed frame: age unseen tracks and drop stale ones
    pub fn finish_frame(&mut self, seen: &[usize], scope: StateScope, max_missed: u32) {
        self.frames_processed += 1;
        if scope == StateScope::Shared {
            return;
        }

        for (i, track) in self.tracks.iter_mut().enumerate() {
            if !seen.contains(&i) {
                track.missed_frames = track.missed_frames.saturating_add(1);
            }
        }
        self.tracks.retain(|track| {
            let keep = track.missed_frames <= max_missed;
            if !keep {
                debug!("Dropped face track {} after {} missed frames", track.id, track.missed_frames);
            }
            keep
        });
    }
}
