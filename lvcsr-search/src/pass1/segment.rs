//! Short-pause segmentation of long input
//!
//! A frame counts as pause when the best word ending there is a silence
//! word, or when no word ends there at all. A pause run at least
//! `min_pause_frames` long followed by speech ends the current segment.
//! The first qualifying pause of a segment is skipped so that leading
//! silence never produces an empty segment.

use crate::types::WordId;

/// Where the next segment starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentBreak {
    /// First frame of the pause run (the next segment starts here)
    pub pause_start: usize,
    /// Frames `0 .. end` belong to the finished segment
    pub end: usize,
    /// Best word at the beginning of the pause, used to restart the search
    pub resume_word: Option<WordId>,
}

#[derive(Debug, Clone)]
pub struct PauseDetector {
    min_frames: usize,
    in_pause: bool,
    duration: usize,
    first_pause: bool,
    pause_start: usize,
    pause_word: Option<WordId>,
}

impl PauseDetector {
    pub fn new(min_frames: usize) -> Self {
        Self {
            min_frames,
            in_pause: false,
            duration: 0,
            first_pause: true,
            pause_start: 0,
            pause_word: None,
        }
    }

    /// Start a new segment
    pub fn reset(&mut self) {
        *self = Self::new(self.min_frames);
    }

    /// Feed the best word ending at `frame` (None when no word ended).
    /// Returns a break when a long enough pause has just been left.
    pub fn observe(&mut self, frame: usize, best: Option<WordId>, is_pause: bool) -> Option<SegmentBreak> {
        match (self.in_pause, is_pause) {
            (true, true) => {
                self.duration += 1;
                if self.pause_word.is_none() {
                    self.pause_word = best;
                }
                None
            }
            (false, true) => {
                self.in_pause = true;
                self.duration = 1;
                self.pause_start = frame;
                self.pause_word = best;
                None
            }
            (true, false) => {
                self.in_pause = false;
                if self.duration < self.min_frames {
                    return None;
                }
                if self.first_pause {
                    self.first_pause = false;
                    return None;
                }
                Some(SegmentBreak {
                    pause_start: self.pause_start,
                    end: frame,
                    resume_word: self.pause_word,
                })
            }
            (false, false) => None,
        }
    }
}
