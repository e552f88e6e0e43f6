//! What a subscriber shows for the current run.
//!
//! The log keeps every text line of the run, the image strip keeps the three
//! most recent debug images, and `Finished` asks for a board snapshot refresh.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

use crate::protocol::Event;

/// Number of debug images kept on screen
pub const IMAGE_SLOTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub content: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugImage {
    pub title: String,
    /// `data:image/jpeg;base64,` URI
    pub content: String,
    pub received_at: DateTime<Utc>,
}

/// What changed after applying one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewChange {
    LogAppended,
    ImageShown,
    Cleared,
    /// Run complete; the board snapshot should be fetched again
    RefreshBoard,
}

#[derive(Debug, Default)]
pub struct PipelineView {
    log: Vec<LogLine>,
    images: VecDeque<DebugImage>,
    completed_runs: u64,
}

impl PipelineView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &Event) -> ViewChange {
        self.apply_at(event, Utc::now())
    }

    pub fn apply_at(&mut self, event: &Event, now: DateTime<Utc>) -> ViewChange {
        match event {
            Event::Text { content } => {
                self.log.push(LogLine {
                    content: content.clone(),
                    received_at: now,
                });
                ViewChange::LogAppended
            }
            Event::Image { title, content } => {
                if self.images.len() == IMAGE_SLOTS {
                    self.images.pop_front();
                }
                self.images.push_back(DebugImage {
                    title: title.clone(),
                    content: content.clone(),
                    received_at: now,
                });
                ViewChange::ImageShown
            }
            Event::Clear => {
                self.log.clear();
                self.images.clear();
                ViewChange::Cleared
            }
            Event::Finished => {
                self.completed_runs += 1;
                ViewChange::RefreshBoard
            }
        }
    }

    pub fn log(&self) -> &[LogLine] {
        &self.log
    }

    /// Oldest first
    pub fn images(&self) -> impl Iterator<Item = &DebugImage> {
        self.images.iter()
    }

    pub fn completed_runs(&self) -> u64 {
        self.completed_runs
    }
}
