//! Live insertion of content into the editor.
//!
//! New content is revealed in line batches instead of appearing at once.
//!
//! ```text
//!            start            last batch
//!   Idle ───────────▶ Animating ──────────▶ Completed ──┐
//!                        │                              │ finish
//!                        │ skip                         ▼
//!                        └──────────▶ Skipped ───────▶ Writable
//!                            (remaining lines in one batch)
//! ```
//!
//! The editor is read-only while `Animating` or `Skipped`. Auto-scroll
//! follows the newest line until the user scrolls by hand; after that it
//! stays off for the rest of the run.
//!
//! [`InsertionPlan`] sizes batches so the whole reveal takes roughly
//! `animation.target_ms` regardless of document length.

use anyhow::{bail, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::config::AnimationConfig;
use crate::session::EditorHandle;

/// Batch size and pacing for one insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertionPlan {
    pub batch_size: usize,
    pub delay: Duration,
}

impl InsertionPlan {
    /// Small documents go one line at a time with a longer delay; large
    /// ones use bigger batches on a short fixed delay.
    pub fn for_line_count(lines: usize, config: &AnimationConfig) -> Self {
        let lines = lines.max(1);
        if lines <= config.small_document_lines {
            let per_line = config.target_ms / lines as u64;
            // Not `clamp`: a hand-built config may have min > max; max wins.
            let delay = per_line
                .max(config.min_line_delay_ms)
                .min(config.max_line_delay_ms);
            return Self {
                batch_size: 1,
                delay: Duration::from_millis(delay),
            };
        }

        let delay = config.large_batch_delay_ms.max(1);
        let steps = (config.target_ms / delay).max(1) as usize;
        Self {
            batch_size: lines.div_ceil(steps),
            delay: Duration::from_millis(delay),
        }
    }

    /// Estimated total duration when nothing is skipped.
    pub fn estimated_duration(&self, lines: usize) -> Duration {
        let batches = lines.max(1).div_ceil(self.batch_size.max(1)) as u32;
        self.delay * batches.saturating_sub(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationState {
    Idle,
    Animating,
    Completed,
    Skipped,
    Writable,
}

/// Lines to append in one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub lines: Vec<String>,
    /// 1-based line number of the first line in the batch.
    pub start_line: usize,
    /// Line to scroll to, or `None` once auto-scroll has disengaged.
    pub scroll_to: Option<usize>,
}

/// The insertion state machine, free of timing and I/O.
#[derive(Debug, Clone)]
pub struct InsertionAnimation {
    lines: Vec<String>,
    plan: InsertionPlan,
    cursor: usize,
    state: AnimationState,
    auto_scroll: bool,
}

impl InsertionAnimation {
    pub fn new(content: &str, plan: InsertionPlan) -> Self {
        Self {
            lines: content.split('\n').map(str::to_string).collect(),
            plan,
            cursor: 0,
            state: AnimationState::Idle,
            auto_scroll: true,
        }
    }

    pub fn state(&self) -> AnimationState {
        self.state
    }

    pub fn total_lines(&self) -> usize {
        self.lines.len()
    }

    pub fn inserted_lines(&self) -> usize {
        self.cursor
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self.state, AnimationState::Animating | AnimationState::Skipped)
    }

    pub fn start(&mut self) -> Result<()> {
        if self.state != AnimationState::Idle {
            bail!("insertion already started ({:?})", self.state);
        }
        self.state = AnimationState::Animating;
        Ok(())
    }

    /// Next lines to append. `None` when there is nothing left to insert
    /// in the current state.
    pub fn next_batch(&mut self) -> Option<Batch> {
        let take = match self.state {
            AnimationState::Animating => self.plan.batch_size.max(1),
            AnimationState::Skipped => self.lines.len() - self.cursor,
            _ => return None,
        };
        if self.cursor >= self.lines.len() {
            return None;
        }

        let end = (self.cursor + take).min(self.lines.len());
        let batch = Batch {
            lines: self.lines[self.cursor..end].to_vec(),
            start_line: self.cursor + 1,
            scroll_to: self.auto_scroll.then_some(end),
        };
        self.cursor = end;
        if self.cursor == self.lines.len() && self.state == AnimationState::Animating {
            self.state = AnimationState::Completed;
        }
        Some(batch)
    }

    /// Jump to the end. Only meaningful while animating.
    pub fn skip(&mut self) -> bool {
        if self.state == AnimationState::Animating {
            self.state = AnimationState::Skipped;
            true
        } else {
            false
        }
    }

    /// The user scrolled by hand; stop following the newest line.
    pub fn user_scrolled(&mut self) {
        self.auto_scroll = false;
    }

    /// Return the editor to writable once every line is in.
    pub fn finish(&mut self) -> bool {
        let done = self.cursor == self.lines.len();
        match self.state {
            AnimationState::Completed | AnimationState::Skipped if done => {
                self.state = AnimationState::Writable;
                true
            }
            _ => false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Async driver
// ═══════════════════════════════════════════════════════════════════════

/// Lets a user interrupt a running insertion from another task.
#[derive(Debug, Clone, Default)]
pub struct SkipHandle {
    skipped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl SkipHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip(&self) {
        self.skipped.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimationReport {
    pub batches: usize,
    pub lines: usize,
    pub skipped: bool,
    pub final_state: AnimationState,
}

/// Reveal `content` in `editor` batch by batch.
///
/// The editor is emptied first and is read-only until the last line is in.
pub async fn animate(
    editor: &EditorHandle,
    content: &str,
    plan: InsertionPlan,
    skip: &SkipHandle,
) -> Result<AnimationReport> {
    let mut animation = InsertionAnimation::new(content, plan);
    animation.start()?;
    editor.begin_insertion();
    editor.set_read_only(true);

    let mut batches = 0;
    let mut skipped = false;
    loop {
        if skip.is_skipped() && animation.skip() {
            tracing::debug!(
                inserted = animation.inserted_lines(),
                total = animation.total_lines(),
                "insertion skipped"
            );
            skipped = true;
        }
        if editor.user_has_scrolled() {
            animation.user_scrolled();
        }

        let Some(batch) = animation.next_batch() else {
            break;
        };
        editor.append_lines(&batch.lines);
        if let Some(line) = batch.scroll_to {
            editor.scroll_to(line);
        }
        batches += 1;

        if animation.state() == AnimationState::Animating {
            tokio::select! {
                _ = tokio::time::sleep(plan.delay) => {}
                _ = skip.notify.notified() => {}
            }
        }
    }

    animation.finish();
    editor.set_read_only(false);
    Ok(AnimationReport {
        batches,
        lines: animation.inserted_lines(),
        skipped,
        final_state: animation.state(),
    })
}
