use crate::engine::{FrameId, ThreadId};

/// Caller hints about which frame an operation targets, any of them may be absent.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameTarget {
    pub frame_id: Option<FrameId>,
    pub thread_id: Option<ThreadId>,
}

/// One way of finding a frame. Strategies are tried in order until one yields a frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FrameStrategy {
    /// Frame id given by the caller.
    Explicit(FrameId),
    /// Topmost frame of a caller-given thread.
    ThreadTop(ThreadId),
    /// Frame or thread selected in the engine.
    Selected,
    /// Topmost frame of the first thread the session reports.
    FirstThreadTop,
}

impl FrameTarget {
    pub fn new(frame_id: Option<FrameId>, thread_id: Option<ThreadId>) -> Self {
        Self {
            frame_id,
            thread_id,
        }
    }

    /// Resolution pipeline for these hints.
    pub fn strategies(&self) -> Vec<FrameStrategy> {
        match (self.frame_id, self.thread_id) {
            (Some(frame), _) => vec![FrameStrategy::Explicit(frame)],
            (None, Some(thread)) => vec![FrameStrategy::ThreadTop(thread)],
            (None, None) => vec![FrameStrategy::Selected, FrameStrategy::FirstThreadTop],
        }
    }
}
