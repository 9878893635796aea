//! Canned-reply device.

use crate::port::{Framing, MockDevice};
use std::collections::VecDeque;

/// Answers each request with the next queued reply.
///
/// Once the queue is exhausted every further request gets no reply at all,
/// which looks like a board that stopped talking.
#[derive(Debug, Clone)]
pub struct ScriptedDevice {
    framing: Framing,
    replies: VecDeque<String>,
}

impl ScriptedDevice {
    /// Line-framed device (axis controller style requests).
    pub fn lines<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            framing: Framing::Line,
            replies: replies.into_iter().map(Into::into).collect(),
        }
    }

    /// Byte-framed device (rotator style single-character requests).
    pub fn bytes<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            framing: Framing::Byte,
            replies: replies.into_iter().map(Into::into).collect(),
        }
    }

    /// Append another reply to the queue.
    pub fn push(&mut self, reply: impl Into<String>) {
        self.replies.push_back(reply.into());
    }

    /// Replies not yet consumed.
    pub fn remaining(&self) -> usize {
        self.replies.len()
    }
}

impl MockDevice for ScriptedDevice {
    fn framing(&self) -> Framing {
        self.framing
    }

    fn respond(&mut self, _request: &str) -> String {
        self.replies.pop_front().unwrap_or_default()
    }
}
