//! Per-thread guard against nested instantiate/realize calls.
//!
//! A plan function must not instantiate again, and neither a plan nor a
//! realizer may start a realization. Other threads are unaffected.

use std::cell::RefCell;
use std::fmt;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
  Instantiate,
  Realize,
}

impl fmt::Display for Frame {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Frame::Instantiate => f.write_str("instantiate"),
      Frame::Realize => f.write_str("realize"),
    }
  }
}

thread_local! {
  static CALL_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// Pops its frame when dropped, including during unwinding.
#[must_use = "the frame is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct FrameGuard {
  frame: Frame,
}

impl FrameGuard {
  pub fn frame(&self) -> Frame {
    self.frame
  }
}

impl Drop for FrameGuard {
  fn drop(&mut self) {
    let _ = CALL_STACK.try_with(|stack| {
      stack.borrow_mut().pop();
    });
  }
}

/// Push `frame` onto this thread's stack, or fail if an active frame forbids it.
pub fn enter(frame: Frame) -> Result<FrameGuard> {
  CALL_STACK.with(|stack| {
    let mut stack = stack.borrow_mut();
    let blocker = match frame {
      Frame::Instantiate => stack.iter().rev().find(|f| **f == Frame::Instantiate),
      Frame::Realize => stack.last(),
    };
    if let Some(active) = blocker {
      return Err(Error::Recursion {
        attempted: frame,
        active: *active,
      });
    }
    stack.push(frame);
    Ok(FrameGuard { frame })
  })
}

/// Frames active on the current thread, outermost first.
pub fn active_frames() -> Vec<Frame> {
  CALL_STACK.with(|stack| stack.borrow().clone())
}
