//! Frame liveness stamps.

/// Remembers the last frame an item was used in.
///
/// Render effects, per-view and per-frame resource group entries are allocated
/// lazily the first time they are touched in a frame; [`FrameStamp::mark_as_used`]
/// reports exactly that first touch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStamp {
    last_frame_used: u64,
}

impl FrameStamp {
    #[must_use]
    pub const fn new() -> Self {
        Self { last_frame_used: 0 }
    }

    /// Marks the item used in `frame`. Returns `true` only on the first call of
    /// the frame.
    #[inline]
    pub fn mark_as_used(&mut self, frame: u64) -> bool {
        if self.last_frame_used == frame {
            return false;
        }
        self.last_frame_used = frame;
        true
    }

    #[inline]
    #[must_use]
    pub const fn is_used_during_this_frame(&self, frame: u64) -> bool {
        self.last_frame_used == frame
    }

    #[inline]
    #[must_use]
    pub const fn last_frame_used(&self) -> u64 {
        self.last_frame_used
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_mark_in_frame_returns_true() {
        let mut stamp = FrameStamp::new();
        assert!(stamp.mark_as_used(5));
        assert!(!stamp.mark_as_used(5));
        assert!(stamp.is_used_during_this_frame(5));
        assert!(!stamp.is_used_during_this_frame(6));
        assert!(stamp.mark_as_used(6));
    }
}
