//! Quote and Construct Context Tracking
//!
//! Small value types recording quote nesting, per matched-pair scan and per
//! nested command list. The whole stack is copied by `save_state` and
//! restored wholesale, so a failed speculative parse can never leave a stray
//! frame behind.

/// Single/double quote flags with a save stack for nested scans
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuoteState {
    pub single: bool,
    pub double: bool,
    stack: Vec<(bool, bool)>,
}

impl QuoteState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Save the current flags and start a fresh, unquoted level.
    pub fn push(&mut self) {
        self.stack.push((self.single, self.double));
        self.single = false;
        self.double = false;
    }

    pub fn pop(&mut self) {
        if let Some((single, double)) = self.stack.pop() {
            self.single = single;
            self.double = double;
        }
    }

    pub fn in_quotes(&self) -> bool {
        self.single || self.double
    }

    /// Whether the enclosing level was inside double quotes
    pub fn outer_double(&self) -> bool {
        self.stack.last().map(|&(_, d)| d).unwrap_or(false)
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}

/// One quote frame per nested command list (`$(...)`, `<(...)`, funsub).
/// A `#` or quote inside a substitution is judged against the frame of that
/// substitution, not against quotes that were open around it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextStack {
    frames: Vec<QuoteState>,
}

impl Default for ContextStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextStack {
    pub fn new() -> Self {
        Self {
            frames: vec![QuoteState::new()],
        }
    }

    pub fn current(&self) -> &QuoteState {
        // the bottom frame is never removed
        &self.frames[self.frames.len() - 1]
    }

    pub fn current_mut(&mut self) -> &mut QuoteState {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    /// Open a fresh, unquoted frame. Frames are dropped by restoring a saved
    /// copy of the whole stack.
    pub fn push(&mut self) {
        self.frames.push(QuoteState::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_state_push_pop() {
        let mut q = QuoteState::new();
        q.double = true;
        q.push();
        assert!(!q.in_quotes());
        assert!(q.outer_double());
        q.single = true;
        q.pop();
        assert!(q.double);
        assert!(!q.single);
        assert_eq!(q.depth(), 0);
        // popping an empty stack is a no-op
        q.pop();
        assert!(q.double);
    }

    #[test]
    fn test_nested_frame_starts_unquoted() {
        let mut ctx = ContextStack::new();
        ctx.current_mut().double = true;
        let saved = ctx.clone();
        ctx.push();
        assert!(!ctx.current().in_quotes());
        ctx.current_mut().single = true;
        ctx = saved;
        assert!(ctx.current().double);
        assert!(!ctx.current().single);
    }
}
