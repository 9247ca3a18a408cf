use crate::transport::ResolveOp;

/// Result of completing a resolve operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The operation was not pending: a stale or duplicate callback
    Stale,
    /// Other operations are still outstanding
    Pending,
    /// That was the last outstanding operation
    Done,
}

/// Outstanding resolve operations of one finding
#[derive(Debug, Clone, Default)]
pub struct PendingResolutions {
    ops: Vec<ResolveOp>,
}

impl PendingResolutions {
    pub fn begin(&mut self, op: ResolveOp) {
        debug_assert!(!self.ops.contains(&op), "{op} started twice");
        self.ops.push(op);
    }

    pub fn complete(&mut self, op: ResolveOp) -> Completion {
        let Some(pos) = self.ops.iter().position(|&o| o == op) else {
            return Completion::Stale;
        };
        self.ops.swap_remove(pos);

        if self.ops.is_empty() {
            Completion::Done
        } else {
            Completion::Pending
        }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Drop every outstanding operation, returning them
    pub fn drain(&mut self) -> Vec<ResolveOp> {
        std::mem::take(&mut self.ops)
    }
}
