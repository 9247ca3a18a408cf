use shared::types::Method;

#[derive(Debug, Clone, Copy)]
struct MethodGate {
    /// Browse has not yet reported all-for-now
    in_progress: bool,
    /// Outstanding tasks blocking the end of the initial scan
    count: u32,
    done: bool,
}

impl Default for MethodGate {
    fn default() -> Self {
        Self {
            in_progress: true,
            count: 1,
            done: false,
        }
    }
}

/// Tracks the startup scan of each method.
///
/// Each method starts with one outstanding task, held by its browse session
/// until all-for-now. Findings created while the method is still in progress
/// add one task each and release it when they finish resolving (or die).
/// A method is done when its count drops to zero; that transition happens at
/// most once.
#[derive(Debug, Clone, Default)]
pub struct InitialScanGate {
    methods: [MethodGate; Method::COUNT],
}

impl InitialScanGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self, method: Method) -> bool {
        self.methods[method.index()].done
    }

    #[cfg(test)]
    pub fn pending_count(&self, method: Method) -> u32 {
        self.methods[method.index()].count
    }

    /// Attribute a new finding to the initial scan, if it is still running.
    /// Returns whether the finding was attributed.
    pub fn attach(&mut self, method: Method) -> bool {
        let gate = &mut self.methods[method.index()];
        if gate.in_progress {
            gate.count += 1;
        }
        gate.in_progress
    }

    /// Browse reported all-for-now. Returns true if this completed the method.
    pub fn all_for_now(&mut self, method: Method) -> bool {
        let gate = &mut self.methods[method.index()];
        if !gate.in_progress {
            return false;
        }
        gate.in_progress = false;
        self.release(method)
    }

    /// Release one outstanding task. Returns true if this completed the method.
    ///
    /// # Panics
    ///
    /// Panics if the method has no outstanding task.
    pub fn release(&mut self, method: Method) -> bool {
        let gate = &mut self.methods[method.index()];
        assert!(gate.count > 0, "initial scan counter underflow for {method}");

        gate.count -= 1;
        if gate.count == 0 && !gate.done {
            gate.done = true;
            return true;
        }
        false
    }

    /// Force every method to done, returning the methods that were not done yet.
    /// Used when discovery is disabled.
    pub fn finish_all(&mut self) -> Vec<Method> {
        Method::ALL
            .iter()
            .copied()
            .filter(|&method| {
                let gate = &mut self.methods[method.index()];
                gate.in_progress = false;
                gate.count = 0;
                !std::mem::replace(&mut gate.done, true)
            })
            .collect()
    }
}
