//! Configuration surface (spec.md §6 "Configuration").

#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Nested call frames beyond this depth signal `RecursionError`.
    pub recursion_limit: usize,
    /// Hard cap on a single frame's value stack; exceeding it is
    /// interpreter-fatal, never a user-level exception.
    pub max_stack_per_frame: u32,
    /// Emits one line per executed instruction to stderr.
    pub debug_trace: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            recursion_limit: 1000,
            max_stack_per_frame: 65535,
            debug_trace: false,
        }
    }
}
