//! Portable call-stack capture and on-demand symbolication.

use backtrace::Backtrace;
use std::fmt;

/// A captured call stack: instruction pointers ordered from youngest frame to
/// oldest.
#[derive(Clone, Debug)]
pub struct CallStack {
    ips: Vec<usize>,
}

impl CallStack {
    /// Captures the current thread's call stack, omitting `omit_frames`
    /// topmost frames (in addition to the frames of the capture machinery
    /// itself).
    pub fn capture(omit_frames: usize) -> CallStack {
        let backtrace = Backtrace::new_unresolved();
        let mut stack = CallStack::from_backtrace(&backtrace);
        stack.ips.drain(..omit_frames.min(stack.ips.len()));
        stack
    }

    /// Extracts the instruction pointers out of an already-captured
    /// backtrace.
    pub fn from_backtrace(backtrace: &Backtrace) -> CallStack {
        CallStack {
            ips: backtrace
                .frames()
                .iter()
                .map(|frame| frame.ip() as usize)
                .collect(),
        }
    }

    /// Returns the captured instruction pointers, youngest first.
    pub fn frames(&self) -> &[usize] {
        &self.ips
    }

    /// Returns the number of captured frames.
    pub fn len(&self) -> usize {
        self.ips.len()
    }

    /// Returns whether no frames were captured.
    pub fn is_empty(&self) -> bool {
        self.ips.is_empty()
    }
}

impl fmt::Display for CallStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ip in &self.ips {
            writeln!(f, "  {}", describe_instruction_pointer(*ip))?;
        }
        Ok(())
    }
}

/// Symbolicates a single instruction pointer as
/// `host!<symbol>+<offset>`, falling back to the raw address when no symbol
/// information is available.
pub fn describe_instruction_pointer(ip: usize) -> String {
    let mut description = None;
    backtrace::resolve(ip as *mut _, |symbol| {
        if description.is_some() {
            return;
        }
        if let Some(name) = symbol.name() {
            let offset = symbol
                .addr()
                .map(|addr| ip.saturating_sub(addr as usize))
                .unwrap_or(0);
            description = Some(format!("host!{}+{:#x}", name, offset));
        }
    });
    description.unwrap_or_else(|| format!("host!<unknown>!{:#x}", ip))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_sees_the_calling_frames() {
        let stack = CallStack::capture(0);
        assert!(!stack.is_empty());
    }

    #[test]
    fn omitted_frames_shorten_the_stack() {
        let full = CallStack::capture(0);
        let trimmed = CallStack::capture(2);
        assert!(trimmed.len() <= full.len());
    }

    #[test]
    fn descriptions_are_never_empty() {
        let stack = CallStack::capture(0);
        let ip = stack.frames()[0];
        assert!(!describe_instruction_pointer(ip).is_empty());
    }
}
