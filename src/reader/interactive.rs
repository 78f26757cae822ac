//! Interactive error prompt (spec §7): on an unrecoverable read error, a
//! reader attached to a terminal asks the operator whether to abort the
//! whole restore, close the saveset early, retry the read, skip this one
//! entry, or skip every subsequent failure the same way.
//!
//! Grounded on `examples/original_source/ftbreader.cpp`'s interactive
//! `ouch()`/"a/c/r/s" prompt loop. §9's open question — what happens with
//! no controlling tty — is resolved in `DESIGN.md`: fall back to a fixed
//! `skip` policy rather than block forever on a read that will never come.

use std::io::{self, BufRead, IsTerminal, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractiveAction {
    Abort,
    Close,
    Retry,
    Skip,
    SkipAll,
}

/// Remembers a prior `skipall` answer so later failures in the same
/// restore don't re-prompt.
pub struct InteractiveHandler {
    skip_all: bool,
}

impl InteractiveHandler {
    pub fn new() -> Self {
        Self { skip_all: false }
    }

    /// Ask what to do about an unrecoverable read at `detail`. Never
    /// prompts twice after a `skipall` answer, and never prompts at all
    /// without a controlling tty (DESIGN.md decision #3).
    pub fn on_unrecoverable(&mut self, detail: &str) -> InteractiveAction {
        if self.skip_all {
            return InteractiveAction::Skip;
        }
        if !io::stdin().is_terminal() {
            return InteractiveAction::Skip;
        }
        loop {
            eprint!("ftbackup: unrecoverable read error ({detail}) — abort/close/retry/skip/skipall? ");
            let _ = io::stderr().flush();
            let mut line = String::new();
            if io::stdin().lock().read_line(&mut line).unwrap_or(0) == 0 {
                return InteractiveAction::Skip;
            }
            match line.trim().to_ascii_lowercase().as_str() {
                "a" | "abort" => return InteractiveAction::Abort,
                "c" | "close" => return InteractiveAction::Close,
                "r" | "retry" => return InteractiveAction::Retry,
                "s" | "skip" => return InteractiveAction::Skip,
                "skipall" => {
                    self.skip_all = true;
                    return InteractiveAction::SkipAll;
                }
                _ => continue,
            }
        }
    }
}

impl Default for InteractiveHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skipall_sticks_without_reprompting() {
        let mut h = InteractiveHandler::new();
        h.skip_all = true;
        assert_eq!(h.on_unrecoverable("test"), InteractiveAction::Skip);
        assert_eq!(h.on_unrecoverable("test"), InteractiveAction::Skip);
    }
}
