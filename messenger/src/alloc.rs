//! Fallible allocation for messenger construction.
//!
//! Every buffer and owned string that `Messenger::create` builds goes through
//! an [`Allocator`], so each step can fail cleanly instead of aborting, and
//! tests can fail any single step on purpose.

use std::collections::VecDeque;

use crate::error::{MessengerError, MessengerResult};

pub(crate) trait Allocator {
    fn reserve<T>(
        &mut self,
        what: &'static str,
        buffer: &mut VecDeque<T>,
        additional: usize,
    ) -> MessengerResult<()>;

    /// Builds an owned string out of `parts`.
    fn concat(&mut self, what: &'static str, parts: &[&str]) -> MessengerResult<String>;

    fn copy_str(&mut self, what: &'static str, value: &str) -> MessengerResult<String> {
        self.concat(what, &[value])
    }
}

#[derive(Debug, Default)]
pub(crate) struct SystemAllocator;

impl Allocator for SystemAllocator {
    fn reserve<T>(
        &mut self,
        what: &'static str,
        buffer: &mut VecDeque<T>,
        additional: usize,
    ) -> MessengerResult<()> {
        buffer
            .try_reserve(additional)
            .map_err(|e| MessengerError::ResourceExhausted(format!("{what}: {e}")))
    }

    fn concat(&mut self, what: &'static str, parts: &[&str]) -> MessengerResult<String> {
        let len = parts.iter().map(|p| p.len()).sum();
        let mut out = String::new();
        out.try_reserve_exact(len)
            .map_err(|e| MessengerError::ResourceExhausted(format!("{what}: {e}")))?;
        parts.iter().for_each(|p| out.push_str(p));
        Ok(out)
    }
}

/// Succeeds like [`SystemAllocator`] except for the `fail_at`-th call.
#[cfg(test)]
#[derive(Debug)]
pub(crate) struct FailingAllocator {
    pub(crate) fail_at: Option<usize>,
    pub(crate) calls: usize,
}

#[cfg(test)]
impl FailingAllocator {
    pub(crate) fn never() -> Self {
        Self {
            fail_at: None,
            calls: 0,
        }
    }

    pub(crate) fn at(index: usize) -> Self {
        Self {
            fail_at: Some(index),
            calls: 0,
        }
    }

    fn tick(&mut self, what: &'static str) -> MessengerResult<()> {
        let index = self.calls;
        self.calls += 1;
        if self.fail_at == Some(index) {
            return Err(MessengerError::ResourceExhausted(format!(
                "{what}: injected failure at call {index}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
impl Allocator for FailingAllocator {
    fn reserve<T>(
        &mut self,
        what: &'static str,
        buffer: &mut VecDeque<T>,
        additional: usize,
    ) -> MessengerResult<()> {
        self.tick(what)?;
        SystemAllocator.reserve(what, buffer, additional)
    }

    fn concat(&mut self, what: &'static str, parts: &[&str]) -> MessengerResult<String> {
        self.tick(what)?;
        SystemAllocator.concat(what, parts)
    }
}
