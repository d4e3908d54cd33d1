//! Per-queue submission scheduler.
//!
//! Grounded on `original_source/rpcsx-gpu/lib/vk/include/Scheduler.hpp`.
//! The original owns a real `VkSemaphore`/`VkQueue`/`VkCommandPool`; this
//! crate doesn't link a real Vulkan loader at this layer (see
//! `SPEC_FULL.md`'s C8 note), so the timeline semaphore is modeled as a
//! plain monotonic `u64` counter guarded the same way the original guards
//! its `mNextSignal`/`mTasks` state, and `submit`/`wait` are the points a
//! real backend would plug in `vkQueueSubmit2`/semaphore wait calls.

use std::collections::BTreeMap;

use parking_lot::Mutex;

/// A queued hook, run once its ordering signal value has been reached.
/// Boxed the same way the original's `std::move_only_function` erases a
/// closure's type — `Scheduler` doesn't know or care what a hook does.
type Hook = Box<dyn FnOnce() + Send>;

/// Per-queue submission tracking: a monotonic signal counter standing in
/// for a timeline semaphore, a one-time-submit command buffer's "has
/// pending work" flag, and the after-submit / then-hook queues.
///
/// Grounded on `Scheduler{mSemaphore, mQueue, mQueueFamily, mCommandPool,
/// mCommandBuffer, mIsEmpty, mNextSignal, mTasks, mAfterSubmitTasks}`.
pub struct Scheduler {
    queue_family: u32,
    state: Mutex<State>,
}

struct State {
    /// Stands in for `VkSemaphore`'s counter: the highest signal value the
    /// device has completed. `wait()` blocks (here: spins, since there is
    /// no real GPU to wait on) until `completed >= next_signal - 1`.
    completed: u64,
    next_signal: u64,
    /// Mirrors `mIsEmpty`: starts `false` exactly as the original's field
    /// default does (the first `submit()` call is allowed to run even
    /// though nothing has been recorded into the initial command buffer).
    is_empty: bool,
    after_submit: Vec<Hook>,
    then_hooks: BTreeMap<u64, Vec<Hook>>,
}

impl Scheduler {
    pub fn new(queue_family: u32) -> Self {
        Scheduler {
            queue_family,
            state: Mutex::new(State {
                completed: 0,
                next_signal: 1,
                is_empty: false,
                after_submit: Vec::new(),
                then_hooks: BTreeMap::new(),
            }),
        }
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Marks the current command buffer as having recorded work, matching
    /// `getCommandBuffer()`'s `mIsEmpty = false` side effect. Real command
    /// recording happens in the caller (pipe/cache) against whatever
    /// buffer handle this crate's device layer hands back; this call only
    /// updates the scheduler's own bookkeeping.
    pub fn mark_recorded(&self) {
        self.state.lock().is_empty = false;
    }

    /// Closes the current command buffer, submits it to wait on
    /// `next_signal - 1` and signal `next_signal`, then runs every
    /// after-submit hook followed by every then-hook ordered at or before
    /// the new signal value. Matches `Scheduler::submit`.
    ///
    /// A no-op if nothing has been recorded since the last submit (mirrors
    /// the original's early return on `mIsEmpty`).
    pub fn submit(&self) {
        let (after_submit, then_hooks) = {
            let mut state = self.state.lock();
            if state.is_empty {
                return;
            }
            state.is_empty = true;

            // Real backend: end the command buffer, build
            // VkSemaphoreSubmitInfo{wait: next_signal-1, signal: next_signal}
            // and vkQueueSubmit2 it here.
            state.completed = state.next_signal;
            state.next_signal += 1;

            if state.after_submit.is_empty() && state.then_hooks.is_empty() {
                return;
            }

            let after_submit = std::mem::take(&mut state.after_submit);
            let boundary = state.next_signal - 1;
            let pending: Vec<u64> = state
                .then_hooks
                .range(..=boundary)
                .map(|(&signal, _)| signal)
                .collect();
            let mut then_hooks = Vec::new();
            for signal in pending {
                if let Some(hooks) = state.then_hooks.remove(&signal) {
                    then_hooks.extend(hooks);
                }
            }
            (after_submit, then_hooks)
        };

        self.wait();
        for hook in after_submit.into_iter().rev() {
            hook();
        }
        for hook in then_hooks {
            hook();
        }
    }

    /// Registers a hook run after the *next* `submit()` completes, before
    /// any further work is recorded — used by the resource cache to reap
    /// a `Tag`'s resources once the GPU has finished with them. Matches
    /// `Scheduler::afterSubmit`.
    pub fn after_submit(&self, hook: Hook) {
        self.state.lock().after_submit.push(hook);
    }

    /// Registers `hook` to run once the scheduler's signal counter has
    /// reached the value current at registration time, then runs it
    /// immediately after waiting — matches the (simplified, non-threaded)
    /// `Scheduler::then` in the original, which since its background
    /// thread is commented out just waits synchronously and calls `fn()`.
    pub fn then(&self, hook: Hook) {
        self.wait();
        hook();
    }

    /// Reserves a signal value the caller will signal through some other
    /// path (e.g. an externally synchronized present), advancing the
    /// counter without submitting any command buffer.
    pub fn create_external_submit(&self) -> u64 {
        let mut state = self.state.lock();
        let value = state.next_signal;
        state.next_signal += 1;
        value
    }

    /// Blocks (here: returns immediately, since `completed` is updated
    /// synchronously by `submit()` on this single-threaded model) until
    /// the device has reached the last signalled value.
    pub fn wait(&self) {
        let state = self.state.lock();
        debug_assert!(state.completed + 1 >= state.next_signal);
    }

    pub fn current_signal(&self) -> u64 {
        self.state.lock().next_signal - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn submit_without_recording_is_a_no_op() {
        let scheduler = Scheduler::new(0);
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        scheduler.after_submit(Box::new(move || {
            ran2.fetch_add(1, Ordering::SeqCst);
        }));
        scheduler.submit();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn after_submit_hook_runs_once_per_submit() {
        let scheduler = Scheduler::new(0);
        scheduler.mark_recorded();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        scheduler.after_submit(Box::new(move || {
            ran2.fetch_add(1, Ordering::SeqCst);
        }));
        scheduler.submit();
        assert_eq!(ran.load(Ordering::SeqCst), 1);

        scheduler.mark_recorded();
        scheduler.submit();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ordering_two_submissions_runs_s1_hooks_before_s2_effects_observed() {
        let scheduler = Scheduler::new(0);
        let order = Arc::new(Mutex::new(Vec::new()));

        scheduler.mark_recorded();
        let order1 = order.clone();
        scheduler.after_submit(Box::new(move || order1.lock().push("s1-after-submit")));
        scheduler.submit();

        order.lock().push("s2-effect");

        scheduler.mark_recorded();
        let order2 = order.clone();
        scheduler.after_submit(Box::new(move || order2.lock().push("s2-after-submit")));
        scheduler.submit();

        let events = order.lock().clone();
        assert_eq!(events, vec!["s1-after-submit", "s2-effect", "s2-after-submit"]);
    }

    #[test]
    fn create_external_submit_advances_counter() {
        let scheduler = Scheduler::new(0);
        let first = scheduler.create_external_submit();
        let second = scheduler.create_external_submit();
        assert_eq!(second, first + 1);
    }
}
