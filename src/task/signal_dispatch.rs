//! Signal preemption driver. Grounded on spec.md §4.2's per-tick table,
//! last row: "any unblocked pending signal present -> pre-empt: switch
//! to signal-handler execution regardless of other cause." Completes
//! the wiring `signal::delivery::push_signal_frame` otherwise leaves
//! unreachable: something has to decide, every tick, whether a pending
//! signal is ready and either enter the guest handler or apply the
//! default disposition.

use crate::env::Environment;
use crate::signal::delivery::push_signal_frame;
use crate::signal::sig_set::Signal;
use crate::task::context::Pid;
use crate::task::exit::exit_group;
use crate::task::state::TaskState;

/// signals whose default action does not terminate the process. This
/// simulator models no stopped-process state, so `SIGSTOP`/`SIGTSTP`
/// are discarded rather than actually suspending the context -- the
/// alternative (silently treating them as a no-op "keep running") is
/// what real Linux does anyway for a process already running.
fn default_action_terminates(sig: Signal) -> bool {
    !matches!(sig, Signal::SIGCHLD | Signal::SIGCONT | Signal::SIGSTOP | Signal::SIGTSTP)
}

/// if `pid` has a deliverable signal (pending and not in its blocked
/// mask), act on it and return true. Ignored signals are discarded
/// silently; default-disposition signals either discard (SIGCHLD/
/// SIGCONT/STOP family) or terminate the whole thread group; installed
/// handlers get a real call frame via `push_signal_frame`.
pub fn deliver_pending(env: &mut Environment, pid: Pid) -> bool {
    let popped = {
        let Some(ctx) = env.contexts.get_mut(pid) else { return false };
        ctx.sig_manager.pop_with_mask(ctx.blocked)
    };
    let Some(info) = popped else { return false };

    let action = {
        let Some(ctx) = env.contexts.get(pid) else { return false };
        ctx.sig_actions.lock().unwrap().get(info.signal as u8)
    };

    if action.is_ignored() {
        return true;
    }
    if action.is_default() {
        if default_action_terminates(info.signal) {
            log::info!("pid={pid} terminated by default action of {:?}", info.signal);
            exit_group(&mut env.contexts, &mut env.futex, pid, 128 + info.signal as i32);
        }
        return true;
    }

    let Some(ctx) = env.contexts.get_mut(pid) else { return true };
    let old_mask = ctx.blocked;
    let mem = ctx.memory.clone();
    {
        let mut mem = mem.lock().unwrap();
        push_signal_frame(&mut mem, &mut ctx.regs, &action, &info, old_mask);
    }
    ctx.blocked = old_mask | action.mask_during_handler;
    ctx.state.insert(TaskState::SIGNAL_HANDLER_ACTIVE);
    true
}
