//! The element task: drives a processor until told otherwise.
//!
//! While running, the task alternates a non-blocking command poll with
//! one processing round; any blocked port I/O inside the round is woken
//! by the port aborts that precede a stop. While parked it blocks on
//! the command channel and costs nothing.

use super::io::FailureSide;
use super::{Element, ElementState};
use crate::error::Error;
use crate::event::ElementStatus;
use crossbeam_channel::TryRecvError;
use tracing::{debug, error, trace};

/// Control messages handled by the task between processing rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Resume,
    Pause,
    Stop,
    Destroy,
}

pub(crate) fn run_loop(el: &Element) {
    debug!(tag = %el.tag(), "element task started");
    loop {
        let cmd = if el.state() == ElementState::Running {
            match el.inner.cmd_rx.try_recv() {
                Ok(cmd) => Some(cmd),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => Some(Command::Destroy),
            }
        } else {
            match el.inner.cmd_rx.recv() {
                Ok(cmd) => Some(cmd),
                Err(_) => Some(Command::Destroy),
            }
        };

        if let Some(cmd) = cmd {
            trace!(tag = %el.tag(), ?cmd, "element command");
            match cmd {
                Command::Resume => handle_resume(el),
                Command::Pause => handle_pause(el),
                Command::Stop => handle_stop(el),
                Command::Destroy => {
                    handle_stop(el);
                    break;
                }
            }
            continue;
        }

        process_round(el);
    }
    el.finish_task();
    debug!(tag = %el.tag(), "element task exited");
}

fn handle_resume(el: &Element) {
    if el.state().is_terminal() {
        debug!(tag = %el.tag(), "resume ignored in terminal state");
        return;
    }
    match el.ensure_open() {
        Ok(()) => el.transition(ElementState::Running, ElementStatus::Running),
        Err(e) => {
            error!(tag = %el.tag(), error = %e, "processor open failed");
            el.io().abort_ports();
            el.transition(ElementState::Error, ElementStatus::ErrorOpen);
        }
    }
}

fn handle_pause(el: &Element) {
    if el.state() == ElementState::Running {
        el.transition(ElementState::Paused, ElementStatus::Paused);
    }
}

fn handle_stop(el: &Element) {
    if el.state().is_terminal() {
        return;
    }
    match el.close_if_open() {
        Ok(()) => el.transition(ElementState::Stopped, ElementStatus::Stopped),
        Err(e) => {
            error!(tag = %el.tag(), error = %e, "processor close failed");
            el.transition(ElementState::Error, ElementStatus::ErrorClose);
        }
    }
}

fn process_round(el: &Element) {
    let io = el.io();
    let result = {
        let mut processor = el.inner.processor.lock().unwrap();
        processor.process(io)
    };
    match result {
        Ok(n) => {
            if n > 0 {
                io.add_progress(n);
            }
        }
        // Nothing moved this round; try again.
        Err(Error::Timeout) => {}
        Err(Error::Done) => {
            io.mark_outputs_done();
            match el.close_if_open() {
                Ok(()) => el.transition(ElementState::Finished, ElementStatus::Finished),
                Err(e) => {
                    error!(tag = %el.tag(), error = %e, "processor close failed");
                    el.transition(ElementState::Error, ElementStatus::ErrorClose);
                }
            }
        }
        // A port abort is a stop arriving through the data path.
        Err(Error::Aborted) => handle_stop(el),
        Err(e) => {
            let status = match io.take_failure() {
                Some(FailureSide::Input) => ElementStatus::ErrorInput,
                Some(FailureSide::Output) => ElementStatus::ErrorOutput,
                None => ElementStatus::ErrorProcess,
            };
            error!(tag = %el.tag(), error = %e, ?status, "element processing failed");
            // Failure propagates through the data path: neighbours blocked
            // on this element's ports wake with Aborted and stop.
            io.abort_ports();
            if let Err(close_err) = el.close_if_open() {
                error!(tag = %el.tag(), error = %close_err, "processor close failed after error");
            }
            el.transition(ElementState::Error, status);
        }
    }
}
