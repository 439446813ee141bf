use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use ordo_engine::{
    Command, CommandProcessor, Context, Event, EventApplier, EventRouter, Plugin, PluginEnv,
    PluginInput, Received, Receiver, TimeSource,
};
use tracing::debug;

use super::{
    TimerFired, TimerStarted, TimerState, TimerStopped, TriggerTimer, TIMER_FIRED,
    TIMER_SOURCE_ID, TIMER_STARTED, TIMER_STOPPED, TIMER_TYPES, TRIGGER_TIMER,
};
use crate::error::{decode_command, decode_event, encode};

/// Installs the timer input, processor and applier.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimerPlugin;

impl Plugin for TimerPlugin {
    type State = TimerState;

    fn name(&self) -> &'static str {
        "timer"
    }

    fn create_state(&self) -> TimerState {
        TimerState::new()
    }

    fn create_context(&self, env: &PluginEnv) -> Context<TimerState> {
        Context::new()
            .with_input(TimerInput::new(env.time.clone()))
            .with_processor(TIMER_TYPES, TimerProcessor)
            .with_applier(TIMER_TYPES, TimerApplier)
    }
}

/// Raises one `TriggerTimer` per expired timer. A timer is signalled again
/// only after its deadline changes.
struct TimerInput {
    time: Arc<dyn TimeSource>,
    signalled: HashMap<i64, i64>,
}

impl TimerInput {
    fn new(time: Arc<dyn TimeSource>) -> Self {
        Self {
            time,
            signalled: HashMap::new(),
        }
    }
}

impl PluginInput<TimerState> for TimerInput {
    fn poll(&mut self, timers: &TimerState, receiver: &mut dyn Receiver) -> Result<usize> {
        self.signalled
            .retain(|id, timeout| timers.get(*id).is_some_and(|t| t.timeout == *timeout));

        let now = self.time.current_time();
        let mut offered = 0;
        for timer in timers.expired(now) {
            if self.signalled.contains_key(&timer.id) {
                continue;
            }
            let payload = encode(&TriggerTimer { id: timer.id })?;
            match receiver.receive(TIMER_SOURCE_ID, None, TRIGGER_TIMER, &payload)? {
                Received::Backpressure => break,
                Received::Accepted(_) | Received::Duplicate => {
                    self.signalled.insert(timer.id, timer.timeout);
                    offered += 1;
                }
            }
        }
        Ok(offered)
    }
}

struct TimerProcessor;

impl CommandProcessor<TimerState> for TimerProcessor {
    fn on_command(
        &mut self,
        timers: &TimerState,
        command: &Command<'_>,
        router: &mut EventRouter,
    ) -> Result<()> {
        if command.payload_type() != TRIGGER_TIMER {
            debug!(payload_type = command.payload_type(), "Unknown timer command, ignoring");
            return Ok(());
        }
        let trigger: TriggerTimer = match decode_command(command) {
            Ok(trigger) => trigger,
            Err(e) => {
                debug!(error = %e, "Malformed timer trigger, ignoring");
                return Ok(());
            }
        };

        match timers.get(trigger.id) {
            Some(timer) if timer.timeout <= command.command_time() => {
                let fired = TimerFired {
                    id: timer.id,
                    timer_type: timer.timer_type,
                    timeout: timer.timeout,
                };
                router.route_event(TIMER_FIRED, &encode(&fired)?)?;
            }
            Some(timer) => {
                debug!(id = timer.id, timeout = timer.timeout, "Timer not due yet, ignoring trigger");
            }
            None => debug!(id = trigger.id, "Timer already gone, ignoring trigger"),
        }
        Ok(())
    }
}

struct TimerApplier;

impl EventApplier<TimerState> for TimerApplier {
    fn on_event(&mut self, timers: &mut TimerState, event: &Event<'_>) -> Result<()> {
        match event.payload_type() {
            TIMER_STARTED => {
                let started: TimerStarted = decode_event(event)?;
                let id = event.event_sequence();
                if !timers.add_periodic(started.timer_type, id, started.timeout, started.period) {
                    debug!(id, "Duplicate timer id, ignoring");
                }
            }
            TIMER_STOPPED => {
                let stopped: TimerStopped = decode_event(event)?;
                if !timers.remove(stopped.id) {
                    debug!(id = stopped.id, "Stop for unknown timer, ignoring");
                }
            }
            TIMER_FIRED => {
                let fired: TimerFired = decode_event(event)?;
                match timers.get(fired.id) {
                    Some(timer) if timer.period > 0 => {
                        timers.reschedule(fired.id, fired.timeout + timer.period);
                    }
                    Some(_) => {
                        timers.remove(fired.id);
                    }
                    None => debug!(id = fired.id, "Fired timer already gone"),
                }
            }
            _ => {}
        }
        Ok(())
    }
}
