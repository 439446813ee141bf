use ordo_engine::EventRouter;

use super::{TimerStarted, TimerStopped, TIMER_STARTED, TIMER_STOPPED};
use crate::error::{encode, PluginError, PluginResult};

/// Starts and stops timers from inside a command processor.
///
/// A timer's id is the event sequence of its `TimerStarted` event, which is
/// unique across the store and identical on every replay.
pub struct TimerControl<'a> {
    router: &'a mut EventRouter,
}

impl<'a> TimerControl<'a> {
    pub fn new(router: &'a mut EventRouter) -> Self {
        Self { router }
    }

    /// One-shot timer firing at `timeout` (epoch millis). Returns its id.
    pub fn start_timer(&mut self, timer_type: i32, timeout: i64) -> PluginResult<i64> {
        self.start(TimerStarted {
            timer_type,
            timeout,
            period: 0,
        })
    }

    /// Timer firing at `timeout`, then every `period` millis until stopped.
    pub fn start_periodic_timer(
        &mut self,
        timer_type: i32,
        timeout: i64,
        period: i64,
    ) -> PluginResult<i64> {
        if period <= 0 {
            return Err(PluginError::InvalidPeriod(period));
        }
        self.start(TimerStarted {
            timer_type,
            timeout,
            period,
        })
    }

    pub fn stop_timer(&mut self, id: i64) -> PluginResult<()> {
        self.router
            .route_event(TIMER_STOPPED, &encode(&TimerStopped { id })?)?;
        Ok(())
    }

    fn start(&mut self, started: TimerStarted) -> PluginResult<i64> {
        Ok(self.router.route_event(TIMER_STARTED, &encode(&started)?)?)
    }
}
