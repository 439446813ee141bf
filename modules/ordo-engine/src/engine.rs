//! The processing loop.
//!
//! Input → sequencer → command store → processor → router → event store →
//! appliers → outputs. One command at a time: the batch of command N is
//! committed and applied before command N+1 is taken from the store.

use std::sync::Arc;

use ordo_store::{MessageStore, PollResult, Poller, StoreError, StoreMode};
use tracing::{debug, info, trace};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::error::{ConfigError, EngineError, EngineResult};
use crate::frame::{Command, Event, MAX_PAYLOAD_LEN};
use crate::handler::{ExceptionHandler, LoggingExceptionHandler};
use crate::plugin::{validate_ranges, InstalledPlugin, PluginEnv, PluginInstaller};
use crate::progress::ReplayProgress;
use crate::repair::{EventStoreRepairer, RepairStatus};
use crate::replay::BatchTracker;
use crate::router::EventRouter;
use crate::sequencer::Sequencer;
use crate::time::{SystemTimeSource, TimeSource};
use crate::traits::{CommandProcessor, EventApplier, Input, Received, Receiver};
use crate::transport::{Output, Published};

/// Events applied per step at most. A batch longer than this simply spans
/// several steps; the next command waits for it.
const APPLY_LIMIT: usize = 256;

/// Events handed to each output per step at most.
const PUBLISH_LIMIT: usize = 256;

/// Where the loop is with the current command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    AwaitingCommand,
    Processing,
    EventsPendingApplication,
    Applied,
}

/// Everything an [`Engine`] is assembled from.
#[derive(TypedBuilder)]
pub struct EngineParts<S, P, A> {
    pub command_store: Arc<dyn MessageStore>,
    pub event_store: Arc<dyn MessageStore>,
    pub state: S,
    pub processor: P,
    pub applier: A,
    #[builder(default)]
    pub inputs: Vec<Box<dyn Input>>,
    #[builder(default)]
    pub plugins: Vec<PluginInstaller>,
    #[builder(default)]
    pub outputs: Vec<Box<dyn Output>>,
    #[builder(default = Arc::new(SystemTimeSource))]
    pub time_source: Arc<dyn TimeSource>,
    #[builder(default = Arc::new(LoggingExceptionHandler))]
    pub exception_handler: Arc<dyn ExceptionHandler>,
    #[builder(default = Uuid::new_v4())]
    pub run_id: Uuid,
    /// Larger routed payloads fail the command, which is then rolled back.
    #[builder(default = MAX_PAYLOAD_LEN)]
    pub max_event_payload_bytes: usize,
}

struct OutputSlot {
    output: Box<dyn Output>,
    poller: Box<dyn Poller>,
}

/// Single-threaded command/event pipeline.
pub struct Engine<S, P, A>
where
    S: Send,
    P: CommandProcessor<S>,
    A: EventApplier<S>,
{
    state: S,
    processor: P,
    applier: A,
    command_store: Arc<dyn MessageStore>,
    event_store: Arc<dyn MessageStore>,
    command_poller: Box<dyn Poller>,
    event_poller: Box<dyn Poller>,
    sequencer: Sequencer,
    router: EventRouter,
    inputs: Vec<Box<dyn Input>>,
    plugins: Vec<Box<dyn InstalledPlugin>>,
    outputs: Vec<OutputSlot>,
    time: Arc<dyn TimeSource>,
    handler: Arc<dyn ExceptionHandler>,
    progress: ReplayProgress,
    tracker: BatchTracker,
    command_state: CommandState,
    current: Option<(i32, i64)>,
    run_id: Uuid,
    started: bool,
}

impl<S, P, A> Engine<S, P, A>
where
    S: Send,
    P: CommandProcessor<S>,
    A: EventApplier<S>,
{
    /// Assemble the pipeline. Plugin ranges are validated here.
    pub fn new(parts: EngineParts<S, P, A>) -> Result<Self, ConfigError> {
        let env = PluginEnv {
            time: parts.time_source.clone(),
        };
        let plugins: Vec<Box<dyn InstalledPlugin>> = parts
            .plugins
            .into_iter()
            .map(|installer| installer.build(&env))
            .collect();
        validate_ranges(&plugins)?;

        if !parts.outputs.is_empty() && parts.event_store.mode() != StoreMode::KeepOnPoll {
            return Err(ConfigError::Invalid(
                "outputs need a keep-on-poll event store".into(),
            ));
        }
        let outputs = parts
            .outputs
            .into_iter()
            .map(|output| OutputSlot {
                output,
                poller: parts.event_store.poller(),
            })
            .collect();

        Ok(Self {
            state: parts.state,
            processor: parts.processor,
            applier: parts.applier,
            command_poller: parts.command_store.poller(),
            event_poller: parts.event_store.poller(),
            sequencer: Sequencer::new(parts.command_store.appender(), parts.time_source.clone()),
            router: EventRouter::new(parts.event_store.appender(), parts.time_source.clone())
                .with_max_payload_bytes(parts.max_event_payload_bytes),
            command_store: parts.command_store,
            event_store: parts.event_store,
            inputs: parts.inputs,
            plugins,
            outputs,
            time: parts.time_source,
            handler: parts.exception_handler,
            progress: ReplayProgress::new(),
            tracker: BatchTracker::new(),
            command_state: CommandState::AwaitingCommand,
            current: None,
            run_id: parts.run_id,
            started: false,
        })
    }

    /// Repair the event store, rebuild state from it and fast-forward the
    /// sequence generators. Runs once; [`Engine::step`] calls it if needed.
    pub fn start_up(&mut self) -> EngineResult<RepairStatus> {
        if self.started {
            return Ok(RepairStatus::Consistent);
        }

        let repair = EventStoreRepairer::new(self.event_store.clone())
            .with_command_store(self.command_store.clone())
            .repair(self.time.as_ref(), self.handler.as_ref())?;

        let mut replayed = 0;
        loop {
            let applied = self.apply_events(usize::MAX)?;
            if applied == 0 {
                break;
            }
            replayed += applied;
        }

        self.router
            .catch_up_event_sequence(self.progress.last_event_sequence());
        for (source_id, sequence) in self.progress.sources() {
            self.sequencer.catch_up(source_id, sequence);
        }
        let pending_commands = self.catch_up_from_command_log()?;

        for slot in &mut self.outputs {
            slot.poller.move_to_end();
        }

        self.started = true;
        info!(
            run_id = %self.run_id,
            replayed_events = replayed,
            last_event_sequence = self.progress.last_event_sequence(),
            sources = self.progress.sources().count(),
            pending_commands,
            plugins = self.plugins.len(),
            repaired = matches!(repair, RepairStatus::Repaired(_)),
            "Engine started"
        );
        Ok(repair)
    }

    /// One bounded unit of work: poll every input once, process at most one
    /// command, apply committed events and publish to outputs. Returns how
    /// much work was done; 0 means idle.
    pub fn step(&mut self) -> EngineResult<usize> {
        if !self.started {
            self.start_up()?;
        }

        let mut work = self.poll_inputs();
        if matches!(
            self.command_state,
            CommandState::AwaitingCommand | CommandState::Applied
        ) {
            work += self.process_command()?;
        }
        work += self.apply_events(APPLY_LIMIT)?;
        work += self.publish()?;
        Ok(work)
    }

    /// Offer a command straight to the sequencer, bypassing inputs.
    pub fn submit(
        &mut self,
        source_id: i32,
        source_sequence: Option<i64>,
        payload_type: i32,
        payload: &[u8],
    ) -> Result<Received, StoreError> {
        self.sequencer
            .receive(source_id, source_sequence, payload_type, payload)
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn progress(&self) -> &ReplayProgress {
        &self.progress
    }

    pub fn command_state(&self) -> CommandState {
        self.command_state
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn exception_handler(&self) -> Arc<dyn ExceptionHandler> {
        self.handler.clone()
    }

    /// Read-only view of the first installed plugin whose state is a `T`.
    pub fn plugin_state<T: 'static>(&self) -> Option<&T> {
        self.plugins
            .iter()
            .find_map(|plugin| plugin.state().downcast_ref::<T>())
    }

    // -----------------------------------------------------------------------
    // Stages
    // -----------------------------------------------------------------------

    fn poll_inputs(&mut self) -> usize {
        let mut work = 0;
        for (index, input) in self.inputs.iter_mut().enumerate() {
            match input.poll(&mut self.sequencer) {
                Ok(n) => work += n,
                Err(e) => self
                    .handler
                    .handle_input_error(&format!("input[{index}]"), &e),
            }
        }
        for plugin in self.plugins.iter_mut() {
            for index in 0..plugin.input_count() {
                match plugin.poll_input(index, &mut self.sequencer) {
                    Ok(n) => work += n,
                    Err(e) => self
                        .handler
                        .handle_input_error(&format!("{}[{index}]", plugin.name()), &e),
                }
            }
        }
        work
    }

    fn process_command(&mut self) -> EngineResult<usize> {
        let Self {
            state,
            processor,
            command_poller,
            router,
            plugins,
            handler,
            progress,
            command_state,
            current,
            ..
        } = self;
        let mut fault: Option<EngineError> = None;

        let polled = command_poller.poll(&mut |bytes| {
            let command = match Command::wrap(bytes) {
                Ok(command) => command,
                Err(e) => {
                    fault = Some(e.into());
                    return PollResult::Peek;
                }
            };
            let source_id = command.source_id();
            let source_sequence = command.source_sequence();
            if progress.is_applied(source_id, source_sequence) {
                trace!(source_id, source_sequence, "Skipping applied command");
                return PollResult::Poll;
            }

            *current = Some((source_id, source_sequence));
            transition(command_state, CommandState::Processing, source_id, source_sequence);
            router.init(source_id, source_sequence);

            let result = if command.is_application() {
                processor.on_command(state, &command, router)
            } else {
                match plugins
                    .iter_mut()
                    .find(|p| p.command_range().is_some_and(|r| r.contains(command.payload_type())))
                {
                    Some(plugin) => plugin.on_command(&command, router),
                    None => {
                        debug!(
                            source_id,
                            source_sequence,
                            payload_type = command.payload_type(),
                            "No plugin handles system command, ignoring"
                        );
                        Ok(())
                    }
                }
            };

            // Store failures are latched by the router and picked up below.
            let _ = match result {
                Ok(()) => router.complete(),
                Err(e) => {
                    handler.handle_command_error(&command, &e);
                    router.rollback()
                }
            };
            router.reset();

            if let Some(e) = router.take_fault() {
                fault = Some(e.into());
            } else {
                transition(
                    command_state,
                    CommandState::EventsPendingApplication,
                    source_id,
                    source_sequence,
                );
            }
            PollResult::Poll
        })?;

        match fault {
            Some(e) => Err(e),
            None => Ok(polled),
        }
    }

    fn apply_events(&mut self, limit: usize) -> EngineResult<usize> {
        let Self {
            state,
            applier,
            event_poller,
            plugins,
            handler,
            progress,
            tracker,
            ..
        } = self;
        let mut fault: Option<EngineError> = None;

        let applied = event_poller.poll_batch(limit, &mut |bytes| {
            let event = match Event::wrap(bytes) {
                Ok(event) => event,
                Err(e) => {
                    fault = Some(e.into());
                    return PollResult::Peek;
                }
            };
            let mut apply =
                |event: &Event<'_>| dispatch_event(state, applier, plugins, handler.as_ref(), event);
            match tracker.on_event(&event, progress, &mut apply) {
                Ok(()) => PollResult::Poll,
                Err(e) => {
                    fault = Some(e.into());
                    PollResult::Peek
                }
            }
        })?;
        if let Some(e) = fault {
            return Err(e);
        }

        if self.command_state == CommandState::EventsPendingApplication {
            if let Some((source_id, source_sequence)) = self.current {
                if self.progress.is_applied(source_id, source_sequence) {
                    transition(
                        &mut self.command_state,
                        CommandState::Applied,
                        source_id,
                        source_sequence,
                    );
                    self.current = None;
                }
            }
        }
        Ok(applied)
    }

    fn publish(&mut self) -> EngineResult<usize> {
        let progress = &self.progress;
        let mut published = 0;
        for slot in self.outputs.iter_mut() {
            let output = &mut slot.output;
            let mut fault: Option<EngineError> = None;
            published += slot.poller.poll_batch(PUBLISH_LIMIT, &mut |bytes| {
                let event = match Event::wrap(bytes) {
                    Ok(event) => event,
                    Err(e) => {
                        fault = Some(e.into());
                        return PollResult::Peek;
                    }
                };
                if !progress.is_applied(event.source_id(), event.source_sequence()) {
                    return PollResult::Peek;
                }
                match output.publish(&event) {
                    Published::Accepted => PollResult::Poll,
                    Published::Backpressure => PollResult::Peek,
                }
            })?;
            if let Some(e) = fault {
                return Err(e);
            }
        }
        Ok(published)
    }

    /// Ratchet per-source sequences past commands already in a durable
    /// command log. Returns how many of them are still unprocessed.
    fn catch_up_from_command_log(&mut self) -> EngineResult<usize> {
        if self.command_store.mode() != StoreMode::KeepOnPoll {
            return Ok(0);
        }
        let mut poller = self.command_store.poller();
        let sequencer = &mut self.sequencer;
        let progress = &self.progress;
        let mut pending = 0;
        let mut fault: Option<EngineError> = None;
        loop {
            let polled = poller.poll(&mut |bytes| match Command::wrap(bytes) {
                Ok(command) => {
                    sequencer.catch_up(command.source_id(), command.source_sequence());
                    if !progress.is_applied(command.source_id(), command.source_sequence()) {
                        pending += 1;
                    }
                    PollResult::Poll
                }
                Err(e) => {
                    fault = Some(e.into());
                    PollResult::Peek
                }
            })?;
            if let Some(e) = fault.take() {
                return Err(e);
            }
            if polled == 0 {
                return Ok(pending);
            }
        }
    }
}

/// Something the runner can drive.
pub trait Step: Send {
    fn step(&mut self) -> EngineResult<usize>;

    fn exception_handler(&self) -> Arc<dyn ExceptionHandler>;
}

impl<S, P, A> Step for Engine<S, P, A>
where
    S: Send,
    P: CommandProcessor<S>,
    A: EventApplier<S>,
{
    fn step(&mut self) -> EngineResult<usize> {
        Engine::step(self)
    }

    fn exception_handler(&self) -> Arc<dyn ExceptionHandler> {
        self.handler.clone()
    }
}

/// Route one committed event: plugin applier for its range first, then the
/// application applier, which also sees system events.
fn dispatch_event<S, A: EventApplier<S>>(
    state: &mut S,
    applier: &mut A,
    plugins: &mut [Box<dyn InstalledPlugin>],
    handler: &dyn ExceptionHandler,
    event: &Event<'_>,
) {
    if event.is_system() {
        let payload_type = event.payload_type();
        if let Some(plugin) = plugins
            .iter_mut()
            .find(|p| p.event_range().is_some_and(|r| r.contains(payload_type)))
        {
            if let Err(e) = plugin.on_event(event) {
                handler.handle_event_error(event, &e);
            }
        }
    }
    if let Err(e) = applier.on_event(state, event) {
        handler.handle_event_error(event, &e);
    }
}

fn transition(current: &mut CommandState, next: CommandState, source_id: i32, source_sequence: i64) {
    trace!(source_id, source_sequence, from = ?*current, to = ?next, "Command state");
    *current = next;
}
