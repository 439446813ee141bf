//! Plugins: configuration-time factories that layer system behaviour onto the
//! pipeline.
//!
//! A plugin owns a private state value. At assembly it hands the engine a
//! [`Context`]: extra inputs, a processor for a reserved range of system
//! command types and an applier for a reserved range of system event types.
//! After that the plugin itself is gone; the engine keeps the installed
//! contributions together with their state.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;

use crate::error::ConfigError;
use crate::frame::{Command, Event};
use crate::router::EventRouter;
use crate::time::TimeSource;
use crate::traits::{CommandProcessor, EventApplier, Receiver};

// ---------------------------------------------------------------------------
// TypeRange
// ---------------------------------------------------------------------------

/// Half-open range `[start, end)` of payload types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeRange {
    start: i32,
    end: i32,
}

impl TypeRange {
    pub const fn new(start: i32, end: i32) -> Self {
        Self { start, end }
    }

    pub fn start(&self) -> i32 {
        self.start
    }

    pub fn end(&self) -> i32 {
        self.end
    }

    pub fn contains(&self, payload_type: i32) -> bool {
        payload_type >= self.start && payload_type < self.end
    }

    pub fn overlaps(&self, other: &TypeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Non-empty and entirely in the negative (system) space.
    pub fn is_system(&self) -> bool {
        self.start < self.end && self.end <= 0
    }
}

impl fmt::Display for TypeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

// ---------------------------------------------------------------------------
// Plugin contract
// ---------------------------------------------------------------------------

/// Source of system commands contributed by a plugin. Reads plugin state only.
pub trait PluginInput<PS>: Send {
    fn poll(&mut self, state: &PS, receiver: &mut dyn Receiver) -> Result<usize>;
}

/// What a plugin is handed when it builds its [`Context`].
#[derive(Clone)]
pub struct PluginEnv {
    pub time: Arc<dyn TimeSource>,
}

/// A plugin's contributions.
pub struct Context<PS> {
    inputs: Vec<Box<dyn PluginInput<PS>>>,
    processor: Option<(TypeRange, Box<dyn CommandProcessor<PS>>)>,
    applier: Option<(TypeRange, Box<dyn EventApplier<PS>>)>,
}

impl<PS> Context<PS> {
    pub fn new() -> Self {
        Self {
            inputs: Vec::new(),
            processor: None,
            applier: None,
        }
    }

    pub fn with_input(mut self, input: impl PluginInput<PS> + 'static) -> Self {
        self.inputs.push(Box::new(input));
        self
    }

    /// Handle system commands whose payload type falls in `range`.
    pub fn with_processor(
        mut self,
        range: TypeRange,
        processor: impl CommandProcessor<PS> + 'static,
    ) -> Self {
        self.processor = Some((range, Box::new(processor)));
        self
    }

    /// Apply system events whose payload type falls in `range`.
    pub fn with_applier(mut self, range: TypeRange, applier: impl EventApplier<PS> + 'static) -> Self {
        self.applier = Some((range, Box::new(applier)));
        self
    }
}

impl<PS> Default for Context<PS> {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration-time factory.
pub trait Plugin: Send {
    type State: Send + 'static;

    fn name(&self) -> &'static str;

    fn create_state(&self) -> Self::State;

    fn create_context(&self, env: &PluginEnv) -> Context<Self::State>;
}

// ---------------------------------------------------------------------------
// Installation (type-erased)
// ---------------------------------------------------------------------------

/// A plugin's contributions plus the state they share, with the state type
/// erased so plugins of different kinds can sit side by side in the engine.
pub trait InstalledPlugin: Send {
    fn name(&self) -> &str;

    fn command_range(&self) -> Option<TypeRange>;

    fn event_range(&self) -> Option<TypeRange>;

    fn input_count(&self) -> usize;

    fn poll_input(&mut self, index: usize, receiver: &mut dyn Receiver) -> Result<usize>;

    fn on_command(&mut self, command: &Command<'_>, router: &mut EventRouter) -> Result<()>;

    fn on_event(&mut self, event: &Event<'_>) -> Result<()>;

    fn state(&self) -> &dyn Any;
}

struct Installed<PS> {
    name: &'static str,
    state: PS,
    context: Context<PS>,
}

impl<PS: Send + 'static> InstalledPlugin for Installed<PS> {
    fn name(&self) -> &str {
        self.name
    }

    fn command_range(&self) -> Option<TypeRange> {
        self.context.processor.as_ref().map(|(range, _)| *range)
    }

    fn event_range(&self) -> Option<TypeRange> {
        self.context.applier.as_ref().map(|(range, _)| *range)
    }

    fn input_count(&self) -> usize {
        self.context.inputs.len()
    }

    fn poll_input(&mut self, index: usize, receiver: &mut dyn Receiver) -> Result<usize> {
        match self.context.inputs.get_mut(index) {
            Some(input) => input.poll(&self.state, receiver),
            None => Ok(0),
        }
    }

    fn on_command(&mut self, command: &Command<'_>, router: &mut EventRouter) -> Result<()> {
        match self.context.processor.as_mut() {
            Some((_, processor)) => processor.on_command(&self.state, command, router),
            None => Ok(()),
        }
    }

    fn on_event(&mut self, event: &Event<'_>) -> Result<()> {
        match self.context.applier.as_mut() {
            Some((_, applier)) => applier.on_event(&mut self.state, event),
            None => Ok(()),
        }
    }

    fn state(&self) -> &dyn Any {
        &self.state
    }
}

/// Deferred installation of one plugin. Built with [`install`].
pub struct PluginInstaller {
    name: &'static str,
    build: Box<dyn FnOnce(&PluginEnv) -> Box<dyn InstalledPlugin> + Send>,
}

impl PluginInstaller {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn build(self, env: &PluginEnv) -> Box<dyn InstalledPlugin> {
        (self.build)(env)
    }
}

/// Wrap a plugin for the engine. The plugin is asked for its state and
/// context once, when the engine is assembled.
pub fn install<P: Plugin + 'static>(plugin: P) -> PluginInstaller {
    let name = plugin.name();
    PluginInstaller {
        name,
        build: Box::new(move |env| {
            let state = plugin.create_state();
            let context = plugin.create_context(env);
            Box::new(Installed {
                name,
                state,
                context,
            })
        }),
    }
}

/// Every range must be a system range and no two plugins may share a type.
pub(crate) fn validate_ranges(plugins: &[Box<dyn InstalledPlugin>]) -> Result<(), ConfigError> {
    check_kind(plugins, "command", |p| p.command_range())?;
    check_kind(plugins, "event", |p| p.event_range())
}

fn check_kind(
    plugins: &[Box<dyn InstalledPlugin>],
    kind: &'static str,
    range_of: impl Fn(&dyn InstalledPlugin) -> Option<TypeRange>,
) -> Result<(), ConfigError> {
    let ranges: Vec<(&str, TypeRange)> = plugins
        .iter()
        .filter_map(|p| range_of(p.as_ref()).map(|r| (p.name(), r)))
        .collect();

    for (name, range) in &ranges {
        if !range.is_system() {
            return Err(ConfigError::InvalidRange {
                plugin: name.to_string(),
                kind,
                range: range.to_string(),
            });
        }
    }

    for (i, (first, first_range)) in ranges.iter().enumerate() {
        for (second, second_range) in &ranges[i + 1..] {
            if first_range.overlaps(second_range) {
                return Err(ConfigError::OverlappingRanges {
                    kind,
                    first: first.to_string(),
                    first_range: first_range.to_string(),
                    second: second.to_string(),
                    second_range: second_range.to_string(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_are_half_open() {
        let range = TypeRange::new(-10, -5);
        assert!(range.contains(-10));
        assert!(range.contains(-6));
        assert!(!range.contains(-5));
        assert!(range.overlaps(&TypeRange::new(-6, -1)));
        assert!(!range.overlaps(&TypeRange::new(-5, -1)));
    }

    #[test]
    fn application_space_is_not_a_system_range() {
        assert!(TypeRange::new(-3, 0).is_system());
        assert!(!TypeRange::new(-3, 1).is_system());
        assert!(!TypeRange::new(-3, -3).is_system());
    }
}
