//! Pluggable reporting of errors the processing loop survives, and of the one
//! kind it does not.

use tracing::{error, warn};

use crate::error::EngineError;
use crate::frame::{Command, Event};
use crate::repair::RepairReport;

/// Receives every error the engine catches.
///
/// Command and event errors are reported and processing continues. A repair is
/// reported once at startup. `handle_fatal` is the last call before the run
/// loop stops.
pub trait ExceptionHandler: Send + Sync {
    fn handle_command_error(&self, command: &Command<'_>, error: &anyhow::Error);

    fn handle_event_error(&self, event: &Event<'_>, error: &anyhow::Error);

    fn handle_input_error(&self, input: &str, error: &anyhow::Error);

    fn handle_repair(&self, report: &RepairReport);

    fn handle_fatal(&self, error: &EngineError);
}

/// Default handler. Logs through `tracing` and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingExceptionHandler;

impl ExceptionHandler for LoggingExceptionHandler {
    fn handle_command_error(&self, command: &Command<'_>, error: &anyhow::Error) {
        warn!(
            source_id = command.source_id(),
            source_sequence = command.source_sequence(),
            payload_type = command.payload_type(),
            error = format!("{error:#}"),
            "Command failed, batch rolled back"
        );
    }

    fn handle_event_error(&self, event: &Event<'_>, error: &anyhow::Error) {
        warn!(
            source_id = event.source_id(),
            source_sequence = event.source_sequence(),
            event_sequence = event.event_sequence(),
            payload_type = event.payload_type(),
            error = format!("{error:#}"),
            "Event applier failed"
        );
    }

    fn handle_input_error(&self, input: &str, error: &anyhow::Error) {
        warn!(input, error = format!("{error:#}"), "Input poll failed");
    }

    fn handle_repair(&self, report: &RepairReport) {
        warn!(
            source_id = report.source_id,
            source_sequence = report.source_sequence,
            events_discarded = report.events_discarded,
            rollback_event_sequence = report.rollback_event_sequence,
            matches_last_command = report.matches_last_command,
            "Event store repaired: incomplete batch rolled back"
        );
    }

    fn handle_fatal(&self, error: &EngineError) {
        error!(error = %error, "Fatal engine error, stopping");
    }
}
