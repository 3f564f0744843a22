/*!
Step registry and event routing.

A [`StepDefinition`] declares what a step listens to, what it emits, and
where its code runs; registering it with the [`EventRouter`] turns those
declarations into live bus subscriptions. The router also owns the
[`FlowEmitter`], the single choke point where events acquire their trace
id, source, and timestamp.
*/

mod emitter;
mod router;
mod step;

pub use emitter::FlowEmitter;
pub use router::{EventRouter, RouterError};
pub use step::{StepDefinition, StepId};
