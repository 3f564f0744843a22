/*!
Best-effort observability channel for runtime activity.

Subsystems push [`FlowNotice`] values through a [`NoticePublisher`] as they
publish events, finish or fail steps, and watch endpoints change health. The
[`ObserverHub`] drains those notices on a background task and fans them out
to registered [`ObserverSink`]s.

Notices never influence control flow: a full or closed hub drops notices
silently, and a failing sink only earns a log line. Dashboards hang off this
module; the runtime itself would behave identically with the hub unplugged.
*/

mod description;
mod hub;
mod notice;
mod sink;

pub use description::{WorkflowDescription, WorkflowEdge, WorkflowNode};
pub use hub::{NoticePublisher, ObserverHub};
pub use notice::FlowNotice;
pub use sink::{ChannelSink, MemorySink, ObserverSink, TracingSink};
