//! # Steploom: Event-driven Step Orchestration
//!
//! Steploom runs workflows as loose federations of *steps* that react to
//! *events*. There is no workflow graph to compile: a step subscribes to
//! topic patterns, and whatever it emits may trigger other steps. Chains,
//! fan-out, and fan-in all fall out of topic matching.
//!
//! ## Core Concepts
//!
//! - **Events**: JSON payloads on dot-separated topics, stamped with a trace
//!   id that follows the causal chain
//! - **Steps**: Units of work identified by their source file; they run in
//!   the host process or on a remote worker endpoint
//! - **Bus**: In-process dispatch by default, Redis pub/sub for multi-process
//!   deployments
//! - **Endpoints**: HTTP workers hosting steps written in other languages,
//!   health-checked and supervised
//! - **State**: A key/value store scoped per trace, so concurrent flows
//!   never see each other's data
//!
//! ## Quick Start
//!
//! ### Topic Patterns
//!
//! Subscriptions use literal topics, a prefix wildcard, or the match-all
//! wildcard:
//!
//! ```
//! use steploom::pattern::TopicPattern;
//!
//! let orders = TopicPattern::parse("order.*").unwrap();
//! assert!(orders.matches("order.created"));
//! assert!(orders.matches("order.items.added"));
//! assert!(!orders.matches("invoice.created"));
//!
//! let everything = TopicPattern::parse("*").unwrap();
//! assert!(everything.matches("order.created"));
//! ```
//!
//! ### Defining Steps
//!
//! A step's identity derives from its source path, so registrations stay
//! stable across reloads:
//!
//! ```
//! use steploom::registry::StepDefinition;
//!
//! let step = StepDefinition::new("steps/orders/create_invoice.py")
//!     .subscribe_to("order.created")
//!     .emits_topic("invoice.created")
//!     .on_endpoint("py-workers");
//!
//! assert_eq!(step.id.as_ref(), "steps-orders-create_invoice");
//! ```
//!
//! ### Running a Flow
//!
//! ```rust,no_run
//! use serde_json::{Value, json};
//! use steploom::executor::{StepContext, StepError, StepHandler};
//! use steploom::registry::StepDefinition;
//! use steploom::runtime::{FlowRuntime, StepRegistration};
//!
//! struct CreateInvoice;
//!
//! #[async_trait::async_trait]
//! impl StepHandler for CreateInvoice {
//!     async fn run(&self, data: Value, ctx: StepContext) -> Result<(), StepError> {
//!         let order_id = data["orderId"].clone();
//!         ctx.state().set("invoice_total", json!(42)).await?;
//!         ctx.emit("invoice.created", json!({ "orderId": order_id })).await?;
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> miette::Result<()> {
//! let runtime = FlowRuntime::builder().build().await?;
//!
//! let definition = StepDefinition::new("steps/create_invoice.rs")
//!     .subscribe_to("order.created")
//!     .emits_topic("invoice.created");
//! runtime
//!     .register_step(StepRegistration::local(definition, CreateInvoice))
//!     .await?;
//!
//! // With the in-process bus this returns after the whole causal chain ran.
//! let trace = runtime.emit("order.created", json!({"orderId": 7}), None).await?;
//! let total = runtime.trace_state(trace).get("invoice_total").await?;
//! assert_eq!(total, Some(json!(42)));
//!
//! runtime.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`event`] - Events, metadata stamping, and trace ids
//! - [`pattern`] - Topic pattern parsing and matching
//! - [`bus`] - Message bus trait plus in-process and Redis transports
//! - [`registry`] - Step definitions, the event router, and emission
//! - [`executor`] - The step handler trait and local execution
//! - [`endpoints`] - Remote worker supervision and the HTTP protocol
//! - [`state`] - Trace-scoped key/value state
//! - [`observer`] - Notices, sinks, and workflow descriptions
//! - [`runtime`] - Configuration and the assembled [`FlowRuntime`](runtime::FlowRuntime)

pub mod bus;
pub mod endpoints;
pub mod event;
pub mod executor;
pub mod observer;
pub mod pattern;
pub mod registry;
pub mod runtime;
pub mod state;
pub mod telemetry;
