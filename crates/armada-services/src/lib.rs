//! armada-services — the moving parts of the fleet: broker gateway, result
//! consumer and fan-out on the server side; durable queue, executors,
//! policy orchestration and result delivery on the agent side.

pub mod agent_runtime;
pub mod broker;
pub mod cancel;
pub mod consumer;
pub mod delivery;
pub mod executor;
pub mod fanout;
pub mod gateway;
pub mod local_queue;
pub mod orchestrator;
pub mod outbox;

pub use agent_runtime::{AgentRuntime, Intake};
pub use broker::{Broker, BrokerError, LogBroker, Position, Retention};
pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use consumer::ResultConsumer;
pub use delivery::{DeliveryError, DeliveryLoop, ResultSink};
pub use executor::{Executor, ExecutorSet};
pub use fanout::{ResultFanout, ResultSubscription};
pub use gateway::{AgentBatch, Gateway, Submission};
pub use local_queue::{LocalQueue, OutboundRecord, QueueError};
pub use orchestrator::PolicyOrchestrator;
pub use outbox::{CommandOutbox, OutboxError};
