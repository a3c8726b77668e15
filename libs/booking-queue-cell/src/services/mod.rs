pub mod broker;
pub mod memory;
pub mod notifier;
pub mod producer;
pub mod queue;
pub mod worker;

pub use broker::JobBroker;
pub use memory::InMemoryBroker;
pub use notifier::{Notifier, TracingNotifier};
pub use producer::JobProducer;
pub use queue::RedisBroker;
pub use worker::{JobExecutor, WorkerPool, WorkerPoolHandle};
