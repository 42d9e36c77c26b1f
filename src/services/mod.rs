pub mod broadcaster;
pub mod classifier;
pub mod ingress;
pub mod queue;
pub mod store;
pub mod worker;
