pub mod audit;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod graph;
pub mod provider;
