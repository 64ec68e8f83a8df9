pub mod common;
pub mod delete;
pub mod edit;
pub mod list;
pub mod new;
pub mod queue;
pub mod sync;
