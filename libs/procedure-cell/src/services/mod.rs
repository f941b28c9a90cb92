pub mod catalog;
pub mod fanout;
pub mod validation;
pub mod workflow;
