pub mod chain;
pub mod execute;
