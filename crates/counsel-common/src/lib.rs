pub mod error;
pub mod evaluation;
pub mod export;
pub mod gateway;
pub mod report;
pub mod scenario;
pub mod session;
