pub mod call_orchestrator;
pub mod execution_engine;
pub mod portfolio_service;
