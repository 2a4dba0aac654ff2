// Infrastructure layer - External dependencies and adapters
pub mod arithmetic_formula;
pub mod config;
pub mod memory_repository;
