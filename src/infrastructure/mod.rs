pub mod config;
pub mod credential_store;
pub mod ecobee_client;
pub mod error;
pub mod logging;
pub mod storage;
pub mod thermostat_mapper;
pub mod token_repository;
