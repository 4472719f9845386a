pub mod account_session;
pub mod auth_flow;
pub mod bootstrap;
pub mod commands;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod test_support;
