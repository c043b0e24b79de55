pub mod error;
pub mod issues;
pub mod middleware;
pub mod notifications;
pub mod state;
pub mod users;
pub mod votes;

#[cfg(test)]
pub(crate) mod test_support;
