pub mod clip;
pub mod config;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod pose;
pub mod tracker;
pub mod trajectory;

#[cfg(test)]
pub(crate) mod test_support;
