pub mod basins;
pub mod functional;
pub mod graph_store;
pub mod rule;
