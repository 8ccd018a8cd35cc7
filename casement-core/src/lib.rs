pub mod bus;
pub mod bus_contract;
pub mod error;
pub mod gateway;
pub mod model;
pub mod policy;
pub mod push;
pub mod store;
