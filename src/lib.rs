// Library exports for eventroll
// This allows integration tests and external code to use eventroll modules

pub mod archive;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod invite;
pub mod realtime;
pub mod routes;
pub mod rpc;
pub mod state;
pub mod storage;
pub mod upload;
