#[macro_use]
extern crate rocket;

pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod search;
pub mod server;
pub mod store;

pub mod routes {
    pub mod games;
}
