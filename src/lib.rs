pub mod alert;
pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod normalizer;
pub mod pipeline;
pub mod scheduler;
pub mod web;
