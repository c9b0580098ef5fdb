//! Assigns festival helpers to tasks from their submitted preferences.

pub mod config;
pub mod display;
pub mod error;
pub mod form;
pub mod parser;
pub mod schedule;
pub mod service;
pub mod store;
pub mod web;
