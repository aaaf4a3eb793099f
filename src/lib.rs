#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod classify;
pub mod cli;
pub mod config;
pub mod error;
pub mod facade;
pub mod logging;
pub mod parse;
pub mod paths;
pub mod render;
pub mod request;
pub mod runner;
pub mod util;
pub mod vm_state;
