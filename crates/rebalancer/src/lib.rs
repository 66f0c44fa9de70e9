#![doc = include_str!("../readme.md")]

pub mod applier;
pub mod core;
pub mod error;
pub mod management;
pub mod plan;
pub mod report;
