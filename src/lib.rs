//! hpcload - HPC workload synthesizer and completed-trace analyzer
//!
//! This library generates synthetic job traces for an external batch
//! scheduler simulator (baseline jobs, workflow injections and timed
//! submission patterns) and analyzes the completed traces it returns:
//! job statistics, workflow critical paths, utilization and the capacity
//! wasted inside single-job workflows.

pub mod analysis;
pub mod cli;
pub mod config;
pub mod job;
pub mod manifest;
pub mod random;
pub mod synth;
pub mod trace_format;
pub mod trace_io;
pub mod workflow_tag;
