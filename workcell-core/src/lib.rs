//! Workcell Core
//!
//! Core types shared by the workcell store and supervisor nodes.
//!
//! This crate contains:
//! - Domain types: job records, error records, node naming
//! - DTOs: payloads exchanged over the message bus
//! - Protocol: the newline-delimited socket protocols of the robot and marker

pub mod domain;
pub mod dto;
pub mod protocol;
