//! Core library for the echem application.
//!
//! Drives a potentiostat through an abstract driver, streams its samples into
//! a voltage/current trace, and plots, saves, loads, exports and analyses that
//! trace. It is used by both the egui front end and the headless CLI.
//!
//! ```text
//! Potentiostat --samples--> SessionActor forwarder --bounded mpsc--> SampleSink --> TraceStore
//!                                                                                    |
//!                                     PlotRenderer / storage / analysis <------------+
//! ```

pub mod app_actor;
pub mod config;
pub mod core;
pub mod data;
pub mod error;
#[cfg(feature = "gui")]
pub mod gui;
pub mod instrument;
pub mod messages;
pub mod plot;
pub mod state;
pub mod technique;
