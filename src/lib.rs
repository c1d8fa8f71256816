//! Shared internals for the petehome and armhr dev consoles.
//!
//! Both binaries are thin wrappers: they build a [`profile::Profile`], fill
//! a [`commands::Registry`], and hand both to [`runtime::run`]. Everything
//! else — panels, prompt, subprocess plumbing, service wrappers — lives
//! here and is shared.

pub mod app;
pub mod auth;
pub mod commands;
pub mod daemon;
pub mod envfile;
pub mod events;
pub mod exec;
pub mod git;
pub mod migrate;
pub mod output;
pub mod pm2;
pub mod ports;
pub mod profile;
pub mod runtime;
pub mod settings;
pub mod tail;
pub mod tui;
pub mod vercel;
