//! Integration tests for pixpress
//!
//! These drive the real subprocess executor against POSIX shell stand-ins
//! for FFmpeg, so they only run on unix.

#![cfg(unix)]

mod cli_tests;
mod e2e_tests;
mod helpers;
