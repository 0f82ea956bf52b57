//! # RUУчебник Telegram Bot
//!
//! A Telegram bot that lets students browse school textbooks by grade and
//! subject and download them as PDF files, with a PostgreSQL catalog, rule
//! agreement, bans and an administrator toolkit.

pub mod bot;
pub mod callback;
pub mod catalog;
pub mod commands;
pub mod config;
pub mod db;
pub mod dialogue;
pub mod format;
pub mod localization;
pub mod logging;
pub mod navigation;
pub mod rate_limiter;
pub mod storage;
