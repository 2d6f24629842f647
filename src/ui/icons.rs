//! Shared UI icons.
//!
//! `console::Emoji` falls back to the plain variant on terminals without
//! emoji support.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[WARN]");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T]");

// Run indicators
pub static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");
pub static PROGRESS: Emoji<'_, '_> = Emoji("📊 ", "[PROG]");
