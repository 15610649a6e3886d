//! Shared UI icons.
//!
//! Each icon falls back to plain ASCII on terminals without emoji support.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "[SKIP]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");

// Run indicators
pub static LOOP: Emoji<'_, '_> = Emoji("🔄 ", "[LOOP]");
pub static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[FIND]");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[WARN]");
