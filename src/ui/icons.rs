//! Status glyphs with ASCII fallbacks for terminals without emoji.

use console::Emoji;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[WARN]");
pub static FILE_NEW: Emoji<'_, '_> = Emoji("📄 ", "+");
pub static PENDING: Emoji<'_, '_> = Emoji("⏳ ", "[ ]");
pub static LOCK: Emoji<'_, '_> = Emoji("🔒 ", "[TLS]");
pub static GLOBE: Emoji<'_, '_> = Emoji("🌐 ", "[NET]");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", ">>");
