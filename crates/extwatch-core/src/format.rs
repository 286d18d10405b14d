//! Lookup tables and small formatters shared by the interpreter and the log views.

use crate::paths;
use url::Url;

pub const EMOJI_FILE: &str = "📁";
pub const EMOJI_COMMAND: &str = "⚡";
pub const EMOJI_NETWORK: &str = "🌐";
pub const EMOJI_NOTE: &str = "📝";
pub const EMOJI_CONFIG: &str = "⚙️";
pub const EMOJI_STYLE: &str = "🎨";
pub const EMOJI_CODE: &str = "💻";
pub const EMOJI_IMAGE: &str = "🖼️";
pub const EMOJI_PDF: &str = "📄";
pub const EMOJI_TEMPLATE: &str = "📄";
pub const EMOJI_LINK: &str = "🔗";
pub const EMOJI_WEB_WORKER: &str = "🔧";
pub const EMOJI_EVENT_SOURCE: &str = "📡";
pub const EMOJI_WEBSOCKET: &str = "🔌";
pub const EMOJI_TIMEOUT: &str = "⏰";
pub const EMOJI_DOM_INJECTION: &str = "🎨";
pub const EMOJI_ASYNC_OPS: &str = "🔄";

/// Fallback context when a file path has no folder segment.
pub const FILE_CONTEXT_FALLBACK: &str = "arquivo";

/// Localized progressive verb for a vault action. Unknown actions pass through.
pub fn action_verb(action: &str) -> &str {
    match action {
        "read" => "lendo",
        "modify" => "editando",
        "create" => "criando",
        "delete" => "excluindo",
        other => other,
    }
}

// Text after the last dot of the whole path, like a naive split on '.'.
fn path_suffix(path: &str) -> String {
    path.rsplit('.').next().unwrap_or(path).to_ascii_lowercase()
}

pub fn file_type_label(path: &str) -> &'static str {
    match path_suffix(path).as_str() {
        "md" => "nota",
        "json" => "configurações",
        "css" => "estilos",
        "js" | "ts" => "código",
        "png" | "jpg" | "jpeg" | "gif" | "svg" => "imagem",
        "pdf" => "PDF",
        _ => "arquivo",
    }
}

pub fn file_type_emoji(path: &str) -> &'static str {
    match path_suffix(path).as_str() {
        "md" => EMOJI_NOTE,
        "json" => EMOJI_CONFIG,
        "css" => EMOJI_STYLE,
        "js" | "ts" => EMOJI_CODE,
        "png" | "jpg" | "jpeg" | "gif" | "svg" => EMOJI_IMAGE,
        "pdf" => EMOJI_PDF,
        _ => EMOJI_FILE,
    }
}

pub fn grouped_suffix(repeat_count: u64, time_span_ms: u64) -> String {
    let seconds = (time_span_ms as f64 / 1000.0).round() as u64;
    format!(" ({repeat_count}x em {seconds}s)")
}

pub fn file_context(path: &str) -> String {
    match paths::parent_folder_name(path) {
        Some(folder) => format!("{EMOJI_FILE} {folder}"),
        None => FILE_CONTEXT_FALLBACK.to_string(),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedUrl {
    pub domain: String,
    pub pathname: String,
    pub search: String,
    pub full_path: String,
}

/// Splits an absolute URL into display parts. Relative or malformed input yields `None`.
pub fn parse_url(raw: &str) -> Option<ParsedUrl> {
    let url = Url::parse(raw).ok()?;
    let domain = url.host_str().unwrap_or_default().to_string();
    let pathname = url.path().to_string();
    let search = match url.query() {
        Some(query) if !query.is_empty() => format!("?{query}"),
        _ => String::new(),
    };
    let full_path = format!("{domain}{pathname}{search}");
    Some(ParsedUrl {
        domain,
        pathname,
        search,
        full_path,
    })
}

pub fn display_url(raw: &str) -> String {
    parse_url(raw)
        .map(|parsed| parsed.full_path)
        .unwrap_or_else(|| raw.to_string())
}

pub fn network_context(raw: &str) -> String {
    format!("{EMOJI_NETWORK} {}", display_url(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbs_translate_known_actions_only() {
        assert_eq!(action_verb("read"), "lendo");
        assert_eq!(action_verb("delete"), "excluindo");
        assert_eq!(action_verb("rename"), "rename");
    }

    #[test]
    fn file_tables_follow_last_suffix() {
        assert_eq!(file_type_label("notes/a.MD"), "nota");
        assert_eq!(file_type_label("img/photo.jpeg"), "imagem");
        assert_eq!(file_type_label("docs/paper.pdf"), "PDF");
        assert_eq!(file_type_label("bin/data.bin"), "arquivo");
        assert_eq!(file_type_emoji("scripts/main.ts"), EMOJI_CODE);
        assert_eq!(file_type_emoji("styles/theme.css"), EMOJI_STYLE);
        assert_eq!(file_type_emoji("README"), EMOJI_FILE);
    }

    #[test]
    fn grouped_suffix_rounds_to_seconds() {
        assert_eq!(grouped_suffix(4, 1_499), " (4x em 1s)");
        assert_eq!(grouped_suffix(4, 1_500), " (4x em 2s)");
    }

    #[test]
    fn file_context_uses_parent_folder() {
        assert_eq!(file_context("notes/daily/today.md"), "📁 daily");
        assert_eq!(file_context("today.md"), "arquivo");
        assert_eq!(file_context(""), "arquivo");
    }

    #[test]
    fn urls_render_host_path_and_query() {
        let parsed = parse_url("https://a.b/c?x=1#frag").expect("valid url");
        assert_eq!(parsed.domain, "a.b");
        assert_eq!(parsed.full_path, "a.b/c?x=1");

        assert_eq!(display_url("https://a.b"), "a.b/");
        assert_eq!(display_url("https://a.b/?"), "a.b/");
        assert_eq!(display_url("not a url"), "not a url");
        assert_eq!(network_context("https://api.test/v1"), "🌐 api.test/v1");
    }
}
