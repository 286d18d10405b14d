use crate::format::{
    action_verb, file_context, file_type_emoji, file_type_label, grouped_suffix, network_context,
    display_url, EMOJI_ASYNC_OPS, EMOJI_COMMAND, EMOJI_CONFIG, EMOJI_DOM_INJECTION,
    EMOJI_EVENT_SOURCE, EMOJI_LINK, EMOJI_NETWORK, EMOJI_TEMPLATE, EMOJI_TIMEOUT,
    EMOJI_WEBSOCKET, EMOJI_WEB_WORKER,
};
use crate::observation::{Category, Detail};
use serde_json::Value;

const CONFIG_DIR_MARKER: &str = ".obsidian/";
const TEMPLATE_MARKER: &str = "template";
const GENERIC_CONTEXT: &str = "Atividade genérica";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interpretation {
    pub interpretation: String,
    pub context: String,
}

/// Turns a structured observation into a one-line sentence and a short context label.
///
/// Total over its inputs: missing or oddly typed detail fields degrade to empty
/// text, never to an error.
#[derive(Clone, Copy, Debug, Default)]
pub struct ActivityInterpreter;

impl ActivityInterpreter {
    pub fn new() -> Self {
        Self
    }

    pub fn interpret(
        &self,
        category: Category,
        extension: &str,
        action: &str,
        detail: &Detail,
    ) -> Interpretation {
        match category {
            Category::Network => {
                let url = text(detail, "url").unwrap_or_default();
                Interpretation {
                    interpretation: network_sentence(extension, detail),
                    context: network_context(url),
                }
            }
            Category::File => {
                let path = text(detail, "path").unwrap_or_default();
                Interpretation {
                    interpretation: file_sentence(extension, action, path),
                    context: file_context(path),
                }
            }
            Category::Command => {
                let target = non_empty(detail, "commandId")
                    .or_else(|| non_empty(detail, "url"))
                    .unwrap_or("N/A");
                Interpretation {
                    interpretation: command_sentence(extension, action, detail),
                    context: format!("Comando: {target}"),
                }
            }
            _ => generic(extension, action),
        }
    }

    /// Same as [`Self::interpret`] for a category carried as free text.
    pub fn interpret_tag(
        &self,
        category: &str,
        extension: &str,
        action: &str,
        detail: &Detail,
    ) -> Interpretation {
        match category.parse::<Category>() {
            Ok(category) => self.interpret(category, extension, action, detail),
            Err(_) => generic(extension, action),
        }
    }
}

fn generic(extension: &str, action: &str) -> Interpretation {
    Interpretation {
        interpretation: format!("{extension} executou {action}"),
        context: GENERIC_CONTEXT.to_string(),
    }
}

fn text<'a>(detail: &'a Detail, key: &str) -> Option<&'a str> {
    detail.get(key).and_then(Value::as_str)
}

fn non_empty<'a>(detail: &'a Detail, key: &str) -> Option<&'a str> {
    text(detail, key).filter(|value| !value.is_empty())
}

fn positive(detail: &Detail, key: &str) -> Option<u64> {
    let value = detail.get(key)?;
    let number = value
        .as_u64()
        .or_else(|| value.as_f64().filter(|v| *v > 0.0).map(|v| v as u64))?;
    (number > 0).then_some(number)
}

fn network_sentence(extension: &str, detail: &Detail) -> String {
    let url = text(detail, "url").unwrap_or_default();
    let method = non_empty(detail, "method").unwrap_or("GET");
    let mut sentence = format!("{EMOJI_NETWORK} {extension} - {method} {}", display_url(url));

    let grouped = detail
        .get("grouped")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if grouped {
        if let (Some(count), Some(span)) =
            (positive(detail, "repeatCount"), positive(detail, "timeSpan"))
        {
            sentence.push_str(&grouped_suffix(count, span));
        }
    }
    sentence
}

fn file_sentence(extension: &str, action: &str, path: &str) -> String {
    let verb = action_verb(action);
    if path.contains(CONFIG_DIR_MARKER) {
        format!("{EMOJI_CONFIG} {extension} está {verb} configurações do Obsidian")
    } else if path.contains(TEMPLATE_MARKER) {
        format!("{EMOJI_TEMPLATE} {extension} está {verb} um template")
    } else {
        format!(
            "{} {extension} está {verb} {}",
            file_type_emoji(path),
            file_type_label(path)
        )
    }
}

fn command_sentence(extension: &str, action: &str, detail: &Detail) -> String {
    if let Some(command_id) = non_empty(detail, "commandId") {
        return format!("{EMOJI_COMMAND} {extension} executou comando: {command_id}");
    }
    if let Some(url) = non_empty(detail, "url") {
        return format!("{EMOJI_LINK} {extension} abrindo URL externa: {url}");
    }
    match action {
        "web-worker" => format!("{EMOJI_WEB_WORKER} {extension} criando Web Worker"),
        "event-source" => {
            format!("{EMOJI_EVENT_SOURCE} {extension} estabelecendo Server-Sent Events")
        }
        "websocket" => format!("{EMOJI_WEBSOCKET} {extension} conectando via WebSocket"),
        "set-timeout" => format!("{EMOJI_TIMEOUT} {extension} agendando tarefa"),
        "append-element" => format!("{EMOJI_DOM_INJECTION} {extension} injetando elemento DOM"),
        "promise-all" => format!("{EMOJI_ASYNC_OPS} {extension} executando operações assíncronas"),
        other => format!("{EMOJI_COMMAND} {extension} executou ação: {other}"),
    }
}
