//! JSON-RPC wire types and the static initialize payload.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::SessionConfig;

#[derive(Debug, thiserror::Error)]
#[error("cannot express path as a file URI: {}", path.display())]
pub(crate) struct PathToUriError {
    path: PathBuf,
}

#[derive(Debug, Serialize)]
pub(crate) struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Request {
    pub fn new(id: u64, method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// `window/logMessage` and `window/showMessage` share this shape; the
/// numeric message type is irrelevant to readiness inference.
#[derive(Debug, Deserialize)]
pub(crate) struct MessageParams {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProgressParams {
    pub value: ProgressValue,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ProgressValue {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConfigurationParams {
    #[serde(default)]
    pub items: Vec<serde_json::Value>,
}

pub(crate) fn path_to_file_uri(path: &Path) -> Result<url::Url, PathToUriError> {
    url::Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}

/// Build the `initialize` request params — a pure function of the workspace
/// root and static configuration.
pub(crate) fn initialize_params(
    workspace_root: &Path,
    config: &SessionConfig,
) -> Result<serde_json::Value, PathToUriError> {
    let root_uri = path_to_file_uri(workspace_root)?;
    let workspace_name = workspace_root
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("workspace");

    Ok(serde_json::json!({
        "processId": std::process::id(),
        "rootPath": workspace_root.to_string_lossy(),
        "rootUri": root_uri.as_str(),
        "initializationOptions": {
            "fallbackBuildSystem": "swiftpm",
            "backgroundIndexing": config.background_indexing,
            "completion": {
                "maxResults": config.completion_max_results,
                "serverSideFiltering": true
            }
        },
        "capabilities": client_capabilities(),
        "workspaceFolders": [{
            "uri": root_uri.as_str(),
            "name": workspace_name
        }]
    }))
}

/// The static client capability advertisement. Constant data, not derived
/// logic; the server is free to ignore most of it.
fn client_capabilities() -> serde_json::Value {
    serde_json::json!({
        "workspace": {
            "applyEdit": true,
            "workspaceEdit": { "documentChanges": true },
            "didChangeConfiguration": { "dynamicRegistration": true },
            "didChangeWatchedFiles": { "dynamicRegistration": true },
            "symbol": { "dynamicRegistration": true },
            "executeCommand": { "dynamicRegistration": true },
            "workspaceFolders": true,
            "configuration": true
        },
        "textDocument": {
            "synchronization": {
                "dynamicRegistration": true,
                "willSave": true,
                "willSaveWaitUntil": true,
                "didSave": true
            },
            "completion": {
                "dynamicRegistration": true,
                "contextSupport": true,
                "completionItem": {
                    "snippetSupport": true,
                    "documentationFormat": ["markdown", "plaintext"],
                    "deprecatedSupport": true,
                    "insertReplaceSupport": true,
                    "resolveSupport": {
                        "properties": ["documentation", "detail", "additionalTextEdits"]
                    }
                }
            },
            "hover": {
                "dynamicRegistration": true,
                "contentFormat": ["markdown", "plaintext"]
            },
            "signatureHelp": { "dynamicRegistration": true, "contextSupport": true },
            "definition": { "dynamicRegistration": true, "linkSupport": true },
            "references": { "dynamicRegistration": true },
            "documentHighlight": { "dynamicRegistration": true },
            "documentSymbol": {
                "dynamicRegistration": true,
                "hierarchicalDocumentSymbolSupport": true
            },
            "codeAction": {
                "dynamicRegistration": true,
                "codeActionLiteralSupport": {
                    "codeActionKind": {
                        "valueSet": [
                            "",
                            "quickfix",
                            "refactor",
                            "refactor.extract",
                            "refactor.inline",
                            "refactor.rewrite",
                            "source",
                            "source.organizeImports",
                            "source.fixAll"
                        ]
                    }
                }
            },
            "formatting": { "dynamicRegistration": true },
            "rename": { "dynamicRegistration": true, "prepareSupport": true },
            "foldingRange": { "dynamicRegistration": true, "lineFoldingOnly": true },
            "publishDiagnostics": {
                "relatedInformation": true,
                "tagSupport": { "valueSet": [1, 2] }
            },
            "semanticTokens": {
                "dynamicRegistration": true,
                "tokenTypes": [
                    "namespace", "type", "class", "enum", "interface", "struct",
                    "typeParameter", "parameter", "variable", "property", "enumMember",
                    "event", "function", "method", "macro", "keyword", "modifier",
                    "comment", "string", "number", "regexp", "operator"
                ],
                "tokenModifiers": [
                    "declaration", "definition", "readonly", "static", "deprecated",
                    "abstract", "async", "modification", "documentation", "defaultLibrary"
                ],
                "formats": ["relative"],
                "requests": { "range": true, "full": { "delta": true } }
            }
        },
        "window": {
            "workDoneProgress": true,
            "showMessage": { "messageActionItem": { "additionalPropertiesSupport": true } },
            "showDocument": { "support": true }
        },
        "general": {
            "regularExpressions": { "engine": "ECMAScript" },
            "markdown": { "parser": "marked", "version": "1.1.0" }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SessionConfig;

    #[cfg(windows)]
    fn test_root() -> &'static Path {
        Path::new(r"C:\pkg")
    }

    #[cfg(not(windows))]
    fn test_root() -> &'static Path {
        Path::new("/pkg")
    }

    #[test]
    fn initialize_params_has_required_fields() {
        let params = initialize_params(test_root(), &SessionConfig::default()).unwrap();
        assert!(params["processId"].is_number());
        assert!(params["rootUri"].as_str().unwrap().starts_with("file://"));
        assert_eq!(params["rootUri"], params["workspaceFolders"][0]["uri"]);
        assert_eq!(params["workspaceFolders"][0]["name"], "pkg");
        assert!(params["capabilities"]["textDocument"]["synchronization"].is_object());
        assert_eq!(params["capabilities"]["window"]["workDoneProgress"], true);
    }

    #[test]
    fn initialize_params_reflect_config() {
        let config = SessionConfig {
            background_indexing: false,
            completion_max_results: 50,
            ..SessionConfig::default()
        };
        let params = initialize_params(test_root(), &config).unwrap();
        let options = &params["initializationOptions"];
        assert_eq!(options["backgroundIndexing"], false);
        assert_eq!(options["completion"]["maxResults"], 50);
        assert_eq!(options["fallbackBuildSystem"], "swiftpm");
    }

    #[test]
    fn initialize_params_rejects_relative_root() {
        assert!(initialize_params(Path::new("relative/dir"), &SessionConfig::default()).is_err());
    }

    #[test]
    fn request_omits_absent_params() {
        let json = serde_json::to_value(Request::new(1, "shutdown", None)).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 1);
        assert_eq!(json["method"], "shutdown");
        assert!(json.get("params").is_none(), "params must be omitted, not null");
    }

    #[test]
    fn notification_carries_params_when_present() {
        let json = serde_json::to_value(Notification::new(
            "initialized",
            Some(serde_json::json!({})),
        ))
        .unwrap();
        assert_eq!(json["method"], "initialized");
        assert!(json.get("id").is_none());
        assert!(json.get("params").is_some());
    }

    #[test]
    fn message_params_tolerate_missing_message() {
        let params: MessageParams = serde_json::from_value(serde_json::json!({"type": 3})).unwrap();
        assert_eq!(params.message, "");
    }

    #[test]
    fn progress_params_parse_value() {
        let params: ProgressParams = serde_json::from_value(serde_json::json!({
            "token": "index-1",
            "value": { "kind": "end", "message": "Indexing" }
        }))
        .unwrap();
        assert_eq!(params.value.kind, "end");
        assert_eq!(params.value.message, "Indexing");
    }

    #[test]
    fn configuration_params_default_to_no_items() {
        let params: ConfigurationParams = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(params.items.is_empty());
    }
}
