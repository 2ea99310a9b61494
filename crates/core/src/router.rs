//! The command router.
//!
//! Resolves a whitespace-tokenized command line to one of the hub's
//! operations and returns a JSON-serializable response. A thin facade:
//! argument validation and response shaping live here, the engineering
//! lives in the modules it calls into. Malformed invocations always
//! come back as `{error, example}` objects, never as errors to the
//! transport.

use crate::hub::Hub;
use crate::mapreduce::parse;
use cortex_api::*;
use serde_json::json;

/// The command surface, in the order `help` reports it.
const COMMANDS: &[(&str, &str)] = &[
    ("help", "help"),
    ("storage", "storage"),
    ("put", "put greeting hello 60"),
    ("get", "get greeting"),
    ("delete", "delete greeting"),
    ("keys", "keys"),
    ("expire", "expire greeting 30"),
    ("ttl", "ttl greeting"),
    ("peers", "peers"),
    ("whoami", "whoami"),
    ("benchmark", "benchmark iterations=50000 timeout=5000"),
    ("broadcast", "broadcast hello everyone"),
    ("audio", "audio list"),
    ("mapreduce", "mapreduce start tasks=[1,2,3] reducer=sum"),
];

/// The command names advertised in `client-list` messages.
pub(crate) fn command_names() -> Vec<String> {
    COMMANDS.iter().map(|(name, _)| name.to_string()).collect()
}

fn usage(command: &str, error: impl std::fmt::Display) -> serde_json::Value {
    let example = COMMANDS
        .iter()
        .find(|(name, _)| *name == command)
        .map(|(_, example)| *example)
        .unwrap_or("help");
    json!({
        "command": command,
        "error": error.to_string(),
        "example": example,
    })
}

/// Route one command line to the matching hub operation.
pub(crate) async fn route(
    hub: &Hub,
    line: &str,
    caller: Option<&ClientId>,
) -> serde_json::Value {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let verb = match tokens.first() {
        None => {
            return json!({
                "error": "empty command",
                "available": command_names(),
            })
        }
        Some(verb) => verb.to_ascii_lowercase(),
    };

    match verb.as_str() {
        "help" => help(),
        "storage" => storage(hub).await,
        "put" => put(hub, &tokens).await,
        "get" => get(hub, &tokens).await,
        "delete" => delete(hub, &tokens).await,
        "keys" => keys(hub).await,
        "expire" => expire(hub, &tokens).await,
        "ttl" => ttl(hub, &tokens).await,
        "peers" => peers(hub, caller),
        "whoami" => whoami(hub, caller).await,
        "benchmark" => benchmark(hub, &tokens, caller).await,
        "broadcast" => broadcast(hub, line, &tokens, caller).await,
        "audio" => audio(hub, &tokens).await,
        "mapreduce" => mapreduce(hub, &tokens, caller).await,
        unknown => json!({
            "error": format!("Unknown command: {unknown}"),
            "available": command_names(),
        }),
    }
}

fn help() -> serde_json::Value {
    json!({
        "command": "help",
        "commands": command_names(),
        "usage": COMMANDS
            .iter()
            .map(|(_, example)| *example)
            .collect::<Vec<_>>(),
    })
}

async fn storage(hub: &Hub) -> serde_json::Value {
    let keys = match hub.kv.backend().count().await {
        Ok(count) => count,
        Err(err) => {
            return json!({ "command": "storage", "error": err.to_string() })
        }
    };
    json!({
        "command": "storage",
        "backend": hub.kv.backend().descriptor(),
        "keys": keys,
        "alarm": hub.kv.alarm_deadline(),
    })
}

async fn put(hub: &Hub, tokens: &[&str]) -> serde_json::Value {
    let (key, value) = match (tokens.get(1), tokens.get(2)) {
        (Some(key), Some(value)) => (*key, *value),
        _ => return usage("put", "usage: put <key> <value> [ttlSeconds]"),
    };
    let ttl = match tokens.get(3) {
        None => None,
        Some(raw) => match raw.parse::<u64>() {
            Ok(secs) if secs > 0 => Some(secs),
            _ => {
                return usage("put", "ttlSeconds must be a positive integer")
            }
        },
    };
    // a value token that parses as JSON is stored as-is, anything else
    // as a plain string
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    match hub.kv.put(key, value, ttl).await {
        Ok(expires_at) => json!({
            "command": "put",
            "key": key,
            "ok": true,
            "expiresAt": expires_at,
        }),
        Err(err) => json!({
            "command": "put",
            "key": key,
            "error": err.to_string(),
        }),
    }
}

async fn get(hub: &Hub, tokens: &[&str]) -> serde_json::Value {
    let key = match tokens.get(1) {
        None => return usage("get", "usage: get <key>"),
        Some(key) => *key,
    };
    match hub.kv.get(key).await {
        Ok(got) => {
            let mut out = json!({
                "command": "get",
                "key": key,
                "value": got.value,
            });
            if got.expired {
                out["expired"] = json!(true);
            }
            out
        }
        Err(err) => json!({
            "command": "get",
            "key": key,
            "error": err.to_string(),
        }),
    }
}

async fn delete(hub: &Hub, tokens: &[&str]) -> serde_json::Value {
    let key = match tokens.get(1) {
        None => return usage("delete", "usage: delete <key>"),
        Some(key) => *key,
    };
    match hub.kv.delete(key).await {
        Ok(deleted) => json!({
            "command": "delete",
            "key": key,
            "deleted": deleted,
        }),
        Err(err) => json!({
            "command": "delete",
            "key": key,
            "error": err.to_string(),
        }),
    }
}

async fn keys(hub: &Hub) -> serde_json::Value {
    match hub.kv.list().await {
        Ok(list) => json!({
            "command": "keys",
            "keys": list.keys,
            "count": list.count,
            "size": list.size,
        }),
        Err(err) => json!({ "command": "keys", "error": err.to_string() }),
    }
}

async fn expire(hub: &Hub, tokens: &[&str]) -> serde_json::Value {
    let (key, secs) = match (tokens.get(1), tokens.get(2)) {
        (Some(key), Some(secs)) => (*key, *secs),
        _ => return usage("expire", "usage: expire <key> <seconds>"),
    };
    let secs = match secs.parse::<u64>() {
        Ok(secs) if secs > 0 => secs,
        _ => return usage("expire", "seconds must be a positive integer"),
    };
    match hub.kv.expire(key, secs).await {
        Ok(Some(expires_at)) => json!({
            "command": "expire",
            "key": key,
            "ok": true,
            "expiresAt": expires_at,
        }),
        Ok(None) => json!({
            "command": "expire",
            "key": key,
            "error": "key not found",
        }),
        Err(err) => json!({
            "command": "expire",
            "key": key,
            "error": err.to_string(),
        }),
    }
}

async fn ttl(hub: &Hub, tokens: &[&str]) -> serde_json::Value {
    let key = match tokens.get(1) {
        None => return usage("ttl", "usage: ttl <key>"),
        Some(key) => *key,
    };
    match hub.kv.ttl(key).await {
        Ok(ttl) => json!({ "command": "ttl", "key": key, "ttl": ttl }),
        Err(err) => json!({
            "command": "ttl",
            "key": key,
            "error": err.to_string(),
        }),
    }
}

fn peers(hub: &Hub, caller: Option<&ClientId>) -> serde_json::Value {
    let peers: Vec<serde_json::Value> = hub
        .registry
        .snapshot()
        .iter()
        .map(|entry| {
            json!({
                "id": entry.descriptor.id,
                "joinedAt": entry.descriptor.joined_at,
                "vector": entry.descriptor.vector,
                "isMe": Some(&entry.descriptor.id) == caller,
            })
        })
        .collect();
    json!({
        "command": "peers",
        "count": peers.len(),
        "peers": peers,
    })
}

async fn whoami(hub: &Hub, caller: Option<&ClientId>) -> serde_json::Value {
    let caller = match caller {
        None => {
            return json!({
                "command": "whoami",
                "error": "no caller identity on this session",
            })
        }
        Some(caller) => caller,
    };
    let entry = match hub.registry.get(caller) {
        None => {
            return json!({
                "command": "whoami",
                "error": format!("client not registered: {caller}"),
            })
        }
        Some(entry) => entry,
    };
    let kv_keys = hub.kv.backend().count().await.unwrap_or(0);
    json!({
        "command": "whoami",
        "client": &*entry.descriptor,
        "serverTime": Timestamp::now(),
        "totalPeers": hub.registry.len(),
        "kvKeys": kv_keys,
        "backend": hub.kv.backend().descriptor(),
    })
}

async fn benchmark(
    hub: &Hub,
    tokens: &[&str],
    caller: Option<&ClientId>,
) -> serde_json::Value {
    if tokens
        .get(1)
        .map(|t| t.eq_ignore_ascii_case("report"))
        .unwrap_or(false)
    {
        return benchmark_report(hub, tokens, caller);
    }

    let mut iterations = None;
    let mut timeout_ms = None;
    for token in &tokens[1..] {
        if let Some((key, value)) = token.split_once('=') {
            let parsed = value.parse::<u64>();
            match (key.to_ascii_lowercase().as_str(), parsed) {
                ("iterations" | "loops", Ok(n)) => iterations = Some(n),
                ("timeout" | "timeoutms", Ok(n)) => timeout_ms = Some(n),
                (key, _) => {
                    return usage(
                        "benchmark",
                        format!("unrecognized option: {key}={value}"),
                    )
                }
            }
        } else {
            match token.parse::<u64>() {
                Ok(n) => iterations = Some(n),
                Err(_) => {
                    return usage(
                        "benchmark",
                        format!("unrecognized argument: {token}"),
                    )
                }
            }
        }
    }

    match hub.benchmarks.start(caller, iterations, timeout_ms).await {
        Ok(summary) => serde_json::to_value(&summary).unwrap_or_else(|err| {
            json!({ "command": "benchmark", "error": err.to_string() })
        }),
        Err(CxError::NoClients) => json!({
            "command": "benchmark",
            "error": "no clients connected",
        }),
        Err(err) => json!({
            "command": "benchmark",
            "error": err.to_string(),
        }),
    }
}

fn benchmark_report(
    hub: &Hub,
    tokens: &[&str],
    caller: Option<&ClientId>,
) -> serde_json::Value {
    let caller = match caller {
        None => {
            return usage(
                "benchmark",
                "benchmark report requires a caller identity",
            )
        }
        Some(caller) => caller,
    };
    let (request_id, duration) = match (tokens.get(2), tokens.get(3)) {
        (Some(request_id), Some(duration)) => (*request_id, *duration),
        _ => {
            return usage(
                "benchmark",
                "usage: benchmark report <requestId> <durationMs> [details]",
            )
        }
    };
    let duration_ms = match duration.parse::<f64>() {
        Ok(ms) if ms.is_finite() && ms >= 0.0 => ms,
        _ => {
            return usage(
                "benchmark",
                "durationMs must be a non-negative number",
            )
        }
    };
    let details = if tokens.len() > 4 {
        Some(tokens[4..].join(" "))
    } else {
        None
    };
    hub.benchmarks
        .report(&request_id.into(), caller, duration_ms, details)
}

async fn broadcast(
    hub: &Hub,
    line: &str,
    tokens: &[&str],
    caller: Option<&ClientId>,
) -> serde_json::Value {
    if tokens.len() < 2 {
        return usage("broadcast", "usage: broadcast <message>");
    }
    // keep the original spacing of the message tail
    let message = line
        .trim_start()
        .splitn(2, char::is_whitespace)
        .nth(1)
        .unwrap_or("")
        .trim_start()
        .to_string();
    let envelope = HubMessage::UserMessage {
        from: caller
            .map(|c| c.to_string())
            .unwrap_or_else(|| "server".to_string()),
        message: message.clone(),
        timestamp: Timestamp::now(),
    };
    let frame = match envelope.encode() {
        Ok(frame) => frame,
        Err(err) => {
            return json!({
                "command": "broadcast",
                "error": err.to_string(),
            })
        }
    };
    let recipients = hub.broadcaster.broadcast(frame).await;
    json!({
        "command": "broadcast",
        "recipients": recipients,
        "message": message,
    })
}

const AUDIO_EXAMPLE: &str =
    "audio list | audio get <filename> | audio upload <filename> <base64>";

async fn audio(hub: &Hub, tokens: &[&str]) -> serde_json::Value {
    let sub = tokens
        .get(1)
        .map(|t| t.to_ascii_lowercase())
        .unwrap_or_default();
    match sub.as_str() {
        "list" => match hub.objects.list().await {
            Ok(files) => json!({
                "command": "audio list",
                "count": files.len(),
                "files": files,
            }),
            Err(err) => json!({
                "command": "audio list",
                "error": err.to_string(),
            }),
        },
        "get" => {
            let name = match tokens.get(2) {
                None => {
                    return json!({
                        "command": "audio get",
                        "error": "usage: audio get <filename>",
                        "example": AUDIO_EXAMPLE,
                    })
                }
                Some(name) => *name,
            };
            match hub.objects.get(name.to_string()).await {
                Ok(Some(body)) => {
                    use base64::prelude::*;
                    json!({
                        "command": "audio get",
                        "name": name,
                        "size": body.data.len(),
                        "contentType": body.content_type,
                        "dataBase64": BASE64_STANDARD.encode(&body.data),
                    })
                }
                Ok(None) => json!({
                    "command": "audio get",
                    "name": name,
                    "error": "not found",
                }),
                Err(err) => json!({
                    "command": "audio get",
                    "name": name,
                    "error": err.to_string(),
                }),
            }
        }
        "upload" => {
            let (name, encoded) = match (tokens.get(2), tokens.get(3)) {
                (Some(name), Some(encoded)) => (*name, *encoded),
                _ => {
                    return json!({
                        "command": "audio upload",
                        "error": "usage: audio upload <filename> <base64>",
                        "example": AUDIO_EXAMPLE,
                    })
                }
            };
            let data = match parse::decode_base64(encoded) {
                None => {
                    return json!({
                        "command": "audio upload",
                        "name": name,
                        "error": "invalid base64 data",
                    })
                }
                Some(data) => bytes::Bytes::from(data),
            };
            let content_type =
                object_store::content_type_for_name(name).to_string();
            let size = data.len();
            match hub
                .objects
                .put(name.to_string(), data, content_type.clone())
                .await
            {
                Ok(()) => json!({
                    "command": "audio upload",
                    "name": name,
                    "ok": true,
                    "size": size,
                    "contentType": content_type,
                }),
                Err(err) => json!({
                    "command": "audio upload",
                    "name": name,
                    "error": err.to_string(),
                }),
            }
        }
        // an unrecognized subcommand is an explicit error, it does not
        // fall through to an empty response
        other => json!({
            "command": "audio",
            "error": if other.is_empty() {
                "missing audio subcommand".to_string()
            } else {
                format!("unknown audio subcommand: {other}")
            },
            "example": AUDIO_EXAMPLE,
        }),
    }
}

const MAPREDUCE_EXAMPLE: &str =
    "mapreduce start tasks=[1,2,3] reducer=sum timeout=30000";

async fn mapreduce(
    hub: &Hub,
    tokens: &[&str],
    caller: Option<&ClientId>,
) -> serde_json::Value {
    let sub = tokens
        .get(1)
        .map(|t| t.to_ascii_lowercase())
        .unwrap_or_default();
    match sub.as_str() {
        "start" | "run" => mapreduce_start(hub, tokens, caller).await,
        "report" => mapreduce_report(hub, tokens, caller),
        "status" => match tokens.get(2) {
            None => json!({
                "command": "mapreduce status",
                "error": "usage: mapreduce status <requestId>",
                "example": "mapreduce status req-0",
            }),
            Some(request_id) => hub.mapreduce.status(&(*request_id).into()),
        },
        "cancel" => match tokens.get(2) {
            None => json!({
                "command": "mapreduce cancel",
                "error": "usage: mapreduce cancel <requestId>",
                "example": "mapreduce cancel req-0",
            }),
            Some(request_id) => hub.mapreduce.cancel(&(*request_id).into()),
        },
        other => json!({
            "command": "mapreduce",
            "error": if other.is_empty() {
                "missing mapreduce subcommand".to_string()
            } else {
                format!("unknown mapreduce subcommand: {other}")
            },
            "example": MAPREDUCE_EXAMPLE,
        }),
    }
}

async fn mapreduce_start(
    hub: &Hub,
    tokens: &[&str],
    caller: Option<&ClientId>,
) -> serde_json::Value {
    let mut tasks = None;
    let mut reducer = Reducer::Collect;
    let mut timeout_ms = None;
    for token in &tokens[2..] {
        let (key, value) = match token.split_once('=') {
            None => {
                return json!({
                    "command": "mapreduce start",
                    "error": format!("unrecognized argument: {token}"),
                    "example": MAPREDUCE_EXAMPLE,
                })
            }
            Some(kv) => kv,
        };
        match key.to_ascii_lowercase().as_str() {
            "tasks" => tasks = Some(value),
            "reducer" => match Reducer::parse(value) {
                Some(r) => reducer = r,
                None => {
                    return json!({
                        "command": "mapreduce start",
                        "error": format!("unknown reducer: {value}"),
                        "example": MAPREDUCE_EXAMPLE,
                    })
                }
            },
            "timeout" | "timeoutms" => match value.parse::<u64>() {
                Ok(ms) if ms > 0 => timeout_ms = Some(ms),
                _ => {
                    return json!({
                        "command": "mapreduce start",
                        "error": "timeout must be a positive integer (ms)",
                        "example": MAPREDUCE_EXAMPLE,
                    })
                }
            },
            other => {
                return json!({
                    "command": "mapreduce start",
                    "error": format!("unrecognized option: {other}"),
                    "example": MAPREDUCE_EXAMPLE,
                })
            }
        }
    }
    let tasks = match tasks {
        None => {
            return json!({
                "command": "mapreduce start",
                "error": "tasks=<payload> is required",
                "example": MAPREDUCE_EXAMPLE,
            })
        }
        Some(tasks) => tasks,
    };

    match hub.mapreduce.start(caller, tasks, reducer, timeout_ms).await {
        Ok(summary) => serde_json::to_value(&summary).unwrap_or_else(|err| {
            json!({ "command": "mapreduce", "error": err.to_string() })
        }),
        Err(CxError::NoClients) => json!({
            "command": "mapreduce start",
            "error": "no clients connected",
        }),
        Err(CxError::NoTasks) => json!({
            "command": "mapreduce start",
            "error": "no tasks parsed",
            "example": MAPREDUCE_EXAMPLE,
        }),
        Err(err) => json!({
            "command": "mapreduce start",
            "error": err.to_string(),
            "example": MAPREDUCE_EXAMPLE,
        }),
    }
}

fn mapreduce_report(
    hub: &Hub,
    tokens: &[&str],
    caller: Option<&ClientId>,
) -> serde_json::Value {
    let (request_id, task_id) = match (tokens.get(2), tokens.get(3)) {
        (Some(request_id), Some(task_id)) => (*request_id, *task_id),
        _ => {
            return json!({
                "command": "mapreduce report",
                "error": "usage: mapreduce report <requestId> <taskId> \
                          [<result>|result=<value>] [error=<message>] \
                          [metadata=<json>]",
                "example": "mapreduce report req-0 task-1 result=42",
            })
        }
    };

    let mut result = None;
    let mut error = None;
    let mut metadata = None;
    for token in &tokens[4..] {
        match token.split_once('=') {
            Some(("result", value)) => {
                result = Some(parse::decode_result(value))
            }
            Some(("error", value)) => error = Some(value.to_string()),
            Some(("metadata", value)) => {
                match serde_json::from_str(value) {
                    Ok(value) => metadata = Some(value),
                    Err(_) => {
                        return json!({
                            "command": "mapreduce report",
                            "error": "metadata must be valid JSON",
                            "example":
                                "mapreduce report req-0 task-1 metadata={}",
                        })
                    }
                }
            }
            _ if result.is_none() && error.is_none() => {
                result = Some(parse::decode_result(token))
            }
            _ => {
                return json!({
                    "command": "mapreduce report",
                    "error": format!("unrecognized argument: {token}"),
                    "example": "mapreduce report req-0 task-1 result=42",
                })
            }
        }
    }

    hub.mapreduce.report(
        &request_id.into(),
        &task_id.into(),
        caller,
        result,
        error,
        metadata,
    )
}
