//! Wire-format tests for the OpenAI adapter: request building and response
//! parsing, no network involved.

use armitage::providers::openai::{build_request, parse_response, OpenAiProvider};
use armitage::providers::{
    CompletionRequest, ContentPart, LlmProvider, Message, MessageContent, ProviderError, Role,
    StopReason, ToolDefinition,
};

fn base_request(messages: Vec<Message>) -> CompletionRequest {
    CompletionRequest {
        messages,
        system: Some("Você é a Marina, consultora da Straylight Digital.".to_owned()),
        tools: Vec::new(),
        max_tokens: Some(1024),
        temperature: Some(0.7),
        stop_sequences: Vec::new(),
    }
}

fn user_text(text: &str) -> Message {
    Message {
        role: Role::User,
        content: MessageContent::Text(text.to_owned()),
    }
}

#[test]
fn the_provider_advertises_tool_calling_and_its_spec() {
    let provider = OpenAiProvider::new(
        "openai/gpt-4o-mini".to_owned(),
        "gpt-4o-mini".to_owned(),
        "sk-test".to_owned(),
    );
    assert!(provider.supports_tool_calling());
    assert_eq!(provider.model_id(), "openai/gpt-4o-mini");
}

#[test]
fn the_system_prompt_leads_the_message_list() {
    let request = base_request(vec![user_text("quero um site")]);
    let wire = build_request("gpt-4o-mini", &request);

    assert_eq!(wire.model, "gpt-4o-mini");
    assert_eq!(wire.messages.len(), 2);
    assert_eq!(wire.messages[0].role, "system");
    assert_eq!(
        wire.messages[0].content.as_deref(),
        Some("Você é a Marina, consultora da Straylight Digital.")
    );
    assert_eq!(wire.messages[1].role, "user");
    assert_eq!(wire.messages[1].content.as_deref(), Some("quero um site"));
}

#[test]
fn tool_phases_flatten_into_openai_roles() {
    let request = base_request(vec![
        user_text("pode agendar amanhã às 10h?"),
        Message {
            role: Role::Assistant,
            content: MessageContent::Parts(vec![
                ContentPart::Text {
                    text: "Vou verificar a agenda.".to_owned(),
                },
                ContentPart::ToolUse {
                    id: "call-1".to_owned(),
                    name: "search_slots".to_owned(),
                    input: serde_json::json!({ "days": 3 }),
                },
            ]),
        },
        Message {
            role: Role::User,
            content: MessageContent::Parts(vec![ContentPart::ToolResult {
                tool_use_id: "call-1".to_owned(),
                content: "HORARIOS:\n2026-09-15|10:00".to_owned(),
                is_error: false,
            }]),
        },
    ]);
    let wire = build_request("gpt-4o-mini", &request);

    // system + user + assistant-with-tool-calls + tool result.
    assert_eq!(wire.messages.len(), 4);

    let assistant = &wire.messages[2];
    assert_eq!(assistant.role, "assistant");
    assert_eq!(assistant.content.as_deref(), Some("Vou verificar a agenda."));
    let calls = assistant.tool_calls.as_ref().expect("tool calls present");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].id, "call-1");
    assert_eq!(calls[0].kind, "function");
    assert_eq!(calls[0].function.name, "search_slots");
    assert_eq!(calls[0].function.arguments, r#"{"days":3}"#);

    let result = &wire.messages[3];
    assert_eq!(result.role, "tool");
    assert_eq!(result.tool_call_id.as_deref(), Some("call-1"));
    assert_eq!(
        result.content.as_deref(),
        Some("HORARIOS:\n2026-09-15|10:00")
    );
}

#[test]
fn tool_definitions_become_function_entries() {
    let mut request = base_request(vec![user_text("oi")]);
    request.tools = vec![ToolDefinition {
        name: "book_slot".to_owned(),
        description: "Agenda uma reunião.".to_owned(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": { "date": { "type": "string" } },
            "required": ["date"]
        }),
    }];
    let wire = build_request("gpt-4o-mini", &request);

    assert_eq!(wire.tools.len(), 1);
    assert_eq!(wire.tools[0]["type"], "function");
    assert_eq!(wire.tools[0]["function"]["name"], "book_slot");
    assert_eq!(
        wire.tools[0]["function"]["parameters"]["required"],
        serde_json::json!(["date"])
    );
}

#[test]
fn empty_collections_stay_off_the_wire() {
    let request = base_request(vec![user_text("oi")]);
    let wire = serde_json::to_value(build_request("gpt-4o-mini", &request))
        .expect("serializable request");

    let object = wire.as_object().expect("object body");
    assert!(!object.contains_key("tools"));
    assert!(!object.contains_key("stop"));
    assert_eq!(wire["max_tokens"], 1024);
}

#[test]
fn a_text_response_parses_to_end_turn() {
    let body = serde_json::json!({
        "choices": [{
            "message": { "content": "Olá! Como posso ajudar?" },
            "finish_reason": "stop"
        }],
        "model": "gpt-4o-mini-2024-07-18",
        "usage": { "prompt_tokens": 120, "completion_tokens": 9 }
    })
    .to_string();

    let response = parse_response(&body).expect("parseable body");
    assert_eq!(response.stop_reason, StopReason::EndTurn);
    assert_eq!(response.model, "gpt-4o-mini-2024-07-18");
    assert_eq!(response.usage.input_tokens, 120);
    assert_eq!(response.usage.output_tokens, 9);
    assert_eq!(response.content.len(), 1);
    assert!(matches!(
        &response.content[0],
        ContentPart::Text { text } if text == "Olá! Como posso ajudar?"
    ));
}

#[test]
fn tool_call_arguments_are_decoded_from_their_string_form() {
    let body = serde_json::json!({
        "choices": [{
            "message": {
                "content": null,
                "tool_calls": [{
                    "id": "call-9",
                    "type": "function",
                    "function": {
                        "name": "book_slot",
                        "arguments": "{\"date\":\"2026-09-15\",\"time\":\"10:00\"}"
                    }
                }]
            },
            "finish_reason": "tool_calls"
        }],
        "model": "gpt-4o-mini",
        "usage": { "prompt_tokens": 300, "completion_tokens": 25 }
    })
    .to_string();

    let response = parse_response(&body).expect("parseable body");
    assert_eq!(response.stop_reason, StopReason::ToolUse);
    assert_eq!(response.content.len(), 1);
    match &response.content[0] {
        ContentPart::ToolUse { id, name, input } => {
            assert_eq!(id, "call-9");
            assert_eq!(name, "book_slot");
            assert_eq!(input["date"], "2026-09-15");
            assert_eq!(input["time"], "10:00");
        }
        other => panic!("expected a tool use part, got {other:?}"),
    }
}

#[test]
fn malformed_tool_arguments_are_a_parse_error() {
    let body = serde_json::json!({
        "choices": [{
            "message": {
                "content": null,
                "tool_calls": [{
                    "id": "call-9",
                    "type": "function",
                    "function": { "name": "book_slot", "arguments": "{not json" }
                }]
            },
            "finish_reason": "tool_calls"
        }],
        "model": "gpt-4o-mini",
        "usage": { "prompt_tokens": 10, "completion_tokens": 2 }
    })
    .to_string();

    let error = parse_response(&body).expect_err("must not parse");
    assert!(matches!(error, ProviderError::Parse(_)));
}

#[test]
fn unknown_finish_reasons_are_preserved() {
    let body = serde_json::json!({
        "choices": [{
            "message": { "content": "..." },
            "finish_reason": "content_filter"
        }],
        "model": "gpt-4o-mini",
        "usage": null
    })
    .to_string();

    let response = parse_response(&body).expect("parseable body");
    assert_eq!(
        response.stop_reason,
        StopReason::Other("content_filter".to_owned())
    );
    assert_eq!(response.usage.input_tokens, 0);
}

#[test]
fn a_response_without_choices_is_rejected() {
    let body = serde_json::json!({
        "choices": [],
        "model": "gpt-4o-mini",
        "usage": null
    })
    .to_string();

    let error = parse_response(&body).expect_err("must not parse");
    assert!(matches!(error, ProviderError::Parse(message) if message.contains("choices")));
}
