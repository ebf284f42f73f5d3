// ABOUTME: Integration tests for the generation pipeline against a scripted provider
// ABOUTME: Covers sending, streaming reconciliation, failures, and every tree mutation rule
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;
#[path = "helpers/scripted_provider.rs"]
mod scripted_provider;

use std::sync::Arc;
use std::time::Duration;

use chatloom::errors::ErrorCode;
use chatloom::events::SubscriptionEvent;
use chatloom::generation::EditOutcome;
use chatloom::llm::{LlmProvider, MessageRole};
use chatloom::models::{NewChat, Sender};
use chatloom::resources::ServerResources;
use common::{
    create_test_chat, create_test_resources, events_until, test_generation_config,
    wait_for_generation, TEST_MODEL_ID, TEST_PROVIDER_ID,
};
use scripted_provider::{ScriptedProvider, ScriptedReply};
use tokio::sync::Semaphore;

// ============================================================================
// Test Helpers
// ============================================================================

async fn setup_with(provider: ScriptedProvider) -> (Arc<ServerResources>, Arc<ScriptedProvider>) {
    let provider = Arc::new(provider);
    let resources = create_test_resources(
        vec![Arc::clone(&provider) as Arc<dyn LlmProvider>],
        test_generation_config(),
    )
    .await
    .unwrap();
    (resources, provider)
}

async fn setup() -> (Arc<ServerResources>, Arc<ScriptedProvider>) {
    setup_with(ScriptedProvider::new(TEST_PROVIDER_ID, TEST_MODEL_ID)).await
}

fn is_final_for(event: &SubscriptionEvent, id: i64) -> bool {
    matches!(
        event,
        SubscriptionEvent::UpdateMessage {
            message_id,
            is_generating: Some(false),
            ..
        } if *message_id == id
    )
}

fn message_id_of(event: &SubscriptionEvent) -> Option<i64> {
    match event {
        SubscriptionEvent::UpdateMessage { message_id, .. } => Some(*message_id),
        _ => None,
    }
}

// ============================================================================
// Sending and Streaming
// ============================================================================

#[tokio::test]
async fn test_send_returns_rows_before_generation_finishes() {
    let gate = Arc::new(Semaphore::new(0));
    let (resources, _provider) = setup_with(
        ScriptedProvider::new(TEST_PROVIDER_ID, TEST_MODEL_ID).gated(Arc::clone(&gate)),
    )
    .await;
    let chat = create_test_chat(&resources.database).await.unwrap();

    let sent = resources
        .pipeline
        .send_message(chat.id, None, "Hi there", "alice")
        .await
        .unwrap();

    assert_eq!(sent.user_message.sender, Sender::User);
    assert!(sent.user_message.is_root());
    assert_eq!(sent.user_message.sender_name, "alice");
    assert_eq!(sent.ai_message.sender, Sender::Ai);
    assert_eq!(sent.ai_message.parent_id, Some(sent.user_message.id));
    assert!(sent.ai_message.is_generating);
    assert_eq!(sent.ai_message.text, "");
    assert_eq!(sent.ai_message.sender_name, "Scripted Model");
    assert!(sent.ai_message.created_at > sent.user_message.created_at);

    gate.add_permits(1);
    let done = wait_for_generation(&resources.database, sent.ai_message.id).await;
    assert_eq!(done.text, "Hello, world");
    assert!(done.error.is_none());
}

#[tokio::test]
async fn test_completion_is_broadcast_twice() {
    let (resources, _provider) = setup().await;
    let chat = create_test_chat(&resources.database).await.unwrap();
    let mut events = resources.bus.attach_event_stream().await;

    let sent = resources
        .pipeline
        .send_message(chat.id, None, "Hi", "alice")
        .await
        .unwrap();
    let ai_id = sent.ai_message.id;

    let mut finals = 0;
    let received = events_until(&mut events, |event| {
        if is_final_for(event, ai_id) {
            finals += 1;
        }
        finals == 2
    })
    .await;

    let final_events: Vec<&SubscriptionEvent> =
        received.iter().filter(|e| is_final_for(e, ai_id)).collect();
    assert_eq!(final_events.len(), 2);
    assert_eq!(final_events[0], final_events[1]);
    match final_events[0] {
        SubscriptionEvent::UpdateMessage { text, chat_id, .. } => {
            assert_eq!(text, "Hello, world");
            assert_eq!(*chat_id, chat.id);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_progress_is_throttled_and_cumulative() {
    let provider = ScriptedProvider::new(TEST_PROVIDER_ID, TEST_MODEL_ID).with_fallback(
        ScriptedReply::slow(
            &["a", "b", "c", "d", "e", "f", "g", "h"],
            Duration::from_millis(30),
        ),
    );
    let (resources, _provider) = setup_with(provider).await;
    let chat = create_test_chat(&resources.database).await.unwrap();
    let mut events = resources.bus.attach_event_stream().await;

    let sent = resources
        .pipeline
        .send_message(chat.id, None, "Spell it", "alice")
        .await
        .unwrap();
    let ai_id = sent.ai_message.id;

    let received = events_until(&mut events, |event| is_final_for(event, ai_id)).await;
    let progress: Vec<&String> = received
        .iter()
        .filter_map(|event| match event {
            SubscriptionEvent::UpdateMessage {
                message_id,
                text,
                is_generating: Some(true),
                ..
            } if *message_id == ai_id => Some(text),
            _ => None,
        })
        .collect();

    // 8 deltas over ~240 ms with a 100 ms window: a few updates, never all of them
    assert!(!progress.is_empty());
    assert!(progress.len() < 8, "throttle let {} updates through", progress.len());
    assert_eq!(progress[0], "a");
    for text in &progress {
        assert!("abcdefgh".starts_with(text.as_str()));
    }

    let done = wait_for_generation(&resources.database, ai_id).await;
    assert_eq!(done.text, "abcdefgh");
}

#[tokio::test]
async fn test_provider_receives_history_and_chat_settings() {
    let (resources, provider) = setup().await;
    let chat = resources
        .database
        .create_chat(&NewChat {
            title: "Settings".to_owned(),
            provider_id: TEST_PROVIDER_ID.to_owned(),
            model_id: TEST_MODEL_ID.to_owned(),
            system_prompt: Some("Answer in French".to_owned()),
            temperature: Some(0.25),
        })
        .await
        .unwrap();

    let first = resources
        .pipeline
        .send_message(chat.id, None, "Hello", "alice")
        .await
        .unwrap();
    wait_for_generation(&resources.database, first.ai_message.id).await;

    let second = resources
        .pipeline
        .send_message(chat.id, Some(first.ai_message.id), "And again", "alice")
        .await
        .unwrap();
    wait_for_generation(&resources.database, second.ai_message.id).await;

    let requests = provider.requests();
    let last = requests.last().unwrap();
    assert_eq!(last.temperature, Some(0.25));

    let roles: Vec<MessageRole> = last.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            MessageRole::System,
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::User
        ]
    );
    assert_eq!(last.messages[0].content, "Answer in French");
    assert_eq!(last.messages[2].content, "Hello, world");
    assert_eq!(last.messages[3].content, "And again");
}

#[tokio::test]
async fn test_failed_generation_is_recorded_not_returned() {
    let (resources, provider) = setup().await;
    provider.push_reply(ScriptedReply::Fail("model exploded".to_owned()));
    let chat = create_test_chat(&resources.database).await.unwrap();
    let mut events = resources.bus.attach_event_stream().await;

    let sent = resources
        .pipeline
        .send_message(chat.id, None, "Hi", "alice")
        .await
        .unwrap();
    let ai_id = sent.ai_message.id;

    let received = events_until(&mut events, |event| is_final_for(event, ai_id)).await;
    match received.last().unwrap() {
        SubscriptionEvent::UpdateMessage { error, text, .. } => {
            assert!(error.as_deref().unwrap().contains("model exploded"));
            assert_eq!(text, "");
        }
        other => panic!("unexpected event {other:?}"),
    }

    let failed = wait_for_generation(&resources.database, ai_id).await;
    assert_eq!(failed.text, "");
    assert!(failed.error.unwrap().contains("model exploded"));
}

#[tokio::test]
async fn test_deleted_generation_finishes_silently() {
    let gate = Arc::new(Semaphore::new(0));
    let (resources, _provider) = setup_with(
        ScriptedProvider::new(TEST_PROVIDER_ID, TEST_MODEL_ID).gated(Arc::clone(&gate)),
    )
    .await;
    let chat = create_test_chat(&resources.database).await.unwrap();

    let sent = resources
        .pipeline
        .send_message(chat.id, None, "Hi", "alice")
        .await
        .unwrap();
    let variant = resources
        .pipeline
        .regenerate(sent.user_message.id)
        .await
        .unwrap();

    resources.pipeline.delete_message(variant.id).await.unwrap();

    let mut events = resources.bus.attach_event_stream().await;
    gate.add_permits(2);

    let mut finals = 0;
    let received = events_until(&mut events, |event| {
        if is_final_for(event, sent.ai_message.id) {
            finals += 1;
        }
        finals == 2
    })
    .await;
    assert!(received
        .iter()
        .all(|event| message_id_of(event) != Some(variant.id)));

    // Give the orphaned generation time to finish; it must stay quiet
    let late = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
    if let Ok(Some(frame)) = late {
        let event: SubscriptionEvent = serde_json::from_str(&frame).unwrap();
        assert_ne!(message_id_of(&event), Some(variant.id));
    }
    assert!(resources
        .database
        .get_message(variant.id)
        .await
        .unwrap()
        .is_none());
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn test_send_into_chat_without_root_fails_fast() {
    let (resources, _provider) = setup().await;
    let chat = create_test_chat(&resources.database).await.unwrap();

    let err = resources
        .pipeline
        .send_message(chat.id, Some(12_345), "Hi", "alice")
        .await
        .unwrap_err();

    assert_eq!(err.code, ErrorCode::ResourceNotFound);
    assert!(resources
        .database
        .list_messages(chat.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_send_with_parent_from_other_chat_is_rejected() {
    let (resources, _provider) = setup().await;
    let chat_a = create_test_chat(&resources.database).await.unwrap();
    let chat_b = create_test_chat(&resources.database).await.unwrap();

    let sent = resources
        .pipeline
        .send_message(chat_a.id, None, "Hi", "alice")
        .await
        .unwrap();

    let err = resources
        .pipeline
        .send_message(chat_b.id, Some(sent.ai_message.id), "Hi", "alice")
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ResourceNotFound);
}

#[tokio::test]
async fn test_disabled_provider_and_unknown_model() {
    let (resources, provider) = setup().await;
    let chat = create_test_chat(&resources.database).await.unwrap();

    provider.set_enabled(false);
    let err = resources
        .pipeline
        .send_message(chat.id, None, "Hi", "alice")
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ResourceUnavailable);

    provider.set_enabled(true);
    let other = resources
        .database
        .create_chat(&NewChat {
            title: "Other".to_owned(),
            provider_id: TEST_PROVIDER_ID.to_owned(),
            model_id: "missing-model".to_owned(),
            system_prompt: None,
            temperature: None,
        })
        .await
        .unwrap();
    let err = resources
        .pipeline
        .send_message(other.id, None, "Hi", "alice")
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ResourceNotFound);

    assert!(resources
        .database
        .list_messages(chat.id)
        .await
        .unwrap()
        .is_empty());
}

// ============================================================================
// Variants
// ============================================================================

#[tokio::test]
async fn test_regenerate_rules() {
    let (resources, _provider) = setup().await;
    let chat = create_test_chat(&resources.database).await.unwrap();
    let sent = resources
        .pipeline
        .send_message(chat.id, None, "Hi", "alice")
        .await
        .unwrap();
    wait_for_generation(&resources.database, sent.ai_message.id).await;

    let err = resources
        .pipeline
        .regenerate(sent.ai_message.id)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidTransition);

    let variant = resources
        .pipeline
        .regenerate(sent.user_message.id)
        .await
        .unwrap();
    assert_eq!(variant.parent_id, Some(sent.user_message.id));
    assert!(variant.is_generating);

    let err = resources
        .pipeline
        .regenerate_message(sent.user_message.id)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidTransition);

    let retried = resources
        .pipeline
        .regenerate_message(sent.ai_message.id)
        .await
        .unwrap();
    assert_eq!(retried.parent_id, Some(sent.user_message.id));

    wait_for_generation(&resources.database, variant.id).await;
    wait_for_generation(&resources.database, retried.id).await;
    let siblings = resources
        .database
        .list_messages(chat.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|m| m.parent_id == Some(sent.user_message.id))
        .count();
    assert_eq!(siblings, 3);
}

#[tokio::test]
async fn test_duplicate_rules() {
    let gate = Arc::new(Semaphore::new(0));
    let (resources, _provider) = setup_with(
        ScriptedProvider::new(TEST_PROVIDER_ID, TEST_MODEL_ID).gated(Arc::clone(&gate)),
    )
    .await;
    let chat = create_test_chat(&resources.database).await.unwrap();
    let sent = resources
        .pipeline
        .send_message(chat.id, None, "Hi", "alice")
        .await
        .unwrap();

    let err = resources
        .pipeline
        .duplicate(sent.user_message.id)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidTransition);

    let err = resources
        .pipeline
        .duplicate(sent.ai_message.id)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidTransition);

    gate.add_permits(1);
    let original = wait_for_generation(&resources.database, sent.ai_message.id).await;

    let copy = resources
        .pipeline
        .duplicate(sent.ai_message.id)
        .await
        .unwrap();
    assert_ne!(copy.id, original.id);
    assert_eq!(copy.parent_id, original.parent_id);
    assert_eq!(copy.text, original.text);
    assert_eq!(copy.sender, Sender::Ai);
    assert!(!copy.is_generating);
    assert!(copy.created_at > original.created_at);
}

// ============================================================================
// Editing
// ============================================================================

#[tokio::test]
async fn test_edit_waits_for_generation_to_finish() {
    let gate = Arc::new(Semaphore::new(0));
    let (resources, _provider) = setup_with(
        ScriptedProvider::new(TEST_PROVIDER_ID, TEST_MODEL_ID).gated(Arc::clone(&gate)),
    )
    .await;
    let chat = create_test_chat(&resources.database).await.unwrap();
    let sent = resources
        .pipeline
        .send_message(chat.id, None, "Hi", "alice")
        .await
        .unwrap();

    let err = resources
        .pipeline
        .edit(sent.ai_message.id, "my manual edit", false)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidTransition);

    gate.add_permits(1);
    let finished = wait_for_generation(&resources.database, sent.ai_message.id).await;
    assert_eq!(finished.text, "Hello, world");

    let outcome = resources
        .pipeline
        .edit(sent.ai_message.id, "my manual edit", false)
        .await
        .unwrap();
    assert!(matches!(outcome, EditOutcome::Updated { .. }));
    let stored = resources
        .database
        .get_message(sent.ai_message.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.text, "my manual edit");
}

#[tokio::test]
async fn test_edit_user_with_regenerate_branches() {
    let (resources, _provider) = setup().await;
    let chat = create_test_chat(&resources.database).await.unwrap();
    let sent = resources
        .pipeline
        .send_message(chat.id, None, "Original", "alice")
        .await
        .unwrap();
    wait_for_generation(&resources.database, sent.ai_message.id).await;

    let outcome = resources
        .pipeline
        .edit(sent.user_message.id, "Rephrased", true)
        .await
        .unwrap();

    let EditOutcome::Branched { sent: branch } = outcome else {
        panic!("expected a new branch");
    };
    assert_eq!(branch.user_message.parent_id, sent.user_message.parent_id);
    assert_eq!(branch.user_message.text, "Rephrased");
    assert_eq!(branch.user_message.sender_name, "alice");

    let untouched = resources
        .database
        .get_message(sent.user_message.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(untouched.text, "Original");
    wait_for_generation(&resources.database, branch.ai_message.id).await;
}

#[tokio::test]
async fn test_edit_in_place_broadcasts() {
    let (resources, _provider) = setup().await;
    let chat = create_test_chat(&resources.database).await.unwrap();
    let sent = resources
        .pipeline
        .send_message(chat.id, None, "Original", "alice")
        .await
        .unwrap();
    wait_for_generation(&resources.database, sent.ai_message.id).await;
    // Let the settle re-broadcast pass before listening
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = resources
        .pipeline
        .edit(sent.ai_message.id, "Nope", true)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidTransition);

    let mut events = resources.bus.attach_event_stream().await;
    let outcome = resources
        .pipeline
        .edit(sent.ai_message.id, "Hand-tuned answer", false)
        .await
        .unwrap();
    let EditOutcome::Updated { message } = outcome else {
        panic!("expected an in-place update");
    };
    assert_eq!(message.text, "Hand-tuned answer");

    let received = events_until(&mut events, |event| {
        message_id_of(event) == Some(sent.ai_message.id)
    })
    .await;
    assert_eq!(
        received.last().unwrap(),
        &SubscriptionEvent::edited(sent.ai_message.id, chat.id, "Hand-tuned answer".to_owned())
    );

    let stored = resources
        .database
        .get_message(sent.ai_message.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.text, "Hand-tuned answer");
}

// ============================================================================
// Deletion
// ============================================================================

#[tokio::test]
async fn test_delete_only_root_is_rejected() {
    let (resources, _provider) = setup().await;
    let chat = create_test_chat(&resources.database).await.unwrap();
    let sent = resources
        .pipeline
        .send_message(chat.id, None, "Hi", "alice")
        .await
        .unwrap();
    wait_for_generation(&resources.database, sent.ai_message.id).await;

    let err = resources
        .pipeline
        .delete_message(sent.user_message.id)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidTransition);
    assert_eq!(
        resources.database.list_messages(chat.id).await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn test_delete_only_reply_is_rejected() {
    let (resources, _provider) = setup().await;
    let chat = create_test_chat(&resources.database).await.unwrap();
    let sent = resources
        .pipeline
        .send_message(chat.id, None, "Hi", "alice")
        .await
        .unwrap();
    wait_for_generation(&resources.database, sent.ai_message.id).await;

    let err = resources
        .pipeline
        .delete_message(sent.ai_message.id)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidTransition);
}

#[tokio::test]
async fn test_delete_branch_returns_subtree() {
    let (resources, _provider) = setup().await;
    let chat = create_test_chat(&resources.database).await.unwrap();
    let first = resources
        .pipeline
        .send_message(chat.id, None, "Hi", "alice")
        .await
        .unwrap();
    wait_for_generation(&resources.database, first.ai_message.id).await;

    let follow_up = resources
        .pipeline
        .send_message(chat.id, Some(first.ai_message.id), "More", "alice")
        .await
        .unwrap();
    wait_for_generation(&resources.database, follow_up.ai_message.id).await;

    let second_root = resources
        .pipeline
        .send_message(chat.id, None, "Different topic", "alice")
        .await
        .unwrap();
    wait_for_generation(&resources.database, second_root.ai_message.id).await;

    // The follow-up user message is not an only-child reply, so it may go
    let removed = resources
        .pipeline
        .delete_message(follow_up.user_message.id)
        .await
        .unwrap();
    let removed_ids: Vec<i64> = removed.iter().map(|m| m.id).collect();
    assert_eq!(
        removed_ids,
        vec![follow_up.user_message.id, follow_up.ai_message.id]
    );

    // With two roots, either may be deleted
    let removed = resources
        .pipeline
        .delete_message(second_root.user_message.id)
        .await
        .unwrap();
    assert_eq!(removed.len(), 2);

    let remaining: Vec<i64> = resources
        .database
        .list_messages(chat.id)
        .await
        .unwrap()
        .iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(remaining, vec![first.user_message.id, first.ai_message.id]);
}

// ============================================================================
// Chats
// ============================================================================

#[tokio::test]
async fn test_create_chat_with_first_message_and_summary() {
    let provider = ScriptedProvider::new(TEST_PROVIDER_ID, TEST_MODEL_ID)
        .with_fallback(ScriptedReply::text(&["\"Weekend trip ", "planning\""]));
    let provider = Arc::new(provider);
    let mut generation = test_generation_config();
    generation.summarize_titles = true;
    let resources = create_test_resources(
        vec![Arc::clone(&provider) as Arc<dyn LlmProvider>],
        generation,
    )
    .await
    .unwrap();
    let mut events = resources.bus.attach_event_stream().await;

    let created = resources
        .pipeline
        .create_chat(
            NewChat {
                title: String::new(),
                provider_id: TEST_PROVIDER_ID.to_owned(),
                model_id: TEST_MODEL_ID.to_owned(),
                system_prompt: None,
                temperature: None,
            },
            Some("Can you help me plan a weekend trip to the coast?"),
            "alice",
        )
        .await
        .unwrap();

    assert_eq!(
        created.chat.title,
        "Can you help me plan a weekend trip to the coast?"
    );
    let sent = created.sent.unwrap();
    assert!(sent.user_message.is_root());

    let received = events_until(&mut events, |event| {
        matches!(event, SubscriptionEvent::UpdateChat { .. })
    })
    .await;
    assert_eq!(
        received.last().unwrap(),
        &SubscriptionEvent::renamed(created.chat.id, "Weekend trip planning".to_owned())
    );

    let stored = resources
        .database
        .get_chat(created.chat.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.title, "Weekend trip planning");
    wait_for_generation(&resources.database, sent.ai_message.id).await;
}

#[tokio::test]
async fn test_create_chat_without_message_uses_default_title() {
    let (resources, provider) = setup().await;

    let created = resources
        .pipeline
        .create_chat(
            NewChat {
                title: "   ".to_owned(),
                provider_id: TEST_PROVIDER_ID.to_owned(),
                model_id: TEST_MODEL_ID.to_owned(),
                system_prompt: None,
                temperature: None,
            },
            None,
            "alice",
        )
        .await
        .unwrap();

    assert_eq!(created.chat.title, "New chat");
    assert!(created.sent.is_none());
    assert!(provider.requests().is_empty());

    let err = resources
        .pipeline
        .create_chat(
            NewChat {
                title: "x".to_owned(),
                provider_id: "nobody".to_owned(),
                model_id: TEST_MODEL_ID.to_owned(),
                system_prompt: None,
                temperature: None,
            },
            None,
            "alice",
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ResourceNotFound);
}

#[tokio::test]
async fn test_rename_and_delete_chat() {
    let (resources, _provider) = setup().await;
    let chat = create_test_chat(&resources.database).await.unwrap();
    let mut events = resources.bus.attach_event_stream().await;

    let err = resources.pipeline.rename_chat(chat.id, "  ").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidInput);

    let err = resources
        .pipeline
        .rename_chat(9_999, "Title")
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ResourceNotFound);

    let renamed = resources
        .pipeline
        .rename_chat(chat.id, "Better title")
        .await
        .unwrap();
    assert_eq!(renamed.title, "Better title");
    assert_eq!(
        common::next_event(&mut events).await,
        SubscriptionEvent::renamed(chat.id, "Better title".to_owned())
    );

    resources.pipeline.delete_chat(chat.id).await.unwrap();
    let err = resources.pipeline.delete_chat(chat.id).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ResourceNotFound);
}
