mod common;

use std::time::Duration;

use chrono::{TimeZone, Utc};
use murmur_sync::{SyncError, SyncNotice, TimelineItem};
use murmur_types::events::{GatewayCommand, GatewayEvent};
use murmur_types::{Draft, Message};

use common::{Harness, Op, peer_message, settle};

fn at(secs: i64) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

/// Open `r1` and push three peer messages plus one of our own.
async fn seeded(h: &Harness) -> murmur_sync::Room {
    let room = h.session.open_room("r1").unwrap();
    h.push(GatewayEvent::Message(peer_message("r1", "u2", "a", "first", at(0))));
    h.push(GatewayEvent::Message(peer_message("r1", "me", "b", "mine", at(10))));
    h.push(GatewayEvent::Message(peer_message("r1", "u2", "c", "third", at(20))));
    settle().await;
    room
}

fn ids(messages: &[Message]) -> Vec<String> {
    messages.iter().filter_map(|m| m.id.clone()).collect()
}

#[tokio::test(start_paused = true)]
async fn edit_succeeds_in_place() {
    let h = Harness::new();
    let room = seeded(&h).await;
    room.edit("b", "mine, edited").await.unwrap();

    let messages = room.messages();
    assert_eq!(ids(&messages), ["a", "b", "c"]);
    assert_eq!(messages[1].content, "mine, edited");
    assert!(messages[1].edited);
}

#[tokio::test(start_paused = true)]
async fn failed_edit_restores_content_and_flag() {
    let h = Harness::new();
    let mut notices = h.session.subscribe_notices();
    let room = seeded(&h).await;
    let before = room.messages();

    h.backend.fail(Op::Edit);
    assert!(room.edit("b", "nope").await.is_err());
    assert_eq!(room.messages(), before);
    assert!(matches!(notices.recv().await.unwrap(), SyncNotice::EditFailed { id, .. } if id == "b"));
}

#[tokio::test(start_paused = true)]
async fn edit_is_limited_to_own_synced_text() {
    let h = Harness::new();
    let room = seeded(&h).await;
    assert!(matches!(room.edit("a", "hijack").await, Err(SyncError::Validation(_))));
    assert!(matches!(room.edit("zzz", "x").await, Err(SyncError::NotFound(_))));
    assert!(matches!(room.edit("b", " ").await, Err(SyncError::Validation(_))));

    h.backend.hold(Op::Insert);
    let room = std::sync::Arc::new(room);
    let sender = room.clone();
    let _send = tokio::spawn(async move { sender.send(Draft::text("pending")).await });
    h.backend.wait_for(Op::Insert, 1).await;
    let temp_id = room
        .messages()
        .iter()
        .find_map(|m| m.temp_id.clone())
        .unwrap();
    assert!(matches!(room.edit(&temp_id, "x").await, Err(SyncError::NotSynced(_))));
    assert!(matches!(room.delete(&temp_id).await, Err(SyncError::NotSynced(_))));
    assert_eq!(h.backend.count(Op::Edit), 0);
    h.backend.release();
}

#[tokio::test(start_paused = true)]
async fn failed_delete_reinserts_at_original_index() {
    let h = Harness::new();
    let room = seeded(&h).await;
    let before = room.messages();

    h.backend.fail(Op::Delete);
    assert!(room.delete("b").await.is_err());
    assert_eq!(room.messages(), before);

    h.backend.heal(Op::Delete);
    room.delete("b").await.unwrap();
    assert_eq!(ids(&room.messages()), ["a", "c"]);
}

#[tokio::test(start_paused = true)]
async fn deleting_an_unknown_message_is_a_quiet_no_op() {
    let h = Harness::new();
    let room = seeded(&h).await;
    let before = room.messages();
    room.delete("missing").await.unwrap();
    assert_eq!(room.messages(), before);
    assert_eq!(h.backend.count(Op::Delete), 0);

    h.push(GatewayEvent::MessageDeleted {
        room_id: "r1".into(),
        id: "a".into(),
    });
    h.push(GatewayEvent::MessageDeleted {
        room_id: "r1".into(),
        id: "a".into(),
    });
    settle().await;
    assert_eq!(ids(&room.messages()), ["b", "c"]);
}

#[tokio::test(start_paused = true)]
async fn reaction_toggle_round_trip_and_rollback() {
    let h = Harness::new();
    let room = seeded(&h).await;
    h.push(GatewayEvent::ReactionAdded {
        room_id: "r1".into(),
        id: "a".into(),
        user_id: "u3".into(),
        emoji: "👍".into(),
    });
    settle().await;
    let original = room.messages()[0].reactions.clone();

    assert!(room.toggle_reaction("a", "👍").await.unwrap());
    assert_eq!(room.messages()[0].reactions.users("👍"), ["u3", "me"]);
    assert!(!room.toggle_reaction("a", "👍").await.unwrap());
    assert_eq!(room.messages()[0].reactions, original);

    h.backend.fail(Op::AddReaction);
    assert!(room.toggle_reaction("a", "👍").await.is_err());
    assert_eq!(room.messages()[0].reactions, original);
    assert_eq!(h.backend.count(Op::AddReaction), 2);
    assert_eq!(h.backend.count(Op::RemoveReaction), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_reaction_removal_restores_position() {
    let h = Harness::new();
    let room = seeded(&h).await;
    for user in ["u3", "me", "u4"] {
        h.push(GatewayEvent::ReactionAdded {
            room_id: "r1".into(),
            id: "c".into(),
            user_id: user.into(),
            emoji: "🔥".into(),
        });
    }
    settle().await;

    h.backend.fail(Op::RemoveReaction);
    assert!(room.toggle_reaction("c", "🔥").await.is_err());
    assert_eq!(room.messages()[2].reactions.users("🔥"), ["u3", "me", "u4"]);
}

#[tokio::test(start_paused = true)]
async fn peer_reaction_events_are_idempotent() {
    let h = Harness::new();
    let room = seeded(&h).await;
    let added = GatewayEvent::ReactionAdded {
        room_id: "r1".into(),
        id: "a".into(),
        user_id: "u3".into(),
        emoji: "🎉".into(),
    };
    h.push(added.clone());
    h.push(added);
    settle().await;
    assert_eq!(room.messages()[0].reactions.users("🎉"), ["u3"]);

    let removed = GatewayEvent::ReactionRemoved {
        room_id: "r1".into(),
        id: "a".into(),
        user_id: "u3".into(),
        emoji: "🎉".into(),
    };
    h.push(removed.clone());
    h.push(removed);
    settle().await;
    assert!(!room.messages()[0].reactions.has("🎉", "u3"));
}

#[tokio::test(start_paused = true)]
async fn peer_edit_updates_in_place() {
    let h = Harness::new();
    let room = seeded(&h).await;
    h.push(GatewayEvent::MessageEdited {
        room_id: "r1".into(),
        id: "c".into(),
        content: "third, fixed".into(),
    });
    settle().await;
    let messages = room.messages();
    assert_eq!(ids(&messages), ["a", "b", "c"]);
    assert_eq!(messages[2].content, "third, fixed");
    assert!(messages[2].edited);
}

#[tokio::test(start_paused = true)]
async fn load_older_merges_pages_without_duplicates() {
    let h = Harness::new();
    let room = seeded(&h).await;
    h.backend.set_history(vec![
        peer_message("r1", "u2", "h1", "old 1", at(-30)),
        peer_message("r1", "u2", "h2", "old 2", at(-20)),
        peer_message("r1", "u2", "a", "first", at(0)),
        peer_message("r2", "u2", "x", "other room", at(-25)),
    ]);

    assert_eq!(room.load_older().await.unwrap(), 2);
    let messages = room.messages();
    assert_eq!(ids(&messages), ["h1", "h2", "a", "b", "c"]);
    assert!(messages.windows(2).all(|w| w[0].created_at <= w[1].created_at));

    assert_eq!(room.load_older().await.unwrap(), 0);
    assert_eq!(h.backend.count(Op::History), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_history_fetch_surfaces_a_notice() {
    let h = Harness::new();
    let mut notices = h.session.subscribe_notices();
    let room = seeded(&h).await;
    h.backend.fail(Op::History);
    assert!(room.load_older().await.is_err());
    assert!(matches!(notices.recv().await.unwrap(), SyncNotice::HistoryFailed { .. }));
    assert_eq!(room.messages().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn layout_groups_and_separates_days() {
    let h = Harness::new();
    let room = h.session.open_room("r1").unwrap();
    h.push(GatewayEvent::Message(peer_message("r1", "u2", "a", "1", at(0))));
    h.push(GatewayEvent::Message(peer_message("r1", "u2", "b", "2", at(60))));
    h.push(GatewayEvent::Message(peer_message("r1", "u2", "c", "3", at(60 + 301))));
    h.push(GatewayEvent::Message(peer_message("r1", "u2", "d", "4", at(86_400))));
    settle().await;

    let view = room.layout(&Utc);
    assert_eq!(view.messages.len(), 4);
    let firsts: Vec<bool> = view
        .items
        .iter()
        .filter_map(|item| match item {
            TimelineItem::Message { first_in_group, .. } => Some(*first_in_group),
            TimelineItem::DateSeparator(_) => None,
        })
        .collect();
    assert_eq!(firsts, [true, false, true, true]);
    let separators = view
        .items
        .iter()
        .filter(|item| matches!(item, TimelineItem::DateSeparator(_)))
        .count();
    assert_eq!(separators, 2);
}

#[tokio::test(start_paused = true)]
async fn remote_typists_expire_and_ignore_self() {
    let h = Harness::new();
    let room = h.session.open_room("r1").unwrap();
    for name in ["Bo", "Me", "Cy"] {
        h.push(GatewayEvent::TypingStarted {
            room_id: "r1".into(),
            display_name: name.into(),
        });
    }
    h.push(GatewayEvent::TypingStarted {
        room_id: "r2".into(),
        display_name: "Elsewhere".into(),
    });
    settle().await;
    assert_eq!(room.typists(), ["Bo", "Cy"]);

    h.push(GatewayEvent::TypingStopped {
        room_id: "r1".into(),
        display_name: Some("Bo".into()),
    });
    settle().await;
    assert_eq!(room.typists(), ["Cy"]);

    // A lost "stopped" cannot pin the indicator.
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(room.typists().is_empty());
}

#[tokio::test(start_paused = true)]
async fn closing_pairs_join_with_leave_and_stops_typing() {
    let mut h = Harness::new();
    let room = h.session.open_room("r1").unwrap();
    room.typing().trigger();
    drop(room);

    let cmds = h.commands();
    assert_eq!(
        cmds,
        vec![
            GatewayCommand::Join { room_id: "r1".into() },
            GatewayCommand::TypingStart {
                room_id: "r1".into(),
                display_name: "Me".into(),
            },
            GatewayCommand::TypingStop { room_id: "r1".into() },
            GatewayCommand::Leave { room_id: "r1".into() },
        ]
    );
    assert!(h.gateway.joined_rooms().is_empty());
    assert!(!h.session.is_open("r1"));

    // Events for the closed room go nowhere.
    h.push(GatewayEvent::Message(peer_message("r1", "u2", "z", "late", at(0))));
    settle().await;
    assert!(h.session.messages("r1").is_empty());
}
