mod common;

use anyhow::Result;
use axum::http::StatusCode;
use botreader::schema::{chat_admins, chat_events, memberships, text_messages};
use common::{
    acquire_db_lock, at_hour, forwarded_update, join_update, leave_update, minutes_ago, user,
    SentMessage, TestApp,
};
use diesel::prelude::*;

const CHAT: i64 = -100;

async fn membership(app: &TestApp, member_id: i64) -> Result<Option<bool>> {
    app.with_conn(move |conn| {
        Ok(memberships::table
            .filter(memberships::chat_id.eq(CHAT))
            .filter(memberships::member_id.eq(member_id))
            .select(memberships::exited)
            .first::<bool>(conn)
            .optional()?)
    })
    .await
}

async fn events(app: &TestApp, member_id: i64) -> Result<Vec<String>> {
    app.with_conn(move |conn| {
        Ok(chat_events::table
            .filter(chat_events::user_id.eq(member_id))
            .order(chat_events::date.asc())
            .select(chat_events::event_type)
            .load(conn)?)
    })
    .await
}

#[tokio::test]
async fn recent_join_is_welcomed_once() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let bot = app.bot();
    let joined_at = minutes_ago(1);

    bot.push_updates([
        join_update(1, CHAT, vec![user(50, "Sara", Some("sara"))], joined_at),
        // Same join delivered again under a new update id.
        join_update(2, CHAT, vec![user(50, "Sara", Some("sara"))], joined_at),
    ])
    .await;

    let (status, _) = app.read().await?;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(
        bot.sent().await,
        vec![SentMessage {
            chat_id: CHAT,
            text: format!("Hi Sara @sara, welcome to Group {CHAT}"),
            reply_to_message_id: None,
        }]
    );
    assert_eq!(membership(&app, 50).await?, Some(false));
    assert_eq!(events(&app, 50).await?, vec!["ENTRY".to_string()]);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn stale_join_is_recorded_without_a_welcome() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let bot = app.bot();

    bot.push_updates([join_update(
        1,
        CHAT,
        vec![user(51, "Omid", None), user(52, "Nika", Some("nika"))],
        minutes_ago(60),
    )])
    .await;

    let (status, _) = app.read().await?;
    assert_eq!(status, StatusCode::OK);
    assert!(bot.sent().await.is_empty());
    assert_eq!(membership(&app, 51).await?, Some(false));
    assert_eq!(membership(&app, 52).await?, Some(false));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn departure_marks_membership_exited() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let bot = app.bot();

    bot.push_updates([
        join_update(1, CHAT, vec![user(53, "Ali", None)], minutes_ago(30)),
        leave_update(2, CHAT, user(53, "Ali", None), minutes_ago(20)),
    ])
    .await;

    let (status, _) = app.read().await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(membership(&app, 53).await?, Some(true));
    assert_eq!(
        events(&app, 53).await?,
        vec!["ENTRY".to_string(), "EXIT".to_string()]
    );

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn redelivered_departure_is_logged_once() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let bot = app.bot();
    let left_at = minutes_ago(20);

    bot.push_updates([
        join_update(1, CHAT, vec![user(54, "Nima", None)], minutes_ago(30)),
        leave_update(2, CHAT, user(54, "Nima", None), left_at),
        leave_update(3, CHAT, user(54, "Nima", None), left_at),
    ])
    .await;
    let (status, _) = app.read().await?;
    assert_eq!(status, StatusCode::OK);

    bot.push_updates([leave_update(4, CHAT, user(54, "Nima", None), left_at)])
        .await;
    let (status, _) = app.read().await?;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(membership(&app, 54).await?, Some(true));
    assert_eq!(
        events(&app, 54).await?,
        vec!["ENTRY".to_string(), "EXIT".to_string()]
    );

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn forwards_out_of_hours_are_deleted_unless_sent_by_an_admin() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let bot = app.bot();
    bot.set_admins(CHAT, &[7]).await;

    bot.push_updates([
        forwarded_update(1, 201, CHAT, 8, at_hour(3)),
        forwarded_update(2, 202, CHAT, 7, at_hour(3)),
    ])
    .await;

    let (status, body) = app.read().await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["messages_stored"], 2);
    assert_eq!(bot.deleted().await, vec![(CHAT, 201)]);

    let admins: Vec<i64> = app
        .with_conn(|conn| {
            Ok(chat_admins::table
                .filter(chat_admins::chat_id.eq(CHAT))
                .select(chat_admins::user_id)
                .load(conn)?)
        })
        .await?;
    assert_eq!(admins, vec![7]);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn forwards_within_legal_hours_stay() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let bot = app.bot();
    bot.set_admins(CHAT, &[7]).await;

    bot.push_updates([forwarded_update(1, 201, CHAT, 8, at_hour(12))])
        .await;

    let (status, _) = app.read().await?;
    assert_eq!(status, StatusCode::OK);
    assert!(bot.deleted().await.is_empty());
    assert_eq!(bot.delete_attempts().await, 0);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn moderation_failures_do_not_fail_the_pass() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let bot = app.bot();
    bot.deny_admin_lookup(CHAT).await;
    bot.set_admins(-200, &[7]).await;
    bot.fail_deletes(true).await;

    bot.push_updates([
        forwarded_update(1, 201, CHAT, 8, at_hour(3)),
        forwarded_update(2, 301, -200, 8, at_hour(3)),
    ])
    .await;

    let (status, body) = app.read().await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["messages_stored"], 2);
    assert!(bot.deleted().await.is_empty());
    // Only the chat whose admins could be read gets delete attempts.
    assert_eq!(bot.delete_attempts().await, 3);

    let stored: i64 = app
        .with_conn(|conn| Ok(text_messages::table.count().get_result(conn)?))
        .await?;
    assert_eq!(stored, 2);

    app.cleanup().await?;
    Ok(())
}
