use chrono::{Duration, Utc};
use hermes::db::Db;
use hermes::error::Error;
use hermes::model::{
    BatchId, EmbarkMode, EventFilter, EventTypeId, LaborFilter, LaborId, NewFate, NewQuest,
    QuestFilter, QuestId, QuestUpdate,
};
use hermes::notice::NoticeKind;

struct Types {
    required: EventTypeId,
    completed: EventTypeId,
    verified: EventTypeId,
}

/// Reboot types with a single fate required → completed.
async fn setup() -> (Db, Types) {
    let db = Db::in_memory().await.unwrap();
    let required = db
        .create_event_type("system-reboot", "required", None)
        .await
        .unwrap()
        .id;
    let completed = db
        .create_event_type("system-reboot", "completed", None)
        .await
        .unwrap()
        .id;
    let verified = db
        .create_event_type("system-reboot", "verified", None)
        .await
        .unwrap()
        .id;
    db.create_fate(NewFate::new(required, completed))
        .await
        .unwrap();
    (
        db,
        Types {
            required,
            completed,
            verified,
        },
    )
}

fn hosts(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn embark_records_events_and_opens_labors() {
    let (db, t) = setup().await;

    let target = Utc::now() + Duration::days(2);
    let quest = db
        .embark_quest(
            NewQuest::new("alice", "kernel rollout", t.required)
                .hosts(hosts(&["web-1", "web-2"]))
                .target_time(target),
        )
        .await
        .unwrap();
    assert_eq!(quest.creator, "alice");
    assert!(!quest.is_complete());
    assert!(quest.target_time.is_some());

    let events = db
        .list_events(&EventFilter {
            batch_id: Some(BatchId::for_quest(quest.id)),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.user == "alice"));

    let labors = db
        .list_labors(&LaborFilter {
            quest_id: Some(quest.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(labors.len(), 2);

    let progress = db.quest_progress(quest.id).await.unwrap();
    assert_eq!(progress.total_labors, 2);
    assert_eq!(progress.open_labors, 2);
    assert_eq!(progress.percent_complete, 0);
}

#[tokio::test]
async fn quest_completes_once_when_last_labor_closes() {
    let (db, t) = setup().await;
    let mut notices = db.subscribe();

    let quest = db
        .embark_quest(
            NewQuest::new("alice", "kernel rollout", t.required)
                .hosts(hosts(&["web-1", "web-2"])),
        )
        .await
        .unwrap();

    db.record_event("web-1", "ops", t.completed, None)
        .await
        .unwrap();
    let progress = db.quest_progress(quest.id).await.unwrap();
    assert_eq!(progress.completed_labors, 1);
    assert_eq!(progress.percent_complete, 50);
    assert!(!db.get_quest(quest.id).await.unwrap().is_complete());

    db.record_event("web-2", "ops", t.completed, None)
        .await
        .unwrap();
    let done = db.get_quest(quest.id).await.unwrap();
    let stamped = done.completion_time.unwrap();
    assert_eq!(db.quest_progress(quest.id).await.unwrap().percent_complete, 100);

    // Edge-triggered: re-checking neither re-stamps nor re-announces.
    assert!(db.check_quest_completion(quest.id).await.unwrap().is_none());
    assert_eq!(
        db.get_quest(quest.id).await.unwrap().completion_time,
        Some(stamped)
    );

    let mut completions = Vec::new();
    while let Ok(notice) = notices.try_recv() {
        if let NoticeKind::QuestCompleted {
            quest_id, summary, ..
        } = notice.kind
        {
            completions.push((quest_id, summary));
        }
    }
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].0, quest.id);
    assert!(completions[0].1.contains("kernel rollout"));
}

#[tokio::test]
async fn chained_labors_stay_in_the_quest() {
    let (db, t) = setup().await;
    let reboot = db.starting_fates().await.unwrap().remove(0);
    db.create_fate(NewFate::new(t.completed, t.verified).follows(reboot.id))
        .await
        .unwrap();

    let quest = db
        .embark_quest(NewQuest::new("alice", "reboot and verify", t.required).hosts(hosts(&["h1"])))
        .await
        .unwrap();

    db.record_event("h1", "ops", t.completed, None)
        .await
        .unwrap();
    let progress = db.quest_progress(quest.id).await.unwrap();
    assert_eq!(progress.total_labors, 2);
    assert_eq!(progress.open_labors, 1);
    assert!(!db.get_quest(quest.id).await.unwrap().is_complete());

    db.record_event("h1", "ops", t.verified, None)
        .await
        .unwrap();
    assert!(db.get_quest(quest.id).await.unwrap().is_complete());
}

#[tokio::test]
async fn past_target_time_writes_nothing() {
    let (db, t) = setup().await;

    let err = db
        .embark_quest(
            NewQuest::new("alice", "too late", t.required)
                .hosts(hosts(&["web-1"]))
                .target_time(Utc::now() - Duration::hours(1)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {err:?}");

    assert!(
        db.list_quests(&QuestFilter::default())
            .await
            .unwrap()
            .is_empty()
    );
    assert!(
        db.list_events(&EventFilter::default())
            .await
            .unwrap()
            .is_empty()
    );
    assert!(db.open_labors().await.unwrap().is_empty());
    assert!(db.list_hosts().await.unwrap().is_empty());
}

#[tokio::test]
async fn embark_validation() {
    let (db, t) = setup().await;

    let cases = [
        NewQuest::new(" ", "desc", t.required).hosts(hosts(&["h1"])),
        NewQuest::new("alice", "", t.required).hosts(hosts(&["h1"])),
        NewQuest::new("alice", "desc", t.required),
        NewQuest::new("alice", "desc", EventTypeId(404)).hosts(hosts(&["h1"])),
        // No starting fate is created by `completed`.
        NewQuest::new("alice", "desc", t.completed).hosts(hosts(&["h1"])),
    ];
    for new in cases {
        let err = db.embark_quest(new).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "got {err:?}");
    }

    assert!(
        db.list_quests(&QuestFilter::default())
            .await
            .unwrap()
            .is_empty()
    );
    assert!(db.list_hosts().await.unwrap().is_empty());
}

#[tokio::test]
async fn adopt_groups_unaffiliated_open_labors() {
    let (db, t) = setup().await;
    db.record_event("web-1", "ops", t.required, None)
        .await
        .unwrap();
    db.record_event("web-2", "ops", t.required, None)
        .await
        .unwrap();

    let quest = db
        .embark_quest(
            NewQuest::new("bob", "adopt web-1", t.required)
                .hosts(hosts(&["web-1", "unknown-host"]))
                .mode(EmbarkMode::Adopt),
        )
        .await
        .unwrap();

    let labors = db
        .list_labors(&LaborFilter {
            quest_id: Some(quest.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(labors.len(), 1);
    let web1 = db.get_host_by_name("web-1").await.unwrap();
    assert_eq!(labors[0].host_id, web1.id);

    // Already-affiliated labors are not adopted again.
    let err = db
        .embark_quest(
            NewQuest::new("bob", "adopt again", t.required)
                .hosts(hosts(&["web-1"]))
                .mode(EmbarkMode::Adopt),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(db.list_quests(&QuestFilter::default()).await.unwrap().len(), 1);

    // Adoption records no events.
    assert_eq!(
        db.list_events(&EventFilter::default()).await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn list_and_update_quests() {
    let (db, t) = setup().await;
    let q1 = db
        .embark_quest(NewQuest::new("alice", "first", t.required).hosts(hosts(&["h1"])))
        .await
        .unwrap();
    let q2 = db
        .embark_quest(NewQuest::new("bob", "second", t.required).hosts(hosts(&["h2", "h3"])))
        .await
        .unwrap();
    db.record_event("h1", "ops", t.completed, None)
        .await
        .unwrap();

    let open = db
        .list_quests(&QuestFilter {
            open_only: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(open.iter().map(|q| q.id).collect::<Vec<_>>(), vec![q2.id]);

    let by_creator = db
        .list_quests(&QuestFilter {
            creator: Some("alice".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_creator.len(), 1);
    assert_eq!(by_creator[0].id, q1.id);

    let by_host = db
        .list_quests(&QuestFilter {
            hostnames: hosts(&["h3"]),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_host.len(), 1);
    assert_eq!(by_host[0].id, q2.id);

    let target = Utc::now() + Duration::days(7);
    let updated = db
        .update_quest(
            q2.id,
            QuestUpdate {
                description: Some("second, revised".to_string()),
                target_time: Some(target),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.description, "second, revised");
    assert_eq!(updated.creator, "bob");
    assert!(updated.target_time.is_some());

    let err = db
        .update_quest(
            q2.id,
            QuestUpdate {
                target_time: Some(Utc::now() - Duration::days(1)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = db
        .update_quest(QuestId(99), QuestUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { kind: "quest", .. }));
}

#[tokio::test]
async fn record_events_for_quest_hosts() {
    let (db, t) = setup().await;
    let quest = db
        .embark_quest(
            NewQuest::new("alice", "rollout", t.required).hosts(hosts(&["h1", "h2"])),
        )
        .await
        .unwrap();

    let events = db
        .record_events_for_quest(quest.id, "ops", t.completed, Some("done"))
        .await
        .unwrap();
    assert_eq!(events.len(), 2);
    assert!(db.get_quest(quest.id).await.unwrap().is_complete());

    let err = db
        .record_events_for_quest(QuestId(99), "ops", t.completed, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { kind: "quest", .. }));
}

#[tokio::test]
async fn attaching_labors() {
    let (db, t) = setup().await;
    let quest = db
        .embark_quest(NewQuest::new("alice", "rollout", t.required).hosts(hosts(&["h1"])))
        .await
        .unwrap();
    db.record_event("h2", "ops", t.required, None)
        .await
        .unwrap();
    let stray = db
        .list_labors(&LaborFilter {
            hostname: Some("h2".to_string()),
            ..Default::default()
        })
        .await
        .unwrap()
        .remove(0);
    assert!(stray.quest_id.is_none());

    let attached = db.attach_labor_to_quest(stray.id, quest.id).await.unwrap();
    assert_eq!(attached.quest_id, Some(quest.id));
    assert_eq!(db.quest_progress(quest.id).await.unwrap().total_labors, 2);

    let err = db
        .attach_labor_to_quest(LaborId(99), quest.id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { kind: "labor", .. }));

    let err = db
        .attach_labor_to_quest(stray.id, QuestId(99))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { kind: "quest", .. }));
}

#[tokio::test]
async fn moving_the_last_open_labor_completes_the_quest_it_leaves() {
    let (db, t) = setup().await;
    let q1 = db
        .embark_quest(NewQuest::new("alice", "first", t.required).hosts(hosts(&["h1", "h2"])))
        .await
        .unwrap();
    let q2 = db
        .embark_quest(NewQuest::new("bob", "second", t.required).hosts(hosts(&["h3"])))
        .await
        .unwrap();
    db.record_event("h1", "ops", t.completed, None)
        .await
        .unwrap();
    let h2 = db
        .list_labors(&LaborFilter {
            hostname: Some("h2".to_string()),
            ..Default::default()
        })
        .await
        .unwrap()
        .remove(0);

    let mut notices = db.subscribe();
    db.attach_labor_to_quest(h2.id, q2.id).await.unwrap();

    let progress = db.quest_progress(q1.id).await.unwrap();
    assert_eq!((progress.open_labors, progress.total_labors), (0, 1));
    assert!(db.get_quest(q1.id).await.unwrap().is_complete());
    assert!(!db.get_quest(q2.id).await.unwrap().is_complete());

    let notice = notices.try_recv().unwrap();
    assert!(matches!(
        notice.kind,
        NoticeKind::QuestCompleted { quest_id, .. } if quest_id == q1.id
    ));
}
