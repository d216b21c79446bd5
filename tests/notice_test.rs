use hermes::db::Db;
use hermes::model::{EventTypeId, NewFate};
use hermes::notice::{Notice, NoticeKind, Notifier};
use tokio::sync::broadcast::Receiver;
use tokio::sync::broadcast::error::TryRecvError;

fn drain(rx: &mut Receiver<Notice>) -> Vec<Notice> {
    let mut out = Vec::new();
    while let Ok(notice) = rx.try_recv() {
        out.push(notice);
    }
    out
}

#[tokio::test]
async fn committed_batch_publishes_in_order() {
    let db = Db::in_memory().await.unwrap();
    let required = db.create_event_type("reboot", "required", None).await.unwrap();
    let completed = db.create_event_type("reboot", "completed", None).await.unwrap();
    db.create_fate(NewFate::new(required.id, completed.id))
        .await
        .unwrap();

    let mut rx = db.subscribe();
    let opening = db.record_event("h1", "ops", required.id, None).await.unwrap();
    let closing = db.record_event("h1", "ops", completed.id, None).await.unwrap();

    let notices = drain(&mut rx);
    let kinds: Vec<&NoticeKind> = notices.iter().map(|n| &n.kind).collect();
    assert_eq!(kinds.len(), 4);
    assert_eq!(
        kinds[0],
        &NoticeKind::EventsRecorded {
            batch_id: None,
            event_ids: vec![opening.id],
        }
    );
    assert!(matches!(kinds[1], NoticeKind::LaborsOpened { labor_ids } if labor_ids.len() == 1));
    assert_eq!(
        kinds[2],
        &NoticeKind::EventsRecorded {
            batch_id: None,
            event_ids: vec![closing.id],
        }
    );
    assert!(matches!(kinds[3], NoticeKind::LaborsCompleted { .. }));

    assert!(notices.windows(2).all(|w| w[0].seq < w[1].seq));
}

#[tokio::test]
async fn every_batch_publishes_at_least_one_notice() {
    let db = Db::in_memory().await.unwrap();
    let noise = db.create_event_type("noise", "seen", None).await.unwrap();

    let mut rx = db.subscribe();
    db.record_event("h1", "ops", noise.id, None).await.unwrap();

    let notices = drain(&mut rx);
    assert_eq!(notices.len(), 1);
    assert!(matches!(notices[0].kind, NoticeKind::EventsRecorded { .. }));
}

#[tokio::test]
async fn rolled_back_operations_publish_nothing() {
    let db = Db::in_memory().await.unwrap();
    let mut rx = db.subscribe();

    db.record_event("h1", "ops", EventTypeId(7), None)
        .await
        .unwrap_err();
    db.create_fate(NewFate::new(EventTypeId(1), EventTypeId(2)))
        .await
        .unwrap_err();

    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn fates_and_acknowledgements_are_announced() {
    let db = Db::in_memory().await.unwrap();
    let required = db.create_event_type("reboot", "required", None).await.unwrap();
    let completed = db.create_event_type("reboot", "completed", None).await.unwrap();

    let mut rx = db.subscribe();
    let fate = db
        .create_fate(NewFate::new(required.id, completed.id))
        .await
        .unwrap();
    db.record_event("h1", "ops", required.id, None).await.unwrap();
    let labor = db.open_labors().await.unwrap().remove(0);
    db.acknowledge_labor(labor.id, "alice").await.unwrap();

    let kinds: Vec<NoticeKind> = drain(&mut rx).into_iter().map(|n| n.kind).collect();
    assert_eq!(kinds[0], NoticeKind::FateCreated { fate_id: fate.id });
    assert_eq!(
        kinds.last(),
        Some(&NoticeKind::LaborAcknowledged {
            labor_id: labor.id,
            user: "alice".to_string(),
        })
    );
}

#[test]
fn publishing_without_subscribers_is_fine() {
    let notifier = Notifier::new(4);
    let first = notifier.publish(NoticeKind::FateCreated {
        fate_id: hermes::model::FateId(1),
    });
    let second = notifier.publish(NoticeKind::FateCreated {
        fate_id: hermes::model::FateId(2),
    });
    assert!(second > first);
}

#[test]
fn notices_serialize_with_a_type_tag() {
    let notifier = Notifier::default();
    let mut rx = notifier.subscribe();
    notifier.publish(NoticeKind::LaborsOpened {
        labor_ids: vec![hermes::model::LaborId(3)],
    });

    let notice = rx.try_recv().unwrap();
    let json = serde_json::to_value(&notice).unwrap();
    assert_eq!(json["kind"]["type"], "labors_opened");
    assert_eq!(json["kind"]["labor_ids"][0], 3);
    assert_eq!(json["seq"], 1);
}
