use hermes::db::Db;
use hermes::error::Error;
use hermes::model::{EventTypeId, Fate, LaborFilter, LaborId, NewFate};

/// Event types 1..=n, all in the `reboot` category, in creation order.
async fn setup(states: &[&str]) -> (Db, Vec<EventTypeId>) {
    let db = Db::in_memory().await.unwrap();
    let mut types = Vec::new();
    for state in states {
        let et = db.create_event_type("reboot", state, None).await.unwrap();
        types.push(et.id);
    }
    (db, types)
}

/// A chain of fates through `types`: types[0]→types[1], types[1]→types[2], ...
async fn chain(db: &Db, types: &[EventTypeId]) -> Vec<Fate> {
    let mut fates: Vec<Fate> = Vec::new();
    for pair in types.windows(2) {
        let mut new = NewFate::new(pair[0], pair[1]);
        if let Some(prev) = fates.last() {
            new = new.follows(prev.id);
        }
        fates.push(db.create_fate(new).await.unwrap());
    }
    fates
}

#[tokio::test]
async fn single_fate_opens_then_closes() {
    let (db, t) = setup(&["required", "completed"]).await;
    chain(&db, &t).await;

    let opening = db.record_event("h1", "ops", t[0], None).await.unwrap();
    let open = db.open_labors().await.unwrap();
    assert_eq!(open.len(), 1);
    let labor = &open[0];
    assert_eq!(labor.creation_event_id, opening.id);
    assert_eq!(labor.host_id, opening.host_id);
    assert!(labor.starting_labor_id.is_none());
    assert!(labor.quest_id.is_none());
    assert!(labor.is_open());

    let closing = db.record_event("h1", "ops", t[1], None).await.unwrap();
    let closed = db.get_labor(labor.id).await.unwrap();
    assert_eq!(closed.completion_event_id, Some(closing.id));
    assert!(closed.completion_time.is_some());

    // No successors: nothing new opens.
    assert!(db.open_labors().await.unwrap().is_empty());
    assert_eq!(
        db.list_labors(&LaborFilter::default()).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn completion_on_another_host_does_not_close() {
    let (db, t) = setup(&["required", "completed"]).await;
    chain(&db, &t).await;

    db.record_event("h1", "ops", t[0], None).await.unwrap();
    db.record_event("h2", "ops", t[1], None).await.unwrap();

    let open = db.open_labors().await.unwrap();
    assert_eq!(open.len(), 1);
}

#[tokio::test]
async fn unrelated_event_changes_nothing() {
    let (db, t) = setup(&["required", "completed", "noise"]).await;
    chain(&db, &t[..2]).await;

    db.record_event("h1", "ops", t[2], None).await.unwrap();
    assert!(
        db.list_labors(&LaborFilter::default())
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn chained_fates_hand_off_to_the_origin() {
    let (db, t) = setup(&["a", "b", "c"]).await;
    chain(&db, &t).await;

    db.record_event("h1", "ops", t[0], None).await.unwrap();
    let l1 = db.open_labors().await.unwrap().remove(0);

    let b = db.record_event("h1", "ops", t[1], None).await.unwrap();
    let l1 = db.get_labor(l1.id).await.unwrap();
    assert_eq!(l1.completion_event_id, Some(b.id));

    let open = db.open_labors().await.unwrap();
    assert_eq!(open.len(), 1);
    let l2 = open[0].clone();
    assert_eq!(l2.starting_labor_id, Some(l1.id));
    assert_eq!(l2.creation_event_id, b.id);

    let c = db.record_event("h1", "ops", t[2], None).await.unwrap();
    let l2 = db.get_labor(l2.id).await.unwrap();
    assert_eq!(l2.completion_event_id, Some(c.id));
    assert!(db.open_labors().await.unwrap().is_empty());

    let followers = db
        .list_labors(&LaborFilter {
            starting_labor_id: Some(l1.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(followers, vec![l2.clone()]);

    let whole_chain = db
        .list_labors(&LaborFilter {
            chain: Some(l1.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(whole_chain, vec![l1, l2]);
}

#[tokio::test]
async fn deep_chains_keep_the_first_labor_as_origin() {
    let (db, t) = setup(&["a", "b", "c", "d"]).await;
    chain(&db, &t).await;

    for event_type in &t[..3] {
        db.record_event("h1", "ops", *event_type, None)
            .await
            .unwrap();
    }

    let all = db.list_labors(&LaborFilter::default()).await.unwrap();
    assert_eq!(all.len(), 3);
    let origin = all[0].id;
    assert!(all[0].starting_labor_id.is_none());
    assert_eq!(all[1].starting_labor_id, Some(origin));
    assert_eq!(all[2].starting_labor_id, Some(origin));
    assert_eq!(all[2].chain_origin(), origin);

    let open = db.open_labors().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, all[2].id);
}

#[tokio::test]
async fn completion_fields_are_set_together() {
    let (db, t) = setup(&["a", "b", "c"]).await;
    chain(&db, &t).await;

    for host in ["h1", "h2", "h3"] {
        db.record_event(host, "ops", t[0], None).await.unwrap();
    }
    db.record_event("h1", "ops", t[1], None).await.unwrap();
    db.record_event("h2", "ops", t[1], None).await.unwrap();
    db.record_event("h2", "ops", t[2], None).await.unwrap();

    let all = db.list_labors(&LaborFilter::default()).await.unwrap();
    assert_eq!(all.len(), 5);
    for labor in &all {
        assert_eq!(
            labor.completion_time.is_none(),
            labor.completion_event_id.is_none(),
            "labor {} breaks the completion invariant",
            labor.id
        );
    }

    let closed = db
        .list_labors(&LaborFilter {
            open: Some(false),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(closed.len(), 3);
}

#[tokio::test]
async fn batch_opens_one_labor_per_host() {
    let (db, t) = setup(&["required", "completed"]).await;
    chain(&db, &t).await;

    let hosts: Vec<String> = (1..=5).map(|i| format!("web-{i}")).collect();
    db.record_events_for_hosts(&hosts, "ops", t[0], None)
        .await
        .unwrap();
    assert_eq!(db.open_labors().await.unwrap().len(), 5);

    db.record_events_for_hosts(&hosts[..2], "ops", t[1], None)
        .await
        .unwrap();
    assert_eq!(db.open_labors().await.unwrap().len(), 3);
}

#[tokio::test]
async fn list_labors_filters() {
    let (db, t) = setup(&["required", "completed"]).await;
    chain(&db, &t).await;
    let puppet = db.create_event_type("puppet", "failed", None).await.unwrap();
    let fixed = db.create_event_type("puppet", "fixed", None).await.unwrap();
    db.create_fate(NewFate::new(puppet.id, fixed.id))
        .await
        .unwrap();

    db.record_event("h1", "ops", t[0], None).await.unwrap();
    db.record_event("h2", "ops", t[0], None).await.unwrap();
    db.record_event("h2", "ops", puppet.id, None).await.unwrap();

    let on_h2 = db
        .list_labors(&LaborFilter {
            hostname: Some("h2".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(on_h2.len(), 2);

    let puppet_labors = db
        .list_labors(&LaborFilter {
            category: Some("puppet".to_string()),
            state: Some("failed".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(puppet_labors.len(), 1);
    assert_eq!(puppet_labors[0].host_id, on_h2[1].host_id);

    let page = db
        .list_labors(&LaborFilter {
            limit: Some(1),
            offset: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page, vec![on_h2[0].clone()]);
}

#[tokio::test]
async fn acknowledgement() {
    let (db, t) = setup(&["required", "completed"]).await;
    chain(&db, &t).await;
    db.record_event("h1", "ops", t[0], None).await.unwrap();
    db.record_event("h2", "ops", t[0], None).await.unwrap();
    let open = db.open_labors().await.unwrap();

    let acked = db.acknowledge_labor(open[0].id, "alice").await.unwrap();
    assert!(acked.is_acknowledged());
    assert_eq!(acked.ack_user.as_deref(), Some("alice"));

    // Last write wins.
    let acked = db.acknowledge_labor(open[0].id, "bob").await.unwrap();
    assert_eq!(acked.ack_user.as_deref(), Some("bob"));

    let unacked = db.open_unacknowledged_labors().await.unwrap();
    assert_eq!(unacked.len(), 1);
    assert_eq!(unacked[0].id, open[1].id);

    let err = db.acknowledge_labor(LaborId(999), "alice").await.unwrap_err();
    assert!(matches!(err, Error::NotFound { kind: "labor", .. }));

    let err = db.acknowledge_labor(open[1].id, " ").await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn labors_carry_the_designation_of_their_fates() {
    let (db, t) = setup(&["required", "completed", "verified"]).await;
    let reboot = db
        .create_fate(NewFate::new(t[0], t[1]).for_owner(false).for_creator(true))
        .await
        .unwrap();
    assert!(!reboot.for_owner && reboot.for_creator);
    let verify = db
        .create_fate(NewFate::new(t[1], t[2]).follows(reboot.id))
        .await
        .unwrap();
    assert!(verify.for_owner && !verify.for_creator);

    db.record_event("h1", "ops", t[0], None).await.unwrap();
    let first = db.open_labors().await.unwrap().remove(0);
    assert!(!first.for_owner && first.for_creator);

    db.record_event("h1", "ops", t[1], None).await.unwrap();
    let second = db.open_labors().await.unwrap().remove(0);
    assert_eq!(second.starting_labor_id, Some(first.id));
    assert!(second.for_owner && !second.for_creator);

    let for_creator = db
        .list_labors(&LaborFilter {
            for_creator: Some(true),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(for_creator.len(), 1);
    assert_eq!(for_creator[0].id, first.id);

    let for_owner = db
        .list_labors(&LaborFilter {
            for_owner: Some(true),
            open: Some(true),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(for_owner.len(), 1);
    assert_eq!(for_owner[0].id, second.id);
}
