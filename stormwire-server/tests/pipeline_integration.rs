//! End-to-end pipeline scenarios
//!
//! Raw product in, frames out: parser, store, event stream and persistence
//! working together, no network involved.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use stormwire_common::alert::{Alert, AlertSource, Significance, VtecAction};
use stormwire_common::events::{AlertEvent, RemovalReason};
use stormwire_server::parser::{ParserConfig, ProductParser};
use stormwire_server::refdata::{UgcEntry, UgcKind, UgcTable};
use stormwire_server::store::{persist, AlertStore, UpsertOutcome};
use stormwire_server::ws::{Frame, FrameKind};

fn received() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 12, 20, 18, 16, 0).unwrap()
}

fn reference_table() -> Arc<UgcTable> {
    Arc::new(UgcTable::from_entries(vec![
        UgcEntry {
            code: "OHC085".into(),
            name: "Lake County, OH".into(),
            state: "OH".into(),
            kind: UgcKind::County,
        },
        UgcEntry {
            code: "OHC093".into(),
            name: "Lorain County, OH".into(),
            state: "OH".into(),
            kind: UgcKind::County,
        },
    ]))
}

fn parser() -> ProductParser {
    ProductParser::new(reference_table(), ParserConfig::default())
}

const SVR_NEW: &str = "\
WUUS53 KCLE 201815
SVRCLE
OHC085-201900-
/O.NEW.KCLE.SV.W.0042.251220T1815Z-251220T1900Z/

...A SEVERE THUNDERSTORM WARNING IS IN EFFECT UNTIL 200 PM EST...

HAZARD...Wind gusts up to 70 mph and large hail.
HAIL...1.00 IN

LAT...LON 4105 8145 4098 8132 4087 8145 4093 8167
TIME...MOT...LOC 1845Z 245DEG 35KT 4105 8132

$$
";

const SVR_CANCEL: &str = "\
WUUS53 KCLE 201845
SVSCLE
OHC085-201900-
/O.CAN.KCLE.SV.W.0042.000000T0000Z-251220T1900Z/

...THE SEVERE THUNDERSTORM WARNING FOR LAKE COUNTY IS CANCELLED...

$$
";

/// Scenario: a pushed Severe Thunderstorm Warning reaches a subscriber as
/// one `new` frame with the threat numbers intact.
#[test]
fn pushed_warning_reaches_subscribers() {
    let parser = parser();
    let store = AlertStore::new(60);
    let (bulk, mut events) = store.snapshot_and_subscribe();
    assert!(bulk.is_empty());

    let alerts = parser
        .parse_product(SVR_NEW, AlertSource::Push, received())
        .unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(store.upsert(alerts[0].clone()), UpsertOutcome::Added);

    let event = events.try_recv().unwrap();
    let frame = Frame::from_event(&event);
    assert_eq!(frame.kind, FrameKind::New);
    let alert = &frame.data["alert"];
    assert_eq!(alert["product_id"], "KCLE-SV.W-201815-0042");
    assert_eq!(alert["event_name"], "Severe Thunderstorm Warning");
    assert_eq!(alert["threat"]["max_wind_gust_mph"], 70);
    assert_eq!(alert["threat"]["max_hail_size_inches"], 1.0);
    assert_eq!(alert["display_locations"], "Lake County, OH");
}

/// Scenario: a follow-up cancellation removes the original, stores nothing
/// new, and subscribers see one `remove` frame with the original id.
#[test]
fn cancellation_follows_warning() {
    let parser = parser();
    let store = AlertStore::new(60);

    let warning = parser
        .parse_product(SVR_NEW, AlertSource::Push, received())
        .unwrap();
    store.upsert(warning[0].clone());

    let (bulk, mut events) = store.snapshot_and_subscribe();
    assert_eq!(bulk.len(), 1);

    let cancel = parser
        .parse_product(SVR_CANCEL, AlertSource::Push, received() + Duration::minutes(30))
        .unwrap();
    assert_eq!(cancel.len(), 1);
    assert_eq!(
        cancel[0].vtec.as_ref().unwrap().action,
        VtecAction::Can
    );
    assert_eq!(store.upsert(cancel[0].clone()), UpsertOutcome::Superseded);
    assert_eq!(store.len(), 0);

    match events.try_recv().unwrap() {
        AlertEvent::AlertRemoved {
            product_id, reason, ..
        } => {
            assert_eq!(product_id, "KCLE-SV.W-201815-0042");
            assert_eq!(reason, RemovalReason::Cancelled);
        }
        other => panic!("expected a removal, got {}", other.event_type()),
    }
    assert!(events.try_recv().is_err(), "cancellation must not add anything");
}

fn pull_alert(etn: u16, stamp: &str, expires_in_minutes: i64) -> Alert {
    let mut alert = Alert::new(format!("KCLE-SV.W-{stamp}-{etn:04}"), AlertSource::Pull);
    alert.phenomenon = "SV".into();
    alert.significance = Significance::Warning;
    alert.affected_areas = vec!["OHC085".into()];
    let expiration = Utc::now() + Duration::minutes(expires_in_minutes);
    alert.expiration_time = Some(expiration);
    alert.vtec = Some(stormwire_common::alert::VtecInfo {
        product_class: "O".into(),
        action: VtecAction::New,
        office: "KCLE".into(),
        phenomenon: "SV".into(),
        significance: Significance::Warning,
        event_tracking_number: etn,
        begin_time: None,
        end_time: Some(expiration),
        raw: String::new(),
    });
    alert.finish_classification();
    alert
}

/// Scenario: after a partition, the pull result {B, C} reconciles against
/// push-delivered {A, B}: expired A goes, B stays untouched, C arrives.
#[test]
fn late_pull_reconciliation() {
    let store = AlertStore::new(60);

    let mut a = pull_alert(1, "201700", -15);
    a.source = AlertSource::Push;
    let mut b = pull_alert(2, "201800", 45);
    b.source = AlertSource::Push;
    store.upsert(a);
    store.upsert(b);

    let (_, mut events) = store.snapshot_and_subscribe();

    let pulled = vec![pull_alert(2, "201800", 45), pull_alert(3, "201810", 50)];
    let (changed, removed) = store.reconcile_pull(pulled, Utc::now());
    assert_eq!(changed, 1, "only C is new");
    assert_eq!(removed, 1, "only expired A departs");
    assert_eq!(store.len(), 2);

    // The subscriber sees the minimum diff: one add, one remove.
    let mut adds = 0;
    let mut removes = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            AlertEvent::AlertAdded { alert, .. } => {
                adds += 1;
                assert_eq!(alert.product_id, "KCLE-SV.W-201810-0003");
            }
            AlertEvent::AlertRemoved {
                product_id, reason, ..
            } => {
                removes += 1;
                assert_eq!(product_id, "KCLE-SV.W-201700-0001");
                assert_eq!(reason, RemovalReason::Expired);
            }
            other => panic!("unexpected event {}", other.event_type()),
        }
    }
    assert_eq!((adds, removes), (1, 1));
}

/// Scenario: one slow subscriber must not cost a healthy subscriber any
/// events; each broadcast receiver is independent.
#[test]
fn slow_subscriber_does_not_starve_others() {
    let store = AlertStore::new(60);
    let (_, mut healthy) = store.snapshot_and_subscribe();
    let (_, slow) = store.snapshot_and_subscribe();
    drop(slow); // never drained

    for etn in 1..=100u16 {
        store.upsert(pull_alert(etn, &format!("18{etn:04}"), 45));
    }

    let mut seen = Vec::new();
    while let Ok(event) = healthy.try_recv() {
        seen.push(event.product_id().to_string());
    }
    assert_eq!(seen.len(), 100);
    for (i, id) in seen.iter().enumerate() {
        assert!(id.ends_with(&format!("{:04}", i + 1)));
    }
}

/// Scenario: restart with persistence; unexpired alerts come back, expired
/// ones do not, and the first bulk equals the rehydrated set.
#[test]
fn restart_rehydrates_unexpired_alerts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("alerts.json");

    let parser = parser();
    let store = AlertStore::new(60);
    let parsed = parser
        .parse_product(SVR_NEW, AlertSource::Push, received())
        .unwrap();
    store.upsert(parsed[0].clone());
    store.upsert(pull_alert(7, "201830", -30)); // expired while down
    persist::save(&store, &path).unwrap();

    // "Restart": a fresh store loads the snapshot as of a time before the
    // parsed warning's 19:00Z expiration.
    let now = received() + Duration::minutes(10);
    let restored = AlertStore::new(60);
    restored.restore(persist::load(&path, now).unwrap());

    let (bulk, _) = restored.snapshot_and_subscribe();
    assert_eq!(bulk.len(), 1);
    assert_eq!(bulk[0].product_id, "KCLE-SV.W-201815-0042");
    assert_eq!(bulk[0].threat.max_wind_gust_mph, Some(70));
}

/// Render the structured fields of a parsed alert back into product text
/// and parse it again; the structured fields survive the round trip.
#[test]
fn parse_is_stable_under_rendering() {
    let parser = parser();
    let original = parser
        .parse_product(SVR_NEW, AlertSource::Push, received())
        .unwrap()
        .remove(0);

    let vtec = original.vtec.as_ref().unwrap();
    let rendered = format!(
        "WUUS53 KCLE 201815\nSVRCLE\nOHC085-201900-\n{}\n\n...{}...\n\nHAIL...{:.2} IN\nWIND GUSTS UP TO {} MPH\n\nLAT...LON {}\n\n$$\n",
        vtec.raw,
        original.headline,
        original.threat.max_hail_size_inches.unwrap(),
        original.threat.max_wind_gust_mph.unwrap(),
        original
            .polygon
            .iter()
            .take(original.polygon.len() - 1)
            .map(|p| format!("{:.0} {:.0}", p[0] * 100.0, -p[1] * 100.0))
            .collect::<Vec<_>>()
            .join(" "),
    );

    let reparsed = parser
        .parse_product(&rendered, AlertSource::Push, received())
        .unwrap()
        .remove(0);

    assert_eq!(reparsed.product_id, original.product_id);
    assert_eq!(reparsed.phenomenon, original.phenomenon);
    assert_eq!(reparsed.significance, original.significance);
    assert_eq!(reparsed.vtec, original.vtec);
    assert_eq!(reparsed.affected_areas, original.affected_areas);
    assert_eq!(reparsed.expiration_time, original.expiration_time);
    assert_eq!(reparsed.polygon, original.polygon);
    assert_eq!(reparsed.headline, original.headline);
    assert_eq!(
        reparsed.threat.max_hail_size_inches,
        original.threat.max_hail_size_inches
    );
    assert_eq!(
        reparsed.threat.max_wind_gust_mph,
        original.threat.max_wind_gust_mph
    );
}

/// Applying the same NEW twice yields added then ignored; a no-op CON bumps
/// only the update counter.
#[test]
fn idempotence_and_noop_updates() {
    let parser = parser();
    let store = AlertStore::new(60);

    let first = parser
        .parse_product(SVR_NEW, AlertSource::Push, received())
        .unwrap()
        .remove(0);
    assert_eq!(store.upsert(first.clone()), UpsertOutcome::Added);
    assert_eq!(store.upsert(first), UpsertOutcome::Ignored);

    let followup = SVR_NEW.replace("/O.NEW.", "/O.CON.").replace("201815\n", "201830\n");
    let con = parser
        .parse_product(&followup, AlertSource::Push, received() + Duration::minutes(15))
        .unwrap()
        .remove(0);
    assert_eq!(store.upsert(con), UpsertOutcome::Updated);

    let current = store.get("KCLE-SV.W-201830-0042").unwrap();
    assert_eq!(current.update_count, 1);
    assert_eq!(current.threat.max_wind_gust_mph, Some(70));
    assert_eq!(store.len(), 1);
}
