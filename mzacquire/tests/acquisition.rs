//! End-to-end planner behavior driven through the public [`ScanPlanner`]
//! surface, with scan results synthesized in place of an instrument.

use mzacquire::config::{AcquisitionConfig, MethodKind};
use mzacquire::planner::{build_planner, ScanPlanner};
use mzacquire::peaks::Peak;
use mzacquire::scan::{keys, ScanKind, ScanRequest, ScanResult};

const CHARGE_2_SPACING: f64 = 1.008664 / 2.0;

/// A 4-peak charge-2 isotope series rooted at `mz`, intensities halving
/// along the series.
fn envelope(mz: f64, intensity: f32) -> Vec<Peak> {
    (0..4)
        .map(|i| {
            Peak::new(
                mz + CHARGE_2_SPACING * i as f64,
                intensity / 2f32.powi(i),
                None,
            )
        })
        .collect()
}

fn survey_centroids(roots: &[(f64, f32)]) -> Vec<Peak> {
    let mut centroids: Vec<Peak> = roots
        .iter()
        .flat_map(|(mz, intensity)| envelope(*mz, *intensity))
        .collect();
    centroids.sort_by(|a, b| a.mz.total_cmp(&b.mz));
    centroids
}

fn answer(request: &ScanRequest, centroids: Vec<Peak>) -> ScanResult {
    ScanResult::new(request.id, centroids)
}

fn parse_field(request: &ScanRequest, key: &str) -> f64 {
    request
        .get(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(f64::NAN)
}

#[test_log::test]
fn test_data_dependent_cycle() {
    let mut config = AcquisitionConfig::default();
    config.thresholds.precursor_agc = 1e5;
    let mut planner = build_planner(&config).unwrap();
    planner.initialize();

    let survey = planner.assign_scan().unwrap();
    assert_eq!(survey.kind, ScanKind::Ms1);
    assert_eq!(survey.get(keys::NCE), Some("0"));
    // One survey in flight at a time.
    assert!(planner.assign_scan().is_none());

    // A bright precursor at 400 and a dim one at 500 that gets the fixed
    // injection time instead of automatic gain control.
    let centroids = survey_centroids(&[(400.0, 2e6), (500.0, 5e4)]);
    planner.receive_scan(answer(&survey, centroids));

    let requests: Vec<ScanRequest> = std::iter::from_fn(|| planner.assign_scan()).collect();
    let ms2s: Vec<&ScanRequest> = requests.iter().filter(|r| r.kind == ScanKind::Ms2).collect();
    assert_eq!(ms2s.len(), 2);

    // Brighter precursor first, 2 Da isolation window centered on it.
    assert_eq!(parse_field(ms2s[0], keys::ISOLATION_RANGE_LOW), 399.0);
    assert_eq!(parse_field(ms2s[0], keys::ISOLATION_RANGE_HIGH), 401.0);
    assert_eq!(ms2s[0].get(keys::NCE_NORM_CHARGE), Some("2"));
    assert_eq!(ms2s[0].get(keys::AGC_TARGET), Some("100000"));
    assert!(ms2s[0].get(keys::AGC_MODE).is_none());

    // The dim one runs with gain control disabled and a 50 ms fill.
    assert_eq!(parse_field(ms2s[1], keys::ISOLATION_RANGE_LOW), 499.0);
    assert_eq!(ms2s[1].get(keys::AGC_MODE), Some("0"));
    assert_eq!(ms2s[1].get(keys::MAX_INJECTION_TIME), Some("50"));

    // The cycle always ends with a fresh survey queued.
    assert_eq!(requests.last().map(|r| r.kind), Some(ScanKind::Ms1));
    assert!(planner.assign_scan().is_none());
}

#[test_log::test]
fn test_ms2_budget_and_midcycle_survey() {
    let mut config = AcquisitionConfig::default();
    config.scans.ms2_per_cycle = 6;
    let mut planner = build_planner(&config).unwrap();
    planner.initialize();

    let survey = planner.assign_scan().unwrap();
    let roots: Vec<(f64, f32)> = (0..12).map(|i| (400.0 + 10.0 * i as f64, 1e6)).collect();
    planner.receive_scan(answer(&survey, survey_centroids(&roots)));

    let requests: Vec<ScanRequest> = std::iter::from_fn(|| planner.assign_scan()).collect();
    let ms2_count = requests.iter().filter(|r| r.kind == ScanKind::Ms2).count();
    let survey_count = requests.iter().filter(|r| r.kind == ScanKind::Ms1).count();
    assert_eq!(ms2_count, 6);
    // The refresh survey is interleaved two MS2s before the budget runs
    // out, and replaces the cycle-end survey.
    assert_eq!(survey_count, 1);
    let refresh_at = requests
        .iter()
        .position(|r| r.kind == ScanKind::Ms1)
        .unwrap();
    assert_eq!(refresh_at, 2);
}

#[test_log::test]
fn test_request_ids_strictly_increase() {
    let mut planner = build_planner(&AcquisitionConfig::default()).unwrap();
    planner.initialize();

    let mut survey = planner.assign_scan().unwrap();
    let mut ids = vec![survey.id];
    for _ in 0..3 {
        planner.receive_scan(answer(&survey, survey_centroids(&[(450.0, 1e6)])));
        let requests: Vec<ScanRequest> = std::iter::from_fn(|| planner.assign_scan()).collect();
        ids.extend(requests.iter().map(|r| r.id));
        // The cycle-end survey carries the next cycle.
        survey = requests
            .into_iter()
            .find(|r| r.kind == ScanKind::Ms1)
            .expect("every cycle re-queues a survey");
    }
    assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids not increasing: {ids:?}");
}

#[test_log::test]
fn test_dynamic_exclusion_suppresses_repeat_target() {
    let mut planner = build_planner(&AcquisitionConfig::default()).unwrap();
    planner.initialize();

    let survey = planner.assign_scan().unwrap();
    planner.receive_scan(answer(&survey, survey_centroids(&[(450.0, 1e6)])));
    let first_cycle: Vec<ScanRequest> = std::iter::from_fn(|| planner.assign_scan()).collect();
    assert_eq!(
        first_cycle.iter().filter(|r| r.kind == ScanKind::Ms2).count(),
        1
    );

    // The same precursor in the next survey is excluded for 30 s.
    let resurvey = first_cycle
        .iter()
        .find(|r| r.kind == ScanKind::Ms1)
        .unwrap();
    planner.receive_scan(answer(resurvey, survey_centroids(&[(450.0, 1e6)])));
    let second_cycle: Vec<ScanRequest> = std::iter::from_fn(|| planner.assign_scan()).collect();
    assert_eq!(
        second_cycle.iter().filter(|r| r.kind == ScanKind::Ms2).count(),
        0
    );
    // The cycle-end survey still goes out even with nothing to fragment.
    assert_eq!(
        second_cycle.iter().filter(|r| r.kind == ScanKind::Ms1).count(),
        1
    );
}

#[test_log::test]
fn test_watchdog_recovers_lost_survey() {
    let mut config = AcquisitionConfig::default();
    config.watchdog_seconds = Some(0.05);
    let mut planner = build_planner(&config).unwrap();
    planner.initialize();

    let lost = planner.assign_scan().unwrap();
    assert!(planner.assign_scan().is_none());

    std::thread::sleep(std::time::Duration::from_millis(80));
    let replacement = planner.assign_scan().unwrap();
    assert_eq!(replacement.kind, ScanKind::Ms1);
    assert!(replacement.id > lost.id);

    // The stale survey turning up late must not start a second cycle.
    planner.receive_scan(answer(&lost, survey_centroids(&[(450.0, 1e6)])));
    assert!(planner.assign_scan().is_none());

    planner.receive_scan(answer(&replacement, survey_centroids(&[(450.0, 1e6)])));
    let requests: Vec<ScanRequest> = std::iter::from_fn(|| planner.assign_scan()).collect();
    assert_eq!(
        requests.iter().filter(|r| r.kind == ScanKind::Ms2).count(),
        1
    );
}

#[test_log::test]
fn test_zero_mz_precursor_never_targeted() {
    let mut planner = build_planner(&AcquisitionConfig::default()).unwrap();
    planner.initialize();

    // A deisotoped series rooted at m/z 0 ranks like any other candidate
    // but must never become an isolation target.
    let survey = planner.assign_scan().unwrap();
    let centroids = survey_centroids(&[(0.0, 5e5), (400.0, 1e6)]);
    planner.receive_scan(answer(&survey, centroids));

    let requests: Vec<ScanRequest> = std::iter::from_fn(|| planner.assign_scan()).collect();
    let ms2s: Vec<&ScanRequest> = requests.iter().filter(|r| r.kind == ScanKind::Ms2).collect();
    assert_eq!(ms2s.len(), 1);
    assert_eq!(parse_field(ms2s[0], keys::ISOLATION_RANGE_LOW), 399.0);
    assert_eq!(parse_field(ms2s[0], keys::ISOLATION_RANGE_HIGH), 401.0);
    assert_eq!(requests.last().map(|r| r.kind), Some(ScanKind::Ms1));
}

#[test_log::test]
fn test_unsolicited_result_ignored() {
    let mut planner = build_planner(&AcquisitionConfig::default()).unwrap();
    planner.initialize();

    planner.receive_scan(ScanResult::new(7, survey_centroids(&[(450.0, 1e6)])));
    // Nothing was requested, so nothing is scheduled off of it and the
    // next assignment is still the initial survey.
    let first = planner.assign_scan().unwrap();
    assert_eq!(first.kind, ScanKind::Ms1);
    assert!(planner.assign_scan().is_none());
}

#[test_log::test]
fn test_boxcar_cycle() {
    let config = AcquisitionConfig {
        method: MethodKind::BoxCar,
        ..Default::default()
    };
    let mut planner = build_planner(&config).unwrap();
    planner.initialize();

    let cycle: Vec<ScanRequest> = std::iter::from_fn(|| planner.assign_scan()).collect();
    assert_eq!(cycle.len(), 4);
    assert_eq!(cycle[0].kind, ScanKind::Ms1);
    for (i, request) in cycle[1..].iter().enumerate() {
        assert_eq!(request.kind, ScanKind::BoxMs1(i as u8 + 1));
        assert!(request.get(keys::MSX_INJECT_RANGES).is_some());
    }

    // The plain survey result is recorded but never drives selection.
    planner.receive_scan(answer(&cycle[0], survey_centroids(&[(999.0, 9e9)])));
    assert!(planner.assign_scan().is_none());

    // Partitions complete out of order; selection runs only on the last.
    planner.receive_scan(answer(&cycle[2], survey_centroids(&[(500.0, 1e6)])));
    planner.receive_scan(answer(&cycle[3], survey_centroids(&[(600.0, 2e6)])));
    assert!(planner.assign_scan().is_none());
    planner.receive_scan(answer(&cycle[1], survey_centroids(&[(400.0, 3e6)])));

    // Exactly three fragmentation scans are queued; draining further
    // would cross into the next on-demand survey cycle.
    let ms2s: Vec<ScanRequest> = std::iter::from_fn(|| planner.assign_scan())
        .take(3)
        .collect();
    assert!(ms2s.iter().all(|r| r.kind == ScanKind::Ms2));
    // Ranked by intensity, and 999 from the plain survey is absent.
    assert_eq!(parse_field(&ms2s[0], keys::ISOLATION_RANGE_LOW), 399.0);
    assert_eq!(parse_field(&ms2s[1], keys::ISOLATION_RANGE_LOW), 599.0);
    assert_eq!(parse_field(&ms2s[2], keys::ISOLATION_RANGE_LOW), 499.0);
    // No cycle-end survey for this method: once the queue runs dry the
    // next full survey set is synthesized on demand.
    let next_cycle: Vec<ScanRequest> = std::iter::from_fn(|| planner.assign_scan()).collect();
    assert_eq!(next_cycle.len(), 4);
    assert_eq!(next_cycle[0].kind, ScanKind::Ms1);
    for (i, request) in next_cycle[1..].iter().enumerate() {
        assert_eq!(request.kind, ScanKind::BoxMs1(i as u8 + 1));
    }
}
