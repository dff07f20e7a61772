use super::{
    replication::{Directive, ReplicationTask},
    Frequency, Task, TaskKind, TaskState,
};
use crate::{
    config::ConfigErrors,
    tasklog::parse_time,
    test_utils::{at, FakeBackend},
};
use chrono::Duration;

fn replication(path: &str, destination: &str, frequency: Frequency) -> Task {
    Task::new(
        TaskKind::Replication(
            ReplicationTask::new(path.to_owned(), destination.to_owned()).unwrap(),
        ),
        frequency,
    )
}

#[test]
pub fn periods_are_fixed() {
    assert_eq!(Frequency::Daily.period(), Duration::days(1));
    assert_eq!(Frequency::Weekly.period(), Duration::days(7));
    assert_eq!(Frequency::Monthly.period(), Duration::days(30));
}

#[test]
pub fn unknown_frequency_is_illegal() {
    assert!(matches!(
        "hourly".parse::<Frequency>(),
        Err(ConfigErrors::IllegalFrequency(value)) if value == "hourly"
    ));
    assert_eq!("monthly".parse::<Frequency>().unwrap(), Frequency::Monthly);
}

#[test]
pub fn frequency_from_directive_arguments() {
    assert_eq!(Frequency::from_tokens(None), Frequency::Weekly);
    assert_eq!(Frequency::from_tokens(Some("")), Frequency::Weekly);
    assert_eq!(Frequency::from_tokens(Some("monthly")), Frequency::Monthly);
    assert_eq!(
        Frequency::from_tokens(Some("recursive daily")),
        Frequency::Daily
    );
    assert_eq!(
        Frequency::from_tokens(Some("monthly weekly")),
        Frequency::Weekly
    );
}

#[test]
pub fn never_run_task_is_one_week_due() {
    let now = at("2024-03-01T12:00:00Z");

    assert_eq!(replication("/a", "SE", Frequency::Weekly).due(now), 1.0);
    assert_eq!(replication("/a", "SE", Frequency::Daily).due(now), 7.0);
    assert_eq!(
        replication("/a", "SE", Frequency::Monthly).due(now),
        7.0 / 30.0
    );
}

#[test]
pub fn due_is_zero_one_period_after_last_run() {
    let now = at("2024-03-01T12:00:00Z");

    for frequency in [Frequency::Daily, Frequency::Weekly, Frequency::Monthly] {
        let mut task = replication("/a", "SE", frequency);
        task.mark_started(now - frequency.period(), "1");

        assert_eq!(task.due(now), 0.0);
    }
}

#[test]
pub fn due_is_scaled_by_period() {
    let now = at("2024-03-10T00:00:00Z");

    let mut daily = replication("/a", "SE", Frequency::Daily);
    daily.mark_started(now - Duration::hours(36), "1");
    let mut weekly = replication("/b", "SE", Frequency::Weekly);
    weekly.mark_started(now - Duration::days(9), "1");

    assert_eq!(daily.due(now), 0.5);
    assert!((weekly.due(now) - 2.0 / 7.0).abs() < 1e-9);
    assert!(daily.due(now) > weekly.due(now));

    let mut fresh = replication("/c", "SE", Frequency::Weekly);
    fresh.mark_started(now, "1");
    assert_eq!(fresh.due(now), -1.0);
}

#[test]
pub fn due_survives_extreme_timestamps() {
    let now = at("2024-03-10T00:00:00Z");
    let far_future = parse_time("+262142-12-31_00:00:00+0000").unwrap();
    let far_past = parse_time("-262000-01-01_00:00:00+0000").unwrap();

    let mut future = replication("/a", "SE", Frequency::Monthly);
    future.mark_started(far_future, "1");
    assert!(future.due(now) < 0.0);

    let mut past = replication("/a", "SE", Frequency::Daily);
    past.mark_started(far_past, "1");
    assert!(past.due(now) > 0.0);
}

#[test]
pub fn identifier_ignores_frequency() {
    let daily = replication("/nd280/raw", "RAL-disk", Frequency::Daily);
    let monthly = replication("/nd280/raw", "RAL-disk", Frequency::Monthly);

    assert_eq!(daily.id(), "replicate:RAL-disk:/nd280/raw_Task");
    assert_eq!(daily.id(), monthly.id());
    assert_ne!(
        daily.id(),
        replication("/nd280/raw", "OX-disk", Frequency::Daily).id()
    );
}

#[test]
pub fn whitespace_is_rejected_in_identifiers() {
    assert!(matches!(
        ReplicationTask::new("/with space".to_owned(), "SE".to_owned()),
        Err(ConfigErrors::InvalidIdentifier(_))
    ));
    assert!(ReplicationTask::new("/a".to_owned(), String::new()).is_err());
}

#[test]
pub fn run_records_done_and_failed() {
    let now = at("2024-03-01T12:00:00Z");
    let backend = FakeBackend::default().failing_on("/broken");
    let mut output = Vec::new();

    let mut good = replication("/good", "SE", Frequency::Daily);
    good.run(now, "42", &backend, &mut output).unwrap();
    assert_eq!(good.state(), Some(TaskState::Done));
    assert_eq!(good.last_done(), Some(now));
    assert_eq!(good.last_id(), Some("42"));

    let mut broken = replication("/broken", "SE", Frequency::Daily);
    assert!(broken.run(now, "42", &backend, &mut output).is_err());
    assert_eq!(broken.state(), Some(TaskState::Failed));
    assert_eq!(broken.last_done(), Some(now));

    assert_eq!(
        *backend.replicated.borrow(),
        vec![
            ("/good".to_owned(), "SE".to_owned()),
            ("/broken".to_owned(), "SE".to_owned())
        ]
    );
    assert!(String::from_utf8(output)
        .unwrap()
        .contains("replicating /good to SE"));
}

#[test]
pub fn parse_directive() {
    let directive = Directive::parse("RAL-disk", "replicate(/nd280/raw)", Some("daily")).unwrap();

    assert_eq!(
        directive,
        Directive {
            destination: "RAL-disk".to_owned(),
            path: "/nd280/raw".to_owned(),
            frequency: Frequency::Daily,
        }
    );

    for option in ["replicate", "replicate()", "replicate(/a", "replicates(/a)"] {
        assert!(
            matches!(
                Directive::parse("SE", option, None),
                Err(ConfigErrors::BadDirective(_))
            ),
            "{option} should be rejected"
        );
    }
}

#[test]
pub fn placeholder_resolves_to_lexicographic_maximum() {
    let backend =
        FakeBackend::default().with_directory("/data/runs", &["run001", "run010", "run002"]);

    let task = Directive::parse("SE", "replicate(/data/runs/@)", None)
        .unwrap()
        .resolve(&backend)
        .unwrap();

    assert_eq!(task.id(), "replicate:SE:/data/runs/run010_Task");
    let TaskKind::Replication(replication) = task.kind();
    assert_eq!(replication.path(), "/data/runs/run010");
    assert_eq!(replication.destination(), "SE");
}

#[test]
pub fn placeholder_is_not_numeric() {
    let backend = FakeBackend::default().with_directory("/", &["9", "10", "run2/"]);

    let task = Directive::parse("SE", "replicate(/@)", Some("daily"))
        .unwrap()
        .resolve(&backend)
        .unwrap();

    assert_eq!(task.id(), "replicate:SE:/run2_Task");
    assert_eq!(task.frequency(), Frequency::Daily);
}

#[test]
pub fn placeholder_in_empty_directory_fails() {
    let backend = FakeBackend::default().with_directory("/empty", &[]);

    assert!(matches!(
        Directive::parse("SE", "replicate(/empty/@)", None)
            .unwrap()
            .resolve(&backend),
        Err(ConfigErrors::EmptyDirectory(directory)) if directory == "/empty"
    ));
    assert!(matches!(
        Directive::parse("SE", "replicate(/missing/@)", None)
            .unwrap()
            .resolve(&backend),
        Err(ConfigErrors::Listing(_))
    ));
}

#[test]
pub fn only_trailing_placeholder_is_resolved() {
    let backend = FakeBackend::default();

    let task = Directive::parse("SE", "replicate(/a/@/b)", None)
        .unwrap()
        .resolve(&backend)
        .unwrap();

    assert_eq!(task.id(), "replicate:SE:/a/@/b_Task");
}
