use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use seedsweep::PlanError;
use seedsweep::search::{SearchDefinition, SearchKind, TargetRange, plan};

fn random_definition(rng: &mut ChaCha8Rng) -> SearchDefinition {
    let start = rng.random_range(0..1_000_000u64);
    let instants = rng.random_range(1..5_000u64);
    let combinations = rng.random_range(1..=16u64);
    let kind = SearchKind::ALL[rng.random_range(0..SearchKind::ALL.len())];
    SearchDefinition::new(
        kind,
        TargetRange::new(start, start + instants).with_combinations(combinations),
    )
}

#[test]
fn test_random_plans_partition_the_domain() {
    let mut rng = ChaCha8Rng::seed_from_u64(0x5EED);

    for _ in 0..500 {
        let def = random_definition(&mut rng);
        let parts = rng.random_range(1..=64usize);
        let size = def.range.domain_size().unwrap();
        let tasks = plan(&def, parts).unwrap();

        assert_eq!(tasks.len() as u64, (parts as u64).min(size));

        let mut offset = 0;
        for (i, task) in tasks.iter().enumerate() {
            assert_eq!(task.id.0, i);
            assert_eq!(task.sub_range.offset, offset, "tasks must be contiguous");
            assert!(task.target_count > 0);
            assert_eq!(task.target_count, task.sub_range.len);
            offset = task.sub_range.end();
        }
        assert_eq!(offset, size, "tasks must cover the domain");

        let min = tasks.iter().map(|t| t.target_count).min().unwrap();
        let max = tasks.iter().map(|t| t.target_count).max().unwrap();
        assert!(max - min <= 1, "unbalanced plan: {}..{}", min, max);
    }
}

#[test]
fn test_random_plans_are_idempotent() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);

    for _ in 0..100 {
        let def = random_definition(&mut rng);
        let parts = rng.random_range(1..=32usize);
        assert_eq!(plan(&def, parts).unwrap(), plan(&def, parts).unwrap());
    }
}

#[test]
fn test_week_of_seconds_on_four_workers() {
    let def = SearchDefinition::new(SearchKind::BootSeed, TargetRange::new(0, 604_800));
    let tasks = plan(&def, 4).unwrap();

    assert_eq!(tasks.len(), 4);
    assert!(tasks.iter().all(|t| t.target_count == 151_200));
}

#[test]
fn test_definition_errors() {
    let empty = SearchDefinition::new(SearchKind::Egg, TargetRange::new(10, 10));
    assert!(matches!(plan(&empty, 2), Err(PlanError::InvalidDomain { .. })));

    let reversed = SearchDefinition::new(SearchKind::Egg, TargetRange::new(10, 5));
    assert!(matches!(plan(&reversed, 2), Err(PlanError::InvalidDomain { .. })));

    let mut unknown = SearchDefinition::new(SearchKind::Egg, TargetRange::new(0, 5));
    unknown.kind = "roaming".into();
    assert!(matches!(plan(&unknown, 2), Err(PlanError::UnsupportedKind { .. })));
}
